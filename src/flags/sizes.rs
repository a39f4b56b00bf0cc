//! The structured tile/block/grid size flag.
//!
//! A size flag holds three co-dependent multi-dimensional integer vectors.
//! Unlike the enumerated flags it is not resampled on mutation; it takes a
//! bounded random walk (`permute`) so the neighborhood keeps local
//! structure. It also owns the parser for the size dump the code generator
//! writes to stderr.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::Serialize;

use crate::error::FatalError;

/// Maximum per-dimension step a permutation may take.
const MAX_PERMUTE_DISTANCE: i64 = 5;

/// The value domain for one size category (tile, block, or grid).
///
/// Both ranges are half-open: dimensionality is drawn from
/// `dim_range.0..dim_range.1` and each dimension's value from
/// `value_range.0..value_range.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeSpace {
    /// Legal dimensionalities, `[low, high)`. The low bound must be >= 1.
    pub dim_range: (usize, usize),
    /// Legal per-dimension values, `[low, high)`.
    pub value_range: (i64, i64),
}

impl SizeSpace {
    /// A space whose dimensionality is itself sampled.
    pub fn new(dim_range: (usize, usize), value_range: (i64, i64)) -> Self {
        assert!(dim_range.0 >= 1, "size dimensionality must be at least 1");
        assert!(dim_range.0 < dim_range.1, "empty dimensionality range");
        assert!(value_range.0 < value_range.1, "empty value range");
        Self { dim_range, value_range }
    }

    /// A space locked to a known dimensionality, used once a flag has been
    /// specialized to a kernel whose realized sizes were observed.
    pub fn fixed_dims(dims: usize, value_range: (i64, i64)) -> Self {
        Self::new((dims, dims + 1), value_range)
    }

    fn span(&self) -> i64 {
        self.value_range.1 - self.value_range.0
    }

    fn random_vector(&self, rng: &mut impl Rng) -> Vec<i64> {
        let dims = rng.gen_range(self.dim_range.0..self.dim_range.1);
        (0..dims)
            .map(|_| rng.gen_range(self.value_range.0..self.value_range.1))
            .collect()
    }

    /// Walks each dimension a random distance (0..=5) in a random
    /// direction, wrapping around the domain. Modular arithmetic rather
    /// than clamping, so values near the edges are not over-represented.
    fn permute_vector(&self, value: &[i64], rng: &mut impl Rng) -> Vec<i64> {
        let (low, _) = self.value_range;
        let span = self.span();
        value
            .iter()
            .map(|&v| {
                let idx = v - low;
                let distance = rng.gen_range(0..=MAX_PERMUTE_DISTANCE);
                let step = if rng.gen_bool(0.5) { distance } else { -distance };
                low + (idx + step).rem_euclid(span)
            })
            .collect()
    }
}

/// One concrete assignment of tile, block, and grid size vectors.
///
/// Also used for the sizes the generator reports it actually chose.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SizesValue {
    /// Tile size per tiled dimension.
    pub tile: Vec<i64>,
    /// Thread-block size per dimension.
    pub block: Vec<i64>,
    /// Grid size per dimension.
    pub grid: Vec<i64>,
}

/// The full domain of one size flag: three independent size spaces, plus
/// the kernel the flag is specialized to (`None` means "all kernels").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizesDomain {
    /// Kernel identifier once per-kernel tuning has been unlocked.
    pub kernel: Option<String>,
    /// Domain of the tile size vector.
    pub tile: SizeSpace,
    /// Domain of the block size vector.
    pub block: SizeSpace,
    /// Domain of the grid size vector.
    pub grid: SizeSpace,
}

impl SizesDomain {
    /// Draws each category's dimensionality and values uniformly.
    pub fn random_value(&self, rng: &mut impl Rng) -> SizesValue {
        SizesValue {
            tile: self.tile.random_vector(rng),
            block: self.block.random_vector(rng),
            grid: self.grid.random_vector(rng),
        }
    }

    /// Bounded random walk over all three categories; dimensionality is
    /// preserved.
    pub fn permute(&self, value: &SizesValue, rng: &mut impl Rng) -> SizesValue {
        SizesValue {
            tile: self.tile.permute_vector(&value.tile, rng),
            block: self.block.permute_vector(&value.block, rng),
            grid: self.grid.permute_vector(&value.grid, rng),
        }
    }

    /// The kernel identifier used in the command-line grammar; the sentinel
    /// `i` stands for "all kernels".
    pub fn kernel_id(&self) -> &str {
        self.kernel.as_deref().unwrap_or("i")
    }

    /// Renders the flag's command-line fragment, e.g.
    /// `--sizes="{kernel[0]->tile[32,32]; kernel[0]->block[16,16]; kernel[0]->grid[256]}"`.
    pub fn render(&self, name: &str, value: &SizesValue) -> String {
        let k = self.kernel_id();
        format!(
            "{}=\"{{kernel[{}]->tile[{}]; kernel[{}]->block[{}]; kernel[{}]->grid[{}]}}\"",
            name,
            k,
            join(&value.tile),
            k,
            join(&value.block),
            k,
            join(&value.grid),
        )
    }
}

fn join(values: &[i64]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}

static SIZES_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{.*\}$").expect("sizes line regex"));
static SIZES_CLAUSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"kernel\[(\d+)\]->(tile|block|grid)\[([0-9,]*)\]").expect("sizes clause regex")
});

/// Parses the size dump the code generator writes to stderr.
///
/// The dump is a brace-delimited, semicolon-separated list of
/// `kernel[id]->dimension[ints]` clauses on a single line; all other lines
/// are ignored. An empty pair of braces is a valid "no kernels" result.
/// If no line matches at all the measurement contract is broken and the
/// error is fatal.
pub fn parse_dump_sizes(output: &str) -> Result<BTreeMap<String, SizesValue>, FatalError> {
    let mut kernels: BTreeMap<String, SizesValue> = BTreeMap::new();
    let mut matched = false;
    for line in output.lines() {
        let line: String = line.split_whitespace().collect();
        if !SIZES_LINE_RE.is_match(&line) {
            continue;
        }
        matched = true;
        for caps in SIZES_CLAUSE_RE.captures_iter(&line) {
            let ints: Vec<i64> = caps[3]
                .split(',')
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect();
            if ints.is_empty() {
                continue;
            }
            let entry = kernels.entry(caps[1].to_string()).or_default();
            match &caps[2] {
                "tile" => entry.tile = ints,
                "block" => entry.block = ints,
                "grid" => entry.grid = ints,
                _ => unreachable!("regex restricts the category name"),
            }
        }
    }
    if !matched {
        return Err(FatalError::DumpSizes);
    }
    Ok(kernels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn domain() -> SizesDomain {
        SizesDomain {
            kernel: None,
            tile: SizeSpace::new((1, 4), (1, 65)),
            block: SizeSpace::new((1, 4), (1, 1025)),
            grid: SizeSpace::new((1, 4), (1, 32769)),
        }
    }

    #[test]
    fn random_values_stay_in_range() {
        let dom = domain();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let v = dom.random_value(&mut rng);
            assert!(!v.tile.is_empty() && v.tile.len() < 4);
            assert!(v.tile.iter().all(|&t| (1..65).contains(&t)));
            assert!(v.block.iter().all(|&b| (1..1025).contains(&b)));
            assert!(v.grid.iter().all(|&g| (1..32769).contains(&g)));
        }
    }

    #[test]
    fn permute_stays_in_range_and_keeps_dims() {
        let dom = domain();
        let mut rng = StdRng::seed_from_u64(11);
        let mut v = dom.random_value(&mut rng);
        for _ in 0..500 {
            let p = dom.permute(&v, &mut rng);
            assert_eq!(p.tile.len(), v.tile.len());
            assert_eq!(p.block.len(), v.block.len());
            assert_eq!(p.grid.len(), v.grid.len());
            assert!(p.tile.iter().all(|&t| (1..65).contains(&t)));
            assert!(p.block.iter().all(|&b| (1..1025).contains(&b)));
            assert!(p.grid.iter().all(|&g| (1..32769).contains(&g)));
            v = p;
        }
    }

    #[test]
    fn permute_wraps_instead_of_clamping() {
        // Domain with two values: any odd distance flips, even keeps.
        let space = SizeSpace::fixed_dims(1, (0, 2));
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen_flip = false;
        for _ in 0..100 {
            let out = space.permute_vector(&[1], &mut rng);
            assert!(out[0] == 0 || out[0] == 1);
            if out[0] == 0 {
                seen_flip = true;
            }
        }
        assert!(seen_flip);
    }

    #[test]
    fn render_matches_grammar() {
        let dom = SizesDomain {
            kernel: Some("2".to_string()),
            tile: SizeSpace::fixed_dims(2, (1, 65)),
            block: SizeSpace::fixed_dims(2, (1, 1025)),
            grid: SizeSpace::fixed_dims(1, (1, 32769)),
        };
        let v = SizesValue { tile: vec![32, 32], block: vec![16, 16], grid: vec![256] };
        assert_eq!(
            dom.render("--sizes", &v),
            "--sizes=\"{kernel[2]->tile[32,32]; kernel[2]->block[16,16]; kernel[2]->grid[256]}\""
        );
    }

    #[test]
    fn render_uses_sentinel_for_unspecialized_flag() {
        let dom = domain();
        let v = SizesValue { tile: vec![8], block: vec![4], grid: vec![2] };
        assert!(dom.render("--sizes", &v).contains("kernel[i]->tile[8]"));
    }

    #[test]
    fn parse_dump_recovers_all_kernels() {
        let output = "\
some diagnostic noise
{ kernel[0]->tile[32,32]; kernel[0]->block[16,16]; kernel[0]->grid[256]; \
kernel[1]->tile[8]; kernel[1]->block[64]; kernel[1]->grid[1024] }
more noise";
        let sizes = parse_dump_sizes(output).unwrap();
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes["0"].tile, vec![32, 32]);
        assert_eq!(sizes["0"].block, vec![16, 16]);
        assert_eq!(sizes["1"].grid, vec![1024]);
    }

    #[test]
    fn parse_dump_accepts_empty_braces() {
        let sizes = parse_dump_sizes("{}").unwrap();
        assert!(sizes.is_empty());
    }

    #[test]
    fn parse_dump_without_any_match_is_fatal() {
        assert!(matches!(parse_dump_sizes("nothing here"), Err(FatalError::DumpSizes)));
    }

    #[test]
    fn parse_dump_skips_empty_size_lists() {
        let sizes = parse_dump_sizes("{ kernel[0]->tile[]; kernel[0]->block[4]; kernel[0]->grid[8] }")
            .unwrap();
        assert!(sizes["0"].tile.is_empty());
        assert_eq!(sizes["0"].block, vec![4]);
    }
}
