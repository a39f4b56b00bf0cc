//! The configuration space model.
//!
//! Every tunable parameter is a [`Flag`] with a tagged value domain: either
//! a finite enumerated list or a structured tile/block/grid size space.
//! Flags live in one of four mutually exclusive [`FlagGroup`]s; a
//! [`FlagSpace`] holds the currently active flags of each group and is the
//! single source of truth for a candidate's genome layout.

pub mod registry;
pub mod sizes;

pub use sizes::{parse_dump_sizes, SizeSpace, SizesDomain, SizesValue};

use std::fmt;

use rand::Rng;

/// One legal value of an enumerated flag.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    /// A boolean switch; renders as a bare flag when true, nothing when false.
    Bool(bool),
    /// An integer argument.
    Int(i64),
    /// A string argument.
    Str(String),
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Bool(b) => write!(f, "{}", b),
            FlagValue::Int(i) => write!(f, "{}", i),
            FlagValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// A value chosen for one flag in one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneValue {
    /// A value from an enumerated domain.
    Enum(FlagValue),
    /// A structured size assignment.
    Sizes(SizesValue),
}

/// The legal value domain of a flag.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagDomain {
    /// A finite ordered list of values.
    Enumerated(Vec<FlagValue>),
    /// A structured tile/block/grid size space.
    Sizes(SizesDomain),
}

/// A named tunable parameter of the code generator or a backend compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct Flag {
    /// The flag name as it appears on the command line.
    pub name: String,
    /// The flag's legal value domain.
    pub domain: FlagDomain,
}

impl Flag {
    /// An on/off switch.
    pub fn boolean(name: &str) -> Self {
        Self {
            name: name.to_string(),
            domain: FlagDomain::Enumerated(vec![FlagValue::Bool(true), FlagValue::Bool(false)]),
        }
    }

    /// A flag over an explicit value list.
    pub fn enumerated(name: &str, values: Vec<FlagValue>) -> Self {
        assert!(!values.is_empty(), "enumerated flag needs at least one value");
        Self { name: name.to_string(), domain: FlagDomain::Enumerated(values) }
    }

    /// A flag over the integers in the half-open range `[low, high)`.
    pub fn int_range(name: &str, low: i64, high: i64) -> Self {
        Self::enumerated(name, (low..high).map(FlagValue::Int).collect())
    }

    /// A structured size flag.
    pub fn sizes(name: &str, domain: SizesDomain) -> Self {
        Self { name: name.to_string(), domain: FlagDomain::Sizes(domain) }
    }

    /// Whether this is a structured size flag.
    pub fn is_sizes(&self) -> bool {
        matches!(self.domain, FlagDomain::Sizes(_))
    }

    /// Draws a value uniformly from the flag's domain.
    pub fn random_value(&self, rng: &mut impl Rng) -> GeneValue {
        match &self.domain {
            FlagDomain::Enumerated(values) => {
                let idx = rng.gen_range(0..values.len());
                GeneValue::Enum(values[idx].clone())
            }
            FlagDomain::Sizes(dom) => GeneValue::Sizes(dom.random_value(rng)),
        }
    }

    /// Mutation move: fresh uniform draw for enumerated flags, bounded
    /// random walk for size flags.
    pub fn mutate(&self, current: &GeneValue, rng: &mut impl Rng) -> GeneValue {
        match (&self.domain, current) {
            (FlagDomain::Sizes(dom), GeneValue::Sizes(v)) => GeneValue::Sizes(dom.permute(v, rng)),
            _ => self.random_value(rng),
        }
    }

    /// Annealing move: step to the adjacent value (wrapping) for enumerated
    /// flags, bounded random walk for size flags.
    pub fn step(&self, current: &GeneValue, rng: &mut impl Rng) -> GeneValue {
        match (&self.domain, current) {
            (FlagDomain::Enumerated(values), GeneValue::Enum(v)) => {
                match values.iter().position(|candidate| candidate == v) {
                    Some(idx) => GeneValue::Enum(values[(idx + 1) % values.len()].clone()),
                    None => self.random_value(rng),
                }
            }
            (FlagDomain::Sizes(dom), GeneValue::Sizes(v)) => GeneValue::Sizes(dom.permute(v, rng)),
            _ => self.random_value(rng),
        }
    }

    /// Renders the flag's command-line fragment, or `None` for a boolean
    /// switch that is off.
    pub fn render(&self, value: &GeneValue) -> Option<String> {
        match (&self.domain, value) {
            (FlagDomain::Sizes(dom), GeneValue::Sizes(v)) => Some(dom.render(&self.name, v)),
            (_, GeneValue::Enum(FlagValue::Bool(true))) => Some(self.name.clone()),
            (_, GeneValue::Enum(FlagValue::Bool(false))) => None,
            (_, GeneValue::Enum(v)) => Some(format!("{} {}", self.name, v)),
            _ => None,
        }
    }
}

/// The four flag buckets. A flag belongs to exactly one group; membership
/// is a property of where it was registered, not of its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagGroup {
    /// The code generator's own flags.
    Codegen,
    /// The host C compiler's flags.
    Cc,
    /// The host C++ compiler's flags.
    Cxx,
    /// The CUDA compiler's flags.
    Nvcc,
}

impl FlagGroup {
    /// All groups, in genome order.
    pub const ALL: [FlagGroup; 4] =
        [FlagGroup::Codegen, FlagGroup::Cc, FlagGroup::Cxx, FlagGroup::Nvcc];

    /// Human-readable group name.
    pub fn label(&self) -> &'static str {
        match self {
            FlagGroup::Codegen => "code generator",
            FlagGroup::Cc => "C compiler",
            FlagGroup::Cxx => "C++ compiler",
            FlagGroup::Nvcc => "CUDA compiler",
        }
    }
}

/// The currently active flags, partitioned by group.
///
/// Candidates store their gene vectors parallel to these lists, so the
/// space must not change while a population built against it is alive; the
/// one-time kernel-size expansion builds a new space instead of mutating
/// this one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlagSpace {
    /// Active code-generator flags.
    pub codegen: Vec<Flag>,
    /// Active host C compiler flags.
    pub cc: Vec<Flag>,
    /// Active host C++ compiler flags.
    pub cxx: Vec<Flag>,
    /// Active CUDA compiler flags.
    pub nvcc: Vec<Flag>,
}

impl FlagSpace {
    /// The active flags of one group.
    pub fn group(&self, group: FlagGroup) -> &[Flag] {
        match group {
            FlagGroup::Codegen => &self.codegen,
            FlagGroup::Cc => &self.cc,
            FlagGroup::Cxx => &self.cxx,
            FlagGroup::Nvcc => &self.nvcc,
        }
    }

    /// The group a flag belongs to, found by linear scan of the active
    /// sets. `None` means the flag is not active anywhere.
    pub fn group_of(&self, name: &str) -> Option<FlagGroup> {
        FlagGroup::ALL
            .into_iter()
            .find(|&g| self.group(g).iter().any(|f| f.name == name))
    }

    /// All active flags across all groups, in genome order.
    pub fn flat(&self) -> impl Iterator<Item = &Flag> {
        self.codegen.iter().chain(&self.cc).chain(&self.cxx).chain(&self.nvcc)
    }

    /// Total number of active flags.
    pub fn len(&self) -> usize {
        self.codegen.len() + self.cc.len() + self.cxx.len() + self.nvcc.len()
    }

    /// Whether no flags are active at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Renders an assignment over one group's flags into a single
/// space-separated argument string, skipping switched-off booleans.
pub fn render_args(flags: &[Flag], genes: &[GeneValue]) -> String {
    flags
        .iter()
        .zip(genes)
        .filter_map(|(flag, gene)| flag.render(gene))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn random_value_is_always_a_domain_member_and_all_are_reachable() {
        let flag = Flag::enumerated(
            "--isl-schedule-fuse",
            vec![FlagValue::Str("max".into()), FlagValue::Str("min".into())],
        );
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = [false, false];
        for _ in 0..100 {
            match flag.random_value(&mut rng) {
                GeneValue::Enum(FlagValue::Str(s)) if s == "max" => seen[0] = true,
                GeneValue::Enum(FlagValue::Str(s)) if s == "min" => seen[1] = true,
                other => panic!("value outside the domain: {:?}", other),
            }
        }
        assert!(seen[0] && seen[1]);
    }

    #[test]
    fn int_range_is_half_open() {
        let flag = Flag::int_range("--max-shared-memory", 1, 4);
        match &flag.domain {
            FlagDomain::Enumerated(vs) => {
                assert_eq!(
                    vs,
                    &vec![FlagValue::Int(1), FlagValue::Int(2), FlagValue::Int(3)]
                );
            }
            _ => panic!("expected enumerated domain"),
        }
    }

    #[test]
    fn step_advances_to_adjacent_value_and_wraps() {
        let flag = Flag::enumerated(
            "--isl-gbr",
            vec![
                FlagValue::Str("never".into()),
                FlagValue::Str("once".into()),
                FlagValue::Str("always".into()),
            ],
        );
        let mut rng = StdRng::seed_from_u64(2);
        let from_last = flag.step(&GeneValue::Enum(FlagValue::Str("always".into())), &mut rng);
        assert_eq!(from_last, GeneValue::Enum(FlagValue::Str("never".into())));
        let from_first = flag.step(&GeneValue::Enum(FlagValue::Str("never".into())), &mut rng);
        assert_eq!(from_first, GeneValue::Enum(FlagValue::Str("once".into())));
    }

    #[test]
    fn boolean_flags_render_as_bare_switches() {
        let flag = Flag::boolean("--no-shared-memory");
        assert_eq!(
            flag.render(&GeneValue::Enum(FlagValue::Bool(true))),
            Some("--no-shared-memory".to_string())
        );
        assert_eq!(flag.render(&GeneValue::Enum(FlagValue::Bool(false))), None);
    }

    #[test]
    fn valued_flags_render_name_and_value() {
        let flag = Flag::int_range("--tile-size", 1, 65);
        assert_eq!(
            flag.render(&GeneValue::Enum(FlagValue::Int(32))),
            Some("--tile-size 32".to_string())
        );
    }

    #[test]
    fn group_membership_is_found_by_scan() {
        let space = FlagSpace {
            codegen: vec![Flag::boolean("--no-wrap")],
            nvcc: vec![Flag::boolean("--ftz")],
            ..Default::default()
        };
        assert_eq!(space.group_of("--ftz"), Some(FlagGroup::Nvcc));
        assert_eq!(space.group_of("--no-wrap"), Some(FlagGroup::Codegen));
        assert_eq!(space.group_of("--unknown"), None);
    }

    #[test]
    fn render_args_skips_disabled_switches() {
        let flags = vec![Flag::boolean("--no-wrap"), Flag::int_range("--tile-size", 1, 65)];
        let genes = vec![
            GeneValue::Enum(FlagValue::Bool(false)),
            GeneValue::Enum(FlagValue::Int(16)),
        ];
        assert_eq!(render_args(&flags, &genes), "--tile-size 16");
    }
}
