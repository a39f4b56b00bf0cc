//! Static tables of the tunable flags each tool understands.
//!
//! Only flags that are safe to toggle blindly appear here; flags that
//! change program semantics are left to the build command.

use once_cell::sync::Lazy;

use super::{Flag, FlagValue};

/// Name of the global tile-size flag removed during per-kernel expansion.
pub const TILE_SIZE: &str = "--tile-size";

/// Name of the structured size flag.
pub const SIZES: &str = "--sizes";

/// Default candidate values for the shared-memory budget.
pub const SHARED_MEMORY_SIZES: &[i64] = &[128, 256, 512, 1024, 2048, 4096, 8192];

static NVCC_SWITCHES: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["--ftz", "--prec-sqrt", "--prec-div", "--fmad"]);

static HOST_SWITCHES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "-fauto-inc-dec",
        "-fdce",
        "-fdse",
        "-fguess-branch-probability",
        "-fif-conversion",
        "-finline-small-functions",
        "-fipa-pure-const",
        "-fmerge-constants",
        "-fomit-frame-pointer",
        "-fthread-jumps",
        "-fcaller-saves",
        "-fcrossjumping",
        "-fexpensive-optimizations",
        "-fgcse",
        "-foptimize-sibling-calls",
        "-fpeephole2",
        "-freorder-blocks",
        "-fschedule-insns",
        "-fstrict-aliasing",
        "-ftree-pre",
        "-ftree-vrp",
        "-finline-functions",
        "-funswitch-loops",
        "-fpredictive-commoning",
        "-ftree-vectorize",
    ]
});

/// The code generator's tunable flags, including the global tile-size flag
/// over `tile_range` (half-open) and the shared-memory budget.
pub fn codegen_flags(shared_memory: &[i64], tile_range: (i64, i64)) -> Vec<Flag> {
    let mut flags = vec![
        Flag::enumerated(
            "--isl-schedule-fuse",
            vec![FlagValue::Str("max".into()), FlagValue::Str("min".into())],
        ),
        Flag::boolean("--no-isl-schedule-separate-components"),
        Flag::boolean("--no-wrap"),
        Flag::boolean("--no-scale-tile-loops"),
        Flag::boolean("--no-shared-memory"),
        Flag::boolean("--no-private-memory"),
        Flag::boolean("--no-live-range-reordering"),
        Flag::enumerated(
            "--max-shared-memory",
            shared_memory.iter().copied().map(FlagValue::Int).collect(),
        ),
    ];
    flags.push(Flag::int_range(TILE_SIZE, tile_range.0, tile_range.1));
    flags
}

/// The CUDA compiler's tunable flags.
pub fn nvcc_flags() -> Vec<Flag> {
    let mut flags: Vec<Flag> = NVCC_SWITCHES.iter().map(|name| Flag::boolean(name)).collect();
    flags.push(Flag::enumerated(
        "--maxrregcount",
        (16..=128).step_by(4).map(FlagValue::Int).collect(),
    ));
    flags
}

/// A host C/C++ compiler flag set (the gcc optimization switches that are
/// independently toggleable).
pub fn host_compiler_flags() -> Vec<Flag> {
    HOST_SWITCHES.iter().map(|name| Flag::boolean(name)).collect()
}
