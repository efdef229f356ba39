//! Compilation policy resolution
//!
//! This module reconciles three inputs into a single compilation strategy:
//! what the caller asked for (`CompileArgs`), what the host can actually do
//! (`HostCapabilities`), and what kind of module is being compiled
//! (`ModuleKind`). Everything here is a pure function of its inputs, so the
//! policy can be exercised exhaustively without building a module.
//!
//! Tier selection rules, evaluated in order:
//!
//! 1. Baseline is possible only for standard modules on hosts with a
//!    baseline code generator, and enabled only if also requested
//! 2. Debug mode requires baseline to be possible (debug instrumentation
//!    only exists in baseline-generated code)
//! 3. Optimizing is enabled exactly as requested
//! 4. If neither tier ends up enabled, optimizing is force-enabled - a
//!    module must always be compilable by some strategy
//! 5. The initial compile runs as `Tier1` only when background work is
//!    possible, both tiers are enabled, and debug mode is off; otherwise
//!    it runs as `Once`

use crate::env::ModuleKind;

/// Code-generation strategy for a single compile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Tier {
    /// Fast, simple codegen; the only tier carrying debug instrumentation
    Baseline = 0,
    /// Slower, higher-quality codegen
    Optimizing = 1,
}

/// Orchestration strategy for how many passes a module undergoes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// A single pass produces the final module
    Once,
    /// Fast initial pass; a tier-2 upgrade is expected later
    Tier1,
    /// The deferred optimizing pass against a tier-1 module
    Tier2,
}

/// What the host build and machine can do
///
/// Captured once per compile request so policy decisions stay
/// deterministic; tests construct these directly.
#[derive(Debug, Clone)]
pub struct HostCapabilities {
    /// Number of logical cores usable for compilation
    pub cpu_count: usize,
    /// Whether background compilation is globally permitted
    pub background_work_allowed: bool,
    /// Whether the baseline code generator exists on this target
    pub baseline_supported: bool,
    /// Whether the optimizing code generator is available
    pub optimizing_supported: bool,
}

impl HostCapabilities {
    /// Probe the current host
    pub fn detect() -> Self {
        Self {
            cpu_count: num_cpus::get(),
            background_work_allowed: true,
            baseline_supported: true,
            optimizing_supported: true,
        }
    }
}

/// Immutable configuration captured at compile-request time
///
/// Never mutated after construction; shared read-only with background
/// workers during the tier-2 upgrade.
#[derive(Debug, Clone)]
pub struct CompileArgs {
    /// Caller asked for the baseline tier
    pub baseline_requested: bool,
    /// Caller asked for the optimizing tier
    pub optimizing_requested: bool,
    /// Caller asked for debug instrumentation
    pub debug_requested: bool,
    /// Caller identity for diagnostics and telemetry
    pub scripted_caller: Option<String>,
    /// Build-identity snapshot for cache validation (opaque here)
    pub build_id: Vec<u8>,
}

impl CompileArgs {
    /// Create args with explicit tier requests
    pub fn new(baseline: bool, optimizing: bool, debug: bool) -> Self {
        Self {
            baseline_requested: baseline,
            optimizing_requested: optimizing,
            debug_requested: debug,
            scripted_caller: None,
            build_id: Vec::new(),
        }
    }

    /// Capture args from the host's capabilities
    ///
    /// For sanity's sake, the optimizing tier is requested whenever the
    /// baseline generator is missing, so some strategy always exists.
    pub fn from_host(caps: &HostCapabilities, scripted_caller: Option<String>) -> Self {
        Self {
            baseline_requested: caps.baseline_supported,
            optimizing_requested: caps.optimizing_supported || !caps.baseline_supported,
            debug_requested: false,
            scripted_caller,
            build_id: Vec::new(),
        }
    }
}

/// The resolved availability of each compilation facility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerAvailability {
    /// Baseline tier is enabled for this compile
    pub baseline: bool,
    /// Debug instrumentation is enabled for this compile
    pub debug: bool,
    /// Optimizing tier is enabled for this compile
    pub optimizing: bool,
}

/// Resolve tier availability for `(kind, args)` on the given host
pub fn compiler_availability(
    kind: ModuleKind,
    args: &CompileArgs,
    caps: &HostCapabilities,
) -> CompilerAvailability {
    let baseline_possible = kind == ModuleKind::Standard && caps.baseline_supported;

    let baseline = baseline_possible && args.baseline_requested;
    let debug = baseline_possible && args.debug_requested;
    let mut optimizing = args.optimizing_requested;

    // A module must always be compilable by some strategy. We only get here
    // with neither tier enabled when the caller disabled both, or disabled
    // optimizing for a module baseline cannot handle.
    if !(baseline || optimizing) {
        optimizing = true;
    }

    CompilerAvailability {
        baseline,
        debug,
        optimizing,
    }
}

/// Whether debug instrumentation will be generated for this compile
pub fn debug_enabled(args: &CompileArgs, kind: ModuleKind, caps: &HostCapabilities) -> bool {
    compiler_availability(kind, args, caps).debug
}

/// Whether a tier-2 upgrade could run on a background worker
#[inline]
pub fn background_work_possible(caps: &HostCapabilities) -> bool {
    caps.background_work_allowed && caps.cpu_count > 1
}

/// Choose the orchestration mode for an initial compile
///
/// `Tier1` is only worthwhile when a background worker can later run the
/// upgrade; debug builds stay at baseline permanently, so they always
/// compile `Once`.
pub fn initial_compile_mode(
    args: &CompileArgs,
    kind: ModuleKind,
    caps: &HostCapabilities,
) -> CompileMode {
    let avail = compiler_availability(kind, args, caps);

    if background_work_possible(caps) && avail.baseline && avail.optimizing && !avail.debug {
        CompileMode::Tier1
    } else {
        CompileMode::Once
    }
}

/// Choose the code-generation tier for a given pass
///
/// Requesting a mode whose tier is disabled is a caller contract
/// violation, not bad input.
pub fn tier_for_mode(
    args: &CompileArgs,
    mode: CompileMode,
    kind: ModuleKind,
    caps: &HostCapabilities,
) -> Tier {
    let avail = compiler_availability(kind, args, caps);

    match mode {
        CompileMode::Tier1 => {
            assert!(avail.baseline, "tier-1 pass requires the baseline tier");
            Tier::Baseline
        }
        CompileMode::Tier2 => {
            assert!(avail.optimizing, "tier-2 pass requires the optimizing tier");
            Tier::Optimizing
        }
        CompileMode::Once => {
            if avail.debug || !avail.optimizing {
                Tier::Baseline
            } else {
                Tier::Optimizing
            }
        }
    }
}
