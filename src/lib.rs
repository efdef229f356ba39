/// tierc - Tiered Module Compiler
///
/// This library compiles a binary bytecode module format at one or two
/// quality tiers: a fast baseline tier that gets code running quickly, and a
/// slower optimizing tier that can be applied later, in the background,
/// without interrupting execution of the already-compiled module.
///
/// # Architecture
///
/// The compilation pipeline consists of four stages:
///
/// 1. **Section Decoding** (`decoder`, `env` modules)
///    - Reads the module header and structural sections into a
///      `ModuleEnvironment`
///    - Captures function bodies as opaque byte ranges without compiling
///      them (deferred compilation)
///
/// 2. **Policy Resolution** (`policy` module)
///    - Reconciles user requests, host capabilities, and debugger state
///      into tier availability and a `CompileMode` (`Once`, `Tier1`,
///      `Tier2`)
///
/// 3. **Module Building** (`builder` module)
///    - Feeds deferred bodies to the tier-selected code generator and
///      produces an immutable `Module`, or upgrades an existing module's
///      code table in place
///
/// 4. **Tiering Orchestration** (`compile` module)
///    - Drives the initial compile synchronously, and the optional tier-2
///      upgrade on a background worker with cooperative cancellation
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tierc::{
///     compile_initial, note_fault_handlers_installed, CodegenSet,
///     CompileArgs, HostCapabilities, ModuleKind,
/// };
///
/// note_fault_handlers_installed();
///
/// let caps = HostCapabilities::detect();
/// let args = CompileArgs::from_host(&caps, Some("example".to_string()));
/// let codegens = CodegenSet::reference();
///
/// // An empty module: header only, no sections.
/// let bytecode = Arc::new(vec![0x00, b'm', b't', b'c', 1, 0, 0, 0]);
/// let module = compile_initial(bytecode, &args, &caps, &codegens, ModuleKind::Standard).unwrap();
/// assert_eq!(module.env().num_func_defs(), 0);
/// ```
///
/// # Tiering Strategy
///
/// - **Once**: a single pass produces the final module (used when only one
///   tier is viable, when debugging, or on single-core hosts)
/// - **Tier1**: a baseline pass produces a runnable module that is expected
///   to later receive a tier-2 upgrade
/// - **Tier2**: the deferred optimizing pass, re-decoding the retained
///   bytecode from scratch and atomically swapping the module's code table
///   on success; failure or cancellation leaves the module at baseline
pub mod builder;
pub mod compile;
pub mod decoder;
pub mod env;
pub mod policy;
pub mod stream;

pub use builder::{
    BaselineCodegen, CodeBlob, CodegenSet, Module, ModuleBuilder, OptimizingCodegen, TierCodegen,
};
pub use compile::{
    compile_initial, compile_tier2, have_fault_handlers, note_fault_handlers_installed,
    spawn_tier2, CancellationToken,
};
pub use decoder::Decoder;
pub use env::{FuncSig, ModuleEnvironment, ModuleKind, SectionId};
pub use policy::{
    background_work_possible, compiler_availability, debug_enabled, initial_compile_mode,
    tier_for_mode, CompileArgs, CompileMode, CompilerAvailability, HostCapabilities, Tier,
};
pub use stream::StreamingSource;
