//! Tiering controller - drives decode and build for each compile pass
//!
//! Two entry points sit on top of the decoder, policy resolver, and module
//! builder:
//!
//! - [`compile_initial`] runs synchronously on the requesting thread. The
//!   policy resolver picks `Once` (the produced module is final) or `Tier1`
//!   (the module runs immediately at baseline and expects a later upgrade).
//! - [`compile_tier2`] re-decodes a tier-1 module's retained bytecode from
//!   scratch with the optimizing tier and atomically swaps the live
//!   module's code table on success. [`spawn_tier2`] schedules it on the
//!   shared rayon pool with a cancellation token.
//!
//! Cancellation is cooperative: the token is polled before the pass starts,
//! before each function-body compile, and before publication. Once observed
//! the pass abandons all partial work without touching the live module.
//! A tier-2 failure is not user-fatal either way - the module stays fully
//! usable at baseline and the failure is reported once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, warn};

use crate::builder::{CodegenSet, Module, ModuleBuilder};
use crate::decoder::Decoder;
use crate::env::{decode_module_environment, decode_module_tail, ModuleKind, SectionId};
use crate::policy::{
    background_work_possible, initial_compile_mode, CompileArgs, CompileMode, HostCapabilities,
};

/// Process-wide latch: has the embedder installed execution-fault handlers?
///
/// Compiled code relies on host-level fault handling, so compiling without
/// it would be unsound. This crate never installs the handlers itself.
static FAULT_HANDLERS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Record that the embedder has installed execution-fault handlers
pub fn note_fault_handlers_installed() {
    FAULT_HANDLERS_INSTALLED.store(true, Ordering::Release);
}

/// Whether execution-fault handlers have been installed
pub fn have_fault_handlers() -> bool {
    FAULT_HANDLERS_INSTALLED.load(Ordering::Acquire)
}

/// Shared flag for cooperatively cancelling a tier-2 upgrade
///
/// Owned jointly by the job's issuer and the worker running it; the worker
/// only ever polls, never interrupts in-flight codegen.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(PartialEq)]
enum PassStatus {
    Completed,
    Cancelled,
}

fn decode_function_body(
    d: &mut Decoder,
    builder: &mut ModuleBuilder,
    func_index: u32,
) -> Result<(), String> {
    let body_size = match d.read_var_u32() {
        Ok(n) => n,
        Err(_) => return d.fail("expected function body size"),
    };

    let offset_in_module = d.current_offset();

    // Skip over the body without decoding instructions; the code generator
    // sees it as an opaque byte range.
    let body = match d.read_bytes(body_size as usize) {
        Ok(b) => b,
        Err(_) => return d.fail("function body length too big"),
    };

    builder.func_def(func_index, offset_in_module, body)
}

fn decode_code_section(
    d: &mut Decoder,
    builder: &mut ModuleBuilder,
    cancel: Option<&CancellationToken>,
) -> Result<PassStatus, String> {
    let range = d.start_section(SectionId::Code, "code")?;

    builder.start_func_defs()?;

    let range = match range {
        Some(r) => r,
        None => {
            if builder.env().num_func_defs() != 0 {
                return d.fail("expected function bodies");
            }
            builder.finish_func_defs()?;
            return Ok(PassStatus::Completed);
        }
    };

    let num_bodies = match d.read_var_u32() {
        Ok(n) => n,
        Err(_) => return d.fail("expected function body count"),
    };
    if num_bodies != builder.env().num_func_defs() {
        return d.fail("function body count does not match function signature count");
    }

    let num_imports = builder.env().num_func_imports();
    for def_index in 0..num_bodies {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Ok(PassStatus::Cancelled);
            }
        }
        decode_function_body(d, builder, num_imports + def_index)?;
    }

    d.finish_section(range, "code")?;
    builder.finish_func_defs()?;
    Ok(PassStatus::Completed)
}

/// Run one full decode-and-build pass over a module's bytes
///
/// Returns `None` when the pass observed cancellation; any other early exit
/// is a failure with no partial state retained.
fn run_pass(
    bytecode: &[u8],
    args: &CompileArgs,
    caps: &HostCapabilities,
    codegens: &CodegenSet,
    mode: CompileMode,
    kind: ModuleKind,
    cancel: Option<&CancellationToken>,
) -> Result<Option<ModuleBuilder>, String> {
    assert!(
        have_fault_handlers(),
        "execution-fault handlers must be installed before compiling"
    );

    if let Some(token) = cancel {
        if token.is_cancelled() {
            return Ok(None);
        }
    }

    let mut d = Decoder::new(bytecode);
    let env = decode_module_environment(&mut d, kind)?;
    let mut builder = ModuleBuilder::new(env, args, mode, caps, codegens);

    if decode_code_section(&mut d, &mut builder, cancel)? == PassStatus::Cancelled {
        return Ok(None);
    }

    decode_module_tail(&mut d, builder.env_mut())?;
    Ok(Some(builder))
}

/// Compile a module at its initial tier
///
/// Runs synchronously. If policy chose `Tier1`, the returned module is
/// runnable immediately but expects the caller to schedule a tier-2
/// upgrade via [`spawn_tier2`]; with `Once` the module is final. Any
/// decode or codegen failure aborts with the first failure message and no
/// module is produced.
pub fn compile_initial(
    bytecode: Arc<Vec<u8>>,
    args: &CompileArgs,
    caps: &HostCapabilities,
    codegens: &CodegenSet,
    kind: ModuleKind,
) -> Result<Arc<Module>, String> {
    let mode = initial_compile_mode(args, kind, caps);
    debug!(?mode, caller = ?args.scripted_caller, "starting initial compile");

    let builder = run_pass(&bytecode, args, caps, codegens, mode, kind, None)?
        .expect("initial compile has no cancellation token");

    Ok(builder.finish_module(bytecode))
}

/// Run the deferred optimizing pass against a live tier-1 module
///
/// Re-decodes the module's retained bytecode from scratch into a private
/// builder; only after every body recompiles successfully is the module's
/// code table swapped. Returns `Ok(true)` on upgrade, `Ok(false)` when the
/// token cancelled the pass, and `Err` on failure - in the latter two cases
/// the module is left exactly as it was.
pub fn compile_tier2(
    module: &Module,
    args: &CompileArgs,
    caps: &HostCapabilities,
    codegens: &CodegenSet,
    cancel: &CancellationToken,
) -> Result<bool, String> {
    let bytecode = Arc::clone(module.bytecode());

    let builder = match run_pass(
        &bytecode,
        args,
        caps,
        codegens,
        CompileMode::Tier2,
        module.env().kind(),
        Some(cancel),
    )? {
        Some(b) => b,
        None => {
            debug!("tier-2 compile cancelled");
            return Ok(false);
        }
    };

    if cancel.is_cancelled() {
        debug!("tier-2 compile cancelled before publication");
        return Ok(false);
    }

    builder.finish_tier2(module);
    Ok(true)
}

/// Schedule a tier-2 upgrade on the shared worker pool
///
/// Only valid when policy determined background work is possible; the
/// caller must ensure at most one in-flight upgrade per module. Returns
/// the cancellation token and a channel that yields `true` once the
/// upgrade published, `false` if it was cancelled or failed. Failures are
/// logged here and never propagate - the module stays usable at its
/// current tier.
pub fn spawn_tier2(
    module: Arc<Module>,
    args: Arc<CompileArgs>,
    caps: HostCapabilities,
    codegens: CodegenSet,
) -> (CancellationToken, Receiver<bool>) {
    assert!(
        background_work_possible(&caps),
        "tier-2 scheduling requires background work to be possible"
    );

    let token = CancellationToken::new();
    let worker_token = token.clone();
    let (tx, rx) = bounded(1);

    rayon::spawn(move || {
        let upgraded = match compile_tier2(&module, &args, &caps, &codegens, &worker_token) {
            Ok(done) => done,
            Err(msg) => {
                warn!(
                    caller = ?args.scripted_caller,
                    error = %msg,
                    "tier-2 compile failed; module stays at its current tier"
                );
                false
            }
        };
        let _ = tx.send(upgraded);
    });

    (token, rx)
}
