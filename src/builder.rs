//! Module building - from deferred function bodies to a compiled module
//!
//! A `ModuleBuilder` brackets one compile pass: it takes ownership of the
//! decoded `ModuleEnvironment`, feeds each deferred function body to the
//! tier-selected code generator, and either produces a fresh immutable
//! [`Module`] (initial pass) or swaps an existing module's code table for
//! newly optimized entries (tier-2 pass).
//!
//! Between `start_func_defs` and a terminal finish call the builder's state
//! is private to the pass; nothing is published to other threads until the
//! terminal call succeeds. The code-table swap at the end of a tier-2 pass
//! happens under the table's mutex, so concurrent readers see either the
//! old table or the new one, never a mix.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::env::{FuncSig, ModuleEnvironment};
use crate::policy::{tier_for_mode, CompileArgs, CompileMode, HostCapabilities, Tier};

/// Compiled code for a single function
///
/// The bytes are opaque output of a tier's code generator; this crate never
/// inspects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlob {
    /// The tier whose generator produced this code
    pub tier: Tier,
    /// The generated code
    pub bytes: Arc<[u8]>,
}

/// A code generator for one tier, consumed as an opaque capability
///
/// Implementations compile a single function body at a time and never see
/// module-wide state; a failed compile aborts the pass that requested it.
pub trait TierCodegen: Send + Sync {
    /// The tier this generator emits code for
    fn tier(&self) -> Tier;

    /// Compile one function body
    ///
    /// `func_index` counts imports first; `offset_in_module` is the byte
    /// offset of the body within the original bytecode, for diagnostics.
    fn compile_function(
        &self,
        func_index: u32,
        offset_in_module: usize,
        body: &[u8],
        sig: &FuncSig,
    ) -> Result<CodeBlob, String>;
}

/// Leading tag byte on reference baseline output
pub const BASELINE_CODE_TAG: u8 = 0xB1;

/// Leading tag byte on reference optimizing output
pub const OPTIMIZING_CODE_TAG: u8 = 0x01;

/// Reference baseline emitter - wraps the body bytes behind a tag byte
///
/// Stands in for the external per-instruction baseline compiler; real
/// embedders supply their own [`TierCodegen`].
#[derive(Debug, Default)]
pub struct BaselineCodegen;

impl TierCodegen for BaselineCodegen {
    fn tier(&self) -> Tier {
        Tier::Baseline
    }

    fn compile_function(
        &self,
        _func_index: u32,
        _offset_in_module: usize,
        body: &[u8],
        _sig: &FuncSig,
    ) -> Result<CodeBlob, String> {
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(BASELINE_CODE_TAG);
        bytes.extend_from_slice(body);
        Ok(CodeBlob {
            tier: Tier::Baseline,
            bytes: bytes.into(),
        })
    }
}

/// Reference optimizing emitter - see [`BaselineCodegen`]
#[derive(Debug, Default)]
pub struct OptimizingCodegen;

impl TierCodegen for OptimizingCodegen {
    fn tier(&self) -> Tier {
        Tier::Optimizing
    }

    fn compile_function(
        &self,
        _func_index: u32,
        _offset_in_module: usize,
        body: &[u8],
        _sig: &FuncSig,
    ) -> Result<CodeBlob, String> {
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(OPTIMIZING_CODE_TAG);
        bytes.extend_from_slice(body);
        Ok(CodeBlob {
            tier: Tier::Optimizing,
            bytes: bytes.into(),
        })
    }
}

/// The pair of generators a compile pass can draw from
#[derive(Clone)]
pub struct CodegenSet {
    baseline: Arc<dyn TierCodegen>,
    optimizing: Arc<dyn TierCodegen>,
}

impl CodegenSet {
    /// Build a set from embedder-supplied generators
    pub fn new(baseline: Arc<dyn TierCodegen>, optimizing: Arc<dyn TierCodegen>) -> Self {
        Self {
            baseline,
            optimizing,
        }
    }

    /// The reference emitters
    pub fn reference() -> Self {
        Self::new(Arc::new(BaselineCodegen), Arc::new(OptimizingCodegen))
    }

    /// The generator for a tier
    pub fn for_tier(&self, tier: Tier) -> &Arc<dyn TierCodegen> {
        match tier {
            Tier::Baseline => &self.baseline,
            Tier::Optimizing => &self.optimizing,
        }
    }
}

/// One immutable generation of a module's compiled code
///
/// Readers take the whole segment at once, so a function is never observed
/// at one tier for one call and another tier for the next mid-swap.
#[derive(Debug)]
pub struct CodeSegment {
    tier: Tier,
    entries: Vec<CodeBlob>,
}

impl CodeSegment {
    /// The tier every entry in this segment was generated at
    #[inline]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Compiled code per locally defined function, in definition order
    #[inline]
    pub fn entries(&self) -> &[CodeBlob] {
        &self.entries
    }
}

/// The module's function-code table
///
/// The only mutable shared state in the pipeline. The mutex is held just
/// long enough to clone or replace the segment pointer; compilation itself
/// happens on a private builder and never under this lock.
#[derive(Debug)]
pub struct CodeTable {
    segment: Mutex<Arc<CodeSegment>>,
}

impl CodeTable {
    fn new(tier: Tier, entries: Vec<CodeBlob>) -> Self {
        Self {
            segment: Mutex::new(Arc::new(CodeSegment { tier, entries })),
        }
    }

    /// The tier of the currently published code
    pub fn tier(&self) -> Tier {
        self.segment.lock().tier
    }

    /// A consistent snapshot of the current code generation
    pub fn snapshot(&self) -> Arc<CodeSegment> {
        Arc::clone(&self.segment.lock())
    }

    /// Compiled code for the locally defined function at `def_index`
    pub fn code(&self, def_index: u32) -> Option<CodeBlob> {
        let segment = self.snapshot();
        segment.entries.get(def_index as usize).cloned()
    }

    fn swap(&self, tier: Tier, entries: Vec<CodeBlob>) {
        *self.segment.lock() = Arc::new(CodeSegment { tier, entries });
    }
}

/// An immutable compiled module
///
/// Shared by all consumers once produced. A tier-2 upgrade replaces the
/// code table's contents in place; the structural metadata and the retained
/// bytecode never change.
#[derive(Debug)]
pub struct Module {
    env: ModuleEnvironment,
    bytecode: Arc<Vec<u8>>,
    mode: CompileMode,
    code: CodeTable,
}

impl Module {
    /// Structural metadata decoded from the header sections
    #[inline]
    pub fn env(&self) -> &ModuleEnvironment {
        &self.env
    }

    /// The original bytecode, retained for the tier-2 re-decode
    #[inline]
    pub fn bytecode(&self) -> &Arc<Vec<u8>> {
        &self.bytecode
    }

    /// The orchestration mode this module was initially built with
    #[inline]
    pub fn mode(&self) -> CompileMode {
        self.mode
    }

    /// The tier of the currently published code
    #[inline]
    pub fn tier(&self) -> Tier {
        self.code.tier()
    }

    /// The function-code table
    #[inline]
    pub fn code(&self) -> &CodeTable {
        &self.code
    }
}

/// Accumulates one compile pass's function code before publication
pub struct ModuleBuilder {
    env: ModuleEnvironment,
    mode: CompileMode,
    tier: Tier,
    codegen: Arc<dyn TierCodegen>,
    code: Vec<CodeBlob>,
    defs_started: bool,
    defs_finished: bool,
}

impl ModuleBuilder {
    /// Begin a compile pass over a decoded environment
    pub fn new(
        env: ModuleEnvironment,
        args: &CompileArgs,
        mode: CompileMode,
        caps: &HostCapabilities,
        codegens: &CodegenSet,
    ) -> Self {
        let tier = tier_for_mode(args, mode, env.kind(), caps);
        let codegen = Arc::clone(codegens.for_tier(tier));
        debug_assert_eq!(codegen.tier(), tier);

        Self {
            env,
            mode,
            tier,
            codegen,
            code: Vec::new(),
            defs_started: false,
            defs_finished: false,
        }
    }

    /// The environment this pass is compiling against
    #[inline]
    pub fn env(&self) -> &ModuleEnvironment {
        &self.env
    }

    /// Mutable access for the tail decode, which appends trailing metadata
    #[inline]
    pub fn env_mut(&mut self) -> &mut ModuleEnvironment {
        &mut self.env
    }

    /// The tier selected for this pass
    #[inline]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Open the function-definition bracket
    ///
    /// Must be called exactly once per pass, even when the module defines
    /// zero functions.
    pub fn start_func_defs(&mut self) -> Result<(), String> {
        assert!(!self.defs_started, "function definitions already started");
        self.defs_started = true;
        self.code.reserve(self.env.num_func_defs() as usize);
        Ok(())
    }

    /// Compile one deferred function body
    ///
    /// Bodies arrive in definition order; `func_index` counts imports
    /// first.
    pub fn func_def(
        &mut self,
        func_index: u32,
        offset_in_module: usize,
        body: &[u8],
    ) -> Result<(), String> {
        assert!(
            self.defs_started && !self.defs_finished,
            "function definition outside start/finish bracket"
        );

        let def_index = func_index
            .checked_sub(self.env.num_func_imports())
            .expect("function index below import count");
        assert_eq!(
            def_index as usize,
            self.code.len(),
            "function definitions must arrive in order"
        );

        let sig = self.env.func_sig(def_index);
        let blob = self
            .codegen
            .compile_function(func_index, offset_in_module, body, sig)?;
        self.code.push(blob);
        Ok(())
    }

    /// Close the function-definition bracket
    ///
    /// Fails if the number of compiled bodies does not match the number of
    /// declared signatures.
    pub fn finish_func_defs(&mut self) -> Result<(), String> {
        assert!(self.defs_started, "function definitions never started");
        self.defs_finished = true;

        if self.code.len() as u32 != self.env.num_func_defs() {
            return Err(format!(
                "compiled {} function bodies but {} signatures were declared",
                self.code.len(),
                self.env.num_func_defs()
            ));
        }
        Ok(())
    }

    /// Produce the compiled module for a `Once` or `Tier1` pass
    pub fn finish_module(self, bytecode: Arc<Vec<u8>>) -> Arc<Module> {
        assert!(self.defs_finished, "function definitions not finished");
        assert!(
            self.mode != CompileMode::Tier2,
            "tier-2 pass must finish with finish_tier2"
        );

        debug!(
            tier = ?self.tier,
            mode = ?self.mode,
            funcs = self.code.len(),
            "finishing initial module"
        );

        Arc::new(Module {
            env: self.env,
            bytecode,
            mode: self.mode,
            code: CodeTable::new(self.tier, self.code),
        })
    }

    /// Swap a live module's code table for this pass's optimized entries
    ///
    /// Only valid for a `Tier2` pass against a module built as `Tier1`;
    /// anything else is a caller contract violation.
    pub fn finish_tier2(self, module: &Module) {
        assert!(self.defs_finished, "function definitions not finished");
        assert!(
            self.mode == CompileMode::Tier2,
            "finish_tier2 requires a tier-2 pass"
        );
        assert!(
            module.mode() == CompileMode::Tier1,
            "tier-2 upgrade requires a module built as tier 1"
        );
        assert_eq!(
            self.code.len() as u32,
            module.env().num_func_defs(),
            "tier-2 pass compiled a different function count"
        );

        debug!(funcs = self.code.len(), "publishing tier-2 code");
        module.code.swap(self.tier, self.code);
    }
}
