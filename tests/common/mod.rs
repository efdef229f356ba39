/// Test utilities for the compilation pipeline integration tests
///
/// This module provides shared utilities for integration tests, including:
/// - A binary module writer that emits the section format the decoder reads
/// - Injectable code generators for failure and cancellation scenarios
/// - One-time process setup (fault-handler latch, tracing subscriber)
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};

use tierc::builder::{CodeBlob, OptimizingCodegen, TierCodegen};
use tierc::{CancellationToken, FuncSig, Tier};

static SETUP: Once = Once::new();

/// Install the fault-handler latch and a test tracing subscriber
///
/// Every integration test calls this first; repeated calls are no-ops.
pub fn setup() {
    SETUP.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
        tierc::note_fault_handlers_installed();
    });
}

fn varint(buf: &mut Vec<u8>, mut n: u32) {
    while n >= 0x80 {
        buf.push((n as u8) | 0x80);
        n >>= 7;
    }
    buf.push(n as u8);
}

/// Builds module bytes in the binary section format
///
/// Defaults to a well-formed module; the `declare_bodies` and
/// `omit_code_section` knobs produce the malformed variants the decoder
/// must reject.
#[derive(Default)]
pub struct ModuleWriter {
    sigs: Vec<(Vec<u8>, Vec<u8>)>,
    imports: Vec<String>,
    bodies: Vec<Vec<u8>>,
    name: Option<String>,
    declared_bodies: Option<u32>,
    omit_code_section: bool,
}

impl ModuleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a local function signature
    pub fn sig(mut self, params: &[u8], results: &[u8]) -> Self {
        self.sigs.push((params.to_vec(), results.to_vec()));
        self
    }

    /// Declare an imported function
    pub fn import(mut self, name: &str) -> Self {
        self.imports.push(name.to_string());
        self
    }

    /// Append a function body
    pub fn body(mut self, bytes: &[u8]) -> Self {
        self.bodies.push(bytes.to_vec());
        self
    }

    /// Set the trailing module name
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Override the body count the code section declares
    pub fn declare_bodies(mut self, count: u32) -> Self {
        self.declared_bodies = Some(count);
        self
    }

    /// Emit no code section at all
    pub fn omit_code_section(mut self) -> Self {
        self.omit_code_section = true;
        self
    }

    pub fn build(self) -> Arc<Vec<u8>> {
        let mut buf = vec![0x00, b'm', b't', b'c'];
        buf.extend_from_slice(&1u32.to_le_bytes());

        if !self.sigs.is_empty() {
            let mut payload = Vec::new();
            varint(&mut payload, self.sigs.len() as u32);
            for (params, results) in &self.sigs {
                varint(&mut payload, params.len() as u32);
                payload.extend_from_slice(params);
                varint(&mut payload, results.len() as u32);
                payload.extend_from_slice(results);
            }
            buf.push(1);
            varint(&mut buf, payload.len() as u32);
            buf.extend_from_slice(&payload);
        }

        if !self.imports.is_empty() {
            let mut payload = Vec::new();
            varint(&mut payload, self.imports.len() as u32);
            for name in &self.imports {
                varint(&mut payload, name.len() as u32);
                payload.extend_from_slice(name.as_bytes());
            }
            buf.push(2);
            varint(&mut buf, payload.len() as u32);
            buf.extend_from_slice(&payload);
        }

        if !self.omit_code_section {
            let mut payload = Vec::new();
            let count = self
                .declared_bodies
                .unwrap_or(self.bodies.len() as u32);
            varint(&mut payload, count);
            for body in &self.bodies {
                varint(&mut payload, body.len() as u32);
                payload.extend_from_slice(body);
            }
            buf.push(3);
            varint(&mut buf, payload.len() as u32);
            buf.extend_from_slice(&payload);
        }

        if let Some(name) = &self.name {
            let mut payload = Vec::new();
            varint(&mut payload, name.len() as u32);
            payload.extend_from_slice(name.as_bytes());
            buf.push(4);
            varint(&mut buf, payload.len() as u32);
            buf.extend_from_slice(&payload);
        }

        Arc::new(buf)
    }
}

/// Optimizing-tier generator that fails at a chosen function index
pub struct FailAtCodegen {
    pub fail_index: u32,
}

impl TierCodegen for FailAtCodegen {
    fn tier(&self) -> Tier {
        Tier::Optimizing
    }

    fn compile_function(
        &self,
        func_index: u32,
        offset: usize,
        body: &[u8],
        sig: &FuncSig,
    ) -> Result<CodeBlob, String> {
        if func_index == self.fail_index {
            return Err(format!("injected codegen failure at function {}", func_index));
        }
        OptimizingCodegen.compile_function(func_index, offset, body, sig)
    }
}

/// Optimizing-tier generator that cancels the shared token after compiling
/// `cancel_after` bodies, simulating cancellation arriving mid-upgrade
pub struct CancellingCodegen {
    pub token: CancellationToken,
    pub cancel_after: u32,
    compiled: AtomicU32,
}

impl CancellingCodegen {
    pub fn new(token: CancellationToken, cancel_after: u32) -> Self {
        Self {
            token,
            cancel_after,
            compiled: AtomicU32::new(0),
        }
    }
}

impl TierCodegen for CancellingCodegen {
    fn tier(&self) -> Tier {
        Tier::Optimizing
    }

    fn compile_function(
        &self,
        func_index: u32,
        offset: usize,
        body: &[u8],
        sig: &FuncSig,
    ) -> Result<CodeBlob, String> {
        let blob = OptimizingCodegen.compile_function(func_index, offset, body, sig)?;
        if self.compiled.fetch_add(1, Ordering::Relaxed) + 1 == self.cancel_after {
            self.token.cancel();
        }
        Ok(blob)
    }
}
