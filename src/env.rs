//! Module environment - structural metadata decoded ahead of any codegen
//!
//! The environment holds everything the header sections declare about a
//! module: function signatures, imported functions, and trailing metadata.
//! It is mutable while the section decoders fill it in, then folded into
//! the immutable compiled module; function bodies are never decoded here.

use smallvec::SmallVec;

use crate::decoder::Decoder;

/// Module header magic bytes
pub const MAGIC: [u8; 4] = [0x00, b'm', b't', b'c'];

/// Module format version understood by this decoder
pub const VERSION: u32 = 1;

/// Section identifiers, in required stream order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionId {
    /// Declared signatures of locally defined functions
    Signature = 1,
    /// Imported function names
    Import = 2,
    /// Function bodies (decoded as opaque byte ranges)
    Code = 3,
    /// Optional module name (tail)
    Name = 4,
}

/// The kind of module being compiled
///
/// The baseline code generator only exists for standard modules; the
/// restricted embedded subset always compiles with the optimizing tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// General modules - eligible for every tier
    Standard,
    /// Restricted embedded subset - optimizing tier only
    Restricted,
}

/// A declared function signature
///
/// Parameter and result types are opaque type bytes; interpreting them is
/// the code generators' concern, not the structural decoder's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncSig {
    /// Parameter type bytes
    pub params: SmallVec<[u8; 8]>,
    /// Result type bytes
    pub results: SmallVec<[u8; 2]>,
}

/// Structural metadata for a module, decoded before any function body
#[derive(Debug, Clone)]
pub struct ModuleEnvironment {
    kind: ModuleKind,
    sigs: Vec<FuncSig>,
    imports: Vec<String>,
    name: Option<String>,
}

impl ModuleEnvironment {
    /// Create an empty environment for a module of the given kind
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            kind,
            sigs: Vec::new(),
            imports: Vec::new(),
            name: None,
        }
    }

    /// The kind of module this environment describes
    #[inline]
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Number of locally defined functions (one per declared signature)
    #[inline]
    pub fn num_func_defs(&self) -> u32 {
        self.sigs.len() as u32
    }

    /// Number of imported functions
    #[inline]
    pub fn num_func_imports(&self) -> u32 {
        self.imports.len() as u32
    }

    /// Signature of the locally defined function at `def_index`
    #[inline]
    pub fn func_sig(&self, def_index: u32) -> &FuncSig {
        &self.sigs[def_index as usize]
    }

    /// Imported function names, in import order
    #[inline]
    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    /// Module name from the tail, if present
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[cfg(test)]
impl ModuleEnvironment {
    pub(crate) fn push_sig(&mut self, sig: FuncSig) {
        self.sigs.push(sig);
    }
}

fn decode_func_sig(d: &mut Decoder) -> Result<FuncSig, String> {
    let num_params = d.read_var_u32()?;
    let mut params = SmallVec::new();
    for _ in 0..num_params {
        params.push(d.read_byte()?);
    }
    let num_results = d.read_var_u32()?;
    let mut results = SmallVec::new();
    for _ in 0..num_results {
        results.push(d.read_byte()?);
    }
    Ok(FuncSig { params, results })
}

fn decode_signature_section(d: &mut Decoder, env: &mut ModuleEnvironment) -> Result<(), String> {
    let range = match d.start_section(SectionId::Signature, "signature")? {
        Some(r) => r,
        None => return Ok(()),
    };

    let count = d.read_var_u32()?;
    for _ in 0..count {
        env.sigs.push(decode_func_sig(d)?);
    }

    d.finish_section(range, "signature")
}

fn decode_import_section(d: &mut Decoder, env: &mut ModuleEnvironment) -> Result<(), String> {
    let range = match d.start_section(SectionId::Import, "import")? {
        Some(r) => r,
        None => return Ok(()),
    };

    let count = d.read_var_u32()?;
    for _ in 0..count {
        env.imports.push(d.read_string()?);
    }

    d.finish_section(range, "import")
}

/// Decode the module header and all sections preceding the code section
///
/// On success the decoder is positioned at the start of the code section
/// (or the tail, if the code section is absent). Any malformed header or
/// section aborts with a descriptive failure and no environment is
/// returned.
pub fn decode_module_environment(
    d: &mut Decoder,
    kind: ModuleKind,
) -> Result<ModuleEnvironment, String> {
    let magic = d.read_bytes(MAGIC.len())?;
    if magic != MAGIC {
        return d.fail("bad module magic number");
    }

    let version = d.read_u32_le()?;
    if version != VERSION {
        return d.fail(&format!("unsupported module version {}", version));
    }

    let mut env = ModuleEnvironment::new(kind);
    decode_signature_section(d, &mut env)?;
    decode_import_section(d, &mut env)?;
    Ok(env)
}

/// Decode the trailing sections after the code section
///
/// The stream must be fully consumed once the tail is decoded.
pub fn decode_module_tail(d: &mut Decoder, env: &mut ModuleEnvironment) -> Result<(), String> {
    if let Some(range) = d.start_section(SectionId::Name, "name")? {
        env.name = Some(d.read_string()?);
        d.finish_section(range, "name")?;
    }

    if !d.done() {
        return d.fail("unexpected bytes after final section");
    }
    Ok(())
}
