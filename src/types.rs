//! Common types shared between the parser, the resolver and its callers.

use std::ops::{BitOr, BitOrAssign};

use crate::cfi::CfiFrameInfo;

/// A module-relative memory address or size.
pub type MemAddr = u64;

/// Placeholder used for missing function or symbol names.
pub(crate) const UNKNOWN_NAME: &str = "<unknown>";

/// Placeholder reported when an inline origin id cannot be resolved.
pub(crate) const NAME_OMITTED: &str = "<name omitted>";

/// The identity of a loaded binary: its code file and debug identifier.
///
/// Both components are kept verbatim as they appear in the crash report
/// and the symbol file header; the resolver keys its module table by this
/// pair.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ModuleIdentity {
    /// Path or name of the code file.
    pub code_file: String,
    /// Debug identifier, 32 to 40 hex characters.
    pub debug_identifier: String,
}

impl ModuleIdentity {
    /// Creates an identity from its two components.
    pub fn new(code_file: impl Into<String>, debug_identifier: impl Into<String>) -> Self {
        ModuleIdentity {
            code_file: code_file.into(),
            debug_identifier: debug_identifier.into(),
        }
    }
}

/// A module mapped into the crashed process.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CodeModule {
    /// Address at which the module was loaded.
    pub base_address: MemAddr,
    /// Path or name of the code file.
    pub code_file: String,
    /// Debug identifier of the module.
    pub debug_identifier: String,
}

impl CodeModule {
    /// Returns the identity used to key this module in the resolver.
    pub fn identity(&self) -> ModuleIdentity {
        ModuleIdentity::new(self.code_file.clone(), self.debug_identifier.clone())
    }
}

/// Operating system and CPU of the process a crash report came from.
///
/// Passed through to [`SymbolSupplier`](crate::SymbolSupplier)
/// implementations so they can locate the right symbol file variant.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SystemInfo {
    /// Operating system name, e.g. `Linux` or `windows`.
    pub os: String,
    /// CPU architecture name, e.g. `x86` or `arm64`.
    pub cpu: String,
}

/// How much a stack walker trusts the recovery of a frame.
///
/// Ordered from least to most trustworthy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub enum FrameTrust {
    /// The frame was not recovered.
    #[default]
    None,
    /// Recovered by scanning the stack.
    Scan,
    /// Recovered by scanning the stack using call frame info.
    CfiScan,
    /// Recovered by following the frame pointer.
    FramePointer,
    /// Recovered by applying call frame info.
    CallFrameInfo,
    /// Copied from an external unwinder.
    Prewalked,
    /// Taken directly from the thread context.
    Context,
    /// Derived from a parent frame whose address hit an inlined range.
    Inline,
}

/// A single frame of a call stack, with the resolver's out-fields.
///
/// The stack walker produces `instruction`, `module` and `trust`; the
/// resolver fills the remaining fields and never reads them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StackFrame {
    /// Address of the instruction this frame is executing.
    pub instruction: MemAddr,
    /// The module containing the instruction, if any.
    pub module: Option<CodeModule>,
    /// Name of the enclosing function or public symbol.
    pub function_name: Option<String>,
    /// Load address of the enclosing function or public symbol.
    pub function_base: Option<MemAddr>,
    /// Path of the source file containing the instruction.
    pub source_file_name: Option<String>,
    /// Source line number of the instruction.
    pub source_line: Option<u32>,
    /// Load address of the first instruction of the source line.
    pub source_line_base: Option<MemAddr>,
    /// True if the winning symbol record was marked as duplicated.
    pub is_multiple: bool,
    /// How the stack walker recovered this frame.
    pub trust: FrameTrust,
}

impl StackFrame {
    /// Creates a frame at `instruction` inside `module`.
    pub fn with_instruction(instruction: MemAddr, module: CodeModule) -> Self {
        StackFrame {
            instruction,
            module: Some(module),
            ..Default::default()
        }
    }
}

/// Frame-data flavor of a `STACK WIN` record.
///
/// Only `Fpo` and `FrameData` occur in practice, but all five types of
/// the debug format are accepted and kept in separate lookup maps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StackInfoType {
    /// Frame pointer omitted; FPO info available.
    Fpo = 0,
    /// A trap frame.
    Trap = 1,
    /// A task switch frame.
    Tss = 2,
    /// A standard frame.
    Standard = 3,
    /// Frame pointer omitted; frame data info available.
    FrameData = 4,
}

impl StackInfoType {
    pub(crate) fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => StackInfoType::Fpo,
            1 => StackInfoType::Trap,
            2 => StackInfoType::Tss,
            3 => StackInfoType::Standard,
            4 => StackInfoType::FrameData,
            _ => return None,
        })
    }
}

/// Number of frame-info map slots in a serialized module.
///
/// Slots 5 and 6 are reserved by the layout and always empty.
pub const STACK_INFO_SLOTS: usize = 7;

/// Which fields of a [`WindowsFrameInfo`] carry meaningful data.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WfiValidity(u32);

impl WfiValidity {
    /// No field is valid.
    pub const NONE: WfiValidity = WfiValidity(0);
    /// Only `parameter_size` is valid.
    pub const PARAMETER_SIZE: WfiValidity = WfiValidity(1);
    /// All fields are valid.
    pub const ALL: WfiValidity = WfiValidity(u32::MAX);

    /// Returns true if all bits of `other` are set in `self`.
    pub fn contains(self, other: WfiValidity) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no field is valid.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub(crate) fn bits(self) -> u32 {
        self.0
    }

    pub(crate) fn from_bits(bits: u32) -> Self {
        WfiValidity(bits)
    }
}

impl BitOr for WfiValidity {
    type Output = WfiValidity;

    fn bitor(self, rhs: WfiValidity) -> WfiValidity {
        WfiValidity(self.0 | rhs.0)
    }
}

impl BitOrAssign for WfiValidity {
    fn bitor_assign(&mut self, rhs: WfiValidity) {
        self.0 |= rhs.0;
    }
}

/// Windows stack frame descriptor attached to a code range.
///
/// Produced either from a `STACK WIN` record (all fields valid) or
/// synthesized from a function's or public symbol's parameter size, in
/// which case only `parameter_size` is valid.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WindowsFrameInfo {
    /// The record flavor, if this info came from a `STACK WIN` record.
    pub ty: Option<StackInfoType>,
    /// Which of the remaining fields carry meaningful data.
    pub valid: WfiValidity,
    /// Size of the prologue machine code in bytes.
    pub prolog_size: u32,
    /// Size of the epilogue machine code in bytes.
    pub epilog_size: u32,
    /// Size of the function's parameters on the stack.
    pub parameter_size: MemAddr,
    /// Size of the callee-saved registers on the stack.
    pub saved_register_size: u32,
    /// Size of the function's local variables on the stack.
    pub local_size: u32,
    /// Maximum stack usage of the function.
    pub max_stack_size: u32,
    /// True if the function allocates the base pointer register.
    pub allocates_base_pointer: bool,
    /// Postfix program computing the caller's register state.
    pub program_string: Option<String>,
}

/// A synthetic frame describing one inlined call containing an address.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InlineFrame {
    /// Name of the inlined function, from its inline origin.
    pub function_name: String,
    /// Module-relative start of the inlined range containing the address.
    pub function_base: MemAddr,
    /// Source file this frame executes in, after rotation.
    pub source_file_name: Option<String>,
    /// Source line this frame executes at, after rotation.
    pub source_line: Option<u32>,
}

/// The outcome of an address lookup against one module.
///
/// All addresses are module-relative; the resolver facade re-bases them
/// when writing the result into a [`StackFrame`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Resolution {
    /// Name of the enclosing function or public symbol.
    pub function_name: Option<String>,
    /// Start of the enclosing function, or the public symbol's address.
    pub function_base: Option<MemAddr>,
    /// Source file of the queried address.
    pub source_file_name: Option<String>,
    /// Source line of the queried address.
    pub source_line: Option<u32>,
    /// Start address of the source line's range.
    pub source_line_base: Option<MemAddr>,
    /// True if the winning record was marked as duplicated.
    pub is_multiple: bool,
    /// Frames for inlined calls covering the address, innermost first.
    pub inline_frames: Vec<InlineFrame>,
}

impl Resolution {
    /// Rotates call-site coordinates outward across the inline chain.
    ///
    /// On entry every inline frame still carries its own call-site line
    /// and file, and the resolution itself carries the line table hit at
    /// the queried address. Afterwards frame 0 carries that line table
    /// hit, every outer frame carries the call site of the frame nested
    /// within it, and the resolution carries the outermost call site.
    pub(crate) fn rotate_inline_frames(&mut self) {
        if self.inline_frames.is_empty() {
            return;
        }

        let mut file = self.source_file_name.take();
        let mut line = self.source_line.take();

        if let Some(outermost) = self.inline_frames.last() {
            self.source_file_name = outermost.source_file_name.clone();
            self.source_line = outermost.source_line;
        }

        for frame in &mut self.inline_frames {
            std::mem::swap(&mut frame.source_file_name, &mut file);
            std::mem::swap(&mut frame.source_line, &mut line);
        }
    }
}

/// The query interface shared by parsed and frozen modules.
///
/// Parsed (mutable) and frozen (serialized) modules answer the same
/// queries with identical results; the resolver facade dispatches to
/// whichever representation is loaded for a module.
pub trait ModuleSymbols {
    /// True if the symbol file contained records that failed to parse.
    fn is_corrupt(&self) -> bool;

    /// Resolves a module-relative instruction address to a function or
    /// public symbol, source location, and inlined-call chain.
    fn lookup_address(&self, addr: MemAddr) -> Resolution;

    /// Returns Windows frame info covering the address.
    ///
    /// `FrameData` records are preferred over `Fpo` records. Without
    /// either, the enclosing function's or public symbol's parameter
    /// size yields a partially valid record.
    fn windows_frame_info(&self, addr: MemAddr) -> Option<WindowsFrameInfo>;

    /// Returns the CFI register rules in effect at the address.
    fn cfi_frame_info(&self, addr: MemAddr) -> Option<CfiFrameInfo>;
}
