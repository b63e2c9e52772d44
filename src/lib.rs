//! Symbol resolution engine for crash-report processing.
//!
//! This crate turns textual symbol files into answers for a stack
//! walker: given an instruction address, which function contains it,
//! which source file and line it came from, which inlined calls cover
//! it, and which frame-unwinding rules recover its caller.
//!
//! # Structure
//!
//! Symbol data flows through three representations:
//!
//! 1. [`ParsedModule::parse`] compiles a textual symbol file into a
//!    mutable, map-backed module.
//! 2. [`ParsedModule::serialize`] flattens that module into a single
//!    self-contained byte buffer.
//! 3. [`FrozenModule::parse`] attaches a zero-copy view to such a
//!    buffer and answers queries straight out of it.
//!
//! Both module forms implement [`ModuleSymbols`] and answer every query
//! identically. The [`Resolver`] facade owns a table of loaded modules
//! keyed by [`ModuleIdentity`] and fills [`StackFrame`] out-fields on
//! behalf of the stack walker.
//!
//! # Example
//!
//! ```
//! use symres::{ModuleIdentity, ModuleSymbols, ParsedModule};
//!
//! let text = "\
//! MODULE Linux x86_64 492E2DD23CC306CA9C494EEF1533A3810 a.out
//! FILE 1 a.c
//! FUNC 100 20 4 main
//! 100 10 42 1
//! ";
//!
//! let module = ParsedModule::parse(text.as_bytes())?;
//! let resolution = module.lookup_address(0x108);
//! assert_eq!(resolution.function_name.as_deref(), Some("main"));
//! assert_eq!(resolution.source_line, Some(42));
//! # Ok::<_, symres::SymbolError>(())
//! ```

#![warn(missing_docs)]

mod breakpad;
mod cfi;
mod containers;
mod error;
mod frozen;
mod maps;
mod module;
mod raw;
mod resolver;
mod types;
mod writer;

pub use crate::cfi::{CfiFrameInfo, ParseCfiError};
pub use crate::error::{SymbolError, ValueKind};
pub use crate::frozen::FrozenModule;
pub use crate::module::ParsedModule;
pub use crate::resolver::{Resolver, SymbolBuffer, SymbolLookup, SymbolSupplier};
pub use crate::types::{
    CodeModule, FrameTrust, InlineFrame, MemAddr, ModuleIdentity, ModuleSymbols, Resolution,
    StackFrame, StackInfoType, SystemInfo, WfiValidity, WindowsFrameInfo, STACK_INFO_SLOTS,
};

/// File suffix naming the revision of the serialized module format.
///
/// Buffers written by [`ParsedModule::serialize`] should be stored under
/// this suffix; a change to the serialized layout changes the suffix so
/// that stale caches fail the size reconciliation in
/// [`FrozenModule::parse`] instead of being misread.
pub const SERIALIZED_SYMBOL_EXTENSION: &str = "symb1";
