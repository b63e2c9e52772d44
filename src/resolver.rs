//! The resolver facade consumed by the stack walker.
//!
//! A [`Resolver`] owns a table of loaded modules keyed by
//! [`ModuleIdentity`] and dispatches frame queries to whichever module
//! representation is installed: a [`ParsedModule`] loaded from symbol
//! text, or a frozen view over a serialized buffer. Queries take the
//! table's read lock, copy any strings into the caller's frame, and
//! release the lock before returning; loading and unloading take the
//! write lock and replace entries atomically.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::SymbolError;
use crate::frozen::FrozenModule;
use crate::module::ParsedModule;
use crate::cfi::CfiFrameInfo;
use crate::types::{
    FrameTrust, MemAddr, ModuleIdentity, ModuleSymbols, Resolution, StackFrame, SystemInfo,
    WindowsFrameInfo,
};

/// A shared handle to symbol data backing a loaded module.
///
/// Mirrors the ownership split of the symbol supplier contract: an owned
/// buffer is released when the last handle drops, so unloading the
/// module frees it; a borrowed buffer stays owned by the supplier and
/// merely outlives the handle.
#[derive(Clone, Debug)]
pub struct SymbolBuffer<'data> {
    backing: Arc<Cow<'data, [u8]>>,
}

impl<'data> SymbolBuffer<'data> {
    /// Creates a handle borrowing `data` from a supplier.
    pub fn from_slice(data: &'data [u8]) -> Self {
        SymbolBuffer {
            backing: Arc::new(Cow::Borrowed(data)),
        }
    }

    /// Creates a handle owning `data`.
    pub fn from_vec(data: Vec<u8>) -> Self {
        SymbolBuffer {
            backing: Arc::new(Cow::Owned(data)),
        }
    }

    /// True if dropping the last handle frees the data.
    pub fn owns_data(&self) -> bool {
        matches!(*self.backing, Cow::Owned(_))
    }

    /// The raw bytes of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.backing
    }
}

impl Deref for SymbolBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Result of asking a [`SymbolSupplier`] for a module's symbols.
#[derive(Clone, Debug)]
pub enum SymbolLookup<'data> {
    /// Symbol data was located.
    Found(SymbolBuffer<'data>),
    /// No symbol data exists for the module.
    NotFound,
    /// The lookup was interrupted and may be retried later.
    Interrupt,
}

/// A source of symbol data, queried per module.
///
/// The crash processor asks the supplier for each referenced module and
/// loads whatever it returns into the resolver. Storage backing a
/// [`SymbolLookup::Found`] buffer must stay alive for as long as the
/// returned [`SymbolBuffer`] has handles; the resolver drops its handle
/// when the module is unloaded.
pub trait SymbolSupplier<'data> {
    /// Locates symbol data for `module` on the given system.
    fn get_symbols(&mut self, module: &ModuleIdentity, system_info: &SystemInfo)
        -> SymbolLookup<'data>;
}

enum LoadedModule<'data> {
    Parsed(Box<ParsedModule>),
    Frozen(SymbolBuffer<'data>),
}

/// Owns loaded symbol modules and resolves stack frames against them.
#[derive(Default)]
pub struct Resolver<'data> {
    modules: RwLock<HashMap<ModuleIdentity, LoadedModule<'data>>>,
}

impl<'data> Resolver<'data> {
    /// Creates a resolver with no modules loaded.
    pub fn new() -> Self {
        Resolver::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ModuleIdentity, LoadedModule<'data>>> {
        self.modules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ModuleIdentity, LoadedModule<'data>>> {
        self.modules.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs a frozen view over a serialized module buffer.
    ///
    /// The buffer is validated before the table is touched; loading over
    /// an already loaded identity replaces it atomically.
    #[tracing::instrument(level = "trace", skip_all, fields(module = %identity.code_file))]
    pub fn load_module(
        &self,
        identity: ModuleIdentity,
        buffer: SymbolBuffer<'data>,
    ) -> Result<(), SymbolError> {
        FrozenModule::parse(&buffer)?;
        self.write()
            .insert(identity, LoadedModule::Frozen(buffer));
        Ok(())
    }

    /// Parses a textual symbol file and installs the resulting module.
    #[tracing::instrument(level = "trace", skip_all, fields(module = %identity.code_file))]
    pub fn load_symbol_file(
        &self,
        identity: ModuleIdentity,
        data: &[u8],
    ) -> Result<(), SymbolError> {
        let module = ParsedModule::parse(data)?;
        self.write()
            .insert(identity, LoadedModule::Parsed(Box::new(module)));
        Ok(())
    }

    /// Unloads a module, dropping its buffer handle. Returns true if a
    /// module was loaded under that identity.
    pub fn unload_module(&self, identity: &ModuleIdentity) -> bool {
        self.write().remove(identity).is_some()
    }

    /// True if a module is loaded under the identity.
    pub fn has_module(&self, identity: &ModuleIdentity) -> bool {
        self.read().contains_key(identity)
    }

    /// True if the module loaded under the identity was parsed from a
    /// symbol file with unparsable records.
    pub fn module_is_corrupt(&self, identity: &ModuleIdentity) -> bool {
        match self.read().get(identity) {
            Some(LoadedModule::Parsed(module)) => module.is_corrupt(),
            Some(LoadedModule::Frozen(buffer)) => FrozenModule::parse(buffer)
                .map(|module| module.is_corrupt())
                .unwrap_or(false),
            None => false,
        }
    }

    /// True if unloading the module frees its backing buffer.
    ///
    /// Always false for modules loaded from borrowed supplier buffers,
    /// which is the capability the fast resolver advertises.
    pub fn owns_module_buffer(&self, identity: &ModuleIdentity) -> bool {
        match self.read().get(identity) {
            Some(LoadedModule::Frozen(buffer)) => buffer.owns_data(),
            Some(LoadedModule::Parsed(_)) => true,
            None => false,
        }
    }

    /// Runs `query` against the module containing `frame`, passing the
    /// module-relative instruction address.
    fn with_module<R>(
        &self,
        frame: &StackFrame,
        query: impl FnOnce(&dyn ModuleSymbols, MemAddr) -> R,
    ) -> Option<R> {
        let module = frame.module.as_ref()?;
        let addr = frame.instruction.checked_sub(module.base_address)?;

        let table = self.read();
        match table.get(&module.identity())? {
            LoadedModule::Parsed(parsed) => Some(query(parsed.as_ref(), addr)),
            LoadedModule::Frozen(buffer) => {
                // The buffer was validated at load time.
                let frozen = FrozenModule::parse(buffer).ok()?;
                Some(query(&frozen, addr))
            }
        }
    }

    /// Fills the frame's function, source file and line out-fields.
    ///
    /// If `inlined_frames` is given, a synthetic frame is appended for
    /// every inlined call containing the instruction, innermost first,
    /// with [`FrameTrust::Inline`]. A frame whose module is not loaded
    /// is left unchanged.
    pub fn fill_source_line_info(
        &self,
        frame: &mut StackFrame,
        inlined_frames: Option<&mut Vec<StackFrame>>,
    ) {
        let resolution = match self.with_module(frame, |module, addr| module.lookup_address(addr)) {
            Some(resolution) => resolution,
            None => return,
        };

        let base_address = frame.module.as_ref().map_or(0, |m| m.base_address);
        self.apply_resolution(frame, &resolution, base_address);

        if let Some(out) = inlined_frames {
            for inline in &resolution.inline_frames {
                let mut new_frame = frame.clone();
                new_frame.function_name = Some(inline.function_name.clone());
                new_frame.function_base = Some(base_address + inline.function_base);
                new_frame.source_file_name = inline.source_file_name.clone();
                new_frame.source_line = inline.source_line;
                new_frame.trust = FrameTrust::Inline;
                out.push(new_frame);
            }
        }
    }

    fn apply_resolution(&self, frame: &mut StackFrame, resolution: &Resolution, base: MemAddr) {
        if let Some(name) = &resolution.function_name {
            frame.function_name = Some(name.clone());
            frame.function_base = resolution.function_base.map(|b| base + b);
            frame.is_multiple = resolution.is_multiple;
        }
        if let Some(file) = &resolution.source_file_name {
            frame.source_file_name = Some(file.clone());
        }
        if let Some(line) = resolution.source_line {
            frame.source_line = Some(line);
        }
        if let Some(line_base) = resolution.source_line_base {
            frame.source_line_base = Some(base + line_base);
        }
    }

    /// Returns Windows frame info covering the frame's instruction.
    pub fn find_windows_frame_info(&self, frame: &StackFrame) -> Option<WindowsFrameInfo> {
        self.with_module(frame, |module, addr| module.windows_frame_info(addr))?
    }

    /// Returns the CFI rules in effect at the frame's instruction.
    pub fn find_cfi_frame_info(&self, frame: &StackFrame) -> Option<CfiFrameInfo> {
        self.with_module(frame, |module, addr| module.cfi_frame_info(addr))?
    }
}
