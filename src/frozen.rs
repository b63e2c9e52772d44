//! The zero-copy view over a serialized symbol module.
//!
//! A [`FrozenModule`] borrows a buffer produced by
//! [`ParsedModule::serialize`](crate::ParsedModule::serialize) and
//! answers queries without copying anything out of it. Parsing only
//! reconciles the declared map sizes against the buffer length and
//! splits the buffer into container views.

use watto::Pod;

use crate::cfi::CfiFrameInfo;
use crate::containers::{
    read_cstr, StaticAddressMap, StaticContainedRangeMap, StaticMap, StaticRangeMap,
};
use crate::error::SymbolError;
use crate::raw::{
    self, Count, FrameInfoEntry, FuncEntry, InlineEntry, InlineRange, LineEntry, ModuleHeader,
    OriginEntry, PublicEntry,
};
use crate::types::{
    InlineFrame, MemAddr, ModuleSymbols, Resolution, StackInfoType, WfiValidity, WindowsFrameInfo,
    NAME_OMITTED, STACK_INFO_SLOTS,
};

/// A symbol module frozen into its serialized form.
///
/// The view borrows the backing buffer; it is cheap to construct and to
/// copy, and safe to share between threads.
#[derive(Clone, Copy)]
pub struct FrozenModule<'data> {
    is_corrupt: bool,
    files: StaticMap<'data, u32>,
    functions: StaticRangeMap<'data>,
    public_symbols: StaticAddressMap<'data>,
    windows_frame_info: [StaticContainedRangeMap<'data>; STACK_INFO_SLOTS],
    cfi_initial_rules: StaticRangeMap<'data>,
    cfi_delta_rules: StaticMap<'data, u64>,
    inline_origins: StaticMap<'data, u32>,
}

impl<'data> FrozenModule<'data> {
    /// Attaches a view to a serialized module buffer.
    ///
    /// The declared map sizes must reconcile with the buffer length; a
    /// single trailing NUL byte is tolerated. Anything else fails with
    /// [`SymbolError::BufferSizeMismatch`] rather than crashing later.
    #[tracing::instrument(level = "trace", name = "FrozenModule::parse", skip_all)]
    pub fn parse(buf: &'data [u8]) -> Result<Self, SymbolError> {
        let (header, _) = ModuleHeader::ref_from_prefix(buf).ok_or(SymbolError::BadFormat)?;
        let map_sizes: [u64; raw::NUM_MAPS] = header.map_sizes;
        let is_corrupt = header.is_corrupt != 0;

        let mut total: u64 = (1 + raw::NUM_MAPS * 8) as u64;
        for size in map_sizes {
            total = total.checked_add(size).ok_or(SymbolError::BadFormat)?;
        }
        let found = buf.len() as u64;
        if found != total && found.checked_sub(1) != Some(total) {
            return Err(SymbolError::BufferSizeMismatch {
                expected: total as usize,
                found: buf.len(),
            });
        }

        let mut regions: [&[u8]; raw::NUM_MAPS] = [&[]; raw::NUM_MAPS];
        let mut offset = 1 + raw::NUM_MAPS * 8;
        for (region, size) in regions.iter_mut().zip(map_sizes) {
            let end = offset + size as usize;
            *region = buf.get(offset..end).ok_or(SymbolError::BadFormat)?;
            offset = end;
        }

        let mut frame_info = Vec::with_capacity(STACK_INFO_SLOTS);
        for slot in 0..STACK_INFO_SLOTS {
            frame_info.push(
                StaticContainedRangeMap::parse(regions[raw::MAP_WINDOWS_FRAME_INFO + slot])
                    .ok_or(SymbolError::BadFormat)?,
            );
        }
        let windows_frame_info = frame_info
            .try_into()
            .map_err(|_| SymbolError::BadFormat)?;

        Ok(FrozenModule {
            is_corrupt,
            files: StaticMap::parse(regions[raw::MAP_FILES]).ok_or(SymbolError::BadFormat)?,
            functions: StaticRangeMap::parse(regions[raw::MAP_FUNCTIONS])
                .ok_or(SymbolError::BadFormat)?,
            public_symbols: StaticAddressMap::parse(regions[raw::MAP_PUBLIC_SYMBOLS])
                .ok_or(SymbolError::BadFormat)?,
            windows_frame_info,
            cfi_initial_rules: StaticRangeMap::parse(regions[raw::MAP_CFI_INITIAL_RULES])
                .ok_or(SymbolError::BadFormat)?,
            cfi_delta_rules: StaticMap::parse(regions[raw::MAP_CFI_DELTA_RULES])
                .ok_or(SymbolError::BadFormat)?,
            inline_origins: StaticMap::parse(regions[raw::MAP_INLINE_ORIGINS])
                .ok_or(SymbolError::BadFormat)?,
        })
    }

    /// True if the symbol file this module was serialized from had
    /// records that failed to parse.
    pub fn is_corrupt(&self) -> bool {
        self.is_corrupt
    }

    /// Iterates the source file table as `(id, path)` pairs in id order.
    pub fn files(&self) -> impl Iterator<Item = (u32, &'data str)> + '_ {
        self.files
            .iter()
            .filter_map(|(id, value)| Some((id, read_cstr(value, 0)?)))
    }

    fn file_name(&self, file_id: u32) -> Option<String> {
        let value = self.files.find(file_id)?;
        Some(read_cstr(value, 0)?.to_string())
    }

    fn origin_name(&self, origin_id: u32) -> Option<String> {
        let value = self.inline_origins.find(origin_id)?;
        let (_, rest) = OriginEntry::ref_from_prefix(value)?;
        Some(read_cstr(rest, 0)?.to_string())
    }

    fn decode_inline_frame(&self, record: &'data [u8], addr: MemAddr) -> Option<InlineFrame> {
        let (entry, rest) = InlineEntry::ref_from_prefix(record)?;
        let (ranges, _) = InlineRange::slice_from_prefix(rest, entry.num_ranges as usize)?;

        let function_name = self
            .origin_name(entry.origin_id)
            .unwrap_or_else(|| NAME_OMITTED.to_string());

        let call_file = entry.call_file;
        let source_file_name = u32::try_from(call_file)
            .ok()
            .and_then(|id| self.file_name(id));

        // The frame's base is the start of the covering range.
        let function_base = ranges
            .iter()
            .map(|range| (range.address, range.size))
            .find(|(base, size)| addr >= *base && addr - base < *size)
            .map(|(base, _)| base)
            .unwrap_or_default();

        Some(InlineFrame {
            function_name,
            function_base,
            source_file_name,
            source_line: Some(entry.call_line),
        })
    }
}

impl std::fmt::Debug for FrozenModule<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrozenModule")
            .field("is_corrupt", &self.is_corrupt)
            .field("files", &self.files.len())
            .field("functions", &self.functions.len())
            .field("public_symbols", &self.public_symbols.len())
            .field("cfi_initial_rules", &self.cfi_initial_rules.len())
            .field("cfi_delta_rules", &self.cfi_delta_rules.len())
            .field("inline_origins", &self.inline_origins.len())
            .finish()
    }
}

/// A function value decoded from the serialized function map.
struct FunctionView<'data> {
    entry: FuncEntry,
    name: &'data str,
    lines: StaticRangeMap<'data>,
    inlines: StaticContainedRangeMap<'data>,
}

impl<'data> FunctionView<'data> {
    fn decode(value: &'data [u8]) -> Option<Self> {
        let (entry, rest) = FuncEntry::ref_from_prefix(value)?;

        let name_end = rest.iter().position(|b| *b == 0)?;
        let name = std::str::from_utf8(&rest[..name_end]).ok()?;
        let rest = &rest[name_end + 1..];

        let (len, rest) = Count::ref_from_prefix(rest)?;
        let line_len = len.value as usize;
        if rest.len() < line_len {
            return None;
        }
        let (line_region, rest) = rest.split_at(line_len);

        let (len, rest) = Count::ref_from_prefix(rest)?;
        let inline_len = len.value as usize;
        if rest.len() < inline_len {
            return None;
        }
        let (inline_region, _) = rest.split_at(inline_len);

        Some(FunctionView {
            entry: *entry,
            name,
            lines: StaticRangeMap::parse(line_region)?,
            inlines: StaticContainedRangeMap::parse(inline_region)?,
        })
    }
}

impl ModuleSymbols for FrozenModule<'_> {
    fn is_corrupt(&self) -> bool {
        self.is_corrupt
    }

    fn lookup_address(&self, addr: MemAddr) -> Resolution {
        let mut resolution = Resolution::default();

        // Use the nearest range so that, on a miss, the function below
        // the address still bounds the public symbol found afterwards.
        let nearest = self.functions.retrieve_nearest_range(addr);
        if let Some((value, base, high)) = nearest {
            if base <= addr && addr <= high {
                let func = match FunctionView::decode(value) {
                    Some(func) => func,
                    None => return resolution,
                };

                resolution.function_name = Some(func.name.to_string());
                resolution.function_base = Some(base);
                resolution.is_multiple = func.entry.multiple != 0;

                if let Some((value, line_base, _)) = func.lines.retrieve_range(addr) {
                    if let Some((entry, _)) = LineEntry::ref_from_prefix(value) {
                        resolution.source_file_name = self.file_name(entry.file_id);
                        resolution.source_line = Some(entry.line);
                        resolution.source_line_base = Some(line_base);
                    }
                }

                let mut found = Vec::new();
                func.inlines.retrieve_ranges(addr, &mut found);
                for record in found.into_iter().rev() {
                    if let Some(frame) = self.decode_inline_frame(record, addr) {
                        resolution.inline_frames.push(frame);
                    }
                }
                resolution.rotate_inline_frames();
                return resolution;
            }
        }

        if let Some((value, public_address)) = self.public_symbols.retrieve(addr) {
            let function_base = nearest.map(|(_, base, _)| base);
            if function_base.map_or(true, |base| public_address > base) {
                if let Some((entry, rest)) = PublicEntry::ref_from_prefix(value) {
                    resolution.function_name = read_cstr(rest, 0).map(String::from);
                    resolution.function_base = Some(public_address);
                    resolution.is_multiple = entry.multiple != 0;
                }
            }
        }

        resolution
    }

    fn windows_frame_info(&self, addr: MemAddr) -> Option<WindowsFrameInfo> {
        // FrameData records carry their own program string and are
        // preferred over the older Fpo flavor.
        for ty in [StackInfoType::FrameData, StackInfoType::Fpo] {
            let record = match self.windows_frame_info[ty as usize].retrieve_range(addr) {
                Some(record) => record,
                None => continue,
            };
            let (entry, rest) = FrameInfoEntry::ref_from_prefix(record)?;
            let program_string = read_cstr(rest, 0)
                .filter(|program| !program.is_empty())
                .map(String::from);

            return Some(WindowsFrameInfo {
                ty: StackInfoType::from_u32(entry.ty),
                valid: WfiValidity::from_bits(entry.valid),
                prolog_size: entry.prolog_size,
                epilog_size: entry.epilog_size,
                parameter_size: entry.parameter_size,
                saved_register_size: entry.saved_register_size,
                local_size: entry.local_size,
                max_stack_size: entry.max_stack_size,
                allocates_base_pointer: entry.allocates_base_pointer != 0,
                program_string,
            });
        }

        let mut result = WindowsFrameInfo::default();
        let nearest = self.functions.retrieve_nearest_range(addr);
        if let Some((value, base, high)) = nearest {
            if base <= addr && addr <= high {
                let (entry, _) = FuncEntry::ref_from_prefix(value)?;
                result.parameter_size = entry.parameter_size;
                result.valid |= WfiValidity::PARAMETER_SIZE;
                return Some(result);
            }
        }

        if let Some((value, public_address)) = self.public_symbols.retrieve(addr) {
            let function_base = nearest.map(|(_, base, _)| base);
            if function_base.map_or(true, |base| public_address > base) {
                let (entry, _) = PublicEntry::ref_from_prefix(value)?;
                result.parameter_size = entry.parameter_size;
                result.valid |= WfiValidity::PARAMETER_SIZE;
                return Some(result);
            }
        }

        None
    }

    fn cfi_frame_info(&self, addr: MemAddr) -> Option<CfiFrameInfo> {
        let (value, initial_base, _) = self.cfi_initial_rules.retrieve_range(addr)?;
        let rules = read_cstr(value, 0)?;

        let mut info = CfiFrameInfo::default();
        info.apply(rules).ok()?;

        // Apply delta rules from the start of the initial range up to
        // and including the queried address, in ascending order.
        let mut index = self.cfi_delta_rules.lower_bound(initial_base);
        while let Some((delta_address, value)) = self.cfi_delta_rules.get(index) {
            if delta_address > addr {
                break;
            }
            info.apply(read_cstr(value, 0)?).ok()?;
            index += 1;
        }

        Some(info)
    }
}
