//! The mutable module representation and the symbol file parser.
//!
//! A [`ParsedModule`] is built line by line from a textual symbol file.
//! It answers the same queries as its serialized counterpart
//! ([`FrozenModule`](crate::FrozenModule)) and can be flattened into the
//! serialized form by [`serialize`](ParsedModule::serialize).

use std::collections::BTreeMap;

use crate::breakpad::{self, Lines};
use crate::cfi::CfiFrameInfo;
use crate::error::SymbolError;
use crate::maps::{AddressMap, ContainedRangeMap, RangeMap};
use crate::types::{
    InlineFrame, MemAddr, ModuleIdentity, ModuleSymbols, Resolution, StackInfoType, WfiValidity,
    WindowsFrameInfo, NAME_OMITTED, STACK_INFO_SLOTS,
};

/// A function and its line and inline tables.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Function {
    pub address: MemAddr,
    pub size: MemAddr,
    pub parameter_size: u64,
    pub name: String,
    pub is_multiple: bool,
    pub lines: RangeMap<LineInfo>,
    pub inlines: ContainedRangeMap<Inline>,
}

impl Function {
    /// True if both records are identical including their attached line
    /// and inline tables. A repeated header line with a different body
    /// is not a duplicate; the later record replaces the earlier one.
    fn same_record(&self, other: &Function) -> bool {
        self == other
    }
}

/// A source line range within a function.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct LineInfo {
    pub address: MemAddr,
    pub size: MemAddr,
    pub file_id: u32,
    pub line: u32,
}

/// One inlined call, possibly covering several disjoint code ranges.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Inline {
    pub depth: u32,
    pub call_file: Option<u32>,
    pub call_line: u32,
    pub origin_id: u32,
    pub ranges: Vec<(MemAddr, MemAddr)>,
}

/// The callee identity of an inlined call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct InlineOrigin {
    pub file_id: Option<u32>,
    pub name: String,
}

/// An exported symbol without size information.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct PublicSymbol {
    pub address: MemAddr,
    pub parameter_size: u64,
    pub name: String,
    pub is_multiple: bool,
}

impl PublicSymbol {
    fn same_record(&self, other: &PublicSymbol) -> bool {
        self == other
    }
}

/// A symbol module freshly parsed from its textual form.
#[derive(Clone, Debug)]
pub struct ParsedModule {
    code_file: String,
    debug_identifier: String,
    os: String,
    cpu: String,
    code_id: Option<String>,
    code_file_name: Option<String>,
    pub(crate) files: BTreeMap<u32, String>,
    pub(crate) inline_origins: BTreeMap<u32, InlineOrigin>,
    pub(crate) functions: RangeMap<Function>,
    pub(crate) public_symbols: AddressMap<PublicSymbol>,
    pub(crate) windows_frame_info: [ContainedRangeMap<WindowsFrameInfo>; STACK_INFO_SLOTS],
    pub(crate) cfi_initial_rules: RangeMap<String>,
    pub(crate) cfi_delta_rules: BTreeMap<MemAddr, String>,
    pub(crate) corrupt: bool,
    malformed_lines: u64,
}

impl ParsedModule {
    /// Parses a textual symbol file.
    ///
    /// The first non-empty line must be a valid `MODULE` record. Any
    /// later record that fails to parse is dropped: the module is marked
    /// corrupt and parsing continues, so partial symbolization remains
    /// possible.
    #[tracing::instrument(level = "trace", name = "ParsedModule::parse", skip_all)]
    pub fn parse(data: &[u8]) -> Result<Self, SymbolError> {
        let mut lines = Lines::new(data);

        let header = loop {
            match lines.next() {
                Some(line) if line.is_empty() => continue,
                Some(line) => break line,
                None => return Err(SymbolError::MalformedHeader),
            }
        };
        let header = std::str::from_utf8(header).map_err(|_| SymbolError::MalformedHeader)?;
        let record = breakpad::module_record(header).map_err(|_| SymbolError::MalformedHeader)?;

        let mut module = ParsedModule {
            code_file: record.name.to_string(),
            debug_identifier: record.id.to_string(),
            os: record.os.to_string(),
            cpu: record.cpu.to_string(),
            code_id: None,
            code_file_name: None,
            files: BTreeMap::new(),
            inline_origins: BTreeMap::new(),
            functions: RangeMap::default(),
            public_symbols: AddressMap::default(),
            windows_frame_info: Default::default(),
            cfi_initial_rules: RangeMap::default(),
            cfi_delta_rules: BTreeMap::new(),
            corrupt: false,
            malformed_lines: 0,
        };

        let mut current_func: Option<Function> = None;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let line = match std::str::from_utf8(line) {
                Ok(line) => line,
                Err(_) => {
                    module.record_malformed("<non-utf8 line>");
                    continue;
                }
            };
            module.process_line(line, &mut current_func);
        }
        module.flush_function(&mut current_func);
        module.finish();

        Ok(module)
    }

    fn process_line(&mut self, line: &str, current_func: &mut Option<Function>) {
        if line.starts_with("MODULE ") {
            // The header was already consumed; repeated headers are ignored.
            tracing::debug!("ignoring repeated MODULE record");
        } else if line.starts_with("INFO ") {
            match breakpad::info_record(line) {
                Ok(breakpad::InfoRecord::CodeId { code_id, code_file }) => {
                    self.code_id = Some(code_id.to_string());
                    if !code_file.is_empty() {
                        self.code_file_name = Some(code_file.to_string());
                    }
                }
                Ok(breakpad::InfoRecord::Other) => (),
                Err(_) => self.record_malformed(line),
            }
        } else if line.starts_with("FILE ") {
            match breakpad::file_record(line) {
                Ok(record) => {
                    self.files.insert(record.id, record.name.to_string());
                }
                Err(_) => self.record_malformed(line),
            }
        } else if line.starts_with("INLINE_ORIGIN ") {
            match breakpad::inline_origin_record(line) {
                Ok(record) => {
                    self.inline_origins.insert(
                        record.id,
                        InlineOrigin {
                            file_id: record.file_id,
                            name: record.name.to_string(),
                        },
                    );
                }
                Err(_) => self.record_malformed(line),
            }
        } else if line.starts_with("FUNC ") {
            self.flush_function(current_func);
            match breakpad::func_record(line) {
                Ok(record) => {
                    *current_func = Some(Function {
                        address: record.address,
                        size: record.size,
                        parameter_size: record.parameter_size,
                        name: record.name.to_string(),
                        is_multiple: record.multiple,
                        lines: RangeMap::default(),
                        inlines: ContainedRangeMap::default(),
                    });
                }
                Err(_) => self.record_malformed(line),
            }
        } else if line.starts_with("INLINE ") {
            let func = match current_func {
                Some(func) => func,
                None => return self.record_malformed(line),
            };
            match breakpad::inline_record(line) {
                Ok(record) => {
                    let inline = Inline {
                        depth: record.depth,
                        call_file: record.call_file,
                        call_line: record.call_line,
                        origin_id: record.origin_id,
                        ranges: record.ranges.clone(),
                    };
                    let mut failed = false;
                    for (address, size) in record.ranges {
                        failed |= func.inlines.store(address, size, inline.clone()).is_err();
                    }
                    if failed {
                        self.record_malformed(line);
                    }
                }
                Err(_) => self.record_malformed(line),
            }
        } else if line.starts_with("PUBLIC ") {
            self.flush_function(current_func);
            match breakpad::public_record(line) {
                Ok(record) => self.insert_public(PublicSymbol {
                    address: record.address,
                    parameter_size: record.parameter_size,
                    name: record.name.to_string(),
                    is_multiple: record.multiple,
                }),
                Err(_) => self.record_malformed(line),
            }
        } else if line.starts_with("STACK WIN ") {
            self.flush_function(current_func);
            match breakpad::stack_win_record(line) {
                Ok(record) => {
                    let info = WindowsFrameInfo {
                        ty: Some(record.ty),
                        valid: WfiValidity::ALL,
                        prolog_size: record.prolog_size.into(),
                        epilog_size: record.epilog_size.into(),
                        parameter_size: record.parameter_size,
                        saved_register_size: record.saved_register_size.into(),
                        local_size: record.local_size,
                        max_stack_size: record.max_stack_size,
                        allocates_base_pointer: record.allocates_base_pointer,
                        program_string: record.program_string.map(String::from),
                    };
                    let slot = &mut self.windows_frame_info[record.ty as usize];
                    if slot.store(record.code_start, record.code_size, info).is_err() {
                        tracing::warn!(line, "dropping conflicting STACK WIN record");
                    }
                }
                Err(_) => self.record_malformed(line),
            }
        } else if line.starts_with("STACK CFI INIT ") {
            self.flush_function(current_func);
            match breakpad::stack_cfi_init_record(line) {
                Ok(record) => {
                    self.cfi_initial_rules
                        .store(record.start, record.size, record.rules.to_string());
                }
                Err(_) => self.record_malformed(line),
            }
        } else if line.starts_with("STACK CFI ") {
            self.flush_function(current_func);
            match breakpad::stack_cfi_delta_record(line) {
                Ok(record) => {
                    self.cfi_delta_rules
                        .insert(record.address, record.rules.to_string());
                }
                Err(_) => self.record_malformed(line),
            }
        } else if line.starts_with(|c: char| c.is_ascii_hexdigit()) {
            let func = match current_func {
                Some(func) => func,
                None => return self.record_malformed(line),
            };
            match breakpad::line_record(line) {
                Ok(record) if record.size == 0 => (),
                Ok(record) => {
                    let info = LineInfo {
                        address: record.address,
                        size: record.size,
                        file_id: record.file_id,
                        line: record.line,
                    };
                    let duplicate = func.lines.get(record.address).map_or(
                        false,
                        |(existing, base, _)| base == record.address && *existing == info,
                    );
                    if !duplicate {
                        func.lines.store(record.address, record.size, info);
                    }
                }
                Err(_) => self.record_malformed(line),
            }
        } else {
            // Unknown record types are reserved for future use.
        }
    }

    fn record_malformed(&mut self, line: &str) {
        tracing::warn!(line, "dropping malformed record");
        self.corrupt = true;
        self.malformed_lines += 1;
    }

    /// Moves the accumulated function into the range map, applying the
    /// conflict policy: byte-identical records are discarded, otherwise
    /// the later record wins and is marked as duplicated.
    fn flush_function(&mut self, current_func: &mut Option<Function>) {
        let mut func = match current_func.take() {
            Some(func) => func,
            None => return,
        };

        if let Some((existing, base, _)) = self.functions.get(func.address) {
            if base == func.address && existing.same_record(&func) {
                return;
            }
        }

        if self.functions.overlaps(func.address, func.size) {
            func.is_multiple = true;
        }
        self.functions.store(func.address, func.size, func);
    }

    fn insert_public(&mut self, mut public: PublicSymbol) {
        if let Some(existing) = self.public_symbols.get_exact(public.address) {
            if existing.same_record(&public) {
                return;
            }
            public.is_multiple = true;
        }
        self.public_symbols.store(public.address, public);
    }

    /// Extends zero-sized functions to the start of the next function,
    /// or to the end of the address space for the last one.
    fn finish(&mut self) {
        let entries: Vec<(MemAddr, MemAddr, Function)> = self
            .functions
            .iter()
            .map(|(base, high, func)| (base, high, func.clone()))
            .collect();
        if !entries.iter().any(|(_, _, func)| func.size == 0) {
            return;
        }

        let next_starts: Vec<Option<MemAddr>> = (0..entries.len())
            .map(|index| entries.get(index + 1).map(|(base, _, _)| *base))
            .collect();

        self.functions.rebuild(entries.into_iter().zip(next_starts).map(
            |((base, high, mut func), next_start)| {
                if func.size == 0 {
                    func.size = match next_start {
                        Some(next) => next - base,
                        None => (u64::MAX - base).saturating_add(1),
                    };
                    let high = base.saturating_add(func.size - 1);
                    (base, high, func)
                } else {
                    (base, high, func)
                }
            },
        ));
    }

    /// The code file named by the `MODULE` header.
    pub fn code_file(&self) -> &str {
        &self.code_file
    }

    /// The debug identifier from the `MODULE` header.
    pub fn debug_identifier(&self) -> &str {
        &self.debug_identifier
    }

    /// The operating system named by the `MODULE` header.
    pub fn os(&self) -> &str {
        &self.os
    }

    /// The CPU architecture named by the `MODULE` header.
    pub fn cpu(&self) -> &str {
        &self.cpu
    }

    /// The native code identifier from an `INFO CODE_ID` record.
    pub fn code_id(&self) -> Option<&str> {
        self.code_id.as_deref()
    }

    /// The native code file name from an `INFO CODE_ID` record.
    pub fn code_file_name(&self) -> Option<&str> {
        self.code_file_name.as_deref()
    }

    /// The identity under which this module is keyed in a resolver.
    pub fn identity(&self) -> ModuleIdentity {
        ModuleIdentity::new(self.code_file.clone(), self.debug_identifier.clone())
    }

    /// Number of lines that failed to parse and were dropped.
    pub fn malformed_line_count(&self) -> u64 {
        self.malformed_lines
    }

    fn file_name(&self, file_id: u32) -> Option<String> {
        self.files.get(&file_id).cloned()
    }
}

impl ModuleSymbols for ParsedModule {
    fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    fn lookup_address(&self, addr: MemAddr) -> Resolution {
        let mut resolution = Resolution::default();

        // Use the nearest range so that, on a miss, the function below
        // the address still bounds the public symbol found afterwards.
        let nearest = self.functions.get_nearest(addr);
        if let Some((func, base, high)) = nearest {
            if base <= addr && addr <= high {
                resolution.function_name = Some(func.name.clone());
                resolution.function_base = Some(base);
                resolution.is_multiple = func.is_multiple;

                if let Some((line, line_base, _)) = func.lines.get(addr) {
                    resolution.source_file_name = self.file_name(line.file_id);
                    resolution.source_line = Some(line.line);
                    resolution.source_line_base = Some(line_base);
                }

                let mut found = Vec::new();
                func.inlines.retrieve_ranges(addr, &mut found);
                for inline in found.into_iter().rev() {
                    resolution
                        .inline_frames
                        .push(self.decode_inline_frame(inline, addr));
                }
                resolution.rotate_inline_frames();
                return resolution;
            }
        }

        if let Some((public, public_address)) = self.public_symbols.get(addr) {
            let function_base = nearest.map(|(_, base, _)| base);
            if function_base.map_or(true, |base| public_address > base) {
                resolution.function_name = Some(public.name.clone());
                resolution.function_base = Some(public_address);
                resolution.is_multiple = public.is_multiple;
            }
        }

        resolution
    }

    fn windows_frame_info(&self, addr: MemAddr) -> Option<WindowsFrameInfo> {
        // FrameData records carry their own program string and are
        // preferred over the older Fpo flavor.
        for ty in [StackInfoType::FrameData, StackInfoType::Fpo] {
            if let Some(info) = self.windows_frame_info[ty as usize].retrieve_range(addr) {
                return Some(info.clone());
            }
        }

        let mut result = WindowsFrameInfo::default();
        let nearest = self.functions.get_nearest(addr);
        if let Some((func, base, high)) = nearest {
            if base <= addr && addr <= high {
                result.parameter_size = func.parameter_size;
                result.valid |= WfiValidity::PARAMETER_SIZE;
                return Some(result);
            }
        }

        if let Some((public, public_address)) = self.public_symbols.get(addr) {
            let function_base = nearest.map(|(_, base, _)| base);
            if function_base.map_or(true, |base| public_address > base) {
                result.parameter_size = public.parameter_size;
                result.valid |= WfiValidity::PARAMETER_SIZE;
                return Some(result);
            }
        }

        None
    }

    fn cfi_frame_info(&self, addr: MemAddr) -> Option<CfiFrameInfo> {
        let (rules, initial_base, _) = self.cfi_initial_rules.get(addr)?;

        let mut info = CfiFrameInfo::default();
        info.apply(rules).ok()?;

        for (_, delta) in self.cfi_delta_rules.range(initial_base..=addr) {
            info.apply(delta).ok()?;
        }

        Some(info)
    }
}

impl ParsedModule {
    fn decode_inline_frame(&self, inline: &Inline, addr: MemAddr) -> InlineFrame {
        let function_name = match self.inline_origins.get(&inline.origin_id) {
            Some(origin) => origin.name.clone(),
            None => NAME_OMITTED.to_string(),
        };

        let source_file_name = inline.call_file.and_then(|id| self.file_name(id));

        // The frame's base is the start of the covering range.
        let function_base = inline
            .ranges
            .iter()
            .find(|(base, size)| addr >= *base && addr - base < *size)
            .map(|(base, _)| *base)
            .unwrap_or_default();

        InlineFrame {
            function_name,
            function_base,
            source_file_name,
            source_line: Some(inline.call_line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParsedModule {
        ParsedModule::parse(text.as_bytes()).unwrap()
    }

    const HEADER: &str = "MODULE Linux x86_64 492E2DD23CC306CA9C494EEF1533A3810 a.out\n";

    #[test]
    fn requires_module_header() {
        assert!(matches!(
            ParsedModule::parse(b"FILE 1 a.c\n"),
            Err(SymbolError::MalformedHeader)
        ));
        assert!(matches!(
            ParsedModule::parse(b""),
            Err(SymbolError::MalformedHeader)
        ));
    }

    #[test]
    fn parses_module_identity() {
        let module = parse(HEADER);
        assert_eq!(module.code_file(), "a.out");
        assert_eq!(module.debug_identifier(), "492E2DD23CC306CA9C494EEF1533A3810");
        assert_eq!(module.os(), "Linux");
        assert_eq!(module.cpu(), "x86_64");
        assert!(!module.is_corrupt());
    }

    #[test]
    fn captures_code_id() {
        let module = parse(&format!("{}INFO CODE_ID 593D18FA9000 a.dll\n", HEADER));
        assert_eq!(module.code_id(), Some("593D18FA9000"));
        assert_eq!(module.code_file_name(), Some("a.dll"));
    }

    #[test]
    fn malformed_record_marks_corrupt_but_continues() {
        let text = format!("{}FUNC zz not hex\nFUNC 100 20 4 f\n", HEADER);
        let module = parse(&text);

        assert!(module.is_corrupt());
        assert_eq!(module.malformed_line_count(), 1);
        assert_eq!(
            module.lookup_address(0x100).function_name.as_deref(),
            Some("f")
        );
    }

    #[test]
    fn line_outside_function_is_malformed() {
        let module = parse(&format!("{}100 10 42 1\n", HEADER));
        assert!(module.is_corrupt());
    }

    #[test]
    fn unknown_records_are_ignored() {
        let module = parse(&format!("{}FANCY_NEW_RECORD 1 2 3\n", HEADER));
        assert!(!module.is_corrupt());
    }

    #[test]
    fn duplicate_functions_win_late_and_mark_multiple() {
        let text = format!("{}FUNC 100 20 4 first\nFUNC 100 20 4 second\n", HEADER);
        let module = parse(&text);

        let resolution = module.lookup_address(0x100);
        assert_eq!(resolution.function_name.as_deref(), Some("second"));
        assert!(resolution.is_multiple);
    }

    #[test]
    fn identical_function_records_are_dropped_silently() {
        let text = format!("{}FUNC 100 20 4 f\nFUNC 100 20 4 f\n", HEADER);
        let module = parse(&text);

        let resolution = module.lookup_address(0x100);
        assert_eq!(resolution.function_name.as_deref(), Some("f"));
        assert!(!resolution.is_multiple);
        assert!(!module.is_corrupt());
    }

    #[test]
    fn repeated_function_header_with_different_lines_wins_late() {
        let text = format!(
            "{}FILE 1 a.c\nFUNC 100 20 4 f\n100 10 1 1\nFUNC 100 20 4 f\n100 10 2 1\n",
            HEADER
        );
        let module = parse(&text);

        // Identical header lines, but the bodies differ: the later
        // record replaces the earlier one and is marked as duplicated.
        let resolution = module.lookup_address(0x100);
        assert_eq!(resolution.function_name.as_deref(), Some("f"));
        assert_eq!(resolution.source_line, Some(2));
        assert!(resolution.is_multiple);
    }

    #[test]
    fn zero_size_function_extends_to_next() {
        let text = format!("{}FUNC 100 0 0 first\nFUNC 200 10 0 second\n", HEADER);
        let module = parse(&text);

        assert_eq!(
            module.lookup_address(0x1ff).function_name.as_deref(),
            Some("first")
        );
        assert_eq!(
            module.lookup_address(0x200).function_name.as_deref(),
            Some("second")
        );
    }

    #[test]
    fn trailing_zero_size_function_extends_to_end() {
        let module = parse(&format!("{}FUNC 100 0 0 tail\n", HEADER));
        assert_eq!(
            module.lookup_address(u64::MAX).function_name.as_deref(),
            Some("tail")
        );
    }

    #[test]
    fn public_symbols_deduplicate() {
        let text = format!("{}PUBLIC 200 0 g\nPUBLIC 200 4 h\n", HEADER);
        let module = parse(&text);

        let resolution = module.lookup_address(0x200);
        assert_eq!(resolution.function_name.as_deref(), Some("h"));
        assert!(resolution.is_multiple);
    }
}
