//! Record-level grammar of the textual symbol file format.
//!
//! Each record occupies one line. Addresses, sizes and parameter sizes
//! are unprefixed hexadecimal; record ids, line numbers and nesting
//! depths are decimal. Names, paths, rule strings and program strings
//! run to the end of the line and may contain spaces.

use std::fmt;
use std::iter::FusedIterator;

use crate::types::{StackInfoType, UNKNOWN_NAME};

type Result<'a, A> = std::result::Result<A, RecordError<'a>>;

#[non_exhaustive]
#[derive(Clone, Copy, Debug)]
pub(crate) enum RecordErrorKind {
    FileRecord,
    FuncRecord,
    Id,
    InfoRecord,
    InlineOriginRecord,
    InlineRecord,
    LineRecord,
    ModuleRecord,
    NumDec,
    NumHex,
    PublicRecord,
    StackCfiDeltaRecord,
    StackCfiInitRecord,
    StackWinRecord,
    StackWinRecordType,
}

/// An error describing a single unparsable record line.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RecordError<'a> {
    kind: RecordErrorKind,
    input: &'a str,
}

impl<'a> fmt::Display for RecordError<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RecordErrorKind::FileRecord => write!(f, "invalid file record: ")?,
            RecordErrorKind::FuncRecord => write!(f, "invalid func record: ")?,
            RecordErrorKind::Id => write!(f, "invalid id: ")?,
            RecordErrorKind::InfoRecord => write!(f, "invalid info record: ")?,
            RecordErrorKind::InlineOriginRecord => write!(f, "invalid inline origin record: ")?,
            RecordErrorKind::InlineRecord => write!(f, "invalid inline record: ")?,
            RecordErrorKind::LineRecord => write!(f, "invalid line record: ")?,
            RecordErrorKind::ModuleRecord => write!(f, "invalid module record: ")?,
            RecordErrorKind::NumDec => write!(f, "expected decimal number: ")?,
            RecordErrorKind::NumHex => write!(f, "expected hex number: ")?,
            RecordErrorKind::PublicRecord => write!(f, "invalid public record: ")?,
            RecordErrorKind::StackCfiDeltaRecord => write!(f, "invalid stack cfi record: ")?,
            RecordErrorKind::StackCfiInitRecord => write!(f, "invalid stack cfi init record: ")?,
            RecordErrorKind::StackWinRecord => write!(f, "invalid stack win record: ")?,
            RecordErrorKind::StackWinRecordType => write!(f, "invalid stack win record type: ")?,
        }

        write!(f, "{}", self.input)
    }
}

impl<'a> std::error::Error for RecordError<'a> {}

fn error<'a, A>(kind: RecordErrorKind, input: &'a str) -> Result<'a, A> {
    Err(RecordError { kind, input })
}

fn num_hex_64(input: &str) -> Result<'_, u64> {
    u64::from_str_radix(input, 16).or(error(RecordErrorKind::NumHex, input))
}

fn num_hex_32(input: &str) -> Result<'_, u32> {
    u32::from_str_radix(input, 16).or(error(RecordErrorKind::NumHex, input))
}

fn num_hex_16(input: &str) -> Result<'_, u16> {
    u16::from_str_radix(input, 16).or(error(RecordErrorKind::NumHex, input))
}

fn num_dec_32(input: &str) -> Result<'_, u32> {
    input.parse::<u32>().or(error(RecordErrorKind::NumDec, input))
}

/// Parses a line number, clamping negative values to zero.
fn line_number(input: &str) -> Result<'_, u32> {
    let line = input
        .parse::<i64>()
        .or(error(RecordErrorKind::NumDec, input))?;
    Ok(line.clamp(0, u32::MAX as i64) as u32)
}

fn id(input: &str) -> Result<'_, &str> {
    if input.chars().all(|c| c.is_ascii_hexdigit()) && input.len() >= 32 && input.len() <= 40 {
        Ok(input)
    } else {
        error(RecordErrorKind::Id, input)
    }
}

/// A `MODULE` record, the mandatory header of a symbol file.
///
/// Example: `MODULE Linux x86_64 492E2DD23CC306CA9C494EEF1533A3810 crash`
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct ModuleRecord<'d> {
    pub os: &'d str,
    pub cpu: &'d str,
    pub id: &'d str,
    pub name: &'d str,
}

pub(crate) fn module_record(input: &str) -> Result<'_, ModuleRecord<'_>> {
    let current = input
        .strip_prefix("MODULE")
        .ok_or(RecordError {
            kind: RecordErrorKind::ModuleRecord,
            input,
        })?
        .trim_start();
    let mut parts = current.splitn(4, char::is_whitespace);
    let mut advance = || {
        parts
            .next()
            .ok_or(RecordError {
                kind: RecordErrorKind::ModuleRecord,
                input,
            })
            .map(str::trim)
    };

    let os = advance()?;
    let cpu = advance()?;
    let id = id(advance()?)?;
    let name = parts.next().unwrap_or(UNKNOWN_NAME);

    Ok(ModuleRecord { os, cpu, id, name })
}

/// An `INFO` record. Only the `CODE_ID` scope carries data the module
/// retains; all other scopes are reported as [`InfoRecord::Other`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum InfoRecord<'d> {
    CodeId { code_id: &'d str, code_file: &'d str },
    Other,
}

pub(crate) fn info_record(input: &str) -> Result<'_, InfoRecord<'_>> {
    let current = input
        .strip_prefix("INFO")
        .ok_or(RecordError {
            kind: RecordErrorKind::InfoRecord,
            input,
        })?
        .trim_start();

    match current.strip_prefix("CODE_ID") {
        Some(rest) => {
            let mut parts = rest.trim_start().splitn(2, char::is_whitespace);
            let code_id = parts.next().filter(|s| !s.is_empty()).ok_or(RecordError {
                kind: RecordErrorKind::InfoRecord,
                input,
            })?;
            let code_file = parts.next().unwrap_or("");
            Ok(InfoRecord::CodeId { code_id, code_file })
        }
        None => Ok(InfoRecord::Other),
    }
}

/// A `FILE` record mapping an id to a source path.
///
/// Example: `FILE 2 /home/jimb/mc/in/browser/app/nsBrowserApp.cpp`
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct FileRecord<'d> {
    pub id: u32,
    pub name: &'d str,
}

pub(crate) fn file_record(input: &str) -> Result<'_, FileRecord<'_>> {
    let current = input
        .strip_prefix("FILE")
        .ok_or(RecordError {
            kind: RecordErrorKind::FileRecord,
            input,
        })?
        .trim_start();
    let mut parts = current.splitn(2, char::is_whitespace);

    let id = num_dec_32(parts.next().ok_or(RecordError {
        kind: RecordErrorKind::FileRecord,
        input,
    })?)?;
    let name = parts.next().unwrap_or(UNKNOWN_NAME);

    Ok(FileRecord { id, name })
}

/// An `INLINE_ORIGIN` record naming an inlined callee.
///
/// The current form is `INLINE_ORIGIN <id> <name>`. The legacy form
/// `INLINE_ORIGIN <id> <file id> <name>` is recognized when the second
/// token is decimal and a name still follows; its file id pairs with
/// `INLINE` records that omit the call-site file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct InlineOriginRecord<'d> {
    pub id: u32,
    pub file_id: Option<u32>,
    pub name: &'d str,
}

pub(crate) fn inline_origin_record(input: &str) -> Result<'_, InlineOriginRecord<'_>> {
    let current = input
        .strip_prefix("INLINE_ORIGIN")
        .ok_or(RecordError {
            kind: RecordErrorKind::InlineOriginRecord,
            input,
        })?
        .trim_start();
    let mut parts = current.splitn(2, char::is_whitespace);

    let id = num_dec_32(parts.next().ok_or(RecordError {
        kind: RecordErrorKind::InlineOriginRecord,
        input,
    })?)?;
    let rest = parts.next().unwrap_or(UNKNOWN_NAME);

    let mut legacy = rest.splitn(2, char::is_whitespace);
    if let (Some(first), Some(name)) = (legacy.next(), legacy.next()) {
        if let Ok(file_id) = first.parse::<u32>() {
            return Ok(InlineOriginRecord {
                id,
                file_id: Some(file_id),
                name,
            });
        }
    }

    Ok(InlineOriginRecord {
        id,
        file_id: None,
        name: rest,
    })
}

/// A `FUNC` record. Line and `INLINE` records following it belong to it.
///
/// Example: `FUNC m c184 30 0 nsQueryInterfaceWithError::operator()(...)`
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct FuncRecord<'d> {
    pub multiple: bool,
    pub address: u64,
    pub size: u64,
    pub parameter_size: u64,
    pub name: &'d str,
}

pub(crate) fn func_record(input: &str) -> Result<'_, FuncRecord<'_>> {
    let mut current = input
        .strip_prefix("FUNC")
        .ok_or(RecordError {
            kind: RecordErrorKind::FuncRecord,
            input,
        })?
        .trim_start();

    let multiple = if let Some(rest) = current.strip_prefix("m ") {
        current = rest.trim_start();
        true
    } else {
        false
    };

    let mut parts = current.splitn(4, char::is_whitespace);
    let mut advance = || {
        parts.next().ok_or(RecordError {
            kind: RecordErrorKind::FuncRecord,
            input,
        })
    };

    let address = num_hex_64(advance()?)?;
    let size = num_hex_64(advance()?)?;
    let parameter_size = num_hex_64(advance()?)?;
    let name = parts.next().unwrap_or(UNKNOWN_NAME);

    Ok(FuncRecord {
        multiple,
        address,
        size,
        parameter_size,
        name,
    })
}

/// A source line record. Line records carry no token; they follow the
/// `FUNC` record they belong to.
///
/// Example: `c184 7 59 4`
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct LineRecord {
    pub address: u64,
    pub size: u64,
    pub line: u32,
    pub file_id: u32,
}

pub(crate) fn line_record(input: &str) -> Result<'_, LineRecord> {
    let mut parts = input.splitn(4, char::is_whitespace);
    let mut advance = || {
        parts
            .next()
            .ok_or(RecordError {
                kind: RecordErrorKind::LineRecord,
                input,
            })
            .map(str::trim)
    };

    let address = num_hex_64(advance()?)?;
    let size = num_hex_64(advance()?)?;
    let line = line_number(advance()?)?;
    let file_id = num_dec_32(advance()?)?;

    Ok(LineRecord {
        address,
        size,
        line,
        file_id,
    })
}

/// An `INLINE` record describing one inlined call inside a function.
///
/// The current form is `INLINE <depth> <call line> <call file> <origin>
/// (<addr> <size>)+`; the legacy form omits the call-site file. The two
/// are told apart by token parity, since ranges always come in pairs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct InlineRecord {
    pub depth: u32,
    pub call_line: u32,
    pub call_file: Option<u32>,
    pub origin_id: u32,
    pub ranges: Vec<(u64, u64)>,
}

pub(crate) fn inline_record(input: &str) -> Result<'_, InlineRecord> {
    let current = input
        .strip_prefix("INLINE")
        .ok_or(RecordError {
            kind: RecordErrorKind::InlineRecord,
            input,
        })?
        .trim_start();

    let tokens: Vec<&str> = current.split_whitespace().collect();
    let has_call_file = tokens.len() % 2 == 0;
    let fixed = if has_call_file { 4 } else { 3 };
    if tokens.len() < fixed + 2 {
        return error(RecordErrorKind::InlineRecord, input);
    }

    let depth = num_dec_32(tokens[0])?;
    let call_line = line_number(tokens[1])?;
    let (call_file, origin_index) = if has_call_file {
        (Some(num_dec_32(tokens[2])?), 3)
    } else {
        (None, 2)
    };
    let origin_id = num_dec_32(tokens[origin_index])?;

    let mut ranges = Vec::with_capacity((tokens.len() - fixed) / 2);
    for pair in tokens[fixed..].chunks(2) {
        ranges.push((num_hex_64(pair[0])?, num_hex_64(pair[1])?));
    }

    Ok(InlineRecord {
        depth,
        call_line,
        call_file,
        origin_id,
        ranges,
    })
}

/// A `PUBLIC` record for an exported symbol without size information.
///
/// Example: `PUBLIC m 2160 0 Public2_1`
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct PublicRecord<'d> {
    pub multiple: bool,
    pub address: u64,
    pub parameter_size: u64,
    pub name: &'d str,
}

pub(crate) fn public_record(input: &str) -> Result<'_, PublicRecord<'_>> {
    let mut current = input
        .strip_prefix("PUBLIC")
        .ok_or(RecordError {
            kind: RecordErrorKind::PublicRecord,
            input,
        })?
        .trim_start();

    let multiple = if let Some(rest) = current.strip_prefix("m ") {
        current = rest.trim_start();
        true
    } else {
        false
    };

    let mut parts = current.splitn(3, char::is_whitespace);
    let mut advance = || {
        parts.next().ok_or(RecordError {
            kind: RecordErrorKind::PublicRecord,
            input,
        })
    };

    let address = num_hex_64(advance()?)?;
    let parameter_size = num_hex_64(advance()?)?;
    let name = parts.next().unwrap_or(UNKNOWN_NAME);

    Ok(PublicRecord {
        multiple,
        address,
        parameter_size,
        name,
    })
}

/// A `STACK WIN` record.
///
/// Example: `STACK WIN 4 2170 14 1 0 0 0 0 0 1 $eip 4 + ^ =`
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct StackWinRecord<'d> {
    pub ty: StackInfoType,
    pub code_start: u64,
    pub code_size: u64,
    pub prolog_size: u16,
    pub epilog_size: u16,
    pub parameter_size: u64,
    pub saved_register_size: u16,
    pub local_size: u32,
    pub max_stack_size: u32,
    pub allocates_base_pointer: bool,
    pub program_string: Option<&'d str>,
}

pub(crate) fn stack_win_record(input: &str) -> Result<'_, StackWinRecord<'_>> {
    let current = input
        .strip_prefix("STACK WIN")
        .ok_or(RecordError {
            kind: RecordErrorKind::StackWinRecord,
            input,
        })?
        .trim_start();

    let mut parts = current.splitn(11, char::is_whitespace);
    let mut advance = || {
        parts.next().ok_or(RecordError {
            kind: RecordErrorKind::StackWinRecord,
            input,
        })
    };

    let ty = num_dec_32(advance()?)
        .ok()
        .and_then(StackInfoType::from_u32)
        .ok_or(RecordError {
            kind: RecordErrorKind::StackWinRecordType,
            input,
        })?;
    let code_start = num_hex_64(advance()?)?;
    let code_size = num_hex_64(advance()?)?;
    let prolog_size = num_hex_16(advance()?)?;
    let epilog_size = num_hex_16(advance()?)?;
    let parameter_size = num_hex_64(advance()?)?;
    let saved_register_size = num_hex_16(advance()?)?;
    let local_size = num_hex_32(advance()?)?;
    let max_stack_size = num_hex_32(advance()?)?;
    let has_program_string = advance()? != "0";
    let last = advance()?;

    let (allocates_base_pointer, program_string) = if has_program_string {
        (false, Some(last))
    } else {
        (last != "0", None)
    };

    Ok(StackWinRecord {
        ty,
        code_start,
        code_size,
        prolog_size,
        epilog_size,
        parameter_size,
        saved_register_size,
        local_size,
        max_stack_size,
        allocates_base_pointer,
        program_string,
    })
}

/// A `STACK CFI INIT` record carrying the initial rule set of a range.
///
/// Example: `STACK CFI INIT 1880 2d .cfa: $rsp 8 + .ra: .cfa -8 + ^`
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct StackCfiInitRecord<'d> {
    pub start: u64,
    pub size: u64,
    pub rules: &'d str,
}

pub(crate) fn stack_cfi_init_record(input: &str) -> Result<'_, StackCfiInitRecord<'_>> {
    let current = input
        .strip_prefix("STACK CFI INIT")
        .ok_or(RecordError {
            kind: RecordErrorKind::StackCfiInitRecord,
            input,
        })?
        .trim_start();

    let mut parts = current.splitn(3, char::is_whitespace);
    let mut advance = || {
        parts.next().ok_or(RecordError {
            kind: RecordErrorKind::StackCfiInitRecord,
            input,
        })
    };

    let start = num_hex_64(advance()?)?;
    let size = num_hex_64(advance()?)?;
    let rules = advance()?;

    Ok(StackCfiInitRecord { start, size, rules })
}

/// A `STACK CFI` record applying rule deltas at one address.
///
/// Example: `STACK CFI 804c4b1 .cfa: $esp 8 + $ebp: .cfa 8 - ^`
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct StackCfiDeltaRecord<'d> {
    pub address: u64,
    pub rules: &'d str,
}

pub(crate) fn stack_cfi_delta_record(input: &str) -> Result<'_, StackCfiDeltaRecord<'_>> {
    let current = input
        .strip_prefix("STACK CFI")
        .ok_or(RecordError {
            kind: RecordErrorKind::StackCfiDeltaRecord,
            input,
        })?
        .trim_start();

    let mut parts = current.splitn(2, char::is_whitespace);
    let mut advance = || {
        parts.next().ok_or(RecordError {
            kind: RecordErrorKind::StackCfiDeltaRecord,
            input,
        })
    };

    let address = num_hex_64(advance()?)?;
    let rules = advance()?;

    Ok(StackCfiDeltaRecord { address, rules })
}

/// An iterator over the lines of a symbol file.
///
/// Splits on `\n` and strips a trailing `\r`, so both LF and CRLF
/// terminated files parse identically.
#[derive(Clone, Debug, Default)]
pub(crate) struct Lines<'d> {
    data: &'d [u8],
    finished: bool,
}

impl<'d> Lines<'d> {
    pub fn new(data: &'d [u8]) -> Self {
        Lines {
            data,
            finished: data.is_empty(),
        }
    }
}

impl<'d> Iterator for Lines<'d> {
    type Item = &'d [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.data.iter().position(|b| *b == b'\n') {
            Some(index) => {
                let mut line = &self.data[..index];
                if let [rest @ .., b'\r'] = line {
                    line = rest;
                }
                self.data = &self.data[index + 1..];
                Some(line)
            }
            None => {
                self.finished = true;
                Some(self.data)
            }
        }
    }
}

impl FusedIterator for Lines<'_> {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_module_record() {
        let record =
            module_record("MODULE Linux x86_64 492E2DD23CC306CA9C494EEF1533A3810 crash").unwrap();
        assert_eq!(
            record,
            ModuleRecord {
                os: "Linux",
                cpu: "x86_64",
                id: "492E2DD23CC306CA9C494EEF1533A3810",
                name: "crash",
            }
        );
    }

    #[test]
    fn parse_module_record_short_id() {
        // One character short of carrying an age, which some dumpers omit.
        let record =
            module_record("MODULE Linux x86_64 6216C672A8D33EC9CF4A1BAB8B29D00E libdispatch.so")
                .unwrap();
        assert_eq!(record.id, "6216C672A8D33EC9CF4A1BAB8B29D00E");
    }

    #[test]
    fn reject_module_record_bad_id() {
        assert!(module_record("MODULE Linux x86_64 NOTHEX firefox").is_err());
    }

    #[test]
    fn parse_file_record_with_spaces() {
        let record = file_record("FILE 38 /usr/local/src/filename with spaces.c").unwrap();
        assert_eq!(record.id, 38);
        assert_eq!(record.name, "/usr/local/src/filename with spaces.c");
    }

    #[test]
    fn parse_func_record() {
        let record = func_record("FUNC 1730 1a 0 some_func(int, char)").unwrap();
        assert_eq!(
            record,
            FuncRecord {
                multiple: false,
                address: 0x1730,
                size: 0x1a,
                parameter_size: 0,
                name: "some_func(int, char)",
            }
        );
    }

    #[test]
    fn parse_func_record_multiple() {
        let record = func_record("FUNC m 1730 1a 0 f").unwrap();
        assert!(record.multiple);
        assert_eq!(record.address, 0x1730);
    }

    #[test]
    fn parse_func_record_no_name() {
        let record = func_record("FUNC 0 f 0").unwrap();
        assert_eq!(record.name, "<unknown>");
    }

    #[test]
    fn parse_line_record() {
        let record = line_record("1730 6 93 20").unwrap();
        assert_eq!(
            record,
            LineRecord {
                address: 0x1730,
                size: 6,
                line: 93,
                file_id: 20,
            }
        );
    }

    #[test]
    fn parse_line_record_negative_line() {
        let record = line_record("e0fd10 5 -376 2225").unwrap();
        assert_eq!(record.line, 0);
    }

    #[test]
    fn parse_inline_record() {
        let record = inline_record("INLINE 0 17 1 9 110 8").unwrap();
        assert_eq!(
            record,
            InlineRecord {
                depth: 0,
                call_line: 17,
                call_file: Some(1),
                origin_id: 9,
                ranges: vec![(0x110, 8)],
            }
        );
    }

    #[test]
    fn parse_inline_record_multiple_ranges() {
        let record = inline_record("INLINE 1 20 2 4 100 10 130 4").unwrap();
        assert_eq!(record.ranges, vec![(0x100, 0x10), (0x130, 4)]);
    }

    #[test]
    fn parse_inline_record_legacy() {
        // No call-site file; the origin record carries it instead.
        let record = inline_record("INLINE 0 17 9 110 8").unwrap();
        assert_eq!(record.call_file, None);
        assert_eq!(record.origin_id, 9);
        assert_eq!(record.ranges, vec![(0x110, 8)]);
    }

    #[test]
    fn reject_inline_record_without_ranges() {
        assert!(inline_record("INLINE 0 17 1 9").is_err());
    }

    #[test]
    fn parse_inline_origin_record() {
        let record = inline_origin_record("INLINE_ORIGIN 9 inner_function()").unwrap();
        assert_eq!(
            record,
            InlineOriginRecord {
                id: 9,
                file_id: None,
                name: "inner_function()",
            }
        );
    }

    #[test]
    fn parse_inline_origin_record_legacy() {
        let record = inline_origin_record("INLINE_ORIGIN 9 3 inner_function()").unwrap();
        assert_eq!(record.file_id, Some(3));
        assert_eq!(record.name, "inner_function()");
    }

    #[test]
    fn parse_public_record() {
        let record = public_record("PUBLIC 5180 0 __clang_call_terminate").unwrap();
        assert_eq!(
            record,
            PublicRecord {
                multiple: false,
                address: 0x5180,
                parameter_size: 0,
                name: "__clang_call_terminate",
            }
        );
    }

    #[test]
    fn parse_stack_win_record_with_program() {
        let record =
            stack_win_record("STACK WIN 4 371a c 0 0 0 0 0 0 1 $T0 .raSearch = $eip $T0 ^ =")
                .unwrap();
        assert_eq!(record.ty, StackInfoType::FrameData);
        assert_eq!(record.code_start, 0x371a);
        assert_eq!(record.code_size, 0xc);
        assert!(!record.allocates_base_pointer);
        assert_eq!(
            record.program_string,
            Some("$T0 .raSearch = $eip $T0 ^ =")
        );
    }

    #[test]
    fn parse_stack_win_record_fpo() {
        let record = stack_win_record("STACK WIN 0 4d240 1d 3 0 0 0 0 0 0 1").unwrap();
        assert_eq!(record.ty, StackInfoType::Fpo);
        assert!(record.allocates_base_pointer);
        assert_eq!(record.program_string, None);
    }

    #[test]
    fn reject_stack_win_record_reserved_type() {
        assert!(stack_win_record("STACK WIN 5 4d240 1d 3 0 0 0 0 0 0 1").is_err());
    }

    #[test]
    fn parse_stack_cfi_init_record() {
        let record =
            stack_cfi_init_record("STACK CFI INIT 1880 2d .cfa: $rsp 8 + .ra: .cfa -8 + ^")
                .unwrap();
        assert_eq!(record.start, 0x1880);
        assert_eq!(record.size, 0x2d);
        assert_eq!(record.rules, ".cfa: $rsp 8 + .ra: .cfa -8 + ^");
    }

    #[test]
    fn parse_stack_cfi_delta_record() {
        let record = stack_cfi_delta_record("STACK CFI 804c4b1 .cfa: $esp 8 +").unwrap();
        assert_eq!(record.address, 0x804c4b1);
        assert_eq!(record.rules, ".cfa: $esp 8 +");
    }

    #[test]
    fn lines_mixed_terminators() {
        let lines: Vec<_> = Lines::new(b"hello\r\nworld\nyo").collect();
        assert_eq!(lines, vec![&b"hello"[..], &b"world"[..], &b"yo"[..]]);
    }

    #[test]
    fn lines_trailing_newline() {
        let lines: Vec<_> = Lines::new(b"hello\n").collect();
        assert_eq!(lines, vec![&b"hello"[..], &b""[..]]);
    }

    prop_compose! {
        fn arb_module_record()(
            os in "Linux|mac|windows",
            cpu in "x86(_64)?|ppc(_64)?|unknown",
            id in "[a-fA-F0-9]{32,40}",
            name in "[^\r\n ][^\r\n]{0,40}",
        ) -> String {
            format!("MODULE {} {} {} {}", os, cpu, id, name)
        }
    }

    prop_compose! {
        fn arb_file_record()(
            id in any::<u32>(),
            name in "[^\r\n ][^\r\n]{0,40}",
        ) -> String {
            format!("FILE {} {}", id, name)
        }
    }

    prop_compose! {
        fn arb_func_record()(
            multiple in "(m )?",
            address in any::<u64>(),
            size in any::<u64>(),
            parameter_size in any::<u64>(),
            name in "[^\r\n ][^\r\n]{0,40}",
        ) -> String {
            format!("FUNC {}{:x} {:x} {:x} {}", multiple, address, size, parameter_size, name)
        }
    }

    prop_compose! {
        fn arb_line_record()(
            address in any::<u64>(),
            size in any::<u64>(),
            line in any::<i32>(),
            file_id in any::<u32>(),
        ) -> String {
            format!("{:x} {:x} {} {}", address, size, line, file_id)
        }
    }

    prop_compose! {
        fn arb_public_record()(
            multiple in "(m )?",
            address in any::<u64>(),
            parameter_size in any::<u64>(),
            name in "[^\r\n ][^\r\n]{0,40}",
        ) -> String {
            format!("PUBLIC {}{:x} {:x} {}", multiple, address, parameter_size, name)
        }
    }

    prop_compose! {
        fn arb_inline_record()(
            depth in 0u32..10,
            call_line in any::<u32>(),
            call_file in any::<u32>(),
            origin_id in any::<u32>(),
            ranges in prop::collection::vec((any::<u64>(), any::<u64>()), 1..4),
        ) -> String {
            let mut record = format!("INLINE {} {} {} {}", depth, call_line, call_file, origin_id);
            for (addr, size) in ranges {
                record.push_str(&format!(" {:x} {:x}", addr, size));
            }
            record
        }
    }

    proptest! {
        #[test]
        fn proptest_module_record(record in arb_module_record()) {
            module_record(&record).unwrap();
        }

        #[test]
        fn proptest_file_record(record in arb_file_record()) {
            file_record(&record).unwrap();
        }

        #[test]
        fn proptest_func_record(record in arb_func_record()) {
            func_record(&record).unwrap();
        }

        #[test]
        fn proptest_line_record(record in arb_line_record()) {
            line_record(&record).unwrap();
        }

        #[test]
        fn proptest_public_record(record in arb_public_record()) {
            public_record(&record).unwrap();
        }

        #[test]
        fn proptest_inline_record(record in arb_inline_record()) {
            inline_record(&record).unwrap();
        }
    }
}
