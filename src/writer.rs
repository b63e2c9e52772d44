//! Serialization of a parsed module into its frozen byte form.
//!
//! The output buffer starts with the corruption flag and the byte size
//! of each of the [`NUM_MAPS`] map regions, followed by the regions
//! themselves. Every region is self-contained; see
//! [`raw`](crate::raw) for the layout and
//! [`containers`](crate::containers) for the readers.

use std::collections::BTreeMap;
use std::mem;

use crate::error::{SymbolError, ValueKind};
use crate::maps::{ContainedNode, RangeMap};
use crate::module::{Function, Inline, InlineOrigin, LineInfo, ParsedModule, PublicSymbol};
use crate::raw::{
    self, Count, FrameInfoEntry, FuncEntry, InlineEntry, InlineRange, LineEntry, MapEntry,
    ModuleHeader, OriginEntry, PublicEntry, RangeEntry,
};
use crate::types::{MemAddr, WindowsFrameInfo};

/// Appends the raw bytes of a packed descriptor to `out`.
fn put<T>(out: &mut Vec<u8>, value: &T) {
    let pointer = (value as *const T).cast::<u8>();
    // SAFETY: pointer and length both derive from a live `&T`.
    let bytes = unsafe { std::slice::from_raw_parts(pointer, mem::size_of::<T>()) };
    out.extend_from_slice(bytes);
}

/// Appends a NUL-terminated string to `out`.
fn put_cstr(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(value.as_bytes());
    out.push(0);
}

fn offset_u32(offset: usize, kind: ValueKind) -> Result<u32, SymbolError> {
    u32::try_from(offset).map_err(|_| SymbolError::ValueTooLarge(kind))
}

/// Assembles a `StaticMap` region from key/value-bytes pairs.
///
/// `values` must be sorted by key, which the `BTreeMap`-backed callers
/// guarantee.
fn build_map<K: Copy>(values: &[(K, Vec<u8>)], kind: ValueKind) -> Result<Vec<u8>, SymbolError> {
    let header = mem::size_of::<Count>() + values.len() * mem::size_of::<MapEntry<K>>();
    let mut out = Vec::with_capacity(header);

    put(
        &mut out,
        &Count {
            value: offset_u32(values.len(), kind)?,
        },
    );

    let mut offset = header;
    for (key, value) in values {
        put(
            &mut out,
            &MapEntry {
                key: *key,
                value_offset: offset_u32(offset, kind)?,
            },
        );
        offset += value.len();
    }
    for (_, value) in values {
        out.extend_from_slice(value);
    }

    Ok(out)
}

/// Assembles a `StaticRangeMap` region from range/value-bytes triples.
///
/// `values` must be sorted by range end.
fn build_range_map(
    values: &[(MemAddr, MemAddr, Vec<u8>)],
    kind: ValueKind,
) -> Result<Vec<u8>, SymbolError> {
    let header = mem::size_of::<Count>() + values.len() * mem::size_of::<RangeEntry>();
    let mut out = Vec::with_capacity(header);

    put(
        &mut out,
        &Count {
            value: offset_u32(values.len(), kind)?,
        },
    );

    let mut offset = header;
    for (start, end, value) in values {
        put(
            &mut out,
            &RangeEntry {
                end: *end,
                start: *start,
                value_offset: offset_u32(offset, kind)?,
            },
        );
        offset += value.len();
    }
    for (_, _, value) in values {
        out.extend_from_slice(value);
    }

    Ok(out)
}

/// Assembles a `StaticContainedRangeMap` region. Each node is its
/// length-prefixed entry followed by the table of its children.
fn build_contained_map<V>(
    children: &BTreeMap<MemAddr, ContainedNode<V>>,
    encode: &impl Fn(&V) -> Result<Vec<u8>, SymbolError>,
    kind: ValueKind,
) -> Result<Vec<u8>, SymbolError> {
    let mut values = Vec::with_capacity(children.len());
    for (high, node) in children {
        let entry = encode(&node.value)?;

        let mut bytes = Vec::with_capacity(mem::size_of::<Count>() + entry.len());
        put(
            &mut bytes,
            &Count {
                value: offset_u32(entry.len(), kind)?,
            },
        );
        bytes.extend_from_slice(&entry);
        bytes.extend_from_slice(&build_contained_map(&node.children, encode, kind)?);

        values.push((node.base, *high, bytes));
    }

    build_range_map(&values, kind)
}

fn encode_line(line: &LineInfo) -> Vec<u8> {
    let mut out = Vec::with_capacity(mem::size_of::<LineEntry>());
    put(
        &mut out,
        &LineEntry {
            address: line.address,
            size: line.size,
            file_id: line.file_id,
            line: line.line,
        },
    );
    out
}

fn encode_inline(inline: &Inline) -> Result<Vec<u8>, SymbolError> {
    let mut out = Vec::new();
    put(
        &mut out,
        &InlineEntry {
            depth: inline.depth,
            call_line: inline.call_line,
            call_file: inline.call_file.map_or(-1, i64::from),
            origin_id: inline.origin_id,
            num_ranges: u32::try_from(inline.ranges.len())
                .map_err(|_| SymbolError::ValueTooLarge(ValueKind::Function))?,
        },
    );
    for (address, size) in &inline.ranges {
        put(
            &mut out,
            &InlineRange {
                address: *address,
                size: *size,
            },
        );
    }
    Ok(out)
}

fn encode_function(func: &Function) -> Result<Vec<u8>, SymbolError> {
    let mut out = Vec::new();
    put(
        &mut out,
        &FuncEntry {
            address: func.address,
            size: func.size,
            parameter_size: func.parameter_size,
            multiple: func.is_multiple.into(),
        },
    );
    put_cstr(&mut out, &func.name);

    let lines: Vec<(MemAddr, MemAddr, Vec<u8>)> = func
        .lines
        .iter()
        .map(|(base, high, line)| (base, high, encode_line(line)))
        .collect();
    let line_map = build_range_map(&lines, ValueKind::Function)?;
    put(
        &mut out,
        &Count {
            value: offset_u32(line_map.len(), ValueKind::Function)?,
        },
    );
    out.extend_from_slice(&line_map);

    let inline_map = build_contained_map(&func.inlines.children, &encode_inline, ValueKind::Function)?;
    put(
        &mut out,
        &Count {
            value: offset_u32(inline_map.len(), ValueKind::Function)?,
        },
    );
    out.extend_from_slice(&inline_map);

    Ok(out)
}

fn encode_public(public: &PublicSymbol) -> Vec<u8> {
    let mut out = Vec::new();
    put(
        &mut out,
        &PublicEntry {
            address: public.address,
            parameter_size: public.parameter_size,
            multiple: public.is_multiple.into(),
        },
    );
    put_cstr(&mut out, &public.name);
    out
}

fn encode_frame_info(info: &WindowsFrameInfo) -> Result<Vec<u8>, SymbolError> {
    let mut out = Vec::new();
    put(
        &mut out,
        &FrameInfoEntry {
            ty: info.ty.map_or(u32::MAX, |ty| ty as u32),
            valid: info.valid.bits(),
            prolog_size: info.prolog_size,
            epilog_size: info.epilog_size,
            parameter_size: info.parameter_size,
            saved_register_size: info.saved_register_size,
            local_size: info.local_size,
            max_stack_size: info.max_stack_size,
            allocates_base_pointer: info.allocates_base_pointer.into(),
        },
    );
    put_cstr(&mut out, info.program_string.as_deref().unwrap_or(""));
    Ok(out)
}

fn encode_origin(origin: &InlineOrigin) -> Vec<u8> {
    let mut out = Vec::new();
    put(
        &mut out,
        &OriginEntry {
            file_id: origin.file_id.map_or(-1, i64::from),
        },
    );
    put_cstr(&mut out, &origin.name);
    out
}

fn build_cfi_initial_map(rules: &RangeMap<String>) -> Result<Vec<u8>, SymbolError> {
    let values: Vec<(MemAddr, MemAddr, Vec<u8>)> = rules
        .iter()
        .map(|(base, high, rules)| {
            let mut bytes = Vec::with_capacity(rules.len() + 1);
            put_cstr(&mut bytes, rules);
            (base, high, bytes)
        })
        .collect();
    build_range_map(&values, ValueKind::CfiRules)
}

fn build_function_map(functions: &RangeMap<Function>) -> Result<Vec<u8>, SymbolError> {
    let mut values = Vec::new();
    for (base, high, func) in functions.iter() {
        values.push((base, high, encode_function(func)?));
    }
    build_range_map(&values, ValueKind::Function)
}

impl ParsedModule {
    /// Flattens this module into its serialized byte form.
    ///
    /// The output can be handed to
    /// [`FrozenModule::parse`](crate::FrozenModule::parse) or written to
    /// a file carrying the
    /// [`SERIALIZED_SYMBOL_EXTENSION`](crate::SERIALIZED_SYMBOL_EXTENSION)
    /// suffix.
    #[tracing::instrument(level = "trace", name = "ParsedModule::serialize", skip_all)]
    pub fn serialize(&self) -> Result<Vec<u8>, SymbolError> {
        let mut maps: Vec<Vec<u8>> = Vec::with_capacity(raw::NUM_MAPS);

        let files: Vec<(u32, Vec<u8>)> = self
            .files
            .iter()
            .map(|(id, name)| {
                let mut bytes = Vec::with_capacity(name.len() + 1);
                put_cstr(&mut bytes, name);
                (*id, bytes)
            })
            .collect();
        maps.push(build_map(&files, ValueKind::File)?);

        maps.push(build_function_map(&self.functions)?);

        let publics: Vec<(u64, Vec<u8>)> = self
            .public_symbols
            .iter()
            .map(|(address, public)| (address, encode_public(public)))
            .collect();
        maps.push(build_map(&publics, ValueKind::PublicSymbol)?);

        for slot in &self.windows_frame_info {
            maps.push(build_contained_map(
                &slot.children,
                &encode_frame_info,
                ValueKind::FrameInfo,
            )?);
        }

        maps.push(build_cfi_initial_map(&self.cfi_initial_rules)?);

        let deltas: Vec<(u64, Vec<u8>)> = self
            .cfi_delta_rules
            .iter()
            .map(|(address, rules)| {
                let mut bytes = Vec::with_capacity(rules.len() + 1);
                put_cstr(&mut bytes, rules);
                (*address, bytes)
            })
            .collect();
        maps.push(build_map(&deltas, ValueKind::CfiRules)?);

        let origins: Vec<(u32, Vec<u8>)> = self
            .inline_origins
            .iter()
            .map(|(id, origin)| (*id, encode_origin(origin)))
            .collect();
        maps.push(build_map(&origins, ValueKind::InlineOrigin)?);

        debug_assert_eq!(maps.len(), raw::NUM_MAPS);

        let mut map_sizes = [0u64; raw::NUM_MAPS];
        for (size, map) in map_sizes.iter_mut().zip(&maps) {
            *size = map.len() as u64;
        }

        let total: usize = maps.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(mem::size_of::<ModuleHeader>() + total);
        put(
            &mut out,
            &ModuleHeader {
                is_corrupt: self.corrupt.into(),
                map_sizes,
            },
        );
        for map in &maps {
            out.extend_from_slice(map);
        }

        Ok(out)
    }
}
