//! Binary-searched views over serialized map regions.
//!
//! Each container attaches to one self-contained byte region produced by
//! the [`writer`](crate::writer): a 4-byte count, fixed-stride entry
//! descriptors sorted by key, and a value payload addressed by offsets
//! relative to the region base. Lookups are `O(log n)` with no copying;
//! values are returned as byte slices for the caller to decode.

use watto::Pod;

use crate::raw::{Count, MapEntry, RangeEntry, ScalarKey};
use crate::types::MemAddr;

/// Reads a NUL-terminated UTF-8 string at `offset` inside `data`.
pub(crate) fn read_cstr(data: &[u8], offset: usize) -> Option<&str> {
    let bytes = data.get(offset..)?;
    let end = bytes.iter().position(|b| *b == 0)?;
    std::str::from_utf8(&bytes[..end]).ok()
}

/// A sorted key → value view with exact and lower-bound lookups.
#[derive(Clone, Copy)]
pub(crate) struct StaticMap<'d, K> {
    data: &'d [u8],
    entries: &'d [MapEntry<K>],
}

impl<'d, K: ScalarKey> StaticMap<'d, K> {
    pub fn parse(data: &'d [u8]) -> Option<Self> {
        let (count, rest) = Count::ref_from_prefix(data)?;
        let (entries, _) = MapEntry::<K>::slice_from_prefix(rest, count.value as usize)?;
        Some(StaticMap { data, entries })
    }

    fn value(&self, entry: &MapEntry<K>) -> Option<&'d [u8]> {
        self.data.get(entry.value_offset as usize..)
    }

    /// Returns the value stored under exactly `key`.
    pub fn find(&self, key: K) -> Option<&'d [u8]> {
        let index = self
            .entries
            .binary_search_by_key(&key, |entry| entry.key)
            .ok()?;
        self.value(&self.entries[index])
    }

    /// Returns the index of the first entry whose key is not below `key`.
    pub fn lower_bound(&self, key: K) -> usize {
        self.entries.partition_point(|entry| {
            let entry_key = entry.key;
            entry_key < key
        })
    }

    /// Returns the entry at `index` in key order.
    pub fn get(&self, index: usize) -> Option<(K, &'d [u8])> {
        let entry = self.entries.get(index)?;
        Some((entry.key, self.value(entry)?))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &'d [u8])> + '_ {
        self.entries
            .iter()
            .filter_map(move |entry| Some((entry.key, self.value(entry)?)))
    }
}

/// A view over disjoint inclusive ranges sorted by end address.
#[derive(Clone, Copy)]
pub(crate) struct StaticRangeMap<'d> {
    data: &'d [u8],
    entries: &'d [RangeEntry],
}

impl<'d> StaticRangeMap<'d> {
    pub fn parse(data: &'d [u8]) -> Option<Self> {
        let (count, rest) = Count::ref_from_prefix(data)?;
        let (entries, _) = RangeEntry::slice_from_prefix(rest, count.value as usize)?;
        Some(StaticRangeMap { data, entries })
    }

    fn value(&self, entry: &RangeEntry) -> Option<&'d [u8]> {
        self.data.get(entry.value_offset as usize..)
    }

    /// Returns the value whose range contains `addr`, with its range.
    pub fn retrieve_range(&self, addr: MemAddr) -> Option<(&'d [u8], MemAddr, MemAddr)> {
        let index = self.entries.partition_point(|entry| entry.end < addr);
        let entry = self.entries.get(index)?;
        if entry.start > addr {
            return None;
        }
        Some((self.value(entry)?, entry.start, entry.end))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the containing range, or else the range with the greatest
    /// start address below `addr`.
    pub fn retrieve_nearest_range(&self, addr: MemAddr) -> Option<(&'d [u8], MemAddr, MemAddr)> {
        if let Some(found) = self.retrieve_range(addr) {
            return Some(found);
        }
        let index = self.entries.partition_point(|entry| entry.end < addr);
        let entry = self.entries.get(index.checked_sub(1)?)?;
        Some((self.value(entry)?, entry.start, entry.end))
    }
}

/// A view over a forest of nested ranges.
///
/// The region is a range table whose values are nodes: a length-prefixed
/// entry followed by a nested table of the node's children.
#[derive(Clone, Copy)]
pub(crate) struct StaticContainedRangeMap<'d> {
    data: &'d [u8],
    entries: &'d [RangeEntry],
}

impl<'d> StaticContainedRangeMap<'d> {
    pub fn parse(data: &'d [u8]) -> Option<Self> {
        let (count, rest) = Count::ref_from_prefix(data)?;
        let (entries, _) = RangeEntry::slice_from_prefix(rest, count.value as usize)?;
        Some(StaticContainedRangeMap { data, entries })
    }

    /// Collects the entry at every nesting depth whose range contains
    /// `addr`, outermost first.
    pub fn retrieve_ranges(&self, addr: MemAddr, out: &mut Vec<&'d [u8]>) {
        let mut current = *self;
        loop {
            let index = current.entries.partition_point(|entry| entry.end < addr);
            let entry = match current.entries.get(index) {
                Some(entry) if entry.start <= addr => entry,
                _ => break,
            };
            let node = match current.data.get(entry.value_offset as usize..) {
                Some(node) => node,
                None => break,
            };

            let (len, rest) = match Count::ref_from_prefix(node) {
                Some(parsed) => parsed,
                None => break,
            };
            let entry_len = len.value as usize;
            if rest.len() < entry_len {
                break;
            }
            let (record, children) = rest.split_at(entry_len);
            if entry_len > 0 {
                out.push(record);
            }

            match Self::parse(children) {
                Some(child_map) => current = child_map,
                None => break,
            }
        }
    }

    /// Returns the innermost entry whose range contains `addr`.
    pub fn retrieve_range(&self, addr: MemAddr) -> Option<&'d [u8]> {
        let mut found = Vec::new();
        self.retrieve_ranges(addr, &mut found);
        found.pop()
    }
}

/// A start-address-keyed view without sizes; lookup finds the entry with
/// the greatest address at or below the query.
#[derive(Clone, Copy)]
pub(crate) struct StaticAddressMap<'d> {
    inner: StaticMap<'d, MemAddr>,
}

impl<'d> StaticAddressMap<'d> {
    pub fn parse(data: &'d [u8]) -> Option<Self> {
        Some(StaticAddressMap {
            inner: StaticMap::parse(data)?,
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns the entry with the greatest address at or below `addr`.
    pub fn retrieve(&self, addr: MemAddr) -> Option<(&'d [u8], MemAddr)> {
        let index = self
            .inner
            .entries
            .partition_point(|entry| entry.key <= addr)
            .checked_sub(1)?;
        let (key, value) = self.inner.get(index)?;
        Some((value, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a map region by hand: count, entries, payload.
    fn build_map_u64(entries: &[(u64, &[u8])]) -> Vec<u8> {
        let header = 4 + entries.len() * std::mem::size_of::<MapEntry<u64>>();
        let mut out = (entries.len() as u32).to_ne_bytes().to_vec();
        let mut offset = header;
        for (key, value) in entries {
            out.extend_from_slice(&key.to_ne_bytes());
            out.extend_from_slice(&(offset as u32).to_ne_bytes());
            offset += value.len();
        }
        for (_, value) in entries {
            out.extend_from_slice(value);
        }
        out
    }

    fn build_range_map(entries: &[(u64, u64, &[u8])]) -> Vec<u8> {
        let header = 4 + entries.len() * std::mem::size_of::<RangeEntry>();
        let mut out = (entries.len() as u32).to_ne_bytes().to_vec();
        let mut offset = header;
        for (start, end, value) in entries {
            out.extend_from_slice(&end.to_ne_bytes());
            out.extend_from_slice(&start.to_ne_bytes());
            out.extend_from_slice(&(offset as u32).to_ne_bytes());
            offset += value.len();
        }
        for (_, _, value) in entries {
            out.extend_from_slice(value);
        }
        out
    }

    #[test]
    fn static_map_find_and_bounds() {
        let region = build_map_u64(&[(10, b"a\0"), (20, b"b\0"), (30, b"c\0")]);
        let map = StaticMap::<u64>::parse(&region).unwrap();

        assert_eq!(map.len(), 3);
        assert_eq!(read_cstr(map.find(20).unwrap(), 0), Some("b"));
        assert!(map.find(25).is_none());

        assert_eq!(map.lower_bound(10), 0);
        assert_eq!(map.lower_bound(11), 1);
        assert_eq!(map.lower_bound(31), 3);

        let keys: Vec<u64> = map.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec![10, 20, 30]);
    }

    #[test]
    fn static_map_rejects_truncated_region() {
        let mut region = build_map_u64(&[(10, b"a\0")]);
        region.truncate(8);
        assert!(StaticMap::<u64>::parse(&region).is_none());
    }

    #[test]
    fn static_range_map_boundaries() {
        let region = build_range_map(&[(0x100, 0x11f, b"f\0"), (0x200, 0x20f, b"g\0")]);
        let map = StaticRangeMap::parse(&region).unwrap();

        assert!(map.retrieve_range(0xff).is_none());
        let (value, start, end) = map.retrieve_range(0x100).unwrap();
        assert_eq!((read_cstr(value, 0), start, end), (Some("f"), 0x100, 0x11f));
        assert!(map.retrieve_range(0x11f).is_some());
        assert!(map.retrieve_range(0x120).is_none());
    }

    #[test]
    fn static_range_map_nearest() {
        let region = build_range_map(&[(0x100, 0x10f, b"f\0"), (0x200, 0x20f, b"g\0")]);
        let map = StaticRangeMap::parse(&region).unwrap();

        let (value, start, _) = map.retrieve_nearest_range(0x150).unwrap();
        assert_eq!((read_cstr(value, 0), start), (Some("f"), 0x100));
        assert!(map.retrieve_nearest_range(0xff).is_none());
        let (value, _, _) = map.retrieve_nearest_range(0x500).unwrap();
        assert_eq!(read_cstr(value, 0), Some("g"));
    }

    #[test]
    fn static_range_map_top_of_address_space() {
        let region = build_range_map(&[(u64::MAX - 0xff, u64::MAX, b"top\0")]);
        let map = StaticRangeMap::parse(&region).unwrap();

        let (value, _, end) = map.retrieve_range(u64::MAX).unwrap();
        assert_eq!((read_cstr(value, 0), end), (Some("top"), u64::MAX));
    }

    #[test]
    fn static_address_map_retrieve() {
        let region = build_map_u64(&[(0x100, b"a\0"), (0x200, b"b\0")]);
        let map = StaticAddressMap::parse(&region).unwrap();

        assert!(map.retrieve(0xff).is_none());
        assert_eq!(map.retrieve(0x100).map(|(_, addr)| addr), Some(0x100));
        assert_eq!(map.retrieve(0x1ff).map(|(_, addr)| addr), Some(0x100));
        assert_eq!(map.retrieve(0x250).map(|(_, addr)| addr), Some(0x200));
    }

    #[test]
    fn contained_map_walks_nested_nodes() {
        // Inner node: entry "inner" with no children.
        let mut inner_node = (5u32).to_ne_bytes().to_vec();
        inner_node.extend_from_slice(b"inner");
        inner_node.extend_from_slice(&build_range_map(&[]));

        // Outer node: entry "outer", one child covering [0x110, 0x117].
        let mut outer_node = (5u32).to_ne_bytes().to_vec();
        outer_node.extend_from_slice(b"outer");
        outer_node.extend_from_slice(&build_range_map(&[(0x110, 0x117, &inner_node)]));

        let region = build_range_map(&[(0x100, 0x13f, &outer_node)]);
        let map = StaticContainedRangeMap::parse(&region).unwrap();

        let mut found = Vec::new();
        map.retrieve_ranges(0x114, &mut found);
        assert_eq!(found, vec![&b"outer"[..], &b"inner"[..]]);

        let mut found = Vec::new();
        map.retrieve_ranges(0x130, &mut found);
        assert_eq!(found, vec![&b"outer"[..]]);

        assert_eq!(map.retrieve_range(0x114), Some(&b"inner"[..]));
        assert!(map.retrieve_range(0x90).is_none());
    }
}
