//! Dynamic symbol hash tables (`.gnu.hash` and `.hash`).
//!
//! Both tables are parsed out of the section bytes into owned arrays, so a
//! lookup never touches raw pointers. Names are compared through a caller
//! supplied predicate, which keeps the tables independent of how the symbol
//! and string tables are stored.

mod gnu;
mod sysv;

pub use gnu::{GnuHashTable, gnu_hash};
pub use sysv::{SysvHashTable, sysv_hash};

pub(crate) trait DynHashTable {
    fn count_syms(&self) -> usize;
    fn lookup(&self, name: &str, matches: &dyn Fn(usize) -> bool) -> Option<usize>;
}

/// A parsed dynamic symbol hash table.
pub enum HashTable {
    /// .gnu.hash
    Gnu(GnuHashTable),
    /// .hash
    Sysv(SysvHashTable),
}

impl HashTable {
    /// Number of entries in the symbol table this hash table covers.
    #[inline]
    pub fn count_syms(&self) -> usize {
        match self {
            HashTable::Gnu(hashtab) => hashtab.count_syms(),
            HashTable::Sysv(hashtab) => hashtab.count_syms(),
        }
    }

    /// Returns the symbol table index of `name`.
    ///
    /// `matches` is called with each candidate index whose hash agrees and
    /// must report whether that entry really is the wanted symbol.
    pub fn lookup(&self, name: &str, matches: &dyn Fn(usize) -> bool) -> Option<usize> {
        match self {
            HashTable::Gnu(hashtab) => hashtab.lookup(name, matches),
            HashTable::Sysv(hashtab) => hashtab.lookup(name, matches),
        }
    }
}

#[inline]
fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

#[inline]
fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw = bytes.get(offset..offset + 8)?;
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}

fn read_u32_array(bytes: &[u8], offset: usize, count: usize) -> Option<Vec<u32>> {
    (0..count).map(|i| read_u32(bytes, offset + i * 4)).collect()
}
