//! Traditional SYSV ELF hash table (`.hash`).

use super::{DynHashTable, read_u32, read_u32_array};
use crate::{Result, error::parse_elf_error};

/// The classic ELF hash function.
#[inline]
pub fn sysv_hash(name: &[u8]) -> u32 {
    let mut hash = 0u32;
    for byte in name {
        hash = (hash << 4).wrapping_add(u32::from(*byte));
        let g = hash & 0xf000_0000;
        if g != 0 {
            hash ^= g >> 24;
        }
        hash &= !g;
    }
    hash
}

/// `.hash` bucket and chain arrays.
#[derive(Debug)]
pub struct SysvHashTable {
    buckets: Vec<u32>,
    chains: Vec<u32>,
}

impl SysvHashTable {
    pub fn parse(bytes: &[u8]) -> Result<SysvHashTable> {
        let truncated = || parse_elf_error(".hash is truncated");
        let nbucket = read_u32(bytes, 0).ok_or_else(truncated)? as usize;
        let nchain = read_u32(bytes, 4).ok_or_else(truncated)? as usize;
        if nbucket == 0 {
            return Err(parse_elf_error(".hash has no buckets"));
        }
        let buckets = read_u32_array(bytes, 8, nbucket).ok_or_else(truncated)?;
        let chains = read_u32_array(bytes, 8 + nbucket * 4, nchain).ok_or_else(truncated)?;
        Ok(SysvHashTable { buckets, chains })
    }
}

impl DynHashTable for SysvHashTable {
    #[inline]
    fn count_syms(&self) -> usize {
        self.chains.len()
    }

    fn lookup(&self, name: &str, matches: &dyn Fn(usize) -> bool) -> Option<usize> {
        let hash = sysv_hash(name.as_bytes());
        let mut idx = self.buckets[hash as usize % self.buckets.len()] as usize;
        // A corrupt chain could loop forever.
        for _ in 0..self.chains.len() {
            if idx == 0 {
                return None;
            }
            if matches(idx) {
                return Some(idx);
            }
            idx = *self.chains.get(idx)? as usize;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_reference_values() {
        assert_eq!(sysv_hash(b""), 0);
        assert_eq!(sysv_hash(b"a"), 0x61);
        assert_eq!(sysv_hash(b"printf"), 0x77905a6);
        assert_eq!(sysv_hash(b"__libc_dlopen_mode"), 0x5493c45);
    }

    #[test]
    fn lookup_follows_chains() {
        // Two buckets, symbols 1..=3. Bucket assignment follows the hash.
        let names = ["", "dlopen", "dlsym", "dlerror"];
        let mut buckets = [0u32; 2];
        let mut chains = [0u32; 4];
        for (idx, name) in names.iter().enumerate().skip(1) {
            let b = sysv_hash(name.as_bytes()) as usize % 2;
            chains[idx] = buckets[b];
            buckets[b] = idx as u32;
        }
        let mut bytes = Vec::new();
        for word in [2u32, 4].iter().chain(buckets.iter()).chain(chains.iter()) {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let table = SysvHashTable::parse(&bytes).unwrap();
        assert_eq!(table.count_syms(), 4);
        for (idx, name) in names.iter().enumerate().skip(1) {
            assert_eq!(table.lookup(name, &|i| names[i] == *name), Some(idx));
        }
        assert_eq!(table.lookup("printf", &|i| names[i] == "printf"), None);
    }
}
