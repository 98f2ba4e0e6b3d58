use super::{DynHashTable, read_u32, read_u32_array, read_u64};
use crate::{Result, error::parse_elf_error};

const HEADER_SIZE: usize = 16;
const BLOOM_WORD_BITS: u32 = u64::BITS;

/// The hash function used by `.gnu.hash` (DJB2).
#[inline]
pub fn gnu_hash(name: &[u8]) -> u32 {
    let mut hash = 5381u32;
    for byte in name {
        hash = hash.wrapping_mul(33).wrapping_add(u32::from(*byte));
    }
    hash
}

/// `.gnu.hash` of an ELF64 object.
#[derive(Debug)]
pub struct GnuHashTable {
    symbias: u32,
    nshift: u32,
    blooms: Vec<u64>,
    buckets: Vec<u32>,
    chains: Vec<u32>,
}

impl GnuHashTable {
    pub fn parse(bytes: &[u8]) -> Result<GnuHashTable> {
        let truncated = || parse_elf_error(".gnu.hash is truncated");
        let nbucket = read_u32(bytes, 0).ok_or_else(truncated)? as usize;
        let symbias = read_u32(bytes, 4).ok_or_else(truncated)?;
        let nbloom = read_u32(bytes, 8).ok_or_else(truncated)? as usize;
        let nshift = read_u32(bytes, 12).ok_or_else(truncated)?;
        if nbucket == 0 || nbloom == 0 {
            return Err(parse_elf_error(".gnu.hash has no buckets or bloom words"));
        }

        let bloom_start = HEADER_SIZE;
        let bucket_start = bloom_start + nbloom * 8;
        let chain_start = bucket_start + nbucket * 4;
        if chain_start > bytes.len() {
            return Err(truncated());
        }
        let blooms = (0..nbloom)
            .map(|i| read_u64(bytes, bloom_start + i * 8))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(truncated)?;
        let buckets = read_u32_array(bytes, bucket_start, nbucket).ok_or_else(truncated)?;
        let chains = read_u32_array(bytes, chain_start, (bytes.len() - chain_start) / 4)
            .ok_or_else(truncated)?;
        Ok(GnuHashTable {
            symbias,
            nshift,
            blooms,
            buckets,
            chains,
        })
    }

    #[inline]
    fn may_contain(&self, hash: u32) -> bool {
        let word = self.blooms[(hash / BLOOM_WORD_BITS) as usize % self.blooms.len()];
        let mask = (1u64 << (hash % BLOOM_WORD_BITS))
            | (1u64 << ((hash >> self.nshift) % BLOOM_WORD_BITS));
        word & mask == mask
    }
}

impl DynHashTable for GnuHashTable {
    fn count_syms(&self) -> usize {
        let mut nsym = self.buckets.iter().copied().max().unwrap_or(0) as usize;
        if nsym < self.symbias as usize {
            return self.symbias as usize;
        }
        while let Some(chain) = self.chains.get(nsym - self.symbias as usize) {
            if chain & 1 != 0 {
                break;
            }
            nsym += 1;
        }
        nsym + 1
    }

    fn lookup(&self, name: &str, matches: &dyn Fn(usize) -> bool) -> Option<usize> {
        let hash = gnu_hash(name.as_bytes());
        if !self.may_contain(hash) {
            return None;
        }
        let mut dynsym_idx = self.buckets[hash as usize % self.buckets.len()] as usize;
        if dynsym_idx == 0 || dynsym_idx < self.symbias as usize {
            return None;
        }
        loop {
            let chain_hash = *self.chains.get(dynsym_idx - self.symbias as usize)?;
            if hash | 1 == chain_hash | 1 && matches(dynsym_idx) {
                return Some(dynsym_idx);
            }
            if chain_hash & 1 != 0 {
                return None;
            }
            dynsym_idx += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a single-bucket table for `names`, which occupy symbol
    /// indices 1.. (index 0 is the null symbol).
    pub(crate) fn build_table(names: &[&str]) -> Vec<u8> {
        let nshift = 6u32;
        let mut bloom = 0u64;
        let mut chains = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let h = gnu_hash(name.as_bytes());
            bloom |= 1u64 << (h % 64);
            bloom |= 1u64 << ((h >> nshift) % 64);
            let last = i + 1 == names.len();
            chains.push(if last { h | 1 } else { h & !1 });
        }
        let mut bytes = Vec::new();
        for word in [1u32, 1, 1, nshift] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.extend_from_slice(&bloom.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        for chain in chains {
            bytes.extend_from_slice(&chain.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn hash_matches_reference_values() {
        assert_eq!(gnu_hash(b""), 0x1505);
        assert_eq!(gnu_hash(b"a"), 0x2b606);
        assert_eq!(gnu_hash(b"printf"), 0x156b2bb8);
        assert_eq!(gnu_hash(b"dlopen"), 0xf9040207);
    }

    #[test]
    fn lookup_walks_chain() {
        let names = ["dlopen", "dlsym", "dlerror"];
        let table = GnuHashTable::parse(&build_table(&names)).unwrap();
        let matches = |wanted: &'static str| move |idx: usize| names.get(idx - 1) == Some(&wanted);
        assert_eq!(table.lookup("dlopen", &matches("dlopen")), Some(1));
        assert_eq!(table.lookup("dlerror", &matches("dlerror")), Some(3));
        assert_eq!(table.lookup("printf", &matches("printf")), None);
        assert_eq!(table.count_syms(), 4);
    }

    #[test]
    fn truncated_table_is_rejected() {
        let bytes = build_table(&["dlopen"]);
        assert!(GnuHashTable::parse(&bytes[..20]).is_err());
        assert!(GnuHashTable::parse(&[0u8; 16]).is_err());
    }
}
