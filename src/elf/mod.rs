//! ELF images on disk and their dynamic symbols.
//!
//! Only what is needed to locate exported symbols is kept: the program
//! headers (for the load bias), `.dynsym`/`.dynstr` and whichever hash table
//! the object carries.

mod hash;
mod symbol;

pub use hash::{GnuHashTable, HashTable, SysvHashTable, gnu_hash, sysv_hash};
pub use symbol::{ElfSymbolInfo, SymbolKind};

use crate::{Result, arch::EM_ARCH, error::parse_elf_error};
use elf::{
    ElfBytes,
    abi::{ET_DYN, ET_EXEC, PT_LOAD},
    endian::AnyEndian,
    file::Class,
    string_table::StringTable,
    symbol::SymbolTable,
};
use std::{
    fmt::Debug,
    fs,
    path::{Path, PathBuf},
};
use symbol::is_resolvable;

const VERSYM_HIDDEN: u16 = 0x8000;

/// A shared object or executable read from storage.
pub struct ElfImage {
    path: PathBuf,
    data: Vec<u8>,
    e_type: u16,
    load_vaddr: u64,
    hashtab: Option<HashTable>,
    /// `.gnu.version`, one entry per `.dynsym` symbol.
    versym: Option<Vec<u16>>,
}

impl Debug for ElfImage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ElfImage")
            .field("path", &self.path)
            .field("e_type", &self.e_type)
            .field("load_vaddr", &format_args!("{:#x}", self.load_vaddr))
            .field(
                "hashtab",
                &match &self.hashtab {
                    Some(HashTable::Gnu(_)) => ".gnu.hash",
                    Some(HashTable::Sysv(_)) => ".hash",
                    None => "none",
                },
            )
            .finish()
    }
}

impl ElfImage {
    /// Reads and validates the ELF file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<ElfImage> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|e| crate::error::io_error(format!("{}: {e}", path.display())))?;
        Self::from_bytes(path, data)
    }

    /// Parses an ELF file already in memory. `path` is only used for messages.
    pub fn from_bytes(path: impl Into<PathBuf>, data: Vec<u8>) -> Result<ElfImage> {
        let path = path.into();
        let (e_type, load_vaddr, hashtab, versym) = {
            let file = ElfBytes::<AnyEndian>::minimal_parse(&data)?;
            let ehdr = &file.ehdr;
            if ehdr.class != Class::ELF64 {
                return Err(parse_elf_error(format!(
                    "{}: only ELF64 objects are supported",
                    path.display()
                )));
            }
            if !matches!(ehdr.endianness, AnyEndian::Little) {
                return Err(parse_elf_error(format!(
                    "{}: only little-endian objects are supported",
                    path.display()
                )));
            }
            if ehdr.e_machine != EM_ARCH {
                return Err(parse_elf_error(format!(
                    "{}: machine {} does not match the host ({EM_ARCH})",
                    path.display(),
                    ehdr.e_machine
                )));
            }
            if ehdr.e_type != ET_DYN && ehdr.e_type != ET_EXEC {
                return Err(parse_elf_error(format!(
                    "{}: not an executable or shared object (e_type {})",
                    path.display(),
                    ehdr.e_type
                )));
            }
            let load_vaddr = first_load_vaddr(&file)
                .ok_or_else(|| parse_elf_error(format!("{}: no PT_LOAD segment", path.display())))?;
            (
                ehdr.e_type,
                load_vaddr,
                parse_hashtab(&file)?,
                parse_versym(&file)?,
            )
        };
        log::debug!(
            "parsed {}: load vaddr {:#x}, hash table {}",
            path.display(),
            load_vaddr,
            hashtab.is_some()
        );
        Ok(ElfImage {
            path,
            data,
            e_type,
            load_vaddr,
            hashtab,
            versym,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Position independent (`ET_DYN`), i.e. loaded at a non-zero bias.
    #[inline]
    pub fn is_dyn(&self) -> bool {
        self.e_type == ET_DYN
    }

    /// Virtual address that corresponds to file offset 0.
    ///
    /// The mapping of file offset 0 in a process starts at
    /// `load bias + load_vaddr`.
    #[inline]
    pub fn load_vaddr(&self) -> u64 {
        self.load_vaddr
    }

    #[inline]
    pub fn hashtab(&self) -> Option<&HashTable> {
        self.hashtab.as_ref()
    }

    fn dynamic_symbols(&self) -> Result<Option<(SymbolTable<'_, AnyEndian>, StringTable<'_>)>> {
        let file = ElfBytes::<AnyEndian>::minimal_parse(&self.data)?;
        Ok(file.dynamic_symbol_table()?)
    }

    /// Looks up an exported symbol by name, using the hash table when the
    /// object has one.
    pub fn lookup(&self, name: &str) -> Result<Option<ElfSymbolInfo>> {
        let Some(hashtab) = &self.hashtab else {
            return self.lookup_linear(name);
        };
        let Some((symtab, strtab)) = self.dynamic_symbols()? else {
            return Ok(None);
        };
        let matches = |idx: usize| {
            symtab.get(idx).is_ok_and(|sym| {
                is_resolvable(&sym)
                    && self.is_default_version(idx)
                    && strtab.get(sym.st_name as usize).is_ok_and(|n| n == name)
            })
        };
        match hashtab.lookup(name, &matches) {
            Some(idx) => Ok(Some(symbol_info(name, &symtab.get(idx)?))),
            None => Ok(None),
        }
    }

    /// Looks up an exported symbol by scanning all of `.dynsym`.
    pub fn lookup_linear(&self, name: &str) -> Result<Option<ElfSymbolInfo>> {
        let Some((symtab, strtab)) = self.dynamic_symbols()? else {
            return Ok(None);
        };
        for (idx, sym) in symtab.iter().enumerate() {
            if !is_resolvable(&sym) || !self.is_default_version(idx) {
                continue;
            }
            if strtab.get(sym.st_name as usize)? == name {
                return Ok(Some(symbol_info(name, &sym)));
            }
        }
        Ok(None)
    }

    /// Whether symbol `idx` is what an unversioned `dlsym` would bind to.
    /// `name@VER` compat definitions carry the hidden bit and are skipped
    /// in favour of the `name@@VER` default.
    #[inline]
    fn is_default_version(&self, idx: usize) -> bool {
        self.versym
            .as_ref()
            .and_then(|versym| versym.get(idx))
            .is_none_or(|&ver| ver & VERSYM_HIDDEN == 0)
    }

    /// Number of `.dynsym` entries, including the null symbol.
    pub fn count_syms(&self) -> Result<usize> {
        if let Some(hashtab) = &self.hashtab {
            return Ok(hashtab.count_syms());
        }
        Ok(self.dynamic_symbols()?.map_or(0, |(symtab, _)| symtab.len()))
    }
}

fn symbol_info(name: &str, sym: &elf::symbol::Symbol) -> ElfSymbolInfo {
    ElfSymbolInfo {
        name: name.to_string(),
        value: sym.st_value,
        size: sym.st_size,
        kind: SymbolKind::of(sym).unwrap_or(SymbolKind::Untyped),
    }
}

fn first_load_vaddr(file: &ElfBytes<AnyEndian>) -> Option<u64> {
    file.segments()?
        .iter()
        .filter(|phdr| phdr.p_type == PT_LOAD)
        .min_by_key(|phdr| phdr.p_offset)
        .map(|phdr| phdr.p_vaddr.saturating_sub(phdr.p_offset))
}

fn parse_versym(file: &ElfBytes<AnyEndian>) -> Result<Option<Vec<u16>>> {
    let Some(shdr) = file.section_header_by_name(".gnu.version")? else {
        return Ok(None);
    };
    let (bytes, _) = file.section_data(&shdr)?;
    Ok(Some(
        bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect(),
    ))
}

fn parse_hashtab(file: &ElfBytes<AnyEndian>) -> Result<Option<HashTable>> {
    if let Some(shdr) = file.section_header_by_name(".gnu.hash")? {
        let (bytes, _) = file.section_data(&shdr)?;
        return Ok(Some(HashTable::Gnu(GnuHashTable::parse(bytes)?)));
    }
    if let Some(shdr) = file.section_header_by_name(".hash")? {
        let (bytes, _) = file.section_data(&shdr)?;
        return Ok(Some(HashTable::Sysv(SysvHashTable::parse(bytes)?)));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_elf_data() {
        let err = ElfImage::from_bytes("/tmp/not-elf", b"#!/bin/sh\necho hi\n".to_vec()).unwrap_err();
        assert!(matches!(err, crate::Error::ParseElf { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ElfImage::open("/this_location_is_definitely_non existent:^~").unwrap_err();
        assert!(matches!(err, crate::Error::Io { .. }));
    }

    #[test]
    fn parses_own_executable() {
        let exe = std::env::current_exe().unwrap();
        let image = ElfImage::open(&exe).unwrap();
        assert_eq!(image.path(), exe.as_path());
        assert_eq!(image.lookup("definitely_not_an_exported_symbol").unwrap(), None);
    }
}
