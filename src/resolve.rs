//! Resolving symbol addresses inside another process.
//!
//! The debuggee is never asked: each mapped module's file is read from
//! storage, the symbol is found in its `.dynsym`, and the link-time address
//! is shifted by the module's load bias taken from `/proc/<pid>/maps`.

use crate::{
    Result,
    elf::{ElfImage, SymbolKind},
    error::symbol_error,
    maps::{LoadedModule, ProcessMaps},
};
use hashbrown::HashMap;
use libc::pid_t;
use serde::Serialize;
use std::path::PathBuf;

/// A symbol located in the address space of a debuggee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RemoteSymbol {
    pub name: String,
    pub addr: u64,
    /// `st_size`, 0 when unknown.
    pub size: u64,
    /// Path of the module defining the symbol, as the debuggee sees it.
    pub module: String,
    pub kind: SymbolKind,
}

/// Resolves symbols of one process, caching parsed module files.
pub struct SymbolResolver {
    pid: pid_t,
    maps: ProcessMaps,
    images: HashMap<String, ElfImage>,
}

impl SymbolResolver {
    /// Snapshots the memory maps of `pid`.
    pub fn new(pid: pid_t) -> Result<SymbolResolver> {
        Ok(Self::from_maps(pid, ProcessMaps::read(pid)?))
    }

    pub fn from_maps(pid: pid_t, maps: ProcessMaps) -> SymbolResolver {
        SymbolResolver {
            pid,
            maps,
            images: HashMap::new(),
        }
    }

    #[inline]
    pub fn pid(&self) -> pid_t {
        self.pid
    }

    #[inline]
    pub fn maps(&self) -> &ProcessMaps {
        &self.maps
    }

    /// Re-reads the memory maps, e.g. after the debuggee loaded a library.
    pub fn refresh(&mut self) -> Result<()> {
        self.maps = ProcessMaps::read(self.pid)?;
        Ok(())
    }

    /// Where the tool can read a file the debuggee has mapped. Going through
    /// the debuggee's root keeps this right across mount namespaces.
    fn host_path(&self, path: &str) -> PathBuf {
        let via_root = PathBuf::from(format!("/proc/{}/root{}", self.pid, path));
        if via_root.exists() {
            via_root
        } else {
            PathBuf::from(path)
        }
    }

    fn image(&mut self, module: &LoadedModule) -> Result<&ElfImage> {
        if !self.images.contains_key(&module.path) {
            let image = ElfImage::open(self.host_path(&module.path))?;
            self.images.insert(module.path.clone(), image);
        }
        Ok(&self.images[&module.path])
    }

    fn resolve_in_module(
        &mut self,
        module: &LoadedModule,
        symbol: &str,
    ) -> Result<Option<RemoteSymbol>> {
        // Whatever now sits at the path is not what the process mapped.
        if module.deleted {
            log::warn!(
                "{} is mapped by process {} but was deleted from disk",
                module.path,
                self.pid
            );
            return Err(symbol_error(format!(
                "cannot resolve {symbol}: {} was deleted after being mapped",
                module.path
            )));
        }
        let image = self.image(module)?;
        let Some(sym) = image.lookup(symbol)? else {
            return Ok(None);
        };
        let bias = if image.is_dyn() {
            module.base.wrapping_sub(image.load_vaddr())
        } else {
            0
        };
        let addr = bias.wrapping_add(sym.value);
        if sym.kind == SymbolKind::IndirectFunction {
            log::warn!(
                "{symbol} in {} is an IFUNC, {addr:#x} is its resolver",
                module.path
            );
        }
        log::debug!(
            "{symbol} = {addr:#x} ({} base {:#x} + st_value {:#x})",
            module.path,
            module.base,
            sym.value
        );
        Ok(Some(RemoteSymbol {
            name: sym.name,
            addr,
            size: sym.size,
            module: module.path.clone(),
            kind: sym.kind,
        }))
    }

    /// Resolves `symbol` in the module matching `module_name`
    /// (see [`LoadedModule::matches`]).
    pub fn resolve_in(&mut self, module_name: &str, symbol: &str) -> Result<RemoteSymbol> {
        let module = self.maps.find_module(module_name).ok_or_else(|| {
            symbol_error(format!(
                "no module matching '{module_name}' is mapped in process {}",
                self.pid
            ))
        })?;
        self.resolve_in_module(&module, symbol)?
            .ok_or_else(|| symbol_error(format!("{symbol} not found in {}", module.path)))
    }

    /// Like [`resolve_in`](Self::resolve_in), but a missing module or symbol
    /// is `Ok(None)`.
    pub fn try_resolve_in(&mut self, module_name: &str, symbol: &str) -> Result<Option<RemoteSymbol>> {
        match self.maps.find_module(module_name) {
            Some(module) => self.resolve_in_module(&module, symbol),
            None => Ok(None),
        }
    }

    /// Resolves `symbol` in the first executable module defining it, in
    /// address order (the main executable usually comes first).
    pub fn resolve_any(&mut self, symbol: &str) -> Result<RemoteSymbol> {
        for module in self.maps.modules().into_iter().filter(|m| m.executable) {
            match self.resolve_in_module(&module, symbol) {
                Ok(Some(sym)) => return Ok(sym),
                Ok(None) => {}
                Err(e) => log::debug!("skipping {}: {e}", module.path),
            }
        }
        Err(symbol_error(format!(
            "{symbol} not found in any module of process {}",
            self.pid
        )))
    }
}
