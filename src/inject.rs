//! Loading a library into a running process through its own dynamic
//! loader, then calling into it.
//!
//! The flow is the one a debugger user would type by hand: `dlopen` the
//! library, `dlsym` the function, call it with no arguments. A function that
//! cannot be found is reported as [`LoadOutcome::SymbolMissing`] rather than
//! an error, since the library did load.
//!
//! # Examples
//! ```no_run
//! use dlinject::{InjectOptions, Injector, LoadOutcome};
//!
//! let mut injector = Injector::attach(1234, InjectOptions::default()).unwrap();
//! match injector.load_and_call("/tmp/libprobe.so", "probe_init").unwrap() {
//!     LoadOutcome::Called { ret, .. } => println!("probe_init returned {ret}"),
//!     LoadOutcome::SymbolMissing { .. } => println!("function probe_init not found"),
//! }
//! injector.detach().unwrap();
//! ```

use crate::{
    Result,
    call::{CallOptions, RemoteCall},
    elf::SymbolKind,
    error::{config_error, dl_error, io_error, patch_error, symbol_error},
    patch::FunctionPatch,
    ptrace::Tracee,
    resolve::{RemoteSymbol, SymbolResolver},
};
use bitflags::bitflags;
use core::{fmt, str::FromStr};
use libc::pid_t;

bitflags! {
    /// The `mode` argument of `dlopen`, with glibc's values.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DlopenFlags: u32 {
        const LAZY = 0x0001;
        const NOW = 0x0002;
        const NOLOAD = 0x0004;
        const DEEPBIND = 0x0008;
        const GLOBAL = 0x0100;
        const NODELETE = 0x1000;
    }
}

impl Default for DlopenFlags {
    fn default() -> Self {
        DlopenFlags::LAZY
    }
}

impl FromStr for DlopenFlags {
    type Err = crate::Error;

    /// Parses a list such as `now,global` or `RTLD_LAZY|RTLD_NODELETE`.
    fn from_str(s: &str) -> Result<Self> {
        let mut flags = DlopenFlags::empty();
        for item in s.split([',', '|']).map(str::trim).filter(|s| !s.is_empty()) {
            let name = item.to_ascii_uppercase();
            let name = name.strip_prefix("RTLD_").unwrap_or(&name);
            let flag = DlopenFlags::from_name(name)
                .ok_or_else(|| config_error(format!("unknown dlopen flag '{item}'")))?;
            flags |= flag;
        }
        if !flags.intersects(DlopenFlags::LAZY | DlopenFlags::NOW) {
            flags |= DlopenFlags::LAZY;
        }
        Ok(flags)
    }
}

impl fmt::Display for DlopenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "RTLD_{name}")?;
            first = false;
        }
        if first {
            f.write_str("0")?;
        }
        Ok(())
    }
}

/// How libraries get loaded and calls get made.
#[derive(Clone, Copy, Debug)]
pub struct InjectOptions {
    pub flags: DlopenFlags,
    pub call: CallOptions,
    /// Longest `dlerror()` message read back.
    pub error_limit: usize,
}

impl Default for InjectOptions {
    fn default() -> Self {
        InjectOptions {
            flags: DlopenFlags::default(),
            call: CallOptions::default(),
            error_limit: 4096,
        }
    }
}

/// Modules searched for the public `dl*` API, in order.
const DL_MODULES: [&str; 3] = ["libc", "libdl", "ld-musl"];

/// The loader entry points of a debuggee.
#[derive(Clone, Debug)]
pub struct DlFunctions {
    pub dlopen: RemoteSymbol,
    pub dlsym: RemoteSymbol,
    /// Missing when only glibc's private `__libc_dlopen_mode` is available.
    pub dlerror: Option<RemoteSymbol>,
}

impl DlFunctions {
    /// Finds `dlopen` and `dlsym` in the modules mapped by the debuggee.
    ///
    /// glibc before 2.34 keeps the public API in libdl, which many programs
    /// never load; its libc still exports `__libc_dlopen_mode` and
    /// `__libc_dlsym` with the same calling convention.
    pub fn resolve(resolver: &mut SymbolResolver) -> Result<DlFunctions> {
        for module in DL_MODULES {
            let Some(dlopen) = resolver.try_resolve_in(module, "dlopen")? else {
                continue;
            };
            let Some(dlsym) = resolver.try_resolve_in(module, "dlsym")? else {
                continue;
            };
            let dlerror = resolver.try_resolve_in(module, "dlerror")?;
            log::debug!("using dlopen/dlsym from {}", dlopen.module);
            return Ok(DlFunctions {
                dlopen,
                dlsym,
                dlerror,
            });
        }
        if let (Some(dlopen), Some(dlsym)) = (
            resolver.try_resolve_in("libc", "__libc_dlopen_mode")?,
            resolver.try_resolve_in("libc", "__libc_dlsym")?,
        ) {
            log::warn!(
                "process {} has no public dlopen, falling back to __libc_dlopen_mode",
                resolver.pid()
            );
            return Ok(DlFunctions {
                dlopen,
                dlsym,
                dlerror: None,
            });
        }
        Err(symbol_error(format!(
            "process {} maps no libc, libdl or musl loader exporting dlopen and dlsym",
            resolver.pid()
        )))
    }
}

/// What [`Injector::load_and_call`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The function was found and called.
    Called { handle: u64, function: u64, ret: u64 },
    /// The library loaded but does not export the function. Nothing was
    /// called.
    SymbolMissing { handle: u64 },
}

impl LoadOutcome {
    #[inline]
    pub fn handle(&self) -> u64 {
        match *self {
            LoadOutcome::Called { handle, .. } | LoadOutcome::SymbolMissing { handle } => handle,
        }
    }
}

/// A stopped debuggee whose dynamic loader we can drive.
pub struct Injector {
    resolver: SymbolResolver,
    dl: DlFunctions,
    tracee: Tracee,
    options: InjectOptions,
}

impl Injector {
    /// Locates the loader entry points of `pid`, then attaches to it.
    pub fn attach(pid: pid_t, options: InjectOptions) -> Result<Injector> {
        let mut resolver = SymbolResolver::new(pid)?;
        let dl = DlFunctions::resolve(&mut resolver)?;
        log::info!(
            "process {pid}: dlopen at {:#x}, dlsym at {:#x}",
            dl.dlopen.addr,
            dl.dlsym.addr
        );
        let tracee = Tracee::attach(pid)?;
        Ok(Injector {
            resolver,
            dl,
            tracee,
            options,
        })
    }

    #[inline]
    pub fn pid(&self) -> pid_t {
        self.tracee.pid()
    }

    #[inline]
    pub fn tracee(&self) -> &Tracee {
        &self.tracee
    }

    #[inline]
    pub fn dl_functions(&self) -> &DlFunctions {
        &self.dl
    }

    #[inline]
    pub fn resolver(&mut self) -> &mut SymbolResolver {
        &mut self.resolver
    }

    #[inline]
    pub fn options(&self) -> &InjectOptions {
        &self.options
    }

    /// Calls `dlopen(lib_path, flags)` in the debuggee and returns the
    /// handle. A NULL handle becomes [`Error::Dl`](crate::Error::Dl) carrying
    /// the debuggee's `dlerror()` text.
    pub fn dlopen(&mut self, lib_path: &str) -> Result<u64> {
        let path = library_argument(lib_path)?;
        let flags = self.options.flags;
        let limit = self.options.error_limit;
        let dlerror = self.dl.dlerror.as_ref().map(|sym| sym.addr);

        let mut call = RemoteCall::new(&mut self.tracee, self.options.call)?;
        let path_addr = call.push_c_string(&path)?;
        let handle = call.call(self.dl.dlopen.addr, &[path_addr, u64::from(flags.bits())])?;
        if handle != 0 {
            call.finish()?;
            log::info!("dlopen(\"{path}\", {flags}) = {handle:#x}");
            if let Err(e) = self.resolver.refresh() {
                log::warn!("{path} is loaded but the memory maps could not be re-read: {e}");
            }
            return Ok(handle);
        }

        let reason = match dlerror {
            Some(dlerror) => match call.call(dlerror, &[])? {
                0 => "no error reported".to_owned(),
                msg => call.tracee().read_c_string(msg, limit)?,
            },
            None => "the loader gives no reason".to_owned(),
        };
        call.finish()?;
        Err(dl_error(format!("dlopen(\"{path}\") failed: {reason}")))
    }

    /// Calls `dlsym(handle, name)` in the debuggee. `None` means the
    /// library does not export `name`.
    pub fn dlsym(&mut self, handle: u64, name: &str) -> Result<Option<u64>> {
        let mut call = RemoteCall::new(&mut self.tracee, self.options.call)?;
        let name_addr = call.push_c_string(name)?;
        let addr = call.call(self.dl.dlsym.addr, &[handle, name_addr])?;
        call.finish()?;
        log::debug!("dlsym({handle:#x}, \"{name}\") = {addr:#x}");
        Ok((addr != 0).then_some(addr))
    }

    /// Calls the function at `addr` with integer arguments and returns its
    /// raw return register.
    pub fn call(&mut self, addr: u64, args: &[u64]) -> Result<u64> {
        let mut call = RemoteCall::new(&mut self.tracee, self.options.call)?;
        let ret = call.call(addr, args)?;
        call.finish()?;
        Ok(ret)
    }

    /// Loads `lib_path` and calls its `func` with no arguments.
    pub fn load_and_call(&mut self, lib_path: &str, func: &str) -> Result<LoadOutcome> {
        let handle = self.dlopen(lib_path)?;
        let Some(function) = self.dlsym(handle, func)? else {
            log::warn!("function {func} not found in {lib_path}");
            return Ok(LoadOutcome::SymbolMissing { handle });
        };
        let ret = self.call(function, &[])?;
        log::info!("{func}() at {function:#x} returned {ret:#x}");
        Ok(LoadOutcome::Called {
            handle,
            function,
            ret,
        })
    }

    /// Loads `lib_path` and redirects `target`, a function already present
    /// in the debuggee, to the library's `replacement`.
    ///
    /// `target` is resolved before the library is loaded so that the
    /// library's own definition of the same name cannot shadow it.
    pub fn patch_function(
        &mut self,
        lib_path: &str,
        target: &str,
        replacement: &str,
    ) -> Result<FunctionPatch> {
        let original = self.resolver.resolve_any(target)?;
        if original.kind == SymbolKind::IndirectFunction {
            return Err(patch_error(format!(
                "{target} in {} is an IFUNC, its callers are bound to the implementation it returned",
                original.module
            )));
        }
        if !original.kind.is_code() {
            return Err(patch_error(format!(
                "{target} in {} is not a function ({:?})",
                original.module, original.kind
            )));
        }
        let handle = self.dlopen(lib_path)?;
        let replacement_addr = self.dlsym(handle, replacement)?.ok_or_else(|| {
            symbol_error(format!("function {replacement} not found in {lib_path}"))
        })?;
        FunctionPatch::install(&self.tracee, original.addr, original.size, replacement_addr)
    }

    /// Releases the debuggee.
    pub fn detach(self) -> Result<()> {
        self.tracee.detach()
    }
}

/// The path handed to the debuggee's `dlopen`. Relative paths are made
/// absolute from the tool's working directory; bare names are left for the
/// loader's search path.
fn library_argument(lib_path: &str) -> Result<String> {
    if lib_path.is_empty() {
        return Err(config_error("empty library path"));
    }
    if lib_path.starts_with('/') || !lib_path.contains('/') {
        return Ok(lib_path.to_owned());
    }
    let absolute = std::fs::canonicalize(lib_path)
        .map_err(|e| io_error(format!("cannot resolve {lib_path}: {e}")))?;
    absolute
        .into_os_string()
        .into_string()
        .map_err(|p| config_error(format!("{} is not valid UTF-8", p.to_string_lossy())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_names_and_prefixes() {
        assert_eq!("".parse::<DlopenFlags>().unwrap(), DlopenFlags::LAZY);
        assert_eq!(
            "now,global".parse::<DlopenFlags>().unwrap(),
            DlopenFlags::NOW | DlopenFlags::GLOBAL
        );
        assert_eq!(
            "RTLD_NODELETE|rtld_global".parse::<DlopenFlags>().unwrap(),
            DlopenFlags::LAZY | DlopenFlags::NODELETE | DlopenFlags::GLOBAL
        );
        assert_eq!((DlopenFlags::NOW | DlopenFlags::GLOBAL).bits(), 0x102);
        assert!(matches!(
            "eager".parse::<DlopenFlags>(),
            Err(crate::Error::Config { .. })
        ));
    }

    #[test]
    fn flags_display() {
        assert_eq!(DlopenFlags::LAZY.to_string(), "RTLD_LAZY");
        assert_eq!(
            (DlopenFlags::NOW | DlopenFlags::NOLOAD).to_string(),
            "RTLD_NOW|RTLD_NOLOAD"
        );
        assert_eq!(DlopenFlags::empty().to_string(), "0");
    }

    #[test]
    fn library_arguments() {
        assert_eq!(library_argument("libm.so.6").unwrap(), "libm.so.6");
        assert_eq!(library_argument("/lib/libx.so").unwrap(), "/lib/libx.so");
        assert!(library_argument("").is_err());
        assert!(library_argument("./no/such/dir/libx.so").is_err());
        let cwd = std::env::current_dir().unwrap();
        let resolved = library_argument("./Cargo.toml").unwrap();
        assert_eq!(resolved, cwd.join("Cargo.toml").canonicalize().unwrap().to_str().unwrap());
    }

    #[test]
    fn outcome_handle() {
        assert_eq!(LoadOutcome::SymbolMissing { handle: 7 }.handle(), 7);
        let called = LoadOutcome::Called {
            handle: 9,
            function: 1,
            ret: 0,
        };
        assert_eq!(called.handle(), 9);
    }
}
