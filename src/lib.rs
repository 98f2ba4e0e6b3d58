//! # dlinject
//! Load a shared library into a running Linux process and call into it.
//!
//! The debuggee is stopped with `ptrace`, its own dynamic loader is driven
//! through injected calls to `dlopen` and `dlsym`, and the requested function
//! is called with no arguments, exactly as one would do by hand from a
//! debugger prompt. Addresses of the loader functions are found without the
//! debuggee's help by reading the ELF files it has mapped.
//!
//! ## Example
//! ```no_run
//! use dlinject::{InjectOptions, Injector, LoadOutcome};
//!
//! let mut injector = Injector::attach(4242, InjectOptions::default()).unwrap();
//! if let LoadOutcome::SymbolMissing { .. } =
//!     injector.load_and_call("/opt/probes/libtrace.so", "trace_start").unwrap()
//! {
//!     eprintln!("function trace_start not found");
//! }
//! injector.detach().unwrap();
//! ```
//!
//! Only `x86_64` and `aarch64` debuggees of the tool's own architecture are
//! supported.
#[cfg(not(target_os = "linux"))]
compile_error!("dlinject only supports Linux");

#[macro_use]
mod macros;

pub mod arch;
pub mod call;
pub mod compile_db;
pub mod elf;
mod error;
pub mod inject;
pub mod maps;
pub mod patch;
pub mod ptrace;
pub mod resolve;
pub mod script;

pub use call::{CallOptions, RemoteCall};
pub use compile_db::{CompileCommand, CompileCommands};
pub use elf::{ElfImage, ElfSymbolInfo, SymbolKind};
pub use error::Error;
pub use inject::{DlFunctions, DlopenFlags, InjectOptions, Injector, LoadOutcome};
pub use maps::{LoadedModule, MapPermissions, MemMap, ProcessMaps};
pub use patch::FunctionPatch;
pub use ptrace::{StopReason, Tracee};
pub use resolve::{RemoteSymbol, SymbolResolver};
pub use script::GdbScript;

/// The result type used throughout `dlinject`.
pub type Result<T> = core::result::Result<T, Error>;
