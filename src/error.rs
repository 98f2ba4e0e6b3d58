use std::borrow::Cow;
use std::fmt::Display;

/// Error types used throughout `dlinject`.
/// These errors represent the failure conditions that can occur while
/// inspecting a debuggee, resolving its symbols and injecting calls into it.
#[derive(Debug)]
pub enum Error {
    /// An error occurred while opening or reading files.
    ///
    /// This error typically indicates issues such as:
    /// * Module file not found
    /// * Permission denied
    Io {
        /// A descriptive message about the I/O error.
        msg: Cow<'static, str>,
    },

    /// A `ptrace` or `waitpid` request failed.
    ///
    /// This error typically indicates issues such as:
    /// * Missing privileges or a restrictive `ptrace_scope`
    /// * The debuggee went away
    /// * Access to an unmapped address
    Ptrace {
        /// A descriptive message about the failed request.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing an ELF file.
    ParseElf {
        /// A descriptive message about the parsing error.
        msg: Cow<'static, str>,
    },

    /// An error occurred while parsing `/proc/<pid>/maps`.
    ParseMaps {
        /// A descriptive message about the malformed line.
        msg: Cow<'static, str>,
    },

    /// A symbol or the module expected to contain it could not be found.
    Symbol {
        /// A descriptive message naming the symbol.
        msg: Cow<'static, str>,
    },

    /// A call injected into the debuggee did not complete normally.
    RemoteCall {
        /// A descriptive message about the failed call.
        msg: Cow<'static, str>,
    },

    /// The debuggee's dynamic loader reported an error.
    Dl {
        /// The message, usually the debuggee's `dlerror()` text.
        msg: Cow<'static, str>,
    },

    /// Installing or reverting a function patch failed.
    Patch {
        /// A descriptive message about the patch error.
        msg: Cow<'static, str>,
    },

    /// Invalid configuration or input data.
    Config {
        /// A descriptive message about the configuration error.
        msg: Cow<'static, str>,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
            Error::Ptrace { msg } => write!(f, "ptrace error: {msg}"),
            Error::ParseElf { msg } => write!(f, "ELF parsing error: {msg}"),
            Error::ParseMaps { msg } => write!(f, "memory map parsing error: {msg}"),
            Error::Symbol { msg } => write!(f, "Symbol error: {msg}"),
            Error::RemoteCall { msg } => write!(f, "Remote call error: {msg}"),
            Error::Dl { msg } => write!(f, "Dynamic loader error: {msg}"),
            Error::Patch { msg } => write!(f, "Patch error: {msg}"),
            Error::Config { msg } => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<std::io::Error> for Error {
    #[cold]
    fn from(value: std::io::Error) -> Self {
        io_error(value.to_string())
    }
}

impl From<elf::ParseError> for Error {
    #[cold]
    fn from(value: elf::ParseError) -> Self {
        parse_elf_error(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    #[cold]
    fn from(value: serde_json::Error) -> Self {
        config_error(value.to_string())
    }
}

/// Creates an I/O error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

/// Creates a ptrace error from the specified message and the current `errno`.
///
/// Must be called right after the failing libc call, before anything else
/// can overwrite `errno`.
#[cold]
#[inline(never)]
pub(crate) fn ptrace_errno(msg: impl Display) -> Error {
    let os = std::io::Error::last_os_error();
    let hint = if os.kind() == std::io::ErrorKind::PermissionDenied {
        " (missing CAP_SYS_PTRACE? see /proc/sys/kernel/yama/ptrace_scope)"
    } else {
        ""
    };
    Error::Ptrace {
        msg: format!("{msg}: {os}{hint}").into(),
    }
}

/// Creates a ptrace error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn ptrace_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Ptrace { msg: msg.into() }
}

/// Creates an ELF parsing error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn parse_elf_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseElf { msg: msg.into() }
}

/// Creates a maps parsing error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn parse_maps_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::ParseMaps { msg: msg.into() }
}

/// Creates a symbol error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn symbol_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Symbol { msg: msg.into() }
}

/// Creates a remote call error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn remote_call_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::RemoteCall { msg: msg.into() }
}

/// Creates a dynamic loader error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn dl_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Dl { msg: msg.into() }
}

/// Creates a patch error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn patch_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Patch { msg: msg.into() }
}

/// Creates a configuration error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn config_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Config { msg: msg.into() }
}
