/// Issue a `ptrace(2)` request, turning a failure into an [`Error::Ptrace`].
///
/// `errno` is cleared first so that a `PTRACE_PEEK*` result of `-1` can be
/// told apart from a real failure.
///
/// [`Error::Ptrace`]: crate::Error::Ptrace
macro_rules! ptrace {
    ($req:ident, $pid:expr, $addr:expr, $data:expr) => {{
        let pid: libc::pid_t = $pid;
        unsafe { *libc::__errno_location() = 0 };
        let ret = unsafe {
            libc::ptrace(
                libc::$req,
                pid,
                ($addr) as *mut libc::c_void,
                ($data) as *mut libc::c_void,
            )
        };
        if ret == -1 && unsafe { *libc::__errno_location() } != 0 {
            Err($crate::error::ptrace_errno(format_args!(
                "{}({})",
                stringify!($req),
                pid
            )))
        } else {
            Ok::<libc::c_long, $crate::Error>(ret)
        }
    }};
}
