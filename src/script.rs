//! Rendering the load-and-call sequence as a gdb command script.
//!
//! For when the tool cannot trace the debuggee itself but a gdb session is
//! already attached: the script does through gdb's expression evaluator
//! what [`Injector::load_and_call`](crate::Injector::load_and_call) does
//! through ptrace.

use crate::{DlopenFlags, Result, error::config_error};
use core::fmt::Write;

/// A gdb script that loads a library and calls one of its functions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GdbScript {
    library: String,
    function: String,
    flags: DlopenFlags,
    detach: bool,
}

impl GdbScript {
    pub fn load_and_call(library: impl Into<String>, function: impl Into<String>) -> GdbScript {
        GdbScript {
            library: library.into(),
            function: function.into(),
            flags: DlopenFlags::default(),
            detach: false,
        }
    }

    pub fn flags(mut self, flags: DlopenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Ends the script with `detach`.
    pub fn detach(mut self, detach: bool) -> Self {
        self.detach = detach;
        self
    }

    /// Produces the script text.
    pub fn render(&self) -> Result<String> {
        if self.library.is_empty() {
            return Err(config_error("empty library path"));
        }
        if self.function.is_empty() {
            return Err(config_error("empty function name"));
        }
        let library = c_string_literal(&self.library)?;
        let function = c_string_literal(&self.function)?;
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = write!(
            out,
            "set $dl_handle = (void *) dlopen({library}, {flags})\n\
             if $dl_handle == 0\n  \
               echo dlopen failed\\n\n  \
               call (char *) dlerror()\n\
             else\n  \
               set $dl_func = (void *) dlsym($dl_handle, {function})\n  \
               if $dl_func != 0\n    \
                 call ((void (*) (void)) $dl_func)()\n  \
               else\n    \
                 echo function {echo_name} not found\\n\n  \
               end\n\
             end\n",
            flags = self.flags.bits(),
            echo_name = echo_text(&self.function),
        );
        if self.detach {
            out.push_str("detach\n");
        }
        Ok(out)
    }
}

/// Quotes `s` as a C string literal, which is how gdb parses it.
fn c_string_literal(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\0' => return Err(config_error(format!("{s:?} contains a NUL byte"))),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii_control() => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    Ok(out)
}

/// `echo` takes the rest of the line with C escapes, so backslashes must
/// be doubled and line breaks cannot appear.
fn echo_text(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_load_and_call() {
        let script = GdbScript::load_and_call("/tmp/libprobe.so", "probe_init")
            .render()
            .unwrap();
        let expected = "\
set $dl_handle = (void *) dlopen(\"/tmp/libprobe.so\", 1)
if $dl_handle == 0
  echo dlopen failed\\n
  call (char *) dlerror()
else
  set $dl_func = (void *) dlsym($dl_handle, \"probe_init\")
  if $dl_func != 0
    call ((void (*) (void)) $dl_func)()
  else
    echo function probe_init not found\\n
  end
end
";
        assert_eq!(script, expected);
    }

    #[test]
    fn flags_and_detach() {
        let script = GdbScript::load_and_call("libm.so.6", "cos")
            .flags(DlopenFlags::NOW | DlopenFlags::GLOBAL)
            .detach(true)
            .render()
            .unwrap();
        assert!(script.starts_with("set $dl_handle = (void *) dlopen(\"libm.so.6\", 258)\n"));
        assert!(script.ends_with("end\ndetach\n"));
    }

    #[test]
    fn escapes_strings() {
        assert_eq!(c_string_literal("a\"b\\c").unwrap(), r#""a\"b\\c""#);
        assert_eq!(c_string_literal("x\x07").unwrap(), r#""x\007""#);
        assert!(c_string_literal("a\0b").is_err());
        assert!(GdbScript::load_and_call("", "f").render().is_err());
        assert!(GdbScript::load_and_call("lib.so", "").render().is_err());
    }
}
