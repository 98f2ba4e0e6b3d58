#![allow(dead_code)]

use dlinject::{Error, ProcessMaps};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub fn own_pid() -> i32 {
    std::process::id() as i32
}

/// Path of the libc mapped into the test process, if it has one we can
/// recognise.
pub fn own_libc() -> Option<String> {
    let maps = ProcessMaps::read(own_pid()).ok()?;
    maps.find_module("libc").map(|module| module.path)
}

/// The fixture library built by build.rs.
pub fn test_dylib() -> Option<PathBuf> {
    let path = PathBuf::from(option_env!("DLINJECT_TEST_DYLIB")?);
    path.exists().then_some(path)
}

/// A child process killed when dropped.
pub struct Sleeper(pub Child);

impl Sleeper {
    pub fn pid(&self) -> i32 {
        self.0.id() as i32
    }
}

impl Drop for Sleeper {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Starts `sleep` and waits until its libc is mapped.
pub fn spawn_sleeper() -> Option<Sleeper> {
    let child = Command::new("sleep")
        .arg("60")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .spawn()
        .ok()?;
    let sleeper = Sleeper(child);
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        let ready = ProcessMaps::read(sleeper.pid())
            .is_ok_and(|maps| maps.find_module("libc").is_some());
        if ready {
            // Let it get past its startup and into nanosleep.
            thread::sleep(Duration::from_millis(50));
            return Some(sleeper);
        }
        thread::sleep(Duration::from_millis(10));
    }
    None
}

/// Attach failures that mean the environment forbids tracing.
pub fn tracing_forbidden(err: &Error) -> bool {
    matches!(err, Error::Ptrace { msg } if msg.contains("EPERM") || msg.contains("ptrace_scope") || msg.contains("not permitted") || msg.contains("not implemented"))
}
