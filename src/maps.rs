//! Parsing of `/proc/<pid>/maps`.

use crate::{Result, error::parse_maps_error};
use bitflags::bitflags;
use libc::pid_t;
use std::{fs, path::Path};

bitflags! {
    /// Permission column of a mapping.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MapPermissions: u8 {
        const READ = 0b00001;
        const WRITE = 0b00010;
        const EXECUTE = 0b00100;
        const SHARED = 0b01000;
        const PRIVATE = 0b10000;
    }
}

const DELETED_SUFFIX: &str = " (deleted)";

/// One line of `/proc/<pid>/maps`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemMap {
    pub start: u64,
    pub end: u64,
    pub perms: MapPermissions,
    pub offset: u64,
    pub inode: u64,
    /// File path, or a pseudo path such as `[stack]`. `None` for anonymous maps.
    pub path: Option<String>,
    /// The backing file was deleted after being mapped.
    pub deleted: bool,
}

impl MemMap {
    /// Mapped from a regular file (as opposed to `[heap]`, `[vdso]`, anonymous).
    #[inline]
    pub fn is_file_backed(&self) -> bool {
        self.inode != 0 && self.path.as_deref().is_some_and(|p| p.starts_with('/'))
    }

    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }
}

/// A shared object or executable mapped into the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedModule {
    pub path: String,
    /// Start of the mapping of file offset 0.
    pub base: u64,
    /// At least one mapping of the file is executable.
    pub executable: bool,
    pub deleted: bool,
}

impl LoadedModule {
    /// File name component of the path.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Whether this module is the library `name` refers to.
    ///
    /// `name` matches the whole file name, or a prefix of it followed by a
    /// version separator: `libc.so` matches `libc.so.6` and `libc` matches
    /// `libc-2.31.so`, but `libc` does not match `libcrypto.so.3`.
    pub fn matches(&self, name: &str) -> bool {
        let file_name = self.file_name();
        match file_name.strip_prefix(name) {
            Some("") => true,
            Some(rest) => rest.starts_with('.') || rest.starts_with('-'),
            None => false,
        }
    }
}

/// Memory maps of a process, sorted by address.
#[derive(Clone, Debug, Default)]
pub struct ProcessMaps {
    maps: Vec<MemMap>,
}

impl ProcessMaps {
    pub fn read(pid: pid_t) -> Result<ProcessMaps> {
        let path = format!("/proc/{pid}/maps");
        let text = fs::read_to_string(&path)
            .map_err(|e| crate::error::io_error(format!("{path}: {e}")))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<ProcessMaps> {
        let mut maps = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_line)
            .collect::<Result<Vec<_>>>()?;
        maps.sort_by_key(|m| m.start);
        Ok(ProcessMaps { maps })
    }

    #[inline]
    pub fn maps(&self) -> &[MemMap] {
        &self.maps
    }

    pub fn addr_to_map(&self, addr: u64) -> Option<&MemMap> {
        let idx = self.maps.partition_point(|m| m.end <= addr);
        self.maps.get(idx).filter(|m| m.contains(addr))
    }

    /// File-backed modules in address order. The first one is normally the
    /// main executable.
    pub fn modules(&self) -> Vec<LoadedModule> {
        let mut modules: Vec<LoadedModule> = Vec::new();
        for map in self.maps.iter().filter(|m| m.is_file_backed()) {
            let Some(path) = &map.path else { continue };
            if modules.iter().any(|m| &m.path == path) {
                continue;
            }
            let base = self
                .maps
                .iter()
                .find(|m| m.offset == 0 && m.path.as_ref() == Some(path))
                .map_or(map.start.saturating_sub(map.offset), |m| m.start);
            let executable = self
                .maps
                .iter()
                .any(|m| m.path.as_ref() == Some(path) && m.perms.contains(MapPermissions::EXECUTE));
            modules.push(LoadedModule {
                path: path.clone(),
                base,
                executable,
                deleted: map.deleted,
            });
        }
        modules
    }

    pub fn find_module(&self, name: &str) -> Option<LoadedModule> {
        if name.contains('/') {
            let wanted = Path::new(name);
            return self
                .modules()
                .into_iter()
                .find(|m| Path::new(&m.path) == wanted);
        }
        self.modules().into_iter().find(|m| m.matches(name))
    }
}

fn split_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    match s.split_once(' ') {
        Some((field, rest)) => Some((field, rest)),
        None if !s.is_empty() => Some((s, "")),
        None => None,
    }
}

fn parse_line(line: &str) -> Result<MemMap> {
    let bad = |what: &str| parse_maps_error(format!("{what} in line '{line}'"));

    let (range, rest) = split_field(line).ok_or_else(|| bad("missing address range"))?;
    let (start, end) = range.split_once('-').ok_or_else(|| bad("bad address range"))?;
    let start = u64::from_str_radix(start, 16).map_err(|_| bad("bad start address"))?;
    let end = u64::from_str_radix(end, 16).map_err(|_| bad("bad end address"))?;

    let (perms_str, rest) = split_field(rest).ok_or_else(|| bad("missing permissions"))?;
    let mut perms = MapPermissions::empty();
    for ch in perms_str.chars() {
        match ch {
            'r' => perms.insert(MapPermissions::READ),
            'w' => perms.insert(MapPermissions::WRITE),
            'x' => perms.insert(MapPermissions::EXECUTE),
            's' => perms.insert(MapPermissions::SHARED),
            'p' => perms.insert(MapPermissions::PRIVATE),
            _ => (),
        }
    }

    let (offset, rest) = split_field(rest).ok_or_else(|| bad("missing offset"))?;
    let offset = u64::from_str_radix(offset, 16).map_err(|_| bad("bad offset"))?;
    let (_dev, rest) = split_field(rest).ok_or_else(|| bad("missing device"))?;
    let (inode, rest) = split_field(rest).ok_or_else(|| bad("missing inode"))?;
    let inode = inode.parse::<u64>().map_err(|_| bad("bad inode"))?;

    // The path is the rest of the line and may contain spaces.
    let path = rest.trim_start();
    let (path, deleted) = match path.strip_suffix(DELETED_SUFFIX) {
        Some(p) => (p, true),
        None => (path, false),
    };
    Ok(MemMap {
        start,
        end,
        perms,
        offset,
        inode,
        path: (!path.is_empty()).then(|| path.to_string()),
        deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
55d0c5a00000-55d0c5a02000 r--p 00000000 fd:01 1835041                    /usr/bin/sleep
55d0c5a02000-55d0c5a06000 r-xp 00002000 fd:01 1835041                    /usr/bin/sleep
55d0c6d1e000-55d0c6d3f000 rw-p 00000000 00:00 0                          [heap]
7f2b8c000000-7f2b8c028000 r--p 00000000 fd:01 1840223                    /usr/lib/x86_64-linux-gnu/libc.so.6
7f2b8c028000-7f2b8c1bd000 r-xp 00028000 fd:01 1840223                    /usr/lib/x86_64-linux-gnu/libc.so.6
7f2b8c1bd000-7f2b8c215000 r--p 001bd000 fd:01 1840223                    /usr/lib/x86_64-linux-gnu/libc.so.6
7f2b8c300000-7f2b8c301000 r-xp 00000000 fd:01 1840999                    /tmp/my patch.so (deleted)
7f2b8c400000-7f2b8c402000 r-xp 00000000 fd:01 1841000                    /usr/lib/x86_64-linux-gnu/libcrypto.so.3
7ffd1f9e2000-7ffd1fa03000 rw-p 00000000 00:00 0                          [stack]
7ffd1fbd3000-7ffd1fbd5000 r-xp 00000000 00:00 0                          [vdso]
";

    #[test]
    fn parses_fields() {
        let maps = ProcessMaps::parse(SAMPLE).unwrap();
        assert_eq!(maps.maps().len(), 10);
        let text = &maps.maps()[1];
        assert_eq!(text.start, 0x55d0c5a02000);
        assert_eq!(text.end, 0x55d0c5a06000);
        assert_eq!(text.offset, 0x2000);
        assert_eq!(text.inode, 1835041);
        assert!(text.perms.contains(MapPermissions::READ | MapPermissions::EXECUTE));
        assert!(!text.perms.contains(MapPermissions::WRITE));
        assert_eq!(maps.maps()[2].path.as_deref(), Some("[heap]"));
        assert!(!maps.maps()[2].is_file_backed());
    }

    #[test]
    fn keeps_spaces_and_strips_deleted() {
        let maps = ProcessMaps::parse(SAMPLE).unwrap();
        let patch = &maps.maps()[6];
        assert_eq!(patch.path.as_deref(), Some("/tmp/my patch.so"));
        assert!(patch.deleted);
    }

    #[test]
    fn anonymous_map_has_no_path() {
        let maps = ProcessMaps::parse("7f0000000000-7f0000001000 rw-p 00000000 00:00 0 \n").unwrap();
        assert_eq!(maps.maps()[0].path, None);
    }

    #[test]
    fn groups_modules_by_path() {
        let maps = ProcessMaps::parse(SAMPLE).unwrap();
        let modules = maps.modules();
        let names: Vec<_> = modules.iter().map(|m| m.file_name()).collect();
        assert_eq!(names, ["sleep", "libc.so.6", "my patch.so", "libcrypto.so.3"]);
        assert_eq!(modules[1].base, 0x7f2b8c000000);
        assert!(modules.iter().all(|m| m.executable));
        assert!(modules[2].deleted);
    }

    #[test]
    fn module_name_matching() {
        let maps = ProcessMaps::parse(SAMPLE).unwrap();
        assert_eq!(maps.find_module("libc.so").unwrap().base, 0x7f2b8c000000);
        assert_eq!(
            maps.find_module("libc").unwrap().file_name(),
            "libc.so.6"
        );
        assert_eq!(
            maps.find_module("libcrypto").unwrap().file_name(),
            "libcrypto.so.3"
        );
        assert!(maps.find_module("libdl.so").is_none());
        assert!(
            maps.find_module("/usr/lib/x86_64-linux-gnu/libc.so.6")
                .is_some()
        );
    }

    #[test]
    fn addr_lookup() {
        let maps = ProcessMaps::parse(SAMPLE).unwrap();
        let map = maps.addr_to_map(0x7f2b8c030000).unwrap();
        assert_eq!(map.offset, 0x28000);
        assert!(maps.addr_to_map(0x10).is_none());
    }

    #[test]
    fn malformed_lines_are_errors() {
        assert!(ProcessMaps::parse("zzzz-1000 r--p 0 00:00 0\n").is_err());
        assert!(ProcessMaps::parse("1000-2000\n").is_err());
        assert!(ProcessMaps::parse("1000-2000 r--p 00000000 fd:01 abc /x\n").is_err());
    }
}
