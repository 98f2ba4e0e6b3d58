//! Looking up how a source file is compiled.
//!
//! Two layouts are accepted: a flat JSON object mapping each source file to
//! its compile command, as written by patch build scripts, and the
//! `compile_commands.json` array produced by CMake, Bear and friends.

use crate::{Result, error::io_error};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

#[derive(Deserialize)]
#[serde(untagged)]
enum Layout {
    Flat(BTreeMap<String, serde_json::Value>),
    Entries(Vec<Entry>),
}

#[derive(Deserialize)]
struct Entry {
    #[serde(default)]
    directory: Option<String>,
    file: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
}

/// How one source file is compiled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompileCommand {
    pub file: String,
    /// Working directory of the command, when the database records one.
    pub directory: Option<String>,
    pub command: String,
}

impl CompileCommand {
    /// `file` joined to `directory` when it is relative.
    pub fn full_path(&self) -> PathBuf {
        match &self.directory {
            Some(dir) => Path::new(dir).join(&self.file),
            None => PathBuf::from(&self.file),
        }
    }
}

/// A parsed compile-command database.
#[derive(Clone, Debug, Default)]
pub struct CompileCommands {
    commands: Vec<CompileCommand>,
}

impl CompileCommands {
    pub fn open(path: impl AsRef<Path>) -> Result<CompileCommands> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| io_error(format!("cannot read {}: {e}", path.display())))?;
        let db = Self::parse(&text)?;
        log::debug!("{} compile commands in {}", db.len(), path.display());
        Ok(db)
    }

    pub fn parse(text: &str) -> Result<CompileCommands> {
        let commands = match serde_json::from_str(text)? {
            Layout::Flat(map) => map
                .into_iter()
                .filter_map(|(file, value)| match value {
                    serde_json::Value::String(command) => Some(CompileCommand {
                        file,
                        directory: None,
                        command,
                    }),
                    other => {
                        log::warn!("ignoring non-string command for {file}: {other}");
                        None
                    }
                })
                .collect(),
            Layout::Entries(entries) => entries
                .into_iter()
                .filter_map(|entry| {
                    let command = match (entry.command, entry.arguments) {
                        (Some(command), _) => command,
                        (None, Some(arguments)) => join_arguments(&arguments),
                        (None, None) => {
                            log::warn!("entry for {} has no command", entry.file);
                            return None;
                        }
                    };
                    Some(CompileCommand {
                        file: entry.file,
                        directory: entry.directory,
                        command,
                    })
                })
                .collect(),
        };
        Ok(CompileCommands { commands })
    }

    /// The command compiling `source`, matched against the recorded file
    /// name first and then against the full path.
    pub fn get(&self, source: &str) -> Option<&str> {
        self.commands
            .iter()
            .find(|c| c.file == source)
            .or_else(|| {
                let source = Path::new(source);
                self.commands.iter().find(|c| c.full_path() == source)
            })
            .map(|c| c.command.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompileCommand> {
        self.commands.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Joins an argument vector into a single shell command line.
fn join_arguments(arguments: &[String]) -> String {
    arguments
        .iter()
        .map(|arg| {
            let plain = !arg.is_empty()
                && arg
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b"-_=+./,:@%".contains(&b));
            if plain {
                arg.clone()
            } else {
                format!("'{}'", arg.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_object() {
        let db = CompileCommands::parse(
            r#"{
                "src/patch.cpp": "g++ -O2 -fPIC -c src/patch.cpp",
                "src/util.c": "gcc -c src/util.c",
                "broken.c": 42
            }"#,
        )
        .unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.get("src/util.c"), Some("gcc -c src/util.c"));
        assert_eq!(db.get("broken.c"), None);
        assert_eq!(db.get("missing.c"), None);
        let files: Vec<_> = db.iter().map(|c| c.file.as_str()).collect();
        assert_eq!(files, ["src/patch.cpp", "src/util.c"]);
    }

    #[test]
    fn compile_commands_array() {
        let db = CompileCommands::parse(
            r#"[
                {"directory": "/build", "file": "a.c", "command": "cc -c a.c"},
                {"directory": "/build", "file": "b c.c", "arguments": ["cc", "-DX=\"y\"", "-c", "b c.c"]},
                {"directory": "/build", "file": "none.c"}
            ]"#,
        )
        .unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.get("a.c"), Some("cc -c a.c"));
        assert_eq!(db.get("/build/a.c"), Some("cc -c a.c"));
        assert_eq!(db.get("b c.c"), Some(r#"cc '-DX="y"' -c 'b c.c'"#));
    }

    #[test]
    fn malformed_is_config_error() {
        assert!(matches!(
            CompileCommands::parse("[1, 2"),
            Err(crate::Error::Config { .. })
        ));
        assert!(matches!(
            CompileCommands::open("/nonexistent/compile_commands.json"),
            Err(crate::Error::Io { .. })
        ));
    }
}
