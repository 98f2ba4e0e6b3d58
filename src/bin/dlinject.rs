//! dlinject command line client
//!
//! Loads libraries into running processes, resolves their symbols and
//! patches their functions.

use clap::{Args, Parser, Subcommand};
use dlinject::{
    CompileCommands, DlopenFlags, GdbScript, InjectOptions, Injector, LoadOutcome, Result,
    SymbolResolver,
};
use log::{LevelFilter, error, info};
use std::{fs, path::PathBuf, process::ExitCode};

#[derive(Parser)]
#[command(version, about = "Load a shared library into a running process and call into it")]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Target {
    /// Process to attach to
    #[arg(short, long, env = "DLINJECT_PID")]
    pid: i32,

    /// dlopen mode, e.g. `lazy`, `now,global`
    #[arg(long, default_value = "lazy")]
    flags: DlopenFlags,

    /// Unrelated signal stops tolerated during one injected call
    #[arg(long, default_value_t = 16)]
    max_stops: usize,
}

impl Target {
    fn options(&self) -> InjectOptions {
        let mut options = InjectOptions {
            flags: self.flags,
            ..Default::default()
        };
        options.call.max_stops = self.max_stops;
        options
    }
}

#[derive(Subcommand)]
enum Command {
    /// dlopen LIB in the process and call FUNC with no arguments
    Load {
        #[command(flatten)]
        target: Target,
        /// Library to load, as the process should see it
        lib: String,
        /// Function to call after loading
        func: String,
    },
    /// Print the address of SYMBOL in the process
    Resolve {
        /// Process to inspect
        #[arg(short, long, env = "DLINJECT_PID")]
        pid: i32,
        /// Only look in the module matching this name (e.g. `libc.so`)
        #[arg(short, long)]
        module: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
        symbol: String,
    },
    /// Load LIB and redirect TARGET to its REPLACEMENT
    Patch {
        #[command(flatten)]
        target: Target,
        lib: String,
        /// Function of the process to redirect
        target_symbol: String,
        /// Function of LIB to redirect to
        replacement: String,
    },
    /// Write the equivalent gdb script (use with `gdb -p PID -x FILE`)
    Script {
        lib: String,
        func: String,
        #[arg(long, default_value = "lazy")]
        flags: DlopenFlags,
        /// End the script with `detach`
        #[arg(long)]
        detach: bool,
        /// Output file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Look up the compile command of a source file
    CompileCommand {
        /// JSON database: {source: command} or compile_commands.json
        db: PathBuf,
        /// Source file to look up
        #[arg(required_unless_present = "dump")]
        source: Option<String>,
        /// Print every entry
        #[arg(long)]
        dump: bool,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Load { target, lib, func } => {
            let mut injector = Injector::attach(target.pid, target.options())?;
            let outcome = injector.load_and_call(&lib, &func);
            injector.detach()?;
            match outcome? {
                LoadOutcome::Called { function, ret, .. } => {
                    println!("{func} ({function:#x}) returned {ret:#x}");
                }
                LoadOutcome::SymbolMissing { .. } => {
                    println!("function {func} not found");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Resolve {
            pid,
            module,
            json,
            symbol,
        } => {
            let mut resolver = SymbolResolver::new(pid)?;
            let sym = match module {
                Some(module) => resolver.resolve_in(&module, &symbol)?,
                None => resolver.resolve_any(&symbol)?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&sym)?);
            } else {
                println!("{:#x} {} ({:?}, {})", sym.addr, sym.name, sym.kind, sym.module);
            }
        }
        Command::Patch {
            target,
            lib,
            target_symbol,
            replacement,
        } => {
            let mut injector = Injector::attach(target.pid, target.options())?;
            let patch = injector.patch_function(&lib, &target_symbol, &replacement);
            injector.detach()?;
            let patch = patch?;
            println!(
                "{target_symbol} ({:#x}) -> {replacement} ({:#x})",
                patch.target(),
                patch.replacement()
            );
        }
        Command::Script {
            lib,
            func,
            flags,
            detach,
            output,
        } => {
            let script = GdbScript::load_and_call(lib, func)
                .flags(flags)
                .detach(detach)
                .render()?;
            match output {
                Some(path) => {
                    fs::write(&path, script)?;
                    info!("wrote {}", path.display());
                }
                None => print!("{script}"),
            }
        }
        Command::CompileCommand {
            db,
            source,
            dump,
            json,
        } => {
            let db = CompileCommands::open(&db)?;
            if dump {
                if json {
                    let all: Vec<_> = db.iter().collect();
                    println!("{}", serde_json::to_string_pretty(&all)?);
                } else {
                    for entry in db.iter() {
                        println!("{}: {}", entry.file, entry.command);
                    }
                }
                return Ok(ExitCode::SUCCESS);
            }
            let Some(source) = source else {
                return Ok(ExitCode::FAILURE);
            };
            match db.get(&source) {
                Some(command) if json => println!("{}", serde_json::to_string(command)?),
                Some(command) => println!("{command}"),
                None => {
                    println!("no compile command for {source}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);
    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}
