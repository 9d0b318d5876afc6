use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hotwatch::notify::Event;
use hotwatch::{
    blocking::{Flow, Hotwatch},
    EventKind,
};
use miette::{bail, IntoDiagnostic, Result};

use ember::{env, Image, ImgParser, RunState, StaticSource};

/// Ember is a complete & convenient emulator toolchain for LS-8 machine code.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.ls8` file to run
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run text `.ls8` or binary `.bin` file directly and output to terminal
    Run {
        /// `.ls8` or `.bin` file to run
        name: PathBuf,
        /// Produce minimal output, suited for blackbox tests
        #[arg(short, long)]
        minimal: bool,
        /// Trace every step to stderr and dump the registers on halt
        #[arg(short, long)]
        trace: bool,
    },
    /// Create binary `.bin` file to run later or view emitted data
    Compile {
        /// `.ls8` file to compile
        name: PathBuf,
        /// Destination to output .bin file
        dest: Option<PathBuf>,
    },
    /// Check a `.ls8` file without running or outputting binary
    Check {
        /// File to check
        name: PathBuf,
    },
    /// Place a watch on a `.ls8` file to receive constant loader updates
    Watch {
        /// `.ls8` file to watch
        name: PathBuf,
    },
}

fn main() -> miette::Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    env::init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(ember::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    if let Some(command) = args.command {
        match command {
            Command::Run {
                name,
                minimal,
                trace,
            } => {
                run(&name, minimal, trace)?;
                Ok(())
            }
            Command::Compile { name, dest } => {
                file_message(Green, "Loading", &name);
                let contents = StaticSource::new(fs::read_to_string(&name).into_diagnostic()?);
                let img = load(&contents)?;

                let out_file_name =
                    dest.unwrap_or(name.with_extension("bin").file_name().unwrap().into());
                let mut file = File::create(&out_file_name).into_diagnostic()?;
                file.write_all(img.bytes()).into_diagnostic()?;

                message(Green, "Finished", "emit binary");
                file_message(Green, "Saved", &out_file_name);
                Ok(())
            }
            Command::Check { name } => {
                file_message(Green, "Checking", &name);
                let contents = StaticSource::new(fs::read_to_string(&name).into_diagnostic()?);
                let _ = load(&contents)?;
                message(Green, "Success", "no errors found!");
                Ok(())
            }
            Command::Watch { name } => {
                if !name.exists() {
                    bail!("File does not exist. Exiting...")
                }
                // Vim breaks if watching a single file
                let folder_path = match name.parent() {
                    Some(pth) if pth.is_dir() => pth.to_path_buf(),
                    _ => Path::new(".").to_path_buf(),
                };

                // Clear screen and move cursor to top left
                print!("\x1B[2J\x1B[2;1H");
                file_message(Green, "Watching", &name);
                message(Cyan, "Help", "press CTRL+C to exit");

                let mut watcher = Hotwatch::new_with_custom_delay(Duration::from_millis(500))
                    .into_diagnostic()?;

                watcher
                    .watch(folder_path, move |event: Event| match event.kind {
                        // Watch remove for vim changes
                        EventKind::Modify(_) | EventKind::Remove(_) => {
                            // Clear screen
                            print!("\x1B[2J\x1B[2;1H");
                            file_message(Green, "Watching", &name);
                            message(Green, "Re-checking", "file change detected");
                            message(Cyan, "Help", "press CTRL+C to exit");

                            sleep(Duration::from_millis(50));

                            let mut contents = StaticSource::new(match fs::read_to_string(&name) {
                                Ok(cts) => cts,
                                Err(e) => {
                                    eprintln!("{e}. Exiting...");
                                    std::process::exit(1)
                                }
                            });
                            match load(&contents) {
                                Ok(_) => {
                                    message(Green, "Success", "no errors found!");
                                }
                                Err(e) => {
                                    println!("\n{:?}", e);
                                }
                            };

                            // To avoid leaking memory
                            contents.reclaim();
                            Flow::Continue
                        }
                        _ => Flow::Continue,
                    })
                    .into_diagnostic()?;
                watcher.run();
                Ok(())
            }
        }
    } else {
        if let Some(path) = args.path {
            run(&path, false, false)?;
            Ok(())
        } else {
            println!("\n~ ember v{VERSION} ~");
            println!("{}", LOGO.truecolor(235, 110, 75).bold());
            println!("{SHORT_INFO}");
            std::process::exit(0);
        }
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &PathBuf) {
    let right = format!("target {}", right.to_str().unwrap());
    message(color, left, &right);
}

fn message<S>(color: MsgColor, left: S, right: S)
where
    S: Colorize + std::fmt::Display,
{
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn run(name: &PathBuf, minimal: bool, trace: bool) -> Result<()> {
    let trace = trace || env::is_trace_enabled();

    file_message(MsgColor::Green, "Loading", name);
    let mut program = if let Some(ext) = name.extension() {
        match ext.to_str().unwrap() {
            "bin" => {
                // Read raw image straight into memory
                let buffer = fs::read(name).into_diagnostic()?;
                RunState::from_raw(&buffer)?
            }
            "ls8" => {
                let contents = StaticSource::new(fs::read_to_string(name).into_diagnostic()?);
                let img = load(&contents)?;
                RunState::try_from(img)?
            }
            _ => {
                bail!("File has unknown extension. Exiting...")
            }
        }
    } else {
        bail!("File has no extension. Exiting...");
    };

    program.set_minimal(minimal);
    program.set_tracing(trace);

    message(MsgColor::Green, "Running", "loaded program");
    let result = program.run();
    if trace {
        program.print_registers();
    }
    result.into_diagnostic()?;

    file_message(MsgColor::Green, "Completed", name);
    Ok(())
}

/// Return the program image of a source file for further processing
fn load(contents: &StaticSource) -> Result<Image> {
    let parser = ImgParser::new(contents.src());
    let img = parser.parse()?;
    Ok(img)
}

const LOGO: &str = r#"
               *
      ___ _ __ ___ | |__   ___ _ __
     / _ \ '_ ` _ \| '_ \ / _ \ '__|
    |  __/ | | | | | |_) |  __/ |
     \___|_| |_| |_|_.__/ \___|_|   "#;

const SHORT_INFO: &str = r"
Welcome to ember, an all-in-one toolchain for loading and running LS-8
machine code on an emulated 8-bit machine.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
