//! encfile CLI - randomly addressable encrypted files
//!
//! Command-line interface for creating, reading, writing and shredding
//! encrypted paged files.

use std::error::Error as StdError;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use encfile::commands;
use encfile::passphrase::{PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader};
use encfile::{EncFileError, ErrorCategory, ErrorKind, NonceScheme, Options};

#[derive(Parser)]
#[command(name = "encfile")]
#[command(version)]
#[command(about = "Passphrase-protected, randomly addressable encrypted files.", long_about = None)]
struct Cli {
    /// Read passphrase from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// Plaintext bytes per sector; must be a multiple of 16
    #[arg(long, global = true, default_value_t = encfile::options::DEFAULT_SECTOR_SIZE)]
    sector_size: usize,

    /// Give every sector index its own nonce; such files need this flag on every use
    #[arg(long, global = true)]
    per_sector_nonce: bool,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new, empty encrypted file
    Create {
        /// Path of the file to create
        file: PathBuf,
    },

    /// Write plaintext into an encrypted file at an offset
    Put {
        /// Existing encrypted file
        file: PathBuf,

        /// Plaintext offset to start writing at
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Read plaintext from this file instead of stdin
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,
    },

    /// Read plaintext from an encrypted file
    Get {
        /// Existing encrypted file
        file: PathBuf,

        /// Plaintext offset to start reading at
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Bytes to read; defaults to the end of the last stored sector
        #[arg(long)]
        length: Option<u64>,

        /// Write plaintext to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Show sector geometry of an encrypted file
    Info {
        /// Existing encrypted file
        file: PathBuf,
    },

    /// Change the passphrase of an encrypted file
    Passwd {
        /// Existing encrypted file
        file: PathBuf,

        /// Read the new passphrase from this file instead of the terminal
        #[arg(long, value_name = "FILE")]
        new_passphrase_file: Option<PathBuf>,
    },

    /// Overwrite an encrypted file with random data and remove it
    Shred {
        /// Existing encrypted file
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> encfile::Result<()> {
    let nonce_scheme = if cli.per_sector_nonce {
        NonceScheme::PerSector
    } else {
        NonceScheme::Fixed
    };
    let options = Options::default()
        .with_sector_size(cli.sector_size)
        .with_nonce_scheme(nonce_scheme);
    let mut reader = get_passphrase_reader(cli.passphrase_stdin);

    match cli.command {
        Commands::Create { file } => commands::create_file(&file, &options, &mut *reader),
        Commands::Put {
            file,
            offset,
            input,
        } => {
            let mut source: Box<dyn io::Read> = match input {
                Some(path) => Box::new(open_input(&path)?),
                None if cli.passphrase_stdin => {
                    return Err(EncFileError::with_kind(
                        ErrorCategory::User,
                        ErrorKind::InvalidArgument,
                        "--passphrase-stdin needs --input, stdin cannot carry both",
                    ));
                }
                None => Box::new(io::stdin()),
            };
            let written = commands::put(&file, offset, &mut *source, &options, &mut *reader)?;
            tracing::debug!(written, "put complete");
            Ok(())
        }
        Commands::Get {
            file,
            offset,
            length,
            output,
        } => {
            let mut sink: Box<dyn io::Write> = match output {
                Some(path) => Box::new(File::create(&path).map_err(|e| {
                    EncFileError::with_kind_and_source(
                        ErrorCategory::User,
                        ErrorKind::Io,
                        format!("failed to create {}", path.display()),
                        e,
                    )
                })?),
                None => Box::new(io::stdout()),
            };
            commands::get(&file, offset, length, &mut *sink, &options, &mut *reader)?;
            sink.flush()
                .map_err(|e| EncFileError::io("failed to flush output", e))
        }
        Commands::Info { file } => {
            let info = commands::info(&file, &options, &mut *reader)?;
            println!("sector size:  {}", info.sector_size);
            println!("sectors:      {}", info.sectors);
            println!("capacity:     {}", info.capacity());
            println!("stored bytes: {}", info.stored_bytes);
            Ok(())
        }
        Commands::Passwd {
            file,
            new_passphrase_file,
        } => {
            let mut new_reader: Box<dyn PassphraseReader> = match new_passphrase_file {
                Some(path) => Box::new(ReaderPassphraseReader::new(Box::new(open_input(&path)?))),
                None => Box::new(TerminalPassphraseReader::new_passphrase()),
            };
            commands::passwd(&file, &options, &mut *reader, &mut *new_reader)
        }
        Commands::Shred { file } => commands::shred(&file, &options, &mut *reader),
    }
}

fn open_input(path: &Path) -> encfile::Result<File> {
    File::open(path).map_err(|e| {
        let category = if e.kind() == io::ErrorKind::NotFound {
            ErrorCategory::User
        } else {
            ErrorCategory::Internal
        };
        EncFileError::with_kind_and_source(
            category,
            ErrorKind::Io,
            format!("failed to read from {}", path.display()),
            e,
        )
    })
}

fn get_passphrase_reader(use_stdin: bool) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(io::stdin())))
    } else {
        Box::new(TerminalPassphraseReader::new())
    }
}
