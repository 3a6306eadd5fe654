//! SnapVault CLI - manage versioned dataset archives from the shell

use anyhow::Context;
use clap::{Parser, Subcommand};
use snapvault_core::{
    Archive, ArchiveError, CsvDocument, CsvWriter, Dataset, InputDescriptor, PersistentArchive,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

#[derive(Parser)]
#[command(name = "snapvault", version, about = "Versioned tabular dataset archives")]
struct Cli {
    /// Archive directory
    #[arg(short = 'C', long, default_value = ".snapvault", global = true)]
    archive: PathBuf,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new archive, optionally keyed and seeded from a file
    Create {
        /// Primary-key column names
        #[arg(short = 'k', long = "primary-key", value_delimiter = ',')]
        primary_key: Vec<String>,
        /// Delimited file committed as version 0 (required for keyed
        /// archives)
        file: Option<PathBuf>,
        /// Description of the initial snapshot
        #[arg(short = 'm', long)]
        message: Option<String>,
    },
    /// Commit a delimited file as the next version
    Commit {
        /// Delimited input file with a header line
        file: PathBuf,
        /// Description of the snapshot
        #[arg(short = 'm', long)]
        message: Option<String>,
    },
    /// Reconstruct a version as delimited text
    Checkout {
        /// Version to reconstruct
        version: u64,
        /// Output file; stdout if omitted
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// List all snapshots in the archive
    Log,
    /// Drop all versions after the given one; a negative version clears
    /// the archive
    Rollback {
        /// Last version to keep
        #[arg(allow_negative_numbers = true)]
        version: i64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            match err.downcast_ref::<ArchiveError>() {
                Some(e) if e.is_user_error() => ExitCode::from(2),
                Some(_) => ExitCode::from(1),
                // Bad paths and malformed arguments are user errors too.
                None if err.is::<std::io::Error>() => ExitCode::from(2),
                None => ExitCode::from(1),
            }
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Create {
            primary_key,
            file,
            message,
        } => create(cli, primary_key, file.as_deref(), message.clone()),
        Command::Commit { file, message } => {
            let archive = open_archive(cli)?;
            let mut doc = CsvDocument::open(file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let snapshot = archive.commit(&mut doc, descriptor(message.clone(), file))?;
            println!("committed version {}", snapshot.version);
            Ok(())
        }
        Command::Checkout { version, output } => {
            let archive = open_archive(cli)?;
            let dataset = archive.checkout(*version)?;
            match output {
                Some(path) => {
                    write_dataset(&dataset, CsvWriter::create(path)?)?;
                    println!("wrote version {} to {}", version, path.display());
                }
                None => print_dataset(&dataset),
            }
            Ok(())
        }
        Command::Log => {
            let archive = open_archive(cli)?;
            for snapshot in archive.snapshots().iter() {
                let description = snapshot.description.as_deref().unwrap_or("");
                println!(
                    "{:>8}  {}  {}",
                    snapshot.version,
                    snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
                    description
                );
            }
            Ok(())
        }
        Command::Rollback { version } => {
            let archive = open_archive(cli)?;
            if *version < 0 {
                archive.clear()?;
                println!("cleared archive");
            } else {
                archive.rollback(*version as u64)?;
                println!("rolled back to version {}", version);
            }
            Ok(())
        }
    }
}

fn create(
    cli: &Cli,
    primary_key: &[String],
    file: Option<&std::path::Path>,
    message: Option<String>,
) -> anyhow::Result<()> {
    if primary_key.is_empty() {
        let archive = Archive::create(&cli.archive)?;
        if let Some(path) = file {
            let mut doc = CsvDocument::open(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            archive.commit(&mut doc, descriptor(message, path))?;
        }
        println!("created archive at {}", cli.archive.display());
        return Ok(());
    }
    let path = file.ok_or_else(|| {
        anyhow::anyhow!("a keyed archive needs an initial file to establish the key columns")
    })?;
    let mut doc =
        CsvDocument::open(path).with_context(|| format!("cannot read {}", path.display()))?;
    let key: Vec<&str> = primary_key.iter().map(String::as_str).collect();
    Archive::create_keyed(&cli.archive, &mut doc, &key, descriptor(message, path))?;
    println!(
        "created archive at {} keyed by {}",
        cli.archive.display(),
        primary_key.join(",")
    );
    Ok(())
}

fn open_archive(cli: &Cli) -> anyhow::Result<PersistentArchive> {
    anyhow::ensure!(
        cli.archive.is_dir(),
        "no archive at {} (run `snapvault create` first)",
        cli.archive.display()
    );
    Ok(Archive::open(&cli.archive)?)
}

fn descriptor(message: Option<String>, source: &std::path::Path) -> InputDescriptor {
    InputDescriptor {
        description: message,
        action: None,
        source: Some(source.display().to_string()),
    }
}

fn write_dataset(dataset: &Dataset, mut writer: CsvWriter) -> anyhow::Result<()> {
    let header: Vec<&str> = dataset.columns.iter().map(|c| c.name.as_str()).collect();
    writer.write_record(&header)?;
    for row in &dataset.rows {
        let cells: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
        writer.write_record(&cells)?;
    }
    writer.close()?;
    Ok(())
}

fn print_dataset(dataset: &Dataset) {
    let header: Vec<&str> = dataset.columns.iter().map(|c| c.name.as_str()).collect();
    println!("{}", header.join(","));
    for row in &dataset.rows {
        let cells: Vec<String> = row.values.iter().map(|v| v.to_string()).collect();
        println!("{}", cells.join(","));
    }
}
