use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use encrypto_pack::{
    progress::ProgressTracker,
    task::{self, JobHandle},
    Config, DecryptJob, DecryptOptions, EncryptJob, EncryptOptions, Result,
};
use serde::Serialize;
use std::{fmt::Display, path::PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Password-based encryption for files and folders
#[derive(Parser)]
#[command(name = "encrypto-pack", version)]
#[command(about = "Pack files and folders into password-encrypted containers")]
struct Cli {
    /// Log job milestones (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by both commands
#[derive(Args)]
struct CommonArgs {
    /// Bytes per streaming chunk
    #[arg(long)]
    chunk_size: Option<usize>,
    /// Available memory in bytes, used to pick the chunk size
    #[arg(long)]
    available_memory: Option<u64>,
    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl CommonArgs {
    fn config(&self) -> Config {
        Config {
            show_progress: !self.no_progress,
            chunk_size: Config::resolve_chunk_size(self.chunk_size, self.available_memory),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file or folder into a .pack container
    Encrypt {
        /// File or folder to encrypt
        path: PathBuf,
        /// Password (will prompt twice if not provided)
        #[arg(short, long)]
        password: Option<String>,
        /// Keep the IV in a separate .ivkey file
        #[arg(long)]
        external_iv: bool,
        /// Write a .rkey recovery key file
        #[arg(long)]
        recovery_key: bool,
        /// Delete the sources once the container is written
        #[arg(long)]
        remove_sources: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Decrypt a .pack container (or a folder holding one)
    Decrypt {
        /// Container, or the folder it was created in
        path: PathBuf,
        /// Password (will prompt if neither it nor a recovery key file is given)
        #[arg(short, long)]
        password: Option<String>,
        /// Recovery key file to use instead of the password
        #[arg(long)]
        recovery_key_file: Option<PathBuf>,
        /// External IV key file
        #[arg(long)]
        iv_key_file: Option<PathBuf>,
        /// Delete the container once it is decrypted
        #[arg(long)]
        remove_sources: bool,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Encrypt {
            path,
            password,
            external_iv,
            recovery_key,
            remove_sources,
            common,
        } => {
            let config = common.config();
            let (password, confirm) = match password {
                Some(password) => (password.clone(), password),
                None => (
                    prompt("Enter password: ")?,
                    prompt("Confirm password: ")?,
                ),
            };

            let options = EncryptOptions::new()
                .with_external_iv_key(external_iv)
                .with_recovery_key(recovery_key)
                .with_remove_sources(remove_sources)
                .with_chunk_size(config.chunk_size);
            let job = EncryptJob::new(path, password, confirm, options);
            let label = job.path().display().to_string();

            let report = drive(task::spawn_encrypt(job), "Encrypting", &label, &config).await?;
            for failed in &report.failed_files {
                eprintln!("Warning: could not pack {}", failed.display());
            }
            print_report(&report, common.json)
        }
        Commands::Decrypt {
            path,
            password,
            recovery_key_file,
            iv_key_file,
            remove_sources,
            common,
        } => {
            let config = common.config();
            let options = DecryptOptions::new()
                .with_remove_sources(remove_sources)
                .with_chunk_size(config.chunk_size);

            let mut job = DecryptJob::new(path, options);
            job = match (recovery_key_file, password) {
                (Some(recovery), _) => job.with_recovery_key_file(recovery),
                (None, Some(password)) => job.with_password(password),
                (None, None) => job.with_password(prompt("Enter password: ")?),
            };
            if let Some(iv_key_file) = iv_key_file {
                job = job.with_iv_key_file(iv_key_file);
            }

            let label = job.path().display().to_string();

            let report = drive(task::spawn_decrypt(job), "Decrypting", &label, &config).await?;
            print_report(&report, common.json)
        }
    }
}

fn prompt(message: &str) -> Result<String> {
    rpassword::prompt_password(message).context("Failed to read password")
}

/// Feed the job's progress into a bar until it ends; Ctrl-C cancels it.
async fn drive<T>(
    handle: JobHandle<T>,
    operation: &str,
    label: &str,
    config: &Config,
) -> Result<T> {
    let tracker = if config.show_progress {
        ProgressTracker::new(operation)
    } else {
        ProgressTracker::hidden()
    };
    tracker.set_message(label);

    let cancel = handle.cancellation_token();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancelling...");
            cancel.cancel();
        }
    });

    let mut progress = handle.progress();
    while progress.changed().await.is_ok() {
        tracker.set_percent(*progress.borrow_and_update());
    }
    signal.abort();

    match handle.wait().await {
        Ok(report) => {
            tracker.finish("done");
            Ok(report)
        }
        Err(e) => {
            tracker.finish_and_clear();
            Err(e.into())
        }
    }
}

fn print_report<R: Serialize + Display>(report: &R, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}
