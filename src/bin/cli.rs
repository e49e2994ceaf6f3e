//! Kinetic CLI Client
//!
//! Command-line interface for talking to a Kinetic device.

use std::process;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use kinetic::transfer::{store_files, TransferOptions};
use kinetic::{Completion, Entry, Session, SessionConfig, Status};
use tracing_subscriber::{fmt, EnvFilter};

/// Kinetic CLI
#[derive(Parser, Debug)]
#[command(name = "kinetic-cli")]
#[command(about = "CLI for Kinetic storage devices")]
#[command(version)]
struct Args {
    /// Device host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Device port
    #[arg(short, long, default_value = "8123")]
    port: u16,

    /// Cluster version the device is expected to be at
    #[arg(short, long, default_value = "0")]
    cluster_version: i64,

    /// Identity used to sign requests
    #[arg(short, long, default_value = "1")]
    identity: i64,

    /// HMAC key for the identity
    #[arg(short = 'k', long, default_value = "asdfasdf")]
    hmac_key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the device
    Noop,

    /// Store a value
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Delete a key, ignoring its version
    Del {
        /// The key to delete
        key: String,
    },

    /// Store files as series of overlapped chunk PUTs, one transfer per file
    StoreFile {
        /// Files to store
        #[arg(required = true)]
        paths: Vec<String>,

        /// Maximum chunks outstanding at once
        #[arg(short, long, default_value = "15")]
        window: usize,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kinetic=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let config = SessionConfig::builder()
        .host(&args.host)
        .port(args.port)
        .cluster_version(args.cluster_version)
        .identity(args.identity)
        .hmac_key(args.hmac_key.clone().into_bytes())
        .build();

    let session = Arc::new(Session::new(config));
    if let Err(e) = session.connect() {
        tracing::error!("Failed connecting to {}:{}: {}", args.host, args.port, e);
        process::exit(1);
    }

    let succeeded = match run(&session, args.command) {
        Ok(status) => {
            println!("{}", status);
            status.is_success()
        }
        Err(e) => {
            tracing::error!("Command failed: {}", e);
            false
        }
    };

    session.disconnect();
    process::exit(if succeeded { 0 } else { 1 });
}

fn run(session: &Arc<Session>, command: Commands) -> kinetic::Result<Status> {
    match command {
        Commands::Noop => session.noop_blocking().map(report),
        Commands::Put { key, value } => {
            let entry = Entry::new(key.into_bytes(), value.into_bytes())
                .force(true)
                .compute_tag(kinetic::Algorithm::Sha1)?;
            session.put_blocking(&entry).map(report)
        }
        Commands::Get { key } => {
            let completion = session.get_blocking(key.into_bytes())?;
            if let Some(entry) = completion.entry() {
                println!("{}", String::from_utf8_lossy(&entry.value));
            }
            Ok(report(completion))
        }
        Commands::Del { key } => {
            let entry = Entry::with_key(key.into_bytes()).force(true);
            session.delete_blocking(&entry).map(report)
        }
        Commands::StoreFile { paths, window } => {
            let prefix = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let options = TransferOptions {
                window,
                prefix: prefix.to_be_bytes().to_vec().into(),
                ..TransferOptions::default()
            };
            let outcomes = store_files(Arc::clone(session), &paths, options);

            let mut overall = Status::Success;
            for (path, outcome) in paths.iter().zip(outcomes) {
                let status = match outcome {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::error!("Failed storing {}: {}", path, e);
                        Status::ClientIoError
                    }
                };
                println!("{}: {}", path, status);
                if overall.is_success() && !status.is_success() {
                    overall = status;
                }
            }
            Ok(overall)
        }
    }
}

fn report(completion: Completion) -> Status {
    if let Some(message) = &completion.message {
        tracing::debug!("Device message: {}", message);
    }
    completion.status
}
