//! storage-service -- command-line front end for the GCS helpers.
//!
//! Each subcommand maps to one `ServiceAccountStorage` operation.  Exit
//! status is non-zero on any failure.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use storage_service::config::{load_config, LoggingConfig};
use storage_service::signing::{SignedUrlMethod, SignedUrlOptions};
use storage_service::storage::backend::Bucket;
use storage_service::ServiceAccountStorage;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "storage-service",
    version,
    about = "Google Cloud Storage helpers for a service account"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the service-account key file.
    #[arg(long, global = true)]
    credentials: Option<String>,

    /// Print Prometheus metrics to stderr before exiting.
    #[arg(long, global = true)]
    dump_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show bucket metadata.
    GetBucket { bucket: String },

    /// Create a bucket with server-side defaults.
    CreateBucket {
        bucket: String,
        #[arg(long, default_value = "US")]
        location: String,
    },

    /// Get a bucket, creating it with the configured settings if needed.
    EnsureBucket { bucket: String },

    /// Upload a local file; the object is named after the file.
    Upload { bucket: String, path: PathBuf },

    /// Download an object to a local file.
    Download {
        bucket: String,
        object: String,
        dest: PathBuf,
    },

    /// Delete an object.
    Delete { bucket: String, object: String },

    /// List objects.
    List {
        bucket: String,
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Generate a V4 signed URL.
    SignUrl {
        bucket: String,
        object: String,
        #[arg(long, default_value = "GET")]
        method: SignedUrlMethod,
        /// Lifetime in seconds; defaults to the configured expiry.
        #[arg(long)]
        expires_secs: Option<u64>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured level.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_bucket(bucket: &Bucket) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(bucket)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    if let Some(credentials) = cli.credentials {
        config.set_credentials_file(credentials)?;
    }

    init_tracing(&config.logging);
    storage_service::metrics::init_metrics();

    if let Some(ref path) = cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    let storage = ServiceAccountStorage::new(config)?;
    let outcome = run(&storage, cli.command).await;

    if cli.dump_metrics {
        eprint!("{}", storage_service::metrics::render());
    }
    outcome
}

async fn run(storage: &ServiceAccountStorage, command: Command) -> anyhow::Result<()> {
    match command {
        Command::GetBucket { bucket } => {
            print_bucket(&storage.get_bucket(&bucket).await?)?;
        }
        Command::CreateBucket { bucket, location } => {
            print_bucket(&storage.create_bucket(&bucket, &location).await?)?;
        }
        Command::EnsureBucket { bucket } => {
            print_bucket(&storage.get_or_create_bucket(&bucket).await?)?;
        }
        Command::Upload { bucket, path } => {
            let object = storage.upload_object(&bucket, &path).await?;
            println!("{}", object.name);
        }
        Command::Download {
            bucket,
            object,
            dest,
        } => {
            storage.download_file(&bucket, &object, &dest).await?;
        }
        Command::Delete { bucket, object } => {
            storage.delete_file(&bucket, &object).await?;
        }
        Command::List { bucket, prefix } => {
            for object in storage.list_objects(&bucket, prefix.as_deref()).await? {
                println!("{}\t{}", object.size, object.name);
            }
        }
        Command::SignUrl {
            bucket,
            object,
            method,
            expires_secs,
        } => {
            let expires = expires_secs.unwrap_or(storage.config().signed_url.expiry_secs);
            let options = SignedUrlOptions {
                method,
                expires: Duration::from_secs(expires),
            };
            println!("{}", storage.signed_url(&bucket, &object, &options)?);
        }
    }
    Ok(())
}
