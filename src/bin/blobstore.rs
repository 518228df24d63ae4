//! Blobstore command-line tool
//!
//! Formats a device, lists its blobs, and creates or deletes blobs.

use anyhow::{bail, Context, Result};
use blobstore::{BlobId, BlobInfo, Blobstore, BlobstoreConfig, DeviceFile, Geometry};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "blobstore")]
#[command(about = "Blob storage on a raw block device")]
struct Args {
    /// Block device or image file (overrides the config file)
    #[arg(short = 'd', long)]
    device: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage the store
    Blobstore {
        #[command(subcommand)]
        action: StoreCommand,
    },

    /// Manage blobs
    Blob {
        #[command(subcommand)]
        action: BlobCommand,
    },
}

#[derive(Subcommand, Debug)]
enum StoreCommand {
    /// Format the device, discarding any existing blobs
    Create {
        /// Create (or resize) an image file of this many bytes first
        #[arg(long)]
        size: Option<u64>,
    },

    /// Print the geometry and every blob
    List {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BlobCommand {
    /// Create a blob of N clusters
    Create { n_clusters: u32 },

    /// Delete a blob (default: the most recently created)
    Delete {
        /// Header page of the blob to delete
        #[arg(short = 'p', long, value_parser = parse_page)]
        page: Option<u32>,
    },
}

#[derive(Serialize)]
struct Listing {
    page_size: u64,
    cluster_size: u64,
    metadata_size: u64,
    clusters: usize,
    geometry: Geometry,
    blobs: Vec<BlobInfo>,
}

/// Accept decimal or 0x-prefixed hex, as printed by `list`
fn parse_page(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("Invalid page index '{}': {}", s, e))
}

fn load_config(args: &Args) -> Result<BlobstoreConfig> {
    let mut config = match &args.config {
        Some(path) => BlobstoreConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => BlobstoreConfig::default(),
    };
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    Ok(config)
}

fn open_device(config: &BlobstoreConfig) -> Result<DeviceFile> {
    let device = DeviceFile::open(&config.device)
        .with_context(|| format!("Failed to open device {:?}", config.device))?;
    Ok(device.with_block_size(config.block_size))
}

fn open_store(config: &BlobstoreConfig) -> Result<Blobstore<DeviceFile>> {
    Blobstore::open(open_device(config)?)
        .with_context(|| format!("Failed to open blobstore on {:?}", config.device))
}

fn format_store(config: &BlobstoreConfig, size: Option<u64>) -> Result<()> {
    let device = match size {
        Some(size) => DeviceFile::create(&config.device, size)
            .with_context(|| format!("Failed to create image {:?}", config.device))?
            .with_block_size(config.block_size),
        None => open_device(config)?,
    };

    let store = Blobstore::init_with(device, config.format)
        .with_context(|| format!("Failed to format {:?}", config.device))?;
    println!(
        "blobstore created: {} clusters of {} bytes",
        store.cluster_count(),
        store.cluster_size()
    );
    store.deinit();
    Ok(())
}

fn list_store(config: &BlobstoreConfig, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let blobs = store.list()?;

    if json {
        let listing = Listing {
            page_size: store.page_size(),
            cluster_size: store.cluster_size(),
            metadata_size: store.metadata_size(),
            clusters: store.cluster_count(),
            geometry: store.geometry(),
            blobs,
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("page size:\t{:08x}", store.page_size());
    println!("cluster size:\t{:08x}", store.cluster_size());
    println!("metadata size:\t{:08x}", store.metadata_size());
    println!("clusters:\t{:08x}", store.cluster_count());
    for blob in blobs {
        println!(
            "{} {} {:#010x} {}%",
            blob.uuid.hyphenated(),
            blob.id,
            blob.n_clusters,
            blob.percent_filled
        );
    }
    Ok(())
}

fn create_blob(config: &BlobstoreConfig, n_clusters: u32) -> Result<()> {
    let mut store = open_store(config)?;
    let id = store
        .create_blob(n_clusters)
        .context("Failed to create blob")?;
    println!("blob created: {}", id);
    Ok(())
}

fn delete_blob(config: &BlobstoreConfig, page: Option<u32>) -> Result<()> {
    let mut store = open_store(config)?;
    let id = match page {
        Some(page) => BlobId::new(page),
        None => match store.head() {
            Some(id) => id,
            None => bail!("Blobstore is empty"),
        },
    };
    store
        .delete_blob(id)
        .with_context(|| format!("Failed to delete blob {}", id))?;
    println!("blob deleted: {}", id);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!("Using device {:?}", config.device);

    match args.command {
        Command::Blobstore { action } => match action {
            StoreCommand::Create { size } => format_store(&config, size),
            StoreCommand::List { json } => list_store(&config, json),
        },
        Command::Blob { action } => match action {
            BlobCommand::Create { n_clusters } => create_blob(&config, n_clusters),
            BlobCommand::Delete { page } => delete_blob(&config, page),
        },
    }
}
