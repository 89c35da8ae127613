// Copyright (c) 2024-present, blobsnap
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Command-line entry point (spec §6's CLI surface): `put`, `mount`,
//! `dump-kv`. Not part of the core library — a thin wiring layer over
//! [`blobsnap`]'s [`blob`](blobsnap::blob), [`kv`](blobsnap::kv) and
//! [`walker`](blobsnap::walker) modules.

use blobsnap::blob::{BlobStore, LocalBlobStore};
use blobsnap::kv::{EmbeddedKv, VersionedKv};
use blobsnap::walker::Walker;
use blobsnap::{snapshot, Error};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "snapctl", about = "Content-addressed snapshot engine", version)]
struct Cli {
    /// Root directory for the blob store.
    #[arg(long, global = true, default_value = "./blobsnap-data/blobs")]
    blob_store: PathBuf,

    /// Root directory for the versioned KV store.
    #[arg(long, global = true, default_value = "./blobsnap-data/kv")]
    kv_store: PathBuf,

    /// Hostname recorded on the snapshot; defaults to the machine's.
    #[arg(long, global = true)]
    hostname: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file or directory tree and record a snapshot.
    Put {
        /// Path to the file or directory to back up.
        path: PathBuf,
    },
    /// Mount a read-only view of every recorded snapshot.
    #[cfg(feature = "fuse")]
    Mount {
        /// Where to mount the snapshot filesystem.
        mountpoint: PathBuf,
    },
    /// Print every raw KV record, for diagnostics.
    DumpKv,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            eprintln!("snapctl: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let blob: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::open(cli.blob_store.clone())?);
    let kv: Arc<dyn VersionedKv> = Arc::new(EmbeddedKv::open(cli.kv_store.clone())?);

    match cli.command {
        Command::Put { path } => put(&blob, &kv, &path, cli.hostname.as_deref()),
        #[cfg(feature = "fuse")]
        Command::Mount { mountpoint } => mount(blob, kv, &mountpoint),
        Command::DumpKv => dump_kv(kv.as_ref()),
    }
}

fn hostname_or_default(explicit: Option<&str>) -> String {
    explicit.map(str::to_string).unwrap_or_else(|| {
        hostname_from_env().unwrap_or_else(|| "localhost".to_string())
    })
}

fn hostname_from_env() -> Option<String> {
    std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty())
}

fn put(blob: &Arc<dyn BlobStore>, kv: &Arc<dyn VersionedKv>, path: &std::path::Path, hostname: Option<&str>) -> Result<(), Error> {
    let hostname = hostname_or_default(hostname);
    let walker = Walker::new(Arc::clone(blob));

    let (meta, stats) = walker.put(path)?;
    log::info!(
        "uploaded {:?}: {} blobs ({} new), {} bytes ({} new)",
        path,
        stats.blobs_count,
        stats.blobs_uploaded,
        stats.size,
        stats.size_uploaded
    );

    let now = std::time::SystemTime::now().duration_since(std::time::SystemTime::UNIX_EPOCH).unwrap_or_default();
    #[allow(clippy::cast_possible_wrap)]
    let now_secs = now.as_secs() as i64;
    #[allow(clippy::cast_possible_wrap)]
    let now_nanos = now.as_nanos() as i64;

    let path_str = path.to_string_lossy();
    match snapshot::record_if_changed(kv.as_ref(), &path_str, &hostname, meta.hash(), now_secs, now_nanos, stats)? {
        Some(record) => println!("recorded snapshot {} at {}", record.snap_set_key, record.time),
        None => println!("no new bytes uploaded; no snapshot recorded"),
    }

    Ok(())
}

#[cfg(feature = "fuse")]
fn mount(blob: Arc<dyn BlobStore>, kv: Arc<dyn VersionedKv>, mountpoint: &std::path::Path) -> Result<(), Error> {
    let fs = blobsnap::fs::SnapshotFs::new(blob, kv);
    let options = blobsnap::fs::read_only_mount_options("blobsnap");
    log::info!("mounting at {}", mountpoint.display());
    fuser::mount2(fs, mountpoint, &options).map_err(Error::Io)
}

fn dump_kv(kv: &dyn VersionedKv) -> Result<(), Error> {
    for entry in kv.dump()? {
        println!("{} v{} ({} bytes)", entry.key, entry.version, entry.data.len());
    }
    Ok(())
}
