//! CLI binary to run a MongoDB replica set locally.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod config;

use std::io;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use config::{Args, default_base_dir, resolve_mongod};
use mango_bootable::Bootable;
use mango_mongod::OutputMode;
use mango_replica_set::{ReplicaSet, ReplicaSetOptions, ShutdownGuard};
use tokio::task::JoinHandle;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable mongod binary
    #[error("mongod binary not found: {0}")]
    BinaryNotFound(String),

    /// No home directory to derive the default base directory from
    #[error("could not determine home directory, pass --base-dir")]
    HomeDirNotFound,

    /// Filesystem error
    #[error("{0}: {1}")]
    Io(&'static str, #[source] io::Error),

    /// Replica set error
    #[error(transparent)]
    ReplicaSet(#[from] mango_replica_set::Error),

    /// Signal handler could not be installed
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] io::Error),

    /// Signal task ended abnormally
    #[error("signal task failed: {0}")]
    SignalTask(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set tracing subscriber: {e}");
    }

    let base_dir = match args.base_dir.clone() {
        Some(dir) => dir,
        None => default_base_dir()?,
    };
    let executable = resolve_mongod(args.mongod.as_deref(), args.version.as_deref(), &base_dir)?;
    let data_dir = base_dir.join("data");

    if args.fresh {
        remove_data_dir(&data_dir).await?;
    }
    tokio::fs::create_dir_all(&data_dir)
        .await
        .map_err(|e| Error::Io("failed to create data directory", e))?;

    let mut options = ReplicaSetOptions::new(
        &executable,
        args.replica_set.as_str(),
        args.node_descriptors(&data_dir),
    );
    options.output = if args.forward_logs {
        OutputMode::Tracing
    } else {
        OutputMode::Inherit
    };
    options.settle_delay = args.settle_delay();

    let set = Arc::new(ReplicaSet::new(options)?);

    if args.fresh {
        set.purge().await?;
    }

    info!("using mongod at {}", executable.display());
    println!("connection string: {}", set.connection_string());
    println!("data: {}", data_dir.display());

    let guard = ShutdownGuard::new();

    let signals = tokio::spawn(listen_for_signals(set.clone(), guard.clone()));

    if let Err(e) = set.start().await {
        error!("failed to start replica set: {}", e);
        // a signal may have started the shutdown already
        guard.shutdown_and_wait(set.as_ref(), async {}).await;
        signals.abort();
        return Err(e.into());
    }

    run_until_shutdown(set.as_ref(), &guard, signals).await
}

/// Resolves once `target` has been stopped, either by a signal or because the
/// signal task ended and nothing else will ever stop it.
async fn run_until_shutdown<B>(
    target: &B,
    guard: &ShutdownGuard,
    signals: JoinHandle<io::Result<()>>,
) -> Result<(), Error>
where
    B: Bootable,
{
    tokio::select! {
        () = guard.wait() => Ok(()),
        result = signals => {
            guard.shutdown_and_wait(target, async {}).await;

            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Error::Signal(e)),
                Err(e) => Err(Error::SignalTask(e)),
            }
        }
    }
}

async fn remove_data_dir(data_dir: &Path) -> Result<(), Error> {
    info!("removing {}", data_dir.display());

    match tokio::fs::remove_dir_all(data_dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io("failed to remove data directory", e)),
    }
}

fn spawn_shutdown(set: &Arc<ReplicaSet>, guard: &ShutdownGuard, signal: &'static str) {
    info!("received {}", signal);

    let set = set.clone();
    let guard = guard.clone();
    tokio::spawn(async move {
        let ran = guard
            .shutdown(set.as_ref(), async {
                println!("stopping replica set...");
            })
            .await;

        if !ran {
            info!("shutdown already in progress");
        }
    });
}

#[cfg(unix)]
async fn listen_for_signals(set: Arc<ReplicaSet>, guard: ShutdownGuard) -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };

        spawn_shutdown(&set, &guard, name);
    }
}

#[cfg(not(unix))]
async fn listen_for_signals(set: Arc<ReplicaSet>, guard: ShutdownGuard) -> io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;

        spawn_shutdown(&set, &guard, "interrupt");
    }
}
