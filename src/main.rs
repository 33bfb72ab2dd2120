//! memvaultd — in-memory key-value cache server speaking the memcached
//! text and binary wire protocols.
//!
//! Wires the ambient stack (A1-A4) around the partitioned table core: load
//! config, initialize logging, build a [`Cache`] context, spawn the 1 Hz
//! expiration clock, the stride/evict maintenance loop, and the TCP accept
//! loop, then wait for `SIGINT`/`SIGTERM` to shut everything down.

use std::sync::Arc;

use clap::Parser;
use memvault::cache::Cache;
use memvault::config::Config;
use memvault::error::ServerError;
use memvault::server::{self, Server};

fn main() -> Result<(), ServerError> {
    let config = Config::parse().normalize()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.clone())).init();

    log::info!("memvault {} starting", memvault::VERSION);
    log::info!(
        "config: addr={} port={} nparts={} dispatch={:?} volume={} bytes",
        config.addr, config.port, config.nparts, config.dispatch_strategy, config.volume
    );

    let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).max(1);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_count)
        .enable_all()
        .build()
        .map_err(ServerError::Io)?;

    runtime.block_on(run(config, worker_count))
}

async fn run(config: Config, worker_count: usize) -> Result<(), ServerError> {
    // One extra registered epoch worker id for the maintenance task, which
    // runs `evict` outside of any connection's batch.
    let cache = Arc::new(Cache::new(config, worker_count + 1));
    let server = Server::bind(&cache).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let clock = cache.table.clock().clone();
    let clock_shutdown = shutdown_rx.clone();
    let clock_task = tokio::spawn(async move { clock.run(clock_shutdown).await });

    let maintenance_worker = cache.table.epoch().worker_id(worker_count);
    let maintenance_cache = cache.clone();
    let maintenance_shutdown = shutdown_rx.clone();
    let maintenance_task =
        tokio::spawn(async move { server::run_maintenance(maintenance_cache, maintenance_worker, maintenance_shutdown).await });

    let accept_task = tokio::spawn(server.run(cache.clone(), shutdown_rx));

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    let _ = accept_task.await;
    let _ = clock_task.await;
    let _ = maintenance_task.await;

    log::info!("memvault shut down cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            log::warn!("failed to install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
