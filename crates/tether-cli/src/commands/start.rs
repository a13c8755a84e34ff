use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tether_config::{ConfigLoader, TetherConfig};
use tether_memory::SqliteMemory;
use tether_runtime::Runtime;
use tether_session::BrowserTransport;

pub(super) async fn cmd_start(
    config: TetherConfig,
    no_server: bool,
    config_loader: ConfigLoader,
) -> tether_core::Result<()> {
    println!("Tether v{}", env!("CARGO_PKG_VERSION"));
    println!("   Session: {} (cdp port {})", config.session.page_url_match, config.session.cdp_port);
    println!(
        "   Autonomy: {}",
        if config.autonomy.enabled { "on" } else { "off" }
    );

    // Kept alive for the lifetime of the runtime.
    let watcher = match config_loader.watch() {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(error = %e, "config file watcher disabled");
            None
        }
    };
    println!("   {}", reload_notice(watcher.is_some()));
    println!();

    if let Some(parent) = config.memory.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let memory = Arc::new(SqliteMemory::open(&config.memory.db_path)?);
    let transport = Arc::new(BrowserTransport::new(config.session.clone()));
    let runtime = Runtime::new(config.clone(), transport, memory)?;

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let server = if config.server.enabled && !no_server {
        let handle = runtime.handle();
        let server_config = config.server.clone();
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = tether_server::start_server(server_config, handle, cancel).await {
                error!(error = %e, "HTTP server failed");
            }
        }))
    } else {
        None
    };

    runtime.run(cancel.clone()).await;

    cancel.cancel();
    if let Some(server) = server {
        let _ = server.await;
    }
    info!("tether stopped");
    Ok(())
}

/// The runtime copies its settings at startup; the watcher only refreshes
/// what `tether config` would print.
fn reload_notice(watching: bool) -> &'static str {
    if watching {
        "Config file: watched (runtime settings apply after restart)"
    } else {
        "Config file: not watched (runtime settings apply after restart)"
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "failed to register SIGTERM handler");
                    let _ = signal::ctrl_c().await;
                    info!("received Ctrl+C, initiating shutdown");
                    token.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = signal::ctrl_c() => info!("received Ctrl+C, initiating shutdown"),
                _ = sigterm.recv() => info!("received SIGTERM, initiating shutdown"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = signal::ctrl_c().await;
            info!("received Ctrl+C, initiating shutdown");
        }
        token.cancel();
    });
}
