//! Process signals to cancellation.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `token` on SIGTERM or SIGINT (Ctrl-C elsewhere).
///
/// Runners observe the token before every network-visible action, hand their job
/// back with `paused:shutdown` and the claim loop drains.
pub fn install_shutdown_handler(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(err), _) | (_, Err(err)) => {
            error!(error = %err, "failed to install signal handlers, falling back to ctrl-c");
            ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received ctrl-c, shutting down"),
        Err(err) => {
            error!(error = %err, "ctrl-c handler failed, shutdown only via token");
            std::future::pending::<()>().await;
        }
    }
}
