//! CLI subcommands.

pub mod check;
pub mod down;
pub mod forward;
pub mod status;
pub mod switch_mode;
pub mod traffic;
pub mod up;

use std::time::Duration;

use tokio::signal;
use tracing::info;

use crate::portforward::ForwardSupervisor;
use crate::ui;

/// How often held port-forwards are checked for exited processes.
const REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        () = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

/// Keep the supervisor's tunnels open until interrupted or until all of them exit.
pub async fn hold_forwards(supervisor: &mut ForwardSupervisor<'_>) {
    ui::print_info("Port-forwards running. Press Ctrl+C to stop.");
    let mut ticker = tokio::time::interval(REAP_INTERVAL);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => {
                for port in supervisor.reap() {
                    ui::print_warning(&format!("Port-forward on localhost:{port} exited"));
                }
                if supervisor.is_empty() {
                    ui::print_warning("All port-forwards have exited");
                    break;
                }
            }
        }
    }

    let stopped = supervisor.stop_all();
    println!();
    ui::print_info(&format!("Stopped {stopped} port-forward(s)"));
}
