//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT, SIGTERM or SIGQUIT
//! - Report which one arrived so the binary can log it
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - The server core never subscribes to signals itself; the binary wires
//!   the first signal to `Server::shutdown`

use std::io;

/// Wait for the first stop signal and return its name.
#[cfg(unix)]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

/// Wait for the first stop signal and return its name.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
