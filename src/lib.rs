//! # mediadl
//!
//! Reliability layer for driving fetch jobs through an external
//! command-line tool (yt-dlp or compatible), tolerating network
//! flakiness, authentication expiry, and process crashes.
//!
//! ## Design Philosophy
//!
//! mediadl is designed to be:
//! - **Resilient** - Ordered strategy fallback under a shared circuit breaker
//! - **Crash-safe** - Debounced resume persistence survives restarts
//! - **Leak-free** - No child process outlives a job or the application
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use mediadl::{Config, FetchManager, FetchOptions, Mode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = FetchManager::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let id = manager
//!         .submit(
//!             "https://example.com/watch?v=abc123",
//!             Mode::Auto,
//!             FetchOptions::default(),
//!         )
//!         .await?;
//!     println!("submitted job {id}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Circuit breaker and strategy resolution
pub mod breaker;
/// Configuration types
pub mod config;
/// Credential (cookie) provisioning and refresh
pub mod credentials;
/// Error types
pub mod error;
/// Job execution and the fallback loop
pub mod executor;
/// Top-level fetch manager (composition root)
pub mod manager;
/// Child process lifecycle management
pub mod process;
/// Resumable-task persistence
pub mod resume;
/// Fetch strategies and the fallback chain
pub mod strategy;
/// External fetch tool adapter
pub mod tool;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use breaker::{BreakerState, CircuitBreaker, StrategyResolver};
pub use config::{
    BreakerConfig, Config, CredentialConfig, DownloadConfig, PersistenceConfig, RetryConfig,
    ToolConfig,
};
pub use credentials::{
    CredentialProvider, CredentialService, CredentialState, CredentialStatus,
    FileCredentialProvider,
};
pub use error::{CredentialError, Error, ErrorClass, JobError, ProcessError, Result};
pub use executor::{JobControl, JobExecutor};
pub use manager::FetchManager;
pub use process::{ProcessGroup, ProcessManager, ProcessRecord};
pub use resume::{ResumeRecord, ResumeStore};
pub use strategy::{RetryLimit, Strategy};
pub use tool::{ToolAdapter, ToolOutcome};
pub use types::{
    AttemptOutcome, AttemptRecord, Event, FetchOptions, Job, JobId, Mode, Status,
};

/// Helper function to run the manager with graceful signal handling.
///
/// Waits for a termination signal and then calls the manager's
/// `shutdown()` method, which pauses active jobs and terminates every
/// child process.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use mediadl::{Config, FetchManager, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let manager = FetchManager::new(Config::default()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(manager).await;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(manager: FetchManager) {
    wait_for_signal().await;
    manager.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
