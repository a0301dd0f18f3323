//! Isolated execution of blocking network calls
//!
//! Probes and registration syncs triggered from request handlers must not
//! run on the API runtime. Each call gets its own single-threaded runtime on
//! a dedicated blocking thread; the runtime is dropped once the call
//! returns, whether it succeeded, failed or panicked.

use std::future::Future;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("failed to build isolated runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("isolated task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs the future produced by `make` to completion in a fresh runtime.
///
/// `make` is called on the blocking thread, so the future itself does not
/// need to be `Send`.
pub async fn run_isolated<F, Fut, T>(make: F) -> Result<T, IsolationError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T>,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let output = runtime.block_on(make());
        drop(runtime);
        Ok::<T, IsolationError>(output)
    });

    handle.await?
}
