use std::{future::Future, time::Duration};

use crate::error::Result;

/// Waits for `signal` to yield a value, or until `timeout` passes.
///
/// Whatever produces the value keeps running after a timeout; only the
/// caller stops waiting for it.
///
/// # Errors
///
/// Returns a [`ShutdownTimeout`](crate::error::ErrorKind::ShutdownTimeout)
/// error when `timeout` passes first.
///
/// # Examples
///
/// ```rust
/// # use std::time::Duration;
/// # use audictl::util::wait_bounded;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> audictl::error::Result<()> {
/// let (tx, rx) = tokio::sync::oneshot::channel();
/// tx.send(42).unwrap();
/// assert_eq!(wait_bounded(rx, Duration::from_secs(1)).await?, Ok(42));
/// # Ok(())
/// # }
/// ```
pub async fn wait_bounded<F, T>(signal: F, timeout: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    Ok(tokio::time::timeout(timeout, signal).await?)
}
