//! Cooperative cancellation helpers around the `watch` shutdown signal.

use std::time::Duration;

use tokio::sync::watch;

pub fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Sleep for `duration` unless shutdown is signalled first.
///
/// Returns `true` when the caller should stop. A dropped sender counts as
/// shutdown.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if is_shutdown(shutdown) {
        return true;
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.wait_for(|stop| *stop) => true,
    }
}
