//! Polling helpers.
//!
//! Replicas converge asynchronously, so assertions about them poll until a
//! condition holds or a deadline passes.

use kvclone_client::{CloneClient, SyncState};
use std::future::Future;
use std::time::Duration;

/// How long [`eventually`] waits by default.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Pause between polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` until it returns true.
///
/// # Panics
///
/// Panics if the condition does not hold within [`DEFAULT_WAIT`].
pub async fn eventually<F, Fut>(condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    eventually_within(DEFAULT_WAIT, condition).await;
}

/// Polls `condition` until it returns true or `limit` elapses.
///
/// # Panics
///
/// Panics if the condition does not hold within `limit`.
pub async fn eventually_within<F, Fut>(limit: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polling = async {
        while !condition().await {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    if tokio::time::timeout(limit, polling).await.is_err() {
        panic!("condition not met within {:?}", limit);
    }
}

/// Waits for `client` to reach `state`.
///
/// # Panics
///
/// Panics if the state is not reached within [`DEFAULT_WAIT`] or the client
/// stops.
pub async fn wait_for_state(client: &CloneClient, state: SyncState) {
    tokio::time::timeout(DEFAULT_WAIT, client.wait_for_state(state))
        .await
        .unwrap_or_else(|_| panic!("client did not reach {} within {:?}", state, DEFAULT_WAIT))
        .expect("Client stopped");
}

/// Waits until `client` holds `key` with `value`, or lacks it when `value`
/// is `None`.
///
/// # Panics
///
/// Panics if that does not happen within [`DEFAULT_WAIT`].
pub async fn wait_for_value(client: &CloneClient, key: &str, value: Option<&[u8]>) {
    eventually(|| async move {
        let current = client.get(key).await.expect("Client stopped");
        current.as_deref() == value
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn eventually_polls_until_true() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        eventually(|| async move { calls.fetch_add(1, Ordering::SeqCst) >= 3 }).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    #[should_panic(expected = "condition not met")]
    async fn eventually_panics_after_limit() {
        eventually_within(Duration::from_millis(50), || async { false }).await;
    }
}
