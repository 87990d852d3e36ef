//! Cancellable delays for the timer-driven state machines

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `true` when the full delay elapsed, `false` when cancelled.
/// An already-cancelled token returns immediately.
pub async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapses_when_not_cancelled() {
        let cancel = CancellationToken::new();
        assert!(sleep_or_cancel(&cancel, Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_early_on_cancel() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let started = tokio::time::Instant::now();

        let sleeper = tokio::spawn(async move { sleep_or_cancel(&child, Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert!(!sleeper.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn already_cancelled_token_wins() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!sleep_or_cancel(&cancel, Duration::ZERO).await);
    }
}
