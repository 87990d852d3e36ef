//! Session expiry watcher integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kiosk_bridge::config::SessionConfig;
use kiosk_bridge::session::{StaticTokenSource, TokenSource, WatchState};
use kiosk_bridge::{SessionSignal, TokenWatcher};

mod common;
use common::{NOW, settle, token_expiring_in};

/// Token source that counts reads
struct CountingSource {
    inner: StaticTokenSource,
    reads: AtomicUsize,
}

impl CountingSource {
    fn new(token: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            inner: StaticTokenSource::new(token),
            reads: AtomicUsize::new(0),
        })
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingSource {
    async fn token(&self) -> Option<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.token().await
    }
}

fn watcher(source: Arc<dyn TokenSource>, clock: &Arc<AtomicI64>) -> TokenWatcher {
    let clock = Arc::clone(clock);
    TokenWatcher::with_clock(
        source,
        SessionConfig::default(),
        Arc::new(move || clock.load(Ordering::SeqCst)),
    )
}

fn fixed_clock() -> Arc<AtomicI64> {
    Arc::new(AtomicI64::new(NOW))
}

#[tokio::test]
async fn test_expired_token_signals_once_and_stops() {
    let source = Arc::new(StaticTokenSource::new(Some(token_expiring_in(-5))));
    let watcher = watcher(source, &fixed_clock());
    let mut rx = watcher.subscribe();

    watcher.start_watching().await;

    assert_eq!(
        rx.try_recv().unwrap(),
        SessionSignal::Expired {
            message: "Your session has expired. Please sign in again.".into()
        }
    );
    assert!(rx.try_recv().is_err());
    assert_eq!(watcher.state(), WatchState::Expired);
    assert!(!watcher.is_watching());
}

#[tokio::test]
async fn test_warning_reports_rounded_minutes() {
    let source = Arc::new(StaticTokenSource::new(Some(token_expiring_in(89))));
    let watcher = watcher(source.clone(), &fixed_clock());

    watcher.start_watching().await;
    assert_eq!(watcher.state(), WatchState::Warning);

    let signal = watcher.check_now().await.unwrap();
    assert_eq!(
        signal,
        SessionSignal::Warning {
            minutes_remaining: 1,
            message: "Your session will expire soon".into()
        }
    );

    source.set(token_expiring_in(90));
    let Some(SessionSignal::Warning {
        minutes_remaining, ..
    }) = watcher.check_now().await
    else {
        panic!("expected a warning");
    };
    assert_eq!(minutes_remaining, 2);

    watcher.stop_watching();
}

#[tokio::test]
async fn test_healthy_token_emits_nothing() {
    let source = Arc::new(StaticTokenSource::new(Some(token_expiring_in(3600))));
    let watcher = watcher(source, &fixed_clock());
    let mut rx = watcher.subscribe();

    watcher.start_watching().await;

    assert!(rx.try_recv().is_err());
    assert_eq!(watcher.state(), WatchState::Watching);
    watcher.stop_watching();
    assert_eq!(watcher.state(), WatchState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_polls_every_interval() {
    let source = CountingSource::new(Some(token_expiring_in(3600)));
    let watcher = watcher(source.clone(), &fixed_clock());

    watcher.start_watching().await;
    assert_eq!(source.reads(), 1);

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(source.reads(), 1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(source.reads(), 2);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.reads(), 3);

    watcher.stop_watching();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(source.reads(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_restart_checks_immediately() {
    let source = CountingSource::new(Some(token_expiring_in(3600)));
    let watcher = watcher(source.clone(), &fixed_clock());

    watcher.start_watching().await;
    watcher.stop_watching();
    watcher.start_watching().await;
    assert_eq!(source.reads(), 2);

    // the replaced poll task no longer runs
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(source.reads(), 3);
    watcher.stop_watching();
}

#[tokio::test(start_paused = true)]
async fn test_clock_crossing_expiry_while_polling() {
    let clock = fixed_clock();
    let source = Arc::new(StaticTokenSource::new(Some(token_expiring_in(150))));
    let watcher = watcher(source, &clock);
    let mut rx = watcher.subscribe();

    watcher.start_watching().await;
    assert!(rx.try_recv().is_err());

    clock.store(NOW + 60, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(matches!(
        rx.try_recv().unwrap(),
        SessionSignal::Warning { minutes_remaining: 2, .. }
    ));

    clock.store(NOW + 151, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(matches!(rx.try_recv().unwrap(), SessionSignal::Expired { .. }));
    assert!(!watcher.is_watching());

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_logout_stops_watch() {
    let source = Arc::new(StaticTokenSource::new(Some(token_expiring_in(3600))));
    let watcher = watcher(source.clone(), &fixed_clock());

    watcher.start_watching().await;
    assert!(watcher.is_watching());

    source.clear();
    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;
    assert!(!watcher.is_watching());
    assert_eq!(watcher.state(), WatchState::Idle);
}

#[tokio::test]
async fn test_no_token_at_start_does_not_watch() {
    let source = Arc::new(StaticTokenSource::new(None));
    let watcher = watcher(source, &fixed_clock());

    watcher.start_watching().await;
    assert!(!watcher.is_watching());
    assert!(watcher.check_now().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_token_is_skipped() {
    let source = CountingSource::new(Some("not-a-jwt".into()));
    let watcher = watcher(source.clone(), &fixed_clock());
    let mut rx = watcher.subscribe();

    watcher.start_watching().await;
    assert!(watcher.is_watching());

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(source.reads(), 2);
    assert!(watcher.is_watching());
    assert!(rx.try_recv().is_err());

    source.inner.set(token_expiring_in(-1));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(matches!(rx.try_recv().unwrap(), SessionSignal::Expired { .. }));
}

#[tokio::test]
async fn test_token_info() {
    let source = Arc::new(StaticTokenSource::new(Some(token_expiring_in(600))));
    let watcher = watcher(source.clone(), &fixed_clock());

    let status = watcher.token_info().await;
    assert!(status.is_valid);
    assert_eq!(status.expires_in_minutes, Some(10));
    assert_eq!(status.expires_at.unwrap().timestamp(), NOW + 600);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["isValid"], true);
    assert_eq!(json["expiresInMinutes"], 10);

    source.set(token_expiring_in(-60));
    assert!(!watcher.token_info().await.is_valid);

    source.clear();
    let status = watcher.token_info().await;
    assert!(!status.is_valid);
    assert!(status.expires_at.is_none());
}

#[test]
fn test_signal_wire_format() {
    let warning = serde_json::to_value(SessionSignal::Warning {
        minutes_remaining: 2,
        message: "Your session will expire soon".into(),
    })
    .unwrap();
    assert_eq!(warning["kind"], "warning");
    assert_eq!(warning["expiresInMinutes"], 2);
}
