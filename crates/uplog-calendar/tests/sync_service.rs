#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uplog_auth::{AuthError, Authenticator, PendingAuthorization, TokenSet, TokenStore};
use uplog_calendar::{
    sync_schedule, Event, MemoryCalendar, MemoryConnector, ScheduleEntry, ServiceOptions,
    SyncError, SyncService,
};

/// Issues `state-N`/`verifier-N` pairs and accepts any code except `bad`.
#[derive(Default)]
struct FakeAuthenticator {
    issued: AtomicUsize,
    exchanges: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Authenticator for FakeAuthenticator {
    fn begin_authorization(&self) -> Result<PendingAuthorization, AuthError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PendingAuthorization {
            url: format!("https://accounts.example.com/auth?state=state-{}", n),
            state: format!("state-{}", n),
            verifier: format!("verifier-{}", n),
        })
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<TokenSet, AuthError> {
        self.exchanges
            .lock()
            .push((code.to_string(), verifier.to_string()));
        if code == "bad" {
            return Err(AuthError::TokenExchange("invalid_grant".to_string()));
        }
        Ok(token(&format!("access-{}", code)))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, AuthError> {
        Err(AuthError::TokenRefresh("not supported".to_string()))
    }
}

fn token(access: &str) -> TokenSet {
    TokenSet {
        access_token: access.to_string(),
        refresh_token: Some("refresh".to_string()),
        expires_at: Utc::now().timestamp() + 3600,
        scopes: vec![],
    }
}

struct Harness {
    service: SyncService,
    calendar: Arc<MemoryCalendar>,
    auth: Arc<FakeAuthenticator>,
    store: TokenStore,
    _dir: TempDir,
}

async fn harness_with(
    options: ServiceOptions,
    cancel: CancellationToken,
    persisted: Option<TokenSet>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = TokenStore::new(dir.path().join("secrets").join("oauth_token.json"));
    if let Some(token) = persisted {
        store.save(&token).unwrap();
    }

    let calendar = Arc::new(MemoryCalendar::new());
    let auth = Arc::new(FakeAuthenticator::default());
    let service = SyncService::builder(Arc::new(MemoryConnector::new(calendar.clone())))
        .authenticator(auth.clone())
        .token_store(store.clone())
        .options(options)
        .cancellation(cancel)
        .start()
        .await;

    Harness {
        service,
        calendar,
        auth,
        store,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    harness_with(ServiceOptions::default(), CancellationToken::new(), None).await
}

async fn ready_harness() -> Harness {
    let h = harness().await;
    h.service.init_with_token(token("t")).await.unwrap();
    h
}

fn summaries(calendar: &MemoryCalendar) -> Vec<(String, String)> {
    let mut events: Vec<_> = calendar
        .events()
        .into_iter()
        .map(|e| (e.event.iso_date, e.event.summary))
        .collect();
    events.sort();
    events
}

#[tokio::test]
async fn test_handshake_initializes_and_persists_token() {
    let h = harness().await;
    assert!(h.service.initializable());
    assert!(!h.service.initialized());

    let url = h.service.auth_code_url().unwrap();
    assert!(url.contains("state-1"));

    h.service.init("code", "state-1").await.unwrap();

    assert!(h.service.initialized());
    assert_eq!(
        *h.auth.exchanges.lock(),
        vec![("code".to_string(), "verifier-1".to_string())]
    );
    assert_eq!(h.store.load().unwrap().access_token, "access-code");
}

#[tokio::test]
async fn test_any_open_session_can_complete() {
    let h = harness().await;
    let first = h.service.auth_code_url().unwrap();
    let second = h.service.auth_code_url().unwrap();
    assert_ne!(first, second);

    h.service.init("code", "state-2").await.unwrap();

    assert!(h.service.initialized());
    assert_eq!(h.auth.exchanges.lock()[0].1, "verifier-2");

    // The other session is gone with the handshake.
    h.service.init("code", "state-1").await.unwrap();
    assert_eq!(h.auth.exchanges.lock().len(), 1);
}

#[tokio::test]
async fn test_unknown_state_is_rejected() {
    let h = harness().await;
    h.service.auth_code_url().unwrap();

    let err = h.service.init("code", "forged").await.unwrap_err();

    assert!(matches!(err, SyncError::NoVerifierForState(ref s) if s == "forged"));
    assert!(!h.service.initialized());
    assert!(h.auth.exchanges.lock().is_empty());
}

#[tokio::test]
async fn test_failed_exchange_leaves_service_uninitialized() {
    let h = harness().await;
    h.service.auth_code_url().unwrap();

    let err = h.service.init("bad", "state-1").await.unwrap_err();
    assert!(matches!(err, SyncError::TokenExchangeFailed(_)));
    assert!(!h.service.initialized());
    assert!(h.store.load().is_err());

    // The session survives a failed exchange.
    h.service.init("good", "state-1").await.unwrap();
    assert!(h.service.initialized());
}

#[tokio::test]
async fn test_handshake_is_closed_after_initialization() {
    let h = harness().await;
    h.service.auth_code_url().unwrap();
    h.service.init("code", "state-1").await.unwrap();

    assert!(matches!(
        h.service.auth_code_url(),
        Err(SyncError::AlreadyInitialized)
    ));

    // Initializing again is a no-op, even with a stale state.
    h.service.init("code", "state-1").await.unwrap();
    h.service.init("code", "anything").await.unwrap();
    assert_eq!(h.auth.exchanges.lock().len(), 1);
}

#[tokio::test]
async fn test_concurrent_inits_both_succeed() {
    let h = harness().await;
    h.service.auth_code_url().unwrap();
    h.service.auth_code_url().unwrap();

    let (a, b) = tokio::join!(
        h.service.init("one", "state-1"),
        h.service.init("two", "state-2")
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert!(h.service.initialized());
}

#[tokio::test]
async fn test_commands_require_initialization() {
    let h = harness().await;

    assert!(matches!(
        h.service.sync(Event::new("Legs", "2024-02-01", "")).await,
        Err(SyncError::NotInitialized)
    ));
    assert!(matches!(
        h.service.delete_after(Utc::now()).await,
        Err(SyncError::NotInitialized)
    ));
}

#[tokio::test]
async fn test_persisted_token_initializes_at_startup() {
    let h = harness_with(
        ServiceOptions::default(),
        CancellationToken::new(),
        Some(token("stored")),
    )
    .await;

    assert!(h.service.initialized());
    assert!(matches!(
        h.service.auth_code_url(),
        Err(SyncError::AlreadyInitialized)
    ));
}

#[tokio::test]
async fn test_unusable_persisted_token_is_ignored() {
    let h = harness_with(
        ServiceOptions::default(),
        CancellationToken::new(),
        Some(token("")),
    )
    .await;

    assert!(!h.service.initialized());
    assert!(h.service.auth_code_url().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_rapid_syncs_coalesce_and_close_flushes() {
    let h = ready_harness().await;
    let start = tokio::time::Instant::now();

    for summary in ["A", "B", "C"] {
        h.service
            .sync(Event::new(summary, "2024-02-01", "notes"))
            .await
            .unwrap();
    }
    h.service.sync(Event::new("Pull", "2024-02-02", "")).await.unwrap();
    h.service.close().await;

    assert!(start.elapsed() >= Duration::from_secs(5));
    assert_eq!(h.calendar.calls().list, 2);
    assert_eq!(h.calendar.calls().insert, 2);
    assert_eq!(
        summaries(&h.calendar),
        vec![
            ("2024-02-01".to_string(), "C".to_string()),
            ("2024-02-02".to_string(), "Pull".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_identical_event_is_left_alone() {
    let h = ready_harness().await;
    h.calendar.seed(Event::new("Legs", "2024-02-01", "notes"));

    h.service
        .sync(Event::new("Legs", "2024-02-01", "notes"))
        .await
        .unwrap();
    h.service.close().await;

    let calls = h.calendar.calls();
    assert_eq!((calls.list, calls.insert, calls.delete), (1, 0, 0));
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent_and_final() {
    let h = ready_harness().await;
    h.service.sync(Event::new("Legs", "2024-02-01", "")).await.unwrap();

    h.service.close().await;
    h.service.close().await;

    assert!(!h.service.initialized());
    assert!(matches!(
        h.service.sync(Event::new("Legs", "2024-02-02", "")).await,
        Err(SyncError::Closed)
    ));
    assert!(matches!(
        h.service.delete_after(Utc::now()).await,
        Err(SyncError::Closed)
    ));
    assert!(matches!(
        h.service.init("code", "state-1").await,
        Err(SyncError::Closed)
    ));
    assert_eq!(h.calendar.calls().insert, 1);
}

#[tokio::test]
async fn test_close_before_initialization() {
    let h = harness().await;
    h.service.close().await;

    assert!(matches!(
        h.service.init_with_token(token("t")).await,
        Err(SyncError::Closed)
    ));
    assert!(!h.service.initialized());
}

#[tokio::test(start_paused = true)]
async fn test_deletion_runs_when_dequeued() {
    let h = ready_harness().await;
    h.calendar.seed(Event::new("Old", "2024-03-10", ""));

    h.service.sync(Event::new("Legs", "2024-02-01", "")).await.unwrap();
    h.service
        .delete_after(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        .await
        .unwrap();
    h.service.close().await;

    assert_eq!(
        summaries(&h.calendar),
        vec![("2024-02-01".to_string(), "Legs".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_applies_back_pressure_without_dropping() {
    let h = harness_with(
        ServiceOptions {
            queue_capacity: 1,
            ..ServiceOptions::default()
        },
        CancellationToken::new(),
        None,
    )
    .await;
    h.service.init_with_token(token("t")).await.unwrap();
    h.calendar.set_latency(Duration::from_secs(10));
    let start = tokio::time::Instant::now();

    for _ in 0..4 {
        h.service.delete_after(Utc::now()).await.unwrap();
    }

    assert!(start.elapsed() >= Duration::from_secs(10));
    h.service.close().await;
    assert_eq!(h.calendar.calls().list, 4);
}

#[tokio::test(start_paused = true)]
async fn test_failures_do_not_stop_the_worker() {
    let h = ready_harness().await;
    let stuck = h.calendar.seed(Event::new("Stuck", "2024-03-10", ""));
    h.calendar.fail_delete(stuck);

    h.service
        .delete_after(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        .await
        .unwrap();
    h.service.sync(Event::new("Legs", "not-a-date", "")).await.unwrap();
    h.service.sync(Event::new("Push", "2024-02-01", "")).await.unwrap();
    h.service.close().await;

    assert_eq!(
        summaries(&h.calendar),
        vec![
            ("2024-02-01".to_string(), "Push".to_string()),
            ("2024-03-10".to_string(), "Stuck".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_cuts_debounce_short() {
    let cancel = CancellationToken::new();
    let h = harness_with(ServiceOptions::default(), cancel.clone(), None).await;
    h.service.init_with_token(token("t")).await.unwrap();
    let start = tokio::time::Instant::now();

    h.service.sync(Event::new("Legs", "2024-02-01", "")).await.unwrap();
    cancel.cancel();
    h.service.close().await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(h.calendar.calls().insert, 1);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_sync_clears_events_past_the_schedule() {
    let h = ready_harness().await;
    h.calendar.seed(Event::new("Edge", "2024-02-04", ""));
    h.calendar.seed(Event::new("Old", "2024-02-10", ""));
    h.calendar.seed(Event::new("Legs", "2024-02-01", "from schedule"));

    let entries = vec![
        ScheduleEntry {
            date: "2024-02-01".into(),
            workout: Some("Legs".into()),
        },
        ScheduleEntry {
            date: "2024-02-02".into(),
            workout: None,
        },
        ScheduleEntry {
            date: "2024-02-03".into(),
            workout: Some("Push".into()),
        },
    ];

    let queued = sync_schedule(&h.service, &entries, "from schedule")
        .await
        .unwrap();
    h.service.close().await;

    assert_eq!(queued, 2);
    assert_eq!(h.calendar.calls().insert, 1);
    assert_eq!(
        summaries(&h.calendar),
        vec![
            ("2024-02-01".to_string(), "Legs".to_string()),
            ("2024-02-03".to_string(), "Push".to_string()),
            ("2024-02-04".to_string(), "Edge".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_schedule_sync_skips_uninitialized_service() {
    let h = harness().await;
    let entries = vec![ScheduleEntry {
        date: "2024-02-01".into(),
        workout: Some("Legs".into()),
    }];

    assert_eq!(sync_schedule(&h.service, &entries, "").await.unwrap(), 0);
}
