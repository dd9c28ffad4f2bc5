//! Shared fixtures for the session integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use caltrack_core::{CaltrackConfig, CaltrackError, CaltrackResult, ErrorContext, ManualClock};
use caltrack_session::{HistoryNavigator, MemoryStore, Probe, SessionManager};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

static TRACING: LazyLock<()> = LazyLock::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(std::io::sink)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    }
});

pub fn init_tracing() {
    LazyLock::force(&TRACING);
}

pub const START: i64 = 1_700_000_000_000;

/// Probe whose health the test flips
#[derive(Debug)]
pub struct ToggleProbe {
    name: &'static str,
    healthy: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
}

impl ToggleProbe {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            healthy: AtomicBool::new(true),
            delay_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make every probe take this long before answering
    pub fn set_delay(&self, millis: u64) {
        self.delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ToggleProbe {
    fn target(&self) -> &str {
        self.name
    }

    async fn probe(&self) -> CaltrackResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CaltrackError::Network {
                message: format!("{} unreachable", self.name),
                source: None,
                context: ErrorContext::new("test_probe"),
            })
        }
    }
}

/// A session wired to simulated time and in-memory collaborators
pub struct TestSession {
    pub clock: Arc<ManualClock>,
    pub durable: Arc<MemoryStore>,
    pub navigator: Arc<HistoryNavigator>,
    pub backend: Arc<ToggleProbe>,
    pub frontend: Arc<ToggleProbe>,
    pub session: SessionManager,
}

impl TestSession {
    pub fn new(config: CaltrackConfig) -> Self {
        init_tracing();

        let clock = Arc::new(ManualClock::new(START));
        let durable = Arc::new(MemoryStore::new());
        let navigator = Arc::new(HistoryNavigator::new("/dashboard"));
        let backend = ToggleProbe::new("backend");
        let frontend = ToggleProbe::new("frontend");

        let session = SessionManager::builder(config)
            .clock(clock.clone())
            .durable_store(durable.clone())
            .navigator(navigator.clone())
            .probes(backend.clone(), frontend.clone())
            .build()
            .expect("Failed to build session manager");

        Self {
            clock,
            durable,
            navigator,
            backend,
            frontend,
            session,
        }
    }

    /// Advance simulated wall time and tokio time together, then let spawned
    /// checks run to completion
    pub async fn advance(&self, millis: i64) {
        self.clock.advance(millis);
        tokio::time::sleep(Duration::from_millis(millis as u64)).await;
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }
}

#[derive(Serialize)]
struct TestClaims<'a> {
    sub: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(rename = "userId")]
    user_id: i64,
    iat: i64,
    exp: i64,
}

/// Token shaped like the backend's, signed with a key the client never sees
pub fn issue_token(role: Option<&str>) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = TestClaims {
        sub: "ana@example.com",
        role,
        user_id: 7,
        iat: now,
        exp: now + 24 * 3600,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(b"server-side-secret"),
    )
    .expect("Failed to encode test token")
}
