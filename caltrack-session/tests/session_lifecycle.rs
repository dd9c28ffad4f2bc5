//! End-to-end session scenarios under simulated time

mod common;

use caltrack_core::CaltrackConfig;
use caltrack_session::{AccessDecision, KeyValueStore, Navigator, PageExit, PageLoad, Redirect, Role, UnloadAction};
use common::{issue_token, TestSession};

const HOUR: i64 = 3_600_000;

#[tokio::test]
async fn dashboard_access_across_token_lifetime() {
    let t = TestSession::new(CaltrackConfig::default());
    t.session.set_token(&issue_token(Some("ROLE_USER"))).unwrap();

    t.clock.advance(HOUR);
    assert!(t.session.is_authorized(None).allowed);

    t.clock.advance(1);
    assert_eq!(
        t.session.is_authorized(None),
        AccessDecision::deny(Redirect::Login)
    );
    assert_eq!(t.durable.get("jwtToken").unwrap(), None);
}

#[tokio::test]
async fn role_gates_follow_token_claims() {
    let t = TestSession::new(CaltrackConfig::default());

    t.session.set_token(&issue_token(Some("ROLE_ADMIN"))).unwrap();
    assert!(t.session.is_authorized(Some(&Role::Admin)).allowed);
    assert_eq!(
        t.session.is_authorized(Some(&Role::User)),
        AccessDecision::deny(Redirect::Unauthorized)
    );

    t.session.set_token(&issue_token(None)).unwrap();
    assert!(t.session.is_authorized(None).allowed);
    assert_eq!(
        t.session.is_authorized(Some(&Role::Admin)),
        AccessDecision::deny(Redirect::Unauthorized)
    );
}

#[tokio::test(start_paused = true)]
async fn failures_within_threshold_keep_session() {
    let t = TestSession::new(CaltrackConfig::default());
    t.session.set_token("abc").unwrap();

    t.backend.set_healthy(false);
    t.advance(5_000).await;
    t.advance(5_000).await;
    assert!(t.backend.calls() >= 2);
    assert_eq!(t.session.get_token().as_deref(), Some("abc"));

    // recovery restarts the staleness window
    t.backend.set_healthy(true);
    t.advance(5_000).await;
    t.backend.set_healthy(false);
    t.advance(5_000).await;
    t.advance(5_000).await;

    assert_eq!(t.session.get_token().as_deref(), Some("abc"));
    assert_eq!(t.navigator.redirect_count(), 0);
    assert!(t.session.is_monitoring());
}

#[tokio::test(start_paused = true)]
async fn sustained_outage_forces_single_logout() {
    let t = TestSession::new(CaltrackConfig::default());
    t.session.set_token("abc").unwrap();

    t.frontend.set_healthy(false);
    t.advance(5_000).await;
    t.advance(5_000).await;
    assert_eq!(t.session.get_token().as_deref(), Some("abc"));

    t.advance(5_000).await;
    assert_eq!(t.session.get_token(), None);
    assert_eq!(t.navigator.history(), vec!["/dashboard", "/login"]);
    assert!(!t.session.is_monitoring());

    // no further checks once the monitor is cancelled
    let calls = t.frontend.calls();
    t.advance(30_000).await;
    assert_eq!(t.frontend.calls(), calls);
    assert_eq!(t.navigator.redirect_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_forced_logouts_redirect_once() {
    let t = TestSession::new(CaltrackConfig::default());
    t.session.set_token("abc").unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let session = t.session.clone();
        tasks.push(tokio::spawn(async move { session.force_logout() }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(t.session.get_token(), None);
    assert_eq!(t.navigator.redirect_count(), 1);
}

fn assert_not_earlier(t: &TestSession, previous: i64) -> i64 {
    let seen = t.session.last_successful_check_at().unwrap();
    assert!(seen >= previous, "last success moved back from {} to {}", previous, seen);
    seen
}

#[tokio::test(start_paused = true)]
async fn overlapping_slow_checks_log_out_once() {
    let t = TestSession::new(CaltrackConfig::default());
    // each check outlives the 5s poll interval, so consecutive checks overlap
    t.backend.set_delay(7_000);
    t.frontend.set_delay(7_000);
    t.session.set_token("abc").unwrap();

    let mut last_success = t.session.last_successful_check_at().unwrap();
    for _ in 0..20 {
        t.advance(1_000).await;
        last_success = assert_not_earlier(&t, last_success);
    }
    assert!(last_success > common::START);
    assert_eq!(t.session.get_token().as_deref(), Some("abc"));

    t.backend.set_healthy(false);
    t.frontend.set_healthy(false);
    for _ in 0..40 {
        t.advance(1_000).await;
        last_success = assert_not_earlier(&t, last_success);
    }

    assert_eq!(t.session.get_token(), None);
    assert!(!t.session.is_monitoring());
    assert_eq!(t.navigator.history(), vec!["/dashboard", "/login"]);
}

#[tokio::test(start_paused = true)]
async fn logout_then_login_restarts_liveness_window() {
    let t = TestSession::new(CaltrackConfig::default());
    t.session.set_token("first").unwrap();
    t.backend.set_healthy(false);
    t.advance(5_000).await;

    t.session.clear_token();
    assert!(!t.session.is_monitoring());

    t.advance(60_000).await;
    t.session.set_token("second").unwrap();
    assert!(t.session.is_monitoring());

    // the outage before login does not count against the new session
    t.advance(5_000).await;
    assert_eq!(t.session.get_token().as_deref(), Some("second"));
    assert_eq!(t.navigator.redirect_count(), 0);
}

#[tokio::test]
async fn forced_logout_on_login_page_stays_put() {
    let t = TestSession::new(CaltrackConfig::default());
    t.navigator.navigate("/login");
    t.session.set_token("abc").unwrap();

    t.session.force_logout();
    assert_eq!(t.navigator.current_path(), "/login");
    assert_eq!(t.navigator.redirect_count(), 1);
}

#[tokio::test]
async fn refresh_keeps_session_and_close_drops_it() {
    let t = TestSession::new(CaltrackConfig::default());
    t.session.bootstrap(PageLoad::Navigate);
    t.session.set_token("abc").unwrap();

    // refresh: exit followed by a fresh load
    assert_eq!(t.session.handle_unload(PageExit::Unknown), UnloadAction::Preserve);
    t.session.bootstrap(PageLoad::Reload);
    assert_eq!(t.session.get_token().as_deref(), Some("abc"));
    assert!(t.session.is_monitoring());

    // the next exit consumes the flag set by the reload
    assert_eq!(t.session.handle_unload(PageExit::Close), UnloadAction::Preserve);
    assert_eq!(
        t.session.handle_unload(PageExit::Close),
        UnloadAction::ClearSession
    );
    assert_eq!(t.session.get_token(), None);
    assert!(!t.session.is_monitoring());
}

#[tokio::test]
async fn landing_page_link_survives_unload() {
    let t = TestSession::new(CaltrackConfig::default());
    t.session.set_token("abc").unwrap();

    t.session.mark_navigating_to_landing_page();
    assert_eq!(t.session.handle_unload(PageExit::Close), UnloadAction::Preserve);
    assert_eq!(t.session.get_token().as_deref(), Some("abc"));
    t.session.reset_navigating_flag();
}

#[tokio::test]
async fn corrupt_storage_entry_reads_as_signed_out() {
    let t = TestSession::new(CaltrackConfig::default());
    t.durable.set("jwtToken", "{not json").unwrap();

    assert!(!t.session.check_token_validity());
    assert_eq!(t.durable.get("jwtToken").unwrap(), None);
    assert!(t.session.public_route_decision().allowed);
}
