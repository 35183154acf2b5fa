//! Session behaviour against the scripted site.
//!
//! Timing-sensitive tests run on a paused clock: sleeps in the site and in
//! the rate-limit backoff complete instantly while still advancing time.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use webmount_kernel::session::testing::{BASE_URL, FakeSite, fake_session};
use webmount_kernel::session::{AuthState, HttpRequest, SessionError};

fn alice() -> FakeSite {
    let site = FakeSite::new("alice", "pw");
    site.protected_page("account", "points: 42");
    site.public_page("news", "headline");
    site
}

// ============================================================================
// Single-flight authentication
// ============================================================================

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_login() {
    let site = alice();
    site.set_delay(Some(Duration::from_millis(200)));
    let session = fake_session(&site);
    session.set_username("alice").await;
    session.set_password("pw").await;

    let results = join_all((0..8).map(|_| session.get("account", true))).await;

    assert_eq!(site.login_posts(), 1);
    for result in results {
        assert_eq!(result.unwrap().text(), "points: 42");
    }
    assert_eq!(session.auth_state(), AuthState::Authenticated);
    assert_eq!(session.login_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_failure() {
    let site = alice();
    site.set_delay(Some(Duration::from_millis(200)));
    let session = fake_session(&site);
    session.set_username("alice").await;
    session.set_password("wrong").await;

    let results = join_all((0..8).map(|_| session.get("account", true))).await;

    assert_eq!(site.login_posts(), 1);
    for result in results {
        assert!(matches!(result, Err(SessionError::AuthenticationFailed)));
    }
    assert_eq!(session.auth_state(), AuthState::Unknown);
    assert!(session.cookies().is_empty());
}

#[tokio::test(start_paused = true)]
async fn spawned_callers_share_one_login() {
    let site = alice();
    site.set_delay(Some(Duration::from_millis(100)));
    let session = fake_session(&site);
    session.set_username("alice").await;
    session.set_password("pw").await;

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.get("account", true).await })
        })
        .collect();
    for task in join_all(tasks).await {
        assert!(task.unwrap().is_ok());
    }
    assert_eq!(site.login_posts(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_login_does_not_wedge_session() {
    let site = alice();
    site.set_delay(Some(Duration::from_secs(1)));
    let session = fake_session(&site);
    session.set_username("alice").await;
    session.set_password("pw").await;

    // The page fetch takes 1s, the login another 1s: cancel mid-login.
    let cancelled = tokio::time::timeout(Duration::from_millis(1500), session.get("account", true)).await;
    assert!(cancelled.is_err());

    let response = tokio::time::timeout(Duration::from_secs(30), session.get("account", true))
        .await
        .expect("session wedged after cancellation")
        .unwrap();
    assert_eq!(response.text(), "points: 42");
}

// ============================================================================
// Credentials and cookies
// ============================================================================

#[tokio::test]
async fn username_change_forces_one_new_login() {
    let site = FakeSite::new("bob", "pw");
    site.protected_page("account", "points: 7");
    let session = fake_session(&site);
    session.set_username("bob").await;
    session.set_password("pw").await;
    session.get("account", true).await.unwrap();
    assert!(!session.cookies().is_empty());

    site.set_credentials("alice", "pw");
    assert!(session.set_username("alice").await);
    assert!(session.cookies().is_empty());
    assert_eq!(session.auth_state(), AuthState::Unknown);

    session.get("account", true).await.unwrap();
    assert_eq!(site.login_users(), vec!["bob", "alice"]);
}

#[tokio::test]
async fn unchanged_credentials_keep_session() {
    let site = alice();
    let session = fake_session(&site);
    session.set_username("alice").await;
    session.set_password("pw").await;
    session.authenticate().await.unwrap();

    assert!(!session.set_username("alice").await);
    assert!(!session.set_password("pw").await);
    assert!(!session.cookies().is_empty());
}

#[tokio::test]
async fn server_side_expiry_triggers_relogin() {
    let site = alice();
    let session = fake_session(&site);
    session.set_username("alice").await;
    session.set_password("pw").await;
    session.get("account", true).await.unwrap();

    site.expire_sessions();
    assert_eq!(session.get("account", true).await.unwrap().text(), "points: 42");
    assert_eq!(site.login_posts(), 2);
}

#[tokio::test]
async fn explicit_login_and_logout() {
    let site = alice();
    let session = fake_session(&site);
    session.set_username("alice").await;
    session.set_password("pw").await;

    session.authenticate().await.unwrap();
    assert_eq!(session.auth_state(), AuthState::Authenticated);
    assert_eq!(session.cookies().get("sid"), Some("1"));

    session.deauthenticate().await;
    assert_eq!(session.auth_state(), AuthState::Unknown);
    assert!(session.cookies().is_empty());
}

#[tokio::test]
async fn anonymous_requests_never_log_in() {
    let site = alice();
    let session = fake_session(&site);
    session.set_username("alice").await;
    session.set_password("pw").await;

    let response = session.get("news", false).await.unwrap();
    assert!(response.text().contains("headline"));
    let response = session.get("account", false).await.unwrap();
    assert!(!response.text().contains("points"));
    assert_eq!(site.login_posts(), 0);
}

#[tokio::test]
async fn login_transport_error_is_auth_failure() {
    let site = alice();
    let session = fake_session(&site);
    session.set_username("alice").await;
    session.set_password("pw").await;
    site.set_offline(true);

    assert!(matches!(session.authenticate().await, Err(SessionError::AuthenticationFailed)));
    assert!(matches!(session.get("account", true).await, Err(SessionError::Transport(_))));
}

// ============================================================================
// Redirects and rate limiting
// ============================================================================

#[tokio::test]
async fn redirects_followed_with_cookies() {
    let site = alice();
    site.redirect("old-news", "news", Some("seen=1; Path=/"));
    let session = fake_session(&site);

    let response = session.get("old-news", false).await.unwrap();
    assert_eq!(response.url, format!("{BASE_URL}news"));
    assert_eq!(response.history.len(), 1);
    assert_eq!(session.cookies().get("seen"), Some("1"));
}

#[tokio::test]
async fn redirect_loop_is_an_error() {
    let site = alice();
    site.redirect("a", "b", None).redirect("b", "a", None);
    let session = fake_session(&site);
    assert!(matches!(
        session.get("a", false).await,
        Err(SessionError::TooManyRedirects(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_twice_then_success() {
    let site = alice();
    site.rate_limit("news", 2);
    let session = fake_session(&site);

    let start = Instant::now();
    let response = session.get("news", false).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(response.status, 200);
    assert_eq!(site.hits("news"), 3);
    assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(20), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn rate_limit_budget_exhausted_returns_last_response() {
    let site = alice();
    site.rate_limit("news", 5);
    let session = fake_session(&site);

    let response = session.get("news", false).await.unwrap();
    assert_eq!(response.status, 403);
    assert_eq!(site.hits("news"), 3);
}

#[tokio::test]
async fn post_form_reaches_site() {
    let site = alice();
    site.protected_page("vote", "merci");
    let session = fake_session(&site);
    session.set_username("alice").await;
    session.set_password("pw").await;

    let request = HttpRequest::post("vote").field("note", "7");
    let response = session.request(&request, true).await.unwrap();
    assert_eq!(response.text(), "merci");
    assert_eq!(site.hits("vote"), 2);
}
