//! Integration tests for the resilient HTTP client against a mock site.

use std::time::{Duration, Instant};

use metascraper_core::http::{DenyReason, FetchOptions, ResilientClient};
use metascraper_core::{CrawlerError, EngineConfig, EngineEvent, ErrorKind, EventBus};
use wiremock::matchers::{header_exists, header_regex, method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

// ==================== Helper Functions ====================

/// Config with fast retries and no admission control.
fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.rate_limit.enabled = false;
    config.retry.max_attempts = 3;
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config.retry.max_jitter_ms = 0;
    config
}

fn client(config: &EngineConfig) -> ResilientClient {
    ResilientClient::from_config(config, EventBus::default()).unwrap()
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(body)
}

// ==================== Status Handling ====================

#[tokio::test]
async fn test_not_found_is_terminal_and_not_retried() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/v/IPX-999"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&test_config());
    let err = client
        .fetch(&format!("{}/v/IPX-999", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MovieNotFound);
}

#[tokio::test]
async fn test_server_error_is_retried_until_success() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/v/IPX-177"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v/IPX-177"))
        .respond_with(html("<html><h1>Summer Story</h1></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&test_config());
    let response = client
        .fetch(&format!("{}/v/IPX-177", server.uri()), &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert!(response.body.contains("Summer Story"));
}

#[tokio::test]
async fn test_server_error_gives_up_after_max_attempts() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let client = client(&test_config());
    let err = client
        .fetch(&format!("{}/v/IPX-177", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::WebsiteError);
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn test_retry_after_overrides_backoff() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(html("<html><h1>ok</h1></html>"))
        .mount(&server)
        .await;

    let client = client(&test_config());
    let started = Instant::now();
    client
        .fetch(&format!("{}/v/IPX-177", server.uri()), &FetchOptions::default())
        .await
        .unwrap();

    assert!(
        started.elapsed() >= Duration::from_millis(900),
        "Retry-After of one second should replace the 10ms backoff"
    );
}

// ==================== Anti-Automation ====================

#[tokio::test]
async fn test_challenge_page_is_blocked_without_retry() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(html(
            "<html><title>Just a moment...</title><div id='challenge-platform'></div></html>",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let events = EventBus::default();
    let mut receiver = events.subscribe();
    let client = ResilientClient::from_config(&test_config(), events).unwrap();
    let err = client
        .fetch(&format!("{}/v/IPX-177", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();

    let CrawlerError::SiteBlocked {
        status, confidence, ..
    } = &err
    else {
        panic!("expected SiteBlocked, got {err:?}");
    };
    assert_eq!(*status, 200);
    assert!(*confidence > 0.0);
    assert!(matches!(
        receiver.try_recv().unwrap(),
        EngineEvent::BlockDetected { .. }
    ));
    assert!(client.detector().detection_rate() > 0.0);
}

#[tokio::test]
async fn test_forbidden_with_firewall_header_reports_confidence() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("cf-mitigated", "challenge")
                .set_body_string("Attention Required! | Cloudflare"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&test_config());
    let err = client
        .fetch(&format!("{}/v/IPX-177", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();

    let CrawlerError::SiteBlocked { confidence, .. } = &err else {
        panic!("expected SiteBlocked, got {err:?}");
    };
    assert!(*confidence >= 0.8, "status, header and body signals should combine: {confidence}");
}

#[tokio::test]
async fn test_missing_expected_markers_is_blocked() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(html("<html><body>Welcome</body></html>"))
        .mount(&server)
        .await;

    let client = client(&test_config());
    let options = FetchOptions::default().with_markers(vec!["id=\"video_title\"".to_string()]);
    let err = client
        .fetch(&format!("{}/v/IPX-177", server.uri()), &options)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SiteBlocked);
}

#[tokio::test]
async fn test_blocked_exit_is_rotated_on_retry() {
    let Some(blocked_exit) = start_mock_server_or_skip().await else {
        return;
    };
    let Some(clean_exit) = start_mock_server_or_skip().await else {
        return;
    };
    // Both servers act as forward proxies and answer for the target host.
    Mock::given(method("GET"))
        .and(path("/v/IPX-177"))
        .respond_with(html(
            "<html><title>Just a moment...</title><div id='challenge-platform'></div></html>",
        ))
        .expect(1)
        .mount(&blocked_exit)
        .await;
    Mock::given(method("GET"))
        .and(path("/v/IPX-177"))
        .respond_with(html("<html><h1>Summer Story</h1></html>"))
        .expect(1)
        .mount(&clean_exit)
        .await;

    let blocked_id = blocked_exit.address().to_string();
    let clean_id = clean_exit.address().to_string();
    let mut config = test_config();
    config.proxy.enabled = true;
    config.proxy.failure_threshold = 3;
    // The region pins the first attempt to the blocked exit.
    config.proxy.prefer_region = Some("jp".to_string());
    config.proxy.entries = vec![format!("{blocked_id}@jp"), format!("{clean_id}@us")];
    let client = client(&config);

    let response = client
        .fetch("http://metascraper.test/v/IPX-177", &FetchOptions::default())
        .await
        .unwrap();
    assert!(response.body.contains("Summer Story"));
    assert_eq!(response.proxy.as_deref(), Some(clean_id.as_str()));

    let pool = client.proxy_manager().snapshot();
    let blocked = pool.iter().find(|e| e.id() == blocked_id).unwrap();
    let clean = pool.iter().find(|e| e.id() == clean_id).unwrap();
    assert_eq!(blocked.failure_count(), 1);
    assert!(!blocked.is_disabled());
    assert_eq!(clean.success_count(), 1);
}

// ==================== Request Shape ====================

#[tokio::test]
async fn test_requests_carry_browser_headers() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(header_regex("user-agent", "Mozilla/5.0"))
        .and(header_exists("accept-language"))
        .and(header_regex("accept", "application/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"title":"ok"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&test_config());
    let options = FetchOptions::default().with_accept("application/json");
    client
        .fetch(&format!("{}/api", server.uri()), &options)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_shift_jis_body_is_decoded() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode("<html><h1>夏の物語</h1></html>");
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=Shift_JIS")
                .set_body_bytes(encoded.into_owned()),
        )
        .mount(&server)
        .await;

    let client = client(&test_config());
    let response = client
        .fetch(&format!("{}/v/IPX-177", server.uri()), &FetchOptions::default())
        .await
        .unwrap();

    assert!(response.body.contains("夏の物語"));
    assert_eq!(response.charset, "Shift_JIS");
}

// ==================== Cache ====================

#[tokio::test]
async fn test_cache_serves_repeat_fetch() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(html("<html><h1>cached</h1></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&test_config());
    let url = format!("{}/v/IPX-177", server.uri());
    let first = client.fetch(&url, &FetchOptions::default()).await.unwrap();
    let second = client.fetch(&url, &FetchOptions::default()).await.unwrap();
    assert_eq!(first.body, second.body);
}

#[tokio::test]
async fn test_cache_disabled_refetches() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(html("<html><h1>fresh</h1></html>"))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = test_config();
    config.cache.enabled = false;
    let client = client(&config);
    let url = format!("{}/v/IPX-177", server.uri());
    client.fetch(&url, &FetchOptions::default()).await.unwrap();
    client.fetch(&url, &FetchOptions::default()).await.unwrap();
}

// ==================== Admission ====================

#[tokio::test]
async fn test_full_queue_denies_without_request() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(html("<html>ok</html>"))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = test_config();
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_second = 0.01;
    config.rate_limit.burst = 1.0;
    config.rate_limit.max_queue = 0;
    let client = client(&config);
    // Drain the single burst token.
    assert!(client.rate_limiter().try_acquire().is_granted());

    let err = client
        .fetch(&format!("{}/v/IPX-177", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();
    let CrawlerError::RateLimitExceeded { reason, .. } = &err else {
        panic!("expected RateLimitExceeded, got {err:?}");
    };
    assert_eq!(*reason, DenyReason::QueueFull);
}
