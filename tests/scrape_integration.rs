//! End-to-end scrape tests: config-defined sources against a mock site.

use std::sync::Arc;

use metascraper_core::{
    BaselineStore, Comparator, EngineConfig, ErrorKind, EventBus, Orchestrator,
    OrchestratorError, ResilientClient, Strategy, build_registry, normalize,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

// ==================== Helper Functions ====================

const DETAIL_PAGE: &str = r#"<html><body>
<h1 id="video_title">Summer Story</h1>
<div class="info">
  <span class="date">2023-07-14</span>
  <span class="runtime">120分</span>
  <span class="maker"><a>Idea Pocket</a></span>
  <span class="cast"><a>Momo Sakura</a><a>Aoi</a></span>
  <span class="genre"><a>Drama</a></span>
</div>
<img id="cover" src="/img/ipx177pl.jpg">
</body></html>"#;

const API_DOCUMENT: &str = r#"{
  "item": {
    "title": "Summer Story",
    "synopsis": "A long summer.",
    "minutes": 120,
    "actresses": [{ "name": "Aoi" }, { "name": "Rin" }],
    "genres": ["Romance"]
  }
}"#;

fn engine_config(server: &MockServer) -> EngineConfig {
    let raw = format!(
        r##"{{
            "rate_limit": {{ "enabled": false }},
            "retry": {{ "max_attempts": 2, "base_delay_ms": 10, "max_delay_ms": 20, "max_jitter_ms": 0 }},
            "batch": {{ "concurrency": 2, "chunk_delay_ms": 0, "scrape_timeout_secs": 10 }},
            "sources": {{
                "definitions": [
                    {{
                        "name": "alpha",
                        "kind": "html",
                        "url_template": "{base}/v/{{id}}",
                        "expected_markers": ["video_title"],
                        "not_found_markers": ["No results"],
                        "selectors": {{
                            "title": "h1#video_title",
                            "release_date": ".date",
                            "runtime": ".runtime",
                            "studio": ".maker a",
                            "cast": ".cast a",
                            "tags": ".genre a",
                            "cover": "img#cover"
                        }}
                    }},
                    {{
                        "name": "beta",
                        "kind": "json",
                        "url_template": "{base}/api/items?cid={{content_id}}",
                        "fields": {{
                            "title": "/item/title",
                            "synopsis": "/item/synopsis",
                            "runtime": "/item/minutes",
                            "cast": "/item/actresses",
                            "tags": "/item/genres"
                        }}
                    }}
                ],
                "priorities": [ {{ "format": "standard", "order": ["alpha", "beta"] }} ]
            }}
        }}"##,
        base = server.uri()
    );
    let config: EngineConfig = serde_json::from_str(&raw).unwrap();
    config.validate().unwrap();
    config
}

fn orchestrator(config: &EngineConfig) -> Orchestrator {
    let client = Arc::new(ResilientClient::from_config(config, EventBus::default()).unwrap());
    let registry = build_registry(config, &client).unwrap();
    Orchestrator::from_config(Arc::new(registry), config)
}

async fn mount_alpha(server: &MockServer, id: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/v/{id}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

async fn mount_beta(server: &MockServer, content_id: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .and(query_param("cid", content_id))
        .respond_with(
            ResponseTemplate::new(status)
                .insert_header("content-type", "application/json")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

// ==================== Strategies ====================

#[tokio::test]
async fn test_fallback_chain_uses_first_source() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_alpha(&server, "IPX-177", DETAIL_PAGE).await;
    mount_beta(&server, "ipx00177", 200, API_DOCUMENT).await;

    let orchestrator = orchestrator(&engine_config(&server));
    let id = normalize("[SITE] ipx-177 1080p.mp4").unwrap();
    let outcome = orchestrator.scrape(&id, Strategy::FallbackChain).await.unwrap();

    let record = outcome.record;
    assert_eq!(record.source, "alpha");
    assert_eq!(record.title.as_deref(), Some("Summer Story"));
    assert_eq!(record.runtime_minutes, Some(120));
    assert_eq!(record.studio.as_deref(), Some("Idea Pocket"));
    assert_eq!(record.cast, vec!["Momo Sakura", "Aoi"]);
    assert_eq!(
        record.cover_url,
        Some(format!("{}/img/ipx177pl.jpg", server.uri()))
    );
    assert!(outcome.failures.is_empty());
}

#[tokio::test]
async fn test_fallback_chain_moves_on_after_not_found() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_alpha(&server, "IPX-177", "<html><h1 id=\"video_title\"></h1>No results</html>").await;
    mount_beta(&server, "ipx00177", 200, API_DOCUMENT).await;

    let orchestrator = orchestrator(&engine_config(&server));
    let id = normalize("IPX-177").unwrap();
    let outcome = orchestrator.scrape(&id, Strategy::FallbackChain).await.unwrap();

    assert_eq!(outcome.record.source, "beta");
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].source, "alpha");
    assert_eq!(outcome.failures[0].error.kind(), ErrorKind::MovieNotFound);
}

#[tokio::test]
async fn test_merge_all_combines_sources() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_alpha(&server, "IPX-177", DETAIL_PAGE).await;
    mount_beta(&server, "ipx00177", 200, API_DOCUMENT).await;

    let orchestrator = orchestrator(&engine_config(&server));
    let id = normalize("IPX-177").unwrap();
    let record = orchestrator
        .scrape(&id, Strategy::MergeAll)
        .await
        .unwrap()
        .record;

    assert_eq!(record.source, "alpha+beta");
    assert_eq!(record.studio.as_deref(), Some("Idea Pocket"));
    assert_eq!(record.synopsis.as_deref(), Some("A long summer."));
    assert_eq!(record.cast, vec!["Momo Sakura", "Aoi", "Rin"]);
    assert!(record.tags.contains("Drama"));
    assert!(record.tags.contains("Romance"));
}

#[tokio::test]
async fn test_smart_best_prefers_most_complete() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_alpha(&server, "IPX-177", DETAIL_PAGE).await;
    mount_beta(&server, "ipx00177", 200, r#"{"item": {"title": "Summer Story"}}"#).await;

    let orchestrator = orchestrator(&engine_config(&server));
    let id = normalize("IPX-177").unwrap();
    let record = orchestrator
        .scrape(&id, Strategy::SmartBest)
        .await
        .unwrap()
        .record;

    assert_eq!(record.source, "alpha");
    assert!(record.completeness > 0);
}

#[tokio::test]
async fn test_all_sources_failing_lists_each_failure() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_beta(&server, "ipx00177", 404, "{}").await;

    let orchestrator = orchestrator(&engine_config(&server));
    let id = normalize("IPX-177").unwrap();
    let err = orchestrator
        .scrape(&id, Strategy::ParallelRace)
        .await
        .unwrap_err();

    let OrchestratorError::AllSourcesFailed { failures, .. } = &err else {
        panic!("expected AllSourcesFailed, got {err:?}");
    };
    assert_eq!(failures.len(), 2);
    let message = err.to_string();
    assert!(message.contains("alpha"));
    assert!(message.contains("beta"));
}

// ==================== Batch ====================

#[tokio::test]
async fn test_batch_collects_partial_failures() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_alpha(&server, "IPX-177", DETAIL_PAGE).await;
    mount_beta(&server, "abp00001", 404, "{}").await;

    let orchestrator = orchestrator(&engine_config(&server));
    let ids = vec![
        normalize("IPX-177").unwrap(),
        normalize("ABP-001").unwrap(),
        normalize("FC2-PPV-1234567").unwrap(),
    ];
    let report = orchestrator
        .scrape_batch(ids, Strategy::FallbackChain, |_| {})
        .await;

    assert_eq!(report.items.len(), 3);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 2);
    assert_eq!(report.items[0].identifier.normalized(), "IPX-177");
    assert!(matches!(
        report.items[2].result,
        Err(OrchestratorError::NoEligibleSource { .. })
    ));
}

// ==================== Baselines ====================

#[tokio::test]
async fn test_scraped_record_matches_saved_baseline() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_alpha(&server, "IPX-177", DETAIL_PAGE).await;

    let config = engine_config(&server);
    let orchestrator = orchestrator(&config);
    let id = normalize("IPX-177").unwrap();
    let record = orchestrator
        .scrape(&id, Strategy::FallbackChain)
        .await
        .unwrap()
        .record;

    let tmp = tempfile::TempDir::new().unwrap();
    let store = BaselineStore::new(tmp.path());
    store.save(&record).unwrap();

    let baseline = store.load("IPX-177", "alpha").unwrap();
    let result = Comparator::new(config.compare.clone()).compare_fields(&baseline, &record.to_fields());
    assert!(result.is_exact(), "{:?}", result.mismatches().collect::<Vec<_>>());
    assert!((result.match_rate - 100.0).abs() < f64::EPSILON);
}
