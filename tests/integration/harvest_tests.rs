//! Integration tests for the harvester
//!
//! These tests drive whole invocations against wiremock servers and against a
//! scripted in-memory source, checking the artifacts left on disk.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use station_harvester::config::{HarvestConfig, SourceConfig};
use station_harvester::harvester::{
    write_checkpoint, EntitySource, FixedClock, Harvester, HttpSource, RunAction, RunContext,
    SourceError, StopReason,
};
use station_harvester::output::FieldNormalizer;
use station_harvester::state::{
    AttemptOutcome, EntityId, FetchStatus, RawDetail, RawEntity, RetryPolicy,
};
use station_harvester::storage::{EntityStore, RunId, SnapshotLayout};
use station_harvester::HarvestError;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
}

fn test_settings() -> HarvestConfig {
    HarvestConfig {
        max_requests: 100,
        max_minutes: 10,
        max_retries: 3,
        failure_threshold_percent: 2.0,
        min_interval_days: 7,
        max_history: 5,
        request_delay_ms: 0,
        request_timeout_secs: 5,
        checkpoint_interval: 10,
    }
}

fn layout(dir: &Path) -> SnapshotLayout {
    SnapshotLayout::new(dir, dir.join("latest.json"))
}

fn context(dir: &Path, settings: HarvestConfig, at: DateTime<Utc>) -> RunContext {
    RunContext::new(settings, layout(dir)).with_clock(Arc::new(FixedClock(at)))
}

fn listing(count: u64) -> Vec<RawEntity> {
    (1..=count)
        .map(|id| RawEntity {
            id,
            latitude: 50.0 + id as f64 / 100.0,
            longitude: 10.0 - id as f64 / 100.0,
            sub_resource_ids: vec![format!("{}-air", id), format!("{}-rain", id)],
        })
        .collect()
}

/// In-memory source with a fixed listing, a set of always-failing ids and a
/// set of ids whose detail is `null`
///
/// Clones share their call counters.
#[derive(Clone)]
struct ScriptedSource {
    listing: Vec<RawEntity>,
    failing: Arc<HashSet<EntityId>>,
    empty: Arc<HashSet<EntityId>>,
    list_calls: Arc<AtomicUsize>,
    detail_calls: Arc<Mutex<Vec<EntityId>>>,
}

impl ScriptedSource {
    fn new(count: u64, failing: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            listing: listing(count),
            failing: Arc::new(failing.into_iter().collect()),
            empty: Arc::new(HashSet::new()),
            list_calls: Arc::new(AtomicUsize::new(0)),
            detail_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_empty_details(mut self, empty: impl IntoIterator<Item = EntityId>) -> Self {
        self.empty = Arc::new(empty.into_iter().collect());
        self
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn detail_calls(&self) -> Vec<EntityId> {
        self.detail_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntitySource for ScriptedSource {
    async fn fetch_entity_list(&self) -> Result<Vec<RawEntity>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.listing.clone())
    }

    async fn fetch_entity_detail(&self, id: EntityId) -> Result<RawDetail, SourceError> {
        self.detail_calls.lock().unwrap().push(id);
        if self.failing.contains(&id) {
            Err(SourceError::Status {
                url: format!("scripted://{}", id),
                status: 503,
            })
        } else if self.empty.contains(&id) {
            Ok(serde_json::Value::Null)
        } else {
            Ok(json!({ "stationName": format!("Station {}", id), "elevationMeters": id * 10 }))
        }
    }
}

/// Writes a run in which every entity succeeded except `permanent` ones,
/// which exhausted their retries
fn seed_run(layout: &SnapshotLayout, run: RunId, total: u64, permanent: u64, max_retries: u32) {
    let policy = RetryPolicy::new(max_retries);
    let mut store = EntityStore::initialize(listing(total));
    for id in 1..=total {
        if id <= permanent {
            for _ in 0..max_retries {
                store
                    .upsert_attempt(id, AttemptOutcome::Failure("HTTP 404".into()), &policy, run.created_at())
                    .unwrap();
            }
        } else {
            store
                .upsert_attempt(id, AttemptOutcome::Success(json!({"seeded": true})), &policy, run.created_at())
                .unwrap();
        }
    }
    write_checkpoint(layout, run, &store, &FieldNormalizer).unwrap();
}

#[tokio::test]
async fn test_http_cycle_resumes_until_complete() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/stations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 3, "latitude": 52.1, "longitude": 13.2, "subResourceIds": ["tl"]},
            {"id": 1, "latitude": 48.7, "longitude": 9.1, "subResourceIds": ["tl", "rr"]},
            {"id": 2, "latitude": 53.5, "longitude": 10.0}
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/stations/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stationName": "Stuttgart",
            "heightAboveSeaLevel": 314
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/stations/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stationName": "Hamburg"})))
        .mount(&mock_server)
        .await;

    // First request for station 3 fails, later ones succeed
    Mock::given(method("GET"))
        .and(path("/stations/3"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/stations/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stationName": "Berlin"})))
        .mount(&mock_server)
        .await;

    let source_config = SourceConfig {
        list_url: format!("{}/stations", base_url),
        detail_url: format!("{}/stations/{{id}}", base_url),
        user_agent: "TestHarvester/1.0".to_string(),
    };

    let dir = tempdir().unwrap();
    let layout = layout(dir.path());

    // First invocation: new run, station 3 fails once
    let source = HttpSource::new(&source_config, std::time::Duration::from_secs(5)).unwrap();
    let harvester = Harvester::with_default_normalizer(
        context(dir.path(), test_settings(), now()),
        source,
    );
    let first = harvester.run().await.expect("first invocation failed");

    assert_eq!(first.action, RunAction::Started);
    assert_eq!(first.attempted, 3);
    assert_eq!(first.summary.succeeded, 2);
    assert_eq!(first.summary.retryable, 1);
    assert!(!first.summary.complete);
    assert_eq!(first.exit_code(), 0);
    assert_eq!(first.published, None);
    assert!(!layout.latest_path().exists());

    let store = EntityStore::load(&layout.state_path(first.run)).unwrap();
    let failed = store.get(3).unwrap();
    assert_eq!(failed.fetch_status, FetchStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert!(failed.last_error.as_deref().unwrap().contains("500"));
    assert_eq!(store.get(2).unwrap().sub_resource_ids, Vec::<String>::new());

    let output: serde_json::Value =
        serde_json::from_slice(&std::fs::read(layout.output_path(first.run)).unwrap()).unwrap();
    assert_eq!(
        output,
        json!([
            {
                "id": 1, "latitude": 48.7, "longitude": 9.1,
                "sub_resources": ["tl", "rr"],
                "station_name": "Stuttgart", "height_above_sea_level": 314
            },
            {
                "id": 2, "latitude": 53.5, "longitude": 10.0,
                "sub_resources": [],
                "station_name": "Hamburg"
            },
            {"id": 3, "latitude": 52.1, "longitude": 13.2, "sub_resources": ["tl"]}
        ])
    );

    // Second invocation, an hour later: resumes the same run, only station 3 is fetched
    let source = HttpSource::new(&source_config, std::time::Duration::from_secs(5)).unwrap();
    let harvester = Harvester::with_default_normalizer(
        context(dir.path(), test_settings(), now() + Duration::hours(1)),
        source,
    );
    let second = harvester.run().await.expect("second invocation failed");

    assert_eq!(second.action, RunAction::Resumed);
    assert_eq!(second.run, first.run);
    assert_eq!(second.attempted, 1);
    assert!(second.summary.is_healthy());
    assert_eq!(second.exit_code(), 0);
    assert_eq!(second.published, Some(first.run));
    assert_eq!(
        std::fs::read(layout.latest_path()).unwrap(),
        std::fs::read(layout.output_path(first.run)).unwrap()
    );

    let store = EntityStore::load(&layout.state_path(first.run)).unwrap();
    assert_eq!(store.get(3).unwrap().attempts, 2);
    assert_eq!(store.get(1).unwrap().attempts, 1);
    assert!(store.get(3).unwrap().last_error.is_none());

    // One listing call and four detail calls in total
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 5);
}

#[tokio::test]
async fn test_detail_timeout_is_a_failed_attempt() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/stations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "latitude": 1.0, "longitude": 2.0}
        ])))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/stations/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"stationName": "Slow"}))
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let source_config = SourceConfig {
        list_url: format!("{}/stations", base_url),
        detail_url: format!("{}/stations/{{id}}", base_url),
        user_agent: "TestHarvester/1.0".to_string(),
    };
    let settings = HarvestConfig {
        request_timeout_secs: 1,
        ..test_settings()
    };

    let dir = tempdir().unwrap();
    let source = HttpSource::new(&source_config, settings.request_timeout()).unwrap();
    let harvester =
        Harvester::with_default_normalizer(context(dir.path(), settings, now()), source);
    let report = harvester.run().await.unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.summary.retryable, 1);
    assert_eq!(report.exit_code(), 0);

    let store = EntityStore::load(&layout(dir.path()).state_path(report.run)).unwrap();
    let entity = store.get(1).unwrap();
    assert_eq!(entity.fetch_status, FetchStatus::Failed);
    let error = entity.last_error.as_deref().unwrap().to_lowercase();
    assert!(error.contains("timeout") || error.contains("timed out"));
}

#[tokio::test]
async fn test_listing_failure_leaves_history_untouched() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/stations"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let dir = tempdir().unwrap();
    let layout = layout(dir.path());
    let stale = RunId::from_datetime(now() - Duration::days(30));
    seed_run(&layout, stale, 5, 0, 3);
    std::fs::write(layout.latest_path(), b"previous").unwrap();

    let source_config = SourceConfig {
        list_url: format!("{}/stations", base_url),
        detail_url: format!("{}/stations/{{id}}", base_url),
        user_agent: "TestHarvester/1.0".to_string(),
    };
    let source = HttpSource::new(&source_config, std::time::Duration::from_secs(5)).unwrap();
    let settings = HarvestConfig {
        max_history: 1,
        ..test_settings()
    };
    let harvester =
        Harvester::with_default_normalizer(context(dir.path(), settings, now()), source);

    let result = harvester.run().await;
    assert!(matches!(result, Err(HarvestError::Listing(SourceError::Status { status: 503, .. }))));
    assert_eq!(layout.list_runs().unwrap(), vec![stale]);
    assert_eq!(std::fs::read(layout.latest_path()).unwrap(), b"previous");
}

#[tokio::test]
async fn test_empty_listing_is_fatal() {
    let dir = tempdir().unwrap();
    let source = ScriptedSource::new(0, []);
    let harvester = Harvester::with_default_normalizer(
        context(dir.path(), test_settings(), now()),
        source,
    );

    assert!(matches!(harvester.run().await, Err(HarvestError::EmptyListing)));
    assert!(layout(dir.path()).list_runs().unwrap().is_empty());
}

#[tokio::test]
async fn test_request_budget_limits_attempts() {
    let dir = tempdir().unwrap();
    let settings = HarvestConfig {
        max_requests: 5,
        ..test_settings()
    };
    let source = ScriptedSource::new(12, []);
    let harvester = Harvester::with_default_normalizer(
        context(dir.path(), settings, now()),
        source.clone(),
    );

    let report = harvester.run().await.unwrap();

    assert_eq!(report.attempted, 5);
    assert_eq!(report.stop, StopReason::RequestBudget);
    assert!(!report.summary.complete);
    assert_eq!(report.summary.succeeded, 5);
    assert_eq!(report.summary.pending, 7);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(source.detail_calls(), vec![1, 2, 3, 4, 5]);

    let store = EntityStore::load(&layout(dir.path()).state_path(report.run)).unwrap();
    let untouched = store
        .iter()
        .filter(|e| e.fetch_status == FetchStatus::Pending && e.attempts == 0)
        .count();
    assert_eq!(untouched, 7);
}

#[tokio::test]
async fn test_failures_are_retried_once_per_invocation() {
    let dir = tempdir().unwrap();
    let settings = test_settings();
    let source = ScriptedSource::new(4, [2]);

    let mut runs = Vec::new();
    for hour in 0..4 {
        let harvester = Harvester::with_default_normalizer(
            context(dir.path(), settings.clone(), now() + Duration::hours(hour)),
            source.clone(),
        );
        runs.push(harvester.run().await.unwrap());
    }

    // Entity 2 gets exactly one attempt per invocation until its budget is spent
    assert_eq!(source.detail_calls(), vec![1, 2, 3, 4, 2, 2]);
    assert_eq!(source.list_calls(), 1);

    let last = runs.last().unwrap();
    assert_eq!(last.run, runs[0].run);
    assert_eq!(last.attempted, 0);
    assert!(last.summary.complete);
    assert_eq!(last.summary.permanently_failed, 1);
    // 1 of 4 permanently failed is above 2%
    assert_eq!(last.exit_code(), 1);
    assert_eq!(last.published, None);
}

#[tokio::test]
async fn test_threshold_boundary_controls_publication() {
    let settings = HarvestConfig {
        max_retries: 1,
        failure_threshold_percent: 2.0,
        ..test_settings()
    };

    // 2 of 100 permanently failed: success, published
    let dir = tempdir().unwrap();
    let source = ScriptedSource::new(100, [10, 20]);
    let harvester = Harvester::with_default_normalizer(
        context(dir.path(), settings.clone(), now()),
        source,
    );
    let report = harvester.run().await.unwrap();
    assert_eq!(report.summary.permanently_failed, 2);
    assert!(report.summary.complete);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.published, Some(report.run));
    assert!(layout(dir.path()).latest_path().exists());

    // 3 of 100 permanently failed: failure, alias keeps the older healthy run
    let dir = tempdir().unwrap();
    let layout = layout(dir.path());
    let older = RunId::from_datetime(now() - Duration::days(10));
    seed_run(&layout, older, 100, 0, 1);
    std::fs::copy(layout.output_path(older), layout.latest_path()).unwrap();
    let alias_before = std::fs::read(layout.latest_path()).unwrap();

    let source = ScriptedSource::new(100, [10, 20, 30]);
    let harvester = Harvester::with_default_normalizer(
        context(dir.path(), settings, now()),
        source,
    );
    let report = harvester.run().await.unwrap();
    assert_eq!(report.action, RunAction::Started);
    assert_eq!(report.summary.permanently_failed, 3);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.published, None);
    assert_eq!(std::fs::read(layout.latest_path()).unwrap(), alias_before);
    assert!(layout.output_path(report.run).exists());
}

#[tokio::test]
async fn test_recent_healthy_run_skips_fetching() {
    let dir = tempdir().unwrap();
    let layout = layout(dir.path());
    let recent = RunId::from_datetime(now() - Duration::days(6));
    seed_run(&layout, recent, 10, 0, 3);

    let source = ScriptedSource::new(10, []);
    let harvester = Harvester::with_default_normalizer(
        context(dir.path(), test_settings(), now()),
        source.clone(),
    );
    let report = harvester.run().await.unwrap();

    assert_eq!(report.action, RunAction::UpToDate);
    assert_eq!(report.run, recent);
    assert_eq!(report.stop, StopReason::Skipped);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(source.list_calls(), 0);
    assert!(source.detail_calls().is_empty());

    // The alias is (re)published even without new work
    assert_eq!(report.published, Some(recent));
    assert_eq!(
        std::fs::read(layout.latest_path()).unwrap(),
        std::fs::read(layout.output_path(recent)).unwrap()
    );
}

#[tokio::test]
async fn test_stale_healthy_run_starts_new_cycle() {
    let dir = tempdir().unwrap();
    let layout = layout(dir.path());
    let stale = RunId::from_datetime(now() - Duration::days(8));
    seed_run(&layout, stale, 10, 0, 3);

    let source = ScriptedSource::new(3, []);
    let harvester = Harvester::with_default_normalizer(
        context(dir.path(), test_settings(), now()),
        source.clone(),
    );
    let report = harvester.run().await.unwrap();

    assert_eq!(report.action, RunAction::Started);
    assert_eq!(report.run, RunId::from_datetime(now()));
    assert_eq!(source.list_calls(), 1);
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.published, Some(report.run));
    assert_eq!(layout.list_runs().unwrap(), vec![report.run, stale]);

    // The stale run's artifacts are never rewritten
    let old = EntityStore::load(&layout.state_path(stale)).unwrap();
    assert_eq!(old.len(), 10);
}

#[tokio::test]
async fn test_rotation_after_new_cycle() {
    let dir = tempdir().unwrap();
    let layout = layout(dir.path());
    let seeded: Vec<RunId> = [40, 30, 20]
        .iter()
        .map(|days| RunId::from_datetime(now() - Duration::days(*days)))
        .collect();
    for run in &seeded {
        seed_run(&layout, *run, 2, 0, 3);
    }

    let settings = HarvestConfig {
        max_history: 2,
        ..test_settings()
    };
    let harvester = Harvester::with_default_normalizer(
        context(dir.path(), settings, now()),
        ScriptedSource::new(2, []),
    );
    let report = harvester.run().await.unwrap();

    let newest_seeded = seeded[2];
    assert_eq!(layout.list_runs().unwrap(), vec![report.run, newest_seeded]);
    assert_eq!(report.rotated, vec![seeded[1], seeded[0]]);
    for run in &report.rotated {
        assert!(!layout.state_path(*run).exists());
        assert!(!layout.output_path(*run).exists());
    }
}

#[tokio::test]
async fn test_resume_without_work_rewrites_identical_artifacts() {
    let dir = tempdir().unwrap();
    let layout = layout(dir.path());
    let run = RunId::from_datetime(now() - Duration::days(1));
    // Complete but unhealthy, so it is resumed with nothing left to do
    seed_run(&layout, run, 10, 1, 3);

    let state_before = std::fs::read(layout.state_path(run)).unwrap();
    let output_before = std::fs::read(layout.output_path(run)).unwrap();

    let source = ScriptedSource::new(10, []);
    let harvester = Harvester::with_default_normalizer(
        context(dir.path(), test_settings(), now()),
        source.clone(),
    );
    let report = harvester.run().await.unwrap();

    assert_eq!(report.action, RunAction::Resumed);
    assert_eq!(report.attempted, 0);
    assert_eq!(report.exit_code(), 1);
    assert!(source.detail_calls().is_empty());
    assert_eq!(std::fs::read(layout.state_path(run)).unwrap(), state_before);
    assert_eq!(std::fs::read(layout.output_path(run)).unwrap(), output_before);
}

#[tokio::test]
async fn test_force_fresh_ignores_incomplete_run() {
    let dir = tempdir().unwrap();
    let layout = layout(dir.path());

    let settings = HarvestConfig {
        max_requests: 1,
        ..test_settings()
    };
    let source = ScriptedSource::new(3, []);
    let first = Harvester::with_default_normalizer(
        context(dir.path(), settings.clone(), now() - Duration::hours(2)),
        source.clone(),
    )
    .run()
    .await
    .unwrap();
    assert!(!first.summary.complete);

    let second = Harvester::with_default_normalizer(
        context(dir.path(), settings, now()),
        source.clone(),
    )
    .force_fresh(true)
    .run()
    .await
    .unwrap();

    assert_eq!(second.action, RunAction::Started);
    assert_ne!(second.run, first.run);
    assert_eq!(source.list_calls(), 2);
    assert_eq!(layout.list_runs().unwrap(), vec![second.run, first.run]);
}

#[tokio::test]
async fn test_null_detail_keeps_run_resumable() {
    let dir = tempdir().unwrap();
    let layout = layout(dir.path());
    let settings = HarvestConfig {
        max_requests: 2,
        ..test_settings()
    };
    let source = ScriptedSource::new(4, []).with_empty_details([1]);

    let first = Harvester::with_default_normalizer(
        context(dir.path(), settings.clone(), now()),
        source.clone(),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(first.action, RunAction::Started);

    let store = EntityStore::load(&layout.state_path(first.run)).unwrap();
    let empty = store.get(1).unwrap();
    assert_eq!(empty.fetch_status, FetchStatus::Failed);
    assert!(empty.detail.is_none());

    let second = Harvester::with_default_normalizer(
        context(dir.path(), settings, now() + Duration::hours(1)),
        source.clone(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(second.action, RunAction::Resumed);
    assert_eq!(second.run, first.run);
    assert_eq!(source.list_calls(), 1);
    // Untried entities go before the retry of entity 1
    assert_eq!(source.detail_calls(), vec![1, 2, 3, 4]);
    assert_eq!(second.summary.succeeded, 3);
    assert_eq!(second.summary.retryable, 1);
}

#[tokio::test]
async fn test_fresh_cycle_in_the_same_second_keeps_previous_run() {
    let dir = tempdir().unwrap();
    let layout = layout(dir.path());

    let first = Harvester::with_default_normalizer(
        context(dir.path(), test_settings(), now()),
        ScriptedSource::new(3, []),
    )
    .run()
    .await
    .unwrap();
    let first_state = std::fs::read(layout.state_path(first.run)).unwrap();

    let second = Harvester::with_default_normalizer(
        context(dir.path(), test_settings(), now()),
        ScriptedSource::new(2, []),
    )
    .force_fresh(true)
    .run()
    .await
    .unwrap();

    assert_ne!(second.run, first.run);
    assert!(second.run > first.run);
    assert_eq!(layout.list_runs().unwrap(), vec![second.run, first.run]);
    assert_eq!(std::fs::read(layout.state_path(first.run)).unwrap(), first_state);
    assert_eq!(second.published, Some(second.run));
}
