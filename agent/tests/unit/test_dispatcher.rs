//! Dispatcher and workflow engine tests with fake collaborators

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use autoshipd::deploy::certbot::CertIssuer;
use autoshipd::deploy::executor::{self, Collaborators, WorkflowEngine};
use autoshipd::deploy::nginx::ProxyConfigurator;
use autoshipd::deploy::propagation::DnsResolver;
use autoshipd::deploy::retry::RetryPolicy;
use autoshipd::deploy::validator::Validator;
use autoshipd::errors::CollaboratorError;
use autoshipd::http::dns::DnsProvider;
use autoshipd::http::status::StatusReporter;
use autoshipd::models::outcome::{OutcomeStatus, WorkflowOutcome};
use autoshipd::models::request::ProjectTarget;
use autoshipd::storage::layout::StorageLayout;
use autoshipd::storage::ledger::{LedgerStore, DEFAULT_LEDGER_CAP};
use autoshipd::storage::queue::{QueueOptions, QueueStore};
use autoshipd::storage::responses::{ResponseLog, DEFAULT_RESPONSE_CAP};
use autoshipd::workers::dispatcher::{Dispatcher, PassSummary};
use autoshipd::workers::watcher;

const PUBLIC_IP: &str = "203.0.113.10";

// ================================= FAKES ===================================== //

#[derive(Default)]
struct World {
    calls: Mutex<Vec<String>>,
    reports: Mutex<Vec<WorkflowOutcome>>,
    valid_certs: HashSet<String>,
    failing_certs: HashSet<String>,
    reject_proxy_config: bool,
}

impl World {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn called(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn reports(&self) -> Vec<WorkflowOutcome> {
        self.reports.lock().unwrap().clone()
    }
}

struct FakeProxy(Arc<World>);

#[async_trait]
impl ProxyConfigurator for FakeProxy {
    async fn write_config(
        &self,
        subdomain: &str,
        target: &ProjectTarget,
    ) -> Result<(), CollaboratorError> {
        self.0
            .record(format!("proxy.write {} {}", subdomain, target.routing_target()));
        Ok(())
    }

    async fn validate_config(&self) -> Result<(), CollaboratorError> {
        self.0.record("proxy.validate".to_string());
        if self.0.reject_proxy_config {
            Err(CollaboratorError::Rejected("nginx -t failed".to_string()))
        } else {
            Ok(())
        }
    }

    async fn reload(&self) -> Result<(), CollaboratorError> {
        self.0.record("proxy.reload".to_string());
        Ok(())
    }
}

struct FakeDns(Arc<World>);

#[async_trait]
impl DnsProvider for FakeDns {
    async fn upsert(&self, subdomain: &str, ip: IpAddr) -> Result<(), CollaboratorError> {
        self.0.record(format!("dns.upsert {} {}", subdomain, ip));
        Ok(())
    }
}

struct FakeResolver(Arc<World>);

#[async_trait]
impl DnsResolver for FakeResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, CollaboratorError> {
        self.0.record(format!("dns.resolve {}", host));
        Ok(vec![PUBLIC_IP.parse().unwrap()])
    }
}

struct FakeCerts(Arc<World>);

#[async_trait]
impl CertIssuer for FakeCerts {
    async fn certificate_valid(&self, subdomain: &str) -> bool {
        self.0.valid_certs.contains(subdomain)
    }

    async fn issue(&self, subdomain: &str) -> Result<(), CollaboratorError> {
        self.0.record(format!("certs.issue {}", subdomain));
        if self.0.failing_certs.contains(subdomain) {
            Err(CollaboratorError::RateLimited(
                "too many certificates already issued".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

struct FakeStatus(Arc<World>);

#[async_trait]
impl StatusReporter for FakeStatus {
    async fn report(&self, outcome: &WorkflowOutcome) -> Result<(), CollaboratorError> {
        self.0.record(format!("status.report {}", outcome.request_id));
        self.0.reports.lock().unwrap().push(outcome.clone());
        Ok(())
    }
}

// ================================= HARNESS ===================================== //

fn engine(world: &Arc<World>) -> WorkflowEngine {
    WorkflowEngine::new(
        Collaborators {
            proxy: Arc::new(FakeProxy(world.clone())),
            dns: Arc::new(FakeDns(world.clone())),
            resolver: Arc::new(FakeResolver(world.clone())),
            certs: Arc::new(FakeCerts(world.clone())),
            status: Arc::new(FakeStatus(world.clone())),
        },
        executor::Options {
            public_ip: PUBLIC_IP.parse().unwrap(),
            propagation: RetryPolicy::once(),
        },
    )
}

fn dispatcher(dir: &Path, engine: WorkflowEngine) -> Dispatcher {
    let layout = StorageLayout::in_dir(dir);
    Dispatcher::new(
        QueueStore::new(layout.queue_file(), QueueOptions::default()),
        LedgerStore::new(layout.ledger_file(), DEFAULT_LEDGER_CAP),
        Validator::new(".site"),
        Arc::new(engine),
    )
}

fn write_queue(dir: &Path, requests: Value) {
    std::fs::write(
        dir.join("deploy-requests.json"),
        serde_json::to_string_pretty(&requests).unwrap(),
    )
    .unwrap();
}

fn dynamic(id: &str, subdomain: &str, port: u16) -> Value {
    json!({"id": id, "subdomain": subdomain, "project_type": "dynamic", "port": port})
}

fn ledgered(dir: &Path) -> Vec<String> {
    let layout = StorageLayout::in_dir(dir);
    LedgerStore::new(layout.ledger_file(), DEFAULT_LEDGER_CAP)
        .load()
        .unwrap()
        .to_vec()
}

// ================================= TESTS ===================================== //

#[tokio::test]
async fn test_same_request_across_two_passes_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World::default());
    let dispatcher = dispatcher(dir.path(), engine(&world));

    write_queue(dir.path(), json!([dynamic("req-1", "app.example.com", 3000)]));

    let first = dispatcher.run_once().await.unwrap();
    assert_eq!(first.succeeded, 1);

    // Producer rewrites the file with the same request plus nothing new
    write_queue(dir.path(), json!([dynamic("req-1", "app.example.com", 3000)]));
    let second = dispatcher.run_once().await.unwrap();

    assert_eq!(
        second,
        PassSummary {
            seen: 1,
            skipped: 1,
            ..Default::default()
        }
    );
    assert_eq!(world.called("proxy.write"), 1);
    assert_eq!(world.reports().len(), 1);
    assert_eq!(ledgered(dir.path()), vec!["req-1".to_string()]);
}

#[tokio::test]
async fn test_ledger_read_after_restart_prevents_reprocessing() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World::default());
    write_queue(
        dir.path(),
        json!([
            dynamic("req-1", "one.example.com", 3001),
            dynamic("req-2", "two.example.com", 3002)
        ]),
    );

    dispatcher(dir.path(), engine(&world))
        .run_once()
        .await
        .unwrap();

    // Fresh process over the same files
    let restarted_world = Arc::new(World::default());
    let summary = dispatcher(dir.path(), engine(&restarted_world))
        .run_once()
        .await
        .unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.executed(), 0);
    assert!(restarted_world.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_requests_touch_no_collaborator() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World::default());
    let dispatcher = dispatcher(dir.path(), engine(&world));

    write_queue(
        dir.path(),
        json!([
            {"id": "bad-1", "subdomain": "evil/../path", "project_type": "dynamic", "port": 3000},
            {"id": "bad-2", "subdomain": "docs.example.site", "project_type": "static"},
            {"id": "bad-3", "subdomain": "api.example.com", "project_type": "dynamic", "port": "not-a-number"}
        ]),
    );

    let summary = dispatcher.run_once().await.unwrap();

    assert_eq!(summary.invalid, 3);
    assert_eq!(summary.executed(), 0);
    assert!(world.calls().is_empty());
    assert!(world.reports().is_empty());
    assert!(ledgered(dir.path()).is_empty());
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_request() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World {
        failing_certs: HashSet::from(["two.example.com".to_string()]),
        ..Default::default()
    });
    let dispatcher = dispatcher(dir.path(), engine(&world));

    write_queue(
        dir.path(),
        json!([
            dynamic("req-1", "one.example.com", 3001),
            dynamic("req-2", "two.example.com", 3002),
            dynamic("req-3", "three.example.com", 3003)
        ]),
    );

    let summary = dispatcher.run_once().await.unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);

    let reports = world.reports();
    let statuses: Vec<(&str, OutcomeStatus)> = reports
        .iter()
        .map(|o| (o.request_id.as_str(), o.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("req-1", OutcomeStatus::Success),
            ("req-2", OutcomeStatus::Failed),
            ("req-3", OutcomeStatus::Success)
        ]
    );
    assert_eq!(reports[1].step_reached, "certificate");
    assert!(reports[1].message.contains("rate limited"));

    assert_eq!(
        ledgered(dir.path()),
        vec!["req-1".to_string(), "req-3".to_string()]
    );

    // Failed request never got as far as a reload
    assert_eq!(world.called("proxy.reload"), 2);
}

#[tokio::test]
async fn test_no_reload_after_failed_config_validation() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World {
        reject_proxy_config: true,
        ..Default::default()
    });
    let dispatcher = dispatcher(dir.path(), engine(&world));

    write_queue(dir.path(), json!([dynamic("req-1", "app.example.com", 3000)]));
    let summary = dispatcher.run_once().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(world.called("proxy.validate"), 1);
    assert_eq!(world.called("proxy.reload"), 0);

    let reports = world.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, OutcomeStatus::Failed);
    assert_eq!(reports[0].step_reached, "proxy-reload");
    assert!(ledgered(dir.path()).is_empty());
}

#[tokio::test]
async fn test_existing_certificate_skips_issuance() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World {
        valid_certs: HashSet::from(["app.example.com".to_string()]),
        ..Default::default()
    });
    let dispatcher = dispatcher(dir.path(), engine(&world));

    write_queue(dir.path(), json!([dynamic("req-1", "app.example.com", 3000)]));
    let summary = dispatcher.run_once().await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(world.called("certs.issue"), 0);
}

#[tokio::test]
async fn test_steps_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World::default());
    let dispatcher = dispatcher(dir.path(), engine(&world));

    write_queue(
        dir.path(),
        json!([{
            "id": "req-7",
            "subdomain": "docs.example.site",
            "project_type": "static",
            "s3_url": "https://docs.s3-website.amazonaws.com"
        }]),
    );
    dispatcher.run_once().await.unwrap();

    assert_eq!(
        world.calls(),
        vec![
            "proxy.write docs.example.site https://docs.s3-website.amazonaws.com".to_string(),
            format!("dns.upsert docs.example.site {}", PUBLIC_IP),
            "dns.resolve docs.example.site".to_string(),
            "certs.issue docs.example.site".to_string(),
            "proxy.validate".to_string(),
            "proxy.reload".to_string(),
            "status.report req-7".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_duplicate_id_in_one_snapshot_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World {
        failing_certs: HashSet::from(["app.example.com".to_string()]),
        ..Default::default()
    });
    let dispatcher = dispatcher(dir.path(), engine(&world));

    write_queue(
        dir.path(),
        json!([
            dynamic("req-1", "app.example.com", 3000),
            dynamic("req-1", "app.example.com", 3000)
        ]),
    );
    let summary = dispatcher.run_once().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(world.reports().len(), 1);
}

#[tokio::test]
async fn test_outcomes_mirrored_to_response_log() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World::default());
    let layout = StorageLayout::in_dir(dir.path());
    let responses = ResponseLog::new(layout.response_file().unwrap(), DEFAULT_RESPONSE_CAP);
    let dispatcher = dispatcher(
        dir.path(),
        engine(&world).with_response_log(responses.clone()),
    );

    write_queue(dir.path(), json!([dynamic("req-1", "app.example.com", 3000)]));
    dispatcher.run_once().await.unwrap();

    let logged = responses.read_all().unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].request_id, "req-1");
    assert_eq!(logged[0].port, Some(3000));
}

#[tokio::test]
async fn test_malformed_queue_is_an_empty_batch() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World::default());
    let layout = StorageLayout::in_dir(dir.path());
    let dispatcher = Dispatcher::new(
        QueueStore::new(
            layout.queue_file(),
            QueueOptions {
                parse_attempts: 2,
                parse_retry_delay: std::time::Duration::from_millis(1),
            },
        ),
        LedgerStore::new(layout.ledger_file(), DEFAULT_LEDGER_CAP),
        Validator::new(".site"),
        Arc::new(engine(&world)),
    );

    std::fs::write(dir.path().join("deploy-requests.json"), "[{\"id\": \"req-1\"").unwrap();
    let summary = dispatcher.run_once().await.unwrap();

    assert_eq!(summary, PassSummary::default());
    assert!(world.calls().is_empty());
}

// ================================= WATCHER ===================================== //

async fn wait_for_reports(world: &World, count: usize) {
    let arrived = tokio::time::timeout(Duration::from_secs(10), async {
        while world.reports().len() < count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(arrived.is_ok(), "expected {} reports, got {:?}", count, world.calls());
}

fn reported_ids(world: &World) -> Vec<String> {
    world.reports().into_iter().map(|o| o.request_id).collect()
}

#[tokio::test]
async fn test_watcher_runs_startup_pass_and_deferred_recheck() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World::default());
    let dispatcher = dispatcher(dir.path(), engine(&world));
    write_queue(dir.path(), json!([dynamic("req-1", "app.example.com", 3000)]));

    let options = watcher::Options {
        debounce: Duration::from_secs(1),
    };
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let watch = watcher::run(
        &options,
        &dispatcher,
        tokio::time::sleep,
        Box::pin(async move {
            let _ = stop_rx.await;
        }),
    );

    let queue_dir = dir.path().to_path_buf();
    let driver_world = world.clone();
    let drive = async move {
        wait_for_reports(&driver_world, 1).await;

        // Three rewrites inside the debounce window of the startup pass
        for n in 2..=4 {
            let requests: Vec<Value> = (1..=n)
                .map(|i| dynamic(&format!("req-{}", i), &format!("app{}.example.com", i), 3000))
                .collect();
            write_queue(&queue_dir, Value::Array(requests));
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        // No further notification arrives: only the re-check picks up req-4
        wait_for_reports(&driver_world, 4).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let _ = stop_tx.send(());
    };

    let (result, ()) = tokio::join!(watch, drive);
    assert!(result.is_ok());

    assert_eq!(
        reported_ids(&world),
        vec!["req-1", "req-2", "req-3", "req-4"]
    );
    assert_eq!(world.called("status.report"), 4);
    assert_eq!(ledgered(dir.path()), vec!["req-1", "req-2", "req-3", "req-4"]);
}

#[tokio::test]
async fn test_watcher_retries_same_content_after_failed_pass() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World::default());
    let dispatcher = dispatcher(dir.path(), engine(&world));
    let requests = json!([dynamic("req-1", "app.example.com", 3000)]);
    write_queue(dir.path(), requests.clone());

    // Unreadable ledger without a backup aborts the startup pass
    std::fs::write(dir.path().join("processed.json"), "{ not json").unwrap();

    let options = watcher::Options {
        debounce: Duration::from_millis(100),
    };
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let watch = watcher::run(
        &options,
        &dispatcher,
        tokio::time::sleep,
        Box::pin(async move {
            let _ = stop_rx.await;
        }),
    );

    let queue_dir = dir.path().to_path_buf();
    let driver_world = world.clone();
    let drive = async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(driver_world.reports().is_empty());

        // Repair the ledger and rewrite identical queue content
        std::fs::remove_file(queue_dir.join("processed.json")).unwrap();
        write_queue(&queue_dir, requests);

        wait_for_reports(&driver_world, 1).await;
        let _ = stop_tx.send(());
    };

    let (result, ()) = tokio::join!(watch, drive);
    assert!(result.is_ok());
    assert_eq!(reported_ids(&world), vec!["req-1"]);
}

#[tokio::test]
async fn test_watcher_recheck_deadline_survives_unrelated_events() {
    let dir = tempfile::tempdir().unwrap();
    let world = Arc::new(World::default());
    let dispatcher = dispatcher(dir.path(), engine(&world));
    write_queue(dir.path(), json!([dynamic("req-1", "app.example.com", 3000)]));

    let delays = Arc::new(Mutex::new(Vec::<Duration>::new()));
    let recorded = delays.clone();
    let sleep_fn = move |delay: Duration| {
        recorded.lock().unwrap().push(delay);
        tokio::time::sleep(delay)
    };

    let options = watcher::Options {
        debounce: Duration::from_secs(2),
    };
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let watch = watcher::run(
        &options,
        &dispatcher,
        sleep_fn,
        Box::pin(async move {
            let _ = stop_rx.await;
        }),
    );

    let queue_dir = dir.path().to_path_buf();
    let driver_world = world.clone();
    let drive = async move {
        wait_for_reports(&driver_world, 1).await;
        write_queue(
            &queue_dir,
            json!([
                dynamic("req-1", "app.example.com", 3000),
                dynamic("req-2", "api.example.com", 3001)
            ]),
        );

        // Producer scratch files in the same directory
        for i in 0..3 {
            tokio::time::sleep(Duration::from_millis(150)).await;
            std::fs::write(queue_dir.join(format!("scratch-{}.tmp", i)), "x").unwrap();
        }

        wait_for_reports(&driver_world, 2).await;
        let _ = stop_tx.send(());
    };

    let (result, ()) = tokio::join!(watch, drive);
    assert!(result.is_ok());
    assert_eq!(reported_ids(&world), vec!["req-1", "req-2"]);

    let delays = delays.lock().unwrap().clone();
    assert!(delays.len() >= 2, "re-check never rescheduled: {:?}", delays);
    assert!(delays.windows(2).all(|w| w[1] <= w[0]), "{:?}", delays);
    assert!(delays[delays.len() - 1] < delays[0], "{:?}", delays);
}
