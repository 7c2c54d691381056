//! Orchestrator tests against in-memory brokers, billing APIs and sinks

use super::*;
use crate::billing::{
    BillingClientFactory, BillingQueryClient, CostExplorerApi, CoverageBucket, CoverageGroup,
    CoverageResponse, ReservationQuery, UtilizationBucket, UtilizationResponse, ATTR_INSTANCE_TYPE,
    ATTR_REGION,
};
use crate::credentials::CredentialBroker;
use crate::emitter::{MetricEmitter, MetricsSink};
use crate::error::PlotterError;
use crate::models::{
    AccountDescriptor, CredentialScope, MetricNames, MetricPoint, RunContext, ScopedCredentials,
    TimeWindow,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::error::Error as _;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

const AMBIENT: &str = "ambient";

#[derive(Default)]
struct FakeBroker {
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl CredentialBroker for FakeBroker {
    async fn assume_role(&self, account_id: &str) -> Result<ScopedCredentials, PlotterError> {
        self.calls.lock().unwrap().push(account_id.to_string());

        if let Some(delay) = self.delays.get(account_id) {
            tokio::time::sleep(*delay).await;
        }

        if self.failing.contains(account_id) {
            return Err(PlotterError::Credential {
                account_id: account_id.to_string(),
                message: "AccessDenied: not authorized to perform sts:AssumeRole".to_string(),
            });
        }

        Ok(ScopedCredentials {
            access_key: format!("AKIA{}", account_id),
            secret_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiry: Utc.with_ymd_and_hms(2024, 3, 1, 0, 15, 0).unwrap(),
        })
    }
}

/// Canned billing data keyed by (scope owner, service). The owner is
/// [`AMBIENT`] or the access key of the assumed credentials.
#[derive(Default)]
struct BillingData {
    utilization: HashMap<(String, String), String>,
    coverage: HashMap<(String, String), Vec<CoverageGroup>>,
    failing_utilization: HashSet<(String, String)>,
}

impl BillingData {
    fn utilization(mut self, owner: &str, service: &str, value: &str) -> Self {
        self.utilization
            .insert((owner.to_string(), service.to_string()), value.to_string());
        self
    }

    fn coverage(mut self, owner: &str, service: &str, groups: Vec<CoverageGroup>) -> Self {
        self.coverage
            .insert((owner.to_string(), service.to_string()), groups);
        self
    }

    fn failing_utilization(mut self, owner: &str, service: &str) -> Self {
        self.failing_utilization
            .insert((owner.to_string(), service.to_string()));
        self
    }
}

struct FakeApi {
    owner: String,
    data: Arc<BillingData>,
}

#[async_trait]
impl CostExplorerApi for FakeApi {
    async fn reservation_utilization(
        &self,
        query: &ReservationQuery,
    ) -> Result<UtilizationResponse> {
        let key = (self.owner.clone(), query.service.clone());
        if self.data.failing_utilization.contains(&key) {
            anyhow::bail!("ThrottlingException: Rate exceeded");
        }

        Ok(match self.data.utilization.get(&key) {
            Some(value) => UtilizationResponse {
                total_percentage: Some(value.clone()),
                buckets: vec![UtilizationBucket {
                    utilization_percentage: Some(value.clone()),
                    ..Default::default()
                }],
            },
            None => UtilizationResponse::default(),
        })
    }

    async fn reservation_coverage(&self, query: &ReservationQuery) -> Result<CoverageResponse> {
        let key = (self.owner.clone(), query.service.clone());
        let buckets = match self.data.coverage.get(&key) {
            Some(groups) => vec![CoverageBucket {
                groups: groups.clone(),
                ..Default::default()
            }],
            None => Vec::new(),
        };

        Ok(CoverageResponse {
            buckets,
            next_page_token: None,
        })
    }
}

struct FakeBillingFactory {
    data: Arc<BillingData>,
    scopes: Mutex<Vec<CredentialScope>>,
}

impl FakeBillingFactory {
    fn new(data: BillingData) -> Self {
        Self {
            data: Arc::new(data),
            scopes: Mutex::new(Vec::new()),
        }
    }
}

impl BillingClientFactory for FakeBillingFactory {
    fn client_for(&self, scope: &CredentialScope) -> BillingQueryClient {
        self.scopes.lock().unwrap().push(scope.clone());

        let owner = match scope {
            CredentialScope::Ambient => AMBIENT.to_string(),
            CredentialScope::Assumed(creds) => creds.access_key.clone(),
        };

        BillingQueryClient::new(Arc::new(FakeApi {
            owner,
            data: self.data.clone(),
        }))
    }
}

#[derive(Default)]
struct RecordingSink {
    points: Mutex<Vec<MetricPoint>>,
    rejected_hosts: HashSet<String>,
}

impl RecordingSink {
    fn points(&self) -> Vec<MetricPoint> {
        self.points.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingSink {
    async fn submit(&self, points: &[MetricPoint]) -> Result<(), PlotterError> {
        for point in points {
            if self.rejected_hosts.contains(&point.host) {
                return Err(PlotterError::Emit {
                    metric: point.name.clone(),
                    host: point.host.clone(),
                    message: "sink returned 500 Internal Server Error".to_string(),
                });
            }
        }
        self.points.lock().unwrap().extend_from_slice(points);
        Ok(())
    }
}

struct Harness {
    broker: Arc<FakeBroker>,
    billing: Arc<FakeBillingFactory>,
    sink: Arc<RecordingSink>,
}

impl Harness {
    fn new(broker: FakeBroker, data: BillingData, sink: RecordingSink) -> Self {
        Self {
            broker: Arc::new(broker),
            billing: Arc::new(FakeBillingFactory::new(data)),
            sink: Arc::new(sink),
        }
    }

    fn builder(&self) -> OrchestratorBuilder {
        OrchestratorBuilder::new()
            .broker(self.broker.clone())
            .billing(self.billing.clone())
            .emitter(MetricEmitter::new(self.sink.clone(), MetricNames::default()))
            .services(vec!["EC2".to_string()])
    }

    fn orchestrator(&self, policy: FailurePolicy) -> Orchestrator {
        self.builder().failure_policy(policy).build().unwrap()
    }
}

fn ctx() -> RunContext {
    RunContext::with_window(
        TimeWindow::new(
            NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        ),
        1709251200.0,
    )
}

fn accounts() -> Vec<AccountDescriptor> {
    vec![
        AccountDescriptor::new("123", "home", true),
        AccountDescriptor::new("456", "other", false),
    ]
}

fn group(region: &str, instance_type: &str, pct: &str) -> CoverageGroup {
    CoverageGroup {
        attributes: HashMap::from([
            (ATTR_REGION.to_string(), region.to_string()),
            (ATTR_INSTANCE_TYPE.to_string(), instance_type.to_string()),
        ]),
        coverage_hours_percentage: Some(pct.to_string()),
    }
}

#[tokio::test]
async fn test_home_account_emits_utilization_with_account_tags() {
    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default().utilization(AMBIENT, "EC2", "72.5"),
        RecordingSink::default(),
    );

    let report = h
        .orchestrator(FailurePolicy::Isolate)
        .run_accounts(&ctx(), &accounts())
        .await
        .unwrap();

    assert!(report.is_success());
    let points = h.sink.points();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].name, "resource.ri.utilization");
    assert_eq!(points[0].value, 72.5);
    assert_eq!(points[0].host, "home");
    assert_eq!(points[0].tags, vec!["account:home", "home", "service:EC2"]);
}

#[tokio::test]
async fn test_home_account_never_assumes_role() {
    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default(),
        RecordingSink::default(),
    );

    h.orchestrator(FailurePolicy::Isolate)
        .run_accounts(&ctx(), &accounts())
        .await
        .unwrap();

    assert_eq!(*h.broker.calls.lock().unwrap(), vec!["456".to_string()]);

    let scopes = h.billing.scopes.lock().unwrap();
    assert_eq!(scopes.len(), 2);
    assert!(scopes[0].is_ambient());
    match &scopes[1] {
        CredentialScope::Assumed(creds) => assert_eq!(creds.access_key, "AKIA456"),
        other => panic!("expected assumed scope, got {:?}", other),
    }
}

#[tokio::test]
async fn test_other_account_queries_under_assumed_credentials() {
    // Data only exists for the assumed scope; the ambient scope sees nothing.
    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default()
            .utilization("AKIA456", "EC2", "40.0")
            .coverage("AKIA456", "EC2", vec![group("us-east-1", "m5.large", "25")]),
        RecordingSink::default(),
    );

    h.orchestrator(FailurePolicy::Isolate)
        .run_accounts(&ctx(), &accounts())
        .await
        .unwrap();

    let points = h.sink.points();
    assert_eq!(points.len(), 2);
    assert!(points.iter().all(|p| p.host == "other"));
    assert_eq!(
        points[1].tags,
        vec![
            "instance_type:m5.large",
            "region:us-east-1",
            "account:other",
            "other",
            "service:EC2"
        ]
    );
}

#[tokio::test]
async fn test_all_points_share_run_snapshot() {
    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default()
            .utilization(AMBIENT, "EC2", "72.5")
            .coverage(
                AMBIENT,
                "EC2",
                vec![
                    group("ap-northeast-1", "t3.nano", "50"),
                    group("us-west-2", "c5.xlarge", "100"),
                ],
            )
            .utilization("AKIA456", "EC2", "10"),
        RecordingSink::default(),
    );

    let report = h
        .orchestrator(FailurePolicy::Isolate)
        .run_accounts(&ctx(), &accounts())
        .await
        .unwrap();

    let points = h.sink.points();
    assert_eq!(points.len(), 4);
    assert_eq!(report.points_emitted(), 4);
    assert!(points.iter().all(|p| p.timestamp_unix == 1709251200.0));
}

#[tokio::test]
async fn test_empty_coverage_emits_nothing() {
    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default().coverage(AMBIENT, "EC2", vec![]),
        RecordingSink::default(),
    );

    let report = h
        .orchestrator(FailurePolicy::FailFast)
        .run_accounts(&ctx(), &accounts())
        .await
        .unwrap();

    assert!(report.is_success());
    assert!(h.sink.points().is_empty());
}

#[tokio::test]
async fn test_fail_fast_broker_failure_references_account() {
    let h = Harness::new(
        FakeBroker {
            failing: HashSet::from(["456".to_string()]),
            ..Default::default()
        },
        BillingData::default().utilization(AMBIENT, "EC2", "72.5"),
        RecordingSink::default(),
    );

    let mut registry = accounts();
    registry.push(AccountDescriptor::new("789", "staging", false));

    let report = h
        .orchestrator(FailurePolicy::FailFast)
        .run_accounts(&ctx(), &registry)
        .await
        .unwrap();

    // Processing stops at 456; 789 is never reached.
    assert!(report.aborted);
    assert_eq!(report.accounts.len(), 2);
    assert_eq!(*h.broker.calls.lock().unwrap(), vec!["456".to_string()]);

    // Points already emitted for 123 stay emitted.
    assert_eq!(h.sink.points().len(), 1);

    let err = report.into_result().unwrap_err();
    assert!(err.to_string().contains("456"));
    assert_eq!(err.kind(), "credential");
    assert!(err.source().unwrap().to_string().contains("AccessDenied"));
}

#[tokio::test]
async fn test_isolate_continues_past_failed_account() {
    let h = Harness::new(
        FakeBroker {
            failing: HashSet::from(["456".to_string()]),
            ..Default::default()
        },
        BillingData::default()
            .utilization(AMBIENT, "EC2", "72.5")
            .utilization("AKIA789", "EC2", "90"),
        RecordingSink::default(),
    );

    let mut registry = accounts();
    registry.push(AccountDescriptor::new("789", "staging", false));

    let report = h
        .orchestrator(FailurePolicy::Isolate)
        .run_accounts(&ctx(), &registry)
        .await
        .unwrap();

    assert!(!report.aborted);
    assert_eq!(report.accounts.len(), 3);
    assert_eq!(report.failed_accounts(), 1);
    assert_eq!(report.count_kind("credential"), 1);
    assert!(report.accounts[1].credential_error.is_some());
    assert!(report.accounts[1].services.is_empty());

    let hosts: Vec<_> = h.sink.points().into_iter().map(|p| p.host).collect();
    assert_eq!(hosts, vec!["home", "staging"]);
}

#[tokio::test]
async fn test_isolate_skips_failed_service_and_continues() {
    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default()
            .failing_utilization(AMBIENT, "EC2")
            .coverage(AMBIENT, "EC2", vec![group("ap-northeast-1", "t3.nano", "50")])
            .utilization(AMBIENT, "RDS", "80"),
        RecordingSink::default(),
    );

    let report = h
        .builder()
        .services(vec!["EC2".to_string(), "RDS".to_string()])
        .build()
        .unwrap()
        .run_accounts(&ctx(), &accounts()[..1])
        .await
        .unwrap();

    let services = &report.accounts[0].services;
    assert_eq!(services.len(), 2);
    assert_eq!(services[0].errors.len(), 1);
    assert!(!services[0].utilization_emitted);
    // Coverage for the same service is still attempted.
    assert_eq!(services[0].coverage_emitted, 1);
    assert!(services[1].utilization_emitted);
    assert_eq!(report.count_kind("billing_api"), 1);
}

#[tokio::test]
async fn test_malformed_coverage_group_is_skipped() {
    let broken = group("ap-northeast-1", "t3.micro", "n/a");

    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default().coverage(
            AMBIENT,
            "EC2",
            vec![group("ap-northeast-1", "t3.nano", "50"), broken],
        ),
        RecordingSink::default(),
    );

    let report = h
        .orchestrator(FailurePolicy::Isolate)
        .run_accounts(&ctx(), &accounts()[..1])
        .await
        .unwrap();

    assert_eq!(h.sink.points().len(), 1);
    assert_eq!(report.count_kind("data_parse"), 1);
    assert_eq!(report.accounts[0].services[0].coverage_emitted, 1);
}

#[tokio::test]
async fn test_emit_failure_is_recorded_not_fatal() {
    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default()
            .utilization(AMBIENT, "EC2", "72.5")
            .utilization("AKIA456", "EC2", "40"),
        RecordingSink {
            rejected_hosts: HashSet::from(["home".to_string()]),
            ..Default::default()
        },
    );

    let report = h
        .orchestrator(FailurePolicy::Isolate)
        .run_accounts(&ctx(), &accounts())
        .await
        .unwrap();

    assert_eq!(report.count_kind("emit"), 1);
    let points = h.sink.points();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].host, "other");
}

#[tokio::test]
async fn test_invalid_window_makes_no_calls() {
    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default().utilization(AMBIENT, "EC2", "72.5"),
        RecordingSink::default(),
    );

    let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let ctx = RunContext::with_window(TimeWindow::new(day, day), 1709251200.0);

    let err = h
        .orchestrator(FailurePolicy::Isolate)
        .run_accounts(&ctx, &accounts())
        .await
        .unwrap_err();

    assert!(matches!(err, PlotterError::InvalidWindow { min_days: 2, .. }));
    assert!(h.broker.calls.lock().unwrap().is_empty());
    assert!(h.billing.scopes.lock().unwrap().is_empty());
    assert!(h.sink.points().is_empty());
}

#[tokio::test]
async fn test_concurrent_accounts_report_in_registry_order() {
    let h = Harness::new(
        FakeBroker {
            delays: HashMap::from([
                ("456".to_string(), Duration::from_millis(60)),
                ("789".to_string(), Duration::from_millis(5)),
            ]),
            ..Default::default()
        },
        BillingData::default(),
        RecordingSink::default(),
    );

    let mut registry = accounts();
    registry.push(AccountDescriptor::new("789", "staging", false));

    let report = h
        .builder()
        .account_concurrency(3)
        .build()
        .unwrap()
        .run_accounts(&ctx(), &registry)
        .await
        .unwrap();

    let ids: Vec<_> = report.accounts.iter().map(|a| a.account_id.as_str()).collect();
    assert_eq!(ids, vec!["123", "456", "789"]);
}

#[tokio::test]
async fn test_run_loads_registry_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        "- ID: \"123\"\n  Profile: home\n  Default: true\n- ID: \"456\"\n  Profile: other\n"
    )
    .unwrap();

    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default().utilization(AMBIENT, "EC2", "72.5"),
        RecordingSink::default(),
    );

    let report = h
        .builder()
        .accounts_path(file.path())
        .build()
        .unwrap()
        .run(&ctx())
        .await
        .unwrap();

    assert_eq!(report.accounts.len(), 2);
    assert_eq!(report.points_emitted(), 1);
}

#[tokio::test]
async fn test_run_missing_registry_is_config_error() {
    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default(),
        RecordingSink::default(),
    );

    let err = h
        .builder()
        .accounts_path("/nonexistent/awsaccount.yml")
        .build()
        .unwrap()
        .run(&ctx())
        .await
        .unwrap_err();

    assert!(matches!(err, PlotterError::ConfigLoad { .. }));
}

#[test]
fn test_builder_requires_components() {
    assert!(OrchestratorBuilder::new().build().is_err());

    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default(),
        RecordingSink::default(),
    );
    assert!(h.builder().services(vec![]).build().is_err());
}

#[tokio::test]
async fn test_poll_once_uses_now_as_snapshot() {
    use crate::health::HealthRegistry;
    use crate::observability::{PlotterMetrics, RunLogger};

    let mut file = NamedTempFile::new().unwrap();
    write!(file, "- ID: \"123\"\n  Profile: home\n  Default: true\n").unwrap();

    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default().utilization(AMBIENT, "EC2", "72.5"),
        RecordingSink::default(),
    );
    let orchestrator = h.builder().accounts_path(file.path()).build().unwrap();

    let health = HealthRegistry::new();
    let poll = PollLoop::new(
        orchestrator,
        PollConfig::default(),
        health.clone(),
        PlotterMetrics::new(),
        RunLogger::new("test"),
    );

    let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let report = poll.poll_once(now).await.unwrap();

    assert_eq!(report.snapshot, 1709251200.0);
    assert_eq!(report.window.start, NaiveDate::from_ymd_opt(2024, 2, 28).unwrap());
    assert_eq!(h.sink.points()[0].timestamp_unix, 1709251200.0);
    assert!(health.readiness().await.ready);
}

#[tokio::test]
async fn test_poll_loop_stops_on_shutdown() {
    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default(),
        RecordingSink::default(),
    );
    let orchestrator = h
        .builder()
        .accounts_path("/nonexistent/awsaccount.yml")
        .build()
        .unwrap();

    let poll = PollLoop::new(
        orchestrator,
        PollConfig {
            interval: Duration::from_secs(3600),
        },
        crate::health::HealthRegistry::new(),
        crate::observability::PlotterMetrics::new(),
        crate::observability::RunLogger::new("test"),
    );

    let (tx, rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(poll.run(rx));
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("poll loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_spawned_poll_loop_with_concurrent_accounts() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        "- ID: \"123\"\n  Profile: home\n  Default: true\n- ID: \"456\"\n  Profile: other\n- ID: \"789\"\n  Profile: staging\n"
    )
    .unwrap();

    let h = Harness::new(
        FakeBroker::default(),
        BillingData::default()
            .utilization(AMBIENT, "EC2", "72.5")
            .utilization("AKIA456", "EC2", "40")
            .utilization("AKIA789", "EC2", "90"),
        RecordingSink::default(),
    );
    let orchestrator = h
        .builder()
        .accounts_path(file.path())
        .account_concurrency(3)
        .build()
        .unwrap();

    let health = crate::health::HealthRegistry::new();
    let poll = PollLoop::new(
        orchestrator,
        PollConfig {
            interval: Duration::from_secs(3600),
        },
        health.clone(),
        crate::observability::PlotterMetrics::new(),
        crate::observability::RunLogger::new("test"),
    );

    let (tx, rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(poll.run(rx));

    // The first tick fires immediately; wait for it to finish
    tokio::time::timeout(Duration::from_secs(2), async {
        while !health.readiness().await.ready {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first run did not complete");

    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("poll loop did not stop")
        .unwrap();

    let mut hosts: Vec<_> = h.sink.points().into_iter().map(|p| p.host).collect();
    hosts.sort();
    assert_eq!(hosts, vec!["home", "other", "staging"]);
}
