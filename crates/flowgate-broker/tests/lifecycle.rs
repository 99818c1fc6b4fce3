//! Lifecycle tests for the broker against the simulated platform.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use flowgate_broker::{
    BindRequest, Broker, BrokerError, ErrorKind, OperationState, ProvisionRequest, UpdateRequest,
};
use flowgate_core::BrokerConfig;
use flowgate_platform::{MemoryPlatform, PlatformGateway, RuntimeState};
use flowgate_state::{Backend, ServiceInstance, StateStore};
use serde_json::{Value, json};
use tempfile::TempDir;

const APP: &str = "nginx-flow-abc";

struct Harness {
    _data: TempDir,
    platform: MemoryPlatform,
    store: StateStore,
    broker: Arc<Broker>,
}

fn config(data_dir: &std::path::Path, extra: &str) -> BrokerConfig {
    let toml_str = format!(
        r#"
[broker]
username = "admin"
password = "secret"
data_dir = "{}"

{extra}

[[services]]
id = "svc-1"
name = "nginx-flow"
description = "weighted traffic distribution"
bindable = true
plan_updateable = true

[[services.plans]]
id = "plan-space"
name = "space"
description = "deployed into the caller's space"

[[services.plans]]
id = "plan-system"
name = "system"
description = "deployed into the system space"
use_system_space = true

[services.plans.resources]
instances = 2
memory_mb = 512
"#,
        data_dir.display()
    );
    BrokerConfig::from_toml_str(&toml_str).unwrap()
}

fn harness_with(extra: &str) -> Harness {
    let data = tempfile::tempdir().unwrap();
    let config = config(data.path(), extra);
    let platform = MemoryPlatform::new()
        .with_shared_domain("example.com")
        .with_scope("space-1", "dev")
        .with_scope("system-guid", "system");
    let store = StateStore::open_in_memory().unwrap();
    let broker = Broker::new(&config, store.clone(), Arc::new(platform.clone()));
    Harness {
        _data: data,
        platform,
        store,
        broker: Arc::new(broker),
    }
}

fn harness() -> Harness {
    harness_with("")
}

fn provision_request(parameters: Value) -> ProvisionRequest {
    ProvisionRequest {
        service_id: "svc-1".to_string(),
        plan_id: "plan-space".to_string(),
        parameters: Some(parameters),
        space_guid: Some("space-1".to_string()),
    }
}

fn bind_url(url: &str, weight: u32) -> BindRequest {
    BindRequest {
        parameters: Some(json!({ "url": url, "weight": weight })),
        ..Default::default()
    }
}

fn bind_app(app_guid: &str) -> BindRequest {
    BindRequest {
        app_guid: Some(app_guid.to_string()),
        ..Default::default()
    }
}

fn stored(h: &Harness, id: &str) -> ServiceInstance {
    ServiceInstance::from_blob(&h.store.get(id).unwrap()).unwrap()
}

async fn provisioned(h: &Harness) {
    h.broker
        .provision(
            "abc",
            provision_request(json!({ "host": "abc", "domain": "example.com" })),
        )
        .await
        .unwrap();
}

// ── Provision ──────────────────────────────────────────────────

#[tokio::test]
async fn example_scenario() {
    let h = harness();
    provisioned(&h).await;

    let record = stored(&h, "abc");
    assert_eq!(record.host, "abc");
    assert_eq!(record.domain, "example.com");
    assert!(record.backends.is_empty());
    assert_eq!(h.platform.route_urls(APP), vec!["abc.example.com"]);

    let client = h
        .platform
        .add_client_app("client", "space-1", Some(("foo", "example.com")))
        .unwrap();
    let creds = h.broker.bind("abc", "b1", bind_app(&client)).await.unwrap();
    assert_eq!(creds.host, "abc");
    assert_eq!(creds.domain, "example.com");
    assert_eq!(
        creds.nginxs,
        vec![Backend {
            name: "b1".to_string(),
            url: "foo.example.com".to_string(),
            weight: 5,
            port: 8001,
        }]
    );

    let creds = h
        .broker
        .bind("abc", "b2", bind_url("bar.example.com", 4))
        .await
        .unwrap();
    assert_eq!(
        creds.nginxs[1],
        Backend {
            name: "b2".to_string(),
            url: "bar.example.com".to_string(),
            weight: 4,
            port: 8002,
        }
    );

    h.broker.unbind("abc", "b1", None, None).await.unwrap();
    let record = stored(&h, "abc");
    assert_eq!(record.backends.len(), 1);
    assert_eq!(record.backends[0].name, "b2");

    let conf = h.platform.uploaded_file(APP, "nginx.conf").unwrap();
    assert!(conf.contains("upstream b2 {"));
    assert!(!conf.contains("upstream b1 {"));
}

#[tokio::test]
async fn second_provision_is_rejected_without_change() {
    let h = harness();
    provisioned(&h).await;
    let before = h.store.get("abc").unwrap();

    let err = h
        .broker
        .provision(
            "abc",
            provision_request(json!({ "host": "other", "domain": "example.com" })),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(h.store.get("abc").unwrap(), before);
    assert!(!h.platform.route_exists("other", "example.com"));
}

#[tokio::test]
async fn unknown_catalog_entries_are_not_found() {
    let h = harness();
    let mut request = provision_request(json!({ "host": "abc", "domain": "example.com" }));
    request.plan_id = "plan-gold".to_string();
    let err = h.broker.provision("abc", request).await.unwrap_err();
    assert!(matches!(err, BrokerError::PlanNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let mut request = provision_request(json!({ "host": "abc", "domain": "example.com" }));
    request.service_id = "svc-9".to_string();
    let err = h.broker.provision("abc", request).await.unwrap_err();
    assert!(matches!(err, BrokerError::ServiceNotFound(_)));
    assert_eq!(h.platform.application_count(), 0);
}

#[tokio::test]
async fn provision_validates_before_touching_the_platform() {
    let h = harness();
    for params in [
        json!({ "domain": "example.com" }),
        json!({ "host": "", "domain": "example.com" }),
        json!({ "host": "abc", "domain": "example.com", "colour": "red" }),
        json!({ "host": 1, "domain": "example.com" }),
    ] {
        let err = h
            .broker
            .provision("abc", provision_request(params))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{err}");
    }
    assert!(h.platform.calls().is_empty());
    assert!(!h.store.exists("abc").unwrap());
}

#[tokio::test]
async fn provision_policy_disabled() {
    let h = harness_with("[policy]\nallow_user_provision_parameters = false\n");
    let err = h
        .broker
        .provision(
            "abc",
            provision_request(json!({ "host": "abc", "domain": "example.com" })),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyDisabled);
    assert!(h.platform.calls().is_empty());
}

#[tokio::test]
async fn system_plan_deploys_into_system_scope() {
    let h = harness();
    let mut request = provision_request(json!({ "host": "abc", "domain": "example.com" }));
    request.plan_id = "plan-system".to_string();
    request.space_guid = None;
    h.broker.provision("abc", request).await.unwrap();

    assert_eq!(h.platform.application(APP).unwrap().scope_guid, "system-guid");
    assert_eq!(h.store.get_owner_space("abc").unwrap(), "system");
}

#[tokio::test]
async fn provision_with_initial_backends() {
    let h = harness();
    h.broker
        .provision(
            "abc",
            provision_request(json!({
                "host": "abc",
                "domain": "example.com",
                "enable_session_sticky": true,
                "nginxs": [
                    { "name": "auto", "url": "a.example.com" },
                    { "name": "pinned", "url": "p.example.com", "port": 8001, "weight": 2 }
                ]
            })),
        )
        .await
        .unwrap();

    let record = stored(&h, "abc");
    assert!(record.session_sticky);
    assert_eq!(record.backends[0].name, "auto");
    assert_eq!(record.backends[0].port, 8002);
    assert_eq!(record.backends[1].port, 8001);
    assert_eq!(record.backends[1].weight, 2);
    let conf = h.platform.uploaded_file(APP, "nginx.conf").unwrap();
    assert!(conf.contains("ip_hash;"));
}

#[tokio::test]
async fn failed_create_persists_nothing() {
    let h = harness();
    h.platform.fail_next("map_route", 1);
    let err = h
        .broker
        .provision(
            "abc",
            provision_request(json!({ "host": "abc", "domain": "example.com" })),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Platform);
    assert!(!h.store.exists("abc").unwrap());

    provisioned(&h).await;
    assert_eq!(h.platform.application_count(), 1);
}

// ── Bind / Unbind ──────────────────────────────────────────────

#[tokio::test]
async fn duplicate_url_conflicts_and_keeps_backends() {
    let h = harness();
    provisioned(&h).await;
    h.broker
        .bind("abc", "b1", bind_url("foo.example.com", 0))
        .await
        .unwrap();

    let err = h
        .broker
        .bind("abc", "b2", bind_url("foo.example.com", 3))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(stored(&h, "abc").backends.len(), 1);
}

#[tokio::test]
async fn bind_needs_a_route_or_url() {
    let h = harness();
    provisioned(&h).await;
    let client = h.platform.add_client_app("worker", "space-1", None).unwrap();

    let err = h.broker.bind("abc", "b1", bind_app(&client)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h
        .broker
        .bind("abc", "b1", BindRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn bind_to_missing_instance() {
    let h = harness();
    let err = h
        .broker
        .bind("nope", "b1", bind_url("foo.example.com", 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn bind_parameters_policy_disabled() {
    let h = harness_with("[policy]\nallow_user_bind_parameters = false\n");
    provisioned(&h).await;

    let err = h
        .broker
        .bind("abc", "b1", bind_url("foo.example.com", 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyDisabled);

    let client = h
        .platform
        .add_client_app("client", "space-1", Some(("foo", "example.com")))
        .unwrap();
    h.broker.bind("abc", "b1", bind_app(&client)).await.unwrap();
}

#[tokio::test]
async fn rebinding_same_id_is_rejected() {
    let h = harness();
    provisioned(&h).await;
    h.broker
        .bind("abc", "b1", bind_url("foo.example.com", 0))
        .await
        .unwrap();
    let err = h
        .broker
        .bind("abc", "b1", bind_url("bar.example.com", 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn unbind_unknown_binding_is_a_noop() {
    let h = harness();
    provisioned(&h).await;
    h.broker
        .bind("abc", "b1", bind_url("foo.example.com", 0))
        .await
        .unwrap();
    let before = h.store.get("abc").unwrap();
    let calls = h.platform.calls().len();

    h.broker.unbind("abc", "ghost", None, None).await.unwrap();
    assert_eq!(h.store.get("abc").unwrap(), before);
    assert_eq!(h.platform.calls().len(), calls);
}

#[tokio::test]
async fn ports_stay_unique_until_the_pool_runs_out() {
    let h = harness_with("[backends]\nport_base = 8001\npool_size = 4\n");
    provisioned(&h).await;
    for i in 0..4 {
        h.broker
            .bind("abc", &format!("b{i}"), bind_url(&format!("u{i}.example.com"), 0))
            .await
            .unwrap();
    }
    h.broker.unbind("abc", "b1", None, None).await.unwrap();
    h.broker
        .bind("abc", "b9", bind_url("u9.example.com", 0))
        .await
        .unwrap();

    let ports: Vec<u16> = stored(&h, "abc").backends.iter().map(|b| b.port).collect();
    let unique: HashSet<u16> = ports.iter().copied().collect();
    assert_eq!(unique.len(), ports.len());
    assert!(ports.iter().all(|p| (8001..8005).contains(p)));

    let err = h
        .broker
        .bind("abc", "b10", bind_url("u10.example.com", 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
}

#[tokio::test]
async fn concurrent_binds_are_serialized() {
    let h = harness();
    provisioned(&h).await;

    let tasks: Vec<_> = (0..5)
        .map(|i| {
            let broker = h.broker.clone();
            tokio::spawn(async move {
                broker
                    .bind("abc", &format!("b{i}"), bind_url(&format!("u{i}.example.com"), 0))
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let record = stored(&h, "abc");
    assert_eq!(record.backends.len(), 5);
    let ports: HashSet<u16> = record.backends.iter().map(|b| b.port).collect();
    assert_eq!(ports, (8001..8006).collect::<HashSet<u16>>());
}

// ── Update ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn update_merges_and_swaps() {
    let h = harness();
    provisioned(&h).await;
    h.broker
        .bind("abc", "b1", bind_url("foo.example.com", 0))
        .await
        .unwrap();

    let updated = h
        .broker
        .update(
            "abc",
            UpdateRequest {
                parameters: Some(json!({ "host": "xyz", "enable_session_sticky": true })),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.host, "xyz");
    assert_eq!(updated.domain, "example.com");
    assert_eq!(updated.backends.len(), 1);
    assert_eq!(stored(&h, "abc"), updated);
    assert_eq!(h.platform.route_urls(APP), vec!["xyz.example.com"]);
    assert!(h.platform.application("nginx-flow-abc-blue").is_none());
}

#[tokio::test(start_paused = true)]
async fn update_replaces_backends_from_nginxs() {
    let h = harness();
    provisioned(&h).await;
    h.broker
        .bind("abc", "b1", bind_url("foo.example.com", 0))
        .await
        .unwrap();

    let updated = h
        .broker
        .update(
            "abc",
            UpdateRequest {
                parameters: Some(json!({
                    "nginxs": [{ "name": "n1", "url": "new.example.com", "weight": 7 }]
                })),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        updated.backends,
        vec![Backend {
            name: "n1".to_string(),
            url: "new.example.com".to_string(),
            weight: 7,
            port: 8001,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn crashed_update_leaves_instance_unchanged() {
    let h = harness();
    provisioned(&h).await;
    let before = h.store.get("abc").unwrap();
    let original = h.platform.application(APP).unwrap();
    h.platform.script_runtime(
        "nginx-flow-abc-blue",
        vec![RuntimeState::Starting, RuntimeState::Crashed],
    );

    let err = h
        .broker
        .update(
            "abc",
            UpdateRequest {
                parameters: Some(json!({ "host": "xyz" })),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Platform);
    assert_eq!(h.store.get("abc").unwrap(), before);
    assert_eq!(h.platform.application(APP).unwrap().guid, original.guid);
    assert_eq!(h.platform.route_urls(APP), vec!["abc.example.com"]);
    assert!(!h.platform.route_exists("xyz", "example.com"));
    assert!(h.platform.application("nginx-flow-abc-blue").is_none());
}

#[tokio::test(start_paused = true)]
async fn stuck_update_times_out() {
    let h = harness();
    provisioned(&h).await;
    let original = h.platform.application(APP).unwrap();
    h.platform
        .script_runtime("nginx-flow-abc-blue", vec![RuntimeState::Starting]);

    let err = h
        .broker
        .update(
            "abc",
            UpdateRequest {
                parameters: Some(json!({ "enable_session_sticky": true })),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!stored(&h, "abc").session_sticky);
    assert_eq!(h.platform.application(APP).unwrap().guid, original.guid);
    assert_eq!(h.platform.route_urls(APP), vec!["abc.example.com"]);
}

#[tokio::test]
async fn update_needs_parameters() {
    let h = harness();
    provisioned(&h).await;

    let err = h
        .broker
        .update("abc", UpdateRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h
        .broker
        .update(
            "abc",
            UpdateRequest {
                plan_id: Some("plan-gold".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = h
        .broker
        .update("missing", UpdateRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn update_parameters_policy_disabled() {
    let h = harness_with("[policy]\nallow_user_update_parameters = false\n");
    provisioned(&h).await;
    let err = h
        .broker
        .update(
            "abc",
            UpdateRequest {
                parameters: Some(json!({ "host": "xyz" })),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyDisabled);
}

#[tokio::test(start_paused = true)]
async fn plan_change_resizes_application() {
    let h = harness();
    provisioned(&h).await;
    assert_eq!(h.platform.application(APP).unwrap().memory_mb, 128);

    h.broker
        .update(
            "abc",
            UpdateRequest {
                plan_id: Some("plan-system".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let app = h.platform.application(APP).unwrap();
    assert_eq!(app.instances, 2);
    assert_eq!(app.memory_mb, 512);
    assert_eq!(stored(&h, "abc").plan_id, "plan-system");
    assert_eq!(h.platform.route_urls(APP), vec!["abc.example.com"]);
}

#[tokio::test(start_paused = true)]
async fn store_failure_after_swap_is_inconsistent() {
    let h = harness();
    provisioned(&h).await;
    h.platform.script_runtime(
        "nginx-flow-abc-blue",
        vec![RuntimeState::Starting, RuntimeState::Running],
    );

    let broker = h.broker.clone();
    let update = tokio::spawn(async move {
        broker
            .update(
                "abc",
                UpdateRequest {
                    parameters: Some(json!({ "host": "xyz" })),
                    ..Default::default()
                },
            )
            .await
    });

    // The update is parked between polls when the record disappears.
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.store.delete("abc").unwrap();

    let err = update.await.unwrap().unwrap_err();
    assert!(matches!(err, BrokerError::Inconsistent { .. }));
    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert!(err.to_string().contains("manual reconciliation required"));
    assert_eq!(h.platform.route_urls(APP), vec!["xyz.example.com"]);
    assert!(h.platform.application("nginx-flow-abc-blue").is_none());
}

// ── Deprovision / PollStatus ───────────────────────────────────

#[tokio::test]
async fn deprovision_removes_app_route_and_record() {
    let h = harness();
    provisioned(&h).await;

    h.broker.deprovision("abc", None, None).await.unwrap();
    assert!(!h.store.exists("abc").unwrap());
    assert_eq!(h.platform.application_count(), 0);
    assert!(!h.platform.route_exists("abc", "example.com"));

    let err = h.broker.deprovision("abc", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn deprovision_record_without_app() {
    let h = harness();
    provisioned(&h).await;
    h.platform.delete_application(APP).await.unwrap();

    h.broker.deprovision("abc", None, None).await.unwrap();
    assert!(!h.store.exists("abc").unwrap());
}

#[tokio::test]
async fn deprovision_app_without_record() {
    let h = harness();
    provisioned(&h).await;
    h.store.delete("abc").unwrap();

    h.broker.deprovision("abc", None, None).await.unwrap();
    assert_eq!(h.platform.application_count(), 0);
}

#[tokio::test]
async fn deprovision_checks_catalog() {
    let h = harness();
    provisioned(&h).await;
    let err = h
        .broker
        .deprovision("abc", Some("svc-9"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.store.exists("abc").unwrap());
}

#[tokio::test]
async fn poll_status_maps_runtime_state() {
    let h = harness();
    let err = h.broker.poll_status("abc").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    h.platform.script_runtime(
        APP,
        vec![
            RuntimeState::Starting,
            RuntimeState::Running,
            RuntimeState::Crashed,
        ],
    );
    provisioned(&h).await;
    assert_eq!(
        h.broker.poll_status("abc").await.unwrap(),
        OperationState::InProgress
    );
    assert_eq!(
        h.broker.poll_status("abc").await.unwrap(),
        OperationState::Succeeded
    );
    assert_eq!(
        h.broker.poll_status("abc").await.unwrap(),
        OperationState::Failed
    );
}

#[test]
fn catalog_is_exposed() {
    let h = harness();
    let services = h.broker.catalog().services();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].plans.len(), 2);
}
