//! End-to-end plan execution scenarios.
//!
//! Every test drives the public engine entry point against the in-memory
//! cluster double, the way the outer reconciliation loop does: invoke a
//! tick, persist the returned status, invoke again, until terminal.

use chrono::{TimeZone, Utc};
use indexmap::IndexMap;
use kudo_engine::testing::{test_metadata, FakeClusterClient, Op, ScriptedHealthOracle};
use kudo_engine::{
    execute_plan, ActivePlan, ExecutionStatus, Phase, Plan, PlanStatus, ResourceEnhancer, Step,
    Strategy, Task,
};
use std::collections::BTreeMap;

const DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: {{Params.REPLICAS}}
"#;

const SECOND_DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: aux
spec:
  replicas: 1
"#;

const TOPIC: &str = r#"
apiVersion: kafka.example.com/v1
kind: KafkaTopic
metadata:
  name: events
spec:
  partitions: 12
"#;

/// A one-phase plan; each step applies (or deletes) one template.
fn plan_of(strategy: Strategy, steps: &[(&str, &str, bool)]) -> ActivePlan {
    let plan = Plan {
        name: "deploy".to_string(),
        phases: vec![Phase {
            name: "main".to_string(),
            strategy,
            steps: steps
                .iter()
                .map(|(name, _, delete)| Step {
                    name: name.to_string(),
                    delete: *delete,
                    tasks: vec![format!("task-{name}")],
                })
                .collect(),
        }],
    };
    let status = PlanStatus::new(&plan);
    ActivePlan {
        plan,
        status,
        tasks: steps
            .iter()
            .map(|(name, key, _)| Task {
                name: format!("task-{name}"),
                resources: vec![key.to_string()],
            })
            .collect(),
        templates: steps
            .iter()
            .map(|(name, key, _)| {
                let body = match *key {
                    "deployment.yaml" => DEPLOYMENT,
                    "aux.yaml" => SECOND_DEPLOYMENT,
                    "topic.yaml" => TOPIC,
                    other => panic!("unknown template {other} for step {name}"),
                };
                (key.to_string(), body.to_string())
            })
            .collect::<IndexMap<_, _>>(),
        params: BTreeMap::from([("REPLICAS".to_string(), "3".to_string())]),
    }
}

/// Opt-in log output: `RUST_LOG=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One tick, with a distinct timestamp per invocation.
async fn tick(
    plan: &mut ActivePlan,
    client: &FakeClusterClient,
    health: &ScriptedHealthOracle,
    minute: u32,
) -> Option<kudo_engine::ExecutionError> {
    init_tracing();
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap();
    let (status, err) = execute_plan(
        plan,
        &test_metadata(),
        client,
        &ResourceEnhancer,
        health,
        now,
    )
    .await;
    plan.status = status;
    err
}

mod install {
    use super::*;

    #[tokio::test]
    async fn unhealthy_deployment_completes_on_the_second_tick() {
        let mut plan = plan_of(Strategy::Serial, &[("srv", "deployment.yaml", false)]);
        let client = FakeClusterClient::new();
        let health = ScriptedHealthOracle::new();
        health.mark_unhealthy("Deployment/prod/kafka-web");

        assert!(tick(&mut plan, &client, &health, 0).await.is_none());
        assert_eq!(plan.status.status, ExecutionStatus::InProgress);
        assert_eq!(plan.status.phases[0].status, ExecutionStatus::InProgress);
        assert_eq!(
            plan.status.phases[0].steps[0].status,
            ExecutionStatus::InProgress
        );
        assert!(client.contains("Deployment/prod/kafka-web"));

        health.mark_healthy("Deployment/prod/kafka-web");
        assert!(tick(&mut plan, &client, &health, 1).await.is_none());
        assert_eq!(plan.status.status, ExecutionStatus::Complete);
        assert_eq!(plan.status.phases[0].status, ExecutionStatus::Complete);
        assert_eq!(
            plan.status.phases[0].steps[0].status,
            ExecutionStatus::Complete
        );
    }

    #[tokio::test]
    async fn applied_resources_carry_the_full_convention_set() {
        let mut plan = plan_of(Strategy::Serial, &[("srv", "deployment.yaml", false)]);
        let client = FakeClusterClient::new();
        let health = ScriptedHealthOracle::new();

        tick(&mut plan, &client, &health, 0).await;

        let stored = client.get_object("Deployment/prod/kafka-web").unwrap();
        assert!(stored
            .metadata
            .name
            .as_deref()
            .unwrap()
            .starts_with("kafka-"));
        assert_eq!(stored.metadata.namespace.as_deref(), Some("prod"));

        let labels = stored.metadata.labels.as_ref().unwrap();
        for (key, value) in [
            ("heritage", "kudo"),
            ("operator", "kafka-operator"),
            ("instance", "kafka"),
        ] {
            assert_eq!(labels.get(key).map(String::as_str), Some(value), "{key}");
        }

        let annotations = stored.metadata.annotations.as_ref().unwrap();
        for (key, value) in [
            ("plan", "deploy"),
            ("phase", "main"),
            ("step", "srv"),
            ("operatorVersion", "1.2.0"),
        ] {
            assert_eq!(
                annotations.get(key).map(String::as_str),
                Some(value),
                "{key}"
            );
        }

        let owner = &stored.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.kind, "Instance");

        // parameter bindings made it into the rendered spec
        assert_eq!(stored.data.pointer("/spec/replicas").unwrap(), 3);
    }
}

mod scheduling {
    use super::*;

    #[tokio::test]
    async fn serial_phase_never_reaches_past_an_unfinished_step() {
        let mut plan = plan_of(
            Strategy::Serial,
            &[
                ("one", "deployment.yaml", false),
                ("two", "aux.yaml", false),
            ],
        );
        let client = FakeClusterClient::new();
        let health = ScriptedHealthOracle::new();
        health.mark_unhealthy("Deployment/prod/kafka-web");

        for minute in 0..3 {
            assert!(tick(&mut plan, &client, &health, minute).await.is_none());
            assert_eq!(plan.status.status, ExecutionStatus::InProgress);
            assert_eq!(plan.status.phases[0].status, ExecutionStatus::InProgress);
            assert_eq!(
                plan.status.phases[0].steps[1].status,
                ExecutionStatus::Pending
            );
        }
        // the second step's resource was never fetched nor created
        assert!(!client.contains("Deployment/prod/kafka-aux"));
        assert!(!client
            .ops()
            .iter()
            .any(|op| matches!(op, Op::Get(key) | Op::Create(key) if key.contains("kafka-aux"))));
    }

    #[tokio::test]
    async fn parallel_phase_gives_every_step_its_tick() {
        let mut plan = plan_of(
            Strategy::Parallel,
            &[
                ("one", "deployment.yaml", false),
                ("two", "aux.yaml", false),
            ],
        );
        let client = FakeClusterClient::new();
        let health = ScriptedHealthOracle::new();
        health.mark_unhealthy("Deployment/prod/kafka-web");

        assert!(tick(&mut plan, &client, &health, 0).await.is_none());
        assert_eq!(
            plan.status.phases[0].steps[0].status,
            ExecutionStatus::InProgress
        );
        assert_eq!(
            plan.status.phases[0].steps[1].status,
            ExecutionStatus::Complete
        );
        assert_eq!(plan.status.phases[0].status, ExecutionStatus::InProgress);
        assert!(client.contains("Deployment/prod/kafka-aux"));

        health.mark_healthy("Deployment/prod/kafka-web");
        assert!(tick(&mut plan, &client, &health, 1).await.is_none());
        assert_eq!(plan.status.status, ExecutionStatus::Complete);
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn missing_template_is_fatal_before_any_cluster_write() {
        let mut plan = plan_of(Strategy::Serial, &[("srv", "deployment.yaml", false)]);
        plan.tasks[0].resources = vec!["missing.yaml".to_string()];
        let client = FakeClusterClient::new();
        let health = ScriptedHealthOracle::new();

        let err = tick(&mut plan, &client, &health, 0).await.unwrap();
        assert!(err.is_fatal());
        assert_eq!(plan.status.status, ExecutionStatus::FatalError);
        assert_eq!(plan.status.phases[0].status, ExecutionStatus::FatalError);
        assert_eq!(
            plan.status.phases[0].steps[0].status,
            ExecutionStatus::FatalError
        );
        assert!(client.ops().is_empty());

        // fatal is terminal: the next tick does not touch the cluster either
        assert!(tick(&mut plan, &client, &health, 1).await.is_none());
        assert!(client.ops().is_empty());
    }

    #[tokio::test]
    async fn transient_api_errors_mark_error_status_only() {
        let mut plan = plan_of(Strategy::Serial, &[("srv", "deployment.yaml", false)]);
        let client = FakeClusterClient::new();
        let health = ScriptedHealthOracle::new();
        client.fail_with("Deployment/prod/kafka-web", 503);

        let err = tick(&mut plan, &client, &health, 0).await.unwrap();
        assert!(!err.is_fatal());
        assert_eq!(plan.status.phases[0].status, ExecutionStatus::Error);
        assert_eq!(
            plan.status.phases[0].steps[0].status,
            ExecutionStatus::Error
        );
        assert_ne!(plan.status.status, ExecutionStatus::FatalError);

        // recovery: the errored step is re-entered and the plan completes
        client.clear_failure("Deployment/prod/kafka-web");
        assert!(tick(&mut plan, &client, &health, 1).await.is_none());
        assert_eq!(plan.status.status, ExecutionStatus::Complete);
    }
}

mod patching {
    use super::*;

    #[tokio::test]
    async fn custom_resources_fall_back_to_a_single_merge_patch() {
        let mut plan = plan_of(Strategy::Serial, &[("topic", "topic.yaml", false)]);
        let client = FakeClusterClient::new();
        let health = ScriptedHealthOracle::new();

        // the custom resource already exists and rejects strategic merge
        let mut existing = kudo_engine::testing::test_object(
            "KafkaTopic",
            "kafka.example.com/v1",
            "prod",
            "kafka-events",
        );
        existing.data = serde_json::json!({"spec": {"partitions": 6}});
        client.insert(existing);
        client.reject_strategic_patch("KafkaTopic/prod/kafka-events");

        assert!(tick(&mut plan, &client, &health, 0).await.is_none());
        assert_eq!(plan.status.status, ExecutionStatus::Complete);

        let patches: Vec<Op> = client
            .ops()
            .into_iter()
            .filter(|op| matches!(op, Op::PatchStrategic(_) | Op::PatchMerge(_)))
            .collect();
        assert_eq!(
            patches,
            vec![
                Op::PatchStrategic("KafkaTopic/prod/kafka-events".to_string()),
                Op::PatchMerge("KafkaTopic/prod/kafka-events".to_string()),
            ]
        );

        let stored = client.get_object("KafkaTopic/prod/kafka-events").unwrap();
        assert_eq!(stored.data.pointer("/spec/partitions").unwrap(), 12);
    }
}

mod deletion {
    use super::*;

    #[tokio::test]
    async fn delete_step_issues_foreground_delete_and_completes() {
        let mut plan = plan_of(Strategy::Serial, &[("drop", "deployment.yaml", true)]);
        let client = FakeClusterClient::new();
        let health = ScriptedHealthOracle::new();
        client.insert(kudo_engine::testing::test_object(
            "Deployment",
            "apps/v1",
            "prod",
            "kafka-web",
        ));

        assert!(tick(&mut plan, &client, &health, 0).await.is_none());
        assert_eq!(plan.status.status, ExecutionStatus::Complete);
        assert!(!client.contains("Deployment/prod/kafka-web"));
    }

    #[tokio::test]
    async fn deleting_an_already_absent_resource_is_success() {
        let mut plan = plan_of(Strategy::Serial, &[("drop", "deployment.yaml", true)]);
        let client = FakeClusterClient::new();
        let health = ScriptedHealthOracle::new();

        assert!(tick(&mut plan, &client, &health, 0).await.is_none());
        assert_eq!(plan.status.status, ExecutionStatus::Complete);
    }
}

mod properties {
    use super::*;

    #[tokio::test]
    async fn back_to_back_ticks_without_cluster_change_are_idempotent() {
        let mut plan = plan_of(Strategy::Serial, &[("srv", "deployment.yaml", false)]);
        let client = FakeClusterClient::new();
        let health = ScriptedHealthOracle::new();
        health.mark_unhealthy("Deployment/prod/kafka-web");

        tick(&mut plan, &client, &health, 0).await;
        let first = plan.status.clone();
        tick(&mut plan, &client, &health, 1).await;
        assert_eq!(plan.status, first);
        tick(&mut plan, &client, &health, 2).await;
        assert_eq!(plan.status, first);
    }

    #[tokio::test]
    async fn no_node_regresses_out_of_complete() {
        let mut plan = plan_of(
            Strategy::Parallel,
            &[
                ("one", "deployment.yaml", false),
                ("two", "aux.yaml", false),
            ],
        );
        let client = FakeClusterClient::new();
        let health = ScriptedHealthOracle::new();
        health.mark_unhealthy("Deployment/prod/kafka-web");

        tick(&mut plan, &client, &health, 0).await;
        assert_eq!(
            plan.status.phases[0].steps[1].status,
            ExecutionStatus::Complete
        );

        // more ticks while step one is still unhealthy
        for minute in 1..4 {
            tick(&mut plan, &client, &health, minute).await;
            assert_eq!(
                plan.status.phases[0].steps[1].status,
                ExecutionStatus::Complete
            );
        }

        health.mark_healthy("Deployment/prod/kafka-web");
        tick(&mut plan, &client, &health, 4).await;
        assert_eq!(plan.status.status, ExecutionStatus::Complete);
        for minute in 5..7 {
            tick(&mut plan, &client, &health, minute).await;
            assert_eq!(plan.status.status, ExecutionStatus::Complete);
        }
    }
}
