//! Workflow engine integration tests

mod common;

use axum::{http::StatusCode, routing::post, Router};
use common::{test_env, test_env_with_llm, wait_for_executions, workflow_request, ScriptedLlm};
use serde_json::json;
use std::time::Duration;
use waflow::error::{EngineError, SchedulerError};
use waflow::workflow::{ExecutionStatus, LogStep, TriggerData, UpdateWorkflowRequest};

const TENANT: &str = "tenant-a";

fn data(value: serde_json::Value) -> TriggerData {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn failing_action_does_not_stop_the_run() {
    let env = test_env().await;
    let workflow = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "notify",
                "trigger_type": "manual",
                "actions": [
                    { "type": "send_whatsapp", "config": { "recipient": "fail", "message": "hi" } },
                    { "type": "send_whatsapp", "config": { "message": "Hello {name}" } }
                ]
            })),
        )
        .await
        .unwrap();

    let execution = env
        .engine
        .execute_workflow(TENANT, &workflow.id, data(json!({ "from": "628111", "name": "Budi" })), None)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.actions_failed, 1);
    assert_eq!(execution.actions_completed, 1);
    assert!(execution.error_message.is_none());

    let action_entries: Vec<_> = execution
        .execution_log
        .iter()
        .filter(|e| e.step == LogStep::Action)
        .collect();
    assert_eq!(action_entries.len(), 2);
    assert!(!action_entries[0].success);
    assert!(action_entries[0].error.as_deref().unwrap().contains("gateway rejected"));
    assert!(action_entries[1].success);

    assert_eq!(env.messenger.sent(), vec![("628111".to_string(), "Hello Budi".to_string())]);

    let stored = env.engine.get_execution(TENANT, &execution.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    assert_eq!(stored.actions_failed, 1);
    assert!(stored.duration_ms.is_some());
}

#[tokio::test]
async fn unmet_conditions_complete_without_actions() {
    let env = test_env().await;
    let workflow = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "big orders",
                "trigger_type": "manual",
                "conditions": [{ "field": "total_amount", "operator": "greater_than", "value": 100000 }],
                "actions": [{ "type": "send_whatsapp", "config": { "recipient": "628111", "message": "big!" } }]
            })),
        )
        .await
        .unwrap();

    let execution = env
        .engine
        .execute_workflow(TENANT, &workflow.id, data(json!({ "total_amount": 5000 })), None)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.actions_completed, 0);
    assert_eq!(execution.actions_failed, 0);
    assert!(env.messenger.sent().is_empty());
}

#[tokio::test]
async fn condition_error_fails_the_run() {
    let env = test_env().await;
    let workflow = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "needs status",
                "trigger_type": "manual",
                "conditions": [{ "field": "status", "operator": "equals", "value": "paid" }],
                "actions": [{ "type": "log_message", "config": { "message": "paid" } }]
            })),
        )
        .await
        .unwrap();

    let err = env
        .engine
        .execute_workflow(TENANT, &workflow.id, TriggerData::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Condition(_)));

    let history = env.engine.list_executions(TENANT, &workflow.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExecutionStatus::Failed);
    assert!(history[0].error_message.as_deref().unwrap().contains("status"));
    assert!(history[0].completed_at.is_some());
}

#[tokio::test]
async fn corrupt_stored_actions_fail_the_run() {
    let env = test_env().await;
    let workflow = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "corrupted",
                "trigger_type": "manual",
                "actions": [{ "type": "log_message", "config": { "message": "hi" } }]
            })),
        )
        .await
        .unwrap();

    sqlx::query("UPDATE workflows SET actions = 'not json' WHERE id = ?")
        .bind(&workflow.id)
        .execute(&env.pool)
        .await
        .unwrap();

    let err = env
        .engine
        .execute_workflow(TENANT, &workflow.id, TriggerData::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CorruptDefinition(_)));

    let history = env.engine.list_executions(TENANT, &workflow.id, 10).await.unwrap();
    assert_eq!(history[0].status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn save_time_validation() {
    let env = test_env().await;

    let unknown_action = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "bad",
                "trigger_type": "manual",
                "actions": [{ "type": "send_fax", "config": {} }]
            })),
        )
        .await
        .unwrap_err();
    assert!(matches!(unknown_action, EngineError::Validation(_)));

    let missing_event = env
        .engine
        .create_workflow(TENANT, workflow_request(json!({ "name": "bad", "trigger_type": "event" })))
        .await
        .unwrap_err();
    assert!(matches!(missing_event, EngineError::Validation(_)));

    let bad_cron = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "bad",
                "trigger_type": "scheduled",
                "trigger_config": { "cron_expression": "every tuesday" }
            })),
        )
        .await
        .unwrap_err();
    assert!(matches!(bad_cron, EngineError::Scheduler(SchedulerError::InvalidCron { .. })));

    assert!(env.engine.list_workflows(TENANT).await.unwrap().is_empty());
    assert!(env.engine.scheduler().is_empty().await);
}

#[tokio::test]
async fn schedule_follows_workflow_lifecycle() {
    let env = test_env().await;
    let scheduler = env.engine.scheduler();

    let workflow = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "daily report",
                "trigger_type": "scheduled",
                "trigger_config": { "cron_expression": "0 0 9 * * *" },
                "actions": [{ "type": "log_message", "config": { "message": "report" } }]
            })),
        )
        .await
        .unwrap();
    assert_eq!(scheduler.len().await, 1);
    assert!(scheduler.has_workflow(&workflow.id).await);

    let deactivate = UpdateWorkflowRequest {
        is_active: Some(false),
        ..Default::default()
    };
    env.engine.update_workflow(TENANT, &workflow.id, deactivate).await.unwrap();
    assert_eq!(scheduler.len().await, 0);

    let reactivate = UpdateWorkflowRequest {
        is_active: Some(true),
        ..Default::default()
    };
    env.engine.update_workflow(TENANT, &workflow.id, reactivate).await.unwrap();
    assert_eq!(scheduler.len().await, 1);

    let rename = UpdateWorkflowRequest {
        name: Some("morning report".into()),
        ..Default::default()
    };
    let renamed = env.engine.update_workflow(TENANT, &workflow.id, rename).await.unwrap();
    assert_eq!(renamed.name, "morning report");
    assert_eq!(scheduler.len().await, 1);

    env.engine.delete_workflow(TENANT, &workflow.id).await.unwrap();
    assert_eq!(scheduler.len().await, 0);
    assert!(matches!(
        env.engine.get_workflow(TENANT, &workflow.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn failed_update_keeps_the_previous_schedule() {
    let env = test_env().await;
    let scheduler = env.engine.scheduler();

    let active = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "hourly sync",
                "trigger_type": "scheduled",
                "trigger_config": { "cron_expression": "0 0 * * * *" },
                "actions": [{ "type": "log_message", "config": { "message": "sync" } }]
            })),
        )
        .await
        .unwrap();
    let inactive = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "paused sync",
                "trigger_type": "scheduled",
                "trigger_config": { "cron_expression": "0 30 * * * *" },
                "is_active": false,
                "actions": [{ "type": "log_message", "config": { "message": "sync" } }]
            })),
        )
        .await
        .unwrap();

    sqlx::query(
        "CREATE TRIGGER workflows_read_only BEFORE UPDATE ON workflows BEGIN SELECT RAISE(ABORT, 'read only'); END",
    )
    .execute(&env.pool)
    .await
    .unwrap();

    let deactivate = UpdateWorkflowRequest {
        is_active: Some(false),
        ..Default::default()
    };
    let err = env.engine.update_workflow(TENANT, &active.id, deactivate).await.unwrap_err();
    assert!(matches!(err, EngineError::Database(_)));
    assert!(scheduler.has_workflow(&active.id).await);

    let reschedule = UpdateWorkflowRequest {
        trigger_config: Some(serde_json::from_value(json!({ "cron_expression": "0 15 * * * *" })).unwrap()),
        ..Default::default()
    };
    assert!(env.engine.update_workflow(TENANT, &active.id, reschedule).await.is_err());
    assert!(scheduler.has_workflow(&active.id).await);

    let activate = UpdateWorkflowRequest {
        is_active: Some(true),
        ..Default::default()
    };
    assert!(env.engine.update_workflow(TENANT, &inactive.id, activate).await.is_err());
    assert!(!scheduler.has_workflow(&inactive.id).await);
    assert_eq!(scheduler.len().await, 1);
}

#[tokio::test]
async fn load_schedules_registers_active_scheduled_workflows() {
    let env = test_env().await;

    for (name, active) in [("on", true), ("off", false)] {
        env.engine
            .create_workflow(
                TENANT,
                workflow_request(json!({
                    "name": name,
                    "trigger_type": "scheduled",
                    "trigger_config": { "cron": "0 */5 * * * *" },
                    "is_active": active
                })),
            )
            .await
            .unwrap();
    }

    // Simulate a restart with an empty scheduler
    for workflow in env.engine.list_workflows(TENANT).await.unwrap() {
        env.engine.scheduler().remove_workflow(&workflow.id).await;
    }
    assert!(env.engine.scheduler().is_empty().await);

    assert_eq!(env.engine.load_schedules().await.unwrap(), 1);
    assert_eq!(env.engine.scheduler().len().await, 1);
}

#[tokio::test]
async fn events_fan_out_to_matching_workflows() {
    let env = test_env().await;

    let mut matching = Vec::new();
    for pattern in ["transaction_created", "transaction_*", "*"] {
        let workflow = env
            .engine
            .create_workflow(
                TENANT,
                workflow_request(json!({
                    "name": pattern,
                    "trigger_type": "event",
                    "trigger_config": { "event_name": pattern },
                    "actions": [{ "type": "log_message", "config": { "message": "tx {transaction_id}" } }]
                })),
            )
            .await
            .unwrap();
        matching.push(workflow.id);
    }

    let other = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "payments",
                "trigger_type": "event",
                "trigger_config": { "event": "payment_received" }
            })),
        )
        .await
        .unwrap();

    // Same event name in another tenant must not fire
    env.engine
        .create_workflow(
            "tenant-b",
            workflow_request(json!({
                "name": "other tenant",
                "trigger_type": "event",
                "trigger_config": { "event_name": "transaction_created" }
            })),
        )
        .await
        .unwrap();

    let started = env
        .engine
        .handle_event(TENANT, "transaction_created", data(json!({ "transaction_id": "TX-1" })), None)
        .await
        .unwrap();
    assert_eq!(started, 3);

    for id in &matching {
        let executions = wait_for_executions(&env.engine, TENANT, id, 1).await;
        assert_eq!(executions[0].status, ExecutionStatus::Completed);
        assert_eq!(executions[0].actions_completed, 1);
        assert_eq!(executions[0].trigger_data["event"], "transaction_created");
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(env.engine.list_executions(TENANT, &other.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn llm_response_feeds_later_actions() {
    let env = test_env().await;
    let workflow = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "auto reply",
                "trigger_type": "manual",
                "actions": [
                    { "type": "call_llm", "config": { "system_prompt": "You are a shop assistant", "user_prompt": "Reply to: {text}" } },
                    { "type": "send_whatsapp", "config": { "message": "{llm_response}" } }
                ]
            })),
        )
        .await
        .unwrap();

    let execution = env
        .engine
        .execute_workflow(TENANT, &workflow.id, data(json!({ "from": "628222", "text": "is it in stock?" })), None)
        .await
        .unwrap();

    assert_eq!(execution.actions_completed, 2);
    assert_eq!(
        env.llm.prompts(),
        vec![("You are a shop assistant".to_string(), "Reply to: is it in stock?".to_string())]
    );
    assert_eq!(
        env.messenger.sent(),
        vec![("628222".to_string(), "Thanks for your order!".to_string())]
    );
}

#[tokio::test]
async fn update_database_applies_interpolated_updates() {
    let env = test_env().await;
    sqlx::query("CREATE TABLE orders (id TEXT PRIMARY KEY, status TEXT NOT NULL)")
        .execute(&env.pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO orders (id, status) VALUES ('ORD-1', 'new'), ('ORD-2', 'new')")
        .execute(&env.pool)
        .await
        .unwrap();

    let workflow = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "mark paid",
                "trigger_type": "manual",
                "actions": [{
                    "type": "update_database",
                    "config": { "table": "orders", "updates": { "status": "{new_status}" }, "where": { "id": "{order_id}" } }
                }]
            })),
        )
        .await
        .unwrap();

    let execution = env
        .engine
        .execute_workflow(TENANT, &workflow.id, data(json!({ "order_id": "ORD-1", "new_status": "paid" })), None)
        .await
        .unwrap();
    assert_eq!(execution.actions_completed, 1);

    let statuses: Vec<(String, String)> = sqlx::query_as("SELECT id, status FROM orders ORDER BY id")
        .fetch_all(&env.pool)
        .await
        .unwrap();
    assert_eq!(
        statuses,
        vec![("ORD-1".into(), "paid".into()), ("ORD-2".into(), "new".into())]
    );
}

#[tokio::test]
async fn update_database_cannot_touch_engine_tables() {
    let env = test_env().await;
    let victim = env
        .engine
        .create_workflow(
            "tenant-b",
            workflow_request(json!({
                "name": "nightly",
                "trigger_type": "scheduled",
                "trigger_config": { "cron_expression": "0 0 3 * * *" },
                "actions": [{ "type": "log_message", "config": { "message": "tick" } }]
            })),
        )
        .await
        .unwrap();

    let workflow = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "tamper",
                "trigger_type": "manual",
                "actions": [
                    { "type": "update_database", "config": { "table": "workflows", "updates": { "is_active": false, "name": "taken" }, "where": { "id": "{target}" } } },
                    { "type": "update_database", "config": { "table": "jobs", "updates": { "status": "cancelled" }, "where": { "tenant_id": "tenant-b" } } }
                ]
            })),
        )
        .await
        .unwrap();

    let execution = env
        .engine
        .execute_workflow(TENANT, &workflow.id, data(json!({ "target": victim.id })), None)
        .await
        .unwrap();
    assert_eq!(execution.actions_completed, 0);
    assert_eq!(execution.actions_failed, 2);
    assert!(execution
        .execution_log
        .iter()
        .filter_map(|e| e.error.as_deref())
        .all(|e| e.contains("reserved")));

    let untouched = env.engine.get_workflow("tenant-b", &victim.id).await.unwrap();
    assert_eq!(untouched.name, "nightly");
    assert!(untouched.is_active);
    assert!(env.engine.scheduler().has_workflow(&victim.id).await);
}

#[tokio::test]
async fn call_api_error_status_is_an_action_failure() {
    let app = Router::new()
        .route("/ok", post(|| async { StatusCode::NO_CONTENT }))
        .route("/broken", post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let env = test_env().await;
    let workflow = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "webhooks",
                "trigger_type": "manual",
                "actions": [
                    { "type": "call_api", "config": { "url": format!("http://{}/broken", addr), "body": { "id": "{id}" } } },
                    { "type": "call_api", "config": { "url": format!("http://{}/ok", addr) } }
                ]
            })),
        )
        .await
        .unwrap();

    let execution = env
        .engine
        .execute_workflow(TENANT, &workflow.id, data(json!({ "id": 7 })), None)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.actions_failed, 1);
    assert_eq!(execution.actions_completed, 1);

    let error = execution
        .execution_log
        .iter()
        .find_map(|e| e.error.clone())
        .unwrap();
    assert!(error.contains("500"));
    assert!(error.contains("upstream exploded"));
}

#[tokio::test]
async fn deadline_fails_slow_actions_but_not_the_run() {
    let mut llm = ScriptedLlm::new("too late");
    llm.delay = Duration::from_millis(500);
    let env = test_env_with_llm(llm).await;

    let workflow = env
        .engine
        .create_workflow(
            TENANT,
            workflow_request(json!({
                "name": "slow",
                "trigger_type": "manual",
                "actions": [
                    { "type": "call_llm", "config": { "user_prompt": "hi" } },
                    { "type": "log_message", "config": { "message": "after" } }
                ]
            })),
        )
        .await
        .unwrap();

    let execution = env
        .engine
        .execute_workflow(TENANT, &workflow.id, TriggerData::new(), Some(Duration::from_millis(100)))
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.actions_failed, 2);
    assert!(execution
        .execution_log
        .iter()
        .filter_map(|e| e.error.as_deref())
        .all(|e| e.contains("deadline")));
}

#[tokio::test]
async fn workflows_are_tenant_scoped() {
    let env = test_env().await;
    let workflow = env
        .engine
        .create_workflow(TENANT, workflow_request(json!({ "name": "mine", "trigger_type": "manual" })))
        .await
        .unwrap();

    assert!(matches!(
        env.engine.get_workflow("tenant-b", &workflow.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        env.engine.delete_workflow("tenant-b", &workflow.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(env.engine.list_workflows("tenant-b").await.unwrap().is_empty());
}
