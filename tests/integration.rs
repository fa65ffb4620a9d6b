// ABOUTME: Integration tests verifying modules work together.
// ABOUTME: Builds a scheduler from JSON config and runs tasks against a fake model backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use switchyard::prelude::*;

/// Model backend that rate limits the named resources and echoes everything else.
struct FakeBackend {
    throttled: Vec<String>,
    calls: AtomicU32,
}

impl FakeBackend {
    fn new(throttled: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            throttled: throttled.iter().map(|s| s.to_string()).collect(),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait::async_trait]
impl ModelCall for FakeBackend {
    async fn call(&self, resource: &str, task: &Task) -> Result<Value, OperationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.throttled.iter().any(|name| name == resource) {
            return Err(OperationError::from_status(429, "Too Many Requests"));
        }
        Ok(json!({ "handled_by": resource, "input": task.payload }))
    }
}

fn config() -> EngineConfig {
    serde_json::from_value(json!({
        "workers": {
            "analyzer": {
                "type": "model",
                "capabilities": ["code_analysis"],
                "required_capabilities": ["code_review"]
            },
            "writer": { "type": "model", "capabilities": ["documentation"] },
            "scaffolder": { "type": "model", "enabled": false }
        },
        "workflows": {
            "code_development": ["analyzer", "scaffolder", "writer"]
        },
        "resources": {
            "gpt-4": { "priority": 1, "capabilities": ["chat", "code_review"] },
            "gpt-3.5-turbo": { "priority": 2, "capabilities": ["chat"] }
        },
        "rate_limits": { "requests_per_minute": 10, "requests_per_hour": 100 },
        "retry": { "max_retries": 2, "retry_delay_ms": 10 },
        "scheduler": { "poll_interval_ms": 10 }
    }))
    .expect("config should deserialize")
}

fn factory(backend: Arc<FakeBackend>) -> WorkerFactory {
    WorkerFactory::new().with("model", move |ctx: WorkerContext| {
        Ok(Arc::new(ModelWorker::new(ctx, backend.clone())) as Arc<dyn Worker>)
    })
}

#[tokio::test]
async fn test_workflow_from_config() -> Result<(), SwitchyardError> {
    let backend = FakeBackend::new(&[]);
    let scheduler = Scheduler::from_config(&config(), &factory(backend.clone())).await?;

    let id = scheduler
        .submit(Task::from_value(json!({"code": "def f(): pass"})).in_workflow("code_development"))
        .await;
    let result = scheduler.process_next().await.expect("queued task")?;

    assert_eq!(result.task_id, id);
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.worker_id.as_deref(), Some("writer"));
    assert_eq!(result.payload["resource"], "gpt-4");

    // The writer saw the analyzer's output as its input
    let analyzer_output = &result.payload["result"]["input"];
    assert_eq!(analyzer_output["resource"], "gpt-4");
    assert_eq!(analyzer_output["result"]["input"]["code"], "def f(): pass");

    // The disabled scaffolder was skipped, not run
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert!(scheduler.get_worker_status("scaffolder").await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_rate_limited_resource_fails_over() -> Result<(), SwitchyardError> {
    let backend = FakeBackend::new(&["gpt-4"]);
    let scheduler = Scheduler::from_config(&config(), &factory(backend.clone())).await?;

    scheduler
        .submit(Task::from_value(json!({"question": "why?"})).for_worker("writer"))
        .await;
    let result = scheduler.process_next().await.expect("queued task")?;

    assert_eq!(result.payload["resource"], "gpt-3.5-turbo");
    let resources = scheduler.get_resource_status().await;
    assert!(!resources["gpt-4"].enabled);
    assert!(resources["gpt-3.5-turbo"].is_current);

    // The analyzer needs code_review, which only the disabled gpt-4 offers
    scheduler
        .submit(Task::from_value(json!({"code": "x"})).for_worker("analyzer"))
        .await;
    let result = scheduler.process_next().await.expect("queued task")?;
    assert!(result.is_failed());

    let status = scheduler.get_worker_status("analyzer").await.expect("analyzer exists");
    assert_eq!(status.status, WorkerStatus::Error);
    assert_eq!(status.capabilities, vec!["code_analysis"]);
    Ok(())
}

#[tokio::test]
async fn test_background_processing() -> Result<(), SwitchyardError> {
    let backend = FakeBackend::new(&[]);
    let scheduler = Scheduler::from_config(&config(), &factory(backend)).await?;
    scheduler.start().await;

    for i in 0..5 {
        scheduler
            .submit(Task::from_value(json!({ "n": i })).for_worker("writer"))
            .await;
    }
    scheduler
        .submit(Task::from_value(json!({})).for_worker("nobody"))
        .await;

    let mut stats = scheduler.stats().await;
    for _ in 0..300 {
        if stats.queued == 0 && stats.completed + stats.dropped == 6 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        stats = scheduler.stats().await;
    }
    scheduler.stop().await;

    assert_eq!(stats.submitted, 6);
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.dropped, 1);
    assert_eq!(
        scheduler.get_worker_status("writer").await.map(|s| s.status),
        Some(WorkerStatus::Running)
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_worker_kind_is_a_config_error() {
    let mut config = config();
    config.workers.insert("frontend".into(), WorkerConfig::new("react"));

    let result = Scheduler::from_config(&config, &factory(FakeBackend::new(&[]))).await;
    let err: SwitchyardError = result.err().expect("unknown kind must fail").into();
    assert!(err.to_string().contains("unknown type 'react'"));
}
