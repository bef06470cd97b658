use std::time::Duration;

use collab_core::bridge::BridgeReply;
use collab_core::config::CollabConfig;
use collab_core::execution::{ExecutionAdapter, RemoteAssignment};
use collab_core::models::{CoreErrorKind, TaskId, TaskStatus, WorkerId};
use collab_core::runtime::CollabRuntime;
use serde_json::json;
use tokio::sync::mpsc;

const WAIT: Option<Duration> = Some(Duration::from_secs(2));

const CONFIG: &str = r#"
[[workers]]
id = "code_assistant"
display_name = "Code Assistant"
capabilities = ["code_completion", "bug_detection"]
max_concurrent = 2

[[workers]]
id = "reviewer"
capabilities = ["review"]
max_concurrent = 1
kind = "remote"

[simulation]
scale = 0.0
"#;

fn start() -> (CollabRuntime, mpsc::UnboundedReceiver<RemoteAssignment>) {
    let config = CollabConfig::from_toml_str(CONFIG).unwrap();
    let mut runtime = CollabRuntime::start(&config).unwrap();
    let assignments = runtime.take_assignments().unwrap();
    (runtime, assignments)
}

fn accepted(reply: BridgeReply) -> TaskId {
    match reply {
        BridgeReply::TaskAccepted { task_id } => task_id,
        other => panic!("expected taskAccepted, got {other:?}"),
    }
}

fn error_kind(reply: BridgeReply) -> CoreErrorKind {
    match reply {
        BridgeReply::Error { error } => error.kind,
        other => panic!("expected error reply, got {other:?}"),
    }
}

async fn next_assignment(
    assignments: &mut mpsc::UnboundedReceiver<RemoteAssignment>,
) -> RemoteAssignment {
    tokio::time::timeout(Duration::from_secs(2), assignments.recv())
        .await
        .expect("no assignment sent in time")
        .expect("assignment channel closed")
}

#[tokio::test]
async fn simulated_workers_complete_submitted_tasks() {
    let (runtime, _assignments) = start();
    let bridge = runtime.bridge();

    let task_id = accepted(bridge.handle_json(
        r#"{"action":"SUBMIT_TASK","data":{"type":"code_completion","data":{"line":"fn main"},"priority":"high"}}"#,
    ));
    let snapshot = runtime
        .dispatcher()
        .wait_for_terminal(task_id, WAIT)
        .await
        .unwrap();
    assert_eq!(snapshot.status, TaskStatus::Completed);
    let result = snapshot.result().unwrap();
    assert_eq!(result["worker"], "code_assistant");
    assert_eq!(result["taskType"], "code_completion");
    assert_eq!(result["echo"], json!({"line": "fn main"}));

    let failing = accepted(bridge.handle_json(
        r#"{"action":"SUBMIT_TASK","data":{"type":"bug_detection","data":{"simulateFailure":"model offline"}}}"#,
    ));
    let snapshot = runtime
        .dispatcher()
        .wait_for_terminal(failing, WAIT)
        .await
        .unwrap();
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.error().unwrap().message, "model offline");
}

#[tokio::test]
async fn remote_worker_round_trip_through_task_result() {
    let (runtime, mut assignments) = start();
    let bridge = runtime.bridge();

    let task_id = accepted(bridge.handle_json(
        r#"{"action":"SUBMIT_TASK","data":{"type":"review","data":{"pr":42}}}"#,
    ));
    let assignment = next_assignment(&mut assignments).await;
    assert_eq!(assignment.task.id, task_id);
    assert_eq!(assignment.worker, WorkerId::from("reviewer"));
    assert_eq!(assignment.task.status, TaskStatus::Processing);

    let reply = bridge.handle_json(&format!(
        r#"{{"action":"TASK_RESULT","data":{{"taskId":{},"result":{{"approved":true}}}}}}"#,
        task_id.0
    ));
    assert_eq!(reply, BridgeReply::ResultAccepted { task_id });

    let snapshot = runtime
        .dispatcher()
        .wait_for_terminal(task_id, WAIT)
        .await
        .unwrap();
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.result(), Some(&json!({"approved": true})));

    // The result was consumed; a duplicate report is refused.
    let duplicate = bridge.handle_json(&format!(
        r#"{{"action":"TASK_RESULT","data":{{"taskId":{},"result":null}}}}"#,
        task_id.0
    ));
    assert_eq!(error_kind(duplicate), CoreErrorKind::UnknownTask);
}

#[tokio::test]
async fn remote_error_report_fails_the_task_and_drains_overflow() {
    let (runtime, mut assignments) = start();
    let bridge = runtime.bridge();

    let first = accepted(
        bridge.handle_json(r#"{"action":"SUBMIT_TASK","data":{"type":"review"}}"#),
    );
    let second = accepted(
        bridge.handle_json(r#"{"action":"SUBMIT_TASK","data":{"type":"review"}}"#),
    );
    assert_eq!(next_assignment(&mut assignments).await.task.id, first);

    let both = bridge.handle_json(&format!(
        r#"{{"action":"TASK_RESULT","data":{{"taskId":{},"result":1,"error":"x"}}}}"#,
        first.0
    ));
    assert_eq!(error_kind(both), CoreErrorKind::Protocol);

    bridge.handle_json(&format!(
        r#"{{"action":"TASK_RESULT","data":{{"taskId":{},"error":"reviewer crashed"}}}}"#,
        first.0
    ));
    let failed = runtime
        .dispatcher()
        .wait_for_terminal(first, WAIT)
        .await
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    let error = failed.error().unwrap();
    assert_eq!(error.kind, CoreErrorKind::ExecutionFailure);
    assert_eq!(error.message, "reviewer crashed");
    assert_eq!(error.worker, Some(WorkerId::from("reviewer")));

    assert_eq!(next_assignment(&mut assignments).await.task.id, second);
}

#[tokio::test]
async fn external_workers_register_through_the_bridge() {
    let (runtime, mut assignments) = start();
    let bridge = runtime.bridge();

    let reply = bridge.handle_json(
        r#"{"type":"AI_COLLABORATION","action":"REGISTER_AI",
            "data":{"id":"painter","name":"Painter","capabilities":["ui_design"],"maxConcurrent":2}}"#,
    );
    let BridgeReply::WorkerRegistered { worker } = reply else {
        panic!("expected workerRegistered, got {reply:?}");
    };
    assert_eq!(worker.display_name, "Painter");
    assert_eq!(worker.max_concurrent, 2);
    assert!(runtime.routes().is_remote(&WorkerId::from("painter")));

    let task_id = accepted(
        bridge.handle_json(r#"{"action":"SUBMIT_TASK","data":{"type":"ui_design"}}"#),
    );
    let assignment = next_assignment(&mut assignments).await;
    assert_eq!((assignment.task.id, assignment.worker.as_str()), (task_id, "painter"));

    let rejected = bridge.handle_json(
        r#"{"action":"REGISTER_WORKER","data":{"id":"broken","capabilities":["x"],"maxConcurrent":0}}"#,
    );
    assert_eq!(error_kind(rejected), CoreErrorKind::InvalidConfiguration);
    assert!(!runtime.routes().routes(&WorkerId::from("broken")));

    // Re-registering a simulated worker keeps its local route.
    let reply = bridge.handle_json(
        r#"{"action":"REGISTER_WORKER","data":{"id":"code_assistant","capabilities":["code_completion"],"maxConcurrent":4}}"#,
    );
    assert!(matches!(reply, BridgeReply::WorkerRegistered { .. }));
    assert!(!runtime.routes().is_remote(&WorkerId::from("code_assistant")));
}

#[tokio::test]
async fn bridge_reports_rejections_as_error_replies() {
    let (runtime, _assignments) = start();
    let bridge = runtime.bridge();

    assert_eq!(
        error_kind(bridge.handle_json(r#"{"action":"SUBMIT_TASK","data":{"type":"painting"}}"#)),
        CoreErrorKind::NoEligibleWorker
    );
    assert_eq!(
        error_kind(bridge.handle_json(r#"{"action":"SHUTDOWN","data":{}}"#)),
        CoreErrorKind::Protocol
    );
    assert_eq!(
        error_kind(bridge.handle_json("{")),
        CoreErrorKind::Protocol
    );
    assert_eq!(runtime.dispatcher().queued_len().unwrap(), 0);
}
