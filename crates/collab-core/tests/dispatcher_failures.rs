use std::sync::Arc;
use std::time::Duration;

use collab_core::config::DispatcherConfig;
use collab_core::execution::{RoutingTable, execution_failure, routine_fn};
use collab_core::models::{
    CoreErrorKind, Priority, TaskId, TaskPlacement, TaskRequest, TaskSnapshot, TaskStatus,
    TaskTerminalState, WorkerDescriptor, WorkerId,
};
use collab_core::orchestration::Dispatcher;
use serde_json::{Value, json};
use tokio::sync::Notify;

const WAIT: Option<Duration> = Some(Duration::from_secs(2));

/// Routine that fails or panics on request and otherwise echoes the payload
/// once `release` is notified (or immediately when no gate is given).
fn scripted_routes(workers: &[&str], release: Option<Arc<Notify>>) -> Arc<RoutingTable> {
    let routes = Arc::new(RoutingTable::new());
    for worker in workers {
        let release = release.clone();
        routes
            .register_routine(
                *worker,
                routine_fn(move |task: TaskSnapshot| {
                    let release = release.clone();
                    async move {
                        if let Some(release) = release {
                            release.notified().await;
                        }
                        match task.payload.get("mode").and_then(Value::as_str) {
                            Some("fail") => Err(execution_failure("scripted failure")),
                            Some("panic") => panic!("scripted panic"),
                            _ => Ok(task.payload.clone()),
                        }
                    }
                }),
            )
            .unwrap();
    }
    routes
}

fn request(mode: &str) -> TaskRequest {
    TaskRequest::new("x", json!({ "mode": mode }))
}

#[tokio::test]
async fn failing_task_does_not_affect_others() {
    let routes = scripted_routes(&["w1", "w2"], None);
    let dispatcher = Dispatcher::start(routes, DispatcherConfig::default()).unwrap();
    dispatcher
        .register_worker("w1", WorkerDescriptor::new(["x"], 1))
        .unwrap();
    dispatcher
        .register_worker("w2", WorkerDescriptor::new(["x"], 1))
        .unwrap();

    let failing = dispatcher.submit(request("fail")).unwrap();
    let beside = dispatcher.submit(request("ok")).unwrap();
    let behind = dispatcher.submit(request("ok")).unwrap();

    let failed = dispatcher.wait_for_terminal(failing, WAIT).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    let error = failed.error().unwrap();
    assert_eq!(error.kind, CoreErrorKind::ExecutionFailure);
    assert_eq!(error.task, Some(failing));
    assert_eq!(error.worker, Some(WorkerId::from("w1")));

    for task_id in [beside, behind] {
        let snapshot = dispatcher.wait_for_terminal(task_id, WAIT).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result(), Some(&json!({"mode": "ok"})));
    }

    for worker in dispatcher.workers().unwrap() {
        assert_eq!(worker.current_active, 0);
        assert!(worker.overflow.is_empty());
    }
}

#[tokio::test]
async fn panicking_routine_settles_as_execution_failure() {
    let routes = scripted_routes(&["w1"], None);
    let dispatcher = Dispatcher::start(routes, DispatcherConfig::default()).unwrap();
    dispatcher
        .register_worker("w1", WorkerDescriptor::new(["x"], 1))
        .unwrap();

    let panicking = dispatcher.submit(request("panic")).unwrap();
    let next = dispatcher.submit(request("ok")).unwrap();

    let failed = dispatcher.wait_for_terminal(panicking, WAIT).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error().unwrap().kind, CoreErrorKind::ExecutionFailure);

    let completed = dispatcher.wait_for_terminal(next, WAIT).await.unwrap();
    assert_eq!(completed.status, TaskStatus::Completed);
    assert_eq!(
        dispatcher.worker(&WorkerId::from("w1")).unwrap().current_active,
        0
    );
}

#[tokio::test]
async fn worker_losing_its_route_fails_tasks_as_unroutable() {
    let routes = scripted_routes(&["w1"], None);
    let dispatcher = Dispatcher::start(routes.clone(), DispatcherConfig::default()).unwrap();
    dispatcher
        .register_worker("w1", WorkerDescriptor::new(["x"], 1))
        .unwrap();
    assert!(routes.detach(&WorkerId::from("w1")));

    let task_id = dispatcher.submit(request("ok")).unwrap();
    let snapshot = dispatcher.wait_for_terminal(task_id, WAIT).await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Failed);
    let error = snapshot.error().unwrap();
    assert_eq!(error.kind, CoreErrorKind::UnroutableWorker);
    assert_eq!(error.worker, Some(WorkerId::from("w1")));
    assert_eq!(
        dispatcher.worker(&WorkerId::from("w1")).unwrap().current_active,
        0
    );
}

#[tokio::test]
async fn only_queued_tasks_can_be_cancelled() {
    let release = Arc::new(Notify::new());
    let routes = scripted_routes(&["w1"], Some(release.clone()));
    let dispatcher = Dispatcher::start(routes, DispatcherConfig::default()).unwrap();
    let mut events = dispatcher.subscribe();
    dispatcher
        .register_worker("w1", WorkerDescriptor::new(["x"], 1))
        .unwrap();

    let running = dispatcher.submit(request("ok")).unwrap();
    let parked = dispatcher.submit(request("ok")).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        dispatcher.task(parked).unwrap().placement,
        TaskPlacement::Overflow(WorkerId::from("w1"))
    );

    // Still in the global queue: the scheduler loop has not run yet.
    let fresh = dispatcher
        .submit(request("ok").with_priority(Priority::Critical))
        .unwrap();
    let cancelled = dispatcher.cancel(fresh).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.terminal_state, Some(TaskTerminalState::Cancelled));
    assert_eq!(dispatcher.queued_len().unwrap(), 0);

    let cancelled = dispatcher.cancel(parked).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(dispatcher
        .worker(&WorkerId::from("w1"))
        .unwrap()
        .overflow
        .is_empty());

    let error = dispatcher.cancel(running).unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::InvalidTransition);
    assert_eq!(dispatcher.cancel(parked).unwrap().status, TaskStatus::Cancelled);
    assert_eq!(
        dispatcher.cancel(TaskId(77)).unwrap_err().kind,
        CoreErrorKind::UnknownTask
    );

    release.notify_one();
    let done = dispatcher.wait_for_terminal(running, WAIT).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(
        dispatcher.worker(&WorkerId::from("w1")).unwrap().current_active,
        0
    );

    let mut cancelled_events = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.name() == "taskCancelled" {
            cancelled_events.extend(event.task_id());
        }
    }
    assert_eq!(cancelled_events, vec![fresh, parked]);
}

#[tokio::test]
async fn terminal_tasks_beyond_retention_are_forgotten() {
    let routes = scripted_routes(&["w1"], None);
    let config = DispatcherConfig {
        terminal_retention: 2,
        ..DispatcherConfig::default()
    };
    let dispatcher = Dispatcher::start(routes, config).unwrap();
    dispatcher
        .register_worker("w1", WorkerDescriptor::new(["x"], 1))
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let task_id = dispatcher.submit(request("ok")).unwrap();
        dispatcher.wait_for_terminal(task_id, WAIT).await.unwrap();
        tasks.push(task_id);
    }

    assert_eq!(
        dispatcher.task(tasks[0]).unwrap_err().kind,
        CoreErrorKind::UnknownTask
    );
    assert_eq!(dispatcher.task(tasks[2]).unwrap().status, TaskStatus::Completed);

    dispatcher.evict(tasks[2]).unwrap();
    assert_eq!(
        dispatcher.task(tasks[2]).unwrap_err().kind,
        CoreErrorKind::UnknownTask
    );
}
