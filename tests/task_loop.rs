mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::timeout;

use async_trait::async_trait;
use longrun_server::bus::{BroadcastSink, ProgressSink};
use longrun_server::cancel::CancelStore;
use longrun_server::events::{
    ProgressEvent, TASK_CANCELLED, TASK_FINISHED, TASK_PROGRESS, TASK_STARTED,
};
use longrun_server::task::{run_step, run_task, StepOutcome, TaskContext, TaskStatus};

use common::{drain, percents, quick_task_config, slow_task_config, test_db};

/// Sets the cancellation flag as soon as `task_progress{0}` goes out, i.e.
/// after `task_started` but before the first iteration begins.
struct CancelOnFirstProgress {
    inner: BroadcastSink,
    cancel: CancelStore,
    sid: String,
}

#[async_trait]
impl ProgressSink for CancelOnFirstProgress {
    async fn emit(&self, event: ProgressEvent) {
        let first_progress = event.event == TASK_PROGRESS && event.payload["percent"] == 0;
        self.inner.emit(event).await;
        if first_progress {
            self.cancel.set(&self.sid).await.unwrap();
        }
    }
}

#[tokio::test]
async fn three_iterations_emit_ordered_progress_then_finished() {
    let (_dir, db) = test_db();
    let cancel = CancelStore::new(db, 600);
    let (tx, mut rx) = broadcast::channel(100);

    let status = run_task(TaskContext {
        sid: "sid-1".to_string(),
        cfg: quick_task_config(3),
        cancel: cancel.clone(),
        sink: Arc::new(BroadcastSink::new(tx)),
    })
    .await;

    assert_eq!(status, TaskStatus::Finished);

    let events = drain(&mut rx);
    let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(
        names,
        [
            TASK_STARTED,
            TASK_PROGRESS,
            TASK_PROGRESS,
            TASK_PROGRESS,
            TASK_PROGRESS,
            TASK_FINISHED,
        ]
    );
    assert_eq!(percents(&events), [0, 33, 66, 100]);
    assert!(!cancel.is_set("sid-1").await.unwrap());
}

#[tokio::test]
async fn single_iteration_ends_at_one_hundred_percent() {
    let (_dir, db) = test_db();
    let cancel = CancelStore::new(db, 600);
    let (tx, mut rx) = broadcast::channel(100);

    let status = run_task(TaskContext {
        sid: "sid-2".to_string(),
        cfg: quick_task_config(1),
        cancel,
        sink: Arc::new(BroadcastSink::new(tx)),
    })
    .await;

    assert_eq!(status, TaskStatus::Finished);
    let events = drain(&mut rx);
    assert_eq!(percents(&events), [0, 100]);
    assert_eq!(events.last().unwrap().event, TASK_FINISHED);
}

#[tokio::test]
async fn stale_flag_is_cleared_at_entry_and_does_not_cancel() {
    let (_dir, db) = test_db();
    let cancel = CancelStore::new(db, 600);
    // Leftover from a previous task for the same sid.
    cancel.set("sid-3").await.unwrap();

    let (tx, mut rx) = broadcast::channel(100);
    let status = run_task(TaskContext {
        sid: "sid-3".to_string(),
        cfg: quick_task_config(2),
        cancel: cancel.clone(),
        sink: Arc::new(BroadcastSink::new(tx)),
    })
    .await;

    assert_eq!(status, TaskStatus::Finished);
    let events = drain(&mut rx);
    assert!(events.iter().all(|e| e.event != TASK_CANCELLED));
    assert!(!cancel.is_set("sid-3").await.unwrap());
}

#[tokio::test]
async fn flag_set_before_first_iteration_cancels_with_a_single_event() {
    let (_dir, db) = test_db();
    let cancel = CancelStore::new(db, 600);
    let (tx, mut rx) = broadcast::channel(100);

    let sink = CancelOnFirstProgress {
        inner: BroadcastSink::new(tx),
        cancel: cancel.clone(),
        sid: "sid-8".to_string(),
    };

    let status = run_task(TaskContext {
        sid: "sid-8".to_string(),
        cfg: quick_task_config(10),
        cancel: cancel.clone(),
        sink: Arc::new(sink),
    })
    .await;

    assert_eq!(status, TaskStatus::Cancelled);

    let events = drain(&mut rx);
    let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(names, [TASK_STARTED, TASK_PROGRESS, TASK_CANCELLED]);
    assert!(!cancel.is_set("sid-8").await.unwrap());
}

#[tokio::test]
async fn cancel_mid_iteration_stops_both_runners_and_notifies_once() {
    let (_dir, db) = test_db();
    let cancel = CancelStore::new(db, 600);
    let (tx, mut rx) = broadcast::channel(100);

    let handle = tokio::spawn(run_task(TaskContext {
        sid: "sid-4".to_string(),
        cfg: slow_task_config(10),
        cancel: cancel.clone(),
        sink: Arc::new(BroadcastSink::new(tx.clone())),
    }));

    // Wait for the task to be inside iteration 1.
    loop {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no event before iteration started")
            .unwrap();
        if event.event == TASK_PROGRESS {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    cancel.set("sid-4").await.unwrap();
    let cancelled_at = Instant::now();

    let status = timeout(Duration::from_secs(10), handle)
        .await
        .expect("task did not observe cancellation")
        .unwrap();

    assert_eq!(status, TaskStatus::Cancelled);
    // Poll interval + grace period + kill, with margin.
    assert!(cancelled_at.elapsed() < Duration::from_secs(5));

    let events = drain(&mut rx);
    let cancelled = events.iter().filter(|e| e.event == TASK_CANCELLED).count();
    assert_eq!(cancelled, 1);
    assert!(events.iter().all(|e| e.event != TASK_FINISHED));
    assert!(!cancel.is_set("sid-4").await.unwrap());
}

#[tokio::test]
async fn zero_iterations_is_an_error_with_no_events() {
    let (_dir, db) = test_db();
    let cancel = CancelStore::new(db, 600);
    let (tx, mut rx) = broadcast::channel(16);

    let status = run_task(TaskContext {
        sid: "sid-5".to_string(),
        cfg: quick_task_config(0),
        cancel,
        sink: Arc::new(BroadcastSink::new(tx)),
    })
    .await;

    assert_eq!(status, TaskStatus::Errored);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn step_removes_its_iteration_scratch_file() {
    let (_dir, db) = test_db();
    let cancel = CancelStore::new(db, 600);
    let (tx, _rx) = broadcast::channel(16);
    let sink: Arc<dyn ProgressSink> = Arc::new(BroadcastSink::new(tx));

    let scratch = tempfile::tempdir().unwrap();
    let outcome = run_step(
        "sid-6",
        1,
        scratch.path(),
        &quick_task_config(1),
        &cancel,
        &sink,
    )
    .await;

    assert!(matches!(outcome, StepOutcome::Completed { .. }));
    assert!(!scratch.path().join("disk_iter_1.bin").exists());
}

#[tokio::test]
async fn failing_subprocess_does_not_abort_the_task() {
    let (_dir, db) = test_db();
    let cancel = CancelStore::new(db, 600);
    let (tx, mut rx) = broadcast::channel(100);

    let mut cfg = quick_task_config(2);
    cfg.cpu_command = common::sh("exit 7");

    let status = run_task(TaskContext {
        sid: "sid-7".to_string(),
        cfg,
        cancel,
        sink: Arc::new(BroadcastSink::new(tx)),
    })
    .await;

    assert_eq!(status, TaskStatus::Finished);
    let events = drain(&mut rx);
    assert_eq!(events.last().unwrap().event, TASK_FINISHED);
}
