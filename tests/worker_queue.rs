mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use longrun_server::bus::run_outbox_relay;
use longrun_server::events::{TASK_FINISHED, TASK_STARTED};
use longrun_server::worker::run_worker;

use common::{test_config, test_db};

#[tokio::test]
async fn queued_job_runs_and_reports_through_the_outbox() {
    let (_dir, db) = test_db();
    let cfg = Arc::new(test_config());
    let (tx, mut rx) = broadcast::channel(100);

    // The front-end half of the progress channel.
    let relay = tokio::spawn(run_outbox_relay(
        db.clone(),
        tx.clone(),
        Duration::from_millis(20),
    ));

    let job_id = {
        let db = db.lock().await;
        db.enqueue_job(
            "long_run",
            &json!({ "sid": "sid-q", "total_iterations": 2 }).to_string(),
            60,
        )
        .unwrap()
    };

    // The worker process half.
    let worker = tokio::spawn(run_worker(db.clone(), cfg));

    let mut names = Vec::new();
    let mut percents = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("event stream stalled")
            .unwrap();
        if event.sid != "sid-q" {
            continue;
        }
        if let Some(percent) = event.payload["percent"].as_u64() {
            percents.push(percent);
        }
        names.push(event.event.clone());
        if event.event == TASK_FINISHED {
            break;
        }
    }

    assert_eq!(names.first().map(String::as_str), Some(TASK_STARTED));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100));

    // Job bookkeeping reaches its terminal state.
    let mut completed = None;
    for _ in 0..100 {
        let job = { db.lock().await.get_job(&job_id).unwrap().unwrap() };
        if job.status == "completed" {
            completed = Some(job);
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    let job = completed.expect("job never marked completed");
    assert_eq!(job.result.as_deref(), Some("finished"));

    worker.abort();
    relay.abort();
}

#[tokio::test]
async fn unknown_job_kind_is_marked_failed() {
    let (_dir, db) = test_db();
    let cfg = Arc::new(test_config());

    let job_id = {
        let db = db.lock().await;
        db.enqueue_job("bogus_kind", "{}", 60).unwrap()
    };

    let worker = tokio::spawn(run_worker(db.clone(), cfg));

    let mut failed = None;
    for _ in 0..100 {
        let job = { db.lock().await.get_job(&job_id).unwrap().unwrap() };
        if job.status == "failed" {
            failed = Some(job);
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    let job = failed.expect("job never marked failed");
    assert!(job.error.unwrap().contains("unknown job kind"));

    worker.abort();
}

#[tokio::test]
async fn invalid_payload_is_marked_failed() {
    let (_dir, db) = test_db();
    let cfg = Arc::new(test_config());

    let job_id = {
        let db = db.lock().await;
        db.enqueue_job("long_run", "not json", 60).unwrap()
    };

    let worker = tokio::spawn(run_worker(db.clone(), cfg));

    let mut failed = false;
    for _ in 0..100 {
        let job = { db.lock().await.get_job(&job_id).unwrap().unwrap() };
        if job.status == "failed" {
            failed = true;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(failed, "job never marked failed");

    worker.abort();
}
