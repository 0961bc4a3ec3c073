//! Throttle and queue working together.

use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{Instant, sleep, sleep_until};

use pacer_queue::{AsyncQueue, Concurrency, QueueOptions, TaskHandle};
use pacer_throttle::{Throttle, ThrottleOptions};

use crate::common::Gauge;

const WAIT: Duration = Duration::from_millis(100);

#[tokio::test(start_paused = true)]
async fn throttled_producer_feeds_bounded_queue() {
    let queue = AsyncQueue::with_concurrency(Concurrency::new(2).unwrap()).unwrap();
    let gauge = Arc::new(Gauge::default());
    let handles: Arc<Mutex<Vec<TaskHandle<u32>>>> = Arc::default();

    let producer = {
        let queue = queue.clone();
        let gauge = Arc::clone(&gauge);
        let handles = Arc::clone(&handles);
        Throttle::new(
            move |n: u32| {
                let gauge = Arc::clone(&gauge);
                let handle = queue.add(move || async move {
                    gauge.enter();
                    // Slower than the throttle window, so work piles up.
                    sleep(Duration::from_millis(250)).await;
                    gauge.exit();
                    Ok(n)
                });
                handles.lock().unwrap().push(handle);
            },
            ThrottleOptions::new(WAIT).unwrap(),
        )
        .unwrap()
    };

    let start = Instant::now();
    for n in 0..50 {
        producer.call(n);
        sleep(Duration::from_millis(10)).await;
    }
    while let Some(ends_at) = producer.window_ends_at() {
        sleep_past(ends_at).await;
    }
    let span = start.elapsed();

    queue.on_idle().await;

    let submitted = producer.invocations();
    assert!(submitted <= ThrottleOptions::new(WAIT).unwrap().max_invocations_within(span));
    assert_eq!(gauge.total() as u64, submitted);
    assert_eq!(gauge.peak(), 2);

    let handles = mem::take(&mut *handles.lock().unwrap());
    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap());
    }
    // Leading call first, trailing call last, ascending in between.
    assert_eq!(values.first(), Some(&0));
    assert_eq!(values.last(), Some(&49));
    assert!(values.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(start_paused = true)]
async fn tasks_report_progress_through_shared_throttle() {
    let queue = AsyncQueue::new(QueueOptions::new(Concurrency::new(4).unwrap())).unwrap();
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let progress = Throttle::new(
        move |done: usize| sink.lock().unwrap().push(done),
        ThrottleOptions::new(WAIT).unwrap(),
    )
    .unwrap();

    let finished = Arc::new(Gauge::default());
    for n in 0..12u64 {
        let progress = progress.clone();
        let finished = Arc::clone(&finished);
        let _ = queue.add(move || async move {
            sleep(Duration::from_millis(20 * (n + 1))).await;
            finished.enter();
            progress.call(finished.total());
            Ok(())
        });
    }

    queue.on_idle().await;
    while let Some(ends_at) = progress.window_ends_at() {
        sleep_past(ends_at).await;
    }

    let reports = reports.lock().unwrap().clone();
    // Twelve completions, far fewer reports, and the final count always lands.
    assert!(reports.len() < 12);
    assert_eq!(reports.last(), Some(&12));
    assert!(reports.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test(start_paused = true)]
async fn cancelling_throttle_stops_pending_submission() {
    let queue = AsyncQueue::with_concurrency(Concurrency::ONE).unwrap();
    let gauge = Arc::new(Gauge::default());

    let producer = {
        let queue = queue.clone();
        let gauge = Arc::clone(&gauge);
        Throttle::new(
            move |(): ()| {
                let gauge = Arc::clone(&gauge);
                let _ = queue.add(move || async move {
                    gauge.enter();
                    gauge.exit();
                    Ok(())
                });
            },
            ThrottleOptions::new(WAIT).unwrap(),
        )
        .unwrap()
    };

    producer.call(());
    producer.call(());
    producer.cancel();
    sleep(WAIT * 3).await;
    queue.on_idle().await;

    assert_eq!(gauge.total(), 1);
}

async fn sleep_past(deadline: Instant) {
    sleep_until(deadline + Duration::from_millis(1)).await;
}
