//! `pacer queue`: simulated jobs through a bounded queue.
//!
//! Three phases:
//! 1. submit every job and wait for idle, with failures forwarded to the
//!    error callback
//! 2. pause, submit a few stragglers, clear them before they start
//! 3. resume and confirm the queue drains to idle

use std::time::Duration;

use anyhow::{Result, bail};
use tokio::time::{Instant, sleep};

use pacer_queue::{AsyncQueue, QueueOptions, QueueStats, TaskError};

const STRAGGLERS: u32 = 3;

fn stamp(start: Instant) -> String {
    format!("+{:>5}ms", start.elapsed().as_millis())
}

fn job_duration(n: u32) -> Duration {
    Duration::from_millis(40 + u64::from(n % 3) * 30)
}

pub async fn run(options: QueueOptions, tasks: u32, fail_every: u32) -> Result<QueueStats> {
    let queue = AsyncQueue::new(options)?;
    let start = Instant::now();

    println!(
        "queue: concurrency={} timeout={:?}; {tasks} jobs, every {fail_every} fails",
        options.concurrency().get(),
        options.timeout(),
    );

    queue.on_error(move |id, err| println!("{}   !! job {id} failed: {err}", stamp(start)));

    let handles: Vec<_> = (1..=tasks)
        .map(|n| {
            queue.add(move || async move {
                println!("{} job {n:>3} started", stamp(start));
                sleep(job_duration(n)).await;
                if fail_every > 0 && n % fail_every == 0 {
                    bail!("job {n} hit a simulated fault");
                }
                println!("{} job {n:>3} done", stamp(start));
                Ok(n)
            })
        })
        .collect();

    if options.starts_paused() {
        println!("{} queue built paused; resuming", stamp(start));
        queue.resume();
    }

    let stats = queue.stats();
    println!(
        "{} running={} pending={}",
        stamp(start),
        stats.running,
        stats.pending
    );

    queue.on_idle().await;
    let mut ok = 0;
    for handle in handles {
        if handle.await.is_ok() {
            ok += 1;
        }
    }
    println!("{} idle: {ok}/{tasks} jobs succeeded", stamp(start));

    queue.pause();
    let stragglers: Vec<_> = (0..STRAGGLERS)
        .map(|n| queue.add(move || async move { Ok(n) }))
        .collect();
    println!(
        "{} paused with {} stragglers waiting",
        stamp(start),
        queue.pending()
    );

    let dropped = queue.clear();
    let mut cleared = 0;
    for handle in stragglers {
        if matches!(handle.await, Err(TaskError::Cleared)) {
            cleared += 1;
        }
    }
    println!("{} cleared {dropped} ({cleared} handles saw it)", stamp(start));

    queue.resume();
    queue.on_idle().await;

    let stats = queue.stats();
    println!(
        "{} done: completed={} failed={}",
        stamp(start),
        stats.completed,
        stats.failed
    );
    Ok(stats)
}
