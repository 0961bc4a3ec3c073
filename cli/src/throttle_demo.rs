//! `pacer throttle`: a steady stream of calls through one throttle.

use std::time::Duration;

use anyhow::Result;
use tokio::time::{Instant, sleep, sleep_until};

use pacer_throttle::{CallOutcome, Throttle, ThrottleOptions};

fn stamp(start: Instant) -> String {
    format!("+{:>5}ms", start.elapsed().as_millis())
}

pub async fn run(options: ThrottleOptions, calls: u32, every: Duration) -> Result<()> {
    let edges = options.edges();
    println!(
        "throttle: wait={}ms leading={} trailing={}; {calls} calls every {}ms",
        options.wait().as_millis(),
        edges.leading,
        edges.trailing,
        every.as_millis(),
    );
    if !edges.fires_at_all() {
        println!("both edges disabled: nothing will ever fire");
    }

    let start = Instant::now();
    let throttle = Throttle::new(
        move |n: u32| println!("{}   >> fired with call {n}", stamp(start)),
        options,
    )?;

    for n in 0..calls {
        let outcome = throttle.call(n);
        let note = match outcome {
            CallOutcome::Invoked => "leading edge",
            CallOutcome::Deferred => "held for trailing edge",
            CallOutcome::Suppressed => "dropped",
        };
        println!("{} call {n:>3}: {note}", stamp(start));
        sleep(every).await;
    }

    // Let the last window (and the one a trailing call opens) run out.
    while let Some(ends_at) = throttle.window_ends_at() {
        sleep_until(ends_at + Duration::from_millis(1)).await;
    }

    let span = start.elapsed();
    let fired = throttle.invocations();
    println!(
        "{calls} calls, {fired} invocations in {}ms (at most {} possible)",
        span.as_millis(),
        options.max_invocations_within(span),
    );
    tracing::debug!(calls, fired, "throttle demo finished");
    Ok(())
}
