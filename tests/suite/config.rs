//! Config files driving the runtime utilities.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;

use pacer_config::{ConfigError, PacerConfig};
use pacer_queue::AsyncQueue;
use pacer_throttle::{CallOutcome, Throttle};

use crate::common::config_file;

#[tokio::test(start_paused = true)]
async fn paused_queue_from_config() {
    let file = config_file(
        r#"
        [queue]
        concurrency = 1
        autostart = false
        "#,
    );
    let config = PacerConfig::load_from(file.path()).unwrap();
    let queue = AsyncQueue::new(config.queue_options().unwrap()).unwrap();

    assert!(queue.is_paused());
    let first = queue.add(|| async { Ok(1) });
    let second = queue.add(|| async { Ok(2) });
    assert_eq!(queue.pending(), 2);
    assert_eq!(queue.running(), 0);

    queue.resume();
    assert_eq!(queue.running(), 1);
    assert_eq!(first.await.unwrap(), 1);
    assert_eq!(second.await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn queue_timeout_from_config() {
    let file = config_file("[queue]\ntask_timeout_ms = 50\n");
    let config = PacerConfig::load_from(file.path()).unwrap();
    let queue = AsyncQueue::new(config.queue_options().unwrap()).unwrap();

    let slow = queue.add(|| async {
        sleep(Duration::from_secs(1)).await;
        Ok(())
    });
    assert!(slow.await.is_err());
}

#[tokio::test(start_paused = true)]
async fn trailing_only_throttle_from_config() {
    let file = config_file(
        r#"
        [throttle]
        wait_ms = 80
        leading = false
        "#,
    );
    let config = PacerConfig::load_from(file.path()).unwrap();
    let options = config.throttle_options().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let throttle = Throttle::new(move |s: &'static str| sink.lock().unwrap().push(s), options).unwrap();

    assert_eq!(throttle.call("a"), CallOutcome::Deferred);
    assert_eq!(throttle.call("b"), CallOutcome::Deferred);
    sleep(Duration::from_millis(81)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["b"]);
}

#[test]
fn invalid_values_surface_section() {
    let file = config_file("[queue]\nconcurrency = 0\n");
    let config = PacerConfig::load_from(file.path()).unwrap();
    let err = config.queue_options().unwrap_err();

    assert!(matches!(err, ConfigError::Invalid { section: "queue", .. }));
    assert_eq!(
        err.to_string(),
        "invalid [queue] settings: queue concurrency must be at least 1"
    );
}

#[test]
fn parse_error_carries_path() {
    let file = config_file("[throttle]\nwait_ms = \"soon\"\n");
    let err = PacerConfig::load_from(file.path()).unwrap_err();

    assert!(matches!(err, ConfigError::Parse { .. }));
    assert_eq!(err.path(), Some(file.path()));
}
