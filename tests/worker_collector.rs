//! End-to-end checks for the shipping path: a Worker batches entries over
//! TCP to a Collector that persists them into its local log tree.

use frakt::{Config, LogEntry, Logger};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn quiet_config(dir: &TempDir) -> Config {
    Config {
        log_dir: dir.path().to_path_buf(),
        console_enabled: false,
        ..Config::default()
    }
}

/// Poll the collector counters until `written` entries landed or the
/// deadline passes.
fn wait_for_written(collector: &Logger, written: u64, deadline: Duration) {
    let started = Instant::now();
    while collector.metrics().entries_written < written {
        assert!(
            started.elapsed() < deadline,
            "collector persisted {} of {written} entries before timeout",
            collector.metrics().entries_written
        );
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn worker_ships_batches_collector_persists() {
    let dir = TempDir::new().unwrap();
    let collector = Logger::collector("sink", quiet_config(&dir), "127.0.0.1:0").unwrap();
    collector.start().unwrap();
    let addr = collector.listen_addr().expect("collector bound address");

    let worker_dir = TempDir::new().unwrap();
    let config = Config {
        buffer_size: 3,
        ..quiet_config(&worker_dir)
    };
    let worker = Logger::worker("shipper", config, addr.to_string()).unwrap();

    for i in 0..9 {
        worker.log(format!("shipped entry {i}"));
    }
    worker.stop();

    wait_for_written(&collector, 9, Duration::from_secs(5));
    collector.stop();

    let worker_metrics = worker.metrics();
    assert_eq!(worker_metrics.entries_written, 9);
    assert_eq!(worker_metrics.batches_sent, 3);
    assert_eq!(worker_metrics.batches_failed, 0);

    let collector_metrics = collector.metrics();
    assert_eq!(collector_metrics.entries_written, 9);
    assert_eq!(collector_metrics.entries_failed, 0);

    // Entries were persisted under the collector's own service tree
    let sink_dir = dir.path().join("sink");
    let bucket = std::fs::read_dir(&sink_dir).unwrap().next().unwrap().unwrap();
    let file = std::fs::read_dir(bucket.path()).unwrap().next().unwrap().unwrap();
    let content = std::fs::read_to_string(file.path()).unwrap();
    assert_eq!(content.lines().count(), 9);
    assert!(content.contains("shipped entry 0"));
    assert!(content.contains("shipped entry 8"));
}

#[test]
fn worker_recovers_once_the_collector_comes_up() {
    // Reserve an address, then close it so the first batch has nowhere
    // to go
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let worker_dir = TempDir::new().unwrap();
    let config = Config {
        buffer_size: 3,
        ..quiet_config(&worker_dir)
    };
    let worker = Logger::worker("shipper", config, addr.to_string()).unwrap();

    for i in 0..3 {
        worker.log(format!("early entry {i}"));
    }
    let failed = worker.metrics();
    assert_eq!(failed.batches_sent, 0);
    assert!(failed.batches_failed >= 1);
    assert!(failed.entries_failed >= 3);

    // The collector appears on the very address the batch failed against
    let dir = TempDir::new().unwrap();
    let collector = Logger::collector("sink", quiet_config(&dir), addr).unwrap();
    collector.start().unwrap();

    // Further traffic drains the buffered failures ahead of the new
    // entries, so everything ships
    for i in 0..3 {
        worker.log(format!("late entry {i}"));
    }
    worker.flush();

    wait_for_written(&collector, 6, Duration::from_secs(5));
    assert_eq!(worker.buffered_errors(), 0);
    let recovered = worker.metrics();
    assert_eq!(recovered.entries_written, 6);
    assert!(recovered.batches_sent >= 1);

    worker.stop();
    collector.stop();

    let sink_dir = dir.path().join("sink");
    let bucket = std::fs::read_dir(&sink_dir).unwrap().next().unwrap().unwrap();
    let file = std::fs::read_dir(bucket.path()).unwrap().next().unwrap().unwrap();
    let content = std::fs::read_to_string(file.path()).unwrap();
    assert_eq!(content.lines().count(), 6);
    assert!(content.contains("early entry 0"));
    assert!(content.contains("late entry 2"));
}

#[test]
fn stop_returns_promptly_with_an_unreachable_endpoint() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        buffer_size: 2,
        ..quiet_config(&dir)
    };
    let worker = Logger::worker("shipper", config, "127.0.0.1:1").unwrap();
    for i in 0..4 {
        worker.log(format!("stuck entry {i}"));
    }

    // Shutdown joins the flush thread with a bounded wait even while
    // sends keep failing
    let started = Instant::now();
    worker.stop();
    assert!(started.elapsed() < Duration::from_secs(15));
    assert!(worker.metrics().batches_failed >= 1);
}

#[test]
fn structured_entries_survive_the_wire() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        structured_format: true,
        ..quiet_config(&dir)
    };
    let collector = Logger::collector("sink", config, "127.0.0.1:0").unwrap();
    collector.start().unwrap();
    let addr = collector.listen_addr().expect("collector bound address");

    let worker_dir = TempDir::new().unwrap();
    let config = Config {
        buffer_size: 1,
        ..quiet_config(&worker_dir)
    };
    let worker = Logger::worker("shipper", config, addr.to_string()).unwrap();

    worker.log(LogEntry::structured_from([
        ("event", serde_json::Value::from("cache_miss")),
        ("key", serde_json::Value::from("user:42")),
    ]));
    worker.stop();

    wait_for_written(&collector, 1, Duration::from_secs(5));
    collector.stop();

    let sink_dir = dir.path().join("sink");
    let bucket = std::fs::read_dir(&sink_dir).unwrap().next().unwrap().unwrap();
    let file = std::fs::read_dir(bucket.path()).unwrap().next().unwrap().unwrap();
    let content = std::fs::read_to_string(file.path()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
    assert_eq!(parsed["event"], "cache_miss");
    assert_eq!(parsed["key"], "user:42");
    assert_eq!(parsed["service"], "sink");
}

#[test]
fn flush_pushes_a_partial_batch() {
    let dir = TempDir::new().unwrap();
    let collector = Logger::collector("sink", quiet_config(&dir), "127.0.0.1:0").unwrap();
    collector.start().unwrap();
    let addr = collector.listen_addr().expect("collector bound address");

    let worker_dir = TempDir::new().unwrap();
    let config = Config {
        buffer_size: 100,
        ..quiet_config(&worker_dir)
    };
    let worker = Logger::worker("shipper", config, addr.to_string()).unwrap();

    worker.log("only entry");
    worker.flush();

    wait_for_written(&collector, 1, Duration::from_secs(5));
    assert_eq!(worker.metrics().batches_sent, 1);
    assert_eq!(worker.metrics().entries_written, 1);

    worker.stop();
    collector.stop();
}
