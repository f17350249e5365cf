//! Stress tests for the tuplespace engine.
//!
//! These tests verify behavior under heavy load and concurrent access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tuplespace_core::{
    ContainerRef, CoreError, Count, RequestContext, RequestTimeout, Selector, Space, Value,
    WriteEntry,
};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of producer and of consumer threads.
    pub threads: usize,
    /// Entries written per request.
    pub batch_size: usize,
    /// How long a consumer waits for an entry.
    pub take_timeout: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            batch_size: 1,
            take_timeout: Duration::from_secs(10),
        }
    }
}

/// Tally shared between worker threads.
#[derive(Debug, Default)]
struct Tally {
    successful: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn record<T>(&self, result: &Result<T, CoreError>) {
        let counter = if result.is_ok() {
            &self.successful
        } else {
            &self.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self, start: Instant) -> StressTestResult {
        StressTestResult::new(
            self.successful.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            start.elapsed(),
        )
    }
}

/// Run a sequential write stress test.
pub fn stress_sequential_writes(
    space: &Space,
    container: ContainerRef,
    config: &StressConfig,
) -> StressTestResult {
    let tally = Tally::default();
    let start = Instant::now();

    for i in 0..config.operations / config.batch_size.max(1) {
        let entries = (0..config.batch_size.max(1))
            .map(|j| WriteEntry::new(Value::Integer((i * config.batch_size + j) as i64)))
            .collect();
        tally.record(&space.write(container.id, entries, RequestContext::new()));
    }

    tally.finish(start)
}

/// Producers write `operations` entries while consumers take them all.
///
/// Every take blocks until an entry arrives, so a lost wake-up shows up
/// as a failed (timed out) take.
pub fn stress_producers_consumers(
    space: Arc<Space>,
    container: ContainerRef,
    config: &StressConfig,
) -> StressTestResult {
    let tally = Arc::new(Tally::default());
    let threads = config.threads.max(1);
    let per_thread = config.operations / threads;
    let timeout = RequestTimeout::Duration(config.take_timeout);
    let start = Instant::now();

    let mut handles = Vec::with_capacity(threads * 2);
    for t in 0..threads {
        let producer_space = Arc::clone(&space);
        let producer_tally = Arc::clone(&tally);
        handles.push(thread::spawn(move || {
            for i in 0..per_thread {
                let value = Value::Integer((t * per_thread + i) as i64);
                producer_tally.record(&producer_space.write(
                    container.id,
                    vec![WriteEntry::new(value)],
                    RequestContext::new(),
                ));
            }
        }));

        let space = Arc::clone(&space);
        let tally = Arc::clone(&tally);
        handles.push(thread::spawn(move || {
            for _ in 0..per_thread {
                tally.record(&space.take(
                    container.id,
                    vec![Selector::any(Count::Exactly(1))],
                    RequestContext::new().timeout(timeout),
                ));
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    tally.finish(start)
}

/// Run a concurrent read stress test over a populated container.
pub fn stress_concurrent_reads(
    space: Arc<Space>,
    container: ContainerRef,
    config: &StressConfig,
) -> StressTestResult {
    let tally = Arc::new(Tally::default());
    let threads = config.threads.max(1);
    let per_thread = config.operations / threads;
    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let space = Arc::clone(&space);
            let tally = Arc::clone(&tally);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    tally.record(&space.read(
                        container.id,
                        vec![Selector::any(Count::Exactly(1))],
                        RequestContext::new().timeout(RequestTimeout::Zero),
                    ));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    tally.finish(start)
}

/// Run a transaction abort stress test.
///
/// Every other transaction writes an entry and then fails on purpose.
pub fn stress_transaction_aborts(
    space: &Space,
    container: ContainerRef,
    config: &StressConfig,
) -> StressTestResult {
    let tally = Tally::default();
    let start = Instant::now();

    for i in 0..config.operations {
        let should_fail = i % 2 == 0;
        let result = space.transaction(|tx| {
            space.write(
                container.id,
                vec![WriteEntry::new(Value::Integer(i as i64))],
                RequestContext::new().transaction(tx),
            )?;
            if should_fail {
                Err(CoreError::invalid_operation("intentional"))
            } else {
                Ok(())
            }
        });
        tally.record(&result);
    }

    tally.finish(start)
}

/// Transactions racing to take the same entries.
///
/// Each thread takes one entry and writes it back in one transaction, so
/// the container size is unchanged when every thread is done.
pub fn stress_contended_transactions(
    space: Arc<Space>,
    container: ContainerRef,
    config: &StressConfig,
) -> StressTestResult {
    let tally = Arc::new(Tally::default());
    let threads = config.threads.max(1);
    let per_thread = config.operations / threads;
    let timeout = RequestTimeout::Duration(config.take_timeout);
    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let space = Arc::clone(&space);
            let tally = Arc::clone(&tally);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    let result = space.transaction(|tx| {
                        let ctx = RequestContext::new().transaction(tx).timeout(timeout);
                        let taken = space.take(
                            container.id,
                            vec![Selector::any(Count::Exactly(1))],
                            ctx.clone(),
                        )?;
                        let back = taken
                            .iter()
                            .map(|e| WriteEntry::new(e.value().clone()))
                            .collect();
                        space.write(container.id, back, ctx)
                    });
                    tally.record(&result);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    tally.finish(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{container, scenarios::populated_queue, TestSpace};
    use tuplespace_core::CoordinatorKind;

    fn any_container(space: &Space) -> ContainerRef {
        container(space, "stress", CoordinatorKind::Any)
    }

    fn count(space: &Space, c: ContainerRef) -> usize {
        space
            .test(c.id, vec![Selector::any(Count::All)], RequestContext::new())
            .unwrap()
    }

    #[test]
    fn test_sequential_writes() {
        let space = TestSpace::memory();
        let c = any_container(&space);
        let config = StressConfig {
            operations: 1_000,
            batch_size: 10,
            ..Default::default()
        };

        let result = stress_sequential_writes(&space, c, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 100);
        assert_eq!(count(&space, c), 1_000);
    }

    #[test]
    fn test_producers_consumers() {
        let space = Arc::new(Space::open_in_memory().unwrap());
        let c = any_container(&space);
        let config = StressConfig {
            operations: 400,
            threads: 4,
            ..Default::default()
        };

        let result = stress_producers_consumers(Arc::clone(&space), c, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 800);
        assert_eq!(count(&space, c), 0);
        assert_eq!(space.parked_requests(), 0);
    }

    #[test]
    fn test_concurrent_reads() {
        let (test_space, queue) = populated_queue(100);
        let space = Arc::new(test_space.space);
        let config = StressConfig {
            operations: 1_000,
            threads: 4,
            ..Default::default()
        };

        let result = stress_concurrent_reads(space, queue, &config);
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_transaction_aborts() {
        let space = TestSpace::memory();
        let c = any_container(&space);
        let config = StressConfig {
            operations: 100,
            ..Default::default()
        };

        let result = stress_transaction_aborts(&space, c, &config);
        // Half should succeed, half should fail (intentionally)
        assert_eq!(result.successful_ops, 50);
        assert_eq!(result.failed_ops, 50);
        assert_eq!(count(&space, c), 50);
        assert_eq!(space.active_transactions(), 0);
    }

    #[test]
    fn test_contended_transactions() {
        let (test_space, queue) = populated_queue(4);
        let space = Arc::new(test_space.space);
        let config = StressConfig {
            operations: 200,
            threads: 4,
            ..Default::default()
        };

        let result = stress_contended_transactions(Arc::clone(&space), queue, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(count(&space, queue), 4);
    }
}
