//! Ring buffer correctness regression driver.
//!
//! Two phases:
//!
//! 1. **SPSC relay** - one ring per thread arranged in a cycle. Thread 0
//!    preloads its ring to usable capacity; every thread then repeatedly
//!    dequeues from its predecessor's ring and enqueues into its own,
//!    validating provenance and payload range on every hop.
//! 2. **MPMC churn** - all threads enqueue and dequeue tagged boxes on
//!    one shared ring, verifying magic words, value ranges, and
//!    exactly-once delivery via each entry's atomic counter.
//!
//! Usage:
//!     ring_validate [<threads> <affinity-delta> <size>]
//!
//! `size` is the ring capacity: a power of two greater than 4. An
//! affinity delta of 0 disables CPU pinning. Any detected violation is
//! printed to stderr with the offending values and the process exits
//! with a non-zero status; an all-pass run prints a success line and
//! exits 0.

use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use weft::harness::affinity::AffinityCursor;
use weft::harness::checks::TaggedEntry;
use weft::ring::RingBuffer;
use weft::sync::{barrier, spsc};

/// Relay laps per thread in the SPSC phase.
const RELAY_ITERATIONS: usize = 128;

/// Enqueue/dequeue cycles per thread per lap in the MPMC phase.
const CHURN_ITERATIONS: usize = 128;

struct Config {
    threads: usize,
    delta: usize,
    size: usize,
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} [<threads> <affinity-delta> <size>]");
    eprintln!("  threads         worker thread count (> 0)");
    eprintln!("  affinity-delta  core stride for pinning, 0 to disable");
    eprintln!("  size            ring capacity, a power of two > 4");
    process::exit(1);
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map_or("ring_validate", String::as_str);

    let config = match args.len() {
        1 => Config {
            threads: num_cpus::get().clamp(2, 8),
            delta: 1,
            size: 64,
        },
        4 => {
            let parse = |s: &String| s.parse::<usize>().ok();
            match (parse(&args[1]), parse(&args[2]), parse(&args[3])) {
                (Some(threads), Some(delta), Some(size)) => Config {
                    threads,
                    delta,
                    size,
                },
                _ => usage(program),
            }
        }
        _ => usage(program),
    };

    if config.threads == 0 {
        eprintln!("ERROR: thread count must be greater than 0");
        process::exit(1);
    }
    if !config.size.is_power_of_two() || config.size <= 4 {
        eprintln!(
            "ERROR: size must be a power of two greater than 4, got {}",
            config.size
        );
        process::exit(1);
    }
    config
}

fn fail(message: &str) -> ! {
    eprintln!("FAILED: {message}");
    process::exit(1);
}

/// SPSC relay: entries circulate through a cycle of rings, one hop per
/// thread, with provenance checked on every hop.
fn spsc_relay(config: &Config, affinity: &Arc<AffinityCursor>) {
    let nthr = config.threads;
    let usable = config.size - 1;
    eprint!("SPSC relay ({nthr} threads, {usable} entries):");

    // Ring i is produced into by thread i and consumed by thread
    // (i + 1) % nthr, so each endpoint has exactly one caller.
    let mut producers = Vec::with_capacity(nthr);
    let mut consumers = Vec::with_capacity(nthr);
    for _ in 0..nthr {
        let (tx, rx) = spsc::channel::<Box<TaggedEntry>>(config.size)
            .unwrap_or_else(|e| fail(&e.to_string()));
        producers.push(tx);
        consumers.push(rx);
    }

    // Preload ring 0 to usable capacity before any thread runs.
    if consumers[0].size() != 0 {
        fail(&format!(
            "more entries than expected: {} > 0",
            consumers[0].size()
        ));
    }
    for value in 0..usable {
        if producers[0].push(Box::new(TaggedEntry::new(0, value as i64))).is_err() {
            fail(&format!("preload refused at occupancy {value}"));
        }
    }
    if consumers[0].size() != usable {
        fail(&format!(
            "fewer entries than expected: {} < {usable}",
            consumers[0].size()
        ));
    }
    if producers[0].capacity() != consumers[0].size() + 1 {
        fail(&format!(
            "capacity {} != size {} + 1",
            producers[0].capacity(),
            consumers[0].size()
        ));
    }

    // Thread i consumes from its predecessor's ring: endpoint i of the
    // rotated vector is the consumer of ring (i - 1) mod nthr.
    consumers.rotate_right(1);
    let predecessors: Vec<usize> = (0..nthr).map(|id| (id + nthr - 1) % nthr).collect();

    let handles: Vec<_> = producers
        .into_iter()
        .zip(consumers)
        .zip(predecessors)
        .enumerate()
        .map(|(id, ((own, prev), prev_id))| {
            let affinity = Arc::clone(affinity);
            let limit = usable as i64;
            thread::Builder::new()
                .name(format!("relay-{id}"))
                .spawn(move || {
                    affinity.pin_next();

                    for _ in 0..RELAY_ITERATIONS {
                        for _ in 0..usable {
                            let mut entry = loop {
                                match prev.pop() {
                                    Some(entry) => break entry,
                                    None => std::hint::spin_loop(),
                                }
                            };

                            if let Err(violation) = entry.validate(limit) {
                                fail(&format!("[{id}] {violation}"));
                            }
                            if entry.origin() != prev_id {
                                fail(&format!(
                                    "[{id}] entry origin {} != predecessor {prev_id}",
                                    entry.origin()
                                ));
                            }

                            entry.relabel(id);
                            if own.push(entry).is_err() {
                                fail(&format!("[{id}] relay ring exceeded its bound"));
                            }
                        }
                    }
                    (own, prev)
                })
                .expect("spawn relay worker")
        })
        .collect();

    // Entries never leave the cycle, so after quiescence exactly
    // `usable` remain, all still valid.
    let endpoints: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("relay worker panicked"))
        .collect();

    let mut remaining = 0usize;
    for (_, prev) in &endpoints {
        while let Some(entry) = prev.pop() {
            if let Err(violation) = entry.validate(usable as i64) {
                fail(&format!("drain: {violation}"));
            }
            remaining += 1;
        }
    }
    if remaining != usable {
        fail(&format!("{remaining} entries drained, expected {usable}"));
    }

    eprintln!(" done");
}

/// MPMC churn: every thread produces and consumes on one shared ring.
fn mpmc_churn(config: &Config, affinity: &Arc<AffinityCursor>) {
    let nthr = config.threads;
    let size = config.size;
    eprintln!("MPMC churn ({nthr} threads, capacity {size}):");

    let ring: Arc<RingBuffer<Box<TaggedEntry>>> = Arc::new(
        RingBuffer::with_capacity(size).unwrap_or_else(|e| fail(&e.to_string())),
    );
    let enqueued = Arc::new(AtomicUsize::new(0));
    let dequeued = Arc::new(AtomicUsize::new(0));

    let waiters = barrier::barrier(nthr).unwrap_or_else(|e| fail(&e.to_string()));

    let handles: Vec<_> = waiters
        .into_iter()
        .map(|mut waiter| {
            let ring = Arc::clone(&ring);
            let affinity = Arc::clone(affinity);
            let enqueued = Arc::clone(&enqueued);
            let dequeued = Arc::clone(&dequeued);
            let id = waiter.id();
            thread::Builder::new()
                .name(format!("churn-{id}"))
                .spawn(move || {
                    affinity.pin_next();

                    // Start all workers at once so the ring sees real
                    // producer/consumer contention from the first cycle.
                    waiter.wait();

                    let mut observed = 0usize;
                    let mut foreign = 0usize;

                    for _ in 0..CHURN_ITERATIONS {
                        for value in 0..size {
                            let entry = Box::new(TaggedEntry::new(value, value as i64));
                            let mine: *const TaggedEntry = &*entry;

                            if ring.enqueue_mpmc(entry).is_ok() {
                                enqueued.fetch_add(1, Ordering::Relaxed);
                            }

                            let Some(mut out) = ring.dequeue_mpmc() else {
                                continue;
                            };

                            observed += 1;
                            if !std::ptr::eq(mine, &*out) {
                                foreign += 1;
                            }

                            if let Err(violation) = out.validate(size as i64) {
                                fail(&format!("[{id}] {violation}"));
                            }
                            if out.value() != out.origin() as i64 {
                                fail(&format!(
                                    "[{id}] tag mismatch: value {} != origin {}",
                                    out.value(),
                                    out.origin()
                                ));
                            }
                            if let Err(violation) = out.mark_delivered() {
                                fail(&format!("[{id}] we dequeued twice: {violation}"));
                            }
                            out.poison();
                            dequeued.fetch_add(1, Ordering::Relaxed);
                        }
                    }

                    eprintln!("[{id}] observed {observed} / foreign {foreign}");
                })
                .expect("spawn churn worker")
        })
        .collect();

    for h in handles {
        h.join().expect("churn worker panicked");
    }

    // Drain what the workers left behind; afterward the ring must be
    // exactly empty.
    while let Some(out) = ring.dequeue_mpmc() {
        if let Err(violation) = out.validate(size as i64) {
            fail(&format!("drain: {violation}"));
        }
        if let Err(violation) = out.mark_delivered() {
            fail(&format!("drain: {violation}"));
        }
        dequeued.fetch_add(1, Ordering::Relaxed);
    }

    let enqueued = enqueued.load(Ordering::Relaxed);
    let dequeued = dequeued.load(Ordering::Relaxed);
    if enqueued != dequeued {
        fail(&format!("{enqueued} enqueued but {dequeued} dequeued"));
    }
    if ring.size() != 0 {
        fail(&format!("ring not empty after quiescence: {}", ring.size()));
    }

    eprintln!("MPMC churn: done ({enqueued} items, zero lost, zero duplicated)");
}

fn main() {
    weft::init_tracing();
    let config = parse_args();
    let affinity = Arc::new(AffinityCursor::new(config.delta));

    spsc_relay(&config, &affinity);
    mpmc_churn(&config, &affinity);

    println!(
        "ring_validate: all checks passed ({} threads, capacity {})",
        config.threads, config.size
    );
}
