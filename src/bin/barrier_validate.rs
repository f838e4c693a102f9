//! Dissemination barrier correctness regression driver.
//!
//! Every thread runs a fixed number of episodes. In each episode it
//! increments the episode's slot in a shared counter array, waits on the
//! barrier, then checks the slot: after the rendezvous the counter must
//! equal the thread count times the number of completed visits to that
//! slot - always an exact multiple of N, never an intermediate arrival
//! count. Slots recycle every `ENTRIES` episodes, which also exercises
//! the barrier's bank/sense reuse across unboundedly many episodes.
//!
//! Usage:
//!     barrier_validate [<threads> <affinity-delta> [episodes]]
//!
//! An affinity delta of 0 disables CPU pinning. Any violation is
//! printed to stderr with the offending slot, episode, and counter
//! values, and the process exits with a non-zero status; an all-pass
//! run prints a success line and exits 0.

use std::process;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use weft::harness::affinity::AffinityCursor;
use weft::sync::barrier;

/// Size of the shared counter array; episodes cycle through its slots.
const ENTRIES: usize = 512;

/// Episodes per thread when not overridden on the command line.
const DEFAULT_EPISODES: usize = 1_000_000;

struct Config {
    threads: usize,
    delta: usize,
    episodes: usize,
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} [<threads> <affinity-delta> [episodes]]");
    eprintln!("  threads         participant count (> 0)");
    eprintln!("  affinity-delta  core stride for pinning, 0 to disable");
    eprintln!("  episodes        barrier episodes per thread (default {DEFAULT_EPISODES})");
    process::exit(1);
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map_or("barrier_validate", String::as_str);
    let parse = |s: &String| s.parse::<usize>().ok();

    let config = match args.len() {
        1 => Config {
            threads: num_cpus::get().clamp(2, 8),
            delta: 1,
            episodes: DEFAULT_EPISODES,
        },
        3 | 4 => {
            let episodes = if args.len() == 4 {
                match parse(&args[3]) {
                    Some(e) => e,
                    None => usage(program),
                }
            } else {
                DEFAULT_EPISODES
            };
            match (parse(&args[1]), parse(&args[2])) {
                (Some(threads), Some(delta)) => Config {
                    threads,
                    delta,
                    episodes,
                },
                _ => usage(program),
            }
        }
        _ => usage(program),
    };

    if config.threads == 0 {
        eprintln!("ERROR: number of threads must be greater than 0");
        process::exit(1);
    }
    config
}

fn main() {
    weft::init_tracing();
    let config = parse_args();
    let nthr = config.threads;
    let episodes = config.episodes;

    let affinity = Arc::new(AffinityCursor::new(config.delta));

    // Shared episode counters, explicitly constructed and handed to the
    // workers rather than living in process-wide state.
    let counters: Arc<[AtomicU32]> = (0..ENTRIES).map(|_| AtomicU32::new(0)).collect();

    let waiters = match barrier::barrier(nthr) {
        Ok(waiters) => waiters,
        Err(e) => {
            eprintln!("ERROR: {e}");
            process::exit(1);
        }
    };

    eprint!("Creating threads (barrier)...");
    let handles: Vec<_> = waiters
        .into_iter()
        .map(|mut waiter| {
            let affinity = Arc::clone(&affinity);
            let counters = Arc::clone(&counters);
            let id = waiter.id();
            thread::Builder::new()
                .name(format!("barrier-{id}"))
                .spawn(move || {
                    affinity.pin_next();

                    for episode in 0..episodes {
                        let slot = episode & (ENTRIES - 1);
                        counters[slot].fetch_add(1, Ordering::Relaxed);

                        waiter.wait();

                        // Visits to this slot so far, this episode included.
                        let visits = (episode / ENTRIES + 1) as u32;
                        let expected = nthr as u32 * visits;
                        let counter = counters[slot].load(Ordering::Relaxed);
                        if counter != expected {
                            eprintln!(
                                "FAILED [{slot}:{episode}]: counter {counter} != {expected}"
                            );
                            process::exit(1);
                        }
                    }
                })
                .expect("spawn barrier worker")
        })
        .collect();
    eprintln!("done");

    eprint!("Waiting for threads to finish correctness regression...");
    for h in handles {
        h.join().expect("barrier worker panicked");
    }
    eprintln!("done (passed)");

    println!(
        "barrier_validate: all checks passed ({nthr} threads, {episodes} episodes)"
    );
}
