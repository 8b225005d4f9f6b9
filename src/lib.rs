//! # fuzzy-sync
//!
//! Statistical alignment of critical sections across two threads, so that
//! a rare data race can be reproduced in a reasonable number of
//! iterations.
//!
//! Two threads, A (driver) and B (worker), each execute a loop containing
//! an unknown *race window*. The engine rendezvouses the threads at the
//! top of every iteration, samples where each window sits relative to the
//! rendezvous, and learns the delay one side must insert so that the two
//! windows overlap on nearly every subsequent iteration. It is a
//! probability amplifier for pre-existing races; it does not detect
//! races, does not instrument memory, and makes no guarantee of overlap.
//!
//! ## Common pitfall: synchronizing the racy access
//!
//! The library's own counters are atomics with explicit ordering; the
//! variable your threads race on must *not* be. Wrapping it in an atomic
//! "fixes" the race you are trying to reproduce. Keep the racy access
//! exactly as the code under test performs it.
//!
//! ## Quick start
//!
//! ```no_run
//! use fuzzy_sync::{Pair, PairConfig};
//!
//! let mut pair = Pair::new(PairConfig::default().exec_loops(100_000));
//!
//! pair.reset(|mut side| {
//!     while side.run_b() {
//!         side.start_race_b();
//!         // ... the worker's half of the race ...
//!         side.end_race_b();
//!     }
//! })?;
//!
//! while pair.run_a() {
//!     pair.start_race_a();
//!     // ... the driver's half of the race ...
//!     pair.end_race_a();
//!
//!     // pair.a_start() / pair.b_start() etc. are readable here.
//! }
//! # Ok::<(), fuzzy_sync::PairError>(())
//! ```
//!
//! Run loops exit on their own once the iteration or wall-clock budget is
//! spent, joining the worker on the way out; [`Pair::cleanup`] does the
//! same thing early and is idempotent.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod affinity;
mod barrier;
mod clock;
mod config;
mod error;
mod estimator;
mod pair;
mod priority;
mod stats;

pub use clock::monotonic_ns;
pub use config::{MessageHook, PairConfig, DEFAULT_SWEEP_SEED};
pub use error::PairError;
pub use pair::{Pair, WorkerSide};
pub use stats::ExpStat;
