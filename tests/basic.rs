//! Exercises the engine's ability to reproduce a chosen outcome of a data
//! race when the two critical sections are not aligned.
//!
//! Each thread's iteration body has a time signature `(s, t, r)`: a delay
//! until its critical section starts, the critical section itself, and a
//! remaining delay until the body returns. All three are cubed into loop
//! counts, so the critical sections end up more than an order of magnitude
//! shorter than the padding around them and raw luck almost never lines
//! them up.
//!
//! Both threads bump a shared counter when entering and when leaving
//! their critical sections, and A records the counter value at both of
//! its bumps (`cs` at entry, `ct` at exit). Two outcomes mean the
//! sections did not overlap:
//!
//! | cs | ct | ordering     |
//! |----|----|--------------|
//! | 1  | 2  | A before B   |
//! | 3  | 4  | B before A   |
//!
//! Every other `(cs, ct)` combination means the sections overlapped. A
//! signature table covers aligned, shifted, unequal, edge-hugging and
//! degenerate window placements; for each row the engine must produce
//! more than 100 overlaps within the iteration budget.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fuzzy_sync::{Pair, PairConfig};

/// Cubic scaling: a signature value of 3 burns 27 yield loops.
fn time_scale(x: u32) -> u32 {
    x * x * x
}

/// Burn a scaled delay. The countdown goes through an atomic so the
/// optimizer cannot collapse the loop, and each pass yields to keep the
/// timing coarse and scheduler-shaped like real victim code.
fn delay(t: u32) {
    let k = AtomicI32::new(time_scale(t) as i32);
    while k.fetch_sub(1, Ordering::Relaxed) > 0 {
        std::thread::yield_now();
    }
}

/// Time signature of one iteration body containing a critical section.
#[derive(Debug, Clone, Copy)]
struct Window {
    critical_s: u32,
    critical_t: u32,
    return_t: u32,
}

const fn w(critical_s: u32, critical_t: u32, return_t: u32) -> Window {
    Window {
        critical_s,
        critical_t,
        return_t,
    }
}

/// The signatures of threads A and B for one table row.
#[derive(Debug, Clone, Copy)]
struct Race {
    a: Window,
    b: Window,
}

const fn race(a: Window, b: Window) -> Race {
    Race { a, b }
}

static RACES: &[Race] = &[
    // Degenerate rows where the sections are already aligned. The first
    // row would hang on a single CPU if the barrier never yielded.
    race(w(0, 0, 0), w(0, 0, 0)),
    race(w(0, 1, 0), w(0, 1, 0)),
    race(w(1, 1, 1), w(1, 1, 1)),
    race(w(3, 1, 1), w(3, 1, 1)),
    // Equal-length windows, shifted both ways.
    race(w(3, 1, 1), w(1, 1, 3)),
    race(w(1, 1, 3), w(3, 1, 1)),
    // Different-sized windows, all four orientations.
    race(w(3, 1, 1), w(1, 1, 2)),
    race(w(1, 1, 3), w(2, 1, 1)),
    race(w(2, 1, 1), w(1, 1, 3)),
    race(w(1, 1, 2), w(3, 1, 1)),
    // Critical section flush against the entry or the exit.
    race(w(3, 1, 0), w(0, 1, 3)),
    race(w(0, 1, 3), w(3, 1, 0)),
    race(w(3, 1, 0), w(0, 1, 2)),
    race(w(0, 1, 3), w(2, 1, 0)),
    race(w(2, 1, 0), w(0, 1, 3)),
    race(w(0, 1, 2), w(3, 1, 0)),
    // One side much shorter than the other.
    race(w(3, 1, 1), w(0, 1, 0)),
    race(w(1, 1, 3), w(0, 1, 0)),
    race(w(0, 1, 0), w(1, 1, 3)),
    race(w(0, 1, 0), w(3, 1, 1)),
    // One side degenerate: a zero-length window must still converge.
    race(w(3, 1, 1), w(0, 0, 0)),
    race(w(1, 1, 3), w(0, 0, 0)),
    race(w(0, 0, 0), w(1, 1, 3)),
    race(w(0, 0, 0), w(3, 1, 1)),
];

#[derive(Debug, Default, Clone, Copy)]
struct RowOutcome {
    too_early: u32,
    overlap: u32,
    too_late: u32,
    delay: i32,
}

fn run_row(pair: &mut Pair, row: Race) -> RowOutcome {
    let c = Arc::new(AtomicI32::new(0));

    let b = row.b;
    let c_b = Arc::clone(&c);
    pair.reset(move |mut side| {
        while side.run_b() {
            side.start_race_b();

            delay(b.critical_s);
            c_b.fetch_add(1, Ordering::SeqCst);
            delay(b.critical_t);
            c_b.fetch_add(1, Ordering::SeqCst);
            delay(b.return_t);

            side.end_race_b();
        }
    })
    .expect("failed to start worker");

    let a = row.a;
    let mut out = RowOutcome::default();

    while pair.run_a() {
        pair.start_race_a();

        delay(a.critical_s);
        let cs = c.fetch_add(1, Ordering::SeqCst) + 1;
        delay(a.critical_t);
        let ct = c.fetch_add(1, Ordering::SeqCst) + 1;
        delay(a.return_t);

        pair.end_race_a();

        match (cs, ct) {
            (1, 2) => out.too_early += 1,
            (3, 4) => out.too_late += 1,
            _ => out.overlap += 1,
        }

        // Both sides have bumped twice by now: A just did, and the end
        // wait inside end_race_a ordered B's bumps before ours returned.
        let rest = c.fetch_sub(4, Ordering::SeqCst) - 4;
        assert_eq!(rest, 0, "shared counter out of balance: cs={cs} ct={ct} rest={rest}");

        if out.overlap > 100 {
            pair.cleanup();
            break;
        }
    }

    out.delay = pair.delay();
    out
}

#[test]
fn race_table_overlaps_every_row() {
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    if parallelism < 2 {
        eprintln!("[SKIPPED] race_table_overlaps_every_row needs two CPUs, found {parallelism}");
        return;
    }

    let mut pair = Pair::new(
        PairConfig::default()
            .min_samples(10_000)
            .exec_loops(100_000)
            .max_run_time(Duration::from_secs(30))
            .on_message(|_| {}),
    );

    let mut outcomes = Vec::with_capacity(RACES.len());
    for (i, &row) in RACES.iter().enumerate() {
        let out = run_row(&mut pair, row);
        eprintln!(
            "row {i:2} a=({},{},{}) b=({},{},{}) | =:{:<4} -:{:<5} +:{:<5} delay:{}",
            row.a.critical_s,
            row.a.critical_t,
            row.a.return_t,
            row.b.critical_s,
            row.b.critical_t,
            row.b.return_t,
            out.overlap,
            out.too_early,
            out.too_late,
            out.delay,
        );
        assert!(
            out.overlap > 100,
            "row {i} ({:?}) produced only {} overlaps in {} iterations",
            row,
            out.overlap,
            pair.exec_loop(),
        );
        outcomes.push(out);
    }

    // Rows 4 and 5 mirror each other's signatures; when the engine
    // learned a nonzero alignment for both, the signs must mirror too.
    let (fwd, rev) = (outcomes[4].delay, outcomes[5].delay);
    if fwd != 0 && rev != 0 {
        assert!(
            fwd.signum() != rev.signum(),
            "mirrored rows learned same-signed delays: {fwd} and {rev}",
        );
    }
}
