use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use atomic::Atomic;
use scoped_thread_pool::Pool;

use super::compactor::Compactor;
use super::heap::{Heap, HeapOptions};
use super::marker::Marker;
use super::scavenger::Scavenger;
use super::sweeper::Sweeper;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CollectorState {
    Idle,
    MinorRunning,
    MajorRunning,
}

/// Cumulative counters across the life of the collector.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CollectorStats {
    pub minor_cycles: usize,
    pub major_cycles: usize,
    pub copied_bytes: usize,
    pub promoted_bytes: usize,
    pub promotion_failures: usize,
    pub reclaimed_bytes: usize,
}

/// The one externally callable orchestrator. Sequences Marker → Scavenger
/// for a minor cycle and Marker → Sweeper/Compactor for a major one, and
/// owns the single state flag gating entry: a collection requested while
/// another is in flight is logged and dropped, never queued or waited on.
/// Everything past that guard assumes it owns the world.
pub struct Collector {
    state: Atomic<CollectorState>,
    pool: Pool,
    nworkers: usize,
    compact: bool,
    minor_cycles: AtomicUsize,
    major_cycles: AtomicUsize,
    copied_bytes: AtomicUsize,
    promoted_bytes: AtomicUsize,
    promotion_failures: AtomicUsize,
    reclaimed_bytes: AtomicUsize,
}

impl Collector {
    pub fn new(opts: &HeapOptions) -> Self {
        Self {
            state: Atomic::new(CollectorState::Idle),
            pool: Pool::new(opts.parallel_workers),
            nworkers: opts.parallel_workers,
            compact: opts.compact_old_zone,
            minor_cycles: AtomicUsize::new(0),
            major_cycles: AtomicUsize::new(0),
            copied_bytes: AtomicUsize::new(0),
            promoted_bytes: AtomicUsize::new(0),
            promotion_failures: AtomicUsize::new(0),
            reclaimed_bytes: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            minor_cycles: self.minor_cycles.load(Ordering::Relaxed),
            major_cycles: self.major_cycles.load(Ordering::Relaxed),
            copied_bytes: self.copied_bytes.load(Ordering::Relaxed),
            promoted_bytes: self.promoted_bytes.load(Ordering::Relaxed),
            promotion_failures: self.promotion_failures.load(Ordering::Relaxed),
            reclaimed_bytes: self.reclaimed_bytes.load(Ordering::Relaxed),
        }
    }

    fn begin(&self, target: CollectorState) -> bool {
        if self
            .state
            .compare_exchange(
                CollectorState::Idle,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            log::info!(
                target: "gc",
                "{:?} requested while {:?}; request dropped",
                target,
                self.state()
            );
            return false;
        }
        true
    }

    fn end(&self) {
        self.state.store(CollectorState::Idle, Ordering::Release);
    }

    pub fn collect_minor(&self, heap: &Heap) -> bool {
        if !self.begin(CollectorState::MinorRunning) {
            return false;
        }
        let start = Instant::now();

        Marker::new(heap).mark_roots();

        let scavenger = Scavenger::new(heap);
        let stats = if self.nworkers > 1 {
            scavenger.run_parallel(&self.pool, self.nworkers)
        } else {
            scavenger.run()
        };

        let cycle = self.minor_cycles.fetch_add(1, Ordering::Relaxed) + 1;
        self.copied_bytes
            .fetch_add(stats.copied_bytes, Ordering::Relaxed);
        self.promoted_bytes
            .fetch_add(stats.promoted_bytes, Ordering::Relaxed);
        self.promotion_failures
            .fetch_add(stats.promotion_failures, Ordering::Relaxed);

        log::info!(
            target: "gc",
            "minor gc #{}: copied {} bytes, promoted {} bytes, {} promotion failure(s) in {:?}",
            cycle,
            stats.copied_bytes,
            stats.promoted_bytes,
            stats.promotion_failures,
            start.elapsed()
        );

        self.end();
        true
    }

    pub fn collect_major(&self, heap: &Heap) -> bool {
        if !self.begin(CollectorState::MajorRunning) {
            return false;
        }
        let start = Instant::now();

        let marker = Marker::new(heap);
        if self.nworkers > 1 {
            marker.mark_all_parallel(&self.pool, self.nworkers);
        } else {
            marker.mark_all();
        }

        let reclaimed = if self.compact {
            Compactor::new(heap).run()
        } else {
            let sweeper = Sweeper::new(heap);
            if self.nworkers > 1 {
                sweeper.run_parallel(&self.pool, self.nworkers)
            } else {
                sweeper.run()
            }
        };

        // The full trace also marked young objects; those marks are not
        // consumed by anything and must not leak into the next cycle.
        heap.new_zone().clear_marks();
        heap.new_zone().page_table().clear();

        let cycle = self.major_cycles.fetch_add(1, Ordering::Relaxed) + 1;
        self.reclaimed_bytes.fetch_add(reclaimed, Ordering::Relaxed);

        log::info!(
            target: "gc",
            "major gc #{} ({}): reclaimed {} bytes, old zone used {} in {:?}",
            cycle,
            if self.compact { "compact" } else { "sweep" },
            reclaimed,
            heap.old_zone().used(),
            start.elapsed()
        );

        self.end();
        true
    }
}
