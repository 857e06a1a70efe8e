use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use rand::distributions::{Distribution, Uniform};

/// Per-worker deques plus a shared injector, for distributing header and
/// slot addresses among collector workers. Worker `i`'s local deque is only
/// ever popped by task `i`; everyone else goes through its stealer.
pub struct WorkQueues {
    workers: Vec<Worker<usize>>,
    stealers: Vec<Stealer<usize>>,
    injector: Injector<usize>,
    nworkers: usize,
}

// Worker is !Sync. Safe because pops stay on the owning task (see above);
// stealers and the injector are synchronized internally.
unsafe impl Sync for WorkQueues {}
unsafe impl Send for WorkQueues {}

impl WorkQueues {
    pub fn new(nworkers: usize) -> Self {
        assert!(nworkers > 0);
        let workers: Vec<_> = (0..nworkers).map(|_| Worker::new_lifo()).collect();
        let stealers = workers.iter().map(|w| w.stealer()).collect();
        Self {
            workers,
            stealers,
            injector: Injector::new(),
            nworkers,
        }
    }

    pub fn nworkers(&self) -> usize {
        self.nworkers
    }

    /// Seeds work before the workers start.
    pub fn push_global(&self, value: usize) {
        self.injector.push(value);
    }

    pub fn push(&self, task_id: usize, value: usize) {
        self.workers[task_id].push(value);
    }

    pub fn has_global_work(&self) -> bool {
        !self.injector.is_empty()
    }

    /// Local deque first, then the injector, then random victims. `None`
    /// only says this attempt found nothing; termination is the
    /// `Terminator`'s call.
    pub fn pop(&self, task_id: usize) -> Option<usize> {
        if let Some(value) = self.workers[task_id].pop() {
            return Some(value);
        }

        loop {
            match self.injector.steal_batch_and_pop(&self.workers[task_id]) {
                Steal::Success(value) => return Some(value),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        if self.nworkers == 1 {
            return None;
        }

        let mut rng = rand::thread_rng();
        let between = Uniform::from(0..self.nworkers);
        for _ in 0..2 * self.nworkers {
            let victim = between.sample(&mut rng);
            if victim == task_id {
                continue;
            }
            loop {
                match self.stealers[victim].steal_batch_and_pop(&self.workers[task_id]) {
                    Steal::Success(value) => return Some(value),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }
}

/// Termination protocol for the work-stealing loops. A worker that finds no
/// work enters `try_terminate`; it either observes every other worker idle
/// (true: the phase is over) or sees new global work appear and rejoins
/// (false: keep draining).
pub struct Terminator {
    const_nworkers: usize,
    nworkers: AtomicUsize,
}

impl Terminator {
    pub fn new(nworkers: usize) -> Self {
        Self {
            const_nworkers: nworkers,
            nworkers: AtomicUsize::new(nworkers),
        }
    }

    pub fn try_terminate<F: Fn() -> bool>(&self, has_work: F) -> bool {
        self.nworkers.fetch_sub(1, Ordering::AcqRel);

        let mut spins = 0usize;
        loop {
            if self.nworkers.load(Ordering::Acquire) == 0 {
                return true;
            }

            if has_work() && self.try_rejoin() {
                return false;
            }

            spins += 1;
            if spins < 32 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    fn try_rejoin(&self) -> bool {
        loop {
            let current = self.nworkers.load(Ordering::Acquire);
            if current == 0 {
                // Everyone else already agreed to stop.
                return false;
            }
            if self
                .nworkers
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }
}

impl Drop for Terminator {
    fn drop(&mut self) {
        let remaining = self.nworkers.load(Ordering::Acquire);
        debug_assert!(remaining == 0 || remaining == self.const_nworkers);
    }
}
