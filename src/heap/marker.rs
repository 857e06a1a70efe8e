use std::collections::VecDeque;
use std::sync::atomic::Ordering;

use atomic::Atomic;
use scoped_thread_pool::Pool;

use super::heap::Heap;
use super::pointer::Pointer;
use super::taskqueue::{Terminator, WorkQueues};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MarkerState {
    Idle,
    MarkingRoots,
    MarkingNewPointers,
    MarkingOldPointers,
}

/// Sets the mark bit and ticks the owning zone's page table. Returns true
/// only for the call that actually marked the object; re-visits (and racing
/// workers) see false, which is what keeps the trace at-most-once and cycle
/// safe.
fn mark_object(heap: &Heap, address: usize) -> bool {
    let p = unsafe { &*(address as *const Pointer) };
    if !p.try_mark() {
        return false;
    }
    if heap.new_zone().contains(address) {
        heap.new_zone().page_table().mark(address);
    } else {
        heap.old_zone().page_table().mark(address);
    }
    true
}

/// Scans the payload of a marked object for references, marks each child
/// and hands the newly marked ones to `push`. An old parent holding a young
/// child picks up the remembered bit here; that is the only write barrier
/// the heap has.
fn trace_object(heap: &Heap, object: usize, push: &mut dyn FnMut(usize)) {
    let p = unsafe { &*(object as *const Pointer) };
    let parent_is_old = p.is_old();

    for index in 0..p.num_payload_words() {
        let word = unsafe { p.payload_word(index).read() };
        if !heap.is_object(word) {
            continue;
        }
        if parent_is_old && heap.new_zone().contains(word) {
            p.set_remembered();
        }
        if mark_object(heap, word) {
            push(word);
        }
    }
}

/// Root-to-closure tracer. One instance per collection cycle; the state
/// field is only informational outside the cycle that owns it.
pub struct Marker<'a> {
    heap: &'a Heap,
    state: Atomic<MarkerState>,
}

impl<'a> Marker<'a> {
    pub fn new(heap: &'a Heap) -> Self {
        Self {
            heap,
            state: Atomic::new(MarkerState::Idle),
        }
    }

    pub fn state(&self) -> MarkerState {
        self.state.load(Ordering::Acquire)
    }

    /// Minor-collection scope: marks the young objects the roots point at
    /// directly, nothing deeper. Old-generation targets are deliberately
    /// left unmarked; a stale mark bit there would make the next full trace
    /// skip the object's children.
    pub fn mark_roots(&self) {
        self.state.store(MarkerState::MarkingRoots, Ordering::Release);

        let heap = self.heap;
        heap.for_each_root_slot(|slot| {
            let target = unsafe { *slot };
            if heap.is_object(target) && heap.new_zone().contains(target) {
                mark_object(heap, target);
            }
        });

        self.state.store(MarkerState::Idle, Ordering::Release);
    }

    /// Major-collection scope: breadth-first closure over both generations,
    /// young-generation worklist first, then the old one.
    pub fn mark_all(&self) {
        self.state.store(MarkerState::MarkingRoots, Ordering::Release);

        let heap = self.heap;
        let mut new_list = VecDeque::new();
        let mut old_list = VecDeque::new();

        heap.for_each_root_slot(|slot| {
            let target = unsafe { *slot };
            if heap.is_object(target) && mark_object(heap, target) {
                if heap.new_zone().contains(target) {
                    new_list.push_back(target);
                } else {
                    old_list.push_back(target);
                }
            }
        });

        let mut children = Vec::new();

        self.state
            .store(MarkerState::MarkingNewPointers, Ordering::Release);
        while let Some(object) = new_list.pop_front() {
            trace_object(heap, object, &mut |child| children.push(child));
            for child in children.drain(..) {
                if heap.new_zone().contains(child) {
                    new_list.push_back(child);
                } else {
                    old_list.push_back(child);
                }
            }
        }

        self.state
            .store(MarkerState::MarkingOldPointers, Ordering::Release);
        while let Some(object) = old_list.pop_front() {
            trace_object(heap, object, &mut |child| children.push(child));
            old_list.extend(children.drain(..));
        }

        self.state.store(MarkerState::Idle, Ordering::Release);
    }

    /// The full closure again, but drained by `nworkers` pool workers over
    /// work-stealing queues. Visit order across workers is unspecified; the
    /// reachable set is not.
    pub fn mark_all_parallel(&self, pool: &Pool, nworkers: usize) {
        self.state.store(MarkerState::MarkingRoots, Ordering::Release);

        let heap = self.heap;
        let queues = WorkQueues::new(nworkers);
        heap.for_each_root_slot(|slot| {
            let target = unsafe { *slot };
            if heap.is_object(target) && mark_object(heap, target) {
                queues.push_global(target);
            }
        });

        self.state
            .store(MarkerState::MarkingNewPointers, Ordering::Release);

        let terminator = Terminator::new(nworkers);
        pool.scoped(|scope| {
            for task_id in 0..nworkers {
                let queues = &queues;
                let terminator = &terminator;
                scope.execute(move || {
                    MarkingTask {
                        task_id,
                        heap,
                        queues,
                        terminator,
                    }
                    .run()
                });
            }
        });

        self.state.store(MarkerState::Idle, Ordering::Release);
    }
}

/// One worker's share of a parallel mark: drain the local queue, steal when
/// it runs dry, and only stop once the terminator sees every worker idle.
pub struct MarkingTask<'a> {
    task_id: usize,
    heap: &'a Heap,
    queues: &'a WorkQueues,
    terminator: &'a Terminator,
}

impl<'a> MarkingTask<'a> {
    pub fn run(&self) {
        loop {
            while let Some(object) = self.queues.pop(self.task_id) {
                trace_object(self.heap, object, &mut |child| {
                    self.queues.push(self.task_id, child)
                });
            }
            if self.terminator.try_terminate(|| self.queues.has_global_work()) {
                return;
            }
        }
    }
}
