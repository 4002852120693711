use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    depth::Depth,
    eval::Eval,
    move_gen::move_list::MoveList,
    position::Position,
    r#move::Move,
    search::SearchWorker,
    time::TimeManager,
    tt::TranspositionTable,
};

/// The part of a split point guarded by its lock: the window, the best result so far and the
/// moves still to be searched. The lock is held only to pick a move or to fold a result in,
/// never across a recursion.
pub struct SplitPointInner {
    pub alpha: Eval,
    pub best_value: Eval,
    pub best_move: Option<Move>,
    pub remaining: MoveList,
    pub moves_searched: usize,
}

/// A shared frame created by a thread that wants help searching the remaining moves of a node.
///
/// Following the young-brothers-wait scheme, a split point is only created after the first move
/// of the node has been searched, so the window is already meaningful. Attached workers copy the
/// position snapshot, serially pull moves from the shared list under the lock, search them, and
/// fold their results back in. A beta cutoff raises the `cutoff` flag so every sibling stops
/// early. The frame never outlives the stack frame of its master, which blocks until all slaves
/// have detached.
pub struct SplitPoint {
    pub position: Position,
    pub depth: Depth,
    pub beta: Eval,
    pub ply: u16,
    pub inner: Mutex<SplitPointInner>,
    pub cutoff: AtomicBool,
    pub slaves: AtomicUsize,
}

impl SplitPoint {
    /// Returns true if a worker can still pick up work here.
    fn has_work(&self) -> bool {
        if self.cutoff.load(Ordering::Acquire) {
            return false;
        }
        match self.inner.try_lock() {
            Ok(inner) => !inner.remaining.is_empty(),
            // Briefly locked by another thread: treat it as busy rather than waiting.
            Err(_) => false,
        }
    }
}

/// Everything one search shares between its threads.
pub struct SearchContext {
    /// The shared transposition table.
    pub tt: Arc<TranspositionTable>,

    /// Set by the GUI (`stop`), by the time manager or internally to abort the search. Polled at
    /// every node.
    pub stop: Arc<AtomicBool>,

    /// Set once the search is over so the helper threads leave their idle loops.
    pub quit: AtomicBool,

    /// The time manager; locked by the master thread at its polling points only.
    pub time: Mutex<TimeManager>,

    /// While set, deadlines are ignored (`go ponder`); cleared by `ponderhit`.
    pub pondering: AtomicBool,

    /// The active split points workers may attach to.
    pub split_points: Mutex<Vec<Arc<SplitPoint>>>,

    /// The number of helper threads currently looking for work.
    pub idle_workers: AtomicUsize,

    /// When set, the search stops after this many nodes (the `go nodes` parameter).
    pub node_limit: Option<u64>,

    /// Node counters flushed by the workers; the totals reported to the GUI.
    pub nodes: AtomicU64,
    pub qnodes: AtomicU64,

    /// The deepest ply reached by any thread's quiescence search.
    pub sel_depth: AtomicUsize,
}

impl SearchContext {
    /// The most split points allowed to be active at once.
    const MAX_SPLIT_POINTS: usize = 8;

    /// Creates a context for one search.
    pub fn new(
        tt: Arc<TranspositionTable>,
        stop: Arc<AtomicBool>,
        time: TimeManager,
        pondering: bool,
        node_limit: Option<u64>,
    ) -> Self {
        Self {
            tt,
            stop,
            quit: AtomicBool::new(false),
            time: Mutex::new(time),
            pondering: AtomicBool::new(pondering),
            split_points: Mutex::new(Vec::new()),
            idle_workers: AtomicUsize::new(0),
            node_limit,
            nodes: AtomicU64::new(0),
            qnodes: AtomicU64::new(0),
            sel_depth: AtomicUsize::new(0),
        }
    }

    /// Returns true if a helper thread is available and the split-point table has room, so
    /// splitting the current node is worthwhile.
    pub fn can_split(&self) -> bool {
        self.idle_workers.load(Ordering::Acquire) > 0
            && self.split_points.lock().expect("The split point list is never poisoned").len() < Self::MAX_SPLIT_POINTS
    }

    /// Publishes a split point for idle workers to find.
    pub fn register_split_point(&self, split_point: Arc<SplitPoint>) {
        self.split_points.lock().expect("The split point list is never poisoned").push(split_point);
    }

    /// Withdraws a split point so no new worker attaches; already attached workers finish the
    /// moves they picked up.
    pub fn unregister_split_point(&self, split_point: &Arc<SplitPoint>) {
        self.split_points
            .lock()
            .expect("The split point list is never poisoned")
            .retain(|other| !Arc::ptr_eq(other, split_point));
    }

    fn find_work(&self) -> Option<Arc<SplitPoint>> {
        let split_points = self.split_points.lock().expect("The split point list is never poisoned");
        split_points.iter().find(|split_point| split_point.has_work()).cloned()
    }

    /// Returns the total number of nodes searched so far, as flushed by the workers.
    pub fn total_nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed) + self.qnodes.load(Ordering::Relaxed)
    }
}

/// The helper threads of one search.
///
/// Each helper runs an idle loop: scan the active split points, attach to one with work
/// available, help it to completion, repeat. When no split point exists the thread sleeps
/// briefly instead of spinning.
pub struct ThreadPool {
    handles: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `count` helper threads for the given search context.
    pub fn spawn(context: Arc<SearchContext>, count: usize) -> Self {
        let handles = (0..count)
            .map(|_| {
                let context = Arc::clone(&context);
                thread::spawn(move || idle_loop(context))
            })
            .collect();
        Self { handles }
    }

    /// Waits for every helper thread to exit. The caller must have set the context's quit flag.
    pub fn join(self) {
        for handle in self.handles {
            handle.join().expect("Helper threads do not panic");
        }
    }
}

fn idle_loop(context: Arc<SearchContext>) {
    let mut worker = SearchWorker::new_helper(Arc::clone(&context));

    loop {
        // The thread counts as idle the whole time it is scanning or sleeping, so masters see
        // it as available for a split.
        context.idle_workers.fetch_add(1, Ordering::AcqRel);
        let work = loop {
            if context.quit.load(Ordering::Acquire) {
                break None;
            }
            if let Some(split_point) = context.find_work() {
                break Some(split_point);
            }
            thread::sleep(Duration::from_micros(100));
        };
        context.idle_workers.fetch_sub(1, Ordering::AcqRel);

        match work {
            Some(split_point) => {
                split_point.slaves.fetch_add(1, Ordering::AcqRel);
                worker.help(&split_point);
                split_point.slaves.fetch_sub(1, Ordering::AcqRel);
                worker.flush_node_counts();
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeControl;
    use ctor::ctor;

    #[ctor]
    fn setup() {
        crate::initialize();
    }

    fn test_context() -> Arc<SearchContext> {
        Arc::new(SearchContext::new(
            Arc::new(TranspositionTable::new(1)),
            Arc::new(AtomicBool::new(false)),
            TimeManager::new(TimeControl::Infinite),
            false,
            None,
        ))
    }

    #[test]
    fn test_pool_spawns_and_joins() {
        let context = test_context();
        let pool = ThreadPool::spawn(Arc::clone(&context), 3);

        // Give the workers a moment to report idle, then shut down.
        thread::sleep(Duration::from_millis(10));
        context.quit.store(true, Ordering::Release);
        pool.join();
    }

    #[test]
    fn test_can_split_requires_idle_workers() {
        let context = test_context();
        assert!(!context.can_split());

        let pool = ThreadPool::spawn(Arc::clone(&context), 1);
        thread::sleep(Duration::from_millis(10));
        // The single worker is idle, so splitting is possible now.
        assert!(context.can_split());

        context.quit.store(true, Ordering::Release);
        pool.join();
    }
}
