use crate::common::data::{RequestRecord, ResponseTable};
use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::Duration,
};

/// One configuration generation: the response table installed by a single `open` call and
/// the requests recorded while it was active. The two always change together.
struct Generation {
    id: u64,
    table: Arc<ResponseTable>,
    log: VecDeque<Arc<RequestRecord>>,
}

/// What the handler needs to dispatch a request after it has been recorded.
pub(crate) struct Dispatch {
    pub generation: u64,
    pub table: Arc<ResponseTable>,
}

pub(crate) trait StateManager {
    /// Replaces the response table and clears the request log in one step. Returns the id of
    /// the new generation.
    fn install(&self, table: ResponseTable) -> u64;

    /// Appends a request to the log and returns the table it must be answered from.
    fn record(&self, req: RequestRecord) -> Dispatch;

    fn requests(&self) -> Vec<Arc<RequestRecord>>;
    fn request_count(&self) -> usize;
    fn clear_requests(&self);

    fn response_table(&self) -> Arc<ResponseTable>;
    fn generation(&self) -> u64;

    /// Blocks until the log holds at least `count` requests or `timeout` elapses.
    fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool;
}

pub struct RecorderState {
    history_limit: usize,
    state: Mutex<Generation>,
    appended: Condvar,
}

impl RecorderState {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit,
            state: Mutex::new(Generation {
                id: 0,
                table: Arc::new(ResponseTable::new()),
                log: VecDeque::new(),
            }),
            appended: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Generation> {
        // Every mutation is a single push, clear or assignment, so a poisoned generation is
        // still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RecorderState {
    fn default() -> Self {
        RecorderState::new(usize::MAX)
    }
}

impl StateManager for RecorderState {
    fn install(&self, table: ResponseTable) -> u64 {
        let mut state = self.lock();

        state.id += 1;
        state.table = Arc::new(table);
        state.log.clear();

        tracing::debug!(
            "Installed response config generation {} ({} paths)",
            state.id,
            state.table.len()
        );

        state.id
    }

    fn record(&self, req: RequestRecord) -> Dispatch {
        let mut state = self.lock();

        if self.history_limit > 0 {
            while state.log.len() >= self.history_limit {
                state.log.pop_front();
            }
            state.log.push_back(Arc::new(req));
        }

        let dispatch = Dispatch {
            generation: state.id,
            table: state.table.clone(),
        };

        drop(state);
        self.appended.notify_all();

        dispatch
    }

    fn requests(&self) -> Vec<Arc<RequestRecord>> {
        self.lock().log.iter().cloned().collect()
    }

    fn request_count(&self) -> usize {
        self.lock().log.len()
    }

    fn clear_requests(&self) {
        self.lock().log.clear();
        tracing::trace!("Deleted request history");
    }

    fn response_table(&self) -> Arc<ResponseTable> {
        self.lock().table.clone()
    }

    fn generation(&self) -> u64 {
        self.lock().id
    }

    fn wait_for_requests(&self, count: usize, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .appended
            .wait_timeout_while(state, timeout, |s| s.log.len() < count)
            .unwrap_or_else(|e| e.into_inner());
        state.log.len() >= count
    }
}
