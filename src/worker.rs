use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Implemented by the event enums carried over a run channel so the stream
/// can track run completion.
pub trait RunEvent: Send + 'static {
    fn is_terminal(&self) -> bool;
    fn is_failure(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Superseded,
}

/// The sending half handed to a background run. Every event is tagged with
/// the run's epoch; once a newer run starts, emits become no-ops.
pub struct EventSink<E> {
    epoch: u64,
    latest: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<(u64, E)>,
}

impl<E> EventSink<E> {
    /// Sends an event unless this run has been superseded. Returns whether
    /// the event was actually queued.
    pub fn emit(&self, event: E) -> bool {
        if self.is_stale() {
            return false;
        }
        self.tx.send((self.epoch, event)).is_ok()
    }

    /// True once a newer run has started. Long loops poll this to stop work
    /// early; a superseded run's output is discarded either way.
    pub fn is_stale(&self) -> bool {
        self.latest.load(Ordering::SeqCst) != self.epoch
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Starts background runs of one operation kind. At most one run is live at a
/// time: starting a new one supersedes the previous run immediately.
pub struct Runner<E> {
    latest: Arc<AtomicU64>,
    states: Arc<Mutex<HashMap<u64, RunState>>>,
    tx: mpsc::UnboundedSender<(u64, E)>,
}

/// The receiving half held by the caller. Events from superseded epochs are
/// dropped before the caller ever sees them.
pub struct EventStream<E> {
    latest: Arc<AtomicU64>,
    states: Arc<Mutex<HashMap<u64, RunState>>>,
    rx: mpsc::UnboundedReceiver<(u64, E)>,
}

/// Creates a runner/stream pair for one operation kind.
pub fn channel<E: RunEvent>() -> (Runner<E>, EventStream<E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let latest = Arc::new(AtomicU64::new(0));
    let states = Arc::new(Mutex::new(HashMap::new()));
    (
        Runner {
            latest: Arc::clone(&latest),
            states: Arc::clone(&states),
            tx,
        },
        EventStream { latest, states, rx },
    )
}

impl<E: RunEvent> Runner<E> {
    /// Starts a run on the blocking pool and returns its epoch. Any run still
    /// marked `Running` becomes `Superseded` first; its in-flight events will
    /// be filtered out by the stream.
    pub fn start<F>(&self, job: F) -> u64
    where
        F: FnOnce(&EventSink<E>) + Send + 'static,
    {
        let epoch = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut states = self.states.lock().expect("runner state lock");
            for state in states.values_mut() {
                if *state == RunState::Running {
                    *state = RunState::Superseded;
                }
            }
            states.insert(epoch, RunState::Running);
        }
        let sink = EventSink {
            epoch,
            latest: Arc::clone(&self.latest),
            tx: self.tx.clone(),
        };
        tokio::task::spawn_blocking(move || job(&sink));
        epoch
    }

    pub fn state(&self, epoch: u64) -> Option<RunState> {
        self.states.lock().expect("runner state lock").get(&epoch).copied()
    }
}

impl<E: RunEvent> EventStream<E> {
    /// Receives the next event of the newest run, skipping anything a
    /// superseded run managed to queue. The terminal event of a run is
    /// delivered exactly once and updates the run's state.
    pub async fn recv(&mut self) -> Option<E> {
        while let Some((epoch, event)) = self.rx.recv().await {
            if let Some(event) = self.filter(epoch, event) {
                return Some(event);
            }
        }
        None
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<E> {
        while let Ok((epoch, event)) = self.rx.try_recv() {
            if let Some(event) = self.filter(epoch, event) {
                return Some(event);
            }
        }
        None
    }

    fn filter(&self, epoch: u64, event: E) -> Option<E> {
        if epoch != self.latest.load(Ordering::SeqCst) {
            return None;
        }
        if event.is_terminal() {
            let state = if event.is_failure() {
                RunState::Failed
            } else {
                RunState::Completed
            };
            self.states
                .lock()
                .expect("runner state lock")
                .insert(epoch, state);
        }
        Some(event)
    }
}
