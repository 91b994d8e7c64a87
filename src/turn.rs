//! One synthesis turn and its resolve-once completion.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::callbacks::SynthesisCallbacks;
use crate::error::Error;

type Outcome = Result<(), Error>;

/// Result cell that accepts exactly one outcome; later writers are ignored.
#[derive(Debug)]
pub struct Completion {
    resolved: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl Completion {
    /// Creates an unresolved completion and the handle observing it.
    pub fn new() -> (Self, CompletionHandle) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            resolved: AtomicBool::new(false),
            sender: Mutex::new(Some(tx)),
        };
        (completion, CompletionHandle { rx })
    }

    /// Resolves with success. Returns false if already resolved.
    pub fn succeed(&self) -> bool {
        self.resolve(Ok(()))
    }

    /// Resolves with an error. Returns false if already resolved.
    pub fn fail(&self, error: Error) -> bool {
        self.resolve(Err(error))
    }

    /// True once an outcome has been recorded.
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    fn resolve(&self, outcome: Outcome) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            // The caller may have dropped its handle.
            let _ = tx.send(outcome);
        }
        true
    }
}

/// Resolves when a `speak` turn completes or fails.
///
/// Await it from async code, or call [`wait`](Self::wait) from a plain
/// thread. Yields [`Error::Shutdown`] if the synthesizer goes away first.
#[derive(Debug)]
pub struct CompletionHandle {
    rx: oneshot::Receiver<Outcome>,
}

impl CompletionHandle {
    /// Blocks the current thread until the turn resolves.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn wait(self) -> Result<(), Error> {
        self.rx.blocking_recv().unwrap_or(Err(Error::Shutdown))
    }

    /// Returns the outcome if the turn has already resolved.
    pub fn try_result(&mut self) -> Option<Result<(), Error>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(Error::Shutdown)),
        }
    }
}

impl Future for CompletionHandle {
    type Output = Result<(), Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::Shutdown)))
    }
}

/// State shared between the connection and decode threads for one turn.
#[derive(Debug)]
pub(crate) struct Turn {
    id: u64,
    completion: Completion,
    callbacks: Arc<SynthesisCallbacks>,
}

impl Turn {
    pub(crate) fn new(
        id: u64,
        callbacks: Arc<SynthesisCallbacks>,
    ) -> (Arc<Self>, CompletionHandle) {
        let (completion, handle) = Completion::new();
        let turn = Arc::new(Self {
            id,
            completion,
            callbacks,
        });
        (turn, handle)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn completion(&self) -> &Completion {
        &self.completion
    }

    pub(crate) fn callbacks(&self) -> &SynthesisCallbacks {
        &self.callbacks
    }
}
