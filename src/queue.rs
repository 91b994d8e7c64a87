//! FIFO of compressed audio frames shared by the connection and decode threads.
//!
//! The lock is held only to push, pop or flip flags; decoding happens after
//! the chunk has been taken out.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::turn::Turn;

/// A binary frame as received, header included.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// When the frame arrived.
    pub received_at: Instant,
    /// Raw frame bytes.
    pub frame: Vec<u8>,
}

/// Next unit of work for the decode thread.
#[derive(Debug)]
pub(crate) enum Work {
    /// Decode this chunk for the given turn.
    Chunk {
        chunk: AudioChunk,
        turn: Option<Arc<Turn>>,
        epoch: u64,
    },
    /// No more chunks will arrive for the turn. `flush` is false when the
    /// turn was cancelled and buffered audio must be dropped.
    TurnDone {
        turn: Option<Arc<Turn>>,
        flush: bool,
    },
    /// The pipeline is shutting down.
    Stop,
}

#[derive(Debug, Default)]
struct QueueState {
    chunks: VecDeque<AudioChunk>,
    turn: Option<Arc<Turn>>,
    epoch: u64,
    accepting: bool,
    done: bool,
    cancelled: bool,
    stopping: bool,
}

/// Unbounded audio chunk queue with turn-done and shutdown signalling.
#[derive(Debug, Default)]
pub(crate) struct AudioQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl AudioQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts collecting audio for a new turn.
    ///
    /// Pending chunks of the previous turn are discarded. If that turn was
    /// still unresolved it completes successfully, as a cancelled turn does.
    pub(crate) fn begin_turn(&self, turn: Arc<Turn>) {
        let superseded = {
            let mut state = self.lock();
            state.chunks.clear();
            state.epoch += 1;
            state.accepting = true;
            state.done = false;
            state.cancelled = false;
            state.turn.replace(turn)
        };
        if let Some(old) = superseded {
            old.completion().succeed();
        }
    }

    /// Appends a frame. Frames pushed after a cancel are dropped.
    pub(crate) fn push(&self, frame: Vec<u8>) -> bool {
        {
            let mut state = self.lock();
            if !state.accepting || state.stopping {
                return false;
            }
            state.chunks.push_back(AudioChunk {
                received_at: Instant::now(),
                frame,
            });
        }
        self.ready.notify_one();
        true
    }

    /// Marks the current turn as having received all its audio.
    pub(crate) fn mark_done(&self) {
        {
            let mut state = self.lock();
            state.accepting = false;
            state.done = true;
        }
        self.ready.notify_one();
    }

    /// Drops unread chunks and finishes the current turn without flushing.
    pub(crate) fn cancel(&self) {
        {
            let mut state = self.lock();
            state.chunks.clear();
            state.accepting = false;
            state.cancelled = true;
            state.done = true;
        }
        self.ready.notify_one();
    }

    /// Makes [`next`](Self::next) return [`Work::Stop`] from now on.
    pub(crate) fn shut_down(&self) {
        {
            let mut state = self.lock();
            state.stopping = true;
            state.chunks.clear();
        }
        self.ready.notify_all();
    }

    /// Number of chunks waiting to be decoded.
    pub(crate) fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    /// Blocks until there is a chunk, the turn is done, or shutdown.
    pub(crate) fn next(&self) -> Work {
        let mut state = self.lock();
        loop {
            if state.stopping {
                return Work::Stop;
            }
            if let Some(chunk) = state.chunks.pop_front() {
                return Work::Chunk {
                    chunk,
                    turn: state.turn.clone(),
                    epoch: state.epoch,
                };
            }
            if state.done {
                state.done = false;
                let flush = !state.cancelled;
                state.cancelled = false;
                return Work::TurnDone {
                    turn: state.turn.take(),
                    flush,
                };
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::SynthesisCallbacks;
    use std::thread;
    use std::time::Duration;

    fn turn(id: u64) -> (Arc<Turn>, crate::turn::CompletionHandle) {
        Turn::new(id, Arc::new(SynthesisCallbacks::new()))
    }

    fn expect_chunk(queue: &AudioQueue) -> Vec<u8> {
        match queue.next() {
            Work::Chunk { chunk, .. } => chunk.frame,
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = AudioQueue::new();
        let (t, _handle) = turn(1);
        queue.begin_turn(t);

        assert!(queue.push(vec![1]));
        assert!(queue.push(vec![2]));
        assert!(queue.push(vec![3]));
        assert_eq!(queue.len(), 3);

        assert_eq!(expect_chunk(&queue), vec![1]);
        assert_eq!(expect_chunk(&queue), vec![2]);
        assert_eq!(expect_chunk(&queue), vec![3]);
    }

    #[test]
    fn test_done_after_drain() {
        let queue = AudioQueue::new();
        let (t, _handle) = turn(1);
        queue.begin_turn(t);
        queue.push(vec![1]);
        queue.mark_done();

        assert_eq!(expect_chunk(&queue), vec![1]);
        match queue.next() {
            Work::TurnDone { turn, flush } => {
                assert_eq!(turn.map(|t| t.id()), Some(1));
                assert!(flush);
            }
            other => panic!("expected turn done, got {other:?}"),
        }
        assert!(!queue.push(vec![2]), "no pushes after done");
    }

    #[test]
    fn test_cancel_discards_pending() {
        let queue = AudioQueue::new();
        let (t, _handle) = turn(1);
        queue.begin_turn(t);
        queue.push(vec![1]);
        queue.push(vec![2]);
        queue.cancel();

        assert_eq!(queue.len(), 0);
        assert!(!queue.push(vec![3]));
        match queue.next() {
            Work::TurnDone { flush, .. } => assert!(!flush),
            other => panic!("expected turn done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_begin_turn_completes_superseded_turn() {
        let queue = AudioQueue::new();
        let (first, first_handle) = turn(1);
        let (second, _second_handle) = turn(2);

        queue.begin_turn(first);
        queue.push(vec![1]);
        queue.cancel();
        queue.begin_turn(second);

        assert!(first_handle.await.is_ok());
        assert!(queue.push(vec![9]));
        match queue.next() {
            Work::Chunk { chunk, turn, .. } => {
                assert_eq!(chunk.frame, vec![9]);
                assert_eq!(turn.map(|t| t.id()), Some(2));
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_epoch_changes_per_turn() {
        let queue = AudioQueue::new();
        let (a, _ha) = turn(1);
        let (b, _hb) = turn(2);

        queue.begin_turn(a);
        queue.push(vec![1]);
        let first = match queue.next() {
            Work::Chunk { epoch, .. } => epoch,
            other => panic!("unexpected {other:?}"),
        };
        queue.begin_turn(b);
        queue.push(vec![2]);
        let second = match queue.next() {
            Work::Chunk { epoch, .. } => epoch,
            other => panic!("unexpected {other:?}"),
        };
        assert_ne!(first, second);
    }

    #[test]
    fn test_shutdown_wakes_waiter() {
        let queue = Arc::new(AudioQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || matches!(queue.next(), Work::Stop))
        };
        thread::sleep(Duration::from_millis(20));
        queue.shut_down();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_push_wakes_waiter() {
        let queue = Arc::new(AudioQueue::new());
        let (t, _handle) = turn(1);
        queue.begin_turn(t);
        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || expect_chunk(&queue))
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(vec![7]);
        assert_eq!(waiter.join().unwrap(), vec![7]);
    }
}
