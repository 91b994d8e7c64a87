//! The synthesis pipeline: one connection worker, one decode worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use crate::callbacks::SynthesisCallbacks;
use crate::config::SynthesizerConfig;
use crate::decode_worker;
use crate::decoder::{AudioDecoder, Mp3Decoder};
use crate::error::Error;
use crate::queue::AudioQueue;
use crate::turn::{CompletionHandle, Turn};
use crate::worker::{self, Command};

/// Streaming text-to-speech synthesizer.
///
/// Both worker threads start in the constructor and live until
/// [`shutdown`](Self::shutdown) or drop. Each [`speak`](Self::speak) is one
/// turn on its own connection; starting a turn supersedes the previous one.
pub struct Synthesizer {
    config: Mutex<SynthesizerConfig>,
    callbacks: Mutex<Arc<SynthesisCallbacks>>,
    commands: Mutex<Option<UnboundedSender<Command>>>,
    queue: Arc<AudioQueue>,
    connection_worker: Mutex<Option<JoinHandle<()>>>,
    decode_worker: Mutex<Option<JoinHandle<()>>>,
    next_turn: AtomicU64,
}

impl Synthesizer {
    /// Creates a synthesizer that decodes MP3 output.
    pub fn new(config: SynthesizerConfig) -> Result<Self, Error> {
        Self::with_decoder(config, Box::new(Mp3Decoder::new()))
    }

    /// Creates a synthesizer with a custom decoder for the audio substream.
    pub fn with_decoder(
        config: SynthesizerConfig,
        decoder: Box<dyn AudioDecoder>,
    ) -> Result<Self, Error> {
        let queue = Arc::new(AudioQueue::new());
        let decode_worker = decode_worker::spawn(Arc::clone(&queue), decoder)?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let connection_worker = match worker::spawn(Arc::clone(&queue), commands_rx) {
            Ok(handle) => handle,
            Err(e) => {
                queue.shut_down();
                let _ = decode_worker.join();
                return Err(e.into());
            }
        };

        info!("Synthesizer started");
        Ok(Self {
            config: Mutex::new(config),
            callbacks: Mutex::new(Arc::new(SynthesisCallbacks::new())),
            commands: Mutex::new(Some(commands)),
            queue,
            connection_worker: Mutex::new(Some(connection_worker)),
            decode_worker: Mutex::new(Some(decode_worker)),
            next_turn: AtomicU64::new(1),
        })
    }

    /// Replaces the endpoint and credentials used by later turns.
    pub fn configure(&self, config: SynthesizerConfig) {
        *lock(&self.config) = config;
    }

    /// Replaces the callbacks used by later turns.
    pub fn set_callbacks(&self, callbacks: SynthesisCallbacks) {
        *lock(&self.callbacks) = Arc::new(callbacks);
    }

    /// Starts synthesizing `ssml`.
    ///
    /// The returned handle resolves once all audio of the turn has been
    /// decoded and delivered, when the turn is stopped or superseded, or
    /// with the first transport or decode error.
    pub fn speak(&self, ssml: impl Into<String>) -> CompletionHandle {
        let id = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let callbacks = Arc::clone(&lock(&self.callbacks));
        let (turn, handle) = Turn::new(id, callbacks);

        let config = lock(&self.config).clone();
        if !config.is_configured() {
            warn!(turn = id, "speak called without an endpoint");
            turn.completion().fail(Error::NotConfigured);
            return handle;
        }

        let pending = Arc::clone(&turn);
        let command = Command::Speak {
            ssml: ssml.into(),
            turn,
            config,
        };
        let sent = lock(&self.commands)
            .as_ref()
            .is_some_and(|commands| commands.send(command).is_ok());
        if !sent {
            pending.completion().fail(Error::Shutdown);
        } else {
            debug!(turn = id, "Turn queued");
        }
        handle
    }

    /// Cancels the active turn.
    ///
    /// Audio still queued for decoding is dropped at once; the turn
    /// completes without error.
    pub fn stop(&self) {
        self.queue.cancel();
        if let Some(commands) = lock(&self.commands).as_ref() {
            let _ = commands.send(Command::Stop);
        }
    }

    /// Stops both workers and waits for them. Pending turns resolve with
    /// [`Error::Shutdown`]. Safe to call more than once.
    pub fn shutdown(&self) {
        let Some(commands) = lock(&self.commands).take() else {
            return;
        };
        info!("Synthesizer shutting down");
        drop(commands);

        if let Some(handle) = lock(&self.connection_worker).take() {
            join(handle, "connection");
        }
        self.queue.shut_down();
        if let Some(handle) = lock(&self.decode_worker).take() {
            join(handle, "decode");
        }
        info!("Synthesizer shut down");
    }
}

impl Drop for Synthesizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Joins a worker unless called from that worker, e.g. from inside a callback.
fn join(handle: JoinHandle<()>, name: &str) {
    if handle.thread().id() == thread::current().id() {
        debug!(worker = name, "Not joining worker from its own thread");
        return;
    }
    if handle.join().is_err() {
        warn!(worker = name, "Worker thread panicked");
    }
}
