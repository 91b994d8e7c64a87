//! The persistent connection worker thread.
//!
//! A single-threaded tokio runtime runs for the lifetime of the synthesizer.
//! Commands from the caller and events from connection tasks are handled one
//! at a time, so the session needs no locking.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{error, info};

use crate::config::SynthesizerConfig;
use crate::connection::{self, ConnectionId};
use crate::error::{panic_message, Error};
use crate::queue::AudioQueue;
use crate::session::Session;
use crate::turn::Turn;

/// Requests from the synthesizer to the connection worker.
#[derive(Debug)]
pub(crate) enum Command {
    Speak {
        ssml: String,
        turn: Arc<Turn>,
        config: SynthesizerConfig,
    },
    Stop,
}

/// Starts the worker thread. It exits once every command sender is dropped.
pub(crate) fn spawn(
    queue: Arc<AudioQueue>,
    commands: UnboundedReceiver<Command>,
) -> io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    thread::Builder::new()
        .name("tts-connection".to_string())
        .spawn(move || runtime.block_on(run(queue, commands)))
}

async fn run(queue: Arc<AudioQueue>, mut commands: UnboundedReceiver<Command>) {
    info!("Connection worker started");
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut session = Session::new(queue);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Speak { ssml, turn, config }) => {
                    let events_tx = events_tx.clone();
                    guarded(&mut session, move |session| {
                        let output_format = config.output_format.clone();
                        let link = connection::open(ConnectionId(turn.id()), config, events_tx);
                        session.begin_turn(ssml, turn, link, output_format);
                        Ok(())
                    });
                }
                Some(Command::Stop) => guarded(&mut session, |session| {
                    session.stop();
                    Ok(())
                }),
                None => break,
            },
            Some(event) = events.recv() => {
                guarded(&mut session, |session| session.handle_event(event));
            }
        }
    }

    session.shutdown();
    info!("Connection worker stopped");
}

/// Runs one handler. Errors and panics fail the active turn; the loop keeps
/// going for later turns.
fn guarded(session: &mut Session, f: impl FnOnce(&mut Session) -> Result<(), Error>) {
    let error = match panic::catch_unwind(AssertUnwindSafe(|| f(session))) {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(payload) => Error::HandlerPanic(panic_message(payload.as_ref())),
    };
    error!(error = %error, "Event handling failed");
    session.fail_current(error);
}
