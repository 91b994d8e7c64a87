//! Per-turn state owned by the connection worker.
//!
//! Only the connection worker touches a `Session`, so none of its fields are
//! locked. The audio queue is the one structure shared with the decode
//! thread.

use std::sync::Arc;

use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::boundary::BoundaryResolver;
use crate::callbacks::BoundaryEvent;
use crate::connection::{ConnectionEvent, ConnectionId, Link};
use crate::error::Error;
use crate::frame::{self, OutboundFrame, TextFrame, PATH_AUDIO_METADATA, PATH_TURN_END};
use crate::messages::{parse_metadata, MetadataEvent, SpeechConfigMessage};
use crate::queue::AudioQueue;
use crate::turn::Turn;

pub(crate) struct Session {
    queue: Arc<AudioQueue>,
    resolver: BoundaryResolver,
    link: Option<Link>,
    turn: Option<Arc<Turn>>,
    output_format: String,
    request_id: String,
}

impl Session {
    pub(crate) fn new(queue: Arc<AudioQueue>) -> Self {
        Self {
            queue,
            resolver: BoundaryResolver::default(),
            link: None,
            turn: None,
            output_format: String::new(),
            request_id: String::new(),
        }
    }

    /// Makes `turn` the active turn, closing any connection still open for
    /// the previous one.
    pub(crate) fn begin_turn(
        &mut self,
        ssml: String,
        turn: Arc<Turn>,
        link: Link,
        output_format: String,
    ) {
        if let Some(previous) = self.link.take() {
            debug!(connection = %previous.id(), "Superseding active connection");
            previous.close();
        }
        info!(turn = turn.id(), connection = %link.id(), "Turn started");
        self.resolver.reset(ssml);
        self.request_id = frame::request_id();
        self.output_format = output_format;
        self.queue.begin_turn(Arc::clone(&turn));
        self.turn = Some(turn);
        self.link = Some(link);
    }

    /// Cancels the active turn. Queued audio is discarded and the turn
    /// completes without error.
    pub(crate) fn stop(&mut self) {
        if let Some(link) = self.link.take() {
            info!(connection = %link.id(), "Stopping turn");
            link.close();
        }
        self.queue.cancel();
    }

    pub(crate) fn is_current(&self, id: ConnectionId) -> bool {
        self.link.as_ref().is_some_and(|link| link.id() == id)
    }

    pub(crate) fn handle_event(&mut self, event: ConnectionEvent) -> Result<(), Error> {
        match event {
            ConnectionEvent::Opened { id } => self.on_open(id),
            ConnectionEvent::Message { id, message } => self.on_message(id, message),
            ConnectionEvent::Closed { id } => {
                self.on_close(id);
                Ok(())
            }
            ConnectionEvent::Failed { id, error } => {
                self.on_fail(id, error);
                Ok(())
            }
        }
    }

    fn on_open(&mut self, id: ConnectionId) -> Result<(), Error> {
        let (Some(link), Some(turn)) = (self.current_link(id), self.turn.as_ref()) else {
            debug!(connection = %id, "Ignoring open of stale connection");
            return Ok(());
        };

        let config = SpeechConfigMessage::new(
            turn.callbacks().metadata_options(),
            self.output_format.clone(),
        );
        let json = serde_json::to_string(&config)?;
        debug!(json = %json, "Sending speech.config");
        link.send_text(OutboundFrame::speech_config(&self.request_id, json).encode())?;
        let ssml = OutboundFrame::ssml(&self.request_id, self.resolver.text());
        link.send_text(ssml.encode())?;
        info!(
            connection = %id,
            request_id = %self.request_id,
            timestamp = ssml.header("X-Timestamp").unwrap_or_default(),
            "Handshake sent"
        );
        Ok(())
    }

    fn on_message(&mut self, id: ConnectionId, message: Message) -> Result<(), Error> {
        if !self.is_current(id) {
            debug!(connection = %id, "Ignoring message from stale connection");
            return Ok(());
        }

        match message {
            Message::Binary(data) => {
                let len = data.len();
                if !self.queue.push(data) {
                    debug!(len, "Audio frame arrived after turn end");
                }
                Ok(())
            }
            Message::Text(text) => {
                let frame = match TextFrame::parse(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "Dropping text frame");
                        return Ok(());
                    }
                };
                match frame.path() {
                    Some(PATH_AUDIO_METADATA) => self.dispatch_metadata(frame.body()),
                    Some(PATH_TURN_END) => {
                        info!(connection = %id, "Turn end received");
                        if let Some(link) = self.link.take() {
                            link.close();
                        }
                        self.queue.mark_done();
                    }
                    other => debug!(path = ?other, "Ignoring text frame"),
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn dispatch_metadata(&mut self, body: &str) {
        let events = match parse_metadata(body) {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Dropping metadata frame");
                return;
            }
        };
        let Some(turn) = self.turn.clone() else {
            return;
        };
        let callbacks = turn.callbacks();

        for event in events {
            match event {
                MetadataEvent::WordBoundary {
                    offset,
                    text,
                    length,
                } if callbacks.wants_word_boundary() => {
                    if let Some(event) = self.resolve_word(offset, &text, length) {
                        callbacks.emit_word_boundary(event);
                    }
                }
                MetadataEvent::PunctuationBoundary {
                    offset,
                    text,
                    length,
                } if callbacks.wants_punctuation_boundary() => {
                    if let Some(event) = self.resolve_word(offset, &text, length) {
                        callbacks.emit_punctuation_boundary(event);
                    }
                }
                MetadataEvent::SentenceBoundary {
                    offset,
                    text,
                    length,
                } if callbacks.wants_sentence_boundary() => {
                    match self.resolver.resolve_sentence(&text) {
                        Some(text_offset) => callbacks.emit_sentence_boundary(BoundaryEvent {
                            audio_offset: offset,
                            text_offset,
                            length,
                        }),
                        None => debug!(text = %text, "Sentence not found in input"),
                    }
                }
                MetadataEvent::Viseme { offset, viseme_id } => {
                    callbacks.emit_viseme(offset, viseme_id)
                }
                MetadataEvent::Bookmark { offset, name } => callbacks.emit_bookmark(offset, &name),
                MetadataEvent::SessionEnd { offset } => callbacks.emit_session_end(offset),
                _ => {}
            }
        }
    }

    fn resolve_word(&mut self, offset: u64, text: &str, length: u32) -> Option<BoundaryEvent> {
        match self.resolver.resolve_word(text) {
            Some(text_offset) => Some(BoundaryEvent {
                audio_offset: offset,
                text_offset,
                length,
            }),
            None => {
                debug!(text = %text, "Boundary not found in input");
                None
            }
        }
    }

    fn on_close(&mut self, id: ConnectionId) {
        if !self.is_current(id) {
            debug!(connection = %id, "Ignoring close of stale connection");
            return;
        }
        info!(connection = %id, "Connection closed");
        self.link = None;
        self.queue.mark_done();
    }

    fn on_fail(&mut self, id: ConnectionId, error: Error) {
        if !self.is_current(id) {
            debug!(connection = %id, error = %error, "Ignoring failure of stale connection");
            return;
        }
        warn!(connection = %id, error = %error, "Connection failed");
        self.link = None;
        // The transport error must win over the success the decode thread
        // reports once the queue is done.
        if let Some(turn) = &self.turn {
            turn.completion().fail(error);
        }
        self.queue.mark_done();
    }

    /// Fails the active turn after an event handler error or panic.
    pub(crate) fn fail_current(&mut self, error: Error) {
        if let Some(turn) = &self.turn {
            if turn.completion().fail(error) {
                warn!(turn = turn.id(), "Turn failed");
            }
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.queue.mark_done();
    }

    pub(crate) fn shutdown(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        if let Some(turn) = self.turn.take() {
            turn.completion().fail(Error::Shutdown);
        }
    }

    fn current_link(&self, id: ConnectionId) -> Option<&Link> {
        self.link.as_ref().filter(|link| link.id() == id)
    }
}
