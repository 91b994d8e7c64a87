//! Caller-supplied callbacks for audio and timing events.
//!
//! A metadata channel is only requested from the server when its callback
//! is registered.

use std::fmt;

use crate::messages::MetadataOptions;

/// A resolved word, punctuation or sentence boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryEvent {
    /// Audio offset in 100-ns ticks.
    pub audio_offset: u64,
    /// Character offset of the boundary text in the SSML input.
    pub text_offset: usize,
    /// Length reported by the server.
    pub length: u32,
}

type AudioFn = Box<dyn Fn(&[u8]) + Send + Sync>;
type BoundaryFn = Box<dyn Fn(BoundaryEvent) + Send + Sync>;
type OffsetFn = Box<dyn Fn(u64) + Send + Sync>;
type BookmarkFn = Box<dyn Fn(u64, &str) + Send + Sync>;
type VisemeFn = Box<dyn Fn(u64, u32) + Send + Sync>;

/// Callbacks invoked during synthesis.
///
/// Audio is delivered from the decode thread; every other callback runs on
/// the connection thread in the order the server sent the events.
#[derive(Default)]
pub struct SynthesisCallbacks {
    audio: Option<AudioFn>,
    word_boundary: Option<BoundaryFn>,
    punctuation_boundary: Option<BoundaryFn>,
    sentence_boundary: Option<BoundaryFn>,
    session_end: Option<OffsetFn>,
    bookmark: Option<BookmarkFn>,
    viseme: Option<VisemeFn>,
}

impl SynthesisCallbacks {
    /// Creates an empty set of callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives decoded 16-bit little-endian mono PCM.
    pub fn on_audio(mut self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.audio = Some(Box::new(f));
        self
    }

    pub fn on_word_boundary(mut self, f: impl Fn(BoundaryEvent) + Send + Sync + 'static) -> Self {
        self.word_boundary = Some(Box::new(f));
        self
    }

    pub fn on_punctuation_boundary(
        mut self,
        f: impl Fn(BoundaryEvent) + Send + Sync + 'static,
    ) -> Self {
        self.punctuation_boundary = Some(Box::new(f));
        self
    }

    pub fn on_sentence_boundary(
        mut self,
        f: impl Fn(BoundaryEvent) + Send + Sync + 'static,
    ) -> Self {
        self.sentence_boundary = Some(Box::new(f));
        self
    }

    /// Receives the audio offset at which the synthesized audio ends.
    pub fn on_session_end(mut self, f: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.session_end = Some(Box::new(f));
        self
    }

    /// Receives the audio offset and name of each `<bookmark>` reached.
    pub fn on_bookmark(mut self, f: impl Fn(u64, &str) + Send + Sync + 'static) -> Self {
        self.bookmark = Some(Box::new(f));
        self
    }

    /// Receives the audio offset and viseme id.
    pub fn on_viseme(mut self, f: impl Fn(u64, u32) + Send + Sync + 'static) -> Self {
        self.viseme = Some(Box::new(f));
        self
    }

    /// Metadata channels to request, derived from the registered callbacks.
    pub fn metadata_options(&self) -> MetadataOptions {
        MetadataOptions {
            bookmark_enabled: self.bookmark.is_some(),
            punctuation_boundary_enabled: self.punctuation_boundary.is_some(),
            sentence_boundary_enabled: self.sentence_boundary.is_some(),
            word_boundary_enabled: self.word_boundary.is_some(),
            viseme_enabled: self.viseme.is_some(),
        }
    }

    pub(crate) fn wants_word_boundary(&self) -> bool {
        self.word_boundary.is_some()
    }

    pub(crate) fn wants_punctuation_boundary(&self) -> bool {
        self.punctuation_boundary.is_some()
    }

    pub(crate) fn wants_sentence_boundary(&self) -> bool {
        self.sentence_boundary.is_some()
    }

    pub(crate) fn emit_audio(&self, pcm: &[u8]) {
        if let Some(f) = &self.audio {
            f(pcm);
        }
    }

    pub(crate) fn emit_word_boundary(&self, event: BoundaryEvent) {
        if let Some(f) = &self.word_boundary {
            f(event);
        }
    }

    pub(crate) fn emit_punctuation_boundary(&self, event: BoundaryEvent) {
        if let Some(f) = &self.punctuation_boundary {
            f(event);
        }
    }

    pub(crate) fn emit_sentence_boundary(&self, event: BoundaryEvent) {
        if let Some(f) = &self.sentence_boundary {
            f(event);
        }
    }

    pub(crate) fn emit_session_end(&self, offset: u64) {
        if let Some(f) = &self.session_end {
            f(offset);
        }
    }

    pub(crate) fn emit_bookmark(&self, offset: u64, name: &str) {
        if let Some(f) = &self.bookmark {
            f(offset, name);
        }
    }

    pub(crate) fn emit_viseme(&self, offset: u64, viseme_id: u32) {
        if let Some(f) = &self.viseme {
            f(offset, viseme_id);
        }
    }
}

impl fmt::Debug for SynthesisCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisCallbacks")
            .field("audio", &self.audio.is_some())
            .field("word_boundary", &self.word_boundary.is_some())
            .field("punctuation_boundary", &self.punctuation_boundary.is_some())
            .field("sentence_boundary", &self.sentence_boundary.is_some())
            .field("session_end", &self.session_end.is_some())
            .field("bookmark", &self.bookmark.is_some())
            .field("viseme", &self.viseme.is_some())
            .finish()
    }
}
