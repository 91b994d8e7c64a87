//! Rust client library for streaming neural text-to-speech over WebSocket.
//!
//! SSML goes in; decoded PCM comes out through a callback, together with
//! word, punctuation and sentence boundaries resolved to character offsets
//! in the SSML, bookmarks and visemes.
//!
//! # Example
//!
//! ```no_run
//! use rust_natural_voice::{SsmlBuilder, SynthesisCallbacks, Synthesizer, SynthesizerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rust_natural_voice::Error> {
//!     let config = SynthesizerConfig::from_env().ok_or(rust_natural_voice::Error::NotConfigured)?;
//!     let synthesizer = Synthesizer::new(config)?;
//!
//!     synthesizer.set_callbacks(
//!         SynthesisCallbacks::new()
//!             .on_audio(|pcm| println!("Received {} bytes of PCM", pcm.len()))
//!             .on_word_boundary(|word| println!("Word at char {}", word.text_offset)),
//!     );
//!
//!     let ssml = SsmlBuilder::new("en-US")
//!         .voice("en-US-JennyNeural")
//!         .text("Hello, world!")
//!         .build();
//!     synthesizer.speak(ssml).await?;
//!
//!     synthesizer.shutdown();
//!     Ok(())
//! }
//! ```

mod boundary;
mod callbacks;
mod config;
mod connection;
mod decode_worker;
mod decoder;
mod error;
pub mod frame;
mod messages;
pub mod proxy;
mod queue;
mod session;
mod ssml;
mod synthesizer;
mod turn;
mod worker;

pub use boundary::{utf16_offset, BoundaryResolver};
pub use callbacks::{BoundaryEvent, SynthesisCallbacks};
pub use config::{
    SynthesizerConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_OUTPUT_FORMAT, SUBSCRIPTION_KEY_HEADER,
};
pub use decoder::{AudioDecoder, Mp3Decoder};
pub use error::{DecodeError, Error};
pub use messages::*;
pub use ssml::{xml_escape, OffsetMap, Prosody, SsmlBuilder, MSTTS_NAMESPACE, SSML_NAMESPACE};
pub use synthesizer::Synthesizer;
pub use turn::{Completion, CompletionHandle};
