//! JSON bodies exchanged over the synthesis WebSocket.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Error;

// ============================================================================
// Outbound
// ============================================================================

/// Body of the `speech.config` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpeechConfigMessage {
    /// Synthesis context.
    pub context: SpeechContext,
}

/// Wrapper object of the `speech.config` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpeechContext {
    /// Synthesis settings.
    pub synthesis: SynthesisSettings,
}

/// Audio and language settings for one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesisSettings {
    /// Audio output settings.
    pub audio: AudioSettings,
    /// Language settings.
    pub language: LanguageSettings,
}

/// Requested audio format and metadata channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    /// Which metadata events the server should emit.
    pub metadata_options: MetadataOptions,
    /// Output audio format name.
    pub output_format: String,
}

/// Metadata channel switches.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataOptions {
    pub bookmark_enabled: bool,
    pub punctuation_boundary_enabled: bool,
    pub sentence_boundary_enabled: bool,
    pub word_boundary_enabled: bool,
    pub viseme_enabled: bool,
}

/// Language settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LanguageSettings {
    /// Language auto-detection; always disabled, the SSML names the voice.
    pub auto_detection: bool,
}

impl SpeechConfigMessage {
    /// Creates a configuration body.
    pub fn new(metadata_options: MetadataOptions, output_format: String) -> Self {
        Self {
            context: SpeechContext {
                synthesis: SynthesisSettings {
                    audio: AudioSettings {
                        metadata_options,
                        output_format,
                    },
                    language: LanguageSettings {
                        auto_detection: false,
                    },
                },
            },
        }
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Audio-timeline ticks per second (ticks are 100 ns).
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// A timing event reported in an `audio.metadata` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataEvent {
    /// Mouth shape for lip-sync.
    Viseme {
        /// Audio offset in ticks.
        offset: u64,
        /// Viseme id.
        viseme_id: u32,
    },
    /// A spoken word.
    WordBoundary {
        /// Audio offset in ticks.
        offset: u64,
        /// Word text as reported by the server.
        text: String,
        /// Reported length.
        length: u32,
    },
    /// A punctuation mark.
    PunctuationBoundary {
        /// Audio offset in ticks.
        offset: u64,
        /// Punctuation text as reported by the server.
        text: String,
        /// Reported length.
        length: u32,
    },
    /// A sentence.
    SentenceBoundary {
        /// Audio offset in ticks.
        offset: u64,
        /// Sentence text as reported by the server.
        text: String,
        /// Reported length.
        length: u32,
    },
    /// A `<bookmark>` was reached.
    Bookmark {
        /// Audio offset in ticks.
        offset: u64,
        /// Bookmark name.
        name: String,
    },
    /// End of the synthesized audio.
    SessionEnd {
        /// Audio offset in ticks.
        offset: u64,
    },
}

impl MetadataEvent {
    /// Audio offset in ticks.
    pub fn offset_ticks(&self) -> u64 {
        match self {
            Self::Viseme { offset, .. }
            | Self::WordBoundary { offset, .. }
            | Self::PunctuationBoundary { offset, .. }
            | Self::SentenceBoundary { offset, .. }
            | Self::Bookmark { offset, .. }
            | Self::SessionEnd { offset } => *offset,
        }
    }

    /// Audio offset as a duration from the start of the turn.
    pub fn audio_offset(&self) -> Duration {
        ticks_to_duration(self.offset_ticks())
    }
}

/// Converts 100-ns ticks to a [`Duration`].
pub fn ticks_to_duration(ticks: u64) -> Duration {
    let nanos_per_tick = 1_000_000_000 / TICKS_PER_SECOND;
    Duration::new(
        ticks / TICKS_PER_SECOND,
        ((ticks % TICKS_PER_SECOND) * nanos_per_tick) as u32,
    )
}

#[derive(Debug, Deserialize)]
struct MetadataEnvelope {
    #[serde(rename = "Metadata")]
    metadata: Vec<RawMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Data")]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OffsetData {
    #[serde(rename = "Offset")]
    offset: u64,
}

#[derive(Debug, Deserialize)]
struct VisemeData {
    #[serde(rename = "Offset")]
    offset: u64,
    #[serde(rename = "VisemeId")]
    viseme_id: u32,
}

#[derive(Debug, Deserialize)]
struct BookmarkData {
    #[serde(rename = "Offset")]
    offset: u64,
    #[serde(rename = "Bookmark")]
    bookmark: String,
}

#[derive(Debug, Deserialize)]
struct BoundaryData {
    #[serde(rename = "Offset")]
    offset: u64,
    text: BoundaryText,
}

#[derive(Debug, Deserialize)]
struct BoundaryText {
    #[serde(rename = "Text")]
    text: String,
    #[serde(rename = "Length")]
    length: u32,
    #[serde(rename = "BoundaryType", default)]
    boundary_type: Option<String>,
}

/// Parses the body of an `audio.metadata` frame.
///
/// A body that is not a metadata envelope is an error. Unknown event types
/// and events with missing fields are skipped.
pub fn parse_metadata(body: &str) -> Result<Vec<MetadataEvent>, Error> {
    let envelope: MetadataEnvelope = serde_json::from_str(body)?;
    let events = envelope
        .metadata
        .into_iter()
        .filter_map(|raw| {
            let kind = raw.kind.clone();
            match convert(raw) {
                Ok(Some(event)) => Some(event),
                Ok(None) => {
                    debug!(kind = %kind, "Ignoring unknown metadata type");
                    None
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Skipping malformed metadata event");
                    None
                }
            }
        })
        .collect();
    Ok(events)
}

fn convert(raw: RawMetadata) -> Result<Option<MetadataEvent>, serde_json::Error> {
    let event = match raw.kind.as_str() {
        "Viseme" => {
            let data: VisemeData = serde_json::from_value(raw.data)?;
            MetadataEvent::Viseme {
                offset: data.offset,
                viseme_id: data.viseme_id,
            }
        }
        "WordBoundary" => {
            let data: BoundaryData = serde_json::from_value(raw.data)?;
            let is_punctuation =
                data.text.boundary_type.as_deref() == Some("PunctuationBoundary");
            if is_punctuation {
                MetadataEvent::PunctuationBoundary {
                    offset: data.offset,
                    text: data.text.text,
                    length: data.text.length,
                }
            } else {
                MetadataEvent::WordBoundary {
                    offset: data.offset,
                    text: data.text.text,
                    length: data.text.length,
                }
            }
        }
        "SentenceBoundary" => {
            let data: BoundaryData = serde_json::from_value(raw.data)?;
            MetadataEvent::SentenceBoundary {
                offset: data.offset,
                text: data.text.text,
                length: data.text.length,
            }
        }
        "Bookmark" => {
            let data: BookmarkData = serde_json::from_value(raw.data)?;
            MetadataEvent::Bookmark {
                offset: data.offset,
                name: data.bookmark,
            }
        }
        "SessionEnd" => {
            let data: OffsetData = serde_json::from_value(raw.data)?;
            MetadataEvent::SessionEnd {
                offset: data.offset,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_config_shape() {
        let options = MetadataOptions {
            word_boundary_enabled: true,
            ..Default::default()
        };
        let msg = SpeechConfigMessage::new(options, "audio-24khz-96kbitrate-mono-mp3".into());
        let json = serde_json::to_value(&msg).unwrap();

        let audio = &json["context"]["synthesis"]["audio"];
        assert_eq!(audio["outputFormat"], "audio-24khz-96kbitrate-mono-mp3");
        assert_eq!(audio["metadataOptions"]["wordBoundaryEnabled"], true);
        assert_eq!(audio["metadataOptions"]["visemeEnabled"], false);
        assert_eq!(audio["metadataOptions"]["bookmarkEnabled"], false);
        assert_eq!(
            json["context"]["synthesis"]["language"]["autoDetection"],
            false
        );
    }

    #[test]
    fn test_parse_metadata_kinds() {
        let body = r#"{"Metadata":[
            {"Type":"WordBoundary","Data":{"Offset":1000,"Duration":500,"text":{"Text":"Hello","Length":5,"BoundaryType":"WordBoundary"}}},
            {"Type":"WordBoundary","Data":{"Offset":2000,"text":{"Text":",","Length":1,"BoundaryType":"PunctuationBoundary"}}},
            {"Type":"SentenceBoundary","Data":{"Offset":0,"text":{"Text":"Hello, world.","Length":13}}},
            {"Type":"Viseme","Data":{"Offset":3000,"VisemeId":7}},
            {"Type":"Bookmark","Data":{"Offset":4000,"Bookmark":"m1"}},
            {"Type":"SessionEnd","Data":{"Offset":5000}}
        ]}"#;
        let events = parse_metadata(body).unwrap();

        assert_eq!(
            events,
            vec![
                MetadataEvent::WordBoundary {
                    offset: 1000,
                    text: "Hello".into(),
                    length: 5
                },
                MetadataEvent::PunctuationBoundary {
                    offset: 2000,
                    text: ",".into(),
                    length: 1
                },
                MetadataEvent::SentenceBoundary {
                    offset: 0,
                    text: "Hello, world.".into(),
                    length: 13
                },
                MetadataEvent::Viseme {
                    offset: 3000,
                    viseme_id: 7
                },
                MetadataEvent::Bookmark {
                    offset: 4000,
                    name: "m1".into()
                },
                MetadataEvent::SessionEnd { offset: 5000 },
            ]
        );
    }

    #[test]
    fn test_parse_metadata_skips_unknown_and_broken() {
        let body = r#"{"Metadata":[
            {"Type":"Something","Data":{"Offset":1}},
            {"Type":"Viseme","Data":{"Offset":2}},
            {"Type":"SessionEnd","Data":{"Offset":3}}
        ]}"#;
        let events = parse_metadata(body).unwrap();
        assert_eq!(events, vec![MetadataEvent::SessionEnd { offset: 3 }]);
    }

    #[test]
    fn test_parse_metadata_rejects_non_json() {
        assert!(parse_metadata("not json").is_err());
        assert!(parse_metadata("{}").is_err());
    }

    #[test]
    fn test_audio_offset() {
        let event = MetadataEvent::SessionEnd { offset: 15_000_000 };
        assert_eq!(event.audio_offset(), Duration::from_millis(1500));
    }

    #[test]
    fn test_ticks_to_duration() {
        assert_eq!(ticks_to_duration(TICKS_PER_SECOND), Duration::from_secs(1));
        assert_eq!(ticks_to_duration(1), Duration::from_nanos(100));
        assert_eq!(
            ticks_to_duration(u64::MAX),
            Duration::new(u64::MAX / TICKS_PER_SECOND, 955_161_500)
        );
    }
}
