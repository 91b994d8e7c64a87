//! Text/binary framing used on the synthesis WebSocket.
//!
//! Every frame starts with `Key:Value\r\n` header lines followed by an empty
//! line. Text frames carry a UTF-8 body after the empty line. Binary frames
//! start with a two-byte header length, then header lines ending in
//! `Path:audio\r\n`, then raw compressed audio.

use crate::error::Error;

/// `Path` of the outbound configuration frame.
pub const PATH_SPEECH_CONFIG: &str = "speech.config";
/// `Path` of the outbound SSML frame.
pub const PATH_SSML: &str = "ssml";
/// `Path` of inbound metadata frames.
pub const PATH_AUDIO_METADATA: &str = "audio.metadata";
/// `Path` of the inbound end-of-turn frame.
pub const PATH_TURN_END: &str = "turn.end";

const AUDIO_MARKER: &[u8] = b"Path:audio\r\n";
const HEADER_BODY_SEPARATOR: &str = "\r\n\r\n";

/// A text frame to be sent to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl OutboundFrame {
    /// Creates a frame stamped with the current time.
    pub fn new(path: &str, content_type: &str, request_id: &str, body: String) -> Self {
        Self {
            headers: vec![
                ("X-Timestamp", timestamp()),
                ("X-RequestId", request_id.to_string()),
                ("Content-Type", content_type.to_string()),
                ("Path", path.to_string()),
            ],
            body,
        }
    }

    /// The `speech.config` frame carrying a JSON body.
    pub fn speech_config(request_id: &str, json: String) -> Self {
        Self::new(
            PATH_SPEECH_CONFIG,
            "application/json; charset=utf-8",
            request_id,
            json,
        )
    }

    /// The `ssml` frame carrying the document to synthesize.
    pub fn ssml(request_id: &str, ssml: &str) -> Self {
        Self::new(PATH_SSML, "application/ssml+xml", request_id, ssml.to_string())
    }

    /// Returns the value of a header, if set.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the frame body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Serializes the frame to its wire text.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 160);
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push(':');
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

/// A parsed inbound text frame borrowing from the received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFrame<'a> {
    headers: Vec<(&'a str, &'a str)>,
    body: &'a str,
}

impl<'a> TextFrame<'a> {
    /// Parses a text frame.
    pub fn parse(text: &'a str) -> Result<Self, Error> {
        let (head, body) = text
            .split_once(HEADER_BODY_SEPARATOR)
            .ok_or_else(|| Error::MalformedFrame("missing header terminator".to_string()))?;

        let headers = head
            .split("\r\n")
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.split_once(':')
                    .map(|(key, value)| (key.trim(), value.trim()))
                    .ok_or_else(|| Error::MalformedFrame(format!("bad header line: {line}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { headers, body })
    }

    /// Returns the value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| *value)
    }

    /// Returns the `Path` header.
    pub fn path(&self) -> Option<&'a str> {
        self.header("Path")
    }

    /// Returns the text after the header block.
    pub fn body(&self) -> &'a str {
        self.body
    }
}

/// Extracts the compressed audio from a binary frame.
///
/// Only the header, as sized by the big-endian length prefix, is searched
/// for the `Path:audio` marker. Returns `None` when the frame is shorter
/// than its declared header or the header lacks the marker.
pub fn audio_payload(frame: &[u8]) -> Option<&[u8]> {
    let header_len = u16::from_be_bytes([*frame.first()?, *frame.get(1)?]) as usize;
    let header = frame.get(2..2 + header_len)?;
    let marker_pos = header
        .windows(AUDIO_MARKER.len())
        .position(|window| window == AUDIO_MARKER)?;
    frame.get(2 + marker_pos + AUDIO_MARKER.len()..)
}

/// UTC timestamp in the format expected by `X-Timestamp`.
pub fn timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// A fresh random request identifier (32 lowercase hex digits).
pub fn request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_frame(header: &str, audio: &[u8]) -> Vec<u8> {
        let mut frame = (header.len() as u16).to_be_bytes().to_vec();
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(audio);
        frame
    }

    #[test]
    fn test_encode_ssml_frame() {
        let frame = OutboundFrame::ssml("abc123", "<speak>hi</speak>");
        assert_eq!(frame.header("path"), Some(PATH_SSML));
        assert_eq!(frame.header("X-RequestId"), Some("abc123"));
        assert_eq!(frame.header("X-Missing"), None);
        assert_eq!(frame.body(), "<speak>hi</speak>");
        let text = frame.encode();

        assert!(text.starts_with("X-Timestamp:"));
        assert!(text.contains("\r\nX-RequestId:abc123\r\n"));
        assert!(text.contains("\r\nContent-Type:application/ssml+xml\r\n"));
        assert!(text.ends_with("Path:ssml\r\n\r\n<speak>hi</speak>"));
    }

    #[test]
    fn test_encoded_frame_parses_back() {
        let frame = OutboundFrame::speech_config("id", "{\"a\":1}".to_string());
        let encoded = frame.encode();
        let parsed = TextFrame::parse(&encoded).unwrap();

        assert_eq!(parsed.path(), Some(PATH_SPEECH_CONFIG));
        assert_eq!(parsed.header("x-requestid"), Some("id"));
        assert_eq!(parsed.body(), "{\"a\":1}");
    }

    #[test]
    fn test_parse_turn_end() {
        let text = "X-RequestId:0123\r\n\
                    Content-Type:application/json; charset=utf-8\r\n\
                    Path:turn.end\r\n\r\n{}";
        let frame = TextFrame::parse(text).unwrap();

        assert_eq!(frame.path(), Some(PATH_TURN_END));
        assert_eq!(
            frame.header("Content-Type"),
            Some("application/json; charset=utf-8")
        );
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!(TextFrame::parse("Path:turn.end\r\n").is_err());
        assert!(TextFrame::parse("garbage\r\n\r\n").is_err());
    }

    #[test]
    fn test_audio_payload() {
        let frame = binary_frame(
            "X-RequestId:1\r\nContent-Type:audio/mpeg\r\nPath:audio\r\n",
            &[0xff, 0xf3, 0x00],
        );
        assert_eq!(audio_payload(&frame), Some(&[0xff, 0xf3, 0x00][..]));
    }

    #[test]
    fn test_audio_payload_missing_marker() {
        let frame = binary_frame("X-RequestId:1\r\nPath:other\r\n", &[1, 2, 3]);
        assert_eq!(audio_payload(&frame), None);
        assert_eq!(audio_payload(&[0]), None);
    }

    #[test]
    fn test_audio_marker_in_body_is_not_a_header() {
        let frame = binary_frame(
            "X-RequestId:1\r\nPath:other\r\n",
            b"\xff\xf3Path:audio\r\n\x01\x02",
        );
        assert_eq!(audio_payload(&frame), None);
    }

    #[test]
    fn test_declared_header_longer_than_frame() {
        let mut frame = binary_frame("Path:audio\r\n", &[]);
        frame[1] += 10;
        assert_eq!(audio_payload(&frame), None);
    }

    #[test]
    fn test_request_id_format() {
        let id = request_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, request_id());
    }
}
