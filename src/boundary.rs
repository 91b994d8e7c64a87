//! Maps server-reported boundary text back to offsets in the SSML input.
//!
//! The service reports each word or sentence as text plus length, never as
//! an offset. The resolver finds the reported text in the input, skipping
//! matches that fall inside markup tags, and keeps a cursor so repeated
//! words resolve to successive occurrences.

use crate::ssml::xml_escape;

/// Finds `reported` in `text` at or after byte position `start`.
///
/// Returns the byte position of the match and the byte position just past
/// it. Matches inside an unclosed `<...>` are skipped.
pub fn locate(text: &str, reported: &str, start: usize) -> Option<(usize, usize)> {
    if reported.is_empty() {
        return None;
    }
    // The input is escaped SSML, so "you're" appears as "you&apos;re".
    let needle = xml_escape(reported);
    let mut search_from = start;

    loop {
        let pos = search_from + text.get(search_from..)?.find(needle.as_str())?;
        let end = pos + needle.len();
        if !ends_inside_tag(&text[search_from..pos]) {
            return Some((pos, end));
        }
        search_from = end + text[end..].find('>')?;
    }
}

/// True if `segment` has a `<` with no matching `>` after it.
fn ends_inside_tag(segment: &str) -> bool {
    let mut rest = segment;
    while let Some(open) = rest.find('<') {
        match rest[open + 1..].find('>') {
            Some(close) => rest = &rest[open + 1 + close + 1..],
            None => return true,
        }
    }
    false
}

/// Converts a character offset in `text` to UTF-16 code units.
///
/// Resolved offsets count `char`s. Hosts that index text as UTF-16 need this
/// conversion for characters outside the Basic Multilingual Plane.
pub fn utf16_offset(text: &str, char_offset: usize) -> usize {
    text.chars().take(char_offset).map(char::len_utf16).sum()
}

/// A resolution cursor: a byte position and the number of chars before it.
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    byte: usize,
    chars: usize,
}

impl Cursor {
    /// Finds `reported` after the cursor and moves the cursor past it.
    /// Returns the char offset of the match. Only the text between the old
    /// cursor and the new one is counted.
    fn advance(&mut self, text: &str, reported: &str) -> Option<usize> {
        let (pos, end) = locate(text, reported, self.byte)?;
        let offset = self.chars + text[self.byte..pos].chars().count();
        self.chars = offset + text[pos..end].chars().count();
        self.byte = end;
        Some(offset)
    }
}

/// Resolves boundary events of one turn against its input text.
///
/// Offsets are in `char`s of the input; see [`utf16_offset`] for UTF-16.
#[derive(Debug, Clone, Default)]
pub struct BoundaryResolver {
    text: String,
    word: Cursor,
    sentence: Cursor,
}

impl BoundaryResolver {
    /// Creates a resolver over the given input.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            word: Cursor::default(),
            sentence: Cursor::default(),
        }
    }

    /// Replaces the input and rewinds both cursors.
    pub fn reset(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.word = Cursor::default();
        self.sentence = Cursor::default();
    }

    /// The input text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Resolves a word or punctuation boundary to a character offset.
    pub fn resolve_word(&mut self, reported: &str) -> Option<usize> {
        self.word.advance(&self.text, reported)
    }

    /// Resolves a sentence boundary to a character offset.
    pub fn resolve_sentence(&mut self, reported: &str) -> Option<usize> {
        self.sentence.advance(&self.text, reported)
    }

    /// Word cursor, as a byte position into the input.
    pub fn last_word_pos(&self) -> usize {
        self.word.byte
    }

    /// Sentence cursor, as a byte position into the input.
    pub fn last_sentence_pos(&self) -> usize {
        self.sentence.byte
    }
}
