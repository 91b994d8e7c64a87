//! SSML document construction.

use crate::callbacks::BoundaryEvent;

/// Namespace of the core SSML elements.
pub const SSML_NAMESPACE: &str = "http://www.w3.org/2001/10/synthesis";
/// Namespace of the service-specific `mstts` extensions.
pub const MSTTS_NAMESPACE: &str = "http://www.w3.org/2001/mstts";

/// Escapes the five XML-significant characters.
///
/// The boundary resolver escapes server-reported words with this same
/// function so they match text written by [`SsmlBuilder`].
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Volume, rate and pitch adjustments on the host's scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prosody {
    /// Volume, 0..=100. 100 is unchanged.
    pub volume: u32,
    /// Rate adjustment, -10..=10. 0 is unchanged.
    pub rate: i32,
    /// Pitch adjustment, -10..=10. 0 is unchanged.
    pub pitch: i32,
}

impl Default for Prosody {
    fn default() -> Self {
        Self {
            volume: 100,
            rate: 0,
            pitch: 0,
        }
    }
}

impl Prosody {
    fn is_default(&self) -> bool {
        *self == Self::default()
    }

    fn open_tag(&self) -> String {
        let volume = self.volume.min(100) as i32;
        let rate = self.rate.clamp(-10, 10);
        let pitch = self.pitch.clamp(-10, 10);

        let mut tag = String::from("<prosody");
        if volume != 100 {
            tag.push_str(&format!(" volume='{}%'", volume - 100));
        }
        if rate != 0 {
            // -10..10 maps to -66%..+200%
            let percent = if rate >= 0 { rate * 20 } else { rate * 20 / 3 };
            tag.push_str(&format!(" rate='{percent}%'"));
        }
        if pitch != 0 {
            tag.push_str(&format!(" pitch='{}%'", pitch * 5));
        }
        tag.push('>');
        tag
    }
}

/// Maps character offsets in a built SSML document back to the text
/// fragments it was built from.
///
/// Source offsets count characters of the concatenated text fragments, as
/// they were before escaping. Each anchor pairs an SSML offset with the
/// source offset at that point; anchors are recorded at the start of every
/// fragment and just after every escaped character.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetMap {
    anchors: Vec<(usize, usize)>,
}

impl OffsetMap {
    /// Maps an SSML span to a source span.
    ///
    /// Offsets before the first anchor map as if the first anchor applied;
    /// the result never goes below zero. A span that crosses an anchor takes
    /// its length from the mapped end, so `&amp;` maps back to length 1.
    pub fn map(&self, ssml_offset: usize, len: usize) -> (usize, usize) {
        if self.anchors.is_empty() {
            return (ssml_offset, len);
        }
        let start_index = self.anchor_index(ssml_offset);
        let start = self.map_with(start_index, ssml_offset);
        let end_offset = ssml_offset + len;
        let end_index = self.anchor_index(end_offset);
        if end_index <= start_index {
            return (start, len);
        }
        let end = self.map_with(end_index, end_offset);
        (start, end.saturating_sub(start))
    }

    /// Rewrites the text offset and length of a boundary event.
    pub fn map_boundary(&self, event: BoundaryEvent) -> BoundaryEvent {
        let (text_offset, length) = self.map(event.text_offset, event.length as usize);
        BoundaryEvent {
            text_offset,
            length: u32::try_from(length).unwrap_or(u32::MAX),
            ..event
        }
    }

    fn anchor_index(&self, ssml_offset: usize) -> usize {
        self.anchors
            .partition_point(|&(ssml, _)| ssml <= ssml_offset)
            .saturating_sub(1)
    }

    fn map_with(&self, index: usize, ssml_offset: usize) -> usize {
        let (ssml, source) = self.anchors[index];
        (ssml_offset + source).saturating_sub(ssml)
    }
}

/// Builds an SSML document around plain text fragments.
#[derive(Debug, Clone)]
pub struct SsmlBuilder {
    locale: String,
    voice: Option<String>,
    prosody: Prosody,
    body: String,
    body_chars: usize,
    source_chars: usize,
    anchors: Vec<(usize, usize)>,
}

impl SsmlBuilder {
    /// Starts a document in the given locale, e.g. `en-US`.
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            voice: None,
            prosody: Prosody::default(),
            body: String::new(),
            body_chars: 0,
            source_chars: 0,
            anchors: Vec::new(),
        }
    }

    /// Wraps the content in `<voice name='...'>`.
    pub fn voice(mut self, name: impl Into<String>) -> Self {
        self.voice = Some(name.into());
        self
    }

    /// Applies prosody to the whole document.
    pub fn prosody(mut self, prosody: Prosody) -> Self {
        self.prosody = prosody;
        self
    }

    /// Appends escaped text.
    pub fn text(mut self, text: &str) -> Self {
        self.push_text(text);
        self
    }

    /// Appends text read out character by character.
    pub fn spell_out(mut self, text: &str) -> Self {
        self.push_markup("<say-as interpret-as='characters'>");
        self.push_text(text);
        self.push_markup("</say-as>");
        self
    }

    /// Appends emphasized text.
    pub fn emphasis(mut self, text: &str) -> Self {
        self.push_markup("<emphasis>");
        self.push_text(text);
        self.push_markup("</emphasis>");
        self
    }

    /// Appends a pause.
    pub fn pause(mut self, millis: u32) -> Self {
        self.push_markup(&format!("<break time='{millis}ms'/>"));
        self
    }

    /// Appends a bookmark reported back through the bookmark callback.
    pub fn bookmark(mut self, name: &str) -> Self {
        self.push_markup(&format!("<bookmark mark='{}'/>", xml_escape(name)));
        self
    }

    /// Renders the document.
    pub fn build(&self) -> String {
        self.build_with_offsets().0
    }

    /// Renders the document along with the map from its character offsets
    /// back to the text fragments.
    pub fn build_with_offsets(&self) -> (String, OffsetMap) {
        let mut ssml = format!(
            "<speak version='1.0' xmlns='{SSML_NAMESPACE}' \
             xmlns:mstts='{MSTTS_NAMESPACE}' xml:lang='{}'>",
            xml_escape(&self.locale)
        );
        if let Some(voice) = &self.voice {
            ssml.push_str(&format!("<voice name='{}'>", xml_escape(voice)));
        }
        let with_prosody = !self.prosody.is_default();
        if with_prosody {
            ssml.push_str(&self.prosody.open_tag());
        }

        let body_start = ssml.chars().count();
        let anchors = self
            .anchors
            .iter()
            .map(|&(body, source)| (body_start + body, source))
            .collect();

        ssml.push_str(&self.body);
        if with_prosody {
            ssml.push_str("</prosody>");
        }
        if self.voice.is_some() {
            ssml.push_str("</voice>");
        }
        ssml.push_str("</speak>");
        (ssml, OffsetMap { anchors })
    }

    fn push_markup(&mut self, markup: &str) {
        self.body.push_str(markup);
        self.body_chars += markup.chars().count();
    }

    fn push_text(&mut self, text: &str) {
        self.anchors.push((self.body_chars, self.source_chars));
        for ch in text.chars() {
            let escaped = match ch {
                '<' => "&lt;",
                '>' => "&gt;",
                '&' => "&amp;",
                '"' => "&quot;",
                '\'' => "&apos;",
                _ => {
                    self.body.push(ch);
                    self.body_chars += 1;
                    self.source_chars += 1;
                    continue;
                }
            };
            self.body.push_str(escaped);
            self.body_chars += escaped.len();
            self.source_chars += 1;
            self.anchors.push((self.body_chars, self.source_chars));
        }
    }
}
