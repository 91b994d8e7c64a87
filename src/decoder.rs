//! Audio decoders that turn the compressed substream into PCM.

use std::collections::VecDeque;

use minimp3::{Decoder, Frame};

use crate::error::DecodeError;

/// A streaming decoder fed chunk by chunk on the decode thread.
///
/// One instance serves every turn; `reset` is called between turns so no
/// state leaks from one turn into the next.
pub trait AudioDecoder: Send {
    /// Decodes a chunk, handing each block of PCM to `on_pcm`.
    fn decode(&mut self, chunk: &[u8], on_pcm: &mut dyn FnMut(&[u8])) -> Result<(), DecodeError>;

    /// Emits whatever is still buffered at the end of a turn.
    fn finish(&mut self, on_pcm: &mut dyn FnMut(&[u8])) -> Result<(), DecodeError>;

    /// Drops buffered input and decoder state.
    fn reset(&mut self);
}

/// MP3 decoder producing 16-bit little-endian mono PCM.
pub struct Mp3Decoder {
    inner: Decoder<VecDeque<u8>>,
}

impl Mp3Decoder {
    pub fn new() -> Self {
        Self {
            inner: Decoder::new(VecDeque::new()),
        }
    }

    fn drain_frames(&mut self, on_pcm: &mut dyn FnMut(&[u8])) -> Result<(), DecodeError> {
        loop {
            match self.inner.next_frame() {
                Ok(Frame { data, channels, .. }) => {
                    let pcm = to_mono_le_bytes(&data, channels);
                    if !pcm.is_empty() {
                        on_pcm(&pcm);
                    }
                }
                // Out of input for now; the rest of the frame comes with the next chunk.
                Err(minimp3::Error::Eof) | Err(minimp3::Error::InsufficientData) => return Ok(()),
                Err(minimp3::Error::SkippedData) => continue,
                Err(e) => return Err(DecodeError::new(format!("mp3: {e:?}"))),
            }
        }
    }
}

impl Default for Mp3Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDecoder for Mp3Decoder {
    fn decode(&mut self, chunk: &[u8], on_pcm: &mut dyn FnMut(&[u8])) -> Result<(), DecodeError> {
        self.inner.reader_mut().extend(chunk.iter().copied());
        self.drain_frames(on_pcm)
    }

    fn finish(&mut self, on_pcm: &mut dyn FnMut(&[u8])) -> Result<(), DecodeError> {
        self.drain_frames(on_pcm)
    }

    fn reset(&mut self) {
        self.inner = Decoder::new(VecDeque::new());
    }
}

/// Down-mixes interleaved samples to mono and packs them little-endian.
fn to_mono_le_bytes(samples: &[i16], channels: usize) -> Vec<u8> {
    if channels <= 1 {
        return samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    }
    samples
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_passthrough() {
        assert_eq!(to_mono_le_bytes(&[1, -1], 1), vec![1, 0, 0xff, 0xff]);
    }

    #[test]
    fn test_stereo_downmix() {
        assert_eq!(to_mono_le_bytes(&[100, 300, -10, -30], 2), vec![200, 0, 0xec, 0xff]);
    }

    #[test]
    fn test_garbage_produces_no_pcm() {
        let mut decoder = Mp3Decoder::new();
        let mut emitted = 0;
        let result = decoder.decode(&[0u8; 64], &mut |pcm| emitted += pcm.len());
        assert!(result.is_ok());
        assert_eq!(emitted, 0);

        decoder.reset();
        assert!(decoder.finish(&mut |pcm| emitted += pcm.len()).is_ok());
        assert_eq!(emitted, 0);
    }
}
