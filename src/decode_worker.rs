//! The persistent audio decode thread.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::decoder::AudioDecoder;
use crate::error::{panic_message, DecodeError, Error};
use crate::frame::audio_payload;
use crate::queue::{AudioQueue, Work};
use crate::turn::Turn;

/// Starts the decode thread. It runs until the queue is shut down.
pub(crate) fn spawn(
    queue: Arc<AudioQueue>,
    decoder: Box<dyn AudioDecoder>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("tts-audio-decode".to_string())
        .spawn(move || run(&queue, decoder))
}

pub(crate) fn run(queue: &AudioQueue, mut decoder: Box<dyn AudioDecoder>) {
    info!("Audio decode worker started");
    let mut armed_epoch = None;

    loop {
        match queue.next() {
            Work::Stop => break,
            Work::Chunk { chunk, turn, epoch } => {
                if armed_epoch != Some(epoch) {
                    decoder.reset();
                    armed_epoch = Some(epoch);
                }
                let Some(audio) = audio_payload(&chunk.frame) else {
                    warn!(len = chunk.frame.len(), "Dropping binary frame without audio marker");
                    continue;
                };
                debug!(
                    len = audio.len(),
                    queued_for = ?chunk.received_at.elapsed(),
                    "Decoding audio chunk"
                );
                let result = guarded(|| {
                    decoder.decode(audio, &mut |pcm| emit_audio(turn.as_deref(), pcm))
                });
                if let Err(e) = result {
                    decoder.reset();
                    fail_turn(turn.as_deref(), e);
                }
            }
            Work::TurnDone { turn, flush } => {
                if flush && armed_epoch.is_some() {
                    let result = guarded(|| {
                        decoder.finish(&mut |pcm| emit_audio(turn.as_deref(), pcm))
                    });
                    if let Err(e) = result {
                        fail_turn(turn.as_deref(), e);
                    }
                }
                decoder.reset();
                armed_epoch = None;
                if let Some(turn) = turn {
                    if turn.completion().succeed() {
                        info!(turn = turn.id(), "Turn completed");
                    }
                }
            }
        }
    }

    info!("Audio decode worker stopped");
}

/// Runs decoder work, converting panics from the decoder or the audio
/// callback into errors so the thread keeps serving later turns.
fn guarded(f: impl FnOnce() -> Result<(), DecodeError>) -> Result<(), Error> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result.map_err(Error::from),
        Err(payload) => Err(Error::HandlerPanic(panic_message(payload.as_ref()))),
    }
}

fn emit_audio(turn: Option<&Turn>, pcm: &[u8]) {
    if let Some(turn) = turn {
        turn.callbacks().emit_audio(pcm);
    }
}

fn fail_turn(turn: Option<&Turn>, e: Error) {
    error!(error = %e, "Audio decode failed");
    if let Some(turn) = turn {
        turn.completion().fail(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::SynthesisCallbacks;
    use std::sync::{mpsc, Mutex};

    /// Echoes every chunk back as PCM, failing on chunks that start with 0xEE.
    struct EchoDecoder {
        resets: Arc<Mutex<usize>>,
    }

    impl AudioDecoder for EchoDecoder {
        fn decode(
            &mut self,
            chunk: &[u8],
            on_pcm: &mut dyn FnMut(&[u8]),
        ) -> Result<(), DecodeError> {
            if chunk.first() == Some(&0xEE) {
                return Err(DecodeError::new("corrupt"));
            }
            on_pcm(chunk);
            Ok(())
        }

        fn finish(&mut self, _on_pcm: &mut dyn FnMut(&[u8])) -> Result<(), DecodeError> {
            Ok(())
        }

        fn reset(&mut self) {
            *self.resets.lock().unwrap() += 1;
        }
    }

    fn audio_frame(audio: &[u8]) -> Vec<u8> {
        let header = b"X-RequestId:1\r\nPath:audio\r\n";
        let mut frame = (header.len() as u16).to_be_bytes().to_vec();
        frame.extend_from_slice(header);
        frame.extend_from_slice(audio);
        frame
    }

    fn start(queue: &Arc<AudioQueue>) -> (JoinHandle<()>, Arc<Mutex<usize>>) {
        let resets = Arc::new(Mutex::new(0));
        let decoder = Box::new(EchoDecoder {
            resets: Arc::clone(&resets),
        });
        (spawn(Arc::clone(queue), decoder).unwrap(), resets)
    }

    type RecordingTurn = (Arc<Turn>, crate::turn::CompletionHandle, Arc<Mutex<Vec<u8>>>);

    fn recording_turn(id: u64) -> RecordingTurn {
        let pcm = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&pcm);
        let callbacks = SynthesisCallbacks::new()
            .on_audio(move |bytes| sink.lock().unwrap().extend_from_slice(bytes));
        let (turn, handle) = Turn::new(id, Arc::new(callbacks));
        (turn, handle, pcm)
    }

    #[tokio::test]
    async fn test_decodes_in_order_then_completes() {
        let queue = Arc::new(AudioQueue::new());
        let (worker, _) = start(&queue);
        let (turn, handle, pcm) = recording_turn(1);

        queue.begin_turn(turn);
        queue.push(audio_frame(&[1, 2]));
        queue.push(audio_frame(&[3]));
        queue.push(audio_frame(&[4, 5]));
        queue.mark_done();

        assert!(handle.await.is_ok());
        assert_eq!(*pcm.lock().unwrap(), vec![1, 2, 3, 4, 5]);

        queue.shut_down();
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let queue = Arc::new(AudioQueue::new());
        let (worker, _) = start(&queue);
        let (turn, handle, pcm) = recording_turn(1);

        queue.begin_turn(turn);
        queue.push(b"\x00\x05Path:other\r\nxx".to_vec());
        queue.push(audio_frame(&[9]));
        queue.mark_done();

        assert!(handle.await.is_ok());
        assert_eq!(*pcm.lock().unwrap(), vec![9]);

        queue.shut_down();
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn test_decode_failure_fails_turn_and_worker_survives() {
        let queue = Arc::new(AudioQueue::new());
        let (worker, _) = start(&queue);

        let (first, first_handle, _) = recording_turn(1);
        queue.begin_turn(first);
        queue.push(audio_frame(&[0xEE]));
        queue.mark_done();
        assert!(matches!(first_handle.await, Err(Error::Decode(_))));

        let (second, second_handle, pcm) = recording_turn(2);
        queue.begin_turn(second);
        queue.push(audio_frame(&[7]));
        queue.mark_done();
        assert!(second_handle.await.is_ok());
        assert_eq!(*pcm.lock().unwrap(), vec![7]);

        queue.shut_down();
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn test_panicking_callback_fails_turn() {
        let queue = Arc::new(AudioQueue::new());
        let (worker, _) = start(&queue);

        let callbacks = SynthesisCallbacks::new().on_audio(|_| panic!("sink exploded"));
        let (turn, handle) = Turn::new(1, Arc::new(callbacks));
        queue.begin_turn(turn);
        queue.push(audio_frame(&[1]));
        queue.mark_done();

        match handle.await {
            Err(Error::HandlerPanic(msg)) => assert!(msg.contains("sink exploded")),
            other => panic!("unexpected outcome {other:?}"),
        }

        queue.shut_down();
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn test_decoder_reset_between_turns() {
        let queue = Arc::new(AudioQueue::new());
        let (worker, resets) = start(&queue);

        for id in 0..3 {
            let (turn, handle, _) = recording_turn(id);
            queue.begin_turn(turn);
            queue.push(audio_frame(&[1]));
            queue.mark_done();
            handle.await.unwrap();
        }

        queue.shut_down();
        worker.join().unwrap();
        // One reset when each turn's first chunk arrives and one at each turn end.
        assert_eq!(*resets.lock().unwrap(), 6);
    }

    /// Holds the first decode until released, then echoes like `EchoDecoder`.
    struct GatedDecoder {
        gate: Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>,
        decoded: Arc<Mutex<usize>>,
    }

    impl AudioDecoder for GatedDecoder {
        fn decode(
            &mut self,
            chunk: &[u8],
            on_pcm: &mut dyn FnMut(&[u8]),
        ) -> Result<(), DecodeError> {
            if let Some((started, release)) = self.gate.take() {
                started.send(()).unwrap();
                release.recv().unwrap();
            }
            *self.decoded.lock().unwrap() += 1;
            on_pcm(chunk);
            Ok(())
        }

        fn finish(&mut self, on_pcm: &mut dyn FnMut(&[u8])) -> Result<(), DecodeError> {
            on_pcm(&[0xFF]);
            Ok(())
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn test_cancel_during_decode_drops_remaining_chunks() {
        let queue = Arc::new(AudioQueue::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let decoded = Arc::new(Mutex::new(0));
        let decoder = Box::new(GatedDecoder {
            gate: Some((started_tx, release_rx)),
            decoded: Arc::clone(&decoded),
        });
        let worker = spawn(Arc::clone(&queue), decoder).unwrap();

        let (turn, handle, pcm) = recording_turn(1);
        queue.begin_turn(turn);
        queue.push(audio_frame(&[1]));
        queue.push(audio_frame(&[2]));
        queue.push(audio_frame(&[3]));

        started_rx.recv().unwrap();
        queue.cancel();
        release_tx.send(()).unwrap();

        assert!(handle.wait().is_ok());
        // Only the chunk already in the decoder is delivered; no flush.
        assert_eq!(*pcm.lock().unwrap(), vec![1]);
        assert_eq!(*decoded.lock().unwrap(), 1);

        queue.shut_down();
        worker.join().unwrap();
    }
}
