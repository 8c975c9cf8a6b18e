//! Listener side: read the monitor's byte stream, decode and play it

use std::io::{ErrorKind, Read};

use crate::audio::{AudioFormat, PlaybackDevice};
use crate::cancel::SessionToken;
use crate::codec;
use crate::constants::READ_BUFFER_BYTES;
use crate::error::{Error, NetworkError};
use crate::events::{EventSink, StreamEvent};
use crate::volume::VolumeHistory;

/// Why a streaming session ended
#[derive(Debug)]
pub enum SessionEndReason {
    /// The monitor closed the connection
    EndOfStream,
    /// Reading, decoding or playback failed
    Failed(Error),
    /// The session token was invalidated
    Cancelled,
}

/// Result of one [`StreamReceiver::run`]
#[derive(Debug)]
pub struct SessionEnd {
    pub chunks_decoded: u64,
    pub reason: SessionEndReason,
}

impl SessionEnd {
    /// A session that played anything counts as a successful connection
    pub fn delivered_audio(&self) -> bool {
        self.chunks_decoded > 0
    }
}

/// Plays one connection's stream until it ends
pub struct StreamReceiver<'a> {
    playback: &'a dyn PlaybackDevice,
    history: &'a VolumeHistory,
    events: &'a EventSink,
    token: &'a SessionToken,
}

impl<'a> StreamReceiver<'a> {
    pub fn new(
        playback: &'a dyn PlaybackDevice,
        history: &'a VolumeHistory,
        events: &'a EventSink,
        token: &'a SessionToken,
    ) -> Self {
        Self {
            playback,
            history,
            events,
            token,
        }
    }

    /// Stream until end-of-stream, error or cancellation.
    ///
    /// The playback sink is opened first and released on return, as is `stream`.
    pub fn run<R: Read>(&self, mut stream: R) -> SessionEnd {
        let mut chunks_decoded = 0;
        let end = |chunks_decoded, reason| SessionEnd {
            chunks_decoded,
            reason,
        };

        let mut sink = match self.playback.open(AudioFormat::STREAM) {
            Ok(sink) => sink,
            Err(e) => return end(0, SessionEndReason::Failed(e.into())),
        };
        let mut codec = codec::stream_codec();
        let mut buffer = vec![0u8; READ_BUFFER_BYTES];
        let mut pcm = Vec::with_capacity(READ_BUFFER_BYTES);

        loop {
            if !self.token.is_valid() {
                return end(chunks_decoded, SessionEndReason::Cancelled);
            }

            let read = match stream.read(&mut buffer) {
                // An interrupted socket reads as closed
                Ok(0) if !self.token.is_valid() => {
                    return end(chunks_decoded, SessionEndReason::Cancelled);
                }
                Ok(0) => {
                    tracing::debug!("End of stream after {} chunks", chunks_decoded);
                    return end(chunks_decoded, SessionEndReason::EndOfStream);
                }
                Ok(read) => read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) if !self.token.is_valid() => {
                    return end(chunks_decoded, SessionEndReason::Cancelled);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    let reason = SessionEndReason::Failed(NetworkError::Timeout.into());
                    return end(chunks_decoded, reason);
                }
                Err(e) => {
                    let reason = SessionEndReason::Failed(NetworkError::ReceiveFailed(e).into());
                    return end(chunks_decoded, reason);
                }
            };

            let decoded = codec.decode(&buffer[..read], &mut pcm);
            if decoded == 0 {
                continue;
            }

            if let Err(e) = sink.write(&pcm[..decoded]) {
                return end(chunks_decoded, SessionEndReason::Failed(e.into()));
            }
            self.history.append(&pcm[..decoded]);
            chunks_decoded += 1;
            tracing::trace!("Decoded chunk {} ({} samples)", chunks_decoded, decoded);
            self.events.emit(StreamEvent::Update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{PcmSink, RecordingPlayback};
    use crate::cancel::Generation;
    use crate::codec::{AudioCodec, MuLawCodec};
    use crate::error::AudioError;
    use std::io::Cursor;

    struct BrokenPlayback;

    impl PlaybackDevice for BrokenPlayback {
        fn open(&self, _format: AudioFormat) -> Result<Box<dyn PcmSink>, AudioError> {
            Err(AudioError::DeviceNotFound("speaker".into()))
        }
    }

    /// Yields its chunks one read at a time, then fails
    struct ChunkedReader {
        chunks: Vec<Vec<u8>>,
        error: Option<ErrorKind>,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.chunks.is_empty() {
                let chunk = self.chunks.remove(0);
                buf[..chunk.len()].copy_from_slice(&chunk);
                return Ok(chunk.len());
            }
            match self.error {
                Some(kind) => Err(kind.into()),
                None => Ok(0),
            }
        }
    }

    fn encoded(samples: &[i16]) -> Vec<u8> {
        MuLawCodec::new().encode(samples).to_vec()
    }

    #[test]
    fn test_plays_and_records_until_end_of_stream() {
        let playback = RecordingPlayback::new();
        let history = VolumeHistory::new(16);
        let (events, rx) = EventSink::channel(16);
        let token = Generation::new().token();

        let reader = ChunkedReader {
            chunks: vec![encoded(&[1000; 100]), encoded(&[-2000; 50])],
            error: None,
        };
        let end = StreamReceiver::new(&playback, &history, &events, &token).run(reader);

        assert_eq!(end.chunks_decoded, 2);
        assert!(matches!(end.reason, SessionEndReason::EndOfStream));
        assert!(end.delivered_audio());
        assert_eq!(playback.samples().len(), 150);
        assert_eq!(history.len(), 2);
        assert_eq!(rx.try_iter().filter(|e| *e == StreamEvent::Update).count(), 2);
    }

    #[test]
    fn test_playback_open_failure_is_failure_without_chunks() {
        let history = VolumeHistory::new(16);
        let token = Generation::new().token();
        let events = EventSink::disabled();

        let end = StreamReceiver::new(&BrokenPlayback, &history, &events, &token)
            .run(Cursor::new(encoded(&[500; 64])));

        assert_eq!(end.chunks_decoded, 0);
        assert!(matches!(end.reason, SessionEndReason::Failed(Error::Audio(_))));
        assert!(history.is_empty());
    }

    #[test]
    fn test_read_error_after_audio_keeps_chunk_count() {
        let playback = RecordingPlayback::new();
        let history = VolumeHistory::new(16);
        let token = Generation::new().token();
        let events = EventSink::disabled();

        let reader = ChunkedReader {
            chunks: vec![encoded(&[300; 10])],
            error: Some(ErrorKind::ConnectionReset),
        };
        let end = StreamReceiver::new(&playback, &history, &events, &token).run(reader);

        assert_eq!(end.chunks_decoded, 1);
        assert!(matches!(
            end.reason,
            SessionEndReason::Failed(Error::Network(NetworkError::ReceiveFailed(_)))
        ));
    }

    #[test]
    fn test_read_timeout_is_reported() {
        let playback = RecordingPlayback::new();
        let history = VolumeHistory::new(16);
        let token = Generation::new().token();
        let events = EventSink::disabled();

        let reader = ChunkedReader {
            chunks: Vec::new(),
            error: Some(ErrorKind::WouldBlock),
        };
        let end = StreamReceiver::new(&playback, &history, &events, &token).run(reader);
        assert!(matches!(
            end.reason,
            SessionEndReason::Failed(Error::Network(NetworkError::Timeout))
        ));
        assert!(!end.delivered_audio());
    }

    #[test]
    fn test_invalid_token_exits_immediately() {
        let playback = RecordingPlayback::new();
        let history = VolumeHistory::new(16);
        let generation = Generation::new();
        let token = generation.token();
        generation.advance();
        let events = EventSink::disabled();

        let end = StreamReceiver::new(&playback, &history, &events, &token)
            .run(Cursor::new(encoded(&[500; 64])));
        assert_eq!(end.chunks_decoded, 0);
        assert!(matches!(end.reason, SessionEndReason::Cancelled));
        assert!(playback.samples().is_empty());
    }
}
