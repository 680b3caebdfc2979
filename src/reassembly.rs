use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use bytes::BytesMut;

use crate::stream::StreamError;
use crate::track::TrackRequest;

/// What to do with a fragment that is not valid base64.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InvalidFragmentPolicy {
    /// Log it and keep streaming. The final audio is shorter by that fragment.
    #[default]
    Drop,
    /// Fail the whole session.
    Abort,
}

impl FromStr for InvalidFragmentPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "drop" => Ok(InvalidFragmentPolicy::Drop),
            "abort" => Ok(InvalidFragmentPolicy::Abort),
            _ => Err(anyhow::anyhow!(
                "Unsupported invalid fragment policy `{}`, expected drop or abort",
                s
            )),
        }
    }
}

impl fmt::Display for InvalidFragmentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidFragmentPolicy::Drop => write!(f, "drop"),
            InvalidFragmentPolicy::Abort => write!(f, "abort"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    Accepted { len: usize },
    Dropped,
}

/// The complete audio payload of one finished stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledAudio {
    pub bytes: Bytes,
    pub source_track: TrackRequest,
}

impl ReassembledAudio {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Collects fragments in arrival order and joins them once the stream ends.
///
/// There are no sequence numbers: the transport's delivery order is the
/// playback order.
#[derive(Debug, Default)]
pub struct Reassembler {
    policy: InvalidFragmentPolicy,
    chunks: Vec<Bytes>,
    buffered: usize,
    received: usize,
    dropped: usize,
}

impl Reassembler {
    pub fn new(policy: InvalidFragmentPolicy) -> Self {
        Reassembler {
            policy,
            ..Default::default()
        }
    }

    pub fn on_fragment(&mut self, raw: &str) -> Result<FragmentOutcome, StreamError> {
        let index = self.received;
        self.received += 1;

        match decode_fragment(raw) {
            Ok(decoded) => {
                let len = decoded.len();
                self.buffered += len;
                self.chunks.push(Bytes::from(decoded));
                tracing::trace!("Fragment {} accepted, {} bytes buffered", index, self.buffered);
                Ok(FragmentOutcome::Accepted { len })
            }
            Err(e) => match self.policy {
                InvalidFragmentPolicy::Drop => {
                    self.dropped += 1;
                    tracing::warn!("Dropping invalid fragment {}: {}", index, e);
                    Ok(FragmentOutcome::Dropped)
                }
                InvalidFragmentPolicy::Abort => {
                    tracing::error!("Invalid fragment {}, aborting stream: {}", index, e);
                    Err(StreamError::InvalidFragment { index })
                }
            },
        }
    }

    /// Joins every accepted fragment and empties the buffer.
    pub fn on_complete(&mut self, track: TrackRequest) -> ReassembledAudio {
        let mut buffer = BytesMut::with_capacity(self.buffered);
        for chunk in self.chunks.drain(..) {
            buffer.extend_from_slice(&chunk);
        }

        tracing::info!(
            "Reassembled {} bytes for {} from {} fragments ({} dropped)",
            buffer.len(),
            track,
            self.received - self.dropped,
            self.dropped
        );
        self.buffered = 0;

        ReassembledAudio {
            bytes: buffer.freeze(),
            source_track: track,
        }
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.buffered = 0;
        self.received = 0;
        self.dropped = 0;
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    pub fn fragment_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped
    }
}

fn decode_fragment(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    if raw.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        BASE64.decode(compact)
    } else {
        BASE64.decode(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(bytes: &[u8]) -> String {
        BASE64.encode(bytes)
    }

    fn track() -> TrackRequest {
        TrackRequest::named("Song A")
    }

    #[test]
    fn concatenates_in_arrival_order() {
        let parts: [&[u8]; 3] = [b"first-", b"second-", b"third"];
        let mut reassembler = Reassembler::default();
        for part in parts {
            reassembler.on_fragment(&encoded(part)).unwrap();
        }

        let audio = reassembler.on_complete(track());
        assert_eq!(audio.bytes, Bytes::from_static(b"first-second-third"));
        assert_eq!(audio.source_track, track());
    }

    #[test]
    fn total_length_is_sum_of_fragments() {
        let mut reassembler = Reassembler::default();
        for len in [100, 200, 150] {
            let outcome = reassembler.on_fragment(&encoded(&vec![7u8; len])).unwrap();
            assert_eq!(outcome, FragmentOutcome::Accepted { len });
        }
        assert_eq!(reassembler.buffered_bytes(), 450);

        let audio = reassembler.on_complete(track());
        assert_eq!(audio.len(), 450);
        assert_eq!(reassembler.buffered_bytes(), 0);
        assert_eq!(reassembler.fragment_count(), 0);
    }

    #[test]
    fn drop_policy_skips_invalid_fragments_silently() {
        let mut reassembler = Reassembler::new(InvalidFragmentPolicy::Drop);
        reassembler.on_fragment(&encoded(&[1; 10])).unwrap();
        assert_eq!(
            reassembler.on_fragment("!!not base64!!").unwrap(),
            FragmentOutcome::Dropped
        );
        reassembler.on_fragment(&encoded(&[2; 20])).unwrap();

        assert_eq!(reassembler.dropped_count(), 1);
        let audio = reassembler.on_complete(track());
        assert_eq!(audio.len(), 30);
        assert_eq!(&audio.bytes[..10], &[1; 10]);
        assert_eq!(&audio.bytes[10..], &[2; 20]);
    }

    #[test]
    fn abort_policy_reports_the_fragment_index() {
        let mut reassembler = Reassembler::new(InvalidFragmentPolicy::Abort);
        reassembler.on_fragment(&encoded(b"ok")).unwrap();
        assert_eq!(
            reassembler.on_fragment("abc"),
            Err(StreamError::InvalidFragment { index: 1 })
        );
    }

    #[test]
    fn ignores_line_breaks_inside_fragments() {
        let mut reassembler = Reassembler::default();
        let mut wrapped = encoded(b"hello world, this is audio");
        wrapped.insert(8, '\n');
        wrapped.insert(4, '\r');

        reassembler.on_fragment(&wrapped).unwrap();
        let audio = reassembler.on_complete(track());
        assert_eq!(audio.bytes, Bytes::from_static(b"hello world, this is audio"));
    }

    #[test]
    fn clear_discards_partial_buffer() {
        let mut reassembler = Reassembler::default();
        reassembler.on_fragment(&encoded(&[0; 64])).unwrap();
        reassembler.clear();

        assert_eq!(reassembler.buffered_bytes(), 0);
        assert!(reassembler.on_complete(track()).is_empty());
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!("drop".parse::<InvalidFragmentPolicy>().unwrap(), InvalidFragmentPolicy::Drop);
        assert_eq!("abort".parse::<InvalidFragmentPolicy>().unwrap(), InvalidFragmentPolicy::Abort);
        assert!("retry".parse::<InvalidFragmentPolicy>().is_err());
    }
}
