//! Meshtastic stream protocol framing
//!
//! Serial and TCP links carry the same framing:
//! - Bytes 0-1: Magic (0x94C3)
//! - Bytes 2-3: Length (big-endian u16)
//! - Bytes 4+: Protobuf payload
//!
//! The device also writes plain-text debug logs on the serial line between
//! frames, so the decoder resynchronizes on the magic.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::config::MESHTASTIC_MAGIC;
use crate::error::{BridgeError, Result};

/// Largest payload the device sends or accepts in one frame
pub const MAX_FRAME_PAYLOAD: usize = 512;

/// Magic + length
const HEADER_SIZE: usize = 4;

const MAGIC_HIGH: u8 = (MESHTASTIC_MAGIC >> 8) as u8;
const MAGIC_LOW: u8 = (MESHTASTIC_MAGIC & 0xFF) as u8;

/// Frame a payload with the stream header
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(BridgeError::MessageTooLarge {
            size: payload.len(),
            max: MAX_FRAME_PAYLOAD,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&MESHTASTIC_MAGIC.to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental decoder for the receive side of a stream
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_FRAME_PAYLOAD * 2),
        }
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Take the next complete payload, if one is buffered
    ///
    /// An oversize length is reported as an error after skipping the bad
    /// magic, so the next call resynchronizes.
    pub fn decode(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let magic = u16::from_be_bytes([self.buffer[0], self.buffer[1]]);

        if magic != MESHTASTIC_MAGIC {
            if let Some(pos) = self.find_magic() {
                trace!(discarded = pos, "Discarding bytes before magic number");
                self.buffer.advance(pos);
            } else {
                // keep a trailing half magic
                let keep = usize::from(self.buffer.last() == Some(&MAGIC_HIGH));
                let discard = self.buffer.len() - keep;
                if discard > 0 {
                    trace!(discarded = discard, "Discarding buffer without magic");
                    self.buffer.advance(discard);
                }
                return Ok(None);
            }

            if self.buffer.len() < HEADER_SIZE {
                return Ok(None);
            }
        }

        let length = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;

        if length > MAX_FRAME_PAYLOAD {
            warn!(length, "Frame length too large, likely corrupt");
            self.buffer.advance(2);
            return Err(BridgeError::InvalidPacket(format!(
                "Frame length {} exceeds maximum",
                length
            )));
        }

        let total_size = HEADER_SIZE + length;
        if self.buffer.len() < total_size {
            trace!(
                have = self.buffer.len(),
                need = total_size,
                "Waiting for complete frame"
            );
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total_size);
        frame.advance(HEADER_SIZE);
        Ok(Some(frame.freeze()))
    }

    fn find_magic(&self) -> Option<usize> {
        self.buffer
            .windows(2)
            .position(|w| w[0] == MAGIC_HIGH && w[1] == MAGIC_LOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame() {
        let framed = encode_frame(b"hello").unwrap();
        assert_eq!(&framed[..2], &[0x94, 0xC3]);
        assert_eq!(u16::from_be_bytes([framed[2], framed[3]]), 5);
        assert_eq!(&framed[4..], b"hello");
    }

    #[test]
    fn test_encode_rejects_oversize() {
        let payload = vec![0u8; MAX_FRAME_PAYLOAD + 1];
        assert!(matches!(
            encode_frame(&payload),
            Err(BridgeError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_parse_complete_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode_frame(b"test").unwrap());

        assert_eq!(decoder.decode().unwrap().unwrap().as_ref(), b"test");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_parse_partial_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x94, 0xC3, 0x00, 0x05, b'a']);

        assert!(decoder.decode().unwrap().is_none());
        assert_eq!(decoder.buffered(), 5);

        decoder.extend(b"bcde");
        assert_eq!(decoder.decode().unwrap().unwrap().as_ref(), b"abcde");
    }

    #[test]
    fn test_skip_debug_text_before_magic() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"INFO  | ??:??:?? 3 [Router] Lora RX\r\n");
        decoder.extend(&encode_frame(b"test").unwrap());

        assert_eq!(decoder.decode().unwrap().unwrap().as_ref(), b"test");
    }

    #[test]
    fn test_keeps_split_magic() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"noise\x94");
        assert!(decoder.decode().unwrap().is_none());
        assert_eq!(decoder.buffered(), 1);

        decoder.extend(&[0xC3, 0x00, 0x01, b'z']);
        assert_eq!(decoder.decode().unwrap().unwrap().as_ref(), b"z");
    }

    #[test]
    fn test_oversize_length_resyncs() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x94, 0xC3, 0xFF, 0xFF]);
        decoder.extend(&encode_frame(b"ok").unwrap());

        assert!(decoder.decode().is_err());
        assert_eq!(decoder.decode().unwrap().unwrap().as_ref(), b"ok");
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = encode_frame(b"one").unwrap();
        bytes.extend(encode_frame(b"two").unwrap());
        decoder.extend(&bytes);

        assert_eq!(decoder.decode().unwrap().unwrap().as_ref(), b"one");
        assert_eq!(decoder.decode().unwrap().unwrap().as_ref(), b"two");
        assert!(decoder.decode().unwrap().is_none());
    }
}
