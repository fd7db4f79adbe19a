//! RFC 6455 frame codec, client side.
//!
//! Encoding always produces a single FIN frame with the mask bit set and a
//! fresh 32-bit masking key — the client-side requirement. Decoding accepts
//! both masked and unmasked frames so the same [`FrameDecoder`] can parse
//! server frames in the agent and client frames in the test harness.

/// Frames larger than this are rejected as a protocol violation.
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

/// WebSocket opcodes the agent deals with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    /// Whether the wire frame carried a masking key (true for client
    /// frames; the payload below is already unmasked).
    pub masked: bool,
    pub payload: Vec<u8>,
}

/// Decode errors. All of them terminate the connection.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("reserved opcode 0x{0:x}")]
    BadOpcode(u8),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    Oversized(u64),
}

/// Encode a masked client frame: FIN set, the given opcode, payload-length
/// encoding per RFC 6455 (7-bit / 7+16-bit / 7+64-bit), 32-bit masking key,
/// payload XORed with the key.
pub fn encode_frame(opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 14);
    frame.push(0x80 | opcode.bits());

    if len <= 125 {
        frame.push(0x80 | len as u8);
    } else if len <= 65535 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    frame.extend_from_slice(&mask);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    frame
}

/// Incremental frame decoder. Bytes are appended with [`FrameDecoder::feed`];
/// [`FrameDecoder::next_frame`] yields complete frames as they become
/// available and leaves partial frames buffered.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, or `Ok(None)` when more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }

        let fin = self.buf[0] & 0x80 != 0;
        let opcode_bits = self.buf[0] & 0x0F;
        let Some(opcode) = Opcode::from_bits(opcode_bits) else {
            return Err(FrameError::BadOpcode(opcode_bits));
        };

        let masked = self.buf[1] & 0x80 != 0;
        let len7 = u64::from(self.buf[1] & 0x7F);

        let (payload_len, mut header_len) = match len7 {
            126 => {
                if self.buf.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([self.buf[2], self.buf[3]])), 4)
            }
            127 => {
                if self.buf.len() < 10 {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&self.buf[2..10]);
                (u64::from_be_bytes(bytes), 10)
            }
            n => (n, 2),
        };

        if payload_len > MAX_FRAME_LEN {
            return Err(FrameError::Oversized(payload_len));
        }

        let mask_offset = header_len;
        if masked {
            header_len += 4;
        }

        let total = header_len + payload_len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let mut payload = self.buf[header_len..total].to_vec();
        if masked {
            let mask: [u8; 4] = self.buf[mask_offset..mask_offset + 4]
                .try_into()
                .expect("4 mask bytes");
            for (i, b) in payload.iter_mut().enumerate() {
                *b ^= mask[i % 4];
            }
        }

        self.buf.drain(..total);
        Ok(Some(Frame {
            fin,
            opcode,
            masked,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(payload: &[u8]) -> Frame {
        let encoded = encode_frame(Opcode::Text, payload, [0x12, 0x34, 0x56, 0x78]);
        // Mask bit must be set on every outgoing frame
        assert_eq!(encoded[1] & 0x80, 0x80);
        // FIN set, text opcode
        assert_eq!(encoded[0], 0x81);
        let mut dec = FrameDecoder::new();
        dec.feed(&encoded);
        let frame = dec.next_frame().unwrap().expect("complete frame");
        assert!(dec.next_frame().unwrap().is_none());
        frame
    }

    #[test]
    fn round_trip_small_payload() {
        let frame = round_trip(b"hello");
        assert!(frame.fin);
        assert!(frame.masked);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn round_trip_length_boundaries() {
        // 125 = last 7-bit length, 126 = first 16-bit, 65535 = last 16-bit,
        // 65536 = first 64-bit
        for len in [125usize, 126, 65535, 65536] {
            let payload = vec![0xABu8; len];
            let encoded = encode_frame(Opcode::Text, &payload, [1, 2, 3, 4]);
            match len {
                0..=125 => assert_eq!(encoded[1] & 0x7F, len as u8),
                126..=65535 => {
                    assert_eq!(encoded[1] & 0x7F, 126);
                    assert_eq!(
                        u16::from_be_bytes([encoded[2], encoded[3]]) as usize,
                        len
                    );
                }
                _ => assert_eq!(encoded[1] & 0x7F, 127),
            }
            let frame = round_trip(&payload);
            assert_eq!(frame.payload.len(), len, "payload length {len}");
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn mask_is_applied_on_the_wire() {
        let mask = [0xFF, 0x00, 0xFF, 0x00];
        let encoded = encode_frame(Opcode::Text, b"abcd", mask);
        // header(2) + mask(4), then payload XOR mask
        assert_eq!(&encoded[2..6], &mask);
        assert_eq!(encoded[6], b'a' ^ 0xFF);
        assert_eq!(encoded[7], b'b');
        assert_eq!(encoded[8], b'c' ^ 0xFF);
        assert_eq!(encoded[9], b'd');
    }

    #[test]
    fn decoder_accumulates_partial_frames() {
        let encoded = encode_frame(Opcode::Text, b"split across reads", [9, 9, 9, 9]);
        let mut dec = FrameDecoder::new();
        for chunk in encoded.chunks(3) {
            dec.feed(chunk);
        }
        let frame = dec.next_frame().unwrap().expect("complete after all chunks");
        assert_eq!(frame.payload, b"split across reads");
    }

    #[test]
    fn decoder_handles_unmasked_server_frames() {
        // Server frames carry no mask: header + raw payload
        let mut raw = vec![0x81, 5];
        raw.extend_from_slice(b"hello");
        let mut dec = FrameDecoder::new();
        dec.feed(&raw);
        let frame = dec.next_frame().unwrap().unwrap();
        assert!(!frame.masked);
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn decoder_yields_multiple_frames_from_one_read() {
        let mut raw = vec![0x81, 1, b'a'];
        raw.extend_from_slice(&[0x89, 1, b'p']); // ping with 1-byte payload
        let mut dec = FrameDecoder::new();
        dec.feed(&raw);
        let first = dec.next_frame().unwrap().unwrap();
        assert_eq!(first.opcode, Opcode::Text);
        let second = dec.next_frame().unwrap().unwrap();
        assert_eq!(second.opcode, Opcode::Ping);
        assert_eq!(second.payload, b"p");
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut raw = vec![0x81, 127];
        raw.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut dec = FrameDecoder::new();
        dec.feed(&raw);
        assert_eq!(
            dec.next_frame(),
            Err(FrameError::Oversized(MAX_FRAME_LEN + 1))
        );
    }

    #[test]
    fn reserved_opcode_is_rejected() {
        let mut dec = FrameDecoder::new();
        dec.feed(&[0x83, 0]);
        assert_eq!(dec.next_frame(), Err(FrameError::BadOpcode(0x3)));
    }
}
