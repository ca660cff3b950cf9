use crate::protocol::{Message, MessageKind, PROTOCOL_VERSION};
use crate::{FRAME_HEADER_SIZE, HERALD_MAGIC, MAX_PAYLOAD_SIZE};
use bytes::{BufMut, Bytes, BytesMut};
use hrd_core::{HeraldError, Result};

/// Fixed 16-byte frame header.
///
/// ```text
/// 0      4        5    6          8              12            16
/// | HRLD | version | tag | reserved | payload_len | payload_crc |
/// ```
/// Integers are little-endian; the CRC covers the payload only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub kind: MessageKind,
    pub payload_length: u32,
    pub payload_crc: u32,
}

impl FrameHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(HeraldError::Protocol(
                "Buffer too small for frame header".into(),
            ));
        }

        if buf[0..4] != HERALD_MAGIC {
            return Err(HeraldError::InvalidMagic);
        }

        let version = buf[4];
        if version != PROTOCOL_VERSION {
            return Err(HeraldError::UnsupportedVersion(version));
        }

        let kind = MessageKind::try_from(buf[5])?;

        let payload_length = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(HeraldError::PayloadTooLarge(payload_length as usize));
        }

        let payload_crc = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);

        Ok(Self {
            version,
            kind,
            payload_length,
            payload_crc,
        })
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(&HERALD_MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.kind as u8);
        buf.put_u16_le(0);
        buf.put_u32_le(self.payload_length);
        buf.put_u32_le(self.payload_crc);
    }

    pub fn validate_payload(&self, payload: &[u8]) -> Result<()> {
        let actual = crc32fast::hash(payload);
        if actual != self.payload_crc {
            return Err(HeraldError::CrcMismatch {
                expected: self.payload_crc,
                actual,
            });
        }
        Ok(())
    }
}

pub fn encode_frame(message: &Message) -> Result<Bytes> {
    let body = message.encode_body()?;
    if body.len() > MAX_PAYLOAD_SIZE {
        return Err(HeraldError::PayloadTooLarge(body.len()));
    }

    let header = FrameHeader {
        version: PROTOCOL_VERSION,
        kind: message.kind(),
        payload_length: body.len() as u32,
        payload_crc: crc32fast::hash(&body),
    };

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    header.encode_into(&mut buf);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Parse one frame from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the message and
/// the number of bytes consumed.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Message, usize)>> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let header = FrameHeader::parse(buf)?;
    let total_len = FRAME_HEADER_SIZE + header.payload_length as usize;

    if buf.len() < total_len {
        return Ok(None);
    }

    let payload = &buf[FRAME_HEADER_SIZE..total_len];
    header.validate_payload(payload)?;
    let message = Message::decode_body(header.kind, payload)?;

    Ok(Some((message, total_len)))
}

/// Decode a datagram that must contain exactly one frame.
pub fn decode_datagram(buf: &[u8]) -> Result<Message> {
    match parse_frame(buf)? {
        Some((message, used)) if used == buf.len() => Ok(message),
        Some((_, used)) => Err(HeraldError::Protocol(format!(
            "Datagram has {} trailing bytes",
            buf.len() - used
        ))),
        None => Err(HeraldError::Protocol("Truncated datagram".into())),
    }
}
