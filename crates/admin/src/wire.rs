//! OP_MSG framing.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::bson::Document;
use crate::error::{Error, Result};

/// Opcode of OP_MSG.
pub const OP_MSG: i32 = 2013;

/// Largest message the engine will send or accept.
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

/// Standard message header: length, request id, response-to, opcode.
pub const HEADER_SIZE: usize = 16;

/// Flag bit signalling a trailing CRC-32C checksum.
const CHECKSUM_PRESENT: u32 = 1;

const SECTION_BODY: u8 = 0;
const SECTION_DOCUMENT_SEQUENCE: u8 = 1;

/// One OP_MSG message carrying a single body document.
#[derive(Clone, Debug, PartialEq)]
pub struct OpMsg {
    /// Identifier chosen by the sender.
    pub request_id: i32,
    /// Request this message answers, or 0 for requests.
    pub response_to: i32,
    /// Flag bits.
    pub flags: u32,
    /// Kind-0 section.
    pub body: Document,
}

impl OpMsg {
    /// Creates a request message.
    #[must_use]
    pub const fn request(request_id: i32, body: Document) -> Self {
        Self {
            request_id,
            response_to: 0,
            flags: 0,
            body,
        }
    }

    /// Creates a reply to `request_id`.
    #[must_use]
    pub const fn reply(request_id: i32, response_to: i32, body: Document) -> Self {
        Self {
            request_id,
            response_to,
            flags: 0,
            body,
        }
    }
}

/// Codec for OP_MSG messages over a byte stream.
#[derive(Debug)]
pub struct OpMsgCodec {
    max_message_size: usize,
}

impl OpMsgCodec {
    /// Creates a codec with the engine's message size limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Creates a codec with a custom message size limit.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

impl Default for OpMsgCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for OpMsgCodec {
    type Item = OpMsg;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<OpMsg>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut header = &buf[..HEADER_SIZE];
        let message_len = header.get_i32_le();
        let message_len = usize::try_from(message_len)
            .map_err(|_| Error::Protocol(format!("negative message length {message_len}")))?;

        if message_len < HEADER_SIZE + 5 {
            return Err(Error::Protocol(format!(
                "message length {message_len} too small"
            )));
        }

        if message_len > self.max_message_size {
            return Err(Error::Protocol(format!(
                "message length {message_len} exceeds limit {}",
                self.max_message_size
            )));
        }

        if buf.len() < message_len {
            buf.reserve(message_len - buf.len());
            return Ok(None);
        }

        let message = buf.split_to(message_len).freeze();
        let mut cursor = &message[4..];
        let request_id = cursor.get_i32_le();
        let response_to = cursor.get_i32_le();
        let op_code = cursor.get_i32_le();

        if op_code != OP_MSG {
            return Err(Error::Protocol(format!("unexpected opcode {op_code}")));
        }

        let flags = cursor.get_u32_le();
        if flags & CHECKSUM_PRESENT != 0 {
            if cursor.len() < 4 {
                return Err(Error::Protocol("missing checksum".to_string()));
            }
            cursor = &cursor[..cursor.len() - 4];
        }

        let mut body = None;
        while !cursor.is_empty() {
            match cursor.get_u8() {
                SECTION_BODY => {
                    if body.is_some() {
                        return Err(Error::Protocol("more than one body section".to_string()));
                    }
                    body = Some(Document::decode(&mut cursor)?);
                }
                SECTION_DOCUMENT_SEQUENCE => {
                    if cursor.len() < 4 {
                        return Err(Error::Protocol("truncated document sequence".to_string()));
                    }
                    let size = usize::try_from((&cursor[..4]).get_i32_le())
                        .map_err(|_| Error::Protocol("negative sequence size".to_string()))?;
                    if size < 4 || size > cursor.len() {
                        return Err(Error::Protocol(format!("bad sequence size {size}")));
                    }
                    cursor.advance(size);
                }
                kind => {
                    return Err(Error::Protocol(format!("unknown section kind {kind}")));
                }
            }
        }

        let body = body.ok_or_else(|| Error::Protocol("message has no body section".to_string()))?;

        Ok(Some(OpMsg {
            request_id,
            response_to,
            flags,
            body,
        }))
    }
}

impl Encoder<OpMsg> for OpMsgCodec {
    type Error = Error;

    fn encode(&mut self, message: OpMsg, buf: &mut BytesMut) -> Result<()> {
        let start = buf.len();

        buf.put_i32_le(0);
        buf.put_i32_le(message.request_id);
        buf.put_i32_le(message.response_to);
        buf.put_i32_le(OP_MSG);
        // checksums are never generated
        buf.put_u32_le(message.flags & !CHECKSUM_PRESENT);
        buf.put_u8(SECTION_BODY);
        message.body.encode(buf);

        let len = buf.len() - start;
        if len > self.max_message_size {
            buf.truncate(start);
            return Err(Error::Protocol(format!(
                "message length {len} exceeds limit {}",
                self.max_message_size
            )));
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        buf[start..start + 4].copy_from_slice(&(len as i32).to_le_bytes());

        Ok(())
    }
}
