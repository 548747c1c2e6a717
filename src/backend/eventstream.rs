//! Decoder for the `application/vnd.amazon.eventstream` binary framing used by
//! Bedrock's streaming endpoints.
//!
//! Each message is laid out as:
//!
//! ```text
//! [total_len: u32][headers_len: u32][prelude_crc: u32][headers][payload][message_crc: u32]
//! ```
//!
//! All integers are big-endian. Frames may arrive split across any number of
//! HTTP body chunks, so the decoder buffers until a whole frame is available.
//! Checksums are not verified; the transport is TLS and lengths are validated.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{ProxyError, Result};

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + CRC_LEN;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Bytes),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Bytes,
}

impl Frame {
    /// Value of a string-typed header.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(n, v)| match v {
            HeaderValue::String(s) if n == name => Some(s.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Whether any bytes of an incomplete frame are buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Decode the next complete frame, or `None` if more bytes are needed.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_len = read_u32(&self.buffer[0..4]) as usize;
        let headers_len = read_u32(&self.buffer[4..8]) as usize;

        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len) {
            return Err(ProxyError::stream(format!(
                "invalid event-stream frame length {total_len}"
            )));
        }
        if headers_len > total_len - MIN_FRAME_LEN {
            return Err(ProxyError::stream(format!(
                "event-stream headers length {headers_len} exceeds frame length {total_len}"
            )));
        }
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total_len).freeze();
        frame.advance(PRELUDE_LEN);
        let mut headers_buf = frame.split_to(headers_len);
        let payload = frame.split_to(total_len - MIN_FRAME_LEN - headers_len);

        let headers = decode_headers(&mut headers_buf)?;
        Ok(Some(Frame { headers, payload }))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn decode_headers(buf: &mut Bytes) -> Result<Vec<(String, HeaderValue)>> {
    let mut headers = Vec::new();

    while buf.has_remaining() {
        let name_len = usize::from(buf.get_u8());
        let name = take_utf8(buf, name_len, "header name")?;
        ensure(buf, 1, "header type")?;
        let value = match buf.get_u8() {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                ensure(buf, 1, &name)?;
                HeaderValue::Byte(buf.get_i8())
            }
            3 => {
                ensure(buf, 2, &name)?;
                HeaderValue::Short(buf.get_i16())
            }
            4 => {
                ensure(buf, 4, &name)?;
                HeaderValue::Int(buf.get_i32())
            }
            5 => {
                ensure(buf, 8, &name)?;
                HeaderValue::Long(buf.get_i64())
            }
            6 => {
                let len = take_len(buf, &name)?;
                ensure(buf, len, &name)?;
                HeaderValue::Bytes(buf.split_to(len))
            }
            7 => {
                let len = take_len(buf, &name)?;
                HeaderValue::String(take_utf8(buf, len, &name)?)
            }
            8 => {
                ensure(buf, 8, &name)?;
                HeaderValue::Timestamp(buf.get_i64())
            }
            9 => {
                ensure(buf, 16, &name)?;
                let mut uuid = [0u8; 16];
                buf.copy_to_slice(&mut uuid);
                HeaderValue::Uuid(uuid)
            }
            other => {
                return Err(ProxyError::stream(format!(
                    "unknown event-stream header type {other} for '{name}'"
                )))
            }
        };
        headers.push((name, value));
    }

    Ok(headers)
}

fn ensure(buf: &Bytes, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(ProxyError::stream(format!(
            "truncated event-stream header '{what}'"
        )));
    }
    Ok(())
}

fn take_len(buf: &mut Bytes, what: &str) -> Result<usize> {
    ensure(buf, 2, what)?;
    Ok(usize::from(buf.get_u16()))
}

fn take_utf8(buf: &mut Bytes, len: usize, what: &str) -> Result<String> {
    ensure(buf, len, what)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| ProxyError::stream(format!("event-stream {what} is not valid UTF-8")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use bytes::{BufMut, BytesMut};

    /// Encode a frame with string headers. Checksums are written as zero.
    pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
        let mut header_bytes = BytesMut::new();
        for (name, value) in headers {
            header_bytes.put_u8(name.len() as u8);
            header_bytes.put_slice(name.as_bytes());
            header_bytes.put_u8(7);
            header_bytes.put_u16(value.len() as u16);
            header_bytes.put_slice(value.as_bytes());
        }

        let total = 16 + header_bytes.len() + payload.len();
        let mut out = BytesMut::with_capacity(total);
        out.put_u32(total as u32);
        out.put_u32(header_bytes.len() as u32);
        out.put_u32(0);
        out.put_slice(&header_bytes);
        out.put_slice(payload);
        out.put_u32(0);
        out.to_vec()
    }

    pub fn event_frame(event_type: &str, payload: &str) -> Vec<u8> {
        encode_frame(
            &[
                (":event-type", event_type),
                (":content-type", "application/json"),
                (":message-type", "event"),
            ],
            payload.as_bytes(),
        )
    }
}
