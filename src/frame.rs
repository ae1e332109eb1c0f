// ABOUTME: The AMQP 0-9-1 frame envelope: type | channel | size | payload | frame-end
// ABOUTME: Frame::check/Frame::parse mirror a check-then-consume pass over a shared read buffer

use crate::codec::CodecError;
use crate::method::Method;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::TryFromPrimitive;
use thiserror::Error;

/// Octet that terminates every frame on the wire.
pub const FRAME_END: u8 = 0xCE;

/// The eight bytes a client sends before any framed traffic.
pub const PROTOCOL_HEADER: [u8; 8] = [b'A', b'M', b'Q', b'P', 0, 0, 9, 1];

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum FrameType {
    Method = 1,
    Header = 2,
    Body = 3,
    Heartbeat = 8,
}

/// Failures raised while decoding a frame envelope. These always surface to
/// callers as [`crate::connection::Error`] of kind `frame`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("not enough bytes buffered yet")]
    Incomplete,
    #[error("unknown frame type byte {0:#x}")]
    UnknownFrameType(u8),
    #[error("frame did not end with the 0xCE marker, found {0:#x}")]
    MissingFrameEnd(u8),
    #[error("malformed method payload: {0}")]
    Codec(#[from] CodecError),
}

/// One AMQP 0-9-1 frame. Every kind carries the channel ID it applies to;
/// heartbeats always carry channel 0 (§3).
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Method {
        channel_id: u16,
        method: Method,
    },
    /// Content header. `properties` is the raw property-flags-and-fields
    /// blob: decoding it into per-class fields is the content-field table
    /// codec, out of scope for the connection core.
    Header {
        channel_id: u16,
        class_id: u16,
        body_size: u64,
        properties: Bytes,
    },
    Body {
        channel_id: u16,
        payload: Bytes,
    },
    Heartbeat,
}

impl Frame {
    pub fn channel_id(&self) -> u16 {
        match self {
            Frame::Method { channel_id, .. } => *channel_id,
            Frame::Header { channel_id, .. } => *channel_id,
            Frame::Body { channel_id, .. } => *channel_id,
            Frame::Heartbeat => 0,
        }
    }

    pub fn heartbeat() -> Self {
        Frame::Heartbeat
    }

    /// Checks whether `src` (a cursor over the read buffer) holds a complete
    /// frame without consuming anything. Used by [`crate::connection::FrameReader`]
    /// to decide whether to read more bytes before parsing.
    pub fn check(src: &mut std::io::Cursor<&[u8]>) -> Result<(), FrameError> {
        if src.remaining() < 7 {
            return Err(FrameError::Incomplete);
        }
        let start = src.position();
        let type_byte = src.get_u8();
        FrameType::try_from(type_byte).map_err(|_| FrameError::UnknownFrameType(type_byte))?;
        let _channel = src.get_u16();
        let size = src.get_u32() as usize;
        if src.remaining() < size + 1 {
            src.set_position(start);
            return Err(FrameError::Incomplete);
        }
        src.set_position(start);
        Ok(())
    }

    /// Parses one frame out of `src`, which must already have been validated
    /// by [`Frame::check`]. Advances `src` past the consumed bytes.
    pub fn parse(src: &mut std::io::Cursor<&[u8]>) -> Result<Frame, FrameError> {
        let type_byte = src.get_u8();
        let frame_type =
            FrameType::try_from(type_byte).map_err(|_| FrameError::UnknownFrameType(type_byte))?;
        let channel_id = src.get_u16();
        let size = src.get_u32() as usize;

        let payload_start = src.position() as usize;
        let full = *src.get_ref();
        let payload = &full[payload_start..payload_start + size];
        let mut payload_cursor = payload;

        let frame = match frame_type {
            FrameType::Method => {
                if payload_cursor.remaining() < 4 {
                    return Err(FrameError::Codec(CodecError::UnexpectedEof {
                        context: "method class/method id",
                    }));
                }
                let class_id = payload_cursor.get_u16();
                let method_id = payload_cursor.get_u16();
                let method = Method::decode(class_id, method_id, &mut payload_cursor)?;
                Frame::Method { channel_id, method }
            }
            FrameType::Header => {
                if payload_cursor.remaining() < 12 {
                    return Err(FrameError::Codec(CodecError::UnexpectedEof {
                        context: "content header fixed fields",
                    }));
                }
                let class_id = payload_cursor.get_u16();
                let _weight = payload_cursor.get_u16();
                let body_size = payload_cursor.get_u64();
                let properties = Bytes::copy_from_slice(payload_cursor);
                Frame::Header {
                    channel_id,
                    class_id,
                    body_size,
                    properties,
                }
            }
            FrameType::Body => Frame::Body {
                channel_id,
                payload: Bytes::copy_from_slice(payload_cursor),
            },
            FrameType::Heartbeat => Frame::Heartbeat,
        };

        src.set_position((payload_start + size) as u64);
        let frame_end = src.get_u8();
        if frame_end != FRAME_END {
            return Err(FrameError::MissingFrameEnd(frame_end));
        }
        Ok(frame)
    }

    /// Encodes the full envelope (type, channel, size, payload, frame-end).
    pub fn encode(&self, out: &mut BytesMut) -> Result<(), CodecError> {
        let mut body = BytesMut::new();
        let frame_type = match self {
            Frame::Method { method, .. } => {
                method.encode(&mut body)?;
                FrameType::Method
            }
            Frame::Header {
                class_id,
                body_size,
                properties,
                ..
            } => {
                body.put_u16(*class_id);
                body.put_u16(0); // weight, always zero
                body.put_u64(*body_size);
                body.put_slice(properties);
                FrameType::Header
            }
            Frame::Body { payload, .. } => {
                body.put_slice(payload);
                FrameType::Body
            }
            Frame::Heartbeat => FrameType::Heartbeat,
        };

        out.put_u8(frame_type as u8);
        out.put_u16(self.channel_id());
        out.put_u32(body.len() as u32);
        out.put_slice(&body);
        out.put_u8(FRAME_END);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) -> Frame {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(&buf[..]);
        Frame::check(&mut cursor).unwrap();
        Frame::parse(&mut cursor).unwrap()
    }

    #[test]
    fn heartbeat_roundtrip() {
        assert_eq!(roundtrip(Frame::Heartbeat), Frame::Heartbeat);
    }

    #[test]
    fn heartbeat_wire_shape_is_eight_bytes() {
        let mut buf = BytesMut::new();
        Frame::Heartbeat.encode(&mut buf).unwrap();
        // type(1) + channel(2) + size(4) + frame-end(1), no payload.
        assert_eq!(&buf[..], &[8, 0, 0, 0, 0, 0, 0, 0xCE]);
    }

    #[test]
    fn method_frame_roundtrip() {
        let frame = Frame::Method {
            channel_id: 0,
            method: Method::ConnectionOpenOk,
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn body_frame_roundtrip_on_nonzero_channel() {
        let frame = Frame::Body {
            channel_id: 7,
            payload: Bytes::from_static(b"payload bytes"),
        };
        assert_eq!(roundtrip(frame.clone()), frame);
        assert_eq!(frame.channel_id(), 7);
    }

    #[test]
    fn header_frame_roundtrip_keeps_properties_opaque() {
        let frame = Frame::Header {
            channel_id: 3,
            class_id: 60,
            body_size: 1024,
            properties: Bytes::from_static(&[0x80, 0x00]),
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn check_reports_incomplete_on_partial_frame() {
        let mut buf = BytesMut::new();
        Frame::Heartbeat.encode(&mut buf).unwrap();
        let truncated = &buf[..buf.len() - 1];
        let mut cursor = std::io::Cursor::new(truncated);
        assert_eq!(Frame::check(&mut cursor), Err(FrameError::Incomplete));
    }

    #[test]
    fn parse_rejects_bad_frame_end() {
        let mut buf = BytesMut::new();
        Frame::Heartbeat.encode(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] = 0x00;
        let mut cursor = std::io::Cursor::new(&buf[..]);
        assert_eq!(Frame::check(&mut cursor), Ok(()));
        assert_eq!(
            Frame::parse(&mut cursor),
            Err(FrameError::MissingFrameEnd(0x00))
        );
    }

    #[test]
    fn check_rejects_unknown_frame_type() {
        let buf = [0xFFu8, 0, 0, 0, 0, 0, 0, FRAME_END];
        let mut cursor = std::io::Cursor::new(&buf[..]);
        assert_eq!(
            Frame::check(&mut cursor),
            Err(FrameError::UnknownFrameType(0xFF))
        );
    }
}
