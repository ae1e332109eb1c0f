// ABOUTME: The recognized AMQP 0-9-1 method set, as a tagged discriminator enum
// ABOUTME: rather than the dynamic type matching the original client relied on (see DESIGN.md)

use crate::codec::{
    decode_long_bytes, decode_long_string, decode_short_string, decode_table,
    encode_long_bytes, encode_long_string, encode_short_string, encode_table, CodecError,
};
use crate::table::Table;
use bytes::{Buf, BufMut, BytesMut};

pub const CLASS_CONNECTION: u16 = 10;
pub const CLASS_CHANNEL: u16 = 20;

/// A one-tag-per-method discriminator, used by the RPC multiplexer to match
/// an incoming method against the set of responses a caller is willing to
/// accept without resorting to runtime type identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodTag {
    ConnectionStart,
    ConnectionStartOk,
    ConnectionSecure,
    ConnectionSecureOk,
    ConnectionTune,
    ConnectionTuneOk,
    ConnectionOpen,
    ConnectionOpenOk,
    ConnectionClose,
    ConnectionCloseOk,
    ConnectionBlocked,
    ConnectionUnblocked,
    ChannelClose,
    ChannelCloseOk,
    Opaque(u16, u16),
}

/// A connection- or channel-level method. Every variant the core needs to
/// act on (§6) is a concrete field set; everything else is carried as
/// [`Method::Opaque`] so unrecognized per-channel methods still round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    ConnectionStart {
        version_major: u8,
        version_minor: u8,
        server_properties: Table,
        mechanisms: String,
        locales: String,
    },
    ConnectionStartOk {
        client_properties: Table,
        mechanism: String,
        response: Vec<u8>,
        locale: String,
    },
    ConnectionSecure {
        challenge: Vec<u8>,
    },
    ConnectionSecureOk {
        response: Vec<u8>,
    },
    ConnectionTune {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    ConnectionTuneOk {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    ConnectionOpen {
        vhost: String,
    },
    ConnectionOpenOk,
    ConnectionClose {
        reply_code: u16,
        reply_text: String,
        class_id: u16,
        method_id: u16,
    },
    ConnectionCloseOk,
    ConnectionBlocked {
        reason: String,
    },
    ConnectionUnblocked,
    ChannelClose {
        reply_code: u16,
        reply_text: String,
        class_id: u16,
        method_id: u16,
    },
    ChannelCloseOk,
    /// A method this core does not interpret; per §1 these are "fed to the
    /// core as opaque values with a known identity" and passed to channels.
    Opaque {
        class_id: u16,
        method_id: u16,
        payload: bytes::Bytes,
    },
}

impl Method {
    pub fn tag(&self) -> MethodTag {
        match self {
            Method::ConnectionStart { .. } => MethodTag::ConnectionStart,
            Method::ConnectionStartOk { .. } => MethodTag::ConnectionStartOk,
            Method::ConnectionSecure { .. } => MethodTag::ConnectionSecure,
            Method::ConnectionSecureOk { .. } => MethodTag::ConnectionSecureOk,
            Method::ConnectionTune { .. } => MethodTag::ConnectionTune,
            Method::ConnectionTuneOk { .. } => MethodTag::ConnectionTuneOk,
            Method::ConnectionOpen { .. } => MethodTag::ConnectionOpen,
            Method::ConnectionOpenOk => MethodTag::ConnectionOpenOk,
            Method::ConnectionClose { .. } => MethodTag::ConnectionClose,
            Method::ConnectionCloseOk => MethodTag::ConnectionCloseOk,
            Method::ConnectionBlocked { .. } => MethodTag::ConnectionBlocked,
            Method::ConnectionUnblocked => MethodTag::ConnectionUnblocked,
            Method::ChannelClose { .. } => MethodTag::ChannelClose,
            Method::ChannelCloseOk => MethodTag::ChannelCloseOk,
            Method::Opaque {
                class_id,
                method_id,
                ..
            } => MethodTag::Opaque(*class_id, *method_id),
        }
    }

    pub fn class_id(&self) -> u16 {
        match self {
            Method::Opaque { class_id, .. } => *class_id,
            Method::ChannelClose { .. } | Method::ChannelCloseOk => CLASS_CHANNEL,
            _ => CLASS_CONNECTION,
        }
    }

    pub fn method_id(&self) -> u16 {
        match self {
            Method::ConnectionStart { .. } => 10,
            Method::ConnectionStartOk { .. } => 11,
            Method::ConnectionSecure { .. } => 20,
            Method::ConnectionSecureOk { .. } => 21,
            Method::ConnectionTune { .. } => 30,
            Method::ConnectionTuneOk { .. } => 31,
            Method::ConnectionOpen { .. } => 40,
            Method::ConnectionOpenOk => 41,
            Method::ConnectionClose { .. } => 50,
            Method::ConnectionCloseOk => 51,
            Method::ConnectionBlocked { .. } => 60,
            Method::ConnectionUnblocked => 61,
            Method::ChannelClose { .. } => 40,
            Method::ChannelCloseOk => 41,
            Method::Opaque { method_id, .. } => *method_id,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u16(self.class_id());
        buf.put_u16(self.method_id());
        match self {
            Method::ConnectionStart {
                version_major,
                version_minor,
                server_properties,
                mechanisms,
                locales,
            } => {
                buf.put_u8(*version_major);
                buf.put_u8(*version_minor);
                encode_table(buf, server_properties)?;
                encode_long_string(buf, mechanisms)?;
                encode_long_string(buf, locales)?;
            }
            Method::ConnectionStartOk {
                client_properties,
                mechanism,
                response,
                locale,
            } => {
                encode_table(buf, client_properties)?;
                encode_short_string(buf, mechanism)?;
                encode_long_bytes(buf, response)?;
                encode_short_string(buf, locale)?;
            }
            Method::ConnectionSecure { challenge } => {
                encode_long_bytes(buf, challenge)?;
            }
            Method::ConnectionSecureOk { response } => {
                encode_long_bytes(buf, response)?;
            }
            Method::ConnectionTune {
                channel_max,
                frame_max,
                heartbeat,
            }
            | Method::ConnectionTuneOk {
                channel_max,
                frame_max,
                heartbeat,
            } => {
                buf.put_u16(*channel_max);
                buf.put_u32(*frame_max);
                buf.put_u16(*heartbeat);
            }
            Method::ConnectionOpen { vhost } => {
                encode_short_string(buf, vhost)?;
                encode_short_string(buf, "")?; // reserved-1 (capabilities)
                buf.put_u8(0); // reserved-2 (insist)
            }
            Method::ConnectionOpenOk => {
                encode_short_string(buf, "")?; // reserved-1 (known-hosts)
            }
            Method::ConnectionClose {
                reply_code,
                reply_text,
                class_id,
                method_id,
            }
            | Method::ChannelClose {
                reply_code,
                reply_text,
                class_id,
                method_id,
            } => {
                buf.put_u16(*reply_code);
                encode_short_string(buf, reply_text)?;
                buf.put_u16(*class_id);
                buf.put_u16(*method_id);
            }
            Method::ConnectionCloseOk | Method::ChannelCloseOk => {}
            Method::ConnectionBlocked { reason } => {
                encode_short_string(buf, reason)?;
            }
            Method::ConnectionUnblocked => {}
            Method::Opaque { payload, .. } => {
                buf.put_slice(payload);
            }
        }
        Ok(())
    }

    pub fn decode(class_id: u16, method_id: u16, buf: &mut impl Buf) -> Result<Self, CodecError> {
        Ok(match (class_id, method_id) {
            (CLASS_CONNECTION, 10) => Method::ConnectionStart {
                version_major: {
                    need(buf, 1)?;
                    buf.get_u8()
                },
                version_minor: {
                    need(buf, 1)?;
                    buf.get_u8()
                },
                server_properties: decode_table(buf)?,
                mechanisms: decode_long_string(buf)?,
                locales: decode_long_string(buf)?,
            },
            (CLASS_CONNECTION, 11) => Method::ConnectionStartOk {
                client_properties: decode_table(buf)?,
                mechanism: decode_short_string(buf)?,
                response: decode_long_bytes(buf)?,
                locale: decode_short_string(buf)?,
            },
            (CLASS_CONNECTION, 20) => Method::ConnectionSecure {
                challenge: decode_long_bytes(buf)?,
            },
            (CLASS_CONNECTION, 21) => Method::ConnectionSecureOk {
                response: decode_long_bytes(buf)?,
            },
            (CLASS_CONNECTION, tag @ (30 | 31)) => {
                need(buf, 8)?;
                let channel_max = buf.get_u16();
                let frame_max = buf.get_u32();
                let heartbeat = buf.get_u16();
                if tag == 30 {
                    Method::ConnectionTune {
                        channel_max,
                        frame_max,
                        heartbeat,
                    }
                } else {
                    Method::ConnectionTuneOk {
                        channel_max,
                        frame_max,
                        heartbeat,
                    }
                }
            }
            (CLASS_CONNECTION, 40) => {
                let vhost = decode_short_string(buf)?;
                let _reserved1 = decode_short_string(buf)?;
                need(buf, 1)?;
                let _reserved2 = buf.get_u8();
                Method::ConnectionOpen { vhost }
            }
            (CLASS_CONNECTION, 41) => {
                let _reserved1 = decode_short_string(buf)?;
                Method::ConnectionOpenOk
            }
            (CLASS_CONNECTION, 50) => {
                need(buf, 2)?;
                let reply_code = buf.get_u16();
                let reply_text = decode_short_string(buf)?;
                need(buf, 4)?;
                let class_id = buf.get_u16();
                let method_id = buf.get_u16();
                Method::ConnectionClose {
                    reply_code,
                    reply_text,
                    class_id,
                    method_id,
                }
            }
            (CLASS_CONNECTION, 51) => Method::ConnectionCloseOk,
            (CLASS_CONNECTION, 60) => Method::ConnectionBlocked {
                reason: decode_short_string(buf)?,
            },
            (CLASS_CONNECTION, 61) => Method::ConnectionUnblocked,
            (CLASS_CHANNEL, 40) => {
                need(buf, 2)?;
                let reply_code = buf.get_u16();
                let reply_text = decode_short_string(buf)?;
                need(buf, 4)?;
                let class_id = buf.get_u16();
                let method_id = buf.get_u16();
                Method::ChannelClose {
                    reply_code,
                    reply_text,
                    class_id,
                    method_id,
                }
            }
            (CLASS_CHANNEL, 41) => Method::ChannelCloseOk,
            (class_id, method_id) => {
                let payload = buf.copy_to_bytes(buf.remaining());
                Method::Opaque {
                    class_id,
                    method_id,
                    payload,
                }
            }
        })
    }
}

fn need(buf: &impl Buf, n: usize) -> Result<(), CodecError> {
    if buf.remaining() < n {
        Err(CodecError::UnexpectedEof {
            context: "method fixed field",
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_start_roundtrip() {
        let mut props = Table::new();
        props.insert("product", "RabbitMQ");
        let method = Method::ConnectionStart {
            version_major: 0,
            version_minor: 9,
            server_properties: props,
            mechanisms: "PLAIN AMQPLAIN".into(),
            locales: "en_US".into(),
        };

        let mut buf = BytesMut::new();
        method.encode(&mut buf).unwrap();

        // class-id(10) + method-id(10) header, then the args.
        let mut cursor = &buf[..];
        let class_id = cursor.get_u16();
        let method_id = cursor.get_u16();
        assert_eq!((class_id, method_id), (CLASS_CONNECTION, 10));

        let decoded = Method::decode(class_id, method_id, &mut cursor).unwrap();
        assert_eq!(decoded, method);
        assert_eq!(decoded.tag(), MethodTag::ConnectionStart);
    }

    #[test]
    fn connection_tune_roundtrip() {
        let method = Method::ConnectionTune {
            channel_max: 2047,
            frame_max: 131072,
            heartbeat: 60,
        };
        let mut buf = BytesMut::new();
        method.encode(&mut buf).unwrap();
        let mut cursor = &buf[..];
        let class_id = cursor.get_u16();
        let method_id = cursor.get_u16();
        assert_eq!(Method::decode(class_id, method_id, &mut cursor).unwrap(), method);
    }

    #[test]
    fn connection_close_roundtrip() {
        let method = Method::ConnectionClose {
            reply_code: 320,
            reply_text: "CONNECTION_FORCED".into(),
            class_id: 0,
            method_id: 0,
        };
        let mut buf = BytesMut::new();
        method.encode(&mut buf).unwrap();
        let mut cursor = &buf[..];
        let class_id = cursor.get_u16();
        let method_id = cursor.get_u16();
        assert_eq!(Method::decode(class_id, method_id, &mut cursor).unwrap(), method);
    }

    #[test]
    fn unrecognized_method_is_opaque() {
        let mut buf = BytesMut::new();
        buf.put_u16(50); // class: basic
        buf.put_u16(60); // method: deliver
        buf.put_slice(b"whatever");
        let mut cursor = &buf[4..];
        let decoded = Method::decode(50, 60, &mut cursor).unwrap();
        match decoded {
            Method::Opaque {
                class_id,
                method_id,
                payload,
            } => {
                assert_eq!((class_id, method_id), (50, 60));
                assert_eq!(&payload[..], b"whatever");
            }
            other => panic!("expected Opaque, got {other:?}"),
        }
    }

    #[test]
    fn channel_close_and_close_ok_roundtrip() {
        let close = Method::ChannelClose {
            reply_code: 404,
            reply_text: "NOT_FOUND".into(),
            class_id: 50,
            method_id: 20,
        };
        let mut buf = BytesMut::new();
        close.encode(&mut buf).unwrap();
        let mut cursor = &buf[..];
        assert_eq!(
            Method::decode(cursor.get_u16(), cursor.get_u16(), &mut cursor).unwrap(),
            close
        );

        let mut buf = BytesMut::new();
        Method::ChannelCloseOk.encode(&mut buf).unwrap();
        let mut cursor = &buf[..];
        assert_eq!(
            Method::decode(cursor.get_u16(), cursor.get_u16(), &mut cursor).unwrap(),
            Method::ChannelCloseOk
        );
    }
}
