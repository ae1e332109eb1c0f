// ABOUTME: Handshake Engine - the open-connection state machine (§4.9)
// ABOUTME: INIT -> AWAIT_START -> PICK_SASL -> (CHALLENGE) -> AWAIT_TUNE -> RUNNING

use tokio::sync::Mutex as AsyncMutex;

use crate::frame::{Frame, PROTOCOL_HEADER};
use crate::method::Method;
use crate::table::Table;

use super::config::{ConnectionConfig, NegotiatedConfig, ServerInfo};
use super::error::Error;
use super::frame_io::{FrameReader, FrameWriter};

const PRODUCT: &str = "amqp-core";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const PLATFORM: &str = "rust";

fn client_properties() -> Table {
    let mut capabilities = Table::new();
    capabilities.insert("connection.blocked", true);

    let mut properties = Table::new();
    properties.insert("product", PRODUCT);
    properties.insert("version", VERSION);
    properties.insert("platform", PLATFORM);
    properties.insert("capabilities", capabilities);
    properties
}

/// Result of a successful handshake: what the negotiation settled on, plus
/// enough server identity for `is_capable` lookups.
pub struct Handshaked {
    pub server: ServerInfo,
    pub negotiated: NegotiatedConfig,
}

/// Drives the client side of the open-connection state machine over an
/// already-connected transport. The writer is shared through the same mutex
/// the Heartbeater writes through once spawned, since `on_tuned` starts it
/// mid-handshake (§4.9 step 5); the reader is exclusive to this task until
/// the caller hands it off to the long-running reader task afterward.
pub async fn run(
    reader: &mut FrameReader,
    writer: &AsyncMutex<FrameWriter>,
    config: &ConnectionConfig,
    on_tuned: impl FnOnce(&NegotiatedConfig),
) -> Result<Handshaked, Error> {
    write_protocol_header(writer).await?;

    let (server, mechanisms) = await_start(reader).await?;

    let mechanism = pick_mechanism(&mechanisms, &config.sasl_mechanisms)?;
    writer
        .lock()
        .await
        .write_frame(&Frame::Method {
            channel_id: 0,
            method: Method::ConnectionStartOk {
                client_properties: client_properties(),
                mechanism: mechanism.name.clone(),
                response: mechanism.response.clone(),
                locale: "en_US".to_string(),
            },
        })
        .await?;

    let tune = await_tune_or_secure(reader, writer).await?;

    let negotiated = NegotiatedConfig::negotiate(config, tune.channel_max, tune.frame_max, tune.heartbeat);

    on_tuned(&negotiated);

    writer
        .lock()
        .await
        .write_frame(&Frame::Method {
            channel_id: 0,
            method: Method::ConnectionTuneOk {
                channel_max: negotiated.channel_max,
                frame_max: negotiated.frame_max,
                heartbeat: negotiated.heartbeat.as_secs() as u16,
            },
        })
        .await?;

    writer
        .lock()
        .await
        .write_frame(&Frame::Method {
            channel_id: 0,
            method: Method::ConnectionOpen {
                vhost: config.vhost.clone(),
            },
        })
        .await?;

    await_open_ok(reader).await?;

    Ok(Handshaked { server, negotiated })
}

async fn write_protocol_header(writer: &AsyncMutex<FrameWriter>) -> Result<(), Error> {
    writer.lock().await.write_raw(&PROTOCOL_HEADER).await
}

async fn await_start(reader: &mut FrameReader) -> Result<(ServerInfo, String), Error> {
    match reader.read_frame().await? {
        Frame::Method {
            method:
                Method::ConnectionStart {
                    version_major,
                    version_minor,
                    server_properties,
                    mechanisms,
                    ..
                },
            ..
        } => Ok((
            ServerInfo {
                major: version_major,
                minor: version_minor,
                properties: server_properties,
            },
            mechanisms,
        )),
        other => Err(Error::protocol(format!(
            "expected connection.start, got {other:?}"
        ))),
    }
}

fn pick_mechanism<'a>(
    server_list: &str,
    client_mechanisms: &'a [super::config::SaslMechanism],
) -> Result<&'a super::config::SaslMechanism, Error> {
    let offered: Vec<&str> = server_list.split_whitespace().collect();
    client_mechanisms
        .iter()
        .find(|m| offered.contains(&m.name.as_str()))
        .ok_or_else(|| Error::sasl(format!("no mutually supported mechanism in {server_list:?}")))
}

struct TuneProposal {
    channel_max: u16,
    frame_max: u32,
    heartbeat: u16,
}

async fn await_tune_or_secure(reader: &mut FrameReader, writer: &AsyncMutex<FrameWriter>) -> Result<TuneProposal, Error> {
    loop {
        match reader.read_frame().await {
            Ok(Frame::Method {
                method:
                    Method::ConnectionTune {
                        channel_max,
                        frame_max,
                        heartbeat,
                    },
                ..
            }) => {
                return Ok(TuneProposal {
                    channel_max,
                    frame_max,
                    heartbeat,
                })
            }
            Ok(Frame::Method {
                method: Method::ConnectionSecure { .. },
                ..
            }) => {
                // Challenge/response SASL mechanisms (e.g. AMQPLAIN with a
                // server round-trip) are out of scope for this core (§1);
                // the common case of a single-round mechanism never reaches
                // here, so a bare secure-ok with an empty response keeps the
                // state machine moving for mechanisms that do send one.
                writer
                    .lock()
                    .await
                    .write_frame(&Frame::Method {
                        channel_id: 0,
                        method: Method::ConnectionSecureOk { response: Vec::new() },
                    })
                    .await?;
            }
            Ok(other) => {
                return Err(Error::protocol(format!(
                    "expected connection.tune or connection.secure, got {other:?}"
                )))
            }
            Err(_) => {
                // The broker signals auth failure by closing the socket
                // rather than sending a protocol close (§4.9 step 7).
                return Err(Error::credentials("connection closed before tune"));
            }
        }
    }
}

async fn await_open_ok(reader: &mut FrameReader) -> Result<(), Error> {
    match reader.read_frame().await {
        Ok(Frame::Method {
            method: Method::ConnectionOpenOk,
            ..
        }) => Ok(()),
        Ok(other) => Err(Error::vhost(format!("expected connection.open-ok, got {other:?}"))),
        Err(_) => Err(Error::vhost("connection closed before open-ok")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::config::SaslMechanism;

    #[test]
    fn picks_the_first_client_mechanism_the_server_also_offers() {
        let client = vec![SaslMechanism::plain("guest", "guest")];
        let picked = pick_mechanism("AMQPLAIN PLAIN", &client).unwrap();
        assert_eq!(picked.name, "PLAIN");
    }

    #[test]
    fn fails_with_sasl_when_nothing_matches() {
        let client = vec![SaslMechanism::plain("guest", "guest")];
        let err = pick_mechanism("EXTERNAL", &client).unwrap_err();
        assert_eq!(err.kind, super::super::error::ErrorKind::Sasl);
    }

    #[test]
    fn protocol_header_is_the_eight_byte_amqp_preamble() {
        assert_eq!(&PROTOCOL_HEADER, b"AMQP\x00\x00\x09\x01");
    }

    #[tokio::test]
    async fn full_handshake_happy_path_against_a_scripted_server() {
        use crate::transport::{test_loopback_pair, RawStream, ReadDeadline, TimeoutReader, TimeoutWriter};
        use tokio::io::AsyncReadExt;
        use std::time::Duration;

        let (server, client) = test_loopback_pair().await;
        let (mut server_read, server_write) = tokio::io::split(RawStream::Plain(server));
        let (client_read, client_write) = tokio::io::split(RawStream::Plain(client));

        let client_deadline = ReadDeadline::new(Duration::from_secs(1));
        let mut client_reader = FrameReader::new(TimeoutReader::new(client_read, client_deadline));
        let client_writer = AsyncMutex::new(FrameWriter::new(TimeoutWriter::new(client_write)));

        let server_task = tokio::spawn(async move {
            let mut header = [0u8; 8];
            server_read.read_exact(&mut header).await.unwrap();
            assert_eq!(&header, b"AMQP\x00\x00\x09\x01");

            let server_deadline = ReadDeadline::new(Duration::from_secs(1));
            let mut server_reader = FrameReader::new(TimeoutReader::new(server_read, server_deadline));
            let mut server_writer = FrameWriter::new(TimeoutWriter::new(server_write));

            let mut server_properties = Table::new();
            server_properties.insert("product", "amqp-core-test-broker");
            server_writer
                .write_frame(&Frame::Method {
                    channel_id: 0,
                    method: Method::ConnectionStart {
                        version_major: 0,
                        version_minor: 9,
                        server_properties,
                        mechanisms: "PLAIN".to_string(),
                        locales: "en_US".to_string(),
                    },
                })
                .await
                .unwrap();

            match server_reader.read_frame().await.unwrap() {
                Frame::Method {
                    method: Method::ConnectionStartOk { mechanism, .. },
                    ..
                } => assert_eq!(mechanism, "PLAIN"),
                other => panic!("expected start-ok, got {other:?}"),
            }

            server_writer
                .write_frame(&Frame::Method {
                    channel_id: 0,
                    method: Method::ConnectionTune {
                        channel_max: 2047,
                        frame_max: 131072,
                        heartbeat: 60,
                    },
                })
                .await
                .unwrap();

            match server_reader.read_frame().await.unwrap() {
                Frame::Method {
                    method: Method::ConnectionTuneOk { channel_max, .. },
                    ..
                } => assert_eq!(channel_max, 2047),
                other => panic!("expected tune-ok, got {other:?}"),
            }

            match server_reader.read_frame().await.unwrap() {
                Frame::Method {
                    method: Method::ConnectionOpen { vhost },
                    ..
                } => assert_eq!(vhost, "/"),
                other => panic!("expected open, got {other:?}"),
            }

            server_writer
                .write_frame(&Frame::Method {
                    channel_id: 0,
                    method: Method::ConnectionOpenOk,
                })
                .await
                .unwrap();
        });

        let config = ConnectionConfig::default();
        let mut heartbeat_started_before_tune_ok = false;
        let handshaked = run(&mut client_reader, &client_writer, &config, |negotiated| {
            heartbeat_started_before_tune_ok = negotiated.heartbeat == Duration::from_secs(10);
        })
        .await
        .unwrap();

        assert!(heartbeat_started_before_tune_ok);
        assert_eq!(handshaked.negotiated.channel_max, 2047);
        assert_eq!(handshaked.server.major, 0);
        server_task.await.unwrap();
    }
}
