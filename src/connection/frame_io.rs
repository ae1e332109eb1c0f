// ABOUTME: FrameReader/FrameWriter - the transport-adjacent frame codec (§4.2, §4.3)
// ABOUTME: FrameReader accumulates bytes until Frame::check succeeds; FrameWriter serializes one frame at a time

use bytes::BytesMut;
use tokio::sync::mpsc;

use crate::frame::{Frame, FrameError};
use crate::transport::{TransportReader, TransportWriter};

use super::error::Error;

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        Error::frame(err.to_string())
    }
}

/// Reads exactly one frame per call (§4.3). Buffers partial reads across
/// calls so a frame spanning multiple TCP segments is not lost.
pub struct FrameReader {
    transport: TransportReader,
    buf: BytesMut,
}

const READ_CHUNK: usize = 8 * 1024;

impl FrameReader {
    pub fn new(transport: TransportReader) -> Self {
        Self {
            transport,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    pub async fn read_frame(&mut self) -> Result<Frame, Error> {
        loop {
            {
                let mut cursor = std::io::Cursor::new(&self.buf[..]);
                match Frame::check(&mut cursor) {
                    Ok(()) => {
                        let mut cursor = std::io::Cursor::new(&self.buf[..]);
                        let frame = Frame::parse(&mut cursor)?;
                        let consumed = cursor.position() as usize;
                        let _ = self.buf.split_to(consumed);
                        return Ok(frame);
                    }
                    Err(FrameError::Incomplete) => {}
                    Err(other) => return Err(other.into()),
                }
            }

            let mut chunk = vec![0u8; READ_CHUNK];
            let n = self.transport.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::transport("peer closed the connection"));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Serializes and writes one frame at a time (§4.2). Exclusive access is the
/// caller's responsibility (guarded by a mutex at the supervisor level, per
/// §3's "exactly one writer" invariant); this type has no internal lock.
pub struct FrameWriter {
    transport: TransportWriter,
    sent_hint: Option<mpsc::Sender<()>>,
}

impl FrameWriter {
    pub fn new(transport: TransportWriter) -> Self {
        Self {
            transport,
            sent_hint: None,
        }
    }

    /// Wires up the non-blocking "a frame was just sent" hint consumed by
    /// the Heartbeater (§4.2, §9).
    pub fn with_sent_hint(mut self, sent_hint: mpsc::Sender<()>) -> Self {
        self.sent_hint = Some(sent_hint);
        self
    }

    /// Writes raw bytes with no frame envelope, for the one piece of traffic
    /// that precedes any framed exchange: the protocol header (§6).
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.transport.write_all(bytes).await
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        let mut buf = BytesMut::new();
        frame
            .encode(&mut buf)
            .map_err(|e| Error::frame(e.to_string()))?;
        self.transport.write_all(&buf).await?;
        if let Some(hint) = &self.sent_hint {
            let _ = hint.try_send(());
        }
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), Error> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;
    use crate::transport::{test_loopback_pair, RawStream, ReadDeadline, TimeoutReader, TimeoutWriter};
    use std::time::Duration;

    #[tokio::test]
    async fn reads_a_frame_split_across_two_writes() {
        let (mut server, client) = test_loopback_pair().await;
        let mut encoded = BytesMut::new();
        Frame::Heartbeat.encode(&mut encoded).unwrap();

        let (client_read, _client_write) = tokio::io::split(RawStream::Plain(client));
        let deadline = ReadDeadline::new(Duration::from_secs(1));
        let mut reader = FrameReader::new(TimeoutReader::new(client_read, deadline));

        let first_half = encoded[..4].to_vec();
        let second_half = encoded[4..].to_vec();
        let write_task = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server.write_all(&first_half).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            server.write_all(&second_half).await.unwrap();
        });

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame, Frame::Heartbeat);
        write_task.await.unwrap();
    }

    #[tokio::test]
    async fn writer_notifies_the_sent_hint() {
        let (server, mut client_reader) = test_loopback_pair().await;
        let (_server_read, server_write) = tokio::io::split(RawStream::Plain(server));
        let (hint_tx, mut hint_rx) = mpsc::channel(1);
        let mut writer = FrameWriter::new(TimeoutWriter::new(server_write)).with_sent_hint(hint_tx);

        writer
            .write_frame(&Frame::Method {
                channel_id: 0,
                method: Method::ConnectionOpenOk,
            })
            .await
            .unwrap();

        assert!(hint_rx.try_recv().is_ok());

        let mut buf = [0u8; 9];
        use tokio::io::AsyncReadExt;
        client_reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf[0], 1); // method frame type
    }

    #[tokio::test]
    async fn reader_errors_when_peer_closes_mid_frame() {
        let (server, client) = test_loopback_pair().await;
        drop(server);
        let (client_read, _client_write) = tokio::io::split(RawStream::Plain(client));
        let deadline = ReadDeadline::new(Duration::from_secs(1));
        let mut reader = FrameReader::new(TimeoutReader::new(client_read, deadline));
        assert!(reader.read_frame().await.is_err());
    }
}
