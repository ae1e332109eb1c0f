// ABOUTME: Connection - the public supervisor tying transport, handshake, and the reader/heartbeat tasks together (§4.10)
// ABOUTME: Shutdown runs behind a one-shot barrier so duplicate signals (reader error + caller close) are no-ops

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

use crate::frame::Frame;
use crate::method::{Method, MethodTag};
use crate::table::Value;
use crate::transport::{ReadDeadline, TransportReader, TransportWriter};

use super::channel::ChannelHandle;
use super::config::ConnectionConfig;
use super::dispatcher::{CloseAndShutdown, DispatchResult, Dispatcher};
use super::error::Error;
use super::frame_io::{FrameReader, FrameWriter};
use super::handshake;
use super::heartbeat::Heartbeater;
use super::notify::{Blocking, NotificationHub};
use super::registry::ChannelRegistry;
use super::rpc::RPCMux;

struct Inner {
    registry: Arc<ChannelRegistry>,
    notify: Arc<NotificationHub>,
    rpc: Arc<RPCMux>,
    writer: Arc<AsyncMutex<FrameWriter>>,
    server_properties: crate::table::Table,
    shutdown_once: std::sync::Mutex<bool>,
    shutdown_signal: watch::Sender<bool>,
}

impl Inner {
    async fn shutdown(self: &Arc<Self>, err: Option<Error>) {
        {
            let mut guard = self.shutdown_once.lock().unwrap();
            if *guard {
                return;
            }
            *guard = true;
        }

        tracing::info!(error = ?err, "connection shutting down");
        self.notify.shutdown(err.clone());
        for handle in self.registry.remove_all() {
            handle.shutdown(err.clone());
        }
        if let Some(e) = err {
            self.rpc.fail_all(e);
        }
        let _ = self.shutdown_signal.send(true);

        let mut writer = self.writer.lock().await;
        let _ = writer.close().await;
    }
}

/// The connection core. Cloning shares the same underlying state (reader
/// task, writer, registry); it is cheap and intended for handing a reference
/// to channel factories during [`Connection::open_channel`].
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Drives the handshake to completion over an already-connected
    /// transport, then spawns the reader and (if enabled) heartbeat tasks.
    pub async fn open(
        reader: TransportReader,
        writer: TransportWriter,
        read_deadline: Arc<ReadDeadline>,
        config: ConnectionConfig,
    ) -> Result<Self, Error> {
        let mut frame_reader = FrameReader::new(reader);
        let (sent_tx, sent_rx) = mpsc::channel(1);
        let frame_writer = FrameWriter::new(writer).with_sent_hint(sent_tx);
        let writer = Arc::new(AsyncMutex::new(frame_writer));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut sent_rx = Some(sent_rx);
        let mut shutdown_rx = Some(shutdown_rx);
        let heartbeat_writer = writer.clone();
        let heartbeat_deadline = read_deadline.clone();

        let handshaked = handshake::run(&mut frame_reader, &writer, &config, move |negotiated| {
            if !negotiated.heartbeat.is_zero() {
                spawn_heartbeat(
                    heartbeat_writer,
                    negotiated.heartbeat,
                    heartbeat_deadline,
                    sent_rx.take().expect("on_tuned is only ever invoked once"),
                    shutdown_rx.take().expect("on_tuned is only ever invoked once"),
                );
            }
        })
        .await?;
        tracing::info!(
            major = handshaked.server.major,
            minor = handshaked.server.minor,
            channel_max = handshaked.negotiated.channel_max,
            heartbeat = handshaked.negotiated.heartbeat.as_secs(),
            "handshake complete"
        );

        let registry = Arc::new(ChannelRegistry::new(config.max_channels));
        let notify = Arc::new(NotificationHub::new());
        let rpc = Arc::new(RPCMux::new());

        let inner = Arc::new(Inner {
            registry: registry.clone(),
            notify: notify.clone(),
            rpc: rpc.clone(),
            writer,
            server_properties: handshaked.server.properties,
            shutdown_once: std::sync::Mutex::new(false),
            shutdown_signal: shutdown_tx,
        });

        let heartbeat_interval = handshaked.negotiated.heartbeat;
        let dispatcher = Dispatcher::new(registry, notify, rpc);
        spawn_reader(inner.clone(), frame_reader, dispatcher, read_deadline, heartbeat_interval);

        Ok(Connection { inner })
    }

    /// Allocates a channel ID, hands it (and a clone of this connection) to
    /// `factory` to run the channel's own open protocol, then registers the
    /// resulting handle. The channel's internals are opaque to the core (§3).
    pub async fn open_channel<F, Fut>(&self, factory: F) -> Result<Arc<dyn ChannelHandle>, Error>
    where
        F: FnOnce(u16, Connection) -> Fut,
        Fut: Future<Output = Result<Arc<dyn ChannelHandle>, Error>>,
    {
        let id = self.inner.registry.next()?;
        match factory(id, self.clone()).await {
            Ok(handle) => {
                self.inner.registry.add(id, handle.clone());
                Ok(handle)
            }
            Err(e) => {
                self.inner.registry.remove(id);
                Err(e)
            }
        }
    }

    /// Writes a method frame on behalf of an external channel implementation.
    /// Serialized with every other writer through the same mutex (§3 "exactly
    /// one writer" invariant).
    pub async fn write_method(&self, channel_id: u16, method: Method) -> Result<(), Error> {
        let mut writer = self.inner.writer.lock().await;
        writer
            .write_frame(&Frame::Method { channel_id, method })
            .await
    }

    /// Sends `connection.close{200, "kthxbai"}`, awaits `close-ok`, then
    /// shuts down gracefully.
    pub async fn close(&self) -> Result<(), Error> {
        self.close_with(200, "kthxbai").await
    }

    pub async fn close_with(&self, reply_code: u16, reply_text: &str) -> Result<(), Error> {
        let request = Method::ConnectionClose {
            reply_code,
            reply_text: reply_text.to_string(),
            class_id: 0,
            method_id: 0,
        };
        let write = self.write_method(0, request);
        let result = self
            .inner
            .rpc
            .call(Some(write), &[MethodTag::ConnectionCloseOk])
            .await;
        self.inner.shutdown(None).await;
        result.map(|_| ())
    }

    pub fn notify_close(&self, sink: mpsc::Sender<Option<Error>>) {
        self.inner.notify.notify_close(sink);
    }

    pub fn notify_blocked(&self, sink: mpsc::Sender<Blocking>) {
        self.inner.notify.notify_blocked(sink);
    }

    /// Looks up `server_properties["capabilities"][name]`, returning `true`
    /// only when the server advertised it as a boolean `true` (§4.10). `name`
    /// is an atomic key, not a dotted path: capability names such as
    /// `"connection.blocked"` legitimately contain literal dots.
    pub fn is_capable(&self, name: &str) -> bool {
        self.inner
            .server_properties
            .get("capabilities")
            .and_then(Value::as_table)
            .and_then(|capabilities| capabilities.get(name))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Spawns the heartbeat forwarder and the [`Heartbeater`] task itself.
/// Called from `on_tuned`, immediately after `connection.tune` is received
/// and before `tune-ok` is written (§4.9 step 5), so `writer` is the same
/// mutex the handshake continues to write through for the rest of the open
/// sequence.
fn spawn_heartbeat(
    writer: Arc<AsyncMutex<FrameWriter>>,
    interval: Duration,
    read_deadline: Arc<ReadDeadline>,
    sent_rx: mpsc::Receiver<()>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let (hb_out_tx, mut hb_out_rx) = mpsc::channel::<Frame>(1);
    tokio::spawn(async move {
        while let Some(frame) = hb_out_rx.recv().await {
            let mut writer = writer.lock().await;
            if writer.write_frame(&frame).await.is_err() {
                break;
            }
        }
    });

    let heartbeater = Heartbeater::new(interval, read_deadline);
    tokio::spawn(heartbeater.run(hb_out_tx, sent_rx, shutdown_rx));
}

fn spawn_reader(
    inner: Arc<Inner>,
    mut frame_reader: FrameReader,
    dispatcher: Dispatcher,
    read_deadline: Arc<ReadDeadline>,
    heartbeat_interval: Duration,
) {
    tokio::spawn(async move {
        loop {
            match frame_reader.read_frame().await {
                Ok(frame) => {
                    if !heartbeat_interval.is_zero() {
                        read_deadline.set(heartbeat_interval * 3);
                    }
                    match dispatcher.dispatch(frame) {
                        DispatchResult::Continue => {}
                        DispatchResult::Reply(method, channel_id) => {
                            let write_result = {
                                let mut writer = inner.writer.lock().await;
                                writer.write_frame(&Frame::Method { channel_id, method }).await
                            };
                            if let Err(e) = write_result {
                                inner.shutdown(Some(Error::frame(e.to_string()))).await;
                                return;
                            }
                        }
                        DispatchResult::CloseAndShutdown(CloseAndShutdown { reply, err }) => {
                            {
                                let mut writer = inner.writer.lock().await;
                                let _ = writer
                                    .write_frame(&Frame::Method {
                                        channel_id: 0,
                                        method: reply,
                                    })
                                    .await;
                            }
                            inner.shutdown(Some(err)).await;
                            return;
                        }
                        DispatchResult::Shutdown(err) => {
                            inner.shutdown(Some(err)).await;
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "reader loop terminating");
                    inner.shutdown(Some(err)).await;
                    return;
                }
            }
        }
    });
}
