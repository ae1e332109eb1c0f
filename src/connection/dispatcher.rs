// ABOUTME: Dispatcher - routes frames from the reader loop (§4.8)
// ABOUTME: Channel 0 goes to dispatch0; everything else to the registry or dispatch_closed

use std::sync::Arc;

use crate::frame::Frame;
use crate::method::Method;

use super::error::Error;
use super::notify::{Blocking, NotificationHub};
use super::registry::ChannelRegistry;
use super::rpc::RPCMux;

/// Pairing the reader loop needs for a server-initiated close: write
/// `connection.close-ok`, then shut down with `err` (§4.8, §8 scenario 3).
#[derive(Debug, PartialEq)]
pub struct CloseAndShutdown {
    pub reply: Method,
    pub err: Error,
}

/// What the reader loop should do after a dispatched frame.
#[derive(Debug, PartialEq)]
pub enum DispatchResult {
    Continue,
    Reply(Method, u16),
    CloseAndShutdown(CloseAndShutdown),
    Shutdown(Error),
}

/// Routes inbound frames to the RPC multiplexer, the notification hub, a
/// registered channel, or the closed-channel policy, per §4.8.
pub struct Dispatcher {
    registry: Arc<ChannelRegistry>,
    notify: Arc<NotificationHub>,
    rpc: Arc<RPCMux>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ChannelRegistry>, notify: Arc<NotificationHub>, rpc: Arc<RPCMux>) -> Self {
        Self {
            registry,
            notify,
            rpc,
        }
    }

    pub fn dispatch(&self, frame: Frame) -> DispatchResult {
        if frame.channel_id() == 0 {
            self.dispatch0(frame)
        } else if let Some(handle) = self.registry.get(frame.channel_id()) {
            handle.recv(frame);
            DispatchResult::Continue
        } else {
            self.dispatch_closed(frame)
        }
    }

    fn dispatch0(&self, frame: Frame) -> DispatchResult {
        match frame {
            Frame::Method { method, .. } => match method {
                Method::ConnectionClose {
                    reply_code,
                    reply_text,
                    ..
                } => DispatchResult::CloseAndShutdown(CloseAndShutdown {
                    reply: Method::ConnectionCloseOk,
                    err: Error::from_close(reply_code, reply_text),
                }),
                Method::ConnectionBlocked { reason } => {
                    self.notify.fan_out_blocking(Blocking::blocked(reason));
                    DispatchResult::Continue
                }
                Method::ConnectionUnblocked => {
                    self.notify.fan_out_blocking(Blocking::unblocked());
                    DispatchResult::Continue
                }
                other => {
                    self.rpc.deliver(other);
                    DispatchResult::Continue
                }
            },
            Frame::Heartbeat => DispatchResult::Continue,
            _ => DispatchResult::Shutdown(Error::unexpected_frame(
                "non-method, non-heartbeat frame on channel 0",
            )),
        }
    }

    fn dispatch_closed(&self, frame: Frame) -> DispatchResult {
        match frame {
            Frame::Method {
                channel_id,
                method: Method::ChannelClose { .. },
            } => DispatchResult::Reply(Method::ChannelCloseOk, channel_id),
            Frame::Method {
                method: Method::ChannelCloseOk,
                ..
            } => DispatchResult::Continue,
            Frame::Method { .. } => {
                DispatchResult::Shutdown(Error::closed("method frame for an unregistered channel"))
            }
            Frame::Header { .. } | Frame::Body { .. } => DispatchResult::Continue,
            Frame::Heartbeat => DispatchResult::Continue,
        }
    }
}
