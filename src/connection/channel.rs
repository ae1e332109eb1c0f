// ABOUTME: ChannelHandle - the interface the Dispatcher and shutdown use to reach a channel
// ABOUTME: Per-channel semantics (exchanges, queues, consumers) are external to this core

use crate::frame::Frame;

use super::error::Error;

/// A logical channel, opaque to the connection core. The core only ever
/// calls `recv` (routing a frame addressed to this channel) and `shutdown`
/// (tearing the channel down during connection teardown); everything else
/// about what a channel *is* — exchange/queue/consumer state, the
/// channel-open handshake — belongs to the caller-supplied implementation.
pub trait ChannelHandle: Send + Sync {
    /// Delivers a frame addressed to this channel. Called from the reader
    /// task; implementations must not block for long.
    fn recv(&self, frame: Frame);

    /// Called exactly once, during connection shutdown or when the channel
    /// itself is closed. `err` is `Some` when the teardown was error-driven.
    fn shutdown(&self, err: Option<Error>);
}
