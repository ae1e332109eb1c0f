// ABOUTME: Error and ErrorKind types for the connection core
// ABOUTME: Mirrors the reply-code/kind shape carried by AMQP 0-9-1 connection.close

use std::fmt;
use thiserror::Error;

/// Coarse classification of a connection-core failure.
///
/// `kind` drives propagation policy (§7): some kinds are fatal and trigger
/// shutdown, others are returned directly to the caller that asked for the
/// failing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Underlying I/O failure on the transport.
    Transport,
    /// Malformed or unreadable frame.
    Frame,
    /// Non-method, non-heartbeat frame arrived on channel 0.
    UnexpectedFrame,
    /// Protocol-level violation outside framing (e.g. bad frame-end octet).
    Protocol,
    /// No mutually supported SASL mechanism.
    Sasl,
    /// Authentication failure signalled by the server closing the socket during tune.
    Credentials,
    /// The broker rejected the requested vhost.
    Vhost,
    /// Operation attempted on an already-closed channel or connection.
    Closed,
    /// An RPC response did not match any of the expected method tags.
    CommandInvalid,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Frame => "frame",
            ErrorKind::UnexpectedFrame => "unexpected_frame",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Sasl => "sasl",
            ErrorKind::Credentials => "credentials",
            ErrorKind::Vhost => "vhost",
            ErrorKind::Closed => "closed",
            ErrorKind::CommandInvalid => "command_invalid",
        };
        f.write_str(s)
    }
}

/// A connection-core error: a reply code, a human-readable reason, and a kind
/// that tells callers how the failure should be treated.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{kind} ({code}): {reason}")]
pub struct Error {
    pub code: u16,
    pub reason: String,
    pub kind: ErrorKind,
}

impl Error {
    pub fn new(kind: ErrorKind, code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            kind,
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, 0, reason)
    }

    pub fn frame(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Frame, 0, reason)
    }

    pub fn unexpected_frame(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnexpectedFrame, 505, reason)
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, 502, reason)
    }

    pub fn sasl(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Sasl, 0, reason)
    }

    pub fn credentials(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Credentials, 403, reason)
    }

    pub fn vhost(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Vhost, 530, reason)
    }

    pub fn closed(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Closed, 0, reason)
    }

    pub fn command_invalid(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::CommandInvalid, 503, reason)
    }

    /// Build an `Error` from the reply fields of a server-sent `connection.close`.
    pub fn from_close(reply_code: u16, reply_text: impl Into<String>) -> Self {
        Self::new(ErrorKind::Closed, reply_code, reply_text)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::transport(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::transport("read/write deadline elapsed")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
