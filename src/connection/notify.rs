// ABOUTME: NotificationHub - close and blocked/unblocked listener fan-out (§4.5)
// ABOUTME: Freezes after shutdown so late registrations get an already-closed sink

use std::sync::Mutex;

use tokio::sync::mpsc;

use super::error::Error;

/// A blocked/unblocked event, as delivered to block-listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Blocking {
    pub active: bool,
    pub reason: String,
}

impl Blocking {
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            active: true,
            reason: reason.into(),
        }
    }

    pub fn unblocked() -> Self {
        Self {
            active: false,
            reason: String::new(),
        }
    }
}

struct Inner {
    close_listeners: Vec<mpsc::Sender<Option<Error>>>,
    block_listeners: Vec<mpsc::Sender<Blocking>>,
    frozen: bool,
}

/// Holds every registered close- and block-listener sink. Fan-out is
/// best-effort ordered; a slow listener can stall delivery, which is why
/// listener sinks are expected to be buffered (§4.5, §9).
pub struct NotificationHub {
    inner: Mutex<Inner>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                close_listeners: Vec::new(),
                block_listeners: Vec::new(),
                frozen: false,
            }),
        }
    }

    /// Registers a close listener. If the hub is already frozen (shutdown
    /// has begun or completed) the sink is dropped immediately, which
    /// closes it from the receiver's perspective.
    pub fn notify_close(&self, sink: mpsc::Sender<Option<Error>>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.frozen {
            return;
        }
        inner.close_listeners.push(sink);
    }

    pub fn notify_blocked(&self, sink: mpsc::Sender<Blocking>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.frozen {
            return;
        }
        inner.block_listeners.push(sink);
    }

    pub fn fan_out_blocking(&self, event: Blocking) {
        let listeners = self.inner.lock().unwrap().block_listeners.clone();
        for listener in listeners {
            let _ = listener.try_send(event.clone());
        }
    }

    /// Runs the shutdown fan-out: delivers `err` (if any) to every
    /// close-listener, then drops every sink (closing both lists), then
    /// freezes the hub so further registrations are closed on arrival.
    pub fn shutdown(&self, err: Option<Error>) {
        let mut inner = self.inner.lock().unwrap();
        for listener in &inner.close_listeners {
            let _ = listener.try_send(err.clone());
        }
        inner.close_listeners.clear();
        inner.block_listeners.clear();
        inner.frozen = true;
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
