// ABOUTME: Heartbeater - emits idle heartbeats and extends the read deadline (§4.7)
// ABOUTME: Runs from connection.tune until shutdown; any send failure terminates the task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::frame::Frame;
use crate::transport::ReadDeadline;

use super::error::Error;

/// Runs the heartbeat loop for the lifetime of a connection. `interval == 0`
/// disables heartbeating entirely (§3 `heartbeat_interval`).
pub struct Heartbeater {
    interval: Duration,
    deadline: Arc<ReadDeadline>,
}

impl Heartbeater {
    pub fn new(interval: Duration, deadline: Arc<ReadDeadline>) -> Self {
        Self { interval, deadline }
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Extends the shared read deadline to `3 * interval`, tolerating up to
    /// three missed server heartbeats (§4.7, §8 scenario on read deadlines).
    pub fn extend_read_deadline(&self) {
        if self.is_enabled() {
            self.deadline.set(self.interval * 3);
        }
    }

    /// Drives the loop: on every tick, sends an outbound heartbeat frame
    /// through `outbound` unless a frame was written more recently than
    /// `interval - 1s` ago; terminates when `shutdown` fires or `sends` is
    /// closed.
    pub async fn run(
        self,
        outbound: mpsc::Sender<Frame>,
        mut sends: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let grace = self.interval.saturating_sub(Duration::from_secs(1));
        let mut last_sent = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if last_sent.elapsed() > grace {
                        if outbound.send(Frame::heartbeat()).await.is_err() {
                            return;
                        }
                        last_sent = tokio::time::Instant::now();
                    }
                }
                sent = sends.recv() => {
                    match sent {
                        Some(()) => last_sent = tokio::time::Instant::now(),
                        None => return,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

/// Non-blocking publish of a "we just sent a frame" hint to the heartbeater.
/// Per §9, this is a zero- or one-slot try-send: if the heartbeater is not
/// currently listening, the hint is simply dropped.
pub fn try_notify_sent(sends: &mpsc::Sender<()>) {
    let _ = sends.try_send(());
}

pub fn fatal_missed_heartbeat() -> Error {
    Error::transport("no heartbeat or frame received within the negotiated interval")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_heartbeater_reports_disabled_and_skips_deadline_extension() {
        let deadline = ReadDeadline::new(Duration::from_secs(30));
        let hb = Heartbeater::new(Duration::ZERO, deadline.clone());
        assert!(!hb.is_enabled());
        hb.extend_read_deadline();
        assert_eq!(deadline.get(), Duration::from_secs(30));
    }

    #[test]
    fn enabled_heartbeater_extends_deadline_to_triple_interval() {
        let deadline = ReadDeadline::new(Duration::from_secs(30));
        let hb = Heartbeater::new(Duration::from_secs(10), deadline.clone());
        hb.extend_read_deadline();
        assert_eq!(deadline.get(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn idle_connection_emits_a_heartbeat_within_one_tick() {
        let deadline = ReadDeadline::new(Duration::from_secs(30));
        let hb = Heartbeater::new(Duration::from_millis(30), deadline);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(4);
        let (_sends_tx, sends_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(hb.run(outbound_tx, sends_rx, shutdown_rx));

        let frame = tokio::time::timeout(Duration::from_millis(500), outbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, Frame::Heartbeat);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn closing_the_sends_channel_terminates_the_loop() {
        let deadline = ReadDeadline::new(Duration::from_secs(30));
        let hb = Heartbeater::new(Duration::from_secs(60), deadline);
        let (outbound_tx, _outbound_rx) = mpsc::channel(4);
        let (sends_tx, sends_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(hb.run(outbound_tx, sends_rx, shutdown_rx));
        drop(sends_tx);
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
