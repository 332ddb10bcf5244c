use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use tracing::debug;

use crate::manager::CommandSender;
use crate::proto::command::DeviceCommand;

pub const MIN_POLL_MS: u64 = 50;
pub const MAX_POLL_MS: u64 = 5000;
pub const DEFAULT_POLL_MS: u64 = 200;

/// Periodically queues `READ` so devices that only answer on request keep
/// the sample stream flowing. Stops when dropped.
pub struct Poller {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<u64>>,
}

impl Poller {
    /// `interval` is clamped to 50..=5000 ms.
    pub fn start(sender: CommandSender, interval: Duration) -> std::io::Result<Self> {
        let interval = clamp_interval(interval);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let payload = DeviceCommand::Read.encode();
        let handle = thread::Builder::new()
            .name("read-poller".into())
            .spawn(move || {
                let mut sent = 0u64;
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    if sender.enqueue_send(payload.clone()) {
                        sent += 1;
                    }
                }
                sent
            })?;
        debug!(?interval, "polling started");
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop polling. Returns how many `READ`s were queued.
    pub fn stop(mut self) -> u64 {
        self.halt()
    }

    fn halt(&mut self) -> u64 {
        self.stop_tx.take();
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.halt();
    }
}

pub fn clamp_interval(d: Duration) -> Duration {
    d.clamp(
        Duration::from_millis(MIN_POLL_MS),
        Duration::from_millis(MAX_POLL_MS),
    )
}
