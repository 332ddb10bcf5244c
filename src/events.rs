//! Notifications from the control loop to the foreground.
//!
//! The worker never calls subscribers directly. It posts `LinkEvent`s on a
//! channel and the foreground drains them on its own schedule with
//! [`dispatch`], so subscriber code always runs on the foreground thread.

use crossbeam_channel::Receiver;

use crate::error::FailureKind;
use crate::samples::Sample;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected { port: String },
    Disconnected(Disconnect),
    /// A non-empty received line, decoded or not.
    Line(String),
    Sample(Sample),
    /// A send was refused because the link never came up or has stopped.
    NotConnected,
    /// The control loop has returned and released the port.
    Stopped,
}

/// Receiver side of the notification contract.
pub trait EventSubscriber {
    fn on_line(&mut self, text: &str);
    fn on_connected(&mut self, port: &str);
    fn on_disconnected(&mut self, reason: &Disconnect);

    fn on_sample(&mut self, _sample: &Sample) {}
    fn on_not_connected(&mut self) {}
    fn on_stopped(&mut self) {}
}

impl LinkEvent {
    pub fn deliver(&self, sub: &mut dyn EventSubscriber) {
        match self {
            LinkEvent::Connected { port } => sub.on_connected(port),
            LinkEvent::Disconnected(d) => sub.on_disconnected(d),
            LinkEvent::Line(text) => sub.on_line(text),
            LinkEvent::Sample(s) => sub.on_sample(s),
            LinkEvent::NotConnected => sub.on_not_connected(),
            LinkEvent::Stopped => sub.on_stopped(),
        }
    }
}

/// Deliver everything currently queued, in order. Returns how many events
/// were delivered.
pub fn dispatch(rx: &Receiver<LinkEvent>, sub: &mut dyn EventSubscriber) -> usize {
    let mut n = 0;
    for ev in rx.try_iter() {
        ev.deliver(sub);
        n += 1;
    }
    n
}
