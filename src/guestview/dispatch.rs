//! Event dispatch bridge.
//!
//! Events raised for a guest are delivered to the event sink of the embedder it is
//! attached to. Events raised for a guest without an embedder are dropped: nothing is
//! buffered for later.

use crate::guestview::events::{EventArgs, EventName, GuestEvent};
use crate::guestview::guest::GuestInstanceId;
use tokio::sync::mpsc;

/// Receiving end of an embedder's event stream
pub type EventStream = mpsc::UnboundedReceiver<GuestEvent>;

/// Sending end of an embedder's event stream
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<GuestEvent>,
}

impl EventSink {
    pub fn channel() -> (EventSink, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink { tx }, rx)
    }

    /// Sends an event. Returns false when the receiving side is gone.
    pub fn send(&self, event: GuestEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub struct EventDispatcher {
    stats: DispatchStats,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `name` to `sink` if there is one. Returns whether the event was delivered.
    pub fn emit(&mut self, sink: Option<&EventSink>, guest: GuestInstanceId, name: EventName, args: EventArgs) -> bool {
        let Some(sink) = sink else {
            log::debug!("Guest[{}]: no embedder attached, dropping '{}' event", guest, name);
            self.stats.dropped += 1;
            return false;
        };

        if sink.send(GuestEvent::new(guest, name, args)) {
            self.stats.delivered += 1;
            true
        } else {
            log::debug!("Guest[{}]: embedder stopped listening, dropping '{}' event", guest, name);
            self.stats.dropped += 1;
            false
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guestview::events::keys;

    #[test]
    fn delivers_to_sink_in_order() {
        let (sink, mut rx) = EventSink::channel();
        let mut d = EventDispatcher::new();
        let guest = GuestInstanceId(1);

        assert!(d.emit(Some(&sink), guest, EventName::LoadStart, EventArgs::new().with(keys::URL, "a")));
        assert!(d.emit(Some(&sink), guest, EventName::LoadCommit, EventArgs::new()));

        assert_eq!(rx.try_recv().unwrap().name, EventName::LoadStart);
        assert_eq!(rx.try_recv().unwrap().name, EventName::LoadCommit);
        assert!(rx.try_recv().is_err());
        assert_eq!(d.stats(), DispatchStats { delivered: 2, dropped: 0 });
    }

    #[test]
    fn drops_without_sink() {
        let mut d = EventDispatcher::new();
        assert!(!d.emit(None, GuestInstanceId(1), EventName::Close, EventArgs::new()));

        let (sink, rx) = EventSink::channel();
        drop(rx);
        assert!(!d.emit(Some(&sink), GuestInstanceId(1), EventName::Close, EventArgs::new()));
        assert_eq!(d.stats().dropped, 2);
    }
}
