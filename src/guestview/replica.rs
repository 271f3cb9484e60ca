//! Cross-thread routing replica.
//!
//! Network interception runs on a request-processing thread that must never wait for
//! the control thread. It reads a copy of the routing metadata of every attached
//! guest, kept in a [`RoutingTable`]. The control thread never touches that table
//! directly: it posts [`ReplicaMessage`]s over a single FIFO channel to the replica
//! thread, which applies them in order. Because there is one channel, an `AddGuest`
//! posted before a `RemoveGuest` for the same routing id is always applied first.
//!
//! Every applied `AddGuest` is reported back on a second channel. The control thread
//! holds a guest's first load until that report arrives, so a request for the guest
//! never reaches the interception thread before its routing entry.

use crate::guestview::errors::GuestViewError;
use crate::guestview::isolation::BoundaryId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

/// Routing identity of a guest: the process hosting it and its route within that process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutingId {
    pub process_id: u32,
    pub route_id: u32,
}

impl RoutingId {
    pub fn new(process_id: u32, route_id: u32) -> Self {
        Self { process_id, route_id }
    }
}

impl Display for RoutingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.process_id, self.route_id)
    }
}

/// Value copy of what the request thread needs to know about a guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestRoutingInfo {
    /// Process of the embedder that owns the guest
    pub owner_process_id: u32,
    /// Instance id of the view element inside the embedder
    pub instance_id: u32,
    /// Storage partition id (`persist:`-prefixed when persistent)
    pub partition_id: String,
    /// Identity of the owner (e.g. the embedding application)
    pub owner_id: String,
    /// Isolation boundary the guest was attached under
    pub boundary_id: BoundaryId,
}

/// Key of an interception listener: the embedder process and the view instance that
/// registered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerKey {
    pub owner_process_id: u32,
    pub view_instance_id: u32,
}

/// An interception listener registered by an embedder (e.g. a request filter for one
/// view).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptListener {
    pub key: ListenerKey,
    /// Name of the intercepted event, e.g. `onBeforeRequest`
    pub event: String,
    /// Embedder side identifier of the listener
    pub sub_event_name: String,
}

/// Messages posted from the control thread to the replica thread
#[derive(Debug)]
pub enum ReplicaMessage {
    AddGuest { routing_id: RoutingId, info: GuestRoutingInfo },
    RemoveGuest { routing_id: RoutingId },
    AddListener(InterceptListener),
    RemoveListeners(ListenerKey),
    /// Acknowledged once every message posted before it has been applied
    Flush(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Debug, Default)]
struct TableState {
    guests: HashMap<RoutingId, GuestRoutingInfo>,
    listeners: HashMap<ListenerKey, Vec<InterceptListener>>,
}

impl TableState {
    fn apply(&mut self, msg: ReplicaMessage) {
        match msg {
            ReplicaMessage::AddGuest { routing_id, info } => {
                log::trace!("Replica: add guest {routing_id}");
                self.guests.insert(routing_id, info);
            }
            ReplicaMessage::RemoveGuest { routing_id } => {
                log::trace!("Replica: remove guest {routing_id}");
                self.guests.remove(&routing_id);
            }
            ReplicaMessage::AddListener(listener) => {
                self.listeners.entry(listener.key).or_default().push(listener);
            }
            ReplicaMessage::RemoveListeners(key) => {
                self.listeners.remove(&key);
            }
            ReplicaMessage::Flush(_) | ReplicaMessage::Shutdown => {}
        }
    }
}

/// Read side of the replica, used on the request-processing thread.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    state: Arc<RwLock<TableState>>,
}

impl RoutingTable {
    /// Routing information for the guest behind `routing_id`, if it is attached.
    pub fn lookup(&self, routing_id: RoutingId) -> Option<GuestRoutingInfo> {
        self.state.read().ok()?.guests.get(&routing_id).cloned()
    }

    pub fn contains(&self, routing_id: RoutingId) -> bool {
        self.lookup(routing_id).is_some()
    }

    pub fn listeners_for(&self, key: ListenerKey) -> Vec<InterceptListener> {
        self.state
            .read()
            .map(|s| s.listeners.get(&key).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn guest_count(&self) -> usize {
        self.state.read().map(|s| s.guests.len()).unwrap_or(0)
    }

    fn apply(&self, msg: ReplicaMessage) {
        match self.state.write() {
            Ok(mut state) => state.apply(msg),
            Err(poisoned) => poisoned.into_inner().apply(msg),
        }
    }
}

/// Control thread side of the replica. Owns the replica thread.
#[derive(Debug)]
pub struct RoutingReplica {
    tx: mpsc::UnboundedSender<ReplicaMessage>,
    table: RoutingTable,
    installed_rx: Option<mpsc::UnboundedReceiver<RoutingId>>,
    join_handle: Option<JoinHandle<()>>,
}

impl RoutingReplica {
    /// Spawns the replica thread.
    pub fn spawn(thread_name: &str) -> Result<Self, GuestViewError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReplicaMessage>();
        let (installed_tx, installed_rx) = mpsc::unbounded_channel::<RoutingId>();
        let table = RoutingTable::default();

        let thread_table = table.clone();
        let join_handle = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                while let Some(msg) = rx.blocking_recv() {
                    match msg {
                        ReplicaMessage::Flush(ack) => {
                            let _ = ack.send(());
                        }
                        ReplicaMessage::Shutdown => break,
                        ReplicaMessage::AddGuest { routing_id, info } => {
                            thread_table.apply(ReplicaMessage::AddGuest { routing_id, info });
                            let _ = installed_tx.send(routing_id);
                        }
                        msg => thread_table.apply(msg),
                    }
                }
                log::debug!("Replica: thread stopped");
            })?;

        Ok(Self {
            tx,
            table,
            installed_rx: Some(installed_rx),
            join_handle: Some(join_handle),
        })
    }

    /// Posts a message. Never blocks.
    pub fn post(&self, msg: ReplicaMessage) {
        if self.tx.send(msg).is_err() {
            log::warn!("Replica: thread is gone, dropping message");
        }
    }

    pub fn add_guest(&self, routing_id: RoutingId, info: GuestRoutingInfo) {
        self.post(ReplicaMessage::AddGuest { routing_id, info });
    }

    pub fn remove_guest(&self, routing_id: RoutingId) {
        self.post(ReplicaMessage::RemoveGuest { routing_id });
    }

    pub fn add_listener(&self, listener: InterceptListener) {
        self.post(ReplicaMessage::AddListener(listener));
    }

    pub fn remove_listeners(&self, key: ListenerKey) {
        self.post(ReplicaMessage::RemoveListeners(key));
    }

    /// A reader for the request-processing side.
    pub fn table(&self) -> RoutingTable {
        self.table.clone()
    }

    /// Routing ids whose `AddGuest` has been applied since the last call. Never blocks.
    pub fn try_installed(&mut self) -> Vec<RoutingId> {
        let mut installed = Vec::new();
        if let Some(rx) = self.installed_rx.as_mut() {
            while let Ok(routing_id) = rx.try_recv() {
                installed.push(routing_id);
            }
        }
        installed
    }

    /// Hands the installed reports to a control loop that awaits them. After this
    /// [`try_installed`](Self::try_installed) returns nothing.
    pub(crate) fn take_installed(&mut self) -> Option<mpsc::UnboundedReceiver<RoutingId>> {
        self.installed_rx.take()
    }

    /// Waits until every message posted so far has been applied.
    pub async fn flush(&self) -> Result<(), GuestViewError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(ReplicaMessage::Flush(tx))
            .map_err(|_| GuestViewError::ReplicaClosed)?;
        rx.await.map_err(|_| GuestViewError::ReplicaClosed)
    }

    /// Blocking variant of [`flush`](Self::flush). Must not be called from within an
    /// async context.
    pub fn flush_blocking(&self) -> Result<(), GuestViewError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(ReplicaMessage::Flush(tx))
            .map_err(|_| GuestViewError::ReplicaClosed)?;
        rx.blocking_recv().map_err(|_| GuestViewError::ReplicaClosed)
    }

    /// Stops the replica thread after it has applied everything posted before.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(ReplicaMessage::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                log::error!("Replica: thread panicked");
            }
        }
    }
}

impl Drop for RoutingReplica {
    fn drop(&mut self) {
        self.shutdown();
    }
}
