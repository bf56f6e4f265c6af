//! Per-account connection slots.
//!
//! Reads are open to everyone; writes go through `pub(crate)` methods used by
//! the connection manager only. Each slot publishes its snapshot on a watch
//! channel so parked commands can wait for the link to come back.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use super::state::{Connection, ConnectionState};
use crate::error::{Result, TradegateError};
use crate::transport::Transport;

pub(crate) struct ConnectionSlot {
    pub(crate) transport: Arc<dyn Transport>,
    state: watch::Sender<Connection>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    slots: DashMap<String, Arc<ConnectionSlot>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, account_id: &str) -> bool {
        self.slots.contains_key(account_id)
    }

    pub fn snapshot(&self, account_id: &str) -> Option<Connection> {
        self.slots
            .get(account_id)
            .map(|slot| slot.state.borrow().clone())
    }

    pub fn state(&self, account_id: &str) -> Option<ConnectionState> {
        self.slots.get(account_id).map(|slot| slot.state.borrow().state)
    }

    pub fn subscribe(&self, account_id: &str) -> Option<watch::Receiver<Connection>> {
        self.slots.get(account_id).map(|slot| slot.state.subscribe())
    }

    /// Transport for an account, only while its session accepts commands.
    pub fn connected_transport(&self, account_id: &str) -> Option<Arc<dyn Transport>> {
        let slot = self.slots.get(account_id)?;
        let accepts = slot.state.borrow().state.accepts_commands();
        (accepts && slot.transport.is_alive()).then(|| Arc::clone(&slot.transport))
    }

    pub fn all(&self) -> Vec<Connection> {
        let mut all: Vec<Connection> = self
            .slots
            .iter()
            .map(|slot| slot.state.borrow().clone())
            .collect();
        all.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        all
    }

    pub fn connected_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state.borrow().is_connected())
            .count()
    }

    pub(crate) fn insert(&self, connection: Connection, transport: Arc<dyn Transport>) -> Arc<ConnectionSlot> {
        let (tx, _rx) = watch::channel(connection.clone());
        let slot = Arc::new(ConnectionSlot {
            transport,
            state: tx,
        });
        self.slots.insert(connection.account_id, Arc::clone(&slot));
        slot
    }

    pub(crate) fn slot(&self, account_id: &str) -> Option<Arc<ConnectionSlot>> {
        self.slots.get(account_id).map(|s| Arc::clone(&s))
    }

    pub(crate) fn remove(&self, account_id: &str) -> Option<Arc<ConnectionSlot>> {
        self.slots.remove(account_id).map(|(_, slot)| slot)
    }
}

impl ConnectionSlot {
    pub(crate) fn snapshot(&self) -> Connection {
        self.state.borrow().clone()
    }

    /// Move to `target` and apply `edit` in the same update. Subscribers are
    /// notified only when the transition is allowed.
    pub(crate) fn transition(
        &self,
        target: ConnectionState,
        edit: impl FnOnce(&mut Connection),
    ) -> Result<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|conn| match conn.transition(target) {
            Ok(()) => {
                edit(conn);
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    /// Edit fields without changing state.
    pub(crate) fn update(&self, edit: impl FnOnce(&mut Connection)) {
        self.state.send_modify(edit);
    }
}

impl std::fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSlot")
            .field("connection", &*self.state.borrow())
            .finish()
    }
}

pub(crate) fn unknown_account(account_id: &str) -> TradegateError {
    TradegateError::Connection(format!("no connection registered for account {account_id}"))
}
