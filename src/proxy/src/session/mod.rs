//! Per-client-connection state: prepared-statement id translation,
//! statement history, and transaction tracking.
//!
//! A [`ClientSession`] is created once a connection has authenticated and
//! been pinned to a backend, and is shared (behind a mutex, since the
//! forwarders that touch it run on the same task one at a time but are
//! constructed fresh per loop iteration) for the life of that connection.

pub mod history;
pub mod ps_map;
pub mod reply_tracker;
pub mod txn;

use history::{History, HistoryOverflowPolicy};
use mysql_common::constants::CapabilityFlags;
use ps_map::PsMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use txn::TxnTracker;

pub type SharedClientSession = Arc<Mutex<ClientSession>>;

#[derive(Debug)]
pub struct ClientSession {
    pub ps_map: PsMap,
    pub history: History,
    pub txn: TxnTracker,
    /// The id of the single backend connection this session is pinned to.
    pub backend_id: String,
    pub capabilities: CapabilityFlags,
    /// Tables this session created with `CREATE TEMPORARY TABLE`, fed into
    /// the classifier so a later `SELECT` against one of them is marked
    /// `READ_TMP_TABLE` rather than routed like an ordinary table read.
    pub tmp_tables: HashSet<String>,
}

impl ClientSession {
    pub fn new(
        backend_id: String,
        capabilities: CapabilityFlags,
        history_max_entries: usize,
        history_overflow_policy: HistoryOverflowPolicy,
    ) -> Self {
        let server_tracking = capabilities.contains(CapabilityFlags::CLIENT_SESSION_TRACK);
        Self {
            ps_map: PsMap::default(),
            history: History::new(history_max_entries, history_overflow_policy),
            txn: TxnTracker::new(server_tracking),
            backend_id,
            capabilities,
            tmp_tables: HashSet::new(),
        }
    }

    pub fn shared(self) -> SharedClientSession {
        Arc::new(Mutex::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_idle_and_empty() {
        let session = ClientSession::new(
            "backend-a".to_string(),
            CapabilityFlags::empty(),
            1024,
            HistoryOverflowPolicy::default(),
        );
        assert!(session.txn.is_idle());
        assert!(session.history.is_empty());
        assert!(session.ps_map.is_empty());
    }
}
