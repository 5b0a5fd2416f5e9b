//! Transaction-boundary tracking for a single client session.
//!
//! The tracker's job is narrow: know whether the session currently has an
//! open transaction and whether it could be safely migrated to a different
//! backend connection right now (i.e. it is idle). It is driven by the
//! [`crate::classifier`] output for every `COM_QUERY`, and optionally
//! corrected against the server's own `SERVER_STATUS_IN_TRANS`/
//! `SERVER_STATUS_AUTOCOMMIT` bits when the backend is known to report them
//! accurately.

use crate::classifier::{Classification, TypeMask};
use mysql_common::constants::StatusFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnState {
    #[default]
    Inactive,
    ActiveRead,
    ActiveWrite,
    /// A `COMMIT`/`ROLLBACK` has been sent but its `OK` response has not yet
    /// been observed.
    Ending,
}

#[derive(Debug, Clone)]
pub struct TxnTracker {
    state: TxnState,
    autocommit: bool,
    server_tracking: bool,
}

impl TxnTracker {
    pub fn new(server_tracking: bool) -> Self {
        Self {
            state: TxnState::Inactive,
            autocommit: true,
            server_tracking,
        }
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// Whether a new backend connection could take over for this session
    /// right now without losing transactional context.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, TxnState::Inactive)
    }

    /// Updates transaction state from a classified `COM_QUERY`. Called
    /// before the statement is forwarded so `client_reply` can already see
    /// the post-statement state if needed; `on_command_ok` then confirms it.
    pub fn on_classified_statement(&mut self, class: &Classification) {
        let mask = class.type_mask;

        if mask.contains(TypeMask::BEGIN_TRX) {
            self.state = if mask.contains(TypeMask::READWRITE) {
                TxnState::ActiveWrite
            } else {
                TxnState::ActiveRead
            };
        } else if mask.contains(TypeMask::WRITE) && matches!(self.state, TxnState::ActiveRead) {
            self.state = TxnState::ActiveWrite;
        }

        if mask.contains(TypeMask::DISABLE_AUTOCOMMIT) {
            self.autocommit = false;
        }
        if mask.contains(TypeMask::ENABLE_AUTOCOMMIT) {
            self.autocommit = true;
        }

        if mask.contains(TypeMask::COMMIT) || mask.contains(TypeMask::ROLLBACK) {
            self.state = TxnState::Ending;
        }
    }

    /// Called once the backend's `OK` for the in-flight statement has been
    /// observed, finalizing a pending `COMMIT`/`ROLLBACK`.
    pub fn on_command_ok(&mut self) {
        if matches!(self.state, TxnState::Ending) {
            self.state = TxnState::Inactive;
        }
    }

    /// `COM_CHANGE_USER` implicitly ends any open transaction and restores
    /// the default autocommit-on state for the newly-authenticated user.
    pub fn reset_on_change_user(&mut self) {
        self.state = TxnState::Inactive;
        self.autocommit = true;
    }

    /// When the backend negotiated `CLIENT_SESSION_TRACK` and reports
    /// accurate status flags, let them override our textual guess.
    pub fn on_server_status(&mut self, status: StatusFlags) {
        if !self.server_tracking {
            return;
        }
        self.autocommit = status.contains(StatusFlags::SERVER_STATUS_AUTOCOMMIT);
        if !status.contains(StatusFlags::SERVER_STATUS_IN_TRANS) {
            if matches!(self.state, TxnState::ActiveRead | TxnState::ActiveWrite | TxnState::Ending) {
                self.state = TxnState::Inactive;
            }
        } else if matches!(self.state, TxnState::Inactive) {
            self.state = TxnState::ActiveWrite;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_default;

    #[test]
    fn begin_then_write_moves_to_active_write() {
        let mut tracker = TxnTracker::new(false);
        tracker.on_classified_statement(&classify_default("START TRANSACTION READ ONLY"));
        assert_eq!(tracker.state(), TxnState::ActiveRead);
        tracker.on_classified_statement(&classify_default("UPDATE t SET x=1"));
        assert_eq!(tracker.state(), TxnState::ActiveWrite);
    }

    #[test]
    fn commit_requires_ok_confirmation_before_going_idle() {
        let mut tracker = TxnTracker::new(false);
        tracker.on_classified_statement(&classify_default("BEGIN"));
        tracker.on_classified_statement(&classify_default("COMMIT"));
        assert_eq!(tracker.state(), TxnState::Ending);
        assert!(!tracker.is_idle());
        tracker.on_command_ok();
        assert_eq!(tracker.state(), TxnState::Inactive);
        assert!(tracker.is_idle());
    }

    #[test]
    fn set_autocommit_off_is_an_implicit_begin() {
        let mut tracker = TxnTracker::new(false);
        tracker.on_classified_statement(&classify_default("SET AUTOCOMMIT=0"));
        assert!(!tracker.autocommit());
        assert_eq!(tracker.state(), TxnState::ActiveRead);
    }

    #[test]
    fn server_status_overrides_when_tracking_enabled() {
        let mut tracker = TxnTracker::new(true);
        tracker.on_classified_statement(&classify_default("BEGIN"));
        tracker.on_server_status(StatusFlags::SERVER_STATUS_AUTOCOMMIT);
        assert_eq!(tracker.state(), TxnState::Inactive);
        assert!(tracker.autocommit());
    }

    #[test]
    fn server_status_ignored_when_tracking_disabled() {
        let mut tracker = TxnTracker::new(false);
        tracker.on_classified_statement(&classify_default("BEGIN"));
        tracker.on_server_status(StatusFlags::SERVER_STATUS_AUTOCOMMIT);
        assert_eq!(tracker.state(), TxnState::ActiveRead);
    }

    #[test]
    fn change_user_clears_open_transaction_and_restores_autocommit() {
        let mut tracker = TxnTracker::new(false);
        tracker.on_classified_statement(&classify_default("SET AUTOCOMMIT=0"));
        assert!(!tracker.autocommit());
        tracker.reset_on_change_user();
        assert_eq!(tracker.state(), TxnState::Inactive);
        assert!(tracker.autocommit());
    }
}
