//! Per-connection statement history, kept so that a session can be replayed
//! onto a freshly-checked-out backend connection if its original one is
//! lost. Every session-mutating command is appended in order; nothing is
//! ever removed except by the overflow policy truncating the whole history.

use crate::classifier::TypeMask;
use crate::protocol::mysql::packet::Packet;
use std::collections::HashMap;
use std::str::FromStr;

/// What to do once a session's history has grown past `history_max_entries`
/// and it needs a *new* backend connection (its current one died, or the
/// pool evicted it). Matches `--history-overflow-policy` in
/// [`crate::server::proxy_cli_args::ProxyServerArgs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryOverflowPolicy {
    /// Stop handing this session a pooled connection at all; every
    /// subsequent command opens (and closes) its own backend connection.
    #[default]
    DisablePooling,
    /// Let the checkout fail with a `ProxyError::HistoryOverflow` instead of
    /// silently degrading; the caller decides whether to retry.
    ErrorOnAdoption,
}

impl FromStr for HistoryOverflowPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disable_pooling" => Ok(Self::DisablePooling),
            "error_on_adoption" => Ok(Self::ErrorOnAdoption),
            _ => Err(()),
        }
    }
}

/// The canonical shape of a command's response, stripped of anything that
/// legitimately differs run to run (timestamps, connection ids, row order
/// for result sets the server isn't required to return ordered).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalResponse {
    Ok { affected_rows: u64, last_insert_id: u64 },
    Err { code: u16 },
    ResultSet { row_count: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparatorOutcome {
    Equivalent,
    Mismatch,
}

impl CanonicalResponse {
    pub fn compare(&self, other: &CanonicalResponse) -> ComparatorOutcome {
        let equivalent = match (self, other) {
            (
                CanonicalResponse::Ok { affected_rows: a1, last_insert_id: l1 },
                CanonicalResponse::Ok { affected_rows: a2, last_insert_id: l2 },
            ) => a1 == a2 && l1 == l2,
            (CanonicalResponse::Err { code: c1 }, CanonicalResponse::Err { code: c2 }) => c1 == c2,
            (
                CanonicalResponse::ResultSet { row_count: r1 },
                CanonicalResponse::ResultSet { row_count: r2 },
            ) => r1 == r2,
            _ => false,
        };
        if equivalent {
            ComparatorOutcome::Equivalent
        } else {
            ComparatorOutcome::Mismatch
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub seq: u64,
    pub payload: Packet,
    pub canonical_response: Option<CanonicalResponse>,
    pub type_mask: TypeMask,
}

#[derive(Debug)]
pub struct History {
    entries: Vec<Entry>,
    cursors: HashMap<String, usize>,
    max_entries: usize,
    overflow_policy: HistoryOverflowPolicy,
    overflowed: bool,
}

impl Default for History {
    fn default() -> Self {
        Self::new(1024, HistoryOverflowPolicy::default())
    }
}

impl History {
    pub fn new(max_entries: usize, overflow_policy: HistoryOverflowPolicy) -> Self {
        Self {
            entries: Vec::new(),
            cursors: HashMap::new(),
            max_entries,
            overflow_policy,
            overflowed: false,
        }
    }

    pub fn overflow_policy(&self) -> HistoryOverflowPolicy {
        self.overflow_policy
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a session-mutating command to the history, returning its
    /// sequence number. Once `max_entries` is exceeded the history is marked
    /// overflowed; subsequent behavior is governed by `overflow_policy`.
    pub fn append(&mut self, payload: Packet, type_mask: TypeMask) -> u64 {
        let seq = self.entries.len() as u64;
        if self.entries.len() >= self.max_entries {
            self.overflowed = true;
        } else {
            self.entries.push(Entry {
                seq,
                payload,
                canonical_response: None,
                type_mask,
            });
        }
        seq
    }

    pub fn set_canonical_response(&mut self, seq: u64, response: CanonicalResponse) {
        if let Some(entry) = self.entries.get_mut(seq as usize) {
            if entry.canonical_response.is_none() {
                entry.canonical_response = Some(response);
            }
        }
    }

    /// Whether a brand-new backend connection may be adopted for this
    /// session right now, per the configured overflow policy.
    pub fn can_adopt_new_backend(&self) -> bool {
        match self.overflow_policy {
            HistoryOverflowPolicy::DisablePooling => !self.overflowed,
            HistoryOverflowPolicy::ErrorOnAdoption => true,
        }
    }

    pub fn cursor(&self, backend: &str) -> usize {
        *self.cursors.get(backend).unwrap_or(&0)
    }

    pub fn entries_from(&self, backend: &str) -> &[Entry] {
        let start = self.cursor(backend).min(self.entries.len());
        &self.entries[start..]
    }

    pub fn advance_cursor(&mut self, backend: &str) {
        let cursor = self.cursors.entry(backend.to_string()).or_insert(0);
        *cursor += 1;
    }

    pub fn reset_cursor_for(&mut self, backend: &str) {
        self.cursors.insert(backend.to_string(), 0);
    }

    /// Compares a replayed response against the canonical response recorded
    /// the first time this entry ran. An entry with no canonical response
    /// yet recorded (e.g. the original run is still in flight) is treated
    /// as passing, since there's nothing to diverge from.
    pub fn compare_replay(&self, seq: u64, replayed: &CanonicalResponse) -> ComparatorOutcome {
        match self.entries.get(seq as usize).and_then(|e| e.canonical_response.as_ref()) {
            Some(canonical) => canonical.compare(replayed),
            None => ComparatorOutcome::Equivalent,
        }
    }

    /// `COM_CHANGE_USER` re-authenticates the connection as a different user
    /// and wipes every session-write recorded under the old one; a backend
    /// adopted later replays nothing from before the switch.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursors.clear();
        self.overflowed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(bytes: &[u8]) -> Packet {
        Packet::from_vec(bytes.to_vec())
    }

    #[test]
    fn overflow_policy_from_str_matches_cli_values() {
        assert_eq!(
            HistoryOverflowPolicy::from_str("disable_pooling").unwrap(),
            HistoryOverflowPolicy::DisablePooling
        );
        assert_eq!(
            HistoryOverflowPolicy::from_str("error_on_adoption").unwrap(),
            HistoryOverflowPolicy::ErrorOnAdoption
        );
        assert!(HistoryOverflowPolicy::from_str("bogus").is_err());
    }

    #[test]
    fn append_assigns_increasing_sequence_numbers() {
        let mut history = History::new(10, HistoryOverflowPolicy::DisablePooling);
        let seq0 = history.append(pkt(b"SELECT 1"), TypeMask::READ);
        let seq1 = history.append(pkt(b"SELECT 2"), TypeMask::READ);
        assert_eq!(seq0, 0);
        assert_eq!(seq1, 1);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn disable_pooling_blocks_adoption_once_overflowed() {
        let mut history = History::new(1, HistoryOverflowPolicy::DisablePooling);
        history.append(pkt(b"SET @x=1"), TypeMask::SESSION_WRITE);
        assert!(history.can_adopt_new_backend());
        history.append(pkt(b"SET @y=2"), TypeMask::SESSION_WRITE);
        assert!(history.is_overflowed());
        assert!(!history.can_adopt_new_backend());
    }

    #[test]
    fn error_on_adoption_never_blocks_the_checkout_itself() {
        let mut history = History::new(1, HistoryOverflowPolicy::ErrorOnAdoption);
        history.append(pkt(b"SET @x=1"), TypeMask::SESSION_WRITE);
        history.append(pkt(b"SET @y=2"), TypeMask::SESSION_WRITE);
        assert!(history.is_overflowed());
        assert!(history.can_adopt_new_backend());
    }

    #[test]
    fn cursor_tracks_independently_per_backend() {
        let mut history = History::new(10, HistoryOverflowPolicy::DisablePooling);
        history.append(pkt(b"SET @x=1"), TypeMask::SESSION_WRITE);
        history.append(pkt(b"SET @y=2"), TypeMask::SESSION_WRITE);
        history.advance_cursor("backend-a");
        assert_eq!(history.entries_from("backend-a").len(), 1);
        assert_eq!(history.entries_from("backend-b").len(), 2);
    }

    #[test]
    fn comparator_detects_mismatched_replay() {
        let mut history = History::new(10, HistoryOverflowPolicy::DisablePooling);
        let seq = history.append(pkt(b"INSERT INTO t VALUES (1)"), TypeMask::WRITE);
        history.set_canonical_response(
            seq,
            CanonicalResponse::Ok { affected_rows: 1, last_insert_id: 5 },
        );
        let replayed = CanonicalResponse::Ok { affected_rows: 1, last_insert_id: 9 };
        assert_eq!(history.compare_replay(seq, &replayed), ComparatorOutcome::Mismatch);
    }

    #[test]
    fn clear_drops_entries_cursors_and_overflow_flag() {
        let mut history = History::new(1, HistoryOverflowPolicy::DisablePooling);
        history.append(pkt(b"SET @x=1"), TypeMask::SESSION_WRITE);
        history.append(pkt(b"SET @y=2"), TypeMask::SESSION_WRITE);
        history.advance_cursor("backend-a");
        assert!(history.is_overflowed());
        history.clear();
        assert!(history.is_empty());
        assert!(!history.is_overflowed());
        assert_eq!(history.cursor("backend-a"), 0);
    }
}
