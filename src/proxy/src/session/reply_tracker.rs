//! Tracks a backend's response to a single client command packet-by-packet,
//! so the proxy always knows whether a reply is still in flight and can
//! accumulate a canonical summary of it for [`super::history`] without
//! buffering the whole response.
//!
//! Handles both plain command replies (`COM_QUERY`, `COM_FIELD_LIST`,
//! `COM_STMT_FETCH`) and `COM_STMT_PREPARE`'s two-column-def-block shape, and
//! treats `LOCAL INFILE` as a first-class state rather than an unsupported
//! case.

use crate::protocol::mysql::basic::{ok_packet, read_length_encoded_number};
use crate::protocol::mysql::packet::Packet;
use mysql_common::constants::CapabilityFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyState {
    Start,
    ParamDefs,
    ParamDefsEof,
    ColumnDefs,
    ColumnDefsEof,
    Rows,
    LocalInfileEnd,
    Done,
    Err,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyProgress {
    InProgress,
    ResultSetStarted { column_count: u64 },
    RowsRead,
    Complete,
    ErrorReceived,
    LocalInfileRequested,
}

#[derive(Debug, Clone, Default)]
pub struct ReplyAccumulator {
    pub rows_read: u64,
    pub warnings: u16,
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub error_code: Option<u16>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareOkCounts {
    pub statement_id: u32,
    pub column_count: u16,
    pub param_count: u16,
    pub warning_count: u16,
}

/// Parses the fixed-format `COM_STMT_PREPARE` OK response:
/// `status(1)=0, statement_id(4), num_columns(2), num_params(2), reserved(1), warning_count(2)`.
pub fn parse_prepare_ok_counts(packet: &[u8]) -> Option<PrepareOkCounts> {
    if packet.len() < 12 || packet[0] != 0x00 {
        return None;
    }
    let statement_id = u32::from_le_bytes([packet[1], packet[2], packet[3], packet[4]]);
    let column_count = u16::from_le_bytes([packet[5], packet[6]]);
    let param_count = u16::from_le_bytes([packet[7], packet[8]]);
    let warning_count = u16::from_le_bytes([packet[10], packet[11]]);
    Some(PrepareOkCounts {
        statement_id,
        column_count,
        param_count,
        warning_count,
    })
}

#[derive(Debug)]
pub struct ReplyTracker {
    state: ReplyState,
    capabilities: CapabilityFlags,
    is_prepare: bool,
    columns_expected: u64,
    columns_seen: u64,
    params_expected: u64,
    params_seen: u64,
    acc: ReplyAccumulator,
}

impl ReplyTracker {
    pub fn new(capabilities: CapabilityFlags) -> Self {
        Self {
            state: ReplyState::Start,
            capabilities,
            is_prepare: false,
            columns_expected: 0,
            columns_seen: 0,
            params_expected: 0,
            params_seen: 0,
            acc: ReplyAccumulator::default(),
        }
    }

    pub fn for_prepare(capabilities: CapabilityFlags) -> Self {
        let mut tracker = Self::new(capabilities);
        tracker.is_prepare = true;
        tracker
    }

    pub fn accumulator(&self) -> &ReplyAccumulator {
        &self.acc
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, ReplyState::Done | ReplyState::Err)
    }

    fn deprecate_eof(&self) -> bool {
        self.capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
    }

    fn consume_ok(&mut self, packet: &Packet) {
        if let Ok((_, ok)) = ok_packet(packet, self.capabilities) {
            self.acc.affected_rows = ok.affected_rows;
            self.acc.last_insert_id = ok.last_insert_id;
            self.acc.warnings = ok.warnings;
        }
    }

    fn consume_err(&mut self, packet: &Packet) {
        if packet.len() >= 3 {
            self.acc.error_code = Some(u16::from_le_bytes([packet[1], packet[2]]));
        }
        self.acc.error_message = Some(String::from_utf8_lossy(&packet[1..]).into_owned());
    }

    /// Feeds the next packet of this reply through the state machine,
    /// reporting what kind of progress it represents.
    pub fn advance(&mut self, packet: &Packet) -> ReplyProgress {
        match self.state {
            ReplyState::Done | ReplyState::Err => ReplyProgress::Complete,

            ReplyState::Start => {
                if packet.is_err_packet() {
                    self.consume_err(packet);
                    self.state = ReplyState::Err;
                    return ReplyProgress::ErrorReceived;
                }
                if packet.is_local_in_file_packet() {
                    self.state = ReplyState::LocalInfileEnd;
                    return ReplyProgress::LocalInfileRequested;
                }
                if self.is_prepare {
                    let counts = parse_prepare_ok_counts(packet).unwrap_or_default();
                    self.params_expected = counts.param_count as u64;
                    self.columns_expected = counts.column_count as u64;
                    self.acc.warnings = counts.warning_count;
                    self.state = if self.params_expected > 0 {
                        ReplyState::ParamDefs
                    } else if self.columns_expected > 0 {
                        ReplyState::ColumnDefs
                    } else {
                        ReplyState::Done
                    };
                    return if matches!(self.state, ReplyState::Done) {
                        ReplyProgress::Complete
                    } else {
                        ReplyProgress::InProgress
                    };
                }
                if packet.is_ok_packet() {
                    self.consume_ok(packet);
                    self.state = ReplyState::Done;
                    return ReplyProgress::Complete;
                }
                let column_count = read_length_encoded_number(packet)
                    .map(|(_, n)| n)
                    .unwrap_or(0);
                self.columns_expected = column_count;
                self.columns_seen = 0;
                self.state = ReplyState::ColumnDefs;
                ReplyProgress::ResultSetStarted { column_count }
            }

            ReplyState::ParamDefs => {
                self.params_seen += 1;
                if self.params_seen >= self.params_expected {
                    self.state = if self.deprecate_eof() {
                        if self.columns_expected > 0 {
                            ReplyState::ColumnDefs
                        } else {
                            ReplyState::Done
                        }
                    } else {
                        ReplyState::ParamDefsEof
                    };
                }
                if matches!(self.state, ReplyState::Done) {
                    ReplyProgress::Complete
                } else {
                    ReplyProgress::InProgress
                }
            }

            ReplyState::ParamDefsEof => {
                self.state = if self.columns_expected > 0 {
                    ReplyState::ColumnDefs
                } else {
                    ReplyState::Done
                };
                if matches!(self.state, ReplyState::Done) {
                    ReplyProgress::Complete
                } else {
                    ReplyProgress::InProgress
                }
            }

            ReplyState::ColumnDefs => {
                self.columns_seen += 1;
                if self.columns_seen >= self.columns_expected {
                    if self.deprecate_eof() {
                        self.state = if self.is_prepare { ReplyState::Done } else { ReplyState::Rows };
                    } else {
                        self.state = ReplyState::ColumnDefsEof;
                    }
                }
                match self.state {
                    ReplyState::Done => ReplyProgress::Complete,
                    _ => ReplyProgress::InProgress,
                }
            }

            ReplyState::ColumnDefsEof => {
                self.state = if self.is_prepare { ReplyState::Done } else { ReplyState::Rows };
                match self.state {
                    ReplyState::Done => ReplyProgress::Complete,
                    _ => ReplyProgress::InProgress,
                }
            }

            ReplyState::Rows => {
                if packet.is_err_packet() {
                    self.consume_err(packet);
                    self.state = ReplyState::Err;
                    return ReplyProgress::ErrorReceived;
                }
                let result_set_ends = if self.deprecate_eof() {
                    packet.is_result_set_eof_packet()
                } else {
                    packet.is_eof_packet()
                };
                if result_set_ends {
                    if self.deprecate_eof() {
                        self.consume_ok(packet);
                    }
                    self.state = ReplyState::Done;
                    return ReplyProgress::Complete;
                }
                self.acc.rows_read += 1;
                ReplyProgress::RowsRead
            }

            ReplyState::LocalInfileEnd => {
                if packet.is_err_packet() {
                    self.consume_err(packet);
                    self.state = ReplyState::Err;
                    ReplyProgress::ErrorReceived
                } else {
                    self.consume_ok(packet);
                    self.state = ReplyState::Done;
                    ReplyProgress::Complete
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(bytes: Vec<u8>) -> Packet {
        Packet::from_vec(bytes)
    }

    #[test]
    fn simple_ok_completes_immediately() {
        let mut tracker = ReplyTracker::new(CapabilityFlags::empty());
        let ok = pkt(vec![0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00]);
        assert_eq!(tracker.advance(&ok), ReplyProgress::Complete);
        assert!(tracker.is_done());
        assert_eq!(tracker.accumulator().affected_rows, 1);
    }

    #[test]
    fn simple_err_completes_as_error() {
        let mut tracker = ReplyTracker::new(CapabilityFlags::empty());
        let err = pkt(vec![0xff, 0x15, 0x04, b'#'.to_owned(), b'4', b'2', b'0', b'0', b'0', b'b', b'o', b'o', b'm']);
        assert_eq!(tracker.advance(&err), ReplyProgress::ErrorReceived);
        assert!(tracker.is_done());
        assert_eq!(tracker.accumulator().error_code, Some(0x0415));
    }

    #[test]
    fn classic_eof_result_set_round_trip() {
        let mut tracker = ReplyTracker::new(CapabilityFlags::empty());
        assert_eq!(
            tracker.advance(&pkt(vec![0x02])),
            ReplyProgress::ResultSetStarted { column_count: 2 }
        );
        assert_eq!(tracker.advance(&pkt(vec![1, 2, 3])), ReplyProgress::InProgress);
        assert_eq!(tracker.advance(&pkt(vec![1, 2, 3])), ReplyProgress::InProgress);
        // classic EOF after column defs
        assert_eq!(tracker.advance(&pkt(vec![0xfe, 0x00, 0x00, 0x02, 0x00])), ReplyProgress::InProgress);
        assert_eq!(tracker.advance(&pkt(vec![b'r', b'o', b'w'])), ReplyProgress::RowsRead);
        // classic EOF ends the row stream
        assert_eq!(tracker.advance(&pkt(vec![0xfe, 0x00, 0x00, 0x02, 0x00])), ReplyProgress::Complete);
        assert!(tracker.is_done());
    }

    #[test]
    fn deprecate_eof_result_set_skips_eof_packets() {
        let mut tracker = ReplyTracker::new(CapabilityFlags::CLIENT_DEPRECATE_EOF);
        assert_eq!(
            tracker.advance(&pkt(vec![0x01])),
            ReplyProgress::ResultSetStarted { column_count: 1 }
        );
        assert_eq!(tracker.advance(&pkt(vec![1, 2, 3])), ReplyProgress::InProgress);
        assert_eq!(tracker.advance(&pkt(vec![b'r', b'o', b'w'])), ReplyProgress::RowsRead);
        let ok_as_eof = pkt(vec![0xfe, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]);
        assert_eq!(tracker.advance(&ok_as_eof), ReplyProgress::Complete);
        assert!(tracker.is_done());
    }

    #[test]
    fn prepare_with_params_and_columns() {
        let mut tracker = ReplyTracker::for_prepare(CapabilityFlags::empty());
        let prepare_ok = pkt(vec![
            0x00, 0x01, 0x00, 0x00, 0x00, // status, stmt_id=1
            0x01, 0x00, // num_columns = 1
            0x01, 0x00, // num_params = 1
            0x00, // reserved
            0x00, 0x00, // warnings
        ]);
        assert_eq!(tracker.advance(&prepare_ok), ReplyProgress::InProgress);
        // one param def, then EOF (non-deprecate)
        assert_eq!(tracker.advance(&pkt(vec![1, 2, 3])), ReplyProgress::InProgress);
        assert_eq!(tracker.advance(&pkt(vec![0xfe, 0, 0, 2, 0])), ReplyProgress::InProgress);
        // one column def, then EOF
        assert_eq!(tracker.advance(&pkt(vec![4, 5, 6])), ReplyProgress::InProgress);
        assert_eq!(tracker.advance(&pkt(vec![0xfe, 0, 0, 2, 0])), ReplyProgress::Complete);
        assert!(tracker.is_done());
    }

    #[test]
    fn local_infile_is_a_first_class_state() {
        let mut tracker = ReplyTracker::new(CapabilityFlags::empty());
        let local_infile = pkt(vec![0xfb, b'/', b't', b'm', b'p', b'/', b'f']);
        assert_eq!(tracker.advance(&local_infile), ReplyProgress::LocalInfileRequested);
        assert!(!tracker.is_done());
        let final_ok = pkt(vec![0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]);
        assert_eq!(tracker.advance(&final_ok), ReplyProgress::Complete);
        assert!(tracker.is_done());
    }
}
