use crate::backend::backend_mgr::BackendMgr;
use crate::backend::{DbConnPhase, DbUserConnLifeCycle};
use crate::classifier::{classify_with_tmp_tables, ClassifierOptions, TypeMask};
use crate::protocol::mysql::basic::HandshakeResponse;
use crate::protocol::mysql::constants::CommandCode;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::*;
use crate::server::auth::{gen_user_salt, Authenticator};
use crate::server::forwarder::query_forward::QueryForwarder;
use crate::server::forwarder::reset_conn_forward::ResetConnForwarder;
use crate::server::forwarder::stmt_prepare_forward::StmtPrepareForwarder;
use crate::server::forwarder::{change_user_forward, ComForwarder, GenericComForwarder};
use crate::server::{init_sql_com_labels, ProxyServer};
use crate::session::history::{CanonicalResponse, ComparatorOutcome, HistoryOverflowPolicy};
use crate::session::reply_tracker::{ReplyProgress, ReplyTracker};
use crate::session::{ClientSession, SharedClientSession};

use async_trait::async_trait;
use common::metrics::common_labels;
use common::metrics::metric_def::PROXY_COM_LATENCY;
use hashbrown::HashMap;
use mysql_common::constants::CapabilityFlags;
use num_traits::FromPrimitive;
use rustls::server::ServerConfig;
use std::borrow::BorrowMut;
use std::io::Error;
use std::ops::DerefMut;
use std::sync::Arc;
use std::thread;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_rustls::rustls;
use tracing::{debug, warn};

pub struct HaentglServer<A> {
    sql_com_labels: HashMap<u8, Vec<(&'static str, String)>>,
    backend_mgr: Arc<BackendMgr>,
    authenticator: A,
    history_max_entries: usize,
    history_overflow_policy: HistoryOverflowPolicy,
}

impl<A: Authenticator> HaentglServer<A> {
    pub fn new(backend_mgr: Arc<BackendMgr>, authenticator: A) -> Self {
        Self {
            sql_com_labels: init_sql_com_labels().clone(),
            backend_mgr,
            authenticator,
            history_max_entries: 1024,
            history_overflow_policy: HistoryOverflowPolicy::default(),
        }
    }

    pub fn with_history_config(
        mut self,
        history_max_entries: usize,
        history_overflow_policy: HistoryOverflowPolicy,
    ) -> Self {
        self.history_max_entries = history_max_entries;
        self.history_overflow_policy = history_overflow_policy;
        self
    }

    pub async fn connect<'a, R, W>(
        &'a self,
        reader: R,
        mut writer: W,
        #[cfg(feature = "tls")] tls_conf: &Option<Arc<ServerConfig>>,
    ) -> Result<(), Error>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let salt = gen_user_salt();
        #[cfg(feature = "tls")]
        let (seq, handshake_response, handshake_pkt, mut reader) =
            self.on_conn(reader, &mut writer, salt, tls_conf).await?;
        #[cfg(not(feature = "tls"))]
        let (seq, handshake_response, handshake_pkt, mut reader) =
            self.on_conn(reader, &mut writer, salt, None).await?;

        let pool_ref = self.backend_mgr.connect_to_backend().await?;

        // FIXME: when pool is full, it will block here.
        let pooled_conn = pool_ref.get().await.unwrap();
        let conn_uid = &pooled_conn.id;
        let backend_conn = &pooled_conn.inner_conn;
        let mut backend_client_guard = backend_conn.lock().await;

        let conn_life_cycle = { pooled_conn.get_conn_life_cycle().await };
        let (backend_reader, backend_writer) = backend_client_guard.deref_mut();
        backend_writer.reset_seq();

        let mut mut_writer = PacketWriter::new(writer);
        let auth_result = if let Some(conn_phase) = conn_life_cycle.conn_phase() {
            match conn_phase {
                DbConnPhase::Command => {
                    debug!("ProxySrv  ConnPhase == Command  {conn_uid:?}.");
                    self.authenticator
                        .continue_auth::<R, W>(
                            backend_writer,
                            backend_reader,
                            &mut mut_writer,
                            &mut reader,
                            seq,
                            &handshake_response,
                        )
                        .await
                }
                _ => {
                    debug!("ProxySrv ConnPhase == Connection {conn_uid:?}.");
                    self.authenticator
                        .reply_handshake_response::<R, W>(
                            backend_writer,
                            backend_reader,
                            &mut mut_writer,
                            &mut reader,
                            seq,
                            (&handshake_pkt, &handshake_response),
                        )
                        .await
                }
            }
        } else {
            debug!("ProxySrv First authentication on current conn {conn_uid:?}.");
            self.authenticator
                .reply_handshake_response::<R, W>(
                    backend_writer,
                    backend_reader,
                    &mut mut_writer,
                    &mut reader,
                    seq,
                    (&handshake_pkt, &handshake_response),
                )
                .await
        };
        let db_user = handshake_response.db_user_string();
        match auth_result {
            Ok(()) => {
                pooled_conn
                    .update_conn_life_cycle(DbUserConnLifeCycle::new_conn_life_cycle(
                        db_user,
                        DbConnPhase::Command,
                    ))
                    .await;
                debug!("Authentication success Set ConnPhase=Command");
            }
            Err(_e) => {
                pooled_conn
                    .update_conn_life_cycle(DbUserConnLifeCycle::new_conn_life_cycle(
                        db_user,
                        DbConnPhase::Connection,
                    ))
                    .await;
                debug!("Authentication failure does not execute the command");
                return Ok(());
            }
        }

        let session: SharedClientSession = ClientSession::new(
            conn_uid.clone(),
            handshake_response.client_flag,
            self.history_max_entries,
            self.history_overflow_policy,
        )
        .shared();

        // Replay whatever this session's history holds onto the backend it
        // was just handed, confirming the cursor for this backend starts
        // exactly where the pooled connection's prior occupant left it.
        Self::replay_history_onto_backend(
            &session,
            conn_uid,
            handshake_response.client_flag,
            backend_writer,
            backend_reader,
        )
        .await?;

        let borrow_writer = mut_writer.borrow_mut();
        self.on_com(
            &mut reader,
            borrow_writer,
            backend_writer,
            backend_reader,
            &handshake_response,
            session,
        )
        .await
    }

    pub async fn initialize_async(&self) -> Result<(), Error> {
        self.backend_mgr.prepare_backend_conn_pool().await
    }

    /// Replays every entry this session's history has recorded but hasn't yet
    /// confirmed against `backend_id`, comparing each replayed reply against
    /// the canonical response captured the first time it ran. A session's
    /// history is always empty the moment it is created, so today this is a
    /// zero-iteration no-op; it becomes load-bearing once a session survives
    /// across more than one backend connection (see DESIGN.md).
    async fn replay_history_onto_backend(
        session: &SharedClientSession,
        backend_id: &str,
        capabilities: CapabilityFlags,
        backend_writer: &mut PacketWriter<OwnedWriteHalf>,
        backend_reader: &mut PacketReader<OwnedReadHalf>,
    ) -> Result<(), Error> {
        let entries = {
            let session_guard = session.lock().await;
            session_guard.history.entries_from(backend_id).to_vec()
        };
        for entry in entries {
            backend_writer.set_seq(0);
            backend_writer.write_all(&entry.payload)?;
            backend_writer.end_packet().await?;
            backend_writer.flush_all().await?;

            let mut tracker = ReplyTracker::new(capabilities);
            let canonical = loop {
                let pkt_opt = backend_reader.next_async().await?;
                let (_, pkt) = pkt_opt.ok_or_else(|| {
                    Error::new(std::io::ErrorKind::UnexpectedEof, "backend closed during history replay")
                })?;
                match tracker.advance(&pkt) {
                    ReplyProgress::Complete => {
                        let acc = tracker.accumulator();
                        break CanonicalResponse::Ok {
                            affected_rows: acc.affected_rows,
                            last_insert_id: acc.last_insert_id,
                        };
                    }
                    ReplyProgress::ErrorReceived => {
                        break CanonicalResponse::Err {
                            code: tracker.accumulator().error_code.unwrap_or(0),
                        };
                    }
                    _ => continue,
                }
            };

            let mut session_guard = session.lock().await;
            let outcome = session_guard.history.compare_replay(entry.seq, &canonical);
            session_guard.history.set_canonical_response(entry.seq, canonical);
            session_guard.history.advance_cursor(backend_id);
            drop(session_guard);
            if outcome == ComparatorOutcome::Mismatch {
                warn!("ProxySrv history replay mismatch at seq={} backend={backend_id}", entry.seq);
                return Err(Error::new(
                    std::io::ErrorKind::Other,
                    format!("replayed statement {} diverged on backend {backend_id}", entry.seq),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<A: Authenticator> ProxyServer for HaentglServer<A> {
    async fn on_conn<R, W>(
        &self,
        r: R,
        w: &mut W,
        scramble: [u8; 20],
        #[cfg(feature = "tls")] tls_conf: &Option<Arc<ServerConfig>>,
    ) -> Result<(u8, HandshakeResponse, Packet, PacketReader<R>), Error>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let mut client_reader = PacketReader::new(r);
        let mut client_writer = PacketWriter::new(w);
        let conn_id = thread::current().id().as_u64().get();
        #[cfg(feature = "tls")]
        let (seq, handshake_response, pkt) = self
            .authenticator
            .initial_handshake(
                conn_id,
                scramble,
                &mut client_reader,
                &mut client_writer,
                tls_conf,
            )
            .await?;
        #[cfg(not(feature = "tls"))]
        let (seq, handshake_response, pkt) = self
            .authenticator
            .initial_handshake(
                conn_id,
                scramble,
                &mut client_reader,
                &mut client_writer,
                &None,
            )
            .await?;
        Ok((seq, handshake_response, pkt, client_reader))
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_com<'a, R, W>(
        &self,
        client_reader: &mut PacketReader<R>,
        client_writer: &mut PacketWriter<W>,
        backend_writer: &mut PacketWriter<OwnedWriteHalf>,
        backend_reader: &mut PacketReader<OwnedReadHalf>,
        handshake_response: &'a HandshakeResponse,
        session: SharedClientSession,
    ) -> Result<(), Error>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        backend_writer.reset_seq();
        loop {
            let pkt_opt = client_reader.next_async().await?;
            if pkt_opt.is_none() {
                warn!("ProxySrv Receive EMPTY PKT: Malform packet error ");
                return Err(Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Malform packet error".to_string(),
                ));
            }
            let (seq, client_packet) = pkt_opt.unwrap();
            let recv_com_code = client_packet[0];
            let com_code = CommandCode::from_u8(recv_com_code).unwrap();
            // info!("ProxySrv on_com receive ComCode={:?} from client", com_code);

            let query_class = if com_code == CommandCode::ComQuery {
                let tmp_tables_snapshot = session.lock().await.tmp_tables.clone();
                Some(classify_with_tmp_tables(
                    &String::from_utf8_lossy(&client_packet[1..]),
                    ClassifierOptions::default(),
                    &tmp_tables_snapshot,
                ))
            } else {
                None
            };

            let mut pending_history_seq: Option<u64> = None;
            {
                let mut session_guard = session.lock().await;
                match com_code {
                    CommandCode::ComQuery => {
                        if let Some(class) = &query_class {
                            session_guard.txn.on_classified_statement(class);
                            if class.type_mask.contains(TypeMask::CREATE_TMP_TABLE) {
                                session_guard.tmp_tables.extend(class.tables.iter().cloned());
                            }
                            if class.type_mask.contains(TypeMask::SESSION_WRITE) {
                                pending_history_seq = Some(
                                    session_guard
                                        .history
                                        .append(client_packet.clone(), class.type_mask),
                                );
                            }
                        }
                    }
                    CommandCode::ComInitDB | CommandCode::ComSetOption => {
                        pending_history_seq = Some(
                            session_guard
                                .history
                                .append(client_packet.clone(), TypeMask::SESSION_WRITE),
                        );
                    }
                    CommandCode::ComStmtPrepare => {
                        pending_history_seq = Some(
                            session_guard
                                .history
                                .append(client_packet.clone(), TypeMask::PREPARE_STMT),
                        );
                    }
                    // COM_CHANGE_USER re-authenticates the connection and resets all
                    // per-session state rather than becoming part of it; ps_map/history
                    // are cleared below once the backend confirms the switch succeeded.
                    CommandCode::ComStmtReset if client_packet.len() >= 5 => {
                        let external_id =
                            byteorder::LittleEndian::read_u32(&client_packet[1..5]);
                        session_guard.ps_map.reset(external_id);
                    }
                    CommandCode::ComStmtSendLongData if client_packet.len() >= 7 => {
                        let external_id =
                            byteorder::LittleEndian::read_u32(&client_packet[1..5]);
                        let param_id = byteorder::LittleEndian::read_u16(&client_packet[5..7]);
                        session_guard
                            .ps_map
                            .append_long_data(external_id, param_id, &client_packet[7..]);
                    }
                    _ => {}
                }
            }

            let com_forwarder: Box<dyn ComForwarder<R, W>> = match com_code {
                CommandCode::ComStmtPrepare | CommandCode::ComStmtClose => {
                    Box::new(StmtPrepareForwarder {
                        com_code,
                        request: client_packet.clone(),
                        session: session.clone(),
                    })
                }
                CommandCode::ComQuery
                | CommandCode::ComStmtExecute
                | CommandCode::ComProcessInfo
                | CommandCode::ComFieldList
                | CommandCode::ComStmtFetch => Box::new(QueryForwarder {
                    com_code,
                    session: session.clone(),
                    pending_history_seq,
                    pending_error: tokio::sync::Mutex::new(None),
                }),
                CommandCode::ComQuit => Box::new(ResetConnForwarder),
                CommandCode::ComChangeUser => Box::new(change_user_forward::ChangeUserForwarder),
                _ => Box::new(GenericComForwarder),
            };
            com_forwarder
                .write_to_backend(
                    seq,
                    com_code,
                    handshake_response,
                    client_packet,
                    backend_writer,
                )
                .await?;

            let labels = self.sql_com_labels.get(&recv_com_code).unwrap();
            let _com_latency =
                common::metrics::MetricsTimer::new_with_labels(PROXY_COM_LATENCY, labels);
            let reply_pkt = com_forwarder
                .forward(
                    client_reader,
                    client_writer,
                    backend_writer,
                    backend_reader,
                    handshake_response,
                )
                .await?;

            // COM_INIT_DB/COM_SET_OPTION go through GenericComForwarder, which
            // relays a single OK/ERR packet and hands it back here; record its
            // canonical shape against the history entry appended above.
            if let (Some(seq), Some(pkt)) = (pending_history_seq, &reply_pkt) {
                if matches!(com_code, CommandCode::ComInitDB | CommandCode::ComSetOption) {
                    let mut tracker = ReplyTracker::new(handshake_response.client_flag);
                    let canonical = match tracker.advance(pkt) {
                        ReplyProgress::Complete => {
                            let acc = tracker.accumulator();
                            Some(CanonicalResponse::Ok {
                                affected_rows: acc.affected_rows,
                                last_insert_id: acc.last_insert_id,
                            })
                        }
                        ReplyProgress::ErrorReceived => tracker
                            .accumulator()
                            .error_code
                            .map(|code| CanonicalResponse::Err { code }),
                        _ => None,
                    };
                    if let Some(canonical) = canonical {
                        session.lock().await.history.set_canonical_response(seq, canonical);
                    }
                } else if com_code == CommandCode::ComStmtPrepare {
                    // The prepare reply has its own OK-with-stmt-id/ERR shape
                    // (not a plain OK), so the first byte alone tells us
                    // whether the backend accepted the statement.
                    let canonical = if pkt.first() == Some(&0xFF) {
                        pkt.get(1..3).map(|b| CanonicalResponse::Err {
                            code: byteorder::LittleEndian::read_u16(b),
                        })
                    } else {
                        Some(CanonicalResponse::Ok {
                            affected_rows: 0,
                            last_insert_id: 0,
                        })
                    };
                    if let Some(canonical) = canonical {
                        session.lock().await.history.set_canonical_response(seq, canonical);
                    }
                }
            }

            if let Some(class) = &query_class {
                if class.type_mask.intersects(TypeMask::COMMIT | TypeMask::ROLLBACK) {
                    session.lock().await.txn.on_command_ok();
                }
            }

            if com_code == CommandCode::ComChangeUser {
                // forward() only returns Ok once the backend's reply was an OK packet;
                // an ERR short-circuits with Err above, so reaching here means the user
                // switch succeeded and every prior prepared statement/session-write is gone.
                let mut session_guard = session.lock().await;
                session_guard.ps_map.clear();
                session_guard.history.clear();
                session_guard.txn.reset_on_change_user();
                session_guard.tmp_tables.clear();
            }

            if com_code == CommandCode::ComQuit {
                common::metrics::gauge_dec(
                    common::metrics::metric_def::PROXY_CURR_CONN,
                    1_f64,
                    Some(common_labels()),
                );
                break;
            }
        }
        Ok(())
    }

    async fn close(&self) {}
}
