use crate::async_packet_read;
use crate::error::ProxyError;
use crate::parse_err_packet;
use crate::protocol::mysql::basic::{eof_server_status, ok_packet, HandshakeResponse};
use crate::protocol::mysql::constants::CommandCode;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::Packet;
use crate::server::forwarder::ComForwarder;
use crate::session::history::CanonicalResponse;
use crate::session::reply_tracker::{ReplyProgress, ReplyTracker};
use crate::session::SharedClientSession;

use async_trait::async_trait;
use byteorder::ByteOrder;
use mysql_common::constants::{CapabilityFlags, StatusFlags};
use std::io::Write;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::warn;

pub struct QueryForwarder {
    pub com_code: CommandCode,
    pub session: SharedClientSession,
    /// Set by the caller right after appending a `COM_QUERY` session-write to
    /// history; the first reply packet's canonical shape is recorded against
    /// this sequence number once it arrives. `None` for everything else
    /// (reads never get a history entry in the first place).
    pub pending_history_seq: Option<u64>,
    /// Set by `write_to_backend` when a `COM_STMT_EXECUTE` names a statement
    /// id this session never prepared; `forward` emits it to the client
    /// instead of waiting on a backend reply that was never sent.
    pub pending_error: tokio::sync::Mutex<Option<(u8, ProxyError)>>,
}

impl QueryForwarder {
    #[allow(clippy::too_many_arguments)]
    async fn forward_query<R, W>(
        &self,
        handshake: &HandshakeResponse,
        client_reader: &mut PacketReader<R>,
        backend_writer: &mut PacketWriter<OwnedWriteHalf>,
        backend_reader: &mut PacketReader<OwnedReadHalf>,
        client_writer: &mut PacketWriter<W>,
    ) -> Result<(), std::io::Error>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let capabilities = handshake.client_flag;
        loop {
            let response_packet = self
                .forward_one_packet(client_writer, backend_reader, false)
                .await?;
            // The first reply packet alone tells us whether this command is
            // OK, ERR, LOCAL INFILE, or the start of a result set; feed it
            // through the tracker rather than re-deriving that by hand, and
            // use its accumulator to record a canonical response for history.
            let mut tracker = ReplyTracker::new(capabilities);
            let status_flag = match tracker.advance(&response_packet) {
                ReplyProgress::Complete => {
                    client_writer.flush_all().await?;
                    self.record_canonical(|acc| CanonicalResponse::Ok {
                        affected_rows: acc.affected_rows,
                        last_insert_id: acc.last_insert_id,
                    }, &tracker)
                        .await;
                    let (_, ok_pkt) = ok_packet(&response_packet, capabilities).unwrap();
                    ok_pkt.status_flags
                }
                ReplyProgress::ErrorReceived => {
                    parse_err_packet!(capabilities, response_packet, "forward_query ERR");
                    if let Some(code) = tracker.accumulator().error_code {
                        self.record_canonical(|_| CanonicalResponse::Err { code }, &tracker)
                            .await;
                    }
                    client_writer.flush_all().await?;
                    return Ok(());
                }
                ReplyProgress::LocalInfileRequested => {
                    self.forward_local_infile(capabilities, client_reader, backend_writer, backend_reader, client_writer)
                        .await?;
                    return Ok(());
                }
                ReplyProgress::ResultSetStarted { .. } => {
                    self.forward_result(handshake, backend_reader, client_writer)
                        .await?
                }
                other => unreachable!("unexpected first reply progress {other:?}"),
            };
            if !status_flag.contains(StatusFlags::SERVER_MORE_RESULTS_EXISTS) {
                break;
            }
        }
        Ok(())
    }

    /// Records a canonical response for the pending history entry, if any.
    /// `f` only runs when there is one, so callers don't build a
    /// `CanonicalResponse` nobody will read.
    async fn record_canonical(
        &self,
        f: impl FnOnce(&crate::session::reply_tracker::ReplyAccumulator) -> CanonicalResponse,
        tracker: &ReplyTracker,
    ) {
        if let Some(seq) = self.pending_history_seq {
            let canonical = f(tracker.accumulator());
            self.session.lock().await.history.set_canonical_response(seq, canonical);
        }
    }

    /// Relays a `LOCAL INFILE` request: the backend has already asked for a
    /// file (the `response_packet` that triggered this), so the client's
    /// next packets are raw file-data chunks, not command packets. Relay
    /// each one straight to the backend until the client sends an empty
    /// packet, then let the backend's trailing OK/ERR be consumed by the
    /// caller's normal response handling.
    async fn forward_local_infile<R, W>(
        &self,
        capabilities: CapabilityFlags,
        client_reader: &mut PacketReader<R>,
        backend_writer: &mut PacketWriter<OwnedWriteHalf>,
        backend_reader: &mut PacketReader<OwnedReadHalf>,
        client_writer: &mut PacketWriter<W>,
    ) -> Result<(), std::io::Error>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        loop {
            let (seq, chunk) = async_packet_read!(client_reader);
            backend_writer.set_seq(seq);
            backend_writer.write_all(&chunk)?;
            backend_writer.end_packet().await?;
            backend_writer.flush_all().await?;
            if chunk.is_empty() {
                break;
            }
        }
        let response_packet = self
            .forward_one_packet(client_writer, backend_reader, true)
            .await?;
        if response_packet.is_err_packet() {
            parse_err_packet!(capabilities, response_packet, "forward_local_infile ERR");
        }
        Ok(())
    }

    async fn forward_result<W>(
        &self,
        handshake: &HandshakeResponse,
        backend_reader: &mut PacketReader<OwnedReadHalf>,
        client_writer: &mut PacketWriter<W>,
    ) -> Result<StatusFlags, std::io::Error>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let client_capability = handshake.client_flag;
        let client_deprecate_eof =
            client_capability.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF);
        if !client_deprecate_eof {
            let resp_packet = loop {
                let response_packet = self
                    .forward_one_packet(client_writer, backend_reader, false)
                    .await?;
                if response_packet.is_eof_packet() {
                    break response_packet;
                }
            };
            let status_code = byteorder::LittleEndian::read_u16(&resp_packet[3..]);
            if let Some(status_flags) = StatusFlags::from_bits(status_code) {
                if status_flags.contains(StatusFlags::SERVER_STATUS_CURSOR_EXISTS) {
                    // debug!("ProxySrv forward_result SERVER_STATUS_CURSOR_EXISTS ");
                    client_writer.flush_all().await?;
                    return Ok(status_flags);
                }
            }
        }
        self.forward_until_result_end(handshake, backend_reader, client_writer)
            .await
    }

    async fn forward_until_result_end<W>(
        &self,
        handshake: &HandshakeResponse,
        backend_reader: &mut PacketReader<OwnedReadHalf>,
        client_writer: &mut PacketWriter<W>,
    ) -> Result<StatusFlags, std::io::Error>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let client_capability = handshake.client_flag;
        let client_deprecate_eof =
            client_capability.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF);
        loop {
            let response_packet = self
                .forward_one_packet(client_writer, backend_reader, false)
                .await?;

            if response_packet.is_err_packet() {
                parse_err_packet!(
                    client_capability,
                    response_packet,
                    "ComQuery forward_until_result_end ERR"
                );
                client_writer.flush_all().await?;
                break;
            }
            if !client_deprecate_eof {
                if response_packet.is_eof_packet() {
                    client_writer.flush_all().await?;
                    let (_, status_flag) = eof_server_status(&response_packet).unwrap();
                    return Ok(status_flag);
                }
            } else if response_packet.is_result_set_eof_packet() {
                let (_, ok_pkt) = ok_packet(&response_packet, client_capability).unwrap();
                client_writer.flush_all().await?;
                return Ok(ok_pkt.status_flags);
            }
        }
        Ok(StatusFlags::default())
    }
}

#[async_trait]
impl<R, W> ComForwarder<R, W> for QueryForwarder
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    async fn forward(
        &self,
        client_reader: &mut PacketReader<R>,
        client_writer: &mut PacketWriter<W>,
        backend_writer: &mut PacketWriter<OwnedWriteHalf>,
        backend_reader: &mut PacketReader<OwnedReadHalf>,
        handshake: &HandshakeResponse,
    ) -> Result<Option<Packet>, std::io::Error> {
        if let Some((reply_seq, err)) = self.pending_error.lock().await.take() {
            // write_to_backend never sent anything for this command; the
            // backend has nothing to reply with, so answer the client here.
            client_writer.set_seq(reply_seq);
            err.write_to(client_writer).await?;
            client_writer.flush_all().await?;
            return Ok(None);
        }
        let query_rs = match self.com_code {
            CommandCode::ComQuery | CommandCode::ComStmtExecute | CommandCode::ComProcessInfo => {
                self.forward_query(handshake, client_reader, backend_writer, backend_reader, client_writer)
                    .await
            }
            CommandCode::ComFieldList | CommandCode::ComStmtFetch => self
                .forward_until_result_end(handshake, backend_reader, client_writer)
                .await
                .map(|_| ()),
            _ => {
                unreachable!("not supported com_code = {:?}", self.com_code);
            }
        };
        match query_rs {
            Ok(()) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `COM_STMT_EXECUTE` carries the client-visible external statement id;
    /// rewrite it to this session's backend-internal id (and splice back
    /// type info if the client omitted it) before handing the packet to the
    /// default forwarding behavior.
    async fn write_to_backend(
        &self,
        seq: u8,
        com_code: CommandCode,
        _handshake_response: &HandshakeResponse,
        client_packet: Packet,
        backend_writer: &mut PacketWriter<OwnedWriteHalf>,
    ) -> Result<(), std::io::Error> {
        let payload = if com_code == CommandCode::ComStmtExecute && client_packet.len() >= 5 {
            let external_id = byteorder::LittleEndian::read_u32(&client_packet[1..5]);
            let rewritten = {
                let mut session = self.session.lock().await;
                let backend_id = session.backend_id.clone();
                session.ps_map.rewrite_execute(external_id, &backend_id, client_packet.to_vec())
            };
            match rewritten {
                Ok(bytes) => Packet::from_vec(bytes),
                Err(_) => {
                    warn!("ProxySrv unknown prepared-statement id {external_id} in COM_STMT_EXECUTE, answering ER_UNKNOWN_STMT_HANDLER");
                    *self.pending_error.lock().await =
                        Some((seq.wrapping_add(1), ProxyError::UnknownPsId { external_id }));
                    return Ok(());
                }
            }
        } else {
            client_packet
        };
        backend_writer.set_seq(seq);
        backend_writer.write_all(&payload)?;
        backend_writer.end_packet().await?;
        backend_writer.flush_all().await
    }
}
