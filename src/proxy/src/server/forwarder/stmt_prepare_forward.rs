use crate::async_packet_read;
use crate::parse_err_packet;
use crate::protocol::mysql::basic::HandshakeResponse;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::Packet;
use crate::server::forwarder::ComForwarder;
use crate::session::SharedClientSession;

use crate::protocol::mysql::constants::CommandCode;
use async_trait::async_trait;
use byteorder::ByteOrder;
use mysql_common::constants::CapabilityFlags;
use std::io::{Error, Write};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub struct StmtPrepareForwarder {
    pub com_code: CommandCode,
    /// The client's original packet, captured before `write_to_backend`
    /// rewrites any id it carries: for `COM_STMT_CLOSE` this is the
    /// client-visible *external* statement id.
    pub request: Packet,
    pub session: SharedClientSession,
}

impl StmtPrepareForwarder {
    async fn forward_prepare_stmt<W>(
        &self,
        client_writer: &mut PacketWriter<W>,
        backend_reader: &mut PacketReader<OwnedReadHalf>,
        handshake: &HandshakeResponse,
    ) -> Result<Option<Packet>, Error>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let (seq, packet) = async_packet_read!(backend_reader);
        let capabilities = handshake.client_flag;
        let is_client_deprecate_eof = capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF);
        if packet.is_err_packet() {
            parse_err_packet!(capabilities, packet, "stmt_prepare_forward ERR");
            client_writer.set_seq(seq);
            client_writer.write_all(&packet)?;
            client_writer.end_packet().await?;
            return match client_writer.flush_all().await {
                Ok(()) => Ok(Some(packet)),
                Err(e) => Err(e),
            };
        }
        if !packet.is_ok_packet() {
            unreachable!()
        }

        let internal_id = byteorder::LittleEndian::read_u32(&packet[1..5]);
        let column = byteorder::LittleEndian::read_u16(&packet[5..]);
        let params = byteorder::LittleEndian::read_u16(&packet[7..]);

        // The client must only ever see the external id we hand back here;
        // the real backend id stays behind in the PS map.
        let external_id = {
            let mut session = self.session.lock().await;
            let backend_id = session.backend_id.clone();
            let external_id = session.ps_map.allocate(params, None);
            session.ps_map.bind_backend_id(external_id, &backend_id, internal_id);
            external_id
        };
        let mut rewritten = packet.to_vec();
        rewritten[1..5].copy_from_slice(&external_id.to_le_bytes());

        client_writer.set_seq(seq);
        client_writer.write_all(&rewritten)?;
        client_writer.end_packet().await?;

        let mut expected_packets = column + params;
        if !is_client_deprecate_eof {
            if column > 0 {
                expected_packets += 1
            }
            if params > 0 {
                expected_packets += 1
            }
        }
        for _idx in 0..expected_packets {
            self.forward_one_packet(client_writer, backend_reader, false)
                .await?;
        }
        match client_writer.flush_all().await {
            Ok(()) => Ok(Some(Packet::from_vec(rewritten))),
            Err(e) => Err(e),
        }
    }

    async fn forward_close_stmt(&self) -> Result<Option<Packet>, Error> {
        let external_id = byteorder::LittleEndian::read_u32(&self.request[1..5]);
        let mut session = self.session.lock().await;
        session.ps_map.remove(external_id);
        Ok(None)
    }
}

#[async_trait]
impl<R, W> ComForwarder<R, W> for StmtPrepareForwarder
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    async fn forward(
        &self,
        _: &mut PacketReader<R>,
        client_writer: &mut PacketWriter<W>,
        _: &mut PacketWriter<OwnedWriteHalf>,
        backend_reader: &mut PacketReader<OwnedReadHalf>,
        handshake: &HandshakeResponse,
    ) -> Result<Option<Packet>, Error> {
        match self.com_code {
            CommandCode::ComStmtPrepare => {
                self.forward_prepare_stmt(client_writer, backend_reader, handshake)
                    .await
            }
            CommandCode::ComStmtClose => self.forward_close_stmt().await,
            _ => unreachable!(),
        }
    }

    /// `COM_STMT_CLOSE` carries the client-visible external id; translate it
    /// to this session's backend-internal id before it reaches the real
    /// backend. Unknown ids are dropped rather than forwarded, since there is
    /// nothing sensible to close on the backend for an id it never issued.
    async fn write_to_backend(
        &self,
        seq: u8,
        com_code: CommandCode,
        _handshake_response: &HandshakeResponse,
        client_packet: Packet,
        backend_writer: &mut PacketWriter<OwnedWriteHalf>,
    ) -> Result<(), Error> {
        if com_code != CommandCode::ComStmtClose || client_packet.len() < 5 {
            backend_writer.set_seq(seq);
            backend_writer.write_all(&client_packet)?;
            backend_writer.end_packet().await?;
            return backend_writer.flush_all().await;
        }
        let external_id = byteorder::LittleEndian::read_u32(&client_packet[1..5]);
        let internal_id = {
            let session = self.session.lock().await;
            let backend_id = session.backend_id.clone();
            session.ps_map.internal_id(external_id, &backend_id)
        };
        let Some(internal_id) = internal_id else {
            tracing::warn!("ProxySrv COM_STMT_CLOSE for unknown statement id {external_id}, dropping");
            return Ok(());
        };
        let mut rewritten = client_packet.to_vec();
        rewritten[1..5].copy_from_slice(&internal_id.to_le_bytes());
        backend_writer.set_seq(seq);
        backend_writer.write_all(&rewritten)?;
        backend_writer.end_packet().await?;
        backend_writer.flush_all().await
    }
}
