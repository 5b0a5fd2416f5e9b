//! Proxy-internal error type.
//!
//! Errors that originate inside the proxy itself (as opposed to being
//! relayed verbatim from a backend's own ERR packet) are represented here so
//! that every failure mode has a documented SQLSTATE/error-code pairing a
//! MySQL client can render sensibly.

use crate::protocol::mysql::error_codes::ErrorKind as SqlErrorKind;
use crate::protocol::mysql::packet::writers::write_err_packet;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use thiserror::Error;
use tokio::io::AsyncWrite;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("packet of {len} bytes exceeds the negotiated maximum of {max} bytes")]
    OversizedPacket { len: usize, max: usize },

    #[error("authentication failed for user {user:?}")]
    AuthFailed { user: String },

    #[error("unknown command code {0:#x}")]
    UnknownCommand(u8),

    #[error("no healthy backend is available to serve this session")]
    NoBackendAvailable,

    #[error("backend {backend} refused the connection")]
    BackendRefused { backend: String },

    #[error("backend {backend} timed out")]
    BackendTimeout { backend: String },

    #[error("unknown prepared-statement handler (external id {external_id})")]
    UnknownPsId { external_id: u32 },

    #[error("session history for backend {backend} overflowed; new-backend adoption is disabled")]
    HistoryOverflow { backend: String },

    #[error("replayed statement {seq} produced a different result on backend {backend}")]
    HistoryMismatch { seq: u64, backend: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// The MySQL/MariaDB error this condition is reported to the client as.
    pub fn sql_error_kind(&self) -> SqlErrorKind {
        match self {
            ProxyError::MalformedPacket(_) => SqlErrorKind::ER_MALFORMED_PACKET,
            ProxyError::OversizedPacket { .. } => SqlErrorKind::ER_NET_PACKET_TOO_LARGE,
            ProxyError::AuthFailed { .. } => SqlErrorKind::ER_ACCESS_DENIED_ERROR,
            ProxyError::UnknownCommand(_) => SqlErrorKind::ER_UNKNOWN_COM_ERROR,
            ProxyError::NoBackendAvailable
            | ProxyError::BackendRefused { .. }
            | ProxyError::BackendTimeout { .. }
            | ProxyError::HistoryOverflow { .. }
            | ProxyError::HistoryMismatch { .. } => SqlErrorKind::ER_OUT_OF_RESOURCES,
            ProxyError::UnknownPsId { .. } => SqlErrorKind::ER_UNKNOWN_STMT_HANDLER,
            ProxyError::Io(_) => SqlErrorKind::ER_UNKNOWN_COM_ERROR,
        }
    }

    pub fn sqlstate(&self) -> &'static [u8] {
        self.sql_error_kind().sqlstate()
    }

    pub fn error_code(&self) -> u16 {
        self.sql_error_kind() as u16
    }

    /// Writes this error to the client as a standard ERR packet, using the
    /// synthetic error's own message text.
    pub async fn write_to<W>(&self, writer: &mut PacketWriter<W>) -> std::io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        write_err_packet(self.sql_error_kind(), self.to_string().as_bytes(), writer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_packet_maps_to_net_packet_too_large() {
        let err = ProxyError::OversizedPacket {
            len: 20_000_000,
            max: 16_777_215,
        };
        assert_eq!(err.sql_error_kind(), SqlErrorKind::ER_NET_PACKET_TOO_LARGE);
        assert_eq!(err.sqlstate(), b"08S01");
    }

    #[test]
    fn unknown_ps_id_maps_to_unknown_stmt_handler() {
        let err = ProxyError::UnknownPsId { external_id: 7 };
        assert_eq!(err.sql_error_kind(), SqlErrorKind::ER_UNKNOWN_STMT_HANDLER);
        assert_eq!(err.error_code(), 1243);
    }

    #[test]
    fn auth_failed_maps_to_access_denied() {
        let err = ProxyError::AuthFailed {
            user: "root".to_string(),
        };
        assert_eq!(err.sql_error_kind(), SqlErrorKind::ER_ACCESS_DENIED_ERROR);
        assert_eq!(err.sqlstate(), b"28000");
    }
}
