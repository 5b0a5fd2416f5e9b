//! MySQL/MariaDB server error codes and their SQLSTATE mappings.
//!
//! Values match the `mysqld_ername.h` / `mysqld_error.h` tables shipped with
//! MariaDB; only the subset the proxy itself ever emits (as opposed to
//! relaying from a backend) is enumerated here.

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum ErrorKind {
    ER_ACCESS_DENIED_ERROR = 1045,
    ER_ACCESS_DENIED_NO_PASSWORD_ERROR = 1698,
    ER_UNKNOWN_COM_ERROR = 1047,
    ER_NET_PACKET_TOO_LARGE = 1153,
    ER_MALFORMED_PACKET = 1835,
    ER_UNKNOWN_STMT_HANDLER = 1243,
    ER_OUT_OF_RESOURCES = 1041,
    ER_CON_COUNT_ERROR = 1040,
}

impl ErrorKind {
    /// The 5-character SQLSTATE code associated with this error, as sent on
    /// the wire immediately after the `#` marker in an ERR packet.
    pub fn sqlstate(&self) -> &'static [u8] {
        match self {
            ErrorKind::ER_ACCESS_DENIED_ERROR => b"28000",
            ErrorKind::ER_ACCESS_DENIED_NO_PASSWORD_ERROR => b"28000",
            ErrorKind::ER_UNKNOWN_COM_ERROR => b"08S01",
            ErrorKind::ER_NET_PACKET_TOO_LARGE => b"08S01",
            ErrorKind::ER_MALFORMED_PACKET => b"08S01",
            ErrorKind::ER_UNKNOWN_STMT_HANDLER => b"HY000",
            ErrorKind::ER_OUT_OF_RESOURCES => b"HY000",
            ErrorKind::ER_CON_COUNT_ERROR => b"08004",
        }
    }
}
