//! Character set / collation IDs used in the handshake and `COM_CHANGE_USER`
//! packets. IDs match the MariaDB `information_schema.COLLATIONS` table.

use std::collections::HashMap;
use std::sync::OnceLock;

pub const UTF8_GENERAL_CI: u8 = 33;
pub const UTF8MB4_GENERAL_CI: u8 = 45;
pub const UTF8_MB4_GENERAL_CI: u8 = UTF8MB4_GENERAL_CI;
pub const BINARY: u8 = 63;

pub const DEFAULT_COLLATION_ID: u8 = UTF8_GENERAL_CI;

static COLLATION_NAMES: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();

/// Maps collation names to their numeric IDs, as sent in the `character_set`
/// field of HandshakeResponse/Handshake packets.
pub fn collation_names() -> &'static HashMap<&'static str, u8> {
    COLLATION_NAMES.get_or_init(|| {
        HashMap::from([
            ("big5_chinese_ci", 1),
            ("latin1_swedish_ci", 8),
            ("ascii_general_ci", 11),
            ("utf8_general_ci", UTF8_GENERAL_CI),
            ("utf8_bin", 83),
            ("utf8mb4_general_ci", UTF8MB4_GENERAL_CI),
            ("utf8mb4_unicode_ci", 224),
            ("utf8mb4_bin", 46),
            ("binary", BINARY),
        ])
    })
}
