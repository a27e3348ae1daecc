//! Forwarder protocol: message types exchanged with the local forwarder.

use serde::{Deserialize, Serialize};

use crate::content::ContentObject;
use crate::interest::Interest;
use crate::name::Name;

/// Current protocol version. Sent in `Hello` when a connection opens.
pub const PROTOCOL_VERSION: u8 = 1;

/// Prefix registration flags.
pub const FORW_ACTIVE: u32 = 1;
pub const FORW_CHILD_INHERIT: u32 = 2;
pub const FORW_DEFAULT: u32 = FORW_ACTIVE | FORW_CHILD_INHERIT;

/// All wire message types. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// First frame on a new connection.
    Hello { protocol_version: u8 },
    Interest(Interest),
    Data(ContentObject),
    /// Ask the forwarder to deliver interests under `prefix` to this connection.
    Register { prefix: Name, flags: u32 },
    Unregister { prefix: Name },
}
