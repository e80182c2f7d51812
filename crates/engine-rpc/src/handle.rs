use std::fmt;

use serde::{Deserialize, Serialize};

/// A signed integer naming a server-side object.
///
/// [`Handle::GLOBAL`] (`-1`) always exists for the lifetime of a session.
/// Positive handles are issued by the server and live until it emits a
/// `close` for them or the session terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub i64);

impl Handle {
    /// The always-present root handle all other objects are obtained from.
    pub const GLOBAL: Handle = Handle(-1);

    pub fn is_global(self) -> bool {
        self == Self::GLOBAL
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Handle {
    fn from(value: i64) -> Self {
        Handle(value)
    }
}
