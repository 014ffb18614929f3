//! identity of a single authenticated connection

use uuid::Uuid;

/// identifies one authenticated connection: `user_id` is stable across a
/// user's resumed sessions, `connection_id` is fresh for every handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerId {
    pub user_id: Uuid,
    pub connection_id: Uuid,
}

impl CallerId {
    pub fn new(user_id: Uuid, connection_id: Uuid) -> Self {
        Self {
            user_id,
            connection_id,
        }
    }
}
