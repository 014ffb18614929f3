//! the process-boundary traits a host wires up to run a [`super::server::Server`]
//!
//! none of these traits know anything about sockets, HTTP, or RPC framing —
//! that plumbing belongs to the host. what's here is only the shape the
//! handshake orchestration needs: a way to accept a raw framed connection, a
//! way to arm/cancel delayed callbacks, and a way to look up a user's stored
//! credential.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::Result;
use crate::spake2p::RegistrationResult;

/// one accepted, not-yet-authenticated raw connection: framed `send`/`recv`
/// of whole messages (the host is responsible for length-prefixing at the
/// socket level), plus an idempotent `close`.
pub trait RawConnection: Send + Sync {
    fn send(&self, message: Vec<u8>) -> BoxFuture<'_, Result<()>>;

    /// `Ok(None)` signals the peer closed the connection.
    fn recv(&self) -> BoxFuture<'_, Result<Option<Vec<u8>>>>;

    fn close(&self);
}

/// accepts raw connections before any authentication has happened.
pub trait Transport: Send + Sync {
    /// `None` signals the transport itself has shut down.
    fn accept(&self) -> BoxFuture<'_, Option<Arc<dyn RawConnection>>>;
}

/// an opaque handle to a scheduled callback, returned by [`TicketScheduler::arm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// arms and cancels delayed one-shot callbacks: the 10-second handshake
/// timeout and the 5-minute resumption-ticket expiry both go through this,
/// so a host can back it with whatever timer wheel its own event loop uses.
pub trait TicketScheduler: Send + Sync {
    fn arm(&self, after: Duration, on_fire: Box<dyn FnOnce() + Send>) -> TimerHandle;
    fn cancel(&self, handle: TimerHandle);
}

/// looks up a user's stored SPAKE2+ verifier and stable user id by username.
/// `None` means no such user — the server masks this with a fake credential
/// rather than exposing it to the caller.
pub trait UserCredentialResolver: Send + Sync {
    fn get_user_credential(
        &self,
        username: &str,
    ) -> BoxFuture<'_, Option<(RegistrationResult, Uuid)>>;
}
