//! # secure-session
//!
//! password-based mutual authentication (SPAKE2+) with a parallel
//! pre-shared-key resumption protocol (ECDHE+PSK), transcript-bound key
//! confirmation, per-connection AEAD encryption with replay resistance,
//! fake-credential masking for unknown usernames, and adaptive rate
//! limiting on failed authentications.
//!
//! the crate is organized bottom-up: [`crypto`] holds the primitives,
//! [`tlv`] and [`handshake_message`] the wire framing, [`step_checker`]
//! the state-machine guard both authentication peers share,
//! [`spake2p`] and [`ecdhe_psk`] the two handshake peers themselves, and
//! [`session`] the server that drives them to completion over a host-supplied
//! transport.

pub mod brute_force;
pub mod caller_id;
pub mod crypto;
pub mod ecdhe_psk;
pub mod error;
pub mod fake_credential;
pub mod handshake_message;
pub mod session;
pub mod spake2p;
pub mod step_checker;
pub mod tlv;

pub use caller_id::CallerId;
pub use error::{Error, Result};
pub use session::connection::Connection;
pub use session::server::{SecureSessionConfig, Server};
pub use session::transport::{RawConnection, TicketScheduler, Transport, UserCredentialResolver};
