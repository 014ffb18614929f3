//! orchestrates the accept loop, handshake dispatch, resumption tickets, and
//! the live connection registry
//!
//! everything network- and timer-shaped is injected (`Transport`,
//! `TicketScheduler`, `UserCredentialResolver`): this module only knows how
//! to drive [`crate::spake2p`] / [`crate::ecdhe_psk`] to completion and what
//! to do with the keys they produce.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::brute_force::BruteForceLimiter;
use crate::caller_id::CallerId;
use crate::crypto::chacha;
use crate::ecdhe_psk;
use crate::error::{Error, Result};
use crate::fake_credential::FakeCredentialGenerator;
use crate::handshake_message::{HandshakeMessage, ProtocolType, Type};
use crate::spake2p::{self, RegistrationResult};

use super::connection::Connection;
use super::ticket::TicketTable;
use super::transport::{RawConnection, TicketScheduler, Transport, UserCredentialResolver};

/// every tunable named in the component design, collected so a host can
/// source them from its own configuration surface.
#[derive(Debug, Clone)]
pub struct SecureSessionConfig {
    pub handshake_timeout: Duration,
    pub ticket_expiry: Duration,
    pub fake_credential_cache_size: usize,
    pub brute_force_trials_allowed: u32,
    pub brute_force_initial_block: Duration,
    pub brute_force_max_block: Duration,
}

impl Default for SecureSessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            ticket_expiry: Duration::from_secs(5 * 60),
            fake_credential_cache_size: 10_000,
            brute_force_trials_allowed: 5,
            brute_force_initial_block: Duration::from_secs(5 * 60),
            brute_force_max_block: Duration::from_secs(6 * 60 * 60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NegotiationRequest {
    turn_off_encryption: bool,
}

#[derive(Debug, Serialize)]
struct NegotiationResponse {
    session_resumption_key_index: String,
    session_resumption_key: String,
    was_under_attack: bool,
}

pub struct Server {
    transport: Box<dyn Transport>,
    scheduler: Arc<dyn TicketScheduler>,
    credentials: Box<dyn UserCredentialResolver>,
    config: SecureSessionConfig,
    fake_credentials: FakeCredentialGenerator,
    brute_force: BruteForceLimiter,
    tickets: Arc<TicketTable>,
    connections: Mutex<HashMap<CallerId, Arc<Connection>>>,
    closed: AtomicBool,
}

impl Server {
    pub fn new(
        transport: Box<dyn Transport>,
        scheduler: Arc<dyn TicketScheduler>,
        credentials: Box<dyn UserCredentialResolver>,
        config: SecureSessionConfig,
    ) -> Arc<Self> {
        let brute_force = BruteForceLimiter::new(
            config.brute_force_trials_allowed,
            config.brute_force_initial_block.as_millis() as u64,
            config.brute_force_max_block.as_millis() as u64,
        );
        let fake_credentials = FakeCredentialGenerator::with_cache_size(config.fake_credential_cache_size);
        Arc::new(Self {
            transport,
            scheduler,
            credentials,
            fake_credentials,
            brute_force,
            tickets: Arc::new(TicketTable::new()),
            connections: Mutex::new(HashMap::new()),
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// drive the accept loop until the transport shuts down or `close` is
    /// called. each accepted connection gets its own handshake task.
    pub async fn run(self: &Arc<Self>) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            match self.transport.accept().await {
                Some(raw) => {
                    let server = Arc::clone(self);
                    tokio::spawn(async move { server.handle_connection(raw).await });
                }
                None => return,
            }
        }
    }

    /// close every live connection and cancel every outstanding timer before
    /// returning. idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for (_, connection) in self.connections.lock().drain() {
            connection.close();
        }
    }

    async fn handle_connection(self: Arc<Self>, raw: Arc<dyn RawConnection>) {
        let timeout_raw = Arc::clone(&raw);
        let timer = self.scheduler.arm(
            self.config.handshake_timeout,
            Box::new(move || timeout_raw.close()),
        );
        let result = self.run_handshake(&raw).await;
        self.scheduler.cancel(timer);
        if let Err(err) = result {
            tracing::warn!(error = %err, "handshake failed");
            raw.close();
        }
    }

    async fn run_handshake(self: &Arc<Self>, raw: &Arc<dyn RawConnection>) -> Result<()> {
        let first = raw
            .recv()
            .await?
            .ok_or_else(|| Error::Malformed("connection closed before handshake began".into()))?;
        let first_message = HandshakeMessage::parse(&first)?;
        let protocol_byte = first_message.require(Type::ProtocolType)?;
        if protocol_byte.len() != 1 {
            return Err(Error::Malformed("ProtocolType element must be one byte".into()));
        }
        let protocol = ProtocolType::from_byte(protocol_byte[0])
            .ok_or_else(|| Error::Malformed("unrecognized ProtocolType".into()))?;

        // minted fresh for every handshake, both fields at once: the password
        // path only ever overwrites `user_id`, once a real, unblocked account
        // resolves; the psk path overwrites the whole id with the one its
        // ticket was issued under.
        let caller_id = Arc::new(Mutex::new(CallerId::new(Uuid::new_v4(), Uuid::new_v4())));

        match protocol {
            ProtocolType::Password => self.run_spake2p(raw, first_message, &caller_id).await,
            ProtocolType::Psk => self.run_ecdhe_psk(raw, first_message, &caller_id).await,
        }
    }

    fn resolve_registration(
        &self,
        username: &str,
        resolved: Option<(RegistrationResult, Uuid)>,
        caller_id_slot: &Mutex<CallerId>,
    ) -> RegistrationResult {
        match resolved {
            None => self.fake_credentials.get_fake_credential(username),
            Some((registration, user_id)) => {
                if self.brute_force.is_blocked(username) {
                    self.fake_credentials.with_real_salt(username, registration.salt)
                } else {
                    caller_id_slot.lock().user_id = user_id;
                    registration
                }
            }
        }
    }

    async fn run_spake2p(
        self: &Arc<Self>,
        raw: &Arc<dyn RawConnection>,
        first_message: HandshakeMessage,
        caller_id: &Arc<Mutex<CallerId>>,
    ) -> Result<()> {
        let key_index = first_message.require(Type::KeyIndex)?;
        let username = String::from_utf8(key_index.to_vec())
            .map_err(|_| Error::Malformed("KeyIndex is not valid utf-8".into()))?;

        let resolved = self.credentials.get_user_credential(&username).await;

        let caller_id_for_closure = Arc::clone(caller_id);
        let server = Arc::clone(self);
        let get_registration: spake2p::GetRegistration = Box::new(move |u: &str| {
            Ok(server.resolve_registration(u, resolved.clone(), &caller_id_for_closure))
        });

        let mut auth = spake2p::Server::new(get_registration);
        let outcome = self.drive_spake2p(raw, &mut auth, first_message).await;

        if outcome.is_err() {
            self.brute_force.log_invalid(&username);
            return outcome;
        }

        let was_under_attack = self.brute_force.log_valid(&username);

        let client_key = auth.client_key()?;
        let server_key = auth.server_key()?;
        self.negotiate_and_install(raw, *caller_id.lock(), &client_key, &server_key, was_under_attack)
            .await
    }

    async fn drive_spake2p(
        &self,
        raw: &Arc<dyn RawConnection>,
        auth: &mut spake2p::Server,
        first_message: HandshakeMessage,
    ) -> Result<()> {
        let mut next_to_send = auth.next_message(Some(&first_message))?;
        loop {
            if let Some(message) = next_to_send.take() {
                raw.send(message.serialize()).await?;
            }
            if auth.is_complete() {
                return Ok(());
            }
            let incoming = raw
                .recv()
                .await?
                .ok_or_else(|| Error::Malformed("connection closed mid-handshake".into()))?;
            let incoming = HandshakeMessage::parse(&incoming)?;
            next_to_send = auth.next_message(Some(&incoming))?;
        }
    }

    async fn run_ecdhe_psk(
        self: &Arc<Self>,
        raw: &Arc<dyn RawConnection>,
        first_message: HandshakeMessage,
        caller_id: &Arc<Mutex<CallerId>>,
    ) -> Result<()> {
        let caller_id_for_closure = Arc::clone(caller_id);
        let tickets = Arc::clone(&self.tickets);
        let scheduler = Arc::clone(&self.scheduler);
        let get_psk: ecdhe_psk::GetPsk = Box::new(move |key_index: &[u8]| {
            let (psk, ticket_caller_id) = tickets.consume(key_index, scheduler.as_ref())?;
            *caller_id_for_closure.lock() = ticket_caller_id;
            Ok(psk)
        });

        let mut auth = ecdhe_psk::Server::new(get_psk);
        let mut next_to_send = auth.next_message(Some(&first_message))?;
        loop {
            if let Some(message) = next_to_send.take() {
                raw.send(message.serialize()).await?;
            }
            if auth.is_complete() {
                break;
            }
            let incoming = raw
                .recv()
                .await?
                .ok_or_else(|| Error::Malformed("connection closed mid-handshake".into()))?;
            let incoming = HandshakeMessage::parse(&incoming)?;
            next_to_send = auth.next_message(Some(&incoming))?;
        }

        let client_key = auth.client_key()?;
        let server_key = auth.server_key()?;
        self.negotiate_and_install(raw, *caller_id.lock(), &client_key, &server_key, false)
            .await
    }

    /// shared tail of both handshake paths: exchange the protocol
    /// negotiation request/response, then install a fresh Connection and
    /// resumption ticket.
    async fn negotiate_and_install(
        self: &Arc<Self>,
        raw: &Arc<dyn RawConnection>,
        caller_id: CallerId,
        client_key: &[u8; 32],
        server_key: &[u8; 32],
        was_under_attack: bool,
    ) -> Result<()> {
        let request_framed = raw
            .recv()
            .await?
            .ok_or_else(|| Error::Malformed("connection closed before negotiation".into()))?;
        let request_plain = chacha::decrypt_once(client_key, &request_framed)?;
        let request: NegotiationRequest = serde_json::from_slice(&request_plain)
            .map_err(|e| Error::Malformed(format!("invalid negotiation request: {e}")))?;

        // only evicts an existing entry when the incoming caller id matches
        // exactly (user_id and connection_id both): a fresh password login's
        // connection_id was just minted at the start of this handshake, so
        // this only ever fires for a ticket that carried forward the
        // connection_id of a still-live connection being resumed.
        if let Some(previous) = self.connections.lock().remove(&caller_id) {
            previous.close();
        }

        // regenerate the connection id only now that the eviction check above
        // has run against the one the handshake started (or the ticket) with.
        let caller_id = CallerId::new(caller_id.user_id, Uuid::new_v4());

        let key_index = Uuid::new_v4();
        let psk = ecdhe_psk::generate_psk();
        self.tickets.insert(key_index, psk, caller_id);

        let response = NegotiationResponse {
            session_resumption_key_index: key_index.to_string(),
            session_resumption_key: hex::encode(psk),
            was_under_attack,
        };
        let response_bytes = serde_json::to_vec(&response)
            .map_err(|e| Error::Fatal(format!("failed to serialize negotiation response: {e}")))?;
        let response_framed = chacha::encrypt_once(server_key, &response_bytes)?;
        raw.send(response_framed).await?;

        let server = Arc::clone(self);
        let scheduler = Arc::clone(&self.scheduler);
        let tickets = Arc::clone(&self.tickets);
        let ticket_expiry = self.config.ticket_expiry;
        let on_close: Box<dyn FnOnce() + Send> = Box::new(move || {
            server.connections.lock().remove(&caller_id);
            tickets.arm_expiry(key_index, scheduler.as_ref(), ticket_expiry);
        });

        let connection = Arc::new(Connection::new(
            Arc::clone(raw),
            caller_id,
            server_key,
            client_key,
            request.turn_off_encryption,
            on_close,
        ));
        self.connections.lock().insert(caller_id, connection);
        Ok(())
    }
}
