//! ECDHE+PSK resumption handshake
//!
//! a three-flight mutually authenticated key exchange over X25519, confirmed
//! by both sides encrypting the transcript hash back to each other. unlike
//! SPAKE2+ this flow runs a real HKDF-Extract keyed on the transcript hash
//! before deriving labelled keys with HKDF-Expand.

use rand::RngCore;

use crate::crypto::chacha;
use crate::crypto::kdf;
use crate::crypto::x25519::Keypair;
use crate::error::{Error, Result};
use crate::handshake_message::{HandshakeMessage, Type};
use crate::step_checker::StepChecker;

pub const NONCE_LEN: usize = 32;

/// a pre-shared key handed out by the server at the end of a prior session,
/// redeemed here to skip the password-based handshake.
pub type Psk = [u8; 32];

pub fn generate_psk() -> Psk {
    let mut psk = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut psk);
    psk
}

fn transcript_hash(client_message: &HandshakeMessage, server_message: &HandshakeMessage) -> [u8; kdf::HASH_LEN] {
    let client_bytes = client_message.serialize();
    let server_bytes = server_message.serialize();
    kdf::transcript_hash(&[&client_bytes, &server_bytes])
}

fn derive_keys(z: &[u8; 32], psk: &Psk, tt: &[u8; kdf::HASH_LEN]) -> Result<([u8; 32], [u8; 32], [u8; 32], [u8; 32])> {
    let mut ikm = Vec::with_capacity(z.len() + psk.len());
    ikm.extend_from_slice(z);
    ikm.extend_from_slice(psk);
    let prk = kdf::extract(tt, &ikm);
    let client_confirm_key = kdf::expand(&prk, b"client confirm key")?;
    let server_confirm_key = kdf::expand(&prk, b"server confirm key")?;
    let client_key = kdf::expand(&prk, b"client key")?;
    let server_key = kdf::expand(&prk, b"server key")?;
    Ok((client_confirm_key, server_confirm_key, client_key, server_key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientStep {
    Init,
    ClientMessage,
    ServerMessage,
    ServerConfirmation,
}

pub struct Client {
    psk: Psk,
    key_index: Vec<u8>,
    additional_elements: Vec<(Type, Vec<u8>)>,
    step_checker: StepChecker<ClientStep>,
    keypair: Option<Keypair>,
    client_message: Option<HandshakeMessage>,
    transcript_hash: Option<[u8; kdf::HASH_LEN]>,
    server_confirm_key: [u8; 32],
    client_key: [u8; 32],
    server_key: [u8; 32],
}

impl Client {
    pub fn new(psk: Psk, key_index: Vec<u8>, additional_elements: Vec<(Type, Vec<u8>)>) -> Result<Self> {
        for (ty, _) in &additional_elements {
            if matches!(ty, Type::KeyIndex | Type::CipherMessage) {
                return Err(Error::Malformed(
                    "KeyIndex and CipherMessage are reserved for protocol use".into(),
                ));
            }
        }
        Ok(Self {
            psk,
            key_index,
            additional_elements,
            step_checker: StepChecker::new(ClientStep::Init),
            keypair: None,
            client_message: None,
            transcript_hash: None,
            server_confirm_key: [0u8; 32],
            client_key: [0u8; 32],
            server_key: [0u8; 32],
        })
    }

    fn get_client_message(&mut self) -> Result<HandshakeMessage> {
        let marker = self
            .step_checker
            .check_step(ClientStep::Init, ClientStep::ClientMessage)?;
        let keypair = Keypair::generate();
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut cipher = Vec::with_capacity(32 + NONCE_LEN);
        cipher.extend_from_slice(&keypair.public);
        cipher.extend_from_slice(&nonce);

        let mut message = HandshakeMessage::from_elements(std::mem::take(&mut self.additional_elements));
        message.set(Type::KeyIndex, std::mem::take(&mut self.key_index));
        message.set(Type::CipherMessage, cipher);

        self.keypair = Some(keypair);
        self.client_message = Some(message.clone());
        marker.confirm();
        Ok(message)
    }

    fn take_server_message(&mut self, server_message: &HandshakeMessage) -> Result<HandshakeMessage> {
        let marker = self
            .step_checker
            .check_step(ClientStep::ClientMessage, ClientStep::ServerMessage)?;
        let cipher = server_message.require(Type::CipherMessage)?;
        if cipher.len() != 32 + NONCE_LEN {
            return Err(Error::Malformed("invalid server message size".into()));
        }
        let mut peer_public = [0u8; 32];
        peer_public.copy_from_slice(&cipher[..32]);

        let keypair = self.keypair.as_ref().expect("keypair set in ClientMessage");
        let z = keypair.diffie_hellman(&peer_public);

        let client_message = self.client_message.clone().expect("set in ClientMessage");
        let tt = transcript_hash(&client_message, server_message);

        let (client_confirm_key, server_confirm_key, client_key, server_key) =
            derive_keys(&z, &self.psk, &tt)?;
        self.client_key = client_key;
        self.server_key = server_key;
        self.server_confirm_key = server_confirm_key;
        self.transcript_hash = Some(tt);

        let confirm = chacha::encrypt_once(&client_confirm_key, &tt)?;
        let mut message = HandshakeMessage::new();
        message.set(Type::CipherMessage, confirm);
        marker.confirm();
        Ok(message)
    }

    fn take_server_confirmation(&mut self, server_message: &HandshakeMessage) -> Result<()> {
        let marker = self
            .step_checker
            .check_step(ClientStep::ServerMessage, ClientStep::ServerConfirmation)?;
        let cipher = server_message.require(Type::CipherMessage)?;
        let decrypted = chacha::decrypt_once(&self.server_confirm_key, cipher)?;
        let tt = self.transcript_hash.expect("set in ServerMessage");
        if decrypted != tt {
            return Err(Error::AuthFailed(
                "server confirmation does not match transcript hash".into(),
            ));
        }
        marker.confirm();
        Ok(())
    }

    pub fn next_message(
        &mut self,
        peer_message: Option<&HandshakeMessage>,
    ) -> Result<Option<HandshakeMessage>> {
        match self.step_checker.current_step()? {
            ClientStep::Init => {
                if peer_message.is_some() {
                    return Err(Error::Malformed("no peer message expected yet".into()));
                }
                Ok(Some(self.get_client_message()?))
            }
            ClientStep::ClientMessage => {
                let peer = peer_message.ok_or_else(|| Error::Malformed("peer message required".into()))?;
                Ok(Some(self.take_server_message(peer)?))
            }
            ClientStep::ServerMessage => {
                let peer = peer_message.ok_or_else(|| Error::Malformed("peer message required".into()))?;
                self.take_server_confirmation(peer)?;
                Ok(None)
            }
            ClientStep::ServerConfirmation => Err(Error::InvalidStep),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(
            self.step_checker.current_step(),
            Ok(ClientStep::ServerConfirmation)
        )
    }

    pub fn client_key(&self) -> Result<[u8; 32]> {
        self.step_checker
            .check_step(ClientStep::ServerConfirmation, ClientStep::ServerConfirmation)?
            .confirm();
        Ok(self.client_key)
    }

    pub fn server_key(&self) -> Result<[u8; 32]> {
        self.step_checker
            .check_step(ClientStep::ServerConfirmation, ClientStep::ServerConfirmation)?
            .confirm();
        Ok(self.server_key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerStep {
    Init,
    ClientMessage,
    ClientConfirmation,
}

/// a caller-supplied lookup from a resumption key index to its PSK.
pub type GetPsk = Box<dyn Fn(&[u8]) -> Result<Psk> + Send + Sync>;

pub struct Server {
    get_psk: GetPsk,
    step_checker: StepChecker<ServerStep>,
    client_confirm_key: [u8; 32],
    server_confirm_key: [u8; 32],
    transcript_hash: Option<[u8; kdf::HASH_LEN]>,
    client_key: [u8; 32],
    server_key: [u8; 32],
}

impl Server {
    pub fn new(get_psk: GetPsk) -> Self {
        Self {
            get_psk,
            step_checker: StepChecker::new(ServerStep::Init),
            client_confirm_key: [0u8; 32],
            server_confirm_key: [0u8; 32],
            transcript_hash: None,
            client_key: [0u8; 32],
            server_key: [0u8; 32],
        }
    }

    fn take_client_message(&mut self, client_message: &HandshakeMessage) -> Result<HandshakeMessage> {
        let marker = self
            .step_checker
            .check_step(ServerStep::Init, ServerStep::ClientMessage)?;
        let key_index = client_message.require(Type::KeyIndex)?;
        let psk = (self.get_psk)(key_index)?;

        let cipher = client_message.require(Type::CipherMessage)?;
        if cipher.len() != 32 + NONCE_LEN {
            return Err(Error::Malformed("invalid client message size".into()));
        }
        let mut peer_public = [0u8; 32];
        peer_public.copy_from_slice(&cipher[..32]);

        let keypair = Keypair::generate();
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let mut server_cipher = Vec::with_capacity(32 + NONCE_LEN);
        server_cipher.extend_from_slice(&keypair.public);
        server_cipher.extend_from_slice(&nonce);
        let mut server_message = HandshakeMessage::new();
        server_message.set(Type::CipherMessage, server_cipher);

        let z = keypair.diffie_hellman(&peer_public);
        let tt = transcript_hash(client_message, &server_message);
        let (client_confirm_key, server_confirm_key, client_key, server_key) =
            derive_keys(&z, &psk, &tt)?;

        self.client_confirm_key = client_confirm_key;
        self.server_confirm_key = server_confirm_key;
        self.client_key = client_key;
        self.server_key = server_key;
        self.transcript_hash = Some(tt);

        marker.confirm();
        Ok(server_message)
    }

    fn take_client_confirmation(&mut self, client_message: &HandshakeMessage) -> Result<HandshakeMessage> {
        let marker = self
            .step_checker
            .check_step(ServerStep::ClientMessage, ServerStep::ClientConfirmation)?;
        let cipher = client_message.require(Type::CipherMessage)?;
        let decrypted = chacha::decrypt_once(&self.client_confirm_key, cipher)?;
        let tt = self.transcript_hash.expect("set in ClientMessage");
        if decrypted != tt {
            return Err(Error::AuthFailed(
                "client confirmation does not match transcript hash".into(),
            ));
        }
        let confirm = chacha::encrypt_once(&self.server_confirm_key, &tt)?;
        let mut message = HandshakeMessage::new();
        message.set(Type::CipherMessage, confirm);
        marker.confirm();
        Ok(message)
    }

    pub fn next_message(
        &mut self,
        peer_message: Option<&HandshakeMessage>,
    ) -> Result<Option<HandshakeMessage>> {
        match self.step_checker.current_step()? {
            ServerStep::Init => {
                let peer = peer_message.ok_or_else(|| Error::Malformed("peer message required".into()))?;
                Ok(Some(self.take_client_message(peer)?))
            }
            ServerStep::ClientMessage => {
                let peer = peer_message.ok_or_else(|| Error::Malformed("peer message required".into()))?;
                Ok(Some(self.take_client_confirmation(peer)?))
            }
            ServerStep::ClientConfirmation => Err(Error::InvalidStep),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(
            self.step_checker.current_step(),
            Ok(ServerStep::ClientConfirmation)
        )
    }

    pub fn client_key(&self) -> Result<[u8; 32]> {
        self.step_checker
            .check_step(ServerStep::ClientConfirmation, ServerStep::ClientConfirmation)?
            .confirm();
        Ok(self.client_key)
    }

    pub fn server_key(&self) -> Result<[u8; 32]> {
        self.step_checker
            .check_step(ServerStep::ClientConfirmation, ServerStep::ClientConfirmation)?
            .confirm();
        Ok(self.server_key)
    }
}
