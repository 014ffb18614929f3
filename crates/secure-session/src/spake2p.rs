//! SPAKE2+ password-authenticated key exchange
//!
//! both roles drive the same linear state machine via [`crate::step_checker`];
//! any parse error, invalid point, or confirmation mismatch wastes the
//! checker through the `?`-drops-the-marker path, so a failed step can never
//! be retried with different inputs.

use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::crypto::argon2id::{self, ID_VERIFIER};
use crate::crypto::chacha;
use crate::crypto::ed25519::{cofactor, fixed_m, fixed_n, Point, Scalar};
use crate::crypto::kdf;
use crate::error::{Error, Result};
use crate::handshake_message::{HandshakeMessage, Type};
use crate::step_checker::StepChecker;

const HASH_CONTEXT: &str = "TUI";
const SALT_LEN: usize = 16;

/// persistent per-user verifier produced by [`register`].
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    pub w0: [u8; 32],
    pub l: [u8; 32],
    pub salt: [u8; SALT_LEN],
}

/// derive a fresh verifier for `(username, password)` with a random salt.
pub fn register(username: &str, password: &str) -> Result<RegistrationResult> {
    let mut salt = [0u8; SALT_LEN];
    use rand::RngCore;
    OsRng.fill_bytes(&mut salt);
    let (w0, w1) = argon2id::derive_w0_w1(username, password, &salt)?;
    let l = w1.base_point_mul();
    Ok(RegistrationResult {
        w0: w0.to_bytes(),
        l: l.to_bytes(),
        salt,
    })
}

fn reject_reserved(elements: &[(Type, Vec<u8>)]) -> Result<()> {
    for (ty, _) in elements {
        if matches!(ty, Type::KeyIndex | Type::CipherMessage) {
            return Err(Error::Malformed(
                "KeyIndex and CipherMessage are reserved for protocol use".into(),
            ));
        }
    }
    Ok(())
}

fn transcript_hash(
    id_prover: &str,
    id_verifier: &str,
    x: Point,
    y: Point,
    z: Point,
    v: Point,
    w0: Scalar,
) -> [u8; kdf::HASH_LEN] {
    kdf::transcript_hash(&[
        HASH_CONTEXT.as_bytes(),
        id_prover.as_bytes(),
        id_verifier.as_bytes(),
        &fixed_m().to_bytes(),
        &fixed_n().to_bytes(),
        &x.to_bytes(),
        &y.to_bytes(),
        &z.to_bytes(),
        &v.to_bytes(),
        &w0.to_bytes(),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientStep {
    Init,
    RetrieveSalt,
    ShareP,
    ConfirmP,
}

/// the password-holder side of the handshake.
pub struct Client {
    username: String,
    password: String,
    first_message_additional: Vec<(Type, Vec<u8>)>,
    step_checker: StepChecker<ClientStep>,
    w0: Option<Scalar>,
    w1: Option<Scalar>,
    x: Option<Scalar>,
    big_x: Option<Point>,
    client_key: [u8; 32],
    server_key: [u8; 32],
}

impl Client {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        additional_elements: Vec<(Type, Vec<u8>)>,
    ) -> Result<Self> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() || password.is_empty() {
            return Err(Error::Malformed(
                "username and password cannot be empty".into(),
            ));
        }
        reject_reserved(&additional_elements)?;
        Ok(Self {
            username,
            password,
            first_message_additional: additional_elements,
            step_checker: StepChecker::new(ClientStep::Init),
            w0: None,
            w1: None,
            x: None,
            big_x: None,
            client_key: [0u8; 32],
            server_key: [0u8; 32],
        })
    }

    fn retrieve_salt(&mut self) -> Result<HandshakeMessage> {
        let marker = self
            .step_checker
            .check_step(ClientStep::Init, ClientStep::RetrieveSalt)?;
        let mut message =
            HandshakeMessage::from_elements(std::mem::take(&mut self.first_message_additional));
        message.set(Type::KeyIndex, self.username.as_bytes().to_vec());
        marker.confirm();
        Ok(message)
    }

    fn get_share_p(&mut self, server_message: &HandshakeMessage) -> Result<HandshakeMessage> {
        let marker = self
            .step_checker
            .check_step(ClientStep::RetrieveSalt, ClientStep::ShareP)?;
        let cipher = server_message.require(Type::CipherMessage)?;
        if cipher.len() != SALT_LEN {
            return Err(Error::Malformed("invalid salt size".into()));
        }
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(cipher);

        let (w0, w1) = argon2id::derive_w0_w1(&self.username, &self.password, &salt)?;
        self.password.clear();
        self.w0 = Some(w0);
        self.w1 = Some(w1);

        let x = Scalar::random(&mut OsRng);
        let big_x = x.base_point_mul() + w0 * fixed_m();
        self.x = Some(x);
        self.big_x = Some(big_x);

        let mut message = HandshakeMessage::new();
        message.set(Type::CipherMessage, big_x.to_bytes().to_vec());
        marker.confirm();
        Ok(message)
    }

    fn get_confirm_p(&mut self, server_message: &HandshakeMessage) -> Result<HandshakeMessage> {
        let marker = self
            .step_checker
            .check_step(ClientStep::ShareP, ClientStep::ConfirmP)?;
        let cipher = server_message.require(Type::CipherMessage)?;
        if cipher.len() < 32 {
            return Err(Error::Malformed("invalid server message size".into()));
        }
        let mut y_bytes = [0u8; 32];
        y_bytes.copy_from_slice(&cipher[..32]);
        let y = Point::from_bytes(&y_bytes)?;

        let w0 = self.w0.expect("w0 set in ShareP");
        let w1 = self.w1.expect("w1 set in ShareP");
        let x = self.x.expect("x set in ShareP");
        let big_x = self.big_x.expect("X set in ShareP");

        let h = cofactor();
        let diff = y - w0 * fixed_n();
        let z = h * (x * diff);
        let v = h * (w1 * diff);

        let prk = transcript_hash(&self.username, ID_VERIFIER, big_x, y, z, v, w0);
        self.client_key = kdf::expand(&prk, b"client key")?;
        self.server_key = kdf::expand(&prk, b"server key")?;
        let confirm_p_key = kdf::expand(&prk, b"confirmP key")?;
        let confirm_v_key = kdf::expand(&prk, b"confirmV key")?;

        let decrypted = chacha::decrypt_once(&confirm_v_key, &cipher[32..])?;
        if decrypted != big_x.to_bytes() {
            return Err(Error::AuthFailed("confirmV mismatch".into()));
        }

        let confirm_p = chacha::encrypt_once(&confirm_p_key, &y.to_bytes())?;
        let mut message = HandshakeMessage::new();
        message.set(Type::CipherMessage, confirm_p);
        marker.confirm();
        Ok(message)
    }

    /// advance the handshake. pass `None` only for the very first call.
    pub fn next_message(
        &mut self,
        peer_message: Option<&HandshakeMessage>,
    ) -> Result<Option<HandshakeMessage>> {
        match self.step_checker.current_step()? {
            ClientStep::Init => {
                if peer_message.is_some() {
                    return Err(Error::Malformed("no peer message expected yet".into()));
                }
                Ok(Some(self.retrieve_salt()?))
            }
            ClientStep::RetrieveSalt => {
                let peer = peer_message.ok_or_else(|| Error::Malformed("peer message required".into()))?;
                Ok(Some(self.get_share_p(peer)?))
            }
            ClientStep::ShareP => {
                let peer = peer_message.ok_or_else(|| Error::Malformed("peer message required".into()))?;
                Ok(Some(self.get_confirm_p(peer)?))
            }
            ClientStep::ConfirmP => Err(Error::InvalidStep),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.step_checker.current_step(), Ok(ClientStep::ConfirmP))
    }

    pub fn client_key(&self) -> Result<[u8; 32]> {
        self.step_checker
            .check_step(ClientStep::ConfirmP, ClientStep::ConfirmP)?
            .confirm();
        Ok(self.client_key)
    }

    pub fn server_key(&self) -> Result<[u8; 32]> {
        self.step_checker
            .check_step(ClientStep::ConfirmP, ClientStep::ConfirmP)?
            .confirm();
        Ok(self.server_key)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerStep {
    Init,
    RetrieveSalt,
    ShareVConfirmV,
    ConfirmP,
}

/// a caller-supplied lookup from username to a stored or fake verifier.
pub type GetRegistration = Box<dyn Fn(&str) -> Result<RegistrationResult> + Send + Sync>;

/// the verifier-holding side of the handshake.
pub struct Server {
    get_registration: GetRegistration,
    username: Option<String>,
    registration: Option<RegistrationResult>,
    step_checker: StepChecker<ServerStep>,
    big_y: Option<Point>,
    confirm_p_key: [u8; 32],
    client_key: [u8; 32],
    server_key: [u8; 32],
}

impl Server {
    pub fn new(get_registration: GetRegistration) -> Self {
        Self {
            get_registration,
            username: None,
            registration: None,
            step_checker: StepChecker::new(ServerStep::Init),
            big_y: None,
            confirm_p_key: [0u8; 32],
            client_key: [0u8; 32],
            server_key: [0u8; 32],
        }
    }

    fn retrieve_salt(&mut self, client_message: &HandshakeMessage) -> Result<HandshakeMessage> {
        let marker = self
            .step_checker
            .check_step(ServerStep::Init, ServerStep::RetrieveSalt)?;
        let key_index = client_message.require(Type::KeyIndex)?;
        let username = String::from_utf8(key_index.to_vec())
            .map_err(|_| Error::Malformed("KeyIndex is not valid utf-8".into()))?;
        let registration = (self.get_registration)(&username)?;
        let mut message = HandshakeMessage::new();
        message.set(Type::CipherMessage, registration.salt.to_vec());
        self.username = Some(username);
        self.registration = Some(registration);
        marker.confirm();
        Ok(message)
    }

    fn get_share_v_confirm_v(
        &mut self,
        client_message: &HandshakeMessage,
    ) -> Result<HandshakeMessage> {
        let marker = self
            .step_checker
            .check_step(ServerStep::RetrieveSalt, ServerStep::ShareVConfirmV)?;
        let cipher = client_message.require(Type::CipherMessage)?;
        if cipher.len() != 32 {
            return Err(Error::Malformed("invalid client message size".into()));
        }
        let mut x_bytes = [0u8; 32];
        x_bytes.copy_from_slice(cipher);
        let x = Point::from_bytes(&x_bytes)?;

        let registration = self
            .registration
            .as_ref()
            .expect("registration set in RetrieveSalt");
        let w0 = Scalar::from_bytes(&registration.w0);
        let l = Point::from_bytes(&registration.l)?;

        let y = Scalar::random(&mut OsRng);
        let big_y = y.base_point_mul() + w0 * fixed_n();
        let h = cofactor();
        let diff = x - w0 * fixed_m();
        let z = h * (y * diff);
        let v = h * (y * l);

        let username = self.username.clone().expect("username set in RetrieveSalt");
        let prk = transcript_hash(&username, ID_VERIFIER, x, big_y, z, v, w0);
        self.client_key = kdf::expand(&prk, b"client key")?;
        self.server_key = kdf::expand(&prk, b"server key")?;
        self.confirm_p_key = kdf::expand(&prk, b"confirmP key")?;
        let confirm_v_key = kdf::expand(&prk, b"confirmV key")?;

        let confirm_v = chacha::encrypt_once(&confirm_v_key, &x.to_bytes())?;
        let mut cipher_message = big_y.to_bytes().to_vec();
        cipher_message.extend_from_slice(&confirm_v);

        self.big_y = Some(big_y);
        let mut message = HandshakeMessage::new();
        message.set(Type::CipherMessage, cipher_message);
        marker.confirm();
        Ok(message)
    }

    fn take_confirm_p(&mut self, client_message: &HandshakeMessage) -> Result<()> {
        let marker = self
            .step_checker
            .check_step(ServerStep::ShareVConfirmV, ServerStep::ConfirmP)?;
        let cipher = client_message.require(Type::CipherMessage)?;
        let decrypted = chacha::decrypt_once(&self.confirm_p_key, cipher)?;
        let big_y = self.big_y.expect("Y set in ShareVConfirmV");
        if decrypted != big_y.to_bytes() {
            return Err(Error::AuthFailed("confirmP mismatch".into()));
        }
        marker.confirm();
        Ok(())
    }

    pub fn next_message(
        &mut self,
        peer_message: Option<&HandshakeMessage>,
    ) -> Result<Option<HandshakeMessage>> {
        match self.step_checker.current_step()? {
            ServerStep::Init => {
                let peer = peer_message.ok_or_else(|| Error::Malformed("peer message required".into()))?;
                Ok(Some(self.retrieve_salt(peer)?))
            }
            ServerStep::RetrieveSalt => {
                let peer = peer_message.ok_or_else(|| Error::Malformed("peer message required".into()))?;
                Ok(Some(self.get_share_v_confirm_v(peer)?))
            }
            ServerStep::ShareVConfirmV => {
                let peer = peer_message.ok_or_else(|| Error::Malformed("peer message required".into()))?;
                self.take_confirm_p(peer)?;
                Ok(None)
            }
            ServerStep::ConfirmP => Err(Error::InvalidStep),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.step_checker.current_step(), Ok(ServerStep::ConfirmP))
    }

    /// the username observed on the first client message, once available.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn client_key(&self) -> Result<[u8; 32]> {
        self.step_checker
            .check_step(ServerStep::ConfirmP, ServerStep::ConfirmP)?
            .confirm();
        Ok(self.client_key)
    }

    pub fn server_key(&self) -> Result<[u8; 32]> {
        self.step_checker
            .check_step(ServerStep::ConfirmP, ServerStep::ConfirmP)?
            .confirm();
        Ok(self.server_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_handshake(username: &str, password: &str, registration: RegistrationResult) -> Result<(Client, Server)> {
        let mut client = Client::new(username, password, Vec::new())?;
        let mut server = Server::new(Box::new(move |_u| Ok(registration.clone())));

        let m1 = client.next_message(None)?.unwrap();
        let m2 = server.next_message(Some(&m1))?.unwrap();
        let m3 = client.next_message(Some(&m2))?.unwrap();
        let m4 = server.next_message(Some(&m3))?;
        assert!(m4.is_none());

        Ok((client, server))
    }

    #[test]
    fn matching_password_completes_and_agrees_on_keys() {
        let registration = register("alice", "correct horse").unwrap();
        let (client, server) = run_handshake("alice", "correct horse", registration).unwrap();
        assert!(client.is_complete());
        assert!(server.is_complete());
        assert_eq!(client.client_key().unwrap(), server.client_key().unwrap());
        assert_eq!(client.server_key().unwrap(), server.server_key().unwrap());
    }

    #[test]
    fn wrong_password_fails_and_wastes_both_sides() {
        // a wrong password yields a different w0/w1 on the client, so the
        // transcript hash it computes never matches the server's: the
        // mismatch surfaces as a confirmV decryption failure on the
        // client's own ShareP->ConfirmP step, before the server ever sees
        // a third flight.
        let registration = register("bob", "hunter2").unwrap();
        let mut client = Client::new("bob", "wrong password", Vec::new()).unwrap();
        let mut server = Server::new(Box::new(move |_u| Ok(registration.clone())));

        let m1 = client.next_message(None).unwrap().unwrap();
        let m2 = server.next_message(Some(&m1)).unwrap().unwrap();
        assert!(client.next_message(Some(&m2)).is_err());
        assert!(!client.is_complete());
        assert!(!server.is_complete());
    }

    #[test]
    fn reserved_additional_elements_are_rejected() {
        let result = Client::new(
            "alice",
            "pw",
            vec![(Type::KeyIndex, b"x".to_vec())],
        );
        assert!(result.is_err());
    }

    #[test]
    fn keys_diverge_after_a_failed_step_is_not_retried() {
        let registration = register("carol", "letmein").unwrap();
        let mut client = Client::new("carol", "letmein", Vec::new()).unwrap();
        let mut server = Server::new(Box::new(move |_u| Ok(registration.clone())));
        let m1 = client.next_message(None).unwrap().unwrap();
        let _ = server.next_message(Some(&m1)).unwrap().unwrap();
        // feed back the wrong message type at the ShareP step, which should
        // waste the server's checker permanently
        let garbage = HandshakeMessage::new();
        assert!(server.next_message(Some(&garbage)).is_err());
        assert!(server.next_message(Some(&garbage)).is_err());
    }
}
