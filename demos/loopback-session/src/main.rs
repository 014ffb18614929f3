//! wires a host around [`secure_session::Server`] over an in-process duplex
//! transport and drives one SPAKE2+ login followed by one ECDHE+PSK
//! resumption, exactly the way a real client/server pair would over a
//! socket. not a production server: the transport here is two ends of a
//! channel in the same process rather than a listening socket, and the
//! single registered user lives in a `HashMap` rather than SQLite.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

use secure_session::crypto::chacha;
use secure_session::ecdhe_psk;
use secure_session::handshake_message::{HandshakeMessage, ProtocolType, Type};
use secure_session::session::transport::{
    RawConnection, TicketScheduler, TimerHandle, Transport, UserCredentialResolver,
};
use secure_session::spake2p::{self, RegistrationResult};
use secure_session::{Result, SecureSessionConfig, Server};

struct DuplexEnd {
    tx: SyncMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl RawConnection for DuplexEnd {
    fn send(&self, message: Vec<u8>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(tx) = self.tx.lock().as_ref() {
                let _ = tx.send(message);
            }
            Ok(())
        })
    }

    fn recv(&self) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        Box::pin(async move { Ok(self.rx.lock().await.recv().await) })
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}

fn duplex_pair() -> (Arc<DuplexEnd>, Arc<DuplexEnd>) {
    let (tx_ab, rx_ab) = mpsc::unbounded_channel();
    let (tx_ba, rx_ba) = mpsc::unbounded_channel();
    let a = Arc::new(DuplexEnd {
        tx: SyncMutex::new(Some(tx_ab)),
        rx: AsyncMutex::new(rx_ba),
    });
    let b = Arc::new(DuplexEnd {
        tx: SyncMutex::new(Some(tx_ba)),
        rx: AsyncMutex::new(rx_ab),
    });
    (a, b)
}

struct QueueTransport {
    rx: AsyncMutex<mpsc::UnboundedReceiver<Arc<dyn RawConnection>>>,
}

impl Transport for QueueTransport {
    fn accept(&self) -> BoxFuture<'_, Option<Arc<dyn RawConnection>>> {
        Box::pin(async move { self.rx.lock().await.recv().await })
    }
}

struct TokioScheduler {
    next_id: std::sync::atomic::AtomicU64,
    tasks: SyncMutex<HashMap<u64, tokio::task::JoinHandle<()>>>,
}

impl TokioScheduler {
    fn new() -> Self {
        Self {
            next_id: std::sync::atomic::AtomicU64::new(0),
            tasks: SyncMutex::new(HashMap::new()),
        }
    }
}

impl TicketScheduler for TokioScheduler {
    fn arm(&self, after: Duration, on_fire: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            on_fire();
        });
        self.tasks.lock().insert(id, handle);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(task) = self.tasks.lock().remove(&handle.0) {
            task.abort();
        }
    }
}

/// in production this resolves against the SQLite users table; here it's a
/// single hard-coded account.
struct SingleUserDirectory {
    username: String,
    registration: RegistrationResult,
    user_id: Uuid,
}

impl UserCredentialResolver for SingleUserDirectory {
    fn get_user_credential(
        &self,
        username: &str,
    ) -> BoxFuture<'_, Option<(RegistrationResult, Uuid)>> {
        let found = (username == self.username).then(|| (self.registration.clone(), self.user_id));
        Box::pin(async move { found })
    }
}

/// drives one SPAKE2+ login flight-by-flight over `raw`, then the protocol
/// negotiation, returning the resumption ticket the server minted.
async fn login(raw: &Arc<DuplexEnd>, username: &str, password: &str) -> Result<(String, [u8; 32])> {
    let mut client = spake2p::Client::new(username, password, Vec::new())?;

    let mut first = client.next_message(None)?.expect("first flight");
    first.set(Type::ProtocolType, vec![ProtocolType::Password.to_byte()]);
    raw.send(first.serialize()).await?;

    let salt_message = HandshakeMessage::parse(&raw.recv().await?.expect("salt flight"))?;
    let confirm_p = client.next_message(Some(&salt_message))?.expect("confirmP flight");
    raw.send(confirm_p.serialize()).await?;

    let client_key = client.client_key()?;
    let server_key = client.server_key()?;

    let request = serde_json::json!({ "turn_off_encryption": false });
    raw.send(chacha::encrypt_once(&client_key, &serde_json::to_vec(&request).unwrap())?)
        .await?;
    let response_bytes = chacha::decrypt_once(&server_key, &raw.recv().await?.expect("negotiation response"))?;
    let response: serde_json::Value = serde_json::from_slice(&response_bytes).unwrap();

    let key_index = response["session_resumption_key_index"].as_str().unwrap().to_string();
    let psk_hex = response["session_resumption_key"].as_str().unwrap();
    let mut psk = [0u8; 32];
    psk.copy_from_slice(&hex::decode(psk_hex).unwrap());

    tracing::info!(was_under_attack = response["was_under_attack"].as_bool(), "spake2p login complete");
    Ok((key_index, psk))
}

/// redeems a resumption ticket over a fresh connection.
async fn resume(raw: &Arc<DuplexEnd>, key_index: Uuid, psk: [u8; 32]) -> Result<()> {
    let mut client = ecdhe_psk::Client::new(psk, key_index.as_bytes().to_vec(), Vec::new())?;

    let mut m1 = client.next_message(None)?.expect("client flight");
    m1.set(Type::ProtocolType, vec![ProtocolType::Psk.to_byte()]);
    raw.send(m1.serialize()).await?;

    let m2 = HandshakeMessage::parse(&raw.recv().await?.expect("server flight"))?;
    let m3 = client.next_message(Some(&m2))?.expect("client confirmation");
    raw.send(m3.serialize()).await?;

    let m4 = HandshakeMessage::parse(&raw.recv().await?.expect("server confirmation"))?;
    client.next_message(Some(&m4))?;

    let client_key = client.client_key()?;
    let server_key = client.server_key()?;
    let request = serde_json::json!({ "turn_off_encryption": false });
    raw.send(chacha::encrypt_once(&client_key, &serde_json::to_vec(&request).unwrap())?)
        .await?;
    let response_bytes = chacha::decrypt_once(&server_key, &raw.recv().await?.expect("negotiation response"))?;
    let response: serde_json::Value = serde_json::from_slice(&response_bytes).unwrap();
    tracing::info!(response = %response, "ecdhe+psk resumption complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let username = "alice";
    let password = "correct horse battery staple";
    let registration = spake2p::register(username, password)?;
    let user_id = Uuid::new_v4();

    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let transport = Box::new(QueueTransport {
        rx: AsyncMutex::new(accept_rx),
    });
    let scheduler = Arc::new(TokioScheduler::new());
    let credentials = Box::new(SingleUserDirectory {
        username: username.to_string(),
        registration,
        user_id,
    });

    let server = Server::new(transport, scheduler, credentials, SecureSessionConfig::default());
    let server_for_loop = Arc::clone(&server);
    let accept_loop = tokio::spawn(async move { server_for_loop.run().await });

    let (client_end, server_end) = duplex_pair();
    accept_tx.send(server_end as Arc<dyn RawConnection>).unwrap();
    let (key_index, psk) = login(&client_end, username, password).await?;

    let (client_end, server_end) = duplex_pair();
    accept_tx.send(server_end as Arc<dyn RawConnection>).unwrap();
    resume(&client_end, Uuid::parse_str(&key_index).unwrap(), psk).await?;

    server.close();
    drop(accept_tx);
    let _ = accept_loop.await;
    Ok(())
}
