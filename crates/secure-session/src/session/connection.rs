//! an authenticated connection: a raw transport plus the AEAD keys a
//! completed handshake produced for it
//!
//! `send`/`recv` encrypt and decrypt with [`crate::crypto::xchacha`] unless
//! `turn_off_encryption` was negotiated, in which case payloads pass through
//! untouched (the negotiation response itself is still always encrypted —
//! that happens before a Connection exists at all).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::caller_id::CallerId;
use crate::crypto::xchacha;
use crate::error::{Error, Result};

use super::transport::RawConnection;

type CloseCallback = Box<dyn FnOnce() + Send>;

pub struct Connection {
    raw: Arc<dyn RawConnection>,
    caller_id: CallerId,
    encryptor: xchacha::Encryptor,
    decryptor: xchacha::Decryptor,
    turn_off_encryption: bool,
    closed: AtomicBool,
    on_close: Mutex<Option<CloseCallback>>,
}

impl Connection {
    pub fn new(
        raw: Arc<dyn RawConnection>,
        caller_id: CallerId,
        send_key: &[u8; 32],
        recv_key: &[u8; 32],
        turn_off_encryption: bool,
        on_close: CloseCallback,
    ) -> Self {
        Self {
            raw,
            caller_id,
            encryptor: xchacha::Encryptor::new(send_key),
            decryptor: xchacha::Decryptor::new(recv_key),
            turn_off_encryption,
            closed: AtomicBool::new(false),
            on_close: Mutex::new(Some(on_close)),
        }
    }

    pub fn id(&self) -> CallerId {
        self.caller_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Fatal("connection is closed".into()));
        }
        let framed = if self.turn_off_encryption {
            payload.to_vec()
        } else {
            self.encryptor.encrypt(payload)?
        };
        self.raw.send(framed).await
    }

    /// `Ok(None)` when the peer closed the raw transport.
    pub async fn recv(&self) -> Result<Option<Vec<u8>>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Fatal("connection is closed".into()));
        }
        let Some(framed) = self.raw.recv().await? else {
            return Ok(None);
        };
        let plaintext = if self.turn_off_encryption {
            framed
        } else {
            self.decryptor.decrypt(&framed)?
        };
        Ok(Some(plaintext))
    }

    /// idempotent: only the first call closes the raw transport and fires
    /// the close callback.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.raw.close();
        if let Some(callback) = self.on_close.lock().take() {
            callback();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    struct LoopbackRaw {
        inbox: AsyncMutex<Vec<Vec<u8>>>,
        outbox: Arc<AsyncMutex<Vec<Vec<u8>>>>,
        closed: AtomicBool,
    }

    impl RawConnection for LoopbackRaw {
        fn send(&self, message: Vec<u8>) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.outbox.lock().await.push(message);
                Ok(())
            })
        }

        fn recv(&self) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
            Box::pin(async move { Ok(self.inbox.lock().await.pop()) })
        }

        fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    fn caller() -> CallerId {
        CallerId::new(uuid::Uuid::new_v4(), uuid::Uuid::new_v4())
    }

    #[tokio::test]
    async fn send_then_peer_side_recv_roundtrips() {
        let outbox = Arc::new(AsyncMutex::new(Vec::new()));
        let raw = LoopbackRaw {
            inbox: AsyncMutex::new(Vec::new()),
            outbox: Arc::clone(&outbox),
            closed: AtomicBool::new(false),
        };
        let key = [5u8; 32];
        let conn = Connection::new(Arc::new(raw), caller(), &key, &key, false, Box::new(|| {}));
        conn.send(b"hello").await.unwrap();
        let framed = outbox.lock().await.pop().unwrap();
        let dec = xchacha::Decryptor::new(&key);
        assert_eq!(dec.decrypt(&framed).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn turn_off_encryption_passes_payload_through_raw() {
        let outbox = Arc::new(AsyncMutex::new(Vec::new()));
        let raw = LoopbackRaw {
            inbox: AsyncMutex::new(Vec::new()),
            outbox: Arc::clone(&outbox),
            closed: AtomicBool::new(false),
        };
        let key = [1u8; 32];
        let conn = Connection::new(Arc::new(raw), caller(), &key, &key, true, Box::new(|| {}));
        conn.send(b"plain").await.unwrap();
        assert_eq!(outbox.lock().await.pop().unwrap(), b"plain");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_runs_callback_once() {
        let raw = LoopbackRaw {
            inbox: AsyncMutex::new(Vec::new()),
            outbox: Arc::new(AsyncMutex::new(Vec::new())),
            closed: AtomicBool::new(false),
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cl = Arc::clone(&calls);
        let key = [0u8; 32];
        let conn = Connection::new(
            Arc::new(raw),
            caller(),
            &key,
            &key,
            false,
            Box::new(move || {
                calls_cl.fetch_add(1, Ordering::SeqCst);
            }),
        );
        conn.close();
        conn.close();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let raw = LoopbackRaw {
            inbox: AsyncMutex::new(Vec::new()),
            outbox: Arc::new(AsyncMutex::new(Vec::new())),
            closed: AtomicBool::new(false),
        };
        let key = [2u8; 32];
        let conn = Connection::new(Arc::new(raw), caller(), &key, &key, false, Box::new(|| {}));
        conn.close();
        assert!(conn.send(b"too late").await.is_err());
    }
}
