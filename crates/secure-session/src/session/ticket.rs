//! resumption ticket table: one row per outstanding `(key_index, psk)` pair
//!
//! a ticket starts pending the moment a handshake completes, is armed with a
//! 5-minute expiry once its Connection closes, and is removed the instant
//! either the timer fires or the ticket is redeemed by a fresh ECDHE+PSK
//! handshake — whichever happens first cancels the other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::caller_id::CallerId;
use crate::ecdhe_psk::Psk;
use crate::error::{Error, Result};

use super::transport::{TicketScheduler, TimerHandle};

struct TicketEntry {
    psk: Psk,
    caller_id: CallerId,
    timer: Option<TimerHandle>,
}

#[derive(Default)]
pub struct TicketTable {
    tickets: Mutex<HashMap<Uuid, TicketEntry>>,
}

impl TicketTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// record a freshly issued ticket. not yet subject to expiry: that only
    /// starts once the owning Connection closes.
    pub fn insert(&self, key_index: Uuid, psk: Psk, caller_id: CallerId) {
        self.tickets.lock().insert(
            key_index,
            TicketEntry {
                psk,
                caller_id,
                timer: None,
            },
        );
    }

    /// arm the expiry timer for a ticket that is still outstanding. returns
    /// `false` if the ticket has already been consumed or expired, in which
    /// case there is nothing to arm.
    pub fn arm_expiry(
        self: &Arc<Self>,
        key_index: Uuid,
        scheduler: &dyn TicketScheduler,
        after: Duration,
    ) -> bool {
        let mut tickets = self.tickets.lock();
        let Some(entry) = tickets.get_mut(&key_index) else {
            return false;
        };
        let table = Arc::clone(self);
        let handle = scheduler.arm(
            after,
            Box::new(move || {
                table.tickets.lock().remove(&key_index);
            }),
        );
        entry.timer = Some(handle);
        true
    }

    /// redeem a ticket by its wire-encoded `key_index`, consuming it and
    /// cancelling its expiry timer if one was armed.
    pub fn consume(&self, key_index: &[u8], scheduler: &dyn TicketScheduler) -> Result<(Psk, CallerId)> {
        let key_index = Uuid::from_slice(key_index).map_err(|_| Error::UnknownTicket)?;
        let entry = self
            .tickets
            .lock()
            .remove(&key_index)
            .ok_or(Error::UnknownTicket)?;
        if let Some(handle) = entry.timer {
            scheduler.cancel(handle);
        }
        Ok((entry.psk, entry.caller_id))
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key_index: Uuid) -> bool {
        self.tickets.lock().contains_key(&key_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ImmediateScheduler {
        next_id: AtomicU64,
        cancelled: Mutex<Vec<TimerHandle>>,
    }

    impl ImmediateScheduler {
        fn new() -> Self {
            Self {
                next_id: AtomicU64::new(0),
                cancelled: Mutex::new(Vec::new()),
            }
        }
    }

    impl TicketScheduler for ImmediateScheduler {
        fn arm(&self, _after: Duration, on_fire: Box<dyn FnOnce() + Send>) -> TimerHandle {
            // fires synchronously: exercises the table's removal path without
            // needing a real timer driving the test.
            on_fire();
            TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed))
        }

        fn cancel(&self, handle: TimerHandle) {
            self.cancelled.lock().push(handle);
        }
    }

    fn caller() -> CallerId {
        CallerId::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn consume_returns_psk_and_caller_id() {
        let table = Arc::new(TicketTable::new());
        let key_index = Uuid::new_v4();
        let caller_id = caller();
        table.insert(key_index, [7u8; 32], caller_id);

        let scheduler = ImmediateScheduler::new();
        let (psk, got) = table.consume(key_index.as_bytes(), &scheduler).unwrap();
        assert_eq!(psk, [7u8; 32]);
        assert_eq!(got, caller_id);
    }

    #[test]
    fn consuming_twice_fails_the_second_time() {
        let table = Arc::new(TicketTable::new());
        let key_index = Uuid::new_v4();
        table.insert(key_index, [1u8; 32], caller());
        let scheduler = ImmediateScheduler::new();
        table.consume(key_index.as_bytes(), &scheduler).unwrap();
        assert!(table.consume(key_index.as_bytes(), &scheduler).is_err());
    }

    #[test]
    fn unknown_key_index_fails() {
        let table = Arc::new(TicketTable::new());
        let scheduler = ImmediateScheduler::new();
        assert!(table
            .consume(Uuid::new_v4().as_bytes(), &scheduler)
            .is_err());
    }

    #[test]
    fn expiry_removes_the_ticket() {
        let table = Arc::new(TicketTable::new());
        let key_index = Uuid::new_v4();
        table.insert(key_index, [3u8; 32], caller());
        let scheduler = ImmediateScheduler::new();
        assert!(table.arm_expiry(key_index, &scheduler, Duration::from_secs(300)));
        assert!(!table.contains(key_index));
        assert!(table.consume(key_index.as_bytes(), &scheduler).is_err());
    }

    #[test]
    fn arming_an_already_consumed_ticket_is_a_no_op() {
        let table = Arc::new(TicketTable::new());
        let key_index = Uuid::new_v4();
        table.insert(key_index, [9u8; 32], caller());
        let scheduler = ImmediateScheduler::new();
        table.consume(key_index.as_bytes(), &scheduler).unwrap();
        assert!(!table.arm_expiry(key_index, &scheduler, Duration::from_secs(300)));
    }
}
