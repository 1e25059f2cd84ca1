//! Single-slot hand-off of responses from the reader task to the caller.
//!
//! At most one command is in flight per session, so only the latest
//! response is worth keeping. Posting replaces an unconsumed response; a
//! caller clears the slot before writing its command so a reply to an
//! earlier, timed-out command cannot be matched to it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::protocol::ResponsePacket;

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Empty,
    Ready(ResponsePacket),
    Closed,
}

#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a response, replacing any that was never collected.
    pub(crate) fn post(&self, response: ResponsePacket) {
        {
            let mut slot = self.lock();
            match &*slot {
                Slot::Closed => return,
                Slot::Ready(stale) => {
                    tracing::debug!("Discarding uncollected response to {:?}", stale.command);
                }
                Slot::Empty => {}
            }
            *slot = Slot::Ready(response);
        }
        self.notify.notify_one();
    }

    /// Drop a buffered response, if any.
    pub(crate) fn clear(&self) {
        let mut slot = self.lock();
        if let Slot::Ready(stale) = &*slot {
            tracing::debug!("Discarding stale response to {:?}", stale.command);
            *slot = Slot::Empty;
        }
    }

    /// Mark the mailbox dead; current and future waiters fail.
    pub(crate) fn close(&self) {
        *self.lock() = Slot::Closed;
        self.notify.notify_one();
    }

    /// Wait for the next response.
    ///
    /// Fails with [`Error::ConnectionLost`] once the mailbox is closed.
    pub(crate) async fn recv(&self) -> Result<ResponsePacket> {
        loop {
            {
                let mut slot = self.lock();
                match std::mem::take(&mut *slot) {
                    Slot::Ready(response) => return Ok(response),
                    Slot::Closed => {
                        *slot = Slot::Closed;
                        return Err(Error::ConnectionLost);
                    }
                    Slot::Empty => {}
                }
            }
            self.notify.notified().await;
        }
    }
}
