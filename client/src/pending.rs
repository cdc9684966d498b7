//! Outstanding requests awaiting a broker reply.
//!
//! Each entry is a oneshot sender keyed by request id. Whoever removes the
//! entry resolves it: the IO task on a matching reply, the caller on
//! timeout or when it stops waiting, teardown on connection loss.

use std::collections::HashMap;

use frames::Message;
use tokio::sync::oneshot;

use crate::error::ClientError;

pub(crate) type Reply = Result<Message, ClientError>;

#[derive(Default)]
pub(crate) struct PendingTable {
    waiters: HashMap<String, oneshot::Sender<Reply>>,
}

impl PendingTable {
    /// Register a waiter for `request_id`.
    pub(crate) fn insert(&mut self, request_id: &str) -> Result<oneshot::Receiver<Reply>, ClientError> {
        if self.waiters.contains_key(request_id) {
            return Err(ClientError::DuplicateRequestId(format!("duplicate request id: {request_id}")));
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(request_id.to_owned(), tx);
        Ok(rx)
    }

    /// Hand `reply` to its waiter. Returns false for unknown or expired ids.
    pub(crate) fn complete(&mut self, request_id: &str, reply: Message) -> bool {
        match self.waiters.remove(request_id) {
            Some(tx) => tx.send(Ok(reply)).is_ok(),
            None => false,
        }
    }

    /// Forget a waiter that gave up.
    pub(crate) fn cancel(&mut self, request_id: &str) -> bool {
        self.waiters.remove(request_id).is_some()
    }

    /// Resolve every waiter with `error`.
    pub(crate) fn fail_all(&mut self, error: &ClientError) {
        for (_, tx) in self.waiters.drain() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}

#[cfg(test)]
#[path = "pending_test.rs"]
mod tests;
