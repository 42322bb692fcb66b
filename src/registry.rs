//! # Transaction Registry
//!
//! Correlates the single in-flight request with the slot its result will be
//! written to. Modbus RTU is strictly one-request-at-a-time, so the registry
//! never holds more than one entry, but the id bookkeeping is what makes a
//! late timer or readiness event harmless: once an id has been resolved it is
//! gone from the registry and every later lookup returns `None`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusRequest, ModbusResponse};

/// Transaction identifier; wraps around after `u16::MAX`
pub type TransactionId = u16;

/// Outcome delivered to the caller of `execute`
pub type TransactionResult = ModbusResult<ModbusResponse>;

/// Allocates monotonically increasing transaction ids
#[derive(Debug, Clone, Default)]
pub struct TransactionIdAllocator {
    current: TransactionId,
}

impl TransactionIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting after `last`
    pub fn starting_after(last: TransactionId) -> Self {
        Self { current: last }
    }

    /// Next id; the first id handed out is 1
    pub fn next(&mut self) -> TransactionId {
        self.current = self.current.wrapping_add(1);
        self.current
    }
}

/// One request/response exchange
#[derive(Debug)]
pub struct Transaction {
    pub id: TransactionId,
    pub request: ModbusRequest,
    slot: oneshot::Sender<TransactionResult>,
}

impl Transaction {
    /// Create a transaction and the handle its result will be delivered to
    pub fn new(id: TransactionId, request: ModbusRequest) -> (Self, ResponseHandle) {
        let (slot, rx) = oneshot::channel();
        (
            Self { id, request, slot },
            ResponseHandle { id, rx, taken: false },
        )
    }

    /// Write the result; consumes the transaction so it can only happen once
    fn complete(self, result: TransactionResult) {
        if self.slot.send(result).is_err() {
            log::debug!("transaction {}: handle dropped before the result arrived", self.id);
        }
    }
}

/// Maps outstanding transaction ids to their result slots
#[derive(Debug, Default)]
pub struct TransactionRegistry {
    transactions: HashMap<TransactionId, Transaction>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transaction: Transaction) -> ModbusResult<()> {
        if self.transactions.contains_key(&transaction.id) {
            return Err(ModbusError::internal(format!(
                "transaction {} is already registered", transaction.id
            )));
        }
        self.transactions.insert(transaction.id, transaction);
        Ok(())
    }

    pub fn lookup(&self, id: TransactionId) -> Option<&Transaction> {
        self.transactions.get(&id)
    }

    pub fn remove(&mut self, id: TransactionId) -> Option<Transaction> {
        self.transactions.remove(&id)
    }

    /// Remove `id` and deliver `result` to its handle
    ///
    /// Returns `false` when the id is unknown, i.e. it was already resolved.
    pub fn resolve(&mut self, id: TransactionId, result: TransactionResult) -> bool {
        match self.remove(id) {
            Some(transaction) => {
                transaction.complete(result);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Caller side of a transaction's result slot
///
/// Await it, or poll it with [`ResponseHandle::try_result`].
#[derive(Debug)]
pub struct ResponseHandle {
    id: TransactionId,
    rx: oneshot::Receiver<TransactionResult>,
    taken: bool,
}

impl ResponseHandle {
    pub fn transaction_id(&self) -> TransactionId {
        self.id
    }

    /// Take the result if it has been delivered
    ///
    /// Returns `None` while the transaction is still pending, and after the
    /// result has already been taken.
    pub fn try_result(&mut self) -> Option<TransactionResult> {
        if self.taken {
            return None;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.taken = true;
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.taken = true;
                Some(Err(abandoned(self.id)))
            }
        }
    }
}

fn abandoned(id: TransactionId) -> ModbusError {
    ModbusError::internal(format!("transaction {} was dropped without a result", id))
}

impl Future for ResponseHandle {
    type Output = TransactionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                self.taken = true;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                self.taken = true;
                Poll::Ready(Err(abandoned(id)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
