//! Named, shareable deferred operations.
//!
//! A [`Deferred`] is settled once; any number of [`Operation`] handles can
//! await it, including handles taken after it settled. The
//! [`PromiseRegistry`] keeps at most one pending deferred per
//! [`OperationName`], which is how concurrent `connect`/`disconnect` calls
//! join the attempt already in flight instead of starting another.

use crate::error::{ClientError, ClientResult};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::watch;

/// Settlement state of a deferred operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// Not settled yet.
    Pending,
    /// Completed successfully.
    Resolved(T),
    /// Failed.
    Rejected(ClientError),
}

impl<T: Clone> Outcome<T> {
    fn settled(&self) -> Option<ClientResult<T>> {
        match self {
            Outcome::Pending => None,
            Outcome::Resolved(value) => Some(Ok(value.clone())),
            Outcome::Rejected(err) => Some(Err(err.clone())),
        }
    }
}

/// The settling side of an operation.
#[derive(Debug)]
pub struct Deferred<T> {
    tx: watch::Sender<Outcome<T>>,
}

impl<T: Clone> Deferred<T> {
    /// Creates a pending deferred.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Outcome::Pending);
        Self { tx }
    }

    /// Returns a handle observing this deferred.
    pub fn operation(&self) -> Operation<T> {
        Operation {
            rx: self.tx.subscribe(),
        }
    }

    /// Resolves if still pending. Returns false if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Outcome::Resolved(value))
    }

    /// Rejects if still pending. Returns false if already settled.
    pub fn reject(&self, error: ClientError) -> bool {
        self.settle(Outcome::Rejected(error))
    }

    /// Returns true until settled.
    pub fn is_pending(&self) -> bool {
        matches!(*self.tx.borrow(), Outcome::Pending)
    }

    fn settle(&self, outcome: Outcome<T>) -> bool {
        self.tx.send_if_modified(move |current| {
            if matches!(current, Outcome::Pending) {
                *current = outcome;
                true
            } else {
                false
            }
        })
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle on a deferred result.
#[derive(Debug, Clone)]
pub struct Operation<T = ()> {
    rx: watch::Receiver<Outcome<T>>,
}

impl<T: Clone> Operation<T> {
    /// An operation that already failed.
    pub fn rejected(error: ClientError) -> Self {
        let (_tx, rx) = watch::channel(Outcome::Rejected(error));
        Self { rx }
    }

    /// An operation that already succeeded.
    pub fn resolved(value: T) -> Self {
        let (_tx, rx) = watch::channel(Outcome::Resolved(value));
        Self { rx }
    }

    /// Current outcome without waiting.
    pub fn outcome(&self) -> Outcome<T> {
        self.rx.borrow().clone()
    }

    /// Waits for the outcome.
    ///
    /// A deferred dropped while pending counts as [`ClientError::Cancelled`].
    pub async fn wait(mut self) -> ClientResult<T> {
        loop {
            let settled = self.rx.borrow_and_update().settled();
            if let Some(result) = settled {
                return result;
            }
            if self.rx.changed().await.is_err() {
                let settled = self.rx.borrow().settled();
                return settled.unwrap_or(Err(ClientError::Cancelled));
            }
        }
    }
}

/// Names of the operations callers can join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationName {
    /// Opening the push transport.
    PushConnecting,
    /// Closing the push transport.
    PushDisconnecting,
    /// First successful room fetch over HTTP.
    PollingConnecting,
}

impl OperationName {
    /// Returns the name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationName::PushConnecting => "push:connecting",
            OperationName::PushDisconnecting => "push:disconnecting",
            OperationName::PollingConnecting => "polling:connecting",
        }
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// At most one pending operation per name.
#[derive(Debug, Default)]
pub struct PromiseRegistry {
    entries: HashMap<OperationName, Deferred<()>>,
}

impl PromiseRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pending operation of `name`, creating it if needed.
    pub fn begin(&mut self, name: OperationName) -> Operation {
        self.entries
            .entry(name)
            .or_insert_with(Deferred::new)
            .operation()
    }

    /// Resolves and removes the operation of `name`.
    ///
    /// Returns false if no operation was stored.
    pub fn resolve(&mut self, name: OperationName) -> bool {
        match self.entries.remove(&name) {
            Some(deferred) => {
                deferred.resolve(());
                true
            }
            None => false,
        }
    }

    /// Rejects and removes the operation of `name`.
    pub fn reject(&mut self, name: OperationName, error: ClientError) -> bool {
        match self.entries.remove(&name) {
            Some(deferred) => {
                deferred.reject(error);
                true
            }
            None => false,
        }
    }

    /// Returns the stored operation, or an already rejected one.
    pub fn get(&self, name: OperationName) -> Operation {
        self.entries
            .get(&name)
            .map(Deferred::operation)
            .unwrap_or_else(|| Operation::rejected(ClientError::Cancelled))
    }

    /// Returns true if an operation of `name` is pending.
    pub fn contains(&self, name: OperationName) -> bool {
        self.entries.contains_key(&name)
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rejects every pending operation with [`ClientError::Cancelled`].
    pub fn clear(&mut self) {
        for (_, deferred) in self.entries.drain() {
            deferred.reject(ClientError::Cancelled);
        }
    }
}
