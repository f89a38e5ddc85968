//! Module implement transaction discipline over a [Pile].
//!
//! Every mutating operation runs inside a transaction. Transactions
//! nest, only the outermost commit persists; an abandoned guard rolls
//! its transaction back. Long insertions can be split into
//! sub-transactions with a [Checkpointer], callers must be idempotent
//! across checkpoints.

use std::ops::{Deref, DerefMut};

use crate::{pile::Pile, Result};

/// RAII transaction guard. Dropping the guard without calling
/// [TxnGuard::commit] rolls the transaction back.
pub struct TxnGuard<'a> {
    pile: &'a mut Pile,
    done: bool,
}

impl<'a> TxnGuard<'a> {
    pub fn new(pile: &'a mut Pile, exclusive: bool) -> Result<TxnGuard<'a>> {
        pile.begin(exclusive)?;
        Ok(TxnGuard { pile, done: false })
    }

    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        self.pile.commit()
    }

    pub fn rollback(mut self) -> Result<()> {
        self.done = true;
        self.pile.rollback()
    }
}

impl<'a> Drop for TxnGuard<'a> {
    fn drop(&mut self) {
        if !self.done {
            self.pile.rollback().ok();
        }
    }
}

impl<'a> Deref for TxnGuard<'a> {
    type Target = Pile;

    fn deref(&self) -> &Pile {
        self.pile
    }
}

impl<'a> DerefMut for TxnGuard<'a> {
    fn deref_mut(&mut self) -> &mut Pile {
        self.pile
    }
}

/// Thresholds for splitting a long insertion into sub-transactions.
#[derive(Clone, Copy, Debug)]
pub struct CheckpointConfig {
    pub n_calls: usize,
    pub n_bytes: usize,
}

impl Default for CheckpointConfig {
    fn default() -> CheckpointConfig {
        CheckpointConfig { n_calls: 1000, n_bytes: 1024 * 1024 }
    }
}

/// Guard that commits the enclosing outermost transaction and opens a
/// fresh one once enough calls or bytes have accumulated.
pub struct Checkpointer {
    config: CheckpointConfig,
    exclusive: bool,
    calls: usize,
    bytes: usize,
}

impl Checkpointer {
    pub fn new(config: CheckpointConfig, exclusive: bool) -> Checkpointer {
        Checkpointer { config, exclusive, calls: 0, bytes: 0 }
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Count one call moving `bytes`; return whether a checkpoint is
    /// due. Counters reset when due.
    pub fn note(&mut self, bytes: usize) -> bool {
        self.calls += 1;
        self.bytes += bytes;
        if self.calls < self.config.n_calls && self.bytes < self.config.n_bytes {
            return false;
        }
        self.calls = 0;
        self.bytes = 0;
        true
    }

    /// Count one call moving `bytes` and checkpoint when due. Must be
    /// called with exactly one transaction open; return whether a
    /// checkpoint happened.
    pub fn tick(&mut self, pile: &mut Pile, bytes: usize) -> Result<bool> {
        if !self.note(bytes) {
            return Ok(false);
        }
        pile.commit()?;
        pile.begin(self.exclusive)?;
        Ok(true)
    }
}

#[cfg(test)]
#[path = "txn_test.rs"]
mod txn_test;
