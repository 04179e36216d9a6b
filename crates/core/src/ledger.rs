//! Account balances keyed by address.
//!
//! Every block carries the ledger as it stands *after* its transactions.
//! Block assembly works on a clone, so an abandoned mining attempt never
//! touches the committed balances.

use crate::crypto::Address;
use crate::transaction::SignedTransaction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while applying transfers to a ledger.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds: {address} has {available} but transfer requires {required}")]
    InsufficientFunds {
        address: Address,
        required: i64,
        available: i64,
    },

    #[error("balance overflow for {0}")]
    Overflow(Address),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Address → balance mapping. Absent addresses hold zero.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ledger {
    balances: BTreeMap<Address, i64>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger from an initial allocation.
    pub fn from_allocation<I>(allocation: I) -> Self
    where
        I: IntoIterator<Item = (Address, i64)>,
    {
        let mut ledger = Self::new();
        for (address, amount) in allocation {
            ledger.apply_delta(&address, amount);
        }
        ledger
    }

    /// Balance of an address, zero when unknown.
    pub fn balance(&self, address: &Address) -> i64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    /// Add a (possibly negative) amount to an address.
    pub fn apply_delta(&mut self, address: &Address, amount: i64) {
        let entry = self.balances.entry(*address).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Move `amount` from sender to recipient if the sender can cover it.
    ///
    /// The ledger is unchanged on error.
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: i64) -> Result<()> {
        let available = self.balance(from);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                address: *from,
                required: amount,
                available,
            });
        }
        let credited = self
            .balance(to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow(*to))?;

        self.balances.insert(*from, available - amount);
        self.balances.insert(*to, credited);
        Ok(())
    }

    /// Apply a signed transaction's transfer.
    pub fn apply(&mut self, tx: &SignedTransaction) -> Result<()> {
        let t = &tx.transaction;
        self.transfer(&t.sender, &t.recipient, t.amount)
    }

    /// Replay a sequence of transactions on a copy of this ledger.
    pub fn replay<'a, I>(&self, transactions: I) -> Result<Ledger>
    where
        I: IntoIterator<Item = &'a SignedTransaction>,
    {
        let mut next = self.clone();
        for tx in transactions {
            next.apply(tx)?;
        }
        Ok(next)
    }

    /// Iterate over all known balances.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &i64)> {
        self.balances.iter()
    }

    /// Number of addresses with an entry.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    /// Whether no address has an entry.
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}
