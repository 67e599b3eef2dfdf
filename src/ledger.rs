// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Lock-free account balances.
//!
//! The [`Ledger`] owns one balance cell per account for the whole process
//! lifetime. Each cell is an independent `AtomicI64` holding the balance in
//! minor units (the configured maximum scale, cents by default), so transfers
//! touching unrelated accounts never contend, and transfers sharing an account
//! only serialize through compare-and-set retries.
//!
//! # Invariants
//!
//! - The account set is fixed at construction.
//! - No balance is ever negative: a debit only lands if the value it was
//!   computed from is still current and covers the amount.
//! - The sum of all balances stays below `i64::MAX` minor units. Transfers
//!   conserve that sum, so a credit can never overflow and has no failure mode.
//!
//! # Example
//!
//! ```
//! use money_transfer::{AccountId, Ledger};
//! use rust_decimal_macros::dec;
//!
//! let ledger = Ledger::new(
//!     [(AccountId::from("a"), dec!(10)), (AccountId::from("b"), dec!(0))],
//!     2,
//! )
//! .unwrap();
//!
//! let a = ledger.account("a").unwrap();
//! let b = ledger.account("b").unwrap();
//! let amount = ledger.amount(dec!(2.50)).unwrap();
//!
//! ledger.transfer(a, b, amount).unwrap();
//! assert_eq!(ledger.balance("a"), Some(dec!(7.50)));
//! assert_eq!(ledger.balance("b"), Some(dec!(2.50)));
//! ```

use crate::base::AccountId;
use crate::error::{ConfigError, TransferError};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Largest supported balance scale; `10^18` still fits in `i64`.
pub const MAX_SUPPORTED_SCALE: u32 = 18;

/// Position of an account inside a [`Ledger`].
///
/// Only meaningful for the ledger that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountIndex(usize);

/// A validated, strictly positive transfer amount in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(i64);

impl Amount {
    pub fn minor_units(self) -> i64 {
        self.0
    }
}

/// Fixed set of accounts with atomic balance cells.
#[derive(Debug)]
pub struct Ledger {
    index: HashMap<AccountId, AccountIndex>,
    ids: Vec<AccountId>,
    cells: Box<[AtomicI64]>,
    scale: u32,
}

impl Ledger {
    /// Builds a ledger from initial balances.
    ///
    /// Accounts are stored in id order, which is also the order of
    /// [`Ledger::balances`].
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnsupportedScale`] if `scale` exceeds [`MAX_SUPPORTED_SCALE`].
    /// - [`ConfigError::DuplicateAccount`] if an id appears twice.
    /// - [`ConfigError::InvalidBalance`] for a negative balance or one with more
    ///   fractional digits than `scale`.
    /// - [`ConfigError::BalanceOverflow`] if the total does not fit the ledger.
    pub fn new(
        accounts: impl IntoIterator<Item = (AccountId, Decimal)>,
        scale: u32,
    ) -> Result<Self, ConfigError> {
        if scale > MAX_SUPPORTED_SCALE {
            return Err(ConfigError::UnsupportedScale(scale));
        }

        let mut entries: Vec<(AccountId, i64)> = Vec::new();
        let mut total: i64 = 0;
        for (id, balance) in accounts {
            if balance.is_sign_negative() && !balance.is_zero() {
                return Err(ConfigError::InvalidBalance(id, balance));
            }
            let Some(units) = to_minor_units(balance, scale) else {
                return Err(ConfigError::InvalidBalance(id, balance));
            };
            // Strictly below i64::MAX so a saturated amount is never covered.
            total = total
                .checked_add(units)
                .filter(|total| *total < i64::MAX)
                .ok_or(ConfigError::BalanceOverflow)?;
            entries.push((id, units));
        }
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut index = HashMap::with_capacity(entries.len());
        let mut ids = Vec::with_capacity(entries.len());
        let mut cells = Vec::with_capacity(entries.len());
        for (position, (id, units)) in entries.into_iter().enumerate() {
            if index.insert(id.clone(), AccountIndex(position)).is_some() {
                return Err(ConfigError::DuplicateAccount(id));
            }
            ids.push(id);
            cells.push(AtomicI64::new(units));
        }

        Ok(Self {
            index,
            ids,
            cells: cells.into_boxed_slice(),
            scale,
        })
    }

    /// Looks up an account by id.
    pub fn account(&self, id: &str) -> Option<AccountIndex> {
        self.index.get(id).copied()
    }

    /// Validates a transfer amount against this ledger's scale.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidAmount`] if the amount is not strictly
    /// positive or has more fractional digits than the ledger scale.
    ///
    /// Amounts beyond the `i64` range saturate to `i64::MAX` minor units,
    /// which no balance can reach, so their debit fails with
    /// [`TransferError::InsufficientFunds`].
    pub fn amount(&self, amount: Decimal) -> Result<Amount, TransferError> {
        if amount <= Decimal::ZERO || amount.scale() > self.scale {
            return Err(TransferError::InvalidAmount);
        }
        Ok(Amount(to_minor_units(amount, self.scale).unwrap_or(i64::MAX)))
    }

    /// Atomically decreases the balance by `amount` if it stays non-negative.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InsufficientFunds`] without touching the
    /// balance if, at any read, the balance is lower than `amount`.
    pub fn debit(&self, account: AccountIndex, amount: Amount) -> Result<(), TransferError> {
        let cell = &self.cells[account.0];
        let mut current = cell.load(Ordering::Acquire);
        loop {
            if current < amount.0 {
                return Err(TransferError::InsufficientFunds);
            }
            match cell.compare_exchange_weak(
                current,
                current - amount.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically increases the balance by `amount`.
    pub fn credit(&self, account: AccountIndex, amount: Amount) {
        let cell = &self.cells[account.0];
        let mut current = cell.load(Ordering::Acquire);
        loop {
            // Cannot overflow: no balance exceeds the conserved total.
            match cell.compare_exchange_weak(
                current,
                current + amount.0,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Moves `amount` from `sender` to `recipient`.
    ///
    /// The sender is debited first; if that fails nothing is credited. Once
    /// the debit lands the credit always completes, so the pair conserves the
    /// ledger total.
    pub fn transfer(
        &self,
        sender: AccountIndex,
        recipient: AccountIndex,
        amount: Amount,
    ) -> Result<(), TransferError> {
        self.debit(sender, amount)?;
        self.credit(recipient, amount);
        Ok(())
    }

    /// Snapshot of one account's balance, `None` for unknown ids.
    pub fn balance(&self, id: &str) -> Option<Decimal> {
        self.account(id).map(|account| self.balance_of(account))
    }

    pub fn balance_of(&self, account: AccountIndex) -> Decimal {
        Decimal::new(self.cells[account.0].load(Ordering::Acquire), self.scale)
    }

    /// Snapshot of every balance, ordered by account id.
    ///
    /// Cells are read one by one, so under concurrent transfers the snapshot
    /// is not a consistent cut.
    pub fn balances(&self) -> Vec<(AccountId, Decimal)> {
        (0..self.ids.len())
            .map(|position| {
                let account = AccountIndex(position);
                (self.ids[position].clone(), self.balance_of(account))
            })
            .collect()
    }

    /// Sum of all balances.
    pub fn total(&self) -> Decimal {
        let units: i64 = self.cells.iter().map(|cell| cell.load(Ordering::Acquire)).sum();
        Decimal::new(units, self.scale)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Converts a decimal into minor units at `scale`.
///
/// Returns `None` when the value has more fractional digits than `scale`
/// or does not fit in `i64`.
fn to_minor_units(value: Decimal, scale: u32) -> Option<i64> {
    let value_scale = value.scale();
    if value_scale > scale {
        return None;
    }
    let factor = 10i128.checked_pow(scale - value_scale)?;
    let units = value.mantissa().checked_mul(factor)?;
    i64::try_from(units).ok()
}
