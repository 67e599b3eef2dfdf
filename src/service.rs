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

//! Transfer service facade.
//!
//! [`TransferService`] ties the [`Ledger`], the [`WorkerPool`] and the
//! [`IdempotencyCache`] together:
//!
//! ```text
//! Received ─► Validated ─┬─► Rejected (AccountNotFound | InvalidAmount)
//!                        ├─► Deduplicated (existing handle)
//!                        └─► Scheduled ─► Executing ─┬─► Completed
//!                                                    └─► Failed (InsufficientFunds)
//! ```
//!
//! Validation failures are returned synchronously and never stored under the
//! idempotency key, so a corrected retry with the same key goes through.
//! Execution outcomes, failures included, are shared by every request that
//! carries the same key while it stays live in the cache.
//!
//! # Example
//!
//! ```
//! use money_transfer::{Config, TransferError, TransferService, demo_accounts};
//! use rust_decimal_macros::dec;
//!
//! let service = TransferService::new(&Config::default(), demo_accounts()).unwrap();
//!
//! let handle = service.transfer("a", "b", dec!(10), "k1").unwrap();
//! assert_eq!(handle.wait(), Ok(()));
//!
//! // Same key: the first outcome is replayed, nothing moves twice.
//! let replay = service.transfer("a", "b", dec!(10), "k1").unwrap();
//! assert_eq!(replay.wait(), Ok(()));
//! assert_eq!(service.balance("a"), Some(dec!(0)));
//!
//! // New key: a genuine second transfer.
//! let second = service.transfer("a", "b", dec!(10), "k2").unwrap();
//! assert_eq!(second.wait(), Err(TransferError::InsufficientFunds));
//! service.shutdown();
//! ```

use crate::base::AccountId;
use crate::config::Config;
use crate::error::{ConfigError, TransferError};
use crate::idempotency::IdempotencyCache;
use crate::ledger::Ledger;
use crate::worker_pool::{TransferHandle, TransferTask, WorkerPool};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

/// Non-blocking, idempotent money transfers between a fixed set of accounts.
pub struct TransferService {
    ledger: Arc<Ledger>,
    pool: WorkerPool,
    cache: IdempotencyCache,
}

impl TransferService {
    /// Builds the ledger from `accounts` and starts the worker pool.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for invalid initial balances or if worker
    /// threads cannot be spawned.
    pub fn new(
        config: &Config,
        accounts: impl IntoIterator<Item = (AccountId, Decimal)>,
    ) -> Result<Self, ConfigError> {
        let ledger = Arc::new(Ledger::new(accounts, config.balance_max_scale)?);
        let pool = WorkerPool::new(config.processing_threads, config.shutdown_progress_interval)?;
        let cache = IdempotencyCache::new(config.idempotency_ttl);
        info!(
            accounts = ledger.len(),
            total = %ledger.total(),
            "transfer service started"
        );

        Ok(Self {
            ledger,
            pool,
            cache,
        })
    }

    /// Moves `amount` from `sender` to `recipient` once per idempotency key.
    ///
    /// Returns immediately with a handle to the transfer outcome. The first
    /// call for a key schedules the transfer; later calls with the same key
    /// get the same handle, whatever their other arguments.
    ///
    /// # Errors
    ///
    /// - [`TransferError::AccountNotFound`] if either account is unknown.
    /// - [`TransferError::InvalidAmount`] if `amount` is not positive or has
    ///   more fractional digits than the configured maximum.
    /// - [`TransferError::ShuttingDown`] if the key is new and the service no
    ///   longer accepts transfers.
    ///
    /// None of these are remembered under the idempotency key. The handle
    /// itself resolves to `Ok(())` or [`TransferError::InsufficientFunds`].
    pub fn transfer(
        &self,
        sender: &str,
        recipient: &str,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<TransferHandle, TransferError> {
        let sender_account = self
            .ledger
            .account(sender)
            .ok_or_else(|| TransferError::AccountNotFound(AccountId::from(sender)))?;
        let recipient_account = self
            .ledger
            .account(recipient)
            .ok_or_else(|| TransferError::AccountNotFound(AccountId::from(recipient)))?;
        let amount = self.ledger.amount(amount)?;

        self.cache.get_or_try_create(idempotency_key, || {
            debug!(
                sender,
                recipient,
                minor_units = amount.minor_units(),
                idempotency_key,
                "scheduling transfer"
            );
            self.pool.submit(TransferTask::new(
                Arc::clone(&self.ledger),
                sender_account,
                recipient_account,
                amount,
            ))
        })
    }

    /// Current balance of an account, for diagnostics.
    pub fn balance(&self, account: &str) -> Option<Decimal> {
        self.ledger.balance(account)
    }

    /// Current balance of every account, ordered by id.
    pub fn balances(&self) -> Vec<(AccountId, Decimal)> {
        self.ledger.balances()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Number of idempotency keys currently remembered.
    pub fn remembered_keys(&self) -> usize {
        self.cache.len()
    }

    /// Stops accepting transfers and blocks until scheduled ones complete.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        info!(total = %self.ledger.total(), "transfer service stopped");
    }
}
