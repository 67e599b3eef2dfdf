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

//! # Money Transfer
//!
//! This library provides an in-memory money transfer engine that moves funds
//! between a fixed set of accounts under concurrent load. It guarantees that
//! the total balance is conserved, that no balance goes negative, and that
//! requests repeated with the same idempotency key execute at most once.
//!
//! ## Core Components
//!
//! - [`Ledger`]: Account balances as lock-free atomic cells with debit/credit primitives
//! - [`WorkerPool`]: Fixed set of threads running transfers asynchronously
//! - [`IdempotencyCache`]: Single-flight map from idempotency key to transfer outcome
//! - [`TransferService`]: Facade validating requests and scheduling transfers
//! - [`api`]: HTTP endpoint (`POST /transfer`) on top of the service
//!
//! ## Example
//!
//! ```
//! use money_transfer::{Config, TransferService, demo_accounts};
//! use rust_decimal_macros::dec;
//!
//! let service = TransferService::new(&Config::default(), demo_accounts()).unwrap();
//!
//! // Returns immediately; the transfer runs on the worker pool.
//! let handle = service.transfer("a", "b", dec!(2.50), "request-1").unwrap();
//! handle.wait().unwrap();
//!
//! assert_eq!(service.balance("a"), Some(dec!(7.50)));
//! assert_eq!(service.balance("b"), Some(dec!(2.50)));
//! ```
//!
//! ## Thread Safety
//!
//! Transfers on unrelated accounts never block each other. Transfers sharing
//! an account contend only through compare-and-set retries, never a mutex.

pub mod api;
mod base;
pub mod config;
pub mod error;
mod idempotency;
pub mod ledger;
mod service;
mod worker_pool;

pub use base::AccountId;
pub use config::{Config, demo_accounts};
pub use error::{ConfigError, TransferError};
pub use idempotency::IdempotencyCache;
pub use ledger::{AccountIndex, Amount, Ledger};
pub use service::TransferService;
pub use worker_pool::{TransferHandle, TransferTask, WorkerPool};
