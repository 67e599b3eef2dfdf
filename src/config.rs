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

//! Service configuration and initial account loading.

use crate::base::AccountId;
use crate::error::ConfigError;
use csv::{ReaderBuilder, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Runtime settings for the transfer service and its HTTP front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    /// Zero asks the OS for a free port.
    pub port: u16,
    /// Worker threads executing transfers.
    pub processing_threads: usize,
    /// Maximum number of fractional digits in balances and amounts.
    pub balance_max_scale: u32,
    /// Idle time after which an idempotency key is forgotten.
    pub idempotency_ttl: Duration,
    /// How often shutdown reports that it is still draining.
    pub shutdown_progress_interval: Duration,
}

impl Config {
    pub const DEFAULT_PORT: u16 = 4646;
    pub const DEFAULT_MAX_SCALE: u32 = 2;
    pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);
    pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

    /// Half of the available hardware parallelism, at least one.
    pub fn default_processing_threads() -> usize {
        thread::available_parallelism()
            .map(|n| n.get() / 2)
            .unwrap_or(1)
            .max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: Self::DEFAULT_PORT,
            processing_threads: Self::default_processing_threads(),
            balance_max_scale: Self::DEFAULT_MAX_SCALE,
            idempotency_ttl: Self::DEFAULT_IDEMPOTENCY_TTL,
            shutdown_progress_interval: Self::DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Row of an accounts file.
///
/// Fields: `account, balance`
#[derive(Debug, Deserialize)]
struct AccountRecord {
    account: AccountId,
    balance: Decimal,
}

/// Reads initial balances from CSV.
///
/// # CSV Format
///
/// ```csv
/// account,balance
/// a,10
/// b,0
/// ```
///
/// # Errors
///
/// Returns [`ConfigError::Csv`] for unreadable or malformed rows. Balance
/// checks happen when the ledger is built.
pub fn read_accounts<R: Read>(reader: R) -> Result<Vec<(AccountId, Decimal)>, ConfigError> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let mut accounts = Vec::new();
    for result in rdr.deserialize::<AccountRecord>() {
        let record = result?;
        accounts.push((record.account, record.balance));
    }
    Ok(accounts)
}

/// Reads initial balances from a CSV file, see [`read_accounts`].
pub fn load_accounts(path: &Path) -> Result<Vec<(AccountId, Decimal)>, ConfigError> {
    let file = File::open(path)?;
    read_accounts(BufReader::new(file))
}

/// Accounts used when no accounts file is given.
pub fn demo_accounts() -> Vec<(AccountId, Decimal)> {
    vec![
        (AccountId::from("a"), Decimal::from(10)),
        (AccountId::from("b"), Decimal::ZERO),
    ]
}
