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

//! Error types for transfer processing and service startup.

use crate::base::AccountId;
use thiserror::Error;

/// Transfer processing errors.
///
/// Variants carry no backtrace or other captured context: `InsufficientFunds`
/// is produced on the hot debit path and must stay cheap to build and clone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Sender or recipient is not part of the ledger
    #[error("Account '{0}' not found.")]
    AccountNotFound(AccountId),

    /// Amount is zero, negative, or has too many fractional digits
    #[error("'amount' param has invalid value.")]
    InvalidAmount,

    /// Sender balance is lower than the transferred amount
    #[error("Sender doesn't have enough money.")]
    InsufficientFunds,

    /// Worker pool no longer accepts tasks
    #[error("Service is shutting down.")]
    ShuttingDown,

    /// A transfer task failed unexpectedly
    #[error("{0}")]
    Internal(String),
}

impl TransferError {
    /// HTTP status code reported for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AccountNotFound(_) | Self::InvalidAmount => 400,
            Self::InsufficientFunds | Self::Internal(_) => 500,
            Self::ShuttingDown => 503,
        }
    }

    /// Validation errors are detected before scheduling and are never
    /// remembered under an idempotency key.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::AccountNotFound(_) | Self::InvalidAmount)
    }
}

/// Errors raised while building the ledger or loading startup configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed accounts file: {0}")]
    Csv(#[from] csv::Error),

    #[error("duplicate account '{0}'")]
    DuplicateAccount(AccountId),

    #[error("account '{0}' has invalid initial balance {1}")]
    InvalidBalance(AccountId, rust_decimal::Decimal),

    #[error("total initial balance does not fit the ledger")]
    BalanceOverflow,

    #[error("balance scale {0} is not supported (max 18)")]
    UnsupportedScale(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            TransferError::AccountNotFound(AccountId::from("c")).to_string(),
            "Account 'c' not found."
        );
        assert_eq!(
            TransferError::InvalidAmount.to_string(),
            "'amount' param has invalid value."
        );
        assert_eq!(
            TransferError::InsufficientFunds.to_string(),
            "Sender doesn't have enough money."
        );
        assert_eq!(TransferError::ShuttingDown.to_string(), "Service is shutting down.");
        assert_eq!(TransferError::Internal("boom".into()).to_string(), "boom");
    }

    #[test]
    fn http_status_codes() {
        assert_eq!(TransferError::AccountNotFound(AccountId::from("x")).http_status(), 400);
        assert_eq!(TransferError::InvalidAmount.http_status(), 400);
        assert_eq!(TransferError::InsufficientFunds.http_status(), 500);
        assert_eq!(TransferError::ShuttingDown.http_status(), 503);
        assert_eq!(TransferError::Internal(String::new()).http_status(), 500);
    }

    #[test]
    fn only_validation_errors_are_validation() {
        assert!(TransferError::InvalidAmount.is_validation());
        assert!(TransferError::AccountNotFound(AccountId::from("x")).is_validation());
        assert!(!TransferError::InsufficientFunds.is_validation());
        assert!(!TransferError::ShuttingDown.is_validation());
    }

    #[test]
    fn errors_are_cloneable() {
        let error = TransferError::InsufficientFunds;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
