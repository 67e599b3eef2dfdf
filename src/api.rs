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

//! HTTP front end.
//!
//! Exposes a single endpoint:
//!
//! ```text
//! POST /transfer?sender=<id>&recipient=<id>&amount=<decimal>
//! Idempotency-Key: <key>
//! ```
//!
//! Responses carry plain-text bodies. Success is `200` with an empty body;
//! every failure maps to a fixed status and message (see [`ApiError`]).
//!
//! ```bash
//! curl -X POST -H 'Idempotency-Key: 123' \
//!   'http://localhost:4646/transfer?sender=a&recipient=b&amount=2.50'
//! ```

use crate::error::TransferError;
use crate::service::TransferService;
use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
};
use rust_decimal::Decimal;
use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Request failures, rendered as the response status and body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Page not found.")]
    NotFound,

    #[error("Method not allowed.")]
    MethodNotAllowed,

    #[error("'Idempotency-Key' header is required.")]
    MissingIdempotencyKey,

    #[error("'{0}' param is required.")]
    MissingParam(&'static str),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::MissingIdempotencyKey | Self::MissingParam(_) => StatusCode::BAD_REQUEST,
            Self::Transfer(err) => StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Transfer(TransferError::Internal(message)) => {
                error!(%message, "unexpected transfer failure");
            }
            Self::Transfer(err) if err.is_validation() => debug!(%err, "transfer rejected"),
            _ => {}
        }
        (self.status(), self.to_string()).into_response()
    }
}

/// Builds the router serving `service`.
pub fn router(service: Arc<TransferService>) -> Router {
    Router::new()
        .route("/transfer", any(transfer))
        .fallback(not_found)
        .with_state(service)
}

/// Serves `service` on `listener` until `shutdown` completes.
///
/// Stops accepting connections and finishes in-flight requests, but leaves
/// the worker pool running; call [`TransferService::shutdown`] afterwards.
pub async fn serve<F>(
    listener: TcpListener,
    service: Arc<TransferService>,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// `/transfer` - Schedules a transfer and waits for its outcome.
async fn transfer(
    State(service): State<Arc<TransferService>>,
    method: Method,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode, ApiError> {
    if method != Method::POST {
        return Err(ApiError::MethodNotAllowed);
    }

    let key = idempotency_key(&headers)?;
    let sender = required_param(&params, "sender")?;
    let recipient = required_param(&params, "recipient")?;
    let amount = parse_amount(required_param(&params, "amount")?)?;

    service
        .transfer(sender, recipient, amount, &key)?
        .wait_async()
        .await?;

    Ok(StatusCode::OK)
}

/// Any non-empty header value is a key; non-UTF-8 bytes are replaced.
fn idempotency_key(headers: &HeaderMap) -> Result<Cow<'_, str>, ApiError> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| String::from_utf8_lossy(value.as_bytes()))
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::MissingIdempotencyKey)
}

fn required_param<'a>(
    params: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, ApiError> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::MissingParam(name))
}

/// Parses plain (`12.50`) or scientific (`1.25e1`) notation.
fn parse_amount(raw: &str) -> Result<Decimal, ApiError> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| ApiError::Transfer(TransferError::InvalidAmount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::AccountId;
    use axum::http::HeaderValue;
    use rust_decimal_macros::dec;

    #[test]
    fn error_bodies() {
        assert_eq!(ApiError::NotFound.to_string(), "Page not found.");
        assert_eq!(ApiError::MethodNotAllowed.to_string(), "Method not allowed.");
        assert_eq!(
            ApiError::MissingIdempotencyKey.to_string(),
            "'Idempotency-Key' header is required."
        );
        assert_eq!(
            ApiError::MissingParam("sender").to_string(),
            "'sender' param is required."
        );
        assert_eq!(
            ApiError::from(TransferError::AccountNotFound(AccountId::from("c"))).to_string(),
            "Account 'c' not found."
        );
    }

    #[test]
    fn error_statuses() {
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ApiError::MissingParam("amount").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(TransferError::InsufficientFunds).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(TransferError::ShuttingDown).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn amount_parsing() {
        assert_eq!(parse_amount("10"), Ok(dec!(10)));
        assert_eq!(parse_amount("0.01"), Ok(dec!(0.01)));
        assert_eq!(parse_amount("1.5e1"), Ok(dec!(15)));
        assert_eq!(
            parse_amount("ten"),
            Err(ApiError::Transfer(TransferError::InvalidAmount))
        );
    }

    #[test]
    fn idempotency_key_accepts_any_non_empty_value() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers), Err(ApiError::MissingIdempotencyKey));

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static(""));
        assert_eq!(idempotency_key(&headers), Err(ApiError::MissingIdempotencyKey));

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("123"));
        assert_eq!(idempotency_key(&headers).unwrap(), "123");

        headers.insert(
            IDEMPOTENCY_KEY_HEADER,
            HeaderValue::from_bytes(b"k\xff").unwrap(),
        );
        assert_eq!(idempotency_key(&headers).unwrap(), "k\u{fffd}");
    }

    #[test]
    fn empty_param_counts_as_missing() {
        let mut params = HashMap::new();
        params.insert("recipient".to_owned(), String::new());
        assert_eq!(
            required_param(&params, "recipient"),
            Err(ApiError::MissingParam("recipient"))
        );
        assert_eq!(
            required_param(&params, "sender"),
            Err(ApiError::MissingParam("sender"))
        );
    }
}
