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

use clap::Parser;
use money_transfer::{Config, TransferService, api, config, demo_accounts};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Money Transfer - Idempotent in-memory transfer service
///
/// Serves `POST /transfer?sender=..&recipient=..&amount=..` with a required
/// `Idempotency-Key` header. Balances live in memory only.
#[derive(Parser, Debug)]
#[command(name = "money-transfer")]
#[command(about = "An in-memory money transfer service", long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, env = "MONEY_TRANSFER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 picks a free port)
    #[arg(long, env = "MONEY_TRANSFER_PORT", default_value_t = Config::DEFAULT_PORT)]
    port: u16,

    /// Worker threads executing transfers [default: half the available cores]
    #[arg(long, env = "MONEY_TRANSFER_THREADS")]
    threads: Option<usize>,

    /// Maximum fractional digits for balances and amounts
    #[arg(long, env = "MONEY_TRANSFER_MAX_SCALE", default_value_t = Config::DEFAULT_MAX_SCALE)]
    max_scale: u32,

    /// Seconds an idempotency key is remembered after its last use
    #[arg(long, env = "MONEY_TRANSFER_IDEMPOTENCY_TTL_SECS", default_value_t = Config::DEFAULT_IDEMPOTENCY_TTL.as_secs())]
    idempotency_ttl_secs: u64,

    /// CSV file with initial balances
    ///
    /// Expected format: account,balance
    /// Without it, accounts `a` (10) and `b` (0) are created.
    #[arg(long, env = "MONEY_TRANSFER_ACCOUNTS", value_name = "FILE")]
    accounts: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "MONEY_TRANSFER_LOG", default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            host: self.host.clone(),
            port: self.port,
            processing_threads: self
                .threads
                .unwrap_or_else(Config::default_processing_threads),
            balance_max_scale: self.max_scale,
            idempotency_ttl: Duration::from_secs(self.idempotency_ttl_secs),
            ..Config::default()
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);
    let config = args.config();

    let accounts = match &args.accounts {
        Some(path) => match config::load_accounts(path) {
            Ok(accounts) => accounts,
            Err(e) => {
                error!("Error loading accounts from '{}': {}", path.display(), e);
                process::exit(1);
            }
        },
        None => demo_accounts(),
    };

    let service = match TransferService::new(&config, accounts) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("Error starting transfer service: {}", e);
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind((config.host.as_str(), config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Error binding {}:{}: {}", config.host, config.port, e);
            process::exit(1);
        }
    };
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "server started");
    }

    if let Err(e) = api::serve(listener, Arc::clone(&service), shutdown_signal()).await {
        error!("Server error: {}", e);
    }

    // Drain scheduled transfers off the async runtime.
    let drained = Arc::clone(&service);
    if let Err(e) = tokio::task::spawn_blocking(move || drained.shutdown()).await {
        error!("Error during shutdown: {}", e);
    }

    for (account, balance) in service.balances() {
        info!(%account, %balance, "final balance");
    }
    info!("server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
