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

//! Concurrent transfer integration tests.
//!
//! These tests hammer the service from many threads and check that balances
//! are conserved, never negative, and that idempotency keys stay single-flight.

use money_transfer::{AccountId, Config, TransferError, TransferService};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

// === Helper Functions ===

fn service_with(accounts: &[(&str, Decimal)]) -> Arc<TransferService> {
    Arc::new(
        TransferService::new(
            &Config::default(),
            accounts
                .iter()
                .map(|(id, balance)| (AccountId::from(*id), *balance)),
        )
        .unwrap(),
    )
}

/// Random amount in [0.01, 10.00].
fn random_amount(rng: &mut StdRng) -> Decimal {
    Decimal::new(rng.gen_range(1..=1000), 2)
}

static KEYS: AtomicUsize = AtomicUsize::new(0);

fn unique_key() -> String {
    format!("key-{}", KEYS.fetch_add(1, Ordering::Relaxed))
}

// === Tests ===

/// Two threads move random amounts in opposite directions.
/// The sum of both balances must stay 10.
#[test]
fn random_opposing_transfers_conserve_total() {
    let service = service_with(&[("a", dec!(10)), ("b", dec!(0))]);
    const TRANSFERS: usize = 3000;

    let workers: Vec<_> = [("a", "b", 46u64), ("b", "a", 64u64)]
        .into_iter()
        .map(|(sender, recipient, seed)| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..TRANSFERS {
                    let outcome = service
                        .transfer(sender, recipient, random_amount(&mut rng), &unique_key())
                        .unwrap()
                        .wait();
                    assert!(matches!(outcome, Ok(()) | Err(TransferError::InsufficientFunds)));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("Thread panicked");
    }

    let a = service.balance("a").unwrap();
    let b = service.balance("b").unwrap();
    assert_eq!(a + b, dec!(10));
    assert!(a >= Decimal::ZERO);
    assert!(b >= Decimal::ZERO);
}

/// Two threads drain `a` into `b` concurrently.
/// `a` must end at exactly zero without ever going negative.
#[test]
fn concurrent_drain_never_overdraws() {
    let service = service_with(&[("a", dec!(10)), ("b", dec!(0))]);

    let workers: Vec<_> = [46u64, 64u64]
        .into_iter()
        .map(|seed| {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                loop {
                    let available = service.balance("a").unwrap();
                    assert!(available >= Decimal::ZERO, "overdraft observed: {available}");
                    if available.is_zero() {
                        break;
                    }
                    let amount = random_amount(&mut rng).min(available);
                    let outcome = service
                        .transfer("a", "b", amount, &unique_key())
                        .unwrap()
                        .wait();
                    assert!(matches!(outcome, Ok(()) | Err(TransferError::InsufficientFunds)));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("Thread panicked");
    }

    assert_eq!(service.balance("a"), Some(dec!(0)));
    assert_eq!(service.balance("b"), Some(dec!(10)));
}

/// Many threads submit the same key at once with different parameters.
/// Exactly one transfer runs and everyone sees its outcome.
#[test]
fn same_key_is_single_flight() {
    let service = service_with(&[("a", dec!(1000)), ("b", dec!(0))]);
    const THREADS: usize = 32;
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (1..=THREADS)
        .map(|i| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                service
                    .transfer("a", "b", Decimal::from(i), "shared-key")
                    .unwrap()
            })
        })
        .collect();

    let handles: Vec<_> = workers
        .into_iter()
        .map(|worker| worker.join().expect("Thread panicked"))
        .collect();

    assert!(handles.iter().all(|h| h.same_transfer(&handles[0])));
    assert!(handles.iter().all(|h| h.wait() == Ok(())));

    let moved = service.balance("b").unwrap();
    assert!(moved >= dec!(1) && moved <= Decimal::from(THREADS));
    assert_eq!(service.balance("a").unwrap() + moved, dec!(1000));
    assert_eq!(service.remembered_keys(), 1);
}

/// Concurrent replays of a failing key all observe the same failure.
#[test]
fn same_key_failure_is_shared() {
    let service = service_with(&[("a", dec!(10)), ("b", dec!(0))]);

    let outcomes: Vec<_> = (0..64)
        .into_par_iter()
        .map(|_| service.transfer("a", "b", dec!(11), "doomed").unwrap().wait())
        .collect();

    assert!(
        outcomes
            .iter()
            .all(|outcome| *outcome == Err(TransferError::InsufficientFunds))
    );
    assert_eq!(service.balance("a"), Some(dec!(10)));
}

/// Random transfers between many accounts from the rayon pool.
#[test]
fn many_accounts_conserve_total() {
    let ids: Vec<String> = (0..10).map(|i| format!("acc{i}")).collect();
    let accounts: Vec<(&str, Decimal)> = ids.iter().map(|id| (id.as_str(), dec!(100))).collect();
    let service = service_with(&accounts);

    let handles: Vec<_> = (0..10_000u64)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(i);
            let sender = &ids[rng.gen_range(0..ids.len())];
            let recipient = &ids[rng.gen_range(0..ids.len())];
            service
                .transfer(sender, recipient, random_amount(&mut rng), &format!("bulk-{i}"))
                .unwrap()
        })
        .collect();

    for handle in &handles {
        assert!(matches!(
            handle.wait(),
            Ok(()) | Err(TransferError::InsufficientFunds)
        ));
    }

    assert_eq!(service.ledger().total(), dec!(1000));
    for (account, balance) in service.balances() {
        assert!(balance >= Decimal::ZERO, "{account} went negative: {balance}");
    }
}
