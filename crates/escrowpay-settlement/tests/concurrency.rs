//! Races on a single escrow and a single booking.
//!
//! Whatever the interleaving, an escrow exits custody once and the wallet
//! sees exactly one credit for it.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{Pipeline, ip};
use escrowpay_settlement::WalletLedger;
use escrowpay_types::{Amount, EscrowPayError, EscrowStatus, ReferenceType, WalletReference};

#[tokio::test]
async fn instant_payout_races_refund() {
    let p = Pipeline::new();

    for round in 0..20u8 {
        let (booking, request) = p.booking_request(10_000, ip(round));
        let escrow = p.orch.initiate_payment(request).await.unwrap().escrow;

        let barrier = Arc::new(Barrier::new(2));
        let payout = {
            let orch = Arc::clone(&p.orch);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                orch.instant_payout(escrow.id)
            })
        };
        let refund = {
            let orch = Arc::clone(&p.orch);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                orch.refund(escrow.id, "buyer cancelled", None)
            })
        };
        let payout = payout.join().unwrap();
        let refund = refund.join().unwrap();

        assert!(payout.is_ok() ^ refund.is_ok(), "round {round}: exactly one winner");
        let loser = if payout.is_ok() { refund } else { payout };
        assert!(matches!(loser, Err(EscrowPayError::InvalidStateTransition { .. })));

        let row = p.orch.ledger().get(escrow.id).unwrap();
        let seller = p.wallet.balance(booking.seller_id);
        let buyer = p.wallet.balance(booking.buyer_id);
        match row.status {
            EscrowStatus::Released => {
                assert_eq!(seller, Amount::new(9_000));
                assert_eq!(buyer, Amount::ZERO);
            }
            EscrowStatus::Refunded => {
                assert_eq!(seller, Amount::ZERO);
                assert_eq!(buyer, Amount::new(10_000));
            }
            other => panic!("round {round}: unexpected status {other}"),
        }
    }
    p.orch.verify_conservation().unwrap();
}

#[tokio::test]
async fn many_releasers_one_credit() {
    let p = Pipeline::new();
    let (booking, request) = p.booking_request(50_000, ip(42));
    let escrow = p.orch.initiate_payment(request).await.unwrap().escrow;

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let orch = Arc::clone(&p.orch);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                orch.instant_payout(escrow.id).is_ok()
            })
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(wins, 1);
    assert_eq!(p.wallet.entries(booking.seller_id).len(), 1);
    assert_eq!(p.wallet.balance(booking.seller_id), Amount::new(45_000));
    assert!(
        p.wallet
            .entry_for(&WalletReference::new(ReferenceType::EscrowRelease, escrow.id))
            .is_some()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payments_for_one_booking_collect_once() {
    let p = Pipeline::new();
    let (booking, request) = p.booking_request(10_000, ip(77));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let orch = Arc::clone(&p.orch);
            let request = request.clone();
            tokio::spawn(async move { orch.initiate_payment(request).await })
        })
        .collect();

    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(
                EscrowPayError::PaymentInProgress { .. } | EscrowPayError::DuplicateEscrow { .. },
            ) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(ok, 1);
    // Losers are turned away before the provider: one collection, one escrow.
    assert_eq!(p.momo.calls(), 1);
    let rows = p.orch.ledger().by_booking(booking.booking_id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, EscrowStatus::Held);
}
