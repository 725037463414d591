mod common;

use common::{dollars, Fixture};
use ledger_contracts::{generate_exit, generate_spend, CashContract, InsufficientBalance, SelectionError};
use ledger_domain::{Amount, AmountSum, CashCommand, TransactionBuilder};

#[test]
fn spend_gathers_in_order_and_returns_change() {
    let f = Fixture::new();
    let coins: Vec<_> = (0..3).map(|i| f.coin(i, 40, f.usd(), &f.alice)).collect();
    let mut tx = TransactionBuilder::new(Some(f.notary.clone()));

    let spend = generate_spend(&mut tx, &dollars(50), f.bob.public(), &coins).unwrap();

    assert_eq!(tx.inputs().len(), 2);
    assert_eq!(tx.inputs()[0].reference, coins[0].reference);
    assert_eq!(tx.inputs()[1].reference, coins[1].reference);
    assert_eq!(spend.change, Some(Amount::new(30, f.usd())));
    assert_eq!(spend.signers, vec![f.alice.public()]);

    let outs = tx.outputs();
    assert_eq!(outs.len(), 2);
    assert_eq!(outs[0].data.amount.quantity, 50);
    assert_eq!(outs[0].data.owner, f.bob.public());
    assert_eq!(outs[1].data.amount.quantity, 30);
    assert_eq!(outs[1].data.owner, f.alice.public());

    let ltx = tx.to_ledger_transaction().unwrap();
    assert!(CashContract::verify(&ltx).is_ok());
}

#[test]
fn shortfall_is_exact() {
    let f = Fixture::new();
    let coins = vec![f.coin(1, 10, f.usd(), &f.alice), f.coin(2, 15, f.usd(), &f.alice)];
    let mut tx = TransactionBuilder::new(None);
    let err = generate_spend(&mut tx, &dollars(100), f.bob.public(), &coins).unwrap_err();
    assert_eq!(err, SelectionError::Insufficient(InsufficientBalance { shortfall: dollars(75) }));
    assert!(tx.inputs().is_empty());
}

#[test]
fn multi_issuer_spend_conserves_value() {
    let f = Fixture::new();
    let other = f.usd_from(&f.other_bank, "OtherBank");
    let coins = vec![f.coin(1, 30, f.usd(), &f.alice),
                     f.coin(2, 20, other.clone(), &f.alice),
                     f.coin(3, 25, f.usd(), &f.alice)];
    let mut tx = TransactionBuilder::new(Some(f.notary.clone()));
    generate_spend(&mut tx, &dollars(60), f.bob.public(), &coins).unwrap();

    let gathered: u64 = tx.inputs().iter().map(|i| i.state.data.amount.quantity).sum();
    let produced: u64 = tx.outputs().iter().map(|o| o.data.amount.quantity).sum();
    assert_eq!(gathered, 75);
    assert_eq!(produced, gathered);

    let to_bob: u64 = tx.outputs()
                        .iter()
                        .filter(|o| o.data.owner == f.bob.public())
                        .map(|o| o.data.amount.quantity)
                        .sum();
    assert_eq!(to_bob, 60);
    // El cambio lleva el token de la última moneda recogida.
    let change = tx.outputs().last().unwrap();
    assert_eq!(change.data.owner, f.alice.public());
    assert_eq!(change.data.amount, Amount::new(15, f.usd()));

    let ltx = tx.to_ledger_transaction().unwrap();
    assert!(CashContract::verify(&ltx).is_ok());
}

#[test]
fn exit_builds_move_and_exit_commands() {
    let f = Fixture::new();
    let coins = vec![f.coin(1, 40, f.usd(), &f.bank), f.coin(2, 40, f.usd(), &f.bank)];
    let mut tx = TransactionBuilder::new(None);
    let signers = generate_exit(&mut tx, &Amount::new(50, f.usd()), &coins).unwrap();

    assert_eq!(signers, vec![f.bank.public()]);
    assert_eq!(tx.inputs().len(), 2);
    assert_eq!(tx.outputs().len(), 1);
    assert_eq!(tx.outputs()[0].data.amount.quantity, 30);
    assert!(tx.commands().iter().any(|c| c.value == CashCommand::Move));
    assert!(tx.commands()
              .iter()
              .any(|c| matches!(&c.value, CashCommand::Exit { amount } if amount.quantity == 50)));

    let ltx = tx.to_ledger_transaction().unwrap();
    CashContract::verify(&ltx).unwrap();
}

#[test]
fn exit_ignores_other_issuers() {
    let f = Fixture::new();
    let other = f.usd_from(&f.other_bank, "OtherBank");
    let coins = vec![f.coin(1, 100, other, &f.bank), f.coin(2, 10, f.usd(), &f.bank)];
    let mut tx = TransactionBuilder::new(None);
    let err = generate_exit(&mut tx, &Amount::new(50, f.usd()), &coins).unwrap_err();
    assert_eq!(err, SelectionError::Insufficient(InsufficientBalance { shortfall: dollars(40) }));
}

#[test]
fn exit_change_goes_to_the_owner_of_the_spent_coins() {
    let f = Fixture::new();
    let other = f.usd_from(&f.other_bank, "OtherBank");
    let coins = vec![f.coin(1, 100, other, &f.alice),
                     f.coin(2, 40, f.usd(), &f.bank),
                     f.coin(3, 40, f.usd(), &f.bank)];
    let mut tx = TransactionBuilder::new(None);
    generate_exit(&mut tx, &Amount::new(50, f.usd()), &coins).unwrap();

    assert_eq!(tx.inputs().len(), 2);
    assert_eq!(tx.outputs().len(), 1);
    assert_eq!(tx.outputs()[0].data.owner, f.bank.public());
    assert_eq!(tx.outputs()[0].data.amount, Amount::new(30, f.usd()));
    CashContract::verify(&tx.to_ledger_transaction().unwrap()).unwrap();
}

#[test]
fn zero_amount_is_rejected() {
    let f = Fixture::new();
    let coins = vec![f.coin(1, 10, f.usd(), &f.alice)];
    let mut tx = TransactionBuilder::new(None);
    assert_eq!(generate_spend(&mut tx, &dollars(0), f.bob.public(), &coins),
               Err(SelectionError::NonPositiveAmount));
}

mod props {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn selected_equals_outputs(quantities in proptest::collection::vec(1u64..1_000, 1..12),
                                   target in 1u64..5_000) {
            let f = Fixture::new();
            let coins: Vec<_> = quantities.iter()
                                          .enumerate()
                                          .map(|(i, q)| f.coin(i as u8, *q, f.usd(), &f.alice))
                                          .collect();
            let available: u64 = quantities.iter().sum();
            let mut tx = TransactionBuilder::new(Some(f.notary.clone()));
            match generate_spend(&mut tx, &dollars(target), f.bob.public(), &coins) {
                Ok(_) => {
                    let ins = tx.inputs().iter().map(|i| &i.state.data.amount).sum_or_error().unwrap();
                    let outs = tx.outputs().iter().map(|o| &o.data.amount).sum_or_error().unwrap();
                    prop_assert_eq!(ins, outs);
                }
                Err(SelectionError::Insufficient(e)) => {
                    prop_assert!(available < target);
                    prop_assert_eq!(e.shortfall.quantity, target - available);
                }
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }
    }
}
