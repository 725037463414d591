//! Selección de monedas (coin selection) para gastar y retirar efectivo.
//!
//! Los candidatos se recorren en el orden dado por el llamador; no se intenta
//! minimizar el cambio ni el número de entradas.
use std::collections::BTreeSet;

use indexmap::IndexMap;
use ledger_domain::{Amount, CashCommand, CashState, Command, Currency, DomainError, Issued, Party, PublicKey,
                    StateAndRef, TransactionBuilder, TransactionState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[error("insufficient balance, missing {shortfall}")]
pub struct InsufficientBalance {
    pub shortfall: Amount<Currency>,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SelectionError {
    #[error(transparent)]
    Insufficient(#[from] InsufficientBalance),
    #[error("amount to move must be positive")]
    NonPositiveAmount,
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
}

/// Resultado de `generate_spend`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spend {
    /// Claves que deben firmar (dueños de las entradas).
    pub signers: Vec<PublicKey>,
    pub gathered: Vec<StateAndRef>,
    pub change: Option<Amount<Issued<Currency>>>,
}

fn gather_coins(candidates: &[StateAndRef],
                amount: &Amount<Currency>)
                -> Result<(Vec<StateAndRef>, u64), InsufficientBalance> {
    let mut gathered = Vec::new();
    let mut total: u64 = 0;
    for coin in candidates.iter().filter(|c| c.state.data.amount.token.product == amount.token) {
        if total >= amount.quantity {
            break;
        }
        total = total.saturating_add(coin.state.data.amount.quantity);
        gathered.push(coin.clone());
    }
    if total < amount.quantity {
        return Err(InsufficientBalance { shortfall: Amount::new(amount.quantity - total, amount.token.clone()) });
    }
    Ok((gathered, total))
}

fn owners(states: &[StateAndRef]) -> BTreeSet<PublicKey> {
    states.iter().map(|s| s.state.data.owner).collect()
}

/// Agrega a `tx` las entradas necesarias para pagar `amount` a `to`, una
/// salida por emisor y, si sobra, una salida de cambio para el dueño original.
pub fn generate_spend(tx: &mut TransactionBuilder,
                      amount: &Amount<Currency>,
                      to: PublicKey,
                      candidates: &[StateAndRef])
                      -> Result<Spend, SelectionError> {
    if amount.quantity == 0 {
        return Err(SelectionError::NonPositiveAmount);
    }
    let (gathered, total) = gather_coins(candidates, amount)?;
    let (Some(first), Some(last)) = (gathered.first(), gathered.last()) else {
        return Err(InsufficientBalance { shortfall: amount.clone() }.into());
    };
    let original_owner = first.state.data.owner;
    let change_token = last.state.data.amount.token.clone();
    let notary = tx.notary.clone().unwrap_or_else(|| first.state.notary.clone());

    let mut per_issuer: IndexMap<Issued<Currency>, u64> = IndexMap::new();
    for coin in &gathered {
        let slot = per_issuer.entry(coin.state.data.amount.token.clone()).or_insert(0);
        *slot = slot.checked_add(coin.state.data.amount.quantity).ok_or(DomainError::Overflow)?;
    }
    let mut outputs: Vec<TransactionState> =
        per_issuer.into_iter()
                  .map(|(token, quantity)| TransactionState { data: CashState::new(Amount::new(quantity, token), to),
                                                              notary: notary.clone() })
                  .collect();
    outputs.sort_by_key(|o| o.data.amount.quantity);

    let change_quantity = total - amount.quantity;
    let change = if change_quantity > 0 {
        // El cambio sale del token de la última moneda recogida; se descuenta
        // de la última salida con ese mismo token.
        if let Some(out) = outputs.iter_mut().rev().find(|o| o.data.amount.token == change_token) {
            let have = out.data.amount.quantity;
            out.data.amount.quantity = have.checked_sub(change_quantity)
                                           .ok_or(DomainError::Underflow { have,
                                                                           need: change_quantity })?;
        }
        let change = Amount::new(change_quantity, change_token);
        outputs.push(TransactionState { data: CashState::new(change.clone(), original_owner),
                                        notary });
        Some(change)
    } else {
        None
    };

    for coin in &gathered {
        tx.add_input_state(coin.clone());
    }
    for out in outputs {
        tx.add_output_state(out);
    }
    let signers = owners(&gathered);
    tx.add_command(Command::new(CashCommand::Move, signers.iter().copied()));

    log::debug!("generate_spend:ok amount={} inputs={} change={}",
                amount,
                gathered.len(),
                change_quantity);
    Ok(Spend { signers: signers.into_iter().collect(),
               gathered,
               change })
}

/// Retira `amount` del ledger. Sólo considera monedas del token exacto y del
/// notario de la primera candidata aceptable; el cambio va al dueño de la
/// primera candidata.
pub fn generate_exit(tx: &mut TransactionBuilder,
                     amount: &Amount<Issued<Currency>>,
                     candidates: &[StateAndRef])
                     -> Result<Vec<PublicKey>, SelectionError> {
    if amount.quantity == 0 {
        return Err(SelectionError::NonPositiveAmount);
    }
    let insufficient = || InsufficientBalance { shortfall: amount.without_issuer() };
    let same_token: Vec<&StateAndRef> = candidates.iter().filter(|c| c.state.data.amount.token == amount.token).collect();
    let notary = same_token.first().ok_or_else(insufficient)?.state.notary.clone();
    let acceptable: Vec<StateAndRef> = same_token.into_iter().filter(|c| c.state.notary == notary).cloned().collect();

    let (gathered, total) = gather_coins(&acceptable, &amount.without_issuer())?;
    // El cambio vuelve al dueño de las monedas gastadas.
    let owner = gathered.first().ok_or_else(insufficient)?.state.data.owner;
    let change_quantity = total - amount.quantity;
    if change_quantity > 0 {
        tx.add_output_state(TransactionState { data: CashState::new(Amount::new(change_quantity,
                                                                                amount.token.clone()),
                                                                    owner),
                                               notary });
    }
    for coin in &gathered {
        tx.add_input_state(coin.clone());
    }
    let move_signers = owners(&gathered);
    let exit_signers: BTreeSet<PublicKey> = gathered.iter().flat_map(|c| c.state.data.exit_keys()).collect();
    tx.add_command(Command::new(CashCommand::Move, move_signers.iter().copied()));
    tx.add_command(Command::new(CashCommand::Exit { amount: amount.clone() }, exit_signers.iter().copied()));

    Ok(move_signers.union(&exit_signers).copied().collect())
}

/// Emisión de `amount` a favor de `owner`; firma el emisor.
pub fn generate_issue(tx: &mut TransactionBuilder,
                      amount: Amount<Issued<Currency>>,
                      owner: PublicKey,
                      notary: Party,
                      nonce: u64)
                      -> Vec<PublicKey> {
    let issuer_key = amount.token.issuer.party.owning_key;
    if tx.notary.is_none() {
        tx.notary = Some(notary.clone());
    }
    tx.add_output_state(TransactionState { data: CashState::new(amount, owner),
                                           notary });
    tx.add_command(Command::new(CashCommand::Issue { nonce }, [issuer_key]));
    vec![issuer_key]
}
