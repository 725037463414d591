//! Transacciones: builder → WireTransaction (id = SHA-256 canónico) →
//! SignedTransaction → LedgerTransaction (entradas resueltas) para verificar.
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::{Amount, Currency, Issued};
use crate::crypto::{DigitalSignature, KeyPair, PublicKey, SecureHash};
use crate::errors::DomainError;
use crate::hashing::sha256_canonical;
use crate::identity::Party;
use crate::state::{StateAndRef, StateRef, TransactionState};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CashCommand {
    /// El nonce distingue dos emisiones por lo demás idénticas.
    Issue { nonce: u64 },
    Move,
    Exit { amount: Amount<Issued<Currency>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandKind {
    Issue,
    Move,
    Exit,
}

impl CashCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            CashCommand::Issue { .. } => CommandKind::Issue,
            CashCommand::Move => CommandKind::Move,
            CashCommand::Exit { .. } => CommandKind::Exit,
        }
    }
}

/// Comando + claves que deben firmar la transacción para autorizarlo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    pub value: CashCommand,
    pub signers: Vec<PublicKey>,
}

impl Command {
    pub fn new(value: CashCommand, signers: impl IntoIterator<Item = PublicKey>) -> Self {
        let set: BTreeSet<PublicKey> = signers.into_iter().collect();
        Self { value,
               signers: set.into_iter().collect() }
    }

    pub fn signed_by_all<'a>(&self, keys: impl IntoIterator<Item = &'a PublicKey>) -> bool {
        keys.into_iter().all(|k| self.signers.contains(k))
    }
}

/// Ventana de validez; extremos abiertos si son `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { from: Some(from),
               until: Some(until) }
    }

    pub fn until_only(until: DateTime<Utc>) -> Self {
        Self { from: None,
               until: Some(until) }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from.map_or(true, |f| instant >= f) && self.until.map_or(true, |u| instant < u)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTransaction {
    pub inputs: Vec<StateRef>,
    pub outputs: Vec<TransactionState>,
    pub commands: Vec<Command>,
    pub notary: Option<Party>,
    pub time_window: Option<TimeWindow>,
}

impl WireTransaction {
    pub fn id(&self) -> Result<SecureHash, DomainError> {
        sha256_canonical(self).map(SecureHash)
    }

    /// Firmantes exigidos: todos los firmantes de comandos, más el notario si
    /// hay entradas o ventana de tiempo.
    pub fn required_signing_keys(&self) -> BTreeSet<PublicKey> {
        let mut keys: BTreeSet<PublicKey> = self.commands.iter().flat_map(|c| c.signers.iter().copied()).collect();
        if let Some(notary) = &self.notary {
            if !self.inputs.is_empty() || self.time_window.is_some() {
                keys.insert(notary.owning_key);
            }
        }
        keys
    }

    pub fn out_ref(&self, index: u32) -> Result<StateRef, DomainError> {
        Ok(StateRef::new(self.id()?, index))
    }

    /// Salidas con su referencia ya calculada.
    pub fn out_refs(&self) -> Result<Vec<StateAndRef>, DomainError> {
        let id = self.id()?;
        Ok(self.outputs
               .iter()
               .enumerate()
               .map(|(i, s)| StateAndRef { state: s.clone(),
                                           reference: StateRef::new(id, i as u32) })
               .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub by: PublicKey,
    pub signature: DigitalSignature,
}

impl TransactionSignature {
    pub fn sign(key: &KeyPair, tx_id: &SecureHash) -> Self {
        Self { by: key.public(),
               signature: key.sign(tx_id.as_bytes()) }
    }

    pub fn verify(&self, tx_id: &SecureHash) -> Result<(), DomainError> {
        self.by.verify(tx_id.as_bytes(), &self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: WireTransaction,
    pub sigs: Vec<TransactionSignature>,
}

impl SignedTransaction {
    pub fn id(&self) -> Result<SecureHash, DomainError> {
        self.tx.id()
    }

    pub fn with_signature(mut self, sig: TransactionSignature) -> Self {
        if !self.sigs.iter().any(|s| s.by == sig.by) {
            self.sigs.push(sig);
        }
        self
    }

    /// Verifica todas las firmas presentes y que no falte ninguna requerida,
    /// salvo las de `allowed_missing`.
    pub fn verify_signatures_except(&self, allowed_missing: &[PublicKey]) -> Result<(), DomainError> {
        let id = self.id()?;
        for sig in &self.sigs {
            sig.verify(&id)?;
        }
        let present: BTreeSet<PublicKey> = self.sigs.iter().map(|s| s.by).collect();
        let missing: Vec<String> = self.tx
                                       .required_signing_keys()
                                       .into_iter()
                                       .filter(|k| !present.contains(k) && !allowed_missing.contains(k))
                                       .map(|k| k.to_string())
                                       .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DomainError::MissingSignatures(missing))
        }
    }

    pub fn verify_required_signatures(&self) -> Result<(), DomainError> {
        self.verify_signatures_except(&[])
    }

    /// Resuelve las entradas con `resolve` y arma la vista verificable.
    pub fn to_ledger_transaction<F>(&self, resolve: F) -> Result<LedgerTransaction, DomainError>
        where F: Fn(&StateRef) -> Option<TransactionState>
    {
        let inputs = self.tx
                         .inputs
                         .iter()
                         .map(|r| {
                             resolve(r).map(|state| StateAndRef { state, reference: *r })
                                       .ok_or_else(|| DomainError::UnresolvedInput(r.to_string()))
                         })
                         .collect::<Result<Vec<_>, _>>()?;
        Ok(LedgerTransaction { id: self.id()?,
                               inputs,
                               outputs: self.tx.outputs.clone(),
                               commands: self.tx.commands.clone(),
                               notary: self.tx.notary.clone(),
                               time_window: self.tx.time_window })
    }
}

/// Transacción con entradas resueltas; es lo que verifican los contratos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub id: SecureHash,
    pub inputs: Vec<StateAndRef>,
    pub outputs: Vec<TransactionState>,
    pub commands: Vec<Command>,
    pub notary: Option<Party>,
    pub time_window: Option<TimeWindow>,
}

/// Builder mutable usado por el coin selector y los flows.
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    pub notary: Option<Party>,
    inputs: Vec<StateAndRef>,
    outputs: Vec<TransactionState>,
    commands: Vec<Command>,
    time_window: Option<TimeWindow>,
}

impl TransactionBuilder {
    pub fn new(notary: Option<Party>) -> Self {
        Self { notary,
               ..Default::default() }
    }

    pub fn add_input_state(&mut self, input: StateAndRef) -> &mut Self {
        if self.notary.is_none() {
            self.notary = Some(input.state.notary.clone());
        }
        self.inputs.push(input);
        self
    }

    pub fn add_output_state(&mut self, output: TransactionState) -> &mut Self {
        self.outputs.push(output);
        self
    }

    pub fn add_command(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn set_time_window(&mut self, window: TimeWindow) -> &mut Self {
        self.time_window = Some(window);
        self
    }

    pub fn inputs(&self) -> &[StateAndRef] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TransactionState] {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut Vec<TransactionState> {
        &mut self.outputs
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn to_wire_transaction(&self) -> WireTransaction {
        WireTransaction { inputs: self.inputs.iter().map(|i| i.reference).collect(),
                          outputs: self.outputs.clone(),
                          commands: self.commands.clone(),
                          notary: self.notary.clone(),
                          time_window: self.time_window }
    }

    pub fn to_ledger_transaction(&self) -> Result<LedgerTransaction, DomainError> {
        let wtx = self.to_wire_transaction();
        Ok(LedgerTransaction { id: wtx.id()?,
                               inputs: self.inputs.clone(),
                               outputs: wtx.outputs,
                               commands: wtx.commands,
                               notary: wtx.notary,
                               time_window: wtx.time_window })
    }

    pub fn sign_with(&self, keys: &[&KeyPair]) -> Result<SignedTransaction, DomainError> {
        let tx = self.to_wire_transaction();
        let id = tx.id()?;
        let sigs = keys.iter().map(|k| TransactionSignature::sign(k, &id)).collect();
        Ok(SignedTransaction { tx, sigs })
    }
}
