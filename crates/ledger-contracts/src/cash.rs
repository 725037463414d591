//! Contrato de efectivo: `Group(FirstOf(Issue, ConserveAmount))`.
use std::collections::BTreeSet;

use indexmap::IndexMap;
use ledger_domain::{Amount, AmountSum, CashCommand, CashState, Command, CommandKind, Currency, Issued,
                    LedgerTransaction, PublicKey};

use crate::clauses::{verify_clause, Clause, FirstOf, GroupClauseVerifier, InOutGroup, MatchedCommands};
use crate::errors::VerificationError;

pub type CashToken = Issued<Currency>;

/// Agrupa entradas y salidas por token (moneda + emisor), en orden de
/// primera aparición.
pub fn group_cash_states(tx: &LedgerTransaction) -> Vec<InOutGroup<CashState, CashToken>> {
    let mut groups: IndexMap<CashToken, InOutGroup<CashState, CashToken>> = IndexMap::new();
    for input in &tx.inputs {
        group_for(&mut groups, &input.state.data.amount.token).inputs.push(input.state.data.clone());
    }
    for output in &tx.outputs {
        group_for(&mut groups, &output.data.amount.token).outputs.push(output.data.clone());
    }
    groups.into_values().collect()
}

fn group_for<'a>(groups: &'a mut IndexMap<CashToken, InOutGroup<CashState, CashToken>>,
                 token: &CashToken)
                 -> &'a mut InOutGroup<CashState, CashToken> {
    groups.entry(token.clone()).or_insert_with(|| InOutGroup { inputs: vec![],
                                                               outputs: vec![],
                                                               key: token.clone() })
}

fn sum_of(states: &[CashState], token: &CashToken) -> Result<Amount<CashToken>, VerificationError> {
    Ok(states.iter().map(|s| &s.amount).sum_or_zero(token.clone())?)
}

/// Emisión: un único comando Issue firmado por el emisor y aumento neto del
/// suministro del token.
pub struct IssueClause;

impl Clause<CashState, CashToken> for IssueClause {
    fn name(&self) -> &'static str {
        "Issue"
    }

    fn required_commands(&self) -> BTreeSet<CommandKind> {
        BTreeSet::from([CommandKind::Issue])
    }

    fn verify(&self,
              _tx: &LedgerTransaction,
              inputs: &[CashState],
              outputs: &[CashState],
              commands: &[Command],
              grouping_key: Option<&CashToken>)
              -> Result<MatchedCommands, VerificationError> {
        let token = grouping_key.ok_or(VerificationError::MissingGroupingKey)?;
        let issues: Vec<&Command> = commands.iter().filter(|c| c.value.kind() == CommandKind::Issue).collect();
        let [issue] = issues.as_slice() else {
            return Err(VerificationError::IssueCommandCount(issues.len()));
        };
        let issuer_key = token.issuer.party.owning_key;
        if !issue.signers.contains(&issuer_key) {
            return Err(VerificationError::MissingIssuerSignature { issuer: token.issuer.party.name.clone() });
        }
        let input = sum_of(inputs, token)?;
        let output = sum_of(outputs, token)?;
        if output.quantity <= input.quantity {
            return Err(VerificationError::IssueDoesNotIncrease { token: token.to_string() });
        }
        Ok(BTreeSet::from([issue.value.clone()]))
    }
}

/// Conservación: `sum(inputs) == sum(outputs) + exited`, con autorización de
/// todos los dueños de las entradas.
pub struct ConserveAmount;

impl Clause<CashState, CashToken> for ConserveAmount {
    fn name(&self) -> &'static str {
        "ConserveAmount"
    }

    fn must_be_last(&self) -> bool {
        true
    }

    fn verify(&self,
              _tx: &LedgerTransaction,
              inputs: &[CashState],
              outputs: &[CashState],
              commands: &[Command],
              grouping_key: Option<&CashToken>)
              -> Result<MatchedCommands, VerificationError> {
        let token = grouping_key.ok_or(VerificationError::MissingGroupingKey)?;
        if inputs.is_empty() {
            return Err(VerificationError::NoInputs { token: token.to_string() });
        }
        if inputs.iter().any(|s| s.amount.is_zero()) {
            return Err(VerificationError::ZeroSizedInput { token: token.to_string() });
        }

        let owners: BTreeSet<PublicKey> = inputs.iter().map(|s| s.owner).collect();
        let exit_keys: BTreeSet<PublicKey> = inputs.iter().flat_map(|s| s.exit_keys()).collect();
        let exit = commands.iter().find(|c| match &c.value {
                                      CashCommand::Exit { amount } => amount.token == *token,
                                      _ => false,
                                  });
        if let Some(exit) = exit.filter(|c| !c.signed_by_all(&exit_keys)) {
            let missing = exit_keys.iter()
                                   .filter(|k| !exit.signers.contains(k))
                                   .map(|k| k.to_string())
                                   .collect();
            return Err(VerificationError::MissingExitSignature { missing });
        }
        let moves: Vec<&Command> = commands.iter().filter(|c| c.value == CashCommand::Move).collect();

        if moves.is_empty() && exit.is_none() {
            return Err(VerificationError::MissingMoveOrExit { token: token.to_string() });
        }
        if !moves.is_empty() && !moves.iter().any(|m| m.signed_by_all(&owners)) {
            let signed: BTreeSet<PublicKey> = moves.iter().flat_map(|m| m.signers.iter().copied()).collect();
            let missing = owners.difference(&signed).map(|k| k.to_string()).collect();
            return Err(VerificationError::MissingMoveSignature { missing });
        }

        let input_amount = sum_of(inputs, token)?;
        let output_amount = sum_of(outputs, token)?;
        let exited = match exit.map(|c| &c.value) {
            Some(CashCommand::Exit { amount }) => amount.quantity,
            _ => 0,
        };
        let balanced = output_amount.quantity
                                    .checked_add(exited)
                                    .map_or(false, |rhs| rhs == input_amount.quantity);
        if !balanced {
            return Err(VerificationError::AmountMismatch { token: token.to_string(),
                                                           inputs: input_amount.quantity,
                                                           outputs: output_amount.quantity,
                                                           exited });
        }

        let mut matched: MatchedCommands = moves.iter().map(|m| m.value.clone()).collect();
        if let Some(exit) = exit {
            matched.insert(exit.value.clone());
        }
        Ok(matched)
    }
}

pub struct CashContract;

impl CashContract {
    pub fn clause() -> Result<GroupClauseVerifier<CashState, CashToken>, VerificationError> {
        let clauses: Vec<Box<dyn Clause<CashState, CashToken>>> = vec![Box::new(IssueClause), Box::new(ConserveAmount)];
        let first = FirstOf::new(clauses)?;
        Ok(GroupClauseVerifier::new(Box::new(first), group_cash_states))
    }

    /// Verifica la transacción completa; devuelve los comandos consumidos.
    pub fn verify(tx: &LedgerTransaction) -> Result<MatchedCommands, VerificationError> {
        let clause = Self::clause()?;
        let matched = verify_clause(tx, &clause, &tx.commands)?;
        log::debug!("cash.verify:ok tx={} matched={}", tx.id.short(), matched.len());
        Ok(matched)
    }
}
