//! Composición de cláusulas de verificación.
//!
//! Una cláusula verifica un grupo de estados (entradas/salidas de un mismo
//! token) y devuelve los comandos que "consumió". Al final de la verificación
//! todo comando de la transacción debe haber sido consumido por alguna
//! cláusula.
use std::collections::BTreeSet;

use ledger_domain::{CashCommand, Command, CommandKind, LedgerTransaction};

use crate::errors::VerificationError;

pub type MatchedCommands = BTreeSet<CashCommand>;

pub trait Clause<S, K>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tipos de comando que deben estar presentes para que la cláusula aplique.
    fn required_commands(&self) -> BTreeSet<CommandKind> {
        BTreeSet::new()
    }

    /// Cláusulas "catch-all" que deben cerrar su composición.
    fn must_be_last(&self) -> bool {
        false
    }

    fn matches(&self, commands: &[Command]) -> bool {
        let present: BTreeSet<CommandKind> = commands.iter().map(|c| c.value.kind()).collect();
        self.required_commands().is_subset(&present)
    }

    fn verify(&self,
              tx: &LedgerTransaction,
              inputs: &[S],
              outputs: &[S],
              commands: &[Command],
              grouping_key: Option<&K>)
              -> Result<MatchedCommands, VerificationError>;
}

fn check_ordering<S, K>(clauses: &[Box<dyn Clause<S, K>>]) -> Result<(), VerificationError> {
    let last = clauses.len().saturating_sub(1);
    match clauses.iter().enumerate().find(|(i, c)| c.must_be_last() && *i != last) {
        Some((_, c)) => Err(VerificationError::ClauseOrdering(c.name().to_string())),
        None => Ok(()),
    }
}

/// Todas las cláusulas deben aplicar y verificar.
pub struct AllOf<S, K> {
    clauses: Vec<Box<dyn Clause<S, K>>>,
}

impl<S, K> AllOf<S, K> {
    pub fn new(clauses: Vec<Box<dyn Clause<S, K>>>) -> Result<Self, VerificationError> {
        check_ordering(&clauses)?;
        Ok(Self { clauses })
    }
}

impl<S, K> Clause<S, K> for AllOf<S, K> {
    fn name(&self) -> &'static str {
        "AllOf"
    }

    fn must_be_last(&self) -> bool {
        self.clauses.iter().any(|c| c.must_be_last())
    }

    fn required_commands(&self) -> BTreeSet<CommandKind> {
        self.clauses.iter().flat_map(|c| c.required_commands()).collect()
    }

    fn verify(&self,
              tx: &LedgerTransaction,
              inputs: &[S],
              outputs: &[S],
              commands: &[Command],
              grouping_key: Option<&K>)
              -> Result<MatchedCommands, VerificationError> {
        let mut matched = MatchedCommands::new();
        for clause in &self.clauses {
            if !clause.matches(commands) {
                return Err(VerificationError::ClauseNotMatched(clause.name().to_string()));
            }
            matched.extend(clause.verify(tx, inputs, outputs, commands, grouping_key)?);
        }
        Ok(matched)
    }
}

/// Ejecuta toda cláusula que aplique; al menos una debe aplicar.
pub struct AnyOf<S, K> {
    clauses: Vec<Box<dyn Clause<S, K>>>,
}

impl<S, K> AnyOf<S, K> {
    pub fn new(clauses: Vec<Box<dyn Clause<S, K>>>) -> Result<Self, VerificationError> {
        check_ordering(&clauses)?;
        Ok(Self { clauses })
    }
}

impl<S, K> Clause<S, K> for AnyOf<S, K> {
    fn name(&self) -> &'static str {
        "AnyOf"
    }

    fn must_be_last(&self) -> bool {
        self.clauses.iter().any(|c| c.must_be_last())
    }

    fn verify(&self,
              tx: &LedgerTransaction,
              inputs: &[S],
              outputs: &[S],
              commands: &[Command],
              grouping_key: Option<&K>)
              -> Result<MatchedCommands, VerificationError> {
        let mut matched = MatchedCommands::new();
        let mut any = false;
        for clause in self.clauses.iter().filter(|c| c.matches(commands)) {
            any = true;
            matched.extend(clause.verify(tx, inputs, outputs, commands, grouping_key)?);
        }
        if any {
            Ok(matched)
        } else {
            Err(VerificationError::NoClauseMatched)
        }
    }
}

/// Ejecuta sólo la primera cláusula que aplique.
pub struct FirstOf<S, K> {
    clauses: Vec<Box<dyn Clause<S, K>>>,
}

impl<S, K> FirstOf<S, K> {
    pub fn new(clauses: Vec<Box<dyn Clause<S, K>>>) -> Result<Self, VerificationError> {
        check_ordering(&clauses)?;
        Ok(Self { clauses })
    }
}

impl<S, K> Clause<S, K> for FirstOf<S, K> {
    fn name(&self) -> &'static str {
        "FirstOf"
    }

    fn must_be_last(&self) -> bool {
        self.clauses.iter().any(|c| c.must_be_last())
    }

    fn verify(&self,
              tx: &LedgerTransaction,
              inputs: &[S],
              outputs: &[S],
              commands: &[Command],
              grouping_key: Option<&K>)
              -> Result<MatchedCommands, VerificationError> {
        let clause = self.clauses
                         .iter()
                         .find(|c| c.matches(commands))
                         .ok_or(VerificationError::NoClauseMatched)?;
        clause.verify(tx, inputs, outputs, commands, grouping_key)
    }
}

/// Entradas y salidas de una transacción que comparten clave de agrupación.
#[derive(Debug, Clone, PartialEq)]
pub struct InOutGroup<S, K> {
    pub inputs: Vec<S>,
    pub outputs: Vec<S>,
    pub key: K,
}

pub type GroupFn<S, K> = fn(&LedgerTransaction) -> Vec<InOutGroup<S, K>>;

/// Agrupa los estados de la transacción y aplica la cláusula interna a cada
/// grupo por separado.
pub struct GroupClauseVerifier<S, K> {
    clause: Box<dyn Clause<S, K>>,
    group: GroupFn<S, K>,
}

impl<S, K> GroupClauseVerifier<S, K> {
    pub fn new(clause: Box<dyn Clause<S, K>>, group: GroupFn<S, K>) -> Self {
        Self { clause, group }
    }
}

impl<S, K> Clause<(), ()> for GroupClauseVerifier<S, K> {
    fn name(&self) -> &'static str {
        "Group"
    }

    fn verify(&self,
              tx: &LedgerTransaction,
              _inputs: &[()],
              _outputs: &[()],
              commands: &[Command],
              _grouping_key: Option<&()>)
              -> Result<MatchedCommands, VerificationError> {
        let mut matched = MatchedCommands::new();
        for group in (self.group)(tx) {
            matched.extend(self.clause.verify(tx, &group.inputs, &group.outputs, commands, Some(&group.key))?);
        }
        Ok(matched)
    }
}

/// Punto de entrada: verifica la cláusula raíz y exige que todo comando haya
/// sido consumido.
pub fn verify_clause(tx: &LedgerTransaction,
                     clause: &dyn Clause<(), ()>,
                     commands: &[Command])
                     -> Result<MatchedCommands, VerificationError> {
    let matched = clause.verify(tx, &[], &[], commands, None)?;
    let unmatched: Vec<String> = commands.iter()
                                         .filter(|c| !matched.contains(&c.value))
                                         .map(|c| format!("{:?}", c.value.kind()))
                                         .collect();
    if unmatched.is_empty() {
        Ok(matched)
    } else {
        Err(VerificationError::UnmatchedCommands(unmatched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        last: bool,
        requires: Option<CommandKind>,
    }

    impl Clause<u64, ()> for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn must_be_last(&self) -> bool {
            self.last
        }

        fn required_commands(&self) -> BTreeSet<CommandKind> {
            self.requires.into_iter().collect()
        }

        fn verify(&self,
                  _tx: &LedgerTransaction,
                  _inputs: &[u64],
                  _outputs: &[u64],
                  _commands: &[Command],
                  _key: Option<&()>)
                  -> Result<MatchedCommands, VerificationError> {
            Ok(BTreeSet::from([CashCommand::Move]))
        }
    }

    fn fixed(name: &'static str, last: bool, requires: Option<CommandKind>) -> Box<dyn Clause<u64, ()>> {
        Box::new(Fixed { name, last, requires })
    }

    #[test]
    fn must_be_last_is_enforced_at_construction() {
        let err = FirstOf::new(vec![fixed("catch-all", true, None), fixed("issue", false, None)]).err();
        assert_eq!(err, Some(VerificationError::ClauseOrdering("catch-all".into())));
        assert!(FirstOf::new(vec![fixed("issue", false, None), fixed("catch-all", true, None)]).is_ok());
        assert!(AllOf::new(vec![fixed("catch-all", true, None), fixed("x", false, None)]).is_err());
    }

    #[test]
    fn any_of_requires_at_least_one_match() {
        let any = AnyOf::new(vec![fixed("issue", false, Some(CommandKind::Issue))]).unwrap();
        let move_only = [Command::new(CashCommand::Move, [])];
        let tx = LedgerTransaction { id: ledger_domain::SecureHash::zero(),
                                     inputs: vec![],
                                     outputs: vec![],
                                     commands: move_only.to_vec(),
                                     notary: None,
                                     time_window: None };
        assert_eq!(any.verify(&tx, &[], &[], &move_only, None), Err(VerificationError::NoClauseMatched));
    }
}
