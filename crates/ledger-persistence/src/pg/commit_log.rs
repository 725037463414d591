use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use ledger_domain::{SecureHash, StateRef};
use ledger_notary::commit_log::{evaluate_commit, Evaluation};
use ledger_notary::{CommitEntry, CommitOutcome, CommitRequest, NotaryError, UniquenessProvider};
use log::debug;

use crate::error::PersistenceError;
use crate::pg::{with_retry, with_retry_n, ConnectionProvider};
use crate::schema::notary_commit_log;

#[derive(Queryable, Insertable, Debug)]
#[diesel(table_name = notary_commit_log)]
pub struct CommitRow {
    pub tx_hash: String,
    pub output_index: i32,
    pub consuming_tx_id: String,
    pub input_index: i32,
    pub requesting_party: String,
    pub committed_at: DateTime<Utc>,
}

impl CommitRow {
    fn into_entry(self) -> Result<CommitEntry, PersistenceError> {
        let txhash = SecureHash::from_hex(&self.tx_hash).map_err(|e| PersistenceError::CorruptedRow(e.to_string()))?;
        let consuming_tx =
            SecureHash::from_hex(&self.consuming_tx_id).map_err(|e| PersistenceError::CorruptedRow(e.to_string()))?;
        Ok(CommitEntry { state_ref: StateRef::new(txhash, self.output_index as u32),
                         consuming_tx,
                         input_index: self.input_index as u32,
                         requesting_party: self.requesting_party,
                         committed_at: self.committed_at })
    }
}

/// Reintentos ante conflictos de serialización; con varios competidores
/// sobre el mismo estado cada intento fallido deja ver al ganador.
const COMMIT_RETRIES: u32 = 10;

fn find_row(conn: &mut PgConnection, state: &StateRef) -> QueryResult<Option<CommitRow>> {
    notary_commit_log::table.find((state.txhash.to_hex(), state.index as i32))
                            .first::<CommitRow>(conn)
                            .optional()
}

/// Log de commits del notario de un solo nodo, durable en Postgres.
///
/// Cada solicitud se decide dentro de una transacción `SERIALIZABLE`: dos
/// solicitudes concurrentes sobre el mismo estado nunca pueden insertar
/// ambas; la perdedora se reintenta y ve la fila de la ganadora.
pub struct PgUniquenessProvider<P: ConnectionProvider> {
    provider: Arc<P>,
}

impl<P: ConnectionProvider> PgUniquenessProvider<P> {
    pub fn new(provider: P) -> Self {
        Self { provider: Arc::new(provider) }
    }

    fn commit_blocking(provider: &P, request: &CommitRequest) -> Result<Result<CommitOutcome, NotaryError>, PersistenceError> {
        with_retry_n(COMMIT_RETRIES, || {
            let mut conn = provider.connection()?;
            conn.build_transaction()
                .serializable()
                .run(|tx| {
                    let mut seen = HashMap::new();
                    for state in &request.states {
                        if let Some(row) = find_row(tx, state)? {
                            seen.insert(*state, row.into_entry()?.consuming_tx);
                        }
                    }
                    let evaluation = match evaluate_commit(request, |s| Ok(seen.get(s).copied())) {
                        Ok(evaluation) => evaluation,
                        Err(e) => return Ok(Err(e)),
                    };
                    match evaluation {
                        Evaluation::Conflict { state_ref, consuming_tx } => {
                            Ok(Err(NotaryError::Conflict { state_ref, consuming_tx }))
                        }
                        Evaluation::Replay => Ok(Ok(CommitOutcome::AlreadyCommitted)),
                        Evaluation::Fresh => {
                            let consuming_tx_id = request.tx_id.to_hex();
                            for (i, state) in request.states.iter().enumerate() {
                                if seen.contains_key(state) {
                                    continue;
                                }
                                let row = CommitRow { tx_hash: state.txhash.to_hex(),
                                                      output_index: state.index as i32,
                                                      consuming_tx_id: consuming_tx_id.clone(),
                                                      input_index: i as i32,
                                                      requesting_party: request.requester.clone(),
                                                      committed_at: request.requested_at };
                                diesel::insert_into(notary_commit_log::table).values(&row).execute(tx)?;
                            }
                            Ok(Ok(CommitOutcome::Committed))
                        }
                    }
                })
                // Una inserción concurrente sobre la misma clave se decide en
                // el siguiente intento.
                .map_err(|e: PersistenceError| match e {
                    PersistenceError::UniqueViolation(_) => PersistenceError::SerializationConflict,
                    other => other,
                })
        })
    }
}

#[async_trait]
impl<P: ConnectionProvider> UniquenessProvider for PgUniquenessProvider<P> {
    async fn commit(&self, request: CommitRequest) -> Result<CommitOutcome, NotaryError> {
        let provider = self.provider.clone();
        let tx = request.tx_id;
        let result = tokio::task::spawn_blocking(move || Self::commit_blocking(&provider, &request))
            .await
            .map_err(|e| NotaryError::Storage(format!("commit task: {e}")))??;
        debug!("pg_commit_log.commit tx={} result={result:?}", tx.short());
        result
    }

    async fn consumer_of(&self, state: &StateRef) -> Result<Option<CommitEntry>, NotaryError> {
        let provider = self.provider.clone();
        let state = *state;
        let row = tokio::task::spawn_blocking(move || {
                      with_retry(|| {
                          let mut conn = provider.connection()?;
                          find_row(&mut conn, &state).map_err(PersistenceError::from)
                      })
                  }).await
                    .map_err(|e| NotaryError::Storage(format!("query task: {e}")))??;
        Ok(row.map(CommitRow::into_entry).transpose()?)
    }
}
