use std::sync::{Mutex, MutexGuard};

use indexmap::IndexMap;
use ledger_domain::Party;

/// Directorio de participantes. El descubrimiento de pares queda fuera de
/// este crate; los nodos reciben un mapa ya poblado.
pub trait NetworkMap: Send + Sync {
    fn party(&self, name: &str) -> Option<Party>;

    fn notaries(&self) -> Vec<Party>;

    fn parties(&self) -> Vec<Party>;
}

#[derive(Default)]
struct Entries {
    parties: IndexMap<String, Party>,
    notaries: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryNetworkMap {
    entries: Mutex<Entries>,
}

impl InMemoryNetworkMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn register(&self, party: Party) {
        self.lock().parties.insert(party.name.clone(), party);
    }

    pub fn register_notary(&self, party: Party) {
        let mut entries = self.lock();
        if !entries.notaries.contains(&party.name) {
            entries.notaries.push(party.name.clone());
        }
        entries.parties.insert(party.name.clone(), party);
    }
}

impl NetworkMap for InMemoryNetworkMap {
    fn party(&self, name: &str) -> Option<Party> {
        self.lock().parties.get(name).cloned()
    }

    fn notaries(&self) -> Vec<Party> {
        let entries = self.lock();
        entries.notaries.iter().filter_map(|n| entries.parties.get(n).cloned()).collect()
    }

    fn parties(&self) -> Vec<Party> {
        self.lock().parties.values().cloned().collect()
    }
}
