//! Réplica Raft sin E/S.
//!
//! Cada llamada (`tick`, `step`, `propose`) devuelve las salidas que el
//! conductor debe ejecutar: mensajes a otras réplicas, entradas comprometidas
//! a aplicar en orden y cambios de liderazgo.
use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::raft::config::RaftConfig;
use crate::raft::message::{EntryPayload, LogEntry, LogIndex, NodeId, RaftMessage, Term};
use crate::raft::storage::{HardState, RaftError, RaftStorage};

const MAX_ENTRIES_PER_APPEND: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftOutput {
    Send { to: NodeId, message: RaftMessage },
    /// Entrada comprometida; se entregan en orden de índice, una sola vez.
    Apply(LogEntry),
    BecameLeader { term: Term },
    /// La réplica dejó de ser líder del término `term`; lo pendiente debe
    /// fallar y reintentarse contra el nuevo líder.
    LeadershipLost { term: Term },
}

pub struct RaftNode<St> {
    id: NodeId,
    peers: Vec<NodeId>,
    storage: St,
    role: Role,
    leader: Option<NodeId>,
    commit_index: LogIndex,
    last_applied: LogIndex,
    votes: BTreeSet<NodeId>,
    next_index: BTreeMap<NodeId, LogIndex>,
    match_index: BTreeMap<NodeId, LogIndex>,
    /// Réplicas que respondieron desde la última comprobación de quórum.
    recent_active: BTreeSet<NodeId>,
    heartbeat_ticks: u32,
    election_min: u32,
    election_max: u32,
    heartbeat_elapsed: u32,
    election_elapsed: u32,
    election_deadline: u32,
    rng: StdRng,
    out: Vec<RaftOutput>,
}

impl<St: RaftStorage> RaftNode<St> {
    pub fn new(id: NodeId, peers: Vec<NodeId>, storage: St, config: &RaftConfig) -> Self {
        let mut node = Self { id,
                              peers: peers.into_iter().filter(|p| *p != id).collect(),
                              storage,
                              role: Role::Follower,
                              leader: None,
                              commit_index: 0,
                              last_applied: 0,
                              votes: BTreeSet::new(),
                              next_index: BTreeMap::new(),
                              match_index: BTreeMap::new(),
                              recent_active: BTreeSet::new(),
                              heartbeat_ticks: config.heartbeat_ticks.max(1),
                              election_min: config.election_ticks_min.max(1),
                              election_max: config.election_ticks_max.max(config.election_ticks_min.max(1)),
                              heartbeat_elapsed: 0,
                              election_elapsed: 0,
                              election_deadline: 0,
                              rng: StdRng::seed_from_u64(id.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
                              out: Vec::new() };
        node.reset_election_timer();
        node
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn term(&self) -> Term {
        self.storage.hard_state().term
    }

    pub fn leader(&self) -> Option<NodeId> {
        self.leader
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn storage(&self) -> &St {
        &self.storage
    }

    fn majority(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    fn drain(&mut self) -> Vec<RaftOutput> {
        std::mem::take(&mut self.out)
    }

    fn reset_election_timer(&mut self) {
        self.election_elapsed = 0;
        self.election_deadline = self.rng.gen_range(self.election_min..=self.election_max);
    }

    pub fn tick(&mut self) -> Result<Vec<RaftOutput>, RaftError> {
        self.election_elapsed += 1;
        if self.role == Role::Leader {
            self.heartbeat_elapsed += 1;
            if self.heartbeat_elapsed >= self.heartbeat_ticks {
                self.heartbeat_elapsed = 0;
                self.broadcast_append();
            }
            if self.election_elapsed >= self.election_min {
                self.election_elapsed = 0;
                let active = self.recent_active.len() + 1;
                self.recent_active.clear();
                if active < self.majority() {
                    log::warn!("raft.check_quorum:step_down node={} term={} active={active}",
                               self.id,
                               self.term());
                    let term = self.term();
                    self.become_follower(term, None)?;
                }
            }
        } else if self.election_elapsed >= self.election_deadline {
            self.start_election()?;
        }
        Ok(self.drain())
    }

    /// Fuerza una elección inmediata.
    pub fn campaign(&mut self) -> Result<Vec<RaftOutput>, RaftError> {
        self.start_election()?;
        Ok(self.drain())
    }

    pub fn propose(&mut self, payload: EntryPayload) -> Result<((Term, LogIndex), Vec<RaftOutput>), RaftError> {
        if self.role != Role::Leader {
            return Err(RaftError::NotLeader { leader: self.leader });
        }
        let term = self.term();
        let index = self.storage.last_index() + 1;
        self.storage.append(&[LogEntry { term, index, payload }])?;
        self.broadcast_append();
        self.maybe_commit();
        Ok(((term, index), self.drain()))
    }

    pub fn step(&mut self, from: NodeId, message: RaftMessage) -> Result<Vec<RaftOutput>, RaftError> {
        if message.term() > self.term() {
            let leader = match &message {
                RaftMessage::AppendEntries { leader, .. } => Some(*leader),
                _ => None,
            };
            self.become_follower(message.term(), leader)?;
        }
        let current = self.term();
        match message {
            RaftMessage::RequestVote { term,
                                       candidate,
                                       last_log_index,
                                       last_log_term, } => {
                let voted_for = self.storage.hard_state().voted_for;
                let our_last_term = self.storage.last_term();
                let up_to_date = last_log_term > our_last_term
                                 || (last_log_term == our_last_term && last_log_index >= self.storage.last_index());
                let granted = term == current && voted_for.map_or(true, |v| v == candidate) && up_to_date;
                if granted {
                    self.storage.save_hard_state(HardState { term: current,
                                                             voted_for: Some(candidate) })?;
                    self.reset_election_timer();
                }
                log::debug!("raft.vote node={} candidate={candidate} term={current} granted={granted}",
                            self.id);
                self.out.push(RaftOutput::Send { to: from,
                                                 message: RaftMessage::Vote { term: current, granted } });
            }
            RaftMessage::Vote { term, granted } => {
                if self.role == Role::Candidate && term == current && granted {
                    self.votes.insert(from);
                    if self.votes.len() >= self.majority() {
                        self.become_leader()?;
                    }
                }
            }
            RaftMessage::AppendEntries { term,
                                         leader,
                                         prev_log_index,
                                         prev_log_term,
                                         entries,
                                         leader_commit, } => {
                if term < current {
                    self.reply_append(from, false, 0);
                } else {
                    self.on_append(from, leader, prev_log_index, prev_log_term, entries, leader_commit)?;
                }
            }
            RaftMessage::AppendResponse { term,
                                          success,
                                          match_index, } => {
                if self.role == Role::Leader && term == current {
                    self.on_append_response(from, success, match_index);
                }
            }
        }
        Ok(self.drain())
    }

    fn on_append(&mut self,
                 from: NodeId,
                 leader: NodeId,
                 prev_log_index: LogIndex,
                 prev_log_term: Term,
                 entries: Vec<LogEntry>,
                 leader_commit: LogIndex)
                 -> Result<(), RaftError> {
        if self.role != Role::Follower {
            let term = self.term();
            self.become_follower(term, Some(leader))?;
        }
        self.leader = Some(leader);
        self.reset_election_timer();

        if self.storage.term_at(prev_log_index) != Some(prev_log_term) {
            let hint = self.storage.last_index().min(prev_log_index.saturating_sub(1));
            self.reply_append(from, false, hint);
            return Ok(());
        }
        let last_new = prev_log_index + entries.len() as LogIndex;
        for (i, entry) in entries.iter().enumerate() {
            match self.storage.term_at(entry.index) {
                Some(t) if t == entry.term => continue,
                Some(_) => {
                    log::debug!("raft.truncate node={} from={}", self.id, entry.index);
                    self.storage.truncate_from(entry.index)?;
                    self.storage.append(&entries[i..])?;
                    break;
                }
                None => {
                    self.storage.append(&entries[i..])?;
                    break;
                }
            }
        }
        if leader_commit > self.commit_index {
            self.commit_index = leader_commit.min(last_new);
            self.apply_committed();
        }
        self.reply_append(from, true, last_new);
        Ok(())
    }

    fn on_append_response(&mut self, from: NodeId, success: bool, match_index: LogIndex) {
        self.recent_active.insert(from);
        if success {
            let matched = self.match_index.entry(from).or_insert(0);
            if match_index > *matched {
                *matched = match_index;
            }
            let next = *matched + 1;
            self.next_index.insert(from, next);
            self.maybe_commit();
            if next <= self.storage.last_index() {
                self.send_append(from);
            }
        } else {
            let next = self.next_index.get(&from).copied().unwrap_or(1);
            let retry = (match_index + 1).min(next.saturating_sub(1)).max(1);
            self.next_index.insert(from, retry);
            self.send_append(from);
        }
    }

    fn reply_append(&mut self, to: NodeId, success: bool, match_index: LogIndex) {
        let term = self.term();
        self.out.push(RaftOutput::Send { to,
                                         message: RaftMessage::AppendResponse { term,
                                                                                success,
                                                                                match_index } });
    }

    fn become_follower(&mut self, term: Term, leader: Option<NodeId>) -> Result<(), RaftError> {
        let old_term = self.term();
        if term > old_term {
            self.storage.save_hard_state(HardState { term,
                                                     voted_for: None })?;
        }
        let was_leader = self.role == Role::Leader;
        self.role = Role::Follower;
        self.leader = leader;
        self.votes.clear();
        self.reset_election_timer();
        if was_leader {
            log::info!("raft.leadership_lost node={} term={old_term} new_term={term}", self.id);
            self.out.push(RaftOutput::LeadershipLost { term: old_term });
        }
        Ok(())
    }

    fn start_election(&mut self) -> Result<(), RaftError> {
        let term = self.term() + 1;
        self.storage.save_hard_state(HardState { term,
                                                 voted_for: Some(self.id) })?;
        self.role = Role::Candidate;
        self.leader = None;
        self.votes = BTreeSet::from([self.id]);
        self.reset_election_timer();
        log::debug!("raft.campaign node={} term={term}", self.id);
        if self.votes.len() >= self.majority() {
            return self.become_leader();
        }
        let last_log_index = self.storage.last_index();
        let last_log_term = self.storage.last_term();
        for peer in self.peers.clone() {
            self.out.push(RaftOutput::Send { to: peer,
                                             message: RaftMessage::RequestVote { term,
                                                                                 candidate: self.id,
                                                                                 last_log_index,
                                                                                 last_log_term } });
        }
        Ok(())
    }

    fn become_leader(&mut self) -> Result<(), RaftError> {
        let term = self.term();
        self.role = Role::Leader;
        self.leader = Some(self.id);
        self.heartbeat_elapsed = 0;
        self.election_elapsed = 0;
        self.recent_active.clear();
        let next = self.storage.last_index() + 1;
        self.next_index = self.peers.iter().map(|p| (*p, next)).collect();
        self.match_index = self.peers.iter().map(|p| (*p, 0)).collect();
        // Sólo entradas del término propio pueden comprometerse; la no-op
        // arrastra consigo las de términos anteriores.
        self.storage.append(&[LogEntry { term,
                                         index: next,
                                         payload: EntryPayload::Noop }])?;
        log::info!("raft.leader node={} term={term}", self.id);
        self.out.push(RaftOutput::BecameLeader { term });
        self.broadcast_append();
        self.maybe_commit();
        Ok(())
    }

    fn broadcast_append(&mut self) {
        for peer in self.peers.clone() {
            self.send_append(peer);
        }
    }

    fn send_append(&mut self, peer: NodeId) {
        let next = self.next_index.get(&peer).copied().unwrap_or(self.storage.last_index() + 1).max(1);
        let prev_log_index = next - 1;
        let prev_log_term = self.storage.term_at(prev_log_index).unwrap_or(0);
        let entries = self.storage.entries_from(next, MAX_ENTRIES_PER_APPEND);
        let message = RaftMessage::AppendEntries { term: self.term(),
                                                   leader: self.id,
                                                   prev_log_index,
                                                   prev_log_term,
                                                   entries,
                                                   leader_commit: self.commit_index };
        self.out.push(RaftOutput::Send { to: peer, message });
    }

    fn maybe_commit(&mut self) {
        let term = self.term();
        let mut n = self.storage.last_index();
        while n > self.commit_index {
            match self.storage.term_at(n) {
                Some(t) if t == term => {
                    let replicas = 1 + self.match_index.values().filter(|m| **m >= n).count();
                    if replicas >= self.majority() {
                        self.commit_index = n;
                        self.apply_committed();
                        return;
                    }
                }
                _ => return,
            }
            n -= 1;
        }
    }

    fn apply_committed(&mut self) {
        while self.last_applied < self.commit_index {
            self.last_applied += 1;
            match self.storage.entry(self.last_applied) {
                Some(entry) => self.out.push(RaftOutput::Apply(entry)),
                None => {
                    log::error!("raft.apply:missing node={} index={}", self.id, self.last_applied);
                    self.last_applied -= 1;
                    return;
                }
            }
        }
    }
}
