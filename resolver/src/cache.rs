//! Single-flight name cache
//!
//! This module tracks, per identifier, whether a name is already known or a
//! lookup is currently running:
//! - `begin` is the atomic test-and-set that decides whether a new run starts,
//!   and subscribes the caller to the run's outcome under the same lock
//! - `complete` stores a successful name and releases the pending slot
//! - `invalidate` and `clear` drop state so late outcomes become no-ops
//!
//! The cache is a plain struct; callers wrap it in a lock and hold that lock
//! across `begin`, which is what makes two racing joins for one identifier
//! observe a single run.

use crate::pipeline::Outcome;
use log::{debug, info};
use shared::{Identifier, SessionRecord};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

pub type OutcomeReceiver = watch::Receiver<Option<Outcome>>;

/// Proof that the holder owns the current run for an identifier.
///
/// Tickets are generation-stamped, so a ticket issued before an
/// invalidation never matches the slot of a later run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    id: Identifier,
    generation: u64,
}

impl Ticket {
    pub fn id(&self) -> Identifier {
        self.id
    }
}

/// Result of asking the cache for an identifier.
///
/// The receivers are subscribed before the lock is released, so they see
/// the outcome even if the run finishes before the caller looks.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Name already resolved in this session.
    Cached(String),
    /// No run was in flight; the caller must start one with this ticket.
    Started(Ticket, OutcomeReceiver),
    /// Another caller's run is already in flight.
    InFlight(OutcomeReceiver),
}

/// Marker for a run that has not produced its terminal outcome yet.
///
/// Subscribers observe the outcome through the watch channel. Dropping the
/// entry without completing closes the channel.
struct PendingEntry {
    generation: u64,
    outcome_tx: watch::Sender<Option<Outcome>>,
    /// Every record that joined while the run was in flight, oldest first
    records: Vec<Arc<dyn SessionRecord>>,
}

impl fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEntry")
            .field("generation", &self.generation)
            .field("records", &self.records.len())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct NameCache {
    /// Names from successful, non-denied runs
    resolved: HashMap<Identifier, String>,
    /// Runs currently in flight
    pending: HashMap<Identifier, PendingEntry>,
    /// Counter value shown in the `[n]` prefix, per identifier
    unique_ids: HashMap<Identifier, u32>,
    next_generation: u64,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Identifier) -> Option<&str> {
        self.resolved.get(&id).map(String::as_str)
    }

    /// Checks the cache and claims the pending slot if nobody holds it.
    ///
    /// While a run is in flight, `record` is remembered so the outcome can
    /// reach whichever joining session is still connected.
    pub fn begin(&mut self, id: Identifier, record: Arc<dyn SessionRecord>) -> Lookup {
        if let Some(name) = self.resolved.get(&id) {
            return Lookup::Cached(name.clone());
        }

        if let Some(entry) = self.pending.get_mut(&id) {
            entry.records.push(record);
            return Lookup::InFlight(entry.outcome_tx.subscribe());
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let (outcome_tx, outcome_rx) = watch::channel(None);
        self.pending.insert(
            id,
            PendingEntry {
                generation,
                outcome_tx,
                records: vec![record],
            },
        );

        debug!("Started lookup for {} (generation {})", id, generation);
        Lookup::Started(Ticket { id, generation }, outcome_rx)
    }

    /// Most recently joined record of the current run that is still connected.
    pub fn live_record(&self, ticket: Ticket) -> Option<Arc<dyn SessionRecord>> {
        self.pending
            .get(&ticket.id)
            .filter(|entry| entry.generation == ticket.generation)?
            .records
            .iter()
            .rev()
            .find(|record| record.is_connected())
            .cloned()
    }

    /// True while `ticket` still owns the pending slot.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.pending
            .get(&ticket.id)
            .is_some_and(|entry| entry.generation == ticket.generation)
    }

    /// Applies a terminal outcome.
    ///
    /// Stale tickets are ignored and `false` is returned. Otherwise the
    /// pending slot is released, a resolved name is stored, and subscribers
    /// are woken with the outcome.
    pub fn complete(&mut self, ticket: Ticket, outcome: Outcome) -> bool {
        if !self.is_current(ticket) {
            return false;
        }

        let Some(entry) = self.pending.remove(&ticket.id) else {
            return false;
        };

        if let Outcome::Resolved(name) = &outcome {
            self.resolved.insert(ticket.id, name.clone());
        }

        entry.outcome_tx.send_replace(Some(outcome));
        true
    }

    /// Watches the in-flight run for `id`, if there is one.
    pub fn subscribe(&self, id: Identifier) -> Option<OutcomeReceiver> {
        self.pending.get(&id).map(|entry| entry.outcome_tx.subscribe())
    }

    pub fn is_pending(&self, id: Identifier) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn record_unique_id(&mut self, id: Identifier, unique_id: u32) {
        self.unique_ids.insert(id, unique_id);
    }

    pub fn unique_id(&self, id: Identifier) -> Option<u32> {
        self.unique_ids.get(&id).copied()
    }

    /// Forgets everything about `id`. Returns true if anything was dropped.
    pub fn invalidate(&mut self, id: Identifier) -> bool {
        let had_name = self.resolved.remove(&id).is_some();
        let had_pending = self.pending.remove(&id).is_some();
        self.unique_ids.remove(&id);
        had_name || had_pending
    }

    pub fn clear(&mut self) {
        info!(
            "Clearing name cache ({} resolved, {} pending)",
            self.resolved.len(),
            self.pending.len()
        );
        self.resolved.clear();
        self.pending.clear();
        self.unique_ids.clear();
    }

    pub fn resolved_len(&self) -> usize {
        self.resolved.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty() && self.pending.is_empty()
    }
}
