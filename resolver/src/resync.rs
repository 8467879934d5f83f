//! Two-phase identity swap that pushes a new display name to clients
//!
//! The replication layer only re-sends the display name when the network
//! identity field changes. Applying a name therefore runs in two phases:
//!
//! 1. write the name, swap in `NetworkIdentity::TRANSIENT`, mark dirty
//! 2. after the settle delay, put the original identity back and mark dirty
//!
//! Phase 2 is mandatory: host-side lookups keyed by the identity break while
//! the transient token is in place. It is skipped only if the session has
//! been torn down in the meantime.

use log::{debug, warn};
use shared::{NetworkIdentity, SessionRecord};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Result of phase 1. `restore` completes once phase 2 has run.
#[derive(Debug)]
pub struct Applied {
    pub display_name: String,
    pub unique_id: u32,
    pub restore: JoinHandle<()>,
}

#[derive(Debug)]
pub struct IdentityResync {
    settle_delay: Duration,
    prefix_unique_id: bool,
    counter: AtomicU32,
}

impl IdentityResync {
    pub fn new(settle_delay: Duration, prefix_unique_id: bool) -> Self {
        Self {
            settle_delay,
            prefix_unique_id,
            counter: AtomicU32::new(0),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Counter value handed out by the most recent `apply`.
    pub fn last_unique_id(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Runs phase 1 immediately and schedules phase 2 on the runtime.
    ///
    /// Must be called from within a tokio runtime.
    pub fn apply(&self, record: Arc<dyn SessionRecord>, name: &str) -> Applied {
        let unique_id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let display_name = if self.prefix_unique_id {
            format!("[{}] {}", unique_id, name)
        } else {
            name.to_string()
        };

        let original = record.network_identity();
        if original.is_transient() {
            warn!(
                "Record for {:?} already carries the transient identity; restore will keep it",
                display_name
            );
        }

        record.set_display_name(&display_name);
        record.set_network_identity(NetworkIdentity::TRANSIENT);
        record.mark_dirty();

        let settle_delay = self.settle_delay;
        let restore = tokio::spawn(async move {
            tokio::time::sleep(settle_delay).await;

            if !record.is_connected() {
                debug!("Session gone before identity restore, skipping");
                return;
            }

            record.set_network_identity(original);
            record.mark_dirty();
        });

        Applied {
            display_name,
            unique_id,
            restore,
        }
    }
}
