//! Powers: pluggable sources of PTR rewrites (SPEC_FULL.md §4.3).
//!
//! Re-architected from the source's dynamic module-import-by-name scheme
//! (`original_source/superpowers/__init__.py`'s `load_powers`) into a closed
//! variant over the two known implementations, per the REDESIGN FLAG in
//! SPEC_FULL.md §9: an unknown power name is a config-validation failure,
//! not a runtime dispatch failure.

pub mod shodohflo;
pub mod sqlite;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::ip_address::Address;

/// Tracks the background initialization tasks a Power registered at
/// construction. The Pipeline calls [`Marshalling::marshall`] before the
/// first time it applies a Power; later callers see an already-empty set
/// and return immediately, mirroring `Powers.marshall()` in
/// `original_source/superpowers/__init__.py`.
#[derive(Debug, Default)]
pub struct Marshalling {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Marshalling {
    pub fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Marshalling {
            tasks: Mutex::new(tasks),
        }
    }

    pub async fn marshall(&self) {
        let tasks = {
            let mut guard = self.tasks.lock().await;
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "power init task panicked");
            }
        }
    }
}

/// A handle to one configured Power. Cheaply cloneable; every clone shares
/// the same underlying connection pool / cache / init-task set.
#[derive(Debug, Clone)]
pub enum PowerHandle {
    Sqlite(Arc<sqlite::SqlitePower>),
    ShoDoHFlo(Arc<shodohflo::ShoDoHFloPower>),
}

impl PowerHandle {
    pub async fn marshall(&self) {
        match self {
            PowerHandle::Sqlite(p) => p.marshalling().marshall().await,
            PowerHandle::ShoDoHFlo(p) => p.marshalling().marshall().await,
        }
    }

    /// Query this power for a PTR rewrite. Returns an empty string when the
    /// power has no answer; never errors — internal failures are logged and
    /// treated as an empty result, per SPEC_FULL.md §7.
    pub async fn query(&self, addr: Address) -> String {
        match self {
            PowerHandle::Sqlite(p) => p.query(addr).await,
            PowerHandle::ShoDoHFlo(p) => p.query(addr).await,
        }
    }
}
