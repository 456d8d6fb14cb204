//! Ownership handoff for backing tables.
//!
//! A store's backing table is held by an [`OwnedTable`]. When the owner goes
//! away (normal drop or panic unwinding inside a task) the table is handed to
//! the [`Heir`], and the next owner created with the same heir and name
//! reclaims it instead of starting empty.
//!
//! ```text
//! owner #1 ──drop/panic──▶ Heir ──reclaim──▶ owner #2
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Standby holder for tables whose owner terminated.
///
/// Cloning an `Heir` yields a handle to the same registry.
#[derive(Clone, Default)]
pub struct Heir {
    tables: Arc<Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>>,
}

impl std::fmt::Debug for Heir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.tables.lock().keys().cloned().collect();
        f.debug_struct("Heir").field("holding", &names).finish()
    }
}

impl Heir {
    /// Create an empty heir.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take custody of `table` under `name`, replacing any table held there.
    pub fn adopt<T: Send + Sync + 'static>(&self, name: &str, table: Arc<T>) {
        let replaced = self
            .tables
            .lock()
            .insert(name.to_string(), Box::new(table))
            .is_some();
        if replaced {
            warn!(table = %name, "Heir replaced an unclaimed table");
        }
        debug!(table = %name, "Heir adopted table");
    }

    /// Hand the table held under `name` back to a new owner.
    ///
    /// Returns `None` when nothing is held or the held table has another type;
    /// a mistyped table stays with the heir.
    pub fn reclaim<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        let mut tables = self.tables.lock();
        let held = tables.remove(name)?;
        match held.downcast::<Arc<T>>() {
            Ok(table) => Some(*table),
            Err(other) => {
                warn!(table = %name, "Heir holds a table of a different type");
                tables.insert(name.to_string(), other);
                None
            }
        }
    }

    /// Whether a table is waiting under `name`.
    pub fn holds(&self, name: &str) -> bool {
        self.tables.lock().contains_key(name)
    }
}

/// How an [`OwnedTable`] got its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// Taken back from the heir; prior state survives.
    Reclaimed,
    /// Newly allocated.
    Fresh,
}

/// Owning handle to a backing table.
///
/// Derefs to the table. On drop the table goes to the heir, if any.
pub struct OwnedTable<T: Send + Sync + 'static> {
    name: String,
    table: Arc<T>,
    heir: Option<Heir>,
}

impl<T: Send + Sync + 'static> OwnedTable<T> {
    /// Reclaim `name` from `heir`, or allocate with `fresh` when there is
    /// nothing to reclaim.
    pub fn acquire(name: &str, heir: Option<Heir>, fresh: impl FnOnce() -> T) -> (Self, Acquired) {
        let reclaimed = heir.as_ref().and_then(|h| h.reclaim::<T>(name));
        let (table, acquired) = match reclaimed {
            Some(table) => {
                info!(table = %name, "Reclaimed backing table from heir");
                (table, Acquired::Reclaimed)
            }
            None => {
                debug!(table = %name, has_heir = heir.is_some(), "Allocated fresh backing table");
                (Arc::new(fresh()), Acquired::Fresh)
            }
        };

        (
            Self {
                name: name.to_string(),
                table,
                heir,
            },
            acquired,
        )
    }

    /// Table name used for heir handoff.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared reference to the table.
    pub fn shared(&self) -> &Arc<T> {
        &self.table
    }
}

impl<T: Send + Sync + 'static> Deref for OwnedTable<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.table
    }
}

impl<T: Send + Sync + 'static> Drop for OwnedTable<T> {
    fn drop(&mut self) {
        if let Some(heir) = self.heir.take() {
            if std::thread::panicking() {
                warn!(table = %self.name, "Owner panicked, handing table to heir");
            } else {
                debug!(table = %self.name, "Owner dropped, handing table to heir");
            }
            heir.adopt(&self.name, Arc::clone(&self.table));
        }
    }
}
