//! Interned command names.
//!
//! Spans reference command names by id rather than owning strings: the
//! same few command names repeat across millions of events. The bank is
//! insert-only and append-ordered — ids are issued in first-seen order and
//! never move — so queries running concurrently after construction can
//! resolve ids without coordination beyond a read lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::domain::QueryError;

/// Id of an interned string. Issued densely from zero in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(pub usize);

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "str#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct BankInner {
    strings: Vec<Arc<str>>,
    ids: HashMap<Arc<str>, StringId>,
}

/// Thread-safe insert-only string interner.
#[derive(Debug, Default)]
pub struct StringBank {
    inner: RwLock<BankInner>,
}

impl StringBank {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its stable id.
    ///
    /// The fast path is a read-locked lookup; only first-time inserts take
    /// the write lock. Construction is single-threaded, so the re-check
    /// under the write lock is for correctness, not contention.
    pub fn intern(&self, s: &str) -> StringId {
        if let Some(id) = self.lookup(s) {
            return id;
        }
        let mut inner = self.inner.write().expect("string bank poisoned");
        if let Some(&id) = inner.ids.get(s) {
            return id;
        }
        let id = StringId(inner.strings.len());
        let arc: Arc<str> = Arc::from(s);
        inner.strings.push(Arc::clone(&arc));
        inner.ids.insert(arc, id);
        id
    }

    /// Find an already-interned string without inserting.
    #[must_use]
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        self.inner.read().expect("string bank poisoned").ids.get(s).copied()
    }

    /// Resolve an id back to its string.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NotFound`] for an id the bank never issued.
    pub fn resolve(&self, id: StringId) -> Result<Arc<str>, QueryError> {
        self.inner
            .read()
            .expect("string bank poisoned")
            .strings
            .get(id.0)
            .cloned()
            .ok_or(QueryError::NotFound(id.0))
    }

    /// Number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("string bank poisoned").strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
