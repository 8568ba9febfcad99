//! The delta-update bookkeeping: which message fields go out next.
//!
//! A [`Recipe`] is the frozen set of fields slated for one request. The
//! [`RecipeManager`] keeps exactly one live [`RecipeBuilder`] accumulating
//! fields for the next request, plus the most recently built recipe so a
//! failed send can be merged forward instead of silently dropped.

use std::collections::BTreeSet;
use std::sync::Mutex;

/// Closed enumeration of the fields an outgoing message can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldType {
    AgentDescription,
    Capabilities,
    EffectiveConfig,
    RemoteConfigStatus,
    SequenceNumber,
    InstanceUid,
    Flags,
    AgentDisconnect,
}

/// Fields present in every request regardless of what changed.
pub const CONST_FIELDS: [FieldType; 1] = [FieldType::SequenceNumber];

/// The full-state field set sent on the first request after `start()` and
/// whenever the server asks for a complete report.
pub const FULL_STATE_FIELDS: [FieldType; 6] = [
    FieldType::AgentDescription,
    FieldType::Capabilities,
    FieldType::EffectiveConfig,
    FieldType::RemoteConfigStatus,
    FieldType::SequenceNumber,
    FieldType::InstanceUid,
];

/// An immutable set of [`FieldType`]. Insertion order is irrelevant and
/// duplicates collapse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipe {
    fields: BTreeSet<FieldType>,
}

impl Recipe {
    pub fn contains(&self, field: FieldType) -> bool {
        self.fields.contains(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = FieldType> + '_ {
        self.fields.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Mutable accumulator for the next recipe, seeded with [`CONST_FIELDS`].
#[derive(Debug)]
pub struct RecipeBuilder {
    fields: BTreeSet<FieldType>,
}

impl RecipeBuilder {
    fn seeded() -> Self {
        RecipeBuilder {
            fields: CONST_FIELDS.iter().copied().collect(),
        }
    }

    pub fn add_field(&mut self, field: FieldType) -> &mut Self {
        self.fields.insert(field);
        self
    }

    pub fn add_all_fields(&mut self, fields: &[FieldType]) -> &mut Self {
        self.fields.extend(fields.iter().copied());
        self
    }

    /// Unions another recipe's fields into this builder. Used to re-queue
    /// the fields of a failed attempt: current values are re-derived on
    /// the next build rather than retransmitted byte-identically.
    pub fn merge(&mut self, with: &Recipe) -> &mut Self {
        self.fields.extend(with.fields());
        self
    }

    pub fn build(self) -> Recipe {
        Recipe {
            fields: self.fields,
        }
    }
}

impl Default for RecipeBuilder {
    fn default() -> Self {
        RecipeBuilder::seeded()
    }
}

struct ManagerInner {
    builder: RecipeBuilder,
    previous: Option<Recipe>,
}

/// Owns the single live builder and the last built recipe.
///
/// All access goes through methods that take the internal lock; no caller
/// callback ever runs while the lock is held, which stands in for the
/// reentrant lock the contract otherwise calls for.
pub struct RecipeManager {
    inner: Mutex<ManagerInner>,
}

impl RecipeManager {
    pub fn new() -> Self {
        RecipeManager {
            inner: Mutex::new(ManagerInner {
                builder: RecipeBuilder::seeded(),
                previous: None,
            }),
        }
    }

    /// Runs `f` against the live builder. Repeated calls before `build()`
    /// accumulate into the same builder.
    pub fn with_next<R>(&self, f: impl FnOnce(&mut RecipeBuilder) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner.builder)
    }

    pub fn add_field(&self, field: FieldType) {
        self.with_next(|b| {
            b.add_field(field);
        });
    }

    pub fn add_all_fields(&self, fields: &[FieldType]) {
        self.with_next(|b| {
            b.add_all_fields(fields);
        });
    }

    pub fn merge(&self, with: &Recipe) {
        self.with_next(|b| {
            b.merge(with);
        });
    }

    /// Freezes the live builder into a recipe, records it as "previous",
    /// and allocates a fresh builder seeded with the const fields.
    pub fn build(&self) -> Recipe {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let built = std::mem::take(&mut inner.builder.fields);
        inner.builder = RecipeBuilder::seeded();
        let recipe = Recipe { fields: built };
        inner.previous = Some(recipe.clone());
        recipe
    }

    /// The most recently built recipe, if any request has been assembled.
    pub fn previous(&self) -> Option<Recipe> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .previous
            .clone()
    }
}

impl Default for RecipeManager {
    fn default() -> Self {
        RecipeManager::new()
    }
}
