//! Filter DSL for memory queries.
//!
//! A [`Filter`] is a tree of leaves (field/op/value) combined with `And`/`Or`.
//! Leaves target either a first-class [`ColumnField`] or a dot-separated path
//! into the `metadata` JSON blob — the Hybrid Query Planner (§4.4) only takes
//! the native fast path when every leaf is a column field, so the
//! distinction is load-bearing, not cosmetic.
//!
//! Generalizes the teacher's flat `SearchFilter` (domains/types/importance/
//! confidence/since, applied as sequential post-filter checks) into a
//! recursive tree matching the shape `original_source`'s filter translation
//! layer (`utils/filter_parser.py`) expects.

use serde_json::Value;

use crate::memory::MemoryRecord;
use crate::types::Scope;

/// A first-class column on [`MemoryRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnField {
    /// `MemoryRecord::id`.
    Id,
    /// `MemoryRecord::owner.user_id`.
    UserId,
    /// `MemoryRecord::owner.agent_id`.
    AgentId,
    /// `MemoryRecord::owner.run_id`.
    RunId,
    /// `MemoryRecord::owner.actor_id`.
    ActorId,
    /// `MemoryRecord::scope`.
    Scope,
    /// `MemoryRecord::category`.
    Category,
    /// `MemoryRecord::memory_type`.
    MemoryType,
    /// `MemoryRecord::created_at`.
    CreatedAt,
    /// `MemoryRecord::updated_at`.
    UpdatedAt,
}

/// Which kind of field a filter leaf targets.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterField {
    /// A first-class column field, eligible for the native hybrid fast path.
    Column(ColumnField),
    /// A dot-separated path into the `metadata` JSON blob (e.g.
    /// `"project.name"`). Never eligible for the native fast path.
    Metadata(String),
}

/// A comparison operator and its operand.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterOp {
    /// Equality.
    Eq(Value),
    /// Inequality.
    Ne(Value),
    /// Greater than.
    Gt(Value),
    /// Greater than or equal.
    Gte(Value),
    /// Less than.
    Lt(Value),
    /// Less than or equal.
    Lte(Value),
    /// Membership in a set.
    In(Vec<Value>),
    /// Non-membership in a set.
    Nin(Vec<Value>),
    /// Case-insensitive substring match (strings only).
    Like(String),
}

/// A filter tree: a leaf `{field, op}` or an `And`/`Or` of subtrees.
#[derive(Clone, Debug)]
pub enum Filter {
    /// A single field/operator comparison.
    Leaf {
        /// The field being compared.
        field: FilterField,
        /// The comparison.
        op: FilterOp,
    },
    /// All subtrees must match.
    And(Vec<Filter>),
    /// At least one subtree must match.
    Or(Vec<Filter>),
}

impl Filter {
    /// Shorthand for an equality leaf on a column field.
    pub fn column_eq(field: ColumnField, value: impl Into<Value>) -> Self {
        Self::Leaf {
            field: FilterField::Column(field),
            op: FilterOp::Eq(value.into()),
        }
    }

    /// Shorthand for an equality leaf on a metadata path.
    pub fn metadata_eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Leaf {
            field: FilterField::Metadata(path.into()),
            op: FilterOp::Eq(value.into()),
        }
    }

    /// Returns `true` if the given record matches this filter.
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        match self {
            Self::Leaf { field, op } => match field_value(field, record) {
                Some(actual) => apply_op(op, &actual),
                None => false,
            },
            Self::And(children) => children.iter().all(|c| c.matches(record)),
            Self::Or(children) => children.iter().any(|c| c.matches(record)),
        }
    }

    /// Returns `true` if every leaf in this filter targets a column field.
    ///
    /// Used by the Hybrid Query Planner's native-path eligibility rule 4:
    /// metadata-path filters force the fallback (client-side fused) path.
    pub fn is_all_column_fields(&self) -> bool {
        match self {
            Self::Leaf { field, .. } => matches!(field, FilterField::Column(_)),
            Self::And(children) | Self::Or(children) => {
                children.iter().all(Filter::is_all_column_fields)
            }
        }
    }
}

fn field_value(field: &FilterField, record: &MemoryRecord) -> Option<Value> {
    match field {
        FilterField::Column(column) => Some(match column {
            ColumnField::Id => Value::from(record.id.as_u64()),
            ColumnField::UserId => record
                .owner
                .user_id
                .as_ref()
                .map(|id| Value::from(id.as_str()))?,
            ColumnField::AgentId => record
                .owner
                .agent_id
                .as_ref()
                .map(|id| Value::from(id.as_str()))?,
            ColumnField::RunId => record
                .owner
                .run_id
                .as_ref()
                .map(|id| Value::from(id.as_str()))?,
            ColumnField::ActorId => record
                .owner
                .actor_id
                .as_ref()
                .map(|id| Value::from(id.as_str()))?,
            ColumnField::Scope => Value::from(scope_str(record.scope)),
            ColumnField::Category => record
                .category
                .as_ref()
                .map(|c| Value::from(c.as_str()))?,
            ColumnField::MemoryType => record
                .memory_type
                .as_ref()
                .map(|t| Value::from(t.as_str()))?,
            ColumnField::CreatedAt => Value::from(record.created_at.as_millis()),
            ColumnField::UpdatedAt => Value::from(record.updated_at.as_millis()),
        }),
        FilterField::Metadata(path) => resolve_metadata_path(&record.metadata, path),
    }
}

fn scope_str(scope: Scope) -> &'static str {
    match scope {
        Scope::Private => "private",
        Scope::AgentGroup => "agent_group",
        Scope::UserGroup => "user_group",
        Scope::Public => "public",
    }
}

fn resolve_metadata_path(metadata: &Value, path: &str) -> Option<Value> {
    let mut current = metadata;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn apply_op(op: &FilterOp, actual: &Value) -> bool {
    match op {
        FilterOp::Eq(expected) => values_eq(actual, expected),
        FilterOp::Ne(expected) => !values_eq(actual, expected),
        FilterOp::Gt(expected) => compare(actual, expected) == Some(std::cmp::Ordering::Greater),
        FilterOp::Gte(expected) => {
            matches!(compare(actual, expected), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal))
        }
        FilterOp::Lt(expected) => compare(actual, expected) == Some(std::cmp::Ordering::Less),
        FilterOp::Lte(expected) => {
            matches!(compare(actual, expected), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal))
        }
        FilterOp::In(set) => set.iter().any(|v| values_eq(actual, v)),
        FilterOp::Nin(set) => !set.iter().any(|v| values_eq(actual, v)),
        FilterOp::Like(needle) => match actual.as_str() {
            Some(hay) => hay.to_lowercase().contains(&needle.to_lowercase()),
            None => false,
        },
    }
}

fn values_eq(a: &Value, b: &Value) -> bool {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a == b;
    }
    a == b
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (a.as_str(), b.as_str()) {
        return Some(a.cmp(b));
    }
    None
}
