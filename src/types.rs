//! Core type definitions: identifiers, timestamps, and ownership.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique memory identifier.
///
/// Generated by a process-local [`crate::snowflake::SnowflakeGenerator`] (timestamp +
/// machine id + sequence). Ids are monotonically increasing *within a
/// process*; they are not guaranteed to be globally monotonic across
/// multiple processes writing to the same store concurrently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub u64);

impl MemoryId {
    /// Wraps a raw id value (used when reconstituting from storage).
    #[inline]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw `u64` value.
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque user identifier.
///
/// AgentMem doesn't handle authentication — the caller supplies user ids
/// from whatever identity system fronts it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Creates a new `UserId` from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the user id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Agent identifier — identifies a specific AI agent instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    /// Creates a new `AgentId` from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the agent id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run identifier — identifies a single conversation / task run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Creates a new `RunId` from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the run id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Actor identifier — a caller-supplied identity distinct from user/agent/run
/// (e.g. a specific tool or subsystem acting within a run).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    /// Creates a new `ActorId` from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the actor id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `(user_id?, agent_id?, run_id?, actor_id?)` tuple a memory belongs to.
///
/// Any subset of the four fields may be absent; at least one is required
/// unless the record's [`Scope`] is `Public`. `Owner` only carries identity —
/// it does not imply a visibility level on its own, that's [`Scope`]'s job
/// (data model invariant I5).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    /// The user this memory is associated with, if any.
    pub user_id: Option<UserId>,
    /// The agent instance that recorded or owns this memory, if any.
    pub agent_id: Option<AgentId>,
    /// The run (conversation/task) this memory was recorded in, if any.
    pub run_id: Option<RunId>,
    /// The specific actor (tool/subsystem) that recorded this memory, if any.
    pub actor_id: Option<ActorId>,
}

impl Owner {
    /// Creates an owner identified only by user.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(UserId::new(user_id)),
            ..Self::default()
        }
    }

    /// Creates an owner identified by user and agent.
    pub fn agent(user_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(UserId::new(user_id)),
            agent_id: Some(AgentId::new(agent_id)),
            ..Self::default()
        }
    }

    /// Creates an owner identified by user, agent, and run.
    pub fn run(
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: Some(UserId::new(user_id)),
            agent_id: Some(AgentId::new(agent_id)),
            run_id: Some(RunId::new(run_id)),
            actor_id: None,
        }
    }

    /// Returns true if every identity field is absent.
    ///
    /// Only valid when the record's [`Scope`] is `Public` (data model: "at
    /// least one [owner field] is required unless explicitly `scope =
    /// PUBLIC`").
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none()
            && self.agent_id.is_none()
            && self.run_id.is_none()
            && self.actor_id.is_none()
    }

    /// Returns the narrowest [`Scope`] this owner tuple is consistent with,
    /// used as the default when a caller doesn't supply one explicitly.
    pub fn default_scope(&self) -> Scope {
        if self.is_empty() {
            Scope::Public
        } else if self.run_id.is_some() || self.actor_id.is_some() {
            Scope::AgentGroup
        } else if self.agent_id.is_some() {
            Scope::AgentGroup
        } else {
            Scope::UserGroup
        }
    }
}

/// The isolation level a memory is visible at.
///
/// Controls query-time visibility (data model invariant I5): a read filtered
/// by a non-null owner field returns only records whose same field matches,
/// or whose scope permits cross-owner visibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Visible only to the exact owner tuple that created it.
    Private,
    /// Visible to any run of the same agent.
    AgentGroup,
    /// Visible to any agent/run acting on behalf of the same user.
    UserGroup,
    /// Visible across all owners (shared/global knowledge).
    Public,
}

impl Default for Scope {
    fn default() -> Self {
        Self::Private
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Private => "private",
            Self::AgentGroup => "agent_group",
            Self::UserGroup => "user_group",
            Self::Public => "public",
        };
        write!(f, "{s}")
    }
}

/// Unix timestamp in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    ///
    /// If the system clock is before the Unix epoch (should never happen
    /// in practice), returns a timestamp of 0 rather than panicking.
    #[inline]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as i64)
    }

    /// Creates a timestamp from Unix milliseconds.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as Unix milliseconds.
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Returns big-endian bytes for storage (lexicographic order == numeric order).
    #[inline]
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dense embedding vector (f32, fixed dimension per collection).
pub type Embedding = Vec<f32>;

/// Sparse embedding: (term id, weight) pairs, sorted ascending by term id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseEmbedding(pub Vec<(u32, f32)>);

impl SparseEmbedding {
    /// Creates a sparse embedding from unsorted pairs, sorting by term id.
    pub fn new(mut pairs: Vec<(u32, f32)>) -> Self {
        pairs.sort_by_key(|(term, _)| *term);
        Self(pairs)
    }

    /// Returns true if there are no nonzero terms.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
