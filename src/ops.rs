//!
//! Operation-kind algebra.
//! Mutation kinds are bit flags so that policy rules can be scoped to any
//! combination of them (e.g. only `CREATE`, or `UPDATE | UPDATE_ONE`).

/// Bitmask of mutation kinds.
pub type OpMask = u8;

/// Mutation kind bit flags.
pub mod kind {
    use super::OpMask;

    /// Insert of a new record.
    pub const CREATE: OpMask = 1 << 0; // 0b00001
    /// Update of every record matching the predicates.
    pub const UPDATE: OpMask = 1 << 1; // 0b00010
    /// Update of a single record by id.
    pub const UPDATE_ONE: OpMask = 1 << 2; // 0b00100
    /// Delete of every record matching the predicates.
    pub const DELETE: OpMask = 1 << 3; // 0b01000
    /// Delete of a single record by id.
    pub const DELETE_ONE: OpMask = 1 << 4; // 0b10000

    pub const ANY_UPDATE: OpMask = UPDATE | UPDATE_ONE;
    pub const ANY_DELETE: OpMask = DELETE | DELETE_ONE;
    pub const ALL_MUTATIONS: OpMask = CREATE | ANY_UPDATE | ANY_DELETE;
}

/// A single mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Create,
    Update,
    UpdateOne,
    Delete,
    DeleteOne,
}

impl Op {
    /// The bit for this kind.
    #[inline]
    pub fn mask(self) -> OpMask {
        match self {
            Op::Create => kind::CREATE,
            Op::Update => kind::UPDATE,
            Op::UpdateOne => kind::UPDATE_ONE,
            Op::Delete => kind::DELETE,
            Op::DeleteOne => kind::DELETE_ONE,
        }
    }

    /// True when this kind is one of the kinds in `mask`.
    #[inline]
    pub fn is(self, mask: OpMask) -> bool {
        (self.mask() & mask) != 0
    }

    pub fn is_create(self) -> bool {
        self == Op::Create
    }

    pub fn is_update(self) -> bool {
        self.is(kind::ANY_UPDATE)
    }

    pub fn is_delete(self) -> bool {
        self.is(kind::ANY_DELETE)
    }

    /// Single-record kinds address their target by id.
    pub fn is_single(self) -> bool {
        self.is(kind::UPDATE_ONE | kind::DELETE_ONE)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::Update => "update",
            Op::UpdateOne => "update_one",
            Op::Delete => "delete",
            Op::DeleteOne => "delete_one",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every kind whose bit is set in `mask`, in declaration order.
pub fn kinds_in(mask: OpMask) -> Vec<Op> {
    [Op::Create, Op::Update, Op::UpdateOne, Op::Delete, Op::DeleteOne]
        .into_iter()
        .filter(|op| op.is(mask))
        .collect()
}

/// How a query reads its results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOp {
    #[default]
    All,
    /// Exactly one result expected.
    Only,
    First,
    Ids,
    Exist,
    Count,
}
