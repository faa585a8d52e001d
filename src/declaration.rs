//!
//! Ownership declarations.
//!
//! A declaration states how records of one entity type are owned. It is
//! pure data: the composer turns it into fields, edges, mediators and rules.

use crate::context::{CallerContext, CallerContextAccessor};
use crate::types::{field, relation, OwnerKind, SkipMode, TokenType};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OwnershipDeclaration {
    pub object_type: String,
    pub owner_kind: OwnerKind,
    /// Parent object types for object-owned entities, in declaration order.
    #[serde(default)]
    pub parent_kinds: Vec<String>,
    /// Name of the reverse edge created on the owner type.
    #[serde(default)]
    pub reference: String,
    /// A create must carry an owner (or parent) unless the admin escape applies.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Admins may create records with no organization owner.
    #[serde(default)]
    pub allow_empty_for_admin: bool,
    /// Relation written for owner and creator tuples.
    #[serde(default = "default_relation")]
    pub relation: String,
    /// Token types that bypass the ownership checks for this entity.
    #[serde(default)]
    pub bypass_tokens: Vec<TokenType>,
    #[serde(default)]
    pub skip_read_filter: SkipMode,
    /// Also carry an organization `owner_id`. Always set for organization-owned entities.
    #[serde(default)]
    pub organization_owner: bool,
    #[serde(default = "default_owner_field")]
    pub owner_field: String,
    /// Record the creating subject in `created_by` and grant it `relation`.
    #[serde(default = "default_true")]
    pub grant_creator: bool,
    /// Set when enforcement is delegated entirely to inherited ReBAC relations.
    #[serde(default)]
    pub inherited_enforcement: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_relation() -> String {
    relation::PARENT.to_string()
}

fn default_owner_field() -> String {
    field::OWNER_ID.to_string()
}

/// `program` -> `programs`, `policy` -> `policies`.
pub fn plural(name: &str) -> String {
    if let Some(stem) = name.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{}ies", stem);
        }
    }
    if name.ends_with('s') || name.ends_with('x') || name.ends_with("ch") || name.ends_with("sh") {
        return format!("{}es", name);
    }
    format!("{}s", name)
}

impl OwnershipDeclaration {
    fn new(object_type: impl Into<String>, owner_kind: OwnerKind) -> Self {
        let object_type = object_type.into();
        OwnershipDeclaration {
            reference: plural(&object_type),
            object_type,
            owner_kind,
            parent_kinds: Vec::new(),
            required: true,
            allow_empty_for_admin: false,
            relation: default_relation(),
            bypass_tokens: Vec::new(),
            skip_read_filter: SkipMode::None,
            organization_owner: owner_kind == OwnerKind::Organization,
            owner_field: default_owner_field(),
            grant_creator: owner_kind == OwnerKind::Object,
            inherited_enforcement: None,
        }
    }

    pub fn organization(object_type: impl Into<String>) -> Self {
        Self::new(object_type, OwnerKind::Organization)
    }

    /// Object-owned; add parents with the `with_parents` compose option.
    pub fn object(object_type: impl Into<String>) -> Self {
        Self::new(object_type, OwnerKind::Object)
    }

    /// User-owned. `reference` names the reverse edge on the user type and must not be empty.
    pub fn user(object_type: impl Into<String>, reference: impl Into<String>) -> Self {
        OwnershipDeclaration { reference: reference.into(), ..Self::new(object_type, OwnerKind::User) }
    }

    /// Reference fields of the parents, parallel to `parent_kinds`.
    pub fn parent_fields(&self) -> Vec<(String, &str)> {
        self.parent_kinds.iter().map(|k| (field::parent_id(k), k.as_str())).collect()
    }

    /// The organization owner field, when the entity carries one.
    pub fn organization_field(&self) -> Option<&str> {
        self.organization_owner.then_some(self.owner_field.as_str())
    }

    /// Fields fixed at creation.
    pub fn owner_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if self.organization_owner || self.owner_kind == OwnerKind::User {
            fields.push(self.owner_field.clone());
        }
        fields.extend(self.parent_fields().into_iter().map(|(f, _)| f));
        fields
    }

    pub fn is_bypassed(&self, ctx: &CallerContext) -> bool {
        ctx.has_bypass(&self.bypass_tokens)
    }

    /// Admins may skip ownership filtering when the declaration allows an empty owner.
    pub fn admin_escape(&self, ctx: &CallerContext) -> bool {
        self.allow_empty_for_admin && ctx.is_admin()
    }
}
