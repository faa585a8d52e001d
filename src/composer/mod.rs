//!
//! Ownership capability composer.
//!
//! Turns an [`OwnershipDeclaration`] plus option functions into an immutable
//! [`EntityAccessPolicy`]: the owner fields and edges the entity schema must
//! carry, the relation fields the synchronizer follows, the mediator chains,
//! and the rule chain. All validation happens here, at startup.

pub mod options;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::declaration::OwnershipDeclaration;
use crate::error::{AccessError, ConfigError};
use crate::mediator::{
    AuthorizedIdFilter, GroupBlockFilter, ImmutableOwnerGuard, NarrowOnMutate, ReadMediator, SetOwnerOnCreate,
    SyncTuples, WriteMediator,
};
use crate::ops::kind;
use crate::policy::{
    AllOf, AllowIfAdmin, AllowIfAuthenticated, AllowIfBypassToken, AlwaysAllow, CanCreateUnderParents,
    CheckCreateAccess, RuleChain, RuleRef, ScopedRule,
};
use crate::registry::{is_valid_name, CreatorRegistry};
use crate::sync::RelationField;
use crate::types::{field, object_type, relation, OwnerKind};

pub type ComposeOption = Box<dyn FnOnce(&mut Composition)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPermissions {
    pub view: bool,
}

/// Mutable state the option functions work on.
pub struct Composition {
    pub declaration: OwnershipDeclaration,
    write_mediators: Option<Vec<Arc<dyn WriteMediator>>>,
    read_mediators: Option<Vec<Arc<dyn ReadMediator>>>,
    query_rules: Option<Vec<RuleRef>>,
    mutation_rules: Option<Vec<ScopedRule>>,
    group_permissions: Option<GroupPermissions>,
    blocked_group_filter: bool,
    creator_groups: Vec<String>,
}

impl Composition {
    fn new(declaration: OwnershipDeclaration) -> Self {
        Composition {
            declaration,
            write_mediators: None,
            read_mediators: None,
            query_rules: None,
            mutation_rules: None,
            group_permissions: None,
            blocked_group_filter: false,
            creator_groups: Vec::new(),
        }
    }
}

/// A field the entity schema must define.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub comment: String,
    pub immutable: bool,
    pub optional: bool,
    /// Rejects the empty string when a value is given.
    pub not_empty: bool,
    /// List of ids rather than a single id.
    pub list: bool,
}

impl FieldSpec {
    fn id(name: impl Into<String>, comment: impl Into<String>) -> Self {
        FieldSpec {
            name: name.into(),
            comment: comment.into(),
            immutable: false,
            optional: true,
            not_empty: false,
            list: false,
        }
    }

    fn ids(name: impl Into<String>, comment: impl Into<String>) -> Self {
        FieldSpec { list: true, ..Self::id(name, comment) }
    }

    fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    fn not_empty(mut self, not_empty: bool) -> Self {
        self.not_empty = not_empty;
        self
    }
}

/// A schema edge from the entity to `target_type` through `field`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EdgeSpec {
    pub name: String,
    pub target_type: String,
    pub field: String,
    /// Name of the reverse edge on the target type.
    pub reference: String,
    pub unique: bool,
    pub immutable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum Enforcement {
    Direct,
    /// Only inherited ReBAC relations protect the entity.
    Inherited { note: String },
}

/// Fully resolved access behavior of one entity type.
#[derive(Debug, Clone)]
pub struct EntityAccessPolicy {
    declaration: OwnershipDeclaration,
    fields: Vec<FieldSpec>,
    edges: Vec<EdgeSpec>,
    relation_fields: Vec<RelationField>,
    write_mediators: Vec<Arc<dyn WriteMediator>>,
    read_mediators: Vec<Arc<dyn ReadMediator>>,
    rules: RuleChain,
    enforcement: Enforcement,
    creator_groups: Vec<String>,
}

impl EntityAccessPolicy {
    pub fn object_type(&self) -> &str {
        &self.declaration.object_type
    }

    pub fn declaration(&self) -> &OwnershipDeclaration {
        &self.declaration
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn edges(&self) -> &[EdgeSpec] {
        &self.edges
    }

    pub fn edge(&self, name: &str) -> Option<&EdgeSpec> {
        self.edges.iter().find(|e| e.name == name)
    }

    pub fn relation_fields(&self) -> &[RelationField] {
        &self.relation_fields
    }

    pub fn write_mediators(&self) -> &[Arc<dyn WriteMediator>] {
        &self.write_mediators
    }

    pub fn read_mediators(&self) -> &[Arc<dyn ReadMediator>] {
        &self.read_mediators
    }

    pub fn rules(&self) -> &RuleChain {
        &self.rules
    }

    pub fn enforcement(&self) -> &Enforcement {
        &self.enforcement
    }

    /// Types whose creator groups this entity carries.
    pub fn creator_groups(&self) -> &[String] {
        &self.creator_groups
    }
}

fn validate(decl: &OwnershipDeclaration, creator_groups: &[String]) -> Result<(), ConfigError> {
    let names = std::iter::once(&decl.object_type)
        .chain(&decl.parent_kinds)
        .chain(creator_groups)
        .chain(std::iter::once(&decl.owner_field));
    for name in names {
        if !is_valid_name(name) {
            return Err(ConfigError::InvalidName(name.clone()));
        }
    }
    if decl.reference.is_empty() {
        return Err(ConfigError::EmptyReference(decl.object_type.clone()));
    }
    if decl.owner_kind == OwnerKind::Object && decl.parent_kinds.is_empty() && decl.inherited_enforcement.is_none() {
        return Err(ConfigError::MissingParentKind(decl.object_type.clone()));
    }
    if decl.allow_empty_for_admin && !decl.organization_owner {
        return Err(ConfigError::AdminEmptyWithoutOrganization(decl.object_type.clone()));
    }
    Ok(())
}

fn schema(c: &Composition) -> (Vec<FieldSpec>, Vec<EdgeSpec>, Vec<RelationField>) {
    let decl = &c.declaration;
    let mut fields = Vec::new();
    let mut edges = Vec::new();
    let mut relation_fields = Vec::new();

    if let Some(org_field) = decl.organization_field() {
        fields.push(
            FieldSpec::id(org_field, "the organization id that owns the object")
                .immutable()
                .not_empty(!decl.allow_empty_for_admin),
        );
        edges.push(EdgeSpec {
            name: "owner".into(),
            target_type: object_type::ORGANIZATION.into(),
            field: org_field.into(),
            reference: decl.reference.clone(),
            unique: true,
            immutable: true,
        });
        relation_fields.push(RelationField::new(org_field, relation::PARENT, object_type::ORGANIZATION));
    }

    match decl.owner_kind {
        OwnerKind::User => {
            fields.push(FieldSpec::id(&decl.owner_field, "the user id that owns the object").immutable().not_empty(true));
            edges.push(EdgeSpec {
                name: "owner".into(),
                target_type: object_type::USER.into(),
                field: decl.owner_field.clone(),
                reference: decl.reference.clone(),
                unique: true,
                immutable: true,
            });
            relation_fields.push(RelationField::new(&decl.owner_field, &decl.relation, object_type::USER));
        }
        OwnerKind::Object => {
            for (parent_field, kind) in decl.parent_fields() {
                fields.push(
                    FieldSpec::id(&parent_field, format!("the {} the object belongs to", kind))
                        .immutable()
                        .not_empty(true),
                );
                edges.push(EdgeSpec {
                    name: kind.to_string(),
                    target_type: kind.to_string(),
                    field: parent_field.clone(),
                    reference: decl.reference.clone(),
                    unique: true,
                    immutable: true,
                });
                relation_fields.push(RelationField::new(parent_field, &decl.relation, kind));
            }
            if decl.grant_creator {
                fields.push(FieldSpec::id(field::CREATED_BY, "the subject that created the object").immutable());
                relation_fields.push(RelationField::new(field::CREATED_BY, &decl.relation, object_type::USER));
            }
        }
        OwnerKind::Organization => {}
    }

    if let Some(groups) = c.group_permissions {
        let mut grants = vec![(field::EDITORS, relation::EDITOR, "editors"), (field::BLOCKED_GROUPS, relation::BLOCKED, "blocked")];
        if groups.view {
            grants.push((field::VIEWERS, relation::VIEWER, "viewers"));
        }
        for (list_field, rel, edge) in grants {
            fields.push(FieldSpec::ids(list_field, format!("groups granted {} on the object", rel)));
            edges.push(EdgeSpec {
                name: edge.into(),
                target_type: object_type::GROUP.into(),
                field: list_field.into(),
                reference: format!("{}_{}", decl.object_type, edge),
                unique: false,
                immutable: false,
            });
            relation_fields.push(RelationField::new(list_field, rel, object_type::GROUP).userset(relation::MEMBER));
        }
    }

    for creatable in &c.creator_groups {
        let list_field = field::creators(creatable);
        fields.push(FieldSpec::ids(&list_field, format!("groups allowed to create {} objects", creatable)));
        edges.push(EdgeSpec {
            name: list_field.clone(),
            target_type: object_type::GROUP.into(),
            field: list_field.clone(),
            reference: format!("{}_creators", creatable),
            unique: false,
            immutable: false,
        });
        relation_fields.push(
            RelationField::new(list_field, relation::creator(creatable), object_type::GROUP).userset(relation::MEMBER),
        );
    }

    (fields, edges, relation_fields)
}

/// Default rule chain for the declaration.
///
/// Queries are already filtered by the read chain, so they are allowed once
/// mediated. Updates and deletes are allowed because narrowing leaves only
/// rows the caller may edit. Creates are checked against the owner.
pub fn default_rules(decl: &OwnershipDeclaration) -> RuleChain {
    let mut query_rules: Vec<RuleRef> = Vec::new();
    let mut mutation_rules = Vec::new();
    if !decl.bypass_tokens.is_empty() {
        query_rules.push(Arc::new(AllowIfBypassToken(decl.bypass_tokens.clone())));
        mutation_rules.push(ScopedRule::any(AllowIfBypassToken(decl.bypass_tokens.clone())));
    }
    query_rules.push(Arc::new(AlwaysAllow));
    if decl.allow_empty_for_admin {
        mutation_rules.push(ScopedRule::any(AllowIfAdmin));
    }

    match decl.owner_kind {
        OwnerKind::Organization => mutation_rules.push(ScopedRule::on(kind::CREATE, CheckCreateAccess)),
        OwnerKind::Object if decl.parent_kinds.is_empty() => {
            mutation_rules.push(ScopedRule::on(kind::CREATE, CheckCreateAccess));
        }
        OwnerKind::Object => {
            if decl.organization_owner {
                let both: Vec<RuleRef> = vec![Arc::new(CheckCreateAccess), Arc::new(CanCreateUnderParents)];
                mutation_rules.push(ScopedRule::on(kind::CREATE, AllOf::new(both)));
            } else {
                mutation_rules.push(ScopedRule::on(kind::CREATE, CanCreateUnderParents));
            }
            if !decl.required {
                mutation_rules.push(ScopedRule::on(kind::CREATE, CheckCreateAccess));
            }
        }
        OwnerKind::User => mutation_rules.push(ScopedRule::on(kind::CREATE, AllowIfAuthenticated)),
    }
    mutation_rules.push(ScopedRule::on(kind::ANY_UPDATE | kind::ANY_DELETE, AlwaysAllow));
    RuleChain::from_parts(query_rules, mutation_rules)
}

/// Composes one entity policy. Fails on inconsistent declarations.
pub fn compose(declaration: OwnershipDeclaration, opts: Vec<ComposeOption>) -> Result<EntityAccessPolicy, ConfigError> {
    let mut c = Composition::new(declaration);
    if c.declaration.owner_kind == OwnerKind::Organization {
        c.declaration.organization_owner = true;
    }
    for opt in opts {
        opt(&mut c);
    }
    validate(&c.declaration, &c.creator_groups)?;

    let (fields, edges, relation_fields) = schema(&c);
    let enforcement = match &c.declaration.inherited_enforcement {
        Some(note) if c.declaration.parent_kinds.is_empty() => {
            tracing::info!(object_type = %c.declaration.object_type, note = %note, "enforced by inherited relations only");
            Enforcement::Inherited { note: note.clone() }
        }
        _ => Enforcement::Direct,
    };

    let write_mediators = c.write_mediators.take().unwrap_or_else(|| {
        vec![
            Arc::new(SetOwnerOnCreate) as Arc<dyn WriteMediator>,
            Arc::new(ImmutableOwnerGuard),
            Arc::new(NarrowOnMutate),
            Arc::new(SyncTuples),
        ]
    });
    let read_mediators = c.read_mediators.take().unwrap_or_else(|| {
        let mut chain: Vec<Arc<dyn ReadMediator>> = vec![Arc::new(AuthorizedIdFilter)];
        if c.blocked_group_filter {
            chain.push(Arc::new(GroupBlockFilter));
        }
        chain
    });
    let defaults = default_rules(&c.declaration);
    let rules = RuleChain::from_parts(
        c.query_rules.take().unwrap_or_else(|| defaults.query_rules().to_vec()),
        c.mutation_rules.take().unwrap_or_else(|| defaults.mutation_rules().to_vec()),
    );

    tracing::debug!(
        object_type = %c.declaration.object_type,
        owner_kind = ?c.declaration.owner_kind,
        fields = fields.len(),
        relation_fields = relation_fields.len(),
        "composed access policy"
    );
    Ok(EntityAccessPolicy {
        declaration: c.declaration,
        fields,
        edges,
        relation_fields,
        write_mediators,
        read_mediators,
        rules,
        enforcement,
        creator_groups: c.creator_groups,
    })
}

/// How a named edge is followed from a source entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeRoute {
    /// The source holds ids of `target_type` records in `field`.
    Forward { target_type: String, field: String },
    /// `target_type` records point back at the source through `field`.
    Inverse { target_type: String, field: String },
}

/// Every composed policy, keyed by entity type.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: BTreeMap<String, Arc<EntityAccessPolicy>>,
    registry: CreatorRegistry,
}

impl PolicySet {
    pub fn builder() -> PolicySetBuilder {
        PolicySetBuilder::default()
    }

    pub fn get(&self, object_type: &str) -> Result<&EntityAccessPolicy, AccessError> {
        self.policies
            .get(object_type)
            .map(Arc::as_ref)
            .ok_or_else(|| AccessError::UnknownEntityType(object_type.to_string()))
    }

    pub fn registry(&self) -> &CreatorRegistry {
        &self.registry
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Forward edges of `source` win over reverse edges other types declare toward it.
    pub fn resolve_edge(&self, source: &str, name: &str) -> Result<EdgeRoute, AccessError> {
        let policy = self.get(source)?;
        if let Some(edge) = policy.edge(name) {
            return Ok(EdgeRoute::Forward { target_type: edge.target_type.clone(), field: edge.field.clone() });
        }
        self.policies
            .values()
            .flat_map(|p| p.edges().iter().map(move |e| (p.object_type(), e)))
            .find(|(_, e)| e.target_type == source && e.reference == name)
            .map(|(target, e)| EdgeRoute::Inverse { target_type: target.to_string(), field: e.field.clone() })
            .ok_or_else(|| {
                AccessError::Config(ConfigError::UnknownEdge { object_type: source.to_string(), edge: name.to_string() })
            })
    }
}

#[derive(Default)]
pub struct PolicySetBuilder {
    policies: Vec<EntityAccessPolicy>,
    registry: CreatorRegistry,
}

impl PolicySetBuilder {
    #[must_use]
    pub fn register(mut self, policy: EntityAccessPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn compose(self, declaration: OwnershipDeclaration, opts: Vec<ComposeOption>) -> Result<Self, ConfigError> {
        Ok(self.register(compose(declaration, opts)?))
    }

    #[must_use]
    pub fn with_registry(mut self, registry: CreatorRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Checks that types are unique and that the registry and creator groups
    /// only name declared types.
    pub fn build(self) -> Result<PolicySet, ConfigError> {
        let mut policies = BTreeMap::new();
        for p in self.policies {
            let name = p.object_type().to_string();
            if policies.insert(name.clone(), Arc::new(p)).is_some() {
                return Err(ConfigError::DuplicateEntityType(name));
            }
        }
        let declared: BTreeSet<String> = policies.keys().cloned().collect();
        self.registry.validate_against(&declared)?;
        for p in policies.values() {
            if let Some(t) = p.creator_groups().iter().find(|t| !self.registry.supports_creation(t)) {
                return Err(ConfigError::UnregisteredCreatorGroup(t.clone()));
            }
        }
        tracing::debug!(types = policies.len(), creatable = self.registry.types().count(), "policy set built");
        Ok(PolicySet { policies, registry: self.registry })
    }
}
