//! Caller context.
//!
//! The authenticated identity is established upstream; this module only
//! carries it. A `CallerContext` is built once per request and passed by
//! reference through every mediator and rule. It is never mutated after
//! construction; the cancellation flag is the only shared signal.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::AccessError;
use crate::types::{SubjectKind, TokenType};

/// A narrowly scoped credential attached to the request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PrivacyToken {
    pub token_type: TokenType,
    /// The owner id this token pre-authorizes, if any.
    pub owner_id: Option<String>,
}

impl PrivacyToken {
    pub fn new(token_type: TokenType) -> Self {
        PrivacyToken { token_type, owner_id: None }
    }

    pub fn for_owner(token_type: TokenType, owner_id: impl Into<String>) -> Self {
        PrivacyToken { token_type, owner_id: Some(owner_id.into()) }
    }
}

/// Request cancellation signal shared with whoever owns the request.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read access to the ambient caller identity.
pub trait CallerContextAccessor {
    fn subject_id(&self) -> Result<&str, AccessError>;
    fn organization_ids(&self) -> Result<Vec<String>, AccessError>;
    fn is_admin(&self) -> bool;
    fn privacy_token(&self, token_type: TokenType) -> Option<&PrivacyToken>;
}

/// Identity of the caller for one request.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    subject_id: Option<String>,
    subject_kind: SubjectKind,
    organization_ids: BTreeSet<String>,
    active_organization: Option<String>,
    admin: bool,
    tokens: Vec<PrivacyToken>,
    cancel: CancellationFlag,
}

impl CallerContext {
    /// An empty context: no subject, no organizations, no tokens.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_subject(subject_id: impl Into<String>) -> Self {
        CallerContext { subject_id: Some(subject_id.into()), ..Self::default() }
    }

    #[must_use]
    pub fn with_subject_kind(mut self, kind: SubjectKind) -> Self {
        self.subject_kind = kind;
        self
    }

    #[must_use]
    pub fn with_organizations<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.organization_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Organization the request is scoped to. Must also be one of the member organizations.
    #[must_use]
    pub fn with_active_organization(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.organization_ids.insert(id.clone());
        self.active_organization = Some(id);
        self
    }

    #[must_use]
    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: PrivacyToken) -> Self {
        self.tokens.push(token);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    pub fn subject_kind(&self) -> SubjectKind {
        self.subject_kind
    }

    pub fn organizations(&self) -> &BTreeSet<String> {
        &self.organization_ids
    }

    pub fn active_organization(&self) -> Option<&str> {
        self.active_organization.as_deref()
    }

    pub fn tokens(&self) -> &[PrivacyToken] {
        &self.tokens
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// First token whose type is in `declared`. Tokens of other types are ignored.
    pub fn bypass_token(&self, declared: &[TokenType]) -> Option<&PrivacyToken> {
        self.tokens.iter().find(|t| declared.contains(&t.token_type))
    }

    pub fn has_bypass(&self, declared: &[TokenType]) -> bool {
        self.bypass_token(declared).is_some()
    }

    pub fn is_member_of(&self, organization_id: &str) -> bool {
        self.organization_ids.contains(organization_id)
    }

    /// Resolves the organization a create should be owned by.
    ///
    /// An explicitly requested organization must be one of the caller's; otherwise
    /// the active organization wins, then a single membership. Anything else is
    /// ambiguous and treated as a missing context.
    pub fn resolve_organization(&self, requested: Option<&str>) -> Result<String, AccessError> {
        if self.subject_id.is_none() {
            return Err(AccessError::AuthContextMissing("no subject in context".into()));
        }
        if let Some(org) = requested {
            if self.is_member_of(org) {
                return Ok(org.to_string());
            }
            return Err(AccessError::AuthContextMissing(format!(
                "organization {} is not in the caller's organizations",
                org
            )));
        }
        if let Some(active) = &self.active_organization {
            return Ok(active.clone());
        }
        let mut orgs = self.organization_ids.iter();
        match (orgs.next(), orgs.next()) {
            (Some(only), None) => Ok(only.clone()),
            (None, _) => Err(AccessError::AuthContextMissing("no organization in context".into())),
            (Some(_), Some(_)) => Err(AccessError::AuthContextMissing(
                "multiple organizations in context and none active".into(),
            )),
        }
    }
}

impl CallerContextAccessor for CallerContext {
    fn subject_id(&self) -> Result<&str, AccessError> {
        self.subject_id
            .as_deref()
            .ok_or_else(|| AccessError::AuthContextMissing("no subject in context".into()))
    }

    fn organization_ids(&self) -> Result<Vec<String>, AccessError> {
        self.subject_id()?;
        Ok(self.organization_ids.iter().cloned().collect())
    }

    fn is_admin(&self) -> bool {
        self.admin
    }

    fn privacy_token(&self, token_type: TokenType) -> Option<&PrivacyToken> {
        self.tokens.iter().find(|t| t.token_type == token_type)
    }
}
