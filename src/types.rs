//! Shared enums and names used across the ownership layer.
//!
//! Nothing in here carries behaviour beyond parsing; the declaration,
//! mediator and policy modules give these values their meaning.

/// Who owns records of an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    /// Owned by an organization through an immutable `owner_id`.
    Organization,
    /// Owned by one or more parent objects (e.g. `program_id`); permissions are inherited.
    Object,
    /// Owned by the user (or service) that created it.
    User,
}

/// When the read mediator may skip injecting the ownership predicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipMode {
    /// Always filter.
    #[default]
    None,
    /// Never filter (pre-authentication schemas such as tokens).
    All,
    /// Skip only for queries returning at most one record by primary key.
    OnlySingleRecordQuery,
}

/// Kind of short-lived bypass (privacy) token a request may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    SignUp,
    EmailVerify,
    PasswordReset,
    OrgInvite,
    OauthToo,
    JobRunnerRegistration,
    FileDownload,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::SignUp => "sign_up",
            TokenType::EmailVerify => "email_verify",
            TokenType::PasswordReset => "password_reset",
            TokenType::OrgInvite => "org_invite",
            TokenType::OauthToo => "oauth_too",
            TokenType::JobRunnerRegistration => "job_runner_registration",
            TokenType::FileDownload => "file_download",
        }
    }
}

impl TryFrom<&str> for TokenType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "sign_up" => Ok(TokenType::SignUp),
            "email_verify" => Ok(TokenType::EmailVerify),
            "password_reset" => Ok(TokenType::PasswordReset),
            "org_invite" => Ok(TokenType::OrgInvite),
            "oauth_too" => Ok(TokenType::OauthToo),
            "job_runner_registration" => Ok(TokenType::JobRunnerRegistration),
            "file_download" => Ok(TokenType::FileDownload),
            _ => Err(format!("Invalid token type: {}", value)),
        }
    }
}

/// Subject type written into tuples for the calling principal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    #[default]
    User,
    /// API tokens and other non-human principals.
    Service,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Service => "service",
        }
    }
}

/// Object type names the layer itself relies on.
pub mod object_type {
    pub const ORGANIZATION: &str = "organization";
    pub const USER: &str = "user";
    pub const GROUP: &str = "group";
}

/// Relation and permission names understood by the ReBAC store.
pub mod relation {
    pub const PARENT: &str = "parent";
    pub const OWNER: &str = "owner";
    pub const ADMIN: &str = "admin";
    pub const MEMBER: &str = "member";
    pub const EDITOR: &str = "editor";
    pub const VIEWER: &str = "viewer";
    pub const BLOCKED: &str = "blocked";

    pub const CAN_VIEW: &str = "can_view";
    pub const CAN_EDIT: &str = "can_edit";
    pub const CAN_DELETE: &str = "can_delete";

    /// `<type>_creator`, granted to groups allowed to create `<type>` objects in an organization.
    pub fn creator(object_type: &str) -> String {
        format!("{}_creator", object_type)
    }

    /// `can_create_<type>`, the permission checked before a delegated create.
    pub fn can_create(object_type: &str) -> String {
        format!("can_create_{}", object_type)
    }
}

/// Field names the composer falls back to.
pub mod field {
    pub const ID: &str = "id";
    pub const OWNER_ID: &str = "owner_id";
    pub const CREATED_BY: &str = "created_by";
    pub const EDITORS: &str = "editors";
    pub const VIEWERS: &str = "viewers";
    pub const BLOCKED_GROUPS: &str = "blocked_groups";

    /// `<parent>_id`, the reference field for a parent kind.
    pub fn parent_id(kind: &str) -> String {
        format!("{}_id", kind)
    }

    /// `<type>_creators`, the organization list field for creator groups.
    pub fn creators(object_type: &str) -> String {
        format!("{}_creators", object_type)
    }
}
