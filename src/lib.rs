#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(deprecated)]

//!
//! Ownership-core is the ownership and authorization mediation layer of a
//! multi-tenant data platform.
//!
//! Each entity type declares how it is owned (by an organization, by parent
//! objects, or by a user). From that declaration the layer composes the
//! owner fields, the read and write mediators, and a default-deny rule chain,
//! and keeps an external ReBAC store in sync with the grants the records imply.

// Shared enums and relation/field names.
pub mod types;

// Mutation-kind bit flags.
pub mod ops;

pub mod error;

// Caller identity, privacy tokens, cancellation.
pub mod context;

pub mod declaration;

pub mod rebac;

pub mod storage;

// Per-request environment shared by mediators and rules.
pub mod env;

pub mod sync;

pub mod mediator;

pub mod policy;

pub mod composer;

pub mod registry;

pub mod engine;

#[cfg(any(test, feature = "test-utils"))]
pub mod testkit;

pub use composer::{compose, ComposeOption, EntityAccessPolicy, PolicySet};
pub use context::{CallerContext, CallerContextAccessor, CancellationFlag, PrivacyToken};
pub use declaration::OwnershipDeclaration;
pub use engine::{AccessEngine, MutationOutcome};
pub use env::Env;
pub use error::{AccessError, ConfigError, ErrorClass};
pub use ops::{Op, OpMask, QueryOp};
pub use policy::{Decision, Rule, RuleChain};
pub use rebac::{RebacStore, Tuple};
pub use registry::{CreatorRegistry, RegistryConfig};
pub use storage::{Change, Mutation, Predicate, Query, Record, Storage, StorageMutation};
pub use types::{OwnerKind, SkipMode, SubjectKind, TokenType};

/// Installs a fmt subscriber that writes through the test harness.
#[cfg(feature = "tracing-subscriber")]
pub fn install_test_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
