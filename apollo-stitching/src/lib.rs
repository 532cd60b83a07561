//! ## Usage
//!
//! Stitches several GraphQL schemas into one. Each constituent schema is a [`Subschema`]: an
//! in-memory [`ExecutableSchema`] or a remote schema reached through a [`Fetcher`]. The stitched
//! schema delegates the fields it serves to the subschemas that own them, rewrites requests and
//! results through each subschema's [`Transform`]s and completes objects of merged types by
//! querying every subschema that contributes fields to them.
//!
//! [`Fetcher`]: subschema::Fetcher
//! [`Transform`]: transforms::Transform

#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

pub mod configuration;
pub mod context;
pub mod delegate;
pub mod error;
pub mod execution;
pub mod graphql;
pub mod json_ext;
pub mod merge;
pub mod pubsub;
pub mod reconcile;
pub mod schema;
pub mod subschema;
pub mod transforms;

pub use crate::configuration::Configuration;
pub use crate::context::Context;
pub use crate::delegate::DelegateOptions;
pub use crate::delegate::delegate_to_schema;
pub use crate::error::DelegationError;
pub use crate::error::StitchingError;
pub use crate::execution::ExecutableSchema;
pub use crate::execution::ResolveInfo;
pub use crate::execution::ResolverMap;
pub use crate::merge::MergeInfo;
pub use crate::merge::MergeSchemasOptions;
pub use crate::merge::SchemaSource;
pub use crate::merge::merge_schemas;
pub use crate::pubsub::PubSub;
pub use crate::subschema::Subschema;
pub use crate::subschema::SubschemaConfig;

/// Error type used everywhere inside the crate's collaborator boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
