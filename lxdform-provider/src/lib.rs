//! lxdform-provider: declarative lifecycle management of LXD/Incus resources.
//!
//! The host hands over desired state, prior state and the daemon holds live
//! state. This crate reconciles the three:
//!
//! - [`value`]: host values (known, null, unknown) and their conversions
//! - [`import_id`]: `[remote:][project/]field[/field][,opt=value]` import ids
//! - [`merge`]: config merging around daemon computed keys
//! - [`registry`]: remotes and their lazily bootstrapped clients
//! - [`resources`]: one reconciler per resource kind
//! - [`plan`]: plan modification and replacement detection
//! - [`provider`]: configuration and the CRUD surface
//! - [`rpc`]: JSON-lines request loop used by the binary

pub mod certs;
pub mod config;
pub mod error;
pub mod import_id;
pub mod merge;
pub mod plan;
pub mod provider;
pub mod registry;
pub mod resources;
pub mod rpc;
pub mod schema;
pub mod value;

pub use error::{Diagnostic, Diagnostics, ProviderError, Severity};
pub use provider::Provider;
