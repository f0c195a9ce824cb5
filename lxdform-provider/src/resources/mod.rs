//! Reconcilers for the managed resource kinds.
//!
//! Each reconciler turns host CRUD calls into daemon calls for one kind and
//! reads the live object back into the host's model. [`ResourceKind`] is the
//! dispatch surface the provider talks to; it speaks host JSON and decodes
//! into the reconciler's typed model.

pub mod cluster_group;
pub mod cluster_group_assignment;
pub mod network;
pub mod network_acl;
pub mod network_forward;
pub mod network_lb;
pub mod network_peer;
pub mod network_zone;
pub mod network_zone_record;
pub mod profile;
pub mod project;
pub mod storage_bucket;
pub mod storage_bucket_key;
pub mod storage_pool;
pub mod storage_volume;
pub mod trust_certificate;
pub mod trust_token;

use std::sync::Arc;

use async_trait::async_trait;
use lxdform_client::{ClientError, InstanceServer};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Diagnostics, failed};
use crate::import_id::{self, ImportId};
use crate::registry::Registry;
use crate::schema::Schema;
use crate::value::Value;

/// Result of a call that may find the resource gone. `Ok(None)` removes it
/// from host state.
pub type Outcome<T> = Result<Option<T>, Diagnostics>;

/// What every reconciler call gets: the shared registry and the host's
/// cancellation token.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    registry: Arc<Registry>,
    cancel: CancellationToken,
}

impl ResourceContext {
    pub fn new(registry: Arc<Registry>, cancel: CancellationToken) -> Self {
        Self { registry, cancel }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Client for `remote`, scoped and bound to the host's cancellation and
    /// the registry's operation timeout.
    pub async fn server(
        &self,
        remote: &str,
        project: &str,
        target: &str,
    ) -> Result<InstanceServer, Diagnostics> {
        let server = self.registry.instance_server(remote, project, target).await?;
        Ok(server.with_context(self.cancel.clone(), self.registry.operation_timeout()))
    }
}

/// Trait for resource reconcilers.
#[async_trait]
pub trait Reconciler: Default + Send + Sync {
    /// Host-facing model, one field per schema attribute.
    type Model: Serialize + DeserializeOwned + Default + Clone + Send + Sync;

    /// Resource type name as the host knows it.
    const TYPE_NAME: &'static str;

    fn schema(&self) -> Schema;

    async fn create(&self, ctx: &ResourceContext, plan: Self::Model) -> Outcome<Self::Model>;

    async fn read(&self, ctx: &ResourceContext, state: Self::Model) -> Outcome<Self::Model>;

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: Self::Model,
        state: Self::Model,
    ) -> Outcome<Self::Model>;

    /// Deletes the resource. A resource that is already gone is not an error.
    async fn delete(&self, ctx: &ResourceContext, state: Self::Model) -> Result<(), Diagnostics>;

    /// Identity fields from an import id. The host reads the resource afterwards.
    async fn import(&self, _ctx: &ResourceContext, _id: &str) -> Result<Self::Model, Diagnostics> {
        Err(Diagnostics::error(
            "Resource Import Not Implemented",
            format!("Resource {} does not support import.", Self::TYPE_NAME),
        ))
    }

    /// Adjusts the planned model before the host commits the plan.
    async fn modify_plan(
        &self,
        _prior: Option<&Self::Model>,
        _plan: &mut Self::Model,
    ) -> Result<(), Diagnostics> {
        Ok(())
    }
}

// =============================================================================
// Helpers shared by the reconcilers
// =============================================================================

/// `Ok(None)` for not-found, the uniform diagnostic for anything else.
pub(crate) fn found<T>(
    result: lxdform_client::Result<T>,
    noun: &str,
    id: &str,
) -> Result<Option<T>, Diagnostics> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(failed("retrieve", noun, id, e)),
    }
}

/// Delete result with not-found tolerated.
pub(crate) fn deleted(
    result: lxdform_client::Result<()>,
    noun: &str,
    id: &str,
) -> Result<(), Diagnostics> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            warn!(resource = noun, name = %id, "Already deleted");
            Ok(())
        }
        Err(e) => Err(failed("remove", noun, id, e)),
    }
}

/// Maps a daemon error to the uniform diagnostic.
pub(crate) fn fail(
    verb: &'static str,
    noun: &'static str,
    id: &str,
) -> impl FnOnce(ClientError) -> Diagnostics {
    let id = id.to_string();
    move |e| failed(verb, noun, &id, e)
}

/// Parses an import id into diagnostics on failure.
pub(crate) fn parse_import(
    resource: &str,
    id: &str,
    fields: &[&str],
    options: &[&str],
) -> Result<ImportId, Diagnostics> {
    Ok(import_id::parse(resource, id, fields, options)?)
}

/// Rejects a project segment on resources that are not project scoped.
pub(crate) fn reject_project(resource: &str, id: &ImportId) -> Result<(), Diagnostics> {
    if id.project.is_empty() {
        return Ok(());
    }
    Err(Diagnostics::error(
        "Invalid import ID",
        format!(
            "Resource {} is not project scoped, got project {:?} in import ID {:?}.",
            resource, id.project, id.to_string()
        ),
    ))
}

/// Known for a non-empty import segment, null otherwise.
pub(crate) fn segment(value: &str) -> Value<String> {
    Value::non_empty(value)
}

// =============================================================================
// Dispatch
// =============================================================================

fn decode<M: DeserializeOwned>(kind: &str, value: Json) -> Result<M, Diagnostics> {
    serde_json::from_value(value)
        .map_err(|e| Diagnostics::error(format!("Invalid {} data", kind), e.to_string()))
}

fn encode<M: Serialize>(kind: &str, model: &M) -> Result<Json, Diagnostics> {
    serde_json::to_value(model)
        .map_err(|e| Diagnostics::error(format!("Failed to encode {} state", kind), e.to_string()))
}

fn encode_outcome<M: Serialize>(kind: &str, model: Option<M>) -> Outcome<Json> {
    model.map(|m| encode(kind, &m)).transpose()
}

async fn create_json<R: Reconciler>(ctx: &ResourceContext, plan: Json) -> Outcome<Json> {
    let r = R::default();
    let model = r.create(ctx, decode(R::TYPE_NAME, plan)?).await?;
    encode_outcome(R::TYPE_NAME, model)
}

async fn read_json<R: Reconciler>(ctx: &ResourceContext, state: Json) -> Outcome<Json> {
    let r = R::default();
    let model = r.read(ctx, decode(R::TYPE_NAME, state)?).await?;
    encode_outcome(R::TYPE_NAME, model)
}

async fn update_json<R: Reconciler>(
    ctx: &ResourceContext,
    plan: Json,
    state: Json,
) -> Outcome<Json> {
    let r = R::default();
    let plan = decode(R::TYPE_NAME, plan)?;
    let state = decode(R::TYPE_NAME, state)?;
    let model = r.update(ctx, plan, state).await?;
    encode_outcome(R::TYPE_NAME, model)
}

async fn delete_json<R: Reconciler>(ctx: &ResourceContext, state: Json) -> Result<(), Diagnostics> {
    R::default().delete(ctx, decode(R::TYPE_NAME, state)?).await
}

async fn import_json<R: Reconciler>(ctx: &ResourceContext, id: &str) -> Result<Json, Diagnostics> {
    let model = R::default().import(ctx, id).await?;
    encode(R::TYPE_NAME, &model)
}

async fn modify_plan_json<R: Reconciler>(
    prior: Option<Json>,
    plan: Json,
) -> Result<Json, Diagnostics> {
    let prior: Option<R::Model> = prior.map(|p| decode(R::TYPE_NAME, p)).transpose()?;
    let mut plan: R::Model = decode(R::TYPE_NAME, plan)?;
    R::default().modify_plan(prior.as_ref(), &mut plan).await?;
    encode(R::TYPE_NAME, &plan)
}

macro_rules! resource_kinds {
    ($($variant:ident => $reconciler:ty),* $(,)?) => {
        /// Every resource kind the provider manages.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ResourceKind {
            $($variant),*
        }

        impl ResourceKind {
            pub const ALL: &'static [ResourceKind] = &[$(ResourceKind::$variant),*];

            pub fn type_name(self) -> &'static str {
                match self {
                    $(ResourceKind::$variant => <$reconciler as Reconciler>::TYPE_NAME),*
                }
            }

            pub fn schema(self) -> Schema {
                match self {
                    $(ResourceKind::$variant => <$reconciler>::default().schema()),*
                }
            }

            pub async fn create(self, ctx: &ResourceContext, plan: Json) -> Outcome<Json> {
                match self {
                    $(ResourceKind::$variant => create_json::<$reconciler>(ctx, plan).await),*
                }
            }

            pub async fn read(self, ctx: &ResourceContext, state: Json) -> Outcome<Json> {
                match self {
                    $(ResourceKind::$variant => read_json::<$reconciler>(ctx, state).await),*
                }
            }

            pub async fn update(
                self,
                ctx: &ResourceContext,
                plan: Json,
                state: Json,
            ) -> Outcome<Json> {
                match self {
                    $(ResourceKind::$variant => {
                        update_json::<$reconciler>(ctx, plan, state).await
                    }),*
                }
            }

            pub async fn delete(
                self,
                ctx: &ResourceContext,
                state: Json,
            ) -> Result<(), Diagnostics> {
                match self {
                    $(ResourceKind::$variant => delete_json::<$reconciler>(ctx, state).await),*
                }
            }

            pub async fn import(
                self,
                ctx: &ResourceContext,
                id: &str,
            ) -> Result<Json, Diagnostics> {
                match self {
                    $(ResourceKind::$variant => import_json::<$reconciler>(ctx, id).await),*
                }
            }

            pub async fn modify_plan(
                self,
                prior: Option<Json>,
                plan: Json,
            ) -> Result<Json, Diagnostics> {
                match self {
                    $(ResourceKind::$variant => {
                        modify_plan_json::<$reconciler>(prior, plan).await
                    }),*
                }
            }
        }
    };
}

resource_kinds! {
    ClusterGroup => cluster_group::ClusterGroupResource,
    ClusterGroupAssignment => cluster_group_assignment::ClusterGroupAssignmentResource,
    Network => network::NetworkResource,
    NetworkAcl => network_acl::NetworkAclResource,
    NetworkForward => network_forward::NetworkForwardResource,
    NetworkLb => network_lb::NetworkLbResource,
    NetworkPeer => network_peer::NetworkPeerResource,
    NetworkZone => network_zone::NetworkZoneResource,
    NetworkZoneRecord => network_zone_record::NetworkZoneRecordResource,
    Profile => profile::ProfileResource,
    Project => project::ProjectResource,
    StorageBucket => storage_bucket::StorageBucketResource,
    StorageBucketKey => storage_bucket_key::StorageBucketKeyResource,
    StoragePool => storage_pool::StoragePoolResource,
    StorageVolume => storage_volume::StorageVolumeResource,
    TrustCertificate => trust_certificate::TrustCertificateResource,
    TrustToken => trust_token::TrustTokenResource,
}

impl ResourceKind {
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.type_name() == name)
    }
}
