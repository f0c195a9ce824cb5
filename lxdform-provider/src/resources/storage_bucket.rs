//! Storage bucket reconciler.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{ConfigMap, StorageBucketPut, StorageBucketsPost};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Outcome, Reconciler, ResourceContext, deleted, fail, found, parse_import, segment};
use crate::error::Diagnostics;
use crate::merge::{ComputedKeys, merge_for_write, strip_for_state};
use crate::schema::{
    Attribute, AttributeType, Schema, config_attribute, description_attribute, name_attribute,
    project_attribute, remote_attribute, target_attribute,
};
use crate::value::{Value, config_map, config_value};

pub fn computed_keys() -> ComputedKeys {
    ComputedKeys::new(&["block.filesystem", "block.mount_options"])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageBucketModel {
    pub pool: Value<String>,
    pub name: Value<String>,
    pub description: Value<String>,
    pub config: Value<ConfigMap>,
    pub location: Value<String>,
    pub target: Value<String>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

impl StorageBucketModel {
    fn id(&self) -> String {
        format!("{}/{}", self.pool.as_str(), self.name.as_str())
    }
}

#[derive(Debug, Default)]
pub struct StorageBucketResource;

impl StorageBucketResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: StorageBucketModel,
    ) -> Outcome<StorageBucketModel> {
        let result = server.get_storage_bucket(m.pool.as_str(), m.name.as_str()).await;
        let Some((bucket, _)) = found(result, "storage bucket", &m.id())? else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        m.description = Value::Known(bucket.description);
        m.location = Value::Known(bucket.location);
        m.config = config_value(
            &m.config,
            strip_for_state(&bucket.config, &user, &computed_keys()),
        );
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for StorageBucketResource {
    type Model = StorageBucketModel;

    const TYPE_NAME: &'static str = "lxd_storage_bucket";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages an object storage bucket.",
            vec![
                Attribute::required("pool", AttributeType::String)
                    .describe("Storage pool holding the bucket.")
                    .min_length(1)
                    .requires_replace(),
                name_attribute(),
                description_attribute(),
                config_attribute(),
                Attribute::computed("location", AttributeType::String)
                    .describe("Cluster member the bucket lives on."),
                target_attribute(),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: StorageBucketModel,
    ) -> Outcome<StorageBucketModel> {
        let id = plan.id();
        info!(bucket = %id, "Creating storage bucket");

        let server = ctx
            .server(plan.remote.as_str(), plan.project.as_str(), plan.target.as_str())
            .await?;
        let req = StorageBucketsPost {
            name: plan.name.as_str().to_string(),
            description: plan.description.value_or_default(),
            config: merge_for_write(&ConfigMap::new(), &config_map(&plan.config), &computed_keys()),
        };
        server
            .create_storage_bucket(plan.pool.as_str(), &req)
            .await
            .map_err(fail("create", "storage bucket", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: StorageBucketModel,
    ) -> Outcome<StorageBucketModel> {
        let server = ctx
            .server(state.remote.as_str(), state.project.as_str(), state.target.as_str())
            .await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: StorageBucketModel,
        _state: StorageBucketModel,
    ) -> Outcome<StorageBucketModel> {
        let id = plan.id();
        info!(bucket = %id, "Updating storage bucket");

        let server = ctx
            .server(plan.remote.as_str(), plan.project.as_str(), plan.target.as_str())
            .await?;
        let pool = plan.pool.as_str();
        let name = plan.name.as_str();

        let (current, etag) = server
            .get_storage_bucket(pool, name)
            .await
            .map_err(fail("retrieve", "storage bucket", &id))?;

        let req = StorageBucketPut {
            description: plan.description.value_or_default(),
            config: merge_for_write(&current.config, &config_map(&plan.config), &computed_keys()),
        };
        server
            .update_storage_bucket(pool, name, &req, &etag)
            .await
            .map_err(fail("update", "storage bucket", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: StorageBucketModel,
    ) -> Result<(), Diagnostics> {
        let id = state.id();
        info!(bucket = %id, "Deleting storage bucket");
        let server = ctx
            .server(state.remote.as_str(), state.project.as_str(), state.target.as_str())
            .await?;
        deleted(
            server
                .delete_storage_bucket(state.pool.as_str(), state.name.as_str())
                .await,
            "storage bucket",
            &id,
        )
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<StorageBucketModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["pool", "name"], &[])?;
        Ok(StorageBucketModel {
            pool: segment(id.field("pool")),
            name: segment(id.field("name")),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
