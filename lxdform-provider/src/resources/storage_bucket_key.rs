//! Storage bucket key reconciler.
//!
//! Access and secret keys are generated by the daemon unless the user sets
//! them.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{StorageBucketKeyPut, StorageBucketKeysPost};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Outcome, Reconciler, ResourceContext, deleted, fail, found, parse_import, segment};
use crate::error::Diagnostics;
use crate::schema::{
    Attribute, AttributeType, Schema, description_attribute, name_attribute, project_attribute,
    remote_attribute,
};
use crate::value::Value;

pub const DEFAULT_ROLE: &str = "read-only";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageBucketKeyModel {
    pub pool: Value<String>,
    pub storage_bucket: Value<String>,
    pub name: Value<String>,
    pub description: Value<String>,
    pub role: Value<String>,
    pub access_key: Value<String>,
    pub secret_key: Value<String>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

impl StorageBucketKeyModel {
    fn id(&self) -> String {
        format!(
            "{}/{}/{}",
            self.pool.as_str(),
            self.storage_bucket.as_str(),
            self.name.as_str()
        )
    }
}

#[derive(Debug, Default)]
pub struct StorageBucketKeyResource;

impl StorageBucketKeyResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: StorageBucketKeyModel,
    ) -> Outcome<StorageBucketKeyModel> {
        let result = server
            .get_storage_bucket_key(m.pool.as_str(), m.storage_bucket.as_str(), m.name.as_str())
            .await;
        let Some((key, _)) = found(result, "storage bucket key", &m.id())? else {
            return Ok(None);
        };

        m.description = Value::Known(key.description);
        m.role = Value::Known(key.role);
        m.access_key = Value::Known(key.access_key);
        m.secret_key = Value::Known(key.secret_key);
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for StorageBucketKeyResource {
    type Model = StorageBucketKeyModel;

    const TYPE_NAME: &'static str = "lxd_storage_bucket_key";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages an access key of a storage bucket.",
            vec![
                Attribute::required("pool", AttributeType::String)
                    .describe("Storage pool holding the bucket.")
                    .min_length(1)
                    .requires_replace(),
                Attribute::required("storage_bucket", AttributeType::String)
                    .describe("Bucket the key grants access to.")
                    .min_length(1)
                    .requires_replace(),
                name_attribute(),
                description_attribute(),
                Attribute::optional("role", AttributeType::String)
                    .describe("Role of the key.")
                    .one_of(&["admin", DEFAULT_ROLE])
                    .default_value(DEFAULT_ROLE),
                Attribute::optional("access_key", AttributeType::String)
                    .describe("Access key. Generated when not set.")
                    .or_computed()
                    .sensitive(),
                Attribute::optional("secret_key", AttributeType::String)
                    .describe("Secret key. Generated when not set.")
                    .or_computed()
                    .sensitive(),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: StorageBucketKeyModel,
    ) -> Outcome<StorageBucketKeyModel> {
        let id = plan.id();
        info!(key = %id, "Creating storage bucket key");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let req = StorageBucketKeysPost {
            name: plan.name.as_str().to_string(),
            description: plan.description.value_or_default(),
            role: plan.role.value_or_default(),
            access_key: plan.access_key.value_or_default(),
            secret_key: plan.secret_key.value_or_default(),
        };
        let created = server
            .create_storage_bucket_key(plan.pool.as_str(), plan.storage_bucket.as_str(), &req)
            .await
            .map_err(fail("create", "storage bucket key", &id))?;

        let mut m = plan;
        if !created.access_key.is_empty() {
            m.access_key = Value::Known(created.access_key);
            m.secret_key = Value::Known(created.secret_key);
        }
        self.sync_state(&server, m).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: StorageBucketKeyModel,
    ) -> Outcome<StorageBucketKeyModel> {
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: StorageBucketKeyModel,
        state: StorageBucketKeyModel,
    ) -> Outcome<StorageBucketKeyModel> {
        let id = plan.id();
        info!(key = %id, "Updating storage bucket key");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let pool = plan.pool.as_str();
        let bucket = plan.storage_bucket.as_str();
        let name = plan.name.as_str();

        let (current, etag) = server
            .get_storage_bucket_key(pool, bucket, name)
            .await
            .map_err(fail("retrieve", "storage bucket key", &id))?;

        // Keys left to the daemon keep their generated value.
        let key_or = |planned: &Value<String>, stored: &Value<String>, live: String| {
            planned
                .as_known()
                .or(stored.as_known())
                .cloned()
                .unwrap_or(live)
        };
        let req = StorageBucketKeyPut {
            description: plan.description.value_or_default(),
            role: plan.role.value_or_default(),
            access_key: key_or(&plan.access_key, &state.access_key, current.access_key),
            secret_key: key_or(&plan.secret_key, &state.secret_key, current.secret_key),
        };
        server
            .update_storage_bucket_key(pool, bucket, name, &req, &etag)
            .await
            .map_err(fail("update", "storage bucket key", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: StorageBucketKeyModel,
    ) -> Result<(), Diagnostics> {
        let id = state.id();
        info!(key = %id, "Deleting storage bucket key");
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        deleted(
            server
                .delete_storage_bucket_key(
                    state.pool.as_str(),
                    state.storage_bucket.as_str(),
                    state.name.as_str(),
                )
                .await,
            "storage bucket key",
            &id,
        )
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<StorageBucketKeyModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["pool", "storage_bucket", "name"], &[])?;
        Ok(StorageBucketKeyModel {
            pool: segment(id.field("pool")),
            storage_bucket: segment(id.field("storage_bucket")),
            name: segment(id.field("name")),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
