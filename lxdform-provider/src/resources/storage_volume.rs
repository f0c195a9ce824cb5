//! Storage volume reconciler.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{ConfigMap, StorageVolumePut, StorageVolumesPost};
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

pub const DEFAULT_VOLUME_TYPE: &str = "custom";
pub const DEFAULT_CONTENT_TYPE: &str = "filesystem";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageVolumeModel {
    pub pool: Value<String>,
    pub name: Value<String>,
    #[serde(rename = "type")]
    pub kind: Value<String>,
    pub content_type: Value<String>,
    pub description: Value<String>,
    pub config: Value<ConfigMap>,
    pub location: Value<String>,
    pub target: Value<String>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

impl StorageVolumeModel {
    fn id(&self) -> String {
        format!("{}/{}", self.pool.as_str(), self.name.as_str())
    }

    fn volume_type(&self) -> String {
        match self.kind.as_str() {
            "" => DEFAULT_VOLUME_TYPE.to_string(),
            kind => kind.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct StorageVolumeResource;

impl StorageVolumeResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: StorageVolumeModel,
    ) -> Outcome<StorageVolumeModel> {
        let kind = m.volume_type();
        let result = server
            .get_storage_volume(m.pool.as_str(), &kind, m.name.as_str())
            .await;
        let Some((volume, _)) = found(result, "storage volume", &m.id())? else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        m.kind = Value::Known(kind);
        m.content_type = Value::Known(match volume.content_type.as_str() {
            "" => DEFAULT_CONTENT_TYPE.to_string(),
            content_type => content_type.to_string(),
        });
        m.description = Value::Known(volume.description);
        m.location = Value::Known(volume.location);
        m.config = config_value(
            &m.config,
            strip_for_state(&volume.config, &user, &ComputedKeys::volatile()),
        );
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for StorageVolumeResource {
    type Model = StorageVolumeModel;

    const TYPE_NAME: &'static str = "lxd_volume";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a custom storage volume.",
            vec![
                Attribute::required("pool", AttributeType::String)
                    .describe("Storage pool holding the volume.")
                    .min_length(1)
                    .requires_replace(),
                name_attribute(),
                Attribute::optional("type", AttributeType::String)
                    .describe("Volume type.")
                    .one_of(&[DEFAULT_VOLUME_TYPE])
                    .default_value(DEFAULT_VOLUME_TYPE)
                    .requires_replace(),
                Attribute::optional("content_type", AttributeType::String)
                    .describe("Content type of the volume.")
                    .one_of(&["filesystem", "block"])
                    .default_value(DEFAULT_CONTENT_TYPE)
                    .requires_replace(),
                description_attribute(),
                config_attribute(),
                Attribute::computed("location", AttributeType::String)
                    .describe("Cluster member the volume lives on."),
                target_attribute(),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: StorageVolumeModel,
    ) -> Outcome<StorageVolumeModel> {
        let id = plan.id();
        info!(volume = %id, "Creating storage volume");

        let server = ctx
            .server(plan.remote.as_str(), plan.project.as_str(), plan.target.as_str())
            .await?;
        let req = StorageVolumesPost {
            name: plan.name.as_str().to_string(),
            kind: plan.volume_type(),
            content_type: match plan.content_type.as_str() {
                "" => DEFAULT_CONTENT_TYPE.to_string(),
                content_type => content_type.to_string(),
            },
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &ConfigMap::new(),
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
        };
        server
            .create_storage_volume(plan.pool.as_str(), &req)
            .await
            .map_err(fail("create", "storage volume", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: StorageVolumeModel,
    ) -> Outcome<StorageVolumeModel> {
        let server = ctx
            .server(state.remote.as_str(), state.project.as_str(), state.target.as_str())
            .await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: StorageVolumeModel,
        _state: StorageVolumeModel,
    ) -> Outcome<StorageVolumeModel> {
        let id = plan.id();
        info!(volume = %id, "Updating storage volume");

        let server = ctx
            .server(plan.remote.as_str(), plan.project.as_str(), plan.target.as_str())
            .await?;
        let pool = plan.pool.as_str();
        let kind = plan.volume_type();
        let name = plan.name.as_str();

        let (current, etag) = server
            .get_storage_volume(pool, &kind, name)
            .await
            .map_err(fail("retrieve", "storage volume", &id))?;

        let req = StorageVolumePut {
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &current.config,
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
        };
        server
            .update_storage_volume(pool, &kind, name, &req, &etag)
            .await
            .map_err(fail("update", "storage volume", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: StorageVolumeModel,
    ) -> Result<(), Diagnostics> {
        let id = state.id();
        info!(volume = %id, "Deleting storage volume");
        let server = ctx
            .server(state.remote.as_str(), state.project.as_str(), state.target.as_str())
            .await?;
        deleted(
            server
                .delete_storage_volume(
                    state.pool.as_str(),
                    &state.volume_type(),
                    state.name.as_str(),
                )
                .await,
            "storage volume",
            &id,
        )
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<StorageVolumeModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["pool", "name"], &["content_type"])?;
        let content_type = id
            .option("content_type")
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        Ok(StorageVolumeModel {
            pool: segment(id.field("pool")),
            name: segment(id.field("name")),
            kind: Value::Known(DEFAULT_VOLUME_TYPE.to_string()),
            content_type: Value::Known(content_type.to_string()),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
