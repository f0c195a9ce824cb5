//! Storage pool reconciler.
//!
//! Which config keys the daemon fills in by itself depends on the driver,
//! see [`computed_keys`].

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{ConfigMap, StoragePoolPut, StoragePoolsPost};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Outcome, Reconciler, ResourceContext, deleted, fail, found, parse_import, segment};
use crate::error::Diagnostics;
use crate::merge::{
    ComputedKeys, config_state, merge_for_write, planned_config_state, strip_for_state,
};
use crate::schema::{
    Attribute, AttributeType, Schema, config_attribute, config_state_attribute,
    description_attribute, name_attribute, project_attribute, remote_attribute, target_attribute,
};
use crate::value::{Value, config_map, config_value};

pub const DRIVERS: &[&str] = &["dir", "zfs", "lvm", "btrfs", "ceph", "cephfs", "cephobject"];

/// Keys the daemon computes for pools of `driver`.
pub fn computed_keys(driver: &str) -> ComputedKeys {
    match driver {
        "dir" => ComputedKeys::new(&["source"]),
        "zfs" => ComputedKeys::new(&["source", "size", "zfs.pool_name"]),
        "lvm" => ComputedKeys::new(&["source", "size", "lvm.vg_name", "lvm.thinpool_name"]),
        "btrfs" => ComputedKeys::new(&["source", "size"]),
        _ => ComputedKeys::volatile(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePoolModel {
    pub name: Value<String>,
    pub driver: Value<String>,
    pub description: Value<String>,
    pub config: Value<ConfigMap>,
    pub config_state: Value<ConfigMap>,
    pub target: Value<String>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

#[derive(Debug, Default)]
pub struct StoragePoolResource;

impl StoragePoolResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: StoragePoolModel,
    ) -> Outcome<StoragePoolModel> {
        let name = m.name.as_str().to_string();
        let Some((pool, _)) =
            found(server.get_storage_pool(&name).await, "storage pool", &name)?
        else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        let stored = strip_for_state(&pool.config, &user, &computed_keys(&pool.driver));

        m.description = Value::Known(pool.description);
        m.config_state = Value::Known(config_state(&pool.config, &user));
        m.config = config_value(&m.config, stored);
        m.driver = Value::Known(pool.driver);
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for StoragePoolResource {
    type Model = StoragePoolModel;

    const TYPE_NAME: &'static str = "lxd_storage_pool";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a storage pool.",
            vec![
                name_attribute(),
                Attribute::required("driver", AttributeType::String)
                    .describe("Storage driver of the pool.")
                    .one_of(DRIVERS)
                    .requires_replace(),
                description_attribute(),
                config_attribute(),
                config_state_attribute(),
                target_attribute(),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: StoragePoolModel,
    ) -> Outcome<StoragePoolModel> {
        let name = plan.name.as_str().to_string();
        let driver = plan.driver.as_str().to_string();
        info!(name = %name, driver = %driver, "Creating storage pool");

        let server = ctx
            .server(plan.remote.as_str(), plan.project.as_str(), plan.target.as_str())
            .await?;
        let req = StoragePoolsPost {
            name: name.clone(),
            config: merge_for_write(
                &ConfigMap::new(),
                &config_map(&plan.config),
                &computed_keys(&driver),
            ),
            description: plan.description.value_or_default(),
            driver,
        };
        server
            .create_storage_pool(&req)
            .await
            .map_err(fail("create", "storage pool", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: StoragePoolModel,
    ) -> Outcome<StoragePoolModel> {
        let server = ctx
            .server(state.remote.as_str(), state.project.as_str(), state.target.as_str())
            .await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: StoragePoolModel,
        _state: StoragePoolModel,
    ) -> Outcome<StoragePoolModel> {
        let name = plan.name.as_str().to_string();
        info!(name = %name, "Updating storage pool");

        let server = ctx
            .server(plan.remote.as_str(), plan.project.as_str(), plan.target.as_str())
            .await?;
        let (current, etag) = server
            .get_storage_pool(&name)
            .await
            .map_err(fail("retrieve", "storage pool", &name))?;

        let config = merge_for_write(
            &current.config,
            &config_map(&plan.config),
            &computed_keys(&current.driver),
        );
        debug!(name = %name, keys = config.len(), "Merged storage pool config");

        let req = StoragePoolPut {
            description: plan.description.value_or_default(),
            config,
        };
        server
            .update_storage_pool(&name, &req, &etag)
            .await
            .map_err(fail("update", "storage pool", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: StoragePoolModel,
    ) -> Result<(), Diagnostics> {
        let name = state.name.as_str();
        info!(name = %name, "Deleting storage pool");
        let server = ctx
            .server(state.remote.as_str(), state.project.as_str(), state.target.as_str())
            .await?;
        deleted(server.delete_storage_pool(name).await, "storage pool", name)
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<StoragePoolModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["name"], &[])?;
        Ok(StoragePoolModel {
            name: segment(id.field("name")),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }

    async fn modify_plan(
        &self,
        prior: Option<&StoragePoolModel>,
        plan: &mut StoragePoolModel,
    ) -> Result<(), Diagnostics> {
        let driver = plan.driver.as_str();
        plan.config_state = match prior.and_then(|p| p.config_state.as_known()) {
            Some(prior_state) if plan.driver.is_known() && !plan.config.is_unknown() => {
                Value::Known(planned_config_state(
                    prior_state,
                    &config_map(&plan.config),
                    &computed_keys(driver),
                ))
            }
            _ => Value::Unknown,
        };
        Ok(())
    }
}
