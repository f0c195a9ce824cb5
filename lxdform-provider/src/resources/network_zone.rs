//! Network zone reconciler.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{ConfigMap, NetworkZone, NetworkZonePut};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Outcome, Reconciler, ResourceContext, deleted, fail, found, parse_import, segment};
use crate::error::Diagnostics;
use crate::merge::{ComputedKeys, merge_for_write, strip_for_state};
use crate::schema::{
    Schema, config_attribute, description_attribute, name_attribute, project_attribute,
    remote_attribute,
};
use crate::value::{Value, config_map, config_value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkZoneModel {
    pub name: Value<String>,
    pub description: Value<String>,
    pub config: Value<ConfigMap>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

#[derive(Debug, Default)]
pub struct NetworkZoneResource;

impl NetworkZoneResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: NetworkZoneModel,
    ) -> Outcome<NetworkZoneModel> {
        let name = m.name.as_str().to_string();
        let Some((zone, _)) =
            found(server.get_network_zone(&name).await, "network zone", &name)?
        else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        m.description = Value::Known(zone.description);
        m.config = config_value(
            &m.config,
            strip_for_state(&zone.config, &user, &ComputedKeys::volatile()),
        );
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for NetworkZoneResource {
    type Model = NetworkZoneModel;

    const TYPE_NAME: &'static str = "lxd_network_zone";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a DNS network zone.",
            vec![
                name_attribute(),
                description_attribute(),
                config_attribute(),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: NetworkZoneModel,
    ) -> Outcome<NetworkZoneModel> {
        let name = plan.name.as_str().to_string();
        info!(name = %name, "Creating network zone");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let req = NetworkZone {
            name: name.clone(),
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &ConfigMap::new(),
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
            used_by: Vec::new(),
        };
        server
            .create_network_zone(&req)
            .await
            .map_err(fail("create", "network zone", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: NetworkZoneModel,
    ) -> Outcome<NetworkZoneModel> {
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: NetworkZoneModel,
        _state: NetworkZoneModel,
    ) -> Outcome<NetworkZoneModel> {
        let name = plan.name.as_str().to_string();
        info!(name = %name, "Updating network zone");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let (current, etag) = server
            .get_network_zone(&name)
            .await
            .map_err(fail("retrieve", "network zone", &name))?;

        let req = NetworkZonePut {
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &current.config,
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
        };
        server
            .update_network_zone(&name, &req, &etag)
            .await
            .map_err(fail("update", "network zone", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: NetworkZoneModel,
    ) -> Result<(), Diagnostics> {
        let name = state.name.as_str();
        info!(name = %name, "Deleting network zone");
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        deleted(server.delete_network_zone(name).await, "network zone", name)
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<NetworkZoneModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["name"], &[])?;
        Ok(NetworkZoneModel {
            name: segment(id.field("name")),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
