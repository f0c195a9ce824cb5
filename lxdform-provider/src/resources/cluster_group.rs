//! Cluster group reconciler.
//!
//! Members are owned by `lxd_cluster_group_assignment`, so writes here carry
//! the live member list through untouched.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{ClusterGroupPut, ClusterGroupsPost, ConfigMap};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    Outcome, Reconciler, ResourceContext, deleted, fail, found, parse_import, reject_project,
    segment,
};
use crate::error::Diagnostics;
use crate::merge::{ComputedKeys, merge_for_write, strip_for_state};
use crate::schema::{
    Schema, config_attribute, description_attribute, name_attribute, remote_attribute,
};
use crate::value::{Value, config_map, config_value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterGroupModel {
    pub name: Value<String>,
    pub description: Value<String>,
    pub config: Value<ConfigMap>,
    pub remote: Value<String>,
}

#[derive(Debug, Default)]
pub struct ClusterGroupResource;

impl ClusterGroupResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: ClusterGroupModel,
    ) -> Outcome<ClusterGroupModel> {
        let name = m.name.as_str().to_string();
        let Some((group, _)) =
            found(server.get_cluster_group(&name).await, "cluster group", &name)?
        else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        m.description = Value::Known(group.description);
        m.config = config_value(
            &m.config,
            strip_for_state(&group.config, &user, &ComputedKeys::volatile()),
        );
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for ClusterGroupResource {
    type Model = ClusterGroupModel;

    const TYPE_NAME: &'static str = "lxd_cluster_group";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a cluster group.",
            vec![name_attribute(), description_attribute(), config_attribute(), remote_attribute()],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: ClusterGroupModel,
    ) -> Outcome<ClusterGroupModel> {
        let name = plan.name.as_str().to_string();
        info!(name = %name, "Creating cluster group");

        let server = ctx.server(plan.remote.as_str(), "", "").await?;
        let req = ClusterGroupsPost {
            name: name.clone(),
            description: plan.description.value_or_default(),
            members: Vec::new(),
            config: merge_for_write(
                &ConfigMap::new(),
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
        };
        server
            .create_cluster_group(&req)
            .await
            .map_err(fail("create", "cluster group", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: ClusterGroupModel,
    ) -> Outcome<ClusterGroupModel> {
        let server = ctx.server(state.remote.as_str(), "", "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: ClusterGroupModel,
        _state: ClusterGroupModel,
    ) -> Outcome<ClusterGroupModel> {
        let name = plan.name.as_str().to_string();
        info!(name = %name, "Updating cluster group");

        let server = ctx.server(plan.remote.as_str(), "", "").await?;
        let (current, etag) = server
            .get_cluster_group(&name)
            .await
            .map_err(fail("retrieve", "cluster group", &name))?;

        let req = ClusterGroupPut {
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &current.config,
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
            members: current.members,
        };
        server
            .update_cluster_group(&name, &req, &etag)
            .await
            .map_err(fail("update", "cluster group", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: ClusterGroupModel,
    ) -> Result<(), Diagnostics> {
        let name = state.name.as_str();
        info!(name = %name, "Deleting cluster group");
        let server = ctx.server(state.remote.as_str(), "", "").await?;
        deleted(server.delete_cluster_group(name).await, "cluster group", name)
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<ClusterGroupModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["name"], &[])?;
        reject_project(Self::TYPE_NAME, &id)?;
        Ok(ClusterGroupModel {
            name: segment(id.field("name")),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
