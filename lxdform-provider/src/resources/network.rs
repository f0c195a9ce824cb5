//! Network reconciler.
//!
//! The daemon fills in addresses and NAT flags on bridges the user did not
//! configure. Those stay out of `config` unless declared, and show up in
//! `config_state`.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{ConfigMap, NetworkPut, NetworksPost};
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

pub const NETWORK_TYPES: &[&str] = &["bridge", "macvlan", "sriov", "ovn", "physical"];

pub fn computed_keys() -> ComputedKeys {
    ComputedKeys::new(&["ipv4.address", "ipv4.nat", "ipv6.address", "ipv6.nat"])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkModel {
    pub name: Value<String>,
    pub description: Value<String>,
    #[serde(rename = "type")]
    pub kind: Value<String>,
    pub config: Value<ConfigMap>,
    pub config_state: Value<ConfigMap>,
    pub managed: Value<bool>,
    pub target: Value<String>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

#[derive(Debug, Default)]
pub struct NetworkResource;

impl NetworkResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: NetworkModel,
    ) -> Outcome<NetworkModel> {
        let name = m.name.as_str().to_string();
        let Some((network, _)) = found(server.get_network(&name).await, "network", &name)? else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        let stored = strip_for_state(&network.config, &user, &computed_keys());

        m.description = Value::Known(network.description);
        m.kind = Value::Known(network.kind);
        m.managed = Value::Known(network.managed);
        m.config_state = Value::Known(config_state(&network.config, &user));
        m.config = config_value(&m.config, stored);
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for NetworkResource {
    type Model = NetworkModel;

    const TYPE_NAME: &'static str = "lxd_network";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a network.",
            vec![
                name_attribute(),
                description_attribute(),
                Attribute::optional("type", AttributeType::String)
                    .describe("Network type. Defaults to the daemon's choice.")
                    .or_computed()
                    .one_of(NETWORK_TYPES)
                    .requires_replace(),
                config_attribute(),
                config_state_attribute(),
                Attribute::computed("managed", AttributeType::Bool)
                    .describe("Whether the daemon manages the network."),
                target_attribute(),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(&self, ctx: &ResourceContext, plan: NetworkModel) -> Outcome<NetworkModel> {
        let name = plan.name.as_str().to_string();
        info!(name = %name, "Creating network");

        let server = ctx
            .server(plan.remote.as_str(), plan.project.as_str(), plan.target.as_str())
            .await?;

        let user = config_map(&plan.config);
        let req = NetworksPost {
            name: name.clone(),
            description: plan.description.value_or_default(),
            kind: plan.kind.value_or_default(),
            config: merge_for_write(&ConfigMap::new(), &user, &computed_keys()),
        };
        server.create_network(&req).await.map_err(fail("create", "network", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn read(&self, ctx: &ResourceContext, state: NetworkModel) -> Outcome<NetworkModel> {
        let server = ctx
            .server(state.remote.as_str(), state.project.as_str(), state.target.as_str())
            .await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: NetworkModel,
        _state: NetworkModel,
    ) -> Outcome<NetworkModel> {
        let name = plan.name.as_str().to_string();
        info!(name = %name, "Updating network");

        let server = ctx
            .server(plan.remote.as_str(), plan.project.as_str(), plan.target.as_str())
            .await?;

        let (current, etag) = server
            .get_network(&name)
            .await
            .map_err(fail("retrieve", "network", &name))?;

        let user = config_map(&plan.config);
        let config = merge_for_write(&current.config, &user, &computed_keys());
        debug!(name = %name, keys = config.len(), "Merged network config");

        let req = NetworkPut {
            description: plan.description.value_or_default(),
            config,
        };
        server
            .update_network(&name, &req, &etag)
            .await
            .map_err(fail("update", "network", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(&self, ctx: &ResourceContext, state: NetworkModel) -> Result<(), Diagnostics> {
        let name = state.name.as_str();
        info!(name = %name, "Deleting network");
        let server = ctx
            .server(state.remote.as_str(), state.project.as_str(), state.target.as_str())
            .await?;
        deleted(server.delete_network(name).await, "network", name)
    }

    async fn import(&self, _ctx: &ResourceContext, id: &str) -> Result<NetworkModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["name"], &[])?;
        Ok(NetworkModel {
            name: segment(id.field("name")),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }

    async fn modify_plan(
        &self,
        prior: Option<&NetworkModel>,
        plan: &mut NetworkModel,
    ) -> Result<(), Diagnostics> {
        plan.config_state = match prior.and_then(|p| p.config_state.as_known()) {
            Some(prior_state) if !plan.config.is_unknown() => Value::Known(planned_config_state(
                prior_state,
                &config_map(&plan.config),
                &computed_keys(),
            )),
            _ => Value::Unknown,
        };
        Ok(())
    }
}
