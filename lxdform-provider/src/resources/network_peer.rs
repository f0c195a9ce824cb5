//! Network peer reconciler.
//!
//! Peers exist on OVN networks only. Right after creation the peer may not
//! be visible in the OVN northbound database yet, so delete retries a few
//! times before giving up.

use std::time::Duration;

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{ConfigMap, NetworkPeerPut, NetworkPeersPost};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Outcome, Reconciler, ResourceContext, fail, found, parse_import, segment};
use crate::error::{Diagnostics, failed};
use crate::merge::{ComputedKeys, merge_for_write, strip_for_state};
use crate::schema::{
    Attribute, AttributeType, Schema, config_attribute, description_attribute, name_attribute,
    project_attribute, remote_attribute,
};
use crate::value::{Value, config_map, config_value};

pub const DELETE_ATTEMPTS: usize = 3;
pub const DELETE_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPeerModel {
    pub network: Value<String>,
    pub name: Value<String>,
    pub description: Value<String>,
    pub target_project: Value<String>,
    pub target_network: Value<String>,
    pub config: Value<ConfigMap>,
    pub status: Value<String>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

impl NetworkPeerModel {
    fn id(&self) -> String {
        format!("{}/{}", self.network.as_str(), self.name.as_str())
    }
}

#[derive(Debug, Default)]
pub struct NetworkPeerResource;

impl NetworkPeerResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: NetworkPeerModel,
    ) -> Outcome<NetworkPeerModel> {
        let result = server.get_network_peer(m.network.as_str(), m.name.as_str()).await;
        let Some((peer, _)) = found(result, "network peer", &m.id())? else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        m.description = Value::Known(peer.description);
        m.target_project = Value::Known(peer.target_project);
        m.target_network = Value::Known(peer.target_network);
        m.status = Value::Known(peer.status);
        m.config = config_value(
            &m.config,
            strip_for_state(&peer.config, &user, &ComputedKeys::volatile()),
        );
        Ok(Some(m))
    }
}

/// Deletes a peer, retrying while the daemon still refuses.
pub async fn delete_with_retry(
    server: &InstanceServer,
    network: &str,
    name: &str,
) -> Result<(), Diagnostics> {
    let id = format!("{}/{}", network, name);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match server.delete_network_peer(network, name).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(peer = %id, "Network peer already deleted");
                return Ok(());
            }
            Err(e) if attempt < DELETE_ATTEMPTS => {
                warn!(peer = %id, attempt, error = %e, "Retrying network peer removal");
                tokio::time::sleep(DELETE_RETRY_DELAY).await;
            }
            Err(e) => return Err(failed("remove", "network peer", &id, e)),
        }
    }
}

#[async_trait]
impl Reconciler for NetworkPeerResource {
    type Model = NetworkPeerModel;

    const TYPE_NAME: &'static str = "lxd_network_peer";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a peering between two OVN networks.",
            vec![
                Attribute::required("network", AttributeType::String)
                    .describe("Local network of the peering.")
                    .min_length(1)
                    .requires_replace(),
                name_attribute(),
                description_attribute(),
                Attribute::optional("target_project", AttributeType::String)
                    .describe("Project of the target network.")
                    .default_value("default")
                    .requires_replace(),
                Attribute::required("target_network", AttributeType::String)
                    .describe("Target network of the peering.")
                    .min_length(1)
                    .requires_replace(),
                config_attribute(),
                Attribute::computed("status", AttributeType::String)
                    .describe("Peering status, Pending until the target side exists."),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: NetworkPeerModel,
    ) -> Outcome<NetworkPeerModel> {
        let id = plan.id();
        info!(peer = %id, "Creating network peer");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let req = NetworkPeersPost {
            name: plan.name.as_str().to_string(),
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &ConfigMap::new(),
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
            target_project: plan.target_project.value_or_default(),
            target_network: plan.target_network.value_or_default(),
        };
        server
            .create_network_peer(plan.network.as_str(), &req)
            .await
            .map_err(fail("create", "network peer", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: NetworkPeerModel,
    ) -> Outcome<NetworkPeerModel> {
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: NetworkPeerModel,
        _state: NetworkPeerModel,
    ) -> Outcome<NetworkPeerModel> {
        let id = plan.id();
        info!(peer = %id, "Updating network peer");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let network = plan.network.as_str();
        let name = plan.name.as_str();

        let (current, etag) = server
            .get_network_peer(network, name)
            .await
            .map_err(fail("retrieve", "network peer", &id))?;

        let req = NetworkPeerPut {
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &current.config,
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
        };
        server
            .update_network_peer(network, name, &req, &etag)
            .await
            .map_err(fail("update", "network peer", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: NetworkPeerModel,
    ) -> Result<(), Diagnostics> {
        info!(peer = %state.id(), "Deleting network peer");
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        delete_with_retry(&server, state.network.as_str(), state.name.as_str()).await
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<NetworkPeerModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["network", "name"], &[])?;
        Ok(NetworkPeerModel {
            network: segment(id.field("network")),
            name: segment(id.field("name")),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
