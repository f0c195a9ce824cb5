//! Network forward reconciler.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{ConfigMap, NetworkForward, NetworkForwardPort, NetworkForwardPut};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Outcome, Reconciler, ResourceContext, deleted, fail, found, parse_import, segment};
use crate::error::Diagnostics;
use crate::merge::{ComputedKeys, merge_for_write, strip_for_state};
use crate::schema::{
    Attribute, AttributeType, Schema, config_attribute, description_attribute, project_attribute,
    remote_attribute,
};
use crate::value::{Value, config_map, config_value, nullable, set_items, set_value};

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardPort {
    #[serde(deserialize_with = "nullable")]
    pub description: String,
    #[serde(deserialize_with = "nullable")]
    pub protocol: String,
    #[serde(deserialize_with = "nullable")]
    pub listen_port: String,
    #[serde(deserialize_with = "nullable")]
    pub target_port: String,
    #[serde(deserialize_with = "nullable")]
    pub target_address: String,
}

fn ports_to_api(ports: &Value<Vec<ForwardPort>>) -> Vec<NetworkForwardPort> {
    set_items(ports)
        .into_iter()
        .map(|p| NetworkForwardPort {
            description: p.description,
            protocol: p.protocol,
            listen_port: p.listen_port,
            target_port: p.target_port,
            target_address: p.target_address,
        })
        .collect()
}

fn ports_from_api(ports: Vec<NetworkForwardPort>) -> Value<Vec<ForwardPort>> {
    set_value(
        ports
            .into_iter()
            .map(|p| ForwardPort {
                description: p.description,
                protocol: p.protocol,
                listen_port: p.listen_port,
                target_port: p.target_port,
                target_address: p.target_address,
            })
            .collect(),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkForwardModel {
    pub network: Value<String>,
    pub listen_address: Value<String>,
    pub description: Value<String>,
    pub config: Value<ConfigMap>,
    pub ports: Value<Vec<ForwardPort>>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

impl NetworkForwardModel {
    fn id(&self) -> String {
        format!("{}/{}", self.network.as_str(), self.listen_address.as_str())
    }
}

#[derive(Debug, Default)]
pub struct NetworkForwardResource;

impl NetworkForwardResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: NetworkForwardModel,
    ) -> Outcome<NetworkForwardModel> {
        let result = server
            .get_network_forward(m.network.as_str(), m.listen_address.as_str())
            .await;
        let Some((forward, _)) = found(result, "network forward", &m.id())? else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        m.description = Value::Known(forward.description);
        m.ports = ports_from_api(forward.ports);
        m.config = config_value(
            &m.config,
            strip_for_state(&forward.config, &user, &ComputedKeys::volatile()),
        );
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for NetworkForwardResource {
    type Model = NetworkForwardModel;

    const TYPE_NAME: &'static str = "lxd_network_forward";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a network forward.",
            vec![
                Attribute::required("network", AttributeType::String)
                    .describe("Network the forward belongs to.")
                    .min_length(1)
                    .requires_replace(),
                Attribute::required("listen_address", AttributeType::String)
                    .describe("IP address to listen on.")
                    .min_length(1)
                    .requires_replace(),
                description_attribute(),
                config_attribute(),
                Attribute::optional("ports", AttributeType::ObjectSet)
                    .describe("Port specific forwarding rules.")
                    .nested(vec![
                        Attribute::optional("description", AttributeType::String)
                            .describe("Description of the port.")
                            .default_value(""),
                        Attribute::required("protocol", AttributeType::String)
                            .describe("Protocol of the port.")
                            .one_of(&["tcp", "udp"]),
                        Attribute::required("listen_port", AttributeType::String)
                            .describe("Listen port or range."),
                        Attribute::optional("target_port", AttributeType::String)
                            .describe("Target port or range. Defaults to the listen port.")
                            .default_value(""),
                        Attribute::required("target_address", AttributeType::String)
                            .describe("Target IP address."),
                    ]),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: NetworkForwardModel,
    ) -> Outcome<NetworkForwardModel> {
        let id = plan.id();
        info!(forward = %id, "Creating network forward");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let req = NetworkForward {
            listen_address: plan.listen_address.as_str().to_string(),
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &ConfigMap::new(),
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
            ports: ports_to_api(&plan.ports),
            location: String::new(),
        };
        server
            .create_network_forward(plan.network.as_str(), &req)
            .await
            .map_err(fail("create", "network forward", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: NetworkForwardModel,
    ) -> Outcome<NetworkForwardModel> {
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: NetworkForwardModel,
        _state: NetworkForwardModel,
    ) -> Outcome<NetworkForwardModel> {
        let id = plan.id();
        info!(forward = %id, "Updating network forward");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let network = plan.network.as_str();
        let listen_address = plan.listen_address.as_str();

        let (current, etag) = server
            .get_network_forward(network, listen_address)
            .await
            .map_err(fail("retrieve", "network forward", &id))?;

        let req = NetworkForwardPut {
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &current.config,
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
            ports: ports_to_api(&plan.ports),
        };
        server
            .update_network_forward(network, listen_address, &req, &etag)
            .await
            .map_err(fail("update", "network forward", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: NetworkForwardModel,
    ) -> Result<(), Diagnostics> {
        let id = state.id();
        info!(forward = %id, "Deleting network forward");
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        deleted(
            server
                .delete_network_forward(state.network.as_str(), state.listen_address.as_str())
                .await,
            "network forward",
            &id,
        )
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<NetworkForwardModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["network", "listen_address"], &[])?;
        Ok(NetworkForwardModel {
            network: segment(id.field("network")),
            listen_address: segment(id.field("listen_address")),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
