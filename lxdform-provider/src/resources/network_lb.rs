//! Network load balancer reconciler.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{
    ConfigMap, NetworkLoadBalancer, NetworkLoadBalancerBackend, NetworkLoadBalancerPort,
    NetworkLoadBalancerPut,
};
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
pub struct Backend {
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(deserialize_with = "nullable")]
    pub description: String,
    #[serde(deserialize_with = "nullable")]
    pub target_address: String,
    #[serde(deserialize_with = "nullable")]
    pub target_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct LbPort {
    #[serde(deserialize_with = "nullable")]
    pub description: String,
    #[serde(deserialize_with = "nullable")]
    pub protocol: String,
    #[serde(deserialize_with = "nullable")]
    pub listen_port: String,
    #[serde(deserialize_with = "nullable")]
    pub target_backend: Vec<String>,
}

fn backends_to_api(backends: &Value<Vec<Backend>>) -> Vec<NetworkLoadBalancerBackend> {
    set_items(backends)
        .into_iter()
        .map(|b| NetworkLoadBalancerBackend {
            name: b.name,
            description: b.description,
            target_port: b.target_port,
            target_address: b.target_address,
        })
        .collect()
}

fn backends_from_api(backends: Vec<NetworkLoadBalancerBackend>) -> Value<Vec<Backend>> {
    set_value(
        backends
            .into_iter()
            .map(|b| Backend {
                name: b.name,
                description: b.description,
                target_address: b.target_address,
                target_port: b.target_port,
            })
            .collect(),
    )
}

fn ports_to_api(ports: &Value<Vec<LbPort>>) -> Vec<NetworkLoadBalancerPort> {
    set_items(ports)
        .into_iter()
        .map(|p| NetworkLoadBalancerPort {
            description: p.description,
            protocol: p.protocol,
            listen_port: p.listen_port,
            target_backend: p.target_backend,
        })
        .collect()
}

fn ports_from_api(ports: Vec<NetworkLoadBalancerPort>) -> Value<Vec<LbPort>> {
    set_value(
        ports
            .into_iter()
            .map(|p| LbPort {
                description: p.description,
                protocol: p.protocol,
                listen_port: p.listen_port,
                target_backend: p.target_backend,
            })
            .collect(),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkLbModel {
    pub network: Value<String>,
    pub listen_address: Value<String>,
    pub description: Value<String>,
    pub config: Value<ConfigMap>,
    pub backend: Value<Vec<Backend>>,
    pub port: Value<Vec<LbPort>>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

impl NetworkLbModel {
    /// Identifier used in diagnostics only.
    fn id(&self) -> String {
        format!("{}/{}", self.network.as_str(), self.listen_address.as_str())
    }
}

#[derive(Debug, Default)]
pub struct NetworkLbResource;

impl NetworkLbResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: NetworkLbModel,
    ) -> Outcome<NetworkLbModel> {
        let result = server
            .get_network_load_balancer(m.network.as_str(), m.listen_address.as_str())
            .await;
        let Some((lb, _)) = found(result, "network load balancer", &m.id())? else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        m.description = Value::Known(lb.description);
        m.backend = backends_from_api(lb.backends);
        m.port = ports_from_api(lb.ports);
        m.config = config_value(
            &m.config,
            strip_for_state(&lb.config, &user, &ComputedKeys::volatile()),
        );
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for NetworkLbResource {
    type Model = NetworkLbModel;

    const TYPE_NAME: &'static str = "lxd_network_lb";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a network load balancer.",
            vec![
                Attribute::required("network", AttributeType::String)
                    .describe("Network the load balancer belongs to.")
                    .min_length(1)
                    .requires_replace(),
                Attribute::required("listen_address", AttributeType::String)
                    .describe("IP address to listen on.")
                    .min_length(1)
                    .requires_replace(),
                description_attribute(),
                config_attribute(),
                Attribute::optional("backend", AttributeType::ObjectSet)
                    .describe("Backends traffic is balanced over.")
                    .nested(vec![
                        Attribute::required("name", AttributeType::String)
                            .describe("Name of the backend.")
                            .min_length(1),
                        Attribute::optional("description", AttributeType::String)
                            .describe("Description of the backend.")
                            .default_value(""),
                        Attribute::required("target_address", AttributeType::String)
                            .describe("Target IP address."),
                        Attribute::optional("target_port", AttributeType::String)
                            .describe("Target port or range. Defaults to the listen port.")
                            .default_value(""),
                    ]),
                Attribute::optional("port", AttributeType::ObjectSet)
                    .describe("Listen ports and the backends they forward to.")
                    .nested(vec![
                        Attribute::optional("description", AttributeType::String)
                            .describe("Description of the port.")
                            .default_value(""),
                        Attribute::optional("protocol", AttributeType::String)
                            .describe("Protocol of the port.")
                            .one_of(&["tcp", "udp"])
                            .default_value("tcp"),
                        Attribute::required("listen_port", AttributeType::String)
                            .describe("Listen port or range."),
                        Attribute::required("target_backend", AttributeType::StringList)
                            .describe("Backends to forward to."),
                    ]),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(&self, ctx: &ResourceContext, plan: NetworkLbModel) -> Outcome<NetworkLbModel> {
        let id = plan.id();
        info!(load_balancer = %id, "Creating network load balancer");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let req = NetworkLoadBalancer {
            listen_address: plan.listen_address.as_str().to_string(),
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &ConfigMap::new(),
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
            backends: backends_to_api(&plan.backend),
            ports: ports_to_api(&plan.port),
            location: String::new(),
        };
        server
            .create_network_load_balancer(plan.network.as_str(), &req)
            .await
            .map_err(fail("create", "network load balancer", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn read(&self, ctx: &ResourceContext, state: NetworkLbModel) -> Outcome<NetworkLbModel> {
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: NetworkLbModel,
        _state: NetworkLbModel,
    ) -> Outcome<NetworkLbModel> {
        let id = plan.id();
        info!(load_balancer = %id, "Updating network load balancer");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let network = plan.network.as_str();
        let listen_address = plan.listen_address.as_str();

        let (current, etag) = server
            .get_network_load_balancer(network, listen_address)
            .await
            .map_err(fail("retrieve", "network load balancer", &id))?;

        let req = NetworkLoadBalancerPut {
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &current.config,
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
            backends: backends_to_api(&plan.backend),
            ports: ports_to_api(&plan.port),
        };
        server
            .update_network_load_balancer(network, listen_address, &req, &etag)
            .await
            .map_err(fail("update", "network load balancer", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: NetworkLbModel,
    ) -> Result<(), Diagnostics> {
        let id = state.id();
        info!(load_balancer = %id, "Deleting network load balancer");
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        deleted(
            server
                .delete_network_load_balancer(state.network.as_str(), state.listen_address.as_str())
                .await,
            "network load balancer",
            &id,
        )
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<NetworkLbModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["network", "listen_address"], &[])?;
        Ok(NetworkLbModel {
            network: segment(id.field("network")),
            listen_address: segment(id.field("listen_address")),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
