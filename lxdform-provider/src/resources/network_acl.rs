//! Network ACL reconciler.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{ConfigMap, NetworkAcl, NetworkAclPut, NetworkAclRule};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Outcome, Reconciler, ResourceContext, deleted, fail, found, parse_import, segment};
use crate::error::Diagnostics;
use crate::merge::{ComputedKeys, merge_for_write, strip_for_state};
use crate::schema::{
    Attribute, AttributeType, Schema, config_attribute, description_attribute, name_attribute,
    project_attribute, remote_attribute,
};
use crate::value::{Value, config_map, config_value, nullable, set_items, set_value};

/// One ingress or egress rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct AclRule {
    #[serde(deserialize_with = "nullable")]
    pub action: String,
    #[serde(deserialize_with = "nullable")]
    pub destination: String,
    #[serde(deserialize_with = "nullable")]
    pub destination_port: String,
    #[serde(deserialize_with = "nullable")]
    pub protocol: String,
    #[serde(deserialize_with = "nullable")]
    pub source: String,
    #[serde(deserialize_with = "nullable")]
    pub source_port: String,
    #[serde(deserialize_with = "nullable")]
    pub icmp_type: String,
    #[serde(deserialize_with = "nullable")]
    pub icmp_code: String,
    #[serde(deserialize_with = "nullable")]
    pub description: String,
    #[serde(deserialize_with = "nullable")]
    pub state: String,
}

impl From<AclRule> for NetworkAclRule {
    fn from(r: AclRule) -> Self {
        NetworkAclRule {
            action: r.action,
            source: r.source,
            destination: r.destination,
            protocol: r.protocol,
            source_port: r.source_port,
            destination_port: r.destination_port,
            icmp_type: r.icmp_type,
            icmp_code: r.icmp_code,
            description: r.description,
            state: r.state,
        }
    }
}

impl From<NetworkAclRule> for AclRule {
    fn from(r: NetworkAclRule) -> Self {
        AclRule {
            action: r.action,
            destination: r.destination,
            destination_port: r.destination_port,
            protocol: r.protocol,
            source: r.source,
            source_port: r.source_port,
            icmp_type: r.icmp_type,
            icmp_code: r.icmp_code,
            description: r.description,
            state: r.state,
        }
    }
}

fn rules_to_api(rules: &Value<Vec<AclRule>>) -> Vec<NetworkAclRule> {
    set_items(rules).into_iter().map(Into::into).collect()
}

fn rules_from_api(rules: Vec<NetworkAclRule>) -> Value<Vec<AclRule>> {
    set_value(rules.into_iter().map(Into::into).collect())
}

fn rule_attributes() -> Vec<Attribute> {
    let optional = |name: &'static str, description: &'static str| {
        Attribute::optional(name, AttributeType::String)
            .describe(description)
            .default_value("")
    };
    vec![
        Attribute::required("action", AttributeType::String)
            .describe("Action to take for matching traffic.")
            .one_of(&["allow", "allow-stateless", "drop", "reject"]),
        optional(
            "destination",
            "Comma separated list of destination subnets, addresses or selectors.",
        ),
        optional("destination_port", "Comma separated list of destination ports or ranges."),
        optional("protocol", "Protocol to match (icmp4, icmp6, tcp, udp)."),
        optional("source", "Comma separated list of source subnets, addresses or selectors."),
        optional("source_port", "Comma separated list of source ports or ranges."),
        optional("icmp_type", "ICMP message type."),
        optional("icmp_code", "ICMP message code."),
        optional("description", "Description of the rule."),
        Attribute::optional("state", AttributeType::String)
            .describe("State of the rule.")
            .one_of(&["enabled", "disabled", "logged"])
            .default_value("enabled"),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkAclModel {
    pub name: Value<String>,
    pub description: Value<String>,
    pub egress: Value<Vec<AclRule>>,
    pub ingress: Value<Vec<AclRule>>,
    pub config: Value<ConfigMap>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

#[derive(Debug, Default)]
pub struct NetworkAclResource;

impl NetworkAclResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: NetworkAclModel,
    ) -> Outcome<NetworkAclModel> {
        let name = m.name.as_str().to_string();
        let Some((acl, _)) =
            found(server.get_network_acl(&name).await, "network ACL", &name)?
        else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        m.description = Value::Known(acl.description);
        m.egress = rules_from_api(acl.egress);
        m.ingress = rules_from_api(acl.ingress);
        m.config = config_value(
            &m.config,
            strip_for_state(&acl.config, &user, &ComputedKeys::volatile()),
        );
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for NetworkAclResource {
    type Model = NetworkAclModel;

    const TYPE_NAME: &'static str = "lxd_network_acl";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a network ACL.",
            vec![
                name_attribute(),
                description_attribute(),
                Attribute::optional("egress", AttributeType::ObjectSet)
                    .describe("Rules for outgoing traffic.")
                    .nested(rule_attributes()),
                Attribute::optional("ingress", AttributeType::ObjectSet)
                    .describe("Rules for incoming traffic.")
                    .nested(rule_attributes()),
                config_attribute(),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: NetworkAclModel,
    ) -> Outcome<NetworkAclModel> {
        let name = plan.name.as_str().to_string();
        info!(name = %name, "Creating network ACL");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let req = NetworkAcl {
            name: name.clone(),
            description: plan.description.value_or_default(),
            egress: rules_to_api(&plan.egress),
            ingress: rules_to_api(&plan.ingress),
            config: merge_for_write(
                &ConfigMap::new(),
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
            used_by: Vec::new(),
        };
        server
            .create_network_acl(&req)
            .await
            .map_err(fail("create", "network ACL", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: NetworkAclModel,
    ) -> Outcome<NetworkAclModel> {
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: NetworkAclModel,
        _state: NetworkAclModel,
    ) -> Outcome<NetworkAclModel> {
        let name = plan.name.as_str().to_string();
        info!(name = %name, "Updating network ACL");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let (current, etag) = server
            .get_network_acl(&name)
            .await
            .map_err(fail("retrieve", "network ACL", &name))?;

        let req = NetworkAclPut {
            description: plan.description.value_or_default(),
            egress: rules_to_api(&plan.egress),
            ingress: rules_to_api(&plan.ingress),
            config: merge_for_write(
                &current.config,
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
        };
        server
            .update_network_acl(&name, &req, &etag)
            .await
            .map_err(fail("update", "network ACL", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: NetworkAclModel,
    ) -> Result<(), Diagnostics> {
        let name = state.name.as_str();
        info!(name = %name, "Deleting network ACL");
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        deleted(server.delete_network_acl(name).await, "network ACL", name)
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<NetworkAclModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["name"], &[])?;
        Ok(NetworkAclModel {
            name: segment(id.field("name")),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
