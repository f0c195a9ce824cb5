//! Network zone record reconciler.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{
    ConfigMap, NetworkZoneRecord, NetworkZoneRecordEntry, NetworkZoneRecordPut,
};
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

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct Entry {
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub kind: String,
    #[serde(deserialize_with = "nullable")]
    pub value: String,
    #[serde(deserialize_with = "nullable")]
    pub ttl: u64,
}

fn entries_to_api(entries: &Value<Vec<Entry>>) -> Vec<NetworkZoneRecordEntry> {
    set_items(entries)
        .into_iter()
        .map(|e| NetworkZoneRecordEntry {
            kind: e.kind,
            value: e.value,
            ttl: e.ttl,
        })
        .collect()
}

fn entries_from_api(entries: Vec<NetworkZoneRecordEntry>) -> Value<Vec<Entry>> {
    set_value(
        entries
            .into_iter()
            .map(|e| Entry {
                kind: e.kind,
                value: e.value,
                ttl: e.ttl,
            })
            .collect(),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkZoneRecordModel {
    pub zone: Value<String>,
    pub name: Value<String>,
    pub description: Value<String>,
    pub entry: Value<Vec<Entry>>,
    pub config: Value<ConfigMap>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

impl NetworkZoneRecordModel {
    fn id(&self) -> String {
        format!("{}/{}", self.zone.as_str(), self.name.as_str())
    }
}

#[derive(Debug, Default)]
pub struct NetworkZoneRecordResource;

impl NetworkZoneRecordResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: NetworkZoneRecordModel,
    ) -> Outcome<NetworkZoneRecordModel> {
        let result = server.get_network_zone_record(m.zone.as_str(), m.name.as_str()).await;
        let Some((record, _)) = found(result, "network zone record", &m.id())? else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        m.description = Value::Known(record.description);
        m.entry = entries_from_api(record.entries);
        m.config = config_value(
            &m.config,
            strip_for_state(&record.config, &user, &ComputedKeys::volatile()),
        );
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for NetworkZoneRecordResource {
    type Model = NetworkZoneRecordModel;

    const TYPE_NAME: &'static str = "lxd_network_zone_record";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a record in a DNS network zone.",
            vec![
                Attribute::required("zone", AttributeType::String)
                    .describe("Zone the record belongs to.")
                    .min_length(1)
                    .requires_replace(),
                name_attribute(),
                description_attribute(),
                Attribute::optional("entry", AttributeType::ObjectSet)
                    .describe("DNS entries of the record.")
                    .nested(vec![
                        Attribute::required("type", AttributeType::String)
                            .describe("DNS record type, e.g. A, AAAA, CNAME or TXT."),
                        Attribute::required("value", AttributeType::String)
                            .describe("Value of the entry."),
                        Attribute::optional("ttl", AttributeType::Int)
                            .describe("Time to live of the entry in seconds.")
                            .default_value(0),
                    ]),
                config_attribute(),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: NetworkZoneRecordModel,
    ) -> Outcome<NetworkZoneRecordModel> {
        let id = plan.id();
        info!(record = %id, "Creating network zone record");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let req = NetworkZoneRecord {
            name: plan.name.as_str().to_string(),
            description: plan.description.value_or_default(),
            entries: entries_to_api(&plan.entry),
            config: merge_for_write(
                &ConfigMap::new(),
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
        };
        server
            .create_network_zone_record(plan.zone.as_str(), &req)
            .await
            .map_err(fail("create", "network zone record", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: NetworkZoneRecordModel,
    ) -> Outcome<NetworkZoneRecordModel> {
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: NetworkZoneRecordModel,
        _state: NetworkZoneRecordModel,
    ) -> Outcome<NetworkZoneRecordModel> {
        let id = plan.id();
        info!(record = %id, "Updating network zone record");

        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        let zone = plan.zone.as_str();
        let name = plan.name.as_str();

        let (current, etag) = server
            .get_network_zone_record(zone, name)
            .await
            .map_err(fail("retrieve", "network zone record", &id))?;

        let req = NetworkZoneRecordPut {
            description: plan.description.value_or_default(),
            entries: entries_to_api(&plan.entry),
            config: merge_for_write(
                &current.config,
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
        };
        server
            .update_network_zone_record(zone, name, &req, &etag)
            .await
            .map_err(fail("update", "network zone record", &id))?;

        self.sync_state(&server, plan).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: NetworkZoneRecordModel,
    ) -> Result<(), Diagnostics> {
        let id = state.id();
        info!(record = %id, "Deleting network zone record");
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        deleted(
            server
                .delete_network_zone_record(state.zone.as_str(), state.name.as_str())
                .await,
            "network zone record",
            &id,
        )
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<NetworkZoneRecordModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["zone", "name"], &[])?;
        Ok(NetworkZoneRecordModel {
            zone: segment(id.field("zone")),
            name: segment(id.field("name")),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
