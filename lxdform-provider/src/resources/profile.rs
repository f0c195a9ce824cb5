//! Profile reconciler.
//!
//! The `default` profile always exists: creating it adopts and overwrites
//! the daemon's copy, deleting it resets it to empty.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{ConfigMap, DeviceMap, Profile, ProfilePut};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Outcome, Reconciler, ResourceContext, deleted, fail, found, parse_import, segment};
use crate::error::Diagnostics;
use crate::merge::{ComputedKeys, merge_for_write, strip_for_state};
use crate::schema::{
    Attribute, AttributeType, Schema, config_attribute, description_attribute, name_attribute,
    project_attribute, remote_attribute,
};
use crate::value::{
    Device, Value, config_map, config_value, devices_from_api, devices_to_api, set_items,
};

pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileModel {
    pub name: Value<String>,
    pub description: Value<String>,
    pub config: Value<ConfigMap>,
    pub device: Value<Vec<Device>>,
    pub project: Value<String>,
    pub remote: Value<String>,
}

#[derive(Debug, Default)]
pub struct ProfileResource;

impl ProfileResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: ProfileModel,
    ) -> Outcome<ProfileModel> {
        let name = m.name.as_str().to_string();
        let Some((profile, _)) = found(server.get_profile(&name).await, "profile", &name)? else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        m.description = Value::Known(profile.description);
        m.device = devices_from_api(profile.devices, &set_items(&m.device));
        m.config = config_value(
            &m.config,
            strip_for_state(&profile.config, &user, &ComputedKeys::volatile()),
        );
        Ok(Some(m))
    }

    /// Writes the planned profile over the current one.
    async fn put(&self, server: &InstanceServer, plan: &ProfileModel) -> Result<(), Diagnostics> {
        let name = plan.name.as_str();
        let (current, etag) = server
            .get_profile(name)
            .await
            .map_err(fail("retrieve", "profile", name))?;

        let req = ProfilePut {
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &current.config,
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
            devices: devices_to_api(&set_items(&plan.device)),
        };
        server
            .update_profile(name, &req, &etag)
            .await
            .map_err(fail("update", "profile", name))
    }
}

#[async_trait]
impl Reconciler for ProfileResource {
    type Model = ProfileModel;

    const TYPE_NAME: &'static str = "lxd_profile";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a profile.",
            vec![
                name_attribute(),
                description_attribute(),
                config_attribute(),
                Attribute::optional("device", AttributeType::ObjectSet)
                    .describe("Devices attached by the profile.")
                    .nested(vec![
                        Attribute::required("name", AttributeType::String)
                            .describe("Name of the device.")
                            .min_length(1),
                        Attribute::required("type", AttributeType::String)
                            .describe("Type of the device.")
                            .one_of(&[
                                "none",
                                "disk",
                                "nic",
                                "unix-char",
                                "unix-block",
                                "usb",
                                "gpu",
                                "infiniband",
                                "proxy",
                                "unix-hotplug",
                                "tpm",
                                "pci",
                            ]),
                        Attribute::optional("properties", AttributeType::StringMap)
                            .describe("Device properties.")
                            .default_value(serde_json::json!({})),
                    ]),
                project_attribute(),
                remote_attribute(),
            ],
        )
    }

    async fn create(&self, ctx: &ResourceContext, plan: ProfileModel) -> Outcome<ProfileModel> {
        let name = plan.name.as_str().to_string();
        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;

        if name == DEFAULT_PROFILE {
            info!(name = %name, "Adopting default profile");
            self.put(&server, &plan).await?;
            return self.sync_state(&server, plan).await;
        }

        info!(name = %name, "Creating profile");
        let req = Profile {
            name: name.clone(),
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &ConfigMap::new(),
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
            devices: devices_to_api(&set_items(&plan.device)),
            used_by: Vec::new(),
        };
        server.create_profile(&req).await.map_err(fail("create", "profile", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn read(&self, ctx: &ResourceContext, state: ProfileModel) -> Outcome<ProfileModel> {
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: ProfileModel,
        _state: ProfileModel,
    ) -> Outcome<ProfileModel> {
        info!(name = %plan.name.as_str(), "Updating profile");
        let server = ctx.server(plan.remote.as_str(), plan.project.as_str(), "").await?;
        self.put(&server, &plan).await?;
        self.sync_state(&server, plan).await
    }

    async fn delete(&self, ctx: &ResourceContext, state: ProfileModel) -> Result<(), Diagnostics> {
        let name = state.name.as_str();
        let server = ctx.server(state.remote.as_str(), state.project.as_str(), "").await?;

        if name != DEFAULT_PROFILE {
            info!(name = %name, "Deleting profile");
            return deleted(server.delete_profile(name).await, "profile", name);
        }

        info!(name = %name, "Resetting default profile");
        let Some((_, etag)) = found(server.get_profile(name).await, "profile", name)? else {
            return Ok(());
        };
        let req = ProfilePut {
            description: String::new(),
            config: ConfigMap::new(),
            devices: DeviceMap::new(),
        };
        server
            .update_profile(name, &req, &etag)
            .await
            .map_err(fail("reset", "profile", name))
    }

    async fn import(&self, _ctx: &ResourceContext, id: &str) -> Result<ProfileModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["name"], &[])?;
        Ok(ProfileModel {
            name: segment(id.field("name")),
            project: segment(&id.project),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
