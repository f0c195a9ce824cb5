//! Project reconciler.
//!
//! Like the default profile, the `default` project cannot be removed: create
//! adopts it and delete resets its description and config.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{ConfigMap, Project, ProjectPut};
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

pub const DEFAULT_PROJECT: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectModel {
    pub name: Value<String>,
    pub description: Value<String>,
    pub config: Value<ConfigMap>,
    pub remote: Value<String>,
}

#[derive(Debug, Default)]
pub struct ProjectResource;

impl ProjectResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: ProjectModel,
    ) -> Outcome<ProjectModel> {
        let name = m.name.as_str().to_string();
        let Some((project, _)) = found(server.get_project(&name).await, "project", &name)? else {
            return Ok(None);
        };

        let user = config_map(&m.config);
        m.description = Value::Known(project.description);
        m.config = config_value(
            &m.config,
            strip_for_state(&project.config, &user, &ComputedKeys::volatile()),
        );
        Ok(Some(m))
    }

    async fn put(&self, server: &InstanceServer, plan: &ProjectModel) -> Result<(), Diagnostics> {
        let name = plan.name.as_str();
        let (current, etag) = server
            .get_project(name)
            .await
            .map_err(fail("retrieve", "project", name))?;

        let req = ProjectPut {
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &current.config,
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
        };
        server
            .update_project(name, &req, &etag)
            .await
            .map_err(fail("update", "project", name))
    }
}

#[async_trait]
impl Reconciler for ProjectResource {
    type Model = ProjectModel;

    const TYPE_NAME: &'static str = "lxd_project";

    fn schema(&self) -> Schema {
        Schema::new(
            "Manages a project.",
            vec![name_attribute(), description_attribute(), config_attribute(), remote_attribute()],
        )
    }

    async fn create(&self, ctx: &ResourceContext, plan: ProjectModel) -> Outcome<ProjectModel> {
        let name = plan.name.as_str().to_string();
        let server = ctx.server(plan.remote.as_str(), "", "").await?;

        if name == DEFAULT_PROJECT {
            info!(name = %name, "Adopting default project");
            self.put(&server, &plan).await?;
            return self.sync_state(&server, plan).await;
        }

        info!(name = %name, "Creating project");
        let req = Project {
            name: name.clone(),
            description: plan.description.value_or_default(),
            config: merge_for_write(
                &ConfigMap::new(),
                &config_map(&plan.config),
                &ComputedKeys::volatile(),
            ),
            used_by: Vec::new(),
        };
        server.create_project(&req).await.map_err(fail("create", "project", &name))?;

        self.sync_state(&server, plan).await
    }

    async fn read(&self, ctx: &ResourceContext, state: ProjectModel) -> Outcome<ProjectModel> {
        let server = ctx.server(state.remote.as_str(), "", "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: ProjectModel,
        _state: ProjectModel,
    ) -> Outcome<ProjectModel> {
        info!(name = %plan.name.as_str(), "Updating project");
        let server = ctx.server(plan.remote.as_str(), "", "").await?;
        self.put(&server, &plan).await?;
        self.sync_state(&server, plan).await
    }

    async fn delete(&self, ctx: &ResourceContext, state: ProjectModel) -> Result<(), Diagnostics> {
        let name = state.name.as_str();
        let server = ctx.server(state.remote.as_str(), "", "").await?;

        if name != DEFAULT_PROJECT {
            info!(name = %name, "Deleting project");
            return deleted(server.delete_project(name).await, "project", name);
        }

        info!(name = %name, "Resetting default project");
        let Some((_, etag)) = found(server.get_project(name).await, "project", name)? else {
            return Ok(());
        };
        let req = ProjectPut {
            description: String::new(),
            config: ConfigMap::new(),
        };
        server
            .update_project(name, &req, &etag)
            .await
            .map_err(fail("reset", "project", name))
    }

    async fn import(&self, _ctx: &ResourceContext, id: &str) -> Result<ProjectModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["name"], &[])?;
        reject_project(Self::TYPE_NAME, &id)?;
        Ok(ProjectModel {
            name: segment(id.field("name")),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
