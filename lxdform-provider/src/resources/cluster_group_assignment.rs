//! Cluster group assignment reconciler.
//!
//! An assignment is one entry of a cluster group's member list. Every
//! attribute forces replacement, so update never talks to the daemon.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    Outcome, Reconciler, ResourceContext, fail, found, parse_import, reject_project, segment,
};
use crate::error::Diagnostics;
use crate::schema::{Attribute, AttributeType, Schema, remote_attribute};
use crate::value::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterGroupAssignmentModel {
    pub id: Value<String>,
    pub cluster_group: Value<String>,
    pub member: Value<String>,
    pub remote: Value<String>,
}

impl ClusterGroupAssignmentModel {
    fn assignment_id(&self) -> String {
        format!("{}/{}", self.cluster_group.as_str(), self.member.as_str())
    }
}

#[derive(Debug, Default)]
pub struct ClusterGroupAssignmentResource;

impl ClusterGroupAssignmentResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: ClusterGroupAssignmentModel,
    ) -> Outcome<ClusterGroupAssignmentModel> {
        let group_name = m.cluster_group.as_str().to_string();
        let Some((group, _)) =
            found(server.get_cluster_group(&group_name).await, "cluster group", &group_name)?
        else {
            return Ok(None);
        };
        if !group.members.iter().any(|member| member == m.member.as_str()) {
            return Ok(None);
        }

        m.id = Value::Known(m.assignment_id());
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for ClusterGroupAssignmentResource {
    type Model = ClusterGroupAssignmentModel;

    const TYPE_NAME: &'static str = "lxd_cluster_group_assignment";

    fn schema(&self) -> Schema {
        Schema::new(
            "Assigns a cluster member to a cluster group.",
            vec![
                Attribute::computed("id", AttributeType::String)
                    .describe("Assignment identifier, <cluster_group>/<member>."),
                Attribute::required("cluster_group", AttributeType::String)
                    .describe("Cluster group to add the member to.")
                    .min_length(1)
                    .requires_replace(),
                Attribute::required("member", AttributeType::String)
                    .describe("Name of the cluster member.")
                    .min_length(1)
                    .requires_replace(),
                remote_attribute(),
            ],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: ClusterGroupAssignmentModel,
    ) -> Outcome<ClusterGroupAssignmentModel> {
        let id = plan.assignment_id();
        let group_name = plan.cluster_group.as_str().to_string();
        let member = plan.member.as_str().to_string();
        info!(assignment = %id, "Creating cluster group assignment");

        let server = ctx.server(plan.remote.as_str(), "", "").await?;

        let members = server
            .get_cluster_member_names()
            .await
            .map_err(fail("retrieve", "cluster members", &member))?;
        if !members.contains(&member) {
            return Err(Diagnostics::error(
                format!("Member with name {:?} is not part of the cluster", member),
                "",
            ));
        }

        let (group, etag) = server
            .get_cluster_group(&group_name)
            .await
            .map_err(fail("retrieve", "cluster group", &group_name))?;
        if group.members.contains(&member) {
            return Err(Diagnostics::error(
                format!(
                    "Member {:?} is already assigned to cluster group {:?}",
                    member, group_name
                ),
                "",
            ));
        }

        let mut req = group.writable();
        req.members.push(member);
        debug!(group = %group_name, members = req.members.len(), "Writing cluster group members");
        server
            .update_cluster_group(&group_name, &req, &etag)
            .await
            .map_err(fail("update", "cluster group", &group_name))?;

        self.sync_state(&server, plan).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: ClusterGroupAssignmentModel,
    ) -> Outcome<ClusterGroupAssignmentModel> {
        let server = ctx.server(state.remote.as_str(), "", "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        _ctx: &ResourceContext,
        plan: ClusterGroupAssignmentModel,
        _state: ClusterGroupAssignmentModel,
    ) -> Outcome<ClusterGroupAssignmentModel> {
        let mut m = plan;
        m.id = Value::Known(m.assignment_id());
        Ok(Some(m))
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: ClusterGroupAssignmentModel,
    ) -> Result<(), Diagnostics> {
        let id = state.assignment_id();
        let group_name = state.cluster_group.as_str();
        let member = state.member.as_str();
        info!(assignment = %id, "Deleting cluster group assignment");

        let server = ctx.server(state.remote.as_str(), "", "").await?;
        let Some((group, etag)) =
            found(server.get_cluster_group(group_name).await, "cluster group", group_name)?
        else {
            return Ok(());
        };
        if !group.members.iter().any(|m| m == member) {
            return Ok(());
        }

        let mut req = group.writable();
        req.members.retain(|m| m != member);
        server
            .update_cluster_group(group_name, &req, &etag)
            .await
            .map_err(fail("update", "cluster group", group_name))
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<ClusterGroupAssignmentModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["cluster_group", "member"], &[])?;
        reject_project(Self::TYPE_NAME, &id)?;
        Ok(ClusterGroupAssignmentModel {
            cluster_group: segment(id.field("cluster_group")),
            member: segment(id.field("member")),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }
}
