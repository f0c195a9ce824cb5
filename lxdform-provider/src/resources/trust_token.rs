//! Trust token reconciler.
//!
//! A token is a running `token` operation on the daemon. Once redeemed or
//! expired the operation disappears, and `trigger` decides what that means:
//! with `always` the resource leaves state and the next apply issues a new
//! token, with `once` the stored token is kept as is.

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::{CertificateAddToken, CertificatesPost, Operation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Outcome, Reconciler, ResourceContext, deleted, fail};
use crate::error::Diagnostics;
use crate::schema::{Attribute, AttributeType, Schema, remote_attribute};
use crate::value::{Value, set_items};

pub const TRIGGER_ONCE: &str = "once";
pub const TRIGGER_ALWAYS: &str = "always";
pub const TOKEN_CLASS: &str = "token";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustTokenModel {
    pub name: Value<String>,
    pub projects: Value<Vec<String>>,
    pub trigger: Value<String>,
    pub token: Value<String>,
    pub expires_at: Value<String>,
    pub operation_id: Value<String>,
    pub remote: Value<String>,
}

impl TrustTokenModel {
    fn trigger(&self) -> &str {
        match self.trigger.as_str() {
            "" => TRIGGER_ONCE,
            trigger => trigger,
        }
    }

    fn apply(&mut self, op: &Operation, token: &CertificateAddToken) {
        self.operation_id = Value::Known(op.id.clone());
        self.token = Value::Known(token.encode());
        self.expires_at = Value::Known(
            token
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        );
    }
}

/// The running token operation with `id`, if the daemon still has it.
async fn running_token(
    server: &InstanceServer,
    id: &str,
) -> Result<Option<Operation>, Diagnostics> {
    let ops = server
        .get_operations()
        .await
        .map_err(fail("retrieve", "operations", id))?;
    Ok(ops
        .into_iter()
        .find(|op| op.id == id && op.class == TOKEN_CLASS && op.is_running()))
}

#[derive(Debug, Default)]
pub struct TrustTokenResource;

#[async_trait]
impl Reconciler for TrustTokenResource {
    type Model = TrustTokenModel;

    const TYPE_NAME: &'static str = "lxd_trust_token";

    fn schema(&self) -> Schema {
        Schema::new(
            "Issues a single use trust token for a client.",
            vec![
                Attribute::required("name", AttributeType::String)
                    .describe("Client name the token is issued for.")
                    .min_length(1)
                    .requires_replace(),
                Attribute::optional("projects", AttributeType::StringSet)
                    .describe("Projects the redeeming client is restricted to.")
                    .requires_replace(),
                Attribute::optional("trigger", AttributeType::String)
                    .describe("Reissue a used or expired token (always) or keep it (once).")
                    .one_of(&[TRIGGER_ONCE, TRIGGER_ALWAYS])
                    .default_value(TRIGGER_ONCE),
                Attribute::computed("token", AttributeType::String)
                    .describe("Encoded trust token.")
                    .sensitive(),
                Attribute::computed("expires_at", AttributeType::String)
                    .describe("Expiry of the token, RFC 3339."),
                Attribute::computed("operation_id", AttributeType::String)
                    .describe("Daemon operation backing the token."),
                remote_attribute(),
            ],
        )
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: TrustTokenModel,
    ) -> Outcome<TrustTokenModel> {
        let name = plan.name.as_str().to_string();
        info!(name = %name, "Issuing trust token");

        let projects = set_items(&plan.projects);
        let server = ctx.server(plan.remote.as_str(), "", "").await?;
        let req = CertificatesPost {
            name: name.clone(),
            kind: "client".to_string(),
            restricted: !projects.is_empty(),
            projects,
            ..Default::default()
        };
        let op = server
            .create_certificate_token(&req)
            .await
            .map_err(fail("create", "trust token", &name))?;
        let Some(token) = CertificateAddToken::from_operation(&op) else {
            return Err(Diagnostics::error(
                format!("Failed to create trust token \"{}\"", name),
                format!("Operation {} carries no token.", op.id),
            ));
        };

        debug!(name = %name, operation = %op.id, "Trust token issued");
        let mut m = plan;
        m.apply(&op, &token);
        Ok(Some(m))
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: TrustTokenModel,
    ) -> Outcome<TrustTokenModel> {
        let id = state.operation_id.as_str().to_string();
        let server = ctx.server(state.remote.as_str(), "", "").await?;

        let op = running_token(&server, &id).await?;
        let token = op.as_ref().and_then(CertificateAddToken::from_operation);
        match (op, token) {
            (Some(op), Some(token)) => {
                let mut m = state;
                m.apply(&op, &token);
                Ok(Some(m))
            }
            _ if state.trigger() == TRIGGER_ALWAYS => {
                info!(operation = %id, "Trust token is gone, issuing a new one on next apply");
                Ok(None)
            }
            _ => {
                debug!(operation = %id, "Trust token is gone, keeping stored token");
                Ok(Some(state))
            }
        }
    }

    async fn update(
        &self,
        _ctx: &ResourceContext,
        plan: TrustTokenModel,
        state: TrustTokenModel,
    ) -> Outcome<TrustTokenModel> {
        // Only trigger changes in place. The token itself is untouched.
        let mut m = plan;
        m.token = state.token;
        m.expires_at = state.expires_at;
        m.operation_id = state.operation_id;
        Ok(Some(m))
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: TrustTokenModel,
    ) -> Result<(), Diagnostics> {
        let id = state.operation_id.as_str();
        info!(operation = %id, "Revoking trust token");
        if id.is_empty() {
            return Ok(());
        }

        let server = ctx.server(state.remote.as_str(), "", "").await?;
        if running_token(&server, id).await?.is_none() {
            return Ok(());
        }
        deleted(server.delete_operation(id).await, "trust token", id)
    }
}
