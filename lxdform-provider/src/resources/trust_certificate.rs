//! Trust store certificate reconciler.
//!
//! The daemon keys certificates by fingerprint. The fingerprint is derived
//! from `content` or the file at `path` during planning, so new certificate
//! material shows up as a change of a replacing attribute.

use std::path::Path;

use async_trait::async_trait;
use lxdform_client::InstanceServer;
use lxdform_client::api::CertificatesPost;
use lxdform_client::cert;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    Outcome, Reconciler, ResourceContext, deleted, fail, found, parse_import, reject_project,
    segment,
};
use crate::error::Diagnostics;
use crate::schema::{Attribute, AttributeType, Schema, description_attribute, remote_attribute};
use crate::value::{Value, set_items, string_set};

pub const DEFAULT_TYPE: &str = "client";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustCertificateModel {
    pub fingerprint: Value<String>,
    pub name: Value<String>,
    #[serde(rename = "type")]
    pub kind: Value<String>,
    pub description: Value<String>,
    pub projects: Value<Vec<String>>,
    pub content: Value<String>,
    pub path: Value<String>,
    pub remote: Value<String>,
}

impl TrustCertificateModel {
    /// PEM material, from `content` or read from `path`. `None` while either
    /// is still unknown.
    async fn pem(&self) -> Result<Option<String>, Diagnostics> {
        if self.content.is_unknown() || self.path.is_unknown() {
            return Ok(None);
        }
        if let Some(content) = self.content.as_known() {
            return Ok(Some(content.clone()));
        }
        let Some(path) = self.path.as_known() else {
            return Err(Diagnostics::error(
                "Invalid Attribute Combination",
                "Exactly one of these attributes must be configured: [content, path]",
            ));
        };
        read_certificate(Path::new(path)).await.map(Some)
    }

    fn certificate_type(&self) -> String {
        match self.kind.as_str() {
            "" => DEFAULT_TYPE.to_string(),
            kind => kind.to_string(),
        }
    }
}

async fn read_certificate(path: &Path) -> Result<String, Diagnostics> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        let mut diags = Diagnostics::new();
        diags.add_attribute_error(
            "path",
            format!("Failed to read certificate file {:?}", path.display().to_string()),
            e.to_string(),
        );
        diags
    })
}

/// Fingerprint of PEM material, reported against `attribute`.
fn fingerprint(pem: &str, attribute: &str) -> Result<String, Diagnostics> {
    cert::fingerprint_pem(pem).map_err(|e| {
        let mut diags = Diagnostics::new();
        diags.add_attribute_error(attribute, "Invalid certificate", e.to_string());
        diags
    })
}

fn source_attribute(m: &TrustCertificateModel) -> &'static str {
    if m.content.is_known() { "content" } else { "path" }
}

#[derive(Debug, Default)]
pub struct TrustCertificateResource;

impl TrustCertificateResource {
    async fn sync_state(
        &self,
        server: &InstanceServer,
        mut m: TrustCertificateModel,
    ) -> Outcome<TrustCertificateModel> {
        let fp = m.fingerprint.as_str().to_string();
        let Some((certificate, _)) =
            found(server.get_certificate(&fp).await, "certificate", &fp)?
        else {
            return Ok(None);
        };

        m.fingerprint = Value::Known(certificate.fingerprint);
        m.name = Value::Known(certificate.name);
        m.kind = Value::Known(certificate.kind);
        m.description = Value::Known(certificate.description);
        m.projects = string_set(&m.projects, certificate.projects);
        Ok(Some(m))
    }
}

#[async_trait]
impl Reconciler for TrustCertificateResource {
    type Model = TrustCertificateModel;

    const TYPE_NAME: &'static str = "lxd_trust_certificate";

    fn schema(&self) -> Schema {
        Schema::new(
            "Adds a certificate to the trust store.",
            vec![
                Attribute::computed("fingerprint", AttributeType::String)
                    .describe("SHA-256 fingerprint of the certificate.")
                    .requires_replace(),
                Attribute::required("name", AttributeType::String)
                    .describe("Name of the certificate.")
                    .min_length(1),
                Attribute::optional("type", AttributeType::String)
                    .describe("Certificate type.")
                    .one_of(&[DEFAULT_TYPE, "metrics"])
                    .default_value(DEFAULT_TYPE),
                description_attribute(),
                Attribute::optional("projects", AttributeType::StringSet)
                    .describe("Projects the certificate is limited to. Empty means all."),
                Attribute::optional("content", AttributeType::String)
                    .describe("PEM encoded certificate."),
                Attribute::optional("path", AttributeType::String)
                    .describe("Path to a PEM encoded certificate."),
                remote_attribute(),
            ],
        )
        .exactly_one_of(&["content", "path"])
    }

    async fn create(
        &self,
        ctx: &ResourceContext,
        plan: TrustCertificateModel,
    ) -> Outcome<TrustCertificateModel> {
        let name = plan.name.as_str().to_string();
        info!(name = %name, "Adding certificate to trust store");

        let Some(pem) = plan.pem().await? else {
            return Err(Diagnostics::error(
                "Failed to create certificate",
                "Certificate content is not known yet.",
            ));
        };
        let attribute = source_attribute(&plan);
        let fp = fingerprint(&pem, attribute)?;
        let encoded = cert::pem_to_base64_der(&pem).map_err(|e| {
            let mut diags = Diagnostics::new();
            diags.add_attribute_error(attribute, "Invalid certificate", e.to_string());
            diags
        })?;

        let projects = set_items(&plan.projects);
        let server = ctx.server(plan.remote.as_str(), "", "").await?;
        let req = CertificatesPost {
            name: name.clone(),
            kind: plan.certificate_type(),
            restricted: !projects.is_empty(),
            projects,
            certificate: encoded,
            description: plan.description.value_or_default(),
            ..Default::default()
        };
        server
            .create_certificate(&req)
            .await
            .map_err(fail("create", "certificate", &name))?;

        debug!(name = %name, fingerprint = %fp, "Certificate trusted");
        let mut m = plan;
        m.fingerprint = Value::Known(fp);
        self.sync_state(&server, m).await
    }

    async fn read(
        &self,
        ctx: &ResourceContext,
        state: TrustCertificateModel,
    ) -> Outcome<TrustCertificateModel> {
        let server = ctx.server(state.remote.as_str(), "", "").await?;
        self.sync_state(&server, state).await
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        plan: TrustCertificateModel,
        state: TrustCertificateModel,
    ) -> Outcome<TrustCertificateModel> {
        let fp = state.fingerprint.as_str().to_string();
        info!(fingerprint = %fp, "Updating trusted certificate");

        let server = ctx.server(plan.remote.as_str(), "", "").await?;
        let (current, etag) = server
            .get_certificate(&fp)
            .await
            .map_err(fail("retrieve", "certificate", &fp))?;

        let projects = set_items(&plan.projects);
        let mut req = current.writable();
        req.name = plan.name.as_str().to_string();
        req.kind = plan.certificate_type();
        req.description = plan.description.value_or_default();
        req.restricted = !projects.is_empty();
        req.projects = projects;
        server
            .update_certificate(&fp, &req, &etag)
            .await
            .map_err(fail("update", "certificate", &fp))?;

        let mut m = plan;
        m.fingerprint = Value::Known(fp);
        self.sync_state(&server, m).await
    }

    async fn delete(
        &self,
        ctx: &ResourceContext,
        state: TrustCertificateModel,
    ) -> Result<(), Diagnostics> {
        let fp = state.fingerprint.as_str();
        info!(fingerprint = %fp, "Removing certificate from trust store");
        let server = ctx.server(state.remote.as_str(), "", "").await?;
        deleted(server.delete_certificate(fp).await, "certificate", fp)
    }

    async fn import(
        &self,
        _ctx: &ResourceContext,
        id: &str,
    ) -> Result<TrustCertificateModel, Diagnostics> {
        let id = parse_import(Self::TYPE_NAME, id, &["fingerprint"], &[])?;
        reject_project(Self::TYPE_NAME, &id)?;
        Ok(TrustCertificateModel {
            fingerprint: segment(id.field("fingerprint")),
            remote: segment(&id.remote),
            ..Default::default()
        })
    }

    async fn modify_plan(
        &self,
        _prior: Option<&TrustCertificateModel>,
        plan: &mut TrustCertificateModel,
    ) -> Result<(), Diagnostics> {
        if plan.content.is_null() && plan.path.is_null() {
            return Ok(());
        }
        plan.fingerprint = match plan.pem().await? {
            Some(pem) => Value::Known(fingerprint(&pem, source_attribute(plan))?),
            None => Value::Unknown,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pem() -> String {
        cert::der_to_pem(b"trusted client certificate")
    }

    #[tokio::test]
    async fn test_fingerprint_follows_content() {
        let mut plan = TrustCertificateModel {
            name: Value::Known("ci".to_string()),
            content: Value::Known(pem()),
            fingerprint: Value::Known("stale".to_string()),
            ..Default::default()
        };
        TrustCertificateResource.modify_plan(None, &mut plan).await.unwrap();
        assert_eq!(plan.fingerprint, Value::Known(cert::fingerprint_pem(&pem()).unwrap()));
    }

    #[tokio::test]
    async fn test_fingerprint_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.crt");
        std::fs::write(&path, pem()).unwrap();

        let mut plan = TrustCertificateModel {
            path: Value::Known(path.display().to_string()),
            ..Default::default()
        };
        TrustCertificateResource.modify_plan(None, &mut plan).await.unwrap();
        assert_eq!(plan.fingerprint, Value::Known(cert::fingerprint_pem(&pem()).unwrap()));
    }

    #[tokio::test]
    async fn test_unknown_content_leaves_fingerprint_unknown() {
        let mut plan = TrustCertificateModel {
            content: Value::Unknown,
            ..Default::default()
        };
        TrustCertificateResource.modify_plan(None, &mut plan).await.unwrap();
        assert!(plan.fingerprint.is_unknown());
    }

    #[tokio::test]
    async fn test_invalid_content_is_attribute_error() {
        let mut plan = TrustCertificateModel {
            content: Value::Known("not a certificate".to_string()),
            ..Default::default()
        };
        let diags = TrustCertificateResource.modify_plan(None, &mut plan).await.unwrap_err();
        let first = diags.first_error().unwrap();
        assert_eq!(first.summary, "Invalid certificate");
        assert_eq!(first.attribute.as_deref(), Some("content"));
    }
}
