//! Provider errors and host-facing diagnostics.

use std::fmt;

use lxdform_client::ClientError;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while configuring the provider or talking to a remote.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Daemon call failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The daemon refused our credentials.
    #[error("authentication with remote {remote:?} failed: {message}")]
    AuthFailed { remote: String, message: String },

    /// The daemon is older than the supported minimum.
    #[error("remote {remote:?} runs version {version}, required {required}")]
    VersionMismatch {
        remote: String,
        version: String,
        required: String,
    },

    /// Schema level validation failure.
    #[error("{attribute}: {message}")]
    Validation { attribute: String, message: String },

    /// Malformed import id.
    #[error("{0}")]
    Import(String),

    #[error("remote {0:?} is not configured")]
    RemoteNotFound(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A reconciler was handed provider data it cannot use.
    #[error("unexpected provider data: {0}")]
    ProviderData(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::Client(e) if e.is_not_found())
    }

    /// One-line summary used when the error reaches the host.
    pub fn summary(&self) -> String {
        match self {
            ProviderError::Client(_) => "Daemon request failed".to_string(),
            ProviderError::AuthFailed { remote, .. } => {
                format!("Failed to authenticate with remote \"{}\"", remote)
            }
            ProviderError::VersionMismatch { remote, .. } => {
                format!("Unsupported server version on remote \"{}\"", remote)
            }
            ProviderError::Validation { .. } => "Invalid attribute value".to_string(),
            ProviderError::Import(_) => "Invalid import ID".to_string(),
            ProviderError::RemoteNotFound(name) => {
                format!("Failed to retrieve remote \"{}\"", name)
            }
            ProviderError::Certificate(_) => "Certificate error".to_string(),
            ProviderError::Config(_) => "Invalid provider configuration".to_string(),
            ProviderError::ProviderData(_) => "Unexpected Resource Configure Type".to_string(),
            ProviderError::Io(_) => "I/O error".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single message for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    /// Attribute the message is attached to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.summary)
        } else {
            write!(f, "{}: {}", self.summary, self.detail)
        }
    }
}

/// Diagnostics collected during one host call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single error diagnostic.
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        let mut diags = Self::new();
        diags.add_error(summary, detail);
        diags
    }

    pub fn add_error(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.push(Severity::Error, summary.into(), detail.into(), None);
    }

    pub fn add_attribute_error(
        &mut self,
        attribute: impl Into<String>,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.push(
            Severity::Error,
            summary.into(),
            detail.into(),
            Some(attribute.into()),
        );
    }

    pub fn add_warning(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.push(Severity::Warning, summary.into(), detail.into(), None);
    }

    fn push(
        &mut self,
        severity: Severity,
        summary: String,
        detail: String,
        attribute: Option<String>,
    ) {
        self.0.push(Diagnostic {
            severity,
            summary,
            detail,
            attribute,
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn has_error(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    /// Summary of the first error, mostly for logs and tests.
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.0.iter().find(|d| d.severity == Severity::Error)
    }

    /// `Err(self)` if any error was collected, `Ok(value)` otherwise.
    pub fn into_result<T>(self, value: T) -> std::result::Result<T, Diagnostics> {
        if self.has_error() { Err(self) } else { Ok(value) }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        f.write_str(&lines.join("; "))
    }
}

impl From<ProviderError> for Diagnostics {
    fn from(e: ProviderError) -> Self {
        let attribute = match &e {
            ProviderError::Validation { attribute, .. } => Some(attribute.clone()),
            _ => None,
        };
        let detail = match &e {
            ProviderError::Validation { message, .. } => message.clone(),
            ProviderError::ProviderData(got) => format!(
                "Expected a configured provider, got: {}. \
                 Please report this issue to the provider developers.",
                got
            ),
            other => other.to_string(),
        };
        let mut diags = Diagnostics::new();
        diags.push(Severity::Error, e.summary(), detail, attribute);
        diags
    }
}

/// The uniform operational failure: `Failed to <verb> <noun> "<id>"`.
pub fn failed(verb: &str, noun: &str, id: &str, err: impl fmt::Display) -> Diagnostics {
    Diagnostics::error(
        format!("Failed to {} {} \"{}\"", verb, noun, id),
        err.to_string(),
    )
}
