//! JSON-lines request loop standing in for the host's plugin protocol.
//!
//! One request per input line, one response per output line:
//!
//! ```text
//! {"op":"configure","config":{"remote":[{"name":"local","scheme":"unix"}]}}
//! {"op":"create","type_name":"lxd_network","planned":{...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::Diagnostics;
use crate::provider::{self, Provider};
use crate::resources::Outcome;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Configure {
        #[serde(default)]
        config: Json,
    },
    Schema,
    Plan {
        type_name: String,
        #[serde(default)]
        prior: Option<Json>,
        #[serde(default)]
        config: Option<Json>,
    },
    Create {
        type_name: String,
        planned: Json,
    },
    Read {
        type_name: String,
        state: Json,
    },
    Update {
        type_name: String,
        planned: Json,
        state: Json,
    },
    Delete {
        type_name: String,
        state: Json,
    },
    Import {
        type_name: String,
        id: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Response {
    pub diagnostics: Diagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Json>,
    /// The resource no longer exists and leaves host state.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub removed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requires_replace: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Json>,
}

impl Response {
    fn failed(diagnostics: Diagnostics) -> Self {
        Self {
            diagnostics,
            ..Default::default()
        }
    }

    fn from_outcome(outcome: Outcome<Json>) -> Self {
        match outcome {
            Ok(Some(state)) => Self {
                state: Some(state),
                ..Default::default()
            },
            Ok(None) => Self {
                removed: true,
                ..Default::default()
            },
            Err(diags) => Self::failed(diags),
        }
    }
}

pub async fn handle(provider: &Provider, request: Request) -> Response {
    match request {
        Request::Configure { config } => Response::failed(provider.configure(config).await),
        Request::Schema => match serde_json::to_value(provider::schema()) {
            Ok(schema) => Response {
                schema: Some(schema),
                ..Default::default()
            },
            Err(e) => {
                Response::failed(Diagnostics::error("Failed to encode schema", e.to_string()))
            }
        },
        Request::Plan {
            type_name,
            prior,
            config,
        } => match provider.plan(&type_name, prior, config).await {
            Ok(plan) => Response {
                removed: plan.planned.is_none(),
                state: plan.planned,
                requires_replace: plan.requires_replace,
                ..Default::default()
            },
            Err(diags) => Response::failed(diags),
        },
        Request::Create { type_name, planned } => {
            Response::from_outcome(provider.create(&type_name, planned).await)
        }
        Request::Read { type_name, state } => {
            Response::from_outcome(provider.read(&type_name, state).await)
        }
        Request::Update {
            type_name,
            planned,
            state,
        } => Response::from_outcome(provider.update(&type_name, planned, state).await),
        Request::Delete { type_name, state } => match provider.delete(&type_name, state).await {
            Ok(()) => Response {
                removed: true,
                ..Default::default()
            },
            Err(diags) => Response::failed(diags),
        },
        Request::Import { type_name, id } => match provider.import(&type_name, &id).await {
            Ok(state) => Response {
                state: Some(state),
                ..Default::default()
            },
            Err(diags) => Response::failed(diags),
        },
    }
}

/// Handles one raw request line.
pub async fn handle_line(provider: &Provider, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => handle(provider, request).await,
        Err(e) => {
            warn!(error = %e, "Invalid request");
            Response::failed(Diagnostics::error("Invalid request", e.to_string()))
        }
    }
}

/// Serves requests until the input closes.
pub async fn serve<R, W>(provider: &Provider, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(provider, &line).await;
        debug!(errors = response.diagnostics.has_error(), "Request handled");

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    Ok(())
}
