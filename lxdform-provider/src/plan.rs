//! Plan modification.
//!
//! Runs between the user's configuration and the host committing a plan:
//! validate, apply defaults, carry computed values over from the prior state,
//! let the kind adjust the result, and report which replacing attributes
//! changed.

use serde::Serialize;
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::error::Diagnostics;
use crate::resources::ResourceKind;
use crate::schema::{Attribute, AttributeType, Schema};
use crate::value::unknown_json;

/// What the host commits for one resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanResult {
    /// Planned state. `None` plans a destroy.
    pub planned: Option<Json>,
    /// Attributes whose change forces destroy and create.
    pub requires_replace: Vec<String>,
}

impl PlanResult {
    pub fn replaces(&self) -> bool {
        !self.requires_replace.is_empty()
    }
}

fn attr<'a>(obj: Option<&'a Map<String, Json>>, name: &str) -> &'a Json {
    obj.and_then(|o| o.get(name)).unwrap_or(&Json::Null)
}

/// Sets compare without regard to order.
fn same_value(attribute: &Attribute, a: &Json, b: &Json) -> bool {
    match (attribute.kind, a.as_array(), b.as_array()) {
        (AttributeType::StringSet | AttributeType::ObjectSet, Some(a), Some(b)) => {
            let mut a: Vec<String> = a.iter().map(Json::to_string).collect();
            let mut b: Vec<String> = b.iter().map(Json::to_string).collect();
            a.sort();
            b.sort();
            a == b
        }
        _ => a == b,
    }
}

/// Fills computed attributes the configuration leaves null: from the prior
/// state when there is one, unknown otherwise.
fn carry_computed(
    schema: &Schema,
    planned: &mut Map<String, Json>,
    prior: Option<&Map<String, Json>>,
) {
    for attribute in schema.attributes.iter().filter(|a| a.computed) {
        let entry = planned.entry(attribute.name).or_insert(Json::Null);
        if !entry.is_null() {
            continue;
        }
        *entry = match prior {
            Some(prior) => attr(Some(prior), attribute.name).clone(),
            None => unknown_json(),
        };
    }
}

/// Plans `config` against `prior` for one resource of `kind`.
pub async fn plan_resource(
    kind: ResourceKind,
    prior: Option<Json>,
    config: Option<Json>,
) -> Result<PlanResult, Diagnostics> {
    let config = match config {
        Some(config) if !config.is_null() => config,
        _ => return Ok(PlanResult::default()),
    };

    let schema = kind.schema();
    schema.validate(&config).into_result(())?;

    let prior = prior.filter(|p| !p.is_null());
    let prior_obj = prior.as_ref().and_then(Json::as_object);

    let mut planned = config.clone();
    schema.apply_defaults(&mut planned);
    if let Some(obj) = planned.as_object_mut() {
        carry_computed(&schema, obj, prior_obj);
    }

    let mut planned = kind.modify_plan(prior.clone(), planned).await?;

    let requires_replace: Vec<String> = match prior_obj {
        None => Vec::new(),
        Some(prior_obj) => schema
            .requires_replace()
            .filter(|a| {
                let before = attr(Some(prior_obj), a.name);
                let after = attr(planned.as_object(), a.name);
                !same_value(a, before, after)
            })
            .map(|a| a.name.to_string())
            .collect(),
    };

    if !requires_replace.is_empty() {
        debug!(
            resource = kind.type_name(),
            attributes = ?requires_replace,
            "Plan replaces resource"
        );
        let config_obj = config.as_object();
        if let Some(obj) = planned.as_object_mut() {
            let carried = schema
                .attributes
                .iter()
                .filter(|a| a.computed && !a.requires_replace);
            for attribute in carried {
                if attr(config_obj, attribute.name).is_null() && attribute.default.is_none() {
                    obj.insert(attribute.name.to_string(), unknown_json());
                }
            }
        }
    }

    Ok(PlanResult {
        planned: Some(planned),
        requires_replace,
    })
}
