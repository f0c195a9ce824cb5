//! Attribute schemas of the provider and its resources.
//!
//! Schemas are data: the host reads them through `schema`, the plan step uses
//! them for validation, defaults and replacement detection.

use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::error::Diagnostics;
use crate::value::is_unknown_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Bool,
    Int,
    StringMap,
    StringSet,
    StringList,
    /// Set of nested objects described by [`Attribute::nested`].
    ObjectSet,
    /// List of nested objects described by [`Attribute::nested`].
    ObjectList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    /// String must be one of the listed values.
    OneOf(Vec<&'static str>),
    /// String must have at least this many characters.
    MinLength(usize),
}

impl Validator {
    fn check(&self, value: &str) -> Option<String> {
        match self {
            Validator::OneOf(allowed) if !allowed.contains(&value) => Some(format!(
                "value must be one of: {}, got: {:?}",
                allowed.join(", "),
                value
            )),
            Validator::MinLength(min) if value.chars().count() < *min => Some(format!(
                "value must be at least {} characters long, got: {:?}",
                min, value
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: AttributeType,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub description: &'static str,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
    /// Changing the value destroys and re-creates the resource.
    pub requires_replace: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Validator>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<Attribute>,
}

impl Attribute {
    fn new(name: &'static str, kind: AttributeType) -> Self {
        Self {
            name,
            kind,
            description: "",
            required: false,
            optional: false,
            computed: false,
            sensitive: false,
            requires_replace: false,
            default: None,
            validators: Vec::new(),
            nested: Vec::new(),
        }
    }

    pub fn required(name: &'static str, kind: AttributeType) -> Self {
        Self {
            required: true,
            ..Self::new(name, kind)
        }
    }

    pub fn optional(name: &'static str, kind: AttributeType) -> Self {
        Self {
            optional: true,
            ..Self::new(name, kind)
        }
    }

    /// Set by the provider only.
    pub fn computed(name: &'static str, kind: AttributeType) -> Self {
        Self {
            computed: true,
            ..Self::new(name, kind)
        }
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Optional attribute the provider fills in when the user leaves it out.
    pub fn or_computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn requires_replace(mut self) -> Self {
        self.requires_replace = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Json>) -> Self {
        self.default = Some(value.into());
        self.computed = true;
        self
    }

    pub fn one_of(mut self, allowed: &[&'static str]) -> Self {
        self.validators.push(Validator::OneOf(allowed.to_vec()));
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.validators.push(Validator::MinLength(min));
        self
    }

    pub fn nested(mut self, attributes: Vec<Attribute>) -> Self {
        self.nested = attributes;
        self
    }

    /// Computed and never set by the user.
    pub fn is_read_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }

    fn validate(&self, path: &str, value: &Json, diags: &mut Diagnostics) {
        if is_unknown_json(value) {
            return;
        }
        if value.is_null() {
            if self.required {
                diags.add_attribute_error(
                    path,
                    "Missing required argument",
                    format!(
                        "The argument {:?} is required, but no definition was found.",
                        self.name
                    ),
                );
            }
            return;
        }
        if self.is_read_only() {
            diags.add_attribute_error(
                path,
                "Invalid configuration for read-only attribute",
                "Cannot set value for this attribute as the provider has marked it as read-only.",
            );
            return;
        }

        let type_ok = match self.kind {
            AttributeType::String => value.is_string(),
            AttributeType::Bool => value.is_boolean(),
            AttributeType::Int => value.is_i64() || value.is_u64(),
            AttributeType::StringMap => value
                .as_object()
                .is_some_and(|m| m.values().all(|v| v.is_string())),
            AttributeType::StringSet | AttributeType::StringList => value
                .as_array()
                .is_some_and(|a| a.iter().all(|v| v.is_string())),
            AttributeType::ObjectSet | AttributeType::ObjectList => value
                .as_array()
                .is_some_and(|a| a.iter().all(|v| v.is_object() || is_unknown_json(v))),
        };
        if !type_ok {
            diags.add_attribute_error(
                path,
                "Incorrect attribute value type",
                format!("Expected a value of type {:?}.", self.kind),
            );
            return;
        }

        if let Some(s) = value.as_str() {
            for validator in &self.validators {
                if let Some(message) = validator.check(s) {
                    diags.add_attribute_error(path, "Invalid Attribute Value", message);
                }
            }
        }

        if let Some(items) = value.as_array() {
            for (i, item) in items.iter().enumerate() {
                let Some(obj) = item.as_object() else {
                    continue;
                };
                for nested in &self.nested {
                    let nested_path = format!("{}[{}].{}", path, i, nested.name);
                    let value = obj.get(nested.name).unwrap_or(&Json::Null);
                    nested.validate(&nested_path, value, diags);
                }
            }
        }
    }

    fn fill_defaults(&self, value: &mut Json) {
        if value.is_null() {
            if let Some(default) = &self.default {
                *value = default.clone();
            }
            return;
        }
        if self.nested.is_empty() {
            return;
        }
        if let Some(items) = value.as_array_mut() {
            for item in items {
                if let Some(obj) = item.as_object_mut() {
                    for nested in &self.nested {
                        let entry = obj.entry(nested.name).or_insert(Json::Null);
                        nested.fill_defaults(entry);
                    }
                }
            }
        }
    }
}

/// Schema of the provider block or of one resource type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    pub description: &'static str,
    pub attributes: Vec<Attribute>,
    /// Groups of attributes of which exactly one must be set.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exactly_one_of: Vec<Vec<&'static str>>,
}

impl Schema {
    pub fn new(description: &'static str, attributes: Vec<Attribute>) -> Self {
        Self {
            description,
            attributes,
            exactly_one_of: Vec::new(),
        }
    }

    pub fn exactly_one_of(mut self, names: &[&'static str]) -> Self {
        self.exactly_one_of.push(names.to_vec());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn requires_replace(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.requires_replace)
    }

    /// Checks a configuration object against the schema.
    pub fn validate(&self, config: &Json) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let empty = Map::new();
        let obj = config.as_object().unwrap_or(&empty);

        for attr in &self.attributes {
            attr.validate(attr.name, obj.get(attr.name).unwrap_or(&Json::Null), &mut diags);
        }

        for group in &self.exactly_one_of {
            let set = group
                .iter()
                .filter(|name| obj.get(**name).is_some_and(|v| !v.is_null()))
                .count();
            if set != 1 {
                diags.add_attribute_error(
                    group[0],
                    "Invalid Attribute Combination",
                    format!(
                        "Exactly one of these attributes must be configured: [{}]",
                        group.join(", ")
                    ),
                );
            }
        }

        diags
    }

    /// Fills null attributes that declare a default.
    pub fn apply_defaults(&self, config: &mut Json) {
        let Some(obj) = config.as_object_mut() else {
            return;
        };
        for attr in &self.attributes {
            let entry = obj.entry(attr.name).or_insert(Json::Null);
            attr.fill_defaults(entry);
        }
    }
}

// =============================================================================
// Shared attributes
// =============================================================================

pub fn name_attribute() -> Attribute {
    Attribute::required("name", AttributeType::String)
        .describe("Name of the resource.")
        .min_length(1)
        .requires_replace()
}

pub fn description_attribute() -> Attribute {
    Attribute::optional("description", AttributeType::String)
        .describe("Description of the resource.")
        .default_value("")
}

pub fn config_attribute() -> Attribute {
    Attribute::optional("config", AttributeType::StringMap).describe("Configuration map.")
}

pub fn config_state_attribute() -> Attribute {
    Attribute::computed("config_state", AttributeType::StringMap)
        .describe("Full configuration as reported by the daemon, without volatile keys.")
}

pub fn remote_attribute() -> Attribute {
    Attribute::optional("remote", AttributeType::String)
        .describe("Remote to manage the resource on. Defaults to the provider's default remote.")
        .requires_replace()
}

pub fn project_attribute() -> Attribute {
    Attribute::optional("project", AttributeType::String)
        .describe("Project the resource belongs to.")
        .min_length(1)
        .requires_replace()
}

pub fn target_attribute() -> Attribute {
    Attribute::optional("target", AttributeType::String)
        .describe("Cluster member to target.")
        .min_length(1)
        .requires_replace()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(
            "test",
            vec![
                name_attribute(),
                description_attribute(),
                Attribute::optional("driver", AttributeType::String).one_of(&["dir", "zfs"]),
                Attribute::computed("location", AttributeType::String),
                Attribute::optional("ports", AttributeType::ObjectSet).nested(vec![
                    Attribute::required("listen_port", AttributeType::String),
                    Attribute::optional("protocol", AttributeType::String)
                        .one_of(&["tcp", "udp"])
                        .default_value("tcp"),
                ]),
                Attribute::optional("content", AttributeType::String),
                Attribute::optional("path", AttributeType::String),
            ],
        )
        .exactly_one_of(&["content", "path"])
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        let diags = schema().validate(&json!({
            "name": "n1",
            "driver": "zfs",
            "ports": [{"listen_port": "80"}],
            "content": "x",
        }));
        assert!(diags.is_empty(), "{}", diags);
    }

    #[test]
    fn test_validate_reports_each_problem() {
        let diags = schema().validate(&json!({
            "name": "",
            "driver": "btrfs",
            "location": "node1",
            "ports": [{"protocol": "icmp"}],
            "content": "x",
            "path": "/tmp/x",
        }));

        let attrs: Vec<&str> = diags.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert!(attrs.contains(&"name"));
        assert!(attrs.contains(&"driver"));
        assert!(attrs.contains(&"location"));
        assert!(attrs.contains(&"ports[0].listen_port"));
        assert!(attrs.contains(&"ports[0].protocol"));
        assert!(attrs.contains(&"content"));
    }

    #[test]
    fn test_unknown_values_are_not_validated() {
        let diags = schema().validate(&json!({
            "name": crate::value::UNKNOWN,
            "driver": crate::value::UNKNOWN,
            "path": crate::value::UNKNOWN,
        }));
        assert!(!diags.has_error(), "{}", diags);
    }

    #[test]
    fn test_apply_defaults() {
        let mut config = json!({"name": "n1", "ports": [{"listen_port": "80"}]});
        schema().apply_defaults(&mut config);

        assert_eq!(config["description"], "");
        assert_eq!(config["ports"][0]["protocol"], "tcp");
        assert!(config["driver"].is_null());
    }

    #[test]
    fn test_requires_replace_listing() {
        let schema = Schema::new(
            "x",
            vec![name_attribute(), remote_attribute(), config_attribute()],
        );
        let names: Vec<&str> = schema
            .requires_replace()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["name", "remote"]);
    }
}
