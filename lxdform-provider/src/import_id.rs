//! Import id parsing.
//!
//! Format: `[<remote>:][<project>/]<f1>[/<fN>][,<opt>=<value>]*`.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ProviderError, Result};

/// A parsed import id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportId {
    pub remote: String,
    pub project: String,
    /// Required fields by name.
    pub fields: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
    order: Vec<String>,
}

impl ImportId {
    /// Builds an id from its parts. `fields` keeps its order.
    pub fn new(remote: &str, project: &str, fields: &[(&str, &str)]) -> Self {
        Self {
            remote: remote.to_string(),
            project: project.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            options: BTreeMap::new(),
            order: fields.iter().map(|(k, _)| k.to_string()).collect(),
        }
    }

    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.options.insert(key.to_string(), value.to_string());
        self
    }

    /// Value of a required field. Empty if the field is not known.
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }
}

impl fmt::Display for ImportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.remote.is_empty() {
            write!(f, "{}:", self.remote)?;
        }
        if !self.project.is_empty() {
            write!(f, "{}/", self.project)?;
        }
        let fields: Vec<&str> = self.order.iter().map(|k| self.field(k)).collect();
        f.write_str(&fields.join("/"))?;
        for (k, v) in &self.options {
            write!(f, ",{}={}", k, v)?;
        }
        Ok(())
    }
}

/// Human readable shape of a valid id, e.g.
/// `[<remote>:][<project>/]<pool>/<name>[,content_type=<value>]`.
pub fn format_hint(fields: &[&str], options: &[&str]) -> String {
    let mut hint = format!("[<remote>:][<project>/]<{}>", fields.join(">/<"));
    for opt in options {
        hint.push_str(&format!("[,{}=<value>]", opt));
    }
    hint
}

fn invalid(
    resource: &str,
    id: &str,
    reason: &str,
    fields: &[&str],
    options: &[&str],
) -> ProviderError {
    ProviderError::Import(format!(
        "Invalid import ID {:?} for {}: {}. Valid import format:\n{}",
        id,
        resource,
        reason,
        format_hint(fields, options)
    ))
}

/// Parses `id` for `resource`, mapping the trailing segments to `fields`.
pub fn parse(resource: &str, id: &str, fields: &[&str], options: &[&str]) -> Result<ImportId> {
    let fail = |reason: &str| invalid(resource, id, reason, fields, options);

    // A remote prefix never contains a slash, so a colon after the first
    // slash belongs to the identity (IPv6 listen addresses).
    let (remote, rest) = match id.split_once(':') {
        Some((remote, rest)) if !remote.contains('/') => (remote, rest),
        _ => ("", id),
    };

    let mut segments = rest.split(',').filter(|s| !s.is_empty());
    let identity = segments.next().ok_or_else(|| fail("missing identity"))?;

    let mut parsed_options = BTreeMap::new();
    for opt in segments {
        let (key, value) = opt
            .split_once('=')
            .ok_or_else(|| fail(&format!("option {:?} is not of the form key=value", opt)))?;
        if !options.contains(&key) {
            return Err(fail(&format!("unknown option {:?}", key)));
        }
        parsed_options.insert(key.to_string(), value.to_string());
    }

    let parts: Vec<&str> = identity.split('/').collect();
    let project = match parts.len() {
        n if n == fields.len() => "",
        n if n == fields.len() + 1 => parts[0],
        n if n < fields.len() => return Err(fail("too few segments")),
        _ => return Err(fail("too many segments")),
    };
    let values = &parts[parts.len() - fields.len()..];

    let mut parsed_fields = BTreeMap::new();
    for (name, value) in fields.iter().zip(values) {
        if value.is_empty() {
            return Err(fail(&format!("{} must not be empty", name)));
        }
        parsed_fields.insert(name.to_string(), value.to_string());
    }

    Ok(ImportId {
        remote: remote.to_string(),
        project: project.to_string(),
        fields: parsed_fields,
        options: parsed_options,
        order: fields.iter().map(|f| f.to_string()).collect(),
    })
}
