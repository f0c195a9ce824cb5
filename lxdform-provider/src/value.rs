//! Host values and their conversion to plain containers.
//!
//! The host hands every attribute over as known, null, or unknown (not yet
//! computed). [`Value`] keeps that distinction. On the wire a null is JSON
//! `null` and an unknown is the string [`UNKNOWN`]; anything else is known.

use std::collections::BTreeMap;

use lxdform_client::api::{ConfigMap, DeviceMap};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire marker for a value the host does not know yet.
pub const UNKNOWN: &str = "74D93920-ED26-11E3-AC10-0800200C9A66";

/// A host value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value<T> {
    #[default]
    Null,
    Unknown,
    Known(T),
}

impl<T> Value<T> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown)
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Value::Known(_))
    }

    pub fn as_known(&self) -> Option<&T> {
        match self {
            Value::Known(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_known(self) -> Option<T> {
        match self {
            Value::Known(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Value<U> {
        match self {
            Value::Null => Value::Null,
            Value::Unknown => Value::Unknown,
            Value::Known(v) => Value::Known(f(v)),
        }
    }
}

impl<T: Clone + Default> Value<T> {
    /// The known value, or `T::default()` for null and unknown.
    pub fn value_or_default(&self) -> T {
        self.as_known().cloned().unwrap_or_default()
    }
}

impl Value<String> {
    /// The known string, or `""`.
    pub fn as_str(&self) -> &str {
        self.as_known().map(String::as_str).unwrap_or("")
    }

    /// Known for a non-empty string, null otherwise.
    pub fn non_empty(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.is_empty() { Value::Null } else { Value::Known(s) }
    }
}

impl<T> From<T> for Value<T> {
    fn from(v: T) -> Self {
        Value::Known(v)
    }
}

impl<T: Serialize> Serialize for Value<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Unknown => serializer.serialize_str(UNKNOWN),
            Value::Known(v) => v.serialize(serializer),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Value<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        match raw {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::String(s) if s == UNKNOWN => Ok(Value::Unknown),
            other => serde_json::from_value(other)
                .map(Value::Known)
                .map_err(D::Error::custom),
        }
    }
}

/// True if a raw host value is the unknown marker.
pub fn is_unknown_json(value: &serde_json::Value) -> bool {
    value.as_str() == Some(UNKNOWN)
}

/// Unknown marker as a raw host value.
pub fn unknown_json() -> serde_json::Value {
    serde_json::Value::String(UNKNOWN.to_string())
}

/// Field deserializer reading `null` as the default, for plain fields of
/// nested objects where the host sends every attribute.
pub fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Config maps
// =============================================================================

/// Reads a config map. Null and unknown read as empty.
pub fn config_map(value: &Value<ConfigMap>) -> ConfigMap {
    value.value_or_default()
}

/// Writes a stored config map back, keeping an omitted map omitted.
///
/// An empty result stays null if the user never declared the attribute, so
/// the host does not see `null` turn into `{}`.
pub fn config_value(declared: &Value<ConfigMap>, stored: ConfigMap) -> Value<ConfigMap> {
    if stored.is_empty() && declared.is_null() {
        Value::Null
    } else {
        Value::Known(stored)
    }
}

/// Same as [`config_value`] for plain strings: empty stays null when undeclared.
pub fn string_value(declared: &Value<String>, live: &str) -> Value<String> {
    if live.is_empty() && declared.is_null() {
        Value::Null
    } else {
        Value::Known(live.to_string())
    }
}

// =============================================================================
// Sets
// =============================================================================

/// Encodes a set of objects. No elements encode as null, and elements are
/// sorted so the same set always produces the same value.
pub fn set_value<T: Ord>(mut items: Vec<T>) -> Value<Vec<T>> {
    if items.is_empty() {
        return Value::Null;
    }
    items.sort();
    Value::Known(items)
}

/// Encodes a set of strings read from the daemon. An empty set stays null
/// when the user never declared the attribute.
pub fn string_set(declared: &Value<Vec<String>>, mut live: Vec<String>) -> Value<Vec<String>> {
    if live.is_empty() && declared.is_null() {
        return Value::Null;
    }
    live.sort();
    live.dedup();
    Value::Known(live)
}

/// Elements of a set. Null and unknown read as empty.
pub fn set_items<T: Clone>(value: &Value<Vec<T>>) -> Vec<T> {
    value.as_known().cloned().unwrap_or_default()
}

/// Indexes a set of objects by a key field.
pub fn set_to_map<T: Clone>(items: &[T], key: impl Fn(&T) -> String) -> BTreeMap<String, T> {
    items.iter().map(|item| (key(item), item.clone())).collect()
}

/// Turns a keyed map back into a set.
pub fn map_to_set<T: Ord>(map: BTreeMap<String, T>) -> Value<Vec<T>> {
    set_value(map.into_values().collect())
}

// =============================================================================
// Devices
// =============================================================================

/// A profile device as the host sees it.
///
/// The daemon keeps `type` inside the properties map; here it is a separate
/// attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub kind: String,
    #[serde(deserialize_with = "nullable")]
    pub properties: ConfigMap,
}

/// Devices as sent to the daemon.
pub fn devices_to_api(devices: &[Device]) -> DeviceMap {
    set_to_map(devices, |d| d.name.clone())
        .into_iter()
        .map(|(name, device)| {
            let mut props: ConfigMap = device
                .properties
                .into_iter()
                .filter(|(_, v)| !v.is_empty())
                .collect();
            props.insert("type".to_string(), device.kind);
            (name, props)
        })
        .collect()
}

/// Devices as stored in state.
///
/// Empty property values are never sent, so the daemon does not return them.
/// Those declared in `declared` are put back to keep the plan stable.
pub fn devices_from_api(devices: DeviceMap, declared: &[Device]) -> Value<Vec<Device>> {
    let declared = set_to_map(declared, |d| d.name.clone());
    let keyed = devices
        .into_iter()
        .map(|(name, mut props)| {
            let kind = props.remove("type").unwrap_or_default();
            if let Some(user) = declared.get(&name) {
                for (k, v) in &user.properties {
                    if v.is_empty() {
                        props.insert(k.clone(), String::new());
                    }
                }
            }
            let device = Device {
                name: name.clone(),
                kind,
                properties: props,
            };
            (name, device)
        })
        .collect();
    map_to_set(keyed)
}
