use std::collections::HashMap;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::attribute_reference::Reference;
use super::context::Context;
use super::context_builder::{ContextBuilder, MultiContextBuilder};
use crate::AttributeValue;

#[derive(Deserialize)]
struct Meta {
    #[serde(default, rename = "privateAttributes")]
    private_attributes: Vec<String>,
}

#[derive(Deserialize)]
struct SingleKind {
    key: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    anonymous: Option<bool>,
    #[serde(default, rename = "_meta")]
    meta: Option<Meta>,
    #[serde(flatten)]
    attributes: HashMap<String, AttributeValue>,
}

// The user shape that predates context kinds. Only a fixed set of top-level attributes exists;
// everything else lives under "custom".
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyUser {
    key: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    anonymous: Option<bool>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    custom: Option<HashMap<String, AttributeValue>>,
    #[serde(default)]
    private_attribute_names: Option<Vec<String>>,
}

impl SingleKind {
    fn into_context(self, kind: &str) -> Result<Context, String> {
        let mut builder = ContextBuilder::new(self.key);
        builder.kind(kind).anonymous(self.anonymous.unwrap_or(false));
        if let Some(name) = self.name {
            builder.name(name);
        }
        for (name, value) in self.attributes {
            builder.set_value(&name, value);
        }
        for private in self.meta.map(|m| m.private_attributes).unwrap_or_default() {
            builder.add_private_attribute(Reference::new(private));
        }
        builder.build().map_err(|e| e.to_string())
    }
}

impl LegacyUser {
    fn into_context(self) -> Result<Context, String> {
        let mut builder = ContextBuilder::new(self.key);
        builder
            .allow_empty_key()
            .anonymous(self.anonymous.unwrap_or(false));
        if let Some(name) = self.name {
            builder.name(name);
        }
        let builtins = [
            ("firstName", self.first_name),
            ("lastName", self.last_name),
            ("email", self.email),
            ("country", self.country),
            ("avatar", self.avatar),
            ("ip", self.ip),
        ];
        for (name, value) in builtins {
            if let Some(value) = value {
                builder.set_string(name, value);
            }
        }
        for (name, value) in self.custom.unwrap_or_default() {
            builder.set_value(&name, value);
        }
        for private in self.private_attribute_names.unwrap_or_default() {
            builder.add_private_attribute(Reference::from_literal(private));
        }
        builder.build().map_err(|e| e.to_string())
    }
}

fn single_kind(kind: &str, mut object: Map<String, Value>) -> Result<Context, String> {
    object.remove("kind");
    let single: SingleKind =
        serde_json::from_value(Value::Object(object)).map_err(|e| e.to_string())?;
    single.into_context(kind)
}

fn multi_kind(object: Map<String, Value>) -> Result<Context, String> {
    let mut builder = MultiContextBuilder::new();
    for (kind, value) in object {
        if kind == "kind" {
            continue;
        }
        let Value::Object(individual) = value else {
            return Err(format!("multi-context entry '{}' must be an object", kind));
        };
        builder.add_context(single_kind(&kind, individual)?);
    }
    builder.build().map_err(|e| e.to_string())
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        let kind = match object.get("kind") {
            None => None,
            Some(Value::String(kind)) => Some(kind.clone()),
            Some(_) => return Err(de::Error::custom("context kind must be a string")),
        };
        let result = match kind.as_deref() {
            None => serde_json::from_value::<LegacyUser>(Value::Object(object))
                .map_err(|e| e.to_string())
                .and_then(LegacyUser::into_context),
            Some("multi") => multi_kind(object),
            Some(kind) => single_kind(kind, object),
        };
        result.map_err(de::Error::custom)
    }
}
