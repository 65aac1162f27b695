use std::borrow::Cow;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;

use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};

use super::attribute_reference::Reference;
use crate::AttributeValue;

/// The type of entity a [Context] describes, e.g. "user", "org" or "device".
///
/// Valid kinds are non-empty, are not "kind" or "multi", and contain only ASCII letters,
/// digits, `.`, `_` and `-`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Kind(Cow<'static, str>);

impl Kind {
    pub fn user() -> Self {
        Kind(Cow::Borrowed("user"))
    }

    pub(crate) fn multi() -> Self {
        Kind(Cow::Borrowed("multi"))
    }

    pub fn is_user(&self) -> bool {
        self.as_ref() == "user"
    }

    pub fn is_multi(&self) -> bool {
        self.as_ref() == "multi"
    }

    #[cfg(test)]
    pub(crate) fn from(s: &str) -> Self {
        Kind(Cow::Owned(s.to_owned()))
    }
}

impl Default for Kind {
    fn default() -> Self {
        Kind::user()
    }
}

impl AsRef<str> for Kind {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Kind {
    fn eq(&self, other: &str) -> bool {
        self.as_ref() == other
    }
}

impl PartialEq<&str> for Kind {
    fn eq(&self, other: &&str) -> bool {
        self.as_ref() == *other
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl TryFrom<&str> for Kind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "" => Err("context kind cannot be empty".to_owned()),
            "kind" => Err("context kind cannot be 'kind'".to_owned()),
            "multi" => Err("context kind cannot be 'multi'".to_owned()),
            "user" => Ok(Kind::user()),
            k if !k
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) =>
            {
                Err(format!("context kind '{}' contains disallowed characters", k))
            }
            k => Ok(Kind(Cow::Owned(k.to_owned()))),
        }
    }
}

impl TryFrom<String> for Kind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Kind::try_from(value.as_str())
    }
}

impl Serialize for Kind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_ref())
    }
}

impl<'de> Deserialize<'de> for Kind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Kind::try_from(s).map_err(serde::de::Error::custom)
    }
}

/// The subject of an evaluation.
///
/// A single context has one [Kind] and a key. A multi-context bundles several single contexts
/// of distinct kinds; it has no key or attributes of its own, and rules reach into it through
/// [Context::as_kind].
///
/// Build contexts with [crate::ContextBuilder] and [crate::MultiContextBuilder], or decode
/// them from JSON.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    pub(super) kind: Kind,
    pub(super) key: String,
    pub(super) name: Option<String>,
    pub(super) anonymous: bool,
    pub(super) attributes: HashMap<String, AttributeValue>,
    pub(super) private_attributes: Vec<Reference>,
    // Non-empty only for multi-contexts; sorted by kind.
    pub(super) individuals: Vec<Context>,
}

impl Context {
    pub fn is_multi(&self) -> bool {
        self.kind.is_multi()
    }

    /// The kind of a single context, or "multi".
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// The key of a single context. Empty for a multi-context.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn private_attributes(&self) -> &[Reference] {
        &self.private_attributes
    }

    /// Every kind present in this context.
    pub fn kinds(&self) -> Vec<&Kind> {
        if self.is_multi() {
            self.individuals.iter().map(Context::kind).collect()
        } else {
            vec![&self.kind]
        }
    }

    /// The single context of the given kind, if there is one.
    pub fn as_kind(&self, kind: &Kind) -> Option<&Context> {
        if self.is_multi() {
            self.individuals.iter().find(|c| &c.kind == kind)
        } else {
            (&self.kind == kind).then_some(self)
        }
    }

    /// A key uniquely identifying every (kind, key) pair in the context. A user context's
    /// canonical key is its plain key; any other kind is written `kind:key`, with `%` and `:`
    /// in the key percent-escaped.
    pub fn canonical_key(&self) -> String {
        if !self.is_multi() {
            if self.kind.is_user() {
                return self.key.clone();
            }
            return format!("{}:{}", self.kind, escape_key(&self.key));
        }
        self.individuals
            .iter()
            .map(|c| format!("{}:{}", c.kind, escape_key(&c.key)))
            .join(":")
    }

    /// Resolves an attribute reference against a single context.
    ///
    /// On a multi-context only "kind" can be resolved; to read attributes, select an
    /// individual context with [Context::as_kind] first.
    pub fn get_value(&self, reference: &Reference) -> Option<AttributeValue> {
        let first = reference.component(0)?;

        if self.is_multi() {
            if reference.is_kind() {
                return Some(AttributeValue::String(self.kind.to_string()));
            }
            warn!("only the 'kind' attribute can be read from a multi-context");
            return None;
        }

        let mut value = self.top_level_value(first)?;
        for depth in 1..reference.depth() {
            let name = reference.component(depth)?;
            value = match value {
                AttributeValue::Object(mut map) => map.remove(name)?,
                _ => return None,
            };
        }
        Some(value)
    }

    fn top_level_value(&self, name: &str) -> Option<AttributeValue> {
        match name {
            "kind" => Some(AttributeValue::String(self.kind.to_string())),
            "key" => Some(AttributeValue::String(self.key.clone())),
            "name" => self.name.clone().map(AttributeValue::String),
            "anonymous" => Some(AttributeValue::Bool(self.anonymous)),
            _ => self.attributes.get(name).cloned(),
        }
    }
}

fn escape_key(key: &str) -> Cow<'_, str> {
    if key.contains(['%', ':']) {
        Cow::Owned(key.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(key)
    }
}
