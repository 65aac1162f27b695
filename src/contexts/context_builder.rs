use std::collections::HashMap;
use std::convert::TryFrom;

use log::warn;
use thiserror::Error;

use super::attribute_reference::Reference;
use super::context::{Context, Kind};
use crate::AttributeValue;

/// Why a [ContextBuilder] or [MultiContextBuilder] could not produce a [Context].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("invalid context kind: {0}")]
    InvalidKind(String),
    #[error("context key cannot be empty")]
    EmptyKey,
    #[error("a multi-context must be built with MultiContextBuilder")]
    MultiKindInSingleBuilder,
    #[error("a multi-context needs at least one individual context")]
    EmptyMultiContext,
    #[error("a multi-context cannot contain kind '{0}' more than once")]
    DuplicateKind(String),
}

/// Builds a single-kind [Context].
///
/// Unless changed, the context has kind "user", the key given to [ContextBuilder::new], is not
/// anonymous, and has no other attributes. Setters can be chained; problems such as an invalid
/// kind are reported by [ContextBuilder::build].
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    kind: String,
    key: String,
    name: Option<String>,
    anonymous: bool,
    attributes: HashMap<String, AttributeValue>,
    private_attributes: Vec<Reference>,
    // Legacy user JSON may carry an empty key.
    allow_empty_key: bool,
}

impl ContextBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            kind: "user".to_owned(),
            key: key.into(),
            name: None,
            anonymous: false,
            attributes: HashMap::new(),
            private_attributes: Vec::new(),
            allow_empty_key: false,
        }
    }

    /// Sets the kind. It must be non-empty, must not be "kind" or "multi", and may only contain
    /// ASCII letters, digits, `.`, `_` and `-`.
    pub fn kind(&mut self, kind: impl Into<String>) -> &mut Self {
        self.kind = kind.into();
        self
    }

    pub fn key(&mut self, key: impl Into<String>) -> &mut Self {
        self.key = key.into();
        self
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn anonymous(&mut self, anonymous: bool) -> &mut Self {
        self.anonymous = anonymous;
        self
    }

    pub fn set_bool(&mut self, attribute_name: &str, value: bool) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::Bool(value))
    }

    pub fn set_float(&mut self, attribute_name: &str, value: f64) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::Number(value))
    }

    pub fn set_string(&mut self, attribute_name: &str, value: impl Into<String>) -> &mut Self {
        self.set_value(attribute_name, AttributeValue::String(value.into()))
    }

    /// Sets any attribute. See [ContextBuilder::try_set_value] for the restrictions; a value
    /// that violates them is ignored.
    pub fn set_value(&mut self, attribute_name: &str, value: AttributeValue) -> &mut Self {
        self.try_set_value(attribute_name, value);
        self
    }

    /// Sets any attribute, returning false if the value was rejected.
    ///
    /// "kind", "key" and "name" only accept strings (null clears "name"), "anonymous" only
    /// accepts a boolean, and "_meta" cannot be set at all. For every other name a null value
    /// removes the attribute.
    pub fn try_set_value(&mut self, attribute_name: &str, value: AttributeValue) -> bool {
        match (attribute_name, value) {
            ("", _) => {
                warn!("ignoring attribute with an empty name");
                false
            }
            ("kind", AttributeValue::String(s)) => {
                self.kind = s;
                true
            }
            ("key", AttributeValue::String(s)) => {
                self.key = s;
                true
            }
            ("name", AttributeValue::String(s)) => {
                self.name = Some(s);
                true
            }
            ("name", AttributeValue::Null) => {
                self.name = None;
                true
            }
            ("anonymous", AttributeValue::Bool(b)) => {
                self.anonymous = b;
                true
            }
            ("kind" | "key" | "name" | "anonymous" | "_meta", _) => false,
            (name, AttributeValue::Null) => {
                self.attributes.remove(name);
                true
            }
            (name, value) => {
                self.attributes.insert(name.to_owned(), value);
                true
            }
        }
    }

    /// Marks an attribute as private. Private attributes still take part in evaluation.
    pub fn add_private_attribute<R: Into<Reference>>(&mut self, reference: R) -> &mut Self {
        self.private_attributes.push(reference.into());
        self
    }

    /// Removes every occurrence of a private attribute reference.
    pub fn remove_private_attribute<R: Into<Reference>>(&mut self, reference: R) -> &mut Self {
        let reference = reference.into();
        self.private_attributes.retain(|r| *r != reference);
        self
    }

    pub(super) fn allow_empty_key(&mut self) -> &mut Self {
        self.allow_empty_key = true;
        self
    }

    pub fn build(&self) -> Result<Context, ContextError> {
        if self.kind == "multi" {
            return Err(ContextError::MultiKindInSingleBuilder);
        }
        let kind = Kind::try_from(self.kind.as_str()).map_err(ContextError::InvalidKind)?;
        if self.key.is_empty() && !self.allow_empty_key {
            return Err(ContextError::EmptyKey);
        }

        Ok(Context {
            kind,
            key: self.key.clone(),
            name: self.name.clone(),
            anonymous: self.anonymous,
            attributes: self.attributes.clone(),
            private_attributes: self.private_attributes.clone(),
            individuals: Vec::new(),
        })
    }
}

/// Builds a multi-context out of single contexts of distinct kinds.
#[derive(Clone, Debug, Default)]
pub struct MultiContextBuilder {
    contexts: Vec<Context>,
}

impl MultiContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(contexts: Vec<Context>) -> Self {
        let mut builder = Self::new();
        for context in contexts {
            builder.add_context(context);
        }
        builder
    }

    /// Adds a context. Adding a multi-context adds each of its individuals.
    pub fn add_context(&mut self, context: Context) -> &mut Self {
        if context.is_multi() {
            self.contexts.extend(context.individuals);
        } else {
            self.contexts.push(context);
        }
        self
    }

    /// Builds the multi-context. With exactly one individual context, that context is returned
    /// as is.
    pub fn build(&self) -> Result<Context, ContextError> {
        match self.contexts.len() {
            0 => return Err(ContextError::EmptyMultiContext),
            1 => return Ok(self.contexts[0].clone()),
            _ => {}
        }

        let mut individuals = self.contexts.clone();
        individuals.sort_by(|a, b| a.kind.cmp(&b.kind));
        if let Some(pair) = individuals.windows(2).find(|w| w[0].kind == w[1].kind) {
            return Err(ContextError::DuplicateKind(pair[0].kind.to_string()));
        }

        Ok(Context {
            kind: Kind::multi(),
            key: String::new(),
            name: None,
            anonymous: false,
            attributes: HashMap::new(),
            private_attributes: Vec::new(),
            individuals,
        })
    }
}
