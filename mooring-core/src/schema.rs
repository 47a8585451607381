//! Schema - Define type schemas for resources
//!
//! Providers define a schema for each resource type so configuration can be
//! validated before any API call is made.

use std::collections::HashMap;
use std::fmt;

use crate::resource::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
}

impl AttributeType {
    /// Check if a value conforms to this type
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (AttributeType::String, Value::String(_)) => Ok(()),
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),
            (AttributeType::Custom { base, validate, .. }, v) => {
                base.validate(v)?;
                validate(v)
            }
            _ => Err(format!(
                "expected {}, got {}",
                self.type_name(),
                value.type_name()
            )),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Custom { name, .. } => name.clone(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "String",
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
        }
    }
}

/// Type error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    #[error("\"{name}\": {message}")]
    Invalid { name: String, message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Exactly one of {} must be set", names.join(", "))]
    MissingOneOf { names: Vec<String> },

    #[error("Attributes {} conflict, only one may be set", names.join(", "))]
    Conflicting { names: Vec<String> },
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    /// A change to this attribute replaces the resource
    pub force_new: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            force_new: false,
            default: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: HashMap<String, AttributeSchema>,
    /// Groups of attributes of which exactly one must be set
    pub exactly_one_of: Vec<Vec<String>>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: HashMap::new(),
            exactly_one_of: Vec::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn exactly_one_of(mut self, names: &[&str]) -> Self {
        self.exactly_one_of
            .push(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Names of the attributes whose change forces a replacement, sorted
    pub fn force_new_attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .attributes
            .values()
            .filter(|a| a.force_new)
            .map(|a| a.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Return a copy of `attributes` with schema defaults filled in
    pub fn with_defaults(&self, attributes: &HashMap<String, Value>) -> HashMap<String, Value> {
        let mut merged = attributes.clone();
        for (name, schema) in &self.attributes {
            if let Some(default) = &schema.default
                && !merged.contains_key(name)
            {
                merged.insert(name.clone(), default.clone());
            }
        }
        merged
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &HashMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        let mut names: Vec<&String> = self.attributes.keys().collect();
        names.sort();

        for name in names {
            let schema = &self.attributes[name];
            match attributes.get(name) {
                Some(value) => {
                    if let Err(message) = schema.attr_type.validate(value) {
                        errors.push(TypeError::Invalid {
                            name: name.clone(),
                            message,
                        });
                    }
                }
                None if schema.required && schema.default.is_none() => {
                    errors.push(TypeError::MissingRequired { name: name.clone() });
                }
                None => {}
            }
        }

        for group in &self.exactly_one_of {
            let set: Vec<String> = group
                .iter()
                .filter(|n| attributes.contains_key(n.as_str()))
                .cloned()
                .collect();
            match set.len() {
                1 => {}
                0 => errors.push(TypeError::MissingOneOf {
                    names: group.clone(),
                }),
                _ => errors.push(TypeError::Conflicting { names: set }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;
    use crate::duration::{DurationError, parse_non_negative_duration};

    /// Integer that is zero or greater
    pub fn non_negative_int() -> AttributeType {
        AttributeType::Custom {
            name: "NonNegativeInt".to_string(),
            base: Box::new(AttributeType::Int),
            validate: |value| match value {
                Value::Int(n) if *n >= 0 => Ok(()),
                Value::Int(_) => Err("must be zero or greater".to_string()),
                _ => Err("Expected integer".to_string()),
            },
        }
    }

    /// Duration string such as "10m" that must not be negative
    pub fn duration() -> AttributeType {
        AttributeType::Custom {
            name: "Duration".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) => match parse_non_negative_duration(s) {
                    Ok(_) => Ok(()),
                    Err(DurationError::Negative(_)) => {
                        Err("must be greater than zero".to_string())
                    }
                    Err(e) => Err(format!("cannot be parsed as a duration: {}", e)),
                },
                _ => Err("Expected string".to_string()),
            },
        }
    }
}
