//! Tool Registry - central registration and lookup for all tools.
//!
//! The registry is filled once at startup and then shared read-only behind an
//! `Arc`, so lookups need no locking. Each tool's input schema is compiled
//! when the tool is registered and every call's arguments are checked against
//! it before the tool sees them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use jsonschema::error::ValidationErrorKind;
use jsonschema::Validator;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::config::Config;

use super::contract::{Arguments, Tool, ToolDescriptor};
use super::definitions::{CalculatorTool, NetworkTool, WeatherTool};
use super::error::{ToolError, ValidationError};

// ============================================================================
// Tool Registry
// ============================================================================

/// Tool registry - manages all available tools, indexed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    schemas: HashMap<String, Validator>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in tools.
    pub fn with_builtin_tools(config: &Config) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        registry.register(Arc::new(CalculatorTool::new()))?;
        registry.register(Arc::new(NetworkTool::new(
            config.network.clone(),
            config.geolocation.clone(),
        )))?;
        registry.register(Arc::new(WeatherTool::new(
            config.weather.clone(),
            config.geolocation.clone(),
        )))?;
        info!("Registered {} tools: {}", registry.len(), registry.tool_names().join(", "));
        Ok(registry)
    }

    /// Register a tool. Fails if the name is already taken or its input
    /// schema does not compile.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::duplicate(name));
        }

        let schema = Value::Object(tool.descriptor().input_schema.as_ref().clone());
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| ToolError::invalid_schema(&name, e.to_string()))?;

        debug!("Registering tool: {}", name);
        self.schemas.insert(name.clone(), validator);
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Resolve a tool by name.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Tool>, ToolError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::not_found(name))
    }

    /// Check `arguments` against the compiled input schema of tool `name`.
    ///
    /// A `null` argument counts as absent, matching how optional parameters
    /// deserialize. Reports the first violation, naming the offending argument
    /// when the violation can be pinned to one.
    pub fn check_arguments(&self, name: &str, arguments: &Arguments) -> Result<(), ToolError> {
        let validator = self
            .schemas
            .get(name)
            .ok_or_else(|| ToolError::not_found(name))?;

        let instance = Value::Object(
            arguments
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        );
        let first = match validator.validate(&instance) {
            Ok(()) => None,
            Err(error) => Some(error),
        };
        match first {
            None => Ok(()),
            Some(error) => {
                let path = error.instance_path.to_string();
                let field = match &error.kind {
                    ValidationErrorKind::Required { property } => {
                        property.as_str().map(str::to_string)
                    }
                    ValidationErrorKind::AdditionalProperties { unexpected } => {
                        unexpected.first().cloned()
                    }
                    _ => top_level_property(&path),
                };
                let message = if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{}: {}", path, error)
                };
                Err(ToolError::InvalidArguments(match field {
                    Some(field) => ValidationError::field(field, message),
                    None => ValidationError::new(message),
                }))
            }
        }
    }

    /// Descriptors of all tools, ordered by name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| tool.descriptor().clone())
            .collect()
    }

    /// Get all tool names, ordered.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// First segment of a JSON pointer such as `/operation` or `/a/0`.
fn top_level_property(pointer: &str) -> Option<String> {
    pointer
        .trim_start_matches('/')
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}
