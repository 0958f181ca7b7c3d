//! Tool System
//!
//! Extensible tool framework for agent capabilities. Tools are registered
//! in a [`ToolRegistry`] owned by the composition root and invoked by the
//! orchestration loop through a [`ToolExecutor`](crate::executor::ToolExecutor).
//!
//! The registry never lets a tool failure escape: unknown names, errors,
//! panics and timeouts all come back as text the model can read.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::builtin;
use crate::error::{AgentError, Result};

/// Parameter definition for tool schema
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Enum of allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn new(
        name: impl Into<String>,
        param_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: false,
            default: None,
            enum_values: None,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, "string", description)
    }

    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, "number", description)
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn with_enum(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.enum_values = Some(values.into_iter().collect());
        self
    }
}

/// Tool manifest advertised to the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    #[serde(default)]
    pub parameters: Vec<ParameterSchema>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Add a parameter
    #[must_use]
    pub fn param(mut self, param: ParameterSchema) -> Self {
        self.parameters.push(param);
        self
    }

    /// JSON Schema object for providers with native function calling
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut property = json!({
                "type": param.param_type,
                "description": param.description,
            });
            if let Some(values) = &param.enum_values {
                property["enum"] = Value::Array(values.clone());
            }
            if let Some(default) = &param.default {
                property["default"] = default.clone();
            }
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
            properties.insert(param.name.clone(), property);
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate that every required parameter is present
    pub fn check_required(&self, arguments: &Value) -> Result<()> {
        let object = arguments.as_object().ok_or_else(|| {
            AgentError::ToolValidation("arguments must be a JSON object".into())
        })?;

        for param in &self.parameters {
            if param.required && !object.contains_key(&param.name) {
                return Err(AgentError::ToolValidation(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
        }

        Ok(())
    }
}

/// Parse an opaque argument payload into a JSON value.
///
/// An empty payload is treated as an empty object.
pub fn parse_arguments(arguments: &str) -> Result<Value> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(arguments)
        .map_err(|e| AgentError::ToolValidation(format!("invalid JSON arguments: {e}")))
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's manifest entry
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the model's serialized arguments
    async fn execute(&self, arguments: &str) -> Result<String>;
}

/// Render a system prompt section describing tools for text-protocol providers
pub fn render_tool_section(tools: &[ToolDefinition]) -> String {
    let mut prompt = String::from("## Available Tools\n\n");
    prompt.push_str("You can use the following tools by responding with a JSON block:\n\n");
    prompt.push_str(
        "```tool\n{\"tool\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}\n```\n\n",
    );

    for tool in tools {
        let _ = writeln!(prompt, "### {}", tool.name);
        let _ = writeln!(prompt, "{}", tool.description);

        if !tool.parameters.is_empty() {
            prompt.push_str("**Parameters:**\n");
            for param in &tool.parameters {
                let required = if param.required { " (required)" } else { "" };
                let _ = writeln!(
                    prompt,
                    "- `{}` ({}){}: {}",
                    param.name, param.param_type, required, param.description
                );
            }
        }
        prompt.push('\n');
    }

    prompt
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    definition: ToolDefinition,
}

/// Concurrent catalogue of available tools, keyed by name
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    builtins_pending: AtomicBool,
    timeout: Option<Duration>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Registry that loads the built-in tools on first use
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            builtins_pending: AtomicBool::new(true),
            timeout: None,
        }
    }

    /// Registry without built-in tools
    pub fn empty() -> Self {
        Self {
            builtins_pending: AtomicBool::new(false),
            ..Self::new()
        }
    }

    /// Bound every tool invocation by `timeout`
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn ensure_initialized(&self) {
        if !self.builtins_pending.load(Ordering::Acquire) {
            return;
        }
        let mut tools = self.tools.write();
        if self.builtins_pending.swap(false, Ordering::AcqRel) {
            for tool in builtin::builtin_tools() {
                insert_first(&mut tools, tool);
            }
            debug!(count = tools.len(), "Loaded built-in tools");
        }
    }

    /// Register a tool. The first registration of a name wins.
    ///
    /// Returns whether the tool was inserted.
    pub fn register(&self, tool: Arc<dyn Tool>) -> bool {
        self.ensure_initialized();
        let mut tools = self.tools.write();
        let name = tool.definition().name;
        let inserted = insert_first(&mut tools, tool);
        if !inserted {
            warn!(tool = %name, "Tool already registered, keeping the existing one");
        }
        inserted
    }

    /// Remove a tool by name
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.ensure_initialized();
        self.tools.write().remove(name).map(|entry| entry.tool)
    }

    /// Get a tool by name
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.ensure_initialized();
        self.tools.read().get(name).map(|entry| Arc::clone(&entry.tool))
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.ensure_initialized();
        self.tools.read().contains_key(name)
    }

    /// Get tool names
    pub fn tool_names(&self) -> BTreeSet<String> {
        self.ensure_initialized();
        self.tools.read().keys().cloned().collect()
    }

    /// Manifest of every registered tool, sorted by name
    pub fn all_tools(&self) -> Vec<ToolDefinition> {
        self.ensure_initialized();
        let mut definitions: Vec<_> = self
            .tools
            .read()
            .values()
            .map(|entry| entry.definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.ensure_initialized();
        self.tools.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear every tool. Built-ins are not reloaded afterwards.
    pub fn reset(&self) {
        let mut tools = self.tools.write();
        self.builtins_pending.store(false, Ordering::Release);
        tools.clear();
    }

    /// Generate system prompt section describing available tools
    pub fn generate_prompt_section(&self) -> String {
        render_tool_section(&self.all_tools())
    }

    /// Execute a tool by name. Never fails: every failure becomes text.
    pub async fn execute_tool(&self, name: &str, arguments: &str) -> String {
        let Some(tool) = self.get_tool(name) else {
            warn!(tool = %name, "Model requested an unknown tool");
            return format!("Tool not found: {name}");
        };

        debug!(tool = %name, "Executing tool");
        match self.run_contained(tool, arguments).await {
            Ok(output) => output,
            Err(e) => {
                let details = match e {
                    AgentError::ToolExecution(details) => details,
                    other => other.to_string(),
                };
                warn!(tool = %name, error = %details, "Tool execution failed");
                format!("Tool execution error: {details}")
            }
        }
    }

    /// Run the tool body on its own task so panics and overruns stay contained
    async fn run_contained(&self, tool: Arc<dyn Tool>, arguments: &str) -> Result<String> {
        let arguments = arguments.to_owned();
        let mut handle = tokio::spawn(async move { tool.execute(&arguments).await });

        let joined = match self.timeout {
            Some(limit) => {
                if let Ok(joined) = tokio::time::timeout(limit, &mut handle).await {
                    joined
                } else {
                    handle.abort();
                    return Err(AgentError::Timeout(limit));
                }
            }
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(AgentError::ToolExecution(format!(
                "tool panicked: {}",
                panic_message(e.into_panic())
            ))),
            Err(e) => Err(AgentError::ToolExecution(e.to_string())),
        }
    }
}

fn insert_first(tools: &mut HashMap<String, RegisteredTool>, tool: Arc<dyn Tool>) -> bool {
    let definition = tool.definition();
    if tools.contains_key(&definition.name) {
        return false;
    }
    tools.insert(definition.name.clone(), RegisteredTool { tool, definition });
    true
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}
