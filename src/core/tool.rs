//! Tool and server declarations shared by the registry, router and executors.
use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default priority assigned to `app` tool registrations.
pub const APP_PRIORITY: i32 = 1000;
/// Default priority assigned to `ext` tool registrations.
pub const EXT_PRIORITY: i32 = 0;

/// Errors produced while parsing namespace identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NamespaceError {
    /// The string is not one of the known namespaces.
    #[error("Unknown namespace: {0}")]
    Unknown(String),
}

/// Grouping that determines the default execution priority of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// First-party tools; preferred by default.
    App,
    /// External tools; used as fallbacks by default.
    Ext,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::App => "app",
            Namespace::Ext => "ext",
        }
    }

    /// Priority a tool registration in this namespace receives.
    pub fn default_priority(&self) -> i32 {
        match self {
            Namespace::App => APP_PRIORITY,
            Namespace::Ext => EXT_PRIORITY,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = NamespaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(Namespace::App),
            "ext" => Ok(Namespace::Ext),
            other => Err(NamespaceError::Unknown(other.to_string())),
        }
    }
}

/// Static capability descriptor advertised by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: default_input_schema(),
        }
    }
}

/// Declaration of a backend worker: how to launch it and what it exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRegistration {
    pub id: String,
    pub display_name: String,
    pub launch_command: String,
    #[serde(default)]
    pub launch_args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub namespace: Namespace,
    #[serde(default)]
    pub tools: Vec<Tool>,
}

impl ServerRegistration {
    /// Start building a registration for the given id and namespace.
    pub fn builder(id: impl Into<String>, namespace: Namespace) -> ServerRegistrationBuilder {
        let id = id.into();
        ServerRegistrationBuilder {
            display_name: id.clone(),
            id,
            namespace,
            launch_command: String::new(),
            launch_args: Vec::new(),
            env: HashMap::new(),
            tools: Vec::new(),
        }
    }

    /// Key used for health reporting: `{namespace}.{id}`.
    pub fn qualified_id(&self) -> String {
        format!("{}.{}", self.namespace, self.id)
    }
}

/// Builder for [`ServerRegistration`].
pub struct ServerRegistrationBuilder {
    id: String,
    display_name: String,
    namespace: Namespace,
    launch_command: String,
    launch_args: Vec<String>,
    env: HashMap<String, String>,
    tools: Vec<Tool>,
}

impl ServerRegistrationBuilder {
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.launch_command = command.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.launch_args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launch_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn build(self) -> ServerRegistration {
        ServerRegistration {
            id: self.id,
            display_name: self.display_name,
            launch_command: self.launch_command,
            launch_args: self.launch_args,
            env: self.env,
            namespace: self.namespace,
            tools: self.tools,
        }
    }
}

/// A tool bound to the server that provides it.
///
/// Derived 1:1 from each `(ServerRegistration, Tool)` pair at registration
/// time and keyed by [`ToolRegistration::key`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRegistration {
    pub name: String,
    pub namespace: Namespace,
    pub tool: Tool,
    pub server_id: String,
    pub priority: i32,
    /// Registration order, used to keep `ext` candidates stable.
    #[serde(skip)]
    pub sequence: u64,
}

impl ToolRegistration {
    pub fn key(&self) -> String {
        tool_key(self.namespace, &self.name)
    }
}

/// Registry key for a tool: `{namespace}.{name}`.
pub fn tool_key(namespace: Namespace, name: &str) -> String {
    format!("{namespace}.{name}")
}

/// Split a requested tool name into an optional namespace qualifier and the
/// bare tool name.
///
/// Only the known `app.` / `ext.` prefixes qualify a name; any other dotted
/// name (for example `dangerous.tool`) is treated as a bare name.
pub fn split_tool_name(requested: &str) -> (Option<Namespace>, &str) {
    if let Some((prefix, rest)) = requested.split_once('.') {
        if let Ok(namespace) = prefix.parse::<Namespace>() {
            if !rest.is_empty() {
                return (Some(namespace), rest);
            }
        }
    }
    (None, requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_round_trip() {
        assert_eq!("app".parse::<Namespace>().unwrap(), Namespace::App);
        assert_eq!("ext".parse::<Namespace>().unwrap(), Namespace::Ext);
        assert!("other".parse::<Namespace>().is_err());
        assert_eq!(Namespace::App.to_string(), "app");
    }

    #[test]
    fn test_default_priorities() {
        assert_eq!(Namespace::App.default_priority(), 1000);
        assert_eq!(Namespace::Ext.default_priority(), 0);
    }

    #[test]
    fn test_split_tool_name() {
        assert_eq!(split_tool_name("app.echo"), (Some(Namespace::App), "echo"));
        assert_eq!(split_tool_name("ext.echo"), (Some(Namespace::Ext), "echo"));
        assert_eq!(split_tool_name("echo"), (None, "echo"));
        assert_eq!(split_tool_name("dangerous.tool"), (None, "dangerous.tool"));
        assert_eq!(split_tool_name("app."), (None, "app."));
    }

    #[test]
    fn test_tool_deserializes_camel_case() {
        let tool: Tool = serde_json::from_value(serde_json::json!({
            "name": "lineup",
            "description": "Build a lineup",
            "inputSchema": { "type": "object", "properties": { "slate": { "type": "string" } } }
        }))
        .unwrap();
        assert_eq!(tool.name, "lineup");
        assert!(tool.input_schema["properties"]["slate"].is_object());

        let bare: Tool = serde_json::from_value(serde_json::json!({ "name": "x" })).unwrap();
        assert_eq!(bare.input_schema, serde_json::json!({ "type": "object" }));
    }

    #[test]
    fn test_builder_and_qualified_id() {
        let server = ServerRegistration::builder("optimizer", Namespace::App)
            .command("python3")
            .arg("optimizer.py")
            .env("MODE", "fast")
            .tool(Tool::new("optimize", "Optimize a lineup"))
            .build();
        assert_eq!(server.display_name, "optimizer");
        assert_eq!(server.launch_args, vec!["optimizer.py"]);
        assert_eq!(server.qualified_id(), "app.optimizer");
        assert_eq!(server.tools.len(), 1);
    }
}
