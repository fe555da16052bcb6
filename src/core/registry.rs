//! Tool registry: declared servers, their derived tool registrations and the
//! policy list used to resolve requested tool names.
//!
//! The registry owns *declarations* only. Running worker processes belong to
//! the executor behind the router. All state lives behind a single lock so a
//! resolution always observes one consistent snapshot, and listeners are
//! invoked after the lock is released.
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::core::{
    policy::{self, PolicyRule, Resolution},
    tool::{Namespace, ServerRegistration, ToolRegistration, tool_key},
};

/// Mutation notifications delivered to [`ToolRegistry::on_update`] listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    ServerRegistered { server_id: String, tool_count: usize },
    ServerUnregistered { server_id: String },
    PolicyAdded { tool_pattern: String },
}

type UpdateHandler = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    servers: HashMap<String, ServerRegistration>,
    tools: HashMap<String, ToolRegistration>,
    policies: Vec<PolicyRule>,
    next_sequence: u64,
}

/// Registry of backend servers and the tools they expose.
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
    listeners: RwLock<Vec<UpdateHandler>>,
}

impl ToolRegistry {
    /// Create a registry seeded with the default namespace policies.
    pub fn new() -> Self {
        let mut policies = policy::default_policies();
        policy::sort_policies(&mut policies);
        Self {
            state: RwLock::new(RegistryState {
                policies,
                ..Default::default()
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Store a server and derive one tool registration per declared tool.
    ///
    /// Re-registering an id replaces the previous declaration, including
    /// dropping tools it no longer declares.
    pub fn register_server(&self, server: ServerRegistration) {
        let server_id = server.id.clone();
        let tool_count = server.tools.len();
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.servers.contains_key(&server_id) {
                state.tools.retain(|_, reg| reg.server_id != server_id);
            }

            for tool in &server.tools {
                state.next_sequence += 1;
                let registration = ToolRegistration {
                    name: tool.name.clone(),
                    namespace: server.namespace,
                    tool: tool.clone(),
                    server_id: server_id.clone(),
                    priority: server.namespace.default_priority(),
                    sequence: state.next_sequence,
                };
                let key = registration.key();
                if let Some(previous) = state.tools.insert(key.clone(), registration) {
                    if previous.server_id != server_id {
                        tracing::warn!(
                            tool = %key,
                            previous_server = %previous.server_id,
                            server = %server_id,
                            "Tool registration replaced by another server"
                        );
                    }
                }
            }

            state.servers.insert(server_id.clone(), server);
        }

        tracing::info!(server = %server_id, tools = tool_count, "Server registered");
        self.notify(&RegistryEvent::ServerRegistered {
            server_id,
            tool_count,
        });
    }

    /// Remove a server and every registration derived from it.
    ///
    /// Returns the removed declaration, or `None` for an unknown id.
    pub fn unregister_server(&self, server_id: &str) -> Option<ServerRegistration> {
        let removed = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let removed = state.servers.remove(server_id);
            if removed.is_some() {
                state.tools.retain(|_, reg| reg.server_id != server_id);
            }
            removed
        };

        if removed.is_some() {
            tracing::info!(server = %server_id, "Server unregistered");
            self.notify(&RegistryEvent::ServerUnregistered {
                server_id: server_id.to_string(),
            });
        }
        removed
    }

    pub fn get_tool(&self, namespace: Namespace, name: &str) -> Option<ToolRegistration> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.tools.get(&tool_key(namespace, name)).cloned()
    }

    pub fn get_server(&self, server_id: &str) -> Option<ServerRegistration> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.servers.get(server_id).cloned()
    }

    pub fn get_servers_by_namespace(&self, namespace: Namespace) -> Vec<ServerRegistration> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut servers: Vec<_> = state
            .servers
            .values()
            .filter(|s| s.namespace == namespace)
            .cloned()
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    pub fn servers(&self) -> Vec<ServerRegistration> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut servers: Vec<_> = state.servers.values().cloned().collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    /// All tool registrations, `app` first, then by registration order.
    pub fn list_tools(&self) -> Vec<ToolRegistration> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut tools: Vec<_> = state.tools.values().cloned().collect();
        tools.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        tools
    }

    pub fn tool_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tools
            .len()
    }

    /// Resolve a bare tool name under the current policies.
    pub fn resolve_tool(&self, requested: &str) -> Resolution {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        policy::resolve(requested, state.tools.values(), &state.policies)
    }

    /// Append a policy rule and re-sort by descending priority.
    pub fn add_policy(&self, rule: PolicyRule) {
        let tool_pattern = rule.tool_pattern.clone();
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            tracing::info!(
                namespace = %rule.namespace,
                pattern = %rule.tool_pattern,
                action = %rule.action,
                priority = rule.priority,
                "Policy added"
            );
            state.policies.push(rule);
            policy::sort_policies(&mut state.policies);
        }
        self.notify(&RegistryEvent::PolicyAdded { tool_pattern });
    }

    /// Current policies in evaluation order.
    pub fn policies(&self) -> Vec<PolicyRule> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .policies
            .clone()
    }

    /// Register a listener invoked after every registry mutation.
    pub fn on_update<F>(&self, handler: F)
    where
        F: Fn(&RegistryEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    fn notify(&self, event: &RegistryEvent) {
        let listeners: Vec<UpdateHandler> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::core::{
        policy::{NamespaceSelector, PolicyAction},
        tool::Tool,
    };

    fn server(id: &str, namespace: Namespace, tools: &[&str]) -> ServerRegistration {
        ServerRegistration::builder(id, namespace)
            .command("worker")
            .tools(tools.iter().map(|name| Tool::new(*name, "")))
            .build()
    }

    #[test]
    fn test_register_derives_tool_registrations() {
        let registry = ToolRegistry::new();
        registry.register_server(server("core", Namespace::App, &["echo", "lineup"]));

        let echo = registry.get_tool(Namespace::App, "echo").unwrap();
        assert_eq!(echo.priority, 1000);
        assert_eq!(echo.server_id, "core");
        assert_eq!(echo.key(), "app.echo");
        assert_eq!(registry.tool_count(), 2);

        registry.register_server(server("search", Namespace::Ext, &["echo"]));
        assert_eq!(registry.get_tool(Namespace::Ext, "echo").unwrap().priority, 0);
    }

    #[test]
    fn test_reregister_replaces_tools() {
        let registry = ToolRegistry::new();
        registry.register_server(server("core", Namespace::App, &["echo", "old"]));
        registry.register_server(server("core", Namespace::App, &["echo", "new"]));

        assert!(registry.get_tool(Namespace::App, "old").is_none());
        assert!(registry.get_tool(Namespace::App, "new").is_some());
        assert_eq!(registry.tool_count(), 2);
        assert_eq!(registry.servers().len(), 1);
    }

    #[test]
    fn test_unregister_removes_server_and_tools() {
        let registry = ToolRegistry::new();
        registry.register_server(server("core", Namespace::App, &["echo"]));
        registry.register_server(server("search", Namespace::Ext, &["search"]));

        assert!(registry.unregister_server("core").is_some());
        assert!(registry.get_tool(Namespace::App, "echo").is_none());
        assert!(registry.get_server("core").is_none());
        assert_eq!(registry.tool_count(), 1);
        assert!(registry.unregister_server("core").is_none());
    }

    #[test]
    fn test_servers_by_namespace() {
        let registry = ToolRegistry::new();
        registry.register_server(server("b", Namespace::Ext, &[]));
        registry.register_server(server("a", Namespace::Ext, &[]));
        registry.register_server(server("core", Namespace::App, &[]));

        let ext: Vec<_> = registry
            .get_servers_by_namespace(Namespace::Ext)
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ext, vec!["a", "b"]);
        assert_eq!(registry.get_servers_by_namespace(Namespace::App).len(), 1);
    }

    #[test]
    fn test_resolve_prefers_app() {
        let registry = ToolRegistry::new();
        registry.register_server(server("search", Namespace::Ext, &["echo"]));
        registry.register_server(server("core", Namespace::App, &["echo"]));

        let resolution = registry.resolve_tool("echo");
        assert_eq!(resolution.registration.unwrap().namespace, Namespace::App);
        assert_eq!(resolution.fallback_options[0].namespace, Namespace::Ext);
    }

    #[test]
    fn test_resolution_never_returns_unregistered_tool() {
        let registry = ToolRegistry::new();
        registry.register_server(server("core", Namespace::App, &["echo"]));
        registry.unregister_server("core");
        assert!(registry.resolve_tool("echo").is_missing());
    }

    #[test]
    fn test_add_policy_sorts_by_priority() {
        let registry = ToolRegistry::new();
        registry.add_policy(PolicyRule::new(
            NamespaceSelector::Ext,
            "dangerous.*",
            PolicyAction::Deny,
            2000,
        ));
        let priorities: Vec<_> = registry.policies().iter().map(|p| p.priority).collect();
        assert_eq!(priorities, vec![2000, 1000, 500]);
    }

    #[test]
    fn test_listeners_receive_every_mutation() {
        let registry = ToolRegistry::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        registry.on_update(move |event| sink.lock().unwrap().push(event.clone()));

        registry.register_server(server("core", Namespace::App, &["echo"]));
        registry.add_policy(PolicyRule::new(
            NamespaceSelector::Any,
            "x*",
            PolicyAction::Deny,
            1,
        ));
        registry.unregister_server("core");
        registry.unregister_server("missing");

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                RegistryEvent::ServerRegistered {
                    server_id: "core".to_string(),
                    tool_count: 1
                },
                RegistryEvent::PolicyAdded {
                    tool_pattern: "x*".to_string()
                },
                RegistryEvent::ServerUnregistered {
                    server_id: "core".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_list_tools_app_first() {
        let registry = ToolRegistry::new();
        registry.register_server(server("search", Namespace::Ext, &["search"]));
        registry.register_server(server("core", Namespace::App, &["echo"]));
        let keys: Vec<_> = registry.list_tools().iter().map(|t| t.key()).collect();
        assert_eq!(keys, vec!["app.echo", "ext.search"]);
    }
}
