//! Tool registry
//!
//! Maps tool names to the plugin that owns them. Registration is the only
//! write; it replaces an owner's whole tool set under one write lock, so
//! resolvers observe either the old set or the new one.

use super::protocol::ToolDefinition;
use crate::error::RegistryError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// A registered tool and its owning plugin
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub owner: String,
}

#[derive(Debug, Default)]
struct Inner {
    tools: HashMap<String, RegisteredTool>,
    owners: HashMap<String, Vec<String>>, // owner -> tool names
}

/// Shared tool-name lookup table
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the tools of `owner`, replacing its previous set.
    ///
    /// If any name already belongs to another owner nothing is registered
    /// and the existing owner keeps the tool.
    pub async fn register(
        &self,
        owner: &str,
        definitions: Vec<ToolDefinition>,
    ) -> Result<usize, RegistryError> {
        let mut inner = self.inner.write().await;

        let conflict = definitions.iter().find_map(|def| {
            inner
                .tools
                .get(&def.name)
                .filter(|existing| existing.owner != owner)
                .map(|existing| RegistryError::Conflict {
                    tool: def.name.clone(),
                    plugin: owner.to_string(),
                    owner: existing.owner.clone(),
                })
        });
        if let Some(conflict) = conflict {
            error!("{}", conflict);
            return Err(conflict);
        }

        if let Some(previous) = inner.owners.remove(owner) {
            for name in previous {
                inner.tools.remove(&name);
            }
        }

        let names: Vec<String> = definitions.iter().map(|d| d.name.clone()).collect();
        for definition in definitions {
            inner.tools.insert(
                definition.name.clone(),
                RegisteredTool {
                    definition,
                    owner: owner.to_string(),
                },
            );
        }

        let count = names.len();
        inner.owners.insert(owner.to_string(), names);
        debug!(plugin = %owner, tools = count, "Registered tools");

        Ok(count)
    }

    /// Remove every tool of `owner`
    pub async fn unregister(&self, owner: &str) -> usize {
        let mut inner = self.inner.write().await;
        let Some(names) = inner.owners.remove(owner) else {
            return 0;
        };
        for name in &names {
            inner.tools.remove(name);
        }
        debug!(plugin = %owner, tools = names.len(), "Unregistered tools");
        names.len()
    }

    /// Owner of a tool
    pub async fn resolve(&self, tool: &str) -> Result<String, RegistryError> {
        let inner = self.inner.read().await;
        inner
            .tools
            .get(tool)
            .map(|entry| entry.owner.clone())
            .ok_or_else(|| RegistryError::NotFound(tool.to_string()))
    }

    /// Full registry entry for a tool
    pub async fn get(&self, tool: &str) -> Option<RegisteredTool> {
        let inner = self.inner.read().await;
        inner.tools.get(tool).cloned()
    }

    /// All registered tool definitions, sorted by name
    pub async fn list_all(&self) -> Vec<ToolDefinition> {
        let inner = self.inner.read().await;
        let mut tools: Vec<ToolDefinition> = inner
            .tools
            .values()
            .map(|entry| entry.definition.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Tools owned by one plugin, in declaration order
    pub async fn tools_for(&self, owner: &str) -> Vec<ToolDefinition> {
        let inner = self.inner.read().await;
        inner
            .owners
            .get(owner)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| inner.tools.get(name))
                    .map(|entry| entry.definition.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of registered tools
    pub async fn tool_count(&self) -> usize {
        self.inner.read().await.tools.len()
    }

    /// Check if a tool exists
    pub async fn has_tool(&self, tool: &str) -> bool {
        self.inner.read().await.tools.contains_key(tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: format!("{} tool", name),
            input_schema: json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = ToolRegistry::new();
        let count = registry
            .register("kube-core", vec![tool("kubectl.get"), tool("kubectl.apply")])
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(registry.resolve("kubectl.get").await.unwrap(), "kube-core");
        assert_eq!(
            registry.resolve("missing").await,
            Err(RegistryError::NotFound("missing".to_string()))
        );
        assert!(registry.has_tool("kubectl.apply").await);
    }

    #[tokio::test]
    async fn test_conflict_keeps_first_owner() {
        let registry = ToolRegistry::new();
        registry
            .register("kube-core", vec![tool("kubectl.get")])
            .await
            .unwrap();

        let err = registry
            .register("kube-extra", vec![tool("kubectl.logs"), tool("kubectl.get")])
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::Conflict {
                tool: "kubectl.get".to_string(),
                plugin: "kube-extra".to_string(),
                owner: "kube-core".to_string(),
            }
        );
        assert_eq!(registry.resolve("kubectl.get").await.unwrap(), "kube-core");
        // The conflicting plugin is not registered at all
        assert!(!registry.has_tool("kubectl.logs").await);
        assert_eq!(registry.tool_count().await, 1);
    }

    #[tokio::test]
    async fn test_redescribe_replaces_only_own_entries() {
        let registry = ToolRegistry::new();
        registry
            .register("a", vec![tool("a.one"), tool("a.two")])
            .await
            .unwrap();
        registry.register("b", vec![tool("b.one")]).await.unwrap();

        registry
            .register("a", vec![tool("a.two"), tool("a.three")])
            .await
            .unwrap();

        assert!(!registry.has_tool("a.one").await);
        assert_eq!(registry.resolve("a.three").await.unwrap(), "a");
        assert_eq!(registry.resolve("b.one").await.unwrap(), "b");
        let names: Vec<String> = registry
            .tools_for("a")
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["a.two", "a.three"]);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ToolRegistry::new();
        registry
            .register("a", vec![tool("a.one"), tool("a.two")])
            .await
            .unwrap();
        registry.register("b", vec![tool("b.one")]).await.unwrap();

        assert_eq!(registry.unregister("a").await, 2);
        assert_eq!(registry.unregister("a").await, 0);
        assert_eq!(registry.tool_count().await, 1);

        // The freed name can now be claimed by another plugin
        registry.register("b", vec![tool("b.one"), tool("a.one")]).await.unwrap();
        assert_eq!(registry.resolve("a.one").await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_list_all_sorted() {
        let registry = ToolRegistry::new();
        registry.register("x", vec![tool("zeta"), tool("alpha")]).await.unwrap();
        registry.register("y", vec![tool("mid")]).await.unwrap();

        let names: Vec<String> = registry.list_all().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_never_see_partial_sets() {
        let registry = ToolRegistry::new();
        let old: HashSet<String> = ["old.1", "old.2"].iter().map(|s| s.to_string()).collect();
        let new: HashSet<String> = ["new.1", "new.2"].iter().map(|s| s.to_string()).collect();
        registry
            .register("p", vec![tool("old.1"), tool("old.2")])
            .await
            .unwrap();

        let writer = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let set = if i % 2 == 0 {
                        vec![tool("new.1"), tool("new.2")]
                    } else {
                        vec![tool("old.1"), tool("old.2")]
                    };
                    registry.register("p", set).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..200 {
            let seen: HashSet<String> = registry.list_all().await.into_iter().map(|t| t.name).collect();
            assert!(seen == old || seen == new, "partial set observed: {:?}", seen);
            tokio::task::yield_now().await;
        }

        writer.await.unwrap();
    }
}
