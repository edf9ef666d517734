use std::collections::HashMap;
use std::sync::Arc;

use super::AgentAdapter;

#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub id: String,
    pub name: String,
}

/// Maps backend ids (`AgentProfile::backend`) to adapters.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn AgentAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claude Code, Amp and Codex adapters with environment-derived configs.
    pub fn with_cli_adapters() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::claudecode::ClaudeCodeAdapter::new()));
        registry.register(Arc::new(super::amp::AmpAdapter::new()));
        registry.register(Arc::new(super::codex::CodexAdapter::new()));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn AgentAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn AgentAdapter>> {
        self.adapters.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.adapters.contains_key(id)
    }

    pub fn list(&self) -> Vec<AdapterInfo> {
        let mut list: Vec<_> = self
            .adapters
            .values()
            .map(|adapter| AdapterInfo {
                id: adapter.id().to_string(),
                name: adapter.name().to_string(),
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_adapters_are_registered() {
        let registry = AdapterRegistry::with_cli_adapters();
        assert!(registry.contains("claudecode"));
        assert!(registry.contains("amp"));
        assert!(registry.contains("codex"));
        assert!(registry.get("opencode").is_none());
        let names: Vec<_> = registry.list().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["Amp", "Claude Code", "Codex"]);
    }
}
