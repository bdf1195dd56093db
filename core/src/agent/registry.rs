use crate::error::{Error, Result};
use crate::traits::{Tool, ToolResult, ToolSpec};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Name-unique set of tools, kept in registration order so the specs sent
/// to the model are stable from one turn to the next.
///
/// Registries can be shared between contexts behind an `Arc`. Registration
/// takes the write lock, so two racing `register` calls with the same name
/// resolve to one success and one `DuplicateTool`, in no particular order.
pub struct ToolRegistry {
    tools: RwLock<Vec<Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn Tool>>> {
        self.tools.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn Tool>>> {
        self.tools.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let mut tools = self.write();
        if tools.iter().any(|t| t.name() == tool.name()) {
            return Err(Error::DuplicateTool(tool.name().to_string()));
        }
        tracing::debug!(tool = tool.name(), "Tool registered");
        tools.push(tool);
        Ok(())
    }

    /// Copies every tool of `other` into this registry, stopping at the first
    /// name that is already taken. Tools imported before the conflict stay.
    pub fn import(&self, other: &ToolRegistry) -> Result<usize> {
        let incoming: Vec<Arc<dyn Tool>> = other.read().clone();
        let mut imported = 0;
        for tool in incoming {
            self.register(tool)?;
            imported += 1;
        }
        Ok(imported)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.read().iter().find(|t| t.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().iter().any(|t| t.name() == name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let mut tools = self.write();
        let idx = tools.iter().position(|t| t.name() == name)?;
        Some(tools.remove(idx))
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|t| t.name().to_string()).collect()
    }

    pub fn list(&self) -> Vec<ToolSpec> {
        self.read().iter().map(|t| t.spec()).collect()
    }

    /// Runs a tool by name. A missing tool is an error; a tool that fails is
    /// reported as an unsuccessful `ToolResult`.
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;

        match tool.execute(args).await {
            Ok(result) => Ok(result),
            Err(e) => Ok(ToolResult::error(format!("Execution failed: {e}"))),
        }
    }
}
