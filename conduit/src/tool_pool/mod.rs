//! Tool Pool: per-project cache of callable tool descriptors, filtered by an agent's
//! whitelist and depth-based coordination-tool restrictions.
//!
//! The cache composes built-in tools (advertised by a [`ToolSource`], typically an
//! in-process registry) with external tools drawn from a project's MCP registry, each
//! prefixed `"<server_name>_<tool_name>"`. Built lazily under double-checked locking so
//! concurrent reads never block on each other and a build only runs once per project.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::model::{limits, AgentDefinition};
use crate::tool_source::{ToolCallContext, ToolCallContent, ToolSource, ToolSourceError, ToolSpec};

/// Names reserved for the Coordination Tools (§4.6); the pool does not implement these
/// itself but applies the same depth rule when a project's cache happens to contain them.
pub const COORDINATION_TOOL_NAMES: [&str; 2] = ["spawn_agents", "list_available_agents"];

/// Supplies a project's external MCP tool sources, keyed by server name. Implemented by
/// the hosting application against its project/registry persistence; the pool only cares
/// that each source can list and call tools.
#[async_trait]
pub trait McpRegistry: Send + Sync {
    async fn external_sources(
        &self,
        project_id: &str,
    ) -> Result<Vec<(String, Arc<dyn ToolSource>)>, ToolSourceError>;
}

/// An [`McpRegistry`] with no external sources, for projects that have none configured.
pub struct EmptyMcpRegistry;

#[async_trait]
impl McpRegistry for EmptyMcpRegistry {
    async fn external_sources(
        &self,
        _project_id: &str,
    ) -> Result<Vec<(String, Arc<dyn ToolSource>)>, ToolSourceError> {
        Ok(Vec::new())
    }
}

struct ToolDescriptor {
    spec: ToolSpec,
    source: Arc<dyn ToolSource>,
    source_tool_name: String,
}

struct ProjectCache {
    descriptors: HashMap<String, ToolDescriptor>,
    /// Insertion order, for deterministic iteration in legacy permissive mode.
    order: Vec<String>,
}

/// A tool resolved for one call site: already bound to its owning source, wrapped so
/// invocation always returns a value (errors become `{error: message}`, never a thrown
/// exception) per the Tool Pool's result-shaping contract.
pub struct PooledTool {
    pub spec: ToolSpec,
    source: Arc<dyn ToolSource>,
    source_tool_name: String,
}

/// Adapts a single built-in `Tool` (the Executor's own ask-user/coordination tools) to the
/// `ToolSource` contract so it can be wrapped as a `PooledTool` alongside cached tools.
struct SingleToolSource(Arc<dyn crate::tools::Tool>);

#[async_trait]
impl ToolSource for SingleToolSource {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
        Ok(vec![self.0.spec()])
    }

    async fn call_tool(&self, _name: &str, arguments: Value) -> Result<ToolCallContent, ToolSourceError> {
        self.0.call(arguments, None).await
    }

    async fn call_tool_with_context(
        &self,
        _name: &str,
        arguments: Value,
        ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        self.0.call(arguments, ctx).await
    }
}

impl PooledTool {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Wraps a built-in `Tool` instance (constructed fresh per run, e.g. `ask_user` or a
    /// coordination tool) as a `PooledTool` so the Executor can treat it uniformly with
    /// cached tools.
    pub fn from_builtin(tool: Arc<dyn crate::tools::Tool>) -> Self {
        let spec = tool.spec();
        let source: Arc<dyn ToolSource> = Arc::new(SingleToolSource(tool));
        Self {
            spec: spec.clone(),
            source,
            source_tool_name: spec.name,
        }
    }

    /// Invokes the underlying tool and shapes the result per the Tool Pool's wrapping
    /// rules. `is_error` results from the source are expected to have already surfaced as
    /// `Err` (the MCP tool source maps `isError` to `ToolSourceError::Transport` with the
    /// first text block as the message).
    pub async fn call(&self, args: Value, ctx: Option<&ToolCallContext>) -> Value {
        match self
            .source
            .call_tool_with_context(&self.source_tool_name, args, ctx)
            .await
        {
            Err(e) => serde_json::json!({ "error": e.to_string() }),
            Ok(content) => wrap_content(content),
        }
    }
}

/// Single-text results attempt a JSON parse and fall back to `{result: text}`;
/// multi-text results yield `{results: [...]}`; empty results yield `{result: ""}`.
fn wrap_content(content: ToolCallContent) -> Value {
    match content.parts.as_slice() {
        [] => serde_json::json!({ "result": "" }),
        [single] => match serde_json::from_str::<Value>(single) {
            Ok(v) => v,
            Err(_) => serde_json::json!({ "result": single }),
        },
        many => serde_json::json!({ "results": many }),
    }
}

/// Returns true if `tool_name` may appear in a resolution at `depth` given `max_depth`
/// and the caller's whitelist. Non-coordination tools always pass; this only restricts
/// `spawn_agents` / `list_available_agents`.
pub fn depth_allows(tool_name: &str, depth: u32, max_depth: u32, whitelist: &[String]) -> bool {
    if !COORDINATION_TOOL_NAMES.contains(&tool_name) {
        return true;
    }
    if depth >= max_depth {
        return false;
    }
    if depth == 0 {
        return true;
    }
    whitelist.iter().any(|w| w == tool_name)
}

fn select_names(cache: &ProjectCache, whitelist: &[String]) -> Vec<String> {
    if whitelist.is_empty() {
        return cache.order.clone();
    }
    let mut selected = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for pattern in whitelist {
        if pattern == "*" {
            for name in &cache.order {
                if seen.insert(name.clone()) {
                    selected.push(name.clone());
                }
            }
            break;
        } else if pattern.contains(['*', '?', '[']) {
            match glob::Pattern::new(pattern) {
                Ok(p) => {
                    for name in &cache.order {
                        if p.matches(name) && seen.insert(name.clone()) {
                            selected.push(name.clone());
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "invalid tool whitelist glob, skipping");
                }
            }
        } else if cache.descriptors.contains_key(pattern) {
            if seen.insert(pattern.clone()) {
                selected.push(pattern.clone());
            }
        } else {
            tracing::warn!(tool = %pattern, "unknown tool in whitelist, skipping");
        }
    }
    selected
}

/// Per-project cache of callable tools, filtered by whitelist and coordination-tool depth.
pub struct ToolPool {
    cache: RwLock<HashMap<String, Arc<ProjectCache>>>,
    builtin_source: Arc<dyn ToolSource>,
    registry: Arc<dyn McpRegistry>,
}

impl ToolPool {
    pub fn new(builtin_source: Arc<dyn ToolSource>, registry: Arc<dyn McpRegistry>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            builtin_source,
            registry,
        }
    }

    /// Resolves the tool set for a call site. `max_depth` of 0 is treated as unset and
    /// defaults to [`limits::DEFAULT_MAX_DEPTH`].
    pub async fn resolve(
        &self,
        project_id: &str,
        definition: Option<&AgentDefinition>,
        depth: u32,
        max_depth: u32,
    ) -> Result<Vec<PooledTool>, ToolSourceError> {
        let max_depth = if max_depth == 0 {
            limits::DEFAULT_MAX_DEPTH
        } else {
            max_depth
        };
        let cache = self.get_or_build(project_id).await?;
        let empty = Vec::new();
        let whitelist = definition.map(|d| &d.tools_whitelist).unwrap_or(&empty);
        let names = select_names(&cache, whitelist);

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            if !depth_allows(&name, depth, max_depth, whitelist) {
                continue;
            }
            if let Some(d) = cache.descriptors.get(&name) {
                out.push(PooledTool {
                    spec: d.spec.clone(),
                    source: d.source.clone(),
                    source_tool_name: d.source_tool_name.clone(),
                });
            }
        }
        Ok(out)
    }

    pub async fn invalidate(&self, project_id: &str) {
        self.cache.write().await.remove(project_id);
    }

    pub async fn invalidate_all(&self) {
        self.cache.write().await.clear();
    }

    async fn get_or_build(&self, project_id: &str) -> Result<Arc<ProjectCache>, ToolSourceError> {
        {
            let read = self.cache.read().await;
            if let Some(c) = read.get(project_id) {
                return Ok(c.clone());
            }
        }
        let mut write = self.cache.write().await;
        if let Some(c) = write.get(project_id) {
            return Ok(c.clone());
        }
        let built = Arc::new(self.build(project_id).await?);
        write.insert(project_id.to_string(), built.clone());
        Ok(built)
    }

    async fn build(&self, project_id: &str) -> Result<ProjectCache, ToolSourceError> {
        let mut descriptors = HashMap::new();
        let mut order = Vec::new();

        for spec in self.builtin_source.list_tools().await? {
            let name = spec.name.clone();
            if descriptors.contains_key(&name) {
                tracing::warn!(tool = %name, "duplicate built-in tool name, keeping first");
                continue;
            }
            order.push(name.clone());
            descriptors.insert(
                name.clone(),
                ToolDescriptor {
                    spec,
                    source: self.builtin_source.clone(),
                    source_tool_name: name,
                },
            );
        }

        for (server_name, source) in self.registry.external_sources(project_id).await? {
            for spec in source.list_tools().await? {
                let prefixed = format!("{}_{}", server_name, spec.name);
                if descriptors.contains_key(&prefixed) {
                    tracing::warn!(tool = %prefixed, "duplicate external tool name, keeping first");
                    continue;
                }
                order.push(prefixed.clone());
                let source_tool_name = spec.name.clone();
                descriptors.insert(
                    prefixed.clone(),
                    ToolDescriptor {
                        spec: ToolSpec {
                            name: prefixed,
                            ..spec
                        },
                        source: source.clone(),
                        source_tool_name,
                    },
                );
            }
        }

        Ok(ProjectCache { descriptors, order })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedToolSource {
        specs: Vec<ToolSpec>,
        calls: AtomicUsize,
    }

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            description: None,
            input_schema: serde_json::json!({}),
        }
    }

    #[async_trait]
    impl ToolSource for FixedToolSource {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolSourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.specs.clone())
        }

        async fn call_tool(
            &self,
            name: &str,
            _arguments: Value,
        ) -> Result<ToolCallContent, ToolSourceError> {
            Ok(ToolCallContent::single(format!("called {}", name)))
        }
    }

    fn def_with_whitelist(whitelist: Vec<&str>) -> AgentDefinition {
        AgentDefinition {
            name: "agent".into(),
            project_id: "p1".into(),
            system_prompt: String::new(),
            model_name: None,
            temperature: None,
            max_tokens: None,
            tools_whitelist: whitelist.into_iter().map(String::from).collect(),
            max_steps: None,
            default_timeout: None,
            visibility: crate::model::Visibility::Project,
            flow_type: "react".into(),
            workspace_config: None,
            config: serde_json::json!({}),
            description: None,
        }
    }

    fn pool_with(specs: Vec<&str>) -> ToolPool {
        let builtin = Arc::new(FixedToolSource {
            specs: specs.into_iter().map(spec).collect(),
            calls: AtomicUsize::new(0),
        });
        ToolPool::new(builtin, Arc::new(EmptyMcpRegistry))
    }

    #[tokio::test]
    async fn empty_whitelist_is_legacy_permissive() {
        let pool = pool_with(vec!["read_file", "write_file"]);
        let resolved = pool.resolve("p1", None, 0, 2).await.unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[tokio::test]
    async fn star_overrides_remaining_entries() {
        let pool = pool_with(vec!["read_file", "write_file"]);
        let def = def_with_whitelist(vec!["*", "nonexistent"]);
        let resolved = pool.resolve("p1", Some(&def), 0, 2).await.unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[tokio::test]
    async fn glob_pattern_matches_and_unknown_name_is_skipped() {
        let pool = pool_with(vec!["read_file", "write_file", "exec_bash"]);
        let def = def_with_whitelist(vec!["*_file", "does_not_exist"]);
        let resolved = pool.resolve("p1", Some(&def), 0, 2).await.unwrap();
        let names: Vec<_> = resolved.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["read_file", "write_file"]);
    }

    #[tokio::test]
    async fn dedup_across_patterns() {
        let pool = pool_with(vec!["read_file"]);
        let def = def_with_whitelist(vec!["read_file", "read_*"]);
        let resolved = pool.resolve("p1", Some(&def), 0, 2).await.unwrap();
        assert_eq!(resolved.len(), 1);
    }

    #[tokio::test]
    async fn coordination_tool_allowed_unconditionally_at_depth_zero() {
        let pool = pool_with(vec!["spawn_agents"]);
        let resolved = pool.resolve("p1", None, 0, 2).await.unwrap();
        assert_eq!(resolved.len(), 1);
    }

    #[tokio::test]
    async fn coordination_tool_requires_explicit_whitelist_below_max_depth() {
        let pool = pool_with(vec!["spawn_agents", "read_file"]);
        let def = def_with_whitelist(vec!["*"]);
        let resolved = pool.resolve("p1", Some(&def), 1, 2).await.unwrap();
        let names: Vec<_> = resolved.iter().map(|t| t.name().to_string()).collect();
        assert!(!names.contains(&"spawn_agents".to_string()));

        let def = def_with_whitelist(vec!["*", "spawn_agents"]);
        let resolved = pool.resolve("p1", Some(&def), 1, 2).await.unwrap();
        let names: Vec<_> = resolved.iter().map(|t| t.name().to_string()).collect();
        assert!(names.contains(&"spawn_agents".to_string()));
    }

    #[tokio::test]
    async fn coordination_tool_never_allowed_at_or_past_max_depth() {
        let pool = pool_with(vec!["spawn_agents"]);
        let def = def_with_whitelist(vec!["spawn_agents"]);
        let resolved = pool.resolve("p1", Some(&def), 2, 2).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn max_depth_zero_defaults() {
        let pool = pool_with(vec!["spawn_agents"]);
        let def = def_with_whitelist(vec!["spawn_agents"]);
        // depth 2 should be blocked once max_depth defaults to DEFAULT_MAX_DEPTH (2).
        let resolved = pool.resolve("p1", Some(&def), 2, 0).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn cache_is_built_once_per_project() {
        let builtin = Arc::new(FixedToolSource {
            specs: vec![spec("read_file")],
            calls: AtomicUsize::new(0),
        });
        let pool = ToolPool::new(builtin.clone(), Arc::new(EmptyMcpRegistry));
        pool.resolve("p1", None, 0, 2).await.unwrap();
        pool.resolve("p1", None, 0, 2).await.unwrap();
        assert_eq!(builtin.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_rebuild() {
        let builtin = Arc::new(FixedToolSource {
            specs: vec![spec("read_file")],
            calls: AtomicUsize::new(0),
        });
        let pool = ToolPool::new(builtin.clone(), Arc::new(EmptyMcpRegistry));
        pool.resolve("p1", None, 0, 2).await.unwrap();
        pool.invalidate("p1").await;
        pool.resolve("p1", None, 0, 2).await.unwrap();
        assert_eq!(builtin.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn wraps_single_text_json_result() {
        let pool = pool_with(vec!["read_file"]);
        let resolved = pool.resolve("p1", None, 0, 2).await.unwrap();
        let tool = resolved.into_iter().find(|t| t.name() == "read_file").unwrap();
        // FixedToolSource always returns a plain (non-JSON) string, so it falls back to {result}.
        let v = tool.call(serde_json::json!({}), None).await;
        assert_eq!(v, serde_json::json!({ "result": "called read_file" }));
    }
}
