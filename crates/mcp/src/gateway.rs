//! Aggregates many backend connections into one tool catalog.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::{StreamExt, stream},
    serde::Serialize,
    serde_json::Value,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    client::McpBackend,
    error::{GatewayError, McpError},
    types::{Implementation, McpToolDef, ToolCallResult},
};

/// Separator between server and tool in qualified names.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// How tool names from different backends are exposed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolNaming {
    /// Every tool is exposed as `<server>__<tool>`.
    #[default]
    Prefixed,
    /// Tools keep their own names unless more than one backend advertises the
    /// same name, in which case every claimant is qualified.
    Bare,
}

impl fmt::Display for ToolNaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prefixed => "prefixed",
            Self::Bare => "bare",
        })
    }
}

impl FromStr for ToolNaming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefixed" => Ok(Self::Prefixed),
            "bare" => Ok(Self::Bare),
            other => Err(format!("unknown tool naming '{other}' (expected prefixed or bare)")),
        }
    }
}

pub fn qualified_name(server: &str, tool: &str) -> String {
    format!("{server}{TOOL_NAME_SEPARATOR}{tool}")
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub naming: ToolNaming,
    /// Backends initialized/refreshed at the same time.
    pub refresh_concurrency: usize,
    /// Per-backend bound on one refresh (initialize + tools/list) and on one call.
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            naming: ToolNaming::Prefixed,
            refresh_concurrency: 8,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A tool in the aggregate catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedTool {
    /// Name clients call it by.
    pub name: String,
    pub server: String,
    /// Name on the backend.
    pub original_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Per-backend view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub transport: String,
    pub initialized: bool,
    pub available: bool,
    pub tool_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Backend tools not exposed because an earlier server already owns the
    /// exposed name.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shadowed_tools: Vec<String>,
}

/// Outcome of one refresh round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub available: Vec<String>,
    /// `(server, reason)` for every backend that failed this round.
    pub unavailable: Vec<(String, String)>,
}

struct Entry {
    backend: Arc<dyn McpBackend>,
    available: AtomicBool,
    last_error: RwLock<Option<String>>,
    /// Tools from the last successful refresh, kept while unavailable.
    known: RwLock<Vec<McpToolDef>>,
    /// Held while connecting or refreshing this backend.
    connecting: Mutex<()>,
}

impl Entry {
    fn mark_available(&self, tools: Vec<McpToolDef>) {
        *self.known.write().unwrap_or_else(PoisonError::into_inner) = tools;
        self.available.store(true, Ordering::SeqCst);
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn mark_unavailable(&self, reason: String) {
        self.available.store(false, Ordering::SeqCst);
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn known_tools(&self) -> Vec<McpToolDef> {
        self.known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Default)]
struct Catalog {
    tools: Vec<AggregatedTool>,
    /// Exposed name → (entry index, backend tool name).
    routes: HashMap<String, (usize, String)>,
    /// Names last advertised by backends that are now unavailable. Calling
    /// one reconnects the backend before routing.
    dormant: HashMap<String, usize>,
    /// Entry index → backend tool names that lost an exposed-name clash.
    shadowed: HashMap<usize, Vec<String>>,
}

/// The aggregating gateway.
pub struct Gateway {
    entries: Vec<Entry>,
    config: GatewayConfig,
    catalog: RwLock<Catalog>,
}

impl Gateway {
    pub fn new(backends: Vec<Arc<dyn McpBackend>>, config: GatewayConfig) -> Self {
        let entries = backends
            .into_iter()
            .map(|backend| Entry {
                backend,
                available: AtomicBool::new(false),
                last_error: RwLock::new(None),
                known: RwLock::new(Vec::new()),
                connecting: Mutex::new(()),
            })
            .collect();
        Self {
            entries,
            config,
            catalog: RwLock::new(Catalog::default()),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Initialize (when needed) and re-list every backend, concurrently.
    ///
    /// Backends that fail or time out are marked unavailable and drop out of
    /// the catalog; the others are unaffected.
    pub async fn refresh(&self) -> RefreshReport {
        let results: Vec<(usize, Result<usize, String>)> = stream::iter(0..self.entries.len())
            .map(|idx| async move {
                let entry = &self.entries[idx];
                let _connecting = entry.connecting.lock().await;
                (idx, self.sync_entry(entry).await)
            })
            .buffer_unordered(self.config.refresh_concurrency.max(1))
            .collect()
            .await;

        let mut report = RefreshReport::default();
        for (idx, outcome) in results {
            let name = self.entries[idx].backend.name().to_string();
            match outcome {
                Ok(_) => report.available.push(name),
                Err(reason) => report.unavailable.push((name, reason)),
            }
        }
        report.available.sort();
        report.unavailable.sort();

        self.rebuild_catalog();
        info!(
            available = report.available.len(),
            unavailable = report.unavailable.len(),
            tools = self.tool_count(),
            "tool catalog refreshed"
        );
        report
    }

    /// Bring one backend up to date and record the outcome on its entry.
    /// Callers hold `entry.connecting`.
    async fn sync_entry(&self, entry: &Entry) -> Result<usize, String> {
        let backend = &entry.backend;
        let timeout = self.config.timeout;
        let outcome = tokio::time::timeout(timeout, async {
            if !backend.is_initialized() {
                backend.initialize().await?;
            }
            backend.refresh_tools().await
        })
        .await;
        let outcome = match outcome {
            Ok(Ok(tools)) => Ok(tools),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}s", timeout.as_secs_f32())),
        };

        let server = backend.name();
        match outcome {
            Ok(tools) => {
                let count = tools.len();
                debug!(server, tools = count, "backend refreshed");
                entry.mark_available(tools);
                Ok(count)
            },
            Err(reason) => {
                warn!(server, error = %reason, "backend unavailable");
                entry.mark_unavailable(reason.clone());
                Err(reason)
            },
        }
    }

    /// Reconnect a backend on behalf of a tool call. Callers that queue up
    /// behind an attempt that succeeded reuse it.
    async fn reconnect(&self, idx: usize) -> Result<(), GatewayError> {
        let entry = &self.entries[idx];
        let _connecting = entry.connecting.lock().await;
        if entry.is_available() && entry.backend.is_initialized() {
            return Ok(());
        }
        info!(server = %entry.backend.name(), "reconnecting backend for tool call");
        let outcome = self.sync_entry(entry).await;
        self.rebuild_catalog();
        outcome
            .map(|_| ())
            .map_err(|reason| GatewayError::BackendUnavailable {
                server: entry.backend.name().to_string(),
                reason,
            })
    }

    fn rebuild_catalog(&self) {
        let known: Vec<(usize, &Entry, Vec<McpToolDef>)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, e)| (idx, e, e.known_tools()))
            .collect();

        let mut claimants: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, entry, tools) in &known {
            if entry.is_available() {
                for tool in tools {
                    *claimants.entry(tool.name.as_str()).or_default() += 1;
                }
            }
        }

        let mut catalog = Catalog::default();
        for (idx, entry, tools) in known.iter().filter(|(_, e, _)| e.is_available()) {
            let server = entry.backend.name();
            for tool in tools {
                let exposed = match self.config.naming {
                    ToolNaming::Bare if claimants.get(tool.name.as_str()) == Some(&1) => {
                        tool.name.clone()
                    },
                    _ => qualified_name(server, &tool.name),
                };
                if catalog.routes.contains_key(&exposed) {
                    warn!(
                        tool = %exposed,
                        server,
                        "exposed tool name already owned by another server, not exposing"
                    );
                    catalog
                        .shadowed
                        .entry(*idx)
                        .or_default()
                        .push(tool.name.clone());
                    continue;
                }
                catalog
                    .routes
                    .insert(exposed.clone(), (*idx, tool.name.clone()));
                catalog.tools.push(AggregatedTool {
                    name: exposed,
                    server: server.to_string(),
                    original_name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                });
            }
        }
        catalog.tools.sort_by(|a, b| a.name.cmp(&b.name));

        for (idx, entry, tools) in known.iter().filter(|(_, e, _)| !e.is_available()) {
            let server = entry.backend.name();
            for tool in tools {
                let mut names = vec![qualified_name(server, &tool.name)];
                if self.config.naming == ToolNaming::Bare {
                    names.push(tool.name.clone());
                }
                for name in names {
                    if !catalog.routes.contains_key(&name) {
                        catalog.dormant.entry(name).or_insert(*idx);
                    }
                }
            }
        }

        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog;
    }

    /// Current aggregate catalog. Excludes unavailable backends.
    pub fn tools(&self) -> Vec<AggregatedTool> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tools
            .clone()
    }

    pub fn tool_count(&self) -> usize {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tools
            .len()
    }

    fn route(&self, name: &str) -> Option<(usize, String)> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .routes
            .get(name)
            .cloned()
    }

    fn dormant_route(&self, name: &str) -> Option<usize> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dormant
            .get(name)
            .copied()
    }

    /// Route a call by exposed name.
    ///
    /// A name last advertised by a backend that has since gone unavailable
    /// reconnects that backend first. Names no backend ever advertised never
    /// reach a backend.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, GatewayError> {
        let (idx, original) = match self.route(name) {
            Some((idx, original)) => {
                if !self.entries[idx].backend.is_initialized() {
                    self.reconnect(idx).await?;
                }
                (idx, original)
            },
            None => {
                let Some(idx) = self.dormant_route(name) else {
                    return Err(GatewayError::ToolNotFound(name.to_string()));
                };
                self.reconnect(idx).await?;
                self.route(name)
                    .ok_or_else(|| GatewayError::ToolNotFound(name.to_string()))?
            },
        };
        let entry = &self.entries[idx];
        let server = entry.backend.name().to_string();

        debug!(tool = name, server = %server, "routing tool call");
        let result = match tokio::time::timeout(
            self.config.timeout,
            entry.backend.call_tool(&original, arguments),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                method: "tools/call".into(),
            }),
        };

        match result {
            Ok(result) => Ok(result),
            Err(e) if e.is_connection_failure() => {
                let reason = e.to_string();
                warn!(server = %server, error = %reason, "backend connection failed during call");
                entry.mark_unavailable(reason.clone());
                self.rebuild_catalog();
                Err(GatewayError::BackendUnavailable { server, reason })
            },
            Err(source) => Err(GatewayError::Backend { server, source }),
        }
    }

    pub fn servers(&self) -> Vec<ServerStatus> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, e)| ServerStatus {
                name: e.backend.name().to_string(),
                transport: e.backend.transport().to_string(),
                initialized: e.backend.is_initialized(),
                available: e.is_available(),
                tool_count: catalog.routes.values().filter(|(i, _)| *i == idx).count(),
                server_info: e.backend.server_info(),
                last_error: e
                    .last_error
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
                shadowed_tools: catalog.shadowed.get(&idx).cloned().unwrap_or_default(),
            })
            .collect()
    }

    pub async fn close(&self) {
        futures::future::join_all(self.entries.iter().map(|e| e.backend.close())).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        gridctl_config::Transport,
        serde_json::json,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// Backend fake with switchable failure and call counting.
    struct MockBackend {
        name: String,
        tools: Vec<McpToolDef>,
        cached: Mutex<Vec<McpToolDef>>,
        initialized: AtomicBool,
        failing: AtomicBool,
        hang: AtomicBool,
        calls: AtomicUsize,
    }

    impl MockBackend {
        fn new(name: &str, tools: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                tools: tools
                    .iter()
                    .map(|t| McpToolDef {
                        name: (*t).into(),
                        description: None,
                        input_schema: json!({"type": "object"}),
                    })
                    .collect(),
                cached: Mutex::new(Vec::new()),
                initialized: AtomicBool::new(false),
                failing: AtomicBool::new(false),
                hang: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            })
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl McpBackend for MockBackend {
        fn name(&self) -> &str {
            &self.name
        }

        fn transport(&self) -> Transport {
            Transport::Http
        }

        async fn initialize(&self) -> Result<(), McpError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(McpError::Closed);
            }
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn refresh_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(McpError::Http {
                    status: 502,
                    body: "down".into(),
                });
            }
            *self.cached.lock().unwrap() = self.tools.clone();
            Ok(self.tools.clone())
        }

        fn tools(&self) -> Vec<McpToolDef> {
            self.cached.lock().unwrap().clone()
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(McpError::Closed);
            }
            Ok(ToolCallResult::text(format!("{}:{name}:{arguments}", self.name)))
        }

        fn is_initialized(&self) -> bool {
            self.initialized.load(Ordering::SeqCst)
        }

        fn server_info(&self) -> Option<Implementation> {
            None
        }
    }

    fn gateway(backends: &[Arc<MockBackend>], naming: ToolNaming) -> Gateway {
        Gateway::new(
            backends
                .iter()
                .map(|b| Arc::clone(b) as Arc<dyn McpBackend>)
                .collect(),
            GatewayConfig {
                naming,
                timeout: Duration::from_millis(200),
                ..Default::default()
            },
        )
    }

    fn names(gw: &Gateway) -> Vec<String> {
        gw.tools().into_iter().map(|t| t.name).collect()
    }

    #[tokio::test]
    async fn prefixed_naming_qualifies_everything() {
        let search = MockBackend::new("search", &["query"]);
        let fetch = MockBackend::new("fetch", &["get", "query"]);
        let gw = gateway(&[search, fetch], ToolNaming::Prefixed);

        gw.refresh().await;
        assert_eq!(names(&gw), vec!["fetch__get", "fetch__query", "search__query"]);
    }

    #[tokio::test]
    async fn bare_naming_qualifies_only_collisions() {
        let search = MockBackend::new("search", &["query"]);
        let fetch = MockBackend::new("fetch", &["get", "query"]);
        let gw = gateway(&[search, fetch], ToolNaming::Bare);

        gw.refresh().await;
        assert_eq!(names(&gw), vec!["fetch__query", "get", "search__query"]);
    }

    #[tokio::test]
    async fn unavailable_backend_is_excluded_then_restored() {
        let search = MockBackend::new("search", &["query"]);
        let fetch = MockBackend::new("fetch", &["get"]);
        fetch.set_failing(true);
        let gw = gateway(&[search.clone(), fetch.clone()], ToolNaming::Prefixed);

        let report = gw.refresh().await;
        assert_eq!(report.available, vec!["search"]);
        assert_eq!(report.unavailable.len(), 1);
        assert_eq!(names(&gw), vec!["search__query"]);
        let status = gw.servers();
        assert!(!status[1].available);
        assert!(status[1].last_error.is_some());

        fetch.set_failing(false);
        gw.refresh().await;
        assert_eq!(names(&gw), vec!["fetch__get", "search__query"]);
        assert!(gw.servers().iter().all(|s| s.available && s.last_error.is_none()));
    }

    #[tokio::test]
    async fn slow_backend_times_out_without_blocking_others() {
        let search = MockBackend::new("search", &["query"]);
        let slow = MockBackend::new("slow", &["wait"]);
        slow.hang.store(true, Ordering::SeqCst);
        let gw = gateway(&[search, slow], ToolNaming::Prefixed);

        let report = gw.refresh().await;
        assert_eq!(report.available, vec!["search"]);
        assert!(report.unavailable[0].1.contains("timed out"));
    }

    #[tokio::test]
    async fn call_routes_to_owning_backend() {
        let search = MockBackend::new("search", &["query"]);
        let fetch = MockBackend::new("fetch", &["query"]);
        let gw = gateway(&[search.clone(), fetch.clone()], ToolNaming::Bare);
        gw.refresh().await;

        let result = gw
            .call_tool("fetch__query", json!({"q": "rust"}))
            .await
            .unwrap();
        assert_eq!(result, ToolCallResult::text(r#"fetch:query:{"q":"rust"}"#));
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fetch.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found_and_calls_nothing() {
        let search = MockBackend::new("search", &["query"]);
        let gw = gateway(&[search.clone()], ToolNaming::Prefixed);
        gw.refresh().await;

        let err = gw.call_tool("query", json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::ToolNotFound(ref n) if n == "query"));
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connection_failure_during_call_marks_backend_unavailable() {
        let search = MockBackend::new("search", &["query"]);
        let gw = gateway(&[search.clone()], ToolNaming::Prefixed);
        gw.refresh().await;

        search.set_failing(true);
        let err = gw.call_tool("search__query", json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable { .. }));
        assert!(gw.tools().is_empty());
    }

    #[tokio::test]
    async fn call_after_recovery_reconnects_backend() {
        let search = MockBackend::new("search", &["query"]);
        let gw = gateway(&[search.clone()], ToolNaming::Prefixed);
        gw.refresh().await;

        search.set_failing(true);
        let err = gw.call_tool("search__query", json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable { .. }));

        search.set_failing(false);
        let result = gw
            .call_tool("search__query", json!({"q": 1}))
            .await
            .unwrap();
        assert_eq!(result, ToolCallResult::text(r#"search:query:{"q":1}"#));
        assert_eq!(search.calls.load(Ordering::SeqCst), 2);
        assert_eq!(names(&gw), vec!["search__query"]);
        assert!(gw.servers()[0].available);
    }

    #[tokio::test]
    async fn call_while_backend_stays_down_does_not_reach_it() {
        let search = MockBackend::new("search", &["query"]);
        let gw = gateway(&[search.clone()], ToolNaming::Prefixed);
        gw.refresh().await;

        search.set_failing(true);
        gw.call_tool("search__query", json!({})).await.unwrap_err();
        let err = gw.call_tool("search__query", json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable { ref server, .. } if server == "search"));
        assert_eq!(search.calls.load(Ordering::SeqCst), 1);
        assert!(gw.tools().is_empty());
        assert!(gw.servers()[0].last_error.is_some());
    }

    #[tokio::test]
    async fn bare_name_of_refresh_failed_backend_reconnects_on_call() {
        let search = MockBackend::new("search", &["query"]);
        let gw = gateway(&[search.clone()], ToolNaming::Bare);
        gw.refresh().await;

        search.set_failing(true);
        gw.refresh().await;
        assert!(gw.tools().is_empty());

        search.set_failing(false);
        gw.call_tool("query", json!({})).await.unwrap();
        assert_eq!(names(&gw), vec!["query"]);
    }

    #[tokio::test]
    async fn timed_out_call_keeps_backend_listed() {
        let slow = MockBackend::new("slow", &["wait"]);
        let gw = gateway(&[slow.clone()], ToolNaming::Prefixed);
        gw.refresh().await;

        slow.hang.store(true, Ordering::SeqCst);
        let err = gw.call_tool("slow__wait", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Backend {
                source: McpError::Timeout { .. },
                ..
            }
        ));
        assert_eq!(names(&gw), vec!["slow__wait"]);
        assert!(gw.servers()[0].available);
    }

    #[tokio::test]
    async fn prefixed_clash_keeps_first_server_and_reports_the_other() {
        let a = MockBackend::new("a", &["b__c"]);
        let ab = MockBackend::new("a__b", &["c"]);
        let gw = gateway(&[a.clone(), ab.clone()], ToolNaming::Prefixed);
        gw.refresh().await;

        assert_eq!(names(&gw), vec!["a__b__c"]);
        let servers = gw.servers();
        assert!(servers[0].shadowed_tools.is_empty());
        assert_eq!(servers[1].shadowed_tools, vec!["c"]);
        assert_eq!(servers[1].tool_count, 0);

        gw.call_tool("a__b__c", json!({})).await.unwrap();
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ab.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tool_naming_parse() {
        assert_eq!("bare".parse::<ToolNaming>().unwrap(), ToolNaming::Bare);
        assert_eq!(ToolNaming::default().to_string(), "prefixed");
        assert!("short".parse::<ToolNaming>().is_err());
    }
}
