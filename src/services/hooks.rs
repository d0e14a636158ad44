//! Task lifecycle hook registry.
//!
//! Hooks run around task execution phases and must never fail their caller:
//! each invocation runs in its own task under a wall-clock budget, and both
//! panics and timeouts surface only as failed [`HookOutcome`]s.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::pattern_collector::PatternCollector;

/// Phase a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Before a task starts
    Pre,
    /// After a task completes successfully
    Post,
    /// After a task fails
    Error,
}

/// Execution priority within a phase; higher runs earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HookPriority {
    Low,
    Normal,
    High,
}

/// Context handed to every hook invocation.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub phase: HookPhase,
    pub task_type: String,
    pub agent_id: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    /// Failure description for `Error`-phase runs
    pub error: Option<String>,
    /// Free-form variables for hook-specific data
    pub variables: HashMap<String, String>,
}

impl HookContext {
    pub fn for_completion(task_type: impl Into<String>, agent_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            phase: HookPhase::Post,
            task_type: task_type.into(),
            agent_id: Some(agent_id.into()),
            duration_ms,
            success: true,
            error: None,
            variables: HashMap::new(),
        }
    }

    pub fn for_error(
        task_type: impl Into<String>,
        agent_id: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            phase: HookPhase::Error,
            task_type: task_type.into(),
            agent_id,
            duration_ms: 0,
            success: false,
            error: Some(error.into()),
            variables: HashMap::new(),
        }
    }
}

/// Result of one hook invocation. Hooks report failure here; they do not
/// raise.
#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub hook: String,
    pub success: bool,
    pub metadata: serde_json::Value,
    pub error: Option<String>,
}

impl HookOutcome {
    pub fn ok(hook: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            hook: hook.into(),
            success: true,
            metadata,
            error: None,
        }
    }

    pub fn failed(hook: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            success: false,
            metadata: json!({}),
            error: Some(error.into()),
        }
    }
}

/// A registered lifecycle hook.
#[async_trait]
pub trait SwarmHook: Send + Sync {
    /// Unique registry name.
    fn name(&self) -> &str;

    /// Phases this hook subscribes to.
    fn phases(&self) -> Vec<HookPhase>;

    fn priority(&self) -> HookPriority {
        HookPriority::Normal
    }

    /// Execute for a matching phase. Must not panic; a panic is contained
    /// and reported as failure, but it is a bug in the hook.
    async fn run(&self, context: &HookContext) -> HookOutcome;
}

/// Registry executing hooks per phase, priority-ordered, under a timeout.
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn SwarmHook>>>,
    hook_timeout: Duration,
}

impl HookRegistry {
    pub fn new(hook_timeout_ms: u64) -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            hook_timeout: Duration::from_millis(hook_timeout_ms),
        }
    }

    /// Register a hook; rejects duplicate names. Returns whether added.
    pub async fn register(&self, hook: Arc<dyn SwarmHook>) -> bool {
        let mut hooks = self.hooks.write().await;
        if hooks.iter().any(|h| h.name() == hook.name()) {
            warn!(name = hook.name(), "duplicate hook registration rejected");
            return false;
        }
        hooks.push(hook);
        // Stable sort keeps registration order within a priority level.
        hooks.sort_by(|a, b| b.priority().cmp(&a.priority()));
        true
    }

    pub async fn hook_count(&self) -> usize {
        self.hooks.read().await.len()
    }

    /// Run every hook subscribed to `context.phase`.
    ///
    /// Each hook gets its own task and at most the configured timeout; a
    /// slow or panicking hook is reported failed without affecting the
    /// caller or the remaining hooks.
    pub async fn run_phase(&self, context: &HookContext) -> Vec<HookOutcome> {
        let hooks: Vec<Arc<dyn SwarmHook>> = {
            let hooks = self.hooks.read().await;
            hooks
                .iter()
                .filter(|h| h.phases().contains(&context.phase))
                .cloned()
                .collect()
        };

        let mut outcomes = Vec::with_capacity(hooks.len());
        for hook in hooks {
            let name = hook.name().to_string();
            let task_context = context.clone();
            let mut handle =
                tokio::spawn(async move { hook.run(&task_context).await });

            let outcome = match tokio::time::timeout(self.hook_timeout, &mut handle).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(join_error)) => {
                    warn!(hook = %name, "hook panicked");
                    HookOutcome::failed(&name, format!("hook panicked: {join_error}"))
                }
                Err(_) => {
                    // Over budget: cancel the hook so it cannot outlive its slot.
                    handle.abort();
                    warn!(hook = %name, timeout_ms = self.hook_timeout.as_millis() as u64, "hook timed out");
                    HookOutcome::failed(
                        &name,
                        format!("timed out after {}ms", self.hook_timeout.as_millis()),
                    )
                }
            };
            debug!(hook = %outcome.hook, success = outcome.success, "hook finished");
            outcomes.push(outcome);
        }
        outcomes
    }
}

// ============================================================================
// Pattern hook
// ============================================================================

/// Binds the pattern collector into the post-task phases.
///
/// Runs at `Post` and `Error` with `Low` priority so observability never
/// delays functional hooks.
pub struct PatternHook {
    collector: Arc<PatternCollector>,
}

impl PatternHook {
    pub fn new(collector: Arc<PatternCollector>) -> Self {
        Self { collector }
    }
}

#[async_trait]
impl SwarmHook for PatternHook {
    fn name(&self) -> &str {
        "pattern-collector"
    }

    fn phases(&self) -> Vec<HookPhase> {
        vec![HookPhase::Post, HookPhase::Error]
    }

    fn priority(&self) -> HookPriority {
        HookPriority::Low
    }

    async fn run(&self, context: &HookContext) -> HookOutcome {
        let agent = context.agent_id.as_deref().unwrap_or("unknown");
        let collected = match context.phase {
            HookPhase::Post => self.collector.collect_task_completion(
                &context.task_type,
                agent,
                context.duration_ms,
                context.success,
                0,
                0,
                json!({ "variables": context.variables }),
            ),
            HookPhase::Error => self.collector.collect_error_occurrence(
                &context.task_type,
                context.error.as_deref().unwrap_or("unknown error"),
                json!({ "agent": agent, "variables": context.variables }),
                None,
            ),
            HookPhase::Pre => None,
        };

        match collected {
            Some(pattern_id) => {
                HookOutcome::ok(self.name(), json!({ "pattern_id": pattern_id }))
            }
            None => HookOutcome::failed(self.name(), "pattern not collected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedHook {
        name: String,
        priority: HookPriority,
        log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SwarmHook for NamedHook {
        fn name(&self) -> &str {
            &self.name
        }

        fn phases(&self) -> Vec<HookPhase> {
            vec![HookPhase::Post]
        }

        fn priority(&self) -> HookPriority {
            self.priority
        }

        async fn run(&self, _context: &HookContext) -> HookOutcome {
            self.log.lock().unwrap().push(self.name.clone());
            HookOutcome::ok(&self.name, json!({}))
        }
    }

    struct SlowHook;

    #[async_trait]
    impl SwarmHook for SlowHook {
        fn name(&self) -> &str {
            "slow"
        }

        fn phases(&self) -> Vec<HookPhase> {
            vec![HookPhase::Post]
        }

        async fn run(&self, _context: &HookContext) -> HookOutcome {
            tokio::time::sleep(Duration::from_secs(60)).await;
            HookOutcome::ok("slow", json!({}))
        }
    }

    struct PanickyHook;

    #[async_trait]
    impl SwarmHook for PanickyHook {
        fn name(&self) -> &str {
            "panicky"
        }

        fn phases(&self) -> Vec<HookPhase> {
            vec![HookPhase::Post]
        }

        async fn run(&self, _context: &HookContext) -> HookOutcome {
            panic!("hook bug");
        }
    }

    fn post_context() -> HookContext {
        HookContext::for_completion("build", "a1", 42)
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let registry = HookRegistry::new(1000);
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        assert!(
            registry
                .register(Arc::new(NamedHook {
                    name: "h".into(),
                    priority: HookPriority::Normal,
                    log: Arc::clone(&log),
                }))
                .await
        );
        assert!(
            !registry
                .register(Arc::new(NamedHook {
                    name: "h".into(),
                    priority: HookPriority::High,
                    log,
                }))
                .await
        );
        assert_eq!(registry.hook_count().await, 1);
    }

    #[tokio::test]
    async fn test_hooks_run_in_priority_order() {
        let registry = HookRegistry::new(1000);
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for (name, priority) in [
            ("low", HookPriority::Low),
            ("high", HookPriority::High),
            ("normal", HookPriority::Normal),
        ] {
            registry
                .register(Arc::new(NamedHook {
                    name: name.into(),
                    priority,
                    log: Arc::clone(&log),
                }))
                .await;
        }

        let outcomes = registry.run_phase(&post_context()).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["high".to_string(), "normal".to_string(), "low".to_string()]
        );
    }

    #[tokio::test]
    async fn test_timeout_reported_not_raised() {
        let registry = HookRegistry::new(50);
        registry.register(Arc::new(SlowHook)).await;

        let outcomes = registry.run_phase(&post_context()).await;
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_panic_contained() {
        let registry = HookRegistry::new(1000);
        registry.register(Arc::new(PanickyHook)).await;
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        registry
            .register(Arc::new(NamedHook {
                name: "after".into(),
                priority: HookPriority::Low,
                log: Arc::clone(&log),
            }))
            .await;

        let outcomes = registry.run_phase(&post_context()).await;
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].success);
        // The panicking hook did not stop the rest of the phase.
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pattern_hook_records_completion() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Arc::new(PatternCollector::new(dir.path().join("patterns")));
        let hook = PatternHook::new(Arc::clone(&collector));

        let outcome = hook.run(&post_context()).await;
        assert!(outcome.success);
        assert!(outcome.metadata["pattern_id"]
            .as_str()
            .unwrap()
            .starts_with("pat-"));
        assert_eq!(collector.get_statistics().total_patterns, 1);
    }

    #[tokio::test]
    async fn test_pattern_hook_records_errors() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Arc::new(PatternCollector::new(dir.path().join("patterns")));
        let hook = PatternHook::new(Arc::clone(&collector));

        let context = HookContext::for_error("deploy", Some("a2".into()), "connection refused");
        let outcome = hook.run(&context).await;
        assert!(outcome.success);
        let stats = collector.get_statistics();
        assert_eq!(stats.by_type.get("error_occurrence"), Some(&1));
    }

    #[tokio::test]
    async fn test_pattern_hook_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a dir").unwrap();
        let hook = PatternHook::new(Arc::new(PatternCollector::new(blocker)));

        let outcome = hook.run(&post_context()).await;
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }
}
