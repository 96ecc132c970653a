//! End-to-end tests for the assist engine over an in-memory history

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use shellforge_common::config::AppConfig;
use shellforge_common::context::estimate_tokens;
use shellforge_common::errors::{AppError, Result};
use shellforge_common::llm::{GenerationOptions, LanguageModel, PromptBundle};
use shellforge_context::{AssistEngine, PromptRequest, TaskType};
use shellforge_search::retrieval::{Channel, HistoryEntry, HistoryStore, RankedResult, ResultPayload};
use shellforge_search::SearchProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn history() -> Arc<HistoryStore> {
    let now = Utc::now();
    let at = |mins: i64| now - ChronoDuration::minutes(mins);
    let dir = Some("/home/dev/proj".to_string());
    Arc::new(HistoryStore::from_entries(vec![
        HistoryEntry::new("sudo apt install ufw", dir.clone(), at(60), Some(0)),
        HistoryEntry::new("sudo ufw enable", dir.clone(), at(59), Some(0)),
        HistoryEntry::new("ls -la", Some("/tmp".to_string()), at(30), Some(0)),
        HistoryEntry::new("git status", dir.clone(), at(10), Some(0)),
        HistoryEntry::new("cargo build --release", dir, at(5), Some(101)),
    ]))
}

fn engine(config: AppConfig) -> AssistEngine {
    AssistEngine::builder(config)
        .with_history(history())
        .with_history_providers()
        .build()
        .unwrap()
}

struct SlowProvider;

#[async_trait]
impl SearchProvider for SlowProvider {
    async fn search(&self, channel: Channel, _query: &str, _limit: usize) -> Result<Vec<RankedResult>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(vec![RankedResult {
            id: "slow".into(),
            payload: ResultPayload::text("never seen"),
            score: 1.0,
            channel,
        }])
    }

    fn channel(&self) -> Channel {
        Channel::Graph
    }
}

/// Echoes the query after an optional delay
struct EchoModel {
    delay: Duration,
}

#[async_trait]
impl LanguageModel for EchoModel {
    async fn generate(&self, prompt: &PromptBundle, _options: &GenerationOptions) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("echo: {}", prompt.query))
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

fn engine_with_model(delay: Duration) -> AssistEngine {
    AssistEngine::builder(AppConfig::default())
        .with_history(history())
        .with_history_providers()
        .with_language_model(Arc::new(EchoModel { delay }))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_prompt_includes_grouped_context() {
    let engine = engine(AppConfig::default());
    let request = PromptRequest::new("install firewall").with_cwd("/home/dev/proj");

    let bundle = engine.prompt(&request).await.unwrap();
    assert_eq!(bundle.system, TaskType::Generic.system_prompt());
    assert_eq!(bundle.query, "install firewall");
    assert!(bundle.context.starts_with("Current directory: /home/dev/proj"));
    assert!(bundle.context.contains("Similar commands:"));
    assert!(bundle.context.contains("sudo apt install ufw"));
    assert!(bundle.context.contains("Recent commands:"));
    assert!(bundle.context.contains("Common in this directory:"));
    assert!(!bundle.context.contains("[context truncated]"));
}

#[tokio::test]
async fn test_slow_channel_does_not_block_prompt() {
    let mut config = AppConfig::default();
    config.providers.timeout_ms = Some(20);
    let engine = AssistEngine::builder(config)
        .with_history(history())
        .with_history_providers()
        .with_provider(Arc::new(SlowProvider))
        .build()
        .unwrap();

    let request = PromptRequest::new("enable ufw").with_cwd("/home/dev/proj");
    let bundle = tokio::time::timeout(Duration::from_secs(2), engine.prompt(&request))
        .await
        .expect("prompt blocked on slow provider")
        .unwrap();
    assert!(bundle.context.contains("ufw"));
    assert!(!bundle.context.contains("never seen"));
}

#[tokio::test]
async fn test_generation_timeout_leaves_cache_untouched() {
    let engine = engine_with_model(Duration::from_secs(5));
    let request = PromptRequest::new("git status").with_cwd("/home/dev/proj");

    engine.prompt(&request).await.unwrap();
    let before = engine.cache_stats();

    let options = GenerationOptions {
        timeout: Duration::from_millis(50),
        ..GenerationOptions::default()
    };
    let err = engine
        .assist_with_options(&request, &options, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::GenerationTimeout { timeout_ms: 50 }));

    let after = engine.cache_stats();
    assert_eq!(after.total.sets, before.total.sets);
    assert_eq!(after.total.size, before.total.size);
}

#[tokio::test]
async fn test_assist_returns_completion() {
    let engine = engine_with_model(Duration::ZERO);
    let request = PromptRequest::new("explain ls -la");

    let assistance = engine.assist(&request, &CancellationToken::new()).await.unwrap();
    assert_eq!(assistance.bundle.query, "Explain: explain ls -la");
    assert_eq!(assistance.completion, "echo: Explain: explain ls -la");
}

#[tokio::test]
async fn test_cancelled_generation() {
    let engine = engine_with_model(Duration::from_secs(5));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine
        .assist(&PromptRequest::new("list files"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
}

#[tokio::test]
async fn test_zero_budget_keeps_system_and_query() {
    let engine = engine(AppConfig::default());
    let request = PromptRequest::new("install firewall")
        .with_cwd("/home/dev/proj")
        .with_max_tokens(0);

    let bundle = engine.prompt(&request).await.unwrap();
    assert_eq!(bundle.context, "Current directory: /home/dev/proj");
    assert_eq!(bundle.query, "install firewall");
    assert!(!bundle.system.is_empty());

    let rendered = engine.assembler().build_prompt(&request).await.unwrap();
    assert!(rendered.contains("Current directory: /home/dev/proj"));
    assert!(rendered.ends_with("Query: install firewall"));
}

#[tokio::test]
async fn test_tight_budget_keeps_directory_line() {
    let engine = engine(AppConfig::default());
    for max_tokens in [1, 8, 16, 20, 24] {
        let request = PromptRequest::new("install firewall")
            .with_cwd("/home/dev/proj")
            .with_max_tokens(max_tokens);
        let bundle = engine.prompt(&request).await.unwrap();
        assert!(
            bundle.context.starts_with("Current directory: /home/dev/proj"),
            "budget {} lost the directory line: {:?}",
            max_tokens,
            bundle.context
        );
    }
}

#[tokio::test]
async fn test_compressed_prompt_fits_budget() {
    let engine = engine(AppConfig::default());
    let request = PromptRequest::new("install firewall")
        .with_cwd("/home/dev/proj")
        .with_max_tokens(40);

    let bundle = engine.prompt(&request).await.unwrap();
    let reserved = estimate_tokens(&bundle.system) + estimate_tokens(&bundle.query);
    assert!(bundle.context.starts_with("Current directory: /home/dev/proj\n\n"));
    assert!(estimate_tokens(&bundle.context) <= 40 - reserved);
}

#[tokio::test]
async fn test_recorded_command_is_retrievable() {
    let engine = engine(AppConfig::default());
    engine.record_command(HistoryEntry::new(
        "terraform apply -auto-approve",
        Some("/infra".to_string()),
        Utc::now(),
        Some(0),
    ));

    let bundle = engine
        .prompt(&PromptRequest::new("terraform").with_cwd("/infra"))
        .await
        .unwrap();
    assert!(bundle.context.contains("terraform apply -auto-approve"));
}

#[tokio::test]
async fn test_runtime_synonym_reaches_keyword_channel() {
    let engine = engine(AppConfig::default());
    engine.add_synonym("vcs", "git");

    let outcome = engine.retriever().retrieve("vcs", 5).await.unwrap();
    assert!(outcome.results.iter().any(|r| r.payload.text == "git status"));
}

#[tokio::test]
async fn test_maintenance_prunes_expired_entries() {
    let mut config = AppConfig::default();
    config.cache.ttl_seconds = Some(1);
    let engine = engine(config);

    engine
        .prompt(&PromptRequest::new("git status"))
        .await
        .unwrap();
    assert!(engine.cache_stats().total.size > 0);

    let token = CancellationToken::new();
    let handle = engine.spawn_maintenance(Duration::from_millis(50), token.clone());
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(engine.cache_stats().total.size, 0);

    token.cancel();
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_engine_serves_concurrent_prompts() {
    let engine = Arc::new(engine(AppConfig::default()));
    let queries = ["install firewall", "git status", "enable ufw", "cargo build", "list files"];

    let mut handles = Vec::new();
    for round in 0..4 {
        for query in queries {
            let engine = engine.clone();
            let request = PromptRequest::new(query).with_cwd("/home/dev/proj");
            handles.push(tokio::spawn(async move {
                if round % 2 == 1 {
                    tokio::task::yield_now().await;
                }
                engine.prompt(&request).await
            }));
        }
    }

    let total = handles.len();
    for handle in handles {
        let bundle = handle.await.unwrap().unwrap();
        assert!(bundle.context.starts_with("Current directory: /home/dev/proj"));
    }

    let stats = engine.cache_stats();
    assert!(stats.total.size <= stats.total.capacity);
    // Every prompt consults the fused cache at least once
    assert!(stats.total.hits + stats.total.misses >= total as u64);

    let before = engine.cache_stats().total.hits;
    engine
        .prompt(&PromptRequest::new("git status").with_cwd("/home/dev/proj"))
        .await
        .unwrap();
    assert!(engine.cache_stats().total.hits > before);
}
