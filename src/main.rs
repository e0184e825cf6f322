use std::sync::Arc;

use alert_dispatcher::cache_store::InMemoryCacheStore;
use alert_dispatcher::config::DispatcherConfig;
use alert_dispatcher::event_store::DryRunEventStore;
use alert_dispatcher::explain;
use alert_dispatcher::notify::LogNotifier;
use alert_dispatcher::query_builder::{SearchQueryBuilder, TimeRange};
use alert_dispatcher::schema_cache::{MappingKind, MappingScope, SchemaTypeCache, StaticMappingSource};
use alert_dispatcher::serializer::{SerializerOptions, SqlSerializer};
use anyhow::Result;
use chrono::{Duration, Utc};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "dispatcher.json";

/// 优先使用JSON配置，失败时使用默认配置
fn load_config() -> DispatcherConfig {
    match DispatcherConfig::from_json_file(CONFIG_FILE) {
        Ok(config) => {
            println!("✅ 成功从 {} 加载配置, {} 个静态属性", CONFIG_FILE, config.properties.len());
            config
        }
        Err(e) => {
            println!("⚠️ 无法加载JSON配置文件 ({}), 使用默认配置", e);
            DispatcherConfig::default()
        }
    }
}

/// 最近 15 分钟的 WHERE 子句
async fn compile(line: &str, config: &DispatcherConfig, cache: &Arc<SchemaTypeCache>) -> String {
    // 每次编译都有自己的一次刷新额度
    let serializer = SqlSerializer::for_cache(
        Arc::clone(cache),
        SerializerOptions {
            use_tokenization: config.use_tokenization,
        },
    );
    let end = Utc::now();
    let range = TimeRange::new(end - Duration::minutes(15), end);
    SearchQueryBuilder::new(line, &serializer)
        .timestamp_in_between(&range, &config.timestamp)
        .build()
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("--- Alert Dispatcher: 搜索语句到 SQL 编译器 ---");
    let config = load_config();

    // 告警评估不连接事件存储，只打印生成的计数语句
    let events = Arc::new(DryRunEventStore::new());
    let evaluator = config.alert_evaluator(events.clone(), Arc::new(LogNotifier));
    if std::env::args().any(|arg| arg == "--watch") {
        info!(alerts = config.alerts.len(), "watching alerts");
        evaluator.run_periodically(config.tick_interval()).await;
        return Ok(());
    }

    let now = Utc::now();
    let cache = Arc::new(SchemaTypeCache::new(
        MappingKind::Logs,
        MappingScope {
            tenant: "local".to_string(),
            table: config.logs_table.clone(),
            since_ms: now.timestamp_millis() - (config.schema_lookback_secs as i64).saturating_mul(1000),
            until_ms: now.timestamp_millis(),
            table_version: None,
        },
        config.schema_ttl(),
        Arc::new(StaticMappingSource::new(config.properties.clone())),
        Arc::new(InMemoryCacheStore::new()),
    ));
    if let Err(err) = cache.init().await {
        warn!(error = %err, "property type mappings init failed");
    }

    println!("输入搜索语句, `:tick` 评估一次告警, `:quit` 退出");
    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("search> ") {
            Ok(line) => {
                let line = line.trim();
                if line == ":quit" {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                if line == ":tick" {
                    match evaluator.run_tick(Utc::now()).await {
                        Ok(summary) => println!("[告警]: {:?}", summary),
                        Err(err) => println!("❌ 无法读取告警: {}", err),
                    }
                    for sql in events.take_queries() {
                        println!("[SQL]: {}", sql);
                    }
                    continue;
                }

                println!("[含义]: {}", explain(line).await);
                println!("[WHERE]: {}", compile(line, &config, &cache).await);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
