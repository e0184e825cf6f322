//! 配置模块，负责加载JSON配置文件

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::alert::{Alert, Dashboard, InMemoryAlertStore, SavedSearch};
use crate::cache_store::InMemoryCacheStore;
use crate::evaluator::{AlertEvaluator, EvaluatorConfig};
use crate::event_store::EventStore;
use crate::notify::Notifier;
use crate::query_builder::TimestampColumn;
use crate::schema_cache::{ScalarType, SchemaCacheRegistry, StaticMappingSource, DEFAULT_TTL, DEV_TTL};

/// 回看时长上限，一年
const MAX_LOOKBACK_SECS: u64 = 365 * 24 * 60 * 60;

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置文件不存在: {}", .0.display())]
    Missing(PathBuf),

    #[error("无法读取配置文件 {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("无法解析JSON配置文件 {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 调度器配置，所有字段都有默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 告警链接指向的前端地址
    pub frontend_url: String,
    /// 开发模式下类型映射只缓存 5 秒
    pub dev_mode: bool,
    pub use_tokenization: bool,
    pub logs_table: String,
    pub timestamp: TimestampColumn,
    /// 推断属性类型时回看的时长 (秒)
    pub schema_lookback_secs: u64,
    pub tick_interval_secs: u64,
    /// 静态属性类型，演示程序用它代替事件存储
    pub properties: HashMap<String, ScalarType>,
    pub alerts: Vec<Alert>,
    pub saved_searches: Vec<SavedSearch>,
    pub dashboards: Vec<Dashboard>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:8080".to_string(),
            dev_mode: false,
            use_tokenization: false,
            logs_table: "log_stream".to_string(),
            timestamp: TimestampColumn::default(),
            schema_lookback_secs: 24 * 60 * 60,
            tick_interval_secs: 60,
            properties: HashMap::new(),
            alerts: Vec::new(),
            saved_searches: Vec::new(),
            dashboards: Vec::new(),
        }
    }
}

impl DispatcherConfig {
    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        // 检查文件是否存在
        if !path_ref.exists() {
            return Err(ConfigError::Missing(path_ref.to_path_buf()));
        }

        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path_ref.to_path_buf(),
            source,
        })
    }

    pub fn schema_ttl(&self) -> Duration {
        if self.dev_mode {
            DEV_TTL
        } else {
            DEFAULT_TTL
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn evaluator(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            frontend_url: self.frontend_url.clone(),
            use_tokenization: self.use_tokenization,
            schema_lookback: chrono::Duration::seconds(self.schema_lookback_secs.min(MAX_LOOKBACK_SECS) as i64),
        }
    }

    /// 配置中的告警、保存的搜索和仪表盘
    pub fn alert_store(&self) -> InMemoryAlertStore {
        let store = InMemoryAlertStore::new();
        for saved_search in &self.saved_searches {
            store.add_saved_search(saved_search.clone());
        }
        for dashboard in &self.dashboards {
            store.add_dashboard(dashboard.clone());
        }
        for alert in &self.alerts {
            store.add_alert(alert.clone());
        }
        store
    }

    /// 以进程内存储和静态属性类型组装告警评估器
    pub fn alert_evaluator(&self, events: Arc<dyn EventStore>, notifier: Arc<dyn Notifier>) -> AlertEvaluator {
        let schemas = SchemaCacheRegistry::new(
            self.schema_ttl(),
            Arc::new(StaticMappingSource::new(self.properties.clone())),
            Arc::new(InMemoryCacheStore::new()),
        );
        AlertEvaluator::new(
            Arc::new(self.alert_store()),
            events,
            Arc::new(schemas),
            notifier,
            self.evaluator(),
        )
    }
}
