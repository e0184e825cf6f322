//! Alert definitions, their sources and evaluation history

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::AlertStoreError;
use crate::query_builder::TimestampColumn;

/// 告警的检查周期，同时也是窗口大小
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl AlertInterval {
    pub fn minutes(&self) -> u32 {
        match self {
            AlertInterval::OneMinute => 1,
            AlertInterval::FiveMinutes => 5,
            AlertInterval::FifteenMinutes => 15,
            AlertInterval::ThirtyMinutes => 30,
            AlertInterval::OneHour => 60,
            AlertInterval::SixHours => 6 * 60,
            AlertInterval::TwelveHours => 12 * 60,
            AlertInterval::OneDay => 24 * 60,
        }
    }

    /// Chart granularity label used in dashboard links
    pub fn granularity(&self) -> &'static str {
        match self {
            AlertInterval::OneMinute => "1 minute",
            AlertInterval::FiveMinutes => "5 minute",
            AlertInterval::FifteenMinutes => "15 minute",
            AlertInterval::ThirtyMinutes => "30 minute",
            AlertInterval::OneHour => "1 hour",
            AlertInterval::SixHours => "6 hour",
            AlertInterval::TwelveHours => "12 hour",
            AlertInterval::OneDay => "1 day",
        }
    }
}

/// `Above` is a presence alert, `Below` an absence alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdType {
    Above,
    Below,
}

/// Presence fires at or above the threshold, absence strictly below it
pub fn does_exceed_threshold(threshold_type: ThresholdType, threshold: f64, value: f64) -> bool {
    match threshold_type {
        ThresholdType::Above => value >= threshold,
        ThresholdType::Below => value < threshold,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    #[default]
    Ok,
    Alert,
    Disabled,
    InsufficientData,
}

/// 告警的数据来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertSource {
    Search { saved_search_id: String },
    Tile { dashboard_id: String, tile_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertChannel {
    Webhook { webhook_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Silence {
    pub until: DateTime<Utc>,
    #[serde(default)]
    pub by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub tenant: String,
    pub interval: AlertInterval,
    pub threshold: f64,
    pub threshold_type: ThresholdType,
    pub source: AlertSource,
    pub channel: AlertChannel,
    #[serde(default)]
    pub state: AlertState,
    /// Only used by saved-search alerts; tiles carry their own
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub silenced: Option<Silence>,
}

impl Alert {
    pub fn is_silenced(&self, now: DateTime<Utc>) -> bool {
        self.silenced.as_ref().is_some_and(|silence| silence.until > now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSearch {
    pub id: String,
    pub name: String,
    pub query: String,
    pub table: String,
    #[serde(default)]
    pub timestamp: TimestampColumn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayType {
    Line,
    StackedBar,
    Table,
    Number,
    Markdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub id: String,
    pub name: String,
    pub display_type: DisplayType,
    #[serde(default)]
    pub query: String,
    pub table: String,
    #[serde(default)]
    pub timestamp: TimestampColumn,
    #[serde(default)]
    pub group_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: String,
    pub name: String,
    pub tiles: Vec<Tile>,
}

impl Dashboard {
    pub fn tile(&self, tile_id: &str) -> Option<&Tile> {
        self.tiles.iter().find(|tile| tile.id == tile_id)
    }
}

/// 单个时间桶的观测值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastValue {
    pub start_time: DateTime<Utc>,
    pub count: f64,
}

/// 一次评估的记录。`(alert_id, created_at)` 唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertHistory {
    pub alert_id: String,
    pub created_at: DateTime<Utc>,
    /// Number of buckets that breached the threshold
    pub counts: u32,
    pub last_values: Vec<LastValue>,
    pub state: AlertState,
}

impl AlertHistory {
    pub fn new(alert_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            alert_id: alert_id.into(),
            created_at,
            counts: 0,
            last_values: Vec::new(),
            state: AlertState::Ok,
        }
    }
}

/// Persistence of alerts, their targets and history
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn alerts(&self) -> Result<Vec<Alert>, AlertStoreError>;

    async fn saved_search(&self, id: &str) -> Result<Option<SavedSearch>, AlertStoreError>;

    async fn dashboard(&self, id: &str) -> Result<Option<Dashboard>, AlertStoreError>;

    async fn latest_history(&self, alert_id: &str) -> Result<Option<AlertHistory>, AlertStoreError>;

    /// Fails with [`AlertStoreError::DuplicateHistory`] when the window was already recorded
    async fn insert_history(&self, history: AlertHistory) -> Result<(), AlertStoreError>;

    async fn update_history(&self, history: &AlertHistory) -> Result<(), AlertStoreError>;

    async fn set_state(&self, alert_id: &str, state: AlertState) -> Result<(), AlertStoreError>;
}

/// 进程内的告警存储，用于测试和演示
#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<BTreeMap<String, Alert>>,
    saved_searches: RwLock<BTreeMap<String, SavedSearch>>,
    dashboards: RwLock<BTreeMap<String, Dashboard>>,
    histories: Mutex<Vec<AlertHistory>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_alert(&self, alert: Alert) {
        self.alerts.write().insert(alert.id.clone(), alert);
    }

    pub fn add_saved_search(&self, saved_search: SavedSearch) {
        self.saved_searches.write().insert(saved_search.id.clone(), saved_search);
    }

    pub fn add_dashboard(&self, dashboard: Dashboard) {
        self.dashboards.write().insert(dashboard.id.clone(), dashboard);
    }

    pub fn alert(&self, id: &str) -> Option<Alert> {
        self.alerts.read().get(id).cloned()
    }

    /// History rows of one alert, oldest first
    pub fn histories(&self, alert_id: &str) -> Vec<AlertHistory> {
        let mut rows: Vec<_> = self
            .histories
            .lock()
            .iter()
            .filter(|history| history.alert_id == alert_id)
            .cloned()
            .collect();
        rows.sort_by_key(|history| history.created_at);
        rows
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn alerts(&self) -> Result<Vec<Alert>, AlertStoreError> {
        Ok(self.alerts.read().values().cloned().collect())
    }

    async fn saved_search(&self, id: &str) -> Result<Option<SavedSearch>, AlertStoreError> {
        Ok(self.saved_searches.read().get(id).cloned())
    }

    async fn dashboard(&self, id: &str) -> Result<Option<Dashboard>, AlertStoreError> {
        Ok(self.dashboards.read().get(id).cloned())
    }

    async fn latest_history(&self, alert_id: &str) -> Result<Option<AlertHistory>, AlertStoreError> {
        Ok(self
            .histories
            .lock()
            .iter()
            .filter(|history| history.alert_id == alert_id)
            .max_by_key(|history| history.created_at)
            .cloned())
    }

    async fn insert_history(&self, history: AlertHistory) -> Result<(), AlertStoreError> {
        let mut histories = self.histories.lock();
        let exists = histories
            .iter()
            .any(|row| row.alert_id == history.alert_id && row.created_at == history.created_at);
        if exists {
            return Err(AlertStoreError::DuplicateHistory {
                alert_id: history.alert_id,
                created_at: history.created_at,
            });
        }
        histories.push(history);
        Ok(())
    }

    async fn update_history(&self, history: &AlertHistory) -> Result<(), AlertStoreError> {
        let mut histories = self.histories.lock();
        match histories
            .iter_mut()
            .find(|row| row.alert_id == history.alert_id && row.created_at == history.created_at)
        {
            Some(row) => {
                *row = history.clone();
                Ok(())
            }
            None => Err(AlertStoreError::AlertNotFound(history.alert_id.clone())),
        }
    }

    async fn set_state(&self, alert_id: &str, state: AlertState) -> Result<(), AlertStoreError> {
        match self.alerts.write().get_mut(alert_id) {
            Some(alert) => {
                alert.state = state;
                Ok(())
            }
            None => Err(AlertStoreError::AlertNotFound(alert_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn alert_json() -> &'static str {
        r#"{
            "id": "a1",
            "tenant": "team",
            "interval": "15m",
            "threshold": 8,
            "threshold_type": "above",
            "source": {"type": "search", "saved_search_id": "s1"},
            "channel": {"type": "webhook", "webhook_id": "w1"}
        }"#
    }

    #[test]
    fn test_deserialize_alert_with_defaults() {
        let alert: Alert = serde_json::from_str(alert_json()).unwrap();
        assert_eq!(alert.interval, AlertInterval::FifteenMinutes);
        assert_eq!(alert.interval.minutes(), 15);
        assert_eq!(alert.threshold_type, ThresholdType::Above);
        assert_eq!(alert.state, AlertState::Ok);
        assert_eq!(
            alert.source,
            AlertSource::Search {
                saved_search_id: "s1".to_string()
            }
        );
        assert!(alert.group_by.is_none());
    }

    #[test]
    fn test_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&AlertState::InsufficientData).unwrap(),
            "\"INSUFFICIENT_DATA\""
        );
        assert_eq!(AlertInterval::OneDay.minutes(), 1440);
        assert_eq!(AlertInterval::SixHours.granularity(), "6 hour");
    }

    #[test]
    fn test_threshold_rule() {
        assert!(does_exceed_threshold(ThresholdType::Above, 8.0, 8.0));
        assert!(!does_exceed_threshold(ThresholdType::Above, 8.0, 7.0));
        assert!(does_exceed_threshold(ThresholdType::Below, 8.0, 7.0));
        assert!(!does_exceed_threshold(ThresholdType::Below, 8.0, 8.0));
    }

    #[test]
    fn test_silence_window() {
        let mut alert: Alert = serde_json::from_str(alert_json()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert!(!alert.is_silenced(now));

        alert.silenced = Some(Silence {
            until: Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap(),
            by: None,
        });
        assert!(alert.is_silenced(now));
        assert!(!alert.is_silenced(Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_history_is_unique_per_window() {
        let store = InMemoryAlertStore::new();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        store.insert_history(AlertHistory::new("a1", at)).await.unwrap();

        let err = store.insert_history(AlertHistory::new("a1", at)).await.unwrap_err();
        assert!(matches!(err, AlertStoreError::DuplicateHistory { .. }));

        // 其他告警同一时刻不冲突
        store.insert_history(AlertHistory::new("a2", at)).await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_history_and_update() {
        let store = InMemoryAlertStore::new();
        let first = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 3, 1, 12, 15, 0).unwrap();
        store.insert_history(AlertHistory::new("a1", second)).await.unwrap();
        store.insert_history(AlertHistory::new("a1", first)).await.unwrap();

        let mut latest = store.latest_history("a1").await.unwrap().unwrap();
        assert_eq!(latest.created_at, second);

        latest.counts = 2;
        latest.state = AlertState::Alert;
        store.update_history(&latest).await.unwrap();
        let rows = store.histories("a1");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].counts, 2);
        assert_eq!(rows[1].state, AlertState::Alert);
        assert!(store.latest_history("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_state() {
        let store = InMemoryAlertStore::new();
        store.add_alert(serde_json::from_str(alert_json()).unwrap());
        store.set_state("a1", AlertState::Alert).await.unwrap();
        assert_eq!(store.alert("a1").unwrap().state, AlertState::Alert);
        assert!(matches!(
            store.set_state("nope", AlertState::Ok).await,
            Err(AlertStoreError::AlertNotFound(_))
        ));
    }
}
