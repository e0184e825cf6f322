//! Alert notification messages and delivery

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::alert::{does_exceed_threshold, Alert, AlertChannel, Dashboard, SavedSearch, ThresholdType, Tile};
use crate::error::NotifyError;

/// 发送到渠道的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub title: String,
    pub body: String,
    pub link: String,
}

/// What the alert was evaluated against
#[derive(Debug, Clone, Copy)]
pub enum AlertTarget<'a> {
    Search(&'a SavedSearch),
    Tile { dashboard: &'a Dashboard, tile: &'a Tile },
}

/// One breaching bucket, rendered into an [`AlertMessage`]
#[derive(Debug, Clone, Copy)]
pub struct MessageView<'a> {
    pub alert: &'a Alert,
    pub target: AlertTarget<'a>,
    /// Group label, e.g. `group:api`; empty when the alert is not grouped
    pub group: &'a str,
    pub value: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl MessageView<'_> {
    fn comparison(&self) -> &'static str {
        let exceeded = does_exceed_threshold(self.alert.threshold_type, self.alert.threshold, self.value);
        match (exceeded, self.alert.threshold_type) {
            (true, ThresholdType::Above) | (false, ThresholdType::Below) => "exceeds",
            (true, ThresholdType::Below) | (false, ThresholdType::Above) => "falls below",
        }
    }

    pub fn title(&self) -> String {
        match self.target {
            AlertTarget::Search(saved_search) => {
                format!("Alert for \"{}\" - {} lines found", saved_search.name, self.value)
            }
            AlertTarget::Tile { dashboard, tile } => format!(
                "Alert for \"{}\" in \"{}\" - {} {} {}",
                tile.name,
                dashboard.name,
                self.value,
                self.comparison(),
                self.alert.threshold
            ),
        }
    }

    pub fn body(&self) -> String {
        let group = if self.group.is_empty() {
            String::new()
        } else {
            format!("Group: \"{}\"", self.group)
        };
        match self.target {
            AlertTarget::Search(_) => {
                let expected = match self.alert.threshold_type {
                    ThresholdType::Above => "less than",
                    ThresholdType::Below => "greater than",
                };
                format!(
                    "{}\n{} lines found, expected {} {} lines",
                    group, self.value, expected, self.alert.threshold
                )
            }
            AlertTarget::Tile { .. } => {
                format!("{}\n{} {} {}", group, self.value, self.comparison(), self.alert.threshold)
            }
        }
    }

    /// Deep link into the frontend. Tile links are widened by seven windows on each side.
    pub fn link(&self, frontend_url: &str) -> String {
        let base = frontend_url.trim_end_matches('/');
        match self.target {
            AlertTarget::Search(saved_search) => format!(
                "{}/search/{}?from={}&to={}",
                base,
                saved_search.id,
                self.start_time.timestamp_millis(),
                self.end_time.timestamp_millis()
            ),
            AlertTarget::Tile { dashboard, .. } => {
                let widen = Duration::minutes(i64::from(self.alert.interval.minutes()) * 7);
                format!(
                    "{}/dashboards/{}?from={}&granularity={}&to={}",
                    base,
                    dashboard.id,
                    (self.start_time - widen).timestamp_millis(),
                    self.alert.interval.granularity().replace(' ', "+"),
                    (self.end_time + widen).timestamp_millis()
                )
            }
        }
    }

    pub fn message(&self, frontend_url: &str) -> AlertMessage {
        AlertMessage {
            title: self.title(),
            body: self.body(),
            link: self.link(frontend_url),
        }
    }
}

/// 告警渠道
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &AlertChannel, message: &AlertMessage) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, channel: &AlertChannel, message: &AlertMessage) -> Result<(), NotifyError> {
        let AlertChannel::Webhook { webhook_id } = channel;
        if webhook_id.trim().is_empty() {
            return Err(NotifyError::UnknownWebhook {
                webhook_id: webhook_id.clone(),
            });
        }
        info!(
            webhook_id = %webhook_id,
            title = %message.title,
            link = %message.link,
            "alert notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertInterval, AlertSource, AlertState, DisplayType};
    use crate::query_builder::TimestampColumn;
    use chrono::TimeZone;

    fn alert(threshold_type: ThresholdType, source: AlertSource) -> Alert {
        Alert {
            id: "a1".to_string(),
            tenant: "team".to_string(),
            interval: AlertInterval::FifteenMinutes,
            threshold: 8.0,
            threshold_type,
            source,
            channel: AlertChannel::Webhook {
                webhook_id: "w1".to_string(),
            },
            state: AlertState::Ok,
            group_by: None,
            silenced: None,
        }
    }

    fn saved_search() -> SavedSearch {
        SavedSearch {
            id: "s1".to_string(),
            name: "Errors".to_string(),
            query: "level:error".to_string(),
            table: "log_stream".to_string(),
            timestamp: TimestampColumn::default(),
        }
    }

    fn dashboard() -> Dashboard {
        Dashboard {
            id: "d1".to_string(),
            name: "Checkout".to_string(),
            tiles: vec![Tile {
                id: "t1".to_string(),
                name: "Latency".to_string(),
                display_type: DisplayType::Line,
                query: String::new(),
                table: "metric_stream".to_string(),
                timestamp: TimestampColumn::default(),
                group_by: None,
            }],
        }
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 15, 0).unwrap(),
        )
    }

    #[test]
    fn test_saved_search_message() {
        let search = saved_search();
        let alert = alert(
            ThresholdType::Above,
            AlertSource::Search {
                saved_search_id: "s1".to_string(),
            },
        );
        let (start_time, end_time) = window();
        let view = MessageView {
            alert: &alert,
            target: AlertTarget::Search(&search),
            group: "group:api",
            value: 9.0,
            start_time,
            end_time,
        };
        let message = view.message("http://localhost:8080/");
        assert_eq!(message.title, "Alert for \"Errors\" - 9 lines found");
        assert_eq!(
            message.body,
            "Group: \"group:api\"\n9 lines found, expected less than 8 lines"
        );
        assert_eq!(
            message.link,
            "http://localhost:8080/search/s1?from=1709294400000&to=1709295300000"
        );
    }

    #[test]
    fn test_tile_message() {
        let dashboard = dashboard();
        let alert = alert(
            ThresholdType::Below,
            AlertSource::Tile {
                dashboard_id: "d1".to_string(),
                tile_id: "t1".to_string(),
            },
        );
        let (start_time, end_time) = window();
        let view = MessageView {
            alert: &alert,
            target: AlertTarget::Tile {
                dashboard: &dashboard,
                tile: &dashboard.tiles[0],
            },
            group: "",
            value: 2.5,
            start_time,
            end_time,
        };
        assert_eq!(view.title(), "Alert for \"Latency\" in \"Checkout\" - 2.5 falls below 8");
        assert_eq!(view.body(), "\n2.5 falls below 8");
        // 前后各扩展 7 个窗口 (105 分钟)
        assert_eq!(
            view.link("http://app"),
            "http://app/dashboards/d1?from=1709288100000&granularity=15+minute&to=1709301600000"
        );
    }

    #[test]
    fn test_tile_wording_when_not_breached() {
        let dashboard = dashboard();
        let alert = alert(
            ThresholdType::Above,
            AlertSource::Tile {
                dashboard_id: "d1".to_string(),
                tile_id: "t1".to_string(),
            },
        );
        let (start_time, end_time) = window();
        let view = MessageView {
            alert: &alert,
            target: AlertTarget::Tile {
                dashboard: &dashboard,
                tile: &dashboard.tiles[0],
            },
            group: "",
            value: 3.0,
            start_time,
            end_time,
        };
        assert_eq!(view.title(), "Alert for \"Latency\" in \"Checkout\" - 3 falls below 8");
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_message() {
        let message = AlertMessage {
            title: "t".to_string(),
            body: "b".to_string(),
            link: "l".to_string(),
        };
        let channel = AlertChannel::Webhook {
            webhook_id: "w1".to_string(),
        };
        assert!(LogNotifier.notify(&channel, &message).await.is_ok());
    }

    #[tokio::test]
    async fn test_log_notifier_rejects_blank_webhook() {
        let message = AlertMessage {
            title: "t".to_string(),
            body: "b".to_string(),
            link: "l".to_string(),
        };
        let channel = AlertChannel::Webhook {
            webhook_id: " ".to_string(),
        };
        let err = LogNotifier.notify(&channel, &message).await.unwrap_err();
        assert!(matches!(err, NotifyError::UnknownWebhook { .. }));
    }
}
