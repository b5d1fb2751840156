//! Economy monitor: periodic wallet, task and supply checks with leveled
//! alerts, pluggable sinks and a bounded alert history.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use pactnet_core::ledger::TaskStatus;
use pactnet_core::types::{Amount, EntityId, Timestamp};

use crate::economy::TokenEconomy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityId>,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Wallets at or below this balance raise a warning.
    pub low_balance_threshold: Amount,
    /// Non-terminal tasks older than this raise a warning.
    pub stuck_task_age_secs: i64,
    pub check_interval_secs: u64,
    pub alert_history_cap: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            low_balance_threshold: 0,
            stuck_task_age_secs: 24 * 3_600,
            check_interval_secs: 60,
            alert_history_cap: 500,
        }
    }
}

type AlertSink = Box<dyn Fn(&Alert) + Send + Sync>;

/// Watches the economy and emits alerts. The supply-reconciliation check is
/// the critical one: a non-zero delta means tokens appeared or vanished.
pub struct EconomyMonitor {
    economy: Arc<TokenEconomy>,
    config: MonitorConfig,
    history: Mutex<VecDeque<Alert>>,
    sinks: Mutex<Vec<AlertSink>>,
}

impl EconomyMonitor {
    pub fn new(economy: Arc<TokenEconomy>, config: MonitorConfig) -> Self {
        Self {
            economy,
            config,
            history: Mutex::new(VecDeque::new()),
            sinks: Mutex::new(Vec::new()),
        }
    }

    pub async fn add_sink(&self, sink: AlertSink) {
        self.sinks.lock().await.push(sink);
    }

    /// Run every check once and record the resulting alerts.
    pub async fn run_checks(&self, now: Timestamp) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for (entity, balance) in self.economy.wallets_snapshot().await {
            if balance <= self.config.low_balance_threshold {
                alerts.push(Alert {
                    level: AlertLevel::Warning,
                    code: "LOW_BALANCE".into(),
                    message: format!("wallet {entity} at {balance} micro-credits"),
                    entity: Some(entity),
                    timestamp: now,
                });
            }
        }

        for task in self.economy.tasks_snapshot().await {
            let stuck = !matches!(
                task.status,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
            ) && now - task.created_at > self.config.stuck_task_age_secs;
            if stuck {
                alerts.push(Alert {
                    level: AlertLevel::Warning,
                    code: "STUCK_TASK".into(),
                    message: format!(
                        "task {} in {} for {}s",
                        task.task_id,
                        task.status,
                        now - task.created_at
                    ),
                    entity: Some(task.creator_id.clone()),
                    timestamp: now,
                });
            }
        }

        let delta = self.economy.reconcile().await;
        if delta != 0 {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                code: "SUPPLY_MISMATCH".into(),
                message: format!("reconciliation delta {delta} micro-credits"),
                entity: None,
                timestamp: now,
            });
        }

        self.record(&alerts).await;
        alerts
    }

    async fn record(&self, alerts: &[Alert]) {
        if alerts.is_empty() {
            return;
        }
        {
            let sinks = self.sinks.lock().await;
            for alert in alerts {
                match alert.level {
                    AlertLevel::Critical => {
                        tracing::error!(code = %alert.code, "{}", alert.message)
                    }
                    AlertLevel::Warning => {
                        tracing::warn!(code = %alert.code, "{}", alert.message)
                    }
                    AlertLevel::Info => tracing::info!(code = %alert.code, "{}", alert.message),
                }
                for sink in sinks.iter() {
                    sink(alert);
                }
            }
        }
        let mut history = self.history.lock().await;
        for alert in alerts {
            history.push_back(alert.clone());
        }
        while history.len() > self.config.alert_history_cap {
            history.pop_front();
        }
    }

    /// Most recent alerts, newest last.
    pub async fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let history = self.history.lock().await;
        history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// Spawn the periodic check loop; exits within one interval of shutdown.
    pub fn spawn(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                monitor.config.check_interval_secs.max(1),
            ));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = chrono::Utc::now().timestamp();
                        monitor.run_checks(now).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pactnet_store::DataStore;

    async fn setup(name: &str) -> (Arc<TokenEconomy>, EconomyMonitor) {
        let dir =
            std::env::temp_dir().join(format!("pactnet_monitor_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let eco = Arc::new(TokenEconomy::open(Arc::new(DataStore::open(dir).unwrap())).unwrap());
        let monitor = EconomyMonitor::new(
            Arc::clone(&eco),
            MonitorConfig {
                low_balance_threshold: 10,
                stuck_task_age_secs: 100,
                ..MonitorConfig::default()
            },
        );
        (eco, monitor)
    }

    #[tokio::test]
    async fn low_balance_raises_warning() {
        let (eco, monitor) = setup("low").await;
        eco.create_wallet(&"poor".into(), 5, 0).await.unwrap();
        eco.create_wallet(&"rich".into(), 1_000, 0).await.unwrap();

        let alerts = monitor.run_checks(1).await;
        let codes: Vec<_> = alerts.iter().map(|a| a.code.as_str()).collect();
        assert!(codes.contains(&"LOW_BALANCE"));
        assert_eq!(alerts.iter().filter(|a| a.code == "LOW_BALANCE").count(), 1);
    }

    #[tokio::test]
    async fn stuck_task_raises_warning() {
        let (eco, monitor) = setup("stuck").await;
        eco.create_wallet(&"client".into(), 1_000, 0).await.unwrap();
        eco.create_task(&"client".into(), "slow", 100, 0).await.unwrap();

        assert!(monitor.run_checks(50).await.iter().all(|a| a.code != "STUCK_TASK"));
        let alerts = monitor.run_checks(200).await;
        assert!(alerts.iter().any(|a| a.code == "STUCK_TASK"));
    }

    #[tokio::test]
    async fn healthy_economy_stays_quiet_and_history_is_bounded() {
        let (eco, monitor) = setup("quiet").await;
        eco.create_wallet(&"rich".into(), 1_000, 0).await.unwrap();
        let alerts = monitor.run_checks(1).await;
        assert!(alerts.is_empty());
        assert!(monitor.recent_alerts(10).await.is_empty());
    }
}
