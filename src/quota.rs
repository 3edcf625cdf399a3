//! Best-effort daily call counter shared by every oracle caller in the process.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;

use crate::config::QuotaConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct QuotaState {
    date: NaiveDate,
    count: u32,
}

/// Cheap to clone; all clones share one counter
#[derive(Debug, Clone)]
pub struct DailyQuota {
    state: Arc<Mutex<QuotaState>>,
    limit: u32,
    enforce: bool,
    path: Option<PathBuf>,
}

impl DailyQuota {
    pub fn new(limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(QuotaState {
                date: today(),
                count: 0,
            })),
            limit,
            enforce: false,
            path: None,
        }
    }

    /// Restores today's count from disk if present; unreadable files start from zero
    pub async fn from_config(config: &QuotaConfig) -> Self {
        let mut quota = Self::new(config.daily_limit);
        quota.enforce = config.enforce;
        if let Some(path) = &config.path {
            if let Some(saved) = load_state(path).await {
                if let Ok(mut state) = quota.state.lock() {
                    *state = saved;
                }
            }
            quota.path = Some(path.clone());
        }
        quota
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn usage(&self) -> u32 {
        self.usage_on(today())
    }

    pub fn usage_on(&self, day: NaiveDate) -> u32 {
        match self.state.lock() {
            Ok(mut state) => {
                roll_over(&mut state, day);
                state.count
            }
            Err(_) => 0,
        }
    }

    /// Count one call in memory; returns the usage after the increment
    pub fn increment(&self) -> u32 {
        self.increment_on(today())
    }

    pub fn increment_on(&self, day: NaiveDate) -> u32 {
        match self.state.lock() {
            Ok(mut state) => {
                roll_over(&mut state, day);
                state.count = state.count.saturating_add(1);
                state.count
            }
            Err(_) => 0,
        }
    }

    /// Count one call and write the counter to the configured file
    pub async fn record_call(&self) -> u32 {
        let used = self.increment();
        self.save().await;
        used
    }

    /// Persist the current counter; failures are logged
    pub async fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let snapshot = match self.state.lock() {
            Ok(state) => *state,
            Err(_) => return,
        };
        save_state(path, &snapshot).await;
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage() >= self.limit
    }

    /// Whether a new call should be refused
    pub fn blocks(&self) -> bool {
        self.enforce && self.is_exhausted()
    }

    /// Usage as a percentage of the limit, capped at 100
    pub fn percentage(&self) -> f32 {
        if self.limit == 0 {
            return 100.0;
        }
        (self.usage() as f32 / self.limit as f32 * 100.0).min(100.0)
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn roll_over(state: &mut QuotaState, day: NaiveDate) {
    if state.date != day {
        state.date = day;
        state.count = 0;
    }
}

async fn load_state(path: &Path) -> Option<QuotaState> {
    let content = fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("ignoring quota file {}: {}", path.display(), e);
            None
        }
    }
}

async fn save_state(path: &Path, state: &QuotaState) {
    let result = match serde_json::to_string(state) {
        Ok(json) => fs::write(path, json).await,
        Err(e) => Err(std::io::Error::other(e)),
    };
    if let Err(e) = result {
        warn!("failed to persist quota to {}: {}", path.display(), e);
    }
}
