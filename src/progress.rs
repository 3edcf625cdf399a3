//! Practice streak bookkeeping, invoked once per correct result.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub uid: String,
    pub display_name: String,
    pub streak: u32,
    pub last_practice_date: DateTime<Utc>,
    /// Days with at least one completed lesson
    #[serde(default)]
    pub history: BTreeMap<NaiveDate, bool>,
    pub total_lessons: u32,
}

impl Profile {
    pub fn new(uid: &str, display_name: &str) -> Self {
        Self {
            uid: uid.to_string(),
            display_name: display_name.to_string(),
            streak: 0,
            last_practice_date: DateTime::<Utc>::UNIX_EPOCH,
            history: BTreeMap::new(),
            total_lessons: 0,
        }
    }

    pub fn practiced_on(&self, day: NaiveDate) -> bool {
        self.history.get(&day).copied().unwrap_or(false)
    }
}

/// Day-based streak rule.
///
/// Same day again: unchanged. Previous practice yesterday: streak + 1.
/// Any larger gap (or none recorded): streak restarts at 1.
pub fn update_streak(profile: &Profile, now: DateTime<Utc>) -> Profile {
    let today = now.date_naive();
    let last = profile.last_practice_date.date_naive();

    if profile.practiced_on(today) || last == today {
        return profile.clone();
    }

    let yesterday = today.checked_sub_days(Days::new(1));
    let streak = if Some(last) == yesterday {
        profile.streak + 1
    } else {
        1
    };

    let mut history = profile.history.clone();
    history.insert(today, true);

    Profile {
        streak: streak.max(1),
        last_practice_date: now,
        history,
        total_lessons: profile.total_lessons + 1,
        ..profile.clone()
    }
}

#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Record one completed lesson; returns the updated profile
    async fn record_success(&self, profile: &Profile) -> Result<Profile>;
}

/// One JSON file per user under a directory
pub struct JsonProgressStore {
    dir: PathBuf,
}

impl JsonProgressStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, uid: &str) -> PathBuf {
        let safe: String = uid
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    pub async fn load(&self, uid: &str, display_name: &str) -> Result<Profile> {
        let path = self.path_for(uid);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("corrupt profile {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Profile::new(uid, display_name)),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub async fn save(&self, profile: &Profile) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path_for(&profile.uid);
        let json = serde_json::to_string_pretty(profile)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

#[async_trait]
impl ProgressTracker for JsonProgressStore {
    async fn record_success(&self, profile: &Profile) -> Result<Profile> {
        let updated = update_streak(profile, Utc::now());
        if updated != *profile {
            self.save(&updated).await?;
            info!(uid = %updated.uid, streak = updated.streak, total = updated.total_lessons, "progress recorded");
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn profile_last(date: DateTime<Utc>, streak: u32) -> Profile {
        let mut p = Profile::new("u1", "Ada");
        p.last_practice_date = date;
        p.streak = streak;
        p.total_lessons = 10;
        p.history.insert(date.date_naive(), true);
        p
    }

    #[test]
    fn test_yesterday_extends_streak() {
        let p = profile_last(at(2026, 3, 9), 4);
        let u = update_streak(&p, at(2026, 3, 10));
        assert_eq!(u.streak, 5);
        assert_eq!(u.total_lessons, 11);
        assert!(u.practiced_on(at(2026, 3, 10).date_naive()));
    }

    #[test]
    fn test_gap_resets_streak() {
        let p = profile_last(at(2026, 3, 7), 4);
        let u = update_streak(&p, at(2026, 3, 10));
        assert_eq!(u.streak, 1);
        assert_eq!(u.total_lessons, 11);
    }

    #[test]
    fn test_same_day_is_noop() {
        let p = profile_last(at(2026, 3, 10), 4);
        let u = update_streak(&p, at(2026, 3, 10) + chrono::Duration::hours(3));
        assert_eq!(u, p);
    }

    #[test]
    fn test_month_boundary() {
        let p = profile_last(at(2026, 2, 28), 2);
        let u = update_streak(&p, at(2026, 3, 1));
        assert_eq!(u.streak, 3);
    }

    #[test]
    fn test_new_profile_starts_at_one() {
        let u = update_streak(&Profile::new("u", "n"), at(2026, 1, 1));
        assert_eq!(u.streak, 1);
        assert_eq!(u.total_lessons, 1);
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProgressStore::new(dir.path().join("progress"));
        let fresh = store.load("a/b", "Ada").await.unwrap();
        assert_eq!(fresh.streak, 0);

        let updated = store.record_success(&fresh).await.unwrap();
        assert_eq!(updated.streak, 1);

        let loaded = store.load("a/b", "Ada").await.unwrap();
        assert_eq!(loaded, updated);
    }
}
