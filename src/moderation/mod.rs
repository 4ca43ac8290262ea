//! Moderation
//!
//! Player reports with per-pair rate limiting and automatic temporary
//! restriction once a player collects enough reports.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Report policy.
#[derive(Debug, Clone, Copy)]
pub struct ModerationPolicy {
    /// One report per reporter/target pair within this window.
    pub window: TimeDelta,
    /// Reports against a target that trigger a restriction.
    pub ban_threshold: usize,
    /// How long a restriction lasts.
    pub ban_duration: TimeDelta,
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            window: TimeDelta::hours(1),
            ban_threshold: 3,
            ban_duration: TimeDelta::hours(24),
        }
    }
}

/// One filed report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    /// Who filed it.
    pub reporter: String,
    /// Who it is about.
    pub reported: String,
    /// Free-form reason.
    pub reason: String,
    /// When it was filed.
    pub created_at: DateTime<Utc>,
}

/// Outcome of filing a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Stored. Carries the restriction expiry if this report triggered one.
    Accepted {
        /// Expiry of the restriction issued by this report.
        restricted_until: Option<DateTime<Utc>>,
    },
    /// Same reporter already reported this target within the window.
    AlreadyReported,
    /// Blank field or self-report.
    InvalidInput,
}

impl ReportOutcome {
    /// Message shown to the reporter.
    pub fn message(&self) -> &'static str {
        match self {
            ReportOutcome::Accepted { .. } => "Report submitted successfully.",
            ReportOutcome::AlreadyReported => "You already reported this player recently.",
            ReportOutcome::InvalidInput => "Invalid report data.",
        }
    }
}

#[derive(Debug, Default)]
struct DeskState {
    reports: Vec<ReportRecord>,
    restrictions: BTreeMap<String, DateTime<Utc>>,
}

/// Report log and restriction table.
#[derive(Debug, Default)]
pub struct ReportDesk {
    policy: ModerationPolicy,
    state: RwLock<DeskState>,
}

impl ReportDesk {
    /// Desk with the given policy.
    pub fn new(policy: ModerationPolicy) -> Self {
        Self {
            policy,
            state: RwLock::new(DeskState::default()),
        }
    }

    /// Active policy.
    pub fn policy(&self) -> &ModerationPolicy {
        &self.policy
    }

    /// File a report now.
    pub async fn file_report(&self, reporter: &str, reported: &str, reason: &str) -> ReportOutcome {
        self.file_report_at(reporter, reported, reason, Utc::now()).await
    }

    /// File a report at `now`.
    pub async fn file_report_at(
        &self,
        reporter: &str,
        reported: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ReportOutcome {
        let (reporter, reported, reason) = (reporter.trim(), reported.trim(), reason.trim());
        if reporter.is_empty() || reported.is_empty() || reason.is_empty() || reporter == reported {
            return ReportOutcome::InvalidInput;
        }

        let mut state = self.state.write().await;

        let window_start = now - self.policy.window;
        let recent = state.reports.iter().any(|r| {
            r.reporter == reporter && r.reported == reported && r.created_at > window_start
        });
        if recent {
            debug!(reporter, reported, "Duplicate report within window");
            return ReportOutcome::AlreadyReported;
        }

        state.reports.push(ReportRecord {
            reporter: reporter.to_string(),
            reported: reported.to_string(),
            reason: reason.to_string(),
            created_at: now,
        });

        let count = state.reports.iter().filter(|r| r.reported == reported).count();
        let already_restricted = state
            .restrictions
            .get(reported)
            .map(|until| *until > now)
            .unwrap_or(false);

        let restricted_until = if count >= self.policy.ban_threshold && !already_restricted {
            let until = now + self.policy.ban_duration;
            state.restrictions.insert(reported.to_string(), until);
            info!(player = reported, reports = count, %until, "Player restricted");
            Some(until)
        } else {
            None
        };

        info!(reporter, reported, "Report filed");
        ReportOutcome::Accepted { restricted_until }
    }

    /// Restriction expiry of `username`, if currently restricted.
    pub async fn restricted_until(&self, username: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .await
            .restrictions
            .get(username.trim())
            .copied()
            .filter(|until| *until > now)
    }

    /// Total reports filed against `username`.
    pub async fn report_count(&self, username: &str) -> usize {
        self.state
            .read()
            .await
            .reports
            .iter()
            .filter(|r| r.reported == username)
            .count()
    }
}
