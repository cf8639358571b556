//! Change-detecting poll loop.
//!
//! Each cycle lists recent calls and compares the newest id to the last one
//! observed. Only a new newest id triggers a full `sync_all`. Cycles run
//! strictly one after another; the sleep between them races the cancellation
//! token so ctrl-c never waits out a full interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::PollerConfig;
use crate::db::{CallDb, NewSyncRun};
use crate::error::SyncError;
use crate::normalize::NormalizeOptions;
use crate::source::CallSource;
use crate::sync::sync_all;
use crate::types::SyncReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Syncing,
}

/// Result of comparing the newest listed id to the last observed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeCheck {
    pub changed: bool,
    pub newest_call_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleOutcome {
    pub change_detected: bool,
    pub newest_call_id: Option<String>,
    /// Present when a sync ran to completion (possibly with item errors).
    pub report: Option<SyncReport>,
    /// Set when the sync itself failed.
    pub sync_error: Option<String>,
}

impl CycleOutcome {
    /// The loop waits `error_backoff` instead of `poll_interval` after this cycle.
    pub fn needs_backoff(&self) -> bool {
        self.sync_error.is_some()
    }
}

pub struct Poller {
    source: Arc<dyn CallSource>,
    db: CallDb,
    options: NormalizeOptions,
    config: PollerConfig,
    last_observed: Option<String>,
    state: PollerState,
    cycles: u64,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(
        source: Arc<dyn CallSource>,
        db: CallDb,
        options: NormalizeOptions,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            db,
            options,
            config,
            last_observed: None,
            state: PollerState::Idle,
            cycles: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Share a cancellation token with in-flight syncs started outside `run_forever`.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn last_observed(&self) -> Option<&str> {
        self.last_observed.as_deref()
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn db(&self) -> &CallDb {
        &self.db
    }

    /// List recent calls and compare the newest id to `last_observed`.
    ///
    /// Does not update `last_observed`.
    pub async fn check_for_changes(&self) -> Result<ChangeCheck, SyncError> {
        let summaries = self.source.list_recent_calls().await?;
        let newest_call_id = summaries
            .iter()
            .filter_map(|s| s.call_id.as_deref())
            .map(str::trim)
            .find(|id| !id.is_empty())
            .map(str::to_string);

        let changed = match &newest_call_id {
            Some(newest) => self.last_observed.as_deref() != Some(newest.as_str()),
            None => false,
        };
        Ok(ChangeCheck {
            changed,
            newest_call_id,
        })
    }

    /// One check, and a full sync if the newest call changed.
    ///
    /// Never fails: check errors count as "no change" and sync errors ask the
    /// loop to back off. Every cycle lands in `sync_runs`.
    pub async fn run_one_sync_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        let started_at = Utc::now().to_rfc3339();

        let check = match self.check_for_changes().await {
            Ok(check) => check,
            Err(e) => {
                log::warn!("Poller: change check failed, treating as no change: {}", e);
                let outcome = CycleOutcome::default();
                self.record_run("poll", &started_at, &outcome, Some(e.to_string()));
                return outcome;
            }
        };

        let mut outcome = CycleOutcome {
            change_detected: check.changed,
            newest_call_id: check.newest_call_id.clone(),
            ..CycleOutcome::default()
        };

        if !check.changed {
            log::debug!("Poller: no new calls");
            self.record_run("poll", &started_at, &outcome, None);
            return outcome;
        }

        log::info!(
            "Poller: new call detected ({}), syncing",
            check.newest_call_id.as_deref().unwrap_or("?")
        );
        // Advanced before syncing so a failed sync is not retried for the same id
        self.last_observed = check.newest_call_id;

        self.state = PollerState::Syncing;
        let result = sync_all(self.source.as_ref(), &self.db, &self.options, &self.cancel).await;
        self.state = PollerState::Idle;

        match result {
            Ok(report) => outcome.report = Some(report),
            Err(e) => {
                log::error!("Poller: sync failed ({}): {}", e.kind(), e);
                outcome.sync_error = Some(e.to_string());
            }
        }
        let error = outcome.sync_error.clone();
        self.record_run("poll", &started_at, &outcome, error);
        outcome
    }

    /// Sync everything now, skipping the change check.
    ///
    /// Leaves `last_observed` alone.
    pub async fn force_sync(&mut self) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now().to_rfc3339();
        log::info!("Poller: forced sync");

        self.state = PollerState::Syncing;
        let result = sync_all(self.source.as_ref(), &self.db, &self.options, &self.cancel).await;
        self.state = PollerState::Idle;

        let outcome = CycleOutcome {
            report: result.as_ref().ok().copied(),
            sync_error: result.as_ref().err().map(|e| e.to_string()),
            ..CycleOutcome::default()
        };
        self.record_run("manual", &started_at, &outcome, outcome.sync_error.clone());
        result
    }

    /// Poll until `cancel` fires, returning the number of cycles run.
    pub async fn run_forever(&mut self, poll_interval: Duration, cancel: CancellationToken) -> u64 {
        self.cancel = cancel.clone();
        log::info!(
            "Poller: started (interval {}s, backoff {}s)",
            poll_interval.as_secs(),
            self.config.error_backoff_secs
        );

        let startup_delay = Duration::from_secs(self.config.startup_delay_secs);
        if !startup_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(startup_delay) => {}
            }
        }

        while !cancel.is_cancelled() {
            let outcome = self.run_one_sync_cycle().await;
            if let Some(report) = &outcome.report {
                log::info!(
                    "Poller: cycle {}: {} synced, {} errors, {} skipped",
                    self.cycles,
                    report.synced_count,
                    report.error_count,
                    report.skipped_count
                );
            }

            let wait = if outcome.needs_backoff() {
                self.config.error_backoff()
            } else {
                poll_interval
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        log::info!("Poller: shutting down after {} cycles", self.cycles);
        self.cycles
    }

    fn record_run(
        &self,
        kind: &str,
        started_at: &str,
        outcome: &CycleOutcome,
        error_message: Option<String>,
    ) {
        let report = outcome.report.unwrap_or_default();
        let run = NewSyncRun {
            kind: kind.to_string(),
            started_at: started_at.to_string(),
            finished_at: Utc::now().to_rfc3339(),
            change_detected: outcome.change_detected,
            newest_call_id: outcome.newest_call_id.clone(),
            listed: report.listed,
            synced_count: report.synced_count,
            error_count: report.error_count,
            skipped_count: report.skipped_count,
            error_message,
        };
        if let Err(e) = self.db.record_sync_run(&run) {
            log::warn!("Poller: failed to record sync run: {}", e);
        }
    }
}
