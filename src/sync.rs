//! Batch synchronization: list -> fetch -> normalize -> upsert.
//!
//! Each listed call is processed independently into a
//! `Result<SyncedCall, SyncError>`; failures are counted and logged with the
//! call id, never propagated. Only the top-level list call can fail the batch.

use tokio_util::sync::CancellationToken;

use crate::db::CallDb;
use crate::error::SyncError;
use crate::normalize::{normalize, NormalizeOptions};
use crate::source::CallSource;
use crate::types::{AgentInfo, CallRecord, RemoteCallSummary, SyncReport, SyncedCall};

/// Synchronize every call currently returned by the source.
///
/// Items run strictly one after another. Cancellation is checked before each
/// item; a cancelled batch returns the partial report with `cancelled` set.
pub async fn sync_all(
    source: &dyn CallSource,
    db: &CallDb,
    options: &NormalizeOptions,
    cancel: &CancellationToken,
) -> Result<SyncReport, SyncError> {
    let summaries = source.list_recent_calls().await?;
    let mut report = SyncReport {
        listed: summaries.len(),
        ..SyncReport::default()
    };
    log::info!("Sync: {} calls listed", summaries.len());

    for summary in &summaries {
        if cancel.is_cancelled() {
            log::info!("Sync: cancelled, stopping before remaining calls");
            report.cancelled = true;
            break;
        }

        match sync_one(source, db, options, summary).await {
            Ok(synced) => {
                report.synced_count += 1;
                log::debug!(
                    "Sync: {} stored as call {} (report {})",
                    synced.external_call_id,
                    synced.call_id,
                    synced.report_id
                );
            }
            Err(e) if !e.counts_as_error() => {
                report.skipped_count += 1;
                log::debug!("Sync: skipped list entry: {}", e);
            }
            Err(e) => {
                report.error_count += 1;
                log::warn!(
                    "Sync: call {} failed ({}): {}",
                    summary.call_id.as_deref().unwrap_or("?"),
                    e.kind(),
                    e
                );
            }
        }
    }

    log::info!(
        "Sync: done: {} synced, {} errors, {} skipped",
        report.synced_count,
        report.error_count,
        report.skipped_count
    );
    Ok(report)
}

async fn sync_one(
    source: &dyn CallSource,
    db: &CallDb,
    options: &NormalizeOptions,
    summary: &RemoteCallSummary,
) -> Result<SyncedCall, SyncError> {
    let (call_id, agent_id) = summary.ids().ok_or_else(|| {
        SyncError::MalformedInput("list entry is missing a call or agent id".to_string())
    })?;

    let mut detail = source.fetch_call_detail(call_id).await?;
    // The detail payload may omit ids the list already gave us
    if detail.call_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
        detail.call_id = Some(call_id.to_string());
    }
    if detail.agent_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
        detail.agent_id = Some(agent_id.to_string());
    }

    let agent = fetch_agent_lenient(source, agent_id).await;
    let record = normalize(&detail, agent.as_ref(), options)?;

    // No await below: the transaction never spans a suspension point
    store_record(db, &record)
}

/// Agent lookup failures degrade to "no display name".
async fn fetch_agent_lenient(source: &dyn CallSource, agent_id: &str) -> Option<AgentInfo> {
    match source.fetch_agent(agent_id).await {
        Ok(agent) => Some(agent),
        Err(e) => {
            log::warn!(
                "Sync: agent {} unavailable ({}), syncing without display name: {}",
                agent_id,
                e.kind(),
                e
            );
            None
        }
    }
}

fn store_record(db: &CallDb, record: &CallRecord) -> Result<SyncedCall, SyncError> {
    db.with_transaction(|tx| {
        if let (Some(agent_id), Some(name)) = (&record.agent_id, &record.agent_display_name) {
            tx.upsert_agent(agent_id, Some(name.as_str()))?;
        }
        let call_id = tx.upsert_call(record)?;
        let report_id = tx.upsert_report(call_id, &record.extracted_fields)?;
        Ok(SyncedCall {
            external_call_id: record.external_call_id.clone(),
            call_id,
            report_id,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;
    use crate::source::fake::{sample_detail, FakeSource};

    const T0: i64 = 1_700_000_000;

    fn three_calls() -> FakeSource {
        let source = FakeSource::new();
        source.push_call(sample_detail("conv_1", "agent_1", T0));
        source.push_call(sample_detail("conv_2", "agent_1", T0 + 60));
        source.push_call(sample_detail("conv_3", "agent_2", T0 + 120));
        source.set_agent("agent_1", Some("Ana"));
        source.set_agent("agent_2", None);
        source
    }

    async fn run(source: &FakeSource, db: &CallDb) -> SyncReport {
        sync_all(
            source,
            db,
            &NormalizeOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .expect("sync_all")
    }

    #[tokio::test]
    async fn test_sync_all_stores_every_call() {
        let source = three_calls();
        let db = test_db();

        let report = run(&source, &db).await;

        assert_eq!(report.listed, 3);
        assert_eq!(report.synced_count, 3);
        assert_eq!(report.error_count, 0);
        assert_eq!(db.count_calls().unwrap(), 3);

        let call = db.get_call_by_external_id("conv_2").unwrap().unwrap();
        let stored = db.get_report_for_call(call.id).unwrap().unwrap();
        assert_eq!(stored.mode.as_deref(), Some("llamada telefónica"));
        assert_eq!(stored.case_id.as_deref(), Some("4411"));
        assert_eq!(stored.place, None);

        assert_eq!(
            db.get_agent("agent_1").unwrap().unwrap().display_name.as_deref(),
            Some("Ana")
        );
        // Nameless agents get no row
        assert!(db.get_agent("agent_2").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let source = three_calls();
        let db = test_db();

        run(&source, &db).await;
        let first = db.get_call_by_external_id("conv_1").unwrap().unwrap();
        let first_report = db.get_report_for_call(first.id).unwrap().unwrap();

        let again = run(&source, &db).await;
        assert_eq!(again.synced_count, 3);
        assert_eq!(db.count_calls().unwrap(), 3);

        let second = db.get_call_by_external_id("conv_1").unwrap().unwrap();
        let second_report = db.get_report_for_call(second.id).unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.start_time, second.start_time);
        assert_eq!(first.transcript, second.transcript);
        assert_eq!(first_report.id, second_report.id);
        assert_eq!(first_report.fields_json, second_report.fields_json);
    }

    #[tokio::test]
    async fn test_missing_detail_is_isolated() {
        let source = three_calls();
        source.remove_detail("conv_2");
        let db = test_db();

        let report = run(&source, &db).await;

        assert_eq!(report.synced_count, 2);
        assert_eq!(report.error_count, 1);
        assert!(db.get_call_by_external_id("conv_1").unwrap().is_some());
        assert!(db.get_call_by_external_id("conv_2").unwrap().is_none());
        assert!(db.get_call_by_external_id("conv_3").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_transport_failure_on_detail_is_counted() {
        let source = three_calls();
        source.fail_detail_transport("conv_3");
        let db = test_db();

        let report = run(&source, &db).await;
        assert_eq!((report.synced_count, report.error_count), (2, 1));
    }

    #[tokio::test]
    async fn test_entries_without_ids_are_skipped() {
        let source = three_calls();
        source.push_summary(RemoteCallSummary {
            call_id: None,
            agent_id: Some("agent_1".into()),
        });
        source.push_summary(RemoteCallSummary::new("conv_9", "  "));
        let db = test_db();

        let report = run(&source, &db).await;

        assert_eq!(report.listed, 5);
        assert_eq!(report.skipped_count, 2);
        assert_eq!(report.error_count, 0);
        assert_eq!(report.synced_count, 3);
        // Skipped entries never reach the detail endpoint
        assert_eq!(source.detail_calls(), 3);
    }

    #[tokio::test]
    async fn test_missing_agent_does_not_fail_item() {
        let source = FakeSource::new();
        source.push_call(sample_detail("conv_1", "agent_gone", T0));
        let db = test_db();

        let report = run(&source, &db).await;

        assert_eq!((report.synced_count, report.error_count), (1, 0));
        let call = db.get_call_by_external_id("conv_1").unwrap().unwrap();
        assert_eq!(call.external_agent_id.as_deref(), Some("agent_gone"));
    }

    #[tokio::test]
    async fn test_detail_without_ids_uses_list_ids() {
        let source = FakeSource::new();
        source.push_summary(RemoteCallSummary::new("conv_1", "agent_1"));
        let mut detail = sample_detail("conv_1", "agent_1", T0);
        detail.agent_id = None;
        source.replace_detail(detail);
        let db = test_db();

        let report = run(&source, &db).await;

        assert_eq!(report.synced_count, 1);
        let call = db.get_call_by_external_id("conv_1").unwrap().unwrap();
        assert_eq!(call.external_agent_id.as_deref(), Some("agent_1"));
    }

    #[tokio::test]
    async fn test_storage_failure_rolls_back_only_that_item() {
        let source = three_calls();
        let db = test_db();
        // Reject reports for conv_2 after its call row would be written
        db.conn_ref()
            .execute_batch(
                "CREATE TRIGGER reject_conv_2 BEFORE INSERT ON reports
                 WHEN (SELECT external_call_id FROM calls WHERE id = NEW.call_id) = 'conv_2'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let report = run(&source, &db).await;

        assert_eq!((report.synced_count, report.error_count), (2, 1));
        assert!(db.get_call_by_external_id("conv_2").unwrap().is_none());
        assert!(db.get_call_by_external_id("conv_3").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_changed_fields_are_replaced_on_resync() {
        let source = three_calls();
        let db = test_db();
        run(&source, &db).await;

        let mut changed = sample_detail("conv_1", "agent_1", T0);
        if let Some(analysis) = changed.analysis.as_mut() {
            analysis
                .data_collection_results
                .insert("forma".into(), serde_json::Value::Null);
            analysis
                .data_collection_results
                .insert("id_extorsion".into(), serde_json::json!("EXT-77"));
        }
        source.replace_detail(changed);
        run(&source, &db).await;

        let call = db.get_call_by_external_id("conv_1").unwrap().unwrap();
        let stored = db.get_report_for_call(call.id).unwrap().unwrap();
        assert_eq!(stored.mode, None);
        assert_eq!(stored.case_id.as_deref(), Some("EXT-77"));
    }

    #[tokio::test]
    async fn test_cancelled_batch_starts_no_items() {
        let source = three_calls();
        let db = test_db();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = sync_all(&source, &db, &NormalizeOptions::default(), &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.synced_count, 0);
        assert_eq!(source.detail_calls(), 0);
        assert_eq!(db.count_calls().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_failure_aborts_batch() {
        let source = three_calls();
        source.fail_list(Some("503 Service Unavailable"));
        let db = test_db();

        let err = sync_all(
            &source,
            &db,
            &NormalizeOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::Transport(_)));
        assert_eq!(db.count_calls().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_list_is_a_no_op() {
        let source = FakeSource::new();
        let db = test_db();
        let report = run(&source, &db).await;
        assert_eq!(report, SyncReport::default());
    }
}
