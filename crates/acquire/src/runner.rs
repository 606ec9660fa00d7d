//! Acquisition runner (§4.4 "Concurrency"/"Failure semantics"): fans
//! targets out across a bounded worker pool, but always reports results
//! back in the original queue order regardless of completion order —
//! the same input-order-preserving join pattern used for any worker-pool
//! task where result ordering matters more than wall-clock order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use dsaudit_kernel::atomic::write_atomic;
use dsaudit_kernel::checkpoint::Checkpoint;
use dsaudit_ledger::LedgerAppender;
use dsaudit_model::{QueueRow, Target, TargetId};

use crate::{output_dir_for, AcquireContext, AcquireError, StrategyOutcome, StrategyRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireDoneManifest {
    pub target_id: String,
    pub strategy: String,
    pub outcome: StrategyOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireSummaryRow {
    pub run_id: String,
    pub target_id: String,
    pub status: String,
}

pub struct AcquireRunResult {
    pub target_id: TargetId,
    pub outcome: StrategyOutcome,
}

/// Acquire every row in `rows`, bounded to `workers` concurrent targets.
/// `targets_by_id` resolves a row's full `Target` (needed by some
/// strategies, e.g. `routing`/`yellow_screen` metadata is not on the
/// queue row). Results are returned in `rows`' order.
pub async fn run_acquisition(
    rows: &[QueueRow],
    targets_by_id: &HashMap<TargetId, Target>,
    raw_root: &Path,
    manifests_root: &Path,
    stage_name: &str,
    registry: &StrategyRegistry,
    ctx: Arc<AcquireContext>,
    workers: usize,
    resume: bool,
) -> Result<Vec<AcquireRunResult>, AcquireError> {
    let checkpoint = Arc::new(Checkpoint::new(manifests_root));
    if !resume {
        checkpoint.reset_stage(stage_name)?;
    }

    let semaphore = Arc::new(tokio::sync::Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(rows.len());

    for row in rows {
        let row = row.clone();
        let target = targets_by_id
            .get(&row.target_id)
            .cloned()
            .unwrap_or_else(|| panic!("queue row references unknown target {}", row.target_id));
        let raw_root = raw_root.to_path_buf();
        let manifests_root = manifests_root.to_path_buf();
        let stage_name = stage_name.to_string();
        let registry = registry.clone();
        let ctx = ctx.clone();
        let checkpoint = checkpoint.clone();
        let semaphore = semaphore.clone();

        let handle = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");

            if let Ok(Some(state)) = checkpoint.load(&stage_name, &row.target_id.0) {
                if state.done {
                    let outcome: StrategyOutcome = serde_json::from_value(state.progress)
                        .unwrap_or(StrategyOutcome::Skipped { reason: "already_done_checkpoint_unreadable".into() });
                    return AcquireRunResult { target_id: row.target_id.clone(), outcome };
                }
            }

            let strategy_name = row.download.strategy_name();
            let outcome = match registry.get(strategy_name) {
                Some(handler) => {
                    let output_dir = output_dir_for(&raw_root, &row);
                    if row.bucket == dsaudit_model::Bucket::Red {
                        StrategyOutcome::Skipped { reason: "red_bucket_never_acquired".into() }
                    } else {
                        handler.acquire(&target, &row, &output_dir, &ctx).await
                    }
                }
                None => StrategyOutcome::Failed { reason: format!("strategy {strategy_name:?} not registered") },
            };

            let target_manifest_dir = manifests_root.join(&row.manifest_dir);
            let manifest = AcquireDoneManifest {
                target_id: row.target_id.0.clone(),
                strategy: strategy_name.to_string(),
                outcome: outcome.clone(),
            };
            match serde_json::to_vec_pretty(&manifest) {
                Ok(bytes) => {
                    if let Err(e) = write_atomic(target_manifest_dir.join("acquire_done.json"), &bytes) {
                        tracing::error!(target_id = %row.target_id, error = %e, "failed to write acquire_done.json");
                    }
                }
                Err(e) => tracing::error!(target_id = %row.target_id, error = %e, "failed to serialize acquire manifest"),
            }

            let progress = serde_json::to_value(&outcome).unwrap_or(serde_json::Value::Null);
            if let Err(e) = checkpoint.mark(&stage_name, &row.target_id.0, true, progress) {
                tracing::error!(target_id = %row.target_id, error = %e, "failed to write acquire checkpoint");
            }

            AcquireRunResult { target_id: row.target_id.clone(), outcome }
        });
        handles.push(handle);
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.expect("acquire task panicked"));
    }
    Ok(results)
}

/// Append one summary row per target to `acquire_summary_<run_id>.jsonl`,
/// in the same input order `run_acquisition` returned.
pub fn write_summary_ledger(
    ledger_root: &Path,
    run_id: &str,
    results: &[AcquireRunResult],
) -> Result<(), AcquireError> {
    let mut ledger = LedgerAppender::open(ledger_root.join(format!("acquire_summary_{run_id}.jsonl")))?;
    for r in results {
        ledger.append(&AcquireSummaryRow {
            run_id: run_id.to_string(),
            target_id: r.target_id.0.clone(),
            status: r.outcome.status_name().to_string(),
        })?;
    }
    Ok(())
}
