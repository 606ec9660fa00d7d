//! dsaudit CLI: the orchestrator (C9, §5/§6) binding the stage crates
//! together behind the five-subcommand surface. Each subcommand loads the
//! `PolicySnapshot` fresh, resolves `globals.*_root` against `--targets`'
//! directory (overridable by `DATASET_ROOT`), runs its own preflight
//! checks, and exits with the code `spec.md` §6 assigns to its failure
//! class. There is no single "run everything" command — `classify`,
//! `acquire`, `yellow_screen`, `merge`, and `catalog` are independent,
//! checkpointed invocations, the same way `acquire --bucket` requires two
//! separate calls for green and yellow.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use dotenvy::from_path as dotenv_from_path;
use thiserror::Error;

use dsaudit_acquire::{AcquireContext, AcquireError};
use dsaudit_classify::{ClassificationInput, ClassifyError};
use dsaudit_evidence::{EvidenceClient, EvidenceError};
use dsaudit_kernel::atomic::write_atomic;
use dsaudit_ledger::{read_ledger, LedgerAppender, LedgerError};
use dsaudit_merge::{green::canonicalize_green_target, runner::run_merge, MergeError};
use dsaudit_model::{Bucket, EvidenceSnapshot, QueueRow, SignoffRecord, Target, TargetId};
use dsaudit_policy::config::{GlobalsConfig, TargetsConfig};
use dsaudit_policy::{PolicyError, PolicySnapshot};
use dsaudit_screen::runner::{run_screening, TargetEvidenceContext};
use dsaudit_screen::ScreenError;

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("preflight check failed: {0}")]
    Preflight(String),
    #[error("policy refused this run: {0}")]
    PolicyRefused(String),
    #[error("{0} target(s) failed and --fail-on-error was set")]
    FailOnError(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("kernel error: {0}")]
    Kernel(#[from] dsaudit_kernel::KernelError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error("evidence error: {0}")]
    Evidence(#[from] EvidenceError),
    #[error("classify error: {0}")]
    Classify(#[from] ClassifyError),
    #[error("acquire error: {0}")]
    Acquire(#[from] AcquireError),
    #[error("screen error: {0}")]
    Screen(#[from] ScreenError),
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),
    #[error("catalog error: {0}")]
    Catalog(#[from] dsaudit_catalog::CatalogError),
}

/// Maps a `CliError` to the process exit code `spec.md` §6 assigns to its
/// failure class. Everything not named below is `1`, the generic-failure
/// catch-all.
fn exit_code(err: &CliError) -> i32 {
    match err {
        CliError::Config(_) | CliError::Policy(_) => 3,
        CliError::Preflight(_) => 2,
        CliError::PolicyRefused(_) => 4,
        _ => 1,
    }
}

#[derive(Parser)]
#[command(name = "dsaudit", version, about = "Legally-audited dataset collector")]
struct Args {
    /// Path to targets.yaml. Defaults to `$DATASET_ROOT/targets.yaml`, or
    /// `./targets.yaml` if DATASET_ROOT is unset.
    #[arg(long, global = true)]
    targets: Option<PathBuf>,

    /// Wipe this stage's checkpoints and start over instead of resuming.
    #[arg(long, global = true)]
    no_resume: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum BucketArg {
    Green,
    Yellow,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch license evidence and classify every enabled target into the
    /// GREEN/YELLOW/RED queues.
    Classify {
        /// Reuse each target's last stored evidence snapshot instead of
        /// fetching; targets with no prior snapshot are forced YELLOW.
        #[arg(long)]
        no_fetch: bool,
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },
    /// Download the declared payload for every target in one queue.
    Acquire {
        #[arg(long, value_enum)]
        bucket: BucketArg,
        /// Actually download; without this, only the planned target count
        /// is reported.
        #[arg(long)]
        execute: bool,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long)]
        limit_targets: Option<usize>,
        #[arg(long)]
        fail_on_error: bool,
        #[arg(long)]
        allow_huge_downloads: bool,
    },
    /// Screen every YELLOW target's raw records for signoff and license
    /// gating, writing canonical records to `screened_yellow/`.
    #[command(name = "yellow_screen", alias = "screen_yellow")]
    YellowScreen {
        #[arg(long)]
        execute: bool,
    },
    /// Merge GREEN and screened-YELLOW shards into the deduplicated
    /// `combined/` corpus.
    Merge {
        #[arg(long)]
        execute: bool,
    },
    /// Build `catalogs_root/catalog.json`, the final run summary.
    Catalog,
}

#[tokio::main]
async fn main() {
    dsaudit_kernel::logging::init_logging();
    if std::env::args().any(|a| a == "screen_yellow") {
        eprintln!("warning: `screen_yellow` is a deprecated alias for `yellow_screen`");
    }
    if let Err(e) = run().await {
        eprintln!("ERROR: {e}");
        std::process::exit(exit_code(&e));
    }
}

async fn run() -> Result<(), CliError> {
    let args = Args::parse();

    let dataset_root = std::env::var("DATASET_ROOT").ok().map(PathBuf::from);
    load_dotenv(dataset_root.as_deref());

    let targets_path = args.targets.clone().unwrap_or_else(|| {
        dataset_root
            .as_ref()
            .map(|r| r.join("targets.yaml"))
            .unwrap_or_else(|| PathBuf::from("targets.yaml"))
    });

    let targets_cfg = TargetsConfig::load(&targets_path)
        .map_err(|e| CliError::Config(format!("loading {}: {e}", targets_path.display())))?;
    let policy = PolicySnapshot::load(&targets_path, None, None)?;
    let roots = Roots::resolve(&targets_cfg.globals, dataset_root.as_deref());

    let enabled_targets: Vec<&Target> = {
        let mut v: Vec<&Target> = targets_cfg.targets.iter().filter(|t| t.enabled).collect();
        v.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        v
    };
    let targets_by_id: HashMap<TargetId, Target> = targets_cfg
        .targets
        .iter()
        .map(|t| (t.id.clone(), t.clone()))
        .collect();

    match args.cmd {
        Command::Classify { no_fetch, workers } => {
            run_classify(&policy, &enabled_targets, &roots, no_fetch, workers).await
        }
        Command::Acquire {
            bucket,
            execute,
            workers,
            limit_targets,
            fail_on_error,
            allow_huge_downloads,
        } => {
            run_acquire(
                &targets_by_id,
                &roots,
                bucket,
                execute,
                workers,
                limit_targets,
                fail_on_error,
                allow_huge_downloads,
                !args.no_resume,
            )
            .await
        }
        Command::YellowScreen { execute } => {
            run_yellow_screen(&targets_cfg.globals, &targets_by_id, &roots, execute)
        }
        Command::Merge { execute } => run_merge_stage(&targets_cfg.globals, &roots, execute),
        Command::Catalog => run_catalog(&policy, &roots),
    }
}

fn load_dotenv(dataset_root: Option<&Path>) {
    if let Some(root) = dataset_root {
        let env_path = root.join(".env");
        if env_path.exists() {
            let _ = dotenv_from_path(&env_path);
            eprintln!("loaded env from {}", env_path.display());
            return;
        }
    }
    if Path::new(".env").exists() {
        let _ = dotenv_from_path(".env");
        eprintln!("loaded env from ./.env");
    }
}

/// Resolved `globals.*_root` paths. `DATASET_ROOT`, when set, is joined
/// onto each configured (relative) root, per §6's "override for
/// `globals.*_root`".
struct Roots {
    raw: PathBuf,
    screened_yellow: PathBuf,
    combined: PathBuf,
    queues: PathBuf,
    manifests: PathBuf,
    ledger: PathBuf,
    pitches: PathBuf,
    catalogs: PathBuf,
}

impl Roots {
    fn resolve(globals: &GlobalsConfig, dataset_root: Option<&Path>) -> Self {
        let j = |s: &str| match dataset_root {
            Some(root) => root.join(s),
            None => PathBuf::from(s),
        };
        Self {
            raw: j(&globals.raw_root),
            screened_yellow: j(&globals.screened_yellow_root),
            combined: j(&globals.combined_root),
            queues: j(&globals.queues_root),
            manifests: j(&globals.manifests_root),
            ledger: j(&globals.ledger_root),
            pitches: j(&globals.pitches_root),
            catalogs: j(&globals.catalogs_root),
        }
    }
}

fn preflight_writable(dir: &Path) -> Result<(), CliError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| CliError::Preflight(format!("{} is not writable: {e}", dir.display())))
}

fn bucket_queue_path(queues_root: &Path, bucket: Bucket) -> PathBuf {
    let name = match bucket {
        Bucket::Green => "green",
        Bucket::Yellow => "yellow",
        Bucket::Red => "red",
    };
    queues_root.join(format!("{name}.jsonl"))
}

fn write_queue_file(path: &Path, rows: &[QueueRow]) -> Result<(), CliError> {
    let mut bytes = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut bytes, row)?;
        bytes.push(b'\n');
    }
    write_atomic(path, &bytes)?;
    Ok(())
}

// ---------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------

/// Current canonical evidence file for `target_dir`, if any — anything
/// named `license_evidence.<ext>` except the JSON sidecar and rotated
/// `.prev_N.` siblings (mirrors `dsaudit_evidence::store::rotate_existing`).
fn find_canonical_evidence_file(target_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(target_dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == "license_evidence.json" || name.contains(".prev_") {
            continue;
        }
        if name.starts_with("license_evidence.") {
            return Some(entry.path());
        }
    }
    None
}

fn ext_for_content_type(content_type: &str) -> &'static str {
    let base = content_type.split(';').next().unwrap_or("").trim().to_lowercase();
    match base.as_str() {
        "text/html" => "html",
        "text/plain" => "txt",
        "application/pdf" => "pdf",
        "application/json" => "json_doc",
        "text/markdown" => "md",
        _ => "bin",
    }
}

struct GatheredEvidence {
    snapshot: Option<EvidenceSnapshot>,
    text: Option<String>,
    offline_no_snapshot: bool,
}

async fn gather_evidence(
    client: &EvidenceClient,
    target: &Target,
    target_dir: &Path,
    no_fetch: bool,
) -> GatheredEvidence {
    if no_fetch {
        return match dsaudit_evidence::store::read_snapshot(target_dir) {
            Ok(Some(snapshot)) => {
                let text = find_canonical_evidence_file(target_dir)
                    .and_then(|p| std::fs::read(p).ok())
                    .and_then(|bytes| dsaudit_evidence::extract::extract_text(&snapshot.content_type, &bytes));
                GatheredEvidence { snapshot: Some(snapshot), text, offline_no_snapshot: false }
            }
            _ => GatheredEvidence { snapshot: None, text: None, offline_no_snapshot: true },
        };
    }

    match client.fetch(&target.license_evidence.url).await {
        Ok(fetched) => {
            let text = dsaudit_evidence::extract::extract_text(&fetched.content_type, &fetched.raw_bytes);
            let now = chrono::Utc::now().to_rfc3339();
            let snapshot = EvidenceSnapshot {
                content_type: fetched.content_type.clone(),
                sha256_raw_bytes: dsaudit_kernel::sha256_bytes(&fetched.raw_bytes),
                sha256_normalized_text: text
                    .as_deref()
                    .map(dsaudit_kernel::sha256_normalized_text)
                    .unwrap_or_default(),
                retrieved_at_utc: now,
                url_final: fetched.url_final.clone(),
                text_extraction_failed: text.is_none(),
            };
            let ext = ext_for_content_type(&fetched.content_type);
            if let Err(e) = dsaudit_evidence::store::write_snapshot(target_dir, ext, &fetched.raw_bytes, &snapshot) {
                tracing::error!(target_id = %target.id, error = %e, "failed to persist evidence snapshot");
            }
            GatheredEvidence { snapshot: Some(snapshot), text, offline_no_snapshot: false }
        }
        Err(EvidenceError::OfflineNoSnapshot) => {
            GatheredEvidence { snapshot: None, text: None, offline_no_snapshot: true }
        }
        Err(e) => {
            tracing::warn!(target_id = %target.id, error = %e, "evidence fetch failed, forcing yellow");
            GatheredEvidence { snapshot: None, text: None, offline_no_snapshot: true }
        }
    }
}

async fn run_classify(
    policy: &PolicySnapshot,
    targets: &[&Target],
    roots: &Roots,
    no_fetch: bool,
    workers: usize,
) -> Result<(), CliError> {
    preflight_writable(&roots.manifests)?;
    preflight_writable(&roots.queues)?;
    preflight_writable(&roots.ledger)?;

    let registry = dsaudit_acquire::registry();
    let client = Arc::new(EvidenceClient::new());
    let semaphore = Arc::new(tokio::sync::Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(targets.len());

    for target in targets {
        let target = (*target).clone();
        let target_dir = roots.manifests.join(&target.id.0);
        let client = client.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            std::fs::create_dir_all(&target_dir).ok();
            let evidence = gather_evidence(&client, &target, &target_dir, no_fetch).await;
            (target, evidence)
        }));
    }

    let evaluated_at_utc = chrono::Utc::now().to_rfc3339();
    let mut red_ledger = LedgerAppender::open(roots.ledger.join("red_rejected.jsonl"))?;

    let mut green_rows = Vec::new();
    let mut yellow_rows = Vec::new();
    let mut red_rows = Vec::new();

    for handle in handles {
        let (target, evidence) = handle.await.expect("classify task panicked");
        let manifest_dir_path = roots.manifests.join(&target.id.0);
        let evidence_ref = format!("manifests/{}/license_evidence.json", target.id.0);

        let input = ClassificationInput {
            target: &target,
            evidence_snapshot: evidence.snapshot.as_ref(),
            evidence_text: evidence.text.as_deref(),
            offline_no_snapshot: evidence.offline_no_snapshot,
            manifest_dir: target.id.0.clone(),
            evidence_ref,
        };

        let row = dsaudit_classify::classify_and_persist(
            &input,
            policy,
            &evaluated_at_utc,
            &manifest_dir_path,
            &mut red_ledger,
            &registry,
        )
        .map_err(|e| match e {
            ClassifyError::UnsupportedStrategy(name) => {
                CliError::PolicyRefused(format!("strategy `{name}` is not registered"))
            }
            other => CliError::Classify(other),
        })?;

        match row.bucket {
            Bucket::Green => green_rows.push(row),
            Bucket::Yellow => yellow_rows.push(row),
            Bucket::Red => red_rows.push(row),
        }
    }

    green_rows.sort_by(|a, b| a.target_id.0.cmp(&b.target_id.0));
    yellow_rows.sort_by(|a, b| a.target_id.0.cmp(&b.target_id.0));
    red_rows.sort_by(|a, b| a.target_id.0.cmp(&b.target_id.0));

    write_queue_file(&bucket_queue_path(&roots.queues, Bucket::Green), &green_rows)?;
    write_queue_file(&bucket_queue_path(&roots.queues, Bucket::Yellow), &yellow_rows)?;
    write_queue_file(&bucket_queue_path(&roots.queues, Bucket::Red), &red_rows)?;

    println!(
        "classify: green={} yellow={} red={}",
        green_rows.len(),
        yellow_rows.len(),
        red_rows.len()
    );
    Ok(())
}

// ---------------------------------------------------------------------
// acquire
// ---------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn run_acquire(
    targets_by_id: &HashMap<TargetId, Target>,
    roots: &Roots,
    bucket: BucketArg,
    execute: bool,
    workers: usize,
    limit_targets: Option<usize>,
    fail_on_error: bool,
    allow_huge_downloads: bool,
    resume: bool,
) -> Result<(), CliError> {
    let (bucket_name, bucket_enum) = match bucket {
        BucketArg::Green => ("green", Bucket::Green),
        BucketArg::Yellow => ("yellow", Bucket::Yellow),
    };

    let registry = dsaudit_acquire::registry();
    dsaudit_acquire::assert_registry_complete(&registry).map_err(|e| match e {
        AcquireError::UnknownStrategy(name) => {
            CliError::PolicyRefused(format!("strategy `{name}` is not registered"))
        }
        other => CliError::Acquire(other),
    })?;
    preflight_writable(&roots.raw)?;
    preflight_writable(&roots.manifests)?;
    preflight_writable(&roots.ledger)?;

    let mut rows: Vec<QueueRow> =
        read_ledger(bucket_queue_path(&roots.queues, bucket_enum))?;
    if let Some(n) = limit_targets {
        rows.truncate(n);
    }

    if !execute {
        println!("acquire --bucket {bucket_name}: {} target(s) planned (dry run)", rows.len());
        return Ok(());
    }

    let stage_name = format!("acquire_{bucket_name}");
    let ctx = Arc::new(AcquireContext::new(max_bytes_per_target(), allow_huge_downloads));

    let results = dsaudit_acquire::runner::run_acquisition(
        &rows,
        targets_by_id,
        &roots.raw,
        &roots.manifests,
        &stage_name,
        &registry,
        ctx,
        workers,
        resume,
    )
    .await?;

    let run_id = uuid::Uuid::new_v4().to_string();
    dsaudit_acquire::runner::write_summary_ledger(&roots.ledger, &run_id, &results)?;

    let failed = results
        .iter()
        .filter(|r| matches!(r.outcome, dsaudit_acquire::StrategyOutcome::Failed { .. }))
        .count();
    println!("acquire --bucket {bucket_name}: {} acquired, {failed} failed", results.len());

    if fail_on_error && failed > 0 {
        return Err(CliError::FailOnError(failed));
    }
    Ok(())
}

/// Per-target byte budget (§4.4); not yet exposed as a config knob, so a
/// generous fixed ceiling stands in until a target needs more.
fn max_bytes_per_target() -> u64 {
    2 * 1024 * 1024 * 1024
}

// ---------------------------------------------------------------------
// yellow_screen
// ---------------------------------------------------------------------

fn read_signoff(manifests_root: &Path, target_id: &str) -> Option<SignoffRecord> {
    let path = manifests_root.join(target_id).join("signoff.json");
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn evidence_context_for(manifests_root: &Path, target_id: &str) -> TargetEvidenceContext {
    let target_dir = manifests_root.join(target_id);
    match dsaudit_evidence::store::read_snapshot(&target_dir) {
        Ok(Some(snap)) => TargetEvidenceContext {
            current_evidence_hash: snap.sha256_raw_bytes,
            url: Some(snap.url_final),
            retrieved_at_utc: snap.retrieved_at_utc,
            content_type: Some(snap.content_type),
        },
        _ => TargetEvidenceContext {
            current_evidence_hash: String::new(),
            url: None,
            retrieved_at_utc: String::new(),
            content_type: None,
        },
    }
}

fn run_yellow_screen(
    globals: &GlobalsConfig,
    targets_by_id: &HashMap<TargetId, Target>,
    roots: &Roots,
    execute: bool,
) -> Result<(), CliError> {
    let rows: Vec<QueueRow> =
        read_ledger(bucket_queue_path(&roots.queues, Bucket::Yellow))?;

    if !execute {
        println!("yellow_screen: {} target(s) planned (dry run)", rows.len());
        return Ok(());
    }

    preflight_writable(&roots.screened_yellow)?;
    preflight_writable(&roots.ledger)?;
    preflight_writable(&roots.pitches)?;

    let signoffs_by_target: HashMap<TargetId, SignoffRecord> = rows
        .iter()
        .filter_map(|r| read_signoff(&roots.manifests, &r.target_id.0).map(|s| (r.target_id.clone(), s)))
        .collect();
    let evidence_by_target: HashMap<TargetId, TargetEvidenceContext> = rows
        .iter()
        .map(|r| (r.target_id.clone(), evidence_context_for(&roots.manifests, &r.target_id.0)))
        .collect();

    let result = run_screening(
        &rows,
        targets_by_id,
        &roots.raw.join("yellow"),
        &roots.screened_yellow,
        &roots.ledger,
        &roots.pitches,
        &globals.screening,
        globals.require_yellow_signoff,
        globals.sharding.max_records_per_shard,
        &signoffs_by_target,
        &evidence_by_target,
    )?;

    println!("yellow_screen: passed={} pitched={}", result.passed, result.pitched);
    Ok(())
}

// ---------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------

fn run_merge_stage(globals: &GlobalsConfig, roots: &Roots, execute: bool) -> Result<(), CliError> {
    let green_rows: Vec<QueueRow> =
        read_ledger(bucket_queue_path(&roots.queues, Bucket::Green))?;

    if !execute {
        println!("merge: {} GREEN target(s) planned (dry run)", green_rows.len());
        return Ok(());
    }

    preflight_writable(&roots.combined)?;
    preflight_writable(&roots.ledger)?;

    let green_root = roots.raw.join("green");
    for row in &green_rows {
        let target_dir = green_root.join(pool_dirname(row.license_pool)).join(&row.target_id.0);
        let evidence = evidence_context_for(&roots.manifests, &row.target_id.0);
        canonicalize_green_target(
            &target_dir,
            row,
            &globals.screening,
            &evidence.retrieved_at_utc,
            evidence.content_type.as_deref(),
            evidence.url.as_deref(),
            globals.sharding.max_records_per_shard,
        )?;
    }

    let index_root = roots.manifests.join(".dedupe_index");
    let result = run_merge(
        &green_root,
        &roots.screened_yellow,
        &roots.combined,
        &index_root,
        &roots.ledger,
        globals.sharding.max_records_per_shard,
        10_000,
    )?;

    println!("merge: merged={} skipped={}", result.merged, result.skipped);
    Ok(())
}

fn pool_dirname(pool: dsaudit_model::LicensePool) -> &'static str {
    match pool {
        dsaudit_model::LicensePool::Permissive => "permissive",
        dsaudit_model::LicensePool::Copyleft => "copyleft",
        dsaudit_model::LicensePool::Quarantine => "quarantine",
    }
}

// ---------------------------------------------------------------------
// catalog
// ---------------------------------------------------------------------

fn run_catalog(policy: &PolicySnapshot, roots: &Roots) -> Result<(), CliError> {
    preflight_writable(&roots.catalogs)?;

    let catalog_roots = dsaudit_catalog::CatalogRoots {
        raw_root: &roots.raw,
        screened_yellow_root: &roots.screened_yellow,
        combined_root: &roots.combined,
        ledger_root: &roots.ledger,
        manifests_root: &roots.manifests,
    };
    let run_id = uuid::Uuid::new_v4().to_string();
    let written_at_utc = chrono::Utc::now().to_rfc3339();

    let catalog = dsaudit_catalog::build_catalog(&catalog_roots, policy.policy_hash(), &run_id, &written_at_utc)?;
    dsaudit_catalog::write_catalog(&catalog, &roots.catalogs)?;

    println!(
        "catalog: combined={} failed_targets={}",
        catalog.stage_counts.get("combined").map(|c| c.files).unwrap_or(0),
        catalog.failed_targets.len()
    );
    Ok(())
}
