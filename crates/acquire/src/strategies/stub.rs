//! Stub strategy for registry entries without a shipped implementation
//! (`ftp`, `zenodo`, `figshare`, `s3_public`, `s3_sync`,
//! `aws_requester_pays`, `huggingface_datasets`). The name is registered
//! so an enabled target using it is not a classify-time "unsupported
//! strategy" error; invoking it at acquire time fails the target
//! explicitly instead of silently producing zero files.

use std::path::Path;

use async_trait::async_trait;

use dsaudit_model::{QueueRow, Target};

use crate::{AcquireContext, Strategy, StrategyOutcome};

pub struct StubStrategy {
    name: &'static str,
}

impl StubStrategy {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Strategy for StubStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn acquire(&self, _target: &Target, _row: &QueueRow, _output_dir: &Path, _ctx: &AcquireContext) -> StrategyOutcome {
        StrategyOutcome::Failed {
            reason: format!("strategy_not_implemented: {}", self.name),
        }
    }
}
