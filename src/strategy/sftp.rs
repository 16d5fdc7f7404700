//! SFTP transfers through curl's `sftp://` support.
//!
//! Authentication is whatever curl picks up from the URL and the user's
//! SSH agent and `known_hosts`; no SSH logic lives here.

use async_trait::async_trait;
use tracing::instrument;

use super::ftp::{CURL, curl_transfer, has_scheme_and_host};
use super::{Protocol, TransferContext, TransferStrategy, TransferTask};
use crate::download::{TransferError, TransferStats};

/// Transfers `sftp://` URLs with curl.
#[derive(Debug, Clone)]
pub struct SftpStrategy {
    program: String,
}

impl Default for SftpStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl SftpStrategy {
    /// Uses `curl` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program(CURL)
    }

    /// Uses a specific curl binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl TransferStrategy for SftpStrategy {
    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }

    fn can_handle(&self, target: &str) -> bool {
        has_scheme_and_host(target, &["sftp"])
    }

    #[instrument(skip(self, task, ctx), fields(target = %task.target, task = %ctx.task_id()))]
    async fn attempt(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferStats, TransferError> {
        curl_transfer(&self.program, task, ctx).await
    }
}
