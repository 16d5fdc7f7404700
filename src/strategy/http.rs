//! In-process HTTP(S) transfers with `Range` resume.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::ftp::has_scheme_and_host;
use super::{Protocol, TransferContext, TransferOptions, TransferStrategy, TransferTask};
use crate::download::{TransferError, TransferStats};
use crate::resume::{Checkpointer, ResumeMarker, ResumeStore};

/// Streams `http://` and `https://` URLs straight to disk.
///
/// Created once per batch and shared by every task, so connections are
/// pooled across targets.
#[derive(Debug, Clone)]
pub struct HttpStrategy {
    client: Client,
    store: ResumeStore,
}

impl HttpStrategy {
    /// Builds the HTTP client from the batch timeouts and User-Agent.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Internal`] if the client cannot be built
    /// (e.g. TLS backend initialization failure).
    pub fn new(options: &TransferOptions) -> Result<Self, TransferError> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .read_timeout(options.timeout)
            .gzip(true)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| TransferError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            store: ResumeStore::new(),
        })
    }

    /// Offset to resume from: the partial file size, if a marker for the
    /// same target agrees with it.
    async fn resume_offset(&self, destination: &Path, target: &str) -> Option<(u64, ResumeMarker)> {
        let marker = self.store.read(destination).await?;
        let on_disk = tokio::fs::metadata(destination).await.ok()?.len();
        if marker.target == target && on_disk > 0 && on_disk == marker.bytes_downloaded {
            Some((on_disk, marker))
        } else {
            debug!(
                marker_bytes = marker.bytes_downloaded,
                on_disk, "resume marker does not match partial file, restarting"
            );
            None
        }
    }
}

#[async_trait]
impl TransferStrategy for HttpStrategy {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn can_handle(&self, target: &str) -> bool {
        has_scheme_and_host(target, &["http", "https"])
    }

    #[instrument(skip(self, task, ctx), fields(target = %task.target, task = %ctx.task_id()))]
    async fn attempt(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferStats, TransferError> {
        let started = Instant::now();
        let target = task.target.as_str();
        let destination = task.destination.as_path();
        let resume = task.options.resume;

        let previous = if resume {
            self.resume_offset(destination, target).await
        } else {
            None
        };
        let offset = previous.as_ref().map_or(0, |(offset, _)| *offset);

        let mut request = self.client.get(target);
        if offset > 0 {
            debug!(offset, "requesting range resume");
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransferError::from_reqwest(target, &e))?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            // Partial file is stale; the next attempt starts over
            if let Err(error) = self.store.clear(destination).await {
                warn!(error = %error, "failed to remove stale resume marker");
            }
            return Err(TransferError::http_status(target, status.as_u16()));
        }
        if !status.is_success() {
            return Err(TransferError::http_status(target, status.as_u16()));
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        if offset > 0 && !resumed {
            debug!(status = status.as_u16(), "server ignored range request, restarting");
        }
        let base = if resumed { offset } else { 0 };
        let total = derive_total_content_length(&response, base);

        let file = open_destination(destination, resumed).await?;
        let marker = match previous {
            Some((_, marker)) if resumed => marker,
            _ => ResumeMarker::new(target, total.unwrap_or(0), 0),
        };
        let mut checkpointer = if resume {
            Checkpointer::new(self.store, destination, marker)
        } else {
            Checkpointer::disabled(destination)
        };

        ctx.report(base, total);
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut failure = None;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    failure = Some(TransferError::from_reqwest(target, &e));
                    break;
                }
            };
            if let Err(e) = writer.write_all(&chunk).await {
                failure = Some(TransferError::io(destination, e));
                break;
            }
            written += chunk.len() as u64;
            ctx.report(base + written, total);
            checkpointer.record(base + written).await;
        }

        let flushed = writer.flush().await;
        if let Some(error) = failure {
            if resume && flushed.is_ok() && base + written > 0 {
                checkpointer.persist(base + written).await;
            } else {
                debug!(path = %destination.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(destination).await;
                if let Err(error) = self.store.clear(destination).await {
                    debug!(error = %error, "failed to remove resume marker");
                }
            }
            return Err(error);
        }
        flushed.map_err(|e| TransferError::io(destination, e))?;

        let final_size = base + written;
        if resumed && total.is_some_and(|expected| expected != final_size) {
            // Next attempt must not append to a file of unknown shape
            checkpointer.finish().await;
            let _ = tokio::fs::remove_file(destination).await;
            return Err(TransferError::integrity(
                destination,
                total.unwrap_or(0),
                final_size,
            ));
        }
        checkpointer.finish().await;

        info!(
            path = %destination.display(),
            bytes = final_size,
            resumed,
            "download complete"
        );
        Ok(TransferStats::new(written, started.elapsed(), destination).with_resumed(resumed))
    }
}

/// Opens the destination for append (resume) or create/truncate.
async fn open_destination(path: &Path, resumed: bool) -> Result<File, TransferError> {
    if resumed {
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| TransferError::io(path, e))?;
        handle
            .seek(std::io::SeekFrom::End(0))
            .await
            .map_err(|e| TransferError::io(path, e))?;
        Ok(handle)
    } else {
        File::create(path).await.map_err(|e| TransferError::io(path, e))
    }
}

/// Full size of the resource: `Content-Length` of a 200, or the offset plus
/// the remaining length of a 206.
fn derive_total_content_length(response: &reqwest::Response, offset: u64) -> Option<u64> {
    let current = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if response.status() == StatusCode::PARTIAL_CONTENT {
        current.map(|remaining| offset.saturating_add(remaining))
    } else {
        current
    }
}
