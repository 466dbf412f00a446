use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bdd_core::{ArchiveRequest, IngestError, TargetResolver};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tracing::{debug, info, warn};

use super::{ArchiveTarget, Archiver, StreamDecompressor};
use crate::lock::LockRegistry;
use crate::wire;

/// Progress of a single archive session.
///
/// `Failed` is reachable from every other state; both terminal states are
/// reached only after the archive lock has been released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    LockWait,
    Streaming,
    Flushing,
    SubprocessWait,
    Done,
    Failed,
}

/// Byte counts of a completed session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub chunks: u64,
    pub compressed_bytes: u64,
    pub decompressed_bytes: u64,
}

struct Session {
    conn_id: u64,
    state: SessionState,
    summary: SessionSummary,
}

impl Session {
    fn new(conn_id: u64) -> Self {
        Self {
            conn_id,
            state: SessionState::Init,
            summary: SessionSummary::default(),
        }
    }

    fn enter(&mut self, next: SessionState) {
        debug!(conn_id = self.conn_id, from = ?self.state, to = ?next, "Archive session transition");
        self.state = next;
    }
}

/// Runs ARCHIVE commands: lock, signal, pipe the decompressed stream into the
/// archiver, wait for it.
///
/// Sessions whose requests share a lock key run one at a time; a waiting
/// session does not send its continue signal before the running one is done.
pub struct ArchiveService {
    registry: Arc<LockRegistry>,
    resolver: Arc<dyn TargetResolver>,
    archiver: Arc<dyn Archiver>,
    idle_timeout: Option<Duration>,
}

impl ArchiveService {
    pub fn new(
        registry: Arc<LockRegistry>,
        resolver: Arc<dyn TargetResolver>,
        archiver: Arc<dyn Archiver>,
    ) -> Self {
        Self {
            registry,
            resolver,
            archiver,
            idle_timeout: None,
        }
    }

    /// Fail a session whose client does not deliver the next chunk in time.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Run one archive session over an already validated request.
    ///
    /// `reader` is positioned right after the parameter record; the continue
    /// signal is written to `writer`.
    pub async fn run<R, W>(
        &self,
        conn_id: u64,
        request: &ArchiveRequest,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<SessionSummary, IngestError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut session = Session::new(conn_id);

        match self.drive(&mut session, request, reader, writer).await {
            Ok(()) => {
                session.enter(SessionState::Done);
                info!(
                    conn_id,
                    chunks = session.summary.chunks,
                    compressed = session.summary.compressed_bytes,
                    decompressed = session.summary.decompressed_bytes,
                    "Stored archive {}",
                    request.archive_id()
                );
                Ok(session.summary)
            }
            Err(e) => {
                let failed_in = session.state;
                session.enter(SessionState::Failed);
                debug!(conn_id, state = ?failed_in, "Archive session aborted");
                Err(e)
            }
        }
    }

    async fn drive<R, W>(
        &self,
        session: &mut Session,
        request: &ArchiveRequest,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<(), IngestError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let key = request.lock_key();
        let repository = self
            .resolver
            .resolve(request.backup_type, request.namespace.as_deref())
            .await?;
        let target = ArchiveTarget::new(repository, request.archive_id());

        session.enter(SessionState::LockWait);
        // Released when this function returns, whatever the outcome
        let _guard = self.registry.lock(&key).await;
        info!(
            conn_id = session.conn_id,
            %key,
            registered_keys = self.registry.len(),
            "Acquired archive lock"
        );
        wire::send_continue(writer).await?;

        session.enter(SessionState::Streaming);
        let mut child = self
            .archiver
            .create_command(&target, &request.stdin_name)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                IngestError::Subprocess(format!(
                    "Failed to spawn archiver for {}: {}",
                    target.location(),
                    e
                ))
            })?;
        debug!(
            conn_id = session.conn_id,
            pid = ?child.id(),
            "Spawned archiver for {}",
            target.location()
        );

        if let Err(e) = self.pipe_stream(session, reader, &mut child).await {
            terminate(&mut child, session.conn_id).await;
            return Err(e);
        }

        session.enter(SessionState::SubprocessWait);
        let status = child.wait().await.map_err(|e| {
            IngestError::Subprocess(format!("Failed to wait for archiver: {}", e))
        })?;
        if !status.success() {
            return Err(IngestError::Subprocess(format!(
                "archiver for {} exited with {}",
                target.location(),
                status
            )));
        }
        Ok(())
    }

    /// Streaming and Flushing: forward decompressed chunks, then close stdin.
    async fn pipe_stream<R>(
        &self,
        session: &mut Session,
        reader: &mut R,
        child: &mut Child,
    ) -> Result<(), IngestError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| IngestError::Subprocess("archiver stdin is not piped".to_string()))?;
        let mut decompressor = StreamDecompressor::new()?;

        while let Some(chunk) = self.within_idle_timeout(wire::read_chunk(&mut *reader)).await? {
            session.summary.chunks += 1;
            session.summary.compressed_bytes += chunk.len() as u64;

            let data = decompressor.feed(&chunk)?;
            forward(&mut stdin, &data).await?;
            session.summary.decompressed_bytes += data.len() as u64;
        }

        session.enter(SessionState::Flushing);
        let tail = decompressor.finish()?;
        forward(&mut stdin, &tail).await?;
        session.summary.decompressed_bytes += tail.len() as u64;

        stdin.flush().await.map_err(|e| {
            IngestError::Subprocess(format!("Failed to flush archiver stdin: {}", e))
        })?;
        // Dropping the handle closes the pipe; the archiver sees EOF
        drop(stdin);
        Ok(())
    }

    async fn within_idle_timeout<T, F>(&self, read: F) -> Result<T, IngestError>
    where
        F: Future<Output = Result<T, IngestError>>,
    {
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
                IngestError::Connection(format!("client sent no data for {:?}", limit))
            })?,
            None => read.await,
        }
    }
}

async fn forward(stdin: &mut ChildStdin, data: &[u8]) -> Result<(), IngestError> {
    if data.is_empty() {
        return Ok(());
    }
    stdin
        .write_all(data)
        .await
        .map_err(|e| IngestError::Subprocess(format!("Failed to write to archiver stdin: {}", e)))
}

async fn terminate(child: &mut Child, conn_id: u64) {
    match child.try_wait() {
        Ok(Some(status)) => debug!(conn_id, "Archiver already exited with {}", status),
        _ => match child.kill().await {
            Ok(()) => debug!(conn_id, "Killed archiver"),
            Err(e) => warn!(conn_id, "Failed to kill archiver: {}", e),
        },
    }
}
