//! TCP listener and per-connection command dispatch.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bdd_core::{decode_metadata, ArchiveRequest, Command, IngestError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveService;
use crate::metadata::{MetadataSink, IMAGE_META_STORE, STACK_META_STORE};
use crate::wire;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Pause after a failed `accept` before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Everything a connection handler needs, shared by all connections.
pub struct ServerState {
    archives: ArchiveService,
    metadata: MetadataSink,
}

impl ServerState {
    pub fn new(archives: ArchiveService, metadata: MetadataSink) -> Self {
        Self { archives, metadata }
    }

    /// Decode one command from `reader` and execute it.
    ///
    /// Nothing past the tag is read when the tag is unknown, and requests are
    /// fully validated before any lock is taken.
    pub async fn dispatch<R, W>(
        &self,
        conn_id: u64,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<(), IngestError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let Some(tag) = wire::read_tag(reader).await? else {
            debug!(conn_id, "Client closed without sending a command");
            return Ok(());
        };
        let command = Command::from_tag(tag)?;
        debug!(conn_id, %command, "Received command");

        let params = wire::read_params(reader).await?;
        match command {
            Command::Archive => {
                let request = ArchiveRequest::decode(&params)?;
                self.archives.run(conn_id, &request, reader, writer).await?;
            }
            Command::ImageMeta => {
                let record = decode_metadata(&params)?;
                self.metadata.append(conn_id, IMAGE_META_STORE, &record).await?;
            }
            Command::StackMeta => {
                let record = decode_metadata(&params)?;
                self.metadata.append(conn_id, STACK_META_STORE, &record).await?;
            }
        }
        Ok(())
    }
}

/// Accepts connections and runs each one on its own task.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    pub async fn bind(addr: SocketAddr, state: Arc<ServerState>) -> Result<Self, IngestError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| IngestError::Io(format!("Failed to bind {}: {}", addr, e)))?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IngestError> {
        self.listener
            .local_addr()
            .map_err(|e| IngestError::Io(format!("Failed to get local address: {}", e)))
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Sessions already running are not interrupted; they finish on their
    /// own tasks.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), IngestError>
    where
        F: Future<Output = ()>,
    {
        info!("Listening on tcp://{}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Stopped accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let conn_id = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(handle_connection(Arc::clone(&self.state), conn_id, stream, peer));
                    }
                    Err(e) => accept_failed(e).await,
                },
            }
        }
    }
}

/// Errors like EMFILE persist until running sessions release descriptors, so
/// retrying at once would only spin.
async fn accept_failed(e: io::Error) {
    warn!("Failed to accept connection: {}", e);
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

async fn handle_connection(
    state: Arc<ServerState>,
    conn_id: u64,
    stream: TcpStream,
    peer: SocketAddr,
) {
    debug!(conn_id, %peer, "Accepted connection");
    let (mut reader, mut writer) = stream.into_split();

    match state.dispatch(conn_id, &mut reader, &mut writer).await {
        Ok(()) => debug!(conn_id, %peer, "Connection finished"),
        Err(e) if e.is_client_fault() => warn!(conn_id, %peer, "Connection aborted: {}", e),
        Err(e) => error!(conn_id, %peer, "Request failed: {}", e),
    }

    if let Err(e) = writer.shutdown().await {
        debug!(conn_id, "Failed to shut down connection: {}", e);
    }
}
