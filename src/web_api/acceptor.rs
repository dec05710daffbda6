//! Connection acceptor
//!
//! The multipart stream writes its own response bytes through the stream
//! registry, so `/stream` connections must never enter the HTTP stack:
//! the acceptor peeks at the request line, drains the request head, and
//! hands the raw socket to the registry. Every other connection is served
//! by the router over hyper.

use std::time::{Duration, Instant};

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};
use crate::state::AppState;
use crate::stream_registry::TcpConn;

/// Longest a client gets to finish sending its request head
const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest request head accepted on the stream path
const HEAD_MAX: usize = 8192;

/// Backoff between peeks while the request line is still incomplete
const PEEK_RETRY: Duration = Duration::from_millis(10);

const STREAM_PREFIX: &[u8] = b"GET /stream";

/// Accept connections forever, dispatching each to the registry or hyper
pub async fn serve(listener: TcpListener, state: AppState, router: Router) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        let router = router.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state, router).await {
                tracing::debug!(peer = %peer, error = %e, "Connection closed with error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, state: AppState, router: Router) -> Result<()> {
    let is_stream = tokio::time::timeout(HEAD_TIMEOUT, peek_is_stream_request(&stream))
        .await
        .map_err(|_| Error::Internal("request line timed out".into()))??;

    if is_stream {
        tokio::time::timeout(HEAD_TIMEOUT, drain_request_head(&mut stream))
            .await
            .map_err(|_| Error::Internal("request head timed out".into()))??;
        state
            .registry
            .add(Box::new(TcpConn::new(stream)), Instant::now())?;
        state.wake.notify_one();
        return Ok(());
    }

    let service = TowerToHyperService::new(router);
    auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await
        .map_err(|e| Error::Internal(format!("http connection failed: {}", e)))?;
    Ok(())
}

/// Peek the request line without consuming it
async fn peek_is_stream_request(stream: &TcpStream) -> Result<bool> {
    // the target is a match only when followed by a space or query string
    let want = STREAM_PREFIX.len() + 1;
    let mut buf = [0u8; 16];
    let mut seen = 0;
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Err(Error::Internal("connection closed before request".into()));
        }
        let common = n.min(STREAM_PREFIX.len());
        if buf[..common] != STREAM_PREFIX[..common] {
            return Ok(false);
        }
        if n >= want {
            return Ok(matches!(buf[STREAM_PREFIX.len()], b' ' | b'?'));
        }
        // peek leaves the bytes queued, so the socket stays readable;
        // back off until more of the request line has arrived
        if n <= seen {
            tokio::time::sleep(PEEK_RETRY).await;
        }
        seen = n;
    }
}

/// Consume the HTTP request head up to and including the blank line
async fn drain_request_head(stream: &mut TcpStream) -> Result<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::Internal("connection closed mid request head".into()));
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(());
        }
        if head.len() > HEAD_MAX {
            return Err(Error::Validation("request head too large".into()));
        }
    }
}
