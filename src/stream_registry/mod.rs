//! StreamRegistry - multipart stream fan-out
//!
//! ## Responsibilities
//!
//! - Track live streaming clients and their per-client pending buffers
//! - Serve each client the cached frame at the configured rate
//! - Evict clients that error, stall, or stop draining their socket
//!
//! Every write is non-blocking: bytes the socket refuses stay in the
//! client's [`ByteBuf`] and are retried on the next scan, so one slow
//! client never stalls the others. A client whose buffer has gone
//! unwritten for the idle timeout is dropped.

use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::bytebuf::ByteBuf;
use crate::error::{Error, Result};
use crate::frame_cache::FrameCache;

pub mod conn;

pub use conn::{ClientConn, TcpConn};

/// Multipart boundary token
const BOUNDARY: &str = "9d52b4e1c0aa4f0d8e063d7c5a91f2b6";

/// Stream fan-out tuning
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Most clients served at once; further connects are refused
    pub max_clients: usize,
    /// Largest slice handed to one `try_write` call
    pub send_block: usize,
    /// Wall-clock budget for one client's flush within a scan
    pub send_budget: Duration,
    /// Evict a client whose pending bytes have not moved for this long
    pub idle_timeout: Duration,
    /// Wake hint while any client still has pending bytes
    pub pending_poll: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_clients: 8,
            send_block: 1024,
            send_budget: Duration::from_millis(50),
            idle_timeout: Duration::from_secs(10),
            pending_poll: Duration::from_millis(20),
        }
    }
}

/// One streaming client
struct StreamClient {
    conn: Box<dyn ClientConn>,
    /// Bytes accepted for this client but not yet taken by its socket
    buf: ByteBuf,
    /// Capture timestamp of the frame last queued for this client
    frame_ts: Option<Instant>,
    /// When a frame was last queued; paces this client to the target rate
    served_at: Option<Instant>,
    /// Last time the socket accepted any bytes
    last_write: Instant,
}

/// Registry of live multipart stream clients
pub struct StreamRegistry {
    config: StreamConfig,
    clients: Mutex<Vec<StreamClient>>,
}

impl StreamRegistry {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Number of live clients
    pub fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a client whose HTTP request head has already been consumed
    ///
    /// The multipart response preamble is queued immediately; the next
    /// scan starts flushing it.
    pub fn add(&self, conn: Box<dyn ClientConn>, now: Instant) -> Result<()> {
        let mut clients = self.lock()?;

        if clients.iter().any(|c| c.conn.id() == conn.id()) {
            return Err(Error::Conflict(format!(
                "stream client {} already registered",
                conn.id()
            )));
        }
        if clients.len() >= self.config.max_clients {
            return Err(Error::Conflict(format!(
                "stream client table full ({} clients)",
                clients.len()
            )));
        }

        let mut buf = ByteBuf::new();
        buf.set(preamble().as_bytes())?;

        tracing::info!(client = conn.id(), total = clients.len() + 1, "Stream client added");
        clients.push(StreamClient {
            conn,
            buf,
            frame_ts: None,
            served_at: None,
            last_write: now,
        });
        Ok(())
    }

    /// One fan-out scan: flush pending bytes and queue fresh frames
    ///
    /// Returns how soon the caller should scan again.
    pub fn process(&self, cache: &FrameCache, now: Instant) -> Result<Duration> {
        let mut clients = self.lock()?;

        let mut i = 0;
        while i < clients.len() {
            if self.serve(&mut clients[i], cache, now) {
                i += 1;
            } else {
                let gone = clients.swap_remove(i);
                tracing::info!(client = gone.conn.id(), total = clients.len(), "Stream client evicted");
            }
        }

        if clients.iter().any(|c| !c.buf.is_empty()) {
            Ok(self.config.pending_poll.min(cache.frame_period()))
        } else {
            Ok(cache.frame_period())
        }
    }

    /// Final flush for every client, then drop them all
    ///
    /// Best effort: write failures are ignored, the connections close on
    /// drop either way.
    pub fn purge(&self) -> Result<()> {
        let mut clients = self.lock()?;
        for client in clients.iter_mut() {
            let _ = self.flush(client, Instant::now());
        }
        let n = clients.len();
        clients.clear();
        if n > 0 {
            tracing::info!(purged = n, "Stream clients purged");
        }
        Ok(())
    }

    /// Serve one client; false means evict
    fn serve(&self, client: &mut StreamClient, cache: &FrameCache, now: Instant) -> bool {
        if now.duration_since(client.last_write) >= self.config.idle_timeout {
            tracing::info!(client = client.conn.id(), "Stream client idle, dropping");
            return false;
        }

        if let Err(e) = self.flush(client, now) {
            tracing::debug!(client = client.conn.id(), error = %e, "Stream write failed");
            return false;
        }

        if client.buf.is_empty() {
            let due = match client.served_at {
                None => true,
                Some(t) => now.duration_since(t) >= cache.frame_period(),
            };
            if due {
                let guard = match cache.grab(now) {
                    Ok(g) => g,
                    Err(e) => {
                        tracing::error!(client = client.conn.id(), error = %e, "Frame grab failed");
                        return false;
                    }
                };
                if client.frame_ts != Some(guard.timestamp()) {
                    if let Err(e) = append_frame(&mut client.buf, guard.data()) {
                        tracing::error!(client = client.conn.id(), error = %e, "Frame buffering failed");
                        return false;
                    }
                    client.frame_ts = Some(guard.timestamp());
                    drop(guard);
                    if let Err(e) = self.flush(client, now) {
                        tracing::debug!(client = client.conn.id(), error = %e, "Stream write failed");
                        return false;
                    }
                }
                // the gate closes even when the frame has not changed, so
                // a stale frame is not re-checked every scan
                client.served_at = Some(now);
            }
        }

        true
    }

    /// Push pending bytes to the socket in blocks, within the send budget
    fn flush(&self, client: &mut StreamClient, now: Instant) -> io::Result<()> {
        let deadline = Instant::now() + self.config.send_budget;
        while !client.buf.is_empty() {
            if Instant::now() >= deadline {
                break;
            }
            let pending = client.buf.as_slice();
            let block_len = pending.len().min(self.config.send_block);
            match client.conn.try_write(&pending[..block_len]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    client.buf.consume(n);
                    client.last_write = now;
                    // partial acceptance means the socket buffer is full
                    if n < block_len {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<StreamClient>>> {
        self.clients
            .lock()
            .map_err(|_| Error::Internal("stream client table poisoned".into()))
    }
}

/// Hand-written multipart response head, sent before the first frame
fn preamble() -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace;boundary={}\r\n\
         Transfer-Encoding: chunked\r\n\
         Access-Control-Allow-Origin: *\r\n\
         \r\n",
        BOUNDARY
    )
}

/// Queue one frame as a multipart part, each piece a well-formed HTTP
/// chunk (hex length, CRLF, data, CRLF)
fn append_frame(buf: &mut ByteBuf, frame: &[u8]) -> Result<()> {
    append_chunk(buf, format!("--{}\r\n", BOUNDARY).as_bytes())?;
    append_chunk(buf, b"Content-Type: image/jpeg\r\n")?;
    append_chunk(buf, format!("Content-Length: {}\r\n", frame.len()).as_bytes())?;
    append_chunk(buf, b"\r\n")?;
    append_chunk(buf, frame)
}

fn append_chunk(buf: &mut ByteBuf, payload: &[u8]) -> Result<()> {
    buf.append(format!("{:x}\r\n", payload.len()).as_bytes())?;
    buf.append(payload)?;
    buf.append(b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::conn::mock::MockConn;
    use super::*;
    use crate::frame_cache::FrameCacheConfig;
    use crate::sensor::mock::MockSensor;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn cache() -> FrameCache {
        let cache = FrameCache::new(Arc::new(MockSensor::new()), FrameCacheConfig::default());
        cache.initialize().unwrap();
        cache
    }

    fn count_parts(bytes: &[u8]) -> usize {
        let needle: &[u8] = b"image/jpeg";
        bytes.windows(needle.len()).filter(|w| *w == needle).count()
    }

    #[test]
    fn test_first_scan_sends_preamble_then_frame() {
        let registry = StreamRegistry::new(StreamConfig::default());
        let cache = cache();
        let (conn, log) = MockConn::new(1);
        let t0 = Instant::now();

        registry.add(Box::new(conn), t0).unwrap();
        registry.process(&cache, t0).unwrap();

        let bytes = log.bytes();
        assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\n"));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("multipart/x-mixed-replace"));
        assert!(text.contains(BOUNDARY));
        assert!(text.contains("Transfer-Encoding: chunked"));
        // the first frame goes out in the same scan
        assert_eq!(count_parts(&bytes), 1);
        assert!(text.contains("frame-"));
    }

    #[test]
    fn test_duplicate_client_rejected() {
        let registry = StreamRegistry::new(StreamConfig::default());
        let t0 = Instant::now();
        let (a, _) = MockConn::new(7);
        let (b, _) = MockConn::new(7);
        registry.add(Box::new(a), t0).unwrap();
        assert!(matches!(
            registry.add(Box::new(b), t0),
            Err(Error::Conflict(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_client_table_capacity() {
        let config = StreamConfig {
            max_clients: 2,
            ..StreamConfig::default()
        };
        let registry = StreamRegistry::new(config);
        let t0 = Instant::now();
        for id in 0..2 {
            let (conn, _) = MockConn::new(id);
            registry.add(Box::new(conn), t0).unwrap();
        }
        let (conn, _) = MockConn::new(99);
        assert!(matches!(
            registry.add(Box::new(conn), t0),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_partial_flush_resumes_without_duplication() {
        let registry = StreamRegistry::new(StreamConfig::default());
        let cache = cache();
        let (conn, log) = MockConn::new(1);
        let throttle = conn.throttle();
        let t0 = Instant::now();

        throttle.store(5, Ordering::SeqCst);
        registry.add(Box::new(conn), t0).unwrap();
        registry.process(&cache, t0).unwrap();
        assert_eq!(log.bytes(), b"HTTP/".to_vec());

        throttle.store(usize::MAX, Ordering::SeqCst);
        registry.process(&cache, t0 + Duration::from_millis(1)).unwrap();
        assert!(log.bytes().starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn test_pending_data_shortens_wake_hint() {
        let config = StreamConfig::default();
        let pending_poll = config.pending_poll;
        let registry = StreamRegistry::new(config);
        let cache = cache();
        let (conn, _) = MockConn::new(1);
        let throttle = conn.throttle();
        throttle.store(0, Ordering::SeqCst);
        let t0 = Instant::now();

        registry.add(Box::new(conn), t0).unwrap();
        let hint = registry.process(&cache, t0).unwrap();
        assert_eq!(hint, pending_poll);

        throttle.store(usize::MAX, Ordering::SeqCst);
        let hint = registry.process(&cache, t0 + Duration::from_millis(1)).unwrap();
        assert_eq!(hint, cache.frame_period());
    }

    #[test]
    fn test_stalled_client_evicted_after_idle_timeout() {
        let config = StreamConfig::default();
        let idle = config.idle_timeout;
        let registry = StreamRegistry::new(config);
        let cache = cache();
        let (conn, _) = MockConn::new(1);
        conn.throttle().store(0, Ordering::SeqCst);
        let t0 = Instant::now();

        registry.add(Box::new(conn), t0).unwrap();
        registry.process(&cache, t0).unwrap();
        assert_eq!(registry.len(), 1);

        registry.process(&cache, t0 + idle).unwrap();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_write_error_evicts_only_failing_client() {
        let registry = StreamRegistry::new(StreamConfig::default());
        let cache = cache();
        let t0 = Instant::now();

        let (good_a, log_a) = MockConn::new(1);
        let (bad, _) = MockConn::new(2);
        let (good_b, log_b) = MockConn::new(3);
        *bad.failer().lock().unwrap() = Some(io::ErrorKind::BrokenPipe);

        registry.add(Box::new(good_a), t0).unwrap();
        registry.add(Box::new(bad), t0).unwrap();
        registry.add(Box::new(good_b), t0).unwrap();
        registry.process(&cache, t0).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(count_parts(&log_a.bytes()), 1);
        assert_eq!(count_parts(&log_b.bytes()), 1);
    }

    #[test]
    fn test_grab_failure_evicts_client_and_scan_continues() {
        let registry = StreamRegistry::new(StreamConfig::default());
        let sensor = Arc::new(MockSensor::new());
        let cache = FrameCache::new(sensor.clone(), FrameCacheConfig::default());
        cache.initialize().unwrap();
        let t0 = Instant::now();

        // one client will need a fresh frame, the other is still choking
        // on its preamble and never reaches the grab
        let (needy, needy_log) = MockConn::new(1);
        let (stalled, stalled_log) = MockConn::new(2);
        let throttle = stalled.throttle();
        throttle.store(0, Ordering::SeqCst);
        registry.add(Box::new(needy), t0).unwrap();
        registry.add(Box::new(stalled), t0).unwrap();

        sensor.fail_capture.store(true, Ordering::SeqCst);
        registry.process(&cache, t0).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(needy_log.bytes().starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert_eq!(count_parts(&needy_log.bytes()), 0);
        assert!(stalled_log.bytes().is_empty());

        // the survivor streams normally once the sensor recovers
        sensor.fail_capture.store(false, Ordering::SeqCst);
        throttle.store(usize::MAX, Ordering::SeqCst);
        registry.process(&cache, t0 + Duration::from_millis(1)).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(count_parts(&stalled_log.bytes()), 1);
    }

    #[test]
    fn test_frame_served_once_per_period() {
        let registry = StreamRegistry::new(StreamConfig::default());
        let cache = cache();
        let (conn, log) = MockConn::new(1);
        let t0 = Instant::now();

        registry.add(Box::new(conn), t0).unwrap();
        registry.process(&cache, t0).unwrap();
        registry.process(&cache, t0 + Duration::from_millis(1)).unwrap();
        assert_eq!(count_parts(&log.bytes()), 1);

        registry.process(&cache, t0 + cache.frame_period()).unwrap();
        assert_eq!(count_parts(&log.bytes()), 2);
    }

    #[test]
    fn test_chunk_framing_shape() {
        let mut buf = ByteBuf::new();
        append_frame(&mut buf, b"JPEGDATA").unwrap();
        let text = String::from_utf8_lossy(buf.as_slice()).to_string();

        // every piece is an HTTP chunk: hex length, CRLF, data, CRLF
        let first = format!("--{}\r\n", BOUNDARY);
        assert!(text.starts_with(&format!("{:x}\r\n{}\r\n", first.len(), first)));
        assert!(text.contains("1a\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(text.contains("8\r\nJPEGDATA\r\n"));
        assert!(text.contains("Content-Length: 8\r\n"));
    }

    #[test]
    fn test_purge_flushes_and_clears() {
        let registry = StreamRegistry::new(StreamConfig::default());
        let cache = cache();
        let (conn, log) = MockConn::new(1);
        let throttle = conn.throttle();
        throttle.store(0, Ordering::SeqCst);
        let t0 = Instant::now();

        registry.add(Box::new(conn), t0).unwrap();
        registry.process(&cache, t0).unwrap();
        assert!(log.bytes().is_empty());

        throttle.store(usize::MAX, Ordering::SeqCst);
        registry.purge().unwrap();
        assert_eq!(registry.len(), 0);
        assert!(log.bytes().starts_with(b"HTTP/1.1 200 OK\r\n"));
    }
}
