//! Reachability - ICMP network reachability monitor
//!
//! ## Responsibilities
//!
//! - Probe one target with ICMP echo requests on a fixed cycle
//! - Validate replies (source, protocol, type) against the target
//! - Escalate after too many consecutive missed replies
//!
//! Four-state machine per target. `Init` sends a probe; `Blck` retries a
//! send the socket refused, bounded by an overall blocked-timeout; `Sent`
//! awaits a validated reply, bounded by a receive timeout; `Wait` idles
//! until the next cycle. Missed replies are retried immediately; once the
//! consecutive-miss counter passes its limit the monitor reports a
//! distinct timed-out status exactly once and starts over, leaving policy
//! (typically a device restart) to the caller. Socket failures and a
//! blocked-timeout expiry are fatal.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub mod packet;
pub mod socket;

pub use socket::{IcmpTransport, RawIcmpSocket};

use packet::{classify_reply, encode_echo_request, ReplyVerdict, PACKET_LEN};

/// Reachability monitor tuning
#[derive(Debug, Clone)]
pub struct PingConfig {
    /// Consecutive missed replies tolerated before escalating
    pub max_timeouts: u8,
    /// Give up if sends keep blocking for this long
    pub blck_timeout: Duration,
    /// How long to wait for a reply to one probe
    pub sent_timeout: Duration,
    /// Poll interval while a send or receive is pending
    pub retry_interval: Duration,
    /// Idle time between probe cycles
    pub cycle_interval: Duration,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            max_timeouts: 3,
            blck_timeout: Duration::from_millis(5000),
            sent_timeout: Duration::from_millis(5000),
            retry_interval: Duration::from_millis(1000),
            cycle_interval: Duration::from_millis(15000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PingState {
    Init,
    Blck,
    Sent,
    Wait,
}

/// What one processing pass concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingStatus {
    /// Nothing noteworthy; keep scheduling
    Normal,
    /// Too many consecutive missed replies; reported once per episode
    TimedOut,
}

/// Resolve a configured host into the IPv4 address to probe
pub fn resolve_target(host: &str) -> Result<Ipv4Addr> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }
    let addrs = (host, 0)
        .to_socket_addrs()
        .map_err(|e| Error::Config(format!("cannot resolve ping host {}: {}", host, e)))?;
    addrs
        .filter_map(|a| match a {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| Error::Config(format!("no IPv4 address for ping host {}", host)))
}

/// ICMP reachability monitor for one target
pub struct PingMonitor<T: IcmpTransport> {
    transport: T,
    target: Ipv4Addr,
    config: PingConfig,
    state: PingState,
    ident: u16,
    seq: u16,
    /// When the current state was entered
    last_event: Option<Instant>,
    /// Earliest time the next pass has anything to do
    next_event: Option<Instant>,
    /// Consecutive receive timeouts
    timeouts: u8,
}

impl PingMonitor<RawIcmpSocket> {
    /// Monitor `host` over a raw ICMP socket
    pub fn open(host: &str, config: PingConfig) -> Result<Self> {
        let target = resolve_target(host)?;
        let transport = RawIcmpSocket::new(target)?;
        tracing::info!(host = %host, target = %target, "Reachability monitor started");
        Ok(Self::new(transport, target, config))
    }
}

impl<T: IcmpTransport> PingMonitor<T> {
    pub fn new(transport: T, target: Ipv4Addr, config: PingConfig) -> Self {
        Self {
            transport,
            target,
            config,
            state: PingState::Init,
            ident: std::process::id() as u16,
            seq: 0,
            last_event: None,
            next_event: None,
            timeouts: 0,
        }
    }

    /// One cooperative pass: run the state machine until it has to wait
    ///
    /// Returns the status plus how long until the next pass is due.
    pub fn process(&mut self, now: Instant) -> Result<(PingStatus, Duration)> {
        // a pending reply can be picked up whenever the loop runs early;
        // the other states have nothing to do before their next event
        if self.state != PingState::Sent {
            if let Some(next) = self.next_event {
                if now < next {
                    return Ok((PingStatus::Normal, next - now));
                }
            }
        }

        loop {
            match self.state {
                PingState::Init => {
                    if self.send()? {
                        tracing::debug!(target = %self.target, seq = self.seq, "Probe sent");
                        self.state = PingState::Sent;
                        self.last_event = Some(now);
                        self.next_event = Some(now);
                        continue;
                    }
                    self.state = PingState::Blck;
                    self.last_event = Some(now);
                    self.next_event = Some(now + self.config.retry_interval);
                    return Ok((PingStatus::Normal, self.config.retry_interval));
                }

                PingState::Blck => {
                    let expired = self
                        .last_event
                        .map_or(true, |t| now >= t + self.config.blck_timeout);
                    if expired {
                        return Err(Error::Unreachable(
                            "probe send blocked past its timeout".into(),
                        ));
                    }
                    if self.send()? {
                        tracing::debug!(target = %self.target, seq = self.seq, "Probe sent");
                        self.state = PingState::Sent;
                        self.last_event = Some(now);
                        self.next_event = Some(now);
                        continue;
                    }
                    self.next_event = Some(now + self.config.retry_interval);
                    return Ok((PingStatus::Normal, self.config.retry_interval));
                }

                PingState::Sent => {
                    let expired = self
                        .last_event
                        .map_or(true, |t| now >= t + self.config.sent_timeout);
                    if expired {
                        if self.timeouts > self.config.max_timeouts {
                            tracing::error!(
                                target = %self.target,
                                misses = self.timeouts,
                                "Reachability target not answering"
                            );
                            self.state = PingState::Init;
                            self.timeouts = 0;
                            self.last_event = None;
                            self.next_event = None;
                            return Ok((PingStatus::TimedOut, Duration::ZERO));
                        }
                        self.timeouts += 1;
                        tracing::warn!(
                            target = %self.target,
                            misses = self.timeouts,
                            "Probe reply timed out"
                        );
                        self.state = PingState::Init;
                        self.last_event = Some(now);
                        self.next_event = Some(now);
                        continue;
                    }

                    if self.recv()? {
                        tracing::debug!(target = %self.target, "Probe reply received");
                        self.state = PingState::Wait;
                        self.timeouts = 0;
                        self.last_event = Some(now);
                        self.next_event = Some(now + self.config.cycle_interval);
                        continue;
                    }
                    self.next_event = Some(now + self.config.retry_interval);
                    return Ok((PingStatus::Normal, self.config.retry_interval));
                }

                PingState::Wait => {
                    if let Some(next) = self.next_event {
                        if now < next {
                            return Ok((PingStatus::Normal, next - now));
                        }
                    }
                    self.state = PingState::Init;
                    self.last_event = Some(now);
                    self.next_event = Some(now);
                    continue;
                }
            }
        }
    }

    /// Send one probe; false when the socket would block
    fn send(&mut self) -> Result<bool> {
        let request = encode_echo_request(self.ident, self.seq);
        match self.transport.try_send(&request) {
            Ok(n) if n == request.len() => {
                self.seq = self.seq.wrapping_add(1);
                Ok(true)
            }
            Ok(n) => Err(Error::Internal(format!(
                "short probe send: {} of {} bytes",
                n,
                request.len()
            ))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drain the socket until a valid reply or it would block
    fn recv(&mut self) -> Result<bool> {
        let mut buf = [0u8; PACKET_LEN];
        loop {
            let (n, src) = match self.transport.try_recv(&mut buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            match src {
                Some(SocketAddr::V4(_)) => {}
                _ => {
                    tracing::warn!("Dropping non-IPv4 packet");
                    continue;
                }
            }
            match classify_reply(&buf[..n], self.target) {
                ReplyVerdict::EchoReply => return Ok(true),
                ReplyVerdict::Discard(reason) => {
                    tracing::warn!(reason = reason, "Dropping packet");
                    continue;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::packet::build_reply;
    use super::*;
    use std::collections::VecDeque;

    const TARGET: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);

    struct MockTransport {
        sent: Vec<Vec<u8>>,
        send_blocked: bool,
        inbox: VecDeque<(Vec<u8>, Option<SocketAddr>)>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                sent: Vec::new(),
                send_blocked: false,
                inbox: VecDeque::new(),
            }
        }

        fn deliver_reply(&mut self) {
            let datagram = build_reply(TARGET, 0, 1);
            let src = SocketAddr::from((TARGET, 0));
            self.inbox.push_back((datagram, Some(src)));
        }
    }

    impl IcmpTransport for MockTransport {
        fn try_send(&mut self, packet: &[u8]) -> io::Result<usize> {
            if self.send_blocked {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.sent.push(packet.to_vec());
            Ok(packet.len())
        }

        fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
            match self.inbox.pop_front() {
                None => Err(io::ErrorKind::WouldBlock.into()),
                Some((datagram, src)) => {
                    let n = datagram.len().min(buf.len());
                    buf[..n].copy_from_slice(&datagram[..n]);
                    Ok((n, src))
                }
            }
        }
    }

    fn monitor(transport: MockTransport) -> PingMonitor<MockTransport> {
        PingMonitor::new(transport, TARGET, PingConfig::default())
    }

    #[test]
    fn test_probe_reply_cycle_timeline() {
        let mut mon = monitor(MockTransport::new());
        let cfg = PingConfig::default();
        let t0 = Instant::now();

        // probe goes out at t=0
        let (status, _) = mon.process(t0).unwrap();
        assert_eq!(status, PingStatus::Normal);
        assert_eq!(mon.transport.sent.len(), 1);

        // reply arrives at t=50ms and is picked up on the next pass
        mon.transport.deliver_reply();
        let (status, hint) = mon.process(t0 + Duration::from_millis(50)).unwrap();
        assert_eq!(status, PingStatus::Normal);
        assert_eq!(hint, cfg.cycle_interval);

        // idle until the cycle interval elapses at t=15050ms
        let (_, hint) = mon
            .process(t0 + Duration::from_millis(10_050))
            .unwrap();
        assert_eq!(hint, Duration::from_millis(5_000));
        assert_eq!(mon.transport.sent.len(), 1);

        // next cycle begins with a fresh probe
        mon.process(t0 + Duration::from_millis(15_050)).unwrap();
        assert_eq!(mon.transport.sent.len(), 2);
    }

    #[test]
    fn test_sequence_increments_per_probe() {
        let mut mon = monitor(MockTransport::new());
        let cfg = PingConfig::default();
        let t0 = Instant::now();

        mon.process(t0).unwrap();
        mon.process(t0 + cfg.sent_timeout).unwrap();
        let sent = &mon.transport.sent;
        assert_eq!(&sent[0][6..8], &[0, 0]);
        assert_eq!(&sent[1][6..8], &[0, 1]);
    }

    #[test]
    fn test_escalates_exactly_once_then_restarts() {
        let mut mon = monitor(MockTransport::new());
        let cfg = PingConfig::default();
        let mut t = Instant::now();

        mon.process(t).unwrap();

        let mut statuses = Vec::new();
        for _ in 0..5 {
            t += cfg.sent_timeout;
            let (status, _) = mon.process(t).unwrap();
            statuses.push(status);
        }
        assert_eq!(statuses[..4], [PingStatus::Normal; 4]);
        assert_eq!(statuses[4], PingStatus::TimedOut);

        // counter was reset: the next episode needs the same number of
        // misses before escalating again
        t += cfg.retry_interval;
        mon.process(t).unwrap();
        for _ in 0..4 {
            t += cfg.sent_timeout;
            let (status, _) = mon.process(t).unwrap();
            assert_eq!(status, PingStatus::Normal);
        }
        t += cfg.sent_timeout;
        let (status, _) = mon.process(t).unwrap();
        assert_eq!(status, PingStatus::TimedOut);
    }

    #[test]
    fn test_foreign_packets_discarded_not_fatal() {
        let mut mon = monitor(MockTransport::new());
        let t0 = Instant::now();
        mon.process(t0).unwrap();

        // wrong source, then wrong type, then the real reply
        let src = SocketAddr::from((TARGET, 0));
        mon.transport.inbox.push_back((
            build_reply(Ipv4Addr::new(10, 0, 0, 9), 0, 1),
            Some(src),
        ));
        mon.transport
            .inbox
            .push_back((build_reply(TARGET, 8, 1), Some(src)));
        mon.transport.deliver_reply();
        let (status, hint) = mon.process(t0 + Duration::from_millis(10)).unwrap();
        assert_eq!(status, PingStatus::Normal);
        assert_eq!(hint, PingConfig::default().cycle_interval);
    }

    #[test]
    fn test_blocked_send_recovers() {
        let mut transport = MockTransport::new();
        transport.send_blocked = true;
        let mut mon = monitor(transport);
        let cfg = PingConfig::default();
        let t0 = Instant::now();

        let (_, hint) = mon.process(t0).unwrap();
        assert_eq!(hint, cfg.retry_interval);
        assert!(mon.transport.sent.is_empty());

        mon.transport.send_blocked = false;
        mon.process(t0 + cfg.retry_interval).unwrap();
        assert_eq!(mon.transport.sent.len(), 1);
    }

    #[test]
    fn test_blocked_send_past_timeout_is_fatal() {
        let mut transport = MockTransport::new();
        transport.send_blocked = true;
        let mut mon = monitor(transport);
        let cfg = PingConfig::default();
        let t0 = Instant::now();

        mon.process(t0).unwrap();
        assert!(matches!(
            mon.process(t0 + cfg.blck_timeout),
            Err(Error::Unreachable(_))
        ));
    }
}
