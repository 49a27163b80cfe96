//! ICMP echo reachability probes.
//!
//! Opening a raw ICMP socket needs elevated privileges (root or
//! `CAP_NET_RAW` on Linux).

use async_trait::async_trait;
use log::debug;
use pnet_packet::{
    Packet,
    icmp::{
        IcmpCode, IcmpPacket, IcmpTypes, MutableIcmpPacket, checksum, echo_reply::EchoReplyPacket,
        echo_request::MutableEchoRequestPacket,
    },
    ip::IpNextHeaderProtocols,
    ipv4::Ipv4Packet,
};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    io::{ErrorKind, Read},
    net::{IpAddr, Ipv4Addr, SocketAddrV4},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::config::ProbeOptions;
use crate::error::Error;

pub const PROBE_COUNT: u16 = 4;
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

const MAX_DATAGRAM: usize = 1500;
/// Upper bound on one blocking read, so an abandoned probe stops promptly.
const READ_SLICE: Duration = Duration::from_millis(100);
const ECHO_REPLY: u8 = IcmpTypes::EchoReply.0;
const ECHO_REQUEST: u8 = IcmpTypes::EchoRequest.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingOutcome {
    Success,
    /// No reply within `timeout`.
    Unreachable { timeout: Duration },
    ProtocolError(String),
    WrongReplyType { expected: u8, actual: u8 },
}

/// One echo round trip. For `Unreachable` the responder is the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResult {
    pub responder: IpAddr,
    pub round_trip_time: Duration,
    pub outcome: PingOutcome,
}

impl PingResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == PingOutcome::Success
    }

    /// The round trip time on success, the outcome as an error otherwise.
    ///
    /// # Errors
    ///
    /// [`Error::Unreachable`], [`Error::IcmpProtocol`] or
    /// [`Error::WrongReplyType`] matching the outcome.
    pub fn into_result(self) -> Result<Duration, Error> {
        match self.outcome {
            PingOutcome::Success => Ok(self.round_trip_time),
            PingOutcome::Unreachable { timeout } => Err(Error::Unreachable {
                destination: self.responder,
                timeout,
            }),
            PingOutcome::ProtocolError(reason) => Err(Error::IcmpProtocol(reason)),
            PingOutcome::WrongReplyType { expected, actual } => Err(Error::WrongReplyType {
                expected: icmp_type_name(expected),
                actual: icmp_type_name(actual),
            }),
        }
    }
}

#[must_use]
pub fn icmp_type_name(icmp_type: u8) -> String {
    let name = match icmp_type {
        0 => "echo reply",
        3 => "destination unreachable",
        4 => "source quench",
        5 => "redirect",
        8 => "echo request",
        11 => "time exceeded",
        12 => "parameter problem",
        _ => "unknown",
    };
    format!("{name} ({icmp_type})")
}

#[async_trait]
pub trait Pinger: Send + Sync {
    /// Sends one echo request and waits up to `timeout` for the reply.
    ///
    /// A missing or unexpected reply is reported in [`PingResult::outcome`];
    /// `Err` is reserved for failures to send at all.
    async fn ping(&self, host: &str, sequence: u16, timeout: Duration)
    -> Result<PingResult, Error>;
}

/// Raw-socket IPv4 pinger. Each ping opens and closes its own socket.
pub struct IcmpPinger {
    identifier: u16,
}

impl Default for IcmpPinger {
    fn default() -> Self {
        Self::new()
    }
}

impl IcmpPinger {
    /// Uses the low 16 bits of the process id as the echo identifier.
    #[must_use]
    pub fn new() -> Self {
        let [.., hi, lo] = std::process::id().to_be_bytes();
        Self::with_identifier(u16::from_be_bytes([hi, lo]))
    }

    #[must_use]
    pub fn with_identifier(identifier: u16) -> Self {
        Self { identifier }
    }
}

#[async_trait]
impl Pinger for IcmpPinger {
    async fn ping(
        &self,
        host: &str,
        sequence: u16,
        timeout: Duration,
    ) -> Result<PingResult, Error> {
        let destination = resolve_ipv4(host).await?;
        let identifier = self.identifier;
        // cancelled when this future completes or is dropped
        let abandoned = CancellationToken::new();
        let _guard = abandoned.clone().drop_guard();
        tokio::task::spawn_blocking(move || {
            probe(destination, identifier, sequence, timeout, &abandoned)
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

async fn resolve_ipv4(host: &str) -> Result<Ipv4Addr, Error> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .map_err(|_| Error::Resolve(host.to_string()))?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| Error::Resolve(host.to_string()))
}

fn probe(
    destination: Ipv4Addr,
    identifier: u16,
    sequence: u16,
    timeout: Duration,
    abandoned: &CancellationToken,
) -> Result<PingResult, Error> {
    let unreachable = |elapsed| PingResult {
        responder: IpAddr::V4(destination),
        round_trip_time: elapsed,
        outcome: PingOutcome::Unreachable { timeout },
    };
    if abandoned.is_cancelled() {
        return Ok(unreachable(Duration::ZERO));
    }

    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
    let request = echo_request(identifier, sequence);
    let target = SockAddr::from(SocketAddrV4::new(destination, 0));

    let start = Instant::now();
    socket.send_to(&request, &target)?;

    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let elapsed = start.elapsed();
        let Some(remaining) = timeout.checked_sub(elapsed).filter(|r| !r.is_zero()) else {
            return Ok(unreachable(elapsed));
        };
        if abandoned.is_cancelled() {
            debug!("Probe {sequence} to {destination} abandoned");
            return Ok(unreachable(elapsed));
        }
        socket.set_read_timeout(Some(read_slice(remaining)))?;

        let n = match (&socket).read(&mut buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let round_trip_time = start.elapsed();

        let (responder, outcome) = match decode_reply(&buf[..n], identifier, sequence) {
            Reply::Echo { source } => (source, PingOutcome::Success),
            Reply::Unrelated => continue,
            Reply::Other { source, icmp_type } => (
                source,
                PingOutcome::WrongReplyType {
                    expected: ECHO_REPLY,
                    actual: icmp_type,
                },
            ),
            Reply::Malformed(reason) => (destination, PingOutcome::ProtocolError(reason)),
        };
        return Ok(PingResult {
            responder: IpAddr::V4(responder),
            round_trip_time,
            outcome,
        });
    }
}

fn read_slice(remaining: Duration) -> Duration {
    remaining.min(READ_SLICE)
}

/// Echo request with an empty payload and a valid checksum.
fn echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut buf = vec![0u8; MutableEchoRequestPacket::minimum_packet_size()];
    if let Some(mut echo) = MutableEchoRequestPacket::new(&mut buf) {
        echo.set_icmp_type(IcmpTypes::EchoRequest);
        echo.set_icmp_code(IcmpCode::new(0));
        echo.set_identifier(identifier);
        echo.set_sequence_number(sequence);
    }
    seal(&mut buf);
    buf
}

fn seal(icmp: &mut [u8]) {
    let sum = IcmpPacket::new(icmp).map_or(0, |packet| checksum(&packet));
    if let Some(mut packet) = MutableIcmpPacket::new(icmp) {
        packet.set_checksum(sum);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Echo { source: Ipv4Addr },
    /// Our own request on loopback, or another pinger's traffic.
    Unrelated,
    Other { source: Ipv4Addr, icmp_type: u8 },
    Malformed(String),
}

/// Decodes a datagram read from a raw IPv4 ICMP socket (IP header included).
fn decode_reply(datagram: &[u8], identifier: u16, sequence: u16) -> Reply {
    let Some(ip) = Ipv4Packet::new(datagram) else {
        return Reply::Malformed(format!(
            "truncated IPv4 header ({} bytes)",
            datagram.len()
        ));
    };
    if ip.get_version() != 4 || ip.get_header_length() < 5 {
        return Reply::Malformed("invalid IPv4 header".to_string());
    }
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return Reply::Unrelated;
    }

    let header_len = usize::from(ip.get_header_length()) * 4;
    let source = ip.get_source();
    let Some(icmp_bytes) = datagram.get(header_len..) else {
        return Reply::Malformed("IPv4 header longer than datagram".to_string());
    };
    let Some(icmp) = IcmpPacket::new(icmp_bytes) else {
        return Reply::Malformed(format!(
            "truncated ICMP message ({} bytes)",
            icmp_bytes.len()
        ));
    };
    if checksum(&icmp) != icmp.get_checksum() {
        return Reply::Malformed("bad ICMP checksum".to_string());
    }

    match icmp.get_icmp_type().0 {
        ECHO_REPLY => match EchoReplyPacket::new(icmp.packet()) {
            Some(echo)
                if echo.get_identifier() == identifier
                    && echo.get_sequence_number() == sequence =>
            {
                Reply::Echo { source }
            }
            Some(_) => Reply::Unrelated,
            None => Reply::Malformed("truncated echo reply".to_string()),
        },
        ECHO_REQUEST => Reply::Unrelated,
        icmp_type => Reply::Other { source, icmp_type },
    }
}

/// Repeated probes deciding whether a host answers at all.
pub struct Prober<P> {
    pinger: P,
    count: u16,
    timeout: Duration,
}

impl<P: Pinger> Prober<P> {
    /// Four sequential probes, three seconds each.
    #[must_use]
    pub fn new(pinger: P) -> Self {
        Self {
            pinger,
            count: PROBE_COUNT,
            timeout: PROBE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_options(pinger: P, options: &ProbeOptions) -> Self {
        Self {
            pinger,
            count: options.count,
            timeout: Duration::from_secs(options.timeout_secs),
        }
    }

    /// Pings `host` with sequence numbers `1..=count`, one at a time.
    ///
    /// Returns the mean round trip time of the successful probes, or the
    /// last error when none succeeded. The host counts as online when this
    /// returns `Ok`.
    ///
    /// # Errors
    ///
    /// The error of the last probe when every probe failed.
    pub async fn is_online(&self, host: &str) -> Result<Duration, Error> {
        let mut total = Duration::ZERO;
        let mut successes: u32 = 0;
        let mut last_error = None;

        for sequence in 1..=self.count {
            let attempt = self
                .pinger
                .ping(host, sequence, self.timeout)
                .await
                .and_then(PingResult::into_result);
            match attempt {
                Ok(rtt) => {
                    debug!("Probe {sequence} to {host}: {rtt:?}");
                    total += rtt;
                    successes += 1;
                }
                Err(e) => {
                    debug!("Probe {sequence} to {host} failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        if successes > 0 {
            Ok(total / successes)
        } else {
            Err(last_error
                .unwrap_or_else(|| Error::Config("probe count must be at least 1".to_string())))
        }
    }
}
