//! Ping probe implementation with native ICMP (high-precision) and command fallback.
//!
//! Uses blocking sockets in spawn_blocking for sub-millisecond timing precision.
//! A timeout is reported as a `TimedOut` reply, not as an error.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{EchoReply, ProbeError, ReplyStatus};

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    /// Raw sockets (CAP_NET_RAW or root); replies include the IPv4 header
    Raw,
    /// Unprivileged datagram sockets; the kernel owns the echo identifier
    Datagram,
    /// Only command fallback is available
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Ping sequence counter for unique identification
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_UNREACHABLE: u8 = 3;
const ICMPV4_TIME_EXCEEDED: u8 = 11;
const ICMPV4_PARAMETER_PROBLEM: u8 = 12;

const ICMPV6_UNREACHABLE: u8 = 1;
const ICMPV6_TIME_EXCEEDED: u8 = 3;
const ICMPV6_PARAMETER_PROBLEM: u8 = 4;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// Generate a unique identifier for each ping request.
fn generate_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Raw;
    }

    // Unprivileged on Linux with ping_group_range set, or macOS
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Datagram;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// Send one echo request to `address` and wait at most `timeout` for the answer.
pub async fn run_ping_probe(address: &str, timeout: Duration) -> Result<EchoReply, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

    if capability != IcmpCapability::CommandOnly {
        // Resolve before spawn_blocking (DNS is async)
        let ip = resolve_address(address).await?;
        let raw = capability == IcmpCapability::Raw;

        let result = tokio::task::spawn_blocking(move || run_blocking_ping(ip, raw, timeout))
            .await
            .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?;

        match result {
            Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
                tracing::warn!(
                    "Native ping failed with permission error for {}, falling back to command: {}",
                    address,
                    msg
                );
            }
            other => return other,
        }
    }

    run_ping_command(address, timeout).await
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("Operation not permitted") || msg.contains("denied")
}

/// Resolve hostname to IP address.
async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = tokio::net::lookup_host(format!("{}:0", address))
        .await
        .map_err(|e| ProbeError::Resolve(format!("{}: {}", address, e)))?;

    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Resolve(format!("no addresses found for {}", address)))
}

/// Blocking ICMP echo with precise timing. Runs in a dedicated thread via spawn_blocking.
fn run_blocking_ping(ip: IpAddr, raw: bool, timeout: Duration) -> Result<EchoReply, ProbeError> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };
    let socket_type = if raw { Type::RAW } else { Type::DGRAM };

    let socket = Socket::new(domain, socket_type, Some(protocol))
        .map_err(|e| ProbeError::Network(format!("Failed to create ICMP socket: {}", e)))?;
    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;

    let dest = SocketAddr::new(ip, 0);
    socket
        .connect(&dest.into())
        .map_err(|e| ProbeError::Network(format!("Failed to connect: {}", e)))?;

    let (identifier, sequence) = generate_ping_id();
    let packet = build_echo_request(ip.is_ipv6(), identifier, sequence);
    // Datagram sockets rewrite the identifier, so only raw replies can be matched on it
    let expected_id = raw.then_some(identifier);

    let start = Instant::now();

    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            ProbeError::Network(format!("Permission denied: {}", e))
        } else {
            ProbeError::Network(format!("Failed to send: {}", e))
        }
    })?;

    // Receive until we get a reply to OUR request or run out of time
    loop {
        let Some(remaining) = read_budget(timeout, start.elapsed()) else {
            return Ok(EchoReply::timed_out(timeout));
        };
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| ProbeError::Network(format!("Failed to set timeout: {}", e)))?;

        let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Ok(EchoReply::timed_out(timeout));
            }
            Err(e) => return Err(ProbeError::Network(format!("Failed to receive: {}", e))),
        };
        let elapsed = start.elapsed();

        // SAFETY: recv_from initialized `len` bytes
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };

        let icmp = if ip.is_ipv4() { strip_ipv4_header(buf) } else { buf };
        let Some(status) = classify_reply(icmp, ip.is_ipv6(), expected_id, sequence) else {
            continue;
        };

        if elapsed >= timeout {
            return Ok(EchoReply::timed_out(timeout));
        }

        return Ok(EchoReply {
            status,
            roundtrip: elapsed,
            address: from.as_socket().map(|sa| sa.ip().to_string()),
        });
    }
}

/// Skip the IPv4 header if the buffer starts with one (raw sockets).
/// Shorter read timeouts can truncate to a zero `timeval`, which blocks forever.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Time left for the next read, or `None` once the probe has run out of time.
fn read_budget(timeout: Duration, elapsed: Duration) -> Option<Duration> {
    timeout
        .checked_sub(elapsed)
        .filter(|remaining| *remaining >= MIN_READ_TIMEOUT)
}

fn strip_ipv4_header(buf: &[u8]) -> &[u8] {
    if buf.first().map(|b| b >> 4) == Some(4) {
        let header_len = usize::from(buf[0] & 0x0F) * 4;
        buf.get(header_len..).unwrap_or(&[])
    } else {
        buf
    }
}

/// Decide whether an ICMP message answers our request, and how.
///
/// Echo replies are matched on identifier (when known) and sequence. ICMP error
/// messages embed the original datagram, which is matched the same way.
fn classify_reply(
    icmp: &[u8],
    v6: bool,
    identifier: Option<u16>,
    sequence: u16,
) -> Option<ReplyStatus> {
    if icmp.len() < 8 {
        return None;
    }
    let (reply_type, code) = (icmp[0], icmp[1]);

    let echo_reply = if v6 { ICMPV6_ECHO_REPLY } else { ICMPV4_ECHO_REPLY };
    if reply_type == echo_reply {
        return echo_matches(icmp, identifier, sequence).then_some(ReplyStatus::Success);
    }

    let status = if v6 {
        match reply_type {
            ICMPV6_UNREACHABLE => match code {
                0 => ReplyStatus::DestinationNetworkUnreachable,
                4 => ReplyStatus::DestinationPortUnreachable,
                _ => ReplyStatus::DestinationHostUnreachable,
            },
            ICMPV6_TIME_EXCEEDED => ReplyStatus::TtlExpired,
            ICMPV6_PARAMETER_PROBLEM => ReplyStatus::ParameterProblem,
            _ => return None,
        }
    } else {
        match reply_type {
            ICMPV4_UNREACHABLE => match code {
                0 | 6 => ReplyStatus::DestinationNetworkUnreachable,
                2 => ReplyStatus::DestinationProtocolUnreachable,
                3 => ReplyStatus::DestinationPortUnreachable,
                _ => ReplyStatus::DestinationHostUnreachable,
            },
            ICMPV4_TIME_EXCEEDED => ReplyStatus::TtlExpired,
            ICMPV4_PARAMETER_PROBLEM => ReplyStatus::ParameterProblem,
            _ => return None,
        }
    };

    // Original datagram follows the 8-byte error header
    let original = &icmp[8..];
    let original_icmp = if v6 {
        original.get(40..)?
    } else {
        let header_len = usize::from(*original.first()? & 0x0F) * 4;
        original.get(header_len..)?
    };
    let echo_request = if v6 { ICMPV6_ECHO_REQUEST } else { ICMPV4_ECHO_REQUEST };
    if original_icmp.len() < 8 || original_icmp[0] != echo_request {
        return None;
    }

    echo_matches(original_icmp, identifier, sequence).then_some(status)
}

fn echo_matches(icmp: &[u8], identifier: Option<u16>, sequence: u16) -> bool {
    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);
    reply_seq == sequence && identifier.map_or(true, |id| id == reply_id)
}

/// Build an ICMP or ICMPv6 Echo Request packet.
fn build_echo_request(v6: bool, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64]; // 8 byte header + 56 byte payload

    packet[0] = if v6 { ICMPV6_ECHO_REQUEST } else { ICMPV4_ECHO_REQUEST };
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    // The kernel computes the ICMPv6 checksum
    if !v6 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Run ping via command execution (fallback).
async fn run_ping_command(address: &str, timeout: Duration) -> Result<EchoReply, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let output = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        return parse_ping_output(&stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    classify_ping_failure(&stdout, &stderr, timeout)
}

fn reply_address(output: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)from (?:\S+ \()?(?P<addr>[0-9a-f:.]+)\)?").expect("valid regex")
    });

    re.captures(output)
        .and_then(|caps| caps.name("addr"))
        .map(|m| m.as_str().trim_end_matches(':').to_string())
        .filter(|addr| !addr.is_empty())
}

/// Parse successful ping command output.
fn parse_ping_output(output: &str) -> Result<EchoReply, ProbeError> {
    // Pattern 1: Per-packet response "time=X.XXX ms" (Linux, some macOS)
    static RE1: OnceLock<Regex> = OnceLock::new();
    let re1 = RE1.get_or_init(|| Regex::new(r"time[=<](?P<val>[0-9.]+)\s*ms").expect("valid regex"));

    // Pattern 2: Summary line "round-trip min/avg/max/stddev = X/X/X/X ms" (macOS)
    static RE2: OnceLock<Regex> = OnceLock::new();
    let re2 = RE2.get_or_init(|| {
        Regex::new(r"round-trip\s+min/avg/max/stddev\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)")
            .expect("valid regex")
    });

    // Pattern 3: Summary line "rtt min/avg/max/mdev = X/X/X/X ms" (Linux)
    static RE3: OnceLock<Regex> = OnceLock::new();
    let re3 = RE3.get_or_init(|| {
        Regex::new(r"rtt\s+min/avg/max/mdev\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)")
            .expect("valid regex")
    });

    let millis = re1
        .captures(output)
        .and_then(|caps| caps.name("val"))
        .or_else(|| re2.captures(output).and_then(|caps| caps.get(2)))
        .or_else(|| re3.captures(output).and_then(|caps| caps.get(2)))
        .and_then(|m| m.as_str().parse::<f64>().ok());

    match millis {
        Some(ms) => Ok(EchoReply::success(
            Duration::from_nanos((ms * 1_000_000.0).round() as u64),
            reply_address(output),
        )),
        None => Err(ProbeError::Command(format!(
            "failed to parse ping output: {}",
            output
        ))),
    }
}

/// Map a non-zero ping exit onto a reply status, or an error when nothing fits.
fn classify_ping_failure(
    stdout: &str,
    stderr: &str,
    timeout: Duration,
) -> Result<EchoReply, ProbeError> {
    let status = if stdout.contains("Unreachable") {
        Some(ReplyStatus::DestinationHostUnreachable)
    } else if stdout.contains("Time to live exceeded") {
        Some(ReplyStatus::TtlExpired)
    } else {
        None
    };

    if let Some(status) = status {
        return Ok(EchoReply {
            status,
            roundtrip: Duration::ZERO,
            address: reply_address(stdout),
        });
    }

    if stderr.contains("timeout")
        || stdout.contains("100% packet loss")
        || stdout.contains("100.0% packet loss")
    {
        return Ok(EchoReply::timed_out(timeout));
    }

    let detail = if stderr.trim().is_empty() { stdout } else { stderr };
    Err(ProbeError::Command(format!("ping failed: {}", detail.trim())))
}
