//! Per-protocol socket tables from `/proc/net/{tcp,udp,icmp,udplite,raw}{,6}`,
//! tallied by connection state.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

/// State name → number of sockets currently in that state.
pub type SocketStateTally = HashMap<String, u64>;

/// Kernel socket state codes, indexed by the low byte of field 3.
const SK_STATES: [&str; 12] = [
    "UNKNOWN",
    "ESTABLISHED",
    "SYN_SENT",
    "SYN_RECV",
    "FIN_WAIT1",
    "FIN_WAIT2",
    "TIME_WAIT",
    "CLOSE",
    "CLOSE_WAIT",
    "LAST_ACK",
    "LISTEN",
    "CLOSING",
];

#[derive(Debug, Error)]
pub enum SockTabError {
    #[error("not enough fields in socket table line: got {0}")]
    NotEnoughFields(usize),
    #[error("unparseable state field {0:?}")]
    BadState(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The socket table protocols the collector knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockProto {
    Tcp,
    Udp,
    Icmp,
    Udplite,
    Raw,
}

impl SockProto {
    pub const ALL: [SockProto; 5] = [
        SockProto::Tcp,
        SockProto::Udp,
        SockProto::Icmp,
        SockProto::Udplite,
        SockProto::Raw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SockProto::Tcp => "tcp",
            SockProto::Udp => "udp",
            SockProto::Icmp => "icmp",
            SockProto::Udplite => "udplite",
            SockProto::Raw => "raw",
        }
    }
}

/// IP version of a socket table, selecting the `6`-suffixed file or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Label value used on emitted socket-state samples.
    pub fn label(&self) -> &'static str {
        match self {
            IpVersion::V4 => "ipv4",
            IpVersion::V6 => "ipv6",
        }
    }
}

/// Maps a raw kernel state code to its name; out-of-range codes are UNKNOWN.
fn state_name(code: u8) -> &'static str {
    SK_STATES.get(code as usize).copied().unwrap_or(SK_STATES[0])
}

/// Tallies one socket table.
///
/// The header line is discarded; each remaining line is stripped from the
/// first `'#'`, split on whitespace and must carry at least 12 fields, the
/// fourth of which is the hexadecimal state code.
pub fn parse_socktab<R: BufRead>(reader: R) -> Result<SocketStateTally, SockTabError> {
    let mut tally = SocketStateTally::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if idx == 0 {
            continue;
        }
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line.as_str(),
        };
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 12 {
            return Err(SockTabError::NotEnoughFields(fields.len()));
        }

        let code = u8::from_str_radix(fields[3], 16)
            .map_err(|_| SockTabError::BadState(fields[3].to_string()))?;
        *tally.entry(state_name(code).to_string()).or_insert(0) += 1;
    }

    Ok(tally)
}

/// Reads and tallies the socket table for one (protocol, ip-version) pair
/// in the current network namespace.
pub fn stats(proto: SockProto, version: IpVersion) -> Result<SocketStateTally, SockTabError> {
    let suffix = match version {
        IpVersion::V4 => "",
        IpVersion::V6 => "6",
    };
    let path = format!("/proc/net/{}{}", proto.as_str(), suffix);
    stats_from_path(path)
}

fn stats_from_path<P: AsRef<Path>>(path: P) -> Result<SocketStateTally, SockTabError> {
    let file = File::open(path)?;
    parse_socktab(BufReader::new(file))
}
