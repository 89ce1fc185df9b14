//! Global conntrack table statistics via a netfilter netlink socket.
//!
//! The socket is opened on the pinned worker thread after any namespace
//! switch, so the kernel binds it to that thread's network namespace and
//! the reported counters are per-namespace.

use std::cell::Cell;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::socket::{recv, send, socket, AddressFamily, MsgFlags, SockFlag, SockProtocol, SockType};

const NLMSG_ERROR: u16 = 2;
const NLM_F_REQUEST: u16 = 0x01;

// NFNL_SUBSYS_CTNETLINK << 8 | IPCTNL_MSG_CT_GET_STATS
const CT_GET_STATS: u16 = (1 << 8) | 5;

const CTA_STATS_GLOBAL_ENTRIES: u16 = 1;
const CTA_STATS_GLOBAL_MAX_ENTRIES: u16 = 2;
const NLA_TYPE_MASK: u16 = 0x3fff;

const NLMSG_HDRLEN: usize = 16;
const NFGENMSG_LEN: usize = 4;

/// Entry counts of the conntrack table in the current network namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalStats {
    pub entries: u64,
    pub max_entries: u64,
}

/// An open netfilter netlink socket.
pub struct Conntrack {
    fd: OwnedFd,
    seq: Cell<u32>,
}

impl Conntrack {
    /// Opens the kernel socket. This is the only fatal failure point of the
    /// conntrack client.
    pub fn dial() -> nix::Result<Self> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC,
            SockProtocol::NetlinkNetFilter,
        )?;
        Ok(Conntrack { fd, seq: Cell::new(1) })
    }

    /// Returns the global statistics, collapsing any per-statistic failure
    /// to zero values.
    pub fn stats_global(&self) -> GlobalStats {
        self.query().unwrap_or_default()
    }

    fn query(&self) -> io::Result<GlobalStats> {
        let seq = self.seq.get();
        self.seq.set(seq.wrapping_add(1));

        let request = build_stats_request(seq);
        send(self.fd.as_raw_fd(), &request, MsgFlags::empty())
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

        let mut buf = vec![0u8; 8192];
        let len = recv(self.fd.as_raw_fd(), &mut buf, MsgFlags::empty())
            .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
        parse_stats_response(&buf[..len])
    }
}

/// Serializes an `nlmsghdr` + `nfgenmsg` CT_GET_STATS request.
fn build_stats_request(seq: u32) -> Vec<u8> {
    let len = (NLMSG_HDRLEN + NFGENMSG_LEN) as u32;
    let mut buf = Vec::with_capacity(len as usize);
    buf.extend_from_slice(&len.to_ne_bytes());
    buf.extend_from_slice(&CT_GET_STATS.to_ne_bytes());
    buf.extend_from_slice(&NLM_F_REQUEST.to_ne_bytes());
    buf.extend_from_slice(&seq.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes()); // pid, filled by the kernel
    buf.push(0); // nfgenmsg.family = AF_UNSPEC
    buf.push(0); // nfgenmsg.version
    buf.extend_from_slice(&0u16.to_be_bytes()); // nfgenmsg.res_id
    buf
}

/// Walks the netlink reply and extracts the two global counters.
fn parse_stats_response(data: &[u8]) -> io::Result<GlobalStats> {
    let mut stats = GlobalStats::default();
    let mut offset = 0;

    while offset + NLMSG_HDRLEN <= data.len() {
        let msg_len = u32::from_ne_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
        let msg_type = u16::from_ne_bytes(data[offset + 4..offset + 6].try_into().unwrap());
        if msg_len < NLMSG_HDRLEN || offset + msg_len > data.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated netlink message"));
        }
        if msg_type == NLMSG_ERROR {
            return Err(io::Error::new(io::ErrorKind::Other, "netlink error reply"));
        }
        if msg_type == CT_GET_STATS && msg_len >= NLMSG_HDRLEN + NFGENMSG_LEN {
            parse_stats_attrs(&data[offset + NLMSG_HDRLEN + NFGENMSG_LEN..offset + msg_len], &mut stats);
        }
        // Messages are aligned to 4 bytes.
        offset += (msg_len + 3) & !3;
    }

    Ok(stats)
}

fn parse_stats_attrs(mut data: &[u8], stats: &mut GlobalStats) {
    while data.len() >= 4 {
        let nla_len = u16::from_ne_bytes(data[..2].try_into().unwrap()) as usize;
        let nla_type = u16::from_ne_bytes(data[2..4].try_into().unwrap()) & NLA_TYPE_MASK;
        if nla_len < 4 || nla_len > data.len() {
            break;
        }
        let payload = &data[4..nla_len];
        if payload.len() >= 4 {
            // Conntrack attribute payloads are big-endian.
            let value = u32::from_be_bytes(payload[..4].try_into().unwrap()) as u64;
            match nla_type {
                CTA_STATS_GLOBAL_ENTRIES => stats.entries = value,
                CTA_STATS_GLOBAL_MAX_ENTRIES => stats.max_entries = value,
                _ => {}
            }
        }
        data = &data[(nla_len + 3) & !3..];
    }
}
