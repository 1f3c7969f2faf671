//! Minimal IPv4/IPv6 + TCP/UDP header parsing, producing the canonical
//! 5-tuple the datapath needs for flow hashing (spec §1 Non-goals: packet
//! parsing beyond what flow-hashing and tunnel identification need is out
//! of scope — parsing *for* those purposes is explicitly in scope).
//!
//! This is the datapath's own fallback extraction, used when no ACL
//! context is attached to the ingress interface to supply a 5-tuple via
//! `fill_5tuple` (spec §9 "Flow-hash reuse": the engine always computes
//! its own hash rather than trusting a downstream collaborator's).

use crate::acl::FiveTuple;
use crate::dpo::AddressFamily;
use bytes::Buf;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

const IPV6_HOP_BY_HOP: u8 = 0;
const IPV6_ROUTING: u8 = 43;
const IPV6_FRAGMENT: u8 = 44;
const IPV6_AUTH: u8 = 51;
const IPV6_DEST_OPTS: u8 = 60;

/// Outcome of parsing one packet's headers: the 5-tuple (if the headers
/// were well-formed enough to extract one) and whether an IPv6
/// Hop-by-Hop Options header was present (spec §4.5 step 5).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParsedPacket {
    pub tuple: Option<FiveTuple>,
    pub has_hop_by_hop: bool,
}

/// Parses `bytes` as an IPv4 or IPv6 packet per `family`. Malformed or
/// truncated input yields an empty [`ParsedPacket`] rather than an error —
/// a packet too short to carry a usable header has no flow to hash, which
/// the caller treats as "hash the zero tuple" rather than a fault.
pub fn parse(family: AddressFamily, bytes: &[u8]) -> ParsedPacket {
    match family {
        AddressFamily::V4 => parse_v4(bytes),
        AddressFamily::V6 => parse_v6(bytes),
    }
}

fn parse_v4(bytes: &[u8]) -> ParsedPacket {
    let mut buf = bytes;
    if buf.remaining() < 20 {
        return ParsedPacket::default();
    }
    let version_ihl = buf[0];
    if version_ihl >> 4 != 4 {
        return ParsedPacket::default();
    }
    let ihl = (version_ihl & 0x0F) as usize * 4;
    if ihl < 20 || buf.remaining() < ihl {
        return ParsedPacket::default();
    }
    let protocol = buf[9];
    let src = Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]);
    let dst = Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]);
    buf.advance(ihl);
    let (src_port, dst_port) = read_ports(buf, protocol);

    ParsedPacket {
        tuple: Some(FiveTuple {
            protocol,
            src_addr: IpAddr::V4(src),
            dst_addr: IpAddr::V4(dst),
            src_port,
            dst_port,
        }),
        has_hop_by_hop: false,
    }
}

fn parse_v6(bytes: &[u8]) -> ParsedPacket {
    let mut buf = bytes;
    if buf.remaining() < 40 {
        return ParsedPacket::default();
    }
    if buf[0] >> 4 != 6 {
        return ParsedPacket::default();
    }
    let mut next_header = buf[6];
    let has_hop_by_hop = next_header == IPV6_HOP_BY_HOP;
    let mut src_octets = [0u8; 16];
    src_octets.copy_from_slice(&buf[8..24]);
    let mut dst_octets = [0u8; 16];
    dst_octets.copy_from_slice(&buf[24..40]);
    buf.advance(40);

    // Walk extension headers to reach the L4 header, the same way the
    // kernel/collaborator stack would to fill in an ACL 5-tuple.
    loop {
        match next_header {
            IPV6_HOP_BY_HOP | IPV6_ROUTING | IPV6_DEST_OPTS => {
                if buf.remaining() < 2 {
                    return ParsedPacket { tuple: None, has_hop_by_hop };
                }
                let this_next = buf[0];
                let ext_len = (buf[1] as usize + 1) * 8;
                if buf.remaining() < ext_len {
                    return ParsedPacket { tuple: None, has_hop_by_hop };
                }
                buf.advance(ext_len);
                next_header = this_next;
            }
            IPV6_FRAGMENT => {
                if buf.remaining() < 8 {
                    return ParsedPacket { tuple: None, has_hop_by_hop };
                }
                let this_next = buf[0];
                buf.advance(8);
                next_header = this_next;
            }
            IPV6_AUTH => {
                if buf.remaining() < 2 {
                    return ParsedPacket { tuple: None, has_hop_by_hop };
                }
                let this_next = buf[0];
                let ext_len = (buf[1] as usize + 2) * 4;
                if buf.remaining() < ext_len {
                    return ParsedPacket { tuple: None, has_hop_by_hop };
                }
                buf.advance(ext_len);
                next_header = this_next;
            }
            _ => break,
        }
    }

    let protocol = next_header;
    let (src_port, dst_port) = read_ports(buf, protocol);

    ParsedPacket {
        tuple: Some(FiveTuple {
            protocol,
            src_addr: IpAddr::V6(Ipv6Addr::from(src_octets)),
            dst_addr: IpAddr::V6(Ipv6Addr::from(dst_octets)),
            src_port,
            dst_port,
        }),
        has_hop_by_hop,
    }
}

fn read_ports(mut buf: &[u8], protocol: u8) -> (u16, u16) {
    if (protocol == PROTO_TCP || protocol == PROTO_UDP) && buf.remaining() >= 4 {
        let src_port = buf.get_u16();
        let dst_port = buf.get_u16();
        (src_port, dst_port)
    } else {
        (0, 0)
    }
}
