//! Canonical IPv4/IPv6 5-tuple flow hash (spec §3, §4.3, §9 "Flow-hash
//! reuse").
//!
//! The engine deliberately recomputes its own hash rather than reusing one
//! a prior FIB-lookup node may have stored, because hash configuration
//! (which fields to include) may differ per call site (spec §9). The hash
//! is stable under swapping source and destination — both directions of a
//! flow fold to the same value — which is what gives "flow stickiness"
//! (spec §8) for free.

use crate::acl::FiveTuple;
use std::net::IpAddr;

fn address_bits(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u32::from(a) as u128,
        IpAddr::V6(a) => u128::from_be_bytes(a.octets()),
    }
}

/// 64-bit avalanche finalizer (splitmix64), used to spread the folded
/// 5-tuple bits evenly across the output before truncating to `u32`.
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

/// Computes the flow hash of a 5-tuple. `src`/`dst` and `src_port`/
/// `dst_port` are combined with XOR, which is symmetric under swap, so
/// `flow_hash(tuple)` equals `flow_hash(tuple.reversed())`.
pub fn flow_hash(tuple: &FiveTuple) -> u32 {
    let addr_mix = address_bits(tuple.src_addr) ^ address_bits(tuple.dst_addr);
    let folded_addr = ((addr_mix >> 64) as u64) ^ (addr_mix as u64);
    let port_mix = (tuple.src_port as u64) ^ (tuple.dst_port as u64);
    let seed = folded_addr ^ port_mix.rotate_left(16) ^ (tuple.protocol as u64);
    let h = splitmix64(seed);
    (h ^ (h >> 32)) as u32
}

impl FiveTuple {
    /// Returns the tuple with source and destination swapped — the other
    /// direction of the same flow.
    pub fn reversed(&self) -> FiveTuple {
        FiveTuple {
            protocol: self.protocol,
            src_addr: self.dst_addr,
            dst_addr: self.src_addr,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

/// Given a hash and a precomputed `(len - 1, pow2_mask)` pair, returns a
/// bounded index in `[0, len-1]` without modulo (spec §4.3 step 2b,
/// `FWABF_GET_INDEX_BY_FLOWHASH`).
pub fn bounded_index(hash: u32, pow2_mask: u32, len_minus_1: u32) -> u32 {
    let i = hash & pow2_mask;
    if i > len_minus_1 {
        i & len_minus_1
    } else {
        i
    }
}

/// Smallest `(mask, n-1)` pair such that `bounded_index` can address any
/// index in `[0, len-1]`. Mirrors the original's pragmatic cap: masks
/// beyond 0xFF are never used since no practical group/label list
/// exceeds 255 entries (labels are themselves bounded to `[0,254]`).
pub fn pow2_mask_for_len(len: usize) -> (u32, u32) {
    debug_assert!(len > 0);
    let len_minus_1 = (len - 1) as u32;
    let mask = if len <= 0x10 { 0xF } else { 0xFF };
    (mask, len_minus_1)
}
