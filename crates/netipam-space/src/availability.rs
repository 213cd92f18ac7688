//! Free space inside a parent block.
//!
//! Two use cases share this module: listing the gaps between existing
//! children so a caller can render them next to real records, and picking
//! exactly one free block (prefix, address or VID) for allocation. Every
//! function is a pure computation over the children it is handed.

use ipnet::IpNet;
use netipam_core::addr::{
    addr_to_u128, set_difference, sort_key, u128_to_addr, Family, IpSet, Span,
};
use netipam_core::types::{IpAddress, Prefix, Vlan};
use num_bigint::BigUint;
use serde::{Serialize, Serializer};
use std::net::IpAddr;

/// Anything occupying a CIDR block.
pub trait Block {
    fn block(&self) -> IpNet;
}

impl Block for IpNet {
    fn block(&self) -> IpNet {
        *self
    }
}

impl Block for Prefix {
    fn block(&self) -> IpNet {
        self.prefix
    }
}

/// Anything occupying a single address.
pub trait Host {
    fn host_addr(&self) -> IpAddr;
}

impl Host for IpAddr {
    fn host_addr(&self) -> IpAddr {
        *self
    }
}

impl Host for IpAddress {
    fn host_addr(&self) -> IpAddr {
        self.host()
    }
}

fn as_decimal<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// A real child or a synthetic free block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GapEntry<T> {
    Assigned(T),
    Available(IpNet),
}

impl<T: Block> GapEntry<T> {
    pub fn block(&self) -> IpNet {
        match self {
            GapEntry::Assigned(child) => child.block(),
            GapEntry::Available(net) => *net,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, GapEntry::Available(_))
    }
}

/// Children of `parent` interleaved with the free CIDRs between them,
/// ordered by (address, mask length).
///
/// With `include_available` false only real children come back; with
/// `include_assigned` false only gaps. An empty child list yields the whole
/// parent as one gap.
pub fn list_gaps<T: Block>(
    parent: &IpNet,
    children: Vec<T>,
    include_available: bool,
    include_assigned: bool,
) -> Vec<GapEntry<T>> {
    let mut out: Vec<GapEntry<T>> = Vec::new();
    if include_available {
        let taken: Vec<Span> = children.iter().map(|c| Span::of_net(&c.block())).collect();
        out.extend(
            set_difference(&parent.trunc(), &taken)
                .into_iter()
                .map(GapEntry::Available),
        );
    }
    if include_assigned {
        out.extend(children.into_iter().map(GapEntry::Assigned));
    }
    out.sort_by_key(|e| sort_key(&e.block()));
    out
}

/// Lowest free CIDR of the gap set.
pub fn first_available_prefix(parent: &IpNet, children: &[IpNet]) -> Option<IpNet> {
    let taken: Vec<Span> = children.iter().map(Span::of_net).collect();
    set_difference(&parent.trunc(), &taken).into_iter().next()
}

/// Lowest free block of exactly `prefix_len` bits.
///
/// Gaps are maximal aligned CIDRs in ascending order, so the first gap at
/// least as large as the request holds the lowest aligned fit.
pub fn first_available_prefix_of_len(
    parent: &IpNet,
    children: &[IpNet],
    prefix_len: u8,
) -> Option<IpNet> {
    let bits = Family::of_net(parent).bits();
    if prefix_len < parent.prefix_len() || prefix_len > bits {
        return None;
    }
    let taken: Vec<Span> = children.iter().map(Span::of_net).collect();
    set_difference(&parent.trunc(), &taken)
        .into_iter()
        .find(|gap| gap.prefix_len() <= prefix_len)
        .and_then(|gap| IpNet::new(gap.network(), prefix_len).ok())
}

/// True when network/broadcast are not assignable in `prefix`.
fn reserves_edges(prefix: &IpNet, is_pool: bool) -> bool {
    !is_pool
        && match Family::of_net(prefix) {
            Family::V4 => prefix.prefix_len() < 31,
            Family::V6 => prefix.prefix_len() < 127,
        }
}

/// Addresses of `prefix` still free for assignment.
///
/// Outside pools, IPv4 prefixes shorter than /31 lose their network and
/// broadcast addresses and IPv6 prefixes shorter than /127 lose the
/// subnet-router anycast (network) address. Existing addresses and the full
/// span of every range are then removed. `mark_utilized` leaves nothing.
pub fn available_ips(
    prefix: &IpNet,
    is_pool: bool,
    mark_utilized: bool,
    addresses: &[IpAddr],
    ranges: &[Span],
) -> IpSet {
    if mark_utilized {
        return IpSet::new();
    }
    let net = prefix.trunc();
    let mut taken = IpSet::from_spans(addresses.iter().map(|a| Span::host(*a)));
    taken = taken.union(&IpSet::from_spans(ranges.iter().copied()));
    if reserves_edges(&net, is_pool) {
        taken.insert(Span::host(net.network()));
        if Family::of_net(&net) == Family::V4 {
            taken.insert(Span::host(net.broadcast()));
        }
    }
    IpSet::from_spans([Span::of_net(&net)]).difference(&taken)
}

/// Attach a mask length to a bare address.
pub fn with_mask(addr: IpAddr, prefix_len: u8) -> IpNet {
    IpNet::new(addr, prefix_len).unwrap_or_else(|_| IpNet::from(addr))
}

/// First free address of `prefix`, carrying the prefix's mask.
pub fn first_available_ip(
    prefix: &IpNet,
    is_pool: bool,
    mark_utilized: bool,
    addresses: &[IpAddr],
    ranges: &[Span],
) -> Option<IpNet> {
    available_ips(prefix, is_pool, mark_utilized, addresses, ranges)
        .first()
        .map(|a| with_mask(a, prefix.prefix_len()))
}

/// Free addresses of an IP range: its span minus the addresses inside it.
pub fn range_available_ips(range: &Span, mark_utilized: bool, addresses: &[IpAddr]) -> IpSet {
    if mark_utilized {
        return IpSet::new();
    }
    IpSet::from_spans([*range]).difference(&IpSet::from_spans(
        addresses.iter().map(|a| Span::host(*a)),
    ))
}

/// A real address or a run of free addresses between two of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IpSlot<T> {
    Address { address: T },
    Gap {
        /// First free address, with the prefix's mask
        first: IpNet,
        #[serde(serialize_with = "as_decimal")]
        count: BigUint,
    },
}

/// Interleave `ips` (ordered by address) with gap descriptors counting the
/// free addresses before, between and after them.
///
/// The usable bounds of a non-pool IPv4 prefix shorter than /31 skip the
/// network and broadcast addresses.
pub fn annotate_ip_gaps<T: Host>(prefix: &IpNet, is_pool: bool, ips: Vec<T>) -> Vec<IpSlot<T>> {
    let net = prefix.trunc();
    let family = Family::of_net(&net);
    let len = net.prefix_len();
    let (mut first, mut last) = (addr_to_u128(net.network()), addr_to_u128(net.broadcast()));
    if !is_pool && family == Family::V4 && len < 31 {
        first += 1;
        last -= 1;
    }
    let gap = |from: u128, to: u128| IpSlot::Gap {
        first: with_mask(u128_to_addr(family, from), len),
        count: BigUint::from(to - from) + 1u32,
    };

    let mut out = Vec::with_capacity(ips.len() * 2 + 1);
    let mut prev: Option<u128> = None;
    for ip in ips {
        let value = addr_to_u128(ip.host_addr());
        match prev {
            None if value > first => out.push(gap(first, value - 1)),
            Some(p) if value > p.saturating_add(1) => out.push(gap(p + 1, value - 1)),
            _ => {}
        }
        out.push(IpSlot::Address { address: ip });
        prev = Some(prev.map_or(value, |p| p.max(value)));
    }
    match prev {
        None => out.push(gap(first, last)),
        Some(p) if p < last => out.push(gap(p + 1, last)),
        _ => {}
    }
    out
}

/// VIDs in `[min_vid, max_vid]` not used by any of `used`.
pub fn available_vids(min_vid: u16, max_vid: u16, used: &[u16]) -> Vec<u16> {
    let taken: std::collections::BTreeSet<u16> = used.iter().copied().collect();
    (min_vid..=max_vid).filter(|v| !taken.contains(v)).collect()
}

pub fn first_available_vid(min_vid: u16, max_vid: u16, used: &[u16]) -> Option<u16> {
    available_vids(min_vid, max_vid, used).into_iter().next()
}

/// A real VLAN or a run of free VIDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VlanSlot<T> {
    Vlan { vlan: T },
    Gap { first_vid: u16, count: u16 },
}

/// Interleave `vlans` (ordered by VID) with the free runs of
/// `[min_vid, max_vid]` around them.
pub fn annotate_vlan_gaps(min_vid: u16, max_vid: u16, vlans: Vec<Vlan>) -> Vec<VlanSlot<Vlan>> {
    let mut out = Vec::with_capacity(vlans.len() * 2 + 1);
    let mut next_free = min_vid;
    for vlan in vlans {
        if vlan.vid > next_free {
            out.push(VlanSlot::Gap {
                first_vid: next_free,
                count: vlan.vid - next_free,
            });
        }
        next_free = next_free.max(vlan.vid.saturating_add(1));
        out.push(VlanSlot::Vlan { vlan });
    }
    if next_free <= max_vid {
        out.push(VlanSlot::Gap {
            first_vid: next_free,
            count: max_vid - next_free + 1,
        });
    }
    out
}
