//! IPv4/IPv6 arithmetic over CIDR blocks and inclusive address spans.
//!
//! Everything here is a pure function of its inputs. Addresses are handled as
//! `u128` values tagged with their [`Family`] so that both protocol versions
//! share one implementation of the interval arithmetic; sizes are returned as
//! [`BigUint`] because a span of IPv6 space does not fit in 64 bits.

use crate::error::{Error, Result};
use ipnet::IpNet;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IP protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    pub fn of_net(net: &IpNet) -> Self {
        Self::of(&net.addr())
    }

    /// Address width in bits.
    pub fn bits(self) -> u8 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }

    /// The protocol number as written in "IPv4"/"IPv6".
    pub fn number(self) -> u8 {
        match self {
            Family::V4 => 4,
            Family::V6 => 6,
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IPv{}", self.number())
    }
}

pub fn addr_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u32::from(a) as u128,
        IpAddr::V6(a) => u128::from(a),
    }
}

pub fn u128_to_addr(family: Family, value: u128) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::from(value as u32)),
        Family::V6 => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

/// Build a network from a raw value and mask length. Callers only pass
/// lengths bounded by the family width.
fn net_from(family: Family, value: u128, prefix_len: u8) -> IpNet {
    let addr = u128_to_addr(family, value);
    IpNet::new(addr, prefix_len).unwrap_or_else(|_| IpNet::from(addr))
}

/// Parse `network/len` notation. Host bits are preserved; use
/// [`IpNet::trunc`] to get the network itself.
pub fn parse_cidr(s: &str) -> Result<IpNet> {
    let s = s.trim();
    if !s.contains('/') {
        return Err(Error::InvalidFormat(format!(
            "{s}: missing mask length (expected address/len)"
        )));
    }
    s.parse::<IpNet>()
        .map_err(|e| Error::InvalidFormat(format!("{s}: {e}")))
}

/// True if `a` contains `b` and the two are not the same network.
pub fn contains(a: &IpNet, b: &IpNet) -> bool {
    b.prefix_len() > a.prefix_len() && a.contains(b)
}

/// True if `a` contains `b` or both denote the same network.
pub fn contains_or_equals(a: &IpNet, b: &IpNet) -> bool {
    a.contains(b)
}

/// True if the host address of `addr` lies inside `net`.
pub fn contains_host(net: &IpNet, addr: &IpAddr) -> bool {
    net.contains(addr)
}

/// True if the two networks share at least one address.
pub fn overlaps(a: &IpNet, b: &IpNet) -> bool {
    a.contains(b) || b.contains(a)
}

/// Number of addresses from `start` through `end` inclusive.
pub fn range_size(start: IpAddr, end: IpAddr) -> Result<BigUint> {
    Ok(Span::new(start, end)?.size())
}

/// Ordering key placing a containing network before everything it contains:
/// family, then network address, then mask length.
pub fn sort_key(net: &IpNet) -> (Family, u128, u8) {
    (
        Family::of_net(net),
        addr_to_u128(net.network()),
        net.prefix_len(),
    )
}

/// An inclusive, non-empty run of addresses within a single family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    family: Family,
    first: u128,
    last: u128,
}

impl Span {
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self> {
        let family = Family::of(&start);
        if family != Family::of(&end) {
            return Err(Error::InvalidFormat(format!(
                "{start} and {end} belong to different address families"
            )));
        }
        let (first, last) = (addr_to_u128(start), addr_to_u128(end));
        if first > last {
            return Err(Error::InvalidFormat(format!("{start} is greater than {end}")));
        }
        Ok(Self {
            family,
            first,
            last,
        })
    }

    pub fn of_net(net: &IpNet) -> Self {
        Self {
            family: Family::of_net(net),
            first: addr_to_u128(net.network()),
            last: addr_to_u128(net.broadcast()),
        }
    }

    pub fn host(addr: IpAddr) -> Self {
        let value = addr_to_u128(addr);
        Self {
            family: Family::of(&addr),
            first: value,
            last: value,
        }
    }

    pub(crate) fn from_raw(family: Family, first: u128, last: u128) -> Self {
        Self {
            family,
            first,
            last,
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn first(&self) -> u128 {
        self.first
    }

    pub fn last(&self) -> u128 {
        self.last
    }

    pub fn first_addr(&self) -> IpAddr {
        u128_to_addr(self.family, self.first)
    }

    pub fn last_addr(&self) -> IpAddr {
        u128_to_addr(self.family, self.last)
    }

    pub fn size(&self) -> BigUint {
        BigUint::from(self.last - self.first) + 1u32
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        Family::of(addr) == self.family && {
            let v = addr_to_u128(*addr);
            v >= self.first && v <= self.last
        }
    }

    /// Minimal list of CIDR blocks covering exactly this span.
    pub fn cidrs(&self) -> Vec<IpNet> {
        let mut out = Vec::new();
        push_cidrs(self.family, self.first, self.last, &mut out);
        out
    }
}

fn block_last(first: u128, host_bits: u32) -> u128 {
    if host_bits >= 128 {
        u128::MAX
    } else {
        first | ((1u128 << host_bits) - 1)
    }
}

fn push_cidrs(family: Family, mut first: u128, last: u128, out: &mut Vec<IpNet>) {
    let bits = family.bits() as u32;
    loop {
        let align = if first == 0 {
            bits
        } else {
            first.trailing_zeros().min(bits)
        };
        let mut host_bits = align;
        while host_bits > 0 && block_last(first, host_bits) > last {
            host_bits -= 1;
        }
        let end = block_last(first, host_bits);
        out.push(net_from(family, first, (bits - host_bits) as u8));
        if end >= last {
            break;
        }
        first = end + 1;
    }
}

/// A set of addresses kept as sorted, disjoint, non-adjacent spans per family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpSet {
    v4: Vec<(u128, u128)>,
    v6: Vec<(u128, u128)>,
}

impl IpSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_spans<I: IntoIterator<Item = Span>>(spans: I) -> Self {
        let mut set = Self::new();
        for span in spans {
            set.runs_mut(span.family).push((span.first, span.last));
        }
        set.v4 = normalize(std::mem::take(&mut set.v4));
        set.v6 = normalize(std::mem::take(&mut set.v6));
        set
    }

    pub fn from_nets<'a, I: IntoIterator<Item = &'a IpNet>>(nets: I) -> Self {
        Self::from_spans(nets.into_iter().map(Span::of_net))
    }

    fn runs(&self, family: Family) -> &Vec<(u128, u128)> {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }

    fn runs_mut(&mut self, family: Family) -> &mut Vec<(u128, u128)> {
        match family {
            Family::V4 => &mut self.v4,
            Family::V6 => &mut self.v6,
        }
    }

    pub fn insert(&mut self, span: Span) {
        let runs = self.runs_mut(span.family);
        runs.push((span.first, span.last));
        *runs = normalize(std::mem::take(runs));
    }

    pub fn union(&self, other: &IpSet) -> IpSet {
        let mut v4 = self.v4.clone();
        v4.extend_from_slice(&other.v4);
        let mut v6 = self.v6.clone();
        v6.extend_from_slice(&other.v6);
        IpSet {
            v4: normalize(v4),
            v6: normalize(v6),
        }
    }

    pub fn difference(&self, other: &IpSet) -> IpSet {
        IpSet {
            v4: subtract(&self.v4, &other.v4),
            v6: subtract(&self.v6, &other.v6),
        }
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        let value = addr_to_u128(*addr);
        let runs = self.runs(Family::of(addr));
        let idx = runs.partition_point(|&(first, _)| first <= value);
        idx > 0 && runs[idx - 1].1 >= value
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    /// Total number of addresses in the set.
    pub fn size(&self) -> BigUint {
        self.spans().map(|s| s.size()).sum()
    }

    /// Spans in ascending order, IPv4 before IPv6.
    pub fn spans(&self) -> impl Iterator<Item = Span> + '_ {
        self.v4
            .iter()
            .map(|&(f, l)| Span::from_raw(Family::V4, f, l))
            .chain(
                self.v6
                    .iter()
                    .map(|&(f, l)| Span::from_raw(Family::V6, f, l)),
            )
    }

    /// Minimal CIDR covering of the set, in ascending order.
    pub fn cidrs(&self) -> Vec<IpNet> {
        let mut out = Vec::new();
        for span in self.spans() {
            push_cidrs(span.family, span.first, span.last, &mut out);
        }
        out
    }

    pub fn first(&self) -> Option<IpAddr> {
        self.spans().next().map(|s| s.first_addr())
    }
}

fn normalize(mut runs: Vec<(u128, u128)>) -> Vec<(u128, u128)> {
    runs.sort_unstable();
    let mut out: Vec<(u128, u128)> = Vec::with_capacity(runs.len());
    for (first, last) in runs {
        match out.last_mut() {
            Some(prev) if first <= prev.1.saturating_add(1) => {
                prev.1 = prev.1.max(last);
            }
            _ => out.push((first, last)),
        }
    }
    out
}

fn subtract(a: &[(u128, u128)], b: &[(u128, u128)]) -> Vec<(u128, u128)> {
    let mut out = Vec::new();
    let mut j = 0;
    for &(start, end) in a {
        while j < b.len() && b[j].1 < start {
            j += 1;
        }
        let mut cur = start;
        let mut open = true;
        let mut k = j;
        while open && k < b.len() && b[k].0 <= end {
            let (bs, be) = b[k];
            if bs > cur {
                out.push((cur, bs - 1));
            }
            if be >= end {
                open = false;
            } else {
                cur = cur.max(be + 1);
            }
            k += 1;
        }
        if open {
            out.push((cur, end));
        }
    }
    out
}

/// Free space of `universe` after removing every span in `subtract`, as the
/// minimal CIDR covering in ascending order.
pub fn set_difference(universe: &IpNet, subtract: &[Span]) -> Vec<IpNet> {
    IpSet::from_spans([Span::of_net(universe)])
        .difference(&IpSet::from_spans(subtract.iter().copied()))
        .cidrs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_cidr() {
        let n = parse_cidr("10.1.2.3/16").unwrap();
        assert_eq!(n.prefix_len(), 16);
        assert_eq!(n.trunc(), net("10.1.0.0/16"));
        assert!(matches!(parse_cidr("10.1.2.3"), Err(Error::InvalidFormat(_))));
        assert!(matches!(parse_cidr("10.1.2/33"), Err(Error::InvalidFormat(_))));
        assert!(matches!(parse_cidr("bogus/8"), Err(Error::InvalidFormat(_))));
        assert_eq!(Family::of_net(&parse_cidr("2001:db8::/32").unwrap()), Family::V6);
    }

    #[test]
    fn test_containment() {
        let a = net("10.0.0.0/8");
        let b = net("10.1.0.0/16");
        assert!(contains(&a, &b));
        assert!(!contains(&b, &a));
        assert!(!contains(&a, &a));
        assert!(contains_or_equals(&a, &a));
        assert!(!contains(&a, &net("2001:db8::/32")));
        assert!(contains_host(&a, &addr("10.255.255.255")));
        assert!(!contains_host(&a, &addr("11.0.0.0")));
    }

    #[test]
    fn test_range_size_large_ipv6() {
        let size = range_size(addr("::"), addr("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff")).unwrap();
        assert_eq!(size, BigUint::from(1u8) << 128);
        assert_eq!(
            range_size(addr("192.0.2.10"), addr("192.0.2.20")).unwrap(),
            BigUint::from(11u8)
        );
        assert!(range_size(addr("192.0.2.20"), addr("192.0.2.10")).is_err());
        assert!(range_size(addr("192.0.2.1"), addr("::1")).is_err());
    }

    #[test]
    fn test_span_cidrs() {
        let span = Span::new(addr("192.0.2.3"), addr("192.0.2.253")).unwrap();
        let cidrs = span.cidrs();
        assert_eq!(cidrs.first(), Some(&net("192.0.2.3/32")));
        assert_eq!(cidrs.last(), Some(&net("192.0.2.252/31")));
        let total: BigUint = cidrs.iter().map(|c| Span::of_net(c).size()).sum();
        assert_eq!(total, BigUint::from(251u32));
    }

    #[test]
    fn test_set_difference() {
        let free = set_difference(
            &net("10.0.0.0/24"),
            &[Span::of_net(&net("10.0.0.0/26")), Span::of_net(&net("10.0.0.128/26"))],
        );
        assert_eq!(free, vec![net("10.0.0.64/26"), net("10.0.0.192/26")]);

        let everything = set_difference(&net("10.0.0.0/24"), &[]);
        assert_eq!(everything, vec![net("10.0.0.0/24")]);

        let nothing = set_difference(&net("10.0.0.0/24"), &[Span::of_net(&net("10.0.0.0/16"))]);
        assert!(nothing.is_empty());
    }

    #[test]
    fn test_ipset_union_merges_adjacent() {
        let set = IpSet::from_nets(&[net("10.0.0.0/25"), net("10.0.0.128/25"), net("10.0.0.64/26")]);
        assert_eq!(set.cidrs(), vec![net("10.0.0.0/24")]);
        assert_eq!(set.size(), BigUint::from(256u32));
        assert!(set.contains(&addr("10.0.0.200")));
        assert!(!set.contains(&addr("10.0.1.0")));
    }

    #[test]
    fn test_ipset_mixed_families() {
        let set = IpSet::from_nets(&[net("2001:db8::/126"), net("192.0.2.0/30")]);
        assert_eq!(set.size(), BigUint::from(8u32));
        assert_eq!(set.cidrs(), vec![net("192.0.2.0/30"), net("2001:db8::/126")]);
        assert!(set.contains(&addr("2001:db8::3")));
        assert_eq!(set.first(), Some(addr("192.0.2.0")));
    }

    #[test]
    fn test_full_ipv6_space() {
        let all = Span::new(addr("::"), addr("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff")).unwrap();
        assert_eq!(all.cidrs(), vec![net("::/0")]);
        let set = IpSet::from_spans([all]).difference(&IpSet::from_nets(&[net("::/1")]));
        assert_eq!(set.cidrs(), vec![net("8000::/1")]);
    }
}
