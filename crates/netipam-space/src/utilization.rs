use ipnet::IpNet;
use netipam_core::addr::{Family, IpSet, Span};
use netipam_core::types::{IpRange, Prefix};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use std::net::IpAddr;

/// `used / total * 100`, clamped to `[0, 100]`. An empty total reads as 0.
pub fn percent(used: &BigUint, total: &BigUint) -> f64 {
    if total.is_zero() {
        return 0.0;
    }
    let used = used.to_f64().unwrap_or(f64::MAX);
    let total = total.to_f64().unwrap_or(f64::MAX);
    (used / total * 100.0).clamp(0.0, 100.0)
}

/// Size of `set` restricted to `within`.
fn covered(set: &IpSet, within: &Span) -> BigUint {
    let outer = IpSet::from_spans([*within]);
    let outside = set.difference(&outer);
    set.difference(&outside).size()
}

/// Addresses of `prefix` that can hold an assignment: all of them for pools
/// and IPv4 /31 and longer, otherwise everything but network and broadcast.
pub fn usable_size(prefix: &IpNet, is_pool: bool) -> BigUint {
    let size = Span::of_net(prefix).size();
    if !is_pool && Family::of_net(prefix) == Family::V4 && prefix.prefix_len() < 31 {
        size - 2u32
    } else {
        size
    }
}

/// Share of an aggregate covered by prefixes (any VRF, equal allowed).
/// Overlapping prefixes are counted once.
pub fn aggregate_utilization(aggregate: &IpNet, prefixes: &[IpNet]) -> f64 {
    let span = Span::of_net(aggregate);
    let union = IpSet::from_nets(prefixes.iter().filter(|p| aggregate.contains(*p)));
    percent(&covered(&union, &span), &span.size())
}

/// Share of a container covered by its strictly contained children.
pub fn container_utilization(prefix: &IpNet, children: &[IpNet]) -> f64 {
    let span = Span::of_net(prefix);
    let union = IpSet::from_nets(
        children
            .iter()
            .filter(|c| netipam_core::addr::contains(prefix, c)),
    );
    percent(&covered(&union, &span), &span.size())
}

/// Utilization of a prefix.
///
/// `mark_utilized` reads as 100. Containers count child prefixes; all other
/// statuses count the union of child ranges and child addresses against the
/// usable size.
pub fn prefix_utilization(
    prefix: &Prefix,
    child_prefixes: &[IpNet],
    ranges: &[Span],
    addresses: &[IpAddr],
) -> f64 {
    if prefix.mark_utilized {
        return 100.0;
    }
    if prefix.status == netipam_core::types::PrefixStatus::Container {
        return container_utilization(&prefix.prefix, child_prefixes);
    }
    let span = Span::of_net(&prefix.prefix);
    let used = IpSet::from_spans(
        ranges
            .iter()
            .copied()
            .chain(addresses.iter().map(|a| Span::host(*a))),
    );
    percent(
        &covered(&used, &span),
        &usable_size(&prefix.prefix.trunc(), prefix.is_pool),
    )
}

/// Distinct addresses inside a range over its size.
pub fn range_utilization(range: &IpRange, addresses: &[IpAddr]) -> f64 {
    if range.mark_utilized {
        return 100.0;
    }
    let span = match Span::new(range.start(), range.end()) {
        Ok(span) => span,
        Err(_) => return 0.0,
    };
    let used = IpSet::from_spans(addresses.iter().map(|a| Span::host(*a)));
    percent(&covered(&used, &span), &span.size())
}

/// Member VLANs over the group's VID capacity.
pub fn vlan_group_utilization(min_vid: u16, max_vid: u16, members: usize) -> f64 {
    if max_vid < min_vid {
        return 0.0;
    }
    let capacity = BigUint::from(max_vid - min_vid) + 1u32;
    percent(&BigUint::from(members), &capacity)
}
