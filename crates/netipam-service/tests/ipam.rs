use ipnet::IpNet;
use netipam_core::config::IpamConfig;
use netipam_core::db::{Db, Store};
use netipam_core::error::{Error, ValidationKind};
use netipam_core::types::{
    Aggregate, AssignedObject, IpAddress, IpAddressRole, Prefix, PrefixStatus, Rir, ScopeKey,
    Vlan, VlanGroup, Vrf,
};
use netipam_service::{ChildrenOptions, IpParent, Ipam};
use netipam_space::{IpSlot, UtilizationKey};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use uuid::Uuid;

fn test_ipam() -> (Ipam, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Db::open(&dir.path().join("ipam.redb")).unwrap();
    (Ipam::new(db, IpamConfig::default()), dir)
}

fn net(s: &str) -> IpNet {
    s.parse().unwrap()
}

fn container(ipam: &Ipam, cidr: &str) -> Prefix {
    let mut p = Prefix::new(net(cidr), None);
    p.status = PrefixStatus::Container;
    ipam.save_prefix(p).unwrap()
}

#[test]
fn test_aggregate_utilization_counts_top_level_prefixes() {
    let (ipam, _dir) = test_ipam();
    let rir = ipam.save_rir(Rir::new("RFC 1918", "rfc-1918")).unwrap();
    let agg = ipam
        .save_aggregate(Aggregate::new(net("10.0.0.0/8"), rir.id))
        .unwrap();
    container(&ipam, "10.0.0.0/16");
    ipam.save_prefix(Prefix::new(net("10.0.0.0/24"), None)).unwrap();
    ipam.save_prefix(Prefix::new(net("10.0.1.0/24"), None)).unwrap();
    ipam.save_prefix(Prefix::new(net("10.1.0.0/16"), None)).unwrap();

    let used = ipam.utilization(UtilizationKey::Aggregate(agg.id)).unwrap();
    assert!((used - 0.78125).abs() < 1e-9, "got {used}");
}

#[test]
fn test_ip_listing_skips_network_and_broadcast() {
    let (ipam, _dir) = test_ipam();
    let prefix = ipam
        .save_prefix(Prefix::new(net("192.0.2.0/24"), None))
        .unwrap();
    for cidr in ["192.0.2.1/24", "192.0.2.2/24", "192.0.2.254/24"] {
        ipam.save_ip_address(IpAddress::new(net(cidr), None)).unwrap();
    }

    let listing = ipam.get_ip_listing(prefix.id, true).unwrap();
    let gaps: Vec<(IpNet, String)> = listing
        .iter()
        .filter_map(|slot| match slot {
            IpSlot::Gap { first, count } => Some((*first, count.to_string())),
            IpSlot::Address { .. } => None,
        })
        .collect();
    assert_eq!(gaps, vec![(net("192.0.2.3/24"), "251".to_string())]);
    assert_eq!(listing.len(), 4);
}

#[test]
fn test_insert_maintains_depth_and_children() {
    let (ipam, _dir) = test_ipam();
    let outer = ipam.save_prefix(Prefix::new(net("10.0.0.0/16"), None)).unwrap();
    let inner = ipam.save_prefix(Prefix::new(net("10.0.1.0/24"), None)).unwrap();

    let outer = ipam.prefix(outer.id).unwrap();
    assert_eq!((outer.depth, outer.children), (0, 1));
    assert_eq!((inner.depth, inner.children), (1, 0));

    ipam.delete_prefix(outer.id).unwrap();
    let inner = ipam.prefix(inner.id).unwrap();
    assert_eq!(inner.depth, 0);
}

#[test]
fn test_vlan_group_available_vids() {
    let (ipam, _dir) = test_ipam();
    let mut group = VlanGroup::new("dc", "dc");
    group.min_vid = 100;
    group.max_vid = 105;
    let group = ipam.save_vlan_group(group).unwrap();
    for vid in [100, 101, 104] {
        let mut vlan = Vlan::new(vid, &format!("vlan{vid}"));
        vlan.group = Some(group.id);
        ipam.save_vlan(vlan).unwrap();
    }
    assert_eq!(ipam.available_vids(group.id).unwrap(), vec![102, 103, 105]);
}

#[test]
fn test_overlapping_aggregate_rejected() {
    let (ipam, _dir) = test_ipam();
    let rir = ipam.save_rir(Rir::new("ARIN", "arin")).unwrap();
    ipam.save_aggregate(Aggregate::new(net("10.0.0.0/8"), rir.id))
        .unwrap();
    let err = ipam
        .save_aggregate(Aggregate::new(net("10.0.0.0/16"), rir.id))
        .unwrap_err();
    assert_eq!(err.validation_kind(), Some(ValidationKind::Overlap));
    assert_eq!(ipam.db().read(|tx| tx.aggregates()).unwrap().len(), 1);
}

#[test]
fn test_duplicate_address_and_anycast_exemption() {
    let (ipam, _dir) = test_ipam();
    let vrf = ipam.save_vrf(Vrf::new("prod")).unwrap();

    let mut first = IpAddress::new(net("192.0.2.5/24"), Some(vrf.id));
    first.role = Some(IpAddressRole::Anycast);
    first.assigned_object = Some(AssignedObject::Interface(Uuid::new_v4()));
    ipam.save_ip_address(first).unwrap();

    let plain = IpAddress::new(net("192.0.2.5/24"), Some(vrf.id));
    let err = ipam.save_ip_address(plain).unwrap_err();
    assert_eq!(err.validation_kind(), Some(ValidationKind::DuplicateAddress));

    let mut anycast = IpAddress::new(net("192.0.2.5/24"), Some(vrf.id));
    anycast.role = Some(IpAddressRole::Anycast);
    ipam.save_ip_address(anycast).unwrap();

    // another VRF is another namespace
    let other = ipam.save_vrf(Vrf::new("lab")).unwrap();
    ipam.save_ip_address(IpAddress::new(net("192.0.2.5/24"), Some(other.id)))
        .unwrap();
}

#[test]
fn test_moving_prefix_between_vrfs_rebuilds_both() {
    let (ipam, _dir) = test_ipam();
    let vrf = ipam.save_vrf(Vrf::new("blue")).unwrap();
    let outer = ipam.save_prefix(Prefix::new(net("10.0.0.0/16"), None)).unwrap();
    let mut inner = ipam.save_prefix(Prefix::new(net("10.0.1.0/24"), None)).unwrap();

    inner.vrf = Some(vrf.id);
    let moved = ipam.save_prefix(inner).unwrap();
    assert_eq!(moved.depth, 0);
    assert_eq!(ipam.prefix(outer.id).unwrap().children, 0);
}

#[test]
fn test_rebuild_is_idempotent() {
    let (ipam, _dir) = test_ipam();
    for cidr in ["10.0.0.0/8", "10.1.0.0/16", "10.1.1.0/24", "10.1.1.0/24", "10.2.0.0/16"] {
        ipam.save_prefix(Prefix::new(net(cidr), None)).unwrap();
    }
    let snapshot = |ipam: &Ipam| -> Vec<(Uuid, u32, u64)> {
        ipam.db()
            .read(|tx| tx.prefixes_in_scope(ScopeKey::GLOBAL))
            .unwrap()
            .iter()
            .map(|p| (p.id, p.depth, p.children))
            .collect()
    };
    let before = snapshot(&ipam);

    let stats = ipam.rebuild_all().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].scope, ScopeKey::GLOBAL);
    assert_eq!(stats[0].prefixes, 5);
    assert_eq!(stats[0].updated, 0);
    assert_eq!(ipam.rebuild_hierarchy(ScopeKey::GLOBAL).unwrap().updated, 0);
    assert_eq!(snapshot(&ipam), before);

    // both duplicates share one position in the tree
    let dups: Vec<(u32, u64)> = before
        .iter()
        .filter(|(_, depth, _)| *depth == 2)
        .map(|(_, d, c)| (*d, *c))
        .collect();
    assert_eq!(dups, vec![(2, 0), (2, 0)]);
}

#[test]
fn test_duplicated_parent_counts_twice_in_depth() {
    let (ipam, _dir) = test_ipam();
    let a = ipam.save_prefix(Prefix::new(net("10.0.0.0/16"), None)).unwrap();
    let b = ipam.save_prefix(Prefix::new(net("10.0.0.0/16"), None)).unwrap();
    let child = ipam.save_prefix(Prefix::new(net("10.0.1.0/24"), None)).unwrap();

    let values = |id: Uuid| {
        let p = ipam.prefix(id).unwrap();
        (p.depth, p.children)
    };
    assert_eq!(values(child.id), (2, 0));
    assert_eq!(values(a.id), (0, 1));
    assert_eq!(values(b.id), (0, 1));
}

#[test]
fn test_concurrent_allocations_are_distinct() {
    let (ipam, _dir) = test_ipam();
    let parent_id = container(&ipam, "10.0.0.0/24").id;
    let ipam = Arc::new(ipam);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ipam = Arc::clone(&ipam);
            thread::spawn(move || {
                (0..4)
                    .map(|_| ipam.allocate_prefix(parent_id, 30).unwrap().unwrap().prefix)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for prefix in handle.join().unwrap() {
            assert!(seen.insert(prefix), "{prefix} allocated twice");
        }
    }
    assert_eq!(seen.len(), 32);
    assert_eq!(ipam.prefix(parent_id).unwrap().children, 32);
}

#[test]
fn test_concurrent_ip_allocations_are_distinct() {
    let (ipam, _dir) = test_ipam();
    let parent = IpParent::Prefix(
        ipam.save_prefix(Prefix::new(net("192.0.2.0/27"), None))
            .unwrap()
            .id,
    );
    let ipam = Arc::new(ipam);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let ipam = Arc::clone(&ipam);
            thread::spawn(move || {
                (0..5)
                    .map(|_| ipam.allocate_ip(parent).unwrap().unwrap().host())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for host in handle.join().unwrap() {
            assert!(seen.insert(host));
        }
    }
    assert_eq!(seen.len(), 30);
    assert!(ipam.allocate_ip(parent).unwrap().is_none());
}

#[test]
fn test_racing_plans_second_commit_fails() {
    let (ipam, _dir) = test_ipam();
    let parent = container(&ipam, "10.0.0.0/24");

    let a = ipam.plan_prefix_allocation(parent.id, 30).unwrap().unwrap();
    let b = ipam.plan_prefix_allocation(parent.id, 30).unwrap().unwrap();
    ipam.commit_prefix_allocation(parent.id, a).unwrap();
    let err = ipam.commit_prefix_allocation(parent.id, b).unwrap_err();
    assert!(matches!(err, Error::ConcurrentModification(_)));

    // a fresh plan moves on
    let c = ipam.plan_prefix_allocation(parent.id, 30).unwrap().unwrap();
    assert_eq!(c.prefix, net("10.0.0.4/30"));
}

#[test]
fn test_children_listing_defaults() {
    let (ipam, _dir) = test_ipam();
    let parent = container(&ipam, "10.0.0.0/23");
    let rows = ipam.get_children(parent.id, ChildrenOptions::default()).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_available());
}

fn brute_force(nets: &[IpNet]) -> Vec<(u32, u64)> {
    nets.iter()
        .map(|n| {
            let depth = nets.iter().filter(|o| o.contains(n) && *o != n).count() as u32;
            let children = nets.iter().filter(|o| n.contains(*o) && *o != n).count() as u64;
            (depth, children)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_saved_hierarchy_matches_definition(
        raw in prop::collection::vec((0u32..64, 20u8..28), 1..24)
    ) {
        let (ipam, _dir) = test_ipam();
        let nets: Vec<IpNet> = raw
            .iter()
            .map(|(host, len)| {
                IpNet::new(std::net::Ipv4Addr::from(0x0a00_0000 | (host << 6)).into(), *len)
                    .unwrap()
                    .trunc()
            })
            .collect();
        let ids: Vec<Uuid> = nets
            .iter()
            .map(|n| ipam.save_prefix(Prefix::new(*n, None)).unwrap().id)
            .collect();

        let stored: Vec<(u32, u64)> = ids
            .iter()
            .map(|id| {
                let p = ipam.prefix(*id).unwrap();
                (p.depth, p.children)
            })
            .collect();
        prop_assert_eq!(stored, brute_force(&nets));
    }
}
