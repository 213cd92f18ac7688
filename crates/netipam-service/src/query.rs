//! Read-side operations: hierarchy listings, utilization and free space.

use crate::Ipam;
use ipnet::IpNet;
use netipam_core::addr::{contains_or_equals, sort_key, IpSet, Span};
use netipam_core::db::Store;
use netipam_core::error::{Error, Result};
use netipam_core::types::{
    Aggregate, IpAddress, IpRange, Prefix, PrefixStatus, ScopeKey, Vlan, VlanGroup,
};
use netipam_scope::{available_vlans, ScopeFilter, Topology};
use netipam_space::availability::{self, list_gaps};
use netipam_space::utilization;
use netipam_space::{GapEntry, IpSlot, UtilizationKey, VlanSlot};
use serde::Serialize;
use std::net::IpAddr;
use uuid::Uuid;

/// Which rows a children listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildrenOptions {
    pub show_available: bool,
    pub show_assigned: bool,
}

impl Default for ChildrenOptions {
    fn default() -> Self {
        Self {
            show_available: true,
            show_assigned: true,
        }
    }
}

/// The parent a "first available" question is asked of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstAvailable {
    /// A child prefix for containers, an address otherwise
    Prefix(Uuid),
    /// A child prefix of the given length
    PrefixOfLength(Uuid, u8),
    IpRange(Uuid),
    VlanGroup(Uuid),
}

/// A free block, address or VID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Available {
    Prefix(IpNet),
    Address(IpNet),
    Vid(u16),
}

/// Prefixes whose children span every VRF: containers in the global table.
fn spans_all_vrfs(prefix: &Prefix) -> bool {
    prefix.vrf.is_none() && prefix.status == PrefixStatus::Container
}

/// Child prefixes as listed under `prefix`.
pub(crate) fn child_prefixes<S: Store>(tx: &S, prefix: &Prefix, include_self: bool) -> Result<Vec<Prefix>> {
    let scope = (!spans_all_vrfs(prefix)).then(|| prefix.scope());
    tx.prefixes_within(scope, &prefix.prefix, include_self)
}

/// Addresses inside `prefix`, ordered by host.
pub(crate) fn child_ips<S: Store>(tx: &S, prefix: &Prefix) -> Result<Vec<IpAddress>> {
    let scope = (!spans_all_vrfs(prefix)).then(|| prefix.scope());
    tx.ip_addresses_within(scope, &Span::of_net(&prefix.prefix))
}

/// Ranges of the prefix's own VRF lying wholly inside it.
pub(crate) fn child_ranges<S: Store>(tx: &S, prefix: &Prefix) -> Result<Vec<IpRange>> {
    tx.ip_ranges_within(prefix.scope(), &prefix.prefix)
}

pub(crate) fn range_span(range: &IpRange) -> Result<Span> {
    Span::new(range.start(), range.end())
}

pub(crate) fn range_ips<S: Store>(tx: &S, range: &IpRange) -> Result<Vec<IpAddress>> {
    tx.ip_addresses_within(Some(range.scope()), &range_span(range)?)
}

fn hosts(ips: &[IpAddress]) -> Vec<IpAddr> {
    ips.iter().map(|ip| ip.host()).collect()
}

/// Free addresses of a prefix given the current children.
pub(crate) fn free_ips_in_prefix<S: Store>(tx: &S, prefix: &Prefix) -> Result<IpSet> {
    let ranges = child_ranges(tx, prefix)?
        .iter()
        .map(range_span)
        .collect::<Result<Vec<Span>>>()?;
    let ips = child_ips(tx, prefix)?;
    Ok(availability::available_ips(
        &prefix.prefix,
        prefix.is_pool,
        prefix.mark_utilized,
        &hosts(&ips),
        &ranges,
    ))
}

pub(crate) fn free_ips_in_range<S: Store>(tx: &S, range: &IpRange) -> Result<IpSet> {
    let ips = range_ips(tx, range)?;
    Ok(availability::range_available_ips(
        &range_span(range)?,
        range.mark_utilized,
        &hosts(&ips),
    ))
}

/// Drop children nested inside another listed child; equal CIDRs all stay.
fn outermost(mut children: Vec<Prefix>) -> Vec<Prefix> {
    children.sort_by_key(|p| sort_key(&p.prefix));
    let mut out: Vec<Prefix> = Vec::with_capacity(children.len());
    let mut cover: Option<IpNet> = None;
    for child in children {
        match cover {
            Some(c) if c != child.prefix && contains_or_equals(&c, &child.prefix) => continue,
            _ => {
                cover = Some(child.prefix);
                out.push(child);
            }
        }
    }
    out
}

impl Ipam {
    pub fn prefix(&self, id: Uuid) -> Result<Prefix> {
        self.db.read(|tx| tx.require(&id))
    }

    pub fn aggregate(&self, id: Uuid) -> Result<Aggregate> {
        self.db.read(|tx| tx.require(&id))
    }

    pub fn ip_range(&self, id: Uuid) -> Result<IpRange> {
        self.db.read(|tx| tx.require(&id))
    }

    pub fn vlan_group(&self, id: Uuid) -> Result<VlanGroup> {
        self.db.read(|tx| tx.require(&id))
    }

    /// Containing prefixes in the same VRF, outermost first.
    pub fn get_parents(&self, id: Uuid, include_self: bool) -> Result<Vec<Prefix>> {
        self.db.read(|tx| {
            let prefix: Prefix = tx.require(&id)?;
            tx.prefixes_containing(prefix.scope(), &prefix.prefix, include_self)
        })
    }

    /// Contained prefixes at any depth. A global container lists children
    /// from every VRF.
    pub fn get_child_prefixes(&self, id: Uuid, include_self: bool) -> Result<Vec<Prefix>> {
        self.db.read(|tx| {
            let prefix: Prefix = tx.require(&id)?;
            child_prefixes(tx, &prefix, include_self)
        })
    }

    /// Top-level children of a prefix interleaved with the free blocks
    /// between them.
    pub fn get_children(&self, id: Uuid, options: ChildrenOptions) -> Result<Vec<GapEntry<Prefix>>> {
        let (prefix, children) = self.db.read(|tx| {
            let prefix: Prefix = tx.require(&id)?;
            let children = child_prefixes(tx, &prefix, false)?;
            Ok((prefix, children))
        })?;
        Ok(list_gaps(
            &prefix.prefix,
            outermost(children),
            options.show_available,
            options.show_assigned,
        ))
    }

    /// Top-level prefixes (any VRF) inside an aggregate with the free blocks
    /// between them.
    pub fn get_aggregate_children(
        &self,
        id: Uuid,
        options: ChildrenOptions,
    ) -> Result<Vec<GapEntry<Prefix>>> {
        let (agg, children) = self.db.read(|tx| {
            let agg: Aggregate = tx.require(&id)?;
            let children = tx.prefixes_within(None, &agg.prefix, true)?;
            Ok((agg, children))
        })?;
        Ok(list_gaps(
            &agg.prefix,
            outermost(children),
            options.show_available,
            options.show_assigned,
        ))
    }

    pub fn get_child_ranges(&self, id: Uuid) -> Result<Vec<IpRange>> {
        self.db.read(|tx| {
            let prefix: Prefix = tx.require(&id)?;
            child_ranges(tx, &prefix)
        })
    }

    pub fn get_child_ips(&self, id: Uuid) -> Result<Vec<IpAddress>> {
        self.db.read(|tx| {
            let prefix: Prefix = tx.require(&id)?;
            child_ips(tx, &prefix)
        })
    }

    /// Child addresses of a prefix, with free runs between them annotated
    /// when `show_available` is set.
    pub fn get_ip_listing(&self, id: Uuid, show_available: bool) -> Result<Vec<IpSlot<IpAddress>>> {
        let (prefix, ips) = self.db.read(|tx| {
            let prefix: Prefix = tx.require(&id)?;
            let ips = child_ips(tx, &prefix)?;
            Ok((prefix, ips))
        })?;
        if show_available {
            Ok(availability::annotate_ip_gaps(&prefix.prefix, prefix.is_pool, ips))
        } else {
            Ok(ips
                .into_iter()
                .map(|address| IpSlot::Address { address })
                .collect())
        }
    }

    pub fn get_range_ips(&self, id: Uuid) -> Result<Vec<IpAddress>> {
        self.db.read(|tx| {
            let range: IpRange = tx.require(&id)?;
            range_ips(tx, &range)
        })
    }

    // --- Utilization ---

    /// Utilization percentage in `[0, 100]`, served from the cache when the
    /// address space has not changed since it was computed.
    pub fn utilization(&self, key: UtilizationKey) -> Result<f64> {
        self.cache
            .get_or_try_insert(key, || self.db.read(|tx| compute_utilization(tx, key)))
    }

    // --- Free space ---

    pub fn available_ips(&self, prefix_id: Uuid) -> Result<IpSet> {
        self.db.read(|tx| free_ips_in_prefix(tx, &tx.require(&prefix_id)?))
    }

    pub fn range_available_ips(&self, range_id: Uuid) -> Result<IpSet> {
        self.db.read(|tx| free_ips_in_range(tx, &tx.require(&range_id)?))
    }

    /// Lowest free child block of a prefix, of `length` bits when given.
    pub fn first_available_prefix(&self, prefix_id: Uuid, length: Option<u8>) -> Result<Option<IpNet>> {
        self.db.read(|tx| {
            let prefix: Prefix = tx.require(&prefix_id)?;
            let nets: Vec<IpNet> = child_prefixes(tx, &prefix, false)?
                .iter()
                .map(|p| p.prefix)
                .collect();
            Ok(match length {
                Some(len) => availability::first_available_prefix_of_len(&prefix.prefix, &nets, len),
                None => availability::first_available_prefix(&prefix.prefix, &nets),
            })
        })
    }

    pub fn first_available_ip(&self, prefix_id: Uuid) -> Result<Option<IpNet>> {
        self.db.read(|tx| {
            let prefix: Prefix = tx.require(&prefix_id)?;
            Ok(free_ips_in_prefix(tx, &prefix)?
                .first()
                .map(|a| availability::with_mask(a, prefix.prefix.prefix_len())))
        })
    }

    pub fn range_first_available_ip(&self, range_id: Uuid) -> Result<Option<IpNet>> {
        self.db.read(|tx| {
            let range: IpRange = tx.require(&range_id)?;
            Ok(free_ips_in_range(tx, &range)?
                .first()
                .map(|a| availability::with_mask(a, range.start_address.prefix_len())))
        })
    }

    pub fn available_vids(&self, group_id: Uuid) -> Result<Vec<u16>> {
        self.db.read(|tx| {
            let group: VlanGroup = tx.require(&group_id)?;
            let used: Vec<u16> = tx.vlans_in_group(Some(group_id))?.iter().map(|v| v.vid).collect();
            Ok(availability::available_vids(group.min_vid, group.max_vid, &used))
        })
    }

    pub fn first_available_vid(&self, group_id: Uuid) -> Result<Option<u16>> {
        Ok(self.available_vids(group_id)?.into_iter().next())
    }

    /// Member VLANs of a group with the free VID runs between them.
    pub fn get_vlan_listing(&self, group_id: Uuid) -> Result<Vec<VlanSlot<Vlan>>> {
        self.db.read(|tx| {
            let group: VlanGroup = tx.require(&group_id)?;
            let vlans = tx.vlans_in_group(Some(group_id))?;
            Ok(availability::annotate_vlan_gaps(group.min_vid, group.max_vid, vlans))
        })
    }

    /// Single entry point for "next available" questions.
    pub fn get_first_available(&self, target: FirstAvailable) -> Result<Option<Available>> {
        match target {
            FirstAvailable::Prefix(id) => {
                let prefix = self.prefix(id)?;
                if prefix.status == PrefixStatus::Container {
                    Ok(self.first_available_prefix(id, None)?.map(Available::Prefix))
                } else {
                    Ok(self.first_available_ip(id)?.map(Available::Address))
                }
            }
            FirstAvailable::PrefixOfLength(id, len) => {
                Ok(self.first_available_prefix(id, Some(len))?.map(Available::Prefix))
            }
            FirstAvailable::IpRange(id) => {
                Ok(self.range_first_available_ip(id)?.map(Available::Address))
            }
            FirstAvailable::VlanGroup(id) => Ok(self.first_available_vid(id)?.map(Available::Vid)),
        }
    }

    // --- VLAN scope ---

    /// VLANs a device may use: those in groups scoped to its topology, those
    /// pinned to its site, and global ones.
    pub fn get_available_vlans_for_device<T: Topology + ?Sized>(
        &self,
        topology: &T,
        device_id: Uuid,
    ) -> Result<Vec<Vlan>> {
        let filter = ScopeFilter::for_device(topology, device_id)?;
        self.vlans_matching(&filter)
    }

    pub fn get_available_vlans_for_virtual_machine<T: Topology + ?Sized>(
        &self,
        topology: &T,
        vm_id: Uuid,
    ) -> Result<Vec<Vlan>> {
        let filter = ScopeFilter::for_virtual_machine(topology, vm_id)?;
        self.vlans_matching(&filter)
    }

    fn vlans_matching(&self, filter: &ScopeFilter) -> Result<Vec<Vlan>> {
        self.db.read(|tx| {
            let groups: Vec<VlanGroup> = tx.list()?;
            let mut vlans: Vec<Vlan> = tx.list()?;
            vlans.sort_by_key(|v| (v.vid, v.id));
            Ok(available_vlans(filter, &groups, vlans))
        })
    }

    /// Every VRF scope holding prefixes.
    pub fn scopes(&self) -> Result<Vec<ScopeKey>> {
        self.db.read(|tx| tx.prefix_scopes())
    }
}

fn compute_utilization<S: Store>(tx: &S, key: UtilizationKey) -> Result<f64> {
    match key {
        UtilizationKey::Aggregate(id) => {
            let agg: Aggregate = tx.require(&id)?;
            let nets: Vec<IpNet> = tx
                .prefixes_within(None, &agg.prefix, true)?
                .iter()
                .map(|p| p.prefix)
                .collect();
            Ok(utilization::aggregate_utilization(&agg.prefix, &nets))
        }
        UtilizationKey::Prefix(id) => {
            let prefix: Prefix = tx.require(&id)?;
            if prefix.status == PrefixStatus::Container {
                // own VRF only, even for global containers
                let nets: Vec<IpNet> = tx
                    .prefixes_within(Some(prefix.scope()), &prefix.prefix, false)?
                    .iter()
                    .map(|p| p.prefix)
                    .collect();
                return Ok(utilization::prefix_utilization(&prefix, &nets, &[], &[]));
            }
            let ranges = child_ranges(tx, &prefix)?
                .iter()
                .map(range_span)
                .collect::<Result<Vec<Span>>>()?;
            let ips = child_ips(tx, &prefix)?;
            Ok(utilization::prefix_utilization(&prefix, &[], &ranges, &hosts(&ips)))
        }
        UtilizationKey::IpRange(id) => {
            let range: IpRange = tx.require(&id)?;
            let ips = range_ips(tx, &range)?;
            Ok(utilization::range_utilization(&range, &hosts(&ips)))
        }
        UtilizationKey::VlanGroup(id) => {
            let group: VlanGroup = tx.require(&id)?;
            let members = tx.vlans_in_group(Some(id))?.len();
            Ok(utilization::vlan_group_utilization(group.min_vid, group.max_vid, members))
        }
    }
}

/// Utilization key for a record kind name as used on the command line.
pub fn utilization_key(kind: &str, id: Uuid) -> Result<UtilizationKey> {
    match kind {
        "aggregate" => Ok(UtilizationKey::Aggregate(id)),
        "prefix" => Ok(UtilizationKey::Prefix(id)),
        "range" | "ip-range" => Ok(UtilizationKey::IpRange(id)),
        "vlan-group" => Ok(UtilizationKey::VlanGroup(id)),
        other => Err(Error::InvalidFormat(format!("unknown record kind: {other}"))),
    }
}
