use crate::topology::{Site, Topology};
use netipam_core::error::{Error, Result};
use netipam_core::types::{ScopeType, Vlan, VlanGroup};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// A disjunction of `(scope type, scope id)` predicates plus the site whose
/// site-pinned VLANs are also in reach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    scopes: HashSet<(ScopeType, Uuid)>,
    site: Option<Uuid>,
}

impl ScopeFilter {
    fn add(&mut self, kind: ScopeType, ids: impl IntoIterator<Item = Uuid>) {
        self.scopes.extend(ids.into_iter().map(|id| (kind, id)));
    }

    /// Region and site group (with ancestors) plus the site itself.
    fn add_site<T: Topology + ?Sized>(&mut self, topology: &T, site: &Site) {
        if let Some(region) = site.region {
            self.add(ScopeType::Region, topology.ancestors(ScopeType::Region, region));
        }
        if let Some(group) = site.group {
            self.add(ScopeType::SiteGroup, topology.ancestors(ScopeType::SiteGroup, group));
        }
        self.add(ScopeType::Site, [site.id]);
        self.site = Some(site.id);
    }

    /// Scopes reachable from a device: its site's region and site group
    /// chains, the site, its location chain and its rack.
    pub fn for_device<T: Topology + ?Sized>(topology: &T, device_id: Uuid) -> Result<Self> {
        let device = topology
            .device(device_id)
            .ok_or_else(|| Error::NotFound(format!("device {device_id}")))?;
        let site = topology
            .site(device.site)
            .ok_or_else(|| Error::NotFound(format!("site {}", device.site)))?;

        let mut filter = Self::default();
        filter.add_site(topology, &site);
        if let Some(location) = device.location {
            filter.add(ScopeType::Location, topology.ancestors(ScopeType::Location, location));
        }
        if let Some(rack) = device.rack {
            filter.add(ScopeType::Rack, [rack]);
        }
        debug!(device = %device_id, scopes = filter.scopes.len(), "resolved device VLAN scope");
        Ok(filter)
    }

    /// Scopes reachable from a virtual machine through its cluster: the
    /// cluster's site (if any) as for a device, its cluster group and the
    /// cluster itself.
    pub fn for_virtual_machine<T: Topology + ?Sized>(topology: &T, vm_id: Uuid) -> Result<Self> {
        let vm = topology
            .virtual_machine(vm_id)
            .ok_or_else(|| Error::NotFound(format!("virtual machine {vm_id}")))?;
        let cluster = topology
            .cluster(vm.cluster)
            .ok_or_else(|| Error::NotFound(format!("cluster {}", vm.cluster)))?;

        let mut filter = Self::default();
        if let Some(site_id) = cluster.site {
            let site = topology
                .site(site_id)
                .ok_or_else(|| Error::NotFound(format!("site {site_id}")))?;
            filter.add_site(topology, &site);
        }
        if let Some(group) = cluster.group {
            filter.add(ScopeType::ClusterGroup, [group]);
        }
        filter.add(ScopeType::Cluster, [cluster.id]);
        debug!(vm = %vm_id, scopes = filter.scopes.len(), "resolved virtual machine VLAN scope");
        Ok(filter)
    }

    pub fn matches_group(&self, group: &VlanGroup) -> bool {
        group.scope().is_some_and(|s| self.scopes.contains(&s))
    }

    /// True for VLANs in a matching group, pinned to the filter's site, or
    /// global.
    pub fn matches_vlan(&self, vlan: &Vlan, groups: &HashSet<Uuid>) -> bool {
        vlan.group.is_some_and(|g| groups.contains(&g))
            || (vlan.site.is_some() && vlan.site == self.site)
            || vlan.is_global()
    }
}

/// The VLANs available under `filter`, in the order given.
pub fn available_vlans(filter: &ScopeFilter, groups: &[VlanGroup], vlans: Vec<Vlan>) -> Vec<Vlan> {
    let matched: HashSet<Uuid> = groups
        .iter()
        .filter(|g| filter.matches_group(g))
        .map(|g| g.id)
        .collect();
    vlans
        .into_iter()
        .filter(|v| filter.matches_vlan(v, &matched))
        .collect()
}
