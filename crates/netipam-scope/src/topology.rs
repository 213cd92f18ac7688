use netipam_core::types::ScopeType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    #[serde(default)]
    pub region: Option<Uuid>,
    #[serde(default)]
    pub group: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub site: Uuid,
    #[serde(default)]
    pub location: Option<Uuid>,
    #[serde(default)]
    pub rack: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    #[serde(default)]
    pub site: Option<Uuid>,
    #[serde(default)]
    pub group: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub id: Uuid,
    pub cluster: Uuid,
}

/// Read-only view of the topology owned by the DCIM and virtualization
/// layers.
pub trait Topology {
    fn site(&self, id: Uuid) -> Option<Site>;

    fn device(&self, id: Uuid) -> Option<Device>;

    fn cluster(&self, id: Uuid) -> Option<Cluster>;

    fn virtual_machine(&self, id: Uuid) -> Option<VirtualMachine>;

    /// Parent of a nested object (region, site group or location).
    fn parent(&self, kind: ScopeType, id: Uuid) -> Option<Uuid>;

    /// `id` followed by each of its ancestors, nearest first.
    fn ancestors(&self, kind: ScopeType, id: Uuid) -> Vec<Uuid> {
        let mut chain = vec![id];
        let mut seen = HashSet::from([id]);
        let mut current = id;
        while let Some(parent) = self.parent(kind, current) {
            // a cycle in foreign data must not hang the walk
            if !seen.insert(parent) {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }
}

/// In-memory topology snapshot, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticTopology {
    #[serde(default)]
    pub sites: HashMap<Uuid, Site>,
    #[serde(default)]
    pub devices: HashMap<Uuid, Device>,
    #[serde(default)]
    pub clusters: HashMap<Uuid, Cluster>,
    #[serde(default)]
    pub virtual_machines: HashMap<Uuid, VirtualMachine>,
    /// Parent links for nested regions
    #[serde(default)]
    pub regions: HashMap<Uuid, Option<Uuid>>,
    #[serde(default)]
    pub site_groups: HashMap<Uuid, Option<Uuid>>,
    #[serde(default)]
    pub locations: HashMap<Uuid, Option<Uuid>>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_nested(&mut self, kind: ScopeType, id: Uuid, parent: Option<Uuid>) -> &mut Self {
        match kind {
            ScopeType::Region => {
                self.regions.insert(id, parent);
            }
            ScopeType::SiteGroup => {
                self.site_groups.insert(id, parent);
            }
            ScopeType::Location => {
                self.locations.insert(id, parent);
            }
            _ => {}
        }
        self
    }

    pub fn add_site(&mut self, site: Site) -> &mut Self {
        self.sites.insert(site.id, site);
        self
    }

    pub fn add_device(&mut self, device: Device) -> &mut Self {
        self.devices.insert(device.id, device);
        self
    }

    pub fn add_cluster(&mut self, cluster: Cluster) -> &mut Self {
        self.clusters.insert(cluster.id, cluster);
        self
    }

    pub fn add_virtual_machine(&mut self, vm: VirtualMachine) -> &mut Self {
        self.virtual_machines.insert(vm.id, vm);
        self
    }
}

impl Topology for StaticTopology {
    fn site(&self, id: Uuid) -> Option<Site> {
        self.sites.get(&id).cloned()
    }

    fn device(&self, id: Uuid) -> Option<Device> {
        self.devices.get(&id).cloned()
    }

    fn cluster(&self, id: Uuid) -> Option<Cluster> {
        self.clusters.get(&id).cloned()
    }

    fn virtual_machine(&self, id: Uuid) -> Option<VirtualMachine> {
        self.virtual_machines.get(&id).cloned()
    }

    fn parent(&self, kind: ScopeType, id: Uuid) -> Option<Uuid> {
        let links = match kind {
            ScopeType::Region => &self.regions,
            ScopeType::SiteGroup => &self.site_groups,
            ScopeType::Location => &self.locations,
            _ => return None,
        };
        links.get(&id).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestors_nearest_first() {
        let (earth, europe, nl) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut topo = StaticTopology::new();
        topo.add_nested(ScopeType::Region, earth, None)
            .add_nested(ScopeType::Region, europe, Some(earth))
            .add_nested(ScopeType::Region, nl, Some(europe));
        assert_eq!(topo.ancestors(ScopeType::Region, nl), vec![nl, europe, earth]);
        assert_eq!(topo.ancestors(ScopeType::SiteGroup, nl), vec![nl]);
    }

    #[test]
    fn test_ancestors_stop_on_cycle() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut topo = StaticTopology::new();
        topo.add_nested(ScopeType::Location, a, Some(b))
            .add_nested(ScopeType::Location, b, Some(a));
        assert_eq!(topo.ancestors(ScopeType::Location, a), vec![a, b]);
    }

    #[test]
    fn test_load_from_json() {
        let site = Uuid::new_v4();
        let json = format!(r#"{{"sites": {{"{site}": {{"id": "{site}"}}}}}}"#);
        let topo: StaticTopology = serde_json::from_str(&json).unwrap();
        assert!(topo.site(site).is_some());
        assert!(topo.devices.is_empty());
    }
}
