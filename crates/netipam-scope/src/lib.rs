//! Which VLAN groups and VLANs a device or virtual machine may use, derived
//! from the physical and virtual topology it sits in.

pub mod resolver;
pub mod topology;

pub use resolver::{available_vlans, ScopeFilter};
pub use topology::{Cluster, Device, Site, StaticTopology, Topology, VirtualMachine};
