use crate::addr::Family;
use chrono::{DateTime, NaiveDate, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Lowest usable 802.1Q VLAN ID
pub const VLAN_VID_MIN: u16 = 1;
/// Highest usable 802.1Q VLAN ID
pub const VLAN_VID_MAX: u16 = 4094;

/// Routing namespace a record lives in: a VRF, or the global table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeKey(Option<Uuid>);

impl ScopeKey {
    pub const GLOBAL: ScopeKey = ScopeKey(None);

    pub fn of(vrf: Option<Uuid>) -> Self {
        Self(vrf)
    }

    pub fn vrf(id: Uuid) -> Self {
        Self(Some(id))
    }

    pub fn vrf_id(&self) -> Option<Uuid> {
        self.0
    }

    pub fn is_global(&self) -> bool {
        self.0.is_none()
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{id}"),
            None => write!(f, "global"),
        }
    }
}

impl std::str::FromStr for ScopeKey {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("global") {
            return Ok(ScopeKey::GLOBAL);
        }
        Uuid::parse_str(s)
            .map(ScopeKey::vrf)
            .map_err(|e| crate::error::Error::InvalidFormat(format!("scope {s}: {e}")))
    }
}

/// A Virtual Routing and Forwarding instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vrf {
    pub id: Uuid,
    pub name: String,
    /// Route distinguisher
    #[serde(default)]
    pub rd: Option<String>,
    /// Reject duplicate prefixes/addresses within this VRF
    #[serde(default = "default_true")]
    pub enforce_unique: bool,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Vrf {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            rd: None,
            enforce_unique: true,
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn scope(&self) -> ScopeKey {
        ScopeKey::vrf(self.id)
    }
}

/// A Regional Internet Registry (or private space such as RFC 1918)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rir {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
}

impl Rir {
    pub fn new(name: &str, slug: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            is_private: false,
            created_at: Utc::now(),
        }
    }
}

/// Root-level block tracked for utilization reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub id: Uuid,
    pub prefix: IpNet,
    pub rir: Uuid,
    #[serde(default)]
    pub tenant: Option<Uuid>,
    #[serde(default)]
    pub date_added: Option<NaiveDate>,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Aggregate {
    pub fn new(prefix: IpNet, rir: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            prefix,
            rir,
            tenant: None,
            date_added: None,
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefixStatus {
    Container,
    #[default]
    Active,
    Reserved,
    Deprecated,
}

impl std::fmt::Display for PrefixStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrefixStatus::Container => write!(f, "container"),
            PrefixStatus::Active => write!(f, "active"),
            PrefixStatus::Reserved => write!(f, "reserved"),
            PrefixStatus::Deprecated => write!(f, "deprecated"),
        }
    }
}

impl std::str::FromStr for PrefixStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "container" => Ok(PrefixStatus::Container),
            "active" => Ok(PrefixStatus::Active),
            "reserved" => Ok(PrefixStatus::Reserved),
            "deprecated" => Ok(PrefixStatus::Deprecated),
            _ => Err(crate::error::Error::InvalidFormat(format!(
                "unknown prefix status: {s}"
            ))),
        }
    }
}

/// An IPv4 or IPv6 network, optionally within a VRF
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prefix {
    pub id: Uuid,
    pub prefix: IpNet,
    #[serde(default)]
    pub vrf: Option<Uuid>,
    #[serde(default)]
    pub site: Option<Uuid>,
    #[serde(default)]
    pub vlan: Option<Uuid>,
    #[serde(default)]
    pub tenant: Option<Uuid>,
    #[serde(default)]
    pub role: Option<Uuid>,
    #[serde(default)]
    pub status: PrefixStatus,
    /// Every address, network and broadcast included, is assignable
    #[serde(default)]
    pub is_pool: bool,
    /// Report as 100% utilized
    #[serde(default)]
    pub mark_utilized: bool,
    #[serde(default)]
    pub description: String,
    /// Number of containing prefixes in the same VRF (maintained by the hierarchy rebuild)
    #[serde(default)]
    pub depth: u32,
    /// Number of contained prefixes in the same VRF (maintained by the hierarchy rebuild)
    #[serde(default)]
    pub children: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prefix {
    pub fn new(prefix: IpNet, vrf: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            prefix,
            vrf,
            site: None,
            vlan: None,
            tenant: None,
            role: None,
            status: PrefixStatus::Active,
            is_pool: false,
            mark_utilized: false,
            description: String::new(),
            depth: 0,
            children: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scope(&self) -> ScopeKey {
        ScopeKey::of(self.vrf)
    }

    pub fn family(&self) -> Family {
        Family::of_net(&self.prefix)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpRangeStatus {
    #[default]
    Active,
    Reserved,
    Deprecated,
}

/// A run of addresses defined by its first and last member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpRange {
    pub id: Uuid,
    pub start_address: IpNet,
    pub end_address: IpNet,
    #[serde(default)]
    pub vrf: Option<Uuid>,
    #[serde(default)]
    pub tenant: Option<Uuid>,
    #[serde(default)]
    pub status: IpRangeStatus,
    #[serde(default)]
    pub role: Option<Uuid>,
    #[serde(default)]
    pub mark_utilized: bool,
    #[serde(default)]
    pub description: String,
    /// Number of addresses in the range, recomputed on save
    #[serde(default)]
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IpRange {
    pub fn new(start_address: IpNet, end_address: IpNet, vrf: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            start_address,
            end_address,
            vrf,
            tenant: None,
            status: IpRangeStatus::Active,
            role: None,
            mark_utilized: false,
            description: String::new(),
            size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scope(&self) -> ScopeKey {
        ScopeKey::of(self.vrf)
    }

    pub fn start(&self) -> IpAddr {
        self.start_address.addr()
    }

    pub fn end(&self) -> IpAddr {
        self.end_address.addr()
    }

    /// Compact display form, e.g. `192.0.2.10-20/24`.
    pub fn name(&self) -> String {
        let sep = match Family::of(&self.start()) {
            Family::V4 => '.',
            Family::V6 => ':',
        };
        let start = self.start().to_string();
        let end = self.end().to_string();
        let start_chunks: Vec<&str> = start.split(sep).collect();
        let end_chunks: Vec<&str> = end.split(sep).collect();
        let common = start_chunks
            .iter()
            .zip(end_chunks.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let sep_str = sep.to_string();
        let base = start_chunks[..common].join(&sep_str);
        let start_rest = start_chunks[common..].join(&sep_str);
        let end_rest = end_chunks[common..].join(&sep_str);
        if base.is_empty() {
            format!("{start_rest}-{end_rest}/{}", self.start_address.prefix_len())
        } else {
            format!(
                "{base}{sep}{start_rest}-{end_rest}/{}",
                self.start_address.prefix_len()
            )
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpAddressStatus {
    #[default]
    Active,
    Reserved,
    Deprecated,
    Dhcp,
    Slaac,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpAddressRole {
    Loopback,
    Secondary,
    Anycast,
    Vip,
    Vrrp,
    Hsrp,
    Glbp,
    Carp,
}

impl IpAddressRole {
    /// Roles under which several records may legitimately share one address.
    pub fn is_nonunique(self) -> bool {
        matches!(
            self,
            IpAddressRole::Anycast
                | IpAddressRole::Vip
                | IpAddressRole::Vrrp
                | IpAddressRole::Hsrp
                | IpAddressRole::Glbp
                | IpAddressRole::Carp
        )
    }
}

/// Object an IP address is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AssignedObject {
    Interface(Uuid),
    VmInterface(Uuid),
    FhrpGroup(Uuid),
}

impl AssignedObject {
    /// Device and VM interfaces; FHRP groups are virtual and exempt from
    /// the network/broadcast rule.
    pub fn is_interface(&self) -> bool {
        matches!(
            self,
            AssignedObject::Interface(_) | AssignedObject::VmInterface(_)
        )
    }
}

/// An individual host address together with its mask
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAddress {
    pub id: Uuid,
    pub address: IpNet,
    #[serde(default)]
    pub vrf: Option<Uuid>,
    #[serde(default)]
    pub tenant: Option<Uuid>,
    #[serde(default)]
    pub status: IpAddressStatus,
    #[serde(default)]
    pub role: Option<IpAddressRole>,
    #[serde(default)]
    pub assigned_object: Option<AssignedObject>,
    /// The inside address for which this one is the NAT outside
    #[serde(default)]
    pub nat_inside: Option<Uuid>,
    #[serde(default)]
    pub dns_name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IpAddress {
    pub fn new(address: IpNet, vrf: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            address,
            vrf,
            tenant: None,
            status: IpAddressStatus::Active,
            role: None,
            assigned_object: None,
            nat_inside: None,
            dns_name: String::new(),
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn scope(&self) -> ScopeKey {
        ScopeKey::of(self.vrf)
    }

    pub fn host(&self) -> IpAddr {
        self.address.addr()
    }
}

/// Topology object type a VLAN group may be scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Region,
    SiteGroup,
    Site,
    Location,
    Rack,
    ClusterGroup,
    Cluster,
}

impl std::fmt::Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeType::Region => write!(f, "region"),
            ScopeType::SiteGroup => write!(f, "site_group"),
            ScopeType::Site => write!(f, "site"),
            ScopeType::Location => write!(f, "location"),
            ScopeType::Rack => write!(f, "rack"),
            ScopeType::ClusterGroup => write!(f, "cluster_group"),
            ScopeType::Cluster => write!(f, "cluster"),
        }
    }
}

/// A collection of VLANs within which IDs and names are unique
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlanGroup {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub scope_type: Option<ScopeType>,
    #[serde(default)]
    pub scope_id: Option<Uuid>,
    #[serde(default = "default_min_vid")]
    pub min_vid: u16,
    #[serde(default = "default_max_vid")]
    pub max_vid: u16,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl VlanGroup {
    pub fn new(name: &str, slug: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            scope_type: None,
            scope_id: None,
            min_vid: VLAN_VID_MIN,
            max_vid: VLAN_VID_MAX,
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    /// `(type, id)` when fully scoped.
    pub fn scope(&self) -> Option<(ScopeType, Uuid)> {
        self.scope_type.zip(self.scope_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VlanStatus {
    #[default]
    Active,
    Reserved,
    Deprecated,
}

/// A layer-two forwarding domain identified by a 12-bit ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vlan {
    pub id: Uuid,
    #[serde(default)]
    pub site: Option<Uuid>,
    #[serde(default)]
    pub group: Option<Uuid>,
    pub vid: u16,
    pub name: String,
    #[serde(default)]
    pub tenant: Option<Uuid>,
    #[serde(default)]
    pub status: VlanStatus,
    #[serde(default)]
    pub role: Option<Uuid>,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Vlan {
    pub fn new(vid: u16, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            site: None,
            group: None,
            vid,
            name: name.to_string(),
            tenant: None,
            status: VlanStatus::Active,
            role: None,
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Neither grouped nor pinned to a site.
    pub fn is_global(&self) -> bool {
        self.group.is_none() && self.site.is_none()
    }
}

fn default_true() -> bool {
    true
}
fn default_min_vid() -> u16 {
    VLAN_VID_MIN
}
fn default_max_vid() -> u16 {
    VLAN_VID_MAX
}
