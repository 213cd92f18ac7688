//! Allocation of the next free prefix, address or VID.
//!
//! Every allocation is a plan against a snapshot followed by a commit that
//! re-checks the plan inside the write transaction. `allocate_*` runs both
//! halves under the scope lock; the `plan_*`/`commit_*` pair is exposed for
//! callers that show the candidate before claiming it, and a commit whose
//! candidate was claimed meanwhile fails with a retryable
//! [`Error::ConcurrentModification`].

use crate::query::{child_prefixes, free_ips_in_prefix, free_ips_in_range};
use crate::Ipam;
use netipam_core::addr::{contains, overlaps, Family, IpSet};
use netipam_core::db::{Store, WriteTx};
use netipam_core::error::{Error, Result, ValidationError, ValidationKind};
use netipam_core::types::{IpAddress, IpRange, Prefix, ScopeKey, Vlan, VlanGroup};
use netipam_space::availability::{first_available_prefix_of_len, first_available_vid, with_mask};
use tracing::{info, warn};
use uuid::Uuid;

/// Where an address is allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpParent {
    Prefix(Uuid),
    Range(Uuid),
}

/// Free addresses of an allocation parent and what a new address inherits.
struct IpSpace {
    free: IpSet,
    prefix_len: u8,
    vrf: Option<Uuid>,
}

impl IpSpace {
    fn load<S: Store>(tx: &S, parent: IpParent) -> Result<Self> {
        match parent {
            IpParent::Prefix(id) => {
                let prefix: Prefix = tx.require(&id)?;
                Ok(Self {
                    free: free_ips_in_prefix(tx, &prefix)?,
                    prefix_len: prefix.prefix.prefix_len(),
                    vrf: prefix.vrf,
                })
            }
            IpParent::Range(id) => {
                let range: IpRange = tx.require(&id)?;
                Ok(Self {
                    free: free_ips_in_range(tx, &range)?,
                    prefix_len: range.start_address.prefix_len(),
                    vrf: range.vrf,
                })
            }
        }
    }

    fn candidate(&self) -> Option<IpAddress> {
        self.free
            .first()
            .map(|a| IpAddress::new(with_mask(a, self.prefix_len), self.vrf))
    }
}

fn plan_prefix<S: Store>(tx: &S, parent: &Prefix, length: u8) -> Result<Option<Prefix>> {
    let bits = Family::of_net(&parent.prefix).bits();
    if length <= parent.prefix.prefix_len() || length > bits {
        return Err(ValidationError::new(
            "prefix_length",
            ValidationKind::InvalidMask,
            format!(
                "length must be between {} and {bits} inside {}",
                parent.prefix.prefix_len() + 1,
                parent.prefix
            ),
        )
        .into());
    }
    let taken: Vec<_> = child_prefixes(tx, parent, false)?
        .iter()
        .map(|p| p.prefix)
        .collect();
    Ok(
        first_available_prefix_of_len(&parent.prefix, &taken, length).map(|net| {
            let mut child = Prefix::new(net, parent.vrf);
            child.site = parent.site;
            child.tenant = parent.tenant;
            child
        }),
    )
}

fn claimed(what: impl std::fmt::Display) -> Error {
    Error::ConcurrentModification(format!("{what} was allocated by another writer"))
}

impl Ipam {
    // --- Prefixes ---

    /// Lowest free child of `length` bits under a prefix, read from a
    /// snapshot. Nothing is stored.
    pub fn plan_prefix_allocation(&self, parent_id: Uuid, length: u8) -> Result<Option<Prefix>> {
        self.db.read(|tx| {
            let parent: Prefix = tx.require(&parent_id)?;
            plan_prefix(tx, &parent, length)
        })
    }

    /// Store a planned prefix if its space is still free.
    pub fn commit_prefix_allocation(&self, parent_id: Uuid, candidate: Prefix) -> Result<Prefix> {
        let scope = candidate.scope();
        let saved = self.locks.with(&[scope], || {
            self.db
                .write(|tx| self.commit_prefix_in(tx, parent_id, candidate))
        })?;
        self.cache.invalidate();
        info!(prefix = %saved.prefix, id = %saved.id, vrf = %scope, "prefix allocated");
        Ok(saved)
    }

    /// Plan and commit in one step. `None` when no block of `length` bits
    /// is left.
    pub fn allocate_prefix(&self, parent_id: Uuid, length: u8) -> Result<Option<Prefix>> {
        let scope = self.prefix(parent_id)?.scope();
        let saved = self.locks.with(&[scope], || {
            self.db.write(|tx| {
                let parent: Prefix = tx.require(&parent_id)?;
                match plan_prefix(tx, &parent, length)? {
                    Some(candidate) => self.commit_prefix_in(tx, parent_id, candidate).map(Some),
                    None => Ok(None),
                }
            })
        })?;
        match &saved {
            Some(prefix) => {
                self.cache.invalidate();
                info!(prefix = %prefix.prefix, id = %prefix.id, vrf = %scope, "prefix allocated");
            }
            None => info!(parent = %parent_id, length, "no free prefix left"),
        }
        Ok(saved)
    }

    fn commit_prefix_in(&self, tx: &WriteTx, parent_id: Uuid, candidate: Prefix) -> Result<Prefix> {
        let parent: Prefix = tx.require(&parent_id)?;
        let free = contains(&parent.prefix, &candidate.prefix)
            && child_prefixes(tx, &parent, false)?
                .iter()
                .all(|c| !overlaps(&c.prefix, &candidate.prefix));
        if !free {
            warn!(parent = %parent.prefix, candidate = %candidate.prefix, "planned prefix no longer free");
            return Err(claimed(candidate.prefix));
        }
        self.save_prefix_in(tx, candidate, None)
    }

    // --- IP addresses ---

    /// Lowest free address of a prefix or range, read from a snapshot.
    pub fn plan_ip_allocation(&self, parent: IpParent) -> Result<Option<IpAddress>> {
        self.db.read(|tx| Ok(IpSpace::load(tx, parent)?.candidate()))
    }

    /// Store a planned address if it is still free.
    pub fn commit_ip_allocation(&self, parent: IpParent, candidate: IpAddress) -> Result<IpAddress> {
        let scope = candidate.scope();
        self.locks.with(&[scope], || {
            self.db.write(|tx| self.commit_ip_in(tx, parent, &candidate))
        })?;
        self.cache.invalidate();
        info!(address = %candidate.address, id = %candidate.id, vrf = %scope, "IP address allocated");
        Ok(candidate)
    }

    pub fn allocate_ip(&self, parent: IpParent) -> Result<Option<IpAddress>> {
        let scope = self.db.read(|tx| Ok(ScopeKey::of(IpSpace::load(tx, parent)?.vrf)))?;
        let saved = self.locks.with(&[scope], || {
            self.db.write(|tx| match IpSpace::load(tx, parent)?.candidate() {
                Some(candidate) => {
                    self.commit_ip_in(tx, parent, &candidate)?;
                    Ok(Some(candidate))
                }
                None => Ok(None),
            })
        })?;
        match &saved {
            Some(ip) => {
                self.cache.invalidate();
                info!(address = %ip.address, id = %ip.id, vrf = %scope, "IP address allocated");
            }
            None => info!(parent = ?parent, "no free address left"),
        }
        Ok(saved)
    }

    fn commit_ip_in(&self, tx: &WriteTx, parent: IpParent, candidate: &IpAddress) -> Result<()> {
        let space = IpSpace::load(tx, parent)?;
        if space.vrf != candidate.vrf || !space.free.contains(&candidate.host()) {
            warn!(parent = ?parent, candidate = %candidate.address, "planned address no longer free");
            return Err(claimed(candidate.address));
        }
        self.save_ip_address_in(tx, candidate)
    }

    // --- VLANs ---

    /// Create a VLAN on the lowest free VID of a group. `None` when the
    /// group is full.
    pub fn allocate_vlan(&self, group_id: Uuid, name: &str) -> Result<Option<Vlan>> {
        let saved = self.group_locks.with(&[group_id], || {
            self.db.write(|tx| {
                let group: VlanGroup = tx.require(&group_id)?;
                let used: Vec<u16> = tx
                    .vlans_in_group(Some(group_id))?
                    .iter()
                    .map(|v| v.vid)
                    .collect();
                let Some(vid) = first_available_vid(group.min_vid, group.max_vid, &used) else {
                    return Ok(None);
                };
                let mut vlan = Vlan::new(vid, name);
                vlan.group = Some(group_id);
                self.save_vlan_in(tx, &vlan)?;
                Ok(Some(vlan))
            })
        })?;
        if let Some(vlan) = &saved {
            self.cache.invalidate();
            info!(vlan = %vlan.id, vid = vlan.vid, group = %group_id, "VLAN allocated");
        }
        Ok(saved)
    }
}
