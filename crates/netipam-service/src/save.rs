//! Validate-and-save and delete for every record kind.

use crate::Ipam;
use chrono::Utc;
use netipam_core::db::{Store, WriteTx};
use netipam_core::error::{Error, Result};
use netipam_core::types::{
    Aggregate, IpAddress, IpRange, Prefix, Rir, ScopeKey, Vlan, VlanGroup, Vrf,
};
use netipam_hierarchy::{rebuild, rebuild_in, RebuildStats};
use netipam_validate::{
    normalize, validate_aggregate, validate_ip_address, validate_ip_range, validate_prefix,
    validate_vlan, validate_vlan_group, Context,
};
use tracing::info;
use uuid::Uuid;

impl Ipam {
    pub fn save_vrf(&self, vrf: Vrf) -> Result<Vrf> {
        self.db.write(|tx| tx.put(&vrf).map(|_| ()))?;
        self.cache.invalidate();
        info!(vrf = %vrf.id, name = %vrf.name, enforce_unique = vrf.enforce_unique, "VRF saved");
        Ok(vrf)
    }

    pub fn save_rir(&self, rir: Rir) -> Result<Rir> {
        self.db.write(|tx| tx.put(&rir).map(|_| ()))?;
        info!(rir = %rir.id, slug = %rir.slug, "RIR saved");
        Ok(rir)
    }

    // --- Aggregates ---

    pub fn save_aggregate(&self, mut agg: Aggregate) -> Result<Aggregate> {
        normalize::aggregate(&mut agg);
        agg.updated_at = Utc::now();
        self.db.write(|tx| {
            validate_aggregate(&Context::new(tx, &self.config), &agg)?;
            tx.put(&agg).map(|_| ())
        })?;
        self.cache.invalidate();
        info!(aggregate = %agg.id, prefix = %agg.prefix, "aggregate saved");
        Ok(agg)
    }

    pub fn delete_aggregate(&self, id: Uuid) -> Result<Aggregate> {
        let agg: Aggregate = self.db.write(|tx| tx.delete(&id))?;
        self.cache.invalidate();
        info!(aggregate = %id, prefix = %agg.prefix, "aggregate deleted");
        Ok(agg)
    }

    // --- Prefixes ---

    /// Validate and store a prefix, then rebuild the hierarchy of every scope
    /// whose membership changed, all in one transaction.
    pub fn save_prefix(&self, mut prefix: Prefix) -> Result<Prefix> {
        normalize::prefix(&mut prefix);
        prefix.updated_at = Utc::now();

        let before: Option<Prefix> = self.db.read(|tx| tx.get(&prefix.id))?;
        let old_scope = before.map(|p| p.scope());
        let mut scopes = vec![prefix.scope()];
        scopes.extend(old_scope);

        let saved = self
            .locks
            .with(&scopes, || self.db.write(|tx| self.save_prefix_in(tx, prefix, old_scope)))?;
        self.cache.invalidate();
        info!(
            prefix = %saved.prefix,
            id = %saved.id,
            vrf = %saved.scope(),
            depth = saved.depth,
            children = saved.children,
            "prefix saved"
        );
        Ok(saved)
    }

    /// Save inside an open transaction while the caller holds the locks of
    /// the new scope and of `locked_old`, the scope the record was in when
    /// the locks were taken.
    pub(crate) fn save_prefix_in(
        &self,
        tx: &WriteTx,
        mut prefix: Prefix,
        locked_old: Option<ScopeKey>,
    ) -> Result<Prefix> {
        let previous: Option<Prefix> = tx.get(&prefix.id)?;
        if previous.as_ref().map(|p| p.scope()) != locked_old {
            return Err(Error::ConcurrentModification(format!(
                "prefix {} changed scope during save",
                prefix.id
            )));
        }

        // depth and children belong to the hierarchy rebuild
        match &previous {
            Some(prev) => {
                prefix.depth = prev.depth;
                prefix.children = prev.children;
                prefix.created_at = prev.created_at;
            }
            None => {
                prefix.depth = 0;
                prefix.children = 0;
            }
        }

        validate_prefix(&Context::new(tx, &self.config), &prefix)?;
        tx.put(&prefix)?;

        let membership_changed = previous
            .as_ref()
            .map_or(true, |p| p.prefix != prefix.prefix || p.vrf != prefix.vrf);
        if membership_changed {
            rebuild_in(tx, prefix.scope(), self.config.rebuild_batch_size)?;
            if let Some(old) = locked_old.filter(|s| *s != prefix.scope()) {
                rebuild_in(tx, old, self.config.rebuild_batch_size)?;
            }
        }
        tx.require(&prefix.id)
    }

    pub fn delete_prefix(&self, id: Uuid) -> Result<Prefix> {
        let scope = self.db.read(|tx| tx.require::<Prefix>(&id))?.scope();
        let removed = self.locks.with(&[scope], || {
            self.db.write(|tx| {
                let removed: Prefix = tx.delete(&id)?;
                if removed.scope() != scope {
                    return Err(Error::ConcurrentModification(format!(
                        "prefix {id} changed scope during delete"
                    )));
                }
                rebuild_in(tx, scope, self.config.rebuild_batch_size)?;
                Ok(removed)
            })
        })?;
        self.cache.invalidate();
        info!(prefix = %removed.prefix, id = %id, vrf = %scope, "prefix deleted");
        Ok(removed)
    }

    /// Recompute depth/children for one scope.
    pub fn rebuild_hierarchy(&self, scope: ScopeKey) -> Result<RebuildStats> {
        let stats = rebuild(&self.db, &self.locks, scope, self.config.rebuild_batch_size)?;
        if stats.updated > 0 {
            self.cache.invalidate();
        }
        Ok(stats)
    }

    /// Rebuild every scope that holds prefixes, one transaction per scope.
    pub fn rebuild_all(&self) -> Result<Vec<RebuildStats>> {
        self.scopes()?
            .into_iter()
            .map(|scope| self.rebuild_hierarchy(scope))
            .collect()
    }

    // --- IP ranges ---

    pub fn save_ip_range(&self, mut range: IpRange) -> Result<IpRange> {
        normalize::ip_range(&mut range);
        range.updated_at = Utc::now();
        self.locks.with(&[range.scope()], || {
            self.db.write(|tx| {
                validate_ip_range(&Context::new(tx, &self.config), &range)?;
                tx.put(&range).map(|_| ())
            })
        })?;
        self.cache.invalidate();
        info!(range = %range.name(), id = %range.id, size = range.size, "IP range saved");
        Ok(range)
    }

    pub fn delete_ip_range(&self, id: Uuid) -> Result<IpRange> {
        let range: IpRange = self.db.write(|tx| tx.delete(&id))?;
        self.cache.invalidate();
        info!(range = %range.name(), id = %id, "IP range deleted");
        Ok(range)
    }

    // --- IP addresses ---

    pub fn save_ip_address(&self, mut ip: IpAddress) -> Result<IpAddress> {
        normalize::ip_address(&mut ip);
        ip.updated_at = Utc::now();
        self.locks
            .with(&[ip.scope()], || self.db.write(|tx| self.save_ip_address_in(tx, &ip)))?;
        self.cache.invalidate();
        info!(address = %ip.address, id = %ip.id, vrf = %ip.scope(), "IP address saved");
        Ok(ip)
    }

    pub(crate) fn save_ip_address_in(&self, tx: &WriteTx, ip: &IpAddress) -> Result<()> {
        validate_ip_address(&Context::new(tx, &self.config), ip)?;
        tx.put(ip).map(|_| ())
    }

    pub fn delete_ip_address(&self, id: Uuid) -> Result<IpAddress> {
        let ip: IpAddress = self.db.write(|tx| tx.delete(&id))?;
        self.cache.invalidate();
        info!(address = %ip.address, id = %id, "IP address deleted");
        Ok(ip)
    }

    // --- VLANs ---

    pub fn save_vlan_group(&self, group: VlanGroup) -> Result<VlanGroup> {
        self.group_locks.with(&[group.id], || {
            self.db.write(|tx| {
                validate_vlan_group(&Context::new(tx, &self.config), &group)?;
                tx.put(&group).map(|_| ())
            })
        })?;
        self.cache.invalidate();
        info!(group = %group.id, name = %group.name, min_vid = group.min_vid, max_vid = group.max_vid, "VLAN group saved");
        Ok(group)
    }

    pub fn save_vlan(&self, vlan: Vlan) -> Result<Vlan> {
        let keys: Vec<Uuid> = vlan.group.into_iter().collect();
        self.group_locks
            .with(&keys, || self.db.write(|tx| self.save_vlan_in(tx, &vlan)))?;
        self.cache.invalidate();
        info!(vlan = %vlan.id, vid = vlan.vid, name = %vlan.name, "VLAN saved");
        Ok(vlan)
    }

    pub(crate) fn save_vlan_in(&self, tx: &WriteTx, vlan: &Vlan) -> Result<()> {
        validate_vlan(&Context::new(tx, &self.config), vlan)?;
        tx.put(vlan).map(|_| ())
    }

    pub fn delete_vlan(&self, id: Uuid) -> Result<Vlan> {
        let vlan: Vlan = self.db.write(|tx| tx.delete(&id))?;
        self.cache.invalidate();
        info!(vlan = %id, vid = vlan.vid, "VLAN deleted");
        Ok(vlan)
    }
}
