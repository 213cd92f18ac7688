//! Write-time validation.
//!
//! Each record kind has a fixed, ordered list of rules. A pipeline stops at
//! the first rule that fails and reports it as a field-attributed
//! [`ValidationError`]. Rules only read: they run inside the write
//! transaction that will commit the record, against the same snapshot.

pub mod normalize;
pub mod space;
pub mod vlan;

use netipam_core::config::IpamConfig;
use netipam_core::db::Store;
use netipam_core::error::{Result, ValidationError, ValidationKind};
use netipam_core::types::Vrf;
use tracing::debug;
use uuid::Uuid;

pub use space::{validate_aggregate, validate_ip_address, validate_ip_range, validate_prefix};
pub use vlan::{validate_vlan, validate_vlan_group};

/// What a rule may consult: the store snapshot and the uniqueness policy.
pub struct Context<'a, S> {
    pub store: &'a S,
    pub config: &'a IpamConfig,
}

impl<'a, S: Store> Context<'a, S> {
    pub fn new(store: &'a S, config: &'a IpamConfig) -> Self {
        Self { store, config }
    }

    /// Whether duplicates are rejected in the scope of `vrf`: the global flag
    /// for the global table, the VRF's own flag otherwise.
    pub fn enforce_unique(&self, vrf: Option<Uuid>) -> Result<bool> {
        match vrf {
            None => Ok(self.config.enforce_global_unique),
            Some(id) => Ok(self.store.require::<Vrf>(&id)?.enforce_unique),
        }
    }

    /// Fails with `UnknownReference` on `field` when `vrf` names no VRF.
    pub(crate) fn check_vrf(&self, field: &'static str, vrf: Option<Uuid>) -> Result<()> {
        if let Some(id) = vrf {
            if self.store.get::<Vrf>(&id)?.is_none() {
                return fail(field, ValidationKind::UnknownReference, format!("VRF {id} does not exist"));
            }
        }
        Ok(())
    }
}

pub(crate) type Rule<S, T> = fn(&Context<'_, S>, &T) -> Result<()>;

/// Run `rules` in order, returning the first failure.
pub(crate) fn run<S: Store, T>(ctx: &Context<'_, S>, record: &T, rules: &[Rule<S, T>]) -> Result<()> {
    for rule in rules {
        if let Err(e) = rule(ctx, record) {
            debug!(error = %e, "record rejected");
            return Err(e);
        }
    }
    Ok(())
}

pub(crate) fn fail(field: &'static str, kind: ValidationKind, message: impl Into<String>) -> Result<()> {
    Err(ValidationError::new(field, kind, message).into())
}
