use crate::{fail, run, Context, Rule};
use netipam_core::db::Store;
use netipam_core::error::{Result, ValidationKind};
use netipam_core::types::{ScopeType, Vlan, VlanGroup, VLAN_VID_MAX, VLAN_VID_MIN};

// --- VLAN groups ---

pub fn validate_vlan_group<S: Store>(ctx: &Context<'_, S>, group: &VlanGroup) -> Result<()> {
    let rules: [Rule<S, VlanGroup>; 5] = [
        group_scope,
        group_bounds,
        group_order,
        group_unique,
        group_members,
    ];
    run(ctx, group, &rules)
}

fn group_scope<S: Store>(_ctx: &Context<'_, S>, group: &VlanGroup) -> Result<()> {
    match (group.scope_type, group.scope_id) {
        (Some(_), None) => fail(
            "scope_id",
            ValidationKind::InvalidScope,
            "cannot set scope_type without scope_id",
        ),
        (None, Some(_)) => fail(
            "scope_type",
            ValidationKind::InvalidScope,
            "cannot set scope_id without scope_type",
        ),
        _ => Ok(()),
    }
}

fn group_bounds<S: Store>(_ctx: &Context<'_, S>, group: &VlanGroup) -> Result<()> {
    for (field, vid) in [("min_vid", group.min_vid), ("max_vid", group.max_vid)] {
        if !(VLAN_VID_MIN..=VLAN_VID_MAX).contains(&vid) {
            return fail(
                field,
                ValidationKind::VidRange,
                format!("{field} must be between {VLAN_VID_MIN} and {VLAN_VID_MAX}"),
            );
        }
    }
    Ok(())
}

fn group_order<S: Store>(_ctx: &Context<'_, S>, group: &VlanGroup) -> Result<()> {
    if group.max_vid < group.min_vid {
        return fail(
            "max_vid",
            ValidationKind::VidRange,
            "maximum child VID must be greater than or equal to minimum child VID",
        );
    }
    Ok(())
}

fn group_unique<S: Store>(ctx: &Context<'_, S>, group: &VlanGroup) -> Result<()> {
    for other in ctx.store.list::<VlanGroup>()? {
        if other.id == group.id || other.scope() != group.scope() {
            continue;
        }
        if other.name == group.name {
            return fail(
                "name",
                ValidationKind::DuplicateName,
                format!("VLAN group {} already exists in this scope", group.name),
            );
        }
        if other.slug == group.slug {
            return fail(
                "slug",
                ValidationKind::DuplicateName,
                format!("VLAN group slug {} already exists in this scope", group.slug),
            );
        }
    }
    Ok(())
}

/// Narrowing the VID bounds may not strand existing members.
fn group_members<S: Store>(ctx: &Context<'_, S>, group: &VlanGroup) -> Result<()> {
    let members = ctx.store.vlans_in_group(Some(group.id))?;
    if let Some(lowest) = members.first() {
        if lowest.vid < group.min_vid {
            return fail(
                "min_vid",
                ValidationKind::VidRange,
                format!(
                    "minimum VID cannot be greater than the lowest VID of a member VLAN ({})",
                    lowest.vid
                ),
            );
        }
    }
    if let Some(highest) = members.last() {
        if highest.vid > group.max_vid {
            return fail(
                "max_vid",
                ValidationKind::VidRange,
                format!(
                    "maximum VID cannot be less than the highest VID of a member VLAN ({})",
                    highest.vid
                ),
            );
        }
    }
    Ok(())
}

// --- VLANs ---

pub fn validate_vlan<S: Store>(ctx: &Context<'_, S>, vlan: &Vlan) -> Result<()> {
    let rules: [Rule<S, Vlan>; 6] = [
        vlan_vid,
        vlan_group_exists,
        vlan_scope,
        vlan_group_range,
        vlan_duplicate_vid,
        vlan_duplicate_name,
    ];
    run(ctx, vlan, &rules)
}

fn vlan_vid<S: Store>(_ctx: &Context<'_, S>, vlan: &Vlan) -> Result<()> {
    if !(VLAN_VID_MIN..=VLAN_VID_MAX).contains(&vlan.vid) {
        return fail(
            "vid",
            ValidationKind::VidRange,
            format!("VID must be between {VLAN_VID_MIN} and {VLAN_VID_MAX}"),
        );
    }
    Ok(())
}

fn owning_group<S: Store>(ctx: &Context<'_, S>, vlan: &Vlan) -> Result<Option<VlanGroup>> {
    match vlan.group {
        Some(id) => ctx.store.get::<VlanGroup>(&id),
        None => Ok(None),
    }
}

fn vlan_group_exists<S: Store>(ctx: &Context<'_, S>, vlan: &Vlan) -> Result<()> {
    if let Some(id) = vlan.group {
        if owning_group(ctx, vlan)?.is_none() {
            return fail(
                "group",
                ValidationKind::UnknownReference,
                format!("VLAN group {id} does not exist"),
            );
        }
    }
    Ok(())
}

fn vlan_scope<S: Store>(ctx: &Context<'_, S>, vlan: &Vlan) -> Result<()> {
    let (Some(group), Some(site)) = (owning_group(ctx, vlan)?, vlan.site) else {
        return Ok(());
    };
    if group.scope() != Some((ScopeType::Site, site)) {
        let scope = match group.scope() {
            Some((kind, id)) => format!("{kind} {id}"),
            None => "none".to_string(),
        };
        return fail(
            "group",
            ValidationKind::ScopeMismatch,
            format!(
                "VLAN is assigned to group {} (scope: {scope}); cannot also assign to site {site}",
                group.name
            ),
        );
    }
    Ok(())
}

fn vlan_group_range<S: Store>(ctx: &Context<'_, S>, vlan: &Vlan) -> Result<()> {
    if let Some(group) = owning_group(ctx, vlan)? {
        if !(group.min_vid..=group.max_vid).contains(&vlan.vid) {
            return fail(
                "vid",
                ValidationKind::VidRange,
                format!(
                    "VID must be between {} and {} for VLANs in group {}",
                    group.min_vid, group.max_vid, group.name
                ),
            );
        }
    }
    Ok(())
}

fn vlan_duplicate_vid<S: Store>(ctx: &Context<'_, S>, vlan: &Vlan) -> Result<()> {
    let Some(group) = vlan.group else {
        return Ok(());
    };
    let taken = ctx
        .store
        .vlans_in_group(Some(group))?
        .iter()
        .any(|v| v.id != vlan.id && v.vid == vlan.vid);
    if taken {
        return fail(
            "vid",
            ValidationKind::DuplicateVid,
            format!("VID {} is already in use in this group", vlan.vid),
        );
    }
    Ok(())
}

fn vlan_duplicate_name<S: Store>(ctx: &Context<'_, S>, vlan: &Vlan) -> Result<()> {
    let Some(group) = vlan.group else {
        return Ok(());
    };
    let taken = ctx
        .store
        .vlans_in_group(Some(group))?
        .iter()
        .any(|v| v.id != vlan.id && v.name == vlan.name);
    if taken {
        return fail(
            "name",
            ValidationKind::DuplicateName,
            format!("VLAN name {} is already in use in this group", vlan.name),
        );
    }
    Ok(())
}
