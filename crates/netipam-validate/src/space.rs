use crate::{fail, run, Context, Rule};
use netipam_core::addr::{contains_or_equals, overlaps, Family, Span};
use netipam_core::db::Store;
use netipam_core::error::{Result, ValidationKind};
use netipam_core::types::{
    Aggregate, IpAddress, IpAddressRole, IpAddressStatus, IpRange, Prefix, Rir, ScopeKey, Vlan,
};
use num_bigint::BigUint;

/// Largest number of addresses an IP range may hold.
pub const MAX_RANGE_SIZE: u64 = (1 << 32) - 1;

fn table_name(scope: ScopeKey) -> String {
    match scope.vrf_id() {
        Some(id) => format!("VRF {id}"),
        None => "global table".to_string(),
    }
}

// --- Aggregates ---

pub fn validate_aggregate<S: Store>(ctx: &Context<'_, S>, agg: &Aggregate) -> Result<()> {
    let rules: [Rule<S, Aggregate>; 3] = [aggregate_mask, aggregate_rir, aggregate_overlap];
    run(ctx, agg, &rules)
}

fn aggregate_mask<S: Store>(_ctx: &Context<'_, S>, agg: &Aggregate) -> Result<()> {
    if agg.prefix.prefix_len() == 0 {
        return fail("prefix", ValidationKind::InvalidMask, "cannot create aggregate with /0 mask");
    }
    Ok(())
}

fn aggregate_rir<S: Store>(ctx: &Context<'_, S>, agg: &Aggregate) -> Result<()> {
    if ctx.store.get::<Rir>(&agg.rir)?.is_none() {
        return fail(
            "rir",
            ValidationKind::UnknownReference,
            format!("RIR {} does not exist", agg.rir),
        );
    }
    Ok(())
}

fn aggregate_overlap<S: Store>(ctx: &Context<'_, S>, agg: &Aggregate) -> Result<()> {
    for other in ctx.store.aggregates()? {
        if other.id == agg.id || !overlaps(&other.prefix, &agg.prefix) {
            continue;
        }
        let message = if contains_or_equals(&other.prefix, &agg.prefix) {
            format!(
                "aggregates cannot overlap: {} is already covered by an existing aggregate ({})",
                agg.prefix, other.prefix
            )
        } else {
            format!(
                "aggregates cannot overlap: {} covers an existing aggregate ({})",
                agg.prefix, other.prefix
            )
        };
        return fail("prefix", ValidationKind::Overlap, message);
    }
    Ok(())
}

// --- Prefixes ---

pub fn validate_prefix<S: Store>(ctx: &Context<'_, S>, prefix: &Prefix) -> Result<()> {
    let rules: [Rule<S, Prefix>; 4] = [prefix_mask, prefix_refs, prefix_vlan, prefix_duplicate];
    run(ctx, prefix, &rules)
}

fn prefix_mask<S: Store>(_ctx: &Context<'_, S>, prefix: &Prefix) -> Result<()> {
    if prefix.prefix.prefix_len() == 0 {
        return fail("prefix", ValidationKind::InvalidMask, "cannot create prefix with /0 mask");
    }
    Ok(())
}

fn prefix_refs<S: Store>(ctx: &Context<'_, S>, prefix: &Prefix) -> Result<()> {
    ctx.check_vrf("vrf", prefix.vrf)
}

fn prefix_vlan<S: Store>(ctx: &Context<'_, S>, prefix: &Prefix) -> Result<()> {
    if let Some(id) = prefix.vlan {
        if ctx.store.get::<Vlan>(&id)?.is_none() {
            return fail("vlan", ValidationKind::UnknownReference, format!("VLAN {id} does not exist"));
        }
    }
    Ok(())
}

fn prefix_duplicate<S: Store>(ctx: &Context<'_, S>, prefix: &Prefix) -> Result<()> {
    if !ctx.enforce_unique(prefix.vrf)? {
        return Ok(());
    }
    let duplicate = ctx
        .store
        .prefixes_equal(prefix.scope(), &prefix.prefix.trunc())?
        .into_iter()
        .find(|p| p.id != prefix.id);
    if let Some(dup) = duplicate {
        return fail(
            "prefix",
            ValidationKind::DuplicatePrefix,
            format!(
                "duplicate prefix found in {}: {}",
                table_name(prefix.scope()),
                dup.prefix
            ),
        );
    }
    Ok(())
}

// --- IP ranges ---

pub fn validate_ip_range<S: Store>(ctx: &Context<'_, S>, range: &IpRange) -> Result<()> {
    let rules: [Rule<S, IpRange>; 6] = [
        range_version,
        range_mask,
        range_order,
        range_refs,
        range_overlap,
        range_size,
    ];
    run(ctx, range, &rules)
}

fn range_version<S: Store>(_ctx: &Context<'_, S>, range: &IpRange) -> Result<()> {
    let (start, end) = (Family::of(&range.start()), Family::of(&range.end()));
    if start != end {
        return fail(
            "end_address",
            ValidationKind::VersionMismatch,
            format!("ending address version ({end}) does not match starting address ({start})"),
        );
    }
    Ok(())
}

fn range_mask<S: Store>(_ctx: &Context<'_, S>, range: &IpRange) -> Result<()> {
    let (start, end) = (range.start_address.prefix_len(), range.end_address.prefix_len());
    if start != end {
        return fail(
            "end_address",
            ValidationKind::MaskMismatch,
            format!("ending address mask (/{end}) does not match starting address mask (/{start})"),
        );
    }
    Ok(())
}

fn range_order<S: Store>(_ctx: &Context<'_, S>, range: &IpRange) -> Result<()> {
    if range.end() <= range.start() {
        return fail(
            "end_address",
            ValidationKind::InvalidRange,
            format!(
                "ending address must be greater than the starting address ({})",
                range.start()
            ),
        );
    }
    Ok(())
}

fn range_refs<S: Store>(ctx: &Context<'_, S>, range: &IpRange) -> Result<()> {
    ctx.check_vrf("vrf", range.vrf)
}

fn range_overlap<S: Store>(ctx: &Context<'_, S>, range: &IpRange) -> Result<()> {
    let span = Span::new(range.start(), range.end())?;
    for other in ctx.store.ip_ranges_in_scope(range.scope())? {
        if other.id == range.id {
            continue;
        }
        let Ok(theirs) = Span::new(other.start(), other.end()) else {
            continue;
        };
        if theirs.family() == span.family()
            && theirs.first() <= span.last()
            && theirs.last() >= span.first()
        {
            return fail(
                "start_address",
                ValidationKind::Overlap,
                format!(
                    "defined addresses overlap with range {} in {}",
                    other.name(),
                    table_name(range.scope())
                ),
            );
        }
    }
    Ok(())
}

fn range_size<S: Store>(_ctx: &Context<'_, S>, range: &IpRange) -> Result<()> {
    let size = Span::new(range.start(), range.end())?.size();
    if size > BigUint::from(MAX_RANGE_SIZE) {
        return fail(
            "end_address",
            ValidationKind::RangeTooLarge,
            format!("defined range exceeds maximum supported size ({MAX_RANGE_SIZE})"),
        );
    }
    Ok(())
}

// --- IP addresses ---

pub fn validate_ip_address<S: Store>(ctx: &Context<'_, S>, ip: &IpAddress) -> Result<()> {
    let rules: [Rule<S, IpAddress>; 6] = [
        address_mask,
        address_refs,
        address_nat,
        address_status,
        address_reserved,
        address_duplicate,
    ];
    run(ctx, ip, &rules)
}

fn address_mask<S: Store>(_ctx: &Context<'_, S>, ip: &IpAddress) -> Result<()> {
    if ip.address.prefix_len() == 0 {
        return fail("address", ValidationKind::InvalidMask, "cannot create IP address with /0 mask");
    }
    Ok(())
}

fn address_refs<S: Store>(ctx: &Context<'_, S>, ip: &IpAddress) -> Result<()> {
    ctx.check_vrf("vrf", ip.vrf)
}

fn address_nat<S: Store>(ctx: &Context<'_, S>, ip: &IpAddress) -> Result<()> {
    if let Some(inside) = ip.nat_inside {
        if inside == ip.id || ctx.store.get::<IpAddress>(&inside)?.is_none() {
            return fail(
                "nat_inside",
                ValidationKind::UnknownReference,
                format!("NAT inside address {inside} is not a valid IP address"),
            );
        }
    }
    Ok(())
}

fn address_status<S: Store>(_ctx: &Context<'_, S>, ip: &IpAddress) -> Result<()> {
    if ip.status == IpAddressStatus::Slaac && Family::of(&ip.host()) != Family::V6 {
        return fail(
            "status",
            ValidationKind::InvalidStatus,
            "only IPv6 addresses can be assigned SLAAC status",
        );
    }
    Ok(())
}

/// Interfaces may not take the network address (or the IPv4 broadcast
/// address) of a subnet, except on point-to-point and host masks.
fn address_reserved<S: Store>(_ctx: &Context<'_, S>, ip: &IpAddress) -> Result<()> {
    if !ip.assigned_object.is_some_and(|o| o.is_interface()) {
        return Ok(());
    }
    let family = Family::of(&ip.host());
    let len = ip.address.prefix_len();
    let exempt = match family {
        Family::V4 => len >= 31,
        Family::V6 => len >= 127,
    };
    if exempt {
        return Ok(());
    }
    if ip.host() == ip.address.network() {
        return fail(
            "address",
            ValidationKind::ReservedAddress,
            format!("{} is a network ID, which may not be assigned to an interface", ip.address),
        );
    }
    if family == Family::V4 && ip.host() == ip.address.broadcast() {
        return fail(
            "address",
            ValidationKind::ReservedAddress,
            format!("{} is a broadcast address, which may not be assigned to an interface", ip.address),
        );
    }
    Ok(())
}

fn is_nonunique(role: Option<IpAddressRole>) -> bool {
    role.is_some_and(IpAddressRole::is_nonunique)
}

fn address_duplicate<S: Store>(ctx: &Context<'_, S>, ip: &IpAddress) -> Result<()> {
    if !ctx.enforce_unique(ip.vrf)? {
        return Ok(());
    }
    let duplicates: Vec<IpAddress> = ctx
        .store
        .ip_addresses_with_host(ip.scope(), ip.host())?
        .into_iter()
        .filter(|d| d.id != ip.id)
        .collect();
    let Some(first) = duplicates.first() else {
        return Ok(());
    };
    if !is_nonunique(ip.role) || duplicates.iter().any(|d| !is_nonunique(d.role)) {
        return fail(
            "address",
            ValidationKind::DuplicateAddress,
            format!(
                "duplicate IP address found in {}: {}",
                table_name(ip.scope()),
                first.address
            ),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_db;
    use chrono::Utc;
    use ipnet::IpNet;
    use netipam_core::config::IpamConfig;
    use netipam_core::db::Db;
    use netipam_core::error::Error;
    use netipam_core::types::{AssignedObject, Vrf};
    use uuid::Uuid;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn kind(result: Result<()>) -> Option<ValidationKind> {
        result.err().and_then(|e: Error| e.validation_kind())
    }

    fn add_vrf(db: &Db, enforce_unique: bool) -> Uuid {
        let vrf = Vrf {
            id: Uuid::new_v4(),
            name: "blue".into(),
            rd: None,
            enforce_unique,
            description: String::new(),
            created_at: Utc::now(),
        };
        db.write(|tx| tx.put(&vrf).map(|_| ())).unwrap();
        vrf.id
    }

    fn add_rir(db: &Db) -> Uuid {
        let rir = Rir {
            id: Uuid::new_v4(),
            name: "RFC 1918".into(),
            slug: "rfc-1918".into(),
            is_private: true,
            created_at: Utc::now(),
        };
        db.write(|tx| tx.put(&rir).map(|_| ())).unwrap();
        rir.id
    }

    fn aggregate(prefix: &str, rir: Uuid) -> Aggregate {
        let now = Utc::now();
        Aggregate {
            id: Uuid::new_v4(),
            prefix: net(prefix),
            rir,
            tenant: None,
            date_added: None,
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_aggregate_overlap_both_directions() {
        let (db, _dir) = test_db();
        let config = IpamConfig::default();
        let rir = add_rir(&db);
        let existing = aggregate("10.0.0.0/16", rir);
        db.write(|tx| tx.put(&existing).map(|_| ())).unwrap();

        db.read(|tx| {
            let ctx = Context::new(tx, &config);
            assert_eq!(
                kind(validate_aggregate(&ctx, &aggregate("10.0.0.0/8", rir))),
                Some(ValidationKind::Overlap)
            );
            assert_eq!(
                kind(validate_aggregate(&ctx, &aggregate("10.0.1.0/24", rir))),
                Some(ValidationKind::Overlap)
            );
            assert_eq!(
                kind(validate_aggregate(&ctx, &aggregate("10.0.0.0/16", rir))),
                Some(ValidationKind::Overlap)
            );
            assert!(validate_aggregate(&ctx, &aggregate("10.1.0.0/16", rir)).is_ok());
            // re-saving itself is fine
            assert!(validate_aggregate(&ctx, &existing).is_ok());
            assert_eq!(
                kind(validate_aggregate(&ctx, &aggregate("0.0.0.0/0", rir))),
                Some(ValidationKind::InvalidMask)
            );
            assert_eq!(
                kind(validate_aggregate(&ctx, &aggregate("172.16.0.0/12", Uuid::new_v4()))),
                Some(ValidationKind::UnknownReference)
            );
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_prefix_duplicate_follows_policy() {
        let (db, _dir) = test_db();
        let strict = add_vrf(&db, true);
        let loose = add_vrf(&db, false);
        for vrf in [None, Some(strict), Some(loose)] {
            let p = Prefix::new(net("10.0.0.0/24"), vrf);
            db.write(|tx| tx.put(&p).map(|_| ())).unwrap();
        }

        let lenient = IpamConfig::default();
        let mut enforcing = IpamConfig::default();
        enforcing.enforce_global_unique = true;

        db.read(|tx| {
            let ctx = Context::new(tx, &lenient);
            assert!(validate_prefix(&ctx, &Prefix::new(net("10.0.0.0/24"), None)).is_ok());
            assert!(validate_prefix(&ctx, &Prefix::new(net("10.0.0.0/24"), Some(loose))).is_ok());
            assert_eq!(
                kind(validate_prefix(&ctx, &Prefix::new(net("10.0.0.0/24"), Some(strict)))),
                Some(ValidationKind::DuplicatePrefix)
            );
            assert!(validate_prefix(&ctx, &Prefix::new(net("10.0.1.0/24"), Some(strict))).is_ok());

            let ctx = Context::new(tx, &enforcing);
            assert_eq!(
                kind(validate_prefix(&ctx, &Prefix::new(net("10.0.0.0/24"), None))),
                Some(ValidationKind::DuplicatePrefix)
            );
            assert_eq!(
                kind(validate_prefix(&ctx, &Prefix::new(net("10.0.0.0/24"), Some(Uuid::new_v4())))),
                Some(ValidationKind::UnknownReference)
            );
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_ip_range_rules_in_order() {
        let (db, _dir) = test_db();
        let config = IpamConfig::default();
        let existing = IpRange::new(net("192.0.2.10/24"), net("192.0.2.20/24"), None);
        db.write(|tx| tx.put(&existing).map(|_| ())).unwrap();

        db.read(|tx| {
            let ctx = Context::new(tx, &config);
            let check = |start: &str, end: &str| {
                kind(validate_ip_range(&ctx, &IpRange::new(net(start), net(end), None)))
            };
            assert_eq!(check("192.0.2.1/24", "2001:db8::1/24"), Some(ValidationKind::VersionMismatch));
            assert_eq!(check("192.0.2.1/24", "192.0.2.5/25"), Some(ValidationKind::MaskMismatch));
            assert_eq!(check("192.0.2.5/24", "192.0.2.5/24"), Some(ValidationKind::InvalidRange));
            assert_eq!(check("192.0.2.15/24", "192.0.2.30/24"), Some(ValidationKind::Overlap));
            assert_eq!(check("192.0.2.1/24", "192.0.2.10/24"), Some(ValidationKind::Overlap));
            assert_eq!(check("192.0.2.21/24", "192.0.2.30/24"), None);
            assert_eq!(check("2001:db8::/64", "2001:db8::1:0:0/64"), Some(ValidationKind::RangeTooLarge));
            assert_eq!(check("2001:db8::/64", "2001:db8::ffff:fffe/64"), None);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_ip_range_overlap_is_per_vrf() {
        let (db, _dir) = test_db();
        let config = IpamConfig::default();
        let vrf = add_vrf(&db, true);
        let existing = IpRange::new(net("192.0.2.10/24"), net("192.0.2.20/24"), None);
        db.write(|tx| tx.put(&existing).map(|_| ())).unwrap();
        db.read(|tx| {
            let ctx = Context::new(tx, &config);
            let other = IpRange::new(net("192.0.2.10/24"), net("192.0.2.20/24"), Some(vrf));
            assert!(validate_ip_range(&ctx, &other).is_ok());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_ip_address_duplicate_and_nonunique_roles() {
        let (db, _dir) = test_db();
        let config = IpamConfig::default();
        let vrf = add_vrf(&db, true);
        let mut first = IpAddress::new(net("192.0.2.5/24"), Some(vrf));
        first.assigned_object = Some(AssignedObject::Interface(Uuid::new_v4()));
        db.write(|tx| tx.put(&first).map(|_| ())).unwrap();

        db.read(|tx| {
            let ctx = Context::new(tx, &config);
            let mut second = IpAddress::new(net("192.0.2.5/24"), Some(vrf));
            assert_eq!(kind(validate_ip_address(&ctx, &second)), Some(ValidationKind::DuplicateAddress));
            second.role = Some(IpAddressRole::Anycast);
            // the existing one carries no exempt role
            assert_eq!(kind(validate_ip_address(&ctx, &second)), Some(ValidationKind::DuplicateAddress));
            Ok(())
        })
        .unwrap();

        first.role = Some(IpAddressRole::Anycast);
        db.write(|tx| tx.put(&first).map(|_| ())).unwrap();
        db.read(|tx| {
            let ctx = Context::new(tx, &config);
            let mut second = IpAddress::new(net("192.0.2.5/25"), Some(vrf));
            second.role = Some(IpAddressRole::Anycast);
            assert!(validate_ip_address(&ctx, &second).is_ok());
            second.role = Some(IpAddressRole::Loopback);
            assert_eq!(kind(validate_ip_address(&ctx, &second)), Some(ValidationKind::DuplicateAddress));
            // the global table is lenient by default
            let global = IpAddress::new(net("192.0.2.5/24"), None);
            assert!(validate_ip_address(&ctx, &global).is_ok());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_ip_address_reserved_and_status() {
        let (db, _dir) = test_db();
        let config = IpamConfig::default();
        db.read(|tx| {
            let ctx = Context::new(tx, &config);
            let iface = Some(AssignedObject::Interface(Uuid::new_v4()));
            let check = |cidr: &str, assigned: Option<AssignedObject>| {
                let mut ip = IpAddress::new(net(cidr), None);
                ip.assigned_object = assigned;
                kind(validate_ip_address(&ctx, &ip))
            };
            assert_eq!(check("192.0.2.0/24", iface), Some(ValidationKind::ReservedAddress));
            assert_eq!(check("192.0.2.255/24", iface), Some(ValidationKind::ReservedAddress));
            assert_eq!(check("192.0.2.0/24", None), None);
            assert_eq!(check("192.0.2.0/31", iface), None);
            assert_eq!(check("192.0.2.0/24", Some(AssignedObject::FhrpGroup(Uuid::new_v4()))), None);
            assert_eq!(check("2001:db8::/64", iface), Some(ValidationKind::ReservedAddress));
            assert_eq!(check("2001:db8::ffff:ffff:ffff:ffff/64", iface), None);
            assert_eq!(check("2001:db8::/127", iface), None);
            assert_eq!(check("192.0.2.1/0", None), Some(ValidationKind::InvalidMask));

            let mut slaac = IpAddress::new(net("192.0.2.1/24"), None);
            slaac.status = IpAddressStatus::Slaac;
            assert_eq!(kind(validate_ip_address(&ctx, &slaac)), Some(ValidationKind::InvalidStatus));
            slaac.address = net("2001:db8::1/64");
            assert!(validate_ip_address(&ctx, &slaac).is_ok());

            let mut nat = IpAddress::new(net("198.51.100.1/24"), None);
            nat.nat_inside = Some(Uuid::new_v4());
            assert_eq!(kind(validate_ip_address(&ctx, &nat)), Some(ValidationKind::UnknownReference));
            Ok(())
        })
        .unwrap();
    }
}
