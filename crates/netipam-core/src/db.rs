use crate::addr::{addr_to_u128, Family, Span};
use crate::error::{Error, Result};
use crate::types::{Aggregate, IpAddress, IpRange, Prefix, Rir, ScopeKey, Vlan, VlanGroup, Vrf};
use ipnet::IpNet;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// VRFs table: vrf_id -> Vrf (JSON)
const VRFS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("vrfs");

/// RIRs table: rir_id -> Rir (JSON)
const RIRS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("rirs");

/// Aggregates table: aggregate_id -> Aggregate (JSON)
const AGGREGATES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("aggregates");

/// Aggregate index: "net_key|id" -> aggregate_id
const AGGREGATE_INDEX: TableDefinition<&str, &str> = TableDefinition::new("aggregate_index");

/// Prefixes table: prefix_id -> Prefix (JSON)
const PREFIXES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("prefixes");

/// Prefixes by scope: "scope|net_key|id" -> prefix_id
const PREFIX_SCOPE_INDEX: TableDefinition<&str, &str> = TableDefinition::new("prefix_scope_index");

/// Prefixes across all scopes: "net_key|id" -> prefix_id
const PREFIX_NET_INDEX: TableDefinition<&str, &str> = TableDefinition::new("prefix_net_index");

/// IP ranges table: range_id -> IpRange (JSON)
const IP_RANGES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("ip_ranges");

/// IP ranges by scope and start address: "scope|host_key|id" -> range_id
const IP_RANGE_INDEX: TableDefinition<&str, &str> = TableDefinition::new("ip_range_index");

/// IP addresses table: address_id -> IpAddress (JSON)
const IP_ADDRESSES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("ip_addresses");

/// IP addresses by scope: "scope|host_key|id" -> address_id
const IP_ADDRESS_SCOPE_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("ip_address_scope_index");

/// IP addresses across all scopes: "host_key|id" -> address_id
const IP_ADDRESS_HOST_INDEX: TableDefinition<&str, &str> =
    TableDefinition::new("ip_address_host_index");

/// VLAN groups table: group_id -> VlanGroup (JSON)
const VLAN_GROUPS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("vlan_groups");

/// VLANs table: vlan_id -> Vlan (JSON)
const VLANS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("vlans");

/// VLANs by group: "group|vid|id" -> vlan_id (group is "none" when ungrouped)
const VLAN_INDEX: TableDefinition<&str, &str> = TableDefinition::new("vlan_index");

const SEP: char = '|';
/// Sorts immediately after `SEP`; closes a prefix scan.
const PREFIX_END: char = '}';
/// Sorts after every hex digit and `SEP`; closes a key-range scan.
const KEY_END: char = '~';

/// Tables known to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Vrfs,
    Rirs,
    Aggregates,
    AggregateIndex,
    Prefixes,
    PrefixScopeIndex,
    PrefixNetIndex,
    IpRanges,
    IpRangeIndex,
    IpAddresses,
    IpAddressScopeIndex,
    IpAddressHostIndex,
    VlanGroups,
    Vlans,
    VlanIndex,
}

const ALL_TABLES: [Table; 15] = [
    Table::Vrfs,
    Table::Rirs,
    Table::Aggregates,
    Table::AggregateIndex,
    Table::Prefixes,
    Table::PrefixScopeIndex,
    Table::PrefixNetIndex,
    Table::IpRanges,
    Table::IpRangeIndex,
    Table::IpAddresses,
    Table::IpAddressScopeIndex,
    Table::IpAddressHostIndex,
    Table::VlanGroups,
    Table::Vlans,
    Table::VlanIndex,
];

impl Table {
    fn def(self) -> TableDefinition<'static, &'static str, &'static str> {
        match self {
            Table::Vrfs => VRFS_TABLE,
            Table::Rirs => RIRS_TABLE,
            Table::Aggregates => AGGREGATES_TABLE,
            Table::AggregateIndex => AGGREGATE_INDEX,
            Table::Prefixes => PREFIXES_TABLE,
            Table::PrefixScopeIndex => PREFIX_SCOPE_INDEX,
            Table::PrefixNetIndex => PREFIX_NET_INDEX,
            Table::IpRanges => IP_RANGES_TABLE,
            Table::IpRangeIndex => IP_RANGE_INDEX,
            Table::IpAddresses => IP_ADDRESSES_TABLE,
            Table::IpAddressScopeIndex => IP_ADDRESS_SCOPE_INDEX,
            Table::IpAddressHostIndex => IP_ADDRESS_HOST_INDEX,
            Table::VlanGroups => VLAN_GROUPS_TABLE,
            Table::Vlans => VLANS_TABLE,
            Table::VlanIndex => VLAN_INDEX,
        }
    }
}

// --- Key encoding ---
//
// Keys are plain strings whose lexical order matches address order: the
// family digit, the value as 32 hex digits, then (for networks) the mask
// length as 3 decimal digits. A containing network therefore sorts before
// everything it contains.

fn value_key(family: Family, value: u128) -> String {
    format!("{}{:032x}", family.number(), value)
}

/// Sortable key for a network (host bits cleared).
pub fn net_key(net: &IpNet) -> String {
    format!(
        "{}{:03}",
        value_key(Family::of_net(net), addr_to_u128(net.network())),
        net.prefix_len()
    )
}

/// Sortable key for a single address.
pub fn host_key(addr: IpAddr) -> String {
    value_key(Family::of(&addr), addr_to_u128(addr))
}

/// Bounds covering every key that starts with `prefix|`.
fn prefix_bounds(prefix: &str) -> (String, String) {
    (format!("{prefix}{SEP}"), format!("{prefix}{PREFIX_END}"))
}

/// Bounds covering every key under `scope` whose address part lies in `span`.
fn span_bounds(scope: Option<ScopeKey>, span: &Span) -> (String, String) {
    let lo = value_key(span.family(), span.first());
    let hi = value_key(span.family(), span.last());
    match scope {
        Some(scope) => (
            format!("{scope}{SEP}{lo}"),
            format!("{scope}{SEP}{hi}{KEY_END}"),
        ),
        None => (lo, format!("{hi}{KEY_END}")),
    }
}

fn vlan_group_key(group: Option<Uuid>) -> String {
    match group {
        Some(id) => id.to_string(),
        None => "none".to_string(),
    }
}

/// A persisted record kind: its primary table and secondary index keys.
pub trait Record: Serialize + DeserializeOwned {
    const TABLE: Table;

    fn id(&self) -> Uuid;

    /// `(index table, key)` pairs pointing at this record.
    fn index_keys(&self) -> Vec<(Table, String)> {
        Vec::new()
    }
}

impl Record for Vrf {
    const TABLE: Table = Table::Vrfs;

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Record for Rir {
    const TABLE: Table = Table::Rirs;

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Record for Aggregate {
    const TABLE: Table = Table::Aggregates;

    fn id(&self) -> Uuid {
        self.id
    }

    fn index_keys(&self) -> Vec<(Table, String)> {
        vec![(
            Table::AggregateIndex,
            format!("{}{SEP}{}", net_key(&self.prefix), self.id),
        )]
    }
}

impl Record for Prefix {
    const TABLE: Table = Table::Prefixes;

    fn id(&self) -> Uuid {
        self.id
    }

    fn index_keys(&self) -> Vec<(Table, String)> {
        let net = net_key(&self.prefix);
        vec![
            (
                Table::PrefixScopeIndex,
                format!("{}{SEP}{net}{SEP}{}", self.scope(), self.id),
            ),
            (Table::PrefixNetIndex, format!("{net}{SEP}{}", self.id)),
        ]
    }
}

impl Record for IpRange {
    const TABLE: Table = Table::IpRanges;

    fn id(&self) -> Uuid {
        self.id
    }

    fn index_keys(&self) -> Vec<(Table, String)> {
        vec![(
            Table::IpRangeIndex,
            format!("{}{SEP}{}{SEP}{}", self.scope(), host_key(self.start()), self.id),
        )]
    }
}

impl Record for IpAddress {
    const TABLE: Table = Table::IpAddresses;

    fn id(&self) -> Uuid {
        self.id
    }

    fn index_keys(&self) -> Vec<(Table, String)> {
        let host = host_key(self.host());
        vec![
            (
                Table::IpAddressScopeIndex,
                format!("{}{SEP}{host}{SEP}{}", self.scope(), self.id),
            ),
            (Table::IpAddressHostIndex, format!("{host}{SEP}{}", self.id)),
        ]
    }
}

impl Record for VlanGroup {
    const TABLE: Table = Table::VlanGroups;

    fn id(&self) -> Uuid {
        self.id
    }
}

impl Record for Vlan {
    const TABLE: Table = Table::Vlans;

    fn id(&self) -> Uuid {
        self.id
    }

    fn index_keys(&self) -> Vec<(Table, String)> {
        vec![(
            Table::VlanIndex,
            format!("{}{SEP}{:04}{SEP}{}", vlan_group_key(self.group), self.vid, self.id),
        )]
    }
}

/// Read access shared by read and write transactions.
///
/// Implementors supply the three raw operations; every typed query is
/// provided on top of them so validation can run against the very snapshot
/// a write commits.
pub trait Store {
    #[doc(hidden)]
    fn fetch_many(&self, table: Table, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Entries with `lo <= key < hi`, in key order.
    #[doc(hidden)]
    fn scan(&self, table: Table, lo: &str, hi: &str) -> Result<Vec<(String, String)>>;

    #[doc(hidden)]
    fn scan_all(&self, table: Table) -> Result<Vec<(String, String)>>;

    fn get<T: Record>(&self, id: &Uuid) -> Result<Option<T>> {
        let found = self.fetch_many(T::TABLE, &[id.to_string()])?;
        match found.into_iter().next().flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Like [`Store::get`] but a missing record is an error.
    fn require<T: Record>(&self, id: &Uuid) -> Result<T> {
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("{:?} {id}", T::TABLE)))
    }

    fn list<T: Record>(&self) -> Result<Vec<T>> {
        self.scan_all(T::TABLE)?
            .iter()
            .map(|(_, json)| serde_json::from_str(json).map_err(Error::from))
            .collect()
    }

    /// Records referenced from an index range, in index order.
    fn indexed<T: Record>(&self, index: Table, lo: &str, hi: &str) -> Result<Vec<T>> {
        let ids: Vec<String> = self
            .scan(index, lo, hi)?
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        let mut result = Vec::with_capacity(ids.len());
        for json in self.fetch_many(T::TABLE, &ids)?.into_iter().flatten() {
            result.push(serde_json::from_str(&json)?);
        }
        Ok(result)
    }

    // --- Prefixes ---

    /// All prefixes in a scope, ordered by (network address, mask length).
    fn prefixes_in_scope(&self, scope: ScopeKey) -> Result<Vec<Prefix>> {
        let (lo, hi) = prefix_bounds(&scope.to_string());
        self.indexed(Table::PrefixScopeIndex, &lo, &hi)
    }

    /// Every scope that currently holds at least one prefix.
    fn prefix_scopes(&self) -> Result<Vec<ScopeKey>> {
        let mut scopes = BTreeSet::new();
        for (key, _) in self.scan_all(Table::PrefixScopeIndex)? {
            if let Some((scope, _)) = key.split_once(SEP) {
                scopes.insert(scope.parse::<ScopeKey>()?);
            }
        }
        Ok(scopes.into_iter().collect())
    }

    /// Prefixes inside `net`, within one scope or (`None`) across all of them.
    fn prefixes_within(
        &self,
        scope: Option<ScopeKey>,
        net: &IpNet,
        include_self: bool,
    ) -> Result<Vec<Prefix>> {
        let (lo, hi) = span_bounds(scope, &Span::of_net(net));
        let index = match scope {
            Some(_) => Table::PrefixScopeIndex,
            None => Table::PrefixNetIndex,
        };
        let found: Vec<Prefix> = self.indexed(index, &lo, &hi)?;
        Ok(found
            .into_iter()
            .filter(|p| {
                if include_self {
                    crate::addr::contains_or_equals(net, &p.prefix)
                } else {
                    crate::addr::contains(net, &p.prefix)
                }
            })
            .collect())
    }

    /// Prefixes in `scope` that contain `net`, outermost first.
    fn prefixes_containing(
        &self,
        scope: ScopeKey,
        net: &IpNet,
        include_self: bool,
    ) -> Result<Vec<Prefix>> {
        Ok(self
            .prefixes_in_scope(scope)?
            .into_iter()
            .filter(|p| {
                if include_self {
                    crate::addr::contains_or_equals(&p.prefix, net)
                } else {
                    crate::addr::contains(&p.prefix, net)
                }
            })
            .collect())
    }

    /// Prefixes in `scope` with exactly the network `net`.
    fn prefixes_equal(&self, scope: ScopeKey, net: &IpNet) -> Result<Vec<Prefix>> {
        let (lo, hi) = prefix_bounds(&format!("{scope}{SEP}{}", net_key(net)));
        self.indexed(Table::PrefixScopeIndex, &lo, &hi)
    }

    // --- Aggregates ---

    /// All aggregates ordered by network.
    fn aggregates(&self) -> Result<Vec<Aggregate>> {
        self.indexed(Table::AggregateIndex, "", &KEY_END.to_string())
    }

    // --- IP ranges ---

    fn ip_ranges_in_scope(&self, scope: ScopeKey) -> Result<Vec<IpRange>> {
        let (lo, hi) = prefix_bounds(&scope.to_string());
        self.indexed(Table::IpRangeIndex, &lo, &hi)
    }

    /// Ranges in `scope` with both endpoints inside `net`.
    fn ip_ranges_within(&self, scope: ScopeKey, net: &IpNet) -> Result<Vec<IpRange>> {
        let (lo, hi) = span_bounds(Some(scope), &Span::of_net(net));
        let found: Vec<IpRange> = self.indexed(Table::IpRangeIndex, &lo, &hi)?;
        Ok(found
            .into_iter()
            .filter(|r| net.contains(&r.end()))
            .collect())
    }

    // --- IP addresses ---

    /// Addresses whose host part lies in `span`, ordered by host.
    fn ip_addresses_within(&self, scope: Option<ScopeKey>, span: &Span) -> Result<Vec<IpAddress>> {
        let (lo, hi) = span_bounds(scope, span);
        let index = match scope {
            Some(_) => Table::IpAddressScopeIndex,
            None => Table::IpAddressHostIndex,
        };
        self.indexed(index, &lo, &hi)
    }

    /// Addresses in `scope` with exactly the host `addr`, any mask.
    fn ip_addresses_with_host(&self, scope: ScopeKey, addr: IpAddr) -> Result<Vec<IpAddress>> {
        let (lo, hi) = prefix_bounds(&format!("{scope}{SEP}{}", host_key(addr)));
        self.indexed(Table::IpAddressScopeIndex, &lo, &hi)
    }

    // --- VLANs ---

    /// VLANs in a group (or ungrouped with `None`), ordered by VID.
    fn vlans_in_group(&self, group: Option<Uuid>) -> Result<Vec<Vlan>> {
        let (lo, hi) = prefix_bounds(&vlan_group_key(group));
        self.indexed(Table::VlanIndex, &lo, &hi)
    }
}

/// A consistent read-only snapshot.
pub struct ReadTx {
    txn: redb::ReadTransaction,
}

/// A write transaction; nothing becomes visible unless the closure passed to
/// [`Db::write`] returns `Ok`.
pub struct WriteTx {
    txn: redb::WriteTransaction,
}

macro_rules! collect_entries {
    ($iter:expr) => {{
        let mut out = Vec::new();
        for entry in $iter {
            let entry = entry.map_err(|e| Error::Database(e.to_string()))?;
            out.push((entry.0.value().to_string(), entry.1.value().to_string()));
        }
        out
    }};
}

impl Store for ReadTx {
    fn fetch_many(&self, table: Table, keys: &[String]) -> Result<Vec<Option<String>>> {
        let t = self.txn.open_table(table.def())?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(t.get(key.as_str())?.map(|v| v.value().to_string()));
        }
        Ok(out)
    }

    fn scan(&self, table: Table, lo: &str, hi: &str) -> Result<Vec<(String, String)>> {
        let t = self.txn.open_table(table.def())?;
        Ok(collect_entries!(t.range(lo..hi)?))
    }

    fn scan_all(&self, table: Table) -> Result<Vec<(String, String)>> {
        let t = self.txn.open_table(table.def())?;
        Ok(collect_entries!(t.iter()?))
    }
}

impl Store for WriteTx {
    fn fetch_many(&self, table: Table, keys: &[String]) -> Result<Vec<Option<String>>> {
        let t = self.txn.open_table(table.def())?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(t.get(key.as_str())?.map(|v| v.value().to_string()));
        }
        Ok(out)
    }

    fn scan(&self, table: Table, lo: &str, hi: &str) -> Result<Vec<(String, String)>> {
        let t = self.txn.open_table(table.def())?;
        Ok(collect_entries!(t.range(lo..hi)?))
    }

    fn scan_all(&self, table: Table) -> Result<Vec<(String, String)>> {
        let t = self.txn.open_table(table.def())?;
        Ok(collect_entries!(t.iter()?))
    }
}

impl WriteTx {
    /// Insert or replace a record, keeping its index entries in step.
    /// Returns the previous version, if any.
    pub fn put<T: Record>(&self, record: &T) -> Result<Option<T>> {
        let id_str = record.id().to_string();
        let previous: Option<T> = self.get(&record.id())?;
        if let Some(ref old) = previous {
            for (index, key) in old.index_keys() {
                let mut t = self.txn.open_table(index.def())?;
                t.remove(key.as_str())?;
            }
        }

        let json = serde_json::to_string(record)?;
        {
            let mut t = self.txn.open_table(T::TABLE.def())?;
            t.insert(id_str.as_str(), json.as_str())?;
        }
        for (index, key) in record.index_keys() {
            let mut t = self.txn.open_table(index.def())?;
            t.insert(key.as_str(), id_str.as_str())?;
        }
        Ok(previous)
    }

    /// Remove a record and its index entries, returning what was removed.
    pub fn delete<T: Record>(&self, id: &Uuid) -> Result<T> {
        let record: T = self.require(id)?;
        for (index, key) in record.index_keys() {
            let mut t = self.txn.open_table(index.def())?;
            t.remove(key.as_str())?;
        }
        let id_str = id.to_string();
        let mut t = self.txn.open_table(T::TABLE.def())?;
        t.remove(id_str.as_str())?;
        Ok(record)
    }

    /// Write back one batch of `(prefix id, depth, children)`; the
    /// prefix's indexes are unaffected. Returns the number updated.
    pub fn set_prefix_hierarchy(&self, batch: &[(Uuid, u32, u64)]) -> Result<usize> {
        let mut t = self.txn.open_table(PREFIXES_TABLE)?;
        let mut updated = 0;
        for (id, depth, children) in batch {
            let id_str = id.to_string();
            let json = match t.get(id_str.as_str())? {
                Some(v) => v.value().to_string(),
                None => continue,
            };
            let mut prefix: Prefix = serde_json::from_str(&json)?;
            if prefix.depth == *depth && prefix.children == *children {
                continue;
            }
            prefix.depth = *depth;
            prefix.children = *children;
            let json = serde_json::to_string(&prefix)?;
            t.insert(id_str.as_str(), json.as_str())?;
            updated += 1;
        }
        Ok(updated)
    }
}

#[derive(Clone)]
pub struct Db {
    inner: Arc<Database>,
}

impl Db {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Initialize tables
        let write_txn = db.begin_write()?;
        {
            for table in ALL_TABLES {
                let _ = write_txn.open_table(table.def())?;
            }
        }
        write_txn.commit()?;

        Ok(Self {
            inner: Arc::new(db),
        })
    }

    /// Run `f` against a consistent snapshot.
    pub fn read<T>(&self, f: impl FnOnce(&ReadTx) -> Result<T>) -> Result<T> {
        let tx = ReadTx {
            txn: self.inner.begin_read()?,
        };
        f(&tx)
    }

    /// Run `f` inside a write transaction, committing only if it succeeds.
    /// Writers are serialized by the database.
    pub fn write<T>(&self, f: impl FnOnce(&WriteTx) -> Result<T>) -> Result<T> {
        let tx = WriteTx {
            txn: self.inner.begin_write()?,
        };
        let out = f(&tx)?;
        tx.txn.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrefixStatus;
    use tempfile::TempDir;

    fn test_db() -> (Db, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Db::open(&dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    #[test]
    fn test_net_key_orders_parent_first() {
        let keys = [
            net_key(&net("10.0.0.0/8")),
            net_key(&net("10.0.0.0/16")),
            net_key(&net("10.0.1.0/24")),
            net_key(&net("10.1.0.0/16")),
            net_key(&net("2001:db8::/32")),
        ];
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_prefix_crud_and_scope_order() {
        let (db, _dir) = test_db();
        let vrf = Uuid::new_v4();
        let a = Prefix::new(net("10.1.0.0/16"), None);
        let b = Prefix::new(net("10.0.0.0/8"), None);
        let c = Prefix::new(net("10.0.0.0/16"), Some(vrf));

        db.write(|tx| {
            tx.put(&a)?;
            tx.put(&b)?;
            tx.put(&c)?;
            Ok(())
        })
        .unwrap();

        let global = db.read(|tx| tx.prefixes_in_scope(ScopeKey::GLOBAL)).unwrap();
        let nets: Vec<IpNet> = global.iter().map(|p| p.prefix).collect();
        assert_eq!(nets, vec![net("10.0.0.0/8"), net("10.1.0.0/16")]);

        let scopes = db.read(|tx| tx.prefix_scopes()).unwrap();
        assert_eq!(scopes, vec![ScopeKey::GLOBAL, ScopeKey::vrf(vrf)]);

        let everywhere = db
            .read(|tx| tx.prefixes_within(None, &net("10.0.0.0/8"), false))
            .unwrap();
        assert_eq!(everywhere.len(), 2);

        db.write(|tx| tx.delete::<Prefix>(&a.id).map(|_| ())).unwrap();
        assert!(db.read(|tx| tx.get::<Prefix>(&a.id)).unwrap().is_none());
        let global = db.read(|tx| tx.prefixes_in_scope(ScopeKey::GLOBAL)).unwrap();
        assert_eq!(global.len(), 1);
    }

    #[test]
    fn test_put_moves_index_on_vrf_change() {
        let (db, _dir) = test_db();
        let mut p = Prefix::new(net("192.0.2.0/24"), None);
        db.write(|tx| tx.put(&p).map(|_| ())).unwrap();

        let vrf = Uuid::new_v4();
        p.vrf = Some(vrf);
        p.status = PrefixStatus::Reserved;
        let previous = db.write(|tx| tx.put(&p)).unwrap().unwrap();
        assert!(previous.vrf.is_none());

        assert!(db
            .read(|tx| tx.prefixes_in_scope(ScopeKey::GLOBAL))
            .unwrap()
            .is_empty());
        let moved = db.read(|tx| tx.prefixes_in_scope(ScopeKey::vrf(vrf))).unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].status, PrefixStatus::Reserved);
    }

    #[test]
    fn test_failed_write_is_rolled_back() {
        let (db, _dir) = test_db();
        let p = Prefix::new(net("192.0.2.0/24"), None);
        let result: Result<()> = db.write(|tx| {
            tx.put(&p)?;
            Err(Error::NotFound("forced".into()))
        });
        assert!(result.is_err());
        assert!(db.read(|tx| tx.get::<Prefix>(&p.id)).unwrap().is_none());
    }

    #[test]
    fn test_ip_address_host_queries() {
        let (db, _dir) = test_db();
        let a = IpAddress::new(net("192.0.2.5/24"), None);
        let b = IpAddress::new(net("192.0.2.5/25"), None);
        let c = IpAddress::new(net("192.0.2.200/24"), None);
        db.write(|tx| {
            tx.put(&a)?;
            tx.put(&b)?;
            tx.put(&c)?;
            Ok(())
        })
        .unwrap();

        let same = db
            .read(|tx| tx.ip_addresses_with_host(ScopeKey::GLOBAL, "192.0.2.5".parse().unwrap()))
            .unwrap();
        assert_eq!(same.len(), 2);

        let low_half = db
            .read(|tx| {
                tx.ip_addresses_within(Some(ScopeKey::GLOBAL), &Span::of_net(&net("192.0.2.0/25")))
            })
            .unwrap();
        assert_eq!(low_half.len(), 2);
    }

    #[test]
    fn test_set_prefix_hierarchy() {
        let (db, _dir) = test_db();
        let p = Prefix::new(net("10.0.0.0/8"), None);
        db.write(|tx| tx.put(&p).map(|_| ())).unwrap();
        let n = db
            .write(|tx| tx.set_prefix_hierarchy(&[(p.id, 2, 7), (Uuid::new_v4(), 1, 1)]))
            .unwrap();
        assert_eq!(n, 1);
        let stored: Prefix = db.read(|tx| tx.require(&p.id)).unwrap();
        assert_eq!((stored.depth, stored.children), (2, 7));
    }

    #[test]
    fn test_vlans_ordered_by_vid() {
        let (db, _dir) = test_db();
        let group = Uuid::new_v4();
        for vid in [104u16, 100, 101] {
            let mut v = Vlan::new(vid, &format!("v{vid}"));
            v.group = Some(group);
            db.write(|tx| tx.put(&v).map(|_| ())).unwrap();
        }
        let vids: Vec<u16> = db
            .read(|tx| tx.vlans_in_group(Some(group)))
            .unwrap()
            .iter()
            .map(|v| v.vid)
            .collect();
        assert_eq!(vids, vec![100, 101, 104]);
        assert!(db.read(|tx| tx.vlans_in_group(None)).unwrap().is_empty());
    }
}
