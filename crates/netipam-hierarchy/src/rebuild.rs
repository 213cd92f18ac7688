use crate::locks::ScopeLocks;
use crate::sweep::sweep;
use netipam_core::db::{Db, Store, WriteTx};
use netipam_core::error::Result;
use netipam_core::types::ScopeKey;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebuildStats {
    pub scope: ScopeKey,
    /// Prefixes visited by the sweep
    pub prefixes: usize,
    /// Prefixes whose stored depth or children actually changed
    pub updated: usize,
}

/// Recompute depth/children for every prefix in `scope` inside an open
/// write transaction. Nothing is visible until the caller commits.
pub fn rebuild_in(tx: &WriteTx, scope: ScopeKey, batch_size: usize) -> Result<RebuildStats> {
    let prefixes = tx.prefixes_in_scope(scope)?;
    let entries = sweep(prefixes.iter().map(|p| (p.id, p.prefix)));

    let batch: Vec<(uuid::Uuid, u32, u64)> = entries
        .iter()
        .map(|e| (e.id, e.depth, e.children))
        .collect();

    let mut updated = 0;
    for (n, chunk) in batch.chunks(batch_size.max(1)).enumerate() {
        let changed = tx.set_prefix_hierarchy(chunk)?;
        debug!(vrf = %scope, batch = n, size = chunk.len(), changed, "hierarchy batch written");
        updated += changed;
    }

    Ok(RebuildStats {
        scope,
        prefixes: prefixes.len(),
        updated,
    })
}

/// Rebuild one scope as its own all-or-nothing transaction, serialized with
/// every other writer of that scope.
pub fn rebuild(
    db: &Db,
    locks: &ScopeLocks,
    scope: ScopeKey,
    batch_size: usize,
) -> Result<RebuildStats> {
    let stats = locks.with(&[scope], || db.write(|tx| rebuild_in(tx, scope, batch_size)))?;
    info!(
        vrf = %scope,
        prefixes = stats.prefixes,
        updated = stats.updated,
        "prefix hierarchy rebuilt"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipnet::IpNet;
    use netipam_core::types::Prefix;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn test_db() -> (Db, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Db::open(&dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn insert(db: &Db, cidr: &str, vrf: Option<Uuid>) -> Uuid {
        let p = Prefix::new(net(cidr), vrf);
        db.write(|tx| tx.put(&p).map(|_| ())).unwrap();
        p.id
    }

    fn values(db: &Db, id: Uuid) -> (u32, u64) {
        let p: Prefix = db.read(|tx| tx.require(&id)).unwrap();
        (p.depth, p.children)
    }

    #[test]
    fn test_rebuild_writes_back_in_batches() {
        let (db, _dir) = test_db();
        let locks = ScopeLocks::new();
        let top = insert(&db, "10.0.0.0/16", None);
        let kids: Vec<Uuid> = (0..5)
            .map(|i| insert(&db, &format!("10.0.{i}.0/24"), None))
            .collect();

        let stats = rebuild(&db, &locks, ScopeKey::GLOBAL, 2).unwrap();
        assert_eq!(stats.prefixes, 6);
        assert_eq!(stats.updated, 6);
        assert_eq!(values(&db, top), (0, 5));
        for id in kids {
            assert_eq!(values(&db, id), (1, 0));
        }
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let (db, _dir) = test_db();
        let locks = ScopeLocks::new();
        let a = insert(&db, "10.0.0.0/16", None);
        let b = insert(&db, "10.0.1.0/24", None);
        rebuild(&db, &locks, ScopeKey::GLOBAL, 100).unwrap();
        let first = (values(&db, a), values(&db, b));

        let again = rebuild(&db, &locks, ScopeKey::GLOBAL, 100).unwrap();
        assert_eq!(again.updated, 0);
        assert_eq!((values(&db, a), values(&db, b)), first);
    }

    #[test]
    fn test_scopes_are_independent() {
        let (db, _dir) = test_db();
        let locks = ScopeLocks::new();
        let vrf = Uuid::new_v4();
        let global = insert(&db, "10.0.0.0/16", None);
        let scoped = insert(&db, "10.0.1.0/24", Some(vrf));

        rebuild(&db, &locks, ScopeKey::GLOBAL, 100).unwrap();
        rebuild(&db, &locks, ScopeKey::vrf(vrf), 100).unwrap();
        assert_eq!(values(&db, global), (0, 0));
        assert_eq!(values(&db, scoped), (0, 0));
    }

    #[test]
    fn test_rebuild_rolled_back_with_failed_transaction() {
        let (db, _dir) = test_db();
        let a = insert(&db, "10.0.0.0/16", None);
        insert(&db, "10.0.1.0/24", None);

        let result: Result<()> = db.write(|tx| {
            rebuild_in(tx, ScopeKey::GLOBAL, 1)?;
            Err(netipam_core::error::Error::NotFound("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(values(&db, a), (0, 0));
    }
}
