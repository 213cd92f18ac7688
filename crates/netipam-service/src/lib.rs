//! The boundary facade: every write goes through validation, persistence and
//! hierarchy maintenance in one transaction; reads compose the hierarchy
//! with the free-space and utilization arithmetic.

pub mod allocate;
pub mod query;
pub mod save;

use netipam_core::config::{Config, IpamConfig};
use netipam_core::db::Db;
use netipam_core::error::Result;
use netipam_hierarchy::ScopeLocks;
use netipam_space::UtilizationCache;
use uuid::Uuid;

pub use allocate::IpParent;
pub use netipam_hierarchy::RebuildStats;
pub use query::{utilization_key, Available, ChildrenOptions, FirstAvailable};

pub struct Ipam {
    db: Db,
    config: IpamConfig,
    /// Serializes allocation and hierarchy maintenance per VRF scope
    locks: ScopeLocks,
    /// Serializes VID allocation per VLAN group
    group_locks: ScopeLocks<Uuid>,
    cache: UtilizationCache,
}

impl Ipam {
    pub fn new(db: Db, config: IpamConfig) -> Self {
        let cache = UtilizationCache::new(config.utilization_cache_size);
        Self {
            db,
            config,
            locks: ScopeLocks::new(),
            group_locks: ScopeLocks::new(),
            cache,
        }
    }

    /// Open the database named in `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let db = Db::open(&config.database.path)?;
        Ok(Self::new(db, config.ipam.clone()))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn config(&self) -> &IpamConfig {
        &self.config
    }

    pub fn cache(&self) -> &UtilizationCache {
        &self.cache
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::Ipam;
    use ipnet::IpNet;
    use netipam_core::config::IpamConfig;
    use netipam_core::db::Db;
    use tempfile::TempDir;

    pub fn test_ipam() -> (Ipam, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Db::open(&dir.path().join("test.redb")).unwrap();
        (Ipam::new(db, IpamConfig::default()), dir)
    }

    pub fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }
}
