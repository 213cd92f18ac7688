//! Free-space and utilization arithmetic over address blocks and VID ranges.

pub mod availability;
pub mod cache;
pub mod utilization;

pub use availability::{Block, GapEntry, Host, IpSlot, VlanSlot};
pub use cache::{UtilizationCache, UtilizationKey};
