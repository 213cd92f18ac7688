//! Canonical forms applied to a record before it is validated and stored.

use netipam_core::addr::range_size;
use netipam_core::types::{Aggregate, IpAddress, IpRange, Prefix};

pub fn aggregate(agg: &mut Aggregate) {
    agg.prefix = agg.prefix.trunc();
}

pub fn prefix(prefix: &mut Prefix) {
    prefix.prefix = prefix.prefix.trunc();
}

/// Record the range's size; ranges that do not validate keep a size of 0.
pub fn ip_range(range: &mut IpRange) {
    range.size = range_size(range.start(), range.end())
        .ok()
        .and_then(|size| u64::try_from(size).ok())
        .unwrap_or(0);
}

pub fn ip_address(ip: &mut IpAddress) {
    ip.dns_name = ip.dns_name.trim().to_lowercase();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_bits_cleared() {
        let mut p = Prefix::new("10.1.2.3/16".parse().unwrap(), None);
        prefix(&mut p);
        assert_eq!(p.prefix.to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_range_size_and_dns_name() {
        let mut r = IpRange::new("192.0.2.10/24".parse().unwrap(), "192.0.2.20/24".parse().unwrap(), None);
        ip_range(&mut r);
        assert_eq!(r.size, 11);

        let mut backwards = IpRange::new("192.0.2.20/24".parse().unwrap(), "192.0.2.10/24".parse().unwrap(), None);
        ip_range(&mut backwards);
        assert_eq!(backwards.size, 0);

        let mut ip = IpAddress::new("192.0.2.1/24".parse().unwrap(), None);
        ip.dns_name = "Router1.Example.COM".into();
        ip_address(&mut ip);
        assert_eq!(ip.dns_name, "router1.example.com");
    }
}
