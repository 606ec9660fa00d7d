//! SSRF guard (C2/C4): reject loopback, link-local, private, multicast,
//! reserved, and unspecified addresses. Stable Rust does not expose
//! `IpAddr::is_global()`, so the relevant RFC ranges are checked by hand.
//! Applied to both evidence-fetch URLs and acquisition download URLs, and
//! re-applied to every redirect hop.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::KernelError;

pub fn assert_globally_routable(ip: IpAddr) -> Result<(), KernelError> {
    if is_globally_routable(ip) {
        Ok(())
    } else {
        Err(KernelError::PrivateAddress(ip))
    }
}

pub fn is_globally_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_v4_global(v4),
        IpAddr::V6(v6) => is_v6_global(v6),
    }
}

fn is_v4_global(ip: Ipv4Addr) -> bool {
    if ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_documentation()
    {
        return false;
    }
    let o = ip.octets();
    // 100.64.0.0/10 carrier-grade NAT
    if o[0] == 100 && (o[1] & 0b1100_0000) == 0b0100_0000 {
        return false;
    }
    // 192.0.0.0/24 IETF protocol assignments
    if o[0] == 192 && o[1] == 0 && o[2] == 0 {
        return false;
    }
    // 192.88.99.0/24 6to4 relay anycast
    if o[0] == 192 && o[1] == 88 && o[2] == 99 {
        return false;
    }
    // 198.18.0.0/15 benchmarking
    if o[0] == 198 && (o[1] == 18 || o[1] == 19) {
        return false;
    }
    // 240.0.0.0/4 reserved (includes 255.255.255.255 already caught by is_broadcast)
    if o[0] >= 240 {
        return false;
    }
    true
}

fn is_v6_global(ip: Ipv6Addr) -> bool {
    if ip.is_unspecified() || ip.is_loopback() || ip.is_multicast() {
        return false;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_v4_global(v4);
    }
    let seg0 = ip.segments()[0];
    // fc00::/7 unique local
    if (seg0 & 0xfe00) == 0xfc00 {
        return false;
    }
    // fe80::/10 link-local
    if (seg0 & 0xffc0) == 0xfe80 {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_rejected() {
        assert!(assert_globally_routable("127.0.0.1".parse().unwrap()).is_err());
        assert!(assert_globally_routable("::1".parse().unwrap()).is_err());
    }

    #[test]
    fn private_ranges_rejected() {
        for s in ["10.0.0.1", "172.16.0.5", "192.168.1.1", "169.254.1.1", "100.64.0.1"] {
            assert!(assert_globally_routable(s.parse().unwrap()).is_err(), "{s} should be rejected");
        }
    }

    #[test]
    fn multicast_and_reserved_rejected() {
        assert!(assert_globally_routable("224.0.0.1".parse().unwrap()).is_err());
        assert!(assert_globally_routable("240.0.0.1".parse().unwrap()).is_err());
        assert!(assert_globally_routable("0.0.0.0".parse().unwrap()).is_err());
    }

    #[test]
    fn public_addresses_accepted() {
        assert!(assert_globally_routable("93.184.216.34".parse().unwrap()).is_ok());
        assert!(assert_globally_routable("8.8.8.8".parse().unwrap()).is_ok());
    }

    #[test]
    fn redirect_to_private_ip_rejected() {
        let redirect_target: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(assert_globally_routable(redirect_target).is_err());
    }
}
