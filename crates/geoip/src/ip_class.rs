use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Mirrors `geometrikks/services/logparser/logparser.py::get_ip_type`'s excluded classes
/// (there expressed as `IPy.IP(ip).iptype()` string matching against a monitored-types list);
/// here as direct stdlib predicates since the standard library already covers this.
pub fn is_routable(ip: IpAddr) -> bool {
  match ip {
    IpAddr::V4(v4) => is_routable_v4(v4),
    IpAddr::V6(v6) => is_routable_v6(v6),
  }
}

fn is_routable_v4(ip: Ipv4Addr) -> bool {
  !(ip.is_private()
    || ip.is_loopback()
    || ip.is_link_local()
    || ip.is_multicast()
    || ip.is_broadcast()
    || ip.is_documentation()
    || ip.is_unspecified())
}

fn is_routable_v6(ip: Ipv6Addr) -> bool {
  // fc00::/7 is the unique-local range; not exposed as a stable stdlib predicate.
  let is_unique_local = (ip.segments()[0] & 0xfe00) == 0xfc00;
  !(ip.is_loopback() || ip.is_multicast() || ip.is_unspecified() || is_unique_local)
}
