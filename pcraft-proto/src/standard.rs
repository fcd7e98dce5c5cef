//! 标准协议注册表
//!
//! 登记顺序同时是首层头部猜测顺序

use std::sync::Arc;

use lazy_static::lazy_static;
use pcraft_bind::{BindingGroup, BindingRegistry, BindingRule};
use pcraft_core::ProtocolError;

use crate::inet::{icmp, igmp, ipv4, ICMP, IGMP, IPV4, PROTO_ICMP, PROTO_IGMP, PROTO_TCP, PROTO_UDP};
use crate::inet6::{ipv6, IPV6};
use crate::l2::{
    arp, dot1q, ethernet, ARP, DOT1Q, ETHERNET, ETHERTYPE_ARP, ETHERTYPE_DOT1Q, ETHERTYPE_IPV4,
    ETHERTYPE_IPV6,
};
use crate::transport::{tcp, tcp_option, udp, TCP, UDP};

/// pcap 链路层类型
pub const LINKTYPE_ETHERNET: u32 = 1;
pub const LINKTYPE_RAW: u32 = 101;

lazy_static! {
    static ref STANDARD: Result<Arc<BindingRegistry>, ProtocolError> = build_registry().map(Arc::new);
}

/// 共享的标准注册表，首次调用时构建
pub fn registry() -> Result<Arc<BindingRegistry>, ProtocolError> {
    STANDARD.clone()
}

/// 构建一份新的标准注册表，调用者可以继续登记自己的头部类与绑定
pub fn build_registry() -> Result<BindingRegistry, ProtocolError> {
    let mut registry = BindingRegistry::new();
    let option = tcp_option()?;

    for class in [ethernet()?, dot1q()?, arp()?, ipv4()?, ipv6()?, icmp()?, igmp()?, tcp(&option)?, udp()?] {
        registry.register(class)?;
    }
    registry.register(option)?;

    for container in [ETHERNET, DOT1Q] {
        registry.bind(container, IPV4, BindingRule::equals("type", ETHERTYPE_IPV4))?;
        registry.bind(container, ARP, BindingRule::equals("type", ETHERTYPE_ARP))?;
        registry.bind(container, DOT1Q, BindingRule::equals("type", ETHERTYPE_DOT1Q))?;
        registry.bind(container, IPV6, BindingRule::equals("type", ETHERTYPE_IPV6))?;
    }

    registry.bind(IPV4, ICMP, BindingRule::equals("proto", PROTO_ICMP))?;
    // IGMP 报文不分片且 TTL 固定为 1
    registry.bind(
        IPV4,
        IGMP,
        BindingGroup::equals(&[("proto", PROTO_IGMP), ("frag", 0), ("ttl", 1)]),
    )?;
    registry.bind(IPV4, TCP, BindingRule::equals("proto", PROTO_TCP))?;
    registry.bind(IPV4, UDP, BindingRule::equals("proto", PROTO_UDP))?;

    registry.bind(IPV6, TCP, BindingRule::equals("nh", PROTO_TCP))?;
    registry.bind(IPV6, UDP, BindingRule::equals("nh", PROTO_UDP))?;

    registry.bind_linktype(LINKTYPE_ETHERNET, ETHERNET)?;
    registry.bind_linktype(LINKTYPE_RAW, IPV4)?;

    log::debug!("standard registry built with {} header classes", registry.classes().len());
    Ok(registry)
}
