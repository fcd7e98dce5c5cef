//! pcraft 标准协议
//!
//! 以太网、802.1Q、ARP、IPv4/IPv6、ICMP、IGMP、TCP、UDP 的头部类，
//! 以及把它们串起来的标准绑定注册表

pub mod inet;
pub mod inet6;
pub mod l2;
pub mod standard;
pub mod transport;

pub use standard::{build_registry, registry, LINKTYPE_ETHERNET, LINKTYPE_RAW};
