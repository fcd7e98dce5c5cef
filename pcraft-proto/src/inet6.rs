//! IPv6 基本头部

use std::sync::Arc;

use pcraft_core::{set_length_field, FieldKind, FieldOptions, HeaderClass, ProtocolError};

use crate::inet::ip_proto;
use crate::l2::swap_fields;

pub const IPV6: &str = "IPv6";

fn loopback() -> [u8; 16] {
    let mut addr = [0u8; 16];
    addr[15] = 1;
    addr
}

pub fn ipv6() -> Result<Arc<HeaderClass>, ProtocolError> {
    HeaderClass::builder(IPV6)
        .define_field("vtf", FieldKind::uint32(), FieldOptions::new().default_value(0x6000_0000u32))
        .define_bit_group("vtf", &[("version", 4), ("tc", 8), ("fl", 20)])
        .field("plen", FieldKind::uint16())
        .define_field("nh", ip_proto(), FieldOptions::new().default_value(59u8))
        .define_field("hlim", FieldKind::uint8(), FieldOptions::new().default_value(64u8))
        .define_field("src", FieldKind::fixed_bytes(16), FieldOptions::new().default_value(loopback()))
        .define_field("dst", FieldKind::fixed_bytes(16), FieldOptions::new().default_value(loopback()))
        .field("payload", FieldKind::body())
        .validate_with(|h| h.uint("version").ok() == Some(6))
        .on_calc_length(|h, env| {
            let len = env.body_bytes(h).len();
            set_length_field(h, "plen", len)
        })
        .on_invert(|h| swap_fields(h, "src", "dst"))
        .build()
}
