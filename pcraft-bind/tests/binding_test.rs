//! 绑定注册表集成测试
//!
//! 验证规则组的或/与语义、解析的确定性以及构造方向的字段设置

use std::sync::Arc;

use pcraft_bind::{BindingGroup, BindingRegistry, BindingRule};
use pcraft_core::{FieldKind, FieldOptions, Header, HeaderClass};

fn ip_class() -> Arc<HeaderClass> {
    HeaderClass::builder("IPish")
        .define_field("ttl", FieldKind::uint8(), FieldOptions::new().default_value(64u8))
        .field("proto", FieldKind::uint8())
        .field("frag", FieldKind::uint16())
        .define_bit_group("frag", &[("flags", 3), ("offset", 13)])
        .field("payload", FieldKind::body())
        .build()
        .unwrap()
}

fn leaf(name: &str) -> Arc<HeaderClass> {
    HeaderClass::builder(name)
        .field("type", FieldKind::uint8())
        .field("payload", FieldKind::body())
        .build()
        .unwrap()
}

fn registry() -> BindingRegistry {
    let mut registry = BindingRegistry::new();
    registry.register(ip_class()).unwrap();
    registry.register(leaf("Igmpish")).unwrap();
    registry.register(leaf("Tcpish")).unwrap();
    registry.register(leaf("Raw")).unwrap();

    registry
        .bind(
            "IPish",
            "Igmpish",
            BindingGroup::equals(&[("proto", 2), ("offset", 0), ("ttl", 1)]),
        )
        .unwrap();
    // 两个规则组：第一组要求ttl为0但不会设置它
    registry
        .bind(
            "IPish",
            "Tcpish",
            BindingGroup::new()
                .with(BindingRule::equals("proto", 6))
                .with(BindingRule::predicate("ttl", |v| v == 0, |v| v)),
        )
        .unwrap();
    registry
        .bind("IPish", "Tcpish", BindingRule::equals("proto", 6))
        .unwrap();
    registry
        .bind(
            "IPish",
            "Raw",
            BindingRule::proc(
                |h: &Header| h.uint("proto").unwrap_or(0) >= 200,
                |h: &mut Header| h.set_uint("proto", 253),
            ),
        )
        .unwrap();
    registry
}

fn ip_with(registry: &BindingRegistry, proto: u64, ttl: u64) -> Header {
    let mut header = registry.class("IPish").unwrap().new_instance();
    header.set_uint("proto", proto).unwrap();
    header.set_uint("ttl", ttl).unwrap();
    header
}

#[test]
fn test_or_across_groups() {
    let registry = registry();
    let header = ip_with(&registry, 6, 64);
    // 第一组要求ttl==0不成立，第二组成立
    assert_eq!(registry.resolve_next_class(&header).unwrap().name(), "Tcpish");
}

#[test]
fn test_and_within_group() {
    let registry = registry();

    // 1. protocol=2 且 ttl=1 时是 IGMP
    let header = ip_with(&registry, 2, 1);
    assert_eq!(registry.resolve_next_class(&header).unwrap().name(), "Igmpish");

    // 2. ttl=64 时不是
    let header = ip_with(&registry, 2, 64);
    assert!(registry.resolve_next_class(&header).is_none());

    // 3. 分片偏移非零时也不是
    let mut header = ip_with(&registry, 2, 1);
    header.set_uint("offset", 3).unwrap();
    assert!(registry.resolve_next_class(&header).is_none());
}

#[test]
fn test_resolution_is_deterministic() {
    let registry = registry();
    for proto in [0u64, 2, 6, 17, 200, 255] {
        let header = ip_with(&registry, proto, 1);
        let first = registry.resolve_next_class(&header).map(|c| c.name().to_string());
        let second = registry.resolve_next_class(&header).map(|c| c.name().to_string());
        assert_eq!(first, second, "proto {proto}");
    }
}

#[test]
fn test_proc_rule_participates_in_order() {
    let registry = registry();
    let header = ip_with(&registry, 210, 64);
    assert_eq!(registry.resolve_next_class(&header).unwrap().name(), "Raw");
}

#[test]
fn test_apply_defaults_sets_container_fields() {
    let registry = registry();

    // 嵌入IGMP：protocol/offset/ttl全部被设置
    let mut header = ip_with(&registry, 0, 64);
    header.set_uint("offset", 9).unwrap();
    header.set_uint("flags", 2).unwrap();
    registry.apply_defaults(&mut header, "Igmpish").unwrap();
    assert_eq!(header.uint("proto").unwrap(), 2);
    assert_eq!(header.uint("ttl").unwrap(), 1);
    assert_eq!(header.uint("offset").unwrap(), 0);
    assert_eq!(header.uint("flags").unwrap(), 2);
    assert_eq!(registry.resolve_next_class(&header).unwrap().name(), "Igmpish");

    // 嵌入TCP：跳过设置后仍不成立的第一组，选用第二组，ttl保持不变
    let mut header = ip_with(&registry, 0, 64);
    registry.apply_defaults(&mut header, "Tcpish").unwrap();
    assert_eq!(header.uint("proto").unwrap(), 6);
    assert_eq!(header.uint("ttl").unwrap(), 64);

    // 过程规则
    let mut header = ip_with(&registry, 0, 64);
    registry.apply_defaults(&mut header, "Raw").unwrap();
    assert_eq!(header.uint("proto").unwrap(), 253);
}
