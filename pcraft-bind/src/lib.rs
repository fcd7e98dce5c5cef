//! pcraft 绑定注册表
//!
//! 声明式的绑定规则把容器头部的字段状态映射到下一层头部类，
//! 同时用于自动解析与构造时的字段自动设置

pub mod registry;
pub mod rule;

pub use registry::BindingRegistry;
pub use rule::{BindingGroup, BindingGroupSet, BindingRule, Check, ProcCheck, ProcSet, Setter};
