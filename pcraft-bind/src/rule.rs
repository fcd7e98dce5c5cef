//! 绑定规则
//!
//! 规则组内各规则取与，同一对头部类的多个规则组取或

use std::fmt;
use std::sync::Arc;

use pcraft_core::{Header, ProtocolError};

/// 对字段当前值的检查
#[derive(Clone)]
pub enum Check {
    Equals(u64),
    Predicate(Arc<dyn Fn(u64) -> bool + Send + Sync>),
}

impl Check {
    pub fn test(&self, value: u64) -> bool {
        match self {
            Check::Equals(expected) => value == *expected,
            Check::Predicate(f) => f(value),
        }
    }
}

/// 构造方向上对字段的设置
#[derive(Clone)]
pub enum Setter {
    Literal(u64),
    /// 由字段原值生成新值
    Generator(Arc<dyn Fn(u64) -> u64 + Send + Sync>),
}

impl Setter {
    pub fn value(&self, previous: u64) -> u64 {
        match self {
            Setter::Literal(v) => *v,
            Setter::Generator(f) => f(previous),
        }
    }
}

pub type ProcCheck = Arc<dyn Fn(&Header) -> bool + Send + Sync>;
pub type ProcSet = Arc<dyn Fn(&mut Header) -> Result<(), ProtocolError> + Send + Sync>;

/// 绑定规则：单字段的检查/设置，或作用于整个容器头部的过程对
#[derive(Clone)]
pub enum BindingRule {
    Field {
        field: String,
        check: Check,
        set: Setter,
    },
    Proc {
        check: ProcCheck,
        set: ProcSet,
    },
}

impl BindingRule {
    /// `field == value`，构造时设置为 `value`
    pub fn equals(field: &str, value: u64) -> Self {
        BindingRule::Field {
            field: field.to_string(),
            check: Check::Equals(value),
            set: Setter::Literal(value),
        }
    }

    pub fn field(field: &str, check: Check, set: Setter) -> Self {
        BindingRule::Field {
            field: field.to_string(),
            check,
            set,
        }
    }

    /// 谓词检查，构造时用生成器设置
    pub fn predicate(
        field: &str,
        check: impl Fn(u64) -> bool + Send + Sync + 'static,
        set: impl Fn(u64) -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self::field(
            field,
            Check::Predicate(Arc::new(check)),
            Setter::Generator(Arc::new(set)),
        )
    }

    /// 跨字段条件
    pub fn proc(
        check: impl Fn(&Header) -> bool + Send + Sync + 'static,
        set: impl Fn(&mut Header) -> Result<(), ProtocolError> + Send + Sync + 'static,
    ) -> Self {
        BindingRule::Proc {
            check: Arc::new(check),
            set: Arc::new(set),
        }
    }

    /// 规则在容器当前状态下是否成立；字段不存在视为不成立
    pub fn matches(&self, container: &Header) -> bool {
        match self {
            BindingRule::Field { field, check, .. } => container
                .uint(field)
                .map(|value| check.test(value))
                .unwrap_or(false),
            BindingRule::Proc { check, .. } => check(container),
        }
    }

    /// 构造方向：修改容器使规则成立
    pub fn apply(&self, container: &mut Header) -> Result<(), ProtocolError> {
        match self {
            BindingRule::Field { field, set, .. } => {
                let previous = container.uint(field)?;
                container.set_uint(field, set.value(previous))
            }
            BindingRule::Proc { set, .. } => set(container),
        }
    }
}

impl fmt::Debug for BindingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingRule::Field {
                field,
                check: Check::Equals(v),
                ..
            } => write!(f, "{field} == {v:#x}"),
            BindingRule::Field { field, .. } => write!(f, "{field} ~ <predicate>"),
            BindingRule::Proc { .. } => write!(f, "<proc>"),
        }
    }
}

/// 规则组（与）
#[derive(Debug, Clone, Default)]
pub struct BindingGroup {
    rules: Vec<BindingRule>,
}

impl BindingGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, rule: BindingRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// 一组 `field == value` 条件
    pub fn equals(pairs: &[(&str, u64)]) -> Self {
        Self {
            rules: pairs
                .iter()
                .map(|(field, value)| BindingRule::equals(field, *value))
                .collect(),
        }
    }

    pub fn rules(&self) -> &[BindingRule] {
        &self.rules
    }

    pub fn matches(&self, container: &Header) -> bool {
        self.rules.iter().all(|rule| rule.matches(container))
    }

    pub fn apply(&self, container: &mut Header) -> Result<(), ProtocolError> {
        for rule in &self.rules {
            rule.apply(container)?;
        }
        Ok(())
    }
}

impl From<BindingRule> for BindingGroup {
    fn from(rule: BindingRule) -> Self {
        Self { rules: vec![rule] }
    }
}

/// 一对头部类之间登记的全部规则组（或）
#[derive(Debug, Clone, Default)]
pub struct BindingGroupSet {
    groups: Vec<BindingGroup>,
}

impl BindingGroupSet {
    pub fn push(&mut self, group: BindingGroup) {
        self.groups.push(group);
    }

    pub fn groups(&self) -> &[BindingGroup] {
        &self.groups
    }

    pub fn matches(&self, container: &Header) -> bool {
        self.groups.iter().any(|group| group.matches(container))
    }

    /// 选出构造时要应用的规则组：
    /// 优先选应用后能使检查成立的第一个组，否则取第一个组
    pub fn select_for(&self, container: &Header) -> Option<&BindingGroup> {
        self.groups
            .iter()
            .find(|group| {
                let mut trial = container.clone();
                group.apply(&mut trial).is_ok() && group.matches(&trial)
            })
            .or_else(|| self.groups.first())
    }
}
