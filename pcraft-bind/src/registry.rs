//! 绑定注册表
//!
//! 登记头部类以及 (容器类, 候选类) -> 规则组集合 的映射。
//! 候选类按登记顺序排列，多个候选同时匹配时先登记者胜出

use std::collections::HashMap;
use std::sync::Arc;

use pcraft_core::{Header, HeaderClass, ProtocolError};

use crate::rule::{BindingGroup, BindingGroupSet};

/// 绑定注册表
#[derive(Debug, Default)]
pub struct BindingRegistry {
    /// 登记顺序即首层猜测顺序
    classes: Vec<Arc<HeaderClass>>,
    class_index: HashMap<String, usize>,
    /// 容器类名 -> [(候选类名, 规则组集合)]，保持登记顺序
    bindings: HashMap<String, Vec<(String, BindingGroupSet)>>,
    linktypes: HashMap<u32, String>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记头部类，同名类只能登记一次
    pub fn register(&mut self, class: Arc<HeaderClass>) -> Result<(), ProtocolError> {
        if self.class_index.contains_key(class.name()) {
            return Err(ProtocolError::InvalidFieldDefinition(format!(
                "Header class '{}' registered twice",
                class.name()
            )));
        }
        log::debug!("registering header class {}", class.name());
        self.class_index
            .insert(class.name().to_string(), self.classes.len());
        self.classes.push(class);
        Ok(())
    }

    pub fn class(&self, name: &str) -> Option<&Arc<HeaderClass>> {
        self.class_index.get(name).map(|&i| &self.classes[i])
    }

    /// 按名称查找，不存在时返回 `UnknownClass`
    pub fn require_class(&self, name: &str) -> Result<&Arc<HeaderClass>, ProtocolError> {
        self.class(name)
            .ok_or_else(|| ProtocolError::UnknownClass(name.to_string()))
    }

    /// 按登记顺序的全部头部类
    pub fn classes(&self) -> &[Arc<HeaderClass>] {
        &self.classes
    }

    /// 为 (容器, 候选) 追加一个规则组；重复调用累加为“或”的关系
    ///
    /// # 参数
    /// - `container`: 容器头部类名，必须声明了净荷字段
    /// - `candidate`: 候选的下一层头部类名
    /// - `group`: 规则组
    pub fn bind(
        &mut self,
        container: &str,
        candidate: &str,
        group: impl Into<BindingGroup>,
    ) -> Result<(), ProtocolError> {
        let container_class = self.require_class(container)?;
        if !container_class.has_body() {
            return Err(ProtocolError::NotEncapsulating(container.to_string()));
        }
        self.require_class(candidate)?;

        let entries = self.bindings.entry(container.to_string()).or_default();
        let group = group.into();
        log::trace!("bind {container} -> {candidate}: {:?}", group.rules());
        match entries.iter_mut().find(|(name, _)| name == candidate) {
            Some((_, set)) => set.push(group),
            None => {
                let mut set = BindingGroupSet::default();
                set.push(group);
                entries.push((candidate.to_string(), set));
            }
        }
        Ok(())
    }

    /// (容器, 候选) 之间的规则组集合
    pub fn binding(&self, container: &str, candidate: &str) -> Option<&BindingGroupSet> {
        self.bindings
            .get(container)?
            .iter()
            .find(|(name, _)| name == candidate)
            .map(|(_, set)| set)
    }

    /// 容器类的全部候选类（登记顺序）
    pub fn candidates(&self, container: &str) -> Vec<&Arc<HeaderClass>> {
        self.bindings
            .get(container)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|(name, _)| self.class(name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 根据容器实例的字段值选出下一层头部类
    ///
    /// # 返回
    /// 第一个规则组集合成立的候选类；没有候选匹配时返回 `None`（不是错误）
    pub fn resolve_next_class(&self, container: &Header) -> Option<&Arc<HeaderClass>> {
        let entries = self.bindings.get(container.class_name())?;
        let found = entries
            .iter()
            .find(|(_, set)| set.matches(container))
            .and_then(|(name, _)| self.class(name));
        match found {
            Some(class) => log::trace!("{} -> {}", container.class_name(), class.name()),
            None => log::trace!("{} -> no candidate", container.class_name()),
        }
        found
    }

    /// 构造方向：把候选类嵌入容器时，按绑定规则设置容器字段
    ///
    /// # 返回
    /// - `Err(ProtocolError::NoBinding)`: 两个类之间没有登记绑定
    pub fn apply_defaults(&self, container: &mut Header, candidate: &str) -> Result<(), ProtocolError> {
        let set = self
            .binding(container.class_name(), candidate)
            .ok_or_else(|| ProtocolError::NoBinding {
                container: container.class_name().to_string(),
                candidate: candidate.to_string(),
            })?;
        match set.select_for(container) {
            Some(group) => group.apply(container),
            None => Ok(()),
        }
    }

    /// 登记链路层类型对应的首层头部类
    pub fn bind_linktype(&mut self, linktype: u32, class: &str) -> Result<(), ProtocolError> {
        self.require_class(class)?;
        self.linktypes.insert(linktype, class.to_string());
        Ok(())
    }

    pub fn class_for_linktype(&self, linktype: u32) -> Result<&Arc<HeaderClass>, ProtocolError> {
        self.linktypes
            .get(&linktype)
            .and_then(|name| self.class(name))
            .ok_or(ProtocolError::UnknownLinkType(linktype))
    }
}
