//! 头部类（字段模式）定义
//!
//! 一个头部类是有序的字段模式列表（声明顺序即线上顺序），
//! 通过 `HeaderClassBuilder` 在注册时显式构建，构建后只读共享

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::env::HeaderEnv;
use crate::error::ProtocolError;
use crate::field::{BitField, BitGroup, CountSource, FieldKind, FieldValue, LengthSource};
use crate::header::Header;

/// 针对所属实例求值的谓词（可选字段、`parse?` 校验）
pub type Predicate = Arc<dyn Fn(&Header) -> bool + Send + Sync>;
/// 默认值生成器
pub type DefaultFn = Arc<dyn Fn(&Header) -> FieldValue + Send + Sync>;
/// 派生字段计算（长度、校验和）
pub type CalcFn = Arc<dyn Fn(&mut Header, &dyn HeaderEnv) -> Result<(), ProtocolError> + Send + Sync>;
/// 应答时交换源/目的
pub type InvertFn = Arc<dyn Fn(&mut Header) -> Result<(), ProtocolError> + Send + Sync>;

/// 字段默认值
#[derive(Clone)]
pub enum DefaultValue {
    Value(FieldValue),
    Generator(DefaultFn),
}

/// 字段选项
#[derive(Clone, Default)]
pub struct FieldOptions {
    default: Option<DefaultValue>,
    optional: Option<Predicate>,
}

impl FieldOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 静态默认值
    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    /// 针对实例求值的默认值（可引用前面已填充的字段）
    pub fn default_with(
        mut self,
        f: impl Fn(&Header) -> FieldValue + Send + Sync + 'static,
    ) -> Self {
        self.default = Some(DefaultValue::Generator(Arc::new(f)));
        self
    }

    /// 可选字段：谓词为假时序列化/反序列化都跳过该字段
    pub fn optional(mut self, f: impl Fn(&Header) -> bool + Send + Sync + 'static) -> Self {
        self.optional = Some(Arc::new(f));
        self
    }
}

/// 字段模式
#[derive(Clone)]
pub struct FieldSchema {
    name: String,
    kind: FieldKind,
    default: Option<DefaultValue>,
    optional: Option<Predicate>,
}

impl FieldSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_optional(&self) -> bool {
        self.optional.is_some()
    }

    /// 当前实例状态下该字段是否出现在线上
    pub fn is_present(&self, owner: &Header) -> bool {
        self.optional.as_ref().map_or(true, |pred| pred(owner))
    }

    /// 对（部分填充的）实例求默认值
    pub(crate) fn default_for(&self, owner: &Header) -> FieldValue {
        let value = match &self.default {
            Some(DefaultValue::Value(v)) => v.clone(),
            Some(DefaultValue::Generator(f)) => f(owner),
            None => return self.kind.zero_value(),
        };
        if self.kind.accepts(&value) {
            value
        } else {
            log::warn!(
                "default for field '{}' is a {}, expected {}; using zero value",
                self.name,
                value.type_name(),
                self.kind.type_name()
            );
            self.kind.zero_value()
        }
    }
}

impl fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSchema")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("optional", &self.optional.is_some())
            .finish()
    }
}

/// 头部类钩子
#[derive(Clone, Default)]
pub struct HeaderHooks {
    /// `parse?`：试探性反序列化后判断猜测是否正确
    pub validate: Option<Predicate>,
    pub calc_length: Option<CalcFn>,
    pub calc_checksum: Option<CalcFn>,
    pub invert: Option<InvertFn>,
}

/// 头部类
pub struct HeaderClass {
    name: String,
    fields: Vec<FieldSchema>,
    field_index: HashMap<String, usize>,
    /// 父字段索引 -> 位字段组
    bit_groups: HashMap<usize, BitGroup>,
    /// 位子字段名 -> 父字段索引
    bit_index: HashMap<String, usize>,
    body_index: Option<usize>,
    hooks: HeaderHooks,
}

impl HeaderClass {
    pub fn builder(name: &str) -> HeaderClassBuilder {
        HeaderClassBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.field_index.get(name).map(|&i| &self.fields[i])
    }

    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    /// 位子字段：(父字段索引, 子字段)
    pub fn bit_field(&self, name: &str) -> Option<(usize, &BitField)> {
        let parent = *self.bit_index.get(name)?;
        let field = self.bit_groups.get(&parent)?.get(name)?;
        Some((parent, field))
    }

    /// 某整数字段上的位字段组
    pub fn bit_group(&self, field_name: &str) -> Option<&BitGroup> {
        let index = self.field_position(field_name)?;
        self.bit_groups.get(&index)
    }

    pub fn body_index(&self) -> Option<usize> {
        self.body_index
    }

    /// 是否声明了净荷字段（能否封装下一层）
    pub fn has_body(&self) -> bool {
        self.body_index.is_some()
    }

    pub fn hooks(&self) -> &HeaderHooks {
        &self.hooks
    }

    /// 字段或位子字段是否存在
    pub fn knows(&self, name: &str) -> bool {
        self.field_index.contains_key(name) || self.bit_index.contains_key(name)
    }
}

impl fmt::Debug for HeaderClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderClass")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// 头部类构建器
///
/// 声明过程中的错误被记录下来，在 `build()` 时统一返回
pub struct HeaderClassBuilder {
    name: String,
    fields: Vec<FieldSchema>,
    bit_groups: Vec<(String, Vec<(String, u32)>)>,
    hooks: HeaderHooks,
}

impl HeaderClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            bit_groups: Vec::new(),
            hooks: HeaderHooks::default(),
        }
    }

    /// 声明字段（按线上顺序）
    pub fn define_field(mut self, name: &str, kind: FieldKind, options: FieldOptions) -> Self {
        self.fields.push(FieldSchema {
            name: name.to_string(),
            kind,
            default: options.default,
            optional: options.optional,
        });
        self
    }

    /// 无选项的字段声明
    pub fn field(self, name: &str, kind: FieldKind) -> Self {
        self.define_field(name, kind, FieldOptions::new())
    }

    /// 在整数字段上声明位字段组，子字段按MSB到LSB排列
    pub fn define_bit_group(mut self, parent: &str, specs: &[(&str, u32)]) -> Self {
        self.bit_groups.push((
            parent.to_string(),
            specs
                .iter()
                .map(|(name, width)| (name.to_string(), *width))
                .collect(),
        ));
        self
    }

    pub fn validate_with(mut self, f: impl Fn(&Header) -> bool + Send + Sync + 'static) -> Self {
        self.hooks.validate = Some(Arc::new(f));
        self
    }

    pub fn on_calc_length(
        mut self,
        f: impl Fn(&mut Header, &dyn HeaderEnv) -> Result<(), ProtocolError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.calc_length = Some(Arc::new(f));
        self
    }

    pub fn on_calc_checksum(
        mut self,
        f: impl Fn(&mut Header, &dyn HeaderEnv) -> Result<(), ProtocolError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.calc_checksum = Some(Arc::new(f));
        self
    }

    pub fn on_invert(
        mut self,
        f: impl Fn(&mut Header) -> Result<(), ProtocolError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.invert = Some(Arc::new(f));
        self
    }

    /// 校验声明并生成头部类
    pub fn build(self) -> Result<Arc<HeaderClass>, ProtocolError> {
        if self.name.is_empty() {
            return Err(ProtocolError::InvalidFieldDefinition(
                "Header class name is empty".to_string(),
            ));
        }

        let mut field_index = HashMap::new();
        for (index, field) in self.fields.iter().enumerate() {
            if field_index.insert(field.name.clone(), index).is_some() {
                return Err(self.definition_error(format!("duplicate field '{}'", field.name)));
            }
        }

        // 位字段组
        let mut bit_groups = HashMap::new();
        let mut bit_index = HashMap::new();
        for (parent, specs) in &self.bit_groups {
            let Some(&parent_index) = field_index.get(parent) else {
                return Err(self.definition_error(format!("bit group on unknown field '{parent}'")));
            };
            let FieldKind::Int { width, .. } = self.fields[parent_index].kind else {
                return Err(self.definition_error(format!(
                    "bit group parent '{parent}' is not an integer"
                )));
            };
            if bit_groups.contains_key(&parent_index) {
                return Err(self.definition_error(format!("field '{parent}' has two bit groups")));
            }
            let spec_refs: Vec<(&str, u32)> =
                specs.iter().map(|(n, w)| (n.as_str(), *w)).collect();
            let group = BitGroup::new(parent, width.bits(), &spec_refs)?;
            for bit in group.fields() {
                if field_index.contains_key(&bit.name)
                    || bit_index.insert(bit.name.clone(), parent_index).is_some()
                {
                    return Err(self.definition_error(format!("duplicate field '{}'", bit.name)));
                }
            }
            bit_groups.insert(parent_index, group);
        }

        let mut body_index = None;
        let last = self.fields.len().saturating_sub(1);
        for (index, field) in self.fields.iter().enumerate() {
            // 被引用的字段必须已在前面声明
            let declared_before = |name: &str| {
                field_index.get(name).is_some_and(|&i| i < index)
                    || bit_index.get(name).is_some_and(|&i| i < index)
            };

            if let FieldKind::Body(_) = field.kind {
                if body_index.replace(index).is_some() {
                    return Err(self.definition_error("more than one body field".to_string()));
                }
            }

            let mut sources: Vec<&LengthSource> = Vec::new();
            match &field.kind {
                FieldKind::Bytes(length) | FieldKind::Body(length) => sources.push(length),
                FieldKind::Array { element, count } => {
                    if matches!(element.as_ref(), FieldKind::Body(_) | FieldKind::Array { .. }) {
                        return Err(self.definition_error(format!(
                            "array '{}' has an unsupported element type",
                            field.name
                        )));
                    }
                    match count {
                        CountSource::Counter(counter) => {
                            if !declared_before(counter) {
                                return Err(self.definition_error(format!(
                                    "array '{}' counts with '{}' which is not declared before it",
                                    field.name, counter
                                )));
                            }
                        }
                        CountSource::Budget(length) => sources.push(length),
                    }
                }
                _ => {}
            }
            for source in sources {
                match source {
                    LengthSource::Rest if index != last => {
                        return Err(self.definition_error(format!(
                            "field '{}' consumes the rest of the buffer but is not last",
                            field.name
                        )));
                    }
                    LengthSource::Field(name) if !declared_before(name) => {
                        return Err(self.definition_error(format!(
                            "field '{}' takes its length from '{}' which is not declared before it",
                            field.name, name
                        )));
                    }
                    _ => {}
                }
            }

            if let Some(DefaultValue::Value(value)) = &field.default {
                if !field.kind.accepts(value) {
                    return Err(self.definition_error(format!(
                        "default for '{}' is a {}, expected {}",
                        field.name,
                        value.type_name(),
                        field.kind.type_name()
                    )));
                }
            }
        }

        let names: HashSet<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        log::trace!("built header class {} with fields {:?}", self.name, names);

        Ok(Arc::new(HeaderClass {
            name: self.name,
            fields: self.fields,
            field_index,
            bit_groups,
            bit_index,
            body_index,
            hooks: self.hooks,
        }))
    }

    fn definition_error(&self, msg: String) -> ProtocolError {
        ProtocolError::InvalidFieldDefinition(format!("{}: {}", self.name, msg))
    }
}
