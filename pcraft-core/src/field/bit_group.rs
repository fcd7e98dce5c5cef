//! 位字段组
//!
//! 把一个整数字段按比特拆成若干命名子字段（MSB在前），
//! 子字段的读写只做掩码和移位，不影响其他比特

use crate::error::ProtocolError;

/// 单个位子字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField {
    pub name: String,
    /// 比特宽度
    pub width: u32,
    /// 相对父整数最低位的偏移
    pub shift: u32,
}

impl BitField {
    /// 1比特子字段按布尔值访问
    pub fn is_flag(&self) -> bool {
        self.width == 1
    }

    pub fn mask(&self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// 从父整数中取出本子字段
    pub fn extract(&self, parent: u64) -> u64 {
        (parent >> self.shift) & self.mask()
    }

    /// 写入本子字段，超出宽度的比特被静默截掉
    pub fn insert(&self, parent: u64, value: u64) -> u64 {
        let mask = self.mask() << self.shift;
        (parent & !mask) | ((value & self.mask()) << self.shift)
    }
}

/// 位字段组
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitGroup {
    parent: String,
    fields: Vec<BitField>,
}

impl BitGroup {
    /// 创建位字段组
    ///
    /// # 参数
    /// - `parent`: 父整数字段名
    /// - `parent_bits`: 父整数的比特宽度
    /// - `specs`: 子字段（名称, 宽度），按MSB到LSB的顺序
    ///
    /// # 返回
    /// - `Err(ProtocolError)`: 宽度为0或宽度之和不等于父宽度
    pub fn new(parent: &str, parent_bits: u32, specs: &[(&str, u32)]) -> Result<Self, ProtocolError> {
        let total: u32 = specs.iter().map(|(_, width)| *width).sum();
        if total != parent_bits {
            return Err(ProtocolError::InvalidFieldDefinition(format!(
                "Bit group on '{parent}' covers {total} bits, parent has {parent_bits}"
            )));
        }

        let mut fields = Vec::with_capacity(specs.len());
        let mut remaining = parent_bits;
        for (name, width) in specs {
            if *width == 0 {
                return Err(ProtocolError::InvalidFieldDefinition(format!(
                    "Bit field '{name}' on '{parent}' has zero width"
                )));
            }
            remaining -= width;
            fields.push(BitField {
                name: name.to_string(),
                width: *width,
                shift: remaining,
            });
        }

        Ok(Self {
            parent: parent.to_string(),
            fields,
        })
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn fields(&self) -> &[BitField] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&BitField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// 把各子字段的值按声明顺序拼成父整数
    pub fn compose(&self, values: &[u64]) -> u64 {
        self.fields
            .iter()
            .zip(values)
            .fold(0u64, |acc, (field, value)| field.insert(acc, *value))
    }
}
