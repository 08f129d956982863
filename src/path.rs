//! 字段路径工具
//!
//! 点号分隔路径在嵌套 JSON 中读写值，缺失与 null 是可区分的两种结果。

use serde_json::{Map, Value};

/// 按路径读取值
///
/// 路径中途遇到不可寻址的值（含 null）或字段缺失时返回 `None`。
/// 数组按数字索引访问，如 "items.0.name"。
pub fn get_path<'a>(root: &'a Value, field_path: &str) -> Option<&'a Value> {
    if field_path.is_empty() {
        return None;
    }

    let mut current = root;
    for part in field_path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// 按路径写入值，路径不存在时自动创建中间对象
///
/// 中间值不是对象时会被替换为空对象；根不是对象时为空操作。
pub fn set_path(root: &mut Value, field_path: &str, value: Value) {
    if field_path.is_empty() {
        return;
    }

    let mut parts: Vec<&str> = field_path.split('.').collect();
    let Some(last) = parts.pop() else { return };

    let mut current = root;
    for part in parts {
        let Value::Object(map) = current else { return };
        let entry = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry;
    }

    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}
