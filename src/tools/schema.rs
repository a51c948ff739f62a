//! 动作参数 JSON Schema（schemars 自动生成）
//!
//! 每个动作的参数结构派生 JsonSchema，生成的 schema 随 HandlerContext 交给推理后端。

use schemars::{schema_for, JsonSchema};
use serde::Serialize;
use serde_json::Value;

/// 推理后端看到的动作描述
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 生成参数 schema；去掉顶层 $schema / title 以贴合 function calling 的格式
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::handler::ToBookExcursion;

    #[test]
    fn test_parameters_schema_lists_required_fields() {
        let schema = parameters_schema::<ToBookExcursion>();
        assert_eq!(schema["type"], "object");
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"location"));
        assert!(required.contains(&"request"));
        assert!(schema.get("$schema").is_none());
    }
}
