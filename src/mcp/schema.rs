//! 工具参数 Schema 与校验
//!
//! 每个工具声明一份 ArgumentSchema（字段名、类型、必填、默认值）；
//! 调度前由 validate_and_fill 做纯函数校验（同样输入必得同样结果），
//! 不合法的参数在发往工具服务器之前即被拒绝。to_json_schema 渲染为
//! OpenAI tools 所需的 JSON Schema 对象。

use serde_json::{json, Map, Value};

/// 参数类型（工具参数只允许这几类标量）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Number,
    Integer,
    Boolean,
}

impl ArgKind {
    fn as_str(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Number => "number",
            ArgKind::Integer => "integer",
            ArgKind::Boolean => "boolean",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ArgKind::String => value.is_string(),
            // integer 字面量也是合法的 number
            ArgKind::Number => value.is_number(),
            ArgKind::Integer => value.is_i64() || value.is_u64(),
            ArgKind::Boolean => value.is_boolean(),
        }
    }
}

/// 单个参数字段声明
#[derive(Clone, Debug)]
pub struct ArgField {
    pub name: String,
    pub kind: ArgKind,
    pub description: String,
    pub required: bool,
    /// 可选参数缺省时填入的默认值
    pub default: Option<Value>,
}

/// 工具参数 schema：有序字段集合
#[derive(Clone, Debug, Default)]
pub struct ArgumentSchema {
    fields: Vec<ArgField>,
}

impl ArgumentSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: ArgKind, description: &str) -> Self {
        self.fields.push(ArgField {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
            default: None,
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: ArgKind, description: &str, default: Value) -> Self {
        self.fields.push(ArgField {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: false,
            default: Some(default),
        });
        self
    }

    pub fn fields(&self) -> &[ArgField] {
        &self.fields
    }

    /// 校验 args 并补齐默认值，返回规范化后的参数对象
    ///
    /// 拒绝：非对象载荷、缺失的必填字段、类型不匹配的字段。
    /// 未声明的多余字段原样保留（工具端自行忽略）。
    pub fn validate_and_fill(&self, args: &Value) -> Result<Value, String> {
        let obj = args
            .as_object()
            .ok_or_else(|| "arguments must be a JSON object".to_string())?;

        let mut filled = Map::new();
        for field in &self.fields {
            match obj.get(&field.name) {
                Some(v) => {
                    if !field.kind.matches(v) {
                        return Err(format!(
                            "argument '{}' must be a {}",
                            field.name,
                            field.kind.as_str()
                        ));
                    }
                    filled.insert(field.name.clone(), v.clone());
                }
                None if field.required => {
                    return Err(format!("missing required argument '{}'", field.name));
                }
                None => {
                    if let Some(default) = &field.default {
                        filled.insert(field.name.clone(), default.clone());
                    }
                }
            }
        }

        // 保留未声明字段
        for (k, v) in obj {
            filled.entry(k.clone()).or_insert_with(|| v.clone());
        }

        Ok(Value::Object(filled))
    }

    /// 渲染为 JSON Schema（OpenAI tools 的 parameters 字段格式）
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(field.kind.as_str()));
            prop.insert("description".into(), json!(field.description));
            if let Some(default) = &field.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(field.name.clone(), Value::Object(prop));
            if field.required {
                required.push(json!(field.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solar_schema() -> ArgumentSchema {
        ArgumentSchema::new()
            .required("rm", ArgKind::Number, "Monthly bill in RM")
            .optional(
                "morning_usage_percentage",
                ArgKind::Number,
                "Percentage of usage in morning",
                json!(30.0),
            )
    }

    #[test]
    fn test_validate_fills_defaults() {
        let schema = solar_schema();
        let filled = schema.validate_and_fill(&json!({"rm": 600})).unwrap();
        assert_eq!(filled["rm"], 600);
        assert_eq!(filled["morning_usage_percentage"], 30.0);
    }

    #[test]
    fn test_missing_required_rejected() {
        let schema = solar_schema();
        let err = schema.validate_and_fill(&json!({})).unwrap_err();
        assert!(err.contains("rm"));
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let schema = solar_schema();
        let err = schema
            .validate_and_fill(&json!({"rm": "six hundred"}))
            .unwrap_err();
        assert!(err.contains("number"));
    }

    #[test]
    fn test_non_object_rejected() {
        let schema = solar_schema();
        assert!(schema.validate_and_fill(&json!([600])).is_err());
        assert!(schema.validate_and_fill(&json!("rm=600")).is_err());
    }

    #[test]
    fn test_validation_is_pure() {
        // 同样的输入多次校验结果一致
        let schema = solar_schema();
        let args = json!({"rm": 600, "extra": "kept"});
        let first = schema.validate_and_fill(&args).unwrap();
        let second = schema.validate_and_fill(&args).unwrap();
        assert_eq!(first, second);
        assert_eq!(first["extra"], "kept");
    }

    #[test]
    fn test_json_schema_shape() {
        let schema = solar_schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["rm"]["type"], "number");
        assert_eq!(schema["required"], json!(["rm"]));
        assert_eq!(
            schema["properties"]["morning_usage_percentage"]["default"],
            30.0
        );
    }
}
