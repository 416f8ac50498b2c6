//! Conversions between `serde_json::Value` and smithy `Document`
//!
//! Tool inputs and schemas travel through the Bedrock SDK as documents.

use aws_smithy_types::{Document, Number};
use serde_json::Value;

pub fn json_to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Document::Number(Number::PosInt(u))
            } else if let Some(i) = n.as_i64() {
                Document::Number(Number::NegInt(i))
            } else {
                Document::Number(Number::Float(n.as_f64().unwrap_or_default()))
            }
        }
        Value::String(s) => Document::String(s.clone()),
        Value::Array(items) => Document::Array(items.iter().map(json_to_document).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_document(v)))
                .collect(),
        ),
    }
}

#[allow(unreachable_patterns)]
pub fn document_to_json(document: &Document) -> Value {
    match document {
        Document::Null => Value::Null,
        Document::Bool(b) => Value::Bool(*b),
        Document::Number(number) => match number {
            Number::PosInt(u) => Value::from(*u),
            Number::NegInt(i) => Value::from(*i),
            // NaN and infinities have no JSON form
            Number::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Document::String(s) => Value::String(s.clone()),
        Document::Array(items) => Value::Array(items.iter().map(document_to_json).collect()),
        Document::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), document_to_json(v)))
                .collect(),
        ),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_input_survives_conversion() {
        let input = json!({
            "query": "largest zoo in Seattle",
            "max_results": 3,
            "offset": -1,
            "bias": 0.25,
            "filters": ["park", null, true]
        });
        assert_eq!(document_to_json(&json_to_document(&input)), input);
    }

    #[test]
    fn test_non_finite_float_becomes_null() {
        let document = Document::Number(Number::Float(f64::NAN));
        assert_eq!(document_to_json(&document), Value::Null);
    }
}
