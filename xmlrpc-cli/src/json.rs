use anyhow::{bail, Result};
use base64::Engine;
use serde_json::{Map, Number, Value as Json};
use xmlrpc::{Struct, Value};

/// integer→Int, float→Double, bool→Boolean, string→String,
/// array→Array, object→Struct. `null` has no counterpart.
pub fn to_value(json: &Json) -> Result<Value> {
    Ok(match json {
        Json::Null => bail!("null cannot be sent over XML-RPC"),
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::from(s.as_str()),
        Json::Array(items) => Value::Array(items.iter().map(to_value).collect::<Result<_>>()?),
        Json::Object(members) => {
            let mut map = Struct::new();
            for (key, member) in members {
                map.insert(key.clone(), to_value(member)?);
            }
            Value::Struct(map)
        }
    })
}

/// Date-times print in their wire form, base64 values as base64 text.
pub fn from_value(value: &Value) -> Json {
    match value {
        Value::Int(i) => Json::from(*i),
        Value::Double(d) => Number::from_f64(*d).map_or_else(|| Json::String(d.to_string()), Json::Number),
        Value::Boolean(b) => Json::Bool(*b),
        Value::String(bytes) => Json::String(String::from_utf8_lossy(bytes).into_owned()),
        Value::DateTime(dt) => Json::String(dt.to_string()),
        Value::Base64(bytes) => {
            Json::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        Value::Array(items) => Json::Array(items.iter().map(from_value).collect()),
        Value::Struct(members) => Json::Object(
            members
                .iter()
                .map(|(key, member)| (key.clone(), from_value(member)))
                .collect::<Map<_, _>>(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_value() {
        let value = to_value(&json!({"a": [1, 2.5, true, "x"]})).unwrap();
        assert_eq!(
            value,
            Value::structure(vec![(
                "a",
                Value::array(vec![
                    Value::Int(1),
                    Value::Double(2.5),
                    Value::Boolean(true),
                    Value::from("x"),
                ])
            )])
        );
        assert!(to_value(&json!([1, null])).is_err());
    }

    #[test]
    fn test_from_value() {
        let value = Value::array(vec![
            Value::DateTime(xmlrpc::DateTime::new(1998, 7, 17, 14, 8, 55)),
            Value::base64(b"hi".to_vec()),
            Value::Double(f64::INFINITY),
        ]);
        assert_eq!(
            from_value(&value),
            json!(["19980717T14:08:55", "aGk=", "inf"])
        );
    }
}
