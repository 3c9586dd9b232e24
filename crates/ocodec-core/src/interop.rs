// Conversion between the value graph and serde_json::Value.
// Data and Date have no JSON form; everything else maps one to one.
use serde_json::Value as J;

use crate::error::{Error, Result};
use crate::number::Number;
use crate::registry::Format;
use crate::value::{Kind, Value};

pub fn to_json(v: &Value) -> Result<J> {
    Ok(match v.kind() {
        Kind::Null => J::Null,
        Kind::Boolean => J::Bool(v.as_bool().unwrap_or_default()),
        Kind::Number => match v.as_number() {
            Some(n @ (Number::F32(_) | Number::F64(_))) => serde_json::Number::from_f64(n.as_f64())
                .map(J::Number)
                .unwrap_or(J::Null),
            Some(n) if n.as_i128().is_some_and(|i| i < 0) => J::from(n.as_i64()),
            Some(n) => J::from(n.as_u64()),
            None => J::Null,
        },
        Kind::String => J::String(v.to_string_value().unwrap_or_default()),
        Kind::Array => J::Array(v.items().iter().map(to_json).collect::<Result<_>>()?),
        Kind::Dictionary => {
            let mut map = serde_json::Map::with_capacity(v.len());
            for (k, child) in v.entries() {
                map.insert(k, to_json(&child)?);
            }
            J::Object(map)
        }
        kind @ (Kind::Data | Kind::Date) => {
            return Err(Error::UnsupportedKind {
                format: Format::Json,
                kind,
            });
        }
    })
}

pub fn from_json(j: &J) -> Value {
    match j {
        J::Null => Value::null(),
        J::Bool(b) => Value::boolean(*b),
        J::Number(n) => {
            let num = if let Some(u) = n.as_u64() {
                Number::from_unsigned(u)
            } else if let Some(i) = n.as_i64() {
                Number::from_signed(i)
            } else {
                Number::from_float(n.as_f64().unwrap_or_default())
            };
            Value::number(num)
        }
        J::String(s) => Value::string(s.as_str()),
        J::Array(items) => Value::array_from(items.iter().map(from_json)),
        J::Object(map) => Value::dictionary_from(map.iter().map(|(k, v)| (k.as_str(), from_json(v)))),
    }
}

impl TryFrom<&Value> for J {
    type Error = Error;

    fn try_from(v: &Value) -> Result<J> {
        to_json(v)
    }
}

impl From<&J> for Value {
    fn from(j: &J) -> Value {
        from_json(j)
    }
}
