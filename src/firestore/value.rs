// reco_ingestor/src/firestore/value.rs
// Conversion between plain JSON and Firestore's typed value encoding.

use serde_json::{Map, Value, json};

use crate::error::{IngestorError, Result};
use crate::store::Fields;

pub fn encode_fields(fields: &Fields,) -> Map<String, Value,> {
    fields
        .iter()
        .map(|(k, v,)| (k.clone(), encode(v,),),)
        .collect()
}

pub fn decode_fields(fields: &Map<String, Value,>,) -> Result<Fields,> {
    fields
        .iter()
        .map(|(k, v,)| Ok((k.clone(), decode(v,)?,),),)
        .collect()
}

pub fn encode(value: &Value,) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b,) => json!({ "booleanValue": b }),
        Value::Number(n,) => match n.as_i64() {
            // integers travel as strings to keep 64-bit precision
            Some(i,) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s,) => json!({ "stringValue": s }),
        Value::Array(items,) => {
            json!({ "arrayValue": { "values": items.iter().map(encode).collect::<Vec<_>>() } })
        },
        Value::Object(map,) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn decode(value: &Value,) -> Result<Value,> {
    let (kind, inner,) = value
        .as_object()
        .and_then(|m| m.iter().next(),)
        .ok_or_else(|| unsupported(value,),)?;

    match (kind.as_str(), inner,) {
        ("nullValue", _,) => Ok(Value::Null,),
        ("booleanValue", Value::Bool(b,),) => Ok(Value::Bool(*b,),),
        ("integerValue", Value::String(s,),) => s
            .parse::<i64>()
            .map(|i| Value::Number(i.into(),),)
            .map_err(|_| unsupported(value,),),
        ("integerValue", Value::Number(n,),) => Ok(Value::Number(n.clone(),),),
        ("doubleValue", Value::Number(n,),) => Ok(Value::Number(n.clone(),),),
        // NaN and the infinities arrive as strings
        ("doubleValue", Value::String(s,),) => Ok(Value::String(s.clone(),),),
        ("stringValue" | "timestampValue" | "referenceValue" | "bytesValue", Value::String(s,),) => {
            Ok(Value::String(s.clone(),),)
        },
        ("geoPointValue", Value::Object(point,),) => Ok(Value::Object(point.clone(),),),
        ("arrayValue", Value::Object(array,),) => match array.get("values",) {
            Some(Value::Array(values,),) => {
                Ok(Value::Array(values.iter().map(decode,).collect::<Result<_,>>()?,),)
            },
            _ => Ok(Value::Array(Vec::new(),),),
        },
        ("mapValue", Value::Object(map,),) => match map.get("fields",) {
            Some(Value::Object(fields,),) => Ok(Value::Object(decode_fields(fields,)?,),),
            _ => Ok(Value::Object(Map::new(),),),
        },
        _ => Err(unsupported(value,),),
    }
}

fn unsupported(value: &Value,) -> IngestorError {
    IngestorError::IterationError(format!("Unsupported Firestore value: {}", value),)
}
