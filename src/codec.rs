//! Binary argument codec used for every payload that crosses the host/script boundary.
//!
//! Payloads are an ordered list of [`ScriptValue`]s framed with bincode. Script values are
//! converted from and to rhai [`Dynamic`]s on the script side of the boundary.

use std::collections::BTreeMap;

use bincode::Options;
use rhai::{Array, Blob, Dynamic, Map};
use serde::{Deserialize, Serialize};

use crate::error::{ScriptError, ScriptResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<ScriptValue>),
    Map(BTreeMap<String, ScriptValue>),
}

impl ScriptValue {
    pub fn from_dynamic(value: &Dynamic) -> ScriptResult<Self> {
        let value = value.flatten_clone();
        if value.is_unit() {
            return Ok(ScriptValue::Nil);
        }
        if value.is_bool() {
            return value.as_bool().map(ScriptValue::Bool).map_err(unsupported);
        }
        if value.is_int() {
            return value.as_int().map(ScriptValue::Int).map_err(unsupported);
        }
        if value.is_float() {
            return value.as_float().map(ScriptValue::Float).map_err(unsupported);
        }
        if value.is::<char>() {
            return value.as_char().map(|ch| ScriptValue::String(ch.to_string())).map_err(unsupported);
        }
        if value.is_string() {
            return value.into_string().map(ScriptValue::String).map_err(unsupported);
        }
        if value.is::<Blob>() {
            let type_name = value.type_name();
            return value.try_cast::<Blob>().map(ScriptValue::Bytes).ok_or_else(|| unsupported(type_name));
        }
        if value.is_array() {
            let items = value.into_array().map_err(unsupported)?;
            return items.iter().map(ScriptValue::from_dynamic).collect::<ScriptResult<_>>().map(ScriptValue::List);
        }
        if value.is_map() {
            let type_name = value.type_name();
            let map = value.try_cast::<Map>().ok_or_else(|| unsupported(type_name))?;
            let mut entries = BTreeMap::new();
            for (key, item) in map.iter() {
                entries.insert(key.to_string(), ScriptValue::from_dynamic(item)?);
            }
            return Ok(ScriptValue::Map(entries));
        }
        Err(unsupported(value.type_name()))
    }

    pub fn into_dynamic(self) -> Dynamic {
        match self {
            ScriptValue::Nil => Dynamic::UNIT,
            ScriptValue::Bool(value) => Dynamic::from(value),
            ScriptValue::Int(value) => Dynamic::from(value),
            ScriptValue::Float(value) => Dynamic::from(value),
            ScriptValue::String(value) => Dynamic::from(value),
            ScriptValue::Bytes(value) => Dynamic::from_blob(value),
            ScriptValue::List(items) => {
                Dynamic::from_array(items.into_iter().map(ScriptValue::into_dynamic).collect::<Array>())
            }
            ScriptValue::Map(entries) => {
                let mut map = Map::new();
                for (key, item) in entries {
                    map.insert(key.into(), item.into_dynamic());
                }
                Dynamic::from_map(map)
            }
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScriptValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ScriptValue]> {
        match self {
            ScriptValue::List(items) => Some(items),
            _ => None,
        }
    }
}

fn unsupported(type_name: &str) -> ScriptError {
    ScriptError::UnsupportedValue(type_name.to_string())
}

pub fn encode_values(values: &[ScriptValue]) -> ScriptResult<Vec<u8>> {
    Ok(codec_options().serialize(values)?)
}

pub fn decode_values(bytes: &[u8]) -> ScriptResult<Vec<ScriptValue>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(codec_options().deserialize(bytes)?)
}

pub fn encode_args(args: &[Dynamic]) -> ScriptResult<Vec<u8>> {
    let values = args.iter().map(ScriptValue::from_dynamic).collect::<ScriptResult<Vec<_>>>()?;
    encode_values(&values)
}

pub fn decode_args(bytes: &[u8]) -> ScriptResult<Vec<Dynamic>> {
    Ok(decode_values(bytes)?.into_iter().map(ScriptValue::into_dynamic).collect())
}

fn codec_options() -> impl bincode::Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}
