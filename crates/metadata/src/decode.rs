//! Two-pass decoding of a raw metadata document.
//!
//! The init section is first inspected as an untyped JSON object to decide
//! which shape it has, then each config block is decoded on its own so a bad
//! block can be reported by name.

use crate::error::{DecodeError, Result};
use crate::types::{
    AUTHENTICATION_KEY, CONFIG_SETS_KEY, Config, DEFAULT_CONFIG, INIT_KEY, Init, Metadata,
    SetEntry,
};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Decode a metadata document from its JSON text.
pub fn decode(raw: &str) -> Result<Metadata> {
    let value: Value = serde_json::from_str(raw)?;
    decode_value(value)
}

/// Decode a metadata document that has already been parsed.
pub fn decode_value(value: Value) -> Result<Metadata> {
    let Value::Object(mut document) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let init = document.shift_remove(INIT_KEY).ok_or(DecodeError::MissingInit)?;
    let Value::Object(init) = init else {
        return Err(DecodeError::InvalidInit);
    };

    let authentication = match document.shift_remove(AUTHENTICATION_KEY) {
        None | Some(Value::Null) => IndexMap::new(),
        Some(section) => {
            serde_json::from_value(section).map_err(DecodeError::Authentication)?
        }
    };

    Ok(Metadata {
        authentication,
        init: decode_init(init)?,
    })
}

fn decode_init(mut init: Map<String, Value>) -> Result<Init> {
    // An empty configSets block means the document only has the default config
    let sets = init
        .shift_remove(CONFIG_SETS_KEY)
        .filter(|sets| !sets.as_object().is_some_and(Map::is_empty));
    let Some(sets) = sets else {
        let config = match init.shift_remove(DEFAULT_CONFIG) {
            Some(value) => decode_config(DEFAULT_CONFIG, value)?,
            None => Config::default(),
        };
        return Ok(Init::Single(config));
    };

    let config_sets = decode_sets(sets)?;
    let configs = init
        .into_iter()
        .map(|(name, value)| {
            let config = decode_config(&name, value)?;
            Ok((name, config))
        })
        .collect::<Result<IndexMap<_, _>>>()?;

    Ok(Init::Sets {
        config_sets,
        configs,
    })
}

fn decode_sets(sets: Value) -> Result<IndexMap<String, Vec<SetEntry>>> {
    let Value::Object(sets) = sets else {
        return Err(DecodeError::InvalidSetEntry {
            set: CONFIG_SETS_KEY.to_string(),
            entry: sets.to_string(),
        });
    };

    sets.into_iter()
        .map(|(name, entries)| {
            let Value::Array(entries) = entries else {
                return Err(DecodeError::InvalidSetEntry {
                    entry: entries.to_string(),
                    set: name,
                });
            };
            let entries = entries
                .into_iter()
                .map(|entry| {
                    serde_json::from_value::<SetEntry>(entry.clone()).map_err(|_| {
                        DecodeError::InvalidSetEntry {
                            set: name.clone(),
                            entry: entry.to_string(),
                        }
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((name, entries))
        })
        .collect()
}

fn decode_config(name: &str, value: Value) -> Result<Config> {
    if value.is_null() {
        return Ok(Config::default());
    }
    serde_json::from_value(value).map_err(|source| DecodeError::InvalidConfig {
        name: name.to_string(),
        source,
    })
}
