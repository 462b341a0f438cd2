//! Wire types the Actions runner deserializes inside a job request.
//!
//! The runner's JSON converters dispatch on a small integer tag, so these
//! shapes have to match byte for byte:
//!
//! - literal token: `{"type":0,"lit":"..."}`
//! - mapping token: `{"type":2,"map":[{"Key":..,"Value":..}]}`
//! - string context data: a bare JSON string
//! - dictionary context data: `{"t":2,"d":[{"k":"..","v":..}]}`
//!
//! Everything the envelope builder emits goes through these two enums so
//! the literals live in exactly one place.

use serde::ser::{Serialize, SerializeStruct, Serializer};

const TOKEN_LITERAL: u8 = 0;
const TOKEN_MAPPING: u8 = 2;
const DATA_DICTIONARY: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateToken {
    Literal(String),
    Mapping(Vec<(TemplateToken, TemplateToken)>),
}

impl TemplateToken {
    pub fn literal(value: impl Into<String>) -> Self {
        TemplateToken::Literal(value.into())
    }

    /// Mapping token with literal keys and values.
    pub fn string_mapping<K, V, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        TemplateToken::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (Self::literal(k), Self::literal(v)))
                .collect(),
        )
    }
}

#[derive(serde::Serialize)]
struct MappingEntry<'a> {
    #[serde(rename = "Key")]
    key: &'a TemplateToken,
    #[serde(rename = "Value")]
    value: &'a TemplateToken,
}

impl Serialize for TemplateToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TemplateToken::Literal(lit) => {
                let mut s = serializer.serialize_struct("LiteralToken", 2)?;
                s.serialize_field("type", &TOKEN_LITERAL)?;
                s.serialize_field("lit", lit)?;
                s.end()
            }
            TemplateToken::Mapping(entries) => {
                let map: Vec<MappingEntry<'_>> = entries
                    .iter()
                    .map(|(key, value)| MappingEntry { key, value })
                    .collect();
                let mut s = serializer.serialize_struct("MappingToken", 2)?;
                s.serialize_field("type", &TOKEN_MAPPING)?;
                s.serialize_field("map", &map)?;
                s.end()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineContextData {
    String(String),
    Dictionary(Vec<(String, PipelineContextData)>),
}

impl PipelineContextData {
    pub fn dict() -> Self {
        PipelineContextData::Dictionary(Vec::new())
    }

    /// Append an entry. No-op on a string value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PipelineContextData>) -> Self {
        if let PipelineContextData::Dictionary(entries) = &mut self {
            entries.push((key.into(), value.into()));
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&PipelineContextData> {
        match self {
            PipelineContextData::Dictionary(entries) => entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v),
            PipelineContextData::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PipelineContextData::String(s) => Some(s),
            PipelineContextData::Dictionary(_) => None,
        }
    }
}

impl From<String> for PipelineContextData {
    fn from(value: String) -> Self {
        PipelineContextData::String(value)
    }
}

impl From<&str> for PipelineContextData {
    fn from(value: &str) -> Self {
        PipelineContextData::String(value.to_string())
    }
}

impl From<&String> for PipelineContextData {
    fn from(value: &String) -> Self {
        PipelineContextData::String(value.clone())
    }
}

impl<K, V> FromIterator<(K, V)> for PipelineContextData
where
    K: Into<String>,
    V: Into<PipelineContextData>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        PipelineContextData::Dictionary(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(serde::Serialize)]
struct DictionaryEntry<'a> {
    k: &'a str,
    v: &'a PipelineContextData,
}

impl Serialize for PipelineContextData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PipelineContextData::String(s) => serializer.serialize_str(s),
            PipelineContextData::Dictionary(entries) => {
                let d: Vec<DictionaryEntry<'_>> = entries
                    .iter()
                    .map(|(k, v)| DictionaryEntry { k, v })
                    .collect();
                let mut s = serializer.serialize_struct("DictionaryContextData", 2)?;
                s.serialize_field("t", &DATA_DICTIONARY)?;
                s.serialize_field("d", &d)?;
                s.end()
            }
        }
    }
}
