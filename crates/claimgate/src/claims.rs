//! Claim sets and claim decoding
//!
//! A [`ClaimSet`] keeps every claim of a token payload as raw JSON and only
//! deserializes a claim when it is asked for. This lets distributed claim
//! resolution splice a fetched value back into the set without touching the
//! other claims.

use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Claim lookup and decoding errors
#[derive(Debug, Error)]
pub enum ClaimError {
    /// The claim is not present in the claim set
    #[error("claim '{0}' not present")]
    Missing(String),

    /// The claim is present but does not decode into the requested type
    #[error("claim '{claim}' could not be decoded: {source}")]
    Decode {
        /// Claim name
        claim: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// Mapping from claim name to its raw JSON value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(HashMap<String, Box<RawValue>>);

impl ClaimSet {
    /// Create an empty claim set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object into a claim set
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a JSON object.
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }

    /// Whether `name` is present (a JSON `null` counts as present)
    pub fn has_claim(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Raw JSON of a claim
    pub fn raw(&self, name: &str) -> Option<&RawValue> {
        self.0.get(name).map(AsRef::as_ref)
    }

    /// Decode a claim into `T`
    ///
    /// # Errors
    ///
    /// [`ClaimError::Missing`] if the claim is absent, [`ClaimError::Decode`] if its
    /// JSON does not match `T`.
    pub fn unmarshal_claim<T: DeserializeOwned>(&self, name: &str) -> Result<T, ClaimError> {
        let raw = self
            .0
            .get(name)
            .ok_or_else(|| ClaimError::Missing(name.to_string()))?;
        serde_json::from_str(raw.get()).map_err(|source| ClaimError::Decode {
            claim: name.to_string(),
            source,
        })
    }

    /// Insert a raw claim value, replacing any previous value
    pub fn insert_raw(&mut self, name: impl Into<String>, value: Box<RawValue>) {
        self.0.insert(name.into(), value);
    }

    /// Serialize `value` and insert it under `name`
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized to JSON.
    pub fn insert<T: Serialize>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let raw = serde_json::value::to_raw_value(value)?;
        self.insert_raw(name, raw);
        Ok(())
    }

    /// Remove a claim, returning its raw value
    pub fn remove(&mut self, name: &str) -> Option<Box<RawValue>> {
        self.0.remove(name)
    }

    /// Claim names in arbitrary order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of claims
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no claims
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A list of strings that may be encoded as a single JSON string
///
/// Some providers emit a group claim as `"admins"` rather than `["admins"]`.
/// Both decode to a list; `null` decodes to an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StringOrList(pub Vec<String>);

impl StringOrList {
    /// Consume into the inner list
    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl From<StringOrList> for Vec<String> {
    fn from(value: StringOrList) -> Self {
        value.0
    }
}

impl<'de> Deserialize<'de> for StringOrList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StringOrListVisitor;

        impl<'de> Visitor<'de> for StringOrListVisitor {
            type Value = StringOrList;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("string or array of strings")
            }

            fn visit_str<E>(self, value: &str) -> Result<StringOrList, E>
            where
                E: de::Error,
            {
                Ok(StringOrList(vec![value.to_string()]))
            }

            fn visit_string<E>(self, value: String) -> Result<StringOrList, E>
            where
                E: de::Error,
            {
                Ok(StringOrList(vec![value]))
            }

            fn visit_unit<E>(self) -> Result<StringOrList, E>
            where
                E: de::Error,
            {
                Ok(StringOrList::default())
            }

            fn visit_none<E>(self) -> Result<StringOrList, E>
            where
                E: de::Error,
            {
                Ok(StringOrList::default())
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<StringOrList, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(StringOrList(values))
            }
        }

        deserializer.deserialize_any(StringOrListVisitor)
    }
}
