use std::fmt;

use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::coded::ADDRESS_GROUP;

/// Hierarchical name of a value in the data-collection tree.
///
/// `"a.b.c"` becomes the segment sequence `["a", "b", "c"]`. Equality and
/// hashing are structural. The segment sequence is immutable after
/// construction; `clone` produces an independent copy.
///
/// On the wire an address travels as the mapping `{"adr": "a.b.c"}`, but a
/// plain dotted string is also accepted on decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    segments: Vec<String>,
}

impl Address {
    /// Parse a dotted address. The empty string yields an empty address;
    /// empty segments (`"a..b"`, `".a"`) are rejected.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        if input.is_empty() {
            return Ok(Self { segments: Vec::new() });
        }
        let segments: Vec<String> = input.split('.').map(str::to_owned).collect();
        if segments.iter().any(String::is_empty) {
            return Err(AddressError::wrong_format(input));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, the leaf name. Handy for compact log lines.
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Address {
    type Error = AddressError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("adr", &self.to_string())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AddressVisitor;

        impl<'de> Visitor<'de> for AddressVisitor {
            type Value = Address;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a dotted address string or a map with an `adr` key")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Address, E> {
                Address::parse(v).map_err(E::custom)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Address, A::Error> {
                let mut adr: Option<String> = None;
                while let Some(key) = map.next_key::<String>()? {
                    if key == "adr" {
                        adr = Some(map.next_value()?);
                    } else {
                        let _ = map.next_value::<IgnoredAny>()?;
                    }
                }
                let adr = adr.ok_or_else(|| de::Error::missing_field("adr"))?;
                Address::parse(&adr).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(AddressVisitor)
    }
}

/// Coded error of the address family (group 1000).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("({code}) {message}")]
pub struct AddressError {
    pub code: i64,
    pub message: String,
}

impl AddressError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn wrong_format(input: &str) -> Self {
        Self::new(ADDRESS_GROUP + 1, format!("the address `{input}` is incorrect"))
    }
}
