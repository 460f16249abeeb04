//! Base64 serde codec for persisted byte fields
//!
//! Used with `#[serde(with = "b64")]` on fixed-size arrays and byte
//! vectors; `b64::opt` covers `Option` fields.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(bytes: impl AsRef<[u8]>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
}

pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<Vec<u8>>,
{
    let encoded = String::deserialize(deserializer)?;
    let decoded = STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)?;
    T::try_from(decoded).map_err(|_| serde::de::Error::custom("unexpected payload length"))
}

pub mod opt {
    use super::*;

    pub fn serialize<S, T>(bytes: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b.as_ref())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<Vec<u8>>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => {
                let decoded = STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(serde::de::Error::custom)?;
                let value = T::try_from(decoded)
                    .map_err(|_| serde::de::Error::custom("unexpected payload length"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}
