//! 256-bit Seed Words
//!
//! Seeds are `uint256` on the ledger. JSON carries them as decimal strings
//! (plain numbers and `0x` hex are accepted on input); binary formats carry
//! the 32 big-endian bytes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use alloy_primitives::U256;

/// Serde adapter for a `U256` field: `#[serde(with = "decimal")]`.
pub mod decimal {
    use super::*;

    /// Serialize as a decimal string, or raw bytes for binary formats.
    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&value.to_string())
        } else {
            value.to_be_bytes::<32>().serialize(serializer)
        }
    }

    /// Deserialize from a number, a decimal or hex string, or raw bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        if deserializer.is_human_readable() {
            #[derive(Deserialize)]
            #[serde(untagged)]
            enum Repr {
                Num(u64),
                Text(String),
            }
            match Repr::deserialize(deserializer)? {
                Repr::Num(n) => Ok(U256::from(n)),
                Repr::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
            }
        } else {
            <[u8; 32]>::deserialize(deserializer).map(U256::from_be_bytes)
        }
    }
}

/// Serde adapter for an `Option<U256>` field.
pub mod option_decimal {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Word(#[serde(with = "super::decimal")] U256);

    /// Serialize `None` as null.
    pub fn serialize<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
        value.map(Word).serialize(serializer)
    }

    /// Deserialize null as `None`.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<U256>, D::Error> {
        Ok(Option::<Word>::deserialize(deserializer)?.map(|w| w.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Seeded {
        #[serde(with = "decimal")]
        seed: U256,
        #[serde(with = "option_decimal", default)]
        revealed: Option<U256>,
    }

    #[test]
    fn test_json_accepts_number_or_string() {
        let a: Seeded = serde_json::from_str(r#"{"seed":123456}"#).unwrap();
        let b: Seeded = serde_json::from_str(r#"{"seed":"123456","revealed":null}"#).unwrap();
        let c: Seeded = serde_json::from_str(r#"{"seed":"0x1e240"}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.seed, U256::from(123456u64));
        assert_eq!(serde_json::to_string(&a).unwrap(), r#"{"seed":"123456","revealed":null}"#);
    }

    #[test]
    fn test_max_value_and_overflow() {
        let max = "115792089237316195423570985008687907853269984665640564039457584007913129639935";
        let json = format!(r#"{{"seed":"{max}","revealed":"{max}"}}"#);
        let parsed: Seeded = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.seed, U256::MAX);
        assert_eq!(parsed.revealed, Some(U256::MAX));

        let too_big = r#"{"seed":"115792089237316195423570985008687907853269984665640564039457584007913129639936"}"#;
        assert!(serde_json::from_str::<Seeded>(too_big).is_err());
        assert!(serde_json::from_str::<Seeded>(r#"{"seed":"12a"}"#).is_err());
    }

    #[test]
    fn test_bincode_carries_be_bytes() {
        let value = Seeded { seed: U256::from(0x0102u64), revealed: Some(U256::from(7u64)) };
        let bytes = bincode::serialize(&value).unwrap();
        assert_eq!(&bytes[30..32], &[0x01, 0x02]);
        assert_eq!(bincode::deserialize::<Seeded>(&bytes).unwrap(), value);
    }
}
