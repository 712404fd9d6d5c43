// Serde helpers that carry unbounded ordinals as plain JSON integers.
use num_bigint::BigUint;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub(crate) mod ordinal {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        let number: serde_json::Number = value.to_string().parse().map_err(S::Error::custom)?;
        number.serialize(serializer)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let number = serde_json::Number::deserialize(deserializer)?;
        number
            .to_string()
            .parse::<BigUint>()
            .map_err(|_| D::Error::custom(format!("expected a non-negative integer, got {number}")))
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::BigUint;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "super::ordinal")]
        value: BigUint,
    }

    #[test]
    fn large_ordinals_stay_json_integers() {
        let value: BigUint = "123456789012345678901234567890".parse().unwrap();
        let json = serde_json::to_string(&Holder { value: value.clone() }).unwrap();
        assert_eq!(json, r#"{"value":123456789012345678901234567890}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, value);
    }

    #[test]
    fn rejects_negative_and_fractional_numbers() {
        assert!(serde_json::from_str::<Holder>(r#"{"value":-1}"#).is_err());
        assert!(serde_json::from_str::<Holder>(r#"{"value":1.5}"#).is_err());
        assert!(serde_json::from_str::<Holder>(r#"{"value":"7"}"#).is_err());
    }
}
