use ethers::types::U256;

pub fn serialize<S>(u256: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&u256.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: &str = serde::Deserialize::deserialize(deserializer)?;
    U256::from_dec_str(s).map_err(serde::de::Error::custom)
}

pub mod opt {
    use super::U256;

    pub fn serialize<S>(u256: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match u256 {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: Option<&str> = serde::Deserialize::deserialize(deserializer)?;
        s.map(|s| U256::from_dec_str(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Test {
        #[serde(with = "super")]
        v: U256,
    }

    #[test]
    fn test_u256_serde() {
        let test = Test { v: U256::from(123) };

        let s = serde_json::to_string(&test).unwrap();
        assert_eq!(s, r#"{"v":"123"}"#);

        let test: Test = serde_json::from_str(&s).unwrap();
        assert_eq!(test.v, U256::from(123));
    }
}
