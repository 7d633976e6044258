//! Serde adapters shared by the configuration and wire types.

/// (De)serialize a [`std::time::Duration`] as a whole number of milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Timeouts {
        #[serde(with = "super::duration_ms")]
        connect: Duration,
    }

    #[test]
    fn test_duration_from_millis() {
        let parsed: Timeouts = serde_json::from_str(r#"{"connect":2500}"#).unwrap();
        assert_eq!(parsed.connect, Duration::from_millis(2500));
    }

    #[test]
    fn test_duration_rejects_negative() {
        assert!(serde_json::from_str::<Timeouts>(r#"{"connect":-1}"#).is_err());
    }
}
