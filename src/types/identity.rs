use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything but RFC 3986 unreserved characters, so `,` stays a separator
const CHANNEL_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Opaque token identifying one client across reconnects
///
/// Generated once per [`ConnectionManager`](crate::websocket::ConnectionManager)
/// and never regenerated while that manager lives. The server uses it to
/// correlate successive sockets opened by the same client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    const SUFFIX_LEN: usize = 9;

    /// Generate a fresh identity of the form `client_<unix-millis>_<suffix>`
    pub fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self(format!(
            "client_{}_{}",
            chrono::Utc::now().timestamp_millis(),
            suffix
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ClientIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, duplicate-free list of channel names requested at connect time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ChannelSet(Vec<String>);

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a channel unless it is already present
    pub fn insert(&mut self, channel: impl Into<String>) -> bool {
        let channel = channel.into();
        if self.0.contains(&channel) {
            return false;
        }
        self.0.push(channel);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Percent-encoded channels joined with `,` as sent in the `channels` query parameter
    pub fn to_query_value(&self) -> String {
        self.0
            .iter()
            .map(|channel| utf8_percent_encode(channel, CHANNEL_ENCODE_SET).to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<S: Into<String>> FromIterator<S> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = ChannelSet::new();
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}

impl From<Vec<String>> for ChannelSet {
    fn from(value: Vec<String>) -> Self {
        value.into_iter().collect()
    }
}

impl From<Vec<&str>> for ChannelSet {
    fn from(value: Vec<&str>) -> Self {
        value.into_iter().collect()
    }
}

impl<const N: usize> From<[&str; N]> for ChannelSet {
    fn from(value: [&str; N]) -> Self {
        value.into_iter().collect()
    }
}

impl From<ChannelSet> for Vec<String> {
    fn from(value: ChannelSet) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_format() {
        let id = ClientIdentity::generate();
        let parts: Vec<&str> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "client");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_identities_differ() {
        assert_ne!(ClientIdentity::generate(), ClientIdentity::generate());
    }

    #[test]
    fn test_channel_set_keeps_order_and_drops_duplicates() {
        let channels = ChannelSet::from(["analysis", "alerts", "analysis", "jobs"]);
        assert_eq!(
            channels.iter().collect::<Vec<_>>(),
            vec!["analysis", "alerts", "jobs"]
        );
        assert_eq!(channels.to_query_value(), "analysis,alerts,jobs");
    }

    #[test]
    fn test_query_value_encodes_channel_names() {
        let channels = ChannelSet::from(["job reports", "a&b", "x,y", "q?#", "ok-1_2.3~"]);
        assert_eq!(
            channels.to_query_value(),
            "job%20reports,a%26b,x%2Cy,q%3F%23,ok-1_2.3~"
        );
        // names themselves are kept as given
        assert_eq!(channels.iter().next(), Some("job reports"));
    }

    #[test]
    fn test_channel_set_deserializes_from_list() {
        let channels: ChannelSet = serde_json::from_str(r#"["a","b","a"]"#).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(serde_json::to_string(&channels).unwrap(), r#"["a","b"]"#);
    }
}
