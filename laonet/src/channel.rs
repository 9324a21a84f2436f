use crate::*;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

const ROOT: &str = "/root";
const COIN: &str = "coin";

/// A hierarchical pub/sub channel
///
/// `/root` carries LAO creations, `/root/<lao>` everything about one LAO,
/// `/root/<lao>/<election>` one election and `/root/<lao>/coin` its digital cash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(String);

impl Channel {
    pub fn root() -> Self {
        Channel(ROOT.to_string())
    }

    pub fn lao(lao_id: &Identifier) -> Self {
        Channel::root().child(lao_id.as_str())
    }

    pub fn election(lao_id: &Identifier, election_id: &Identifier) -> Self {
        Channel::lao(lao_id).child(election_id.as_str())
    }

    pub fn coin(lao_id: &Identifier) -> Self {
        Channel::lao(lao_id).child(COIN)
    }

    pub fn child(&self, segment: &str) -> Self {
        Channel(format!("{}/{}", self.0, segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> Vec<&str> {
        self.0[1..].split('/').collect()
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    /// `/root/<lao>`
    pub fn is_lao_channel(&self) -> bool {
        self.segments().len() == 2
    }

    /// `/root/<lao>/coin` and its per-key sub channels
    pub fn is_coin_channel(&self) -> bool {
        let segments = self.segments();
        segments.len() >= 3 && segments[2] == COIN
    }

    /// `/root/<lao>/<election>`
    pub fn is_election_channel(&self) -> bool {
        let segments = self.segments();
        segments.len() == 3 && segments[2] != COIN
    }

    /// The LAO this channel belongs to, `None` for the root channel
    pub fn lao_id(&self) -> Option<Identifier> {
        self.segments().get(1).and_then(|s| s.parse().ok())
    }

    /// The election of an election channel
    pub fn election_id(&self) -> Option<Identifier> {
        if !self.is_election_channel() {
            return None;
        }
        self.segments().get(2).and_then(|s| s.parse().ok())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = (s == ROOT || s.starts_with("/root/"))
            && !s.ends_with('/')
            && !s[1..].split('/').any(|segment| segment.is_empty());
        if !valid {
            return Err(Error::InvalidChannel(s.to_string()));
        }
        Ok(Channel(s.to_string()))
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Channel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        std::str::FromStr::from_str(&s).map_err(de::Error::custom)
    }
}
