use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Where a fileset's downloaded content is kept on the device.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Never cached; always fetched from the network.
    #[default]
    #[display("none")]
    None,
    /// Kept in the (evictable) content cache.
    #[display("content")]
    Content,
    /// Kept in the app cache, alongside app resources such as templates.
    #[display("app")]
    App,
}
impl CachePolicy {
    pub fn is_cached(&self) -> bool {
        !matches!(self, Self::None)
    }
}

#[derive(Debug, Display, Error)]
#[display("unknown cache policy: {_0}")]
pub struct UnknownPolicy(#[error(not(source))] pub String);

impl FromStr for CachePolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "content" => Ok(Self::Content),
            "app" => Ok(Self::App),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}
