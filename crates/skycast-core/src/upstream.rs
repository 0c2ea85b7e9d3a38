use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Third-party services the API depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamId {
    Nominatim,
    OpenMeteo,
}

impl UpstreamId {
    pub const ALL: [Self; 2] = [Self::Nominatim, Self::OpenMeteo];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nominatim => "nominatim",
            Self::OpenMeteo => "open_meteo",
        }
    }
}

impl Display for UpstreamId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a payload was served from the local cache or fetched from the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Live,
}
