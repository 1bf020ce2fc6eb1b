//! Network identifier.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifies which network a node participates in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    Live,
    /// The public test network.
    Test,
    /// Local development network. Timers run fast and weight floors are off.
    Dev,
}

impl NetworkId {
    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Test => "test",
            Self::Dev => "dev",
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }

    /// Unit of election timing: passive duration and request intervals are
    /// multiples of it.
    pub fn base_latency(&self) -> Duration {
        match self {
            Self::Dev => Duration::from_millis(25),
            Self::Live | Self::Test => Duration::from_millis(1000),
        }
    }

    /// Interval of the active elections request loop.
    pub fn aec_loop_interval(&self) -> Duration {
        match self {
            Self::Dev => Duration::from_millis(300),
            Self::Live | Self::Test => Duration::from_millis(500),
        }
    }
}

impl std::str::FromStr for NetworkId {
    type Err = crate::TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(Self::Live),
            "test" => Ok(Self::Test),
            "dev" => Ok(Self::Dev),
            other => Err(crate::TypesError::UnknownNetwork(other.to_string())),
        }
    }
}
