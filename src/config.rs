use std::str::FromStr;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccuracyTier {
    /// Best the hardware can do, with sensor fusion. Battery hungry.
    Navigation,
    High,
}
impl std::fmt::Display for AccuracyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccuracyTier::Navigation => "navigation",
            AccuracyTier::High => "high",
        };
        write!(f, "{s}")
    }
}
impl FromStr for AccuracyTier {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "navigation" => Ok(Self::Navigation),
            "high" => Ok(Self::High),
            _ => Err(Error::Config(format!("unknown accuracy tier {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Ios,
    Android,
}
impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "ios") {
            Self::Ios
        } else {
            Self::Android
        }
    }
}

/// Parameters handed to the positioning provider when the hardware
/// subscription starts.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationConfig {
    pub accuracy_tier: AccuracyTier,
    pub min_distance_meters: f64,
    pub min_interval_ms: u64,
}

impl LocationConfig {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            // iOS throttles coarse subscriptions hard while moving; a small
            // distance filter keeps updates flowing.
            Platform::Ios => Self {
                accuracy_tier: AccuracyTier::Navigation,
                min_distance_meters: 1.0,
                min_interval_ms: 1_000,
            },
            Platform::Android => Self {
                accuracy_tier: AccuracyTier::High,
                min_distance_meters: 10.0,
                min_interval_ms: 5_000,
            },
        }
    }

    /// Platform defaults overridden by `LOCATION_ACCURACY_TIER`,
    /// `LOCATION_MIN_DISTANCE_METERS` and `LOCATION_MIN_INTERVAL_MS`.
    pub fn from_env(platform: Platform) -> Result<Self, Error> {
        let mut c = Self::for_platform(platform);
        if let Some(v) = env_override("LOCATION_ACCURACY_TIER")? {
            c.accuracy_tier = v;
        }
        if let Some(v) = env_override("LOCATION_MIN_DISTANCE_METERS")? {
            c.min_distance_meters = v;
        }
        if let Some(v) = env_override("LOCATION_MIN_INTERVAL_MS")? {
            c.min_interval_ms = v;
        }
        c.validate()?;
        tracing::info!(
            "location config: tier={} distance={}m interval={}ms",
            c.accuracy_tier,
            c.min_distance_meters,
            c.min_interval_ms
        );
        Ok(c)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.min_distance_meters.is_finite() || self.min_distance_meters < 0.0 {
            return Err(Error::Config(format!(
                "minDistanceMeters must be a non-negative number, got {}",
                self.min_distance_meters
            )));
        }
        Ok(())
    }
}

fn env_override<T: FromStr>(key: &str) -> Result<Option<T>, Error> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|_| Error::Config(format!("invalid {key}: {raw:?}")))
}
