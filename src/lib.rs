#![allow(clippy::new_without_default)]
#![warn(clippy::future_not_send)]
#![warn(clippy::unused_async)]

pub mod config;
pub mod directions;
pub mod dl;
pub mod engine;
pub mod gateway;
pub mod geo;
pub mod location;
pub mod models;
pub mod progress;
pub mod route;

pub use engine::Engine;
pub use geo::Coordinate;

use models::RouteState;

pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;
pub type HashSet<K> = std::collections::HashSet<K, ahash::RandomState>;
pub type ConcurrentHashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("{0}")]
    Conflict(&'static str),
    #[error("fuel plan version is stale, re-fetch before retrying")]
    StaleVersion,
    #[error("another route operation is in flight")]
    Busy,
    #[error("{0}")]
    NotFound(&'static str),
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("cannot {op} a route that is {state}")]
    InvalidTransition { state: RouteState, op: &'static str },
    #[error("location source failed: {0}")]
    Source(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<gateway::GatewayError> for Error {
    fn from(e: gateway::GatewayError) -> Self {
        use gateway::GatewayError as G;
        match e {
            G::NotFound(what) => Self::NotFound(what),
            G::Conflict => Self::Conflict("truck already holds an active assignment"),
            G::StaleVersion => Self::StaleVersion,
            e @ (G::Status(_) | G::Reqwest(_) | G::Unavailable(_)) => {
                Self::NetworkFailure(e.to_string())
            }
        }
    }
}

impl From<location::SourceError> for Error {
    fn from(e: location::SourceError) -> Self {
        Self::Source(e.to_string())
    }
}

macro_rules! conf_env {
    (static $name:ident: $ty:ty = {from: $env:expr, default: $def:expr,}) => {
        static $name: std::sync::LazyLock<$ty> = std::sync::LazyLock::new(|| {
            let v = std::env::var($env)
                .unwrap_or_else(|_| $def.to_owned())
                .parse()
                .unwrap_or_else(|_| panic!(concat!("invalid ", $env)));
            tracing::info!("{} = {v}", $env);
            v
        });
    };
}
pub(crate) use conf_env;
