pub mod breaker;
pub mod cache;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod github;
pub mod metrics_defs;
pub mod retry;
pub mod testutils;
pub mod transport;
pub mod types;

pub use errors::{GatewayError, Result};
pub use gateway::{Gateway, Payload, PayloadOrigin};
pub use github::{FanOut, GithubClient, PullState};
pub use types::{AccessToken, PrState, PullRequest, Repository};
