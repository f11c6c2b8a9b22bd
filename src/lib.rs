pub mod config;
pub mod envelope;
pub mod error;
pub mod fetcher;
pub mod filters;
pub mod handlers;
pub mod middleware;
pub mod normalizer;
pub mod rate_limiter;
pub mod server;
pub mod store;
pub mod upstream;

pub use config::Config;
pub use envelope::{EnvelopeMeta, ResultEnvelope};
pub use error::{GatewayError, Result};
pub use fetcher::CacheAsideFetcher;
pub use filters::FilterSet;
pub use normalizer::{FieldMappingNormalizer, FieldMappingTable, NormalizedRecord};
pub use server::Server;
