//! Usage aggregation: raw upstream attempts → minute buckets → hour/day/
//! month rollups, plus the dashboard query that stitches historical
//! buckets with a live tail.

pub mod aggregate;
pub mod bucket;
pub mod query;

pub use aggregate::StatsService;
pub use query::{QueryRequest, StatsBucket};

use maxx_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("invalid range: start is after end")]
    Range,
    #[error("unknown timezone: {0}")]
    Timezone(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StatsResult<T> = Result<T, StatsError>;

/// Dimension key of one bucket row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimKey {
    pub route_id: i64,
    pub provider_id: i64,
    pub project_id: i64,
    pub api_token_id: i64,
    pub client_type: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub request_count: i64,
    pub input_token_count: i64,
    pub output_token_count: i64,
    pub cache_read_token_count: i64,
    pub cache_5m_write_token_count: i64,
    pub cache_1h_write_token_count: i64,
    pub cost: i64,
}

impl Counters {
    pub fn add(&mut self, other: &Counters) {
        self.request_count += other.request_count;
        self.input_token_count += other.input_token_count;
        self.output_token_count += other.output_token_count;
        self.cache_read_token_count += other.cache_read_token_count;
        self.cache_5m_write_token_count += other.cache_5m_write_token_count;
        self.cache_1h_write_token_count += other.cache_1h_write_token_count;
        self.cost += other.cost;
    }
}
