/// Repository Module
///
/// Database access split by concern: multi-row entity upserts used by the
/// ingestion workers, the ingestion job tracker, and the read-only revenue
/// analytics queries.
pub mod analytics;
pub mod job;
pub mod upsert;

pub use analytics::AnalyticsRepository;
pub use job::JobRepository;
