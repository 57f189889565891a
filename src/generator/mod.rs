pub mod context;
pub mod discovery;
pub mod loader;
pub mod outlet;
pub mod relevance;
pub mod retrieval;
pub mod scrape;
pub mod synthesis;
pub mod types;
pub mod workflow;
