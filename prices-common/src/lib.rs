pub mod archive;
pub mod dedup;
pub mod export;
pub mod item;
pub mod metrics;
pub mod pipeline;
pub mod store;
pub mod summary;
pub mod validation;
