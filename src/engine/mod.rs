pub mod bucket;
pub mod normalize;
pub mod sanitize;
pub mod store;

// Re-export the engine surface for convenient access
// (e.g. `use crate::engine::CandleStore`).
pub use bucket::Bucketizer;
pub use normalize::normalize_symbol;
pub use store::CandleStore;
