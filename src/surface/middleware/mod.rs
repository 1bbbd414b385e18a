//! Request pipeline middleware
//!
//! Applied outermost first: batching → response cache → retry →
//! compression. Each concern lives in its own module; the dispatcher in
//! [`crate::surface`] assembles them.

pub mod batch;
pub mod cache;
pub mod compress;

pub use batch::Batcher;
pub use cache::ResponseCache;
pub use compress::Encoding;
