pub mod cache;
pub mod embeds;
pub mod error;
pub mod graph;
pub mod pymk;

pub use cache::{CacheHooks, CacheKey, SuggestionCache};
pub use embeds::{EmbeddingStore, MemEmbeds};
pub use error::SodalisError;
pub use graph::{MemGraph, SocialGraph};
pub use pymk::{PymkConfig, PymkService, Suggestion, Why};
