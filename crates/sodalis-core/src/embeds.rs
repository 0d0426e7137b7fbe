use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{Result, SodalisError};

/// Per-user dense vectors consumed by the cosine feature. Vectors are
/// opaque; length agreement is the caller's concern.
pub trait EmbeddingStore: Send + Sync {
    fn get(&self, user: u64) -> Option<Vec<f32>>;
    fn put(&self, user: u64, vec: Vec<f32>) -> Result<()>;
}

#[derive(Default)]
pub struct MemEmbeds {
    vectors: RwLock<HashMap<u64, Vec<f32>>>,
}

impl MemEmbeds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmbeddingStore for MemEmbeds {
    fn get(&self, user: u64) -> Option<Vec<f32>> {
        self.vectors.read().get(&user).cloned()
    }

    fn put(&self, user: u64, vec: Vec<f32>) -> Result<()> {
        if vec.is_empty() {
            return Err(SodalisError::EmptyVector);
        }
        self.vectors.write().insert(user, vec);
        Ok(())
    }
}
