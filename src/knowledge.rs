//! Knowledge/retrieval collaborator boundary.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One retrieved snippet from the external index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub content: String,
    pub source: Option<String>,
    pub score: f64,
}

/// Optional retrieval-augmentation collaborator. Scan and chat paths use it
/// when wired; everything degrades gracefully when it is absent.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<KnowledgeItem>>;

    async fn is_available(&self) -> bool {
        true
    }
}
