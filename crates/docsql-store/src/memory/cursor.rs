use docsql_ir::Document;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::StoreStats;
use crate::error::Result;
use crate::StoreCursor;

/// Cursor over a materialized result, handed out in batches.
pub(crate) struct MemoryCursor {
    remaining: VecDeque<Document>,
    batch_size: usize,
    closed: bool,
    stats: Arc<StoreStats>,
}

impl MemoryCursor {
    pub(crate) fn open(docs: Vec<Document>, batch_size: usize, stats: Arc<StoreStats>) -> Self {
        stats.cursors_opened.fetch_add(1, Ordering::Relaxed);
        Self {
            remaining: docs.into(),
            batch_size: batch_size.max(1),
            closed: false,
            stats,
        }
    }
}

impl StoreCursor for MemoryCursor {
    fn next_batch(&mut self) -> Result<Vec<Document>> {
        if self.closed {
            return Ok(Vec::new());
        }
        let take = self.batch_size.min(self.remaining.len());
        Ok(self.remaining.drain(..take).collect())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.remaining.clear();
            self.stats.cursors_closed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
