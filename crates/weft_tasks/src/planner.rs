//! Splitting query chunks into work items.

/// Chunks shorter than this are emitted whole even when batching is asked
/// for; below it the scheduling overhead outweighs the extra parallelism.
pub const MIN_ENTITIES_PER_BATCH: usize = 10_000;

/// A `(chunk, start, count)` unit of schedulable work.
///
/// `chunk` indexes the query's chunk views; rows `start..start + count`
/// belong to this item alone for the duration of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub chunk: usize,
    pub start: usize,
    pub count: usize,
}

impl WorkItem {
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicePlanner {
    min_entities_per_batch: usize,
}

impl Default for SlicePlanner {
    fn default() -> Self {
        Self::new(MIN_ENTITIES_PER_BATCH)
    }
}

impl SlicePlanner {
    pub fn new(min_entities_per_batch: usize) -> Self {
        Self {
            min_entities_per_batch,
        }
    }

    pub fn min_entities_per_batch(&self) -> usize {
        self.min_entities_per_batch
    }

    /// One item per non-empty chunk.
    pub fn per_chunk(&self, lengths: &[usize]) -> Vec<WorkItem> {
        lengths
            .iter()
            .enumerate()
            .filter(|(_, &len)| len > 0)
            .map(|(chunk, &len)| WorkItem {
                chunk,
                start: 0,
                count: len,
            })
            .collect()
    }

    /// Items for `batches_per_chunk` slices per chunk.
    ///
    /// Each chunk at or above the minimum is cut into consecutive slices of
    /// `ceil(len / batches_per_chunk)` rows; the last slice may be shorter.
    pub fn plan(&self, lengths: &[usize], batches_per_chunk: usize) -> Vec<WorkItem> {
        if batches_per_chunk <= 1 {
            return self.per_chunk(lengths);
        }

        let mut items = Vec::new();
        for (chunk, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            if len < self.min_entities_per_batch {
                items.push(WorkItem {
                    chunk,
                    start: 0,
                    count: len,
                });
                continue;
            }

            let batch_size = len.div_ceil(batches_per_chunk);
            let mut start = 0;
            while start < len {
                let count = batch_size.min(len - start);
                items.push(WorkItem {
                    chunk,
                    start,
                    count,
                });
                start += count;
            }
        }

        tracing::debug!(
            chunks = lengths.len(),
            batches_per_chunk,
            items = items.len(),
            "planned slices"
        );
        items
    }
}
