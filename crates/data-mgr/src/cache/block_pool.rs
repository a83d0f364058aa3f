//! Fixed-size block pool backing the region cache.
//!
//! The pool hands out runs of contiguous blocks. Memory regions are added
//! lazily, each one twice the size of the previous (at least the request,
//! at most what remains of the budget), and are never released.

/// Handle to a run of blocks allocated from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockSpan {
    region: usize,
    start: usize,
    len: usize,
}

impl BlockSpan {
    /// Number of blocks in the span.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Run {
    start: usize,
    len: usize,
    used: bool,
}

#[derive(Debug)]
struct PoolRegion {
    size: usize,
    runs: Vec<Run>,
}

/// Block allocator with a hard cap on the total number of blocks.
#[derive(Debug)]
pub struct BlockPool {
    block_size: usize,
    max_blocks: usize,
    regions: Vec<PoolRegion>,
    used_blocks: usize,
}

impl BlockPool {
    /// Create an empty pool of `block_size`-byte blocks capped at `max_blocks`.
    pub fn new(block_size: usize, max_blocks: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            max_blocks,
            regions: Vec::new(),
            used_blocks: 0,
        }
    }

    /// Number of blocks needed to hold `bytes` (at least one).
    pub fn blocks_for_bytes(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.block_size).max(1)
    }

    /// Allocate a run of `n` blocks, growing the pool if needed.
    ///
    /// Returns `None` when no free run is large enough and the budget does
    /// not allow another region of at least `n` blocks.
    pub fn alloc(&mut self, n: usize) -> Option<BlockSpan> {
        let n = n.max(1);
        if let Some(span) = self.alloc_existing(n) {
            return Some(span);
        }
        if !self.grow(n) {
            return None;
        }
        self.alloc_existing(n)
    }

    fn alloc_existing(&mut self, n: usize) -> Option<BlockSpan> {
        for (r, region) in self.regions.iter_mut().enumerate() {
            let Some(i) = region.runs.iter().position(|run| !run.used && run.len >= n) else {
                continue;
            };
            let run = region.runs[i];
            if run.len > n {
                region.runs.insert(
                    i + 1,
                    Run {
                        start: run.start + n,
                        len: run.len - n,
                        used: false,
                    },
                );
            }
            region.runs[i] = Run {
                start: run.start,
                len: n,
                used: true,
            };
            self.used_blocks += n;
            return Some(BlockSpan {
                region: r,
                start: run.start,
                len: n,
            });
        }
        None
    }

    fn grow(&mut self, n: usize) -> bool {
        let total = self.capacity_blocks();
        let mut size = self.regions.last().map_or(n, |r| r.size * 2).max(n);
        if size + total > self.max_blocks {
            size = self.max_blocks.saturating_sub(total);
        }
        if size < n {
            return false;
        }

        tracing::debug!(
            blocks = size,
            bytes = size * self.block_size,
            "Growing region memory pool"
        );

        self.regions.push(PoolRegion {
            size,
            runs: vec![Run {
                start: 0,
                len: size,
                used: false,
            }],
        });
        true
    }

    /// Return a span to the pool, merging it with adjacent free runs.
    pub fn free(&mut self, span: BlockSpan) {
        let Some(region) = self.regions.get_mut(span.region) else {
            tracing::warn!(?span, "Freeing span from unknown pool region");
            return;
        };
        let Some(i) = region
            .runs
            .iter()
            .position(|run| run.used && run.start == span.start && run.len == span.len)
        else {
            tracing::warn!(?span, "Freeing span that is not allocated");
            return;
        };

        region.runs[i].used = false;
        self.used_blocks -= span.len;

        if i + 1 < region.runs.len() && !region.runs[i + 1].used {
            region.runs[i].len += region.runs[i + 1].len;
            region.runs.remove(i + 1);
        }
        if i > 0 && !region.runs[i - 1].used {
            region.runs[i - 1].len += region.runs[i].len;
            region.runs.remove(i);
        }
    }

    /// Release every allocation. Pool regions are kept for reuse.
    pub fn reset(&mut self) {
        for region in &mut self.regions {
            region.runs = vec![Run {
                start: 0,
                len: region.size,
                used: false,
            }];
        }
        self.used_blocks = 0;
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Blocks currently backed by pool regions.
    pub fn capacity_blocks(&self) -> usize {
        self.regions.iter().map(|r| r.size).sum()
    }

    /// Blocks currently allocated.
    pub fn used_blocks(&self) -> usize {
        self.used_blocks
    }

    /// Upper bound on the pool size in blocks.
    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }
}
