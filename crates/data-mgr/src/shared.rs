//! Mutex-guarded data manager for use from async tasks.
//!
//! Every operation takes the mutex for its whole duration, so region
//! acquisition, eviction and allocation never interleave between tasks and
//! each region is materialized at most once.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::collection::DataCollection;
use crate::data_mgr::{DataMgr, VariableQuery};
use crate::error::Result;
use crate::grid::Grid;
use crate::types::CacheStats;

/// Cloneable handle to a [`DataMgr`] shared between tasks.
pub struct SharedDataMgr<C: DataCollection> {
    inner: Arc<Mutex<DataMgr<C>>>,
}

impl<C: DataCollection> Clone for SharedDataMgr<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: DataCollection> SharedDataMgr<C> {
    pub fn new(mgr: DataMgr<C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(mgr)),
        }
    }

    /// Get the underlying mutex, for operations not wrapped here.
    pub fn inner(&self) -> Arc<Mutex<DataMgr<C>>> {
        Arc::clone(&self.inner)
    }

    pub async fn get_variable(&self, query: &VariableQuery) -> Result<Grid> {
        self.inner.lock().await.get_variable(query)
    }

    pub async fn unlock_grid(&self, grid: Grid) -> usize {
        self.inner.lock().await.unlock_grid(grid)
    }

    pub async fn get_variable_extents(
        &self,
        ts: usize,
        varname: &str,
        level: i32,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        self.inner.lock().await.get_variable_extents(ts, varname, level)
    }

    pub async fn get_data_range(
        &self,
        ts: usize,
        varname: &str,
        level: i32,
        lod: i32,
    ) -> Result<(f32, f32)> {
        self.inner.lock().await.get_data_range(ts, varname, level, lod)
    }

    pub async fn variable_exists(&self, ts: usize, varname: &str, level: i32, lod: i32) -> bool {
        self.inner.lock().await.variable_exists(ts, varname, level, lod)
    }

    /// Warm the cache for a set of queries without keeping any locks.
    ///
    /// Failed queries are logged and skipped. Returns the number of queries
    /// that were materialized.
    pub async fn prefetch(&self, queries: &[VariableQuery]) -> usize {
        let mut mgr = self.inner.lock().await;
        let mut loaded = 0;
        for query in queries {
            let query = VariableQuery {
                lock: false,
                ..query.clone()
            };
            match mgr.get_variable(&query) {
                Ok(_) => loaded += 1,
                Err(e) => {
                    tracing::warn!(
                        varname = %query.varname,
                        ts = query.ts,
                        level = query.level,
                        error = %e,
                        "Prefetch failed"
                    );
                }
            }
        }
        tracing::debug!(requested = queries.len(), loaded, "Prefetch complete");
        loaded
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.lock().await.cache_stats()
    }

    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::MemoryCollection;
    use crate::config::DataMgrConfig;
    use crate::types::VarInfo;

    fn shared() -> SharedDataMgr<MemoryCollection> {
        let collection = MemoryCollection::new()
            .with_variable(
                VarInfo::coord("x", 0, true),
                vec![6],
                vec![2],
                vec![vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]],
            )
            .with_variable(
                VarInfo::data("T", ["x"]),
                vec![6],
                vec![2],
                vec![vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0], vec![2.0; 6]],
            );
        let config = DataMgrConfig {
            mem_size_mb: 1,
            pool_block_size: 1024,
        };
        SharedDataMgr::new(DataMgr::new(collection, config).unwrap())
    }

    #[tokio::test]
    async fn test_get_and_unlock() {
        let mgr = shared();
        let grid = mgr.get_variable(&VariableQuery::new(0, "T").locked()).await.unwrap();
        assert_eq!(grid.dims(), &[6]);
        assert_eq!(mgr.cache_stats().await.locked_entries, 1);

        assert_eq!(mgr.unlock_grid(grid).await, 1);
        assert_eq!(mgr.cache_stats().await.locked_entries, 0);
    }

    #[tokio::test]
    async fn test_prefetch_skips_failures() {
        let mgr = shared();
        let queries = vec![
            VariableQuery::new(0, "T").locked(),
            VariableQuery::new(1, "T"),
            VariableQuery::new(0, "missing"),
        ];
        assert_eq!(mgr.prefetch(&queries).await, 2);

        let stats = mgr.cache_stats().await;
        assert_eq!(stats.locked_entries, 0);
        // Two time steps of T plus the shared x coordinate
        assert_eq!(stats.entries, 3);
    }

    #[tokio::test]
    async fn test_concurrent_requests_read_once() {
        let mgr = shared();
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let mgr = mgr.clone();
                tokio::spawn(async move { mgr.get_data_range(0, "T", 0, 0).await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), (1.0, 9.0));
        }

        let inner = mgr.inner();
        let guard = inner.lock().await;
        assert_eq!(guard.collection().reads(), 2);
    }

    #[test]
    fn test_block_on_extents() {
        let mgr = shared();
        let extents = tokio_test::block_on(mgr.get_variable_extents(0, "T", 0)).unwrap();
        assert_eq!(extents, (vec![0.0], vec![5.0]));
        assert!(tokio_test::block_on(mgr.variable_exists(1, "T", 0, 0)));
        tokio_test::block_on(mgr.clear());
        assert_eq!(tokio_test::block_on(mgr.cache_stats()).entries, 0);
    }
}
