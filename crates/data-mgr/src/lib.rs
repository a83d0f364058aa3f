//! Multi-resolution, out-of-core variable cache and grid construction.
//!
//! This crate sits between a format-specific [`DataCollection`] and the
//! code that consumes gridded variables. It provides:
//!
//! - **Region caching**: decoded block ranges held in an LRU cache drawing
//!   from a fixed memory budget, pinned by per-region lock counters
//! - **Refinement levels**: coarser levels built on demand by box-filter
//!   decimation of the next finer level
//! - **Spatial subsetting**: per-block bounding boxes map a user-coordinate
//!   query box to the minimal covering block range
//! - **Grid construction**: regular, layered and curvilinear grids chosen
//!   from the variable's coordinate variables
//!
//! # Architecture
//!
//! ```text
//! DataMgr::get_variable(query)
//!      │
//!      ├─► Clamp level / lod
//!      │
//!      ├─► Extents query? ──► BlockExtents index (built once per signature)
//!      │                            │
//!      │                            └─► intersect ──► block range
//!      │
//!      ├─► RegionCache::acquire for data + coordinate regions
//!      │         │
//!      │         ├─► Cache hit: shared buffer, promoted to MRU
//!      │         │
//!      │         └─► Cache miss: read level 0, or decimate from level + 1
//!      │
//!      └─► GridFactory::make_grid ──► Grid (Regular | Layered | Curvilinear)
//!               │
//!               ▼
//!          caller ... DataMgr::unlock_grid(grid)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use data_mgr::{DataMgr, DataMgrConfig, MemoryCollection, VarInfo, VariableQuery};
//!
//! let collection = MemoryCollection::new()
//!     .with_variable(VarInfo::coord("x", 0, true), vec![100], vec![64], vec![x])
//!     .with_variable(VarInfo::coord("y", 1, true), vec![50], vec![64], vec![y])
//!     .with_variable(VarInfo::data("T", ["x", "y"]), vec![100, 50], vec![64, 64], vec![t]);
//!
//! let mut mgr = DataMgr::new(collection, DataMgrConfig::default())?;
//! let grid = mgr.get_variable(&VariableQuery::new(0, "T").at_level(-1).locked())?;
//! for value in grid.iter() {
//!     // ...
//! }
//! mgr.unlock_grid(grid);
//! ```

pub mod block_extents;
pub mod cache;
pub mod collection;
pub mod config;
pub mod data_mgr;
pub mod error;
pub mod grid;
pub mod index;
pub mod pyramid;
pub mod shared;
pub mod types;

// Re-export commonly used types at crate root
pub use block_extents::{BlockExtents, BlockExtentsKey};
pub use cache::{BlockPool, BlockSpan, RegionCache, RegionRef};
pub use collection::{DataCollection, MemoryCollection, VarHandle};
pub use config::DataMgrConfig;
pub use data_mgr::{DataMgr, Subset, VariableQuery};
pub use error::{DataMgrError, Result};
pub use grid::{
    classify, CoordVarDesc, CurvilinearGrid, CurvilinearSearchTree, Grid, GridType, LayeredGrid,
    RegularGrid,
};
pub use pyramid::{decimate, decimate_dims, decimate_length};
pub use shared::SharedDataMgr;
pub use types::{CacheStats, RegionKey, VarInfo, VarKind};
