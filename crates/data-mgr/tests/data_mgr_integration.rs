//! End-to-end tests of the data manager over an in-memory collection.

use std::sync::Arc;

use data_mgr::{
    DataMgr, DataMgrConfig, DataMgrError, GridType, MemoryCollection, RegionCache, RegionKey,
    VarInfo, VariableQuery,
};
use test_utils::{
    assert_approx_eq, create_grid_with_missing, create_rotated_coords, create_terrain_heights,
    create_test_volume, create_uniform_coords, init_tracing, test_volume_value,
};

fn small_config() -> DataMgrConfig {
    DataMgrConfig {
        mem_size_mb: 16,
        pool_block_size: 4096,
    }
}

/// `T(x, y)` on uniform coordinates `x = 0..nx`, `y = 0..ny`.
fn regular_collection(nx: usize, ny: usize, bs: usize, levels: usize) -> MemoryCollection {
    MemoryCollection::new()
        .with_variable(
            VarInfo::coord("x", 0, true).with_levels(levels),
            vec![nx],
            vec![bs],
            vec![create_uniform_coords(nx, 0.0, 1.0)],
        )
        .with_variable(
            VarInfo::coord("y", 1, true).with_levels(levels),
            vec![ny],
            vec![bs],
            vec![create_uniform_coords(ny, 0.0, 1.0)],
        )
        .with_variable(
            VarInfo::data("T", ["x", "y"]).with_levels(levels),
            vec![nx, ny],
            vec![bs, bs],
            vec![create_test_volume(&[nx, ny])],
        )
}

#[test]
fn test_level_is_clamped_not_rejected() {
    init_tracing();
    let mut mgr = DataMgr::new(regular_collection(100, 50, 16, 3), small_config()).unwrap();

    let grid = mgr.get_variable(&VariableQuery::new(0, "T").at_level(-10)).unwrap();
    assert_eq!(grid.level(), -2);
    assert_eq!(grid.dims(), &[25, 13]);

    let grid = mgr.get_variable(&VariableQuery::new(0, "T").at_level(4).at_lod(7)).unwrap();
    assert_eq!(grid.level(), 0);
    assert_eq!(grid.lod(), 0);
    assert_eq!(grid.dims(), &[100, 50]);
}

#[test]
fn test_coarser_level_averages_finer_samples() {
    let mut mgr = DataMgr::new(regular_collection(100, 50, 16, 2), small_config()).unwrap();
    let grid = mgr.get_variable(&VariableQuery::new(0, "T").at_level(-1)).unwrap();

    // Mean of (0,0)=0, (1,0)=1000, (0,1)=1, (1,1)=1001
    assert_approx_eq!(grid.value_at_index(&[0, 0]).unwrap(), 500.5, 1e-3);
    // Coordinates are decimated the same way
    let coords = grid.user_coordinates(&[3, 0]).unwrap();
    assert_approx_eq!(coords[0], 6.5, 1e-6);

    // Only level 0 is ever read from the collection
    let reads = mgr.collection().reads();
    mgr.get_variable(&VariableQuery::new(0, "T").at_level(0)).unwrap();
    assert_eq!(mgr.collection().reads(), reads);
}

#[test]
fn test_reacquire_returns_same_buffer_without_reading() {
    let mut mgr = DataMgr::new(regular_collection(64, 64, 32, 1), small_config()).unwrap();
    let query = VariableQuery::new(0, "T").voxels(vec![0, 0], vec![10, 10]).locked();

    let first = mgr.get_variable(&query).unwrap();
    let reads = mgr.collection().reads();
    let second = mgr.get_variable(&query).unwrap();

    assert!(Arc::ptr_eq(
        first.data().unwrap().buffer(),
        second.data().unwrap().buffer()
    ));
    assert_eq!(mgr.collection().reads(), reads);
    assert_eq!(mgr.cache_stats().locked_entries, 1);

    assert_eq!(mgr.unlock_grid(first), 1);
    assert_eq!(mgr.cache_stats().locked_entries, 1);
    assert_eq!(mgr.unlock_grid(second), 1);
    assert_eq!(mgr.cache_stats().locked_entries, 0);
}

#[test]
fn test_one_block_budget_evicts_unlocked_and_fails_on_locked() {
    let block_values = 64 * 64;
    let block_bytes = block_values * std::mem::size_of::<f32>();
    let a = RegionKey::new(0, "T", 0, 0, vec![0, 0], vec![0, 0]);
    let b = RegionKey::new(0, "T", 0, 0, vec![1, 0], vec![1, 0]);
    let fill = |buf: &mut [f32]| {
        buf.fill(1.0);
        Ok(())
    };

    // Unlocked A is evicted to make room for B
    let mut cache = RegionCache::new(block_bytes, block_bytes);
    cache.fill(a.clone(), block_values, false, fill).unwrap();
    cache.fill(b.clone(), block_values, false, fill).unwrap();
    assert!(!cache.contains(&a));
    assert!(cache.contains(&b));
    assert_eq!(cache.stats().evictions, 1);

    // Locked A cannot be evicted
    let mut cache = RegionCache::new(block_bytes, block_bytes);
    cache.fill(a.clone(), block_values, true, fill).unwrap();
    let err = cache.fill(b.clone(), block_values, false, fill).unwrap_err();
    assert!(matches!(err, DataMgrError::AllocationFailure { .. }));
    assert!(cache.contains(&a));
    assert!(!cache.contains(&b));
}

#[test]
fn test_locked_grid_survives_memory_pressure() {
    init_tracing();
    // Four 256 KiB pool blocks; one 256x256 data block fills one pool block
    let config = DataMgrConfig {
        mem_size_mb: 1,
        pool_block_size: 256 * 1024,
    };
    let mut mgr = DataMgr::new(regular_collection(512, 512, 256, 1), config).unwrap();

    let a = mgr
        .get_variable(&VariableQuery::new(0, "T").voxels(vec![0, 0], vec![0, 0]).locked())
        .unwrap();
    assert_eq!(mgr.cache_stats().locked_entries, 1);

    // A second block fits by evicting the unlocked coordinate regions
    let b = mgr
        .get_variable(&VariableQuery::new(0, "T").voxels(vec![300, 300], vec![300, 300]))
        .unwrap();
    assert_eq!(b.value_at_index(&[44, 44]), Some(test_volume_value(&[300, 300])));
    assert!(mgr.cache_stats().evictions >= 2);

    // The whole domain cannot fit while A is held
    let err = mgr.get_variable(&VariableQuery::new(0, "T")).unwrap_err();
    assert!(matches!(err, DataMgrError::AllocationFailure { .. }));
    assert_eq!(mgr.cache_stats().locked_entries, 1);
    assert_eq!(a.value_at_index(&[0, 0]), Some(0.0));

    assert_eq!(mgr.unlock_grid(a), 1);
    assert_eq!(mgr.cache_stats().locked_entries, 0);
}

#[test]
fn test_grid_factory_classifies_each_topology() {
    init_tracing();
    let (lon, lat) = create_rotated_coords(8, 8, 30.0);
    let collection = regular_collection(4, 4, 4, 1)
        .with_variable(VarInfo::coord("HGT", 2, false), vec![4, 4, 5], vec![4, 4, 4], vec![
            create_terrain_heights(4, 4, 5, 100.0, 50.0),
        ])
        .with_variable(
            VarInfo::data("P", ["x", "y", "HGT"]),
            vec![4, 4, 5],
            vec![4, 4, 4],
            vec![create_test_volume(&[4, 4, 5])],
        )
        .with_variable(VarInfo::coord("lon", 0, false), vec![8, 8], vec![4, 4], vec![lon])
        .with_variable(VarInfo::coord("lat", 1, false), vec![8, 8], vec![4, 4], vec![lat])
        .with_variable(
            VarInfo::data("S", ["lon", "lat"]),
            vec![8, 8],
            vec![4, 4],
            vec![create_test_volume(&[8, 8])],
        )
        .with_variable(
            VarInfo::data("U", ["x", "lat"]),
            vec![4, 8],
            vec![4, 4],
            vec![create_test_volume(&[4, 8])],
        );
    let mut mgr = DataMgr::new(collection, small_config()).unwrap();

    let t = mgr.get_variable(&VariableQuery::new(0, "T")).unwrap();
    assert_eq!(t.grid_type(), GridType::Regular);

    let p = mgr.get_variable(&VariableQuery::new(0, "P").locked()).unwrap();
    assert_eq!(p.grid_type(), GridType::Layered);
    // Column (2, 1) starts at 130 and rises 50 per layer
    assert_eq!(p.value_at(&[2.0, 1.0, 282.0]), Some(test_volume_value(&[2, 1, 3])));
    let (min, max) = p.user_extents();
    assert_eq!(min, vec![0.0, 0.0, 100.0]);
    assert_eq!(max, vec![3.0, 3.0, 360.0]);
    // Data and vertical field stay locked
    assert_eq!(mgr.unlock_grid(p), 2);

    let s = mgr.get_variable(&VariableQuery::new(0, "S")).unwrap();
    assert_eq!(s.grid_type(), GridType::Curvilinear);
    let at = s.user_coordinates(&[3, 4]).unwrap();
    assert_eq!(s.value_at(&[at[0] + 0.1, at[1] - 0.1]), Some(test_volume_value(&[3, 4])));
    assert_eq!(mgr.num_search_trees(), 1);

    // Search tree is reused by the next request for the same region
    mgr.get_variable(&VariableQuery::new(0, "S")).unwrap();
    assert_eq!(mgr.num_search_trees(), 1);

    let err = mgr.get_variable(&VariableQuery::new(0, "U")).unwrap_err();
    assert!(matches!(err, DataMgrError::UnsupportedTopology(_)));
    assert_eq!(mgr.cache_stats().locked_entries, 0);
}

#[test]
fn test_search_tree_per_voxel_box_with_coarser_coordinate_blocks() {
    init_tracing();
    let (lon, lat) = create_rotated_coords(8, 8, 30.0);
    // One 8x8 coordinate block backs every 4x4 data block
    let collection = MemoryCollection::new()
        .with_variable(VarInfo::coord("lon", 0, false), vec![8, 8], vec![8, 8], vec![lon])
        .with_variable(VarInfo::coord("lat", 1, false), vec![8, 8], vec![8, 8], vec![lat])
        .with_variable(
            VarInfo::data("S", ["lon", "lat"]),
            vec![8, 8],
            vec![4, 4],
            vec![create_test_volume(&[8, 8])],
        );
    let mut mgr = DataMgr::new(collection, small_config()).unwrap();

    let corner = mgr
        .get_variable(&VariableQuery::new(0, "S").voxels(vec![4, 4], vec![7, 7]))
        .unwrap();
    assert_eq!(corner.min_abs(), &[4, 4]);
    let at = corner.user_coordinates(&[1, 2]).unwrap();
    assert_eq!(corner.value_at(&at), Some(test_volume_value(&[5, 6])));

    let full = mgr.get_variable(&VariableQuery::new(0, "S")).unwrap();
    assert_eq!(mgr.num_search_trees(), 2);
    for idx in [[0, 0], [1, 1], [2, 5], [7, 7]] {
        let at = full.user_coordinates(&idx).unwrap();
        assert_eq!(full.value_at(&at), Some(test_volume_value(&idx)));
    }
}

#[test]
fn test_variable_extents_are_exact() {
    let mut mgr = DataMgr::new(regular_collection(100, 50, 32, 1), small_config()).unwrap();
    let (min, max) = mgr.get_variable_extents(0, "T", 0).unwrap();
    assert_eq!(min, vec![0.0, 0.0]);
    assert_eq!(max, vec![99.0, 49.0]);

    // Served from the extents cache afterwards
    let reads = mgr.collection().reads();
    assert_eq!(mgr.get_variable_extents(0, "T", 0).unwrap(), (min, max));
    assert_eq!(mgr.collection().reads(), reads);
}

#[test]
fn test_extents_query_materializes_covering_blocks() {
    let mut mgr = DataMgr::new(regular_collection(100, 50, 16, 1), small_config()).unwrap();

    let query = VariableQuery::new(0, "T").within(vec![20.5, 20.5], vec![25.0, 25.0]);
    let grid = mgr.get_variable(&query).unwrap();
    assert_eq!(grid.min_abs(), &[16, 16]);
    assert_eq!(grid.dims(), &[16, 16]);
    assert_eq!(grid.value_at(&[22.0, 23.0]), Some(test_volume_value(&[22, 23])));
    assert_eq!(mgr.num_block_extents(), 1);

    // Extra query dimensions are ignored
    let query = VariableQuery::new(0, "T").within(vec![0.0, 0.0, -5.0], vec![1.0, 1.0, 5.0]);
    assert_eq!(mgr.get_variable(&query).unwrap().min_abs(), &[0, 0]);

    let outside = VariableQuery::new(0, "T").within(vec![500.0, 500.0], vec![600.0, 600.0]);
    assert!(matches!(
        mgr.get_variable(&outside).unwrap_err(),
        DataMgrError::InvalidExtents(_)
    ));

    let malformed = VariableQuery::new(0, "T").within(vec![0.0], vec![1.0]);
    assert!(matches!(
        mgr.get_variable(&malformed).unwrap_err(),
        DataMgrError::InvalidExtents(_)
    ));
}

#[test]
fn test_read_failure_frees_allocation() {
    let mut collection = regular_collection(32, 32, 16, 1);
    collection.set_read_failure("T", true);
    let mut mgr = DataMgr::new(collection, small_config()).unwrap();

    let err = mgr.get_variable(&VariableQuery::new(0, "T").locked()).unwrap_err();
    assert!(matches!(err, DataMgrError::ReadFailure(_)));

    let stats = mgr.cache_stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.locked_entries, 0);
    assert_eq!(stats.memory_bytes, 0);
    assert_eq!(mgr.collection().open_handles(), 0);

    // Recovers once the collection does
    mgr.collection_mut().set_read_failure("T", false);
    assert!(mgr.get_variable(&VariableQuery::new(0, "T")).is_ok());
}

#[test]
fn test_missing_dependency() {
    let collection = regular_collection(8, 8, 8, 1).with_variable(
        VarInfo::data("Q", ["x", "ghost"]),
        vec![8, 8],
        vec![8, 8],
        vec![create_test_volume(&[8, 8])],
    );
    let mut mgr = DataMgr::new(collection, small_config()).unwrap();

    let err = mgr.get_variable(&VariableQuery::new(0, "Q")).unwrap_err();
    assert!(matches!(err, DataMgrError::MissingDependency(_)));
    assert!(!mgr.variable_exists(0, "Q", 0, 0));
    assert!(mgr.variable_exists(0, "T", 0, 0));

    let err = mgr.get_variable(&VariableQuery::new(0, "nope")).unwrap_err();
    assert!(matches!(err, DataMgrError::VariableNotFound(_)));
}

#[test]
fn test_variable_exists_tolerates_cyclic_coordinates() {
    let mut x = VarInfo::coord("x", 0, true);
    x.coord_vars = vec!["x".to_string()];
    let collection = MemoryCollection::new()
        .with_variable(x, vec![4], vec![4], vec![create_uniform_coords(4, 0.0, 1.0)])
        .with_variable(VarInfo::data("T", ["x"]), vec![4], vec![4], vec![vec![1.0; 4]]);
    let mut mgr = DataMgr::new(collection, small_config()).unwrap();

    assert!(mgr.variable_exists(0, "T", 0, 0));
    // Level and lod over-requests are clamped here too
    assert!(mgr.variable_exists(0, "T", -3, 9));
}

#[test]
fn test_data_range_skips_missing_values() {
    let missing = -999.0;
    let mut data = create_grid_with_missing(&[4, 4], &[vec![0, 0], vec![3, 3]], missing);
    data[5] = 7.0;
    data[6] = -2.0;
    let collection = regular_collection(4, 4, 4, 1)
        .with_variable(
            VarInfo::data("M", ["x", "y"]).with_missing_value(missing as f64),
            vec![4, 4],
            vec![4, 4],
            vec![data],
        )
        .with_variable(
            VarInfo::data("E", ["x", "y"]).with_missing_value(missing as f64),
            vec![4, 4],
            vec![4, 4],
            vec![vec![missing; 16]],
        );
    let mut mgr = DataMgr::new(collection, small_config()).unwrap();

    assert_eq!(mgr.get_data_range(0, "M", 0, 0).unwrap(), (-2.0, 7.0));
    assert_eq!(mgr.get_data_range(0, "E", 0, 0).unwrap(), (0.0, 0.0));

    let grid = mgr.get_variable(&VariableQuery::new(0, "M")).unwrap();
    assert_eq!(grid.missing_value(), Some(-999.0));
}

#[test]
fn test_time_invariant_coordinates_are_shared() {
    let collection = MemoryCollection::new()
        .with_variable(
            VarInfo::coord("x", 0, true),
            vec![8],
            vec![8],
            vec![create_uniform_coords(8, 0.0, 1.0)],
        )
        .with_variable(
            VarInfo::data("T", ["x"]),
            vec![8],
            vec![8],
            vec![vec![0.0; 8], vec![1.0; 8], vec![2.0; 8]],
        );
    let mut mgr = DataMgr::new(collection, small_config()).unwrap();

    for ts in 0..3 {
        let grid = mgr.get_variable(&VariableQuery::new(ts, "T")).unwrap();
        assert_eq!(grid.timestep(), ts);
        assert_eq!(grid.range(), Some((ts as f32, ts as f32)));
    }
    // Three data regions plus one x region
    assert_eq!(mgr.cache_stats().entries, 4);

    let err = mgr.get_variable(&VariableQuery::new(3, "T")).unwrap_err();
    assert!(matches!(err, DataMgrError::ReadFailure(_)));
}

#[test]
fn test_clear_and_free_var() {
    let mut mgr = DataMgr::new(regular_collection(32, 32, 16, 1), small_config()).unwrap();
    let query = VariableQuery::new(0, "T").within(vec![0.0, 0.0], vec![4.0, 4.0]);
    mgr.get_variable(&query).unwrap();
    assert_eq!(mgr.num_block_extents(), 1);

    assert_eq!(mgr.free_var("T"), 1);
    let reads = mgr.collection().reads();
    mgr.get_variable(&query).unwrap();
    assert_eq!(mgr.collection().reads(), reads + 1);

    mgr.clear();
    assert_eq!(mgr.cache_stats().entries, 0);
    assert_eq!(mgr.num_block_extents(), 0);

    // Everything is rebuilt on demand
    mgr.get_variable(&query).unwrap();
    assert_eq!(mgr.num_block_extents(), 1);
}

#[test]
fn test_pass_through_metadata() {
    let mgr = DataMgr::new(regular_collection(100, 50, 16, 3), small_config()).unwrap();
    assert_eq!(mgr.num_ref_levels("T"), 3);
    assert_eq!(mgr.cratios("T"), vec![1]);
    assert!(mgr.is_time_varying("T"));
    assert!(!mgr.is_time_varying("x"));
    assert_eq!(mgr.coord_vars("T"), Some(vec!["x".to_string(), "y".to_string()]));
    assert_eq!(mgr.dim_lens_at_level("T", -1).unwrap(), (vec![50, 25], vec![16, 16]));
    assert_eq!(mgr.dim_lens_at_level("T", -9).unwrap().0, vec![25, 13]);
}
