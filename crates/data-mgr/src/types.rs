//! Core types shared by the cache, the grid factory and the facade.

use serde::{Deserialize, Serialize};

/// Role of a variable within a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    /// A data variable sampled on a grid described by coordinate variables.
    Data,
    /// A coordinate variable supplying positions along `axis`.
    ///
    /// `uniform` is true when the samples are evenly spaced.
    Coord { axis: usize, uniform: bool },
}

/// Metadata describing one variable, as reported by a data collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarInfo {
    pub name: String,
    pub kind: VarKind,
    pub time_varying: bool,
    /// Spatial coordinate variables, ordered by axis.
    pub coord_vars: Vec<String>,
    /// Available compression ratios, one per level of detail.
    pub cratios: Vec<usize>,
    /// Number of refinement levels, including the native resolution.
    pub num_levels: usize,
    pub periodic: Vec<bool>,
    pub missing_value: Option<f64>,
}

impl VarInfo {
    /// Describe a data variable defined on the given coordinate variables.
    pub fn data<S: Into<String>>(
        name: impl Into<String>,
        coord_vars: impl IntoIterator<Item = S>,
    ) -> Self {
        let coord_vars: Vec<String> = coord_vars.into_iter().map(Into::into).collect();
        let periodic = vec![false; coord_vars.len()];
        Self {
            name: name.into(),
            kind: VarKind::Data,
            time_varying: true,
            coord_vars,
            cratios: vec![1],
            num_levels: 1,
            periodic,
            missing_value: None,
        }
    }

    /// Describe a coordinate variable for `axis`.
    pub fn coord(name: impl Into<String>, axis: usize, uniform: bool) -> Self {
        Self {
            name: name.into(),
            kind: VarKind::Coord { axis, uniform },
            time_varying: false,
            coord_vars: Vec::new(),
            cratios: vec![1],
            num_levels: 1,
            periodic: vec![false],
            missing_value: None,
        }
    }

    /// Set whether the variable changes between time steps.
    pub fn time_varying(mut self, time_varying: bool) -> Self {
        self.time_varying = time_varying;
        self
    }

    /// Set the number of refinement levels.
    pub fn with_levels(mut self, num_levels: usize) -> Self {
        self.num_levels = num_levels.max(1);
        self
    }

    /// Set the compression ratios (one per level of detail).
    pub fn with_cratios(mut self, cratios: Vec<usize>) -> Self {
        self.cratios = cratios;
        self
    }

    /// Set per-axis periodicity.
    pub fn with_periodic(mut self, periodic: Vec<bool>) -> Self {
        self.periodic = periodic;
        self
    }

    /// Set the missing-value sentinel.
    pub fn with_missing_value(mut self, missing_value: f64) -> Self {
        self.missing_value = Some(missing_value);
        self
    }

    /// True for coordinate variables.
    pub fn is_coord(&self) -> bool {
        matches!(self.kind, VarKind::Coord { .. })
    }

    /// True for coordinate variables flagged as evenly spaced.
    pub fn is_uniform(&self) -> bool {
        matches!(self.kind, VarKind::Coord { uniform: true, .. })
    }

    /// Number of levels of detail (at least one).
    pub fn num_lods(&self) -> usize {
        self.cratios.len().max(1)
    }

    /// Clamp a refinement level into `[-(num_levels - 1), 0]`.
    ///
    /// Level 0 is the native resolution; each step below halves the
    /// resolution along every axis.
    pub fn clamp_level(&self, level: i32) -> i32 {
        level.clamp(self.coarsest_level(), 0)
    }

    /// The coarsest legal refinement level, `-(num_levels - 1)`.
    pub fn coarsest_level(&self) -> i32 {
        -(self.num_levels.max(1) as i32 - 1)
    }

    /// Clamp a level of detail into `[0, num_lods - 1]`.
    ///
    /// Negative values count back from the finest level of detail, so -1
    /// always selects the least compressed data.
    pub fn clamp_lod(&self, lod: i32) -> i32 {
        let nlods = self.num_lods() as i32;
        if lod >= nlods {
            nlods - 1
        } else if lod < 0 {
            (nlods + lod).max(0)
        } else {
            lod
        }
    }
}

/// Identity of a cached region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionKey {
    pub ts: usize,
    pub varname: String,
    pub level: i32,
    pub lod: i32,
    pub bmin: Vec<usize>,
    pub bmax: Vec<usize>,
}

impl RegionKey {
    pub fn new(
        ts: usize,
        varname: impl Into<String>,
        level: i32,
        lod: i32,
        bmin: Vec<usize>,
        bmax: Vec<usize>,
    ) -> Self {
        Self {
            ts,
            varname: varname.into(),
            level,
            lod,
            bmin,
            bmax,
        }
    }
}

/// Statistics about the region cache.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub locked_entries: usize,
    pub memory_bytes: u64,
    pub pool_capacity_bytes: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_clamp() {
        let info = VarInfo::data("T", ["x", "y"]).with_levels(3);
        assert_eq!(info.clamp_level(0), 0);
        assert_eq!(info.clamp_level(4), 0);
        assert_eq!(info.clamp_level(-1), -1);
        assert_eq!(info.clamp_level(-2), -2);
        assert_eq!(info.clamp_level(-7), -2);
        assert_eq!(info.coarsest_level(), -2);
        assert_eq!(VarInfo::coord("x", 0, true).coarsest_level(), 0);
    }

    #[test]
    fn test_lod_clamp() {
        let info = VarInfo::data("T", ["x"]).with_cratios(vec![100, 10, 1]);
        assert_eq!(info.clamp_lod(0), 0);
        assert_eq!(info.clamp_lod(2), 2);
        assert_eq!(info.clamp_lod(9), 2);
        assert_eq!(info.clamp_lod(-1), 2);
        assert_eq!(info.clamp_lod(-3), 0);
        assert_eq!(info.clamp_lod(-10), 0);

        let single = VarInfo::coord("x", 0, true).with_cratios(vec![]);
        assert_eq!(single.clamp_lod(-1), 0);
        assert_eq!(single.clamp_lod(3), 0);
    }

    #[test]
    fn test_var_kind_helpers() {
        assert!(VarInfo::coord("x", 0, true).is_uniform());
        assert!(!VarInfo::coord("lon", 0, false).is_uniform());
        assert!(!VarInfo::data("T", ["x"]).is_coord());
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let mut stats = CacheStats::default();
        assert!((stats.hit_rate() - 0.0).abs() < f64::EPSILON);

        stats.hits = 3;
        stats.misses = 1;
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
