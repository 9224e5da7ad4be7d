use std::path::{Path, PathBuf};

use crate::format::zone_path;

/// Where the catalog lives and the defaults applied to new queries.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CatalogConfig {
    /// Directory holding the `ddd/Uzzzz.bin` zone files.
    pub root: PathBuf,
    /// Radius of a center query given without one, in mas.
    pub default_radius_mas: i32,
    /// Result limit of a query given without one.
    pub default_limit: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/USNOB"),
            default_radius_mas: 450_000,
            default_limit: 100,
        }
    }
}

impl CatalogConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn zone_path(&self, zone: u16) -> PathBuf {
        zone_path(&self.root, zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CatalogConfig::default();
        assert_eq!(config.root, PathBuf::from("/USNOB"));
        assert_eq!(config.default_radius_mas, 7 * 60_000 + 30_000);
        assert_eq!(config.default_limit, 100);
    }

    #[test]
    fn test_zone_path_uses_root() {
        let config = CatalogConfig::new("/data/usnob");
        assert_eq!(config.zone_path(1799), PathBuf::from("/data/usnob/179/U1799.bin"));
        assert_eq!(config.default_limit, 100);
    }
}
