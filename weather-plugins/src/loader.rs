//! Discovery of plugin descriptors on disk.
//!
//! A descriptor is a small TOML file whose `PLUGIN_CLASS` entry names a class
//! in the [`PluginCatalog`]:
//!
//! ```toml
//! PLUGIN_CLASS = "openmeteo"
//! capability = "weather_provider"   # optional
//! ```

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    error::LoadError,
    plugin::{Capability, PluginCatalog, PluginClass},
};

/// Entry-point key every descriptor must define.
pub const ENTRY_POINT: &str = "PLUGIN_CLASS";

const CAPABILITY_KEY: &str = "capability";
const DESCRIPTOR_EXTENSION: &str = "toml";
const PACKAGE_INITIALIZERS: &[&str] = &["mod", "lib", "__init__"];

/// Lazily walks `dirs` for descriptor files. Each call walks again.
///
/// Files starting with `_` and package initializers are skipped; a missing
/// root is logged and skipped.
pub fn scan(dirs: &[PathBuf]) -> impl Iterator<Item = PathBuf> + '_ {
    dirs.iter()
        .filter(|dir| {
            if dir.is_dir() {
                debug!(dir = %dir.display(), "scanning for plugins");
                true
            } else {
                warn!(dir = %dir.display(), "plugin directory does not exist or is not a directory");
                false
            }
        })
        .flat_map(|dir| {
            WalkDir::new(dir)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!("skipping unreadable entry while scanning plugins: {err}");
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .map(walkdir::DirEntry::into_path)
                .filter(|path| is_candidate(path))
        })
}

fn is_candidate(path: &Path) -> bool {
    let has_extension = path.extension().and_then(|e| e.to_str()) == Some(DESCRIPTOR_EXTENSION);
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };

    has_extension && !stem.starts_with('_') && !PACKAGE_INITIALIZERS.contains(&stem)
}

/// A descriptor that loaded successfully.
#[derive(Debug, Clone)]
pub struct LoadedUnit {
    /// Dotted alias, e.g. `weather_providers.openmeteo`.
    pub module: String,
    pub path: PathBuf,
    pub class: PluginClass,
}

#[derive(Debug)]
pub struct PluginLoader {
    dirs: Vec<PathBuf>,
    catalog: PluginCatalog,
    units: Mutex<HashMap<PathBuf, LoadedUnit>>,
}

impl PluginLoader {
    pub fn new(dirs: Vec<PathBuf>, catalog: PluginCatalog) -> Self {
        Self { dirs, catalog, units: Mutex::new(HashMap::new()) }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn scan(&self) -> impl Iterator<Item = PathBuf> + '_ {
        scan(&self.dirs)
    }

    /// Resolves one descriptor to its plugin class.
    ///
    /// The same physical file is only ever read once; later calls return the
    /// class recorded under its alias.
    pub fn load(&self, path: &Path) -> Result<PluginClass, LoadError> {
        let canonical = path.canonicalize().map_err(|err| LoadError::InvalidSpec {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        if let Some(unit) = self.units.lock().get(&canonical) {
            debug!(module = %unit.module, "plugin descriptor already loaded");
            return Ok(unit.class.clone());
        }

        let class = self.resolve(path)?;
        let module = self.module_name(&canonical);

        info!(module = %module, plugin = class.name(), path = %path.display(), "loaded plugin descriptor");

        let unit = LoadedUnit { module, path: canonical.clone(), class: class.clone() };
        // a concurrent load of the same file may have won; keep the first alias
        self.units.lock().entry(canonical).or_insert(unit);

        Ok(class)
    }

    fn resolve(&self, path: &Path) -> Result<PluginClass, LoadError> {
        let invalid = |reason: String| LoadError::InvalidSpec { path: path.to_path_buf(), reason };
        let wrong = |reason: String| LoadError::WrongCapability { path: path.to_path_buf(), reason };

        let contents = fs::read_to_string(path).map_err(|err| invalid(err.to_string()))?;
        let table: toml::Table = toml::from_str(&contents).map_err(|err| invalid(err.to_string()))?;

        let entry = table
            .get(ENTRY_POINT)
            .ok_or_else(|| LoadError::MissingEntryPoint { path: path.to_path_buf() })?;

        let class_id = entry.as_str().ok_or_else(|| {
            wrong(format!("{ENTRY_POINT} must name a plugin class, found a {}", entry.type_str()))
        })?;

        let class = self
            .catalog
            .get(class_id)
            .ok_or_else(|| wrong(format!("`{class_id}` is not a known plugin class")))?;

        if let Some(declared) = table.get(CAPABILITY_KEY) {
            let declared = declared
                .as_str()
                .ok_or_else(|| wrong(format!("`{CAPABILITY_KEY}` must be a string")))
                .and_then(|s| Capability::try_from(s).map_err(|err| wrong(err.to_string())))?;

            if declared != class.capability() {
                return Err(wrong(format!(
                    "`{class_id}` is a {}, but the descriptor expects a {declared}",
                    class.capability()
                )));
            }
        }

        Ok(class.clone())
    }

    /// Alias for a descriptor: its path under the scan root, dotted.
    pub fn module_name(&self, canonical: &Path) -> String {
        let relative = self
            .dirs
            .iter()
            .filter_map(|dir| dir.canonicalize().ok())
            .find_map(|root| canonical.strip_prefix(&root).ok().map(Path::to_path_buf))
            .unwrap_or_else(|| canonical.file_name().map(PathBuf::from).unwrap_or_default());

        relative
            .with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Aliases of every descriptor loaded so far, sorted.
    pub fn loaded_modules(&self) -> Vec<String> {
        let mut modules: Vec<_> = self.units.lock().values().map(|u| u.module.clone()).collect();
        modules.sort();
        modules
    }

    pub fn loaded_unit(&self, path: &Path) -> Option<LoadedUnit> {
        let canonical = path.canonicalize().ok()?;
        self.units.lock().get(&canonical).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use std::fs;

    fn catalog() -> PluginCatalog {
        PluginCatalog::new()
            .with(test_support::provider_class("alpha"))
            .with(test_support::feature_class("notes", "Tools", false, test_support::Probe::new()))
    }

    fn write(dir: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn scan_skips_private_files_and_initializers() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "alpha.toml", "PLUGIN_CLASS = \"alpha\"");
        write(dir.path(), "_disabled.toml", "PLUGIN_CLASS = \"alpha\"");
        write(dir.path(), "__init__.toml", "");
        write(dir.path(), "providers/mod.toml", "");
        write(dir.path(), "providers/notes.toml", "PLUGIN_CLASS = \"notes\"");
        write(dir.path(), "README.md", "not a plugin");

        let found: Vec<_> = scan(&[dir.path().to_path_buf()])
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();

        assert_eq!(found, [PathBuf::from("alpha.toml"), PathBuf::from("providers/notes.toml")]);
    }

    #[test]
    fn scan_is_restartable_and_ignores_missing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "alpha.toml", "PLUGIN_CLASS = \"alpha\"");
        let dirs = vec![dir.path().join("missing"), dir.path().to_path_buf()];

        assert_eq!(scan(&dirs).count(), 1);
        write(dir.path(), "beta.toml", "PLUGIN_CLASS = \"alpha\"");
        assert_eq!(scan(&dirs).count(), 2);
    }

    #[test]
    fn load_resolves_class_and_name_matches_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "weather/alpha.toml", "PLUGIN_CLASS = \"alpha\"\ncapability = \"weather_provider\"");
        let loader = PluginLoader::new(vec![dir.path().to_path_buf()], catalog());

        let class = loader.load(&path).unwrap();
        assert_eq!(class.name(), class.metadata().name);
        assert_eq!(class.name(), "alpha");
        assert_eq!(loader.loaded_modules(), ["weather.alpha"]);
    }

    #[test]
    fn missing_entry_point_does_not_hide_other_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a_good.toml", "PLUGIN_CLASS = \"alpha\"");
        let bad = write(dir.path(), "b_bad.toml", "name = \"no entry point\"");
        write(dir.path(), "c_good.toml", "PLUGIN_CLASS = \"notes\"");
        let loader = PluginLoader::new(vec![dir.path().to_path_buf()], catalog());

        let results: Vec<_> = loader.scan().map(|p| loader.load(&p)).collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
        assert_eq!(results[1].as_ref().unwrap_err(), &LoadError::MissingEntryPoint { path: bad });
    }

    #[test]
    fn unparseable_file_is_invalid_spec() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "broken.toml", "PLUGIN_CLASS = ");
        let loader = PluginLoader::new(vec![dir.path().to_path_buf()], catalog());

        assert!(matches!(loader.load(&path), Err(LoadError::InvalidSpec { .. })));
        assert!(matches!(
            loader.load(&dir.path().join("gone.toml")),
            Err(LoadError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn wrong_capability_cases() {
        let dir = tempfile::tempdir().unwrap();
        let loader = PluginLoader::new(vec![dir.path().to_path_buf()], catalog());

        let not_a_string = write(dir.path(), "n.toml", "PLUGIN_CLASS = 42");
        let unknown = write(dir.path(), "u.toml", "PLUGIN_CLASS = \"gamma\"");
        let mismatch = write(dir.path(), "m.toml", "PLUGIN_CLASS = \"notes\"\ncapability = \"weather_provider\"");

        for path in [not_a_string, unknown, mismatch] {
            let err = loader.load(&path).unwrap_err();
            assert!(matches!(err, LoadError::WrongCapability { .. }), "{err}");
        }
    }

    #[test]
    fn same_file_is_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "alpha.toml", "PLUGIN_CLASS = \"alpha\"");
        let loader = PluginLoader::new(vec![dir.path().to_path_buf()], catalog());

        loader.load(&path).unwrap();
        // the alias wins even if the file changes afterwards
        fs::write(&path, "garbage = ").unwrap();
        let again = loader.load(&path).unwrap();

        assert_eq!(again.name(), "alpha");
        assert_eq!(loader.loaded_modules().len(), 1);
        assert_eq!(loader.loaded_unit(&path).unwrap().module, "alpha");
    }
}
