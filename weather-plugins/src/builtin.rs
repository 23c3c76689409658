//! The plugin classes compiled into this build.

use crate::{
    feature,
    legacy::WorkerPool,
    plugin::PluginCatalog,
    provider::ProviderId,
};

/// Every built-in provider plus the built-in features. Blocking providers
/// share `pool`.
pub fn builtin_catalog(pool: &WorkerPool) -> PluginCatalog {
    let mut catalog = PluginCatalog::new();
    for id in ProviderId::all() {
        catalog.add(id.plugin_class(pool));
    }
    catalog.add(feature::history::plugin_class());
    catalog
}
