//! Static routing from sources to the profiles that consume them.
//!
//! Built once at startup and validated for completeness: every source a
//! profile references must be declared, every declared source must be
//! consumed, and no source may be declared twice. Any violation is fatal
//! before polling begins.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{ConfigError, Profile, SourceKind};

/// Maps each source to the profiles consuming it
#[derive(Debug)]
pub struct SourceRouter {
    routes: HashMap<String, Vec<Arc<Profile>>>,
    /// Declared order, kept so polling is deterministic
    order: Vec<String>,
}

impl SourceRouter {
    /// Build and validate the routing table
    pub fn build(
        sources: &[(String, SourceKind)],
        profiles: &[Arc<Profile>],
    ) -> Result<Self, ConfigError> {
        if sources.is_empty() {
            return Err(ConfigError::NoSources);
        }

        let mut routes: HashMap<String, Vec<Arc<Profile>>> = HashMap::new();
        let mut order = Vec::with_capacity(sources.len());
        for (name, _) in sources {
            if routes.insert(name.clone(), Vec::new()).is_some() {
                return Err(ConfigError::DuplicateSource(name.clone()));
            }
            order.push(name.clone());
        }

        let mut used: HashSet<&str> = HashSet::new();
        for profile in profiles {
            for source in &profile.sources {
                let Some(consumers) = routes.get_mut(source) else {
                    return Err(ConfigError::UnknownSource {
                        name: source.clone(),
                        profile: profile.name.clone(),
                    });
                };
                consumers.push(Arc::clone(profile));
                used.insert(source);
            }
        }

        if let Some(orphan) = order.iter().find(|name| !used.contains(name.as_str())) {
            return Err(ConfigError::OrphanSource(orphan.clone()));
        }

        Ok(Self { routes, order })
    }

    /// Source names in declared order
    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Profiles consuming one source
    pub fn profiles_for(&self, source: &str) -> &[Arc<Profile>] {
        self.routes.get(source).map_or(&[], Vec::as_slice)
    }
}
