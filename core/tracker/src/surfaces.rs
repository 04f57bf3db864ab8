//! Registry of surfaces the status surface can reopen.
//!
//! Identifiers come from clients and from the scratch journal, so they may be
//! stale or unknown. Lookups never fail: anything unrecognized resolves to the
//! default surface.

use std::collections::BTreeMap;
use tracker_protocol::LaunchDescriptor;
use tracing::{debug, warn};

pub const DEFAULT_SURFACE: &str = "map";
pub const TRACKS_SURFACE: &str = "tracks";

#[derive(Debug, Clone)]
pub struct SurfaceRegistry {
    entries: BTreeMap<String, LaunchDescriptor>,
}

impl SurfaceRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            entries: BTreeMap::new(),
        };
        registry.register(DEFAULT_SURFACE, Vec::new());
        registry.register(
            TRACKS_SURFACE,
            vec![
                "trackctl".to_string(),
                "tracks".to_string(),
                "list".to_string(),
            ],
        );
        registry
    }

    /// Built-in surfaces plus the `[surfaces]` table from the config file.
    pub fn from_config(overrides: &BTreeMap<String, Vec<String>>) -> Self {
        let mut registry = Self::with_defaults();
        for (surface, command) in overrides {
            let surface = surface.trim();
            if surface.is_empty() {
                continue;
            }
            if registry.contains(surface) {
                debug!(surface = %surface, "Config overrides built-in surface");
            }
            registry.register(surface, command.clone());
        }
        registry
    }

    pub fn register(&mut self, surface: &str, command: Vec<String>) {
        self.entries.insert(
            surface.to_string(),
            LaunchDescriptor {
                surface: surface.to_string(),
                command,
            },
        );
    }

    pub fn contains(&self, surface: &str) -> bool {
        self.entries.contains_key(surface)
    }

    pub fn resolve(&self, requested: Option<&str>) -> LaunchDescriptor {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        if let Some(surface) = requested {
            if let Some(descriptor) = self.entries.get(surface) {
                return descriptor.clone();
            }
            warn!(surface = %surface, "Unknown surface; falling back to default");
        }
        self.default_descriptor()
    }

    fn default_descriptor(&self) -> LaunchDescriptor {
        self.entries
            .get(DEFAULT_SURFACE)
            .cloned()
            .unwrap_or_else(|| LaunchDescriptor {
                surface: DEFAULT_SURFACE.to_string(),
                command: Vec::new(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_surface() {
        let registry = SurfaceRegistry::with_defaults();
        let descriptor = registry.resolve(Some("tracks"));
        assert_eq!(descriptor.surface, "tracks");
        assert_eq!(descriptor.command[0], "trackctl");
    }

    #[test]
    fn unknown_or_empty_falls_back_to_default() {
        let registry = SurfaceRegistry::with_defaults();
        assert_eq!(
            registry.resolve(Some("com.example.Removed")).surface,
            DEFAULT_SURFACE
        );
        assert_eq!(registry.resolve(Some("  ")).surface, DEFAULT_SURFACE);
        assert_eq!(registry.resolve(None).surface, DEFAULT_SURFACE);
    }

    #[test]
    fn config_overrides_and_extends() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "map".to_string(),
            vec!["xdg-open".to_string(), "geo:0,0".to_string()],
        );
        overrides.insert("editor".to_string(), vec!["gpx-edit".to_string()]);
        overrides.insert(" ".to_string(), vec!["ignored".to_string()]);

        let registry = SurfaceRegistry::from_config(&overrides);
        assert!(registry.contains("editor"));
        assert!(!registry.contains(" "));
        assert_eq!(registry.resolve(None).command, vec!["xdg-open", "geo:0,0"]);
        assert_eq!(registry.resolve(Some("editor")).command, vec!["gpx-edit"]);
    }
}
