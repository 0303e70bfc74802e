// src/recipe/store.rs

//! Recipe location, loading and validation
//!
//! Recipes live in two stores: the user-writable one under the state root
//! and the read-only system one under the share root. Resolution searches
//! user first, system second, accepting either `<name>.recipe` or
//! `<name>/<name>.recipe`; the first hit wins.

use crate::config::Paths;
use crate::error::{Error, Result};
use crate::recipe::format::Recipe;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Recipe file lookup and parsing against the configured stores
#[derive(Debug, Clone)]
pub struct RecipeStore {
    search_dirs: Vec<PathBuf>,
}

impl RecipeStore {
    /// A store searching the standard user-then-system directories
    pub fn new(paths: &Paths) -> Self {
        Self {
            search_dirs: vec![paths.user_recipes_dir(), paths.system_recipes_dir()],
        }
    }

    /// A store over explicit directories, searched in order (tests, overrides)
    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs: dirs }
    }

    /// Locate the recipe file for `name`
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        for dir in &self.search_dirs {
            let flat = dir.join(format!("{}.recipe", name));
            if flat.is_file() {
                debug!("resolved recipe {} -> {}", name, flat.display());
                return Ok(flat);
            }
            let nested = dir.join(name).join(format!("{}.recipe", name));
            if nested.is_file() {
                debug!("resolved recipe {} -> {}", name, nested.display());
                return Ok(nested);
            }
        }
        Err(Error::NotFound(format!("recipe '{}'", name)))
    }

    /// Load and parse the recipe for `name`
    pub fn load(&self, name: &str) -> Result<Recipe> {
        let path = self.resolve(name)?;
        let text = fs::read_to_string(&path)?;
        let recipe: Recipe = toml::from_str(&text).map_err(|e| Error::Parse {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(recipe)
    }

    /// Load, then verify the structural invariants
    pub fn load_linted(&self, name: &str) -> Result<Recipe> {
        let recipe = self.load(name)?;
        lint(&recipe)?;
        Ok(recipe)
    }

    /// Runtime dependency names for `name`
    pub fn deps(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.load(name)?.package.deps)
    }

    /// Build-time dependency names for `name`
    pub fn build_deps(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.load(name)?.package.build_deps)
    }
}

/// Verify a recipe's structural invariants.
///
/// - `name` and `version` non-empty
/// - `|urls| == |sha256|` and `|patches| == |patch_sha256|`
/// - a git source must carry a ref
/// - a recipe with no sources and no git must provide install commands
pub fn lint(recipe: &Recipe) -> Result<()> {
    if recipe.package.name.is_empty() {
        return Err(Error::Lint {
            field: "package.name".into(),
            reason: "must not be empty".into(),
        });
    }
    if recipe.package.version.is_empty() {
        return Err(Error::Lint {
            field: "package.version".into(),
            reason: "must not be empty".into(),
        });
    }

    let src = &recipe.source;
    if src.urls.len() != src.sha256.len() {
        return Err(Error::Lint {
            field: "source.sha256".into(),
            reason: format!("{} urls but {} hashes", src.urls.len(), src.sha256.len()),
        });
    }
    if src.patches.len() != src.patch_sha256.len() {
        return Err(Error::Lint {
            field: "source.patch_sha256".into(),
            reason: format!(
                "{} patches but {} hashes",
                src.patches.len(),
                src.patch_sha256.len()
            ),
        });
    }

    if let Some(git) = &src.git {
        if git.reference.as_deref().unwrap_or("").is_empty() {
            return Err(Error::Lint {
                field: "source.git.ref".into(),
                reason: "git sources must pin a ref".into(),
            });
        }
    }

    if recipe.is_inline() && recipe.stages.install.is_none() {
        return Err(Error::Lint {
            field: "source.urls".into(),
            reason: "recipe has no sources, no git origin, and no install commands".into(),
        });
    }

    Ok(())
}
