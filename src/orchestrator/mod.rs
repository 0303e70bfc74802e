// src/orchestrator/mod.rs

//! Build orchestration: single-package pipeline and layered scheduling
//!
//! One package runs the strict sequence fetch → extract → patch →
//! prepare/build/install → strip/manifest/archive, all inside its
//! `build-<name>` lock. Across packages, the scheduler walks the
//! dependency graph in layers: a layer is released only when every
//! package of the previous layers has an installed record, and within a
//! layer up to the configured job ceiling builds run on worker threads.
//!
//! `update_all` holds the `update-all` lock, asks the fingerprint planner
//! what drifted, and rebuilds exactly that, in order.

use crate::build::{chroot::ChrootRunner, BuildContext, Builder, Stage};
use crate::config::{Paths, Settings};
use crate::db::{BuiltRecord, Database};
use crate::error::{Error, Result};
use crate::fetch::{self, Fetcher};
use crate::fingerprint::{self, CurrentState, Planner};
use crate::graph::DepGraph;
use crate::install;
use crate::lock::{self, LockSet};
use crate::package::{BuiltPackage, Compression, Packager};
use crate::recipe::{Recipe, RecipeStore};
use crate::rollback;
use crate::workspace;
use chrono::Utc;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Default bootstrap root for chroot builds
const DEFAULT_CHROOT_ROOT: &str = "/mnt/lfs";

/// Drives builds, installs and updates against one configuration
pub struct Orchestrator {
    paths: Paths,
    settings: Settings,
    store: RecipeStore,
    db: Database,
    locks: LockSet,
    compression: Compression,
}

impl Orchestrator {
    pub fn new(paths: Paths, settings: Settings) -> Self {
        let store = RecipeStore::new(&paths);
        let db = Database::new(&paths);
        let locks = LockSet::new(paths.locks_dir());
        Self {
            paths,
            settings,
            store,
            db,
            locks,
            compression: Compression::default(),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn store(&self) -> &RecipeStore {
        &self.store
    }

    fn fetcher(&self) -> Fetcher {
        Fetcher::new(self.paths.sources_dir())
            .with_mirrors(self.settings.mirrors.clone())
            .with_retries(self.settings.retries, self.settings.backoff_base)
            .with_parallel(self.settings.fetch_jobs)
    }

    /// Build one package end-to-end, producing an archive and a
    /// built-but-not-installed marker. Holds `build-<name>` throughout.
    pub fn build_one(&self, name: &str) -> Result<BuiltPackage> {
        let _guard = self
            .locks
            .acquire(&lock::build_lock(name), lock::BUILD_TIMEOUT)?;

        let recipe = self.store.load_linted(name)?;
        let evr = recipe.evr();
        info!("pipeline start: {}-{}", name, evr);

        // fetch
        let fetcher = self.fetcher();
        let mut source_archives = Vec::new();
        let source_jobs: Vec<(String, String)> = recipe
            .source
            .urls
            .iter()
            .cloned()
            .zip(recipe.source.sha256.iter().cloned())
            .map(|(url, sha)| (recipe.substitute(&url, ""), sha))
            .collect();
        source_archives.extend(fetcher.fetch_all(&source_jobs)?);

        if let Some(sig_url) = &recipe.source.signature {
            if let Some(first) = source_archives.first() {
                let sig = fetcher.fetch_unverified(&recipe.substitute(sig_url, ""))?;
                fetcher.verify_signature(first, &sig, &self.paths.keys_dir())?;
            }
        }

        let patch_jobs: Vec<(String, String)> = recipe
            .source
            .patches
            .iter()
            .cloned()
            .zip(recipe.source.patch_sha256.iter().cloned())
            .map(|(url, sha)| (recipe.substitute(&url, ""), sha))
            .collect();
        let patch_files = fetcher.fetch_all(&patch_jobs)?;

        let git_archive = match &recipe.source.git {
            Some(git) => Some(fetch::fetch_git(
                &git.url,
                git.reference.as_deref().unwrap_or_default(),
                name,
                &self.paths.tarballs_dir(),
            )?),
            None => None,
        };

        // workspace
        let workspace = self.paths.work_dir().join(format!("{}-{}", name, evr));
        if workspace.exists() {
            fs::remove_dir_all(&workspace)?;
        }
        let unpack_dir = workspace.join("src");
        fs::create_dir_all(&unpack_dir)?;

        let mut source_root = unpack_dir.clone();
        for archive in &source_archives {
            source_root = workspace::extract(archive, &unpack_dir)?;
        }
        if let Some(git) = &git_archive {
            source_root = workspace::extract(&git.path, &unpack_dir)?;
        }

        workspace::apply_patches(&source_root, &patch_files)?;

        // build stages
        let mut ctx = BuildContext::new(
            &recipe,
            workspace.clone(),
            source_root,
            self.settings.effective_jobs(),
        )?;
        if let Some(git) = &git_archive {
            if recipe.options.reproducible {
                ctx = ctx.with_source_date_epoch(git.commit_epoch);
            }
        }
        let staging_root = ctx.staging_root.clone();
        let source_date_epoch = ctx.source_date_epoch;

        if recipe.options.chroot {
            self.run_stages_in_chroot(&recipe, &ctx)?;
        } else {
            Builder::new(&recipe, ctx)
                .with_hooks_root(self.paths.config_root.join("hooks"))
                .run()?;
        }

        // package
        let packager = Packager::new(self.paths.packages_dir(), self.paths.manifests_dir())
            .with_compression(self.compression)
            .with_strip(recipe.options.strip)
            .with_source_date_epoch(source_date_epoch);
        let built = packager.package(name, &evr, &staging_root)?;

        self.db.write_built(&self.built_record(&recipe, &built, &staging_root)?)?;

        // Success: the scratch tree has served its purpose. Failures above
        // returned early, leaving it for inspection.
        fs::remove_dir_all(&workspace)?;
        info!("pipeline done: {}", built.archive_path.display());
        Ok(built)
    }

    /// Build (if needed) and install/upgrade one package
    pub fn build_and_install(&self, name: &str, target_root: &Path) -> Result<()> {
        let built = self.build_one(name)?;
        match self.db.read_installed(name)? {
            Some(_) => {
                install::upgrade(&self.paths, &self.db, &built.archive_path, target_root, false)?;
            }
            None => {
                install::install_pkg(&self.paths, &self.db, &built.archive_path, target_root)?;
            }
        }
        Ok(())
    }

    /// The layered build plan for a set of roots
    pub fn plan_build(&self, roots: &[String]) -> Result<Vec<Vec<String>>> {
        DepGraph::from_recipes(&self.store, roots)?.topo_layers()
    }

    /// Build and install a set of roots and all their dependencies.
    ///
    /// Layers release in order; within a layer, up to the job ceiling
    /// packages build concurrently, each under its own `build-<name>`
    /// lock with a strictly sequential internal pipeline.
    pub fn build_world(&self, roots: &[String], target_root: &Path) -> Result<()> {
        let layers = self.plan_build(roots)?;
        info!(
            "building {} package(s) in {} layer(s)",
            layers.iter().map(Vec::len).sum::<usize>(),
            layers.len()
        );

        for layer in layers {
            self.run_layer(&layer, target_root)?;
        }
        Ok(())
    }

    /// Rebuild whatever the fingerprint planner reports as stale.
    ///
    /// Returns the names rebuilt, in order. Holds the `update-all` lock;
    /// overlays stay serialized per package via their own locks.
    pub fn update_all(&self, target_root: &Path) -> Result<Vec<String>> {
        let _guard = self
            .locks
            .acquire(&lock::update_all_lock(), lock::INSTALL_TIMEOUT)?;

        let current = CurrentState::observe();
        let plan = Planner::new(&self.db).plan_smart(&current)?;
        if plan.is_empty() {
            info!("update-all: nothing to do");
            return Ok(plan);
        }

        info!("update-all: rebuilding {}", plan.join(", "));
        for name in &plan {
            self.build_and_install(name, target_root)?;
        }
        // The world now reflects the observed toolchain
        self.db.write_toolchain_fingerprint(&current.toolchain)?;
        Ok(plan)
    }

    /// Roll a package back to a prior EVR (or the previous one)
    pub fn rollback(&self, name: &str, target: Option<&crate::version::Evr>) -> Result<()> {
        rollback::rollback(&self.paths, &self.db, name, target)
    }

    // --- internals ---

    fn run_layer(&self, layer: &[String], target_root: &Path) -> Result<()> {
        let ceiling = self.settings.effective_jobs().max(1);
        if layer.len() == 1 || ceiling == 1 {
            for name in layer {
                self.build_and_install(name, target_root)?;
            }
            return Ok(());
        }

        let queue: Mutex<VecDeque<&String>> = Mutex::new(layer.iter().collect());
        let failures: Mutex<Vec<Error>> = Mutex::new(Vec::new());
        let workers = ceiling.min(layer.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = queue.lock().expect("build queue poisoned").pop_front();
                    let Some(name) = next else { break };
                    if let Err(e) = self.build_and_install(name, target_root) {
                        warn!("build of {} failed: {}", name, e);
                        failures.lock().expect("failures poisoned").push(e);
                    }
                });
            }
        });

        let mut failures = failures.into_inner().expect("failures poisoned");
        match failures.pop() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }

    fn run_stages_in_chroot(&self, recipe: &Recipe, ctx: &BuildContext) -> Result<()> {
        let root = std::env::var_os("MORTAR_CHROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CHROOT_ROOT));
        let runner = ChrootRunner::new(root);

        runner.stage_in(ctx)?;
        let builder = Builder::new(recipe, ctx.clone());
        for stage in Stage::ALL {
            for command in builder.commands_for(stage) {
                runner.run_command(ctx, recipe, stage, &command)?;
            }
        }
        runner.stage_out(ctx)?;

        if fs::read_dir(&ctx.staging_root)?.next().is_none() {
            return Err(Error::StageFailed {
                stage: "install".into(),
                reason: "staging root is empty after chroot install stage".into(),
            });
        }
        Ok(())
    }

    /// Assemble the built marker: dep EVRs resolved now, fingerprints of
    /// the toolchain, pinned environment and the staged tree's ABI.
    fn built_record(
        &self,
        recipe: &Recipe,
        built: &BuiltPackage,
        staging_root: &Path,
    ) -> Result<BuiltRecord> {
        let mut dep_versions = BTreeMap::new();
        if recipe.options.lock_deps {
            for dep in &recipe.package.deps {
                if let Some(record) = self.db.read_installed(dep)? {
                    dep_versions.insert(dep.clone(), record.evr.to_string());
                } else {
                    debug!("dep {} of {} not installed at build time", dep, recipe.package.name);
                }
            }
        }

        let abi = fingerprint::abi_of_paths(staging_root, &built.manifest.payload_paths())?;

        Ok(BuiltRecord {
            name: built.name.clone(),
            evr: built.evr.clone(),
            archive_path: built.archive_path.clone(),
            manifest_path: built.manifest_path.clone(),
            build_time: Utc::now(),
            deps: recipe.package.deps.clone(),
            dep_versions,
            env_fingerprint: fingerprint::environment_fingerprint(),
            abi_fingerprint: abi,
            toolchain_fingerprint: fingerprint::toolchain_fingerprint(),
        })
    }

}
