// src/commands.rs

//! Command implementations for the mortar CLI
//!
//! Thin wrappers: resolve configuration, hand off to the library, print
//! results. Exit codes are derived from the library's error taxonomy in
//! `main`.

use anyhow::Result;
use mortar::install;
use mortar::{Database, Evr, Orchestrator, Paths, RecipeStore, Settings};
use std::path::Path;

fn orchestrator() -> Result<Orchestrator> {
    let paths = Paths::from_env();
    let settings = Settings::load(&paths)?;
    Ok(Orchestrator::new(paths, settings))
}

pub fn cmd_build(packages: &[String]) -> Result<()> {
    let orch = orchestrator()?;
    for name in packages {
        let built = orch.build_one(name)?;
        println!("built {}", built.archive_path.display());
    }
    Ok(())
}

pub fn cmd_install(package: &str, root: &str) -> Result<()> {
    let root = Path::new(root);

    // A path to an archive installs directly; a name builds first
    if package.ends_with(".tar.zst")
        || package.ends_with(".tar.xz")
        || package.ends_with(".tar.gz")
    {
        let paths = Paths::from_env();
        let db = Database::new(&paths);
        let record = install::install_pkg(&paths, &db, Path::new(package), root)?;
        println!("installed {}-{}", record.name, record.evr);
    } else {
        orchestrator()?.build_and_install(package, root)?;
        println!("installed {}", package);
    }
    Ok(())
}

pub fn cmd_world(roots: &[String], root: &str) -> Result<()> {
    let orch = orchestrator()?;
    orch.build_world(roots, Path::new(root))?;
    Ok(())
}

pub fn cmd_remove(package: &str, root: &str, force: bool) -> Result<()> {
    let paths = Paths::from_env();
    let db = Database::new(&paths);
    install::uninstall(&paths, &db, package, Path::new(root), force)?;
    println!("removed {}", package);
    Ok(())
}

pub fn cmd_upgrade(archive: &str, root: &str, force: bool) -> Result<()> {
    let paths = Paths::from_env();
    let db = Database::new(&paths);
    let record = install::upgrade(&paths, &db, Path::new(archive), Path::new(root), force)?;
    println!("upgraded to {}-{}", record.name, record.evr);
    Ok(())
}

pub fn cmd_update_all(root: &str) -> Result<()> {
    let orch = orchestrator()?;
    let rebuilt = orch.update_all(Path::new(root))?;
    if rebuilt.is_empty() {
        println!("world is up to date");
    } else {
        println!("rebuilt: {}", rebuilt.join(", "));
    }
    Ok(())
}

pub fn cmd_rollback(package: &str, target: &str) -> Result<()> {
    let orch = orchestrator()?;
    let evr = match target {
        "prev" => None,
        other => Some(Evr::parse(other)?),
    };
    orch.rollback(package, evr.as_ref())?;
    println!("rolled back {}", package);
    Ok(())
}

pub fn cmd_verify(package: Option<&str>) -> Result<()> {
    let paths = Paths::from_env();
    let db = Database::new(&paths);

    let names: Vec<String> = match package {
        Some(name) => vec![name.to_string()],
        None => db.list_installed()?.into_iter().map(|r| r.name).collect(),
    };

    let mut bad = 0usize;
    for name in &names {
        for path in install::verify(&db, name)? {
            println!("{}: {}", name, path);
            bad += 1;
        }
    }
    if bad > 0 {
        anyhow::bail!("{} file(s) failed verification", bad);
    }
    println!("{} package(s) verified", names.len());
    Ok(())
}

pub fn cmd_query(pattern: Option<&str>) -> Result<()> {
    let paths = Paths::from_env();
    let db = Database::new(&paths);
    for record in db.list_installed()? {
        if pattern.map_or(true, |p| record.name.contains(p)) {
            println!("{} {}", record.name, record.evr);
        }
    }
    Ok(())
}

pub fn cmd_history(package: &str) -> Result<()> {
    let paths = Paths::from_env();
    let db = Database::new(&paths);
    for event in db.history().read(package)? {
        let from = event
            .from
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{} {} {} {} -> {}",
            event.timestamp.to_rfc3339(),
            event.action,
            event.name,
            from,
            event.to
        );
    }
    Ok(())
}

pub fn cmd_deps(package: &str, reverse: bool) -> Result<()> {
    let paths = Paths::from_env();
    if reverse {
        let db = Database::new(&paths);
        for name in db.reverse_deps(package)? {
            println!("{}", name);
        }
    } else {
        let store = RecipeStore::new(&paths);
        for name in store.deps(package)? {
            println!("{}", name);
        }
    }
    Ok(())
}

pub fn cmd_fetch(packages: &[String]) -> Result<()> {
    let paths = Paths::from_env();
    let settings = Settings::load(&paths)?;
    let store = RecipeStore::new(&paths);
    let fetcher = mortar::Fetcher::new(paths.sources_dir())
        .with_mirrors(settings.mirrors.clone())
        .with_retries(settings.retries, settings.backoff_base)
        .with_parallel(settings.fetch_jobs);

    for name in packages {
        let recipe = store.load_linted(name)?;
        let jobs: Vec<(String, String)> = recipe
            .source
            .urls
            .iter()
            .cloned()
            .zip(recipe.source.sha256.iter().cloned())
            .chain(
                recipe
                    .source
                    .patches
                    .iter()
                    .cloned()
                    .zip(recipe.source.patch_sha256.iter().cloned()),
            )
            .map(|(url, sha)| (recipe.substitute(&url, ""), sha))
            .collect();
        let fetched = fetcher.fetch_all(&jobs)?;
        println!("{}: {} file(s) cached", name, fetched.len());
    }
    Ok(())
}

pub fn cmd_lint(package: &str) -> Result<()> {
    let paths = Paths::from_env();
    let store = RecipeStore::new(&paths);
    store.load_linted(package)?;
    println!("{}: ok", package);
    Ok(())
}

pub fn cmd_doctor() -> Result<()> {
    let missing = mortar::host::doctor();
    if missing.is_empty() {
        println!("all required host programs present");
        return Ok(());
    }
    for (program, purpose) in &missing {
        eprintln!("missing: {} ({})", program, purpose);
    }
    anyhow::bail!("{} required host program(s) missing", missing.len());
}
