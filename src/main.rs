// src/main.rs
//! mortar - CLI entry point

use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "mortar")]
#[command(version)]
#[command(about = "Source-based package manager for from-scratch Linux systems", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build packages from their recipes
    Build {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Build (if needed) and install a package, or install an archive file
    Install {
        /// Package name or path to a package archive
        package: String,

        /// Target root directory
        #[arg(short, long, default_value = "/")]
        root: String,
    },

    /// Build and install a set of packages with all their dependencies
    World {
        /// Root package names
        #[arg(required = true)]
        packages: Vec<String>,

        /// Target root directory
        #[arg(short, long, default_value = "/")]
        root: String,
    },

    /// Remove an installed package
    Remove {
        /// Package name
        package: String,

        /// Target root directory
        #[arg(short, long, default_value = "/")]
        root: String,

        /// Remove even when other packages depend on it
        #[arg(long)]
        force: bool,
    },

    /// Upgrade an installed package from an archive
    Upgrade {
        /// Path to the new package archive
        archive: String,

        /// Target root directory
        #[arg(short, long, default_value = "/")]
        root: String,

        /// Allow downgrades
        #[arg(long)]
        force: bool,
    },

    /// Rebuild and upgrade everything the fingerprint planner marks stale
    UpdateAll {
        /// Target root directory
        #[arg(short, long, default_value = "/")]
        root: String,
    },

    /// Roll a package back to a prior version
    Rollback {
        /// Package name
        package: String,

        /// Target EVR, or "prev" for the previous version
        #[arg(default_value = "prev")]
        target: String,
    },

    /// Verify installed files against their manifest hashes
    Verify {
        /// Package name (verifies everything when omitted)
        package: Option<String>,
    },

    /// List installed packages
    Query {
        /// Name filter
        pattern: Option<String>,
    },

    /// Show a package's event history
    History {
        /// Package name
        package: String,
    },

    /// Show a package's dependencies
    Deps {
        /// Package name
        package: String,

        /// Show reverse dependencies of the installed world instead
        #[arg(long)]
        reverse: bool,
    },

    /// Pre-fetch sources and patches into the cache
    Fetch {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Check a recipe against the format invariants
    Lint {
        /// Package name
        package: String,
    },

    /// Check for required host programs
    Doctor,
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Build { packages }) => commands::cmd_build(&packages),

        Some(Commands::Install { package, root }) => commands::cmd_install(&package, &root),

        Some(Commands::World { packages, root }) => commands::cmd_world(&packages, &root),

        Some(Commands::Remove { package, root, force }) => {
            commands::cmd_remove(&package, &root, force)
        }

        Some(Commands::Upgrade { archive, root, force }) => {
            commands::cmd_upgrade(&archive, &root, force)
        }

        Some(Commands::UpdateAll { root }) => commands::cmd_update_all(&root),

        Some(Commands::Rollback { package, target }) => commands::cmd_rollback(&package, &target),

        Some(Commands::Verify { package }) => commands::cmd_verify(package.as_deref()),

        Some(Commands::Query { pattern }) => commands::cmd_query(pattern.as_deref()),

        Some(Commands::History { package }) => commands::cmd_history(&package),

        Some(Commands::Deps { package, reverse }) => commands::cmd_deps(&package, reverse),

        Some(Commands::Fetch { packages }) => commands::cmd_fetch(&packages),

        Some(Commands::Lint { package }) => commands::cmd_lint(&package),

        Some(Commands::Doctor) => commands::cmd_doctor(),

        None => {
            println!("mortar v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'mortar --help' for usage information");
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            let code = err
                .downcast_ref::<mortar::Error>()
                .map(|e| e.exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
