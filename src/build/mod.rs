// src/build/mod.rs

//! Build engine: the prepare/build/install stage machine
//!
//! Each stage is a command list, either taken from the recipe or
//! synthesized from defaults. Commands run in fresh subprocesses under a
//! controlled environment (DESTDIR, JOBS, SOURCE_DATE_EPOCH, package
//! identity, pinned C locale) so recipe output does not depend on the
//! caller's shell. The default install stage runs under the simulated-root
//! helper, keeping ownership-affecting operations away from the real root.
//!
//! Directory-drop hooks fire around every stage: executables in
//! `pre-<stage>.d` and `post-<stage>.d` run in lexical order with the
//! stage's environment, and a non-zero exit aborts the stage.

pub mod chroot;

use crate::error::{Error, Result};
use crate::host;
use crate::recipe::Recipe;
use crate::version::Evr;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// SOURCE_DATE_EPOCH used when a recipe wants reproducible output but has
/// no git commit time to inherit: 2024-01-01T00:00:00Z.
pub const DEFAULT_SOURCE_EPOCH: i64 = 1704067200;

/// The three recipe stages, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Build,
    Install,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Prepare, Stage::Build, Stage::Install];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Build => "build",
            Stage::Install => "install",
        }
    }
}

/// One command to run within a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub line: String,
    /// Run under the simulated-root helper (default install only)
    pub simulated_root: bool,
}

/// Ephemeral per-build state
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub name: String,
    pub evr: Evr,
    /// Scratch directory holding sources and stage output
    pub workspace: PathBuf,
    /// Detected source root after extraction
    pub source_root: PathBuf,
    /// DESTDIR the install stage populates
    pub staging_root: PathBuf,
    pub jobs: usize,
    pub source_date_epoch: i64,
    /// Recipe-exported variables, already substituted
    pub env: BTreeMap<String, String>,
}

impl BuildContext {
    /// Create the context for one build, guaranteeing an empty staging root.
    pub fn new(
        recipe: &Recipe,
        workspace: PathBuf,
        source_root: PathBuf,
        jobs: usize,
    ) -> Result<Self> {
        let staging_root = workspace.join("destdir");
        if staging_root.exists() {
            fs::remove_dir_all(&staging_root)?;
        }
        fs::create_dir_all(&staging_root)?;

        let source_date_epoch = if recipe.options.reproducible {
            DEFAULT_SOURCE_EPOCH
        } else {
            chrono::Utc::now().timestamp()
        };

        let mut env = BTreeMap::new();
        for (key, value) in &recipe.env {
            env.insert(key.clone(), recipe.substitute(value, ""));
        }

        Ok(Self {
            name: recipe.package.name.clone(),
            evr: recipe.evr(),
            workspace,
            source_root,
            staging_root,
            jobs,
            source_date_epoch,
            env,
        })
    }

    /// Pin SOURCE_DATE_EPOCH (git sources pass their commit time here)
    pub fn with_source_date_epoch(mut self, epoch: i64) -> Self {
        self.source_date_epoch = epoch;
        self
    }

    /// The controlled environment every stage subprocess sees
    pub fn stage_env(&self, recipe: &Recipe) -> Vec<(String, String)> {
        let path = std::env::var("PATH")
            .unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string());
        let mut env: Vec<(String, String)> = vec![
            ("DESTDIR".into(), self.staging_root.display().to_string()),
            ("JOBS".into(), self.jobs.to_string()),
            ("MAKEFLAGS".into(), format!("-j{}", self.jobs)),
            ("SOURCE_DATE_EPOCH".into(), self.source_date_epoch.to_string()),
            ("NAME".into(), recipe.package.name.clone()),
            ("VERSION".into(), recipe.package.version.clone()),
            ("EPOCH".into(), recipe.package.epoch.to_string()),
            ("RELEASE".into(), recipe.package.release.clone()),
            ("PATH".into(), path),
            ("LC_ALL".into(), "C".into()),
            ("LANG".into(), "C".into()),
        ];
        for (key, value) in &self.env {
            env.push((key.clone(), value.clone()));
        }
        env
    }
}

/// Runs the stage machine for one recipe
pub struct Builder<'a> {
    recipe: &'a Recipe,
    ctx: BuildContext,
    /// Root holding `<point>.d` hook directories; `None` disables hooks
    hooks_root: Option<PathBuf>,
}

impl<'a> Builder<'a> {
    pub fn new(recipe: &'a Recipe, ctx: BuildContext) -> Self {
        Self {
            recipe,
            ctx,
            hooks_root: None,
        }
    }

    /// Enable directory-drop hooks under `root` (`/etc/mortar/hooks`)
    pub fn with_hooks_root(mut self, root: PathBuf) -> Self {
        self.hooks_root = Some(root);
        self
    }

    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    /// Run prepare, build and install in order.
    ///
    /// On success the staging root holds the package's full filesystem
    /// contribution. On failure the workspace is preserved as-is for
    /// inspection and no package is produced.
    pub fn run(&self) -> Result<()> {
        info!("building {}-{}", self.ctx.name, self.ctx.evr);
        for stage in Stage::ALL {
            self.run_stage(stage)?;
        }
        if is_dir_empty(&self.ctx.staging_root)? {
            return Err(Error::StageFailed {
                stage: "install".into(),
                reason: "staging root is empty after install stage".into(),
            });
        }
        Ok(())
    }

    /// Commands for a stage: the recipe's own, or the synthesized default
    pub fn commands_for(&self, stage: Stage) -> Vec<StageCommand> {
        let own = match stage {
            Stage::Prepare => &self.recipe.stages.prepare,
            Stage::Build => &self.recipe.stages.build,
            Stage::Install => &self.recipe.stages.install,
        };

        if let Some(lines) = own {
            return lines
                .iter()
                .map(|line| StageCommand {
                    line: self
                        .recipe
                        .substitute(line, &self.ctx.staging_root.display().to_string()),
                    simulated_root: false,
                })
                .collect();
        }

        match stage {
            Stage::Prepare => Vec::new(),
            Stage::Build => {
                let mut cmds = Vec::new();
                if self.ctx.source_root.join("configure").is_file() {
                    cmds.push(StageCommand {
                        line: "./configure --prefix=/usr".into(),
                        simulated_root: false,
                    });
                }
                cmds.push(StageCommand {
                    line: format!("make -j{}", self.ctx.jobs),
                    simulated_root: false,
                });
                cmds
            }
            Stage::Install => vec![StageCommand {
                line: "make install".into(),
                simulated_root: true,
            }],
        }
    }

    fn run_stage(&self, stage: Stage) -> Result<()> {
        let commands = self.commands_for(stage);
        debug!(
            "{} stage for {}: {} command(s)",
            stage.name(),
            self.ctx.name,
            commands.len()
        );

        self.run_hooks(&format!("pre-{}", stage.name()), stage)?;

        for command in &commands {
            self.run_command(stage, command)?;
        }

        self.run_hooks(&format!("post-{}", stage.name()), stage)?;
        Ok(())
    }

    fn run_command(&self, stage: Stage, command: &StageCommand) -> Result<()> {
        debug!("[{}] {}", stage.name(), command.line);

        let mut cmd = if command.simulated_root {
            host::require("fakeroot")?;
            let mut c = Command::new("fakeroot");
            c.arg("sh").arg("-c").arg(&command.line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&command.line);
            c
        };

        let output = cmd
            .current_dir(&self.ctx.source_root)
            .env_clear()
            .envs(self.ctx.stage_env(self.recipe))
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::StageFailed {
                stage: stage.name().into(),
                reason: format!(
                    "'{}' exited with {:?}: {}",
                    command.line,
                    output.status.code(),
                    tail(&stderr, 20)
                ),
            });
        }
        Ok(())
    }

    /// Run the executables of a hook point in lexical order.
    ///
    /// Each hook gets the stage name and the staging root as arguments and
    /// the full stage environment; a failure aborts the stage.
    fn run_hooks(&self, point: &str, stage: Stage) -> Result<()> {
        let Some(root) = &self.hooks_root else {
            return Ok(());
        };
        let dir = root.join(format!("{}.d", point));
        if !dir.is_dir() {
            return Ok(());
        }

        let mut hooks: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| is_executable(p))
            .collect();
        hooks.sort();

        for hook in hooks {
            info!("hook {}: {}", point, hook.display());
            let output = Command::new(&hook)
                .arg(stage.name())
                .arg(&self.ctx.staging_root)
                .current_dir(&self.ctx.source_root)
                .env_clear()
                .envs(self.ctx.stage_env(self.recipe))
                .output()?;
            if !output.status.success() {
                warn!("hook {} failed", hook.display());
                return Err(Error::StageFailed {
                    stage: stage.name().into(),
                    reason: format!("hook {} exited non-zero", hook.display()),
                });
            }
        }
        Ok(())
    }
}

fn is_dir_empty(dir: &Path) -> Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
