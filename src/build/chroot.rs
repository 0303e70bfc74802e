// src/build/chroot.rs

//! Chroot build variant
//!
//! For recipes flagged `chroot`, stages run inside a bootstrap root
//! (typically `/mnt/lfs`): sources are rsync'd into `<root>/build/<name>`,
//! each command executes via `chroot` + `env -i` with a sanitized PATH,
//! and the populated DESTDIR tree is rsync'd back out to the caller's
//! staging root. The bind-mount bootstrap that prepares the root itself is
//! an external concern; this module assumes a usable chroot.

use crate::error::{Error, Result};
use crate::host;
use crate::recipe::Recipe;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use super::{BuildContext, Stage, StageCommand};

/// PATH exported inside the chroot
const CHROOT_PATH: &str = "/usr/bin:/usr/sbin:/bin:/sbin";

/// Executes stage commands inside a bootstrap root
pub struct ChrootRunner {
    root: PathBuf,
}

impl ChrootRunner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build-area path of a package inside the root, as seen from outside
    fn build_area(&self, name: &str) -> PathBuf {
        self.root.join("build").join(name)
    }

    /// Copy the source tree into the chroot build area
    pub fn stage_in(&self, ctx: &BuildContext) -> Result<()> {
        host::require("rsync")?;
        let area = self.build_area(&ctx.name);
        std::fs::create_dir_all(&area)?;

        info!(
            "rsync {} -> {}",
            ctx.source_root.display(),
            area.display()
        );
        rsync(&ctx.source_root, &area.join("source"))?;
        std::fs::create_dir_all(area.join("destdir"))?;
        Ok(())
    }

    /// Run one stage command inside the chroot.
    ///
    /// The inside view of the build area is `/build/<name>`; DESTDIR is
    /// rewritten accordingly, everything else of the controlled stage
    /// environment passes through.
    pub fn run_command(
        &self,
        ctx: &BuildContext,
        recipe: &Recipe,
        stage: Stage,
        command: &StageCommand,
    ) -> Result<()> {
        host::require("chroot")?;
        let inside = format!("/build/{}", ctx.name);

        let mut env_args: Vec<String> = vec![
            format!("DESTDIR={}/destdir", inside),
            format!("JOBS={}", ctx.jobs),
            format!("MAKEFLAGS=-j{}", ctx.jobs),
            format!("SOURCE_DATE_EPOCH={}", ctx.source_date_epoch),
            format!("NAME={}", recipe.package.name),
            format!("VERSION={}", recipe.package.version),
            format!("EPOCH={}", recipe.package.epoch),
            format!("RELEASE={}", recipe.package.release),
            format!("PATH={}", CHROOT_PATH),
            "LC_ALL=C".to_string(),
            "LANG=C".to_string(),
            "HOME=/root".to_string(),
        ];
        for (key, value) in &ctx.env {
            env_args.push(format!("{}={}", key, value));
        }

        let script = format!("cd {}/source && {}", inside, command.line);
        debug!("[chroot {}] {}", stage.name(), command.line);

        let output = Command::new("chroot")
            .arg(&self.root)
            .arg("/usr/bin/env")
            .arg("-i")
            .args(&env_args)
            .arg("sh")
            .arg("-c")
            .arg(&script)
            .output()?;

        if !output.status.success() {
            return Err(Error::StageFailed {
                stage: stage.name().into(),
                reason: format!(
                    "'{}' failed in chroot: {}",
                    command.line,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    /// Copy the populated DESTDIR tree back out to the staging root
    pub fn stage_out(&self, ctx: &BuildContext) -> Result<()> {
        let inside_dest = self.build_area(&ctx.name).join("destdir");
        info!(
            "rsync {} -> {}",
            inside_dest.display(),
            ctx.staging_root.display()
        );
        rsync(&inside_dest, &ctx.staging_root)
    }
}

/// `rsync -a --delete src/ dest`
fn rsync(src: &Path, dest: &Path) -> Result<()> {
    let mut src_arg = src.display().to_string();
    if !src_arg.ends_with('/') {
        src_arg.push('/');
    }
    let output = Command::new("rsync")
        .arg("-a")
        .arg("--delete")
        .arg(&src_arg)
        .arg(dest)
        .output()?;
    if !output.status.success() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!(
                "rsync {} -> {} failed: {}",
                src.display(),
                dest.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        )));
    }
    Ok(())
}
