// Copyright (c) The buddy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Argument parsing and a progress/confirmation capability only — no
//! business logic lives here. Each subcommand builds a request struct and
//! hands it to the matching operation module.

use crate::config::FlagOverrides;
use crate::events::EventLogger;
use crate::output::OutputOpts;
use buddy_metadata::error;
use buddy_metadata::metadata::InstallMode;
use camino::Utf8PathBuf;
use color_eyre::{eyre::eyre, Result};
use structopt::StructOpt;

mod config;
mod events;
mod installer;
mod lock;
mod manifest_data;
mod merge;
mod output;
mod paths;
mod probe;
mod transaction_engine;
mod uninstaller;
mod updater;

/// Environment variable pointing at the bundled component assets, checked
/// before the executable-relative default (§10).
const ASSETS_ENV_VAR: &str = "CLAUDE_BUDDY_ASSETS";

#[derive(Debug, StructOpt)]
#[structopt(name = "buddy")]
pub struct App {
    #[structopt(flatten)]
    global_opts: GlobalOpts,
    #[structopt(subcommand)]
    command: Command,
}

impl App {
    pub async fn exec(self) -> Result<i32> {
        self.global_opts.output.init_logger();
        self.command.exec(&self.global_opts).await
    }
}

#[derive(Clone, Debug, StructOpt)]
struct GlobalOpts {
    /// Target directory to operate on.
    #[structopt(long, global = true, default_value = ".")]
    target: Utf8PathBuf,
    /// Path to the bundled component assets. Defaults to `$CLAUDE_BUDDY_ASSETS`,
    /// falling back to an `assets/` directory next to the executable.
    #[structopt(long, global = true)]
    assets: Option<Utf8PathBuf>,
    /// Skip confirmation prompts and proceed non-interactively.
    #[structopt(long, global = true)]
    non_interactive: bool,
    /// Plan the operation without writing anything.
    #[structopt(long, global = true)]
    dry_run: bool,
    #[structopt(flatten)]
    output: OutputOpts,
}

impl GlobalOpts {
    fn resolve_assets_root(&self) -> Result<Utf8PathBuf> {
        if let Some(assets) = &self.assets {
            return Ok(assets.clone());
        }
        if let Ok(from_env) = std::env::var(ASSETS_ENV_VAR) {
            return Ok(Utf8PathBuf::from(from_env));
        }
        let exe = std::env::current_exe().map_err(|err| eyre!("failed to locate the running executable: {err}"))?;
        let exe_dir = exe
            .parent()
            .ok_or_else(|| eyre!("executable path {} has no parent directory", exe.display()))?;
        let exe_dir = Utf8PathBuf::from_path_buf(exe_dir.to_path_buf())
            .map_err(|path| eyre!("executable directory {} is not valid UTF-8", path.display()))?;
        Ok(exe_dir.join("assets"))
    }

    fn flag_overrides(&self) -> FlagOverrides {
        FlagOverrides {
            non_interactive: self.non_interactive.then_some(true),
            dry_run: self.dry_run.then_some(true),
            verbose: (self.output.verbose > 0).then_some(true),
            no_color: matches!(self.output.color, output::Color::Never).then_some(true),
        }
    }
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Install the framework into the target directory.
    Install {
        #[structopt(long, default_value = "project")]
        mode: InstallModeArg,
    },
    /// Update an existing installation to a new version.
    Update {
        /// Version to update to.
        #[structopt(long)]
        to: semver::Version,
        /// A structural migration: framework files are rewritten even where
        /// they would normally be preserved as customized.
        #[structopt(long)]
        migration: bool,
    },
    /// Remove an existing installation.
    Uninstall {
        /// Remove everything, including files that would normally be preserved.
        #[structopt(long)]
        purge: bool,
    },
}

#[derive(Clone, Copy, Debug)]
enum InstallModeArg {
    Project,
    Global,
    Dev,
}

impl std::str::FromStr for InstallModeArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "project" => Ok(Self::Project),
            "global" => Ok(Self::Global),
            "dev" => Ok(Self::Dev),
            other => Err(format!("unrecognized install mode: {other}")),
        }
    }
}

impl From<InstallModeArg> for InstallMode {
    fn from(mode: InstallModeArg) -> Self {
        match mode {
            InstallModeArg::Project => InstallMode::Project,
            InstallModeArg::Global => InstallMode::Global,
            InstallModeArg::Dev => InstallMode::Dev,
        }
    }
}

impl Command {
    async fn exec(self, global_opts: &GlobalOpts) -> Result<i32> {
        let config = config::load(&global_opts.target, &global_opts.flag_overrides())
            .map_err(|err| eyre!(err.to_user_message()))?;
        let _ = config; // layered config is validated here; operations read their own defaults today.

        let install_paths = paths::InstallPaths::new(global_opts.target.clone());
        let events_path = install_paths.events_log();
        if let Some(parent) = events_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| eyre!("failed to create {parent}: {err}"))?;
        }
        let events = EventLogger::new(events_path)?;

        match self {
            Command::Install { mode } => run_install(global_opts, mode.into(), &events).await,
            Command::Update { to, migration } => run_update(global_opts, to, migration, &events).await,
            Command::Uninstall { purge } => run_uninstall(global_opts, purge, &events).await,
        }
    }
}

async fn run_install(global_opts: &GlobalOpts, install_mode: InstallMode, events: &EventLogger) -> Result<i32> {
    let assets_root = global_opts.resolve_assets_root()?;
    let request = installer::InstallRequest {
        target_dir: global_opts.target.clone(),
        assets_root,
        install_mode,
        dry_run: global_opts.dry_run,
        events,
    };
    report(installer::install(request).await)
}

async fn run_update(
    global_opts: &GlobalOpts,
    to_version: semver::Version,
    migration_mode: bool,
    events: &EventLogger,
) -> Result<i32> {
    let assets_root = global_opts.resolve_assets_root()?;
    let request = updater::UpdateRequest {
        target_dir: global_opts.target.clone(),
        assets_root,
        to_version,
        migration_mode,
        dry_run: global_opts.dry_run,
        events,
    };
    report(updater::update(request).await)
}

async fn run_uninstall(global_opts: &GlobalOpts, purge: bool, events: &EventLogger) -> Result<i32> {
    let request = uninstaller::UninstallRequest {
        target_dir: global_opts.target.clone(),
        preserve_customizations: !purge,
        dry_run: global_opts.dry_run,
        events,
    };
    report(uninstaller::uninstall(request).await)
}

/// Translates a core `OperationResult`/`Error` into the CLI's exit-code
/// contract (§7: "Exit codes are assigned in a 0-99 range by the CLI
/// collaborator; the core supplies only the structured error").
fn report(outcome: error::Result<buddy_metadata::result::OperationResult>) -> Result<i32> {
    match outcome {
        Ok(result) => {
            for warning in &result.warnings {
                tracing::warn!(target: "buddy::output::working::warning", "{}", warning.message);
            }
            if result.success {
                tracing::info!(target: "buddy::output::working::done", "operation completed successfully");
                Ok(0)
            } else {
                tracing::error!(target: "buddy::output::working::failed", "operation completed with errors");
                Ok(1)
            }
        }
        Err(err) => {
            tracing::error!(target: "buddy::output::working::failed", "{}", err.to_user_message());
            Ok(2)
        }
    }
}
