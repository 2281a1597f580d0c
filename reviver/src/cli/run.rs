// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    io::{self, BufRead},
    path::PathBuf,
    thread,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use crate::{
    cli::{args::GlobalOpts, status, warning},
    config::Profile,
    device::Console,
    executor::SystemExecutor,
    objective::{self, Engine, Objective, Options},
};

/// Console backed by the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }

    fn acknowledge(&mut self, instructions: &str) -> io::Result<()> {
        status!("{instructions}");
        status!("Press Enter to continue");

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;

        Ok(())
    }
}

pub fn load_profile(global: &GlobalOpts) -> Result<Profile> {
    let profile = Profile::load(global.config.as_deref())
        .with_context(|| format!("Failed to load profile: {:?}", global.config))?;

    info!("Using profile: {}", profile.name);

    Ok(profile)
}

pub fn run_main(cli: &RunCli, global: &GlobalOpts) -> Result<()> {
    let profile = load_profile(global)?;

    fs::create_dir_all(&global.work_dir)
        .with_context(|| format!("Failed to create work directory: {:?}", global.work_dir))?;

    let options = Options {
        partition: cli.partition.clone(),
        image: cli.image.clone(),
        force: cli.force,
        no_mirror: cli.no_mirror,
        host: cli.host.clone(),
        work_dir: global.work_dir.clone(),
        install_dir: global.install_dir.clone(),
    };

    let mut engine = Engine::new(SystemExecutor, TerminalConsole, profile, options);
    let result = engine.run(cli.objective);

    for error in &result.errors {
        warning!("{error}");
    }

    if !result.succeeded {
        bail!("Objective {} failed", cli.objective);
    }

    status!("Objective {} succeeded", cli.objective);

    if let Some(mac) = engine.mac() {
        let serial = engine.device().state().serial.as_deref().unwrap_or("unknown");
        status!("Device serial {serial}, MAC {mac}");
    }

    Ok(())
}

pub fn list_main(_cli: &ListCli) -> Result<()> {
    for objective in Objective::ordered()? {
        let prerequisites = objective
            .prerequisites()
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>();

        println!("{:<18} {}", objective.name(), objective.description());

        if !prerequisites.is_empty() {
            println!("{:<18}   needs: {}", "", prerequisites.join(", "));
        }
    }

    Ok(())
}

pub fn reset_tool_check_main(_cli: &ResetToolCheckCli, global: &GlobalOpts) -> Result<()> {
    let path = global.work_dir.join(objective::TOOL_CHECK_FLAG);

    match fs::remove_file(&path) {
        Ok(()) => status!("Removed {path:?}"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => status!("Tool check was not done yet"),
        Err(e) => return Err(e).with_context(|| format!("Failed to remove: {path:?}")),
    }

    Ok(())
}

/// Run an objective and everything it depends on.
#[derive(Debug, Parser)]
pub struct RunCli {
    /// Objective to reach.
    #[arg(value_enum, default_value_t = Objective::Revive)]
    pub objective: Objective,

    /// Partition to back up, patch, and flash.
    #[arg(short, long, value_name = "NAME")]
    pub partition: Option<String>,

    /// Flash this image instead of the patched backup.
    #[arg(short, long, value_name = "FILE", value_parser)]
    pub image: Option<PathBuf>,

    /// Redo the objective even if it appears to be done already.
    #[arg(short, long)]
    pub force: bool,

    /// Only write the partition itself, not its mirrors.
    #[arg(long)]
    pub no_mirror: bool,

    /// Reach an already revived device over the network. The port defaults
    /// to 5555.
    #[arg(long, value_name = "HOST[:PORT]")]
    pub host: Option<String>,
}

/// List the objectives in dependency order.
#[derive(Debug, Parser)]
pub struct ListCli {}

/// Forget that the tool check passed.
#[derive(Debug, Parser)]
pub struct ResetToolCheckCli {}
