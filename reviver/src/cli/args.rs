// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    io::{self, IsTerminal},
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::Level;

use crate::cli::{boot, ramdisk, run};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Level and message only.
    #[default]
    Short,
    /// Also show the active spans.
    Medium,
    /// Also show timestamps and the source module.
    Long,
}

pub fn init_logging(level: LogLevel, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_max_level(Level::from(level));

    match format {
        LogFormat::Short => builder
            .without_time()
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Medium => builder.without_time().with_target(false).init(),
        LogFormat::Long => builder.init(),
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Run(run::RunCli),
    List(run::ListCli),
    ResetToolCheck(run::ResetToolCheckCli),
    Boot(boot::BootCli),
    Ramdisk(ramdisk::RamdiskCli),
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Device profile (TOML). The built-in MC74 profile is used if omitted.
    #[arg(long, global = true, value_name = "FILE", value_parser)]
    pub config: Option<PathBuf>,

    /// Directory for pulled images, unpacked trees, and fingerprints.
    #[arg(long, global = true, value_name = "DIR", value_parser, default_value = ".")]
    pub work_dir: PathBuf,

    /// Directory containing the files referenced by the profile.
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        value_parser,
        default_value = "installFiles"
    )]
    pub install_dir: PathBuf,

    /// Lowest log message severity to output.
    #[arg(long, global = true, value_name = "LEVEL", value_enum, default_value_t)]
    pub log_level: LogLevel,

    /// Output format for log messages.
    #[arg(long, global = true, value_name = "FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,
}

#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub global: GlobalOpts,
}

pub fn main(logging_initialized: &AtomicBool) -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.log_level, cli.global.log_format);
    logging_initialized.store(true, Ordering::SeqCst);

    match &cli.command {
        Command::Run(c) => run::run_main(c, &cli.global),
        Command::List(c) => run::list_main(c),
        Command::ResetToolCheck(c) => run::reset_tool_check_main(c, &cli.global),
        Command::Boot(c) => boot::boot_main(c),
        Command::Ramdisk(c) => ramdisk::ramdisk_main(c, &cli.global),
    }
}
