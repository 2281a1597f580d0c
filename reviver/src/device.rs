// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

//! Tracks which mode the device is in and moves it between modes. Every
//! command sent to the device goes through [`DeviceController`], so there is
//! never more than one outstanding device command.

use std::{fmt, io, time::Duration};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::Profile,
    executor::{self, Executor, Output},
};

/// Markers in `adb devices` and `fastboot devices` output.
const RECOVERY_MARKER: &str = "\trecovery";
const NORMAL_MARKER: &str = "\tdevice";
const BOOTLOADER_MARKER: &str = "\tfastboot";

/// Port the bridge daemon listens on when the device is reached over the
/// network.
const NETWORK_PORT: u16 = 5555;
/// Bridge output prefix when no device answers.
const BRIDGE_ERROR: &str = "error:";
const CONNECTED_MARKER: &str = "connected to";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    #[default]
    Unknown,
    Bootloader,
    Recovery,
    Normal,
}

impl Mode {
    /// Whether the device bridge (shell, push, pull) is available.
    pub fn has_bridge(self) -> bool {
        matches!(self, Self::Recovery | Self::Normal)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Bootloader => "bootloader",
            Self::Recovery => "recovery",
            Self::Normal => "normal",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Device did not reach {target} mode after {attempts} attempts")]
    ModeTimeout { target: Mode, attempts: u32 },
    #[error("Don't know how to switch from {from} mode to {to} mode")]
    UnsupportedTransition { from: Mode, to: Mode },
    #[error("Failed to connect to {address}: {output}")]
    Connect { address: String, output: String },
    #[error("Failed to wait for operator")]
    Acknowledge(#[source] io::Error),
    #[error("Failed to run device command")]
    Executor(#[from] executor::Error),
}

type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub mode: Mode,
    /// Serial number as reported by the discovery command. On Linux, this may
    /// be `no permissions` if the user can't access the USB device.
    pub serial: Option<String>,
}

/// Operator interaction and the passage of time. Abstracted so that the
/// controller can be driven without a terminal or real delays.
pub trait Console {
    fn sleep(&mut self, duration: Duration);

    /// Show instructions and block until the operator confirms.
    fn acknowledge(&mut self, instructions: &str) -> io::Result<()>;
}

/// Settings the controller takes from the profile.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub bridge: String,
    pub bootloader: String,
    pub attempts: u32,
    pub interval: Duration,
    pub forced_reboot: Vec<String>,
    pub power_on_recovery: String,
    pub reboot_to_recovery: String,
    pub power_on_normal: String,
}

impl From<&Profile> for ControllerConfig {
    fn from(profile: &Profile) -> Self {
        Self {
            bridge: profile.tools.bridge.program.clone(),
            bootloader: profile.tools.bootloader.program.clone(),
            attempts: profile.poll.attempts,
            interval: profile.poll.interval(),
            forced_reboot: profile.forced_reboot.clone(),
            power_on_recovery: profile.prompts.power_on_recovery.clone(),
            reboot_to_recovery: profile.prompts.reboot_to_recovery.clone(),
            power_on_normal: profile.prompts.power_on_normal.clone(),
        }
    }
}

/// What needs to happen to get from one mode to another.
enum Transition<'a> {
    /// Run a command with the bridge tool.
    Bridge(Vec<&'a str>),
    /// Run a command with the bootloader tool.
    Bootloader(Vec<&'a str>),
    /// Wait for the operator, then optionally run a bootloader command.
    Operator(&'a str, Option<Vec<&'a str>>),
}

pub struct DeviceController<E, C> {
    executor: E,
    console: C,
    config: ControllerConfig,
    state: DeviceState,
}

impl<E: Executor, C: Console> DeviceController<E, C> {
    pub fn new(executor: E, console: C, config: ControllerConfig) -> Self {
        Self {
            executor,
            console,
            config,
            state: DeviceState::default(),
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    pub fn into_parts(self) -> (E, C) {
        (self.executor, self.console)
    }

    /// Run a bridge (`adb`) command.
    pub fn bridge(&mut self, args: &[&str]) -> Result<Output> {
        self.tool(true, args, None)
    }

    /// Run a bootloader (`fastboot`) command.
    pub fn bootloader(&mut self, args: &[&str]) -> Result<Output> {
        self.tool(false, args, None)
    }

    /// Run `<bridge> shell <command>`. The command is one token and is
    /// interpreted by the device's shell.
    pub fn shell(&mut self, command: &str) -> Result<Output> {
        self.bridge(&["shell", command])
    }

    /// Reach a device over the network instead of USB. Nothing is done if the
    /// bridge already has a device to talk to. A `host` without a port gets
    /// the bridge daemon's default port.
    pub fn connect(&mut self, host: &str) -> Result<()> {
        let output = self.shell("getprop ro.serialno")?;
        if output.success() && !output.text.starts_with(BRIDGE_ERROR) {
            debug!("Bridge already has a device: {}", output.text.trim());
            return Ok(());
        }

        let address = if host.contains(':') {
            host.to_owned()
        } else {
            format!("{host}:{NETWORK_PORT}")
        };

        let output = self.bridge(&["connect", &address])?;
        info!("Connecting to {address}: {}", output.text.trim());

        if !output.contains(CONNECTED_MARKER) {
            return Err(Error::Connect {
                address,
                output: output.text.trim().to_owned(),
            });
        }

        Ok(())
    }

    fn tool(&mut self, bridge: bool, args: &[&str], input: Option<&[u8]>) -> Result<Output> {
        let program = if bridge {
            self.config.bridge.as_str()
        } else {
            self.config.bootloader.as_str()
        };

        let mut cmd = Vec::with_capacity(args.len() + 1);
        cmd.push(program);
        cmd.extend_from_slice(args);

        Ok(self.executor.run(&cmd, input)?)
    }

    /// Run the discovery commands and update the device state. The bridge is
    /// asked first since it covers two modes.
    pub fn query_mode(&mut self) -> Result<Mode> {
        let output = self.bridge(&["devices"])?;

        let found = if let Some(line) = output.find_line(RECOVERY_MARKER) {
            Some((Mode::Recovery, line))
        } else if let Some(line) = output.find_line(NORMAL_MARKER) {
            Some((Mode::Normal, line))
        } else {
            None
        };

        if let Some((mode, line)) = found {
            self.set_found(mode, line);
            return Ok(mode);
        }

        let output = self.bootloader(&["devices"])?;

        if let Some(line) = output.find_line(BOOTLOADER_MARKER) {
            self.set_found(Mode::Bootloader, line);
        } else {
            self.state = DeviceState::default();
        }

        debug!("Current mode: {}", self.state.mode);

        Ok(self.state.mode)
    }

    fn set_found(&mut self, mode: Mode, line: &str) {
        let serial = line.split('\t').next().unwrap_or_default().trim();

        self.state = DeviceState {
            mode,
            serial: Some(serial.to_owned()),
        };
    }

    /// Make sure the bridge is usable. Either recovery or normal mode is fine.
    /// Otherwise, the device is brought to recovery mode.
    pub fn ensure_bridge(&mut self) -> Result<Mode> {
        let mode = self.query_mode()?;
        if mode.has_bridge() {
            return Ok(mode);
        }

        self.ensure_mode(Mode::Recovery)?;

        Ok(Mode::Recovery)
    }

    pub fn ensure_mode(&mut self, target: Mode) -> Result<()> {
        let current = self.query_mode()?;
        if current == target {
            debug!("Already in {target} mode");
            return Ok(());
        }

        info!("Switching from {current} mode to {target} mode");

        let config = self.config.clone();

        let transition = match (current, target) {
            (Mode::Recovery | Mode::Normal, Mode::Bootloader) => {
                Transition::Bridge(vec!["reboot", "bootloader"])
            }
            (Mode::Normal, Mode::Recovery) => Transition::Bridge(vec!["reboot", "recovery"]),
            (Mode::Bootloader, Mode::Recovery) => {
                Transition::Operator(&config.reboot_to_recovery, Some(vec!["reboot"]))
            }
            (Mode::Unknown, Mode::Recovery) => Transition::Operator(&config.power_on_recovery, None),
            (Mode::Bootloader, Mode::Normal) => Transition::Bootloader(vec!["reboot"]),
            // A plain reboot hangs in the unrestricted recovery.
            (Mode::Recovery, Mode::Normal) => {
                Transition::Bridge(config.forced_reboot.iter().map(String::as_str).collect())
            }
            (Mode::Unknown, Mode::Normal) => Transition::Operator(&config.power_on_normal, None),
            (from, to) => return Err(Error::UnsupportedTransition { from, to }),
        };

        match transition {
            Transition::Bridge(args) => {
                self.bridge(&args)?;
            }
            Transition::Bootloader(args) => {
                self.bootloader(&args)?;
            }
            Transition::Operator(instructions, args) => {
                self.console
                    .acknowledge(instructions)
                    .map_err(Error::Acknowledge)?;

                if let Some(args) = args {
                    self.bootloader(&args)?;
                }
            }
        }

        self.wait_for(target)
    }

    /// Poll the discovery command for `target` until it shows up or the
    /// attempts run out. The interval is slept between attempts.
    pub fn wait_for(&mut self, target: Mode) -> Result<()> {
        let (bridge, marker) = match target {
            Mode::Bootloader => (false, BOOTLOADER_MARKER),
            Mode::Recovery => (true, RECOVERY_MARKER),
            Mode::Normal => (true, NORMAL_MARKER),
            Mode::Unknown => {
                return Err(Error::UnsupportedTransition {
                    from: self.state.mode,
                    to: target,
                });
            }
        };

        let attempts = self.config.attempts;

        for attempt in 1..=attempts {
            if attempt > 1 {
                self.console.sleep(self.config.interval);
            }

            let output = self.tool(bridge, &["devices"], None)?;

            if let Some(line) = output.find_line(marker) {
                self.set_found(target, line);
                info!(
                    "Found device in {target} mode: {}",
                    self.state.serial.as_deref().unwrap_or_default(),
                );
                return Ok(());
            }

            debug!("Waiting for {target} mode ({attempt}/{attempts})");
        }

        warn!("Device did not reach {target} mode");
        self.state = DeviceState::default();

        Err(Error::ModeTimeout { target, attempts })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use assert_matches::assert_matches;

    use super::*;

    #[derive(Default)]
    struct Scripted {
        commands: Vec<String>,
        responses: VecDeque<&'static str>,
    }

    impl Executor for Scripted {
        fn run(&mut self, cmd: &[&str], _input: Option<&[u8]>) -> executor::Result<Output> {
            self.commands.push(cmd.join(" "));
            Ok(Output::new(0, self.responses.pop_front().unwrap_or_default()))
        }
    }

    #[derive(Default)]
    struct Silent(u32);

    impl Console for Silent {
        fn sleep(&mut self, _duration: Duration) {
            self.0 += 1;
        }

        fn acknowledge(&mut self, _instructions: &str) -> io::Result<()> {
            Ok(())
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig::from(&Profile::builtin().unwrap())
    }

    #[test]
    fn query_reports_serial() {
        let executor = Scripted {
            responses: ["List of devices attached\n", "0123ABCD\tfastboot\n"].into(),
            ..Default::default()
        };
        let mut controller = DeviceController::new(executor, Silent::default(), config());

        assert_eq!(controller.query_mode().unwrap(), Mode::Bootloader);
        assert_eq!(controller.state().serial.as_deref(), Some("0123ABCD"));
        assert_eq!(controller.executor().commands, ["adb devices", "fastboot devices"]);
    }

    #[test]
    fn bootloader_from_unknown_is_unsupported() {
        let mut controller =
            DeviceController::new(Scripted::default(), Silent::default(), config());

        assert_matches!(
            controller.ensure_mode(Mode::Bootloader),
            Err(Error::UnsupportedTransition {
                from: Mode::Unknown,
                to: Mode::Bootloader,
            })
        );
    }
}
