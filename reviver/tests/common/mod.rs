// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use reviver::{
    device::{Console, Mode},
    executor::{self, Executor, Output},
};

pub const SERIAL: &str = "MC74SERIAL";
pub const MAC: &str = "e0:55:3d:50:56:10";

/// A simulated MC74 that answers `adb` and `fastboot` commands. Device files
/// (block devices included) live in `blobs`.
pub struct FakeDevice {
    pub mode: Mode,
    /// Mode the device ends up in after `fastboot reboot`.
    pub fastboot_reboot_mode: Mode,
    /// Number of discovery polls during which a rebooting device is invisible.
    pub boot_polls: u32,
    hidden_polls: u32,
    pub recovery_unrestricted: bool,
    pub tools_present: bool,
    /// Address at which the device accepts network bridge connections.
    pub network_address: Option<String>,
    pub blobs: BTreeMap<String, Vec<u8>>,
    /// Canned outputs for commands starting with a prefix. Checked first.
    pub overrides: Vec<(String, Output)>,
    pub commands: Vec<String>,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self {
            mode: Mode::Unknown,
            fastboot_reboot_mode: Mode::Normal,
            boot_polls: 0,
            hidden_polls: 0,
            recovery_unrestricted: false,
            tools_present: true,
            network_address: None,
            blobs: BTreeMap::new(),
            overrides: vec![],
            commands: vec![],
        }
    }
}

impl FakeDevice {
    pub fn in_mode(mode: Mode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn count(&self, needle: &str) -> usize {
        self.commands.iter().filter(|c| c.contains(needle)).count()
    }

    fn switch(&mut self, mode: Mode) -> Output {
        self.mode = mode;
        self.hidden_polls = self.boot_polls;
        Output::new(0, "")
    }

    fn devices(&mut self, bridge: bool) -> Output {
        let mut text = String::from("List of devices attached\n");

        if self.hidden_polls > 0 {
            self.hidden_polls -= 1;
            return Output::new(0, &text);
        }

        let state = match (bridge, self.mode) {
            (true, Mode::Recovery) => Some("recovery"),
            (true, Mode::Normal) => Some("device"),
            (false, Mode::Bootloader) => Some("fastboot"),
            _ => None,
        };

        if let Some(state) = state {
            text.push_str(&format!("{SERIAL}\t{state}\n"));
        }

        Output::new(0, &text)
    }

    fn shell(&mut self, command: &str) -> Output {
        if command == "echo b >/proc/sysrq-trigger" {
            return self.switch(Mode::Normal);
        } else if command == "id" {
            return Output::new(0, "uid=0(root) gid=0(root)\n");
        } else if command == "getprop ro.serialno" {
            return if self.mode.has_bridge() {
                Output::new(0, &format!("{SERIAL}\n"))
            } else {
                Output::new(1, "error: no devices/emulators found\n")
            };
        } else if command.starts_with("ip addr") {
            return Output::new(0, &format!("    link/ether {MAC} brd ff:ff:ff:ff:ff:ff\n"));
        } else if command == "grep secure default.prop" {
            let value = if self.recovery_unrestricted { 0 } else { 1 };
            return Output::new(0, &format!("ro.secure={value}\n"));
        }

        if let Some(args) = command.strip_prefix("dd ") {
            let arg = |key: &str| {
                args.split_whitespace()
                    .find_map(|a| a.strip_prefix(key))
                    .unwrap_or_default()
                    .to_owned()
            };
            let (input, output) = (arg("if="), arg("of="));

            return match self.blobs.get(&input).cloned() {
                Some(data) => {
                    self.blobs.insert(output, data);
                    Output::new(0, "16384+0 records in\n")
                }
                None => Output::new(1, &format!("dd: {input}: No such file or directory\n")),
            };
        } else if let Some(path) = command.strip_prefix("rm ") {
            self.blobs.remove(path);
        } else if let Some(path) = command.strip_prefix("cat ") {
            return match self.blobs.get(path) {
                Some(data) => Output::new(0, &String::from_utf8_lossy(data)),
                None => Output::new(1, &format!("{path}: No such file or directory\n")),
            };
        } else if let Some((text, path)) = command
            .strip_prefix("echo ")
            .and_then(|c| c.split_once(" > "))
        {
            self.blobs.insert(path.to_owned(), format!("{text}\n").into_bytes());
        }

        Output::new(0, "")
    }

    fn transfer(&mut self, push: bool, from: &str, to: &str) -> Output {
        let result = if push {
            fs::read(from).map(|data| {
                self.blobs.insert(to.to_owned(), data);
            })
        } else {
            match self.blobs.get(from) {
                Some(data) => fs::write(to, data),
                None => Err(io::Error::from(io::ErrorKind::NotFound)),
            }
        };

        match result {
            Ok(()) => Output::new(0, "1 file transferred\n"),
            Err(e) => Output::new(1, &format!("error: {e}\n")),
        }
    }
}

impl Executor for FakeDevice {
    fn run(&mut self, cmd: &[&str], _input: Option<&[u8]>) -> executor::Result<Output> {
        let line = cmd.join(" ");
        self.commands.push(line.clone());

        if let Some((_, output)) = self.overrides.iter().find(|(p, _)| line.starts_with(p)) {
            return Ok(output.clone());
        }

        let output = match cmd {
            ["adb", "devices"] => self.devices(true),
            ["fastboot", "devices"] => self.devices(false),
            ["adb", "reboot", "bootloader"] => self.switch(Mode::Bootloader),
            ["adb", "reboot", "recovery"] => self.switch(Mode::Recovery),
            ["fastboot", "reboot"] => self.switch(self.fastboot_reboot_mode),
            ["fastboot", "flash", "recovery", _] => {
                self.recovery_unrestricted = true;
                Output::new(0, "OKAY\n")
            }
            ["adb", "connect", address] => {
                if self.network_address.as_deref() == Some(*address) {
                    self.mode = Mode::Normal;
                    Output::new(0, &format!("connected to {address}\n"))
                } else {
                    Output::new(1, &format!("failed to connect to {address}\n"))
                }
            }
            ["adb", "push", from, to] => self.transfer(true, from, to),
            ["adb", "pull", from, to] => self.transfer(false, from, to),
            ["adb", "shell", command] => self.shell(command),
            _ => Output::new(0, ""),
        };

        Ok(output)
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.tools_present
            .then(|| Path::new("/usr/bin").join(program))
    }
}

/// Console that records prompts and never really sleeps.
#[derive(Debug, Default)]
pub struct FakeConsole {
    pub prompts: Vec<String>,
    pub sleeps: u32,
}

impl Console for FakeConsole {
    fn sleep(&mut self, _duration: Duration) {
        self.sleeps += 1;
    }

    fn acknowledge(&mut self, instructions: &str) -> io::Result<()> {
        self.prompts.push(instructions.to_owned());
        Ok(())
    }
}
