// SPDX-FileCopyrightText: 2025 reviveMC74 contributors
// SPDX-License-Identifier: GPL-3.0-only

mod common;

use assert_matches::assert_matches;
use reviver::{
    config::Profile,
    device::{self, ControllerConfig, DeviceController, Mode},
};

use common::{FakeConsole, FakeDevice, SERIAL};

fn controller(device: FakeDevice) -> DeviceController<FakeDevice, FakeConsole> {
    let config = ControllerConfig::from(&Profile::builtin().unwrap());
    DeviceController::new(device, FakeConsole::default(), config)
}

#[test]
fn query_each_mode() {
    for mode in [Mode::Bootloader, Mode::Recovery, Mode::Normal] {
        let mut controller = controller(FakeDevice::in_mode(mode));

        assert_eq!(controller.query_mode().unwrap(), mode);
        assert_eq!(controller.state().mode, mode);
        assert_eq!(controller.state().serial.as_deref(), Some(SERIAL));
    }

    let mut controller = controller(FakeDevice::default());
    assert_eq!(controller.query_mode().unwrap(), Mode::Unknown);
    assert_eq!(controller.state().serial, None);
}

#[test]
fn timeout_polls_every_attempt() {
    let mut controller = controller(FakeDevice::default());

    assert_matches!(
        controller.ensure_mode(Mode::Recovery),
        Err(device::Error::ModeTimeout {
            target: Mode::Recovery,
            attempts: 12,
        })
    );
    assert_eq!(controller.state().mode, Mode::Unknown);

    let (device, console) = controller.into_parts();

    // One query before the prompt, then one per attempt.
    assert_eq!(device.count("adb devices"), 13);
    assert_eq!(console.sleeps, 11);
    assert_eq!(console.prompts.len(), 1);
}

#[test]
fn normal_to_bootloader() {
    let mut device = FakeDevice::in_mode(Mode::Normal);
    device.boot_polls = 3;
    let mut controller = controller(device);

    controller.ensure_mode(Mode::Bootloader).unwrap();
    assert_eq!(controller.state().mode, Mode::Bootloader);

    let (device, console) = controller.into_parts();
    assert_eq!(device.count("adb reboot bootloader"), 1);
    assert_eq!(device.count("fastboot devices"), 4);
    assert_eq!(console.sleeps, 3);
    assert!(console.prompts.is_empty());
}

#[test]
fn recovery_to_normal_uses_forced_reboot() {
    let mut controller = controller(FakeDevice::in_mode(Mode::Recovery));

    controller.ensure_mode(Mode::Normal).unwrap();

    let (device, _) = controller.into_parts();
    assert_eq!(device.count("adb shell echo b >/proc/sysrq-trigger"), 1);
    assert_eq!(device.count("adb reboot"), 0);
}

#[test]
fn bootloader_to_recovery_needs_operator() {
    let mut device = FakeDevice::in_mode(Mode::Bootloader);
    device.fastboot_reboot_mode = Mode::Recovery;
    let mut controller = controller(device);

    controller.ensure_mode(Mode::Recovery).unwrap();
    assert_eq!(controller.state().mode, Mode::Recovery);

    let (device, console) = controller.into_parts();
    assert_eq!(console.prompts.len(), 1);
    assert_eq!(device.count("fastboot reboot"), 1);
}

#[test]
fn already_in_mode_sends_nothing() {
    let mut controller = controller(FakeDevice::in_mode(Mode::Recovery));

    controller.ensure_mode(Mode::Recovery).unwrap();
    assert_eq!(controller.ensure_bridge().unwrap(), Mode::Recovery);

    let (device, _) = controller.into_parts();
    assert!(device.commands.iter().all(|c| c == "adb devices"));
}

#[test]
fn connect_over_network() {
    let mut device = FakeDevice::default();
    device.network_address = Some("phCom:5555".to_owned());
    let mut controller = controller(device);

    controller.connect("phCom").unwrap();
    assert_eq!(controller.query_mode().unwrap(), Mode::Normal);

    // Already reachable, so nothing more to do.
    controller.connect("phCom").unwrap();

    let (device, _) = controller.into_parts();
    assert_eq!(device.count("adb connect phCom:5555"), 1);
}

#[test]
fn connect_failure() {
    let mut controller = controller(FakeDevice::default());

    assert_matches!(
        controller.connect("10.0.0.7:5037"),
        Err(device::Error::Connect { address, .. }) if address == "10.0.0.7:5037"
    );
}
