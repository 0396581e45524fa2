mod common;

use embassy_futures::block_on;
use embassy_time::Duration;

use common::{setup, Commander, RegisterFile};
use px4io_driver_rust::registers::*;
use px4io_driver_rust::state::{ActuatorArmed, RestartReason, VehicleCommand};
use px4io_driver_rust::{DriverState, Error, LinkFault, RecoveryStage};

fn in_air_file(extra: ArmingFlags) -> RegisterFile {
    let mut file = RegisterFile::px4io_default();
    file.set(SETUP_ARMING, (ArmingFlags::INAIR_RESTART_OK | ArmingFlags::FMU_ARMED | extra).bits());
    file
}

#[test]
fn test_cold_boot_clears_arming_and_uploads_rc_config() {
    let mut file = RegisterFile::px4io_default();
    file.set(SETUP_ARMING, (ArmingFlags::FMU_ARMED | ArmingFlags::LOCKDOWN | ArmingFlags::IO_ARM_OK).bits());
    let (mut io, file, mut host) = setup(file);

    block_on(io.init(&mut host)).unwrap();

    assert_eq!(io.state(), DriverState::Running);
    assert_eq!(io.hardware_version(), 2);
    assert_eq!(io.bootloader_version(), 3);
    assert_eq!(io.max_rc_inputs(), 18);
    assert_eq!(io.channel_count(), 8);
    assert_eq!(io.transfer_limit(), 62);

    let file = file.borrow();
    // Only IO_ARM_OK survives the clear.
    assert_eq!(file.writes_to(SETUP_ARMING), vec![vec![ArmingFlags::IO_ARM_OK.bits()]]);

    let rc = file.writes_to_page(PAGE_RC_CONFIG);
    assert_eq!(rc.len(), 18);
    for (input, (address, block)) in rc.iter().enumerate() {
        assert_eq!(usize::from(address.offset), input * RC_CONFIG_STRIDE);
        assert_eq!(block, &vec![1000, 1500, 2000, 0, RC_ASSIGNMENT_NONE, RcConfigOptions::ENABLED.bits()]);
    }

    // The arming clear comes before any RC configuration.
    let arming_at = file.writes.iter().position(|(a, _)| *a == SETUP_ARMING).unwrap();
    let rc_at = file.writes.iter().position(|(a, _)| a.page == PAGE_RC_CONFIG).unwrap();
    assert!(arming_at < rc_at);

    assert_eq!(host.restart_reason, Some(RestartReason::PowerOn));
    assert_eq!(file.get(RegisterAddress::new(PAGE_DISARMED_PWM, 0)), PWM_MOTOR_OFF);
}

#[test]
fn test_rc_handling_disabled_skips_upload() {
    let file = std::rc::Rc::new(std::cell::RefCell::new(RegisterFile::px4io_default()));
    let config = px4io_driver_rust::Px4IoConfig { rc_handling_disabled: true, ..Default::default() };
    let mut io = px4io_driver_rust::Px4Io::new(common::MockLink(file.clone()), config);
    let mut host = common::MockHost::new();

    block_on(io.init(&mut host)).unwrap();

    let file = file.borrow();
    assert!(file.writes_to_page(PAGE_RC_CONFIG).is_empty());
    let arming = ArmingFlags::from_bits_retain(file.get(SETUP_ARMING));
    assert!(arming.contains(ArmingFlags::RC_HANDLING_DISABLED));
}

#[test]
fn test_rc_config_rejection_stops_upload() {
    let mut file = RegisterFile::px4io_default();
    file.rc_config_status = Some(StatusFlags::FMU_OK);
    let (mut io, file, mut host) = setup(file);

    // A rejected block is not fatal.
    block_on(io.init(&mut host)).unwrap();
    assert_eq!(file.borrow().writes_to_page(PAGE_RC_CONFIG).len(), 1);
}

#[test]
fn test_protocol_mismatch_is_fatal() {
    let mut file = RegisterFile::px4io_default();
    file.set(CONFIG_PROTOCOL_VERSION, 3);
    let (mut io, file, mut host) = setup(file);

    assert_eq!(block_on(io.init(&mut host)), Err(Error::ProtocolMismatch { found: 3 }));
    assert_eq!(io.state(), DriverState::Uninitialized);
    assert!(file.borrow().writes.is_empty());
}

#[test]
fn test_dead_link_gives_up_after_700_ms() {
    let mut file = RegisterFile::px4io_default();
    file.offline = true;
    let (mut io, _file, mut host) = setup(file);
    let start = host.now;

    assert_eq!(block_on(io.init(&mut host)), Err(Error::Link(LinkFault::Timeout)));

    let waited = host.now - start;
    assert!(waited >= Duration::from_millis(700));
    assert!(waited < Duration::from_millis(710));
}

#[test]
fn test_config_out_of_range_parks_in_bootloader() {
    let mut file = RegisterFile::px4io_default();
    file.set(CONFIG_ACTUATOR_COUNT, 0);
    let (mut io, file, mut host) = setup(file);

    assert_eq!(block_on(io.init(&mut host)), Err(Error::ConfigOutOfRange));

    let file = file.borrow();
    let writes: Vec<_> = file.writes.iter().map(|(a, v)| (*a, v[0])).collect();
    assert_eq!(
        writes,
        vec![(SETUP_FORCE_SAFETY_ON, FORCE_SAFETY_MAGIC), (SETUP_REBOOT_BL, REBOOT_BL_MAGIC)]
    );
}

#[test]
fn test_transfer_limit_below_minimum_is_rejected() {
    let mut file = RegisterFile::px4io_default();
    file.set(CONFIG_MAX_TRANSFER, 10);
    let (mut io, _file, mut host) = setup(file);

    assert_eq!(block_on(io.init(&mut host)), Err(Error::ConfigOutOfRange));
}

#[test]
fn test_in_air_restart_rearms_commander() {
    let (mut io, file, mut host) = setup(in_air_file(ArmingFlags::empty()));
    host.commander = Commander { answers_arm: true, latency: Duration::from_millis(10), ..Default::default() };
    let now = host.now;
    host.push_armed(now, ActuatorArmed::default());

    block_on(io.init(&mut host)).unwrap();

    assert_eq!(io.state(), DriverState::Running);
    assert!(io.armed().armed);
    assert_eq!(host.restart_reason, Some(RestartReason::InFlight));
    let commands: Vec<_> = host.commands_out.iter().map(|(_, c)| *c).collect();
    assert_eq!(commands, vec![VehicleCommand::Arm { in_air_restore: true }]);

    let file = file.borrow();
    // The coprocessor keeps driving outputs: nothing touched arming or RC.
    assert!(file.writes_to(SETUP_ARMING).is_empty());
    assert!(file.writes_to_page(PAGE_RC_CONFIG).is_empty());
}

#[test]
fn test_in_air_restart_requests_termination_first() {
    let (mut io, _file, mut host) = setup(in_air_file(ArmingFlags::FORCE_FAILSAFE));
    host.commander = Commander {
        answers_termination: true,
        answers_arm: true,
        latency: Duration::from_millis(120),
    };
    let now = host.now;
    host.push_armed(now, ActuatorArmed::default());

    block_on(io.init(&mut host)).unwrap();

    let armed = io.armed();
    assert!(armed.armed && armed.force_failsafe);

    let commands: Vec<_> = host.commands_out.iter().map(|(_, c)| *c).collect();
    // 120 ms latency: each request goes out three times, 50 ms apart.
    assert_eq!(&commands[..3], &[VehicleCommand::FlightTermination; 3]);
    assert_eq!(&commands[3..], &[VehicleCommand::Arm { in_air_restore: true }; 3]);
    assert_eq!(host.commands_out[1].0 - host.commands_out[0].0, Duration::from_millis(50));
}

#[test]
fn test_in_air_restart_without_arming_feed_times_out() {
    let (mut io, file, mut host) = setup(in_air_file(ArmingFlags::empty()));
    let start = host.now;

    assert_eq!(
        block_on(io.init(&mut host)),
        Err(Error::RecoveryTimeout(RecoveryStage::ArmingFeed))
    );
    // Probe retry delay plus the three second feed deadline.
    assert_eq!(host.now - start, Duration::from_millis(3_002));
    assert_ne!(io.state(), DriverState::Running);

    let file = file.borrow();
    assert!(file.writes_to_page(PAGE_RC_CONFIG).is_empty());
    assert!(file.writes_to(SETUP_ARMING).is_empty());
    assert!(host.commands_out.is_empty());
}

#[test]
fn test_in_air_restart_unanswered_arm_times_out() {
    let (mut io, file, mut host) = setup(in_air_file(ArmingFlags::empty()));
    let start = host.now;
    host.push_armed(start, ActuatorArmed::default());

    assert_eq!(block_on(io.init(&mut host)), Err(Error::RecoveryTimeout(RecoveryStage::Arm)));

    // Bounded by two seconds from entry, resent every 50 ms.
    assert_eq!(host.now - start, Duration::from_millis(2_002));
    assert_eq!(host.commands_out.len(), 40);
    assert!(file.borrow().writes_to_page(PAGE_RC_CONFIG).is_empty());
    // Still flagged armed on the coprocessor.
    let arming = ArmingFlags::from_bits_retain(file.borrow().get(SETUP_ARMING));
    assert!(arming.contains(ArmingFlags::FMU_ARMED));
}

#[test]
fn test_restart_reason_is_volatile_until_resolved() {
    let (mut io, _file, mut host) = setup(in_air_file(ArmingFlags::empty()));
    host.restart_reason = Some(RestartReason::InFlight);

    assert!(block_on(io.init(&mut host)).is_err());
    assert_eq!(host.restart_reason, Some(RestartReason::Volatile));
}

#[test]
fn test_io_safety_breaker_forces_safety_off() {
    let (mut io, file, mut host) = setup(RegisterFile::px4io_default());
    host.config.cb_io_safety = true;

    block_on(io.init(&mut host)).unwrap();
    assert_eq!(file.borrow().writes_to(SETUP_FORCE_SAFETY_OFF), vec![vec![FORCE_SAFETY_MAGIC]]);
}
