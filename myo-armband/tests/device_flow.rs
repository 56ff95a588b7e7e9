//! End-to-end controller flows over a scripted link.
//!
//! Each test pre-loads the byte stream a BLED112 would produce for the
//! exchange under test and drives the controller against it, so the full
//! frame-decode → dispatch → controller path runs without hardware.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bled112_transport::protocol::{class, cmd, evt};
use bled112_transport::testing::{event_frame, response_frame, ScriptedLink};
use bled112_transport::{AddressType, DeviceAddress, ScanResult};
use myo_armband::{myohw, ImuReading, JointSample, MyoDongle, MyoError};

const MYO_ADDRESS: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];

const COMMAND_HANDLE: u16 = 0x0019;
const IMU_HANDLE: u16 = 0x0024;
const IMU_CCCD: u16 = 0x0025;
const EMG_HANDLES: [u16; 4] = [0x002B, 0x002E, 0x0031, 0x0034];
const BATTERY_HANDLE: u16 = 0x0041;

fn dongle_over(link: &ScriptedLink) -> MyoDongle {
    MyoDongle::with_link(Box::new(link.clone()), false)
}

fn myo_device() -> ScanResult {
    ScanResult {
        address: DeviceAddress::new(MYO_ADDRESS),
        address_type: AddressType::Random,
        rssi: -57,
        data: Vec::new(),
    }
}

fn myo_advertisement() -> Vec<u8> {
    let mut data = vec![0x02, 0x01, 0x06];
    data.extend_from_slice(&myohw::full_uuid(myohw::short_uuid::CONTROL_SERVICE));
    data
}

fn queue_gap_ok(link: &ScriptedLink, message_id: u8) {
    link.queue(&response_frame(class::GAP, message_id, &[0x00, 0x00]));
}

fn queue_att_ok(link: &ScriptedLink, message_id: u8) {
    link.queue(&response_frame(class::ATTCLIENT, message_id, &[0x00, 0x00, 0x00]));
}

fn queue_scan_response(link: &ScriptedLink, rssi: i8, data: &[u8]) {
    let mut payload = vec![rssi as u8, 0x00];
    payload.extend_from_slice(&MYO_ADDRESS);
    payload.push(0x01); // address type: random
    payload.push(0x00); // bond
    payload.push(data.len() as u8);
    payload.extend_from_slice(data);
    link.queue(&event_frame(class::GAP, evt::GAP_SCAN_RESPONSE, &payload));
}

fn queue_connection_status(link: &ScriptedLink, handle: u8) {
    let mut payload = vec![handle, 0x05];
    payload.extend_from_slice(&MYO_ADDRESS);
    payload.push(0x01);
    payload.extend_from_slice(&6u16.to_le_bytes());
    payload.extend_from_slice(&64u16.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.push(0xFF);
    link.queue(&event_frame(class::CONNECTION, evt::CONNECTION_STATUS, &payload));
}

fn queue_disconnected(link: &ScriptedLink, handle: u8, reason: u16) {
    let mut payload = vec![handle];
    payload.extend_from_slice(&reason.to_le_bytes());
    link.queue(&event_frame(
        class::CONNECTION,
        evt::CONNECTION_DISCONNECTED,
        &payload,
    ));
}

fn queue_procedure_completed(link: &ScriptedLink, conn: u8, result: u16, chrhandle: u16) {
    let mut payload = vec![conn];
    payload.extend_from_slice(&result.to_le_bytes());
    payload.extend_from_slice(&chrhandle.to_le_bytes());
    link.queue(&event_frame(
        class::ATTCLIENT,
        evt::ATTCLIENT_PROCEDURE_COMPLETED,
        &payload,
    ));
}

fn queue_group_found(link: &ScriptedLink, conn: u8, start: u16, end: u16, uuid: &[u8]) {
    let mut payload = vec![conn];
    payload.extend_from_slice(&start.to_le_bytes());
    payload.extend_from_slice(&end.to_le_bytes());
    payload.push(uuid.len() as u8);
    payload.extend_from_slice(uuid);
    link.queue(&event_frame(
        class::ATTCLIENT,
        evt::ATTCLIENT_GROUP_FOUND,
        &payload,
    ));
}

fn queue_attribute_found(link: &ScriptedLink, conn: u8, handle: u16, uuid: &[u8]) {
    let mut payload = vec![conn];
    payload.extend_from_slice(&handle.to_le_bytes());
    payload.push(uuid.len() as u8);
    payload.extend_from_slice(uuid);
    link.queue(&event_frame(
        class::ATTCLIENT,
        evt::ATTCLIENT_FIND_INFORMATION_FOUND,
        &payload,
    ));
}

fn queue_attribute_value(link: &ScriptedLink, conn: u8, handle: u16, value: &[u8]) {
    let mut payload = vec![conn];
    payload.extend_from_slice(&handle.to_le_bytes());
    payload.push(0x01); // value type
    payload.push(value.len() as u8);
    payload.extend_from_slice(value);
    link.queue(&event_frame(
        class::ATTCLIENT,
        evt::ATTCLIENT_ATTRIBUTE_VALUE,
        &payload,
    ));
}

fn queue_connect_exchange(link: &ScriptedLink) {
    link.queue(&response_frame(
        class::GAP,
        cmd::GAP_CONNECT_DIRECT,
        &[0x00, 0x00, 0x00],
    ));
    queue_connection_status(link, 0);
}

/// Responses for one full `clear_state` on an idle dongle: set-mode, eight
/// "not connected" disconnect attempts, end-procedure.
fn queue_idle_clear_state(link: &ScriptedLink) {
    queue_gap_ok(link, cmd::GAP_SET_MODE);
    for handle in 0..8u8 {
        link.queue(&response_frame(
            class::CONNECTION,
            cmd::CONNECTION_DISCONNECT,
            &[handle, 0x86, 0x01],
        ));
    }
    queue_gap_ok(link, cmd::GAP_END_PROCEDURE);
}

/// The full service/attribute discovery exchange for a healthy Myo.
fn queue_service_discovery(link: &ScriptedLink) {
    queue_att_ok(link, cmd::ATTCLIENT_READ_BY_GROUP_TYPE);
    queue_group_found(
        link,
        0,
        0x0001,
        0xFFFF,
        &myohw::full_uuid(myohw::short_uuid::CONTROL_SERVICE),
    );
    queue_procedure_completed(link, 0, 0, 0xFFFF);

    queue_att_ok(link, cmd::ATTCLIENT_FIND_INFORMATION);
    queue_attribute_found(
        link,
        0,
        COMMAND_HANDLE,
        &myohw::full_uuid(myohw::short_uuid::COMMAND),
    );
    queue_attribute_found(link, 0, IMU_HANDLE, &myohw::full_uuid(myohw::short_uuid::IMU_DATA));
    queue_attribute_found(link, 0, IMU_CCCD, &myohw::CCCD_UUID);
    let emg_shorts = [
        myohw::short_uuid::EMG_DATA_0,
        myohw::short_uuid::EMG_DATA_1,
        myohw::short_uuid::EMG_DATA_2,
        myohw::short_uuid::EMG_DATA_3,
    ];
    for (handle, short) in EMG_HANDLES.iter().zip(emg_shorts) {
        queue_attribute_found(link, 0, *handle, &myohw::full_uuid(short));
        queue_attribute_found(link, 0, handle + 1, &myohw::CCCD_UUID);
    }
    queue_attribute_found(link, 0, BATTERY_HANDLE, &myohw::BATTERY_LEVEL_UUID);
    queue_procedure_completed(link, 0, 0, 0xFFFF);
}

fn queue_write_ack(link: &ScriptedLink, chrhandle: u16) {
    queue_att_ok(link, cmd::ATTCLIENT_ATTRIBUTE_WRITE);
    queue_procedure_completed(link, 0, 0, chrhandle);
}

fn imu_payload() -> Vec<u8> {
    let mut payload = Vec::new();
    for v in 1i16..=10 {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    payload
}

/// Connect and enable IMU streaming against a fully scripted device.
fn connected_streaming_dongle(link: &ScriptedLink) -> MyoDongle {
    queue_connect_exchange(link);
    let mut dongle = dongle_over(link);
    assert!(dongle.connect(&myo_device()).unwrap());

    queue_service_discovery(link);
    queue_write_ack(link, IMU_CCCD);
    queue_write_ack(link, COMMAND_HANDLE);
    dongle.enable_imu_readings().unwrap();
    dongle
}

#[test]
fn discovers_advertising_myo() {
    let link = ScriptedLink::new();
    queue_gap_ok(&link, cmd::GAP_DISCOVER);
    queue_scan_response(&link, -57, &myo_advertisement());
    queue_gap_ok(&link, cmd::GAP_END_PROCEDURE);

    let mut dongle = dongle_over(&link);
    let found = dongle
        .discover_myo_devices(Duration::from_millis(50))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].address.raw, MYO_ADDRESS);
    assert_eq!(found[0].address_type, AddressType::Random);
    assert_eq!(found[0].rssi, -57);
}

#[test]
fn rejects_advertisement_with_wrong_trailer() {
    let link = ScriptedLink::new();
    queue_gap_ok(&link, cmd::GAP_DISCOVER);
    let mut advert = myo_advertisement();
    *advert.last_mut().unwrap() ^= 0x01;
    queue_scan_response(&link, -57, &advert);
    queue_gap_ok(&link, cmd::GAP_END_PROCEDURE);

    let mut dongle = dongle_over(&link);
    let found = dongle
        .discover_myo_devices(Duration::from_millis(50))
        .unwrap();
    assert!(found.is_empty());
}

#[test]
fn unexpected_disconnect_stops_the_pump() {
    let link = ScriptedLink::new();
    queue_connect_exchange(&link);

    let mut dongle = dongle_over(&link);
    assert!(dongle.connect(&myo_device()).unwrap());
    assert!(dongle.is_connected());

    // Supervision-timeout disconnect arrives mid-stream.
    queue_disconnected(&link, 0, 0x0208);
    let start = Instant::now();
    let dropped = dongle
        .scan_for_data_packets_conditional(Duration::from_secs(1))
        .unwrap();
    assert!(dropped);
    assert!(start.elapsed() < Duration::from_millis(500), "should return early");
    assert!(!dongle.is_connected());

    match dongle.read_battery_level() {
        Err(MyoError::NotConnected) => {}
        other => panic!("expected NotConnected, got {other:?}"),
    }
}

#[test]
fn connect_reports_failure_without_status_event() {
    let link = ScriptedLink::new();
    link.queue(&response_frame(
        class::GAP,
        cmd::GAP_CONNECT_DIRECT,
        &[0x00, 0x00, 0x00],
    ));
    // No connection_status follows; the controller gives up at its deadline.
    let mut dongle = dongle_over(&link);
    let connected = dongle.connect(&myo_device()).unwrap();
    assert!(!connected);
    assert!(!dongle.is_connected());
}

#[test]
fn enable_imu_resolves_handles_and_decodes_samples() {
    let link = ScriptedLink::new();
    queue_connect_exchange(&link);
    let mut dongle = dongle_over(&link);
    assert!(dongle.connect(&myo_device()).unwrap());

    let readings: Rc<RefCell<Vec<ImuReading>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&readings);
    dongle.add_imu_handler(move |imu| sink.borrow_mut().push(*imu));

    queue_service_discovery(&link);
    queue_write_ack(&link, IMU_CCCD);
    queue_write_ack(&link, COMMAND_HANDLE);
    dongle.enable_imu_readings().unwrap();

    // CCCDs sit directly after their characteristics.
    let handles = dongle.handles().unwrap();
    assert_eq!(handles.imu, IMU_HANDLE);
    assert_eq!(handles.imu_cccd, handles.imu + 1);
    for k in 0..4 {
        assert_eq!(handles.emg[k], EMG_HANDLES[k]);
        assert_eq!(handles.emg_cccd[k], handles.emg[k] + 1);
    }
    assert_eq!(handles.command, COMMAND_HANDLE);
    assert_eq!(handles.battery, Some(BATTERY_HANDLE));

    queue_attribute_value(&link, 0, IMU_HANDLE, &imu_payload());
    dongle.scan_for_data_packets(Duration::from_millis(30)).unwrap();

    let readings = readings.borrow();
    assert_eq!(readings.len(), 1);
    let imu = &readings[0];
    assert_eq!(imu.quat, [1, 2, 3, 4]);
    assert_eq!(imu.accel, [5, 6, 7]);
    assert_eq!(imu.gyro, [8, 9, 10]);
    assert_eq!(imu.orientation(), [1.0, 2.0, 3.0, 4.0].map(|v| v / 16384.0));
    assert_eq!(imu.acceleration(), [5.0, 6.0, 7.0].map(|v| v / 2048.0));
    assert_eq!(imu.angular_rate(), [8.0, 9.0, 10.0].map(|v| v / 16.0));
}

#[test]
fn emg_notification_yields_two_joint_samples() {
    let link = ScriptedLink::new();
    let mut dongle = connected_streaming_dongle(&link);

    let joints: Rc<RefCell<Vec<JointSample>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&joints);
    dongle.add_joint_emg_imu_handler(move |s| sink.borrow_mut().push(s.clone()));

    queue_attribute_value(&link, 0, IMU_HANDLE, &imu_payload());
    let emg_bytes = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE,
        0xFF,
    ];
    queue_attribute_value(&link, 0, EMG_HANDLES[0], &emg_bytes);
    dongle.scan_for_data_packets(Duration::from_millis(30)).unwrap();

    let joints = joints.borrow();
    assert_eq!(joints.len(), 2);
    assert_eq!(joints[0].emg, [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
    let expected_second: [i8; 8] = [
        0x88u8 as i8,
        0x99u8 as i8,
        0xAAu8 as i8,
        0xBBu8 as i8,
        0xCCu8 as i8,
        0xDDu8 as i8,
        0xEEu8 as i8,
        0xFFu8 as i8,
    ];
    assert_eq!(joints[1].emg, expected_second);
    assert_eq!(joints[0].imu, joints[1].imu);
    assert_eq!(joints[0].imu.quat, [1, 2, 3, 4]);
    assert_eq!(joints[1].sequence_index, joints[0].sequence_index + 1);
}

#[test]
fn battery_read_returns_captured_level() {
    let link = ScriptedLink::new();
    let mut dongle = connected_streaming_dongle(&link);

    queue_att_ok(&link, cmd::ATTCLIENT_READ_BY_HANDLE);
    queue_attribute_value(&link, 0, BATTERY_HANDLE, &[87]);
    assert_eq!(dongle.read_battery_level().unwrap(), Some(87));
}

#[test]
fn clear_state_is_idempotent_without_connection() {
    let link = ScriptedLink::new();
    let mut dongle = dongle_over(&link);

    queue_idle_clear_state(&link);
    dongle.clear_state().unwrap();

    queue_idle_clear_state(&link);
    dongle.clear_state().unwrap();

    assert!(!dongle.imu_enabled());
    assert!(!dongle.emg_enabled());
    assert!(!dongle.sleep_disabled());
    assert!(!dongle.is_connected());
}

#[test]
fn clear_state_tears_down_an_active_stream() {
    let link = ScriptedLink::new();
    let mut dongle = connected_streaming_dongle(&link);

    // Notifications off on the IMU CCCD, mode off, then the GAP teardown.
    queue_write_ack(&link, IMU_CCCD);
    queue_write_ack(&link, COMMAND_HANDLE);
    queue_gap_ok(&link, cmd::GAP_SET_MODE);
    // Handle 0 really disconnects; the rest report "not connected".
    link.queue(&response_frame(
        class::CONNECTION,
        cmd::CONNECTION_DISCONNECT,
        &[0x00, 0x00, 0x00],
    ));
    queue_disconnected(&link, 0, 0x0216);
    for handle in 1..8u8 {
        link.queue(&response_frame(
            class::CONNECTION,
            cmd::CONNECTION_DISCONNECT,
            &[handle, 0x86, 0x01],
        ));
    }
    queue_gap_ok(&link, cmd::GAP_END_PROCEDURE);

    dongle.clear_state().unwrap();
    assert!(!dongle.is_connected());
    assert!(!dongle.imu_enabled());
    assert!(dongle.handles().is_none());
}
