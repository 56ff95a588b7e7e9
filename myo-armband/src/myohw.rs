//! Myo hardware constants.
//!
//! Values follow the published Myo Bluetooth protocol header
//! (thalmiclabs/myo-bluetooth, `myohw.h`). UUIDs are kept in the
//! little-endian byte order the BLED112 delivers them in.

/// The 128-bit Myo service base UUID, wire byte order. Bytes 12 and 13 hold
/// the per-characteristic short code.
pub const MYO_SERVICE_BASE_UUID: [u8; 16] = [
    0x42, 0x48, 0x12, 0x4A, 0x7F, 0x2C, 0x48, 0x47, 0xB9, 0xDE, 0x04, 0xA9, 0x00, 0x00, 0x06,
    0xD5,
];

/// Short codes for the Myo services and characteristics the streaming path
/// uses, written most-significant byte first as in `myohw.h`.
pub mod short_uuid {
    /// Myo info service, also the trailer of Myo advertising packets.
    pub const CONTROL_SERVICE: [u8; 2] = [0x00, 0x01];
    /// Write-only characteristic for device commands.
    pub const COMMAND: [u8; 2] = [0x04, 0x01];
    /// Notify-only IMU data characteristic.
    pub const IMU_DATA: [u8; 2] = [0x04, 0x02];
    /// Notify-only raw EMG data characteristics.
    pub const EMG_DATA_0: [u8; 2] = [0x01, 0x05];
    pub const EMG_DATA_1: [u8; 2] = [0x02, 0x05];
    pub const EMG_DATA_2: [u8; 2] = [0x03, 0x05];
    pub const EMG_DATA_3: [u8; 2] = [0x04, 0x05];
}

/// Standard GATT battery-level characteristic (0x2A19), wire byte order.
pub const BATTERY_LEVEL_UUID: [u8; 2] = [0x19, 0x2A];

/// Standard GATT client characteristic configuration descriptor (0x2902),
/// wire byte order.
pub const CCCD_UUID: [u8; 2] = [0x02, 0x29];

/// Build the full 128-bit UUID for a short code.
pub fn full_uuid(short: [u8; 2]) -> [u8; 16] {
    let mut uuid = MYO_SERVICE_BASE_UUID;
    uuid[12] = short[1];
    uuid[13] = short[0];
    uuid
}

/// CCCD value enabling notifications.
pub const ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];
/// CCCD value disabling notifications.
pub const DISABLE_NOTIFICATIONS: [u8; 2] = [0x00, 0x00];

/// Command opcodes written to the command characteristic.
pub mod command {
    pub const SET_MODE: u8 = 0x01;
    pub const VIBRATE: u8 = 0x03;
    pub const DEEP_SLEEP: u8 = 0x04;
    pub const VIBRATE2: u8 = 0x07;
    pub const SET_SLEEP_MODE: u8 = 0x09;
    pub const UNLOCK: u8 = 0x0A;
    pub const USER_ACTION: u8 = 0x0B;
}

/// EMG streaming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EmgMode {
    None = 0x00,
    /// Filtered EMG data.
    Filtered = 0x02,
    /// Raw, unfiltered EMG data.
    Raw = 0x03,
}

/// IMU streaming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImuMode {
    None = 0x00,
    /// Orientation, accelerometer and gyroscope streams.
    Data = 0x01,
    /// Motion events only (taps).
    Events = 0x02,
    /// Both data streams and motion events.
    All = 0x03,
    /// Raw IMU streams.
    Raw = 0x04,
}

/// On-board gesture classifier mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClassifierMode {
    Disabled = 0x00,
    Enabled = 0x01,
}

/// Device sleep behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SleepMode {
    /// Sleep after a period of inactivity.
    Normal = 0,
    NeverSleep = 1,
}

/// Vibration durations for the vibrate command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VibrationType {
    None = 0,
    Short = 1,
    Medium = 2,
    Long = 3,
}

/// `set_mode` command payload: configures EMG, IMU and classifier together.
pub fn set_mode(emg: EmgMode, imu: ImuMode, classifier: ClassifierMode) -> [u8; 5] {
    [command::SET_MODE, 3, emg as u8, imu as u8, classifier as u8]
}

/// `set_sleep_mode` command payload.
pub fn set_sleep_mode(mode: SleepMode) -> [u8; 3] {
    [command::SET_SLEEP_MODE, 1, mode as u8]
}

/// `vibrate` command payload.
pub fn vibrate(kind: VibrationType) -> [u8; 3] {
    [command::VIBRATE, 1, kind as u8]
}

/// `deep_sleep` command payload. The device drops the connection and enters
/// deep sleep as soon as it processes this.
pub fn deep_sleep() -> [u8; 2] {
    [command::DEEP_SLEEP, 0]
}

/// Scale divisor turning raw orientation values into unit-quaternion
/// components.
pub const ORIENTATION_SCALE: f32 = 16384.0;
/// Scale divisor turning raw accelerometer values into g.
pub const ACCELEROMETER_SCALE: f32 = 2048.0;
/// Scale divisor turning raw gyroscope values into deg/s.
pub const GYROSCOPE_SCALE: f32 = 16.0;
