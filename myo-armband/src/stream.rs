//! Sample assembly from raw attribute notifications.
//!
//! A connected Myo streams IMU readings on one characteristic and raw EMG
//! on four, two 8-channel samples per EMG notification. The router keyed on
//! the resolved handle table turns those notifications into typed samples:
//! every EMG sample is joined with the most recent IMU reading, stamped on
//! the fixed 200 Hz grid, and handed to the registered handlers.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::warn;

use crate::myohw;

/// EMG stream rate in Hz, fixed by the device firmware.
pub const EMG_SAMPLE_RATE_HZ: f64 = 200.0;

/// Samples between wall-clock re-anchors of the reconstructed timestamps.
pub const CLOCK_RESET_PERIOD: u32 = 200;

/// Resolved attribute handles for a connected Myo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleTable {
    pub imu: u16,
    pub imu_cccd: u16,
    pub emg: [u16; 4],
    pub emg_cccd: [u16; 4],
    pub command: u16,
    pub battery: Option<u16>,
}

/// One raw IMU notification: orientation quaternion, accelerometer,
/// gyroscope, all signed 16-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImuReading {
    /// Orientation as (w, x, y, z); divide by [`myohw::ORIENTATION_SCALE`]
    /// for unit-quaternion components.
    pub quat: [i16; 4],
    /// Divide by [`myohw::ACCELEROMETER_SCALE`] for g.
    pub accel: [i16; 3],
    /// Divide by [`myohw::GYROSCOPE_SCALE`] for deg/s.
    pub gyro: [i16; 3],
}

impl ImuReading {
    /// Parse the 20-byte notification payload (ten little-endian i16).
    pub fn parse(value: &[u8]) -> Option<Self> {
        if value.len() < 20 {
            return None;
        }
        let mut words = [0i16; 10];
        for (i, word) in words.iter_mut().enumerate() {
            *word = i16::from_le_bytes([value[2 * i], value[2 * i + 1]]);
        }
        Some(Self {
            quat: [words[0], words[1], words[2], words[3]],
            accel: [words[4], words[5], words[6]],
            gyro: [words[7], words[8], words[9]],
        })
    }

    /// Orientation in unit-quaternion components (w, x, y, z).
    pub fn orientation(&self) -> [f32; 4] {
        self.quat.map(|v| v as f32 / myohw::ORIENTATION_SCALE)
    }

    /// Acceleration in g.
    pub fn acceleration(&self) -> [f32; 3] {
        self.accel.map(|v| v as f32 / myohw::ACCELEROMETER_SCALE)
    }

    /// Angular rate in deg/s.
    pub fn angular_rate(&self) -> [f32; 3] {
        self.gyro.map(|v| v as f32 / myohw::GYROSCOPE_SCALE)
    }
}

/// One 8-channel EMG sample joined with the IMU reading current at the time
/// it arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JointSample {
    /// Reconstructed timestamp, seconds since the Unix epoch on the 200 Hz
    /// grid.
    pub timestamp: f64,
    /// Monotonic per-device sample index.
    pub sequence_index: u64,
    pub emg: [i8; 8],
    pub imu: ImuReading,
}

pub type ImuHandler = Box<dyn FnMut(&ImuReading)>;
pub type EmgHandler = Box<dyn FnMut(&[i8; 8])>;
pub type JointHandler = Box<dyn FnMut(&JointSample)>;

/// Reconstructs per-sample timestamps on the 200 Hz grid.
///
/// Notifications arrive in bursts at the mercy of host scheduling, so each
/// sample is placed `1/200 s` after the previous one, and the base is
/// re-anchored to the wall clock every [`CLOCK_RESET_PERIOD`] samples. That
/// keeps the grid uniform inside a window while bounding drift.
#[derive(Debug)]
pub struct SampleClock {
    rate_hz: f64,
    reset_period: u32,
    cur_sample: u32,
    base_time: f64,
}

impl Default for SampleClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleClock {
    pub fn new() -> Self {
        Self {
            rate_hz: EMG_SAMPLE_RATE_HZ,
            reset_period: CLOCK_RESET_PERIOD,
            cur_sample: 0,
            base_time: 0.0,
        }
    }

    /// Timestamp for the next sample, given the current wall clock.
    pub fn stamp(&mut self, now: f64) -> f64 {
        if self.cur_sample % self.reset_period == 0 {
            self.base_time = now;
            self.cur_sample = 0;
        }
        let timestamp = self.base_time + self.cur_sample as f64 / self.rate_hz;
        self.cur_sample += 1;
        timestamp
    }

    /// Restart from a fresh anchor, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.cur_sample = 0;
        self.base_time = 0.0;
    }
}

fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Routes attribute notifications by handle and assembles samples.
#[derive(Default)]
pub struct SampleRouter {
    handles: Option<HandleTable>,
    current_imu: Option<ImuReading>,
    battery_level: Option<u8>,
    clock: SampleClock,
    sequence_index: u64,
    imu_handlers: Vec<ImuHandler>,
    emg_handlers: Vec<EmgHandler>,
    joint_handlers: Vec<JointHandler>,
}

impl SampleRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_handles(&mut self, handles: HandleTable) {
        self.handles = Some(handles);
    }

    pub fn handles(&self) -> Option<&HandleTable> {
        self.handles.as_ref()
    }

    pub fn battery_level(&self) -> Option<u8> {
        self.battery_level
    }

    pub fn current_imu(&self) -> Option<&ImuReading> {
        self.current_imu.as_ref()
    }

    /// Drop per-connection state. Registered handlers survive.
    pub fn clear(&mut self) {
        self.handles = None;
        self.current_imu = None;
        self.battery_level = None;
        self.clock.reset();
        self.sequence_index = 0;
    }

    pub fn add_imu_handler(&mut self, handler: impl FnMut(&ImuReading) + 'static) {
        self.imu_handlers.push(Box::new(handler));
    }

    pub fn add_emg_handler(&mut self, handler: impl FnMut(&[i8; 8]) + 'static) {
        self.emg_handlers.push(Box::new(handler));
    }

    pub fn add_joint_handler(&mut self, handler: impl FnMut(&JointSample) + 'static) {
        self.joint_handlers.push(Box::new(handler));
    }

    /// Route one attribute notification.
    pub fn route(&mut self, handle: u16, value: &[u8]) {
        self.route_at(handle, value, wall_clock());
    }

    /// Route with an explicit wall-clock reading (testable variant).
    pub fn route_at(&mut self, handle: u16, value: &[u8], now: f64) {
        let Some(handles) = self.handles else {
            return;
        };

        if handle == handles.imu {
            match ImuReading::parse(value) {
                Some(reading) => {
                    self.current_imu = Some(reading);
                    for handler in &mut self.imu_handlers {
                        handler(&reading);
                    }
                }
                None => warn!("truncated IMU notification ({} bytes)", value.len()),
            }
        } else if handles.emg.contains(&handle) {
            if value.len() < 16 {
                warn!("truncated EMG notification ({} bytes)", value.len());
                return;
            }
            // Each notification carries two consecutive 8-channel samples.
            for half in value[..16].chunks_exact(8) {
                let mut emg = [0i8; 8];
                for (dst, &src) in emg.iter_mut().zip(half) {
                    *dst = src as i8;
                }
                for handler in &mut self.emg_handlers {
                    handler(&emg);
                }
                if let Some(imu) = self.current_imu {
                    let sample = JointSample {
                        timestamp: self.clock.stamp(now),
                        sequence_index: self.sequence_index,
                        emg,
                        imu,
                    };
                    self.sequence_index += 1;
                    for handler in &mut self.joint_handlers {
                        handler(&sample);
                    }
                }
            }
        } else if handles.battery == Some(handle) {
            if let Some(&level) = value.first() {
                self.battery_level = Some(level);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn test_handles() -> HandleTable {
        HandleTable {
            imu: 0x0024,
            imu_cccd: 0x0025,
            emg: [0x002B, 0x002E, 0x0031, 0x0034],
            emg_cccd: [0x002C, 0x002F, 0x0032, 0x0035],
            command: 0x0019,
            battery: Some(0x0041),
        }
    }

    fn imu_payload() -> Vec<u8> {
        let mut payload = Vec::new();
        for v in 1i16..=10 {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload
    }

    #[test]
    fn imu_notification_updates_current_reading() {
        let mut router = SampleRouter::new();
        router.set_handles(test_handles());

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        router.add_imu_handler(move |imu| sink.borrow_mut().push(*imu));

        router.route_at(0x0024, &imu_payload(), 100.0);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].quat, [1, 2, 3, 4]);
        assert_eq!(seen[0].accel, [5, 6, 7]);
        assert_eq!(seen[0].gyro, [8, 9, 10]);
        assert_eq!(router.current_imu(), Some(&seen[0]));
    }

    #[test]
    fn physical_unit_scaling() {
        let reading = ImuReading::parse(&imu_payload()).unwrap();
        assert_eq!(reading.orientation()[0], 1.0 / 16384.0);
        assert_eq!(reading.orientation()[3], 4.0 / 16384.0);
        assert_eq!(reading.acceleration()[0], 5.0 / 2048.0);
        assert_eq!(reading.angular_rate()[2], 10.0 / 16.0);
    }

    #[test]
    fn emg_notification_produces_two_joint_samples() {
        let mut router = SampleRouter::new();
        router.set_handles(test_handles());
        router.route_at(0x0024, &imu_payload(), 100.0);

        let joints = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&joints);
        router.add_joint_handler(move |s| sink.borrow_mut().push(s.clone()));

        let emg: Vec<u8> = vec![
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ];
        router.route_at(0x002B, &emg, 100.0);

        let joints = joints.borrow();
        assert_eq!(joints.len(), 2);
        assert_eq!(
            joints[0].emg,
            [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]
        );
        assert_eq!(
            joints[1].emg,
            [
                0x88u8 as i8,
                0x99u8 as i8,
                0xAAu8 as i8,
                0xBBu8 as i8,
                0xCCu8 as i8,
                0xDDu8 as i8,
                0xEEu8 as i8,
                0xFFu8 as i8
            ]
        );
        assert_eq!(joints[0].imu, joints[1].imu);
        assert_eq!(joints[0].sequence_index, 0);
        assert_eq!(joints[1].sequence_index, 1);
    }

    #[test]
    fn emg_without_imu_fires_no_joint_samples() {
        let mut router = SampleRouter::new();
        router.set_handles(test_handles());

        let emg_count = Rc::new(RefCell::new(0usize));
        let joint_count = Rc::new(RefCell::new(0usize));
        let e = Rc::clone(&emg_count);
        let j = Rc::clone(&joint_count);
        router.add_emg_handler(move |_| *e.borrow_mut() += 1);
        router.add_joint_handler(move |_| *j.borrow_mut() += 1);

        router.route_at(0x002B, &[0u8; 16], 100.0);
        assert_eq!(*emg_count.borrow(), 2);
        assert_eq!(*joint_count.borrow(), 0);
    }

    #[test]
    fn battery_value_is_captured() {
        let mut router = SampleRouter::new();
        router.set_handles(test_handles());
        assert_eq!(router.battery_level(), None);
        router.route_at(0x0041, &[87], 100.0);
        assert_eq!(router.battery_level(), Some(87));
    }

    #[test]
    fn clock_keeps_uniform_grid_within_window() {
        let mut clock = SampleClock::new();
        let mut previous = clock.stamp(1000.0);
        assert_eq!(previous, 1000.0);
        for _ in 1..CLOCK_RESET_PERIOD {
            // Wall clock drifts ahead; the grid must not care inside a window.
            let t = clock.stamp(1003.7);
            assert!((t - previous - 1.0 / EMG_SAMPLE_RATE_HZ).abs() < 1e-9);
            previous = t;
        }
        // Window boundary: re-anchored to the provided wall clock.
        assert_eq!(clock.stamp(1010.0), 1010.0);
    }
}
