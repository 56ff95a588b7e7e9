//! High-level Myo armband interface on top of the BLED112 BGAPI engine.
//!
//! [`MyoDongle`] drives one dongle and at most one armband through the full
//! lifecycle: scan for advertising Myos, connect, walk services and
//! attributes to resolve the streaming handles, switch on IMU/EMG
//! notifications, pump data, and tear everything down again. Decoded
//! samples are delivered synchronously to registered handlers while a pump
//! call is running; handlers must not block.

pub mod error;
pub mod myohw;
pub mod pairing;
pub mod stream;

pub use error::MyoError;
pub use pairing::{align_streams, pair_samples, COPY_THRESHOLD};
pub use stream::{HandleTable, ImuReading, JointSample, SampleClock, SampleRouter};

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, warn};

use bled112_transport::protocol::PRIMARY_SERVICE_UUID;
use bled112_transport::{
    BgError, BgEvent, BgapiEngine, Connection, GapConnectableMode, GapDiscoverMode,
    GapDiscoverableMode, Link, ScanResult, SerialConfig,
};

use crate::myohw::{ClassifierMode, EmgMode, ImuMode, SleepMode, VibrationType};

/// Deadline for command responses and remote write acknowledgments.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline for each step of the service/attribute discovery walk.
const SERVICE_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection interval in 1.25 ms units: 6 → 7.5 ms, the fastest the
/// standard allows and what the 200 Hz EMG stream needs.
const CONN_INTERVAL: u16 = 6;

/// Supervision timeout in 10 ms units: 640 ms.
const SUPERVISION_TIMEOUT: u16 = 64;

const SLAVE_LATENCY: u16 = 0;

/// The dongle models connection handles 0..7.
const MAX_CONNECTIONS: u8 = 8;

/// Whether an advertisement payload is a Myo control-service advertisement.
pub fn is_myo_advertisement(data: &[u8]) -> bool {
    data.ends_with(&myohw::full_uuid(myohw::short_uuid::CONTROL_SERVICE))
}

/// One BLED112 dongle and the Myo connected through it.
pub struct MyoDongle {
    engine: BgapiEngine,
    router: Rc<RefCell<SampleRouter>>,
    imu_enabled: bool,
    emg_enabled: bool,
    sleep_disabled: bool,
}

impl MyoDongle {
    /// Open the dongle on a serial character device (e.g. `/dev/ttyACM0`).
    pub fn open(path: &str) -> Result<Self, MyoError> {
        Self::open_with_config(path, &SerialConfig::default())
    }

    /// Open with an explicit serial configuration.
    pub fn open_with_config(path: &str, config: &SerialConfig) -> Result<Self, MyoError> {
        Ok(Self::from_engine(BgapiEngine::open(path, config)?))
    }

    /// Build a controller over an arbitrary byte link; used by tests and
    /// traffic replay.
    pub fn with_link(link: Box<dyn Link>, packet_mode: bool) -> Self {
        Self::from_engine(BgapiEngine::new(link, packet_mode))
    }

    fn from_engine(mut engine: BgapiEngine) -> Self {
        let router = Rc::new(RefCell::new(SampleRouter::new()));
        let sink = Rc::clone(&router);
        engine.set_notification_sink(move |handle, value| sink.borrow_mut().route(handle, value));
        engine.set_advert_filter(|scan| is_myo_advertisement(&scan.data));
        Self {
            engine,
            router,
            imu_enabled: false,
            emg_enabled: false,
            sleep_disabled: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.engine.connection().is_some()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.engine.connection()
    }

    /// The resolved handle table, once service discovery has run.
    pub fn handles(&self) -> Option<HandleTable> {
        self.router.borrow().handles().copied()
    }

    pub fn imu_enabled(&self) -> bool {
        self.imu_enabled
    }

    pub fn emg_enabled(&self) -> bool {
        self.emg_enabled
    }

    pub fn sleep_disabled(&self) -> bool {
        self.sleep_disabled
    }

    /// Last battery level captured by a read, if any.
    pub fn battery_level(&self) -> Option<u8> {
        self.router.borrow().battery_level()
    }

    /// Register a handler for raw IMU readings.
    pub fn add_imu_handler(&mut self, handler: impl FnMut(&ImuReading) + 'static) {
        self.router.borrow_mut().add_imu_handler(handler);
    }

    /// Register a handler for each 8-channel EMG sample.
    pub fn add_emg_handler(&mut self, handler: impl FnMut(&[i8; 8]) + 'static) {
        self.router.borrow_mut().add_emg_handler(handler);
    }

    /// Register a handler for joint EMG+IMU samples.
    pub fn add_joint_emg_imu_handler(&mut self, handler: impl FnMut(&JointSample) + 'static) {
        self.router.borrow_mut().add_joint_handler(handler);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Return the dongle and the device to a quiet state: notifications
    /// off, streaming mode off, sleep restored, nothing discoverable, all
    /// connection handles torn down, no procedure running. Safe to call at
    /// any point, including twice in a row.
    pub fn clear_state(&mut self) -> Result<(), MyoError> {
        let handles = if self.engine.connection().is_some() {
            self.router.borrow().handles().copied()
        } else {
            None
        };

        if let Some(handles) = handles {
            if self.imu_enabled {
                self.write_acknowledged(handles.imu_cccd, &myohw::DISABLE_NOTIFICATIONS)?;
            }
            if self.emg_enabled {
                for cccd in handles.emg_cccd {
                    self.write_acknowledged(cccd, &myohw::DISABLE_NOTIFICATIONS)?;
                }
            }
            if self.imu_enabled || self.emg_enabled {
                self.write_acknowledged(
                    handles.command,
                    &myohw::set_mode(EmgMode::None, ImuMode::None, ClassifierMode::Disabled),
                )?;
            }
            if self.sleep_disabled {
                self.write_acknowledged(handles.command, &myohw::set_sleep_mode(SleepMode::Normal))?;
            }
        }

        self.engine.send_gap_set_mode(
            GapDiscoverableMode::NonDiscoverable,
            GapConnectableMode::NonConnectable,
        )?;

        for handle in 0..MAX_CONNECTIONS {
            if self.engine.send_connection_disconnect(handle)? {
                let dropped = self
                    .engine
                    .read_until(BgEvent::EvtConnectionDisconnected, COMMAND_TIMEOUT)?;
                if !dropped {
                    return Err(BgError::Timeout(BgEvent::EvtConnectionDisconnected).into());
                }
            }
        }

        self.engine.send_gap_end_procedure()?;

        self.imu_enabled = false;
        self.emg_enabled = false;
        self.sleep_disabled = false;
        self.router.borrow_mut().clear();
        Ok(())
    }

    /// Scan for advertising Myo devices for `duration`. The result list is
    /// deduplicated by address and address type.
    pub fn discover_myo_devices(&mut self, duration: Duration) -> Result<Vec<ScanResult>, MyoError> {
        self.engine.clear_scan_results();
        self.engine.send_gap_discover(GapDiscoverMode::Observation)?;
        self.engine.pump(duration)?;
        self.engine.send_gap_end_procedure()?;
        let found = self.engine.scan_results().to_vec();
        info!("discovered {} Myo device(s)", found.len());
        Ok(found)
    }

    /// Connect to a discovered device. Returns false when no connection
    /// status arrived within the deadline.
    pub fn connect(&mut self, device: &ScanResult) -> Result<bool, MyoError> {
        if self.engine.connection().is_some() {
            return Err(MyoError::AlreadyConnected);
        }
        self.router.borrow_mut().clear();
        self.engine.send_gap_connect_direct(
            device.address,
            device.address_type,
            CONN_INTERVAL,
            CONN_INTERVAL,
            SUPERVISION_TIMEOUT,
            SLAVE_LATENCY,
        )?;
        let connected = self
            .engine
            .read_until(BgEvent::EvtConnectionStatus, COMMAND_TIMEOUT)?;
        if !connected {
            warn!("no connection status from {} within deadline", device.address);
        }
        Ok(connected)
    }

    /// Walk primary services and their attributes, then resolve the Myo
    /// streaming handles. Battery is optional; everything else is required.
    pub fn discover_primary_services(&mut self) -> Result<HandleTable, MyoError> {
        let conn = self.connection_handle()?;
        self.engine
            .send_attclient_read_by_group_type(conn, 0x0001, 0xFFFF, &PRIMARY_SERVICE_UUID)?;
        self.await_procedure(SERVICE_DISCOVERY_TIMEOUT)?;

        let ranges: Vec<(u16, u16)> = self
            .engine
            .services()
            .iter()
            .map(|s| (s.start, s.end))
            .collect();
        for (start, end) in ranges {
            self.engine.send_attclient_find_information(conn, start, end)?;
            self.await_procedure(SERVICE_DISCOVERY_TIMEOUT)?;
        }

        let handles = self.resolve_handles()?;
        debug!("resolved handles: {handles:?}");
        self.router.borrow_mut().set_handles(handles);
        Ok(handles)
    }

    /// Switch on IMU notifications and streaming. Idempotent.
    pub fn enable_imu_readings(&mut self) -> Result<(), MyoError> {
        if self.imu_enabled {
            return Ok(());
        }
        let handles = self.ensure_handles()?;
        self.write_acknowledged(handles.imu_cccd, &myohw::ENABLE_NOTIFICATIONS)?;
        self.apply_streaming_mode(&handles, self.emg_enabled, true)?;
        self.imu_enabled = true;
        info!("IMU streaming enabled");
        Ok(())
    }

    /// Switch on EMG notifications (all four characteristics) and
    /// streaming. Idempotent.
    pub fn enable_emg_readings(&mut self) -> Result<(), MyoError> {
        if self.emg_enabled {
            return Ok(());
        }
        let handles = self.ensure_handles()?;
        for cccd in handles.emg_cccd {
            self.write_acknowledged(cccd, &myohw::ENABLE_NOTIFICATIONS)?;
        }
        self.apply_streaming_mode(&handles, true, self.imu_enabled)?;
        self.emg_enabled = true;
        info!("EMG streaming enabled");
        Ok(())
    }

    /// Allow or forbid the device to sleep on inactivity. `clear_state`
    /// restores normal sleep if it was forbidden here.
    pub fn set_sleep_mode(&mut self, device_can_sleep: bool) -> Result<(), MyoError> {
        let handles = self.ensure_handles()?;
        let mode = if device_can_sleep {
            SleepMode::Normal
        } else {
            SleepMode::NeverSleep
        };
        self.write_acknowledged(handles.command, &myohw::set_sleep_mode(mode))?;
        self.sleep_disabled = !device_can_sleep;
        Ok(())
    }

    /// Issue a vibration.
    pub fn vibrate(&mut self, kind: VibrationType) -> Result<(), MyoError> {
        let handles = self.ensure_handles()?;
        self.write_acknowledged(handles.command, &myohw::vibrate(kind))
    }

    /// Put the device into deep sleep. It drops the link immediately, so no
    /// remote acknowledgment is awaited.
    pub fn deep_sleep(&mut self) -> Result<(), MyoError> {
        let handles = self.ensure_handles()?;
        let conn = self.connection_handle()?;
        self.engine
            .send_attclient_attribute_write(conn, handles.command, &myohw::deep_sleep())?;
        Ok(())
    }

    /// Read the battery percentage. `Ok(None)` when the device exposes no
    /// battery characteristic.
    pub fn read_battery_level(&mut self) -> Result<Option<u8>, MyoError> {
        let handles = self.ensure_handles()?;
        let Some(battery) = handles.battery else {
            debug!("device exposes no battery characteristic");
            return Ok(None);
        };
        let conn = self.connection_handle()?;
        self.engine.send_attclient_read_by_handle(conn, battery)?;
        if !self
            .engine
            .read_until(BgEvent::EvtAttclientAttributeValue, COMMAND_TIMEOUT)?
        {
            return Err(BgError::Timeout(BgEvent::EvtAttclientAttributeValue).into());
        }
        Ok(self.router.borrow().battery_level())
    }

    /// Pump notifications for `duration`; samples reach the registered
    /// handlers from inside this call.
    pub fn scan_for_data_packets(&mut self, duration: Duration) -> Result<(), MyoError> {
        self.engine.pump(duration)?;
        Ok(())
    }

    /// Like [`scan_for_data_packets`](Self::scan_for_data_packets) but
    /// returns early with `true` if the device disconnects during the pump.
    pub fn scan_for_data_packets_conditional(
        &mut self,
        duration: Duration,
    ) -> Result<bool, MyoError> {
        Ok(self
            .engine
            .read_until(BgEvent::EvtConnectionDisconnected, duration)?)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn connection_handle(&self) -> Result<u8, MyoError> {
        self.engine
            .connection()
            .map(|c| c.handle)
            .ok_or(MyoError::NotConnected)
    }

    fn ensure_handles(&mut self) -> Result<HandleTable, MyoError> {
        self.connection_handle()?;
        if let Some(handles) = self.router.borrow().handles().copied() {
            return Ok(handles);
        }
        self.discover_primary_services()
    }

    fn await_procedure(&mut self, timeout: Duration) -> Result<(), MyoError> {
        if !self
            .engine
            .read_until(BgEvent::EvtAttclientProcedureCompleted, timeout)?
        {
            return Err(BgError::Timeout(BgEvent::EvtAttclientProcedureCompleted).into());
        }
        Ok(())
    }

    fn write_acknowledged(&mut self, handle: u16, data: &[u8]) -> Result<(), MyoError> {
        let conn = self.connection_handle()?;
        self.engine
            .send_attclient_attribute_write(conn, handle, data)?;
        self.await_procedure(COMMAND_TIMEOUT)
    }

    fn apply_streaming_mode(
        &mut self,
        handles: &HandleTable,
        emg_on: bool,
        imu_on: bool,
    ) -> Result<(), MyoError> {
        let emg = if emg_on { EmgMode::Raw } else { EmgMode::None };
        let imu = if imu_on { ImuMode::Data } else { ImuMode::None };
        self.write_acknowledged(
            handles.command,
            &myohw::set_mode(emg, imu, ClassifierMode::Disabled),
        )
    }

    fn resolve_handles(&self) -> Result<HandleTable, MyoError> {
        let attributes = self.engine.attributes();
        let find = |uuid: &[u8]| {
            attributes
                .iter()
                .find(|a| a.uuid == uuid)
                .map(|a| a.handle)
        };
        let exists = |handle: u16| attributes.iter().any(|a| a.handle == handle);

        let imu = find(&myohw::full_uuid(myohw::short_uuid::IMU_DATA))
            .ok_or(MyoError::MissingCharacteristic("imu data"))?;
        let command = find(&myohw::full_uuid(myohw::short_uuid::COMMAND))
            .ok_or(MyoError::MissingCharacteristic("command"))?;

        let emg_shorts = [
            myohw::short_uuid::EMG_DATA_0,
            myohw::short_uuid::EMG_DATA_1,
            myohw::short_uuid::EMG_DATA_2,
            myohw::short_uuid::EMG_DATA_3,
        ];
        let mut emg = [0u16; 4];
        for (slot, short) in emg.iter_mut().zip(emg_shorts) {
            *slot = find(&myohw::full_uuid(short))
                .ok_or(MyoError::MissingCharacteristic("emg data"))?;
        }

        // Each notify characteristic carries its configuration descriptor on
        // the next handle.
        let imu_cccd = imu + 1;
        if !exists(imu_cccd) {
            return Err(MyoError::MissingCharacteristic("imu configuration descriptor"));
        }
        let mut emg_cccd = [0u16; 4];
        for (slot, &characteristic) in emg_cccd.iter_mut().zip(&emg) {
            if !exists(characteristic + 1) {
                return Err(MyoError::MissingCharacteristic(
                    "emg configuration descriptor",
                ));
            }
            *slot = characteristic + 1;
        }

        let battery = find(&myohw::BATTERY_LEVEL_UUID);

        Ok(HandleTable {
            imu,
            imu_cccd,
            emg,
            emg_cccd,
            command,
            battery,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn myo_advertisement_matches_on_trailer() {
        let uuid = myohw::full_uuid(myohw::short_uuid::CONTROL_SERVICE);
        let mut data = vec![0x02, 0x01, 0x06];
        data.extend_from_slice(&uuid);
        assert!(is_myo_advertisement(&data));

        let mut near_miss = data.clone();
        *near_miss.last_mut().unwrap() ^= 0x01;
        assert!(!is_myo_advertisement(&near_miss));

        assert!(!is_myo_advertisement(&[]));
    }
}
