mod cli;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bled112_transport::ScanResult;
use myo_armband::myohw::VibrationType;
use myo_armband::{JointSample, MyoDongle};

use cli::{Cli, Commands, VibrateKind};

/// How long each pump iteration of the streaming loop blocks for.
const SCAN_PERIOD: Duration = Duration::from_millis(200);

/// Scan duration used when a command needs to locate an armband itself.
const LOOKUP_SCAN: Duration = Duration::from_secs(3);

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Discover { duration, json } => discover(&cli.port, duration, json),
        Commands::Stream {
            address,
            duration,
            json,
        } => stream(&cli.port, address.as_deref(), duration, json),
        Commands::Battery { address } => battery(&cli.port, address.as_deref()),
        Commands::Vibrate { kind, address } => vibrate(&cli.port, kind, address.as_deref()),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Open the dongle and bring it to a known-quiet state.
fn open_clean(port: &str) -> Result<MyoDongle> {
    let mut dongle =
        MyoDongle::open(port).with_context(|| format!("failed to open dongle at {port}"))?;
    dongle.clear_state()?;
    Ok(dongle)
}

/// Find the armband to talk to: the given address, or the first one heard.
fn find_device(dongle: &mut MyoDongle, address: Option<&str>) -> Result<ScanResult> {
    let found = dongle.discover_myo_devices(LOOKUP_SCAN)?;
    if found.is_empty() {
        bail!("no Myo devices found");
    }
    match address {
        None => Ok(found[0].clone()),
        Some(wanted) => found
            .iter()
            .find(|d| d.address.to_string().eq_ignore_ascii_case(wanted))
            .cloned()
            .with_context(|| format!("no Myo with address {wanted} heard during the scan")),
    }
}

fn connect_to(dongle: &mut MyoDongle, address: Option<&str>) -> Result<ScanResult> {
    let device = find_device(dongle, address)?;
    if !dongle.connect(&device)? {
        bail!("connection to {} failed", device.address);
    }
    Ok(device)
}

fn discover(port: &str, duration: f64, json: bool) -> Result<()> {
    let mut dongle = open_clean(port)?;
    let found = dongle.discover_myo_devices(Duration::from_secs_f64(duration))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else if found.is_empty() {
        println!("No Myo devices found.");
    } else {
        for device in &found {
            println!(
                "{}  {:?} address, rssi {} dBm",
                device.address, device.address_type, device.rssi
            );
        }
    }

    dongle.clear_state()?;
    Ok(())
}

fn stream(port: &str, address: Option<&str>, duration: Option<f64>, json: bool) -> Result<()> {
    let mut dongle = open_clean(port)?;
    let device = connect_to(&mut dongle, address)?;

    if let Some(level) = dongle.read_battery_level()? {
        info!("{}: battery {level}%", device.address);
    }
    dongle.set_sleep_mode(false)?;
    dongle.enable_imu_readings()?;
    dongle.enable_emg_readings()?;

    dongle.add_joint_emg_imu_handler(move |sample| print_sample(sample, json));

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs_f64(secs));
    while running.load(Ordering::SeqCst) && deadline.map_or(true, |d| Instant::now() < d) {
        if dongle.scan_for_data_packets_conditional(SCAN_PERIOD)? {
            dongle.clear_state()?;
            bail!("device disconnected unexpectedly");
        }
    }

    dongle.clear_state()?;
    Ok(())
}

fn print_sample(sample: &JointSample, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(sample) {
            println!("{line}");
        }
        return;
    }
    let quat = sample.imu.orientation();
    let accel = sample.imu.acceleration();
    let gyro = sample.imu.angular_rate();
    println!(
        "{:.4}  #{:<7}  emg {:?}  quat [{:+.3} {:+.3} {:+.3} {:+.3}]  acc [{:+.2} {:+.2} {:+.2}] g  gyro [{:+.1} {:+.1} {:+.1}] dps",
        sample.timestamp,
        sample.sequence_index,
        sample.emg,
        quat[0],
        quat[1],
        quat[2],
        quat[3],
        accel[0],
        accel[1],
        accel[2],
        gyro[0],
        gyro[1],
        gyro[2],
    );
}

fn battery(port: &str, address: Option<&str>) -> Result<()> {
    let mut dongle = open_clean(port)?;
    let device = connect_to(&mut dongle, address)?;

    match dongle.read_battery_level()? {
        Some(level) => println!("{}: battery {level}%", device.address),
        None => println!("{}: no battery characteristic", device.address),
    }

    dongle.clear_state()?;
    Ok(())
}

fn vibrate(port: &str, kind: VibrateKind, address: Option<&str>) -> Result<()> {
    let mut dongle = open_clean(port)?;
    let device = connect_to(&mut dongle, address)?;

    let kind = match kind {
        VibrateKind::Short => VibrationType::Short,
        VibrateKind::Medium => VibrationType::Medium,
        VibrateKind::Long => VibrationType::Long,
    };
    dongle.vibrate(kind)?;
    info!("vibrated {}", device.address);

    dongle.clear_state()?;
    Ok(())
}
