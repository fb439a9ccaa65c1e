//! Replays a JSON log of IMU/light/pose measurements through a [`Tracker`]
//! and prints the reported poses (`clap` args, `serde_json` log
//! deserialisation, `anyhow::Result` at the boundary).

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::Parser;
use nalgebra::{Quaternion, Vector3};
use pose_tracker_core::{Pose, Reporter, Tracker, TrackerConfig, TrackerReport};
use serde::Deserialize;
use serde_json::json;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a JSON log: `{ "readings": [ {"t":.., "imu": {...}} | {"t":.., "obs": {...}} ] }`
    #[arg(long)]
    log: PathBuf,

    /// Base station id to treat as known, so light samples are admitted.
    #[arg(long, default_value = "0")]
    lighthouse: u32,
}

#[derive(Deserialize)]
struct ImuReading {
    accel: [f64; 3],
    gyro: [f64; 3],
}

#[derive(Deserialize)]
struct ObsReading {
    position: [f64; 3],
    orientation: [f64; 4],
}

#[derive(Deserialize)]
struct Reading {
    t: f64,
    imu: Option<ImuReading>,
    obs: Option<ObsReading>,
}

#[derive(Deserialize)]
struct LogFile {
    readings: Vec<Reading>,
}

fn load_log(path: &PathBuf) -> anyhow::Result<LogFile> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

struct PrintingReporter {
    reports: Vec<TrackerReport>,
}

impl Reporter for PrintingReporter {
    fn on_imu_pose(&mut self, report: &TrackerReport) {
        self.reports.push(*report);
    }
    fn on_velocity(&mut self, _report: &TrackerReport) {}
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let log = load_log(&args.log)?;

    let config = TrackerConfig::default();
    let mut tracker = Tracker::new(config, PrintingReporter { reports: Vec::new() });
    tracker.set_base_station_known(args.lighthouse, true);

    for reading in &log.readings {
        if let Some(imu) = &reading.imu {
            tracker.integrate_imu(
                reading.t,
                Vector3::new(imu.accel[0], imu.accel[1], imu.accel[2]),
                Vector3::new(imu.gyro[0], imu.gyro[1], imu.gyro[2]),
            );
        }
        if let Some(obs) = &reading.obs {
            tracker.integrate_observation(
                reading.t,
                Vector3::new(obs.position[0], obs.position[1], obs.position[2]),
                Quaternion::new(obs.orientation[0], obs.orientation[1], obs.orientation[2], obs.orientation[3]),
                None,
            );
        }
    }

    let last: Option<&Pose> = tracker.reporter().reports.last().map(|r| &r.pose);
    let out = json!({
        "log": args.log.display().to_string(),
        "readings": log.readings.len(),
        "reports": tracker.stats().reported_poses,
        "late_imu_dropped": tracker.stats().late_imu_dropped,
        "late_light_dropped": tracker.stats().late_light_dropped,
        "last_pose": last.map(|p| json!({
            "position": p.position.as_slice(),
            "orientation": [p.orientation.w, p.orientation.i, p.orientation.j, p.orientation.k],
        })),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);

    Ok(())
}
