use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::config::AppConfig;
use crate::fanout::{parse_destinations, Destination};
use crate::template::{validate_timestamp_format, FilenameTemplate};

pub const RUN_NUMBER: &str = "run_number";
pub const DEVICE_PATH: &str = "device_path";
pub const UDP_DESTINATIONS: &str = "udp_destinations";
pub const DATA_DIRECTORY: &str = "data_directory";
pub const ROTATION_MINUTES: &str = "rotation_minutes";
pub const FILENAME_TEMPLATE: &str = "filename_template";
pub const TIMESTAMP_FORMAT: &str = "timestamp_format";
pub const MIN_UDP_PAYLOAD: &str = "min_udp_payload";

const DEFAULT_RUN_NUMBER: &str = "00000";
const DEFAULT_DEVICE_PATH: &str =
    "/dev/serial/by-id/usb-Cypress_Semiconductor_USBUART_0300021216132494-if00";
const DEFAULT_UDP_DESTINATIONS: &str = "127.0.0.1:2102";
const DEFAULT_DATA_DIRECTORY: &str = "./data";
const DEFAULT_ROTATION_MINUTES: &str = "60";
const DEFAULT_FILENAME_TEMPLATE: &str = "{dir}/AL{run}_{timestamp}.dat";
const DEFAULT_TIMESTAMP_FORMAT: &str = "%y%m%d-%H%M%S";
const DEFAULT_MIN_UDP_PAYLOAD: &str = "340";

/// Key-value store kept as one single-line text file per parameter.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    dir: PathBuf,
}

impl ParameterStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Returns the first line of the parameter file, creating the file with
    /// `default` when it does not exist yet.
    pub fn read_or_init(&self, name: &str, default: &str) -> Result<String> {
        let path = self.path_of(name);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(raw.lines().next().unwrap_or_default().trim().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(parameter = name, default, "parameter absent, writing default");
                self.write(name, default)?;
                Ok(default.to_string())
            }
            Err(err) => Err(err)
                .with_context(|| format!("failed to read parameter {}", path.display())),
        }
    }

    pub fn write(&self, name: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("failed to create parameter directory {}", self.dir.display())
        })?;
        let path = self.path_of(name);
        fs::write(&path, format!("{value}\n"))
            .with_context(|| format!("failed to write parameter {}", path.display()))
    }

    pub fn store_run_number(&self, run_number: u32) -> Result<()> {
        self.write(RUN_NUMBER, &format!("{run_number:05}"))
    }
}

/// Typed acquisition parameters loaded from the store at startup.
#[derive(Debug, Clone)]
pub struct AcquisitionParams {
    pub run_number: u32,
    pub device_path: String,
    pub destinations: Vec<Destination>,
    pub data_directory: String,
    pub rotation_interval: Duration,
    pub filename_template: FilenameTemplate,
    pub timestamp_format: String,
    pub min_udp_payload: usize,
}

impl AcquisitionParams {
    pub fn load(store: &ParameterStore, config: &AppConfig) -> Result<Self> {
        let run_number = parse_number::<u32>(store, RUN_NUMBER, DEFAULT_RUN_NUMBER)?;
        let device_path = store.read_or_init(DEVICE_PATH, DEFAULT_DEVICE_PATH)?;
        let raw_destinations = store.read_or_init(UDP_DESTINATIONS, DEFAULT_UDP_DESTINATIONS)?;
        let destinations = parse_destinations(
            &raw_destinations,
            &config.broadcast_pattern,
            config.max_destinations,
        )
        .with_context(|| format!("invalid parameter {UDP_DESTINATIONS}"))?;
        let data_directory = store.read_or_init(DATA_DIRECTORY, DEFAULT_DATA_DIRECTORY)?;
        let rotation_minutes = parse_number::<u64>(store, ROTATION_MINUTES, DEFAULT_ROTATION_MINUTES)?;
        if rotation_minutes == 0 {
            anyhow::bail!("parameter {ROTATION_MINUTES} must be at least one minute");
        }
        let filename_template = FilenameTemplate::parse(
            &store.read_or_init(FILENAME_TEMPLATE, DEFAULT_FILENAME_TEMPLATE)?,
        )
        .with_context(|| format!("invalid parameter {FILENAME_TEMPLATE}"))?;
        let timestamp_format = store.read_or_init(TIMESTAMP_FORMAT, DEFAULT_TIMESTAMP_FORMAT)?;
        validate_timestamp_format(&timestamp_format)
            .with_context(|| format!("invalid parameter {TIMESTAMP_FORMAT}"))?;
        let min_udp_payload = parse_number::<usize>(store, MIN_UDP_PAYLOAD, DEFAULT_MIN_UDP_PAYLOAD)?;

        Ok(Self {
            run_number,
            device_path,
            destinations,
            data_directory,
            rotation_interval: Duration::from_secs(rotation_minutes * 60),
            filename_template,
            timestamp_format,
            min_udp_payload,
        })
    }
}

fn parse_number<T>(store: &ParameterStore, name: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = store.read_or_init(name, default)?;
    raw.parse::<T>()
        .with_context(|| format!("parameter {name} holds '{raw}', expected a number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_parameters_are_created_with_defaults() {
        let tmp = tempdir().expect("tmp");
        let store = ParameterStore::new(tmp.path().join("params"));
        let params = AcquisitionParams::load(&store, &AppConfig::default()).expect("load");

        assert_eq!(params.run_number, 0);
        assert_eq!(params.data_directory, "./data");
        assert_eq!(params.rotation_interval, Duration::from_secs(3600));
        assert_eq!(params.timestamp_format, "%y%m%d-%H%M%S");
        assert_eq!(params.min_udp_payload, 340);
        assert_eq!(params.destinations.len(), 1);

        let on_disk = fs::read_to_string(store.path_of(RUN_NUMBER)).expect("read run number");
        assert_eq!(on_disk, "00000\n");
        assert!(store.path_of(FILENAME_TEMPLATE).exists());
    }

    #[test]
    fn existing_values_win_over_defaults() {
        let tmp = tempdir().expect("tmp");
        let store = ParameterStore::new(tmp.path());
        store.write(RUN_NUMBER, "00017").unwrap();
        store.write(ROTATION_MINUTES, "5").unwrap();
        store.write(UDP_DESTINATIONS, "10.0.0.2:5000,10.0.0.255:5001").unwrap();
        fs::write(store.path_of(DEVICE_PATH), "/dev/ttyACM0\nignored second line\n").unwrap();

        let params = AcquisitionParams::load(&store, &AppConfig::default()).expect("load");
        assert_eq!(params.run_number, 17);
        assert_eq!(params.device_path, "/dev/ttyACM0");
        assert_eq!(params.rotation_interval, Duration::from_secs(300));
        assert_eq!(params.destinations.len(), 2);
        assert!(!params.destinations[0].broadcast);
        assert!(params.destinations[1].broadcast);
    }

    #[test]
    fn run_number_is_zero_padded() {
        let tmp = tempdir().expect("tmp");
        let store = ParameterStore::new(tmp.path());
        store.store_run_number(43).expect("store");
        assert_eq!(store.read_or_init(RUN_NUMBER, "x").unwrap(), "00043");
    }

    #[test]
    fn invalid_destination_is_a_configuration_error() {
        let tmp = tempdir().expect("tmp");
        let store = ParameterStore::new(tmp.path());
        store.write(UDP_DESTINATIONS, "bad").unwrap();
        let err = AcquisitionParams::load(&store, &AppConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains(UDP_DESTINATIONS));
    }

    #[test]
    fn non_numeric_rotation_is_rejected() {
        let tmp = tempdir().expect("tmp");
        let store = ParameterStore::new(tmp.path());
        store.write(ROTATION_MINUTES, "hourly").unwrap();
        assert!(AcquisitionParams::load(&store, &AppConfig::default()).is_err());
    }
}
