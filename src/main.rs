use aesoplite_relay::{
    clock::SystemClock,
    coalescer::{Coalescer, CoalescerSettings},
    fanout::SocketFanOut,
    logging,
    params::{AcquisitionParams, ParameterStore},
    persistence::OutputFiles,
    platform,
    serial::{LinkSettings, SerialLinkOpener},
    state::{BufferSizing, RunState},
    supervisor::SupervisorSettings,
    AppConfig, Supervisor,
};
use anyhow::{bail, Context, Result};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::{signal, sync::watch};

#[derive(Debug)]
struct Cli {
    config_path: Option<String>,
    replay_path: Option<String>,
}

impl Cli {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut config_path: Option<String> = None;
        let mut replay_path: Option<String> = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                    config_path = Some(value);
                }
                "--replay" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--replay requires a path"))?;
                    replay_path = Some(value);
                }
                "--version" | "-V" => {
                    println!("aesoplite-relay {}", env!("CARGO_PKG_VERSION"));
                    std::process::exit(0);
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: aesoplite-relay [--config <path>] [--replay <capture>]\n\
                         --config <path>   Path to TOML configuration (default: {})\n\
                         --replay <path>   Read a raw capture file instead of the serial device\n\
                         --version         Print the version and exit",
                        AppConfig::default_path()
                    );
                    std::process::exit(0);
                }
                other => {
                    if config_path.is_none() {
                        config_path = Some(other.to_string());
                    } else {
                        bail!("unknown argument '{other}'");
                    }
                }
            }
        }

        Ok(Self {
            config_path,
            replay_path,
        })
    }

    /// An explicit path must exist; the default path may be absent.
    fn load_config(&self) -> Result<AppConfig> {
        match &self.config_path {
            Some(path) => AppConfig::load(path)
                .with_context(|| format!("unable to load configuration from {path}")),
            None if Path::new(AppConfig::default_path()).exists() => {
                AppConfig::load(AppConfig::default_path())
            }
            None => Ok(AppConfig::default()),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse()?;
    let config = cli.load_config()?;

    logging::init(&config)?;
    tracing::info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        "aesoplite-relay starting"
    );
    platform::log_platform_guidance();

    let store = ParameterStore::new(&config.parameter_directory);
    let params = AcquisitionParams::load(&store, &config).with_context(|| {
        format!("invalid parameters in {}", config.parameter_directory)
    })?;
    let fanout = SocketFanOut::configure(&params.destinations)
        .await
        .context("unable to configure udp destinations")?;

    let device_path = cli
        .replay_path
        .clone()
        .unwrap_or_else(|| params.device_path.clone());
    let sizing = BufferSizing::new(config.frame_size, params.min_udp_payload);
    tracing::info!(
        device = %device_path,
        frame_size = sizing.frame_size,
        min_udp_payload = sizing.min_udp_payload,
        buffer_capacity = sizing.capacity,
        rotation_seconds = params.rotation_interval.as_secs(),
        "acquisition parameters loaded"
    );

    let opener = SerialLinkOpener::new(
        device_path,
        LinkSettings {
            baud_rate: config.baud_rate,
            frame_size: config.frame_size,
            read_timeout: config.read_timeout(),
        },
    );
    let coalescer = Coalescer::new(CoalescerSettings {
        sizing,
        timeout_threshold: config.timeout_threshold,
        pacing_per_byte: Duration::from_micros(config.pacing_micros_per_byte),
        rotation_interval: params.rotation_interval,
        rotation_reference: config.rotation_reference,
    });
    let state = RunState::new(params.run_number, &sizing);
    let files = OutputFiles::new(&params, store);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let service_name = config.service_name.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::info!(service = %service_name, "ctrl-c received, requesting shutdown");
                shutdown_tx.send(true).ok();
            }
        });
    }

    let supervisor = Supervisor::new(
        opener,
        files,
        fanout,
        coalescer,
        state,
        Arc::new(SystemClock),
        SupervisorSettings {
            service_name: config.service_name.clone(),
            reopen_backoff: config.reopen_backoff(),
            heartbeat_interval: config.heartbeat_interval(),
            stop_at_end_of_stream: cli.replay_path.is_some(),
        },
        shutdown_rx,
    );
    supervisor.run().await
}
