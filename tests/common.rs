#![allow(dead_code)]

use aesoplite_relay::{
    clock::{Clock, ManualClock},
    coalescer::{Coalescer, CoalescerSettings},
    config::RotationReference,
    fanout::SocketFanOut,
    params::{self, AcquisitionParams, ParameterStore},
    persistence::OutputFiles,
    serial::{FrameLink, LinkOpener, ReadOutcome},
    state::{BufferSizing, RunState},
    supervisor::SupervisorSettings,
    AppConfig, Supervisor,
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tempfile::TempDir;
use tokio::{net::UdpSocket, sync::watch, time::timeout};

pub const FRAME: usize = 34;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 22, 8, 0).unwrap()
}

/// One scripted read. `advance` moves the manual clock before the read
/// returns.
pub enum Step {
    Data(Vec<u8>, i64),
    Timeout,
    Eof,
}

pub fn data(bytes: Vec<u8>) -> Step {
    Step::Data(bytes, 0)
}

pub struct ScriptedLink {
    steps: VecDeque<Step>,
    clock: Arc<ManualClock>,
}

#[async_trait]
impl FrameLink for ScriptedLink {
    async fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        match self.steps.pop_front() {
            Some(Step::Data(bytes, advance)) => {
                assert!(bytes.len() <= buf.len(), "script offers more than the read allows");
                buf[..bytes.len()].copy_from_slice(&bytes);
                self.clock.advance(ChronoDuration::seconds(advance));
                ReadOutcome::Data(bytes.len())
            }
            Some(Step::Timeout) => ReadOutcome::Timeout,
            Some(Step::Eof) | None => ReadOutcome::EndOfStream,
        }
    }

    async fn close(&mut self) {}
}

/// Hands out one scripted link per open; `None` entries fail the open.
pub struct ScriptedOpener {
    sessions: VecDeque<Option<Vec<Step>>>,
    clock: Arc<ManualClock>,
    pub opens: Arc<AtomicUsize>,
}

#[async_trait]
impl LinkOpener for ScriptedOpener {
    type Link = ScriptedLink;

    async fn open(&mut self) -> Result<ScriptedLink> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.sessions.pop_front() {
            Some(Some(steps)) => Ok(ScriptedLink {
                steps: steps.into(),
                clock: self.clock.clone(),
            }),
            Some(None) => bail!("device unplugged"),
            None => bail!("no more sessions scripted"),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

pub struct Harness {
    pub tmp: TempDir,
    pub store: ParameterStore,
    pub receivers: Vec<UdpSocket>,
    pub opens: Arc<AtomicUsize>,
    pub clock: Arc<ManualClock>,
    pub shutdown: watch::Sender<bool>,
    pub supervisor: Supervisor<ScriptedOpener>,
}

pub struct HarnessOptions {
    pub run_number: u32,
    pub min_udp_payload: usize,
    pub rotation_minutes: u64,
    pub receivers: usize,
    pub timeout_threshold: u32,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            run_number: 1,
            min_udp_payload: 2 * FRAME,
            rotation_minutes: 60,
            receivers: 1,
            timeout_threshold: 10,
        }
    }
}

pub async fn harness(sessions: Vec<Option<Vec<Step>>>, options: HarnessOptions) -> Harness {
    let tmp = tempfile::tempdir().expect("create tempdir");
    let store = ParameterStore::new(tmp.path().join("params"));

    let mut receivers = Vec::new();
    let mut destinations = Vec::new();
    for _ in 0..options.receivers {
        let rx = UdpSocket::bind("127.0.0.1:0").await.expect("bind receiver");
        destinations.push(rx.local_addr().unwrap().to_string());
        receivers.push(rx);
    }
    store
        .write(params::UDP_DESTINATIONS, &destinations.join(","))
        .unwrap();
    store
        .write(params::DATA_DIRECTORY, &data_dir(tmp.path()).to_string_lossy())
        .unwrap();
    store
        .write(params::ROTATION_MINUTES, &options.rotation_minutes.to_string())
        .unwrap();
    store
        .write(params::MIN_UDP_PAYLOAD, &options.min_udp_payload.to_string())
        .unwrap();
    store.store_run_number(options.run_number).unwrap();

    let config = AppConfig::default();
    let params = AcquisitionParams::load(&store, &config).expect("load params");
    let fanout = SocketFanOut::configure(&params.destinations)
        .await
        .expect("configure fanout");
    let sizing = BufferSizing::new(FRAME, params.min_udp_payload);

    let clock = Arc::new(ManualClock::new(t0()));
    let opens = Arc::new(AtomicUsize::new(0));
    let opener = ScriptedOpener {
        sessions: sessions.into(),
        clock: clock.clone(),
        opens: opens.clone(),
    };
    let coalescer = Coalescer::new(CoalescerSettings {
        sizing,
        timeout_threshold: options.timeout_threshold,
        pacing_per_byte: Duration::ZERO,
        rotation_interval: params.rotation_interval,
        rotation_reference: RotationReference::PreviousOpen,
    });
    let (shutdown, shutdown_rx) = watch::channel(false);
    let supervisor = Supervisor::new(
        opener,
        OutputFiles::new(&params, store.clone()),
        fanout,
        coalescer,
        RunState::new(params.run_number, &sizing),
        clock.clone() as Arc<dyn Clock>,
        SupervisorSettings {
            service_name: "pipeline-test".into(),
            reopen_backoff: Duration::from_millis(10),
            heartbeat_interval: Duration::from_secs(3600),
            stop_at_end_of_stream: true,
        },
        shutdown_rx,
    );

    Harness {
        tmp,
        store,
        receivers,
        opens,
        clock,
        shutdown,
        supervisor,
    }
}

pub fn data_dir(root: &Path) -> PathBuf {
    root.join("data")
}

/// Output files sorted by name, which sorts by run number.
pub fn output_files(root: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(data_dir(root))
        .map(|rd| rd.filter_map(|e| e.ok().map(|e| e.path())).collect())
        .unwrap_or_default();
    entries.sort();
    entries
}

pub async fn recv(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 8192];
    let (n, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("datagram arrives")
        .expect("recv");
    buf.truncate(n);
    buf
}

/// Collects datagrams until none arrives for a short while.
pub async fn drain(socket: &UdpSocket) -> Vec<Vec<u8>> {
    let mut datagrams = Vec::new();
    let mut buf = vec![0u8; 8192];
    while let Ok(Ok((n, _))) = timeout(Duration::from_millis(200), socket.recv_from(&mut buf)).await {
        datagrams.push(buf[..n].to_vec());
    }
    datagrams
}

pub fn frames(count: usize, seed: u8) -> Vec<u8> {
    (0..count * FRAME)
        .map(|i| seed.wrapping_add(i as u8))
        .collect()
}
