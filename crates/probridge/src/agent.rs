//! Controller agent — polling worker, initialization handshake,
//! reconnection, and the concurrently read state cache.
//!
//! One dedicated worker thread keeps a read in flight against the
//! controller and republishes every state report into a cache guarded by a
//! reader/writer lock. Any number of host threads read the cache through
//! [`ControllerAgent::state`] / [`ControllerAgent::battery`]; a cache entry
//! older than the freshness window reports as disconnected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::device::{self, RawDevice};
use crate::diag;
use crate::gamepad::{BatteryInfo, GamepadState};
use crate::mapping;
use crate::pipe::{DuplexPipes, IoBuffer, OpStatus, PipeParams, SYNC_INFINITE};
use crate::protocol::{
    CommandCode, FullStates, Packet, PacketType, READ_TRANSFER_LEN, SubcommandCode,
    WRITE_TRANSFER_LEN, packets,
};
use crate::timer::{ElapsedTimer, monotonic_ms};

/// Worker tick interval; roughly the controller's own 60 Hz report rate.
pub const POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Cache entries older than this report as disconnected.
pub const FRESHNESS_WINDOW_MS: u64 = 100;

/// Total wait budget for each handshake reply.
pub const REPLY_BUDGET: Duration = Duration::from_millis(400);

/// The bridge serves a single controller; export shims reject any other
/// user index.
pub const SUPPORTED_USER_INDEX: u32 = 0;

/// Indicator lamp bitmask sent during the handshake; lamp 0 only.
const PLAYER_LED_MASK: u32 = 0x01;

/// How often the first-pull wait re-checks device liveness.
const FIRST_PULL_RECHECK: Duration = Duration::from_millis(10);

const PIPE_PARAMS: PipeParams = PipeParams {
    read_buffer_len: READ_TRANSFER_LEN,
    write_buffer_len: WRITE_TRANSFER_LEN,
};

/// Factory producing a freshly opened device, or `None` when absent.
pub type DeviceOpener = dyn Fn() -> Option<Arc<dyn RawDevice>> + Send + Sync;

#[derive(Default)]
struct CachedStates {
    /// Monotonic commit time; zero means "never pulled" and is always stale.
    timestamp_ms: u64,
    pad: GamepadState,
    battery: BatteryInfo,
}

impl CachedStates {
    fn is_fresh(&self) -> bool {
        self.timestamp_ms != 0
            && monotonic_ms().saturating_sub(self.timestamp_ms) < FRESHNESS_WINDOW_MS
    }
}

struct AgentShared {
    cached: RwLock<CachedStates>,
    /// The device currently backing the worker's pipes, for liveness
    /// queries from reader threads.
    device: RwLock<Arc<dyn RawDevice>>,
    stop: AtomicBool,
    first_pull: Mutex<bool>,
    first_pull_cv: Condvar,
}

/// The process-facing half of the bridge.
///
/// Construction opens the controller (when present) and spawns the polling
/// worker; dropping the agent signals the worker, joins it, and releases
/// the device.
pub struct ControllerAgent {
    shared: Arc<AgentShared>,
    worker: Option<JoinHandle<()>>,
}

impl ControllerAgent {
    /// Creates an agent that discovers the controller over USB HID.
    #[cfg(windows)]
    pub fn open_usb() -> ControllerAgent {
        Self::with_opener(|| match device::open_pro_controller() {
            Ok(dev) => Some(dev),
            Err(e) => {
                log::debug!("{e}");
                None
            }
        })
    }

    /// Creates an agent over a custom device factory. The factory is
    /// re-invoked on every reconnection attempt.
    pub fn with_opener(
        opener: impl Fn() -> Option<Arc<dyn RawDevice>> + Send + Sync + 'static,
    ) -> ControllerAgent {
        let initial = opener().unwrap_or_else(device::detached);
        let shared = Arc::new(AgentShared {
            cached: RwLock::new(CachedStates::default()),
            device: RwLock::new(Arc::clone(&initial)),
            stop: AtomicBool::new(false),
            first_pull: Mutex::new(false),
            first_pull_cv: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("probridge-poll".into())
            .spawn(move || {
                Worker {
                    shared: worker_shared,
                    opener: Box::new(opener),
                    pipes: DuplexPipes::new(initial, PIPE_PARAMS),
                }
                .run();
            })
            .map_err(|e| log::warn!("failed to spawn polling worker: {e}"))
            .ok();

        ControllerAgent { shared, worker }
    }

    /// The cached gamepad snapshot, or `None` once the cache has gone
    /// stale (controller disconnected or asleep).
    pub fn state(&self) -> Option<GamepadState> {
        let cached = self.shared.cached.read().ok()?;
        cached.is_fresh().then(|| cached.pad)
    }

    /// The cached battery record, under the same freshness rule as
    /// [`ControllerAgent::state`].
    pub fn battery(&self) -> Option<BatteryInfo> {
        let cached = self.shared.cached.read().ok()?;
        cached.is_fresh().then(|| cached.battery)
    }

    /// Whether the device handle behind the pipes is currently live. A
    /// poisoned device slot counts as invalid.
    pub fn is_device_valid(&self) -> bool {
        self.shared
            .device
            .read()
            .map(|dev| dev.is_open())
            .unwrap_or(false)
    }

    /// Blocks until the worker commits its first state pull, or the device
    /// goes away. Returns whether a pull happened.
    ///
    /// Must not be called from the worker thread.
    pub fn wait_for_first_state(&self) -> bool {
        let Ok(mut done) = self.shared.first_pull.lock() else {
            return false;
        };
        loop {
            if *done {
                return true;
            }
            if !self.is_device_valid() {
                return *done;
            }
            match self
                .shared
                .first_pull_cv
                .wait_timeout(done, FIRST_PULL_RECHECK)
            {
                Ok((guard, _)) => done = guard,
                Err(e) => done = e.into_inner().0,
            }
        }
    }
}

impl Drop for ControllerAgent {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ── Process-wide container ──

static ACTIVE_AGENT: Mutex<Option<Arc<ControllerAgent>>> = Mutex::new(None);

/// Installs `agent` as the process-wide instance (replacing and shutting
/// down any previous one) and returns a shared handle to it.
pub fn install(agent: ControllerAgent) -> Arc<ControllerAgent> {
    let agent = Arc::new(agent);
    if let Ok(mut active) = ACTIVE_AGENT.lock() {
        *active = Some(Arc::clone(&agent));
    }
    agent
}

/// The process-wide instance, if one is installed.
pub fn instance() -> Option<Arc<ControllerAgent>> {
    ACTIVE_AGENT.lock().ok().and_then(|active| active.clone())
}

/// Removes the process-wide instance. The worker is joined when the last
/// outstanding handle drops.
pub fn uninstall() {
    if let Ok(mut active) = ACTIVE_AGENT.lock() {
        active.take();
    }
}

// ── Worker ──

/// Single-shot token: each tick may spend at most one reattach attempt,
/// no matter which failure path asks for it.
struct ReattachGate(bool);

impl ReattachGate {
    fn new() -> ReattachGate {
        ReattachGate(true)
    }

    fn take(&mut self) -> bool {
        std::mem::replace(&mut self.0, false)
    }
}

struct Worker {
    shared: Arc<AgentShared>,
    opener: Box<DeviceOpener>,
    pipes: DuplexPipes,
}

impl Worker {
    fn run(mut self) {
        if self.pipes.is_file_valid() {
            self.reattach();
        }
        while !self.shared.stop.load(Ordering::Acquire) {
            self.try_update();
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn set_first_pull(&self, done: bool) {
        if let Ok(mut first) = self.shared.first_pull.lock() {
            *first = done;
        }
        if done {
            self.shared.first_pull_cv.notify_all();
        }
    }

    /// Replaces the pipes (and the reader-visible device reference) with a
    /// freshly opened endpoint. The previous handle closes once its last
    /// reference drops.
    fn install_device(&mut self, dev: Arc<dyn RawDevice>) {
        if let Ok(mut current) = self.shared.device.write() {
            *current = Arc::clone(&dev);
        }
        self.pipes = DuplexPipes::new(dev, PIPE_PARAMS);
    }

    fn commit(&self, states: &FullStates) {
        let (pad, battery) = mapping::translate(states);
        let Ok(mut cached) = self.shared.cached.write() else {
            return;
        };
        cached.timestamp_ms = monotonic_ms();
        cached.pad = pad;
        cached.battery = battery;
        drop(cached);
        self.set_first_pull(true);
    }

    /// One tick of the polling state machine. Returns whether the cache is
    /// either updated or still being read from a live device.
    fn try_update(&mut self) -> bool {
        let mut reattach_gate = ReattachGate::new();

        if !self.pipes.is_file_valid() && !(reattach_gate.take() && self.reattach()) {
            return false;
        }

        let mut buf = IoBuffer::new(READ_TRANSFER_LEN);
        let popped = self.pipes.pop_read_result(buf.as_mut_slice());
        match popped.status {
            OpStatus::InvalidFile => {
                self.pipes.close();
                if reattach_gate.take() {
                    self.reattach();
                }
                false
            }
            OpStatus::StillExecuting => {
                // A read that never completes usually means another process
                // (e.g. Steam) has pushed the controller into sleep mode. A
                // poisoned cache counts as stale.
                let fresh = self
                    .shared
                    .cached
                    .read()
                    .map(|cached| cached.is_fresh())
                    .unwrap_or(false);
                if !fresh {
                    self.pipes.close();
                    if reattach_gate.take() {
                        self.reattach();
                    }
                    return false;
                }
                true
            }
            OpStatus::Success => {
                // Issue the next read before decoding so the device never
                // idles between ticks.
                let next_read = self.pipes.read();

                let returned = &buf.as_slice()[..(popped.bytes as usize).min(buf.len())];
                diag::trace_packets("pull", returned);
                if let Some(states) = last_full_states(returned) {
                    self.commit(&states);
                }

                // A failed follow-up read is handled only after the cache
                // commit; this tick still counts as a successful pull.
                if next_read.status == OpStatus::InvalidFile {
                    self.pipes.close();
                    if reattach_gate.take() {
                        self.reattach();
                    }
                }
                true
            }
        }
    }

    /// Reopens the controller and brings it back to a streaming state:
    /// either state reports are already flowing, or the USB handshake is
    /// run from scratch. A controller that cannot be initialized is left
    /// closed so later ticks retry the open.
    fn reattach(&mut self) -> bool {
        self.set_first_pull(false);

        let Some(dev) = (self.opener)() else {
            log::debug!("no controller present");
            return false;
        };
        self.install_device(dev);

        if !self.await_full_states() {
            self.pipes.cancel_read();
            if !self.init_device() {
                log::warn!("controller failed to initialize");
                self.pipes.close();
                return false;
            }
        }
        true
    }

    /// Runs the controller's USB handshake, in strict order. `ForceUsb`
    /// never generates a reply; every other step must echo back within the
    /// reply budget.
    fn init_device(&mut self) -> bool {
        self.send_host_command(CommandCode::Handshake, true)
            && self.send_host_command(CommandCode::SetHighSpeed, true)
            && self.send_host_command(CommandCode::Handshake, true)
            && self.send_host_command(CommandCode::ForceUsb, false)
            && self.send_host_subcommand(SubcommandCode::SetPlayerLights, 1, PLAYER_LED_MASK, true)
    }

    fn send_host_command(&mut self, cmd: CommandCode, expect_reply: bool) -> bool {
        log::debug!("handshake: command {cmd:?}");
        let packet = Packet::host_command(cmd);
        if self.pipes.write_sync(packet.as_bytes(), SYNC_INFINITE).status != OpStatus::Success {
            return false;
        }
        !expect_reply || self.read_until(|p| p.command_reply().is_some_and(|r| r.cmd == cmd as u8))
    }

    fn send_host_subcommand(
        &mut self,
        subcmd: SubcommandCode,
        serial_id: u8,
        data: u32,
        expect_reply: bool,
    ) -> bool {
        log::debug!("handshake: subcommand {subcmd:?}");
        let packet = Packet::rumble_with_subcommand(serial_id, subcmd, data);
        if self.pipes.write_sync(packet.as_bytes(), SYNC_INFINITE).status != OpStatus::Success {
            return false;
        }
        !expect_reply
            || self.read_until(|p| match p.subcommand_reply() {
                Some(reply) if reply.subcmd == subcmd as u8 => {
                    if !reply.acknowledged() {
                        log::debug!("subcommand {subcmd:?} reply carries no ack ({:#04X})", reply.ack);
                    }
                    true
                }
                _ => false,
            })
    }

    fn await_full_states(&mut self) -> bool {
        self.read_until(|p| p.packet_type() == Some(PacketType::FullStates))
    }

    /// Reads until `found` matches a packet or the reply budget elapses.
    /// Interleaved unrelated traffic is skipped, not treated as an error.
    fn read_until(&mut self, mut found: impl FnMut(&Packet) -> bool) -> bool {
        let timer = ElapsedTimer::start();
        let mut buf = IoBuffer::new(self.pipes.read_buffer_len());
        loop {
            let elapsed = timer.elapsed();
            if elapsed >= REPLY_BUDGET {
                return false;
            }
            let pulled = self.pipes.read_sync(buf.as_mut_slice(), REPLY_BUDGET - elapsed);
            if pulled.status != OpStatus::Success {
                return false;
            }
            let returned = &buf.as_slice()[..(pulled.bytes as usize).min(buf.len())];
            diag::trace_packets("reply", returned);
            for packet in packets(returned) {
                if found(&packet) {
                    return true;
                }
            }
        }
    }
}

/// The last state report in a transfer buffer, if any; a transfer can hold
/// two reports and the newer one wins.
fn last_full_states(buf: &[u8]) -> Option<FullStates> {
    packets(buf).filter_map(|p| p.full_states()).last()
}
