use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use log::{error, info, warn};
use tokio::{
    sync::{broadcast, Mutex},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{Database, MetadataKey, SessionRecord},
    relay::{LogRelay, RelayEvent},
};

use super::{
    clock::{elapsed_secs, Clock},
    driver::Driver,
    persist::{PendingWrite, Persister},
    policy::BreakRatio,
    resume::{resolve, PersistedTimer, Resumption},
    state::{ActiveTimer, TickOutcome, TimerMode, TimerState},
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub tick_interval: Duration,
    pub snapshot_interval: Duration,
    /// Ticks between anchor writes while a phase is running.
    pub heartbeat_every_ticks: u32,
    /// Quiet period after resumption before commands are accepted.
    pub settle_delay: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            snapshot_interval: Duration::from_secs(5 * 60),
            heartbeat_every_ticks: 10,
            settle_delay: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TimerEvent {
    /// A transition happened.
    StateChanged(TimerState),
    /// The per-second driver recomputed the display.
    Tick(TimerState),
    /// A break ran out on its own.
    BreakFinished,
    /// A progress record was handed to the relay.
    SnapshotEmitted(SessionRecord),
}

struct Drivers {
    ticker: Driver,
    snapshots: Driver,
}

impl Drivers {
    fn stop_all(&mut self) {
        self.ticker.stop();
        self.snapshots.stop();
    }
}

/// Everything a driver loop needs, cloned out of the controller.
#[derive(Clone)]
struct DriverContext {
    state: Arc<Mutex<TimerState>>,
    persister: Persister,
    relay: Arc<dyn LogRelay>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<TimerEvent>,
    config: TimerConfig,
}

/// Owns the timer state and the drivers. Lock order is state, then drivers.
#[derive(Clone)]
pub struct TimerController {
    state: Arc<Mutex<TimerState>>,
    drivers: Arc<Mutex<Drivers>>,
    db: Database,
    persister: Persister,
    relay: Arc<dyn LogRelay>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<TimerEvent>,
    ready: Arc<AtomicBool>,
    resumed: Arc<AtomicBool>,
    config: TimerConfig,
}

impl TimerController {
    pub fn new(
        db: Database,
        relay: Arc<dyn LogRelay>,
        clock: Arc<dyn Clock>,
        config: TimerConfig,
    ) -> Self {
        let ready = Arc::new(AtomicBool::new(false));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            state: Arc::new(Mutex::new(TimerState::default())),
            drivers: Arc::new(Mutex::new(Drivers {
                ticker: Driver::new("tick"),
                snapshots: Driver::new("snapshot"),
            })),
            persister: Persister::spawn(db.clone(), ready.clone()),
            db,
            relay,
            clock,
            events,
            ready,
            resumed: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    /// True once resumption and the settle delay are over.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn get_state(&self) -> TimerState {
        let (finished, snapshot) = {
            let mut state = self.state.lock().await;
            let finished = self.settle_expired_break(&mut state).await;
            (finished, state.clone())
        };
        self.announce_break_finished(finished);
        snapshot
    }

    /// Rebuilds the timer from what the previous process persisted. Runs
    /// once; commands are rejected until it has finished.
    pub async fn resume(&self) -> Result<Resumption> {
        if self.resumed.swap(true, Ordering::SeqCst) {
            bail!("timer state was already resumed");
        }

        let persisted = self.load_persisted().await;
        let resumption = resolve(&persisted, self.clock.now_ms());

        let state = {
            let mut state = self.state.lock().await;
            *state = TimerState::resumed(&persisted, resumption);
            if resumption.is_running() {
                let mut drivers = self.drivers.lock().await;
                self.start_drivers(&mut drivers, &state);
            }
            state.clone()
        };

        if resumption == Resumption::BreakExpired {
            info!("Break expired while the timer was not running");
            if let Err(err) = self.db.delete_metadata(MetadataKey::ActiveTimer).await {
                warn!("Failed to clear expired break anchor: {err:#}");
            }
            if let Err(err) = self
                .db
                .set_metadata(MetadataKey::LastFlowDuration, &0u64)
                .await
            {
                warn!("Failed to reset last flow duration: {err:#}");
            }
        }

        info!("Resumed timer: {resumption:?}");

        time::sleep(self.config.settle_delay).await;
        self.ready.store(true, Ordering::SeqCst);
        self.emit(TimerEvent::StateChanged(state));

        Ok(resumption)
    }

    pub async fn start_flow(&self) -> Result<TimerState> {
        self.ensure_ready()?;

        let (finished, started) = {
            let mut state = self.state.lock().await;
            let finished = self.settle_expired_break(&mut state).await;
            let started = state.start_flow(self.clock.now_ms()).map(|()| {
                self.persister
                    .persist_in_background(PendingWrite::Anchor(state.anchor()));
                self.persister
                    .persist_in_background(PendingWrite::LastFlowDuration(0));
                state.clone()
            });
            if started.is_ok() {
                let mut drivers = self.drivers.lock().await;
                self.start_drivers(&mut drivers, &state);
            }
            (finished, started)
        };
        self.announce_break_finished(finished);
        let snapshot = started?;

        info!("Flow session started at {}", snapshot.start_time);
        self.emit(TimerEvent::StateChanged(snapshot.clone()));
        Ok(snapshot)
    }

    pub async fn end_flow(&self) -> Result<SessionRecord> {
        self.ensure_ready()?;

        let (record, snapshot) = {
            let mut state = self.state.lock().await;
            if state.mode != TimerMode::Flow {
                bail!("no flow session to end");
            }

            self.drivers.lock().await.stop_all();

            let record = state.end_flow(self.clock.now_ms())?;
            self.persister
                .persist_in_background(PendingWrite::Anchor(None));
            self.persister
                .persist_in_background(PendingWrite::LastFlowDuration(record.duration));
            (record, state.clone())
        };

        if let Err(err) = self.db.put_session(&record).await {
            error!("Failed to store session {}: {err:#}", record.id);
        }
        relay_in_background(self.relay.clone(), RelayEvent::Session, record.clone());

        info!(
            "Flow session {} ended after {}s; suggested break {}s",
            record.id, record.duration, snapshot.seconds
        );
        self.emit(TimerEvent::StateChanged(snapshot));
        Ok(record)
    }

    pub async fn start_break(&self) -> Result<TimerState> {
        self.ensure_ready()?;

        let (finished, started) = {
            let mut state = self.state.lock().await;
            let finished = self.settle_expired_break(&mut state).await;
            let started = state.start_break(self.clock.now_ms()).map(|()| {
                self.persister
                    .persist_in_background(PendingWrite::Anchor(state.anchor()));
                self.persister
                    .persist_in_background(PendingWrite::LastFlowDuration(0));
                state.clone()
            });
            if started.is_ok() {
                let mut drivers = self.drivers.lock().await;
                self.start_drivers(&mut drivers, &state);
            }
            (finished, started)
        };
        self.announce_break_finished(finished);
        let snapshot = started?;

        info!("Break of {}s started", snapshot.initial_seconds);
        self.emit(TimerEvent::StateChanged(snapshot.clone()));
        Ok(snapshot)
    }

    pub async fn skip_break(&self) -> Result<TimerState> {
        self.ensure_ready()?;

        let (finished, snapshot) = {
            let mut state = self.state.lock().await;
            if state.mode == TimerMode::Flow {
                bail!("a flow session is running; end it instead");
            }
            let finished = self.settle_expired_break(&mut state).await;

            self.drivers.lock().await.stop_all();

            state.skip_break()?;
            self.persister
                .persist_in_background(PendingWrite::Anchor(None));
            self.persister
                .persist_in_background(PendingWrite::LastFlowDuration(0));
            (finished, state.clone())
        };
        self.announce_break_finished(finished);

        info!("Break skipped");
        self.emit(TimerEvent::StateChanged(snapshot.clone()));
        Ok(snapshot)
    }

    pub async fn set_break_ratio(&self, ratio: BreakRatio) -> Result<TimerState> {
        self.ensure_ready()?;

        let (changed, snapshot) = {
            let mut state = self.state.lock().await;
            let changed = state.set_break_ratio(ratio);
            self.persister
                .persist_in_background(PendingWrite::BreakRatio(ratio));
            (changed, state.clone())
        };

        if changed {
            self.emit(TimerEvent::StateChanged(snapshot.clone()));
        }
        Ok(snapshot)
    }

    /// Deletes the ledger and all metadata and returns to a fresh idle
    /// state. The ratio preference is written back afterwards.
    pub async fn clear_all_data(&self) -> Result<TimerState> {
        self.ensure_ready()?;

        let snapshot = {
            let mut state = self.state.lock().await;
            self.drivers.lock().await.stop_all();

            self.persister.flush().await;
            self.db.clear_all().await?;

            state.clear();
            self.persister
                .persist_in_background(PendingWrite::BreakRatio(state.break_ratio));
            state.clone()
        };

        warn!("All sessions and timer data cleared");
        self.emit(TimerEvent::StateChanged(snapshot.clone()));
        Ok(snapshot)
    }

    /// Stops both drivers and drains queued writes. The anchor stays stored so
    /// the next start can resume.
    pub async fn shutdown(&self) {
        {
            let _state = self.state.lock().await;
            self.drivers.lock().await.stop_all();
        }
        self.persister.flush().await;
    }

    /// Recomputes from the anchor and ends a break that ran out since the last
    /// driver tick. Called with the state lock held.
    async fn settle_expired_break(&self, state: &mut TimerState) -> Option<TimerState> {
        if state.tick(self.clock.now_ms()) != TickOutcome::BreakFinished {
            return None;
        }

        self.drivers.lock().await.stop_all();
        self.persister
            .persist_in_background(PendingWrite::Anchor(None));
        self.persister
            .persist_in_background(PendingWrite::LastFlowDuration(0));
        info!("Break finished");
        Some(state.clone())
    }

    fn announce_break_finished(&self, finished: Option<TimerState>) {
        if let Some(state) = finished {
            self.emit(TimerEvent::StateChanged(state));
            self.emit(TimerEvent::BreakFinished);
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if !self.is_ready() {
            return Err(anyhow!("timer is still resuming"));
        }
        Ok(())
    }

    fn emit(&self, event: TimerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn load_persisted(&self) -> PersistedTimer {
        let break_ratio = match self.db.get_metadata::<BreakRatio>(MetadataKey::BreakRatio).await {
            Ok(ratio) => ratio.unwrap_or_default(),
            Err(err) => {
                warn!("Using default break ratio: {err:#}");
                BreakRatio::default()
            }
        };

        let last_flow_duration = match self
            .db
            .get_metadata::<u64>(MetadataKey::LastFlowDuration)
            .await
        {
            Ok(duration) => duration.unwrap_or(0),
            Err(err) => {
                warn!("Ignoring stored last flow duration: {err:#}");
                0
            }
        };

        let anchor = match self
            .db
            .get_metadata::<ActiveTimer>(MetadataKey::ActiveTimer)
            .await
        {
            Ok(anchor) => anchor,
            Err(err) => {
                warn!("Ignoring unreadable timer anchor: {err:#}");
                None
            }
        };

        PersistedTimer {
            anchor,
            last_flow_duration,
            break_ratio,
        }
    }

    fn start_drivers(&self, drivers: &mut Drivers, state: &TimerState) {
        let context = DriverContext {
            state: self.state.clone(),
            persister: self.persister.clone(),
            relay: self.relay.clone(),
            clock: self.clock.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
        };
        let anchor_start = state.start_time;

        let ticker_context = context.clone();
        drivers
            .ticker
            .start(move |token| tick_loop(ticker_context, anchor_start, token));

        if state.mode == TimerMode::Flow {
            drivers
                .snapshots
                .start(move |token| snapshot_loop(context, anchor_start, token));
        } else {
            drivers.snapshots.stop();
        }
    }
}

fn relay_in_background(relay: Arc<dyn LogRelay>, event: RelayEvent, record: SessionRecord) {
    tokio::spawn(async move {
        if let Err(err) = relay.send(event, &record).await {
            warn!("Log relay write failed for {}: {err:#}", record.id);
        }
    });
}

/// Recomputes the display from the anchor once per interval. Exits when the
/// phase ends or the anchor it was started for is replaced.
async fn tick_loop(context: DriverContext, anchor_start: i64, cancel_token: CancellationToken) {
    let mut interval = time::interval(context.config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let heartbeat_every = context.config.heartbeat_every_ticks.max(1);
    let mut ticks: u32 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel_token.cancelled() => break,
        }

        let (outcome, snapshot) = {
            let mut state = context.state.lock().await;
            if cancel_token.is_cancelled()
                || !state.is_running()
                || state.start_time != anchor_start
            {
                break;
            }

            let outcome = state.tick(context.clock.now_ms());
            match outcome {
                TickOutcome::BreakFinished => {
                    context
                        .persister
                        .persist_in_background(PendingWrite::Anchor(None));
                    context
                        .persister
                        .persist_in_background(PendingWrite::LastFlowDuration(0));
                }
                TickOutcome::Counting => {
                    ticks = ticks.wrapping_add(1);
                    if ticks % heartbeat_every == 0 {
                        context
                            .persister
                            .persist_in_background(PendingWrite::Anchor(state.anchor()));
                    }
                }
                TickOutcome::Idle => break,
            }
            (outcome, state.clone())
        };

        if outcome == TickOutcome::BreakFinished {
            info!("Break finished");
            let _ = context.events.send(TimerEvent::StateChanged(snapshot));
            let _ = context.events.send(TimerEvent::BreakFinished);
            break;
        }
        let _ = context.events.send(TimerEvent::Tick(snapshot));
    }
}

/// Emits a progress record for the running flow every snapshot interval.
async fn snapshot_loop(context: DriverContext, anchor_start: i64, cancel_token: CancellationToken) {
    let period = context.config.snapshot_interval;
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = cancel_token.cancelled() => break,
        }

        let record = {
            let state = context.state.lock().await;
            if cancel_token.is_cancelled()
                || state.mode != TimerMode::Flow
                || state.start_time != anchor_start
            {
                break;
            }
            let now = context.clock.now_ms();
            SessionRecord::flow_snapshot(anchor_start, now, elapsed_secs(anchor_start, now))
        };

        log::debug!("Flow snapshot {} ({}s)", record.id, record.duration);
        let _ = context
            .events
            .send(TimerEvent::SnapshotEmitted(record.clone()));
        relay_in_background(context.relay.clone(), RelayEvent::Snapshot, record);
    }
}
