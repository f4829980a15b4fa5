//! Background configuration refresh.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex, PoisonError,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use rand::{thread_rng, Rng};

use crate::Result;

type Tick = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// A pausable configuration poller.
///
/// Ticks run on a single dedicated timer thread, so two ticks of one poller never overlap.
/// Pausing or stopping only cancels the pending tick: a tick that is already running completes
/// but does not schedule the next one.
pub(crate) struct Poller {
    tick: Tick,
    running: Arc<AtomicBool>,
    state: Mutex<PollerState>,
}

#[derive(Default)]
struct PollerState {
    /// Interval and maximum jitter of the last `start`.
    settings: Option<(Duration, Duration)>,
    timer: Option<TimerThread>,
}

struct TimerThread {
    commands: Sender<TimerCommand>,
    // Never joined: a tick blocked on the network must not block `stop`.
    _join_handle: JoinHandle<()>,
}

enum TimerCommand {
    Schedule(Duration),
    Cancel,
}

impl Poller {
    pub(crate) fn new(tick: impl Fn() -> Result<()> + Send + Sync + 'static) -> Poller {
        Poller {
            tick: Arc::new(tick),
            running: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(PollerState::default()),
        }
    }

    /// Start polling every `interval` plus up to `jitter`. Does nothing if already running.
    pub(crate) fn start(&self, interval: Duration, jitter: Duration) -> Result<()> {
        let mut state = self.lock_state();
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!(target: "eppo", "polling is already running, ignoring start");
            return Ok(());
        }

        log::debug!(target: "eppo", "starting poller");
        state.settings = Some((interval, jitter));
        self.schedule(&mut state, interval, jitter)
    }

    /// Cancel the pending tick. The timer thread stays alive for [`Poller::resume`].
    pub(crate) fn pause(&self) {
        let state = self.lock_state();
        self.running.store(false, Ordering::SeqCst);
        if let Some(timer) = &state.timer {
            let _ = timer.commands.send(TimerCommand::Cancel);
        }
        log::debug!(target: "eppo", "poller paused");
    }

    /// Resume polling with the settings of the last `start`. Does nothing if polling was never
    /// started or is running.
    pub(crate) fn resume(&self) -> Result<()> {
        let mut state = self.lock_state();
        let Some((interval, jitter)) = state.settings else {
            log::warn!(target: "eppo", "polling was never started, ignoring resume");
            return Ok(());
        };
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!(target: "eppo", "polling is already running, ignoring resume");
            return Ok(());
        }

        log::debug!(target: "eppo", "resuming poller");
        self.schedule(&mut state, interval, jitter)
    }

    /// Cancel the pending tick and shut the timer thread down.
    pub(crate) fn stop(&self) {
        let mut state = self.lock_state();
        self.running.store(false, Ordering::SeqCst);
        // Dropping the sender disconnects the channel, which ends the timer thread.
        if state.timer.take().is_some() {
            log::debug!(target: "eppo", "poller stopped");
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn schedule(
        &self,
        state: &mut PollerState,
        interval: Duration,
        jitter: Duration,
    ) -> Result<()> {
        let delay = jittered(interval, jitter);

        if let Some(timer) = &state.timer {
            if timer.commands.send(TimerCommand::Schedule(delay)).is_ok() {
                return Ok(());
            }
        }

        let (commands, receiver) = channel();
        // Cannot fail: the receiver is alive until the thread spawned below exits.
        let _ = commands.send(TimerCommand::Schedule(delay));

        let tick = self.tick.clone();
        let running = self.running.clone();
        let join_handle = std::thread::Builder::new()
            .name("eppo-poller".to_owned())
            .spawn(move || timer_loop(receiver, tick, running, interval, jitter));

        match join_handle {
            Ok(join_handle) => {
                state.timer = Some(TimerThread {
                    commands,
                    _join_handle: join_handle,
                });
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn timer_loop(
    commands: Receiver<TimerCommand>,
    tick: Tick,
    running: Arc<AtomicBool>,
    interval: Duration,
    jitter: Duration,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => {
                commands.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
        };

        match command {
            Ok(TimerCommand::Schedule(delay)) => deadline = Some(Instant::now() + delay),
            Ok(TimerCommand::Cancel) => deadline = None,
            Err(RecvTimeoutError::Timeout) => {
                deadline = None;
                log::debug!(target: "eppo", "polling for new configuration");
                if let Err(err) = tick() {
                    log::warn!(target: "eppo", "failed to poll for new configuration: {err}");
                }
                if running.load(Ordering::SeqCst) {
                    deadline = Some(Instant::now() + jittered(interval, jitter));
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!(target: "eppo", "poller thread exiting");
                return;
            }
        }
    }
}

/// Apply a random jitter to `interval`.
fn jittered(interval: Duration, jitter: Duration) -> Duration {
    interval + thread_rng().gen_range(Duration::ZERO..=jitter)
}
