//! Countdown and interval timers advanced once per fixed simulation step
//!
//! Timers are created detached and start running only when handed to a
//! [`TimerRegistry`]. The registry advances every live timer in registration
//! order and sweeps finished ones after the whole pass, so a timer stopping
//! during the pass never disturbs the iteration.

use log::debug;
use std::fmt;
use std::time::Duration;

/// Upper bound for [`TimerRegistry::set_time_scale`]
pub const MAX_TIME_SCALE: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Advances by the step multiplied by the registry's time scale
    Scaled,
    /// Advances by the raw step regardless of time scale
    Unscaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCycle {
    Standby,
    Running,
    Paused,
    Stopped,
}

type Callback = Box<dyn FnMut() + Send>;

pub struct Timer {
    kind: TimerKind,
    cycle: TimerCycle,
    interval: Option<Duration>,
    timeout: Option<Duration>,
    elapsed_interval: Duration,
    elapsed_timeout: Duration,
    on_step: Option<Callback>,
    on_interval: Option<Callback>,
    on_timeout: Option<Callback>,
    on_pause: Option<Callback>,
    on_resume: Option<Callback>,
    on_stop: Option<Callback>,
}

impl Timer {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            cycle: TimerCycle::Standby,
            interval: None,
            timeout: None,
            elapsed_interval: Duration::ZERO,
            elapsed_timeout: Duration::ZERO,
            on_step: None,
            on_interval: None,
            on_timeout: None,
            on_pause: None,
            on_resume: None,
            on_stop: None,
        }
    }

    /// One-shot timer firing `callback` after `duration`.
    pub fn timeout(kind: TimerKind, duration: Duration, callback: impl FnMut() + Send + 'static) -> Self {
        Self::new(kind).with_timeout(duration).on_timeout(callback)
    }

    /// Endless timer firing `callback` every `duration`.
    pub fn interval(kind: TimerKind, duration: Duration, callback: impl FnMut() + Send + 'static) -> Self {
        Self::new(kind).with_interval(duration).on_interval(callback)
    }

    /// A zero interval is treated as no interval.
    pub fn with_interval(mut self, duration: Duration) -> Self {
        self.interval = (!duration.is_zero()).then_some(duration);
        self
    }

    /// A zero timeout fires on the first running step.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn on_step(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_step = Some(Box::new(callback));
        self
    }

    pub fn on_interval(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_interval = Some(Box::new(callback));
        self
    }

    pub fn on_timeout(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_timeout = Some(Box::new(callback));
        self
    }

    pub fn on_pause(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_pause = Some(Box::new(callback));
        self
    }

    pub fn on_resume(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_resume = Some(Box::new(callback));
        self
    }

    pub fn on_stop(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_stop = Some(Box::new(callback));
        self
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn cycle(&self) -> TimerCycle {
        self.cycle
    }

    pub fn interval_duration(&self) -> Option<Duration> {
        self.interval
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn elapsed_interval(&self) -> Duration {
        self.elapsed_interval
    }

    pub fn elapsed_timeout(&self) -> Duration {
        self.elapsed_timeout
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.timeout
            .map(|timeout| timeout.saturating_sub(self.elapsed_timeout))
    }

    /// Advances a running timer by `step`.
    ///
    /// Time credited past the timeout is discarded, so a timer with both an
    /// interval and a timeout fires the interval `floor(timeout / interval)`
    /// times no matter how the steps are sized, always before the timeout.
    fn advance(&mut self, step: Duration) {
        if self.cycle != TimerCycle::Running {
            return;
        }

        let credit = match self.timeout {
            Some(timeout) => step.min(timeout.saturating_sub(self.elapsed_timeout)),
            None => step,
        };

        if self.timeout.is_some() {
            self.elapsed_timeout = self.elapsed_timeout.saturating_add(credit);
        }

        invoke(&mut self.on_step);

        if let Some(interval) = self.interval {
            self.elapsed_interval = self.elapsed_interval.saturating_add(credit);
            while self.elapsed_interval >= interval {
                self.elapsed_interval -= interval;
                invoke(&mut self.on_interval);
            }
        }

        if let Some(timeout) = self.timeout {
            if self.elapsed_timeout >= timeout {
                self.cycle = TimerCycle::Stopped;
                invoke(&mut self.on_timeout);
            }
        }
    }

    fn start(&mut self) {
        if self.cycle == TimerCycle::Standby {
            self.cycle = TimerCycle::Running;
        }
    }

    pub fn pause(&mut self) -> bool {
        if self.cycle != TimerCycle::Running {
            return false;
        }

        self.cycle = TimerCycle::Paused;
        invoke(&mut self.on_pause);
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.cycle != TimerCycle::Paused {
            return false;
        }

        self.cycle = TimerCycle::Running;
        invoke(&mut self.on_resume);
        true
    }

    pub fn stop(&mut self) -> bool {
        if !matches!(self.cycle, TimerCycle::Running | TimerCycle::Paused) {
            return false;
        }

        self.cycle = TimerCycle::Stopped;
        invoke(&mut self.on_stop);
        true
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("kind", &self.kind)
            .field("cycle", &self.cycle)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("elapsed_interval", &self.elapsed_interval)
            .field("elapsed_timeout", &self.elapsed_timeout)
            .finish()
    }
}

fn invoke(callback: &mut Option<Callback>) {
    if let Some(callback) = callback.as_mut() {
        callback();
    }
}

/// Handle to a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Entry {
    id: TimerId,
    name: Option<String>,
    timer: Timer,
}

/// Owns every registered timer and advances them once per fixed step.
pub struct TimerRegistry {
    entries: Vec<Entry>,
    next_id: u64,
    time_scale: f32,
    paused: bool,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            time_scale: 1.0,
            paused: false,
        }
    }

    pub fn register(&mut self, timer: Timer) -> TimerId {
        self.insert(None, timer)
    }

    /// Registers `timer` under `name`, stopping any live timer already
    /// registered under that name.
    pub fn register_named(&mut self, name: impl Into<String>, timer: Timer) -> TimerId {
        let name = name.into();

        if let Some(previous) = self.find(&name) {
            debug!("Replacing timer {:?}", name);
            self.stop(previous);
        }

        self.insert(Some(name), timer)
    }

    fn insert(&mut self, name: Option<String>, mut timer: Timer) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        timer.start();
        self.entries.push(Entry { id, name, timer });
        id
    }

    /// Advances every running timer by `step` and removes the ones that
    /// finished or were stopped.
    pub fn fixed_update(&mut self, step: Duration) {
        if self.paused {
            return;
        }

        let scaled = if self.time_scale == 1.0 {
            step
        } else {
            Duration::try_from_secs_f64(step.as_secs_f64() * f64::from(self.time_scale))
                .unwrap_or(Duration::MAX)
        };

        for entry in self.entries.iter_mut() {
            let step = match entry.timer.kind {
                TimerKind::Scaled => scaled,
                TimerKind::Unscaled => step,
            };
            entry.timer.advance(step);
        }

        self.sweep();
    }

    fn sweep(&mut self) {
        self.entries
            .retain(|entry| entry.timer.cycle != TimerCycle::Stopped);
    }

    fn entry_mut(&mut self, id: TimerId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    pub fn pause(&mut self, id: TimerId) -> bool {
        self.entry_mut(id)
            .map(|entry| entry.timer.pause())
            .unwrap_or(false)
    }

    pub fn resume(&mut self, id: TimerId) -> bool {
        self.entry_mut(id)
            .map(|entry| entry.timer.resume())
            .unwrap_or(false)
    }

    /// Stops the timer; it is removed after the next fixed update.
    pub fn stop(&mut self, id: TimerId) -> bool {
        self.entry_mut(id)
            .map(|entry| entry.timer.stop())
            .unwrap_or(false)
    }

    pub fn get(&self, id: TimerId) -> Option<&Timer> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| &entry.timer)
    }

    /// Live timer registered under `name`.
    pub fn find(&self, name: &str) -> Option<TimerId> {
        self.entries
            .iter()
            .find(|entry| {
                entry.name.as_deref() == Some(name) && entry.timer.cycle != TimerCycle::Stopped
            })
            .map(|entry| entry.id)
    }

    pub fn is_live(&self, id: TimerId) -> bool {
        self.get(id)
            .map(|timer| timer.cycle != TimerCycle::Stopped)
            .unwrap_or(false)
    }

    /// Number of timers that have not stopped.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.timer.cycle != TimerCycle::Stopped)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pause_all(&mut self) {
        self.paused = true;
    }

    pub fn resume_all(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Negative or NaN scales are clamped to zero, anything above
    /// [`MAX_TIME_SCALE`] to that bound.
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = if scale > 0.0 {
            scale.min(MAX_TIME_SCALE)
        } else {
            0.0
        };
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// Drops every timer without invoking callbacks.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
