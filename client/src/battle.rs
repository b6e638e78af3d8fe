//! Match flow and per-tick peer synchronization
//!
//! A [`BattleSession`] drives the phase machine
//! `SceneEntering -> CountDown -> BattleStart -> Battle -> BattleEnd`, with
//! `ConnectError` reachable from every phase that talks to the peer. Each
//! tick runs, in order:
//!
//! 1. the machine's `update` (pending transition, then the connection check,
//!    draining both channels, and sending our handle position),
//! 2. the machine's `fixed_update` (table kinematics, contacts, own goals),
//! 3. the timer registry, whose callbacks only queue [`BattleEvent`]s,
//! 4. the queued events, which may request the next transition,
//! 5. the machine's `late_update`.
//!
//! Every outbound position and velocity is mirrored once, on send. Incoming
//! values are applied as they arrive, last writer wins.

use crate::config::{BattleConfig, PeerConfig};
use crate::error::SendError;
use crate::network::{Channel, PeerLink};
use crate::rendezvous::Role;
use crate::state_machine::{State, StateMachine, StateMachineError, Transitions};
use crate::table::Table;
use crate::timer::{Timer, TimerKind, TimerRegistry};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    CountdownTick, GoalEvent, HandlePosition, PeerMessage, PuckState, ThrowInEvent, TimeUp, Vec3,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

const COUNTDOWN_TIMER: &str = "countdown";
const COUNTDOWN_SYNC_TIMER: &str = "countdown-sync";
const BATTLE_TIMER: &str = "battle";
const ONE_SECOND: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SceneEntering,
    CountDown,
    BattleStart,
    Battle,
    BattleEnd,
    ConnectError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BattleResult {
    pub own: u32,
    pub opponent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleOutcome {
    Finished(BattleResult),
    Disconnected,
}

/// Notifications for whatever presents the match to the player.
pub trait BattleView {
    fn show_count(&mut self, count: i32);
    fn show_battle_start(&mut self);
    fn show_remaining(&mut self, seconds: i32);
    fn show_goal_scored(&mut self);
    fn show_goal_conceded(&mut self);
    fn hide_goal(&mut self);
    fn show_score(&mut self, score: BattleResult);
    fn show_battle_end(&mut self, result: BattleResult);
    fn show_connection_lost(&mut self);
}

/// Writes every notification to the log; used by the headless binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogView;

impl BattleView for LogView {
    fn show_count(&mut self, count: i32) {
        info!("{}", count);
    }

    fn show_battle_start(&mut self) {
        info!("BATTLE START!");
    }

    fn show_remaining(&mut self, seconds: i32) {
        debug!("{}s left", seconds);
    }

    fn show_goal_scored(&mut self) {
        info!("GOAL! The puck reappears on the opponent's side");
    }

    fn show_goal_conceded(&mut self) {
        info!("Own goal... the puck reappears on our side");
    }

    fn hide_goal(&mut self) {}

    fn show_score(&mut self, score: BattleResult) {
        info!("Score {} - {}", score.own, score.opponent);
    }

    fn show_battle_end(&mut self, result: BattleResult) {
        info!("Battle over: {} - {}", result.own, result.opponent);
    }

    fn show_connection_lost(&mut self) {
        warn!("Connection to the opponent was lost");
    }
}

/// Queued by timer callbacks and handled after the timer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BattleEvent {
    CountdownInterval,
    CountdownTimeout,
    CountdownSynced,
    BattleInterval,
    BattleTimeout,
    ThrowNewPuck,
    RespawnPuck(i32),
}

/// Delay before the non-master's local countdown step, compensating for the
/// time the master's tick spent in flight. Never negative.
pub fn countdown_sync_delay(sent_at_ms: u64, received_at_ms: u64) -> Duration {
    let lag = received_at_ms.saturating_sub(sent_at_ms);
    Duration::from_millis(1000u64.saturating_sub(lag))
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

struct BattleContext<L, V> {
    link: L,
    view: V,
    config: BattleConfig,
    role: Role,
    phase: Phase,
    table: Table,
    timers: TimerRegistry,
    events: mpsc::UnboundedSender<BattleEvent>,
    event_queue: mpsc::UnboundedReceiver<BattleEvent>,
    count_down: i32,
    battle_remaining: i32,
    score: BattleResult,
    link_failed: bool,
    /// Set by the connection check; the rest of that tick is skipped
    disconnected: bool,
    outcome: Option<BattleOutcome>,
    step: f32,
    rng: StdRng,
    clock: fn() -> u64,
}

fn go(next: &mut Transitions<Phase>, phase: Phase) {
    if let Err(e) = next.goto(phase) {
        error!("Battle transition failed: {}", e);
    }
}

/// Timer callback queueing `event` for the next event pass.
fn emit(
    events: &mpsc::UnboundedSender<BattleEvent>,
    event: BattleEvent,
) -> impl FnMut() + Send + 'static {
    let events = events.clone();
    move || {
        let _ = events.send(event);
    }
}

fn seconds(value: f32) -> Duration {
    Duration::try_from_secs_f32(value).unwrap_or(Duration::ZERO)
}

impl<L: PeerLink, V: BattleView> BattleContext<L, V> {
    fn send(&mut self, channel: Channel, message: PeerMessage) {
        match self.link.send(channel, &message) {
            Ok(()) => {}
            Err(SendError::WouldBlock) => {
                debug!("Dropped {} datagram", message.type_name());
            }
            Err(e) => {
                warn!("Failed to send {}: {}", message.type_name(), e);
                self.link_failed = true;
            }
        }
    }

    /// Sends the current motion of a local puck, mirrored for the peer.
    fn sync_puck(&mut self, id: i32) -> bool {
        let Some(puck) = self.table.puck(id) else {
            return false;
        };
        let state = PuckState {
            id,
            position: puck.position.mirrored(),
            velocity: puck.velocity.mirrored(),
        };

        self.send(Channel::Reliable, state.into());
        true
    }

    fn throw_in(&mut self, id: i32, position: Vec3, velocity: Vec3) {
        self.table.throw_in(id, position, velocity);
        let event = ThrowInEvent {
            id,
            position: position.mirrored(),
            velocity: velocity.mirrored(),
        };

        self.send(Channel::Reliable, event.into());
    }

    fn link_down(&self) -> bool {
        self.link_failed || self.link.receive_failed()
    }

    /// Connection check followed by draining both channels, datagrams first.
    ///
    /// Returns false if the link is down; the caller must skip the rest of
    /// its per-tick synchronization.
    fn process_received(&mut self, next: &mut Transitions<Phase>) -> bool {
        if self.link_down() {
            self.disconnected = true;
            go(next, Phase::ConnectError);
            return false;
        }

        for channel in [Channel::Unreliable, Channel::Reliable] {
            while self.link.has_pending(channel) {
                let Some(body) = self.link.poll(channel) else {
                    break;
                };

                match shared::decode(&body) {
                    Ok(message) => self.dispatch(message, next),
                    Err(e) => warn!("Dropping message on {:?} channel: {}", channel, e),
                }
            }
        }

        true
    }

    fn dispatch(&mut self, message: PeerMessage, next: &mut Transitions<Phase>) {
        match message {
            PeerMessage::HandlePosition(handle) => {
                if handle.id == self.role.opponent_handle_id() {
                    self.table.set_opponent_handle(handle.position);
                }
            }
            PeerMessage::PuckState(puck) => {
                self.table
                    .apply_puck_state(puck.id, puck.position, puck.velocity);
            }
            PeerMessage::Goal(goal) => {
                if !self.table.mark_scored(goal.id) {
                    debug!("Goal for unknown puck {}", goal.id);
                }
                self.score.own += 1;
                self.view.show_goal_scored();
                self.view.show_score(self.score);
            }
            PeerMessage::ThrowIn(throw_in) => {
                let was_scored = self
                    .table
                    .puck(throw_in.id)
                    .map(|puck| puck.scored)
                    .unwrap_or(false);
                self.table
                    .throw_in(throw_in.id, throw_in.position, throw_in.velocity);
                if was_scored {
                    self.view.hide_goal();
                }
            }
            PeerMessage::CountdownTick(tick) => self.on_countdown_tick(tick, next),
            PeerMessage::TimeUp(_) => {
                if !self.role.is_master() && self.phase == Phase::Battle {
                    info!("Opponent called time up");
                    go(next, Phase::BattleEnd);
                }
            }
        }
    }

    fn on_countdown_tick(&mut self, tick: CountdownTick, next: &mut Transitions<Phase>) {
        if self.role.is_master() || self.phase != Phase::CountDown {
            return;
        }

        let received_at = (self.clock)();
        self.count_down = tick.remaining;
        self.view.show_count(tick.remaining);

        if tick.remaining <= 0 {
            go(next, Phase::BattleStart);
            return;
        }

        let delay = countdown_sync_delay(tick.sent_at, received_at);
        debug!(
            "Countdown {} arrived after {}ms",
            tick.remaining,
            received_at.saturating_sub(tick.sent_at)
        );
        let timer = Timer::timeout(
            TimerKind::Scaled,
            delay,
            emit(&self.events, BattleEvent::CountdownSynced),
        );
        self.timers.register_named(COUNTDOWN_SYNC_TIMER, timer);
    }

    fn handle_events(&mut self, next: &mut Transitions<Phase>) {
        while let Ok(event) = self.event_queue.try_recv() {
            if self.outcome.is_some() {
                continue;
            }

            match event {
                BattleEvent::CountdownInterval => {
                    self.count_down -= 1;
                    self.view.show_count(self.count_down);
                    let tick = CountdownTick {
                        remaining: self.count_down,
                        sent_at: (self.clock)(),
                    };
                    self.send(Channel::Reliable, tick.into());
                }
                BattleEvent::CountdownTimeout => go(next, Phase::BattleStart),
                BattleEvent::CountdownSynced => {
                    if self.phase != Phase::CountDown {
                        continue;
                    }
                    self.count_down -= 1;
                    self.view.show_count(self.count_down);
                    if self.count_down <= 0 {
                        go(next, Phase::BattleStart);
                    }
                }
                BattleEvent::BattleInterval => {
                    self.battle_remaining -= 1;
                    self.view.show_remaining(self.battle_remaining);
                }
                BattleEvent::BattleTimeout => {
                    if self.role.is_master() {
                        self.send(Channel::Reliable, TimeUp {}.into());
                        go(next, Phase::BattleEnd);
                    }
                }
                BattleEvent::ThrowNewPuck => self.throw_new_puck(),
                BattleEvent::RespawnPuck(id) => {
                    if self.phase != Phase::Battle {
                        continue;
                    }
                    let position = self.table.respawn_position(id);
                    self.throw_in(id, position, Vec3::ZERO);
                    self.view.hide_goal();
                }
            }
        }
    }

    fn throw_new_puck(&mut self) {
        let id = self.table.next_puck_id();
        let left = self.rng.gen::<bool>();
        let master_side = self.rng.gen::<bool>();
        let (position, velocity) = self.table.hopper(left, master_side);

        info!("Throwing in puck {}", id);
        self.throw_in(id, position, velocity);
    }

    fn finish(&mut self, outcome: BattleOutcome) {
        self.timers.clear();
        self.outcome = Some(outcome);
    }
}

fn on_start_scene_entering<L: PeerLink, V: BattleView>(
    ctx: &mut BattleContext<L, V>,
    next: &mut Transitions<Phase>,
) {
    ctx.phase = Phase::SceneEntering;
    info!("Entering battle as {:?}", ctx.role);
    ctx.score = BattleResult::default();
    ctx.view.show_score(ctx.score);
    go(next, Phase::CountDown);
}

fn on_start_count_down<L: PeerLink, V: BattleView>(
    ctx: &mut BattleContext<L, V>,
    _next: &mut Transitions<Phase>,
) {
    ctx.phase = Phase::CountDown;
    ctx.count_down = ctx.config.countdown_secs as i32;
    ctx.view.show_count(ctx.count_down);

    if ctx.role.is_master() {
        let timer = Timer::new(TimerKind::Scaled)
            .with_interval(ONE_SECOND)
            .with_timeout(Duration::from_secs(u64::from(ctx.config.countdown_secs)))
            .on_interval(emit(&ctx.events, BattleEvent::CountdownInterval))
            .on_timeout(emit(&ctx.events, BattleEvent::CountdownTimeout));
        ctx.timers.register_named(COUNTDOWN_TIMER, timer);
    }
}

fn on_update_count_down<L: PeerLink, V: BattleView>(
    ctx: &mut BattleContext<L, V>,
    next: &mut Transitions<Phase>,
) {
    ctx.process_received(next);
}

fn on_start_battle_start<L: PeerLink, V: BattleView>(
    ctx: &mut BattleContext<L, V>,
    next: &mut Transitions<Phase>,
) {
    ctx.phase = Phase::BattleStart;
    ctx.view.show_battle_start();
    go(next, Phase::Battle);
}

fn on_start_battle<L: PeerLink, V: BattleView>(
    ctx: &mut BattleContext<L, V>,
    _next: &mut Transitions<Phase>,
) {
    ctx.phase = Phase::Battle;
    ctx.battle_remaining = ctx.config.battle_secs as i32;
    ctx.view.show_remaining(ctx.battle_remaining);

    let timer = Timer::new(TimerKind::Scaled)
        .with_interval(ONE_SECOND)
        .with_timeout(Duration::from_secs(u64::from(ctx.config.battle_secs)))
        .on_interval(emit(&ctx.events, BattleEvent::BattleInterval))
        .on_timeout(emit(&ctx.events, BattleEvent::BattleTimeout));
    ctx.timers.register_named(BATTLE_TIMER, timer);

    if ctx.role.is_master() {
        for at in ctx.config.throw_in_times.clone() {
            let timer = Timer::timeout(
                TimerKind::Scaled,
                seconds(at),
                emit(&ctx.events, BattleEvent::ThrowNewPuck),
            );
            ctx.timers.register(timer);
        }
    }
}

fn on_update_battle<L: PeerLink, V: BattleView>(
    ctx: &mut BattleContext<L, V>,
    next: &mut Transitions<Phase>,
) {
    if !ctx.process_received(next) {
        return;
    }

    ctx.table.track_nearest_puck();
    let handle = HandlePosition {
        id: ctx.role.handle_id(),
        position: ctx.table.self_handle().position.mirrored(),
    };
    ctx.send(Channel::Unreliable, handle.into());
}

fn on_fixed_update_battle<L: PeerLink, V: BattleView>(
    ctx: &mut BattleContext<L, V>,
    _next: &mut Transitions<Phase>,
) {
    let report = ctx.table.step(ctx.step);

    for id in report.contacts {
        ctx.sync_puck(id);
    }

    for id in report.own_goals {
        info!("Puck {} went into our goal", id);
        ctx.send(Channel::Reliable, GoalEvent { id }.into());
        ctx.score.opponent += 1;
        ctx.view.show_goal_conceded();
        ctx.view.show_score(ctx.score);

        let timer = Timer::timeout(
            TimerKind::Scaled,
            seconds(ctx.config.goal_respawn_secs),
            emit(&ctx.events, BattleEvent::RespawnPuck(id)),
        );
        ctx.timers.register_named(format!("respawn-{}", id), timer);
    }
}

fn on_start_battle_end<L: PeerLink, V: BattleView>(
    ctx: &mut BattleContext<L, V>,
    _next: &mut Transitions<Phase>,
) {
    ctx.phase = Phase::BattleEnd;
    ctx.view.show_battle_end(ctx.score);
    ctx.finish(BattleOutcome::Finished(ctx.score));
}

fn on_start_connect_error<L: PeerLink, V: BattleView>(
    ctx: &mut BattleContext<L, V>,
    _next: &mut Transitions<Phase>,
) {
    ctx.phase = Phase::ConnectError;
    ctx.view.show_connection_lost();
    ctx.finish(BattleOutcome::Disconnected);
}

/// One match between this peer and its opponent.
pub struct BattleSession<L, V> {
    machine: StateMachine<Phase, BattleContext<L, V>>,
    ctx: BattleContext<L, V>,
}

impl<L: PeerLink, V: BattleView> BattleSession<L, V> {
    pub fn new(link: L, view: V, config: &PeerConfig) -> Result<Self, StateMachineError> {
        let (events, event_queue) = mpsc::unbounded_channel();
        let role = link.role();

        let ctx = BattleContext {
            link,
            view,
            config: config.battle.clone(),
            role,
            phase: Phase::SceneEntering,
            table: Table::new(&config.table),
            timers: TimerRegistry::new(),
            events,
            event_queue,
            count_down: config.battle.countdown_secs as i32,
            battle_remaining: config.battle.battle_secs as i32,
            score: BattleResult::default(),
            link_failed: false,
            disconnected: false,
            outcome: None,
            step: config.battle.tick_duration().as_secs_f32(),
            rng: StdRng::from_entropy(),
            clock: unix_millis,
        };

        let mut machine: StateMachine<Phase, BattleContext<L, V>> = StateMachine::new();
        machine.add_state(
            State::new(Phase::SceneEntering).on_start(on_start_scene_entering::<L, V>),
        )?;
        machine.add_state(
            State::new(Phase::CountDown)
                .on_start(on_start_count_down::<L, V>)
                .on_update(on_update_count_down::<L, V>),
        )?;
        machine.add_state(
            State::new(Phase::BattleStart).on_start(on_start_battle_start::<L, V>),
        )?;
        machine.add_state(
            State::new(Phase::Battle)
                .on_start(on_start_battle::<L, V>)
                .on_update(on_update_battle::<L, V>)
                .on_fixed_update(on_fixed_update_battle::<L, V>),
        )?;
        machine.add_state(
            State::new(Phase::BattleEnd).on_start(on_start_battle_end::<L, V>),
        )?;
        machine.add_state(
            State::new(Phase::ConnectError).on_start(on_start_connect_error::<L, V>),
        )?;
        machine.goto(Phase::SceneEntering)?;

        Ok(Self { machine, ctx })
    }

    /// Replaces the wall clock used to stamp and measure countdown ticks.
    pub fn set_clock(&mut self, clock: fn() -> u64) {
        self.ctx.clock = clock;
    }

    pub fn seed_rng(&mut self, seed: u64) {
        self.ctx.rng = StdRng::seed_from_u64(seed);
    }

    /// Advances the match by one fixed step.
    ///
    /// A lost link moves straight to `ConnectError`, overriding any pending
    /// transition. A failure first seen inside `update`, on receive or on
    /// send, ends the tick there so no timers fire and nothing more is sent.
    pub fn tick(&mut self, dt: Duration) {
        if self.ctx.outcome.is_some() {
            return;
        }

        self.ctx.step = dt.as_secs_f32();

        if self.ctx.disconnected || self.ctx.link_down() {
            self.ctx.disconnected = true;
            go(self.machine.transitions_mut(), Phase::ConnectError);
            self.machine.update(&mut self.ctx);
            return;
        }

        self.machine.update(&mut self.ctx);
        if self.ctx.disconnected || self.ctx.link_failed {
            self.ctx.disconnected = true;
            return;
        }

        self.machine.fixed_update(&mut self.ctx);
        self.ctx.timers.fixed_update(dt);
        self.ctx.handle_events(self.machine.transitions_mut());
        self.machine.late_update(&mut self.ctx);
    }

    /// Sends a local puck's current motion to the peer.
    pub fn sync_puck(&mut self, id: i32) -> bool {
        self.ctx.sync_puck(id)
    }

    pub fn phase(&self) -> Option<Phase> {
        self.machine.current()
    }

    pub fn outcome(&self) -> Option<BattleOutcome> {
        self.ctx.outcome
    }

    pub fn is_finished(&self) -> bool {
        self.ctx.outcome.is_some()
    }

    pub fn role(&self) -> Role {
        self.ctx.role
    }

    pub fn score(&self) -> BattleResult {
        self.ctx.score
    }

    pub fn count_down(&self) -> i32 {
        self.ctx.count_down
    }

    pub fn battle_remaining(&self) -> i32 {
        self.ctx.battle_remaining
    }

    pub fn table(&self) -> &Table {
        &self.ctx.table
    }

    pub fn table_mut(&mut self) -> &mut Table {
        &mut self.ctx.table
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.ctx.timers
    }

    pub fn link(&self) -> &L {
        &self.ctx.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.ctx.link
    }

    pub fn view(&self) -> &V {
        &self.ctx.view
    }
}
