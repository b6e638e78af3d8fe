//! Headless table model: the two handles and every puck in play
//!
//! Stands in for a physics engine with plain kinematics so the peer can run
//! without a renderer. All coordinates are in this peer's own frame: our
//! goal is at negative z, the opponent's at positive z.

use crate::config::TableConfig;
use log::debug;
use shared::Vec3;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Handle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub destination: Vec3,
}

impl Handle {
    fn at(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            destination: position,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Puck {
    pub id: i32,
    pub position: Vec3,
    pub velocity: Vec3,
    /// Where the puck was last thrown in from
    pub spawn: Vec3,
    /// A scored puck is frozen and ignores contacts until thrown in again
    pub scored: bool,
}

impl Puck {
    pub fn new(id: i32, position: Vec3, velocity: Vec3) -> Self {
        Self {
            id,
            position,
            velocity,
            spawn: position,
            scored: false,
        }
    }
}

/// Events produced by one fixed step that need to reach the peer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StepReport {
    /// Pucks struck by our handle this step
    pub contacts: Vec<i32>,
    /// Pucks that crossed our own goal line this step
    pub own_goals: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct Table {
    config: TableConfig,
    self_handle: Handle,
    opponent_handle: Vec3,
    pucks: BTreeMap<i32, Puck>,
}

impl Table {
    pub fn new(config: &TableConfig) -> Self {
        Self {
            config: config.clone(),
            self_handle: Handle::at(Vec3::new(0.0, 0.0, config.self_handle_start_z)),
            opponent_handle: Vec3::new(0.0, 0.0, config.opponent_handle_start_z),
            pucks: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn self_handle(&self) -> &Handle {
        &self.self_handle
    }

    pub fn opponent_handle(&self) -> Vec3 {
        self.opponent_handle
    }

    pub fn set_opponent_handle(&mut self, position: Vec3) {
        self.opponent_handle = position;
    }

    /// Points the self handle at `target`, clamped to our half of the table.
    pub fn set_destination(&mut self, target: Vec3) {
        let limit_x = (self.config.half_width - self.config.handle_radius).max(0.0);
        let limit_z = (self.config.goal_line_z - self.config.handle_radius).max(0.0);

        self.self_handle.destination = Vec3::new(
            target.x.clamp(-limit_x, limit_x),
            self.self_handle.position.y,
            target.z.clamp(-limit_z, 0.0),
        );
    }

    /// Chases the closest live puck on our half, or returns to the start
    /// position when there is none.
    pub fn track_nearest_puck(&mut self) {
        let handle = self.self_handle.position;
        let target = self
            .pucks
            .values()
            .filter(|puck| !puck.scored && puck.position.z <= 0.0)
            .min_by(|a, b| {
                let da = a.position.horizontal_distance(handle);
                let db = b.position.horizontal_distance(handle);
                da.total_cmp(&db)
            })
            .map(|puck| puck.position)
            .unwrap_or(Vec3::new(0.0, 0.0, self.config.self_handle_start_z));

        self.set_destination(target);
    }

    pub fn pucks(&self) -> impl Iterator<Item = &Puck> {
        self.pucks.values()
    }

    pub fn puck(&self, id: i32) -> Option<&Puck> {
        self.pucks.get(&id)
    }

    pub fn puck_count(&self) -> usize {
        self.pucks.len()
    }

    /// Smallest id above every puck currently tracked.
    pub fn next_puck_id(&self) -> i32 {
        self.pucks
            .keys()
            .next_back()
            .map(|id| id.saturating_add(1))
            .unwrap_or(0)
    }

    /// Overwrites a puck's motion, creating the puck on first sight.
    pub fn apply_puck_state(&mut self, id: i32, position: Vec3, velocity: Vec3) {
        let puck = self
            .pucks
            .entry(id)
            .or_insert_with(|| Puck::new(id, position, velocity));
        puck.position = position;
        puck.velocity = velocity;
    }

    /// Returns false if no puck has this id.
    pub fn mark_scored(&mut self, id: i32) -> bool {
        match self.pucks.get_mut(&id) {
            Some(puck) => {
                puck.scored = true;
                puck.velocity = Vec3::ZERO;
                true
            }
            None => false,
        }
    }

    /// Puts a puck back in play, creating it if needed.
    pub fn throw_in(&mut self, id: i32, position: Vec3, velocity: Vec3) -> &Puck {
        let puck = self
            .pucks
            .entry(id)
            .or_insert_with(|| Puck::new(id, position, velocity));
        puck.position = position;
        puck.velocity = velocity;
        puck.spawn = position;
        puck.scored = false;
        puck
    }

    /// Where a puck scored into our goal reappears: our side, at rest.
    pub fn respawn_position(&self, id: i32) -> Vec3 {
        let spawn = self
            .pucks
            .get(&id)
            .map(|puck| puck.spawn)
            .unwrap_or(Vec3::ZERO);
        Vec3::new(spawn.x, spawn.y, -self.config.respawn_offset_z)
    }

    /// Launch position and velocity for one of the four hoppers.
    ///
    /// `master_side` is the negative-z half in the master's frame.
    pub fn hopper(&self, left: bool, master_side: bool) -> (Vec3, Vec3) {
        let x = if left {
            -self.config.hopper_x
        } else {
            self.config.hopper_x
        };
        let z = if master_side {
            -self.config.hopper_z
        } else {
            self.config.hopper_z
        };

        let position = Vec3::new(x, 0.0, z);
        let toward_centre = Vec3::new(-x, 0.0, -z);
        let length = toward_centre.length();
        let velocity = if length > f32::EPSILON {
            toward_centre * (self.config.hopper_speed / length)
        } else {
            Vec3::ZERO
        };

        (position, velocity)
    }

    pub fn step(&mut self, dt: f32) -> StepReport {
        self.update_handle(dt);
        self.update_pucks(dt)
    }

    fn update_handle(&mut self, dt: f32) {
        let handle = &mut self.self_handle;
        let offset = handle.destination - handle.position;
        let distance = offset.length();
        let reach = self.config.handle_speed * dt;

        if distance <= reach || distance <= f32::EPSILON {
            handle.velocity = if dt > 0.0 { offset * (1.0 / dt) } else { Vec3::ZERO };
            handle.position = handle.destination;
        } else {
            handle.velocity = offset * (self.config.handle_speed / distance);
            handle.position = handle.position + handle.velocity * dt;
        }
    }

    fn update_pucks(&mut self, dt: f32) -> StepReport {
        let mut report = StepReport::default();
        let wall = self.config.half_width - self.config.puck_radius;
        let reach = self.config.handle_radius + self.config.puck_radius;
        let handle = self.self_handle.clone();

        for puck in self.pucks.values_mut() {
            if puck.scored {
                continue;
            }

            puck.position = puck.position + puck.velocity * dt;

            if puck.position.x > wall {
                puck.position.x = wall;
                puck.velocity.x = -puck.velocity.x.abs();
            } else if puck.position.x < -wall {
                puck.position.x = -wall;
                puck.velocity.x = puck.velocity.x.abs();
            }

            if resolve_contact(puck, &handle, reach) {
                debug!("Handle struck puck {}", puck.id);
                report.contacts.push(puck.id);
            }

            if puck.position.z < -self.config.goal_line_z {
                puck.scored = true;
                puck.velocity = Vec3::ZERO;
                report.own_goals.push(puck.id);
            } else if puck.position.z > self.config.goal_line_z {
                // the opponent reports this one
                puck.scored = true;
                puck.velocity = Vec3::ZERO;
            }
        }

        report
    }
}

/// Reflects the puck off the handle if they overlap and are closing.
fn resolve_contact(puck: &mut Puck, handle: &Handle, reach: f32) -> bool {
    let offset = Vec3::new(
        puck.position.x - handle.position.x,
        0.0,
        puck.position.z - handle.position.z,
    );
    let distance = offset.length();
    if distance >= reach || distance <= f32::EPSILON {
        return false;
    }

    let normal = offset * (1.0 / distance);
    let relative = puck.velocity - handle.velocity;
    let closing = relative.x * normal.x + relative.z * normal.z;
    if closing >= 0.0 {
        return false;
    }

    puck.velocity = puck.velocity - normal * (2.0 * closing);
    puck.position = Vec3::new(
        handle.position.x + normal.x * reach,
        puck.position.y,
        handle.position.z + normal.z * reach,
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn table() -> Table {
        Table::new(&TableConfig::default())
    }

    #[test]
    fn test_initial_layout() {
        let table = table();
        assert_eq!(table.self_handle().position, Vec3::new(0.0, 0.0, -100.0));
        assert_eq!(table.opponent_handle(), Vec3::new(0.0, 0.0, 100.0));
        assert_eq!(table.puck_count(), 0);
        assert_eq!(table.next_puck_id(), 0);
    }

    #[test]
    fn test_unknown_puck_state_creates_puck() {
        let mut table = table();
        table.apply_puck_state(2, Vec3::new(-1.0, 0.0, 3.0), Vec3::new(0.0, 0.0, -5.0));

        let puck = table.puck(2).unwrap();
        assert_eq!(puck.position, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(puck.velocity, Vec3::new(0.0, 0.0, -5.0));
        assert!(!puck.scored);
        assert_eq!(table.next_puck_id(), 3);
    }

    #[test]
    fn test_mark_scored_freezes_known_puck_only() {
        let mut table = table();
        assert!(!table.mark_scored(7));

        table.throw_in(7, Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0));
        assert!(table.mark_scored(7));
        assert!(table.puck(7).unwrap().scored);

        table.step(1.0);
        assert_eq!(table.puck(7).unwrap().position, Vec3::ZERO);
    }

    #[test]
    fn test_throw_in_clears_goal_flag() {
        let mut table = table();
        table.throw_in(1, Vec3::ZERO, Vec3::ZERO);
        table.mark_scored(1);

        table.throw_in(1, Vec3::new(5.0, 0.0, -100.0), Vec3::ZERO);
        let puck = table.puck(1).unwrap();
        assert!(!puck.scored);
        assert_eq!(puck.spawn, Vec3::new(5.0, 0.0, -100.0));
    }

    #[test]
    fn test_puck_moves_and_bounces_off_walls() {
        let mut table = table();
        table.throw_in(0, Vec3::new(60.0, 0.0, 10.0), Vec3::new(100.0, 0.0, 0.0));

        table.step(0.1);

        let puck = table.puck(0).unwrap();
        assert_approx_eq!(puck.position.x, 65.0);
        assert!(puck.velocity.x < 0.0);
    }

    #[test]
    fn test_own_goal_is_reported_once() {
        let mut table = table();
        table.throw_in(3, Vec3::new(40.0, 0.0, -115.0), Vec3::new(0.0, 0.0, -100.0));

        let report = table.step(0.1);
        assert_eq!(report.own_goals, vec![3]);
        assert!(table.puck(3).unwrap().scored);

        let report = table.step(0.1);
        assert!(report.own_goals.is_empty());
    }

    #[test]
    fn test_far_goal_freezes_without_report() {
        let mut table = table();
        table.throw_in(4, Vec3::new(40.0, 0.0, 115.0), Vec3::new(0.0, 0.0, 100.0));

        let report = table.step(0.1);
        assert!(report.own_goals.is_empty());
        assert!(table.puck(4).unwrap().scored);
    }

    #[test]
    fn test_handle_contact_reflects_puck() {
        let mut table = table();
        table.throw_in(0, Vec3::new(0.0, 0.0, -80.0), Vec3::new(0.0, 0.0, -100.0));

        let report = table.step(0.1);

        assert_eq!(report.contacts, vec![0]);
        let puck = table.puck(0).unwrap();
        assert!(puck.velocity.z > 0.0);
        assert_approx_eq!(puck.position.z, -87.0);
    }

    #[test]
    fn test_handle_moves_toward_destination_at_capped_speed() {
        let mut table = table();
        table.set_destination(Vec3::new(30.0, 0.0, -100.0));

        table.step(0.1);
        assert_approx_eq!(table.self_handle().position.x, 15.0);

        table.step(0.1);
        assert_approx_eq!(table.self_handle().position.x, 30.0);
    }

    #[test]
    fn test_destination_is_clamped_to_own_half() {
        let mut table = table();
        table.set_destination(Vec3::new(500.0, 0.0, 50.0));

        let destination = table.self_handle().destination;
        assert_approx_eq!(destination.x, 62.0);
        assert_approx_eq!(destination.z, 0.0);
    }

    #[test]
    fn test_respawn_position_on_own_side() {
        let mut table = table();
        table.throw_in(1, Vec3::new(-60.0, 0.0, 40.0), Vec3::ZERO);
        assert_eq!(table.respawn_position(1), Vec3::new(-60.0, 0.0, -100.0));
    }

    #[test]
    fn test_hoppers_aim_at_centre() {
        let table = table();
        let (position, velocity) = table.hopper(true, true);

        assert_eq!(position, Vec3::new(-60.0, 0.0, -40.0));
        assert!(velocity.x > 0.0 && velocity.z > 0.0);
        assert_approx_eq!(velocity.length(), 80.0, 1e-3);
    }

    #[test]
    fn test_destination_on_degenerate_table_stays_centred() {
        let mut config = TableConfig::default();
        config.half_width = 7.0;
        config.goal_line_z = 6.0;
        let mut table = Table::new(&config);

        table.set_destination(Vec3::new(30.0, 0.0, -50.0));
        let destination = table.self_handle().destination;
        assert_eq!(destination.x, 0.0);
        assert_eq!(destination.z, 0.0);
    }
}
