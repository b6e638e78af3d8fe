//! Peer configuration loaded from TOML
//!
//! Every field has a default so an empty file (or no file) yields a working
//! configuration for two peers on one machine.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PeerConfig {
    pub rendezvous: RendezvousConfig,
    pub ports: PortConfig,
    pub battle: BattleConfig,
    pub table: TableConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendezvousConfig {
    /// Matchmaking endpoint receiving the `{Addr}` POST
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/match".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl RendezvousConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortConfig {
    /// Stream port the master listens on
    pub p2p: u16,
    /// Datagram port shared across hosts, bound by the master on one host
    pub master_udp: u16,
    /// Datagram port bound by the non-master when both peers share a host
    pub non_master_udp: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            p2p: 2059,
            master_udp: 2060,
            non_master_udp: 2061,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BattleConfig {
    /// Simulation steps per second
    pub tick_rate: u32,
    pub countdown_secs: u32,
    pub battle_secs: u32,
    /// Seconds after battle start at which the master throws in a new puck
    pub throw_in_times: Vec<f32>,
    pub goal_respawn_secs: f32,
    /// How long the result stays up before the link to the opponent is closed
    pub result_secs: f32,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            tick_rate: 50,
            countdown_secs: 3,
            battle_secs: 60,
            throw_in_times: vec![1.0, 20.0, 40.0],
            goal_respawn_secs: 3.5,
            result_secs: 3.0,
        }
    }
}

impl BattleConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate.max(1)))
    }

    pub fn result_duration(&self) -> Duration {
        Duration::try_from_secs_f32(self.result_secs).unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TableConfig {
    /// A puck whose z drops below `-goal_line_z` is in our own goal
    pub goal_line_z: f32,
    /// Distance from the centre line at which a scored puck reappears
    pub respawn_offset_z: f32,
    pub hopper_x: f32,
    pub hopper_z: f32,
    pub hopper_speed: f32,
    /// Side walls sit at `x = ±half_width`
    pub half_width: f32,
    /// Top speed of the self handle chasing its destination
    pub handle_speed: f32,
    pub handle_radius: f32,
    pub puck_radius: f32,
    pub self_handle_start_z: f32,
    pub opponent_handle_start_z: f32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            goal_line_z: 120.0,
            respawn_offset_z: 100.0,
            hopper_x: 60.0,
            hopper_z: 40.0,
            hopper_speed: 80.0,
            half_width: 70.0,
            handle_speed: 150.0,
            handle_radius: 8.0,
            puck_radius: 5.0,
            self_handle_start_z: -100.0,
            opponent_handle_start_z: 100.0,
        }
    }
}

impl PeerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: PeerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };

        if self.battle.tick_rate == 0 {
            return invalid("battle.tick_rate must be positive");
        }
        if self.battle.countdown_secs == 0 {
            return invalid("battle.countdown_secs must be positive");
        }
        if self.battle.battle_secs == 0 {
            return invalid("battle.battle_secs must be positive");
        }
        if !self.battle.goal_respawn_secs.is_finite() || self.battle.goal_respawn_secs < 0.0 {
            return invalid("battle.goal_respawn_secs must not be negative");
        }
        if !self.battle.result_secs.is_finite() || self.battle.result_secs < 0.0 {
            return invalid("battle.result_secs must not be negative");
        }
        if self
            .battle
            .throw_in_times
            .iter()
            .any(|t| !t.is_finite() || *t < 0.0)
        {
            return invalid("battle.throw_in_times must be finite and not negative");
        }
        if self.ports.master_udp == self.ports.non_master_udp {
            return invalid("ports.master_udp and ports.non_master_udp must differ");
        }
        self.table.validate()
    }
}

impl TableConfig {
    fn values(&self) -> [f32; 11] {
        [
            self.goal_line_z,
            self.respawn_offset_z,
            self.hopper_x,
            self.hopper_z,
            self.hopper_speed,
            self.half_width,
            self.handle_speed,
            self.handle_radius,
            self.puck_radius,
            self.self_handle_start_z,
            self.opponent_handle_start_z,
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Invalid {
                message: message.to_string(),
            })
        };

        if self.values().iter().any(|v| !v.is_finite()) {
            return invalid("table values must be finite");
        }
        if self.handle_radius < 0.0 || self.puck_radius < 0.0 {
            return invalid("table.handle_radius and table.puck_radius must not be negative");
        }
        if self.hopper_speed < 0.0 || self.handle_speed < 0.0 {
            return invalid("table.hopper_speed and table.handle_speed must not be negative");
        }
        if self.goal_line_z <= self.handle_radius {
            return invalid("table.goal_line_z must exceed table.handle_radius");
        }
        if self.half_width <= self.handle_radius.max(self.puck_radius) {
            return invalid("table.half_width must exceed both handle and puck radius");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = PeerConfig::from_toml("").unwrap();
        assert_eq!(config, PeerConfig::default());
        assert_eq!(config.rendezvous.timeout_ms, 5000);
        assert_eq!(config.ports.p2p, 2059);
    }

    #[test]
    fn test_partial_sections_override_defaults() {
        let text = r#"
            [rendezvous]
            url = "http://match.example:9000/request"

            [ports]
            master_udp = 4000
            non_master_udp = 4001

            [battle]
            battle_secs = 90
            throw_in_times = [0.5, 45.0]
        "#;

        let config = PeerConfig::from_toml(text).unwrap();
        assert_eq!(config.rendezvous.url, "http://match.example:9000/request");
        assert_eq!(config.rendezvous.timeout_ms, 5000);
        assert_eq!(config.ports.master_udp, 4000);
        assert_eq!(config.ports.p2p, 2059);
        assert_eq!(config.battle.battle_secs, 90);
        assert_eq!(config.battle.countdown_secs, 3);
        assert_eq!(config.battle.throw_in_times, vec![0.5, 45.0]);
    }

    #[test]
    fn test_rejects_identical_datagram_ports() {
        let text = "[ports]\nmaster_udp = 5000\nnon_master_udp = 5000\n";
        assert!(matches!(
            PeerConfig::from_toml(text),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_tick_rate() {
        let mut config = PeerConfig::default();
        config.battle.tick_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_throw_in_time() {
        let mut config = PeerConfig::default();
        config.battle.throw_in_times = vec![1.0, -2.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(matches!(
            PeerConfig::from_toml("[battle\ntick_rate = "),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_tick_duration() {
        let config = BattleConfig::default();
        assert_eq!(config.tick_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_rejects_table_narrower_than_handle() {
        let mut config = PeerConfig::default();
        config.table.half_width = 7.0;
        config.table.puck_radius = 5.0;
        config.table.handle_radius = 8.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rejects_goal_line_inside_handle_radius() {
        let mut config = PeerConfig::default();
        config.table.goal_line_z = 6.0;
        assert!(config.validate().is_err());

        config.table.goal_line_z = 8.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_finite_table_values() {
        let mut config = PeerConfig::default();
        config.table.hopper_x = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = PeerConfig::default();
        config.table.self_handle_start_z = f32::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_radius_and_speed() {
        let mut config = PeerConfig::default();
        config.table.puck_radius = -1.0;
        assert!(config.validate().is_err());

        let mut config = PeerConfig::default();
        config.table.handle_speed = -5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_smallest_valid_table_accepted() {
        let mut config = PeerConfig::default();
        config.table.half_width = 8.5;
        config.table.goal_line_z = 8.5;
        assert!(config.validate().is_ok());
    }
}
