//! Application context owning every long-lived manager
//!
//! One [`AppContext`] is built at start-up and passed down explicitly; it
//! replaces process-wide singletons and is the only place that decides when
//! transports are released.

use crate::battle::{BattleOutcome, BattleSession, BattleView, LogView};
use crate::config::PeerConfig;
use crate::error::{ConfigError, MatchError};
use crate::network::{HandshakeState, NetworkManager};
use log::info;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};

pub struct AppContext {
    config: PeerConfig,
    network: NetworkManager,
}

impl AppContext {
    pub fn init(config: PeerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Rendezvous at {}, stream port {}, {} Hz",
            config.rendezvous.url, config.ports.p2p, config.battle.tick_rate
        );

        let network = NetworkManager::new(&config);
        Ok(Self { config, network })
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn network(&self) -> &NetworkManager {
        &self.network
    }

    pub fn handshake_state(&self) -> watch::Receiver<HandshakeState> {
        self.network.subscribe()
    }

    /// Finds an opponent and plays one match, logging every notification.
    pub async fn run_match(&mut self, self_addr: &str) -> Result<BattleOutcome, MatchError> {
        self.run_match_with(self_addr, LogView).await
    }

    /// Finds an opponent and plays one match at the configured tick rate.
    ///
    /// Both transports are closed once the match reaches an outcome. A
    /// finished match keeps the link up for `battle.result_secs` first so the
    /// opponent still receives the final messages.
    pub async fn run_match_with<V: BattleView>(
        &mut self,
        self_addr: &str,
        view: V,
    ) -> Result<BattleOutcome, MatchError> {
        let role = self.network.request_match(self_addr).await?;
        info!("Starting battle as {:?}", role);

        let link = self.network.link().ok_or(MatchError::NotConnected)?;
        let mut session = BattleSession::new(link, view, &self.config)?;

        let step = self.config.battle.tick_duration();
        let mut ticker = interval(step);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome = loop {
            ticker.tick().await;
            session.tick(step);

            if let Some(outcome) = session.outcome() {
                break outcome;
            }
        };

        drop(session);
        if matches!(outcome, BattleOutcome::Finished(_)) {
            sleep(self.config.battle.result_duration()).await;
        }
        self.network.close_clients();
        info!("Match finished: {:?}", outcome);
        Ok(outcome)
    }

    pub fn shutdown(&mut self) {
        self.network.close_clients();
        info!("Shut down");
    }
}
