use std::time::Duration;

use carlot_settings::CarlotSettings;

use crate::lifecycle::RefreshPolicy;

/// Runtime configuration for the chat server, derived from settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_message_size: usize,
    pub max_frame_size: usize,
    pub store_timeout: Duration,
    pub presence_ttl: Duration,
    pub refresh: RefreshPolicy,
}

impl ServerConfig {
    pub fn from_settings(settings: &CarlotSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_send_queue: server.max_send_queue,
            heartbeat_interval: Duration::from_secs(server.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(server.heartbeat_timeout_secs),
            max_message_size: server.max_message_size,
            max_frame_size: server.max_frame_size,
            store_timeout: server.store_timeout(),
            presence_ttl: settings.presence.ttl(),
            refresh: RefreshPolicy::from_settings(&settings.presence),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&CarlotSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carlot_settings::PresenceRefresh;

    #[test]
    fn defaults_follow_settings() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3033);
        assert_eq!(config.bind_addr(), "0.0.0.0:3033");
        assert_eq!(config.presence_ttl, Duration::from_secs(14_400));
        assert_eq!(config.store_timeout, Duration::from_millis(2_000));
        assert_eq!(config.refresh, RefreshPolicy::Fixed);
        assert!(config.max_frame_size > config.max_message_size);
    }

    #[test]
    fn heartbeat_refresh_carries_interval() {
        let mut settings = CarlotSettings::default();
        settings.presence.refresh = PresenceRefresh::Heartbeat;
        settings.presence.refresh_interval_secs = 300;
        settings.server.port = 0;
        let config = ServerConfig::from_settings(&settings);
        assert_eq!(
            config.refresh,
            RefreshPolicy::Heartbeat {
                interval: Duration::from_secs(300)
            }
        );
        assert_eq!(config.bind_addr(), "0.0.0.0:0");
    }
}
