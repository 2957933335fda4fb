use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use common::directory::DEFAULT_MAX_DEVICES_PER_USER;
use common::handshake::DEFAULT_HANDSHAKE_TTL;
use common::pairing::MAX_PAIRING_TTL;

#[derive(Debug, Clone)]
pub struct Config {
    /// address for the API server to listen on
    pub listen_addr: SocketAddr,
    /// a path to a sqlite database, if not set then
    ///  process-local memory backends are used
    pub sqlite_path: Option<PathBuf>,

    // protocol policy
    /// maximum number of devices a single user may register
    pub max_devices_per_user: usize,
    /// lifetime of a handshake session
    pub handshake_ttl: Duration,
    /// longest lifetime a pairing ticket may request
    pub pairing_ttl_max: Duration,
    /// how often expired sessions are physically purged
    pub purge_interval: Duration,
    /// bearer credential the auth adapter presents when completing a
    ///  handshake; completion is refused while unset
    pub completion_token: Option<String>,

    // misc
    pub log_level: tracing::Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 3000),
            sqlite_path: None,
            max_devices_per_user: DEFAULT_MAX_DEVICES_PER_USER,
            handshake_ttl: DEFAULT_HANDSHAKE_TTL,
            pairing_ttl_max: MAX_PAIRING_TTL,
            purge_interval: Duration::from_secs(60),
            completion_token: None,
            log_level: tracing::Level::INFO,
        }
    }
}
