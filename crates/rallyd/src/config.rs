use clap::Parser;
use rally_common::types;
use std::net::SocketAddr;

/// Port used when neither `SERVER_PORT` nor `MISSION_SERVER_PORT` is set.
const DEFAULT_PORT: u16 = 4000;

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "rallyd")]
#[command(about = "Session relay server")]
#[command(version)]
pub struct Args {
    /// TCP port the WebSocket listener binds on.
    #[arg(long, env = "SERVER_PORT")]
    pub port: Option<u16>,
    /// Socket address for the health and metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9100", env = "HEALTH_ADDR")]
    pub health_addr: SocketAddr,
    /// Session code length.
    #[arg(long, default_value = "6", env = "SESSION_CODE_LENGTH")]
    pub code_length: usize,
    /// Initial location upload interval in milliseconds.
    #[arg(long, default_value = "10000", env = "LOCATION_INTERVAL_MS")]
    pub location_interval_ms: u64,
    /// Maximum routes kept per client.
    #[arg(long, default_value = "8", env = "MAX_CLIENT_ROUTES")]
    pub max_client_routes: usize,
    /// Maximum points kept per route.
    #[arg(long, default_value = "80", env = "MAX_ROUTE_POINTS")]
    pub max_route_points: usize,
    /// Trailing traffic-metering window in seconds.
    #[arg(long, default_value = "900", env = "TRAFFIC_WINDOW_S")]
    pub traffic_window_s: u64,
    /// Idle session time-to-live in milliseconds.
    #[arg(long, default_value = "21600000", env = "SESSION_TTL_MS")]
    pub session_ttl_ms: u64,
    /// Grace period for host reconnection after detach, in milliseconds.
    #[arg(long, default_value = "900000", env = "HOST_RESUME_GRACE_MS")]
    pub host_resume_grace_ms: u64,
    /// Interval between WebSocket liveness pings in seconds.
    #[arg(long, default_value = "30", env = "PING_INTERVAL_S")]
    pub ping_interval_s: u64,
}

impl Args {
    /// Resolve the listen port: `SERVER_PORT` (via clap), then the legacy
    /// `MISSION_SERVER_PORT`, then 4000.
    #[must_use]
    pub fn resolved_port(&self) -> u16 {
        self.port
            .or_else(|| {
                std::env::var("MISSION_SERVER_PORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(DEFAULT_PORT)
    }
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the WebSocket listener binds on.
    pub listen: SocketAddr,
    /// Socket address for the health and metrics endpoint.
    pub health_addr: SocketAddr,
    /// Session code length.
    pub code_length: usize,
    /// Initial location upload interval in milliseconds, clamped.
    pub location_interval_ms: u64,
    /// Maximum routes kept per client.
    pub max_client_routes: usize,
    /// Maximum points kept per route.
    pub max_route_points: usize,
    /// Trailing traffic-metering window in seconds, floored.
    pub traffic_window_secs: u64,
    /// Idle session time-to-live in milliseconds.
    pub session_ttl_ms: u64,
    /// Grace period for host reconnection after detach, in milliseconds.
    pub host_resume_grace_ms: u64,
    /// Interval between WebSocket liveness pings in seconds.
    pub ping_interval_secs: u64,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending value.
    pub fn validate(&self) -> Result<(), String> {
        if self.code_length < 4 {
            return Err("code_length must be at least 4".to_string());
        }
        if self.code_length > 16 {
            return Err("code_length exceeds reasonable limit (16)".to_string());
        }

        if self.max_client_routes == 0 {
            return Err("max_client_routes must be greater than 0".to_string());
        }
        if self.max_client_routes > 64 {
            return Err("max_client_routes exceeds reasonable limit (64)".to_string());
        }

        if self.max_route_points == 0 {
            return Err("max_route_points must be greater than 0".to_string());
        }
        if self.max_route_points > 1000 {
            return Err("max_route_points exceeds reasonable limit (1000)".to_string());
        }

        if self.session_ttl_ms < 60_000 {
            return Err("session_ttl_ms must be at least 60000 (1 minute)".to_string());
        }
        if self.session_ttl_ms > 7 * 24 * 60 * 60 * 1000 {
            return Err("session_ttl_ms exceeds reasonable limit (7 days)".to_string());
        }

        if self.host_resume_grace_ms < 1_000 {
            return Err("host_resume_grace_ms must be at least 1000".to_string());
        }
        if self.host_resume_grace_ms > self.session_ttl_ms {
            return Err("host_resume_grace_ms cannot exceed session_ttl_ms".to_string());
        }

        if self.ping_interval_secs == 0 {
            return Err("ping_interval_s must be greater than 0".to_string());
        }
        if self.ping_interval_secs > 3600 {
            return Err("ping_interval_s exceeds reasonable limit (3600 seconds)".to_string());
        }

        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        let listen: SocketAddr = ([0, 0, 0, 0], args.resolved_port()).into();
        Self {
            listen,
            health_addr: args.health_addr,
            code_length: args.code_length,
            location_interval_ms: args
                .location_interval_ms
                .clamp(types::MIN_INTERVAL_MS, types::MAX_INTERVAL_MS),
            max_client_routes: args.max_client_routes,
            max_route_points: args.max_route_points,
            traffic_window_secs: args.traffic_window_s.max(types::MIN_TRAFFIC_WINDOW_SECS),
            session_ttl_ms: args.session_ttl_ms,
            host_resume_grace_ms: args.host_resume_grace_ms,
            ping_interval_secs: args.ping_interval_s,
        }
    }
}
