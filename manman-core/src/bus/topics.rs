//! Routing keys and queue names on the broker.
//!
//! One durable topic exchange carries everything. Hosts consume exclusively
//! from their own command queue; the control plane consumes from shared
//! queues bound to the status, health, workshop and log patterns.

/// The single topic exchange both processes publish to.
pub const EXCHANGE: &str = "manman.topic";

/// Shared log topic for gzipped multi-line batches.
pub const LOGS_BATCHED: &str = "logs.batched";

/// Shared workshop installation status topic.
pub const WORKSHOP_INSTALLATION_STATUS: &str = "workshop.installation.status";

/// Per-server command queue / routing key.
pub fn server_commands(server_id: i64) -> String {
    format!("server.{server_id}.commands")
}

pub fn session_status(session_id: i64) -> String {
    format!("session.status.{session_id}")
}

pub fn host_status(server_id: i64) -> String {
    format!("host.status.{server_id}")
}

pub fn host_health(server_id: i64) -> String {
    format!("host.health.{server_id}")
}

/// Binding patterns for the control plane's shared queues.
pub const SESSION_STATUS_PATTERN: &str = "session.status.*";
pub const HOST_STATUS_PATTERN: &str = "host.status.*";
pub const HOST_HEALTH_PATTERN: &str = "host.health.*";

/// Durable queue names on the control plane side.
pub const QUEUE_SESSION_STATUS: &str = "manman.session-status";
pub const QUEUE_HOST_STATUS: &str = "manman.host-status";
pub const QUEUE_HOST_HEALTH: &str = "manman.host-health";
pub const QUEUE_WORKSHOP_STATUS: &str = "manman.workshop-status";
pub const QUEUE_LOGS: &str = "manman.logs";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_keys_embed_ids() {
        assert_eq!(server_commands(7), "server.7.commands");
        assert_eq!(session_status(101), "session.status.101");
        assert_eq!(host_health(3), "host.health.3");
    }
}
