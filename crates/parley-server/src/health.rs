//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::hub::HubState;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` while the process answers.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current hub membership.
    pub participants: usize,
    /// Hub lifecycle state.
    pub hub_state: &'static str,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, participants: usize, hub_state: HubState) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        participants,
        hub_state: hub_state.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, HubState::Running);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, 0, HubState::Running);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization_is_camel_case() {
        let resp = health_check(Instant::now(), 3, HubState::ShuttingDown);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["participants"], 3);
        assert_eq!(parsed["hubState"], HubState::ShuttingDown.as_str());
        assert!(parsed["uptimeSecs"].is_number());
    }
}
