//! # Connectivity Probe
//!
//! `GET {base}/api-keys/me` tells whether the server is reachable and the key
//! is accepted. [`ProbeBoard`] holds the last result for display and drops it
//! once it is older than [`PROBE_DISPLAY_TTL`].

use crate::credentials::Credentials;
use crate::upload::{validate_credentials, API_KEY_HEADER};
use bridge_traits::{
    http::{HttpClient, HttpMethod, HttpRequest},
    time::Clock,
};
use chrono::{DateTime, Utc};
use core_runtime::events::ProbeStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, instrument};

/// How long a probe result stays on display
pub const PROBE_DISPLAY_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Valid,
    InvalidKey,
    InsufficientScope,
    Error(String),
    NotConfigured(String),
}

impl ProbeResult {
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => ProbeResult::Valid,
            401 => ProbeResult::InvalidKey,
            403 => ProbeResult::InsufficientScope,
            other => ProbeResult::Error(format!("Unexpected status {}", other)),
        }
    }

    pub fn status(&self) -> ProbeStatus {
        match self {
            ProbeResult::Valid => ProbeStatus::Valid,
            ProbeResult::InvalidKey => ProbeStatus::InvalidKey,
            ProbeResult::InsufficientScope => ProbeStatus::InsufficientScope,
            ProbeResult::Error(_) => ProbeStatus::Error,
            ProbeResult::NotConfigured(_) => ProbeStatus::NotConfigured,
        }
    }

    /// User-facing message
    pub fn message(&self) -> String {
        match self {
            ProbeResult::Valid => "Connected to server".to_string(),
            ProbeResult::InvalidKey => "Invalid API key".to_string(),
            ProbeResult::InsufficientScope => "API key lacks required permissions".to_string(),
            ProbeResult::Error(reason) => format!("Connection failed: {}", reason),
            ProbeResult::NotConfigured(reason) => format!("Not configured: {}", reason),
        }
    }
}

pub struct ConnectivityProbe {
    http_client: Arc<dyn HttpClient>,
}

impl ConnectivityProbe {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self { http_client }
    }

    #[instrument(skip(self, credentials), fields(server = %credentials.server_url))]
    pub async fn check(&self, credentials: &Credentials) -> ProbeResult {
        let endpoint = match validate_credentials(credentials) {
            Ok(endpoint) => endpoint,
            Err(e) => return ProbeResult::NotConfigured(e.to_string()),
        };

        let request = HttpRequest::new(HttpMethod::Get, endpoint.api_key_url())
            .header(API_KEY_HEADER, credentials.api_key.clone());

        let result = match self.http_client.execute(request).await {
            Ok(response) => ProbeResult::from_status(response.status),
            Err(e) => ProbeResult::Error(e.to_string()),
        };
        debug!(result = ?result.status(), "Connectivity probe finished");
        result
    }
}

struct Posted {
    result: ProbeResult,
    at: DateTime<Utc>,
    generation: u64,
}

/// Display state for the most recent probe result
pub struct ProbeBoard {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slot: Mutex<(u64, Option<Posted>)>,
}

impl ProbeBoard {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, PROBE_DISPLAY_TTL)
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            slot: Mutex::new((0, None)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Show a result. Returns a generation used by [`clear_if_current`](Self::clear_if_current).
    pub fn post(&self, result: ProbeResult) -> u64 {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.0 += 1;
        let generation = slot.0;
        slot.1 = Some(Posted {
            result,
            at: self.clock.now(),
            generation,
        });
        generation
    }

    /// The displayed result, or `None` once it has expired.
    pub fn current(&self) -> Option<ProbeResult> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let posted = slot.1.as_ref()?;
        let fresh = match self.clock.now().signed_duration_since(posted.at).to_std() {
            Ok(age) => age < self.ttl,
            // clock moved backwards
            Err(_) => true,
        };
        fresh.then(|| posted.result.clone())
    }

    /// Clear the result if nothing newer was posted since `generation`.
    pub fn clear_if_current(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let is_current = slot
            .1
            .as_ref()
            .is_some_and(|posted| posted.generation == generation);
        if is_current {
            slot.1 = None;
        }
        is_current
    }

    pub fn clear(&self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).1 = None;
    }
}
