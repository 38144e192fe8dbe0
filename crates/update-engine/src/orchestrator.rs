//! Update check orchestration
//!
//! One call to [`UpdateCheckOrchestrator::check`] runs one check cycle:
//!
//! ```text
//! Idle -> Building -> AwaitingTransport -> Parsing -> Completed
//!            |               |                |
//!            +---------------+----------------+-----> Failed
//! ```
//!
//! Cycle state lives in a [`CheckCycle`] value owned by the call, so one
//! orchestrator can run any number of cycles concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::codec::{codec_for, ProtocolCodec};
use crate::config::{params, EngineConfig};
use crate::error::{Result, UpdateError};
use crate::models::{
    ServerInfo, SkippedTicket, StatsCollection, Ticket, UpdateAction, UpdateVerdict, VerdictMap,
};
use crate::transport::Transport;
use crate::version;

/// Why a cycle ended in [`CheckState::Failed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckFailure {
    /// The ticket batch could not be turned into a request
    InvalidRequest,
    /// The transport did not deliver a reply
    TransportError,
    /// The reply envelope could not be decoded
    MalformedResponse,
    /// The reply envelope used another protocol version
    ProtocolVersionMismatch,
}

/// State of one check cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Idle,
    Building,
    AwaitingTransport,
    Parsing,
    Completed,
    Failed(CheckFailure),
}

impl CheckState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: CheckState) -> bool {
        use CheckState::*;
        matches!(
            (self, next),
            (Idle, Building)
                | (Building, AwaitingTransport)
                | (AwaitingTransport, Parsing)
                | (Parsing, Completed)
                | (Building | AwaitingTransport | Parsing, Failed(_))
        )
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Building => f.write_str("building"),
            Self::AwaitingTransport => f.write_str("awaiting-transport"),
            Self::Parsing => f.write_str("parsing"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(reason) => write!(f, "failed({:?})", reason),
        }
    }
}

/// Record of one check cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCycle {
    id: Uuid,
    history: Vec<CheckState>,
}

impl CheckCycle {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            history: vec![CheckState::Idle],
        }
    }

    /// Identifier sent as the request id of this cycle
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> CheckState {
        self.history.last().copied().unwrap_or(CheckState::Idle)
    }

    /// Every state the cycle has been in, oldest first
    pub fn history(&self) -> &[CheckState] {
        &self.history
    }

    fn advance(&mut self, next: CheckState) {
        let current = self.state();
        debug_assert!(
            current.can_transition_to(next),
            "illegal check transition {} -> {}",
            current,
            next
        );
        debug!("Check cycle {}: {} -> {}", self.id, current, next);
        self.history.push(next);
    }

    fn fail(mut self, reason: CheckFailure, error: UpdateError) -> CycleError {
        self.advance(CheckState::Failed(reason));
        CycleError { cycle: self, error }
    }
}

/// A check cycle that ended in [`CheckState::Failed`]
#[derive(Debug, Error)]
#[error("check cycle {} failed: {}", .cycle.id, .error)]
pub struct CycleError {
    pub cycle: CheckCycle,
    #[source]
    pub error: UpdateError,
}

impl From<CycleError> for UpdateError {
    fn from(value: CycleError) -> Self {
        value.error
    }
}

/// Outcome of a completed check cycle
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub cycle: CheckCycle,
    /// One verdict per input ticket
    pub verdicts: VerdictMap,
    /// Tickets left out of the request
    pub skipped: Vec<SkippedTicket>,
    pub server: ServerInfo,
    /// Updates to hand to the install-action consumer, in ticket order
    pub actions: Vec<UpdateAction>,
}

/// Drives check cycles and stats uploads end to end
pub struct UpdateCheckOrchestrator {
    endpoint: Url,
    codec: Arc<dyn ProtocolCodec>,
    transport: Arc<dyn Transport>,
    session_id: Uuid,
}

impl UpdateCheckOrchestrator {
    /// Create an orchestrator using the codec the configuration selects
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let codec = codec_for(&config);
        Self::with_codec(config.endpoint_url()?, codec, transport)
    }

    /// Create an orchestrator around an already configured codec.
    ///
    /// The codec owns the protocol settings; only the endpoint is taken here.
    pub fn with_codec(
        endpoint: Url,
        codec: Arc<dyn ProtocolCodec>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(UpdateError::config(format!(
                "endpoint must use http or https, got '{}'",
                endpoint.scheme()
            )));
        }

        Ok(Self {
            endpoint,
            codec,
            transport,
            session_id: Uuid::new_v4(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Session id shared by every request from this orchestrator
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Run one check cycle and return its full report
    pub async fn check(&self, tickets: &[Ticket]) -> std::result::Result<CheckReport, CycleError> {
        let mut cycle = CheckCycle::new();
        cycle.advance(CheckState::Building);

        let overrides = BTreeMap::from([
            (params::REQUEST_ID.to_string(), cycle.id().to_string()),
            (params::SESSION_ID.to_string(), self.session_id.to_string()),
        ]);
        let built = match self.codec.build_update_request(tickets, Some(&overrides)) {
            Ok(built) => built,
            Err(e) => {
                warn!("Cannot build update request: {}", e);
                return Err(cycle.fail(CheckFailure::InvalidRequest, e));
            }
        };

        cycle.advance(CheckState::AwaitingTransport);
        let reply = match self.transport.send(&self.endpoint, &built.document).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Update check transport failed: {}", e);
                return Err(cycle.fail(CheckFailure::TransportError, e.into()));
            }
        };

        cycle.advance(CheckState::Parsing);
        let expected: BTreeSet<String> = built.document.ticket_ids.iter().cloned().collect();
        let parsed = match self.codec.parse_update_response(&reply, &expected) {
            Ok(parsed) => parsed,
            Err(e) => {
                let reason = match &e {
                    UpdateError::ProtocolVersionMismatch { .. } => {
                        CheckFailure::ProtocolVersionMismatch
                    }
                    _ => CheckFailure::MalformedResponse,
                };
                error!("Rejected update response: {}", e);
                return Err(cycle.fail(reason, e));
            }
        };

        let mut verdicts = parsed.verdicts;
        let mut actions = Vec::new();
        for ticket in tickets {
            let Some(verdict) = verdicts.get_mut(&ticket.id) else {
                continue;
            };
            let UpdateVerdict::UpdateAvailable { manifest } = verdict else {
                continue;
            };

            if version::is_newer(&manifest.version, ticket.version.as_deref()) {
                info!(
                    "Update available for {}: {} -> {}",
                    ticket.id,
                    ticket.version.as_deref().unwrap_or("none"),
                    manifest.version
                );
                actions.push(UpdateAction {
                    ticket_id: ticket.id.clone(),
                    installed_version: ticket.version.clone(),
                    manifest: manifest.clone(),
                });
            } else {
                debug!(
                    "Ignoring offered version {} for {}: not newer than installed",
                    manifest.version, ticket.id
                );
                *verdict = UpdateVerdict::NoUpdate;
            }
        }

        for skipped in &built.skipped {
            verdicts.insert(skipped.ticket_id.clone(), skipped.verdict());
        }

        cycle.advance(CheckState::Completed);
        info!(
            "Update check {} completed: {} tickets, {} updates",
            cycle.id(),
            verdicts.len(),
            actions.len()
        );

        Ok(CheckReport {
            cycle,
            verdicts,
            skipped: built.skipped,
            server: parsed.server,
            actions,
        })
    }

    /// Check a ticket batch for updates.
    ///
    /// Per-ticket problems are returned as error verdicts; only transport
    /// and envelope failures fail the call.
    pub async fn check_for_updates(&self, tickets: &[Ticket]) -> Result<VerdictMap> {
        Ok(self.check(tickets).await?.verdicts)
    }

    /// Upload a stats collection; an empty collection sends a heartbeat
    pub async fn upload_stats(&self, stats: &StatsCollection) -> Result<()> {
        let document = self.codec.build_stats_request(stats)?;
        self.transport.send(&self.endpoint, &document).await?;
        info!("Uploaded {} stats", stats.len());
        Ok(())
    }
}
