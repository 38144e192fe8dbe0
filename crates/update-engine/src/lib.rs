//! Update Engine
//!
//! Protocol-translation core of a client-side software update agent. It turns
//! locally registered update tickets into one outbound update-check request,
//! decodes the server's reply into per-ticket verdicts, and serializes
//! usage-statistics uploads. Network I/O is delegated to a [`Transport`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use update_engine::{EngineConfig, HttpTransport, Ticket, UpdateCheckOrchestrator};
//!
//! # async fn run() -> update_engine::Result<()> {
//! let transport = Arc::new(HttpTransport::with_defaults()?);
//! let orchestrator = UpdateCheckOrchestrator::new(EngineConfig::default(), transport)?;
//! let verdicts = orchestrator
//!     .check_for_updates(&[Ticket::new("{8A69D345-D564-463C-AFF1-A69D9E530F96}", "1.2.3.4")])
//!     .await?;
//! for (id, verdict) in &verdicts {
//!     println!("{}: {:?}", id, verdict);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod transport;
pub mod version;

pub use codec::{codec_for, CodecKind, OmahaCodec, ProtocolCodec};
pub use config::EngineConfig;
pub use error::{Result, TransportError, UpdateError};
pub use models::{
    BuiltRequest, DocumentKind, InstallAction, Manifest, ParsedResponse, ServerInfo, SkipReason,
    SkippedTicket, StatValue, StatsCollection, Ticket, UpdateAction, UpdateRequestDocument,
    UpdateVerdict, VerdictCode, VerdictMap,
};
pub use orchestrator::{
    CheckCycle, CheckFailure, CheckReport, CheckState, CycleError, UpdateCheckOrchestrator,
};
pub use transport::{HttpTransport, HttpTransportConfig, Transport};
pub use version::{InvalidVersion, ProductVersion};
