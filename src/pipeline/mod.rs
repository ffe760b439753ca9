// =============================================================================
// Discovery pipeline — the seven scan stages and their orchestrator
// =============================================================================

pub mod momentum;
pub mod orchestrator;
pub mod rvol;
pub mod universe;

pub use orchestrator::{DiscoveryOrchestrator, ScanError, ScanReport};
