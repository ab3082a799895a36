//! rollcall-core: attendance gating and identity matching.
//!
//! Holds the pieces that carry state and consistency guarantees: the motion
//! stability detector, the consecutive-hit gate, the nearest-neighbour
//! identity matcher, and the de-duplicated attendance ledger. Detectors and
//! classifiers plug in through the traits in [`analyzer`] and [`compliance`].

pub mod analyzer;
pub mod checkin;
pub mod compliance;
pub mod delimited;
pub mod gate;
pub mod imaging;
pub mod ledger;
pub mod matcher;
pub mod registry;
pub mod roster;
pub mod stability;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, FullFrameLocator, SubjectLocator};
pub use checkin::{check_in, CheckIn};
pub use compliance::{ColourRatioClassifier, ComplianceClassifier, ComplianceSignals};
pub use gate::{GateSignals, GateSnapshot, GateStateMachine, StatusChannel, Transition};
pub use ledger::{
    AttendanceLedger, AttendanceRecord, HistoryLookup, IdentityHistory, LedgerError, LedgerFormat,
    MarkOutcome,
};
pub use matcher::{IdentityMatcher, MatchOutcome};
pub use registry::{IdentityRecord, IdentityRegistry, RegistryError, RegistryStore};
pub use roster::{AddOutcome, Roster, RosterError, Student};
pub use stability::{StabilityConfig, StabilityDetector};
pub use types::{BoundingBox, Embedding, FaceCapture, PixelRect};
