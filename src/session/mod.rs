//! Session orchestration: the turn and challenge state tracks, the event
//! union that drives them, and the async coordinator that wires the
//! machine to its collaborators.

pub mod challenge;
pub mod coordinator;
pub mod events;
pub mod machine;
pub mod turn;

pub use challenge::{ChallengeState, ChallengeStatus};
pub use coordinator::{SessionCoordinator, SessionHandle};
pub use events::{Effect, SessionEvent, SpeakCompletion, UserIntent};
pub use machine::SessionMachine;
pub use turn::TurnState;
