pub mod ledger;
pub mod tallies;

pub use ledger::{AwardOutcome, ParticipationLedger, PersistOutcome};
pub use tallies::{AwardRefusal, ParticipationState, Tallies};
