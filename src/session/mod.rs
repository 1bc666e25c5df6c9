pub mod commands;
pub mod controller;
pub mod snapshot;
pub mod state;

pub use controller::SessionController;
pub use snapshot::{Connectivity, LiveDiagnosis, SessionSnapshot, StatisticsView};
pub use state::{EventOutcome, SessionState, Trigger};
