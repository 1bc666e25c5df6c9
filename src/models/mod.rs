mod classification;
mod history;
mod session;

pub use classification::{AnalysisUpdate, ClassificationEvent, EventOrigin, ServerHints};
pub use history::{HistoricalSession, HistoryDuration, PostureStatistics};
pub use session::{Session, SessionReport, SessionStatus, StatisticsSource};
