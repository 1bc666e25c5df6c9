pub mod duration;

pub use duration::{format_hms, format_hms_secs, parse_hms, DurationClock};
