//! NotificationSink adapters.
//!
//! - `LoggingNotificationSink` - emits a structured log line per notification
//! - `RecordingNotificationSink` - keeps notifications in memory for tests

mod logging;
mod recording;

pub use logging::LoggingNotificationSink;
pub use recording::RecordingNotificationSink;
