//! Time request processor — current-time system line.

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;

use canopy_core::agent::EventSender;
use canopy_core::invocation::Invocation;
use canopy_core::message::Request;

use crate::processor::{FlowError, RequestProcessor};

/// Default timestamp layout.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Appends "The current time is: <formatted>" to the system message
/// using a configurable timezone and layout.
#[derive(Clone, Debug)]
pub struct TimeProcessor {
    timezone: Tz,
    format: String,
}

impl TimeProcessor {
    /// Processor in UTC with the default layout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            format: DEFAULT_TIME_FORMAT.to_owned(),
        }
    }

    /// Set the timezone.
    #[must_use]
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Set the strftime layout.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }
}

impl Default for TimeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestProcessor for TimeProcessor {
    fn name(&self) -> &'static str {
        "time"
    }

    async fn process_request(
        &self,
        _ctx: &CancellationToken,
        _invocation: &mut Invocation,
        request: &mut Request,
        _tx: &EventSender,
    ) -> Result<(), FlowError> {
        let now = Utc::now().with_timezone(&self.timezone);
        request.append_system(&format!(
            "The current time is: {}",
            now.format(&self.format)
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::message::Message;
    use tokio::sync::mpsc;

    async fn run(processor: TimeProcessor) -> Request {
        let (tx, _rx) = mpsc::channel(4);
        let mut invocation = Invocation::new(Message::user("hi"));
        let mut request = Request::default();
        processor
            .process_request(&CancellationToken::new(), &mut invocation, &mut request, &tx)
            .await
            .unwrap();
        request
    }

    #[tokio::test]
    async fn appends_current_time_line() {
        let request = run(TimeProcessor::new()).await;
        assert!(request.messages[0].content.starts_with("The current time is: "));
        assert!(request.messages[0].content.contains("UTC"));
    }

    #[tokio::test]
    async fn honors_timezone_and_format() {
        let request = run(
            TimeProcessor::new()
                .with_timezone(chrono_tz::Asia::Tokyo)
                .with_format("%Z"),
        )
        .await;
        assert_eq!(request.messages[0].content, "The current time is: JST");
    }
}
