use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::layout::DocumentLayout;

/// Plain signal sent alongside the structured event for hosts that only
/// listen for a string message.
pub const COMPLETION_SIGNAL: &str = "SIGNATURE_COMPLETE";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub status: &'static str,
    pub document_layout: DocumentLayout,
    pub timestamp: String,
}

impl CompletionEvent {
    pub fn new(document_layout: DocumentLayout, at: DateTime<Utc>) -> Self {
        Self {
            status: "completed",
            document_layout,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Receiver of completion notifications (parent frame, host process, log).
/// Delivery is fire-and-forget.
pub trait CompletionSink {
    fn post_event(&mut self, event: &CompletionEvent);

    fn post_signal(&mut self, _signal: &str) {}
}

/// Writes each event as one JSON line on stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl CompletionSink for StdoutSink {
    fn post_event(&mut self, event: &CompletionEvent) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("Failed to serialize completion event: {}", e),
        }
    }
}

/// Keeps everything it receives. Useful for hosts that poll.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<CompletionEvent>,
    pub signals: Vec<String>,
}

impl CompletionSink for RecordingSink {
    fn post_event(&mut self, event: &CompletionEvent) {
        self.events.push(event.clone());
    }

    fn post_signal(&mut self, signal: &str) {
        self.signals.push(signal.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_shape() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 5).unwrap();
        let event = CompletionEvent::new(DocumentLayout::new("doc.pdf", Vec::new()), at);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["timestamp"], "2026-10-18T09:30:05.000Z");
        assert_eq!(json["documentLayout"]["sourceUrl"], "doc.pdf");
        assert!(json["documentLayout"]["fields"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_recording_sink() {
        let mut sink = RecordingSink::default();
        let event = CompletionEvent::new(DocumentLayout::new("", Vec::new()), Utc::now());
        sink.post_event(&event);
        sink.post_signal(COMPLETION_SIGNAL);
        assert_eq!(sink.events.len(), 1);
        assert_eq!(sink.signals, vec![COMPLETION_SIGNAL.to_string()]);
    }
}
