//! Incremental output classifier
//!
//! Classifies raw process output into [`OutputEvent`]s in arrival order.
//! Rules are evaluated per line, in priority order: reasoning markers, action
//! markers, confirmation markers, complete JSON objects, plain text. Partial
//! JSON never raises; it is retried against subsequent chunks and, if the
//! stream ends before closing, degrades to a text event flagged `degraded`.

use ace_types::{CorrelationId, OutputEvent};

use crate::denylist::DenyList;

const REASONING_MARKERS: &[&str] = &["Thinking:", "Reasoning:"];
const ACTION_MARKERS: &[&str] = &["Tool:", "Action:"];
const CONFIRMATION_MARKERS: &[&str] = &["Confirm:", "Proceed?", "[Y/n]"];

/// Incremental classifier for one operation's output stream
#[derive(Debug)]
pub struct Classifier {
    correlation_id: CorrelationId,
    deny: DenyList,
    /// Carryover for a line split across chunks
    line_buf: String,
    /// Accumulator for a JSON object split across lines, with its raw text
    json_buf: Option<String>,
}

impl Classifier {
    #[must_use]
    pub fn new(correlation_id: CorrelationId, deny: DenyList) -> Self {
        Self {
            correlation_id,
            deny,
            line_buf: String::new(),
            json_buf: None,
        }
    }

    /// Feed one raw chunk; returns the events it completed, in order.
    pub fn feed(&mut self, chunk: &str) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        self.line_buf.push_str(chunk);

        while let Some(newline) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            self.consume_line(&line, &mut events);
        }

        events
    }

    /// Signal end of stream; flushes carryover state.
    ///
    /// An unterminated JSON accumulation degrades to a `Text` event flagged
    /// `degraded` rather than raising.
    pub fn finish(&mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();

        if !self.line_buf.is_empty() {
            let line = std::mem::take(&mut self.line_buf);
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            self.consume_line(&line, &mut events);
        }

        if self.json_buf.is_some() {
            self.degrade_json_buf(&mut events);
        }

        events
    }

    /// Whether a JSON accumulation is currently open
    #[must_use]
    pub fn has_pending_json(&self) -> bool {
        self.json_buf.is_some()
    }

    fn consume_line(&mut self, line: &str, events: &mut Vec<OutputEvent>) {
        // Marker rules outrank JSON accumulation: a marker line arriving
        // inside an open accumulation degrades the pending buffer and is
        // then classified on its own, so an action line can never hide
        // inside a broken structure.
        if self.json_buf.is_some() && has_marker(line) {
            self.degrade_json_buf(events);
        }

        // While a JSON accumulation is open, lines extend it until it closes
        // or proves invalid.
        if let Some(mut buf) = self.json_buf.take() {
            buf.push('\n');
            buf.push_str(line);
            match serde_json::from_str::<serde_json::Value>(&buf) {
                Ok(value) if value.is_object() => {
                    events.push(OutputEvent::Structured {
                        correlation_id: self.correlation_id,
                        value,
                        raw: buf,
                    });
                }
                Ok(_) => {
                    self.json_buf = Some(buf);
                    self.degrade_json_buf(events);
                }
                Err(err) if err.is_eof() => {
                    self.json_buf = Some(buf);
                }
                Err(_) => {
                    self.json_buf = Some(buf);
                    self.degrade_json_buf(events);
                }
            }
            return;
        }

        if line.trim().is_empty() {
            return;
        }

        if let Some(text) = marker_payload(line, REASONING_MARKERS) {
            events.push(OutputEvent::Reasoning {
                correlation_id: self.correlation_id,
                text,
                raw: line.to_string(),
            });
            return;
        }

        if let Some(action) = marker_payload(line, ACTION_MARKERS) {
            let dangerous = self.deny.is_dangerous(&action);
            events.push(OutputEvent::ToolCall {
                correlation_id: self.correlation_id,
                action,
                dangerous,
                raw: line.to_string(),
            });
            return;
        }

        if let Some(payload) = marker_payload(line, CONFIRMATION_MARKERS) {
            let prompt = if payload.is_empty() {
                line.trim().to_string()
            } else {
                payload
            };
            events.push(OutputEvent::ConfirmationRequest {
                correlation_id: self.correlation_id,
                prompt,
                raw: line.to_string(),
            });
            return;
        }

        if line.trim_start().starts_with('{') {
            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(value) if value.is_object() => {
                    events.push(OutputEvent::Structured {
                        correlation_id: self.correlation_id,
                        value,
                        raw: line.to_string(),
                    });
                    return;
                }
                Err(err) if err.is_eof() => {
                    self.json_buf = Some(line.to_string());
                    return;
                }
                _ => {}
            }
        }

        events.push(OutputEvent::Text {
            correlation_id: self.correlation_id,
            degraded: false,
            raw: line.to_string(),
        });
    }

    fn degrade_json_buf(&mut self, events: &mut Vec<OutputEvent>) {
        if let Some(buf) = self.json_buf.take() {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                bytes = buf.len(),
                "unterminated JSON degraded to text"
            );
            events.push(OutputEvent::Text {
                correlation_id: self.correlation_id,
                degraded: true,
                raw: buf,
            });
        }
    }
}

fn has_marker(line: &str) -> bool {
    [REASONING_MARKERS, ACTION_MARKERS, CONFIRMATION_MARKERS]
        .iter()
        .any(|markers| markers.iter().any(|marker| line.contains(marker)))
}

fn marker_payload(line: &str, markers: &[&str]) -> Option<String> {
    for marker in markers {
        if let Some(idx) = line.find(marker) {
            return Some(line[idx + marker.len()..].trim().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn classifier() -> Classifier {
        Classifier::new(CorrelationId::new(), DenyList::standard())
    }

    #[test]
    fn reasoning_marker_wins() {
        let mut c = classifier();
        let events = c.feed("Thinking: the drafts directory looks stale\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            OutputEvent::Reasoning { text, .. } if text == "the drafts directory looks stale"
        ));
    }

    #[test]
    fn dangerous_tool_call_carries_literal_action_text() {
        let mut c = classifier();
        let events = c.feed("Tool: rm -rf ./drafts\n");
        assert_eq!(events.len(), 1);
        match &events[0] {
            OutputEvent::ToolCall {
                action, dangerous, raw, ..
            } => {
                assert_eq!(action, "rm -rf ./drafts");
                assert!(*dangerous);
                assert_eq!(raw, "Tool: rm -rf ./drafts");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn safe_tool_call_is_not_flagged() {
        let mut c = classifier();
        let events = c.feed("Action: git status\n");
        assert!(matches!(
            &events[0],
            OutputEvent::ToolCall { dangerous: false, .. }
        ));
    }

    #[test]
    fn confirmation_markers_classify() {
        let mut c = classifier();
        let events = c.feed("Proceed? [Y/n]\nConfirm: overwrite notes.md\n");
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], OutputEvent::ConfirmationRequest { .. }));
        assert!(matches!(
            &events[1],
            OutputEvent::ConfirmationRequest { prompt, .. } if prompt == "overwrite notes.md"
        ));
    }

    #[test]
    fn complete_json_object_in_one_chunk() {
        let mut c = classifier();
        let events = c.feed("{\"summary\": \"done\"}\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            OutputEvent::Structured { value, .. } if *value == json!({"summary": "done"})
        ));
    }

    #[test]
    fn partial_json_is_retried_across_chunks() {
        let mut c = classifier();
        assert!(c.feed("{\"summary\":\n").is_empty());
        assert!(c.has_pending_json());

        let events = c.feed("  \"done\"}\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            OutputEvent::Structured { value, .. } if *value == json!({"summary": "done"})
        ));
        assert!(!c.has_pending_json());
    }

    #[test]
    fn unterminated_json_degrades_to_text_at_finish() {
        let mut c = classifier();
        assert!(c.feed("{\"summary\": \"do").is_empty());

        let events = c.finish();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            OutputEvent::Text { degraded: true, .. }
        ));
    }

    #[test]
    fn invalid_json_degrades_mid_stream_without_raising() {
        let mut c = classifier();
        assert!(c.feed("{\"summary\":\n").is_empty());
        let events = c.feed("!!not json!!}\n");
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            OutputEvent::Text { degraded: true, .. }
        ));
        assert!(!c.has_pending_json());
    }

    #[test]
    fn action_marker_interrupts_an_open_json_accumulation() {
        let mut c = classifier();
        assert!(c.feed("{\"summary\":\n").is_empty());

        let events = c.feed("Tool: rm -rf /\n");
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            OutputEvent::Text { degraded: true, raw, .. } if raw == "{\"summary\":"
        ));
        match &events[1] {
            OutputEvent::ToolCall {
                action, dangerous, ..
            } => {
                assert_eq!(action, "rm -rf /");
                assert!(*dangerous);
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert!(!c.has_pending_json());
    }

    #[test]
    fn confirmation_marker_interrupts_an_open_json_accumulation() {
        let mut c = classifier();
        assert!(c.feed("{\"partial\":\n").is_empty());

        let events = c.feed("Proceed? [Y/n]\n");
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            OutputEvent::Text { degraded: true, .. }
        ));
        assert!(matches!(
            &events[1],
            OutputEvent::ConfirmationRequest { .. }
        ));
    }

    #[test]
    fn plain_text_is_the_default() {
        let mut c = classifier();
        let events = c.feed("copied 3 files\n");
        assert!(matches!(
            &events[0],
            OutputEvent::Text { degraded: false, raw, .. } if raw == "copied 3 files"
        ));
    }

    #[test]
    fn line_split_across_chunks_classifies_once() {
        let mut c = classifier();
        assert!(c.feed("Tool: rm -r").is_empty());
        let events = c.feed("f ./drafts\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_dangerous());
    }

    #[test]
    fn order_is_preserved_across_mixed_output() {
        let mut c = classifier();
        let events = c.feed(
            "Thinking: plan first\nTool: ls ./drafts\nall clear\n{\"summary\": \"done\"}\n",
        );
        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                OutputEvent::Reasoning { .. } => "reasoning",
                OutputEvent::ToolCall { .. } => "tool_call",
                OutputEvent::ConfirmationRequest { .. } => "confirmation",
                OutputEvent::Structured { .. } => "structured",
                OutputEvent::Text { .. } => "text",
            })
            .collect();
        assert_eq!(kinds, vec!["reasoning", "tool_call", "text", "structured"]);
    }

    #[test]
    fn trailing_line_without_newline_flushes_at_finish() {
        let mut c = classifier();
        assert!(c.feed("final words").is_empty());
        let events = c.finish();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], OutputEvent::Text { raw, .. } if raw == "final words"));
    }

    #[test]
    fn blank_lines_produce_no_events() {
        let mut c = classifier();
        assert!(c.feed("\n   \n\n").is_empty());
        assert!(c.finish().is_empty());
    }
}
