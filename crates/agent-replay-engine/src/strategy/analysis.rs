//! Analysis pacing: no waits, accumulates statistics.

use std::time::Duration;

use agent_replay_core::{
    EventKind, PacingMode, ReplayEvent,
    config::{AnalysisConfig, AnalysisLevel},
    session::{AnalysisReport, TimelineEntry},
};
use serde_json::{Value, json};

use super::{PacingContext, PacingStrategy};

/// Number of events kept in the timeline.
pub const TIMELINE_CAP: usize = 100;

const DELAY: Duration = Duration::from_millis(1);

/// Accumulates per-kind counts and a timeline, optionally annotating each
/// event with a complexity/impact estimate.
pub struct AnalysisStrategy {
    config: AnalysisConfig,
    report: AnalysisReport,
}

impl AnalysisStrategy {
    #[must_use]
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            report: AnalysisReport::default(),
        }
    }

    /// Statistics accumulated so far.
    #[must_use]
    pub const fn statistics(&self) -> &AnalysisReport {
        &self.report
    }

    /// Count `event` without annotating it, for replays paced by another
    /// strategy.
    pub fn observe(&mut self, event: &ReplayEvent) {
        self.record(event);
    }

    fn record(&mut self, event: &ReplayEvent) {
        let report = &mut self.report;
        report.total_events += 1;
        *report.events_by_kind.entry(event.kind).or_default() += 1;
        match event.kind {
            EventKind::ToolCall => report.tool_calls += 1,
            EventKind::ModelCall => report.model_calls += 1,
            EventKind::Error => report.errors += 1,
            EventKind::Warning => report.warnings += 1,
            _ => {}
        }
        if report.timeline.len() < TIMELINE_CAP {
            report.timeline.push(TimelineEntry {
                event_id: event.id.clone(),
                kind: event.kind,
                timestamp: event.timestamp,
            });
        }
    }

    fn annotation(&self, event: &ReplayEvent) -> Value {
        let (complexity, impact, factor) = match event.kind {
            EventKind::ToolCall => {
                let args = ["arguments", "args", "input"]
                    .iter()
                    .find_map(|key| event.data.get(key))
                    .map_or(0, item_count);
                (grade(args, 2, 5), "medium", args)
            }
            EventKind::ModelCall => {
                let messages = event.data.get("messages").map_or(0, item_count);
                (grade(messages, 3, 10), "medium", messages)
            }
            EventKind::Error => ("medium", "high", 0),
            EventKind::Warning => ("low", "medium", 0),
            _ => ("low", "low", 0),
        };

        let mut annotation = json!({
            "complexity": complexity,
            "impact": impact,
        });
        if self.config.level != AnalysisLevel::Basic {
            annotation["factor"] = json!(factor);
        }
        if self.config.level == AnalysisLevel::Comprehensive {
            let payload_bytes = serde_json::to_vec(&event.data).map_or(0, |b| b.len());
            annotation["payload_bytes"] = json!(payload_bytes);
            annotation["sequence"] = json!(self.report.total_events);
        }
        annotation
    }

    fn recommendations(&self) -> Vec<String> {
        let report = &self.report;
        let mut out = Vec::new();
        if report.total_events == 0 {
            return out;
        }
        if report.errors * 10 > report.total_events {
            out.push(format!(
                "High error rate: {} of {} events are errors; inspect them before re-running",
                report.errors, report.total_events
            ));
        } else if report.errors > 0 {
            out.push(format!("{} error event(s) recorded", report.errors));
        }
        if report.warnings > 0 {
            out.push(format!("{} warning event(s) recorded", report.warnings));
        }
        if report.model_calls > 0 && report.tool_calls > report.model_calls * 3 {
            out.push(format!(
                "Tool calls ({}) far outnumber model calls ({}); consider batching tool use",
                report.tool_calls, report.model_calls
            ));
        }
        if report.model_calls > 50 {
            out.push(format!(
                "{} model calls in one session; consider caching or shortening the loop",
                report.model_calls
            ));
        }
        out
    }
}

fn item_count(value: &Value) -> usize {
    match value {
        Value::Object(map) => map.len(),
        Value::Array(items) => items.len(),
        Value::Null => 0,
        _ => 1,
    }
}

const fn grade(count: usize, low: usize, medium: usize) -> &'static str {
    if count <= low {
        "low"
    } else if count <= medium {
        "medium"
    } else {
        "high"
    }
}

impl PacingStrategy for AnalysisStrategy {
    fn mode(&self) -> PacingMode {
        PacingMode::Analysis
    }

    fn process(&mut self, event: ReplayEvent, _ctx: &PacingContext) -> ReplayEvent {
        self.record(&event);
        if !self.config.deep_analysis {
            return event;
        }
        let annotation = self.annotation(&event);
        event.annotated("analysis", annotation)
    }

    fn should_pause(&self, _event: &ReplayEvent, _ctx: &PacingContext) -> bool {
        false
    }

    fn delay(&mut self, _event: &ReplayEvent, _ctx: &PacingContext) -> Duration {
        DELAY
    }

    fn report(&self) -> Option<AnalysisReport> {
        let mut report = self.report.clone();
        if self.config.recommendations {
            report.recommendations = self.recommendations();
        }
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(id: usize, kind: EventKind) -> ReplayEvent {
        ReplayEvent::new(format!("e{id}"), kind, Utc::now(), "s")
    }

    #[test]
    fn test_accumulates_statistics() {
        let mut strategy = AnalysisStrategy::new(AnalysisConfig::default());
        let ctx = PacingContext::default();
        let kinds = [
            EventKind::WorkflowStart,
            EventKind::ModelCall,
            EventKind::ModelResponse,
            EventKind::ToolCall,
            EventKind::ToolResult,
            EventKind::Error,
            EventKind::ToolCall,
            EventKind::Warning,
            EventKind::Error,
            EventKind::WorkflowEnd,
        ];
        for (i, kind) in kinds.into_iter().enumerate() {
            let _ = strategy.process(event(i, kind), &ctx);
            assert!(!strategy.should_pause(&event(i, kind), &ctx));
        }

        let report = strategy.report().unwrap();
        assert_eq!(report.total_events, 10);
        assert_eq!(report.errors, 2);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.tool_calls, 2);
        assert_eq!(report.model_calls, 1);
        assert_eq!(report.timeline.len(), 10);
        assert_eq!(report.events_by_kind[&EventKind::ToolCall], 2);
        assert!(report.recommendations.iter().any(|r| r.starts_with("High error rate")));
    }

    #[test]
    fn test_timeline_is_capped() {
        let mut strategy = AnalysisStrategy::new(AnalysisConfig::default());
        let ctx = PacingContext::default();
        for i in 0..(TIMELINE_CAP + 25) {
            let _ = strategy.process(event(i, EventKind::Info), &ctx);
        }
        assert_eq!(strategy.statistics().timeline.len(), TIMELINE_CAP);
        assert_eq!(strategy.statistics().total_events, TIMELINE_CAP + 25);
    }

    #[test]
    fn test_deep_analysis_annotations() {
        let mut strategy = AnalysisStrategy::new(AnalysisConfig::default());
        let ctx = PacingContext::default();

        let tool = event(0, EventKind::ToolCall)
            .with_data(json!({"arguments": {"a": 1, "b": 2, "c": 3}}));
        let tool = strategy.process(tool, &ctx);
        assert_eq!(tool.metadata["analysis"]["complexity"], "medium");
        assert_eq!(tool.metadata["analysis"]["factor"], 3);

        let messages: Vec<Value> = (0..12).map(|i| json!({"role": "user", "n": i})).collect();
        let model = event(1, EventKind::ModelCall).with_data(json!({"messages": messages}));
        let model = strategy.process(model, &ctx);
        assert_eq!(model.metadata["analysis"]["complexity"], "high");

        let error = strategy.process(event(2, EventKind::Error), &ctx);
        assert_eq!(error.metadata["analysis"]["impact"], "high");
    }

    #[test]
    fn test_shallow_analysis_leaves_events_untouched() {
        let mut strategy = AnalysisStrategy::new(AnalysisConfig {
            deep_analysis: false,
            recommendations: false,
            ..AnalysisConfig::default()
        });
        let ctx = PacingContext::default();
        let original = event(0, EventKind::Error);
        let processed = strategy.process(original.clone(), &ctx);
        assert_eq!(processed, original);
        assert_eq!(strategy.delay(&processed, &ctx), Duration::from_millis(1));
        assert!(strategy.report().unwrap().recommendations.is_empty());
    }

    #[test]
    fn test_observe_counts_without_annotating() {
        let mut strategy = AnalysisStrategy::new(AnalysisConfig::default());
        strategy.observe(&event(0, EventKind::ToolCall));
        strategy.observe(&event(1, EventKind::Error));
        let report = strategy.report().unwrap();
        assert_eq!(report.total_events, 2);
        assert_eq!(report.tool_calls, 1);
        assert_eq!(report.errors, 1);
    }

    #[test]
    fn test_basic_level_omits_detail() {
        let mut strategy = AnalysisStrategy::new(AnalysisConfig {
            level: AnalysisLevel::Basic,
            ..AnalysisConfig::default()
        });
        let processed = strategy.process(event(0, EventKind::Info), &PacingContext::default());
        assert!(processed.metadata["analysis"].get("factor").is_none());
    }
}
