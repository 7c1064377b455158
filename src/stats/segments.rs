//! Compress a target's sample history into connectivity segments.
//!
//! A segment is a maximal run of consecutive samples that share the same
//! success flag. Segmenting is a pure function of the history, so it is simply
//! recomputed for every view.

use chrono::{DateTime, Local, TimeDelta, Utc};
use std::fmt;

use super::aggregator::{format_ms, TargetDisplay};
use crate::models::Sample;

/// How many distinct failure causes a segment summary lists.
const TOP_FAILURE_CAUSES: usize = 3;

const SEPARATOR: &str = "  ·  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
}

impl Connectivity {
    pub fn of(sample: &Sample) -> Self {
        if sample.success {
            Connectivity::Connected
        } else {
            Connectivity::Disconnected
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Connected => f.write_str("Connected"),
            Connectivity::Disconnected => f.write_str("Disconnected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCause {
    pub cause: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub ok_count: usize,
    pub fail_count: usize,
    /// Over successful samples that carry a round-trip time.
    pub latency: Option<LatencySummary>,
    /// Most frequent failure causes, most frequent first; ties keep first-seen order.
    pub top_failures: Vec<FailureCause>,
}

impl SegmentSummary {
    fn from_samples(samples: &[&Sample]) -> Self {
        let ok_count = samples.iter().filter(|s| s.success).count();

        let latencies: Vec<f64> = samples
            .iter()
            .filter(|s| s.success)
            .filter_map(|s| s.roundtrip_ms)
            .collect();
        let latency = (!latencies.is_empty()).then(|| LatencySummary {
            average: latencies.iter().sum::<f64>() / latencies.len() as f64,
            min: latencies.iter().copied().fold(f64::INFINITY, f64::min),
            max: latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        });

        // Vec keeps first-seen order, and the stable sort preserves it among equal counts
        let mut causes: Vec<FailureCause> = Vec::new();
        for sample in samples.iter().filter(|s| !s.success) {
            let cause = sample.failure_cause();
            match causes.iter_mut().find(|c| c.cause == cause) {
                Some(existing) => existing.count += 1,
                None => causes.push(FailureCause {
                    cause: cause.to_string(),
                    count: 1,
                }),
            }
        }
        causes.sort_by(|a, b| b.count.cmp(&a.count));
        causes.truncate(TOP_FAILURE_CAUSES);

        Self {
            ok_count,
            fail_count: samples.len() - ok_count,
            latency,
            top_failures: causes,
        }
    }

    pub fn describe(&self) -> String {
        let mut text = format!("OK {}{}Fail {}", self.ok_count, SEPARATOR, self.fail_count);

        if let Some(latency) = &self.latency {
            text.push_str(&format!(
                "{sep}Avg {:.0} ms{sep}Min {:.0} ms{sep}Max {:.0} ms",
                latency.average.round(),
                latency.min.round(),
                latency.max.round(),
                sep = SEPARATOR
            ));
        }

        if !self.top_failures.is_empty() {
            let errors: Vec<String> = self
                .top_failures
                .iter()
                .map(|c| format!("{} x{}", c.cause, c.count))
                .collect();
            text.push_str(&format!("{}Errors: {}", SEPARATOR, errors.join(", ")));
        }

        text
    }
}

/// One labelled detail of a sample, e.g. `Error=TimedOut`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleField {
    pub label: &'static str,
    pub value: String,
}

/// A single sample inside a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLeaf {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub roundtrip_ms: Option<f64>,
    pub fields: Vec<SampleField>,
}

impl SampleLeaf {
    pub fn from_sample(sample: &Sample) -> Self {
        let mut fields = vec![SampleField {
            label: "Status",
            value: if sample.success { "OK" } else { "Fail" }.to_string(),
        }];
        let mut push = |label: &'static str, value: String| fields.push(SampleField { label, value });

        let present = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

        if let Some(error) = present(&sample.error) {
            push("Error", error);
        }
        if let Some(reply) = present(&sample.reply_status) {
            if sample.error.as_deref() != Some(reply.as_str()) {
                push("Reply", reply);
            }
        }
        if let Some(address) = present(&sample.reply_address) {
            push("Address", address);
        }
        if let Some(timeout) = sample.timeout_ms {
            push("Timeout", format!("{} ms", timeout));
        }
        if let Some(kind) = present(&sample.exception_type) {
            push("Exception", kind);
        }
        if let Some(message) = present(&sample.exception_message) {
            push("Message", message);
        }

        Self {
            timestamp: sample.timestamp,
            success: sample.success,
            roundtrip_ms: sample.roundtrip_ms,
            fields,
        }
    }

    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}={}", f.label, f.value))
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    }

    pub fn to_node(&self) -> HistoryNode {
        HistoryNode::leaf(
            format!(
                "{}  {}  {}",
                format_time(self.timestamp),
                if self.success { "OK" } else { "FAIL" },
                format_ms(self.roundtrip_ms)
            ),
            self.describe(),
        )
    }
}

/// A maximal run of samples with the same connectivity.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySegment {
    pub classification: Connectivity,
    pub start_ts: DateTime<Utc>,
    /// Never earlier than `start_ts`.
    pub end_ts: DateTime<Utc>,
    pub duration: TimeDelta,
    pub sample_count: usize,
    pub summary: SegmentSummary,
    pub children: Vec<SampleLeaf>,
}

impl HistorySegment {
    fn from_run(classification: Connectivity, run: &[&Sample]) -> Option<Self> {
        let first = run.first()?;
        let last = run.last()?;
        let start_ts = first.timestamp;
        let end_ts = last.timestamp.max(start_ts);

        Some(Self {
            classification,
            start_ts,
            end_ts,
            duration: end_ts - start_ts,
            sample_count: run.len(),
            summary: SegmentSummary::from_samples(run),
            children: run.iter().map(|s| SampleLeaf::from_sample(s)).collect(),
        })
    }

    pub fn header(&self) -> String {
        format!(
            "{}  {} - {}  ({})  [{} samples]",
            self.classification,
            format_time(self.start_ts),
            format_time(self.end_ts),
            format_duration(self.duration),
            self.sample_count
        )
    }

    pub fn to_node(&self) -> HistoryNode {
        HistoryNode {
            header: self.header(),
            description: Some(self.summary.describe()),
            children: self.children.iter().map(SampleLeaf::to_node).collect(),
        }
    }
}

/// Split an ordered history into segments at every success-flag transition.
pub fn segment_history<'a, I>(samples: I) -> Vec<HistorySegment>
where
    I: IntoIterator<Item = &'a Sample>,
{
    let mut segments = Vec::new();
    let mut current: Option<Connectivity> = None;
    let mut run: Vec<&Sample> = Vec::new();

    for sample in samples {
        let state = Connectivity::of(sample);
        if current != Some(state) {
            if let Some(class) = current {
                segments.extend(HistorySegment::from_run(class, &run));
            }
            run.clear();
            current = Some(state);
        }
        run.push(sample);
    }

    if let Some(class) = current {
        segments.extend(HistorySegment::from_run(class, &run));
    }

    segments
}

/// Generic tree node consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryNode {
    pub header: String,
    pub description: Option<String>,
    pub children: Vec<HistoryNode>,
}

impl HistoryNode {
    pub fn leaf(header: String, description: String) -> Self {
        Self {
            header,
            description: Some(description),
            children: Vec::new(),
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Indented plain-text rendering, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        out.push_str(&self.header);
        out.push('\n');
        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(&indent);
            out.push_str("  ");
            out.push_str(description);
            out.push('\n');
        }
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}

/// Root node for one target: its stats line plus its segments.
pub fn target_node<'a, I>(display: &TargetDisplay, history: I) -> HistoryNode
where
    I: IntoIterator<Item = &'a Sample>,
{
    HistoryNode {
        header: format!("{} ({})", display.name, display.host),
        description: Some(format!(
            "{}{}{}",
            display.summary_line, SEPARATOR, display.range_line
        )),
        children: segment_history(history)
            .iter()
            .map(HistorySegment::to_node)
            .collect(),
    }
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

pub fn format_duration(duration: TimeDelta) -> String {
    let ms = duration.num_milliseconds() as f64;
    if ms < 1_000.0 {
        format!("{:.0} ms", ms)
    } else if ms < 60_000.0 {
        format!("{:.1} s", ms / 1_000.0)
    } else if ms < 3_600_000.0 {
        format!("{:.1} min", ms / 60_000.0)
    } else {
        format!("{:.1} h", ms / 3_600_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProbeTarget;
    use crate::stats::aggregator::NO_VALUE;
    use chrono::TimeZone;

    fn target() -> ProbeTarget {
        ProbeTarget::new("Router", "192.168.178.1", 1000, 1000)
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn ok(secs: i64, rtt: f64) -> Sample {
        Sample::ok(&target(), ts(secs), rtt)
    }

    fn fail(secs: i64, cause: &str) -> Sample {
        Sample::failed(&target(), ts(secs), cause)
    }

    #[test]
    fn test_segments_split_on_transitions() {
        let history = vec![ok(0, 10.0), ok(1, 20.0), fail(2, "TimedOut"), ok(3, 30.0)];
        let segments = segment_history(&history);

        let counts: Vec<usize> = segments.iter().map(|s| s.sample_count).collect();
        let classes: Vec<Connectivity> = segments.iter().map(|s| s.classification).collect();
        assert_eq!(counts, vec![2, 1, 1]);
        assert_eq!(
            classes,
            vec![
                Connectivity::Connected,
                Connectivity::Disconnected,
                Connectivity::Connected
            ]
        );

        assert_eq!(segments[0].start_ts, ts(0));
        assert_eq!(segments[0].end_ts, ts(1));
        assert_eq!(segments[0].duration, TimeDelta::seconds(1));
        assert_eq!(segments[1].duration, TimeDelta::zero());
    }

    #[test]
    fn test_segment_counts_sum_to_input() {
        let history: Vec<Sample> = (0..50)
            .map(|i| {
                if (i / 3) % 2 == 0 || i % 7 == 0 {
                    ok(i, i as f64)
                } else {
                    fail(i, "TimedOut")
                }
            })
            .collect();
        let segments = segment_history(&history);

        assert_eq!(segments.iter().map(|s| s.sample_count).sum::<usize>(), 50);
        for pair in segments.windows(2) {
            assert_ne!(pair[0].classification, pair[1].classification);
        }

        let transitions = history
            .windows(2)
            .filter(|w| w[0].success != w[1].success)
            .count();
        assert_eq!(segments.len(), transitions + 1);
    }

    #[test]
    fn test_empty_history() {
        assert!(segment_history(&Vec::<Sample>::new()).is_empty());
    }

    #[test]
    fn test_end_clamped_to_start() {
        let history = vec![fail(10, "TimedOut"), fail(5, "TimedOut")];
        let segments = segment_history(&history);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end_ts, ts(10));
        assert_eq!(segments[0].duration, TimeDelta::zero());
    }

    #[test]
    fn test_summary_latency_and_counts() {
        let mut no_rtt = ok(3, 0.0);
        no_rtt.roundtrip_ms = None;
        let history = vec![ok(0, 10.0), ok(1, 20.0), ok(2, 45.0), no_rtt];
        let summary = &segment_history(&history)[0].summary;

        assert_eq!(summary.ok_count, 4);
        assert_eq!(summary.fail_count, 0);
        assert_eq!(
            summary.latency,
            Some(LatencySummary {
                average: 25.0,
                min: 10.0,
                max: 45.0
            })
        );
        assert_eq!(
            summary.describe(),
            "OK 4  ·  Fail 0  ·  Avg 25 ms  ·  Min 10 ms  ·  Max 45 ms"
        );
    }

    #[test]
    fn test_summary_latency_rounds_halves_up() {
        let history = vec![ok(0, 2.5), ok(1, 4.5)];
        let summary = &segment_history(&history)[0].summary;

        assert_eq!(
            summary.describe(),
            "OK 2  ·  Fail 0  ·  Avg 4 ms  ·  Min 3 ms  ·  Max 5 ms"
        );
    }

    #[test]
    fn test_top_failures_ranked_with_first_seen_ties() {
        let mut by_kind = fail(5, "ignored");
        by_kind.error = None;
        by_kind.reply_status = None;
        by_kind.exception_type = Some("Network".to_string());

        let mut unknown = fail(6, "ignored");
        unknown.error = None;
        unknown.reply_status = None;

        let history = vec![
            fail(0, "DestinationHostUnreachable"),
            fail(1, "TimedOut"),
            fail(2, "TimedOut"),
            by_kind,
            fail(4, "DestinationHostUnreachable"),
            unknown,
            fail(7, "TtlExpired"),
        ];
        let summary = &segment_history(&history)[0].summary;

        let top: Vec<(&str, usize)> = summary
            .top_failures
            .iter()
            .map(|c| (c.cause.as_str(), c.count))
            .collect();
        assert_eq!(
            top,
            vec![
                ("DestinationHostUnreachable", 2),
                ("TimedOut", 2),
                ("Network", 1)
            ]
        );
        assert!(summary
            .describe()
            .ends_with("Errors: DestinationHostUnreachable x2, TimedOut x2, Network x1"));
    }

    #[test]
    fn test_leaf_fields() {
        let mut sample = fail(0, "TimedOut");
        sample.reply_address = Some("10.0.0.1".to_string());
        let leaf = SampleLeaf::from_sample(&sample);
        // Reply status equal to the error is not repeated
        assert_eq!(
            leaf.describe(),
            "Status=Fail  ·  Error=TimedOut  ·  Address=10.0.0.1  ·  Timeout=1000 ms"
        );

        let errored = Sample::errored(&target(), ts(1), "Resolve", "no such host");
        let labels: Vec<&str> = SampleLeaf::from_sample(&errored)
            .fields
            .iter()
            .map(|f| f.label)
            .collect();
        assert_eq!(labels, vec!["Status", "Error", "Timeout", "Exception", "Message"]);

        let mut distinct = ok(2, 3.0);
        distinct.reply_status = Some("Success".to_string());
        distinct.timeout_ms = None;
        assert_eq!(
            SampleLeaf::from_sample(&distinct).describe(),
            "Status=OK  ·  Reply=Success"
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(TimeDelta::milliseconds(250)), "250 ms");
        assert_eq!(format_duration(TimeDelta::milliseconds(1_500)), "1.5 s");
        assert_eq!(format_duration(TimeDelta::seconds(90)), "1.5 min");
        assert_eq!(format_duration(TimeDelta::minutes(150)), "2.5 h");
    }

    #[test]
    fn test_node_tree_shape() {
        let history = vec![ok(0, 10.0), fail(1, "TimedOut"), fail(2, "TimedOut")];
        let display = TargetDisplay {
            name: "Router".to_string(),
            host: "192.168.178.1".to_string(),
            current: NO_VALUE.to_string(),
            status: "TimedOut".to_string(),
            average: "10 ms".to_string(),
            loss: "66.7%".to_string(),
            min: "10 ms".to_string(),
            max: "10 ms".to_string(),
            counts: String::new(),
            summary_line: "Avg 10 ms  ·  Loss 66.7%".to_string(),
            range_line: "Min 10 ms  ·  Max 10 ms".to_string(),
            last_updated: String::new(),
        };

        let node = target_node(&display, &history);
        assert_eq!(node.header, "Router (192.168.178.1)");
        assert_eq!(
            node.description.as_deref(),
            Some("Avg 10 ms  ·  Loss 66.7%  ·  Min 10 ms  ·  Max 10 ms")
        );
        assert_eq!(node.children.len(), 2);
        assert!(node.children[0].header.starts_with("Connected  "));
        assert!(node.children[1].header.ends_with("(1.0 s)  [2 samples]"));
        assert_eq!(node.children[1].children.len(), 2);
        assert!(node.children[1].children[0].header.ends_with("  FAIL  —"));
        assert!(!node.children[1].children[0].has_children());
        assert_eq!(node.render().lines().count(), 1 + 1 + 2 * 2 + 3 * 2);
    }
}
