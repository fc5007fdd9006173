use std::time::Duration;

use chrono::DateTime;
use microbatch_engine::{BatchOutcome, BatchTrigger, EngineEvent};

pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        return format!("{secs:.2}s");
    }
    let total = d.as_secs();
    format!("{}m{:02}s", total / 60, total % 60)
}

fn trigger_label(trigger: BatchTrigger) -> &'static str {
    match trigger {
        BatchTrigger::Size => "size",
        BatchTrigger::Timeout => "timeout",
        BatchTrigger::Drain => "drain",
    }
}

/// UTC wall-clock time of day with millisecond precision.
pub fn format_clock(timestamp_ms: i64) -> String {
    match DateTime::from_timestamp_millis(timestamp_ms) {
        Some(at) => at.format("%H:%M:%S%.3f").to_string(),
        None => "--:--:--.---".to_string(),
    }
}

pub fn format_batch_line<T>(outcome: &BatchOutcome<T>) -> String {
    let failed = outcome.results.iter().filter(|r| r.is_err()).count();
    let ok = outcome.results.len() - failed;
    format!(
        "[{}] batch #{} size={} trigger={} ok={ok} failed={failed} took={}",
        format_clock(outcome.started_at_ms),
        outcome.batch_id,
        outcome.results.len(),
        trigger_label(outcome.trigger),
        format_duration(outcome.elapsed),
    )
}

/// Engine events worth surfacing next to batch lines; the rest stay in the log.
pub fn format_engine_event(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::Warning { message } => Some(format!("warning: {message}")),
        EngineEvent::Error { message } => Some(format!("error: {message}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microbatch_engine::JobFailure;

    #[test]
    fn numbers_get_thousands_separators() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn durations_pick_a_readable_unit() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
    }

    #[test]
    fn batch_line_counts_failures() {
        let outcome = BatchOutcome {
            batch_id: 4,
            trigger: BatchTrigger::Timeout,
            started_at_ms: 3_723_045,
            elapsed: Duration::from_millis(12),
            results: vec![Ok(1u32), Err(JobFailure::new("x")), Ok(3)],
        };

        assert_eq!(
            format_batch_line(&outcome),
            "[01:02:03.045] batch #4 size=3 trigger=timeout ok=2 failed=1 took=12ms"
        );
    }

    #[test]
    fn only_warnings_and_errors_are_surfaced() {
        let warning = EngineEvent::Warning {
            message: "batch 2: processor returned 1 results for 3 jobs".into(),
        };
        assert_eq!(
            format_engine_event(&warning).as_deref(),
            Some("warning: batch 2: processor returned 1 results for 3 jobs")
        );
        let error = EngineEvent::Error {
            message: "batch 5: processor failed".into(),
        };
        assert_eq!(
            format_engine_event(&error).as_deref(),
            Some("error: batch 5: processor failed")
        );
        assert_eq!(format_engine_event(&EngineEvent::LoopIdle), None);
        assert_eq!(format_engine_event(&EngineEvent::Drained), None);
    }
}
