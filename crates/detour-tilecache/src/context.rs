//! Build context providing diagnostics and per-stage timing
//!
//! Builders report through the optional [`TileCacheLogContext`] capability.
//! [`BuildContext`] is the stock implementation: it keeps a bounded message
//! history, mirrors every message to the `log` facade and accumulates stage
//! timers.

use std::collections::HashMap;
use std::time::Duration;
use web_time::Instant;

/// Diagnostic sink handed to builders that report recoverable problems
pub trait TileCacheLogContext {
    /// Records a diagnostic message.
    fn log(&mut self, message: &str);
}

/// Log level for context messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
}

/// Pipeline stages that can be timed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerCategory {
    /// Whole tile build
    Total,
    /// Layer decompression
    Decompress,
    /// Obstacle area marking
    AreaMarking,
    DistanceField,
    Regions,
    Contours,
    PolyMesh,
    Clusters,
    DetailMesh,
}

/// Log entry containing message and metadata
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Timestamp when log was created
    pub timestamp: Instant,
    pub message: String,
}

/// Accumulated time of one stage
#[derive(Debug, Clone, Copy)]
pub struct TimerEntry {
    pub duration: Duration,
    /// Number of times this timer was stopped
    pub count: usize,
}

/// Context for tile cache builds providing logging and profiling
#[derive(Debug)]
pub struct BuildContext {
    logs: Vec<LogEntry>,
    active_timers: HashMap<TimerCategory, Instant>,
    timers: HashMap<TimerCategory, TimerEntry>,
    /// Minimum log level to record
    min_log_level: LogLevel,
    enable_timing: bool,
    /// Maximum number of log entries to keep
    max_log_entries: usize,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildContext {
    pub fn new() -> Self {
        Self {
            logs: Vec::new(),
            active_timers: HashMap::new(),
            timers: HashMap::new(),
            min_log_level: LogLevel::Info,
            enable_timing: true,
            max_log_entries: 1000,
        }
    }

    pub fn set_log_level(&mut self, level: LogLevel) {
        self.min_log_level = level;
    }

    pub fn set_timing_enabled(&mut self, enabled: bool) {
        self.enable_timing = enabled;
    }

    pub fn set_max_log_entries(&mut self, max_entries: usize) {
        self.max_log_entries = max_entries;
    }

    pub fn log_debug(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Debug, message.into());
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn log_warning(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warning, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => log::debug!("{}", message),
            LogLevel::Info => log::info!("{}", message),
            LogLevel::Warning => log::warn!("{}", message),
            LogLevel::Error => log::error!("{}", message),
        }

        if level < self.min_log_level {
            return;
        }
        self.logs.push(LogEntry {
            level,
            timestamp: Instant::now(),
            message,
        });
        if self.logs.len() > self.max_log_entries {
            self.logs.remove(0);
        }
    }

    pub fn start_timer(&mut self, category: TimerCategory) {
        if self.enable_timing {
            self.active_timers.insert(category, Instant::now());
        }
    }

    /// Stops a timer and adds the elapsed time to its total.
    pub fn stop_timer(&mut self, category: TimerCategory) {
        if !self.enable_timing {
            return;
        }
        if let Some(start) = self.active_timers.remove(&category) {
            let entry = self.timers.entry(category).or_insert(TimerEntry {
                duration: Duration::ZERO,
                count: 0,
            });
            entry.duration += start.elapsed();
            entry.count += 1;
        }
    }

    /// Total duration of a stopped timer
    pub fn timer_duration(&self, category: TimerCategory) -> Option<Duration> {
        self.timers.get(&category).map(|entry| entry.duration)
    }

    pub fn timer_count(&self, category: TimerCategory) -> usize {
        self.timers.get(&category).map_or(0, |entry| entry.count)
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn logs_by_level(&self, level: LogLevel) -> Vec<&LogEntry> {
        self.logs.iter().filter(|entry| entry.level == level).collect()
    }

    /// Clears logs and timers.
    pub fn reset(&mut self) {
        self.logs.clear();
        self.active_timers.clear();
        self.timers.clear();
    }

    /// Writes the accumulated timers to the `log` facade, slowest first.
    pub fn log_timer_summary(&self) {
        let mut sorted: Vec<_> = self.timers.iter().collect();
        sorted.sort_by(|a, b| b.1.duration.cmp(&a.1.duration));
        for (category, entry) in sorted {
            log::info!(
                "{:14} {:8.2}ms ({} calls)",
                format!("{:?}", category),
                entry.duration.as_secs_f64() * 1000.0,
                entry.count
            );
        }
    }
}

impl TileCacheLogContext for BuildContext {
    fn log(&mut self, message: &str) {
        self.log_warning(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_log_level_filtering() {
        let mut context = BuildContext::new();
        context.set_log_level(LogLevel::Warning);

        context.log_debug("Debug message");
        context.log_info("Info message");
        context.log_warning("Warning message");
        context.log_error("Error message");

        assert_eq!(context.logs().len(), 2);
        assert_eq!(context.logs()[0].level, LogLevel::Warning);
        assert_eq!(context.logs()[1].level, LogLevel::Error);
    }

    #[test]
    fn test_log_context_records_warnings() {
        let mut context = BuildContext::new();
        {
            let sink: &mut dyn TileCacheLogContext = &mut context;
            sink.log("Too many polygons");
        }
        let warnings = context.logs_by_level(LogLevel::Warning);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "Too many polygons");
    }

    #[test]
    fn test_timer_accumulation() {
        let mut context = BuildContext::new();
        for _ in 0..3 {
            context.start_timer(TimerCategory::Contours);
            thread::sleep(Duration::from_millis(2));
            context.stop_timer(TimerCategory::Contours);
        }
        assert_eq!(context.timer_count(TimerCategory::Contours), 3);
        let duration = context.timer_duration(TimerCategory::Contours).unwrap();
        assert!(duration >= Duration::from_millis(6));
    }

    #[test]
    fn test_disabled_timing() {
        let mut context = BuildContext::new();
        context.set_timing_enabled(false);
        context.start_timer(TimerCategory::Total);
        context.stop_timer(TimerCategory::Total);
        assert!(context.timer_duration(TimerCategory::Total).is_none());
    }

    #[test]
    fn test_max_log_entries() {
        let mut context = BuildContext::new();
        context.set_max_log_entries(3);
        for i in 0..5 {
            context.log_info(format!("Message {}", i));
        }
        assert_eq!(context.logs().len(), 3);
        assert_eq!(context.logs()[2].message, "Message 4");

        context.reset();
        assert!(context.logs().is_empty());
    }
}
