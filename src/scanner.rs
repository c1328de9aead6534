//! Keyboard-wedge barcode detection.
//!
//! USB scanners type the code as a burst of keystrokes followed by Enter or
//! Tab. A burst whose inter-key gaps all stay within `max_interval_ms` and
//! whose length falls in `min_length..=max_length` is a scan; anything else
//! is a person typing and is handed back as manual input.

use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::ScannerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "text", rename_all = "lowercase")]
pub enum ScanEvent {
    Barcode(String),
    Manual(String),
}

#[derive(Debug)]
pub struct KeystrokeScanner {
    cfg: ScannerConfig,
    /// Keys typed since the last terminator.
    typed: String,
    /// Trailing run of keys that arrived fast enough to be a scanner.
    burst: String,
    /// Set once a burst outgrows `max_length`; cleared by a pause.
    overflowed: bool,
    last_key: Option<Instant>,
}

impl KeystrokeScanner {
    pub fn new(cfg: ScannerConfig) -> Self {
        Self {
            cfg,
            typed: String::new(),
            burst: String::new(),
            overflowed: false,
            last_key: None,
        }
    }

    fn max_interval(&self) -> Duration {
        Duration::from_millis(self.cfg.max_interval_ms)
    }

    fn is_fast(&self, at: Instant) -> bool {
        self.last_key
            .is_some_and(|prev| at.saturating_duration_since(prev) <= self.max_interval())
    }

    /// Feed one keystroke. Returns an event when a terminator closes a run.
    pub fn push_key(&mut self, ch: char, at: Instant) -> Option<ScanEvent> {
        let fast = self.is_fast(at);
        self.last_key = Some(at);

        if ch == '\n' || ch == '\r' || ch == '\t' {
            return self.finish(fast);
        }
        if ch.is_control() {
            return None;
        }

        if !fast {
            self.burst.clear();
            self.overflowed = false;
        }
        self.typed.push(ch);
        if self.overflowed {
            return None;
        }
        self.burst.push(ch);

        // Longer than any barcode: this is typing, not a scan.
        if self.burst.chars().count() > self.cfg.max_length {
            debug!(len = self.burst.len(), "keystroke burst exceeded barcode length");
            self.burst.clear();
            self.overflowed = true;
        }
        None
    }

    fn finish(&mut self, fast: bool) -> Option<ScanEvent> {
        let burst = std::mem::take(&mut self.burst);
        let typed = std::mem::take(&mut self.typed);
        self.last_key = None;
        self.overflowed = false;

        let len = burst.chars().count();
        if fast && (self.cfg.min_length..=self.cfg.max_length).contains(&len) {
            info!(barcode = %burst, "keyboard scanner: barcode detected");
            return Some(ScanEvent::Barcode(burst));
        }
        (!typed.is_empty()).then_some(ScanEvent::Manual(typed))
    }

    pub fn reset(&mut self) {
        self.typed.clear();
        self.burst.clear();
        self.overflowed = false;
        self.last_key = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(scanner: &mut KeystrokeScanner, start: Instant, keys: &str, gap_ms: u64) -> Option<ScanEvent> {
        let mut last = None;
        for (i, ch) in keys.chars().enumerate() {
            let at = start + Duration::from_millis(gap_ms * i as u64);
            last = scanner.push_key(ch, at);
        }
        last
    }

    #[test]
    fn fast_burst_is_a_barcode() {
        let mut s = KeystrokeScanner::new(ScannerConfig::default());
        let event = feed(&mut s, Instant::now(), "0123456789012\n", 10);
        assert_eq!(event, Some(ScanEvent::Barcode("0123456789012".into())));
    }

    #[test]
    fn slow_typing_passes_through() {
        let mut s = KeystrokeScanner::new(ScannerConfig::default());
        let event = feed(&mut s, Instant::now(), "ipa\n", 200);
        assert_eq!(event, Some(ScanEvent::Manual("ipa".into())));
    }

    #[test]
    fn scan_after_typing_is_still_detected() {
        let mut s = KeystrokeScanner::new(ScannerConfig::default());
        let start = Instant::now();
        assert_eq!(feed(&mut s, start, "ab", 300), None);
        let later = start + Duration::from_secs(2);
        assert_eq!(feed(&mut s, later, "98765\t", 5), Some(ScanEvent::Barcode("98765".into())));
    }

    #[test]
    fn short_and_overlong_bursts_are_not_scans() {
        let mut s = KeystrokeScanner::new(ScannerConfig::default());
        assert_eq!(feed(&mut s, Instant::now(), "12\n", 5), Some(ScanEvent::Manual("12".into())));

        let long: String = std::iter::repeat('7').take(60).chain(std::iter::once('\n')).collect();
        assert_eq!(
            feed(&mut s, Instant::now(), &long, 5),
            Some(ScanEvent::Manual("7".repeat(60)))
        );
    }

    #[test]
    fn lone_terminator_is_silent() {
        let mut s = KeystrokeScanner::new(ScannerConfig::default());
        assert_eq!(s.push_key('\n', Instant::now()), None);
    }
}
