//! Live subtitle aggregation.
//!
//! Interim transcript fragments for a speaker overwrite each other in place until
//! a final one lands; final entries stay until they age out or are pushed out by
//! newer lines.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::SubtitleConfig;
use crate::messages::LiveSubtitle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleEntry {
    pub speaker_id: String,
    pub text: String,
    pub is_final: bool,
    pub timestamp: Instant,
}

/// Bounded, time-decayed subtitle list in arrival order.
///
/// # Guarantees
/// * At most one non-final entry per speaker.
/// * No entry older than the TTL survives an update.
/// * Never more than `capacity` entries; the most recent are kept.
#[derive(Debug, Clone)]
pub struct SubtitleBuffer {
    ttl: Duration,
    capacity: usize,
    entries: VecDeque<SubtitleEntry>,
}

impl SubtitleBuffer {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn from_config(config: &SubtitleConfig) -> Self {
        Self::new(Duration::from_millis(config.ttl_ms), config.capacity)
    }

    pub fn apply(&mut self, event: LiveSubtitle, now: Instant) {
        let interim = self
            .entries
            .iter_mut()
            .find(|e| e.speaker_id == event.speaker_id && !e.is_final);
        let entry = SubtitleEntry {
            speaker_id: event.speaker_id,
            text: event.text,
            is_final: event.is_final,
            timestamp: now,
        };
        match interim {
            Some(slot) => *slot = entry,
            None => self.entries.push_back(entry),
        }
        self.expire(now);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Drops entries that have outlived the TTL.
    pub fn expire(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|e| now.saturating_duration_since(e.timestamp) < ttl);
    }

    pub fn entries(&self) -> Vec<SubtitleEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(speaker: &str, text: &str, is_final: bool) -> LiveSubtitle {
        LiveSubtitle {
            speaker_id: speaker.into(),
            text: text.into(),
            is_final,
        }
    }

    fn texts(buf: &SubtitleBuffer) -> Vec<String> {
        buf.entries().into_iter().map(|e| e.text).collect()
    }

    #[test]
    fn interim_replaced_in_place_until_final() {
        let mut buf = SubtitleBuffer::new(Duration::from_secs(10), 5);
        let t0 = Instant::now();
        buf.apply(line("a", "hel", false), t0);
        buf.apply(line("b", "hi", true), t0);
        buf.apply(line("a", "hello", false), t0 + Duration::from_millis(200));
        assert_eq!(texts(&buf), vec!["hello", "hi"]);
        buf.apply(line("a", "hello there", true), t0 + Duration::from_millis(400));
        buf.apply(line("a", "next", false), t0 + Duration::from_millis(600));
        assert_eq!(texts(&buf), vec!["hello there", "hi", "next"]);
        let interim = buf.entries().iter().filter(|e| e.speaker_id == "a" && !e.is_final).count();
        assert_eq!(interim, 1);
    }

    #[test]
    fn capacity_keeps_most_recent() {
        let mut buf = SubtitleBuffer::new(Duration::from_secs(10), 5);
        let t0 = Instant::now();
        for n in 0..8 {
            buf.apply(line("a", &format!("line {n}"), true), t0 + Duration::from_millis(n));
        }
        assert_eq!(buf.len(), 5);
        assert_eq!(texts(&buf)[0], "line 3");
        assert_eq!(texts(&buf)[4], "line 7");
    }

    #[test]
    fn stale_entries_expire_on_update() {
        let mut buf = SubtitleBuffer::new(Duration::from_secs(10), 5);
        let t0 = Instant::now();
        buf.apply(line("a", "old", true), t0);
        buf.apply(line("b", "fresh", true), t0 + Duration::from_secs(10));
        assert_eq!(texts(&buf), vec!["fresh"]);
        buf.clear();
        assert!(buf.is_empty());
    }
}
