//! Skill lifecycle and converse counters.
//!
//! Atomic counters, cheap enough to bump from any handler.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters for skill loading and converse dispatch.
#[derive(Debug, Default)]
pub struct SkillsMetrics {
    /// Successful loads (including reloads).
    pub loaded_total: AtomicUsize,
    /// Failed construction or initialization.
    pub load_failed_total: AtomicUsize,
    /// Loads skipped because the skill is blacklisted.
    pub skipped_total: AtomicUsize,
    /// Converse requests a skill claimed.
    pub converse_handled_total: AtomicUsize,
    /// Converse requests answered with an error outcome.
    pub converse_error_total: AtomicUsize,
}

/// Point-in-time copy of [`SkillsMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub loaded_total: usize,
    pub load_failed_total: usize,
    pub skipped_total: usize,
    pub converse_handled_total: usize,
    pub converse_error_total: usize,
}

impl SkillsMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_loaded(&self) {
        self.loaded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_load_failed(&self) {
        self.load_failed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.skipped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_converse_handled(&self) {
        self.converse_handled_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_converse_error(&self) {
        self.converse_error_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            loaded_total: self.loaded_total.load(Ordering::Relaxed),
            load_failed_total: self.load_failed_total.load(Ordering::Relaxed),
            skipped_total: self.skipped_total.load(Ordering::Relaxed),
            converse_handled_total: self.converse_handled_total.load(Ordering::Relaxed),
            converse_error_total: self.converse_error_total.load(Ordering::Relaxed),
        }
    }
}
