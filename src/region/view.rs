//! Effective routing view.
//!
//! The registry never changes after startup. Failover instead publishes a
//! new immutable `RoutingView` describing which share of each primary's
//! traffic is redirected to its secondary. Readers load the current view
//! without locking; the orchestrator is the only writer.

use crate::core::RegionId;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Share of a primary's traffic redirected to its secondary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficShift {
    /// Region receiving the redirected traffic
    pub secondary: RegionId,
    /// Percentage redirected (0-100)
    pub percent: u8,
}

/// Immutable routing overlay.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingView {
    shifts: BTreeMap<RegionId, TrafficShift>,
    version: u64,
}

impl RoutingView {
    /// View with no shifts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic version, bumped on every published change.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Check if no traffic is redirected.
    pub fn is_identity(&self) -> bool {
        self.shifts.is_empty()
    }

    /// Get the shift applied to a primary.
    pub fn shift_for(&self, primary: &str) -> Option<&TrafficShift> {
        self.shifts.get(primary)
    }

    /// Percentage of a primary's traffic that is redirected.
    pub fn shifted_percent(&self, primary: &str) -> u8 {
        self.shift_for(primary).map(|s| s.percent).unwrap_or(0)
    }

    /// Iterate over all shifts.
    pub fn shifts(&self) -> impl Iterator<Item = (&RegionId, &TrafficShift)> {
        self.shifts.iter()
    }

    /// Copy of this view with a shift set for `primary`.
    pub fn with_shift(&self, primary: &str, secondary: &str, percent: u8) -> Self {
        let mut next = self.clone();
        next.shifts.insert(
            primary.to_string(),
            TrafficShift {
                secondary: secondary.to_string(),
                percent: percent.min(100),
            },
        );
        next.version += 1;
        next
    }

    /// Copy of this view with `primary`'s shift removed.
    pub fn without_shift(&self, primary: &str) -> Self {
        let mut next = self.clone();
        next.shifts.remove(primary);
        next.version += 1;
        next
    }

    /// Resolve one request's target through the view.
    ///
    /// With probability `percent / 100` a shifted primary resolves to its
    /// secondary; unshifted regions resolve to themselves.
    pub fn resolve<'a, R: Rng>(&'a self, region: &'a str, rng: &mut R) -> &'a str {
        match self.shifts.get(region) {
            Some(shift) if shift.percent >= 100 => &shift.secondary,
            Some(shift) if shift.percent > 0 && rng.gen_range(0..100u8) < shift.percent => {
                &shift.secondary
            }
            _ => region,
        }
    }

    /// Move shifted weight from each primary onto its secondary.
    ///
    /// Weight destined for a secondary that is not among `weights` is
    /// dropped, so an ineligible secondary never receives traffic.
    pub fn redistribute(&self, weights: &mut [(RegionId, f64)]) {
        if self.shifts.is_empty() {
            return;
        }
        let mut moved: Vec<(RegionId, f64)> = Vec::new();
        for (id, weight) in weights.iter_mut() {
            if let Some(shift) = self.shifts.get(id.as_str()) {
                let share = *weight * f64::from(shift.percent) / 100.0;
                *weight -= share;
                moved.push((shift.secondary.clone(), share));
            }
        }
        for (secondary, share) in moved {
            if let Some((_, weight)) = weights.iter_mut().find(|(id, _)| *id == secondary) {
                *weight += share;
            }
        }
    }
}

/// Atomically swapped cell holding the current `RoutingView`.
#[derive(Debug)]
pub struct RoutingViewCell {
    inner: ArcSwap<RoutingView>,
    /// Serializes writers; readers never touch it
    writer: Mutex<()>,
}

impl Default for RoutingViewCell {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingViewCell {
    pub fn new() -> Self {
        Self {
            inner: ArcSwap::from_pointee(RoutingView::new()),
            writer: Mutex::new(()),
        }
    }

    /// Current view; never blocks.
    pub fn snapshot(&self) -> Arc<RoutingView> {
        self.inner.load_full()
    }

    /// Publish a shift for `primary`.
    pub fn apply_shift(&self, primary: &str, secondary: &str, percent: u8) -> Arc<RoutingView> {
        let _writer = self.writer.lock();
        let next = Arc::new(self.inner.load().with_shift(primary, secondary, percent));
        self.inner.store(next.clone());
        next
    }

    /// Remove `primary`'s shift.
    pub fn clear_shift(&self, primary: &str) -> Arc<RoutingView> {
        let _writer = self.writer.lock();
        let next = Arc::new(self.inner.load().without_shift(primary));
        self.inner.store(next.clone());
        next
    }
}
