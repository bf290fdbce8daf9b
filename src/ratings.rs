//! Aggregate ratings, maintained from review-change notices.
//!
//! Review writes never touch these numbers. Each write yields a
//! [`ReviewChanged`] naming the rated party, and [`Ratings::recalculate`]
//! rebuilds that party's summary from the review records themselves.

use dashmap::DashMap;
use serde::Serialize;
use ulid::Ulid;

use crate::model::{Review, ReviewKind};

/// The party a review rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RatingTarget {
    /// Guest-to-host reviews rate the listing.
    Property(Ulid),
    /// Host-to-guest reviews rate the guest.
    Guest(Ulid),
}

impl RatingTarget {
    pub fn of(review: &Review) -> Self {
        match review.kind {
            ReviewKind::GuestToHost => RatingTarget::Property(review.property_id),
            ReviewKind::HostToGuest => RatingTarget::Guest(review.subject_id),
        }
    }
}

/// Emitted once per committed review write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewChanged {
    pub target: RatingTarget,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RatingSummary {
    /// Mean rating rounded to one decimal; 0 when there are no reviews.
    pub average: f64,
    pub count: u32,
}

pub fn summarize<'a>(ratings: impl IntoIterator<Item = &'a Review>) -> RatingSummary {
    let (sum, count) = ratings
        .into_iter()
        .fold((0u64, 0u32), |(s, c), r| (s + u64::from(r.rating), c + 1));
    if count == 0 {
        return RatingSummary::default();
    }
    let mean = sum as f64 / f64::from(count);
    RatingSummary {
        average: (mean * 10.0).round() / 10.0,
        count,
    }
}

pub struct Ratings {
    summaries: DashMap<RatingTarget, RatingSummary>,
}

impl Default for Ratings {
    fn default() -> Self {
        Self::new()
    }
}

impl Ratings {
    pub fn new() -> Self {
        Self {
            summaries: DashMap::new(),
        }
    }

    /// Rebuild the summary for `change.target` from `load()`, which must
    /// return every current review of that target. The target's slot stays
    /// locked while loading, so concurrent recalculations cannot interleave.
    pub fn recalculate<F>(&self, change: &ReviewChanged, load: F) -> RatingSummary
    where
        F: FnOnce() -> Vec<Review>,
    {
        let mut slot = self.summaries.entry(change.target).or_default();
        let summary = summarize(&load());
        *slot = summary;
        tracing::debug!(
            target_party = ?change.target,
            average = summary.average,
            count = summary.count,
            "rating recalculated"
        );
        summary
    }

    pub fn get(&self, target: &RatingTarget) -> RatingSummary {
        self.summaries
            .get(target)
            .map(|e| *e.value())
            .unwrap_or_default()
    }
}
