use std::collections::BTreeMap;

use chrono::{DateTime, Datelike};
use serde::Serialize;
use ulid::Ulid;

use crate::model::*;
use crate::pricing;

use super::Engine;

/// Which bookings an aggregate covers. `created_*` bounds are inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsFilter {
    pub host_id: Option<Ulid>,
    pub property_id: Option<Ulid>,
    pub created_from: Option<Ms>,
    pub created_to: Option<Ms>,
}

impl StatsFilter {
    fn matches(&self, b: &Booking) -> bool {
        self.host_id.is_none_or(|h| b.host_id == h)
            && self.property_id.is_none_or(|p| b.property_id == p)
            && self.created_from.is_none_or(|t| b.created_at >= t)
            && self.created_to.is_none_or(|t| b.created_at <= t)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyTrend {
    /// `YYYY-MM` of the booking's creation, UTC.
    pub month: String,
    pub bookings: u64,
    pub revenue: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookingStats {
    pub total_bookings: u64,
    /// Sum of `total_price` over every matching booking.
    pub total_revenue: Money,
    /// Sum over bookings whose payment is `paid`.
    pub paid_revenue: Money,
    pub pending: u64,
    pub confirmed: u64,
    pub cancelled: u64,
    pub completed: u64,
    pub average_booking_value: Money,
    /// Percentage of bookings cancelled, one decimal.
    pub cancellation_rate: f64,
    pub average_nights: f64,
    /// Oldest month first.
    pub monthly: Vec<MonthlyTrend>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReviewStats {
    pub total_reviews: u64,
    pub average_rating: f64,
    /// Count of 1..=5 star reviews, index 0 is one star.
    pub breakdown: [u64; 5],
}

fn month_of(ms: Ms) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(t) => format!("{:04}-{:02}", t.year(), t.month()),
        None => "unknown".to_string(),
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub(crate) fn booking_stats_of<'a>(bookings: impl IntoIterator<Item = &'a Booking>) -> BookingStats {
    let mut stats = BookingStats::default();
    let mut nights: u64 = 0;
    let mut months: BTreeMap<String, (u64, Money)> = BTreeMap::new();

    for b in bookings {
        stats.total_bookings += 1;
        stats.total_revenue = stats.total_revenue.saturating_add(b.total_price);
        if b.payment_status == PaymentStatus::Paid {
            stats.paid_revenue = stats.paid_revenue.saturating_add(b.total_price);
        }
        match b.status {
            BookingStatus::Pending => stats.pending += 1,
            BookingStatus::Confirmed => stats.confirmed += 1,
            BookingStatus::Cancelled => stats.cancelled += 1,
            BookingStatus::Completed => stats.completed += 1,
        }
        nights += u64::from(pricing::nights(&b.stay));
        let slot = months.entry(month_of(b.created_at)).or_default();
        slot.0 += 1;
        slot.1 = slot.1.saturating_add(b.total_price);
    }

    if stats.total_bookings > 0 {
        let n = stats.total_bookings;
        stats.average_booking_value = stats.total_revenue / n as Money;
        stats.cancellation_rate = round1(stats.cancelled as f64 * 100.0 / n as f64);
        stats.average_nights = round1(nights as f64 / n as f64);
    }
    stats.monthly = months
        .into_iter()
        .map(|(month, (bookings, revenue))| MonthlyTrend {
            month,
            bookings,
            revenue,
        })
        .collect();
    stats
}

pub(crate) fn review_stats_of<'a>(reviews: impl IntoIterator<Item = &'a Review>) -> ReviewStats {
    let mut stats = ReviewStats::default();
    let mut sum: u64 = 0;
    for r in reviews {
        stats.total_reviews += 1;
        sum += u64::from(r.rating);
        if (1..=5).contains(&r.rating) {
            stats.breakdown[usize::from(r.rating - 1)] += 1;
        }
    }
    if stats.total_reviews > 0 {
        stats.average_rating = round1(sum as f64 / stats.total_reviews as f64);
    }
    stats
}

impl Engine {
    pub async fn booking_stats(&self, filter: &StatsFilter) -> BookingStats {
        let states = match filter.property_id {
            Some(pid) => self.store.get_property(&pid).into_iter().collect(),
            None => self.store.property_states(),
        };
        let mut matching = Vec::new();
        for ps in states {
            let guard = ps.read().await;
            matching.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
        }
        booking_stats_of(&matching)
    }

    /// Guest-to-host review aggregate for one property.
    pub fn review_stats(&self, property_id: Ulid) -> ReviewStats {
        let reviews = self
            .store
            .reviews_of(&crate::ratings::RatingTarget::Property(property_id));
        review_stats_of(&reviews)
    }
}
