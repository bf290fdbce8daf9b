//! Stay length and price arithmetic. Pure functions, no state.

use crate::model::{DAY_MS, Money, Pricing, Span};

/// Nights covered by a stay, rounding a partial day up.
pub fn nights(stay: &Span) -> u32 {
    let ms = stay.duration_ms().max(0);
    let n = (ms + DAY_MS - 1) / DAY_MS;
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// `base_price × nights + cleaning_fee + service_fee`, or `None` on overflow.
pub fn total_price(pricing: &Pricing, nights: u32) -> Option<Money> {
    pricing
        .base_price
        .checked_mul(i64::from(nights))?
        .checked_add(pricing.cleaning_fee)?
        .checked_add(pricing.service_fee)
}

/// Whole days from `now` until `check_in`, rounded up. Negative once the stay has started.
pub fn days_until(check_in: i64, now: i64) -> i64 {
    let delta = check_in - now;
    if delta > 0 {
        (delta + DAY_MS - 1) / DAY_MS
    } else {
        // Truncation toward zero is ceil for negatives.
        -((-delta) / DAY_MS)
    }
}
