use ulid::Ulid;

use crate::model::*;
use crate::pricing;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_stay(check_in: Ms, check_out: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    if check_in < MIN_VALID_TIMESTAMP_MS || check_out > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if check_out <= check_in {
        return Err(EngineError::invalid("check_out must be after check_in"));
    }
    Ok(Span::new(check_in, check_out))
}

/// Steps 2 and 3 of booking admission: guest count against capacity, then
/// nights against the stay policy. Returns the night count.
pub(crate) fn check_stay_rules(
    listing: &Property,
    stay: &Span,
    guests: u32,
) -> Result<u32, EngineError> {
    if guests == 0 {
        return Err(EngineError::invalid("guests must be at least 1"));
    }
    if guests > listing.capacity.guests {
        return Err(EngineError::invalid(format!(
            "capacity exceeded: {guests} guests, property sleeps {}",
            listing.capacity.guests
        )));
    }
    let nights = pricing::nights(stay);
    if nights < listing.policy.min_stay {
        return Err(EngineError::invalid(format!(
            "below minimum stay: {nights} nights, minimum {}",
            listing.policy.min_stay
        )));
    }
    if nights > listing.policy.max_stay {
        return Err(EngineError::invalid(format!(
            "exceeds maximum stay: {nights} nights, maximum {}",
            listing.policy.max_stay
        )));
    }
    Ok(nights)
}

/// Fail with the first pending/confirmed booking overlapping `stay`.
pub(crate) fn check_no_conflict(
    ps: &PropertyState,
    stay: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match ps.blocking(stay, exclude).next() {
        Some(existing) => Err(EngineError::Unavailable(existing.id)),
        None => Ok(()),
    }
}

pub(crate) fn price_stay(listing: &Property, nights: u32) -> Result<Money, EngineError> {
    pricing::total_price(&listing.pricing, nights)
        .ok_or_else(|| EngineError::invalid("total price overflows"))
}
