//! Field-level checks for records entering the marketplace.

use crate::limits::*;
use crate::model::*;

use super::EngineError;

fn bounded(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.chars().count() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn required(value: &str, what: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::invalid(format!("{what} is required")));
    }
    Ok(())
}

/// `local@domain.tld`, no whitespace.
pub(crate) fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

pub(crate) fn validate_user(user: &User) -> Result<(), EngineError> {
    if !is_valid_email(&user.email) {
        return Err(EngineError::invalid(format!("invalid email: {}", user.email)));
    }
    bounded(&user.email, MAX_EMAIL_LEN, "email too long")?;
    required(&user.first_name, "first_name")?;
    required(&user.last_name, "last_name")?;
    bounded(&user.first_name, MAX_NAME_LEN, "first_name too long")?;
    bounded(&user.last_name, MAX_NAME_LEN, "last_name too long")?;
    if let Some(phone) = &user.phone {
        bounded(phone, MAX_PHONE_LEN, "phone too long")?;
    }
    Ok(())
}

pub(crate) fn validate_property(p: &Property) -> Result<(), EngineError> {
    required(&p.title, "title")?;
    bounded(&p.title, MAX_TITLE_LEN, "title too long")?;
    bounded(&p.description, MAX_DESCRIPTION_LEN, "description too long")?;

    let loc = &p.location;
    required(&loc.city, "city")?;
    required(&loc.country, "country")?;
    for field in [&loc.address, &loc.city, &loc.state, &loc.country] {
        bounded(field, MAX_ADDRESS_LEN, "location field too long")?;
    }
    if !(-90.0..=90.0).contains(&loc.latitude) {
        return Err(EngineError::invalid("latitude must be within [-90, 90]"));
    }
    if !(-180.0..=180.0).contains(&loc.longitude) {
        return Err(EngineError::invalid("longitude must be within [-180, 180]"));
    }

    let cap = &p.capacity;
    if !(1..=MAX_GUESTS).contains(&cap.guests) {
        return Err(EngineError::invalid(format!("guests must be within 1..={MAX_GUESTS}")));
    }
    if cap.bedrooms > MAX_BEDROOMS {
        return Err(EngineError::invalid(format!("bedrooms must be at most {MAX_BEDROOMS}")));
    }
    if !(1..=MAX_BEDS).contains(&cap.beds) {
        return Err(EngineError::invalid(format!("beds must be within 1..={MAX_BEDS}")));
    }
    if !(MIN_BATHROOMS..=MAX_BATHROOMS).contains(&cap.bathrooms) || (cap.bathrooms * 2.0).fract() != 0.0 {
        return Err(EngineError::invalid(
            "bathrooms must be a multiple of 0.5 within [0.5, 10]",
        ));
    }

    let price = &p.pricing;
    for (value, name) in [
        (price.base_price, "base_price"),
        (price.cleaning_fee, "cleaning_fee"),
        (price.service_fee, "service_fee"),
    ] {
        if value < 0 {
            return Err(EngineError::invalid(format!("{name} must not be negative")));
        }
        if value > MAX_PRICE {
            return Err(EngineError::LimitExceeded("price too large"));
        }
    }
    if price.currency.len() != 3 || !price.currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(EngineError::invalid(format!(
            "currency must be a 3-letter code: {}",
            price.currency
        )));
    }

    let policy = &p.policy;
    if !(1..=MAX_STAY_NIGHTS).contains(&policy.min_stay)
        || !(1..=MAX_STAY_NIGHTS).contains(&policy.max_stay)
    {
        return Err(EngineError::invalid(format!(
            "stay bounds must be within 1..={MAX_STAY_NIGHTS}"
        )));
    }
    if policy.min_stay > policy.max_stay {
        return Err(EngineError::invalid("min_stay exceeds max_stay"));
    }

    for list in [&p.amenities, &p.house_rules] {
        if list.len() > MAX_TAGS {
            return Err(EngineError::LimitExceeded("too many amenities or house rules"));
        }
        for tag in list {
            bounded(tag, MAX_TAG_LEN, "amenity or house rule too long")?;
        }
    }
    Ok(())
}

pub(crate) fn validate_rating(rating: u8) -> Result<(), EngineError> {
    if !(1..=5).contains(&rating) {
        return Err(EngineError::invalid("rating must be within 1..=5"));
    }
    Ok(())
}

pub(crate) fn validate_comment(comment: &str) -> Result<(), EngineError> {
    required(comment, "comment")?;
    bounded(comment, MAX_COMMENT_LEN, "comment too long")
}

pub(crate) fn validate_reason(reason: Option<&str>) -> Result<(), EngineError> {
    match reason {
        Some(r) => bounded(r, MAX_REASON_LEN, "cancellation reason too long"),
        None => Ok(()),
    }
}

pub(crate) fn validate_report_reason(reason: Option<&str>) -> Result<(), EngineError> {
    match reason {
        Some(r) => bounded(r, MAX_REASON_LEN, "report reason too long"),
        None => Ok(()),
    }
}

pub(crate) fn validate_special_requests(text: Option<&str>) -> Result<(), EngineError> {
    match text {
        Some(t) => bounded(t, MAX_SPECIAL_REQUESTS_LEN, "special requests too long"),
        None => Ok(()),
    }
}
