use ulid::Ulid;

use crate::limits::MAX_CALENDAR_WINDOW_MS;
use crate::model::*;
use crate::pricing;
use crate::ratings::{RatingSummary, RatingTarget};

use super::availability::{free_windows, is_available};
use super::conflict::{check_stay_rules, validate_stay};
use super::{Engine, EngineError};

/// A listing together with its derived rating.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyView {
    pub property: Property,
    pub rating: RatingSummary,
}

/// A profile together with the rating hosts have given the user as a guest.
#[derive(Debug, Clone, PartialEq)]
pub struct UserView {
    pub user: User,
    pub guest_rating: RatingSummary,
}

/// What a prospective stay would cost and whether it can be booked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub property_id: Ulid,
    pub stay: Span,
    pub nights: u32,
    /// No pending/confirmed booking overlaps the stay.
    pub available: bool,
    /// Listing is active and the stay satisfies its guest and night limits.
    pub bookable: bool,
    pub total_price: Option<Money>,
    pub currency: String,
}

impl Engine {
    /// Does any pending/confirmed booking other than `exclude` overlap the stay?
    pub async fn is_available(
        &self,
        property_id: Ulid,
        check_in: Ms,
        check_out: Ms,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let ps = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound("property", property_id))?;
        let guard = ps.read().await;
        Ok(is_available(&guard, &stay, exclude))
    }

    pub async fn quote(
        &self,
        property_id: Ulid,
        check_in: Ms,
        check_out: Ms,
        guests: Option<u32>,
    ) -> Result<Quote, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let ps = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound("property", property_id))?;
        let guard = ps.read().await;
        let listing = &guard.listing;
        let nights = pricing::nights(&stay);
        let within_rules = check_stay_rules(listing, &stay, guests.unwrap_or(1)).is_ok();
        let available = is_available(&guard, &stay, None);
        Ok(Quote {
            property_id,
            stay,
            nights,
            available,
            bookable: listing.is_active && within_rules && available,
            total_price: pricing::total_price(&listing.pricing, nights),
            currency: listing.pricing.currency.clone(),
        })
    }

    /// Open date ranges of a property between `from` and `to`.
    pub async fn open_dates(
        &self,
        property_id: Ulid,
        from: Ms,
        to: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        let window = validate_stay(from, to)?;
        if window.duration_ms() > MAX_CALENDAR_WINDOW_MS {
            return Err(EngineError::LimitExceeded("calendar window too wide"));
        }
        let ps = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound("property", property_id))?;
        let guard = ps.read().await;
        Ok(free_windows(&guard, &window))
    }

    // ── Properties ───────────────────────────────────────────

    pub fn property_rating(&self, property_id: Ulid) -> RatingSummary {
        self.ratings.get(&RatingTarget::Property(property_id))
    }

    pub async fn get_property(&self, id: Ulid) -> Result<PropertyView, EngineError> {
        let ps = self
            .store
            .get_property(&id)
            .ok_or(EngineError::NotFound("property", id))?;
        let property = ps.read().await.listing.clone();
        Ok(PropertyView {
            rating: self.property_rating(id),
            property,
        })
    }

    /// Every listing (active or not), newest first, optionally for one host.
    pub async fn list_properties(&self, host_id: Option<Ulid>) -> Vec<PropertyView> {
        let mut views = Vec::new();
        for ps in self.store.property_states() {
            let property = ps.read().await.listing.clone();
            if host_id.is_some_and(|h| h != property.host_id) {
                continue;
            }
            views.push(PropertyView {
                rating: self.property_rating(property.id),
                property,
            });
        }
        views.sort_by(|a, b| {
            b.property
                .created_at
                .cmp(&a.property.created_at)
                .then(b.property.id.cmp(&a.property.id))
        });
        views
    }

    // ── Users ────────────────────────────────────────────────

    pub fn get_user(&self, id: Ulid) -> Result<UserView, EngineError> {
        let user = self
            .store
            .get_user(&id)
            .ok_or(EngineError::NotFound("user", id))?;
        Ok(UserView {
            guest_rating: self.ratings.get(&RatingTarget::Guest(id)),
            user,
        })
    }

    /// All users in sign-up order.
    pub fn list_users(&self) -> Vec<UserView> {
        let mut users = self.store.users();
        users.sort_by_key(|u| (u.joined_at, u.id));
        users
            .into_iter()
            .map(|user| UserView {
                guest_rating: self.ratings.get(&RatingTarget::Guest(user.id)),
                user,
            })
            .collect()
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let property_id = self
            .store
            .property_for_entity(&id)
            .ok_or(EngineError::NotFound("booking", id))?;
        let ps = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound("booking", id))?;
        let guard = ps.read().await;
        guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))
    }

    /// Bookings matching `filter`, newest first.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let states = match filter.property_id {
            Some(pid) => self.store.get_property(&pid).into_iter().collect(),
            None => self.store.property_states(),
        };
        let mut out = Vec::new();
        for ps in states {
            let guard = ps.read().await;
            out.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    // ── Reviews ──────────────────────────────────────────────

    pub fn get_review(&self, id: Ulid) -> Result<Review, EngineError> {
        self.store
            .get_review(&id)
            .ok_or(EngineError::NotFound("review", id))
    }

    /// Reviews newest first, optionally narrowed by property and reviewer.
    pub fn list_reviews(&self, property_id: Option<Ulid>, reviewer_id: Option<Ulid>) -> Vec<Review> {
        let mut reviews: Vec<Review> = self
            .store
            .reviews()
            .into_iter()
            .filter(|r| property_id.is_none_or(|p| r.property_id == p))
            .filter(|r| reviewer_id.is_none_or(|u| r.reviewer_id == u))
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        reviews
    }
}
