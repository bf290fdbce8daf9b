use ulid::Ulid;

use crate::limits::MAX_BOOKINGS_PER_PROPERTY;
use crate::model::*;
use crate::pricing;

use super::conflict::{check_no_conflict, check_stay_rules, now_ms, price_stay, validate_stay};
use super::validate::{validate_reason, validate_special_requests};
use super::{Engine, EngineError};

/// A prospective booking as the guest submits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub property_id: Ulid,
    pub guest_id: Ulid,
    pub check_in: Ms,
    pub check_out: Ms,
    pub guests: u32,
    pub special_requests: Option<String>,
}

/// Payment status after a cancellation `days` (rounded up) before check-in.
///
/// Seven or more days out and one or more days out are separate tiers that
/// both grant a full refund. Inside a day the payment status is untouched.
#[allow(clippy::if_same_then_else)]
pub(crate) fn refund_on_cancel(current: PaymentStatus, days: i64) -> PaymentStatus {
    if days >= 7 {
        PaymentStatus::Refunded
    } else if days >= 1 {
        PaymentStatus::Refunded
    } else {
        current
    }
}

/// Steps 1–3 of admission against one consistent view of the property.
fn admit(engine: &Engine, ps: &PropertyState, req: &BookingRequest, stay: &Span) -> Result<u32, EngineError> {
    if !ps.listing.is_active {
        return Err(EngineError::NotFound("property", req.property_id));
    }
    if engine.store.get_user(&req.guest_id).is_none() {
        return Err(EngineError::NotFound("guest", req.guest_id));
    }
    check_stay_rules(&ps.listing, stay, req.guests)
}

impl Engine {
    /// Admit and persist a booking, failing fast in order: property, guest,
    /// capacity, stay bounds, availability.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        self.create_booking_at(req, now_ms()).await
    }

    pub(crate) async fn create_booking_at(
        &self,
        req: BookingRequest,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        let stay = validate_stay(req.check_in, req.check_out)?;
        validate_special_requests(req.special_requests.as_deref())?;
        let ps = self
            .store
            .get_property(&req.property_id)
            .ok_or(EngineError::NotFound("property", req.property_id))?;

        {
            let guard = ps.read().await;
            admit(self, &guard, &req, &stay)?;
            check_no_conflict(&guard, &stay, None)?;
        }

        let mut guard = ps.write().await;
        // Anything may have changed while unlocked: admit again, then re-check
        // the calendar inside the exclusive section.
        let nights = admit(self, &guard, &req, &stay)?;
        check_no_conflict(&guard, &stay, None)?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many bookings on property"));
        }
        let total_price = price_stay(&guard.listing, nights)?;
        let status = if guard.listing.policy.instant_book {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        };

        if !self.store.reserve_entity(req.id, req.property_id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        let booking = Booking {
            id: req.id,
            property_id: req.property_id,
            guest_id: req.guest_id,
            host_id: guard.listing.host_id,
            stay,
            guests: req.guests,
            total_price,
            currency: guard.listing.pricing.currency.clone(),
            status,
            payment_status: PaymentStatus::Pending,
            cancellation_reason: None,
            special_requests: req.special_requests,
            created_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.store.release_entity(&req.id);
            return Err(e);
        }
        tracing::debug!(
            "booking {} on {}: {nights} nights, {} {}, {}",
            booking.id,
            booking.property_id,
            booking.total_price,
            booking.currency,
            booking.status
        );
        Ok(booking)
    }

    pub async fn cancel_booking(
        &self,
        id: Ulid,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        self.cancel_booking_at(id, reason, now_ms()).await
    }

    /// Cancel as of `now`. Releases the dates and applies the refund tiers.
    pub(crate) async fn cancel_booking_at(
        &self,
        id: Ulid,
        reason: Option<String>,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        validate_reason(reason.as_deref())?;
        let (property_id, mut guard) = self.resolve_entity_write("booking", id).await?;
        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))?;
        if booking.status.is_terminal() {
            return Err(EngineError::booking_transition(
                booking.status,
                BookingStatus::Cancelled,
            ));
        }

        let days = pricing::days_until(booking.stay.start, now);
        let event = Event::BookingUpdated {
            id,
            property_id,
            status: BookingStatus::Cancelled,
            payment_status: refund_on_cancel(booking.payment_status, days),
            cancellation_reason: reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        updated(&guard, id)
    }

    /// Move a booking along pending → confirmed → completed. Cancellation
    /// goes through [`Engine::cancel_booking`].
    pub async fn update_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        if status == BookingStatus::Cancelled {
            return self.cancel_booking(id, reason).await;
        }
        let (property_id, mut guard) = self.resolve_entity_write("booking", id).await?;
        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))?;
        if !booking.status.can_transition_to(status) {
            return Err(EngineError::booking_transition(booking.status, status));
        }

        let event = Event::BookingUpdated {
            id,
            property_id,
            status,
            payment_status: booking.payment_status,
            cancellation_reason: booking.cancellation_reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        updated(&guard, id)
    }

    /// Mark a booking's payment as received.
    pub async fn record_payment(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (property_id, mut guard) = self.resolve_entity_write("booking", id).await?;
        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))?;
        if booking.status == BookingStatus::Cancelled
            || booking.payment_status != PaymentStatus::Pending
        {
            return Err(EngineError::IllegalTransition {
                entity: "payment",
                from: booking.payment_status.as_str(),
                to: PaymentStatus::Paid.as_str(),
            });
        }

        let event = Event::BookingUpdated {
            id,
            property_id,
            status: booking.status,
            payment_status: PaymentStatus::Paid,
            cancellation_reason: booking.cancellation_reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        updated(&guard, id)
    }

    /// Move a live booking to new dates and re-price it. The booking's own
    /// current stay never conflicts with its new one.
    pub async fn reschedule_booking(
        &self,
        id: Ulid,
        check_in: Ms,
        check_out: Ms,
    ) -> Result<Booking, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let (property_id, mut guard) = self.resolve_entity_write("booking", id).await?;
        let booking = guard
            .booking(id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", id))?;
        if !booking.status.blocks_availability() {
            return Err(EngineError::IllegalTransition {
                entity: "booking",
                from: booking.status.as_str(),
                to: "rescheduled",
            });
        }
        if !guard.listing.is_active {
            return Err(EngineError::NotFound("property", property_id));
        }
        let nights = check_stay_rules(&guard.listing, &stay, booking.guests)?;
        check_no_conflict(&guard, &stay, Some(id))?;
        let total_price = price_stay(&guard.listing, nights)?;

        let event = Event::BookingRescheduled {
            id,
            property_id,
            stay,
            total_price,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        updated(&guard, id)
    }
}

fn updated(ps: &PropertyState, id: Ulid) -> Result<Booking, EngineError> {
    ps.booking(id)
        .cloned()
        .ok_or(EngineError::NotFound("booking", id))
}
