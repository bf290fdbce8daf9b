use ulid::Ulid;

use crate::model::*;

use super::conflict::now_ms;
use super::validate::{validate_comment, validate_rating, validate_report_reason};
use super::{Engine, EngineError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub reviewer_id: Ulid,
    pub rating: u8,
    pub comment: String,
}

/// Who a reviewer is on a booking decides what the review is about.
fn review_kind(booking: &Booking, reviewer: Ulid) -> Result<(ReviewKind, Ulid), EngineError> {
    if reviewer == booking.guest_id {
        Ok((ReviewKind::GuestToHost, booking.host_id))
    } else if reviewer == booking.host_id {
        Ok((ReviewKind::HostToGuest, booking.guest_id))
    } else {
        Err(EngineError::Forbidden(
            "only the booking's guest or host may review it",
        ))
    }
}

impl Engine {
    /// Review a completed stay. Runs under the booking's property write lock,
    /// so the uniqueness check and the insert cannot interleave.
    pub async fn post_review(&self, new: NewReview) -> Result<Review, EngineError> {
        validate_rating(new.rating)?;
        validate_comment(&new.comment)?;
        let (property_id, mut guard) = self
            .resolve_entity_write("booking", new.booking_id)
            .await?;
        let booking = guard
            .booking(new.booking_id)
            .cloned()
            .ok_or(EngineError::NotFound("booking", new.booking_id))?;
        if booking.status != BookingStatus::Completed {
            return Err(EngineError::invalid(format!(
                "only completed bookings can be reviewed; booking is {}",
                booking.status
            )));
        }
        let (kind, subject_id) = review_kind(&booking, new.reviewer_id)?;
        if self
            .store
            .review_exists(new.booking_id, new.reviewer_id, kind)
        {
            return Err(EngineError::Duplicate(format!(
                "{kind} review for booking {}",
                new.booking_id
            )));
        }
        if !self.store.reserve_entity(new.id, property_id) {
            return Err(EngineError::AlreadyExists(new.id));
        }

        let review = Review {
            id: new.id,
            booking_id: new.booking_id,
            property_id,
            reviewer_id: new.reviewer_id,
            subject_id,
            rating: new.rating,
            comment: new.comment,
            kind,
            helpful_votes: 0,
            reported_count: 0,
            created_at: now_ms(),
        };
        let event = Event::ReviewPosted {
            review: review.clone(),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.store.release_entity(&new.id);
            return Err(e);
        }
        Ok(review)
    }

    pub async fn edit_review(
        &self,
        caller: Ulid,
        id: Ulid,
        rating: Option<u8>,
        comment: Option<String>,
    ) -> Result<Review, EngineError> {
        if rating.is_none() && comment.is_none() {
            return Err(EngineError::invalid("no fields to update"));
        }
        if let Some(r) = rating {
            validate_rating(r)?;
        }
        if let Some(c) = &comment {
            validate_comment(c)?;
        }
        let (property_id, mut guard) = self.resolve_entity_write("review", id).await?;
        let review = self
            .store
            .get_review(&id)
            .ok_or(EngineError::NotFound("review", id))?;
        if review.reviewer_id != caller {
            return Err(EngineError::Forbidden("only the reviewer may edit a review"));
        }

        let event = Event::ReviewEdited {
            id,
            property_id,
            rating: rating.unwrap_or(review.rating),
            comment: comment.unwrap_or(review.comment),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        self.store
            .get_review(&id)
            .ok_or(EngineError::NotFound("review", id))
    }

    pub async fn remove_review(&self, caller: Ulid, id: Ulid) -> Result<Review, EngineError> {
        let (property_id, mut guard) = self.resolve_entity_write("review", id).await?;
        let review = self
            .store
            .get_review(&id)
            .ok_or(EngineError::NotFound("review", id))?;
        if review.reviewer_id != caller {
            return Err(EngineError::Forbidden("only the reviewer may delete a review"));
        }

        let event = Event::ReviewRemoved { id, property_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(review)
    }

    /// Any registered user may vote a review helpful, once per call.
    pub async fn mark_review_helpful(&self, voter_id: Ulid, id: Ulid) -> Result<Review, EngineError> {
        if self.store.get_user(&voter_id).is_none() {
            return Err(EngineError::NotFound("user", voter_id));
        }
        let (property_id, mut guard) = self.resolve_entity_write("review", id).await?;
        if self.store.get_review(&id).is_none() {
            return Err(EngineError::NotFound("review", id));
        }

        let event = Event::ReviewMarkedHelpful {
            id,
            property_id,
            voter_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        self.store
            .get_review(&id)
            .ok_or(EngineError::NotFound("review", id))
    }

    /// Flag a review for moderation. The reason is kept in the log only.
    pub async fn report_review(
        &self,
        reporter_id: Ulid,
        id: Ulid,
        reason: Option<String>,
    ) -> Result<Review, EngineError> {
        validate_report_reason(reason.as_deref())?;
        if self.store.get_user(&reporter_id).is_none() {
            return Err(EngineError::NotFound("user", reporter_id));
        }
        let (property_id, mut guard) = self.resolve_entity_write("review", id).await?;
        if self.store.get_review(&id).is_none() {
            return Err(EngineError::NotFound("review", id));
        }

        let event = Event::ReviewReported {
            id,
            property_id,
            reporter_id,
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let review = self
            .store
            .get_review(&id)
            .ok_or(EngineError::NotFound("review", id))?;
        tracing::info!("review {id} reported by {reporter_id}, {} reports", review.reported_count);
        Ok(review)
    }
}
