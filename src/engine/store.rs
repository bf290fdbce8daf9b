use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;
use crate::ratings::{RatingTarget, ReviewChanged};

pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

/// In-memory marketplace records.
///
/// Properties (with their bookings) sit behind per-property locks. Users and
/// reviews are plain map entries; writers serialise on the catalogue mutex or
/// on the owning property's write lock before touching them.
pub struct MarketStore {
    properties: DashMap<Ulid, SharedPropertyState>,
    /// Booking and review id → property id.
    entity_to_property: DashMap<Ulid, Ulid>,
    users: DashMap<Ulid, User>,
    /// Lowercased email → user id.
    emails: DashMap<String, Ulid>,
    reviews: DashMap<Ulid, Review>,
    /// (booking, reviewer, kind) → review id.
    review_keys: DashMap<(Ulid, Ulid, ReviewKind), Ulid>,
    reviews_by_target: DashMap<RatingTarget, Vec<Ulid>>,
}

impl Default for MarketStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketStore {
    pub fn new() -> Self {
        Self {
            properties: DashMap::new(),
            entity_to_property: DashMap::new(),
            users: DashMap::new(),
            emails: DashMap::new(),
            reviews: DashMap::new(),
            review_keys: DashMap::new(),
            reviews_by_target: DashMap::new(),
        }
    }

    // ── Properties ───────────────────────────────────────────

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn contains_property(&self, id: &Ulid) -> bool {
        self.properties.contains_key(id)
    }

    pub fn get_property(&self, id: &Ulid) -> Option<SharedPropertyState> {
        self.properties.get(id).map(|e| e.value().clone())
    }

    pub fn property_states(&self) -> Vec<SharedPropertyState> {
        self.properties.iter().map(|e| e.value().clone()).collect()
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn property_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_property.get(entity_id).map(|e| *e.value())
    }

    /// Claim `entity_id` for `property_id`. False if the id is already taken.
    pub fn reserve_entity(&self, entity_id: Ulid, property_id: Ulid) -> bool {
        match self.entity_to_property.entry(entity_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(property_id);
                true
            }
        }
    }

    pub fn release_entity(&self, entity_id: &Ulid) {
        self.entity_to_property.remove(entity_id);
    }

    // ── Users ────────────────────────────────────────────────

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn get_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn user_id_by_email(&self, email: &str) -> Option<Ulid> {
        self.emails.get(email).map(|e| *e.value())
    }

    pub fn users(&self) -> Vec<User> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    // ── Reviews ──────────────────────────────────────────────

    pub fn get_review(&self, id: &Ulid) -> Option<Review> {
        self.reviews.get(id).map(|e| e.value().clone())
    }

    pub fn review_exists(&self, booking_id: Ulid, reviewer_id: Ulid, kind: ReviewKind) -> bool {
        self.review_keys.contains_key(&(booking_id, reviewer_id, kind))
    }

    pub fn reviews(&self) -> Vec<Review> {
        self.reviews.iter().map(|e| e.value().clone()).collect()
    }

    /// Every current review of `target`.
    pub fn reviews_of(&self, target: &RatingTarget) -> Vec<Review> {
        let ids = self
            .reviews_by_target
            .get(target)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        ids.iter().filter_map(|id| self.get_review(id)).collect()
    }

    pub fn rating_targets(&self) -> Vec<RatingTarget> {
        self.reviews_by_target.iter().map(|e| *e.key()).collect()
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event that does not live inside a property lock:
    /// user records and new listings.
    pub fn apply_catalog_event(&self, event: &Event) {
        match event {
            Event::UserRegistered { user } | Event::UserUpdated { user } => {
                self.emails.insert(user.email.clone(), user.id);
                self.users.insert(user.id, user.clone());
            }
            Event::PropertyListed { property } => {
                let ps = PropertyState::new(property.clone());
                self.properties.insert(property.id, Arc::new(RwLock::new(ps)));
            }
            _ => {}
        }
    }

    /// Apply an event to a property the caller holds the write lock for.
    /// Review events report the rating target they touched.
    pub fn apply_property_event(
        &self,
        ps: &mut PropertyState,
        event: &Event,
    ) -> Option<ReviewChanged> {
        match event {
            Event::PropertyUpdated { property } => {
                ps.listing = property.clone();
                None
            }
            Event::BookingCreated { booking } => {
                self.entity_to_property.insert(booking.id, booking.property_id);
                ps.insert_booking(booking.clone());
                None
            }
            Event::BookingUpdated {
                id,
                status,
                payment_status,
                cancellation_reason,
                ..
            } => {
                if let Some(b) = ps.booking_mut(*id) {
                    b.status = *status;
                    b.payment_status = *payment_status;
                    b.cancellation_reason = cancellation_reason.clone();
                }
                None
            }
            Event::BookingRescheduled {
                id,
                stay,
                total_price,
                ..
            } => {
                if let Some(mut b) = ps.remove_booking(*id) {
                    b.stay = *stay;
                    b.total_price = *total_price;
                    ps.insert_booking(b);
                }
                None
            }
            Event::ReviewPosted { review } => {
                let target = RatingTarget::of(review);
                self.entity_to_property.insert(review.id, review.property_id);
                self.review_keys.insert(
                    (review.booking_id, review.reviewer_id, review.kind),
                    review.id,
                );
                self.reviews_by_target.entry(target).or_default().push(review.id);
                self.reviews.insert(review.id, review.clone());
                Some(ReviewChanged { target })
            }
            Event::ReviewEdited {
                id, rating, comment, ..
            } => {
                let mut review = self.reviews.get_mut(id)?;
                review.rating = *rating;
                review.comment = comment.clone();
                Some(ReviewChanged {
                    target: RatingTarget::of(&review),
                })
            }
            Event::ReviewRemoved { id, .. } => {
                let (_, review) = self.reviews.remove(id)?;
                let target = RatingTarget::of(&review);
                self.entity_to_property.remove(id);
                self.review_keys
                    .remove(&(review.booking_id, review.reviewer_id, review.kind));
                if let Some(mut ids) = self.reviews_by_target.get_mut(&target) {
                    ids.retain(|r| r != id);
                }
                self.reviews_by_target.remove_if(&target, |_, ids| ids.is_empty());
                Some(ReviewChanged { target })
            }
            // Feedback counters never move a rating.
            Event::ReviewMarkedHelpful { id, .. } => {
                if let Some(mut review) = self.reviews.get_mut(id) {
                    review.helpful_votes = review.helpful_votes.saturating_add(1);
                }
                None
            }
            Event::ReviewReported { id, .. } => {
                if let Some(mut review) = self.reviews.get_mut(id) {
                    review.reported_count = review.reported_count.saturating_add(1);
                }
                None
            }
            Event::UserRegistered { .. } | Event::UserUpdated { .. } | Event::PropertyListed { .. } => {
                None
            }
        }
    }
}
