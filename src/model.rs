use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Amount in minor currency units.
pub type Money = i64;

pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`. For a stay, `start` is check-in and `end` is check-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Enumerations ─────────────────────────────────────────────────

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "invalid {}: {other}",
                        stringify!($name)
                    )),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    EntireHome,
    PrivateRoom,
    SharedRoom,
}

text_enum!(PropertyType {
    EntireHome => "entire-home",
    PrivateRoom => "private-room",
    SharedRoom => "shared-room",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

text_enum!(BookingStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Cancelled => "cancelled",
    Completed => "completed",
});

impl BookingStatus {
    /// Only pending and confirmed bookings hold their dates.
    pub fn blocks_availability(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

text_enum!(PaymentStatus {
    Pending => "pending",
    Paid => "paid",
    Refunded => "refunded",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewKind {
    GuestToHost,
    HostToGuest,
}

text_enum!(ReviewKind {
    GuestToHost => "guest-to-host",
    HostToGuest => "host-to-guest",
});

// ── Records ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    /// Stored lowercase; unique per marketplace.
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub is_host: bool,
    pub is_verified: bool,
    pub joined_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    pub guests: u32,
    pub bedrooms: u32,
    pub beds: u32,
    pub bathrooms: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// Per night.
    pub base_price: Money,
    pub cleaning_fee: Money,
    pub service_fee: Money,
    pub currency: String,
}

/// Stay-length bounds (in nights) and the instant-book flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayPolicy {
    pub min_stay: u32,
    pub max_stay: u32,
    pub instant_book: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: Ulid,
    pub host_id: Ulid,
    pub title: String,
    pub description: String,
    pub kind: PropertyType,
    pub location: Location,
    pub pricing: Pricing,
    pub capacity: Capacity,
    pub policy: StayPolicy,
    pub amenities: Vec<String>,
    pub house_rules: Vec<String>,
    pub is_active: bool,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub property_id: Ulid,
    pub guest_id: Ulid,
    pub host_id: Ulid,
    pub stay: Span,
    pub guests: u32,
    pub total_price: Money,
    pub currency: String,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub cancellation_reason: Option<String>,
    pub special_requests: Option<String>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub property_id: Ulid,
    pub reviewer_id: Ulid,
    /// The rated party: the host for guest-to-host, the guest for host-to-guest.
    pub subject_id: Ulid,
    pub rating: u8,
    pub comment: String,
    pub kind: ReviewKind,
    pub helpful_votes: u32,
    pub reported_count: u32,
    pub created_at: Ms,
}

// ── Per-property state ───────────────────────────────────────────

/// A listing plus every booking ever made against it.
#[derive(Debug, Clone)]
pub struct PropertyState {
    pub listing: Property,
    /// All bookings (any status), sorted by `stay.start`.
    pub bookings: Vec<Booking>,
}

impl PropertyState {
    pub fn new(listing: Property) -> Self {
        Self {
            listing,
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.listing.id
    }

    /// Insert booking maintaining sort order by stay.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.stay.start, |b| b.stay.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings (any status) whose stay overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.end > query.start)
    }

    /// Pending/confirmed bookings overlapping `query`, minus `exclude`.
    pub fn blocking<'a>(
        &'a self,
        query: &'a Span,
        exclude: Option<Ulid>,
    ) -> impl Iterator<Item = &'a Booking> + 'a {
        self.overlapping(query)
            .filter(move |b| b.status.blocks_availability() && Some(b.id) != exclude)
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// The event types — flat, no nesting beyond whole records. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user: User,
    },
    UserUpdated {
        user: User,
    },
    PropertyListed {
        property: Property,
    },
    PropertyUpdated {
        property: Property,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingUpdated {
        id: Ulid,
        property_id: Ulid,
        status: BookingStatus,
        payment_status: PaymentStatus,
        cancellation_reason: Option<String>,
    },
    BookingRescheduled {
        id: Ulid,
        property_id: Ulid,
        stay: Span,
        total_price: Money,
    },
    ReviewPosted {
        review: Review,
    },
    ReviewEdited {
        id: Ulid,
        property_id: Ulid,
        rating: u8,
        comment: String,
    },
    ReviewRemoved {
        id: Ulid,
        property_id: Ulid,
    },
    ReviewMarkedHelpful {
        id: Ulid,
        property_id: Ulid,
        voter_id: Ulid,
    },
    ReviewReported {
        id: Ulid,
        property_id: Ulid,
        reporter_id: Ulid,
        reason: Option<String>,
    },
}

impl Event {
    /// The property whose state this event changes, if any.
    pub fn property_id(&self) -> Option<Ulid> {
        match self {
            Event::UserRegistered { .. } | Event::UserUpdated { .. } => None,
            Event::PropertyListed { property } | Event::PropertyUpdated { property } => {
                Some(property.id)
            }
            Event::BookingCreated { booking } => Some(booking.property_id),
            Event::ReviewPosted { review } => Some(review.property_id),
            Event::BookingUpdated { property_id, .. }
            | Event::BookingRescheduled { property_id, .. }
            | Event::ReviewEdited { property_id, .. }
            | Event::ReviewRemoved { property_id, .. }
            | Event::ReviewMarkedHelpful { property_id, .. }
            | Event::ReviewReported { property_id, .. } => Some(*property_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::UserRegistered { .. } => "user_registered",
            Event::UserUpdated { .. } => "user_updated",
            Event::PropertyListed { .. } => "property_listed",
            Event::PropertyUpdated { .. } => "property_updated",
            Event::BookingCreated { .. } => "booking_created",
            Event::BookingUpdated { .. } => "booking_updated",
            Event::BookingRescheduled { .. } => "booking_rescheduled",
            Event::ReviewPosted { .. } => "review_posted",
            Event::ReviewEdited { .. } => "review_edited",
            Event::ReviewRemoved { .. } => "review_removed",
            Event::ReviewMarkedHelpful { .. } => "review_marked_helpful",
            Event::ReviewReported { .. } => "review_reported",
        }
    }
}

// ── Patches and filters ──────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub is_host: Option<bool>,
    pub is_verified: Option<bool>,
}

impl UserPatch {
    pub fn apply_to(&self, user: &mut User) {
        if let Some(v) = &self.first_name {
            user.first_name = v.clone();
        }
        if let Some(v) = &self.last_name {
            user.last_name = v.clone();
        }
        if let Some(v) = &self.phone {
            user.phone = Some(v.clone());
        }
        if let Some(v) = self.is_host {
            user.is_host = v;
        }
        if let Some(v) = self.is_verified {
            user.is_verified = v;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub kind: Option<PropertyType>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub base_price: Option<Money>,
    pub cleaning_fee: Option<Money>,
    pub service_fee: Option<Money>,
    pub currency: Option<String>,
    pub guests: Option<u32>,
    pub bedrooms: Option<u32>,
    pub beds: Option<u32>,
    pub bathrooms: Option<f64>,
    pub min_stay: Option<u32>,
    pub max_stay: Option<u32>,
    pub instant_book: Option<bool>,
    pub amenities: Option<Vec<String>>,
    pub house_rules: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl PropertyPatch {
    pub fn is_empty(&self) -> bool {
        *self == PropertyPatch::default()
    }

    pub fn apply_to(&self, p: &mut Property) {
        fn set<T: Clone>(slot: &mut T, v: &Option<T>) {
            if let Some(v) = v {
                *slot = v.clone();
            }
        }
        set(&mut p.title, &self.title);
        set(&mut p.description, &self.description);
        set(&mut p.kind, &self.kind);
        set(&mut p.location.address, &self.address);
        set(&mut p.location.city, &self.city);
        set(&mut p.location.state, &self.state);
        set(&mut p.location.country, &self.country);
        set(&mut p.location.latitude, &self.latitude);
        set(&mut p.location.longitude, &self.longitude);
        set(&mut p.pricing.base_price, &self.base_price);
        set(&mut p.pricing.cleaning_fee, &self.cleaning_fee);
        set(&mut p.pricing.service_fee, &self.service_fee);
        set(&mut p.pricing.currency, &self.currency);
        set(&mut p.capacity.guests, &self.guests);
        set(&mut p.capacity.bedrooms, &self.bedrooms);
        set(&mut p.capacity.beds, &self.beds);
        set(&mut p.capacity.bathrooms, &self.bathrooms);
        set(&mut p.policy.min_stay, &self.min_stay);
        set(&mut p.policy.max_stay, &self.max_stay);
        set(&mut p.policy.instant_book, &self.instant_book);
        set(&mut p.amenities, &self.amenities);
        set(&mut p.house_rules, &self.house_rules);
        set(&mut p.is_active, &self.is_active);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub id: Option<Ulid>,
    pub property_id: Option<Ulid>,
    pub guest_id: Option<Ulid>,
    pub host_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
    pub payment_status: Option<PaymentStatus>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.id.is_none_or(|v| b.id == v)
            && self.property_id.is_none_or(|v| b.property_id == v)
            && self.guest_id.is_none_or(|v| b.guest_id == v)
            && self.host_id.is_none_or(|v| b.host_id == v)
            && self.status.is_none_or(|v| b.status == v)
            && self.payment_status.is_none_or(|v| b.payment_status == v)
    }
}
