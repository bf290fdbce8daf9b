use super::*;
use crate::ratings::RatingSummary;

const D: Ms = DAY_MS;
const H: Ms = 3_600_000;

fn day(y: i32, m: u32, d: u32) -> Ms {
    chrono::NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis()
}

/// Listing used across engine tests: sleeps 4, 2..=30 nights,
/// 20000/night + 4000 cleaning + 2800 service, request-to-book.
pub(crate) fn sample_listing(id: Ulid, host_id: Ulid) -> Property {
    Property {
        id,
        host_id,
        title: "Sea-view apartment".into(),
        description: "Two bedrooms by the beach".into(),
        kind: PropertyType::EntireHome,
        location: Location {
            address: "12 Beach Road".into(),
            city: "Panaji".into(),
            state: "Goa".into(),
            country: "India".into(),
            latitude: 15.49,
            longitude: 73.82,
        },
        pricing: Pricing {
            base_price: 20000,
            cleaning_fee: 4000,
            service_fee: 2800,
            currency: "INR".into(),
        },
        capacity: Capacity {
            guests: 4,
            bedrooms: 2,
            beds: 2,
            bathrooms: 1.5,
        },
        policy: StayPolicy {
            min_stay: 2,
            max_stay: 30,
            instant_book: false,
        },
        amenities: vec!["wifi".into(), "kitchen".into()],
        house_rules: vec!["no parties".into()],
        is_active: true,
        created_at: 0,
    }
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("staydb_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    let notify = Arc::new(NotifyHub::new());
    Engine::new(test_wal_path(name), notify).unwrap()
}

async fn register(engine: &Engine, first_name: &str) -> Ulid {
    let id = Ulid::new();
    engine
        .register_user(NewUser {
            id,
            email: format!("{first_name}.{id}@example.com"),
            first_name: first_name.into(),
            last_name: "Tester".into(),
            phone: None,
            is_host: false,
        })
        .await
        .unwrap();
    id
}

async fn list_with(engine: &Engine, host: Ulid, tweak: impl FnOnce(&mut Property)) -> Ulid {
    let id = Ulid::new();
    let mut listing = sample_listing(id, host);
    tweak(&mut listing);
    engine.list_property(listing).await.unwrap();
    id
}

async fn list(engine: &Engine, host: Ulid) -> Ulid {
    list_with(engine, host, |_| {}).await
}

fn request(property_id: Ulid, guest_id: Ulid, check_in: Ms, check_out: Ms, guests: u32) -> BookingRequest {
    BookingRequest {
        id: Ulid::new(),
        property_id,
        guest_id,
        check_in,
        check_out,
        guests,
        special_requests: None,
    }
}

/// Host, guest and one sample listing.
async fn marketplace(name: &str) -> (Engine, Ulid, Ulid, Ulid) {
    let engine = new_engine(name);
    let host = register(&engine, "host").await;
    let guest = register(&engine, "guest").await;
    let property = list(&engine, host).await;
    (engine, host, guest, property)
}

// ── Booking creation ─────────────────────────────────────

#[tokio::test]
async fn three_night_stay_is_priced_and_pending() {
    let (engine, host, guest, pid) = marketplace("three_nights.wal").await;
    let check_in = day(2030, 6, 1);

    let booking = engine
        .create_booking(request(pid, guest, check_in, check_in + 3 * D, 2))
        .await
        .unwrap();

    assert_eq!(booking.total_price, 66800);
    assert_eq!(booking.currency, "INR");
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.payment_status, PaymentStatus::Pending);
    assert_eq!(booking.host_id, host);
    assert_eq!(engine.get_booking(booking.id).await.unwrap(), booking);
}

#[tokio::test]
async fn instant_book_confirms_immediately() {
    let engine = new_engine("instant_book.wal");
    let host = register(&engine, "host").await;
    let guest = register(&engine, "guest").await;
    let pid = list_with(&engine, host, |p| p.policy.instant_book = true).await;

    let booking = engine
        .create_booking(request(pid, guest, day(2030, 7, 1), day(2030, 7, 4), 1))
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn overlapping_request_conflicts() {
    let (engine, _, guest, pid) = marketplace("overlap_conflict.wal").await;
    let existing = engine
        .create_booking(request(pid, guest, day(2024, 2, 15), day(2024, 2, 18), 2))
        .await
        .unwrap();
    engine
        .update_booking_status(existing.id, BookingStatus::Confirmed, None)
        .await
        .unwrap();

    let result = engine
        .create_booking(request(pid, guest, day(2024, 2, 17), day(2024, 2, 20), 2))
        .await;
    match result {
        Err(EngineError::Unavailable(id)) => assert_eq!(id, existing.id),
        other => panic!("expected Unavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn back_to_back_stays_do_not_conflict() {
    let (engine, _, guest, pid) = marketplace("back_to_back.wal").await;
    engine
        .create_booking(request(pid, guest, day(2030, 3, 10), day(2030, 3, 13), 2))
        .await
        .unwrap();
    engine
        .create_booking(request(pid, guest, day(2030, 3, 13), day(2030, 3, 15), 2))
        .await
        .unwrap();
    engine
        .create_booking(request(pid, guest, day(2030, 3, 8), day(2030, 3, 10), 2))
        .await
        .unwrap();
    assert_eq!(
        engine
            .list_bookings(&BookingFilter {
                property_id: Some(pid),
                ..Default::default()
            })
            .await
            .len(),
        3
    );
}

#[tokio::test]
async fn cancelled_booking_frees_its_dates() {
    let (engine, _, guest, pid) = marketplace("cancel_frees.wal").await;
    let (check_in, check_out) = (day(2030, 9, 1), day(2030, 9, 5));
    let first = engine
        .create_booking(request(pid, guest, check_in, check_out, 2))
        .await
        .unwrap();
    assert!(!engine.is_available(pid, check_in, check_out, None).await.unwrap());

    engine.cancel_booking(first.id, Some("change of plans".into())).await.unwrap();

    assert!(engine.is_available(pid, check_in, check_out, None).await.unwrap());
    engine
        .create_booking(request(pid, guest, check_in, check_out, 2))
        .await
        .unwrap();
}

#[tokio::test]
async fn capacity_is_checked_before_dates_and_stay_length() {
    let (engine, _, guest, pid) = marketplace("capacity_first.wal").await;
    let check_in = day(2030, 5, 1);
    engine
        .create_booking(request(pid, guest, check_in, check_in + 3 * D, 2))
        .await
        .unwrap();

    // Overlapping and below minimum stay, but the guest count fails first.
    let result = engine
        .create_booking(request(pid, guest, check_in, check_in + D, 5))
        .await;
    match result {
        Err(EngineError::InvalidRequest(msg)) => assert!(msg.contains("capacity exceeded"), "{msg}"),
        other => panic!("expected capacity error, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_identical_requests_admit_exactly_one() {
    let (engine, _, guest, pid) = marketplace("concurrent_identical.wal").await;
    let engine = Arc::new(engine);
    let (check_in, check_out) = (day(2030, 12, 20), day(2030, 12, 27));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(request(pid, guest, check_in, check_out, 2))
                .await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Unavailable(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn stay_length_bounds_are_inclusive() {
    let (engine, _, guest, pid) = marketplace("stay_bounds.wal").await;
    let base = day(2031, 1, 1);

    let err = engine
        .create_booking(request(pid, guest, base, base + D, 1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("below minimum stay"), "{err}");

    engine
        .create_booking(request(pid, guest, base, base + 2 * D, 1))
        .await
        .unwrap();

    let start = base + 10 * D;
    engine
        .create_booking(request(pid, guest, start, start + 30 * D, 1))
        .await
        .unwrap();

    let start = base + 100 * D;
    let err = engine
        .create_booking(request(pid, guest, start, start + 31 * D, 1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("exceeds maximum stay"), "{err}");
}

#[tokio::test]
async fn partial_day_counts_as_a_night() {
    let (engine, _, guest, pid) = marketplace("partial_day.wal").await;
    let check_in = day(2031, 2, 1);
    let booking = engine
        .create_booking(request(pid, guest, check_in, check_in + 2 * D + 2 * H, 1))
        .await
        .unwrap();
    assert_eq!(booking.total_price, 20000 * 3 + 4000 + 2800);
}

#[tokio::test]
async fn missing_or_inactive_property_and_unknown_guest() {
    let (engine, host, guest, pid) = marketplace("not_found.wal").await;
    let (a, b) = (day(2030, 4, 1), day(2030, 4, 5));

    let missing = Ulid::new();
    assert!(matches!(
        engine.create_booking(request(missing, guest, a, b, 1)).await,
        Err(EngineError::NotFound("property", id)) if id == missing
    ));

    let stranger = Ulid::new();
    assert!(matches!(
        engine.create_booking(request(pid, stranger, a, b, 1)).await,
        Err(EngineError::NotFound("guest", id)) if id == stranger
    ));

    engine.deactivate_property(host, pid).await.unwrap();
    assert!(matches!(
        engine.create_booking(request(pid, guest, a, b, 1)).await,
        Err(EngineError::NotFound("property", _))
    ));
}

#[tokio::test]
async fn booking_ids_are_unique_and_dates_ordered() {
    let (engine, _, guest, pid) = marketplace("booking_id_unique.wal").await;
    let mut req = request(pid, guest, day(2030, 8, 1), day(2030, 8, 4), 1);
    engine.create_booking(req.clone()).await.unwrap();

    req.check_in = day(2030, 10, 1);
    req.check_out = day(2030, 10, 4);
    assert!(matches!(
        engine.create_booking(req).await,
        Err(EngineError::AlreadyExists(_))
    ));

    let backwards = request(pid, guest, day(2030, 11, 5), day(2030, 11, 1), 1);
    assert!(matches!(
        engine.create_booking(backwards).await,
        Err(EngineError::InvalidRequest(_))
    ));
    let empty = request(pid, guest, day(2030, 11, 5), day(2030, 11, 5), 1);
    assert!(matches!(
        engine.create_booking(empty).await,
        Err(EngineError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn availability_is_deterministic_and_honours_exclude() {
    let (engine, _, guest, pid) = marketplace("availability_exclude.wal").await;
    let (a, b) = (day(2030, 2, 1), day(2030, 2, 4));
    let booking = engine.create_booking(request(pid, guest, a, b, 1)).await.unwrap();

    for _ in 0..3 {
        assert!(!engine.is_available(pid, a + D, b + D, None).await.unwrap());
    }
    assert!(engine.is_available(pid, a + D, b + D, Some(booking.id)).await.unwrap());
    assert!(matches!(
        engine.is_available(Ulid::new(), a, b, None).await,
        Err(EngineError::NotFound("property", _))
    ));
}

// ── Cancellation and lifecycle ───────────────────────────

async fn paid_booking(engine: &Engine, pid: Ulid, guest: Ulid, check_in: Ms) -> Booking {
    let b = engine
        .create_booking(request(pid, guest, check_in, check_in + 3 * D, 1))
        .await
        .unwrap();
    engine.record_payment(b.id).await.unwrap()
}

#[tokio::test]
async fn cancellation_refund_tiers() {
    let (engine, _, guest, pid) = marketplace("refund_tiers.wal").await;
    let check_in = day(2030, 6, 1);

    let far = paid_booking(&engine, pid, guest, check_in).await;
    let c = engine.cancel_booking_at(far.id, None, check_in - 10 * D).await.unwrap();
    assert_eq!(c.payment_status, PaymentStatus::Refunded);

    let near = paid_booking(&engine, pid, guest, check_in).await;
    let c = engine.cancel_booking_at(near.id, None, check_in - 3 * D).await.unwrap();
    assert_eq!(c.payment_status, PaymentStatus::Refunded);

    let hours = paid_booking(&engine, pid, guest, check_in).await;
    let c = engine.cancel_booking_at(hours.id, None, check_in - 5 * H).await.unwrap();
    assert_eq!(c.payment_status, PaymentStatus::Refunded);

    let started = paid_booking(&engine, pid, guest, check_in).await;
    let c = engine
        .cancel_booking_at(started.id, Some("emergency".into()), check_in + H)
        .await
        .unwrap();
    assert_eq!(c.status, BookingStatus::Cancelled);
    assert_eq!(c.payment_status, PaymentStatus::Paid);
    assert_eq!(c.cancellation_reason.as_deref(), Some("emergency"));
}

#[tokio::test]
async fn terminal_bookings_cannot_be_cancelled() {
    let (engine, _, guest, pid) = marketplace("terminal_cancel.wal").await;
    let b = engine
        .create_booking(request(pid, guest, day(2030, 1, 10), day(2030, 1, 13), 1))
        .await
        .unwrap();
    engine.cancel_booking(b.id, None).await.unwrap();
    assert!(matches!(
        engine.cancel_booking(b.id, None).await,
        Err(EngineError::IllegalTransition { from: "cancelled", to: "cancelled", .. })
    ));

    let b = engine
        .create_booking(request(pid, guest, day(2030, 1, 10), day(2030, 1, 13), 1))
        .await
        .unwrap();
    engine.update_booking_status(b.id, BookingStatus::Confirmed, None).await.unwrap();
    engine.update_booking_status(b.id, BookingStatus::Completed, None).await.unwrap();
    assert!(matches!(
        engine.cancel_booking(b.id, None).await,
        Err(EngineError::IllegalTransition { from: "completed", .. })
    ));
    assert!(matches!(
        engine.cancel_booking(Ulid::new(), None).await,
        Err(EngineError::NotFound("booking", _))
    ));
}

#[tokio::test]
async fn status_transition_table() {
    let (engine, _, guest, pid) = marketplace("transitions.wal").await;
    let b = engine
        .create_booking(request(pid, guest, day(2030, 2, 10), day(2030, 2, 13), 1))
        .await
        .unwrap();

    assert!(matches!(
        engine.update_booking_status(b.id, BookingStatus::Completed, None).await,
        Err(EngineError::IllegalTransition { from: "pending", to: "completed", .. })
    ));
    let b = engine
        .update_booking_status(b.id, BookingStatus::Confirmed, None)
        .await
        .unwrap();
    assert_eq!(b.status, BookingStatus::Confirmed);
    assert!(matches!(
        engine.update_booking_status(b.id, BookingStatus::Pending, None).await,
        Err(EngineError::IllegalTransition { .. })
    ));
    let b = engine
        .update_booking_status(b.id, BookingStatus::Completed, None)
        .await
        .unwrap();
    assert_eq!(b.status, BookingStatus::Completed);
    assert!(matches!(
        engine.update_booking_status(b.id, BookingStatus::Confirmed, None).await,
        Err(EngineError::IllegalTransition { from: "completed", .. })
    ));
}

#[tokio::test]
async fn payment_recorded_once() {
    let (engine, _, guest, pid) = marketplace("payment_once.wal").await;
    let b = paid_booking(&engine, pid, guest, day(2030, 3, 1)).await;
    assert_eq!(b.payment_status, PaymentStatus::Paid);
    assert!(matches!(
        engine.record_payment(b.id).await,
        Err(EngineError::IllegalTransition { entity: "payment", from: "paid", .. })
    ));

    let unpaid = engine
        .create_booking(request(pid, guest, day(2030, 4, 1), day(2030, 4, 4), 1))
        .await
        .unwrap();
    engine.cancel_booking(unpaid.id, None).await.unwrap();
    assert!(matches!(
        engine.record_payment(unpaid.id).await,
        Err(EngineError::IllegalTransition { entity: "payment", .. })
    ));
}

#[tokio::test]
async fn reschedule_ignores_own_stay_and_reprices() {
    let (engine, _, guest, pid) = marketplace("reschedule.wal").await;
    let a = engine
        .create_booking(request(pid, guest, day(2030, 6, 1), day(2030, 6, 4), 2))
        .await
        .unwrap();
    let b = engine
        .create_booking(request(pid, guest, day(2030, 6, 10), day(2030, 6, 12), 2))
        .await
        .unwrap();

    // Overlaps its own old dates only.
    let moved = engine
        .reschedule_booking(a.id, day(2030, 6, 2), day(2030, 6, 7))
        .await
        .unwrap();
    assert_eq!(moved.stay, Span::new(day(2030, 6, 2), day(2030, 6, 7)));
    assert_eq!(moved.total_price, 20000 * 5 + 4000 + 2800);
    assert!(engine.is_available(pid, day(2030, 6, 1), day(2030, 6, 2), None).await.unwrap());

    assert!(matches!(
        engine.reschedule_booking(a.id, day(2030, 6, 8), day(2030, 6, 11)).await,
        Err(EngineError::Unavailable(id)) if id == b.id
    ));
    assert!(matches!(
        engine.reschedule_booking(a.id, day(2030, 7, 1), day(2030, 7, 2)).await,
        Err(EngineError::InvalidRequest(_))
    ));

    engine.cancel_booking(b.id, None).await.unwrap();
    assert!(matches!(
        engine.reschedule_booking(b.id, day(2030, 8, 1), day(2030, 8, 4)).await,
        Err(EngineError::IllegalTransition { from: "cancelled", .. })
    ));
}

#[tokio::test]
async fn list_bookings_filters_newest_first() {
    let (engine, host, guest, pid) = marketplace("list_bookings.wal").await;
    let other_guest = register(&engine, "other").await;
    let first = engine
        .create_booking_at(request(pid, guest, day(2030, 1, 1), day(2030, 1, 3), 1), 1_000)
        .await
        .unwrap();
    let second = engine
        .create_booking_at(request(pid, other_guest, day(2030, 1, 5), day(2030, 1, 8), 1), 2_000)
        .await
        .unwrap();

    let all = engine
        .list_bookings(&BookingFilter {
            host_id: Some(host),
            ..Default::default()
        })
        .await;
    assert_eq!(all.iter().map(|b| b.id).collect::<Vec<_>>(), vec![second.id, first.id]);

    let mine = engine
        .list_bookings(&BookingFilter {
            guest_id: Some(guest),
            ..Default::default()
        })
        .await;
    assert_eq!(mine, vec![first]);

    let none = engine
        .list_bookings(&BookingFilter {
            status: Some(BookingStatus::Completed),
            ..Default::default()
        })
        .await;
    assert!(none.is_empty());
}

// ── Users and properties ─────────────────────────────────

#[tokio::test]
async fn email_is_unique_case_insensitively() {
    let engine = new_engine("email_unique.wal");
    let new = |email: &str| NewUser {
        id: Ulid::new(),
        email: email.into(),
        first_name: "Ravi".into(),
        last_name: "Kumar".into(),
        phone: Some("+91 98765 43210".into()),
        is_host: false,
    };
    let user = engine.register_user(new("Ravi@Example.com")).await.unwrap();
    assert_eq!(user.email, "ravi@example.com");
    assert!(matches!(
        engine.register_user(new("ravi@example.COM")).await,
        Err(EngineError::Duplicate(_))
    ));
    assert!(matches!(
        engine.register_user(new("not-an-email")).await,
        Err(EngineError::InvalidRequest(_))
    ));

    let updated = engine
        .update_user(
            user.id,
            UserPatch {
                is_verified: Some(true),
                last_name: Some("Menon".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.is_verified);
    assert_eq!(engine.get_user(user.id).unwrap().user.last_name, "Menon");
}

#[tokio::test]
async fn listing_promotes_host_and_validates() {
    let engine = new_engine("listing_rules.wal");
    let host = register(&engine, "host").await;
    assert!(!engine.get_user(host).unwrap().user.is_host);

    let pid = list(&engine, host).await;
    assert!(engine.get_user(host).unwrap().user.is_host);
    assert!(engine.get_property(pid).await.unwrap().property.is_active);

    let dup = sample_listing(pid, host);
    assert!(matches!(
        engine.list_property(dup).await,
        Err(EngineError::AlreadyExists(_))
    ));

    let orphan = sample_listing(Ulid::new(), Ulid::new());
    assert!(matches!(
        engine.list_property(orphan).await,
        Err(EngineError::NotFound("host", _))
    ));

    let mut bad = sample_listing(Ulid::new(), host);
    bad.policy.min_stay = 10;
    bad.policy.max_stay = 5;
    assert!(matches!(
        engine.list_property(bad).await,
        Err(EngineError::InvalidRequest(_))
    ));

    let mut bad = sample_listing(Ulid::new(), host);
    bad.capacity.bathrooms = 1.25;
    assert!(matches!(
        engine.list_property(bad).await,
        Err(EngineError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn only_the_host_edits_a_listing() {
    let (engine, host, guest, pid) = marketplace("host_edits.wal").await;
    let patch = PropertyPatch {
        base_price: Some(25000),
        ..Default::default()
    };
    assert!(matches!(
        engine.update_property(guest, pid, patch.clone()).await,
        Err(EngineError::Forbidden(_))
    ));
    let updated = engine.update_property(host, pid, patch).await.unwrap();
    assert_eq!(updated.pricing.base_price, 25000);

    let b = engine
        .create_booking(request(pid, guest, day(2030, 5, 1), day(2030, 5, 3), 1))
        .await
        .unwrap();
    assert_eq!(b.total_price, 25000 * 2 + 4000 + 2800);

    let invalid = PropertyPatch {
        min_stay: Some(40),
        ..Default::default()
    };
    assert!(matches!(
        engine.update_property(host, pid, invalid).await,
        Err(EngineError::InvalidRequest(_))
    ));
    assert!(matches!(
        engine.deactivate_property(guest, pid).await,
        Err(EngineError::Forbidden(_))
    ));
    let gone = engine.deactivate_property(host, pid).await.unwrap();
    assert!(!gone.is_active);
    assert_eq!(engine.list_properties(Some(host)).await.len(), 1);
}

// ── Reviews and ratings ──────────────────────────────────

async fn completed_stay(engine: &Engine, pid: Ulid, guest: Ulid, check_in: Ms) -> Booking {
    let b = engine
        .create_booking(request(pid, guest, check_in, check_in + 2 * D, 1))
        .await
        .unwrap();
    engine.update_booking_status(b.id, BookingStatus::Confirmed, None).await.unwrap();
    engine.update_booking_status(b.id, BookingStatus::Completed, None).await.unwrap()
}

fn review_of(booking: &Booking, reviewer: Ulid, rating: u8) -> NewReview {
    NewReview {
        id: Ulid::new(),
        booking_id: booking.id,
        reviewer_id: reviewer,
        rating,
        comment: "Lovely place".into(),
    }
}

#[tokio::test]
async fn reviews_require_completed_stay_and_participant() {
    let (engine, _, guest, pid) = marketplace("review_rules.wal").await;
    let pending = engine
        .create_booking(request(pid, guest, day(2030, 1, 1), day(2030, 1, 3), 1))
        .await
        .unwrap();
    assert!(matches!(
        engine.post_review(review_of(&pending, guest, 5)).await,
        Err(EngineError::InvalidRequest(_))
    ));

    let done = completed_stay(&engine, pid, guest, day(2030, 2, 1)).await;
    let stranger = register(&engine, "stranger").await;
    assert!(matches!(
        engine.post_review(review_of(&done, stranger, 5)).await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        engine.post_review(review_of(&done, guest, 6)).await,
        Err(EngineError::InvalidRequest(_))
    ));

    engine.post_review(review_of(&done, guest, 5)).await.unwrap();
    assert!(matches!(
        engine.post_review(review_of(&done, guest, 4)).await,
        Err(EngineError::Duplicate(_))
    ));
}

#[tokio::test]
async fn ratings_follow_review_writes() {
    let (engine, host, guest, pid) = marketplace("ratings_follow.wal").await;
    let first = completed_stay(&engine, pid, guest, day(2030, 1, 1)).await;
    let second = completed_stay(&engine, pid, guest, day(2030, 2, 1)).await;

    let r1 = engine.post_review(review_of(&first, guest, 5)).await.unwrap();
    assert_eq!(r1.kind, ReviewKind::GuestToHost);
    assert_eq!(r1.subject_id, host);
    engine.post_review(review_of(&second, guest, 4)).await.unwrap();
    assert_eq!(
        engine.property_rating(pid),
        RatingSummary {
            average: 4.5,
            count: 2
        }
    );

    let by_host = engine.post_review(review_of(&first, host, 3)).await.unwrap();
    assert_eq!(by_host.kind, ReviewKind::HostToGuest);
    assert_eq!(by_host.subject_id, guest);
    assert_eq!(engine.get_user(guest).unwrap().guest_rating.count, 1);
    assert_eq!(engine.property_rating(pid).count, 2);

    assert!(matches!(
        engine.edit_review(host, r1.id, Some(1), None).await,
        Err(EngineError::Forbidden(_))
    ));
    let edited = engine.edit_review(guest, r1.id, Some(2), None).await.unwrap();
    assert_eq!(edited.comment, "Lovely place");
    assert_eq!(engine.property_rating(pid).average, 3.0);

    engine.remove_review(guest, r1.id).await.unwrap();
    assert_eq!(
        engine.property_rating(pid),
        RatingSummary {
            average: 4.0,
            count: 1
        }
    );
    assert!(matches!(
        engine.remove_review(guest, r1.id).await,
        Err(EngineError::NotFound("review", _))
    ));

    let stats = engine.review_stats(pid);
    assert_eq!(stats.total_reviews, 1);
    assert_eq!(stats.breakdown, [0, 0, 0, 1, 0]);
    assert_eq!(engine.list_reviews(Some(pid), None).len(), 2);
    assert_eq!(engine.list_reviews(None, Some(host)).len(), 1);
}

#[tokio::test]
async fn review_feedback_counts_and_survives_replay() {
    let path = test_wal_path("review_feedback.wal");
    let (pid, review_id);
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        let host = register(&engine, "host").await;
        let guest = register(&engine, "guest").await;
        let reader = register(&engine, "reader").await;
        pid = list(&engine, host).await;
        let stay = completed_stay(&engine, pid, guest, day(2030, 1, 1)).await;
        let review = engine.post_review(review_of(&stay, guest, 5)).await.unwrap();
        review_id = review.id;
        assert_eq!((review.helpful_votes, review.reported_count), (0, 0));

        engine.mark_review_helpful(reader, review_id).await.unwrap();
        let voted = engine.mark_review_helpful(host, review_id).await.unwrap();
        assert_eq!(voted.helpful_votes, 2);

        let reported = engine
            .report_review(reader, review_id, Some("off-topic".into()))
            .await
            .unwrap();
        assert_eq!(reported.reported_count, 1);
        assert_eq!(reported.helpful_votes, 2);

        assert!(matches!(
            engine.mark_review_helpful(Ulid::new(), review_id).await,
            Err(EngineError::NotFound("user", _))
        ));
        assert!(matches!(
            engine.report_review(reader, Ulid::new(), None).await,
            Err(EngineError::NotFound("review", _))
        ));
        assert!(matches!(
            engine
                .report_review(reader, review_id, Some("x".repeat(501)))
                .await,
            Err(EngineError::LimitExceeded(_))
        ));
        // Votes and reports leave the rating alone.
        assert_eq!(
            engine.property_rating(pid),
            RatingSummary {
                average: 5.0,
                count: 1
            }
        );
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let review = engine.get_review(review_id).unwrap();
    assert_eq!((review.helpful_votes, review.reported_count), (2, 1));
    assert_eq!(engine.property_rating(pid).count, 1);
}

// ── Search, quotes, analytics ────────────────────────────

#[tokio::test]
async fn search_filters_sorts_and_pages() {
    let engine = new_engine("search.wal");
    let host = register(&engine, "host").await;
    let guest = register(&engine, "guest").await;
    let goa = list(&engine, host).await;
    let cheap = list_with(&engine, host, |p| {
        p.pricing.base_price = 9000;
        p.location.city = "Mapusa".into();
        p.amenities = vec!["wifi".into()];
    })
    .await;
    let big = list_with(&engine, host, |p| {
        p.pricing.base_price = 45000;
        p.capacity.guests = 10;
        p.location.city = "Shimla".into();
        p.location.state = "Himachal Pradesh".into();
        p.kind = PropertyType::PrivateRoom;
        p.policy.instant_book = true;
    })
    .await;

    let by_price = engine
        .search(&SearchFilter {
            sort: SortKey::Price,
            ..Default::default()
        })
        .await
        .unwrap();
    let ids: Vec<Ulid> = by_price.hits.iter().map(|h| h.property.id).collect();
    assert_eq!(ids, vec![cheap, goa, big]);
    assert_eq!(by_price.total, 3);

    let goa_only = engine
        .search(&SearchFilter {
            location: Some("GOA".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(goa_only.total, 2);

    let roomy = engine
        .search(&SearchFilter {
            guests: Some(6),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(roomy.hits.len(), 1);
    assert_eq!(roomy.hits[0].property.id, big);

    let kitchens = engine
        .search(&SearchFilter {
            amenities: vec!["WiFi".into(), "kitchen".into()],
            max_price: Some(30000),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(kitchens.hits.len(), 1);
    assert_eq!(kitchens.hits[0].property.id, goa);

    let rooms = engine
        .search(&SearchFilter {
            kind: Some(PropertyType::PrivateRoom),
            instant_book: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rooms.total, 1);

    engine
        .create_booking(request(goa, guest, day(2030, 10, 1), day(2030, 10, 5), 2))
        .await
        .unwrap();
    let free = engine
        .search(&SearchFilter {
            check_in: Some(day(2030, 10, 3)),
            check_out: Some(day(2030, 10, 6)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(free.total, 2);
    assert!(free.hits.iter().all(|h| h.property.id != goa && h.distance_km.is_none()));

    let page2 = engine
        .search(&SearchFilter {
            sort: SortKey::Price,
            page: 2,
            page_size: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page2.hits.len(), 1);
    assert_eq!(page2.hits[0].property.id, big);
    assert_eq!(page2.total, 3);

    assert!(matches!(
        engine
            .search(&SearchFilter {
                check_in: Some(day(2030, 10, 3)),
                ..Default::default()
            })
            .await,
        Err(EngineError::InvalidRequest(_))
    ));
    engine.deactivate_property(host, cheap).await.unwrap();
    assert_eq!(engine.search(&SearchFilter::default()).await.unwrap().total, 2);
}

#[tokio::test]
async fn search_by_rating() {
    let engine = new_engine("search_rating.wal");
    let host = register(&engine, "host").await;
    let guest = register(&engine, "guest").await;
    let good = list(&engine, host).await;
    let poor = list(&engine, host).await;
    let stay = completed_stay(&engine, good, guest, day(2030, 1, 1)).await;
    engine.post_review(review_of(&stay, guest, 5)).await.unwrap();
    let stay = completed_stay(&engine, poor, guest, day(2030, 1, 1)).await;
    engine.post_review(review_of(&stay, guest, 2)).await.unwrap();

    let page = engine
        .search(&SearchFilter {
            sort: SortKey::Rating,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.hits[0].property.id, good);
    assert_eq!(page.hits[1].property.id, poor);

    let picky = engine
        .search(&SearchFilter {
            min_rating: Some(4.0),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(picky.total, 1);
}

#[tokio::test]
async fn search_near_coordinates() {
    let engine = new_engine("search_geo.wal");
    let host = register(&engine, "host").await;
    // Panaji, a second listing about 15 km north, and Manali far away.
    let panaji = list(&engine, host).await;
    let calangute = list_with(&engine, host, |p| {
        p.location.latitude = 15.60;
        p.location.longitude = 73.74;
    })
    .await;
    let manali = list_with(&engine, host, |p| {
        p.location.latitude = 32.24;
        p.location.longitude = 77.19;
    })
    .await;

    let near = |lat: f64, lng: f64, radius_km: Option<f64>| SearchFilter {
        latitude: Some(lat),
        longitude: Some(lng),
        radius_km,
        sort: SortKey::Distance,
        ..Default::default()
    };

    // Default radius is 10 km.
    let close = engine.search(&near(15.49, 73.82, None)).await.unwrap();
    assert_eq!(close.total, 1);
    assert_eq!(close.hits[0].property.id, panaji);
    assert!(close.hits[0].distance_km.unwrap() < 0.01);

    let wider = engine.search(&near(15.55, 73.75, Some(25.0))).await.unwrap();
    let ids: Vec<Ulid> = wider.hits.iter().map(|h| h.property.id).collect();
    assert_eq!(ids, vec![calangute, panaji]);
    let d = wider.hits[1].distance_km.unwrap();
    assert!((8.0..25.0).contains(&d), "distance {d}");

    let far = engine.search(&near(32.2, 77.2, Some(50.0))).await.unwrap();
    assert_eq!(far.total, 1);
    assert_eq!(far.hits[0].property.id, manali);

    for bad in [
        SearchFilter {
            latitude: Some(15.0),
            ..Default::default()
        },
        SearchFilter {
            radius_km: Some(5.0),
            ..Default::default()
        },
        SearchFilter {
            sort: SortKey::Distance,
            ..Default::default()
        },
        near(95.0, 73.8, None),
        near(15.0, 73.8, Some(0.0)),
    ] {
        assert!(
            matches!(engine.search(&bad).await, Err(EngineError::InvalidRequest(_))),
            "{bad:?}"
        );
    }
    assert!(matches!(
        engine.search(&near(15.0, 73.8, Some(5000.0))).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn quote_and_open_dates() {
    let (engine, _, guest, pid) = marketplace("quote.wal").await;
    engine
        .create_booking(request(pid, guest, day(2030, 3, 5), day(2030, 3, 8), 1))
        .await
        .unwrap();

    let q = engine.quote(pid, day(2030, 3, 1), day(2030, 3, 4), Some(2)).await.unwrap();
    assert_eq!(q.nights, 3);
    assert_eq!(q.total_price, Some(66800));
    assert!(q.available && q.bookable);

    let q = engine.quote(pid, day(2030, 3, 6), day(2030, 3, 9), None).await.unwrap();
    assert!(!q.available && !q.bookable);

    let q = engine.quote(pid, day(2030, 3, 10), day(2030, 3, 11), None).await.unwrap();
    assert!(q.available);
    assert!(!q.bookable, "one night is below the minimum stay");

    let open = engine.open_dates(pid, day(2030, 3, 1), day(2030, 3, 31)).await.unwrap();
    assert_eq!(
        open,
        vec![
            Span::new(day(2030, 3, 1), day(2030, 3, 5)),
            Span::new(day(2030, 3, 8), day(2030, 3, 31)),
        ]
    );
    assert!(matches!(
        engine.open_dates(pid, day(2030, 1, 1), day(2033, 1, 1)).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn booking_stats_by_host() {
    let engine = new_engine("booking_stats.wal");
    let host = register(&engine, "host").await;
    let other_host = register(&engine, "other").await;
    let guest = register(&engine, "guest").await;
    let mine = list(&engine, host).await;
    let theirs = list(&engine, other_host).await;

    paid_booking(&engine, mine, guest, day(2030, 1, 1)).await;
    let cancelled = engine
        .create_booking(request(mine, guest, day(2030, 2, 1), day(2030, 2, 3), 1))
        .await
        .unwrap();
    engine.cancel_booking(cancelled.id, None).await.unwrap();
    engine
        .create_booking(request(theirs, guest, day(2030, 1, 1), day(2030, 1, 4), 1))
        .await
        .unwrap();

    let stats = engine
        .booking_stats(&StatsFilter {
            host_id: Some(host),
            ..Default::default()
        })
        .await;
    assert_eq!(stats.total_bookings, 2);
    assert_eq!(stats.total_revenue, 66800 + 46800);
    assert_eq!(stats.paid_revenue, 66800);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.cancellation_rate, 50.0);
    assert_eq!(stats.average_nights, 2.5);

    let everything = engine.booking_stats(&StatsFilter::default()).await;
    assert_eq!(everything.total_bookings, 3);
}

// ── Durability and notifications ─────────────────────────

#[tokio::test]
async fn wal_replay_restores_marketplace() {
    let path = test_wal_path("replay_market.wal");
    let (host, guest, pid, booking_id, review_id);
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        host = register(&engine, "host").await;
        guest = register(&engine, "guest").await;
        pid = list(&engine, host).await;
        let stay = completed_stay(&engine, pid, guest, day(2030, 1, 1)).await;
        review_id = engine.post_review(review_of(&stay, guest, 4)).await.unwrap().id;
        let b = engine
            .create_booking(request(pid, guest, day(2030, 5, 1), day(2030, 5, 4), 2))
            .await
            .unwrap();
        engine.record_payment(b.id).await.unwrap();
        engine
            .reschedule_booking(b.id, day(2030, 5, 2), day(2030, 5, 6))
            .await
            .unwrap();
        booking_id = b.id;
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert!(engine.get_user(host).unwrap().user.is_host);
    assert_eq!(engine.list_users().len(), 2);
    let b = engine.get_booking(booking_id).await.unwrap();
    assert_eq!(b.payment_status, PaymentStatus::Paid);
    assert_eq!(b.stay, Span::new(day(2030, 5, 2), day(2030, 5, 6)));
    assert_eq!(b.total_price, 20000 * 4 + 4000 + 2800);
    assert_eq!(engine.get_review(review_id).unwrap().rating, 4);
    assert_eq!(
        engine.property_rating(pid),
        RatingSummary {
            average: 4.0,
            count: 1
        }
    );
    assert!(matches!(
        engine
            .create_booking(request(pid, guest, day(2030, 5, 3), day(2030, 5, 5), 1))
            .await,
        Err(EngineError::Unavailable(id)) if id == booking_id
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_market.wal");
    let (pid, cancelled_id, review_id);
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        let host = register(&engine, "host").await;
        let guest = register(&engine, "guest").await;
        pid = list(&engine, host).await;
        let stay = completed_stay(&engine, pid, guest, day(2030, 1, 1)).await;
        review_id = engine.post_review(review_of(&stay, guest, 5)).await.unwrap().id;
        let b = engine
            .create_booking(request(pid, guest, day(2030, 3, 1), day(2030, 3, 3), 1))
            .await
            .unwrap();
        engine.cancel_booking(b.id, None).await.unwrap();
        cancelled_id = b.id;

        assert!(engine.wal_appends_since_compact().await > 0);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        engine
            .update_property(host, pid, PropertyPatch {
                title: Some("Renamed".into()),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let view = engine.get_property(pid).await.unwrap();
    assert_eq!(view.property.title, "Renamed");
    assert_eq!(view.rating.count, 1);
    assert_eq!(
        engine.get_booking(cancelled_id).await.unwrap().status,
        BookingStatus::Cancelled
    );
    assert!(engine.get_review(review_id).is_ok());
    assert!(engine.is_available(pid, day(2030, 3, 1), day(2030, 3, 3), None).await.unwrap());
}

#[tokio::test]
async fn committed_events_reach_listeners() {
    let (engine, _, guest, pid) = marketplace("notify_listeners.wal").await;
    let mut rx = engine.notify.subscribe(pid);

    let b = engine
        .create_booking(request(pid, guest, day(2030, 1, 1), day(2030, 1, 3), 1))
        .await
        .unwrap();
    match rx.recv().await.unwrap() {
        Event::BookingCreated { booking } => assert_eq!(booking.id, b.id),
        other => panic!("unexpected event {other:?}"),
    }

    // Rejected requests publish nothing.
    let _ = engine
        .create_booking(request(pid, guest, day(2030, 1, 1), day(2030, 1, 3), 1))
        .await;
    engine.cancel_booking(b.id, None).await.unwrap();
    assert!(matches!(
        rx.recv().await.unwrap(),
        Event::BookingUpdated {
            status: BookingStatus::Cancelled,
            ..
        }
    ));
}
