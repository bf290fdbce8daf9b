//! Hard limits. Anything a client can grow without bound is capped here.

use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;
pub const MAX_CONNECTIONS: usize = 4096;

pub const MAX_USERS_PER_TENANT: usize = 1_000_000;
pub const MAX_PROPERTIES_PER_TENANT: usize = 100_000;
pub const MAX_BOOKINGS_PER_PROPERTY: usize = 50_000;

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 2000;
pub const MAX_ADDRESS_LEN: usize = 200;
pub const MAX_TAG_LEN: usize = 64;
pub const MAX_TAGS: usize = 64;
pub const MAX_COMMENT_LEN: usize = 1000;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_SPECIAL_REQUESTS_LEN: usize = 1000;

pub const MAX_GUESTS: u32 = 20;
pub const MAX_BEDROOMS: u32 = 10;
pub const MAX_BEDS: u32 = 20;
pub const MIN_BATHROOMS: f64 = 0.5;
pub const MAX_BATHROOMS: f64 = 10.0;
pub const MAX_STAY_NIGHTS: u32 = 365;

/// 10^12 minor units. Keeps `base_price * MAX_STAY_NIGHTS + fees` far from i64 overflow.
pub const MAX_PRICE: i64 = 1_000_000_000_000;

pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 20;

pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 10.0;
pub const MAX_SEARCH_RADIUS_KM: f64 = 1000.0;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Widest window a calendar query may ask about (two years).
pub const MAX_CALENDAR_WINDOW_MS: Ms = 2 * 366 * 86_400_000;
