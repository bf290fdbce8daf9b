use std::cmp::Ordering;
use std::str::FromStr;

use crate::limits::{
    DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_RADIUS_KM, MAX_PAGE_SIZE, MAX_SEARCH_RADIUS_KM,
};
use crate::model::*;
use crate::ratings::RatingSummary;

use super::availability::is_available;
use super::conflict::validate_stay;
use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    /// Cheapest first unless reversed.
    Price,
    /// Best rated first unless reversed.
    Rating,
    /// Most recently listed first.
    #[default]
    Newest,
    /// Nearest to the search point first. Needs coordinates.
    Distance,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "price" => Ok(SortKey::Price),
            "rating" => Ok(SortKey::Rating),
            "newest" => Ok(SortKey::Newest),
            "distance" => Ok(SortKey::Distance),
            other => Err(format!("invalid sort key: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    /// Case-insensitive substring of city, state, country or address.
    pub location: Option<String>,
    pub guests: Option<u32>,
    pub min_price: Option<Money>,
    pub max_price: Option<Money>,
    pub kind: Option<PropertyType>,
    /// Every one of these must be offered.
    pub amenities: Vec<String>,
    pub instant_book: Option<bool>,
    pub min_rating: Option<f64>,
    /// Search point; latitude and longitude go together.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Defaults to 10 km when coordinates are given.
    pub radius_km: Option<f64>,
    pub check_in: Option<Ms>,
    pub check_out: Option<Ms>,
    pub sort: SortKey,
    /// Flip the sort key's natural direction.
    pub reverse: bool,
    /// 1-based; 0 is treated as 1.
    pub page: usize,
    /// 0 means the default page size.
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub property: Property,
    pub rating: RatingSummary,
    /// Great-circle distance from the search point, when one was given.
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// Matches across all pages.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A search circle, matched by its latitude/longitude bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoArea {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

impl GeoArea {
    fn contains(&self, loc: &Location) -> bool {
        let lat_delta = (self.radius_km / EARTH_RADIUS_KM).to_degrees();
        // Widens towards the poles.
        let lng_delta = lat_delta / self.latitude.to_radians().cos();
        (loc.latitude - self.latitude).abs() <= lat_delta
            && (loc.longitude - self.longitude).abs() <= lng_delta
    }

    /// Haversine distance in km.
    fn distance_km(&self, loc: &Location) -> f64 {
        let d_lat = (loc.latitude - self.latitude).to_radians();
        let d_lng = (loc.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * loc.latitude.to_radians().cos()
                * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

impl SearchFilter {
    /// The search circle, if coordinates were given.
    fn area(&self) -> Result<Option<GeoArea>, EngineError> {
        let (latitude, longitude) = match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => (lat, lng),
            (None, None) => {
                if self.radius_km.is_some() {
                    return Err(EngineError::invalid("radius_km needs latitude and longitude"));
                }
                if self.sort == SortKey::Distance {
                    return Err(EngineError::invalid(
                        "sorting by distance needs latitude and longitude",
                    ));
                }
                return Ok(None);
            }
            _ => {
                return Err(EngineError::invalid(
                    "latitude and longitude must be given together",
                ));
            }
        };
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(EngineError::invalid("latitude must be within [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(EngineError::invalid("longitude must be within [-180, 180]"));
        }
        let radius_km = self.radius_km.unwrap_or(DEFAULT_SEARCH_RADIUS_KM);
        if radius_km.is_nan() || radius_km <= 0.0 {
            return Err(EngineError::invalid("radius_km must be positive"));
        }
        if radius_km > MAX_SEARCH_RADIUS_KM {
            return Err(EngineError::LimitExceeded("search radius too large"));
        }
        Ok(Some(GeoArea {
            latitude,
            longitude,
            radius_km,
        }))
    }

    fn matches_listing(&self, p: &Property, rating: &RatingSummary) -> bool {
        if let Some(needle) = &self.location {
            let needle = needle.to_lowercase();
            let loc = &p.location;
            let hit = [&loc.city, &loc.state, &loc.country, &loc.address]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        self.guests.is_none_or(|g| p.capacity.guests >= g)
            && self.min_price.is_none_or(|m| p.pricing.base_price >= m)
            && self.max_price.is_none_or(|m| p.pricing.base_price <= m)
            && self.kind.is_none_or(|k| p.kind == k)
            && self.instant_book.is_none_or(|b| p.policy.instant_book == b)
            && self.min_rating.is_none_or(|r| rating.average >= r)
            && self.amenities.iter().all(|wanted| {
                p.amenities.iter().any(|a| a.eq_ignore_ascii_case(wanted))
            })
    }

    fn compare(&self, a: &SearchHit, b: &SearchHit) -> Ordering {
        let natural = match self.sort {
            SortKey::Price => a.property.pricing.base_price.cmp(&b.property.pricing.base_price),
            SortKey::Rating => b
                .rating
                .average
                .total_cmp(&a.rating.average)
                .then(b.rating.count.cmp(&a.rating.count)),
            SortKey::Newest => b.property.created_at.cmp(&a.property.created_at),
            SortKey::Distance => {
                let far = f64::INFINITY;
                a.distance_km.unwrap_or(far).total_cmp(&b.distance_km.unwrap_or(far))
            }
        };
        let ordered = if self.reverse { natural.reverse() } else { natural };
        ordered.then(a.property.id.cmp(&b.property.id))
    }
}

impl Engine {
    /// Active listings matching every given filter, sorted and paged.
    /// Listings booked over the requested dates are left out.
    pub async fn search(&self, filter: &SearchFilter) -> Result<SearchPage, EngineError> {
        let stay = match (filter.check_in, filter.check_out) {
            (Some(check_in), Some(check_out)) => Some(validate_stay(check_in, check_out)?),
            (None, None) => None,
            _ => {
                return Err(EngineError::invalid(
                    "check_in and check_out must be given together",
                ));
            }
        };
        let area = filter.area()?;
        let page = filter.page.max(1);
        let page_size = match filter.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n if n > MAX_PAGE_SIZE => {
                return Err(EngineError::LimitExceeded("page size too large"));
            }
            n => n,
        };

        let mut hits = Vec::new();
        for ps in self.store.property_states() {
            let guard = ps.read().await;
            if !guard.listing.is_active {
                continue;
            }
            let rating = self.property_rating(guard.id());
            if !filter.matches_listing(&guard.listing, &rating) {
                continue;
            }
            if area.is_some_and(|area| !area.contains(&guard.listing.location)) {
                continue;
            }
            if stay.is_some_and(|stay| !is_available(&guard, &stay, None)) {
                continue;
            }
            hits.push(SearchHit {
                property: guard.listing.clone(),
                rating,
                distance_km: area.map(|area| area.distance_km(&guard.listing.location)),
            });
        }

        hits.sort_by(|a, b| filter.compare(a, b));
        let total = hits.len();
        let hits = hits
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();
        Ok(SearchPage {
            hits,
            total,
            page,
            page_size,
        })
    }
}
