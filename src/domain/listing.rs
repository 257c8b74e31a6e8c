//! Listing entities shared across the scrape pipeline
//!
//! A listing is identified by its VIN once known. Search result pages only expose
//! the site-assigned `listing_id`, which is resolved to a VIN either through a
//! database lookup or a detail-page scrape.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Search-radius classification for one make/model query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Listings within the configured radius of the home zip code.
    Local,
    /// Nationwide search with no distance cap.
    National,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Local => "local",
            Scope::National => "national",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a persisted listing.
///
/// A listing only ever moves to `Inactive` through verification; rows are never
/// hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Active,
    Inactive,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Inactive => "inactive",
        }
    }
}

/// One tracked make/model pair from the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelQuery {
    pub make: String,
    pub model: String,
}

/// Fields extracted from a single vehicle card on a results page.
///
/// The VIN is not visible at this stage; the card travels through the unresolved
/// buffer until a `ListingResolution` job decides whether a detail scrape is
/// needed.
#[derive(Debug, Clone)]
pub struct ListingCard {
    pub listing_id: String,
    /// Absolute detail-page URL.
    pub url: String,
    pub title: Option<String>,
    pub price: Option<i64>,
    pub msrp: Option<i64>,
    pub dealer: Option<String>,
    pub location: Option<String>,
    /// Distance from the home zip in miles, parsed out of the location string.
    pub distance: Option<i64>,
    pub image_url: Option<String>,
}

/// Fields extracted from a listing detail page.
#[derive(Debug, Clone, Default)]
pub struct DetailFields {
    pub vin: Option<String>,
    pub price: Option<i64>,
    pub msrp: Option<i64>,
    pub mileage: Option<i64>,
    pub dealer: Option<String>,
    pub location: Option<String>,
    pub distance: Option<i64>,
    pub days_on_market: Option<i64>,
    /// False when the page carries the "no longer listed" notification.
    pub is_still_listed: bool,
}

/// A previously active listing not re-observed since before today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleListing {
    pub vin: String,
    pub url: String,
}

/// A partial listing update bound for the persistence gateway.
///
/// Every field except the VIN is optional: the upsert applies only populated
/// fields, so a price-only update cannot wipe out data a fuller scrape wrote
/// earlier. Last-write-wins is per field, not per record.
#[derive(Debug, Clone, Default)]
pub struct ListingRecord {
    pub vin: String,
    pub listing_id: Option<String>,
    pub title: Option<String>,
    pub price: Option<i64>,
    pub msrp: Option<i64>,
    pub mileage: Option<i64>,
    pub dealer: Option<String>,
    pub location: Option<String>,
    pub distance: Option<i64>,
    pub shipping_cost: Option<f64>,
    pub scope: Option<Scope>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub days_on_market: Option<i64>,
    pub date_added: Option<NaiveDate>,
    pub first_seen: Option<NaiveDate>,
    pub last_seen: Option<NaiveDate>,
    pub status: Option<ListingStatus>,
}

impl ListingRecord {
    /// Cheap re-sighting update for a listing whose VIN is already known.
    ///
    /// Carries only the card price plus scope and last_seen; the existing row
    /// keeps everything else, including its status.
    pub fn price_update(vin: &str, card: &ListingCard, scope: Scope, today: NaiveDate) -> Self {
        Self {
            vin: vin.to_string(),
            listing_id: Some(card.listing_id.clone()),
            price: card.price,
            scope: Some(scope),
            last_seen: Some(today),
            ..Self::default()
        }
    }

    /// Full record assembled from a results card plus its detail page.
    pub fn from_detail(
        card: &ListingCard,
        detail: &DetailFields,
        vin: String,
        shipping_cost_per_mile: f64,
        scope: Scope,
        today: NaiveDate,
    ) -> Self {
        let distance = detail.distance.or(card.distance);
        let shipping_cost = distance
            .map(|miles| (miles as f64 * shipping_cost_per_mile * 100.0).round() / 100.0);
        let date_added = detail
            .days_on_market
            .and_then(|days| today.checked_sub_days(chrono::Days::new(days.max(0) as u64)));

        Self {
            vin,
            listing_id: Some(card.listing_id.clone()),
            title: card.title.clone(),
            price: detail.price.or(card.price),
            msrp: detail.msrp.or(card.msrp),
            mileage: detail.mileage,
            dealer: detail.dealer.clone().or_else(|| card.dealer.clone()),
            location: detail.location.clone().or_else(|| card.location.clone()),
            distance,
            shipping_cost,
            scope: Some(scope),
            url: Some(card.url.clone()),
            image_url: card.image_url.clone(),
            days_on_market: detail.days_on_market,
            date_added,
            first_seen: Some(today),
            last_seen: Some(today),
            status: Some(ListingStatus::Active),
        }
    }

    /// Verification found the listing unlisted. Status flips to inactive while
    /// last_seen stays untouched, so the staleness window reflects the last real
    /// sighting.
    pub fn verified_inactive(vin: &str) -> Self {
        Self {
            vin: vin.to_string(),
            status: Some(ListingStatus::Inactive),
            ..Self::default()
        }
    }

    /// Verification found the listing still up; refresh last_seen and the price
    /// when one was visible.
    pub fn verified_active(vin: &str, price: Option<i64>, today: NaiveDate) -> Self {
        Self {
            vin: vin.to_string(),
            price,
            last_seen: Some(today),
            ..Self::default()
        }
    }
}
