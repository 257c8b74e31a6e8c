//! HTML extraction for results pages and listing detail pages
//!
//! Stateless parsing of fetched content into structured fields. Selectors are
//! compiled once at construction. A missing field is never an error: the value
//! is left unset and the record is saved with whatever data exists.

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::domain::{DetailFields, ListingCard};

/// Extractor capabilities consumed by page-load, detail-scrape, and
/// verification jobs.
pub struct ListingExtractor {
    site_root: Url,
    card: Selector,
    card_link: Selector,
    card_title: Selector,
    card_price: Selector,
    card_msrp: Selector,
    card_dealer: Selector,
    card_location: Selector,
    card_image: Selector,
    detail_term: Selector,
    detail_days_listed: Selector,
    unlisted_marker: Selector,
    number_re: Regex,
    distance_re: Regex,
}

impl ListingExtractor {
    /// Compile the selector set. `base_url` anchors relative card links.
    pub fn new(base_url: &str) -> Result<Self> {
        let site_root = Url::parse(base_url)
            .with_context(|| format!("invalid base url {base_url}"))?;
        Ok(Self {
            site_root,
            card: parse_selector("div.vehicle-card")?,
            card_link: parse_selector("a.image-gallery-link")?,
            card_title: parse_selector("h2.title")?,
            card_price: parse_selector("span.primary-price")?,
            card_msrp: parse_selector("span.secondary-price")?,
            card_dealer: parse_selector("div.dealer-name strong")?,
            card_location: parse_selector("div.miles-from")?,
            card_image: parse_selector("img.vehicle-image")?,
            detail_term: parse_selector("dt")?,
            detail_days_listed: parse_selector("div.price-history-summary div.listed-time strong")?,
            unlisted_marker: parse_selector("spark-notification.unlisted-notification[open]")?,
            number_re: Regex::new(r"-?[\d,]+").context("number regex")?,
            distance_re: Regex::new(r"\(([\d,]+)\s*mi\.?\)").context("distance regex")?,
        })
    }

    /// Extract every vehicle card carrying a listing id from a results page.
    pub fn extract_cards(&self, page: &str) -> Vec<ListingCard> {
        let html = Html::parse_document(page);
        let mut cards = Vec::new();
        for el in html.select(&self.card) {
            let Some(listing_id) = el.value().attr("data-listing-id").map(str::trim) else {
                continue;
            };
            if listing_id.is_empty() {
                continue;
            }
            let Some(url) = self.card_detail_url(el) else {
                debug!(listing_id, "card has no usable detail link, skipping");
                continue;
            };
            let location = self.select_text(el, &self.card_location);
            cards.push(ListingCard {
                listing_id: listing_id.to_string(),
                url,
                title: self.select_text(el, &self.card_title),
                price: self
                    .select_text(el, &self.card_price)
                    .filter(|t| t.contains('$'))
                    .and_then(|t| self.parse_number(&t)),
                msrp: self
                    .select_text(el, &self.card_msrp)
                    .filter(|t| t.contains("MSRP"))
                    .and_then(|t| self.parse_number(&t)),
                dealer: self.select_text(el, &self.card_dealer),
                distance: location.as_deref().and_then(|l| self.parse_distance(l)),
                location,
                image_url: el
                    .select(&self.card_image)
                    .next()
                    .and_then(|img| img.value().attr("src"))
                    .map(String::from),
            });
        }
        cards
    }

    /// Extract structured fields from a listing detail page.
    pub fn extract_detail(&self, page: &str) -> DetailFields {
        let html = Html::parse_document(page);
        let mut fields = DetailFields {
            is_still_listed: html.select(&self.unlisted_marker).next().is_none(),
            ..DetailFields::default()
        };

        // Basics are laid out as <dt>label</dt><dd>value</dd> pairs.
        for dt in html.select(&self.detail_term) {
            let label = element_text(dt).to_lowercase();
            let Some(dd) = next_element_sibling(dt) else { continue };
            let value = element_text(dd);
            match label.as_str() {
                "vin" => fields.vin = Some(value).filter(|v| !v.is_empty()),
                "mileage" => fields.mileage = self.parse_number(&value),
                _ => {}
            }
        }

        fields.price = self
            .select_text_doc(&html, &self.card_price)
            .filter(|t| t.contains('$'))
            .and_then(|t| self.parse_number(&t));
        fields.msrp = self
            .select_text_doc(&html, &self.card_msrp)
            .filter(|t| t.contains("MSRP"))
            .and_then(|t| self.parse_number(&t));
        fields.dealer = self.select_text_doc(&html, &self.card_dealer);
        fields.location = self.select_text_doc(&html, &self.card_location);
        fields.distance = fields
            .location
            .as_deref()
            .and_then(|l| self.parse_distance(l));
        fields.days_on_market = self
            .select_text_doc(&html, &self.detail_days_listed)
            .and_then(|t| self.parse_number(&t));

        fields
    }

    /// Whether a detail page still shows the listing as available.
    pub fn is_still_listed(&self, page: &str) -> bool {
        let html = Html::parse_document(page);
        html.select(&self.unlisted_marker).next().is_none()
    }

    fn card_detail_url(&self, card: ElementRef<'_>) -> Option<String> {
        let href = card
            .select(&self.card_link)
            .next()
            .and_then(|a| a.value().attr("href"))?;
        self.site_root.join(href).ok().map(|u| u.to_string())
    }

    fn select_text(&self, scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
        scope
            .select(selector)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
    }

    fn select_text_doc(&self, html: &Html, selector: &Selector) -> Option<String> {
        html.select(selector)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())
    }

    /// First integer in the text, commas stripped. "$33,450" -> 33450.
    fn parse_number(&self, text: &str) -> Option<i64> {
        let m = self.number_re.find(text)?;
        m.as_str().replace(',', "").parse().ok()
    }

    /// Distance in miles from a location string like "Houston, TX (23 mi.)".
    fn parse_distance(&self, location: &str) -> Option<i64> {
        let caps = self.distance_re.captures(location)?;
        caps.get(1)?.as_str().replace(',', "").parse().ok()
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("failed to compile selector '{css}': {e}"))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn next_element_sibling(el: ElementRef<'_>) -> Option<ElementRef<'_>> {
    el.next_siblings().find_map(ElementRef::wrap)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"
        <html><body>
          <div class="vehicle-card" data-listing-id="abc123">
            <a class="image-gallery-link" href="/vehicledetail/abc123/"></a>
            <h2 class="title">2025 Honda CR-V Hybrid Sport</h2>
            <span class="primary-price">$34,955</span>
            <span class="secondary-price">MSRP $36,450</span>
            <div class="dealer-name"><strong>Sterling McCall Honda</strong></div>
            <div class="miles-from">Houston, TX (14 mi.)</div>
            <img class="vehicle-image" src="https://cdn.example.com/abc123.jpg">
          </div>
          <div class="vehicle-card" data-listing-id="def456">
            <a class="image-gallery-link" href="/vehicledetail/def456/"></a>
            <h2 class="title">2025 Honda CR-V Hybrid Touring</h2>
            <span class="primary-price">Not Priced</span>
            <div class="miles-from">Katy, TX (1,020 mi.)</div>
          </div>
          <div class="vehicle-card"><h2 class="title">No id, skipped</h2></div>
        </body></html>
    "#;

    const DETAIL_PAGE: &str = r#"
        <html><body>
          <span class="primary-price">$33,450</span>
          <span class="secondary-price">MSRP $36,450</span>
          <dl>
            <dt>VIN</dt><dd>7FARS6H91SE000042</dd>
            <dt>Mileage</dt><dd>12 mi.</dd>
            <dt>Drivetrain</dt><dd>All-wheel Drive</dd>
          </dl>
          <div class="price-history-summary"><div class="listed-time">
            Listed for <strong>23</strong> days
          </div></div>
          <div class="dealer-name"><strong>Sterling McCall Honda</strong></div>
          <div class="miles-from">Houston, TX (14 mi.)</div>
        </body></html>
    "#;

    const UNLISTED_PAGE: &str = r#"
        <html><body>
          <spark-notification class="unlisted-notification" open>
            This car is no longer listed.
          </spark-notification>
        </body></html>
    "#;

    fn extractor() -> ListingExtractor {
        ListingExtractor::new("https://www.cars.com/shopping/results/").unwrap()
    }

    #[test]
    fn cards_extracted_with_absolute_urls() {
        let cards = extractor().extract_cards(RESULTS_PAGE);
        assert_eq!(cards.len(), 2);

        let first = &cards[0];
        assert_eq!(first.listing_id, "abc123");
        assert_eq!(first.url, "https://www.cars.com/vehicledetail/abc123/");
        assert_eq!(first.price, Some(34_955));
        assert_eq!(first.msrp, Some(36_450));
        assert_eq!(first.dealer.as_deref(), Some("Sterling McCall Honda"));
        assert_eq!(first.distance, Some(14));

        // "Not Priced" has no dollar sign and parses to no price.
        let second = &cards[1];
        assert_eq!(second.price, None);
        assert_eq!(second.distance, Some(1_020));
    }

    #[test]
    fn detail_fields_extracted() {
        let detail = extractor().extract_detail(DETAIL_PAGE);
        assert_eq!(detail.vin.as_deref(), Some("7FARS6H91SE000042"));
        assert_eq!(detail.mileage, Some(12));
        assert_eq!(detail.price, Some(33_450));
        assert_eq!(detail.msrp, Some(36_450));
        assert_eq!(detail.days_on_market, Some(23));
        assert!(detail.is_still_listed);
    }

    #[test]
    fn unlisted_marker_detected() {
        let ex = extractor();
        assert!(!ex.is_still_listed(UNLISTED_PAGE));
        assert!(ex.is_still_listed(DETAIL_PAGE));
        assert!(!ex.extract_detail(UNLISTED_PAGE).is_still_listed);
    }

    #[test]
    fn missing_fields_are_none_not_errors() {
        let detail = extractor().extract_detail("<html><body><p>sparse</p></body></html>");
        assert!(detail.vin.is_none());
        assert!(detail.price.is_none());
        assert!(detail.is_still_listed);
    }
}
