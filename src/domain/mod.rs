//! Domain model for tracked vehicle listings

pub mod listing;

pub use listing::{
    DetailFields, ListingCard, ListingRecord, ListingStatus, ModelQuery, Scope, StaleListing,
};
