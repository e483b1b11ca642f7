//! Gallery site protocol.
//!
//! - [`ban`] recognizes the temporary ban notice
//! - [`info`] fetches gallery information (through the metadata cache)
//! - [`keys`] derives per-page image keys and the show key
//! - [`locate`] exchanges keys for the image location and detects the quota
//! - [`account`] reads the account's image limits
//!
//! All requests go through a [`SiteClient`] snapshot built by
//! [`Session::connect`](crate::session::Session::connect).

pub mod account;
pub mod ban;
mod client;
mod error;
pub mod info;
pub mod keys;
pub mod locate;
pub mod utils;

pub use account::{AccountLimits, fetch_account_limits};
pub use ban::BanCondition;
pub use client::SiteClient;
pub use error::SiteError;
pub use info::{GalleryCatalog, GalleryInfo, parse_gallery_address};
pub use keys::{GalleryKeyResolver, KeySet, SHOW_KEY_INDEX};
pub use locate::{ImageLocation, ImageLocationResolver, LinkKind};
