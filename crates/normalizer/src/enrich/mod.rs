//! Enrich — date parsing, GeoIP lookup and content hashing used during
//! field extraction.

pub mod date;
pub mod geoip;
pub mod hash;

pub use date::{parse_date, DateFormat};
pub use geoip::{GeoDatabaseLoader, GeoIpError, GeoLocation, GeoLocator};
pub use hash::{hash_value, sha1_hex};
