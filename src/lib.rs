//! ipgeo - Offline IPv4 geolocation with a hot-reloaded range database.
//!
//! This crate resolves IPv4 addresses to geolocation attributes (country,
//! region, city, ISP, coordinates, timezone) from a compact binary range
//! database that is periodically re-downloaded and swapped in without
//! interrupting concurrent lookups.
//!
//! # Features
//!
//! - **Validated decoding**: every offset in the untrusted file is bounds-checked
//! - **Two-tier index**: a first-octet prefix table narrows a leftmost
//!   lower-bound search over sorted range ends
//! - **Hot swap**: lookups load one immutable snapshot; refreshes publish a
//!   fully validated replacement with a single atomic pointer swap
//! - **Refresh cycle**: download (retried once), unzip, decode, probe, publish,
//!   on a UTC cron schedule
//! - **Buffer reuse**: the displaced snapshot's allocations seed the next decode
//!
//! # Quick Start
//!
//! ```no_run
//! use ipgeo::{Config, GeoService};
//!
//! let config = Config::load("etc/ipgeo.yaml")?;
//! let service = GeoService::new(&config.data_sync)?;
//!
//! // Blocks until the first snapshot is served; fails if it cannot be.
//! service.init()?;
//!
//! let info = service.lookup("8.8.8.8")?;
//! println!("{} {} {}", info.db_version, info.continent_code, info.record.city);
//!
//! service.shutdown();
//! # Ok::<(), ipgeo::Error>(())
//! ```
//!
//! # Building a database
//!
//! ```
//! use ipgeo::binary::{decode, DatabaseWriter};
//! use std::net::Ipv4Addr;
//!
//! let mut writer = DatabaseWriter::new();
//! writer.add_range(
//!     Ipv4Addr::new(0, 0, 0, 0),
//!     Ipv4Addr::new(255, 255, 255, 255),
//!     "亚洲|中国|北京|北京||联通|110000|CN|116.4|39.9|100000|4837|chinaunicom.com|||Asia/Shanghai",
//! )?;
//!
//! let snapshot = decode(writer.write()?, "2024-01-01")?;
//! assert_eq!(snapshot.lookup("1.2.3.4")?.country, "中国");
//! # Ok::<(), ipgeo::Error>(())
//! ```

mod error;

pub mod api;
pub mod binary;
pub mod config;
pub mod database;
pub mod ratelimit;
pub mod record;
pub mod refresh;
pub mod remote;
pub mod schedule;
pub mod service;
pub mod snapshot;

// Re-export core types
pub use error::{Error, ErrorKind, Result};

// Re-export configuration
pub use config::{Config, DataSyncConfig, RateLimitConfig, RedisConfig};

// Re-export the engine
pub use database::GeoDatabase;
pub use record::{continent_code, GeoInfo, GeoRecord};
pub use snapshot::{Buffers, Snapshot};

// Re-export refresh and lifecycle
pub use refresh::{RefreshOutcome, Refresher};
pub use remote::{Fetcher, FileFetcher, HttpFetcher};
pub use schedule::Trigger;
pub use service::GeoService;
