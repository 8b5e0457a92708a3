//! GeoDesk: an embedded library for querying OpenStreetMap features out of a
//! Geographic Object Library (GOL) file.
//!
//! A GOL is a single memory-mapped file holding every feature of an extract
//! -- nodes, ways, relations, their tags and geometry -- partitioned into
//! tiles and indexed spatially within each tile. [`FeatureStore::open_single`]
//! opens one; [`Features::new`] (via [`FeatureStore::features`]) is the
//! entry point for querying it.
//!
//! ```no_run
//! use geodesk::FeatureStore;
//!
//! let store = FeatureStore::open_single("region.gol")?;
//! for feature in store.features("na[amenity=cafe]")? {
//!     let feature = feature?;
//!     println!("{}", feature.id());
//! }
//! # Ok::<(), geodesk::GeodeskError>(())
//! ```

pub mod bbox;
pub mod blob_store;
pub mod check;
pub mod codec;
pub mod error;
pub mod feature;
pub mod features;
pub mod feature_store;
pub mod feature_type;
#[cfg(any(feature = "fmt-csv", feature = "fmt-map"))]
pub mod format;
pub mod matcher;
pub mod query;
pub mod tag;
pub mod tile;
pub mod transaction;

pub use bbox::Bbox;
pub use check::{Checker, Severity, Warning};
pub use error::{GeodeskError, Result};
pub use feature::Feature;
pub use features::Features;
pub use feature_store::FeatureStore;
pub use feature_type::FeatureType;
pub use transaction::Updater;
