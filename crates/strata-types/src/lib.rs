//! Shared data types for the Strata cursor layer: the key/value byte buffer,
//! the typed field union, the format codec and configuration strings.

pub mod config;
pub mod intpack;
pub mod item;
pub mod pack;
pub mod value;

pub use config::{ConfigItem, ConfigKind, OPEN_CURSOR_DEFAULTS};
pub use item::Item;
pub use pack::{Field, FieldKind};
pub use value::{Value, ValueRef};
