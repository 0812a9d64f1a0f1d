//! Primitives shared by the settlement engine and the settlement server.
mod currency;
mod minor_units;
mod secret;

pub mod helpers;
pub mod op;

pub use currency::{CurrencyCode, CurrencyCodeError};
pub use minor_units::{MinorUnits, MinorUnitsConversionError};
pub use secret::Secret;
