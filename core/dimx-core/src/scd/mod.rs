//! Slowly changing dimensions.
//!
//! - [`TypeOneDimension`]: changed attributes are overwritten in place.
//! - [`SlowlyChangingDimension`]: changes create a new version with its own
//!   surrogate key and validity interval; optional type-1 attributes are
//!   overwritten instead (combined mode).
//!
//! Rows must be presented in source order. There is no timestamp-based
//! conflict resolution between out-of-order changes.

pub mod type1;
pub mod type2;

pub use type1::TypeOneDimension;
pub use type2::{
    Inclusive, SlowlyChangingDimension, SlowlyChangingDimensionBuilder, ValidityEnd,
    ValidityStart, today,
};
