//! Index and unit conventions shared by the model and budget layers

pub mod index;
pub mod units;

pub use index::{IndexBase, LocationIndex};
pub use units::{
    AreaUnit, ConversionFactors, LengthUnit, UnitKind, UnitSystem, UnitTag, VolumeUnit,
};
