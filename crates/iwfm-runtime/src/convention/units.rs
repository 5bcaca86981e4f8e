//! Unit systems and conversion factors
//!
//! The engine computes in feet, square feet and cubic feet and multiplies
//! its results by caller-supplied factors on the way out. This module owns
//! those factors and the tags attached to every returned value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SQ_FT_PER_ACRE: f64 = 43_560.0;
const M_PER_FT: f64 = 0.3048;
const SQ_M_PER_SQ_FT: f64 = M_PER_FT * M_PER_FT;
const CU_M_PER_CU_FT: f64 = SQ_M_PER_SQ_FT * M_PER_FT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LengthUnit {
    #[default]
    Feet,
    Meters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AreaUnit {
    SquareFeet,
    #[default]
    Acres,
    SquareMeters,
    Hectares,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeUnit {
    CubicFeet,
    #[default]
    AcreFeet,
    ThousandAcreFeet,
    CubicMeters,
}

impl LengthUnit {
    pub fn label(&self) -> &'static str {
        match self {
            LengthUnit::Feet => "feet",
            LengthUnit::Meters => "meters",
        }
    }

    /// Multiplier from feet
    pub fn factor(&self) -> f64 {
        match self {
            LengthUnit::Feet => 1.0,
            LengthUnit::Meters => M_PER_FT,
        }
    }
}

impl AreaUnit {
    pub fn label(&self) -> &'static str {
        match self {
            AreaUnit::SquareFeet => "square feet",
            AreaUnit::Acres => "acres",
            AreaUnit::SquareMeters => "square meters",
            AreaUnit::Hectares => "hectares",
        }
    }

    /// Multiplier from square feet
    pub fn factor(&self) -> f64 {
        match self {
            AreaUnit::SquareFeet => 1.0,
            AreaUnit::Acres => 1.0 / SQ_FT_PER_ACRE,
            AreaUnit::SquareMeters => SQ_M_PER_SQ_FT,
            AreaUnit::Hectares => SQ_M_PER_SQ_FT / 10_000.0,
        }
    }
}

impl VolumeUnit {
    pub fn label(&self) -> &'static str {
        match self {
            VolumeUnit::CubicFeet => "cubic feet",
            VolumeUnit::AcreFeet => "acre-feet",
            VolumeUnit::ThousandAcreFeet => "thousand acre-feet",
            VolumeUnit::CubicMeters => "cubic meters",
        }
    }

    /// Multiplier from cubic feet
    pub fn factor(&self) -> f64 {
        match self {
            VolumeUnit::CubicFeet => 1.0,
            VolumeUnit::AcreFeet => 1.0 / SQ_FT_PER_ACRE,
            VolumeUnit::ThousandAcreFeet => 1.0 / (SQ_FT_PER_ACRE * 1_000.0),
            VolumeUnit::CubicMeters => CU_M_PER_CU_FT,
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace(['_', ' '], "-")
}

impl FromStr for LengthUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "feet" | "ft" => Ok(LengthUnit::Feet),
            "meters" | "m" => Ok(LengthUnit::Meters),
            other => Err(format!("unknown length unit '{}'", other)),
        }
    }
}

impl FromStr for AreaUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "square-feet" | "sq-ft" => Ok(AreaUnit::SquareFeet),
            "acres" | "ac" => Ok(AreaUnit::Acres),
            "square-meters" | "sq-m" => Ok(AreaUnit::SquareMeters),
            "hectares" | "ha" => Ok(AreaUnit::Hectares),
            other => Err(format!("unknown area unit '{}'", other)),
        }
    }
}

impl FromStr for VolumeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "cubic-feet" | "cu-ft" => Ok(VolumeUnit::CubicFeet),
            "acre-feet" | "af" => Ok(VolumeUnit::AcreFeet),
            "thousand-acre-feet" | "taf" => Ok(VolumeUnit::ThousandAcreFeet),
            "cubic-meters" | "cu-m" => Ok(VolumeUnit::CubicMeters),
            other => Err(format!("unknown volume unit '{}'", other)),
        }
    }
}

/// Which unit family a budget column is reported in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Length,
    Area,
    Volume,
}

impl UnitKind {
    /// Assign a column header its unit family
    ///
    /// Area columns report area; head, depth and elevation columns report
    /// length; everything else is a volume.
    pub fn classify(header: &str) -> Self {
        let lower = header.to_ascii_lowercase();
        if lower.contains("area") {
            UnitKind::Area
        } else if ["head", "depth", "elev", "level"]
            .iter()
            .any(|word| lower.contains(word))
        {
            UnitKind::Length
        } else {
            UnitKind::Volume
        }
    }
}

/// Multipliers the engine applies to its results
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConversionFactors {
    pub length: f64,
    pub area: f64,
    pub volume: f64,
}

impl ConversionFactors {
    pub fn for_kind(&self, kind: UnitKind) -> f64 {
        match kind {
            UnitKind::Length => self.length,
            UnitKind::Area => self.area,
            UnitKind::Volume => self.volume,
        }
    }
}

/// Unit attached to a returned value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct UnitTag {
    pub kind: UnitKind,
    pub label: String,
}

impl fmt::Display for UnitTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Caller-facing units for results
///
/// Defaults to feet, acres and acre-feet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnitSystem {
    pub length: LengthUnit,
    pub area: AreaUnit,
    pub volume: VolumeUnit,
}

impl UnitSystem {
    /// Engine-native units; every factor is 1
    pub fn native() -> Self {
        Self {
            length: LengthUnit::Feet,
            area: AreaUnit::SquareFeet,
            volume: VolumeUnit::CubicFeet,
        }
    }

    pub fn metric() -> Self {
        Self {
            length: LengthUnit::Meters,
            area: AreaUnit::SquareMeters,
            volume: VolumeUnit::CubicMeters,
        }
    }

    /// Parse from unit names as written in configuration
    pub fn parse(length: &str, area: &str, volume: &str) -> Result<Self, String> {
        Ok(Self {
            length: length.parse()?,
            area: area.parse()?,
            volume: volume.parse()?,
        })
    }

    pub fn factors(&self) -> ConversionFactors {
        ConversionFactors {
            length: self.length.factor(),
            area: self.area.factor(),
            volume: self.volume.factor(),
        }
    }

    pub fn label(&self, kind: UnitKind) -> &'static str {
        match kind {
            UnitKind::Length => self.length.label(),
            UnitKind::Area => self.area.label(),
            UnitKind::Volume => self.volume.label(),
        }
    }

    pub fn tag(&self, kind: UnitKind) -> UnitTag {
        UnitTag {
            kind,
            label: self.label(kind).to_string(),
        }
    }

    /// Tag for a budget column, by header
    pub fn tag_column(&self, header: &str) -> UnitTag {
        self.tag(UnitKind::classify(header))
    }
}
