use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeteringPointType {
    Consumption,
    Production,
}

impl MeteringPointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consumption => "consumption",
            Self::Production => "production",
        }
    }
}

impl FromStr for MeteringPointType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "consumption" => Ok(Self::Consumption),
            "production" => Ok(Self::Production),
            other => Err(format!("unknown metering point type: {other}")),
        }
    }
}

impl fmt::Display for MeteringPointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TechnologyType {
    Coal,
    Nuclear,
    Solar,
    Wind,
}

impl TechnologyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coal => "coal",
            Self::Nuclear => "nuclear",
            Self::Solar => "solar",
            Self::Wind => "wind",
        }
    }
}

impl FromStr for TechnologyType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "coal" => Ok(Self::Coal),
            "nuclear" => Ok(Self::Nuclear),
            "solar" => Ok(Self::Solar),
            "wind" => Ok(Self::Wind),
            other => Err(format!("unknown technology type: {other}")),
        }
    }
}

/// Stored MeteringPoint row. Technology and address live in their own
/// tables and are joined in at read time.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MeteringPoint {
    pub gsrn: String,
    pub sector: Option<String>,
    #[serde(rename = "type")]
    pub meteringpoint_type: Option<MeteringPointType>,
}

impl MeteringPoint {
    pub fn new(gsrn: impl Into<String>) -> Self {
        Self {
            gsrn: gsrn.into(),
            sector: None,
            meteringpoint_type: None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TechnologyCodes {
    pub tech_code: String,
    pub fuel_code: String,
}

impl TechnologyCodes {
    pub fn new(tech_code: impl Into<String>, fuel_code: impl Into<String>) -> Self {
        Self {
            tech_code: tech_code.into(),
            fuel_code: fuel_code.into(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Technology {
    pub tech_code: String,
    pub fuel_code: String,
    #[serde(rename = "type")]
    pub technology_type: TechnologyType,
}

impl Technology {
    pub fn codes(&self) -> TechnologyCodes {
        TechnologyCodes::new(self.tech_code.clone(), self.fuel_code.clone())
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub street_code: Option<String>,
    #[serde(default)]
    pub street_name: Option<String>,
    #[serde(default)]
    pub building_number: Option<String>,
    #[serde(default)]
    pub floor_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub post_code: Option<String>,
    #[serde(default)]
    pub city_name: Option<String>,
    #[serde(default)]
    pub city_sub_division_name: Option<String>,
    #[serde(default)]
    pub municipality_code: Option<String>,
    #[serde(default)]
    pub location_description: Option<String>,
}

impl Address {
    pub const FIELDS: [&'static str; 10] = [
        "street_code",
        "street_name",
        "building_number",
        "floor_id",
        "room_id",
        "post_code",
        "city_name",
        "city_sub_division_name",
        "municipality_code",
        "location_description",
    ];

    /// Field values in `Address::FIELDS` order.
    pub fn values(&self) -> [Option<&str>; 10] {
        [
            self.street_code.as_deref(),
            self.street_name.as_deref(),
            self.building_number.as_deref(),
            self.floor_id.as_deref(),
            self.room_id.as_deref(),
            self.post_code.as_deref(),
            self.city_name.as_deref(),
            self.city_sub_division_name.as_deref(),
            self.municipality_code.as_deref(),
            self.location_description.as_deref(),
        ]
    }

    pub fn from_values(values: [Option<String>; 10]) -> Self {
        let [street_code, street_name, building_number, floor_id, room_id, post_code, city_name, city_sub_division_name, municipality_code, location_description] =
            values;
        Self {
            street_code,
            street_name,
            building_number,
            floor_id,
            room_id,
            post_code,
            city_name,
            city_sub_division_name,
            municipality_code,
            location_description,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DelegateGrant {
    pub gsrn: String,
    pub subject: String,
}

impl DelegateGrant {
    pub fn new(gsrn: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            gsrn: gsrn.into(),
            subject: subject.into(),
        }
    }
}

/// Read model returned by the Query Engine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MeteringPointView {
    pub gsrn: String,
    #[serde(rename = "type")]
    pub meteringpoint_type: Option<MeteringPointType>,
    pub sector: Option<String>,
    pub technology: Option<Technology>,
    pub address: Option<Address>,
}

impl MeteringPointView {
    /// Joins the stored row with its resolved technology and address.
    /// A link that points at no Technology row resolves to `None`.
    pub fn resolve(
        meteringpoint: &MeteringPoint,
        technology: Option<Technology>,
        address: Option<Address>,
    ) -> Self {
        Self {
            gsrn: meteringpoint.gsrn.clone(),
            meteringpoint_type: meteringpoint.meteringpoint_type,
            sector: meteringpoint.sector.clone(),
            technology,
            address,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueryPage {
    pub total: u64,
    pub meteringpoints: Vec<MeteringPointView>,
}
