//! Bus message contracts: the domain events consumed by the reconciler and
//! the commands published by onboarding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{Address, DelegateGrant, MeteringPointType, Technology, TechnologyCodes};

pub mod topics {
    pub const METERINGPOINTS: &str = "meteringpoints";
    pub const TECHNOLOGIES: &str = "technologies";
    pub const METERINGPOINTS_COMMANDS: &str = "meteringpoints-commands";

    /// Topics drained by the event consumer.
    pub const CONSUMED: [&str; 2] = [METERINGPOINTS, TECHNOLOGIES];
}

/// Partial MeteringPoint carried by added/updated events. Absent fields leave
/// the stored value untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MeteringPointUpdate {
    pub gsrn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub meteringpoint_type: Option<MeteringPointType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technology: Option<TechnologyCodes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    MeteringPointAdded {
        meteringpoint: MeteringPointUpdate,
    },
    MeteringPointUpdated {
        meteringpoint: MeteringPointUpdate,
    },
    MeteringPointRemoved {
        gsrn: String,
    },
    /// `address: null` deletes the stored address.
    MeteringPointAddressUpdated {
        gsrn: String,
        address: Option<Address>,
    },
    /// `codes: null` clears the technology link.
    MeteringPointTechnologyUpdated {
        gsrn: String,
        codes: Option<TechnologyCodes>,
    },
    TechnologyUpdate {
        technology: Technology,
    },
    TechnologyRemoved {
        codes: TechnologyCodes,
    },
    MeteringPointDelegateGranted {
        delegate: DelegateGrant,
    },
    MeteringPointDelegateRevoked {
        delegate: DelegateGrant,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MeteringPointAdded { .. } => "MeteringPointAdded",
            Self::MeteringPointUpdated { .. } => "MeteringPointUpdated",
            Self::MeteringPointRemoved { .. } => "MeteringPointRemoved",
            Self::MeteringPointAddressUpdated { .. } => "MeteringPointAddressUpdated",
            Self::MeteringPointTechnologyUpdated { .. } => "MeteringPointTechnologyUpdated",
            Self::TechnologyUpdate { .. } => "TechnologyUpdate",
            Self::TechnologyRemoved { .. } => "TechnologyRemoved",
            Self::MeteringPointDelegateGranted { .. } => "MeteringPointDelegateGranted",
            Self::MeteringPointDelegateRevoked { .. } => "MeteringPointDelegateRevoked",
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Self::TechnologyUpdate { .. } | Self::TechnologyRemoved { .. } => topics::TECHNOLOGIES,
            _ => topics::METERINGPOINTS,
        }
    }

    /// Checks that every identity field is present and non-empty.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::MeteringPointAdded { meteringpoint } | Self::MeteringPointUpdated { meteringpoint } => {
                require("meteringpoint.gsrn", &meteringpoint.gsrn)?;
                if let Some(codes) = &meteringpoint.technology {
                    require_codes(codes)?;
                }
                Ok(())
            }
            Self::MeteringPointRemoved { gsrn } | Self::MeteringPointAddressUpdated { gsrn, .. } => {
                require("gsrn", gsrn)
            }
            Self::MeteringPointTechnologyUpdated { gsrn, codes } => {
                require("gsrn", gsrn)?;
                match codes {
                    Some(codes) => require_codes(codes),
                    None => Ok(()),
                }
            }
            Self::TechnologyUpdate { technology } => require_codes(&technology.codes()),
            Self::TechnologyRemoved { codes } => require_codes(codes),
            Self::MeteringPointDelegateGranted { delegate }
            | Self::MeteringPointDelegateRevoked { delegate } => {
                require("delegate.gsrn", &delegate.gsrn)?;
                require("delegate.subject", &delegate.subject)
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn require(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} is required"));
    }
    Ok(())
}

fn require_codes(codes: &TechnologyCodes) -> Result<(), String> {
    require("tech_code", &codes.tech_code)?;
    require("fuel_code", &codes.fuel_code)
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    /// Asks the import service to pull the subject's metering points from
    /// the data-sync system.
    ImportMeteringPoints {
        subject: String,
        params: BTreeMap<String, String>,
    },
}

impl Command {
    pub fn import_meteringpoints(subject: impl Into<String>, key: &str, value: impl Into<String>) -> Self {
        let mut params = BTreeMap::new();
        params.insert(key.to_string(), value.into());
        Self::ImportMeteringPoints {
            subject: subject.into(),
            params,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
