//! Composable filter / ordering / pagination pipeline over MeteringPoints.
//!
//! A [`MeteringPointQuery`] is a plain value: predicates are collected by the
//! builder methods and evaluated by each store backend, either in memory via
//! [`MeteringPointQuery::matches`] or compiled to SQL via
//! [`MeteringPointQuery::to_sql`]. Every predicate narrows the result set
//! (logical AND), including the delegate access scope.

use std::cmp::Ordering as CmpOrdering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{MeteringPoint, MeteringPointType};

pub const MAX_LIMIT: i64 = 100;
pub const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid offset: {0}")]
    InvalidOffset(i64),
    #[error("invalid limit: {0} (expected 1..={MAX_LIMIT})")]
    InvalidLimit(i64),
    #[error("invalid type filter: {0}")]
    InvalidType(String),
    #[error("invalid ordering: {0}")]
    InvalidOrdering(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeteringPointOrderingKey {
    Gsrn,
    Type,
    Sector,
}

impl FromStr for MeteringPointOrderingKey {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "gsrn" => Ok(Self::Gsrn),
            "type" => Ok(Self::Type),
            "sector" => Ok(Self::Sector),
            other => Err(QueryError::InvalidOrdering(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MeteringPointOrdering {
    pub key: MeteringPointOrderingKey,
    pub order: Order,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MeteringPointFilters {
    #[serde(default)]
    pub gsrn: Option<Vec<String>>,
    #[serde(default, rename = "type")]
    pub meteringpoint_type: Option<MeteringPointType>,
    #[serde(default)]
    pub sector: Option<Vec<String>>,
}

pub fn parse_type_filter(value: &str) -> Result<MeteringPointType, QueryError> {
    MeteringPointType::from_str(value).map_err(|_| QueryError::InvalidType(value.to_string()))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Pagination {
    offset: u64,
    limit: u64,
}

impl Pagination {
    pub fn new(offset: i64, limit: i64) -> Result<Self, QueryError> {
        if offset < 0 {
            return Err(QueryError::InvalidOffset(offset));
        }
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(QueryError::InvalidLimit(limit));
        }
        Ok(Self {
            offset: offset as u64,
            limit: limit as u64,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Predicate {
    GsrnIs(String),
    GsrnIn(Vec<String>),
    TypeIs(MeteringPointType),
    SectorIn(Vec<String>),
    AccessibleBy(String),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MeteringPointQuery {
    predicates: Vec<Predicate>,
    ordering: Option<MeteringPointOrdering>,
    page: Option<Pagination>,
}

impl MeteringPointQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_gsrn(mut self, gsrn: impl Into<String>) -> Self {
        self.predicates.push(Predicate::GsrnIs(gsrn.into()));
        self
    }

    /// An empty list matches nothing.
    pub fn has_any_gsrn(mut self, gsrn: &[String]) -> Self {
        self.predicates.push(Predicate::GsrnIn(gsrn.to_vec()));
        self
    }

    pub fn is_type(mut self, meteringpoint_type: MeteringPointType) -> Self {
        self.predicates.push(Predicate::TypeIs(meteringpoint_type));
        self
    }

    pub fn in_sector(self, sector: impl Into<String>) -> Self {
        self.in_any_sector(&[sector.into()])
    }

    /// An empty list matches nothing.
    pub fn in_any_sector(mut self, sectors: &[String]) -> Self {
        self.predicates.push(Predicate::SectorIn(sectors.to_vec()));
        self
    }

    /// Restricts to MeteringPoints holding a DelegateGrant for `subject`.
    pub fn is_accessible_by(mut self, subject: impl Into<String>) -> Self {
        self.predicates.push(Predicate::AccessibleBy(subject.into()));
        self
    }

    pub fn apply_filters(self, filters: &MeteringPointFilters) -> Self {
        let mut query = self;
        if let Some(gsrn) = &filters.gsrn {
            query = query.has_any_gsrn(gsrn);
        }
        if let Some(meteringpoint_type) = filters.meteringpoint_type {
            query = query.is_type(meteringpoint_type);
        }
        if let Some(sectors) = &filters.sector {
            query = query.in_any_sector(sectors);
        }
        query
    }

    pub fn apply_ordering(mut self, ordering: MeteringPointOrdering) -> Self {
        self.ordering = Some(ordering);
        self
    }

    pub fn paginate(mut self, page: Pagination) -> Self {
        self.page = Some(page);
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn ordering(&self) -> Option<MeteringPointOrdering> {
        self.ordering
    }

    pub fn page(&self) -> Option<Pagination> {
        self.page
    }

    /// In-memory predicate evaluation. `has_delegate(gsrn, subject)` answers
    /// the access join.
    pub fn matches<F>(&self, meteringpoint: &MeteringPoint, has_delegate: F) -> bool
    where
        F: Fn(&str, &str) -> bool,
    {
        self.predicates.iter().all(|predicate| match predicate {
            Predicate::GsrnIs(gsrn) => &meteringpoint.gsrn == gsrn,
            Predicate::GsrnIn(list) => list.iter().any(|gsrn| gsrn == &meteringpoint.gsrn),
            Predicate::TypeIs(expected) => meteringpoint.meteringpoint_type == Some(*expected),
            Predicate::SectorIn(list) => match &meteringpoint.sector {
                Some(sector) => list.iter().any(|candidate| candidate == sector),
                None => false,
            },
            Predicate::AccessibleBy(subject) => has_delegate(&meteringpoint.gsrn, subject),
        })
    }

    /// Compares two rows under the requested ordering. Rows without a value
    /// sort first ascending, last descending. Ties are left to the caller's
    /// insertion order.
    pub fn compare(&self, left: &MeteringPoint, right: &MeteringPoint) -> CmpOrdering {
        let Some(ordering) = self.ordering else {
            return CmpOrdering::Equal;
        };
        let result = match ordering.key {
            MeteringPointOrderingKey::Gsrn => left.gsrn.cmp(&right.gsrn),
            MeteringPointOrderingKey::Type => left
                .meteringpoint_type
                .map(|value| value.as_str())
                .cmp(&right.meteringpoint_type.map(|value| value.as_str())),
            MeteringPointOrderingKey::Sector => left.sector.cmp(&right.sector),
        };
        match ordering.order {
            Order::Asc => result,
            Order::Desc => result.reverse(),
        }
    }

    /// Compiles the predicates and ordering against the `meteringpoints mp`
    /// alias. `seq_column` is the backend's insertion-order column.
    pub fn to_sql(&self, style: Placeholder, seq_column: &str) -> SqlQuery {
        let mut params: Vec<String> = Vec::new();
        let mut clauses: Vec<String> = Vec::new();

        for predicate in &self.predicates {
            let clause = match predicate {
                Predicate::GsrnIs(gsrn) => {
                    format!("mp.gsrn = {}", bind(style, &mut params, gsrn.clone()))
                }
                Predicate::GsrnIn(list) => in_list(style, &mut params, "mp.gsrn", list),
                Predicate::TypeIs(meteringpoint_type) => format!(
                    "mp.type = {}",
                    bind(style, &mut params, meteringpoint_type.as_str().to_string())
                ),
                Predicate::SectorIn(list) => in_list(style, &mut params, "mp.sector", list),
                Predicate::AccessibleBy(subject) => format!(
                    "EXISTS (SELECT 1 FROM delegates d WHERE d.gsrn = mp.gsrn AND d.subject = {})",
                    bind(style, &mut params, subject.clone())
                ),
            };
            clauses.push(clause);
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let order_sql = match self.ordering {
            None => format!(" ORDER BY {seq_column} ASC"),
            Some(ordering) => {
                let column = match ordering.key {
                    MeteringPointOrderingKey::Gsrn => "mp.gsrn",
                    MeteringPointOrderingKey::Type => "mp.type",
                    MeteringPointOrderingKey::Sector => "mp.sector",
                };
                let direction = match ordering.order {
                    Order::Asc => "ASC NULLS FIRST",
                    Order::Desc => "DESC NULLS LAST",
                };
                format!(" ORDER BY {column} {direction}, {seq_column} ASC")
            }
        };

        let page_sql = match self.page {
            None => String::new(),
            Some(page) => format!(" LIMIT {} OFFSET {}", page.limit(), page.offset()),
        };

        SqlQuery {
            where_sql,
            order_sql,
            page_sql,
            params,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placeholder {
    /// `?1`, `?2`, ... (SQLite)
    Numbered,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SqlQuery {
    pub where_sql: String,
    pub order_sql: String,
    pub page_sql: String,
    pub params: Vec<String>,
}

impl SqlQuery {
    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM meteringpoints mp{}", self.where_sql)
    }

    /// One row per MeteringPoint with its technology and address joined in.
    /// Columns: gsrn, sector, type, tech_code, fuel_code, technology type,
    /// address gsrn, then the ten address fields.
    pub fn select_sql(&self) -> String {
        format!(
            "SELECT mp.gsrn, mp.sector, mp.type, t.tech_code, t.fuel_code, t.type, a.gsrn, \
             a.street_code, a.street_name, a.building_number, a.floor_id, a.room_id, \
             a.post_code, a.city_name, a.city_sub_division_name, a.municipality_code, \
             a.location_description \
             FROM meteringpoints mp \
             LEFT JOIN meteringpoint_technologies l ON l.gsrn = mp.gsrn \
             LEFT JOIN technologies t ON t.tech_code = l.tech_code AND t.fuel_code = l.fuel_code \
             LEFT JOIN addresses a ON a.gsrn = mp.gsrn{}{}{}",
            self.where_sql, self.order_sql, self.page_sql
        )
    }
}

/// Number of columns produced by [`SqlQuery::select_sql`] before the address fields.
pub const SELECT_ADDRESS_OFFSET: usize = 7;

fn bind(style: Placeholder, params: &mut Vec<String>, value: String) -> String {
    params.push(value);
    match style {
        Placeholder::Numbered => format!("?{}", params.len()),
        Placeholder::Dollar => format!("${}", params.len()),
    }
}

fn in_list(style: Placeholder, params: &mut Vec<String>, column: &str, list: &[String]) -> String {
    if list.is_empty() {
        return "1 = 0".to_string();
    }
    let placeholders: Vec<String> = list
        .iter()
        .map(|value| bind(style, params, value.clone()))
        .collect();
    format!("{column} IN ({})", placeholders.join(", "))
}
