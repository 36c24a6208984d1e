use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Customer change event as published on the customer topic.
///
/// Required scalars are `Option` so a missing field reaches validation
/// instead of failing the decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct CustomerMessage {
    #[serde(default)]
    #[validate(range(min = 1))]
    pub customer_id: i32,

    #[validate(required, custom(function = "crate::domain::validation::not_blank"))]
    pub name: Option<String>,

    #[validate(required)]
    pub customer_type_id: Option<i32>,

    #[validate(required, custom(function = "crate::domain::validation::not_blank"))]
    pub customer_type_name: Option<String>,

    #[validate(required)]
    pub segment_id: Option<i32>,

    #[validate(required, custom(function = "crate::domain::validation::not_blank"))]
    pub country_iso: Option<String>,

    #[validate(required, custom(function = "crate::domain::validation::not_blank"))]
    pub currency_iso: Option<String>,

    #[serde(default)]
    pub deleted: bool,

    #[serde(default = "timestamp::unset", deserialize_with = "timestamp::deserialize")]
    pub last_change_date_time: DateTime<Utc>,

    /// Absent means no brands; an explicit `null` fails validation
    #[serde(default = "no_brands")]
    #[validate(required)]
    pub brands: Option<Vec<BrandDto>>,
}

impl CustomerMessage {
    /// Decode a queue body. A literal `null` body decodes as an empty message
    /// and is then rejected by validation.
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        let message: Option<Self> = serde_json::from_slice(body)?;
        Ok(message.unwrap_or_default())
    }
}

impl Default for CustomerMessage {
    fn default() -> Self {
        Self {
            customer_id: 0,
            name: None,
            customer_type_id: None,
            customer_type_name: None,
            segment_id: None,
            country_iso: None,
            currency_iso: None,
            deleted: false,
            last_change_date_time: timestamp::unset(),
            brands: no_brands(),
        }
    }
}

fn no_brands() -> Option<Vec<BrandDto>> {
    Some(Vec::new())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct BrandDto {
    #[serde(default)]
    #[validate(range(min = 1))]
    pub brand_id: i32,

    #[validate(required, custom(function = "crate::domain::validation::not_blank"))]
    pub name: Option<String>,
}

/// A message that passed validation; every field is present
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCustomer {
    pub customer_id: i32,
    pub name: String,
    pub customer_type_id: i32,
    pub customer_type_name: String,
    pub segment_id: i32,
    pub country_iso: String,
    pub currency_iso: String,
    pub deleted: bool,
    pub last_change_date_time: DateTime<Utc>,
    pub brands: Vec<ValidatedBrand>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBrand {
    pub brand_id: i32,
    pub name: String,
}

/// `LastChangeDateTime` accepts RFC 3339 or a naive ISO-8601 timestamp,
/// which is read as UTC. A missing value is `0001-01-01T00:00:00Z`.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer};

    /// Seconds from the Unix epoch back to `0001-01-01T00:00:00Z`
    const YEAR_ONE_SECONDS: i64 = -62_135_596_800;

    pub fn unset() -> DateTime<Utc> {
        DateTime::from_timestamp(YEAR_ONE_SECONDS, 0).unwrap_or_default()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
