//! Domain models and business logic for sensitive-data detection.
//!
//! This module contains the rule catalog, the validators that back it and
//! the pattern detector that turns enabled rules and a text body into an
//! ordered, non-overlapping set of matches.

pub mod detector;
pub mod normalize;
pub mod rules;
pub mod validators;

pub use detector::{Detector, Sensitivity};
pub use rules::{Rule, RuleRegistry};

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RedactorError;

/// Identifier of a detection rule.
///
/// Variant order is rule priority: when two rules match exactly the same
/// span, the earlier variant wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleId {
    Iban,
    #[serde(alias = "creditCard")]
    CreditCard,
    Dni,
    Nie,
    Cif,
    Ssn,
    Email,
    Phone,
    #[serde(alias = "ipAddress")]
    IpAddress,
    #[serde(alias = "dateOfBirth")]
    DateOfBirth,
    Address,
    Username,
    #[serde(alias = "fullName", alias = "NAME", alias = "name")]
    FullName,
    #[serde(alias = "accountHolder")]
    AccountHolder,
    Passport,
    #[serde(alias = "licensePlate")]
    LicensePlate,
    #[serde(alias = "employeeId")]
    EmployeeId,
    Cookie,
    Credentials,
    #[serde(alias = "healthData")]
    HealthData,
}

impl RuleId {
    /// Every rule, in priority order.
    pub const ALL: [RuleId; 20] = [
        RuleId::Iban,
        RuleId::CreditCard,
        RuleId::Dni,
        RuleId::Nie,
        RuleId::Cif,
        RuleId::Ssn,
        RuleId::Email,
        RuleId::Phone,
        RuleId::IpAddress,
        RuleId::DateOfBirth,
        RuleId::Address,
        RuleId::Username,
        RuleId::FullName,
        RuleId::AccountHolder,
        RuleId::Passport,
        RuleId::LicensePlate,
        RuleId::EmployeeId,
        RuleId::Cookie,
        RuleId::Credentials,
        RuleId::HealthData,
    ];

    /// Replacement token name, e.g. `CREDIT_CARD`.
    pub fn token(self) -> &'static str {
        match self {
            RuleId::Iban => "IBAN",
            RuleId::CreditCard => "CREDIT_CARD",
            RuleId::Dni => "DNI",
            RuleId::Nie => "NIE",
            RuleId::Cif => "CIF",
            RuleId::Ssn => "SSN",
            RuleId::Email => "EMAIL",
            RuleId::Phone => "PHONE",
            RuleId::IpAddress => "IP_ADDRESS",
            RuleId::DateOfBirth => "DATE_OF_BIRTH",
            RuleId::Address => "ADDRESS",
            RuleId::Username => "USERNAME",
            RuleId::FullName => "FULL_NAME",
            RuleId::AccountHolder => "ACCOUNT_HOLDER",
            RuleId::Passport => "PASSPORT",
            RuleId::LicensePlate => "LICENSE_PLATE",
            RuleId::EmployeeId => "EMPLOYEE_ID",
            RuleId::Cookie => "COOKIE",
            RuleId::Credentials => "CREDENTIALS",
            RuleId::HealthData => "HEALTH_DATA",
        }
    }

    /// Position in [`RuleId::ALL`].
    pub fn priority(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for RuleId {
    type Err = RedactorError;

    /// Accepts the token (`CREDIT_CARD`) or the camelCase form (`creditCard`),
    /// ignoring case and separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        if wanted == "name" {
            return Ok(RuleId::FullName);
        }

        RuleId::ALL
            .into_iter()
            .find(|rule| rule.token().replace('_', "").to_ascii_lowercase() == wanted)
            .ok_or_else(|| RedactorError::InvalidInput {
                parameter: "rule".to_string(),
                reason: format!("unknown rule identifier '{}'", s),
            })
    }
}

/// Caller-supplied set of enabled rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    enabled: BTreeSet<RuleId>,
}

impl RuleSet {
    /// Every registered rule enabled.
    pub fn all() -> Self {
        RuleId::ALL.into_iter().collect()
    }

    /// No rule enabled.
    pub fn none() -> Self {
        Self::default()
    }

    /// Builds a set from `{rule: enabled}` flags, the shape clients send.
    pub fn from_flags<'a, I>(flags: I) -> Result<Self, RedactorError>
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        let mut set = Self::none();
        for (name, enabled) in flags {
            let rule: RuleId = name.parse()?;
            if enabled {
                set.enabled.insert(rule);
            }
        }
        Ok(set)
    }

    pub fn with(mut self, rule: RuleId) -> Self {
        self.enabled.insert(rule);
        self
    }

    pub fn contains(&self, rule: RuleId) -> bool {
        self.enabled.contains(&rule)
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    pub fn len(&self) -> usize {
        self.enabled.len()
    }

    /// Enabled rules in priority order.
    pub fn iter(&self) -> impl Iterator<Item = RuleId> + '_ {
        self.enabled.iter().copied()
    }
}

impl FromIterator<RuleId> for RuleSet {
    fn from_iter<T: IntoIterator<Item = RuleId>>(iter: T) -> Self {
        Self {
            enabled: iter.into_iter().collect(),
        }
    }
}

impl FromStr for RuleSet {
    type Err = RedactorError;

    /// Parses a comma separated list; `all` enables every rule.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        trimmed
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect()
    }
}

/// A single validated match of a rule inside a text.
///
/// `start` and `end` are byte offsets on character boundaries, `end`
/// exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    #[serde(rename = "ruleId")]
    pub rule: RuleId,
    pub start: usize,
    pub end: usize,
    #[serde(rename = "value")]
    pub text: String,
    pub confidence: f32,
}

impl Detection {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True if the half-open ranges share at least one byte.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Trait for pattern matching strategies.
pub trait PatternMatcher: Send + Sync {
    fn rule_id(&self) -> RuleId;
    fn pattern(&self) -> &Regex;
    /// All non-overlapping occurrences that pass validation.
    fn extract_all<'a>(&self, text: &'a str) -> Vec<&'a str>;
    /// Normalized form of a value, or `None` if it fails validation.
    fn normalize(&self, text: &str) -> Option<String>;
}
