use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Srx,
    Erx,
    Srp,
    Erp,
    Unrecognized,
}

impl Namespace {
    pub fn detect(normalized: &str) -> Self {
        let Some((prefix, digits)) = normalized.split_at_checked(3) else {
            return Namespace::Unrecognized;
        };
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Namespace::Unrecognized;
        }
        match prefix {
            "SRX" => Namespace::Srx,
            "ERX" => Namespace::Erx,
            "SRP" => Namespace::Srp,
            "ERP" => Namespace::Erp,
            _ => Namespace::Unrecognized,
        }
    }

    pub fn host(&self) -> Option<Host> {
        match self {
            Namespace::Srx | Namespace::Srp => Some(Host::Ncbi),
            Namespace::Erx | Namespace::Erp => Some(Host::Ebi),
            Namespace::Unrecognized => None,
        }
    }

    pub fn is_study(&self) -> bool {
        matches!(self, Namespace::Srp | Namespace::Erp)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Srx => write!(f, "SRX"),
            Namespace::Erx => write!(f, "ERX"),
            Namespace::Srp => write!(f, "SRP"),
            Namespace::Erp => write!(f, "ERP"),
            Namespace::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

/// Upstream systems that get their own rate-limit gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Host {
    Ncbi,
    Ebi,
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Ncbi => write!(f, "ncbi"),
            Host::Ebi => write!(f, "ebi"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccessionId {
    value: String,
    namespace: Namespace,
}

impl AccessionId {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn is_supported(&self) -> bool {
        self.namespace != Namespace::Unrecognized
    }

    /// Digits after the three-letter prefix.
    pub fn numeric_suffix(&self) -> Option<&str> {
        if self.is_supported() {
            Some(&self.value[3..])
        } else {
            None
        }
    }
}

impl fmt::Display for AccessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for AccessionId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self {
            namespace: Namespace::detect(&normalized),
            value: normalized,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    #[serde(default, with = "blank_as_none")]
    pub bioproject_id: Option<String>,
    #[serde(default, with = "blank_as_none")]
    pub geo_id: Option<String>,
}

impl ResolutionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a result from raw strings; blank values count as absent.
    pub fn new(bioproject_id: &str, geo_id: &str) -> Self {
        Self {
            bioproject_id: non_blank(bioproject_id),
            geo_id: non_blank(geo_id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bioproject_id.is_none() && self.geo_id.is_none()
    }

    pub fn bioproject(&self) -> &str {
        self.bioproject_id.as_deref().unwrap_or("")
    }

    pub fn geo(&self) -> &str {
        self.geo_id.as_deref().unwrap_or("")
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

mod blank_as_none {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.and_then(|raw| super::non_blank(&raw)))
    }
}

/// How a single resolution attempt ended.
#[derive(Debug)]
pub enum Outcome {
    Resolved(ResolutionResult),
    /// Every method answered and none carried a cross-reference.
    NotFound,
    /// Nothing was found and at least one method failed transiently.
    Failed(KiraError),
}

impl Outcome {
    pub fn from_parts(result: ResolutionResult, failure: Option<KiraError>) -> Self {
        if !result.is_empty() {
            return Outcome::Resolved(result);
        }
        match failure {
            Some(err) => Outcome::Failed(err),
            None => Outcome::NotFound,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}
