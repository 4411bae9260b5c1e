//! Field canonicalization
//!
//! Pure functions, no I/O: the same raw value always canonicalizes to the
//! same result, which is what makes phone the dedup identity key.

use leadpool_common::config::NormalizerConfig;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Sentinel stored when a row carries no usable area value
pub const UNKNOWN_AREA: &str = "UNKNOWN";

/// Why a field value was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRejection {
    /// Phone does not reduce to an accepted digit count
    InvalidPhone,
    /// Area is not in the known set and the config rejects unknowns
    UnknownArea,
}

impl fmt::Display for FieldRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldRejection::InvalidPhone => write!(f, "invalid_phone"),
            FieldRejection::UnknownArea => write!(f, "unknown_area"),
        }
    }
}

/// Canonical area plus its recognition flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaOutcome {
    pub canonical: String,
    pub recognized: bool,
}

/// Strip a raw phone value to its canonical digit form.
///
/// Non-digits are dropped, then a recognized leading country prefix is
/// removed when the remainder still has an accepted length. The result
/// must match one of the configured valid lengths.
pub fn normalize_phone(raw: &str, config: &NormalizerConfig) -> Result<String, FieldRejection> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if config.valid_phone_lengths.contains(&digits.len()) {
        return Ok(digits);
    }

    // Try stripping the country prefix, e.g. "1" from an 11-digit US number
    let prefix = &config.country_prefix;
    if !prefix.is_empty() && digits.starts_with(prefix.as_str()) {
        let stripped = &digits[prefix.len()..];
        if config.valid_phone_lengths.contains(&stripped.len()) {
            return Ok(stripped.to_string());
        }
    }

    Err(FieldRejection::InvalidPhone)
}

/// Precompiled area lookup built once from config and shared by workers.
///
/// Alias keys are canonical-cased at build time so lookup and input go
/// through the identical transformation.
#[derive(Debug, Clone)]
pub struct AreaTable {
    aliases: HashMap<String, String>,
    known: HashSet<String>,
    reject_unknown: bool,
}

impl AreaTable {
    pub fn new(config: &NormalizerConfig) -> Self {
        let mut known: HashSet<String> = config
            .known_areas
            .iter()
            .map(|a| canonical_case(a))
            .collect();

        let mut aliases = HashMap::new();
        for (variant, canonical) in &config.area_aliases {
            let canonical = canonical_case(canonical);
            // Alias targets are recognized by definition
            if !known.is_empty() {
                known.insert(canonical.clone());
            }
            aliases.insert(canonical_case(variant), canonical);
        }

        Self {
            aliases,
            known,
            reject_unknown: config.reject_unknown_areas,
        }
    }

    /// Canonicalize an area value.
    ///
    /// Empty input maps to the [`UNKNOWN_AREA`] sentinel (flagged, never
    /// rejected, so a valid phone is not lost to a blank label). With an
    /// empty known-area set every non-empty value is recognized.
    pub fn normalize(&self, raw: &str) -> Result<AreaOutcome, FieldRejection> {
        let cased = canonical_case(raw);
        if cased.is_empty() {
            return Ok(AreaOutcome {
                canonical: UNKNOWN_AREA.to_string(),
                recognized: false,
            });
        }

        let canonical = match self.aliases.get(&cased) {
            Some(mapped) => mapped.clone(),
            None => cased,
        };

        let recognized = self.known.is_empty() || self.known.contains(&canonical);
        if !recognized && self.reject_unknown {
            return Err(FieldRejection::UnknownArea);
        }

        Ok(AreaOutcome {
            canonical,
            recognized,
        })
    }
}

/// Trim, uppercase, and collapse internal whitespace runs to one space
fn canonical_case(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}
