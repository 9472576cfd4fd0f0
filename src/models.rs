use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between location and keyword in persisted unit ids.
///
/// Ids are never split back apart, but `("a_b", "c")` and `("a", "b_c")`
/// would collide, so configuration rejects names containing it.
pub const UNIT_ID_SEPARATOR: char = '_';

/// One (location, keyword) search.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    pub location: String,
    pub keyword: String,
}

impl WorkUnit {
    pub fn new(location: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            keyword: keyword.into(),
        }
    }

    /// Identifier stored in the checkpoint's completed set.
    pub fn id(&self) -> String {
        format!("{}{}{}", self.location, UNIT_ID_SEPARATOR, self.keyword)
    }

    /// Text typed into the search box.
    pub fn query(&self) -> String {
        format!("{} {}", self.keyword, self.location)
    }

    /// Locations outer, keywords inner, in configuration order.
    pub fn cross_product(locations: &[String], keywords: &[String]) -> Vec<WorkUnit> {
        locations
            .iter()
            .flat_map(|location| {
                keywords
                    .iter()
                    .map(move |keyword| WorkUnit::new(location.clone(), keyword.clone()))
            })
            .collect()
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} à {}", self.keyword, self.location)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LeadStatus {
    #[default]
    Harvested,
    #[serde(rename = "Enriched-no-site")]
    EnrichedNoSite,
    #[serde(rename = "Mining-success")]
    MiningSuccess,
    #[serde(rename = "Mining-error")]
    MiningError,
    #[serde(rename = "No-website")]
    NoWebsite,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Harvested => "Harvested",
            LeadStatus::EnrichedNoSite => "Enriched-no-site",
            LeadStatus::MiningSuccess => "Mining-success",
            LeadStatus::MiningError => "Mining-error",
            LeadStatus::NoWebsite => "No-website",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "Harvested" => Some(LeadStatus::Harvested),
            "Enriched-no-site" => Some(LeadStatus::EnrichedNoSite),
            "Mining-success" | "Success" => Some(LeadStatus::MiningSuccess),
            "Mining-error" | "Error" => Some(LeadStatus::MiningError),
            "No-website" | "No Website" => Some(LeadStatus::NoWebsite),
            _ => None,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A business record built up across harvest, enrichment and mining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    /// Canonical listing URL; the lead's identity.
    pub listing_ref: String,
    pub name: String,
    pub location: String,
    pub tag: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f32>,
    pub reviews_count: Option<u32>,
    pub emails: Vec<String>,
    pub social_links: Vec<String>,
    pub status: LeadStatus,
}

impl Lead {
    pub fn stub(
        name: impl Into<String>,
        listing_ref: impl Into<String>,
        unit: &WorkUnit,
    ) -> Self {
        Self {
            listing_ref: listing_ref.into(),
            name: name.into(),
            location: unit.location.clone(),
            tag: unit.keyword.clone(),
            address: None,
            phone: None,
            website: None,
            rating: None,
            reviews_count: None,
            emails: Vec::new(),
            social_links: Vec::new(),
            status: LeadStatus::Harvested,
        }
    }

    /// Fallback identity used only for deduplication.
    pub fn name_key(&self) -> String {
        format!("{}_{}", normalize(&self.name), normalize(&self.location))
    }

    pub fn apply_details(&mut self, details: LeadDetails) {
        self.address = details.address;
        self.phone = details.phone;
        self.website = details.website;
        self.rating = details.rating;
        self.reviews_count = details.reviews_count;
        if self.website.is_none() {
            self.status = LeadStatus::EnrichedNoSite;
        }
    }

    pub fn apply_mining(&mut self, outcome: MiningOutcome) {
        self.emails = outcome.emails;
        self.social_links = outcome.social_links;
        self.status = outcome.status;
    }
}

/// Lowercased, trimmed, inner whitespace collapsed.
pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Attributes read from a listing's detail view. Absent means not shown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadDetails {
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f32>,
    pub reviews_count: Option<u32>,
}

impl LeadDetails {
    pub fn found_count(&self) -> usize {
        [
            self.address.is_some(),
            self.phone.is_some(),
            self.website.is_some(),
            self.rating.is_some(),
            self.reviews_count.is_some(),
        ]
        .iter()
        .filter(|found| **found)
        .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MiningOutcome {
    pub emails: Vec<String>,
    pub social_links: Vec<String>,
    pub status: LeadStatus,
}

impl MiningOutcome {
    pub fn no_website() -> Self {
        Self {
            emails: Vec::new(),
            social_links: Vec::new(),
            status: LeadStatus::NoWebsite,
        }
    }

    pub fn error() -> Self {
        Self {
            emails: Vec::new(),
            social_links: Vec::new(),
            status: LeadStatus::MiningError,
        }
    }
}
