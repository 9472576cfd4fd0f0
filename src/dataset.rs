//! The accumulated, deduplicated lead set and its CSV snapshots.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint::atomic_write;
use crate::models::{Lead, LeadStatus};

const LIST_SEPARATOR: &str = ", ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Added,
    /// Same listing reference seen before; newer values won.
    Replaced,
    /// Same name and location as an earlier lead; dropped.
    Duplicate,
}

/// Leads indexed by listing reference (primary) and by normalized
/// name + location (secondary).
#[derive(Debug, Default, Clone)]
pub struct Dataset {
    leads: Vec<Lead>,
    by_ref: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_leads(leads: impl IntoIterator<Item = Lead>) -> Self {
        let mut dataset = Self::new();
        for lead in leads {
            dataset.merge(lead);
        }
        dataset
    }

    pub fn len(&self) -> usize {
        self.leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leads.is_empty()
    }

    pub fn leads(&self) -> &[Lead] {
        &self.leads
    }

    pub fn get(&self, listing_ref: &str) -> Option<&Lead> {
        self.by_ref.get(listing_ref).map(|&idx| &self.leads[idx])
    }

    pub fn merge(&mut self, lead: Lead) -> MergeOutcome {
        let name_key = lead.name_key();

        if !lead.listing_ref.is_empty() {
            if let Some(&idx) = self.by_ref.get(&lead.listing_ref) {
                return self.replace(idx, name_key, lead);
            }
        }

        if self.by_name.contains_key(&name_key) {
            return MergeOutcome::Duplicate;
        }

        let idx = self.leads.len();
        if !lead.listing_ref.is_empty() {
            self.by_ref.insert(lead.listing_ref.clone(), idx);
        }
        self.by_name.insert(name_key, idx);
        self.leads.push(lead);
        MergeOutcome::Added
    }

    /// A listing came back under a name another lead already holds: the
    /// earlier of the two survives and the later one leaves the set.
    fn replace(&mut self, idx: usize, name_key: String, lead: Lead) -> MergeOutcome {
        match self.by_name.get(&name_key).copied() {
            Some(other) if other < idx => {
                debug!("{} now collides with an earlier lead, dropping it", lead.listing_ref);
                self.leads.remove(idx);
                self.reindex();
                MergeOutcome::Duplicate
            }
            Some(other) if other > idx => {
                self.leads[idx] = lead;
                self.leads.remove(other);
                self.reindex();
                MergeOutcome::Replaced
            }
            _ => {
                let old_key = self.leads[idx].name_key();
                if old_key != name_key && self.by_name.get(&old_key) == Some(&idx) {
                    self.by_name.remove(&old_key);
                }
                self.by_name.insert(name_key, idx);
                self.leads[idx] = lead;
                MergeOutcome::Replaced
            }
        }
    }

    fn reindex(&mut self) {
        self.by_ref.clear();
        self.by_name.clear();
        for (idx, lead) in self.leads.iter().enumerate() {
            if !lead.listing_ref.is_empty() {
                self.by_ref.insert(lead.listing_ref.clone(), idx);
            }
            self.by_name.entry(lead.name_key()).or_insert(idx);
        }
    }

    /// Merge a unit's leads; returns the ones that made it into the set.
    pub fn merge_all(&mut self, leads: Vec<Lead>) -> Vec<Lead> {
        let mut accepted = Vec::with_capacity(leads.len());
        for lead in leads {
            match self.merge(lead.clone()) {
                MergeOutcome::Added | MergeOutcome::Replaced => accepted.push(lead),
                MergeOutcome::Duplicate => {}
            }
        }
        accepted
    }

    /// Missing file means an empty dataset; unreadable rows are skipped.
    pub fn load_csv(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;

        let mut dataset = Self::new();
        for (line, row) in reader.deserialize::<LeadRow>().enumerate() {
            match row {
                Ok(row) => {
                    dataset.merge(row.into_lead());
                }
                Err(e) => warn!("skipping unreadable row {} in {}: {}", line + 2, path.display(), e),
            }
        }
        info!("loaded {} leads from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    /// Full snapshot, replacing whatever was at `path`.
    pub fn save_csv(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for lead in &self.leads {
            writer.serialize(LeadRow::from(lead))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("flushing csv buffer: {}", e))?;
        atomic_write(path, &bytes)
    }
}

/// Flat CSV shape; lists are joined with ", ".
#[derive(Debug, Serialize, Deserialize)]
pub struct LeadRow {
    #[serde(rename = "Company")]
    pub company: String,
    #[serde(rename = "Maps_Link")]
    pub maps_link: String,
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "Tag")]
    pub tag: String,
    #[serde(rename = "Address")]
    pub address: Option<String>,
    #[serde(rename = "Phone")]
    pub phone: Option<String>,
    #[serde(rename = "Website")]
    pub website: Option<String>,
    #[serde(rename = "Rating", default, deserialize_with = "csv::invalid_option")]
    pub rating: Option<f32>,
    #[serde(rename = "Reviews_Count", default, deserialize_with = "csv::invalid_option")]
    pub reviews_count: Option<u32>,
    #[serde(rename = "Email")]
    pub email: Option<String>,
    #[serde(rename = "Social_Links")]
    pub social_links: Option<String>,
    #[serde(rename = "Status")]
    pub status: String,
}

fn join_list(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(LIST_SEPARATOR))
    }
}

pub fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<&Lead> for LeadRow {
    fn from(lead: &Lead) -> Self {
        Self {
            company: lead.name.clone(),
            maps_link: lead.listing_ref.clone(),
            city: lead.location.clone(),
            tag: lead.tag.clone(),
            address: lead.address.clone(),
            phone: lead.phone.clone(),
            website: lead.website.clone(),
            rating: lead.rating,
            reviews_count: lead.reviews_count,
            email: join_list(&lead.emails),
            social_links: join_list(&lead.social_links),
            status: lead.status.as_str().to_string(),
        }
    }
}

impl LeadRow {
    pub fn into_lead(self) -> Lead {
        Lead {
            listing_ref: self.maps_link,
            name: self.company,
            location: self.city,
            tag: self.tag,
            address: non_empty(self.address),
            phone: non_empty(self.phone),
            website: non_empty(self.website),
            rating: self.rating,
            reviews_count: self.reviews_count,
            emails: split_list(self.email.as_deref()),
            social_links: split_list(self.social_links.as_deref()),
            status: LeadStatus::parse(&self.status).unwrap_or_default(),
        }
    }
}
