//! Administrative district dataset: `{ city: { district: District } }`.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique integer identifier of a district.
pub type DistrictCode = i64;

/// A leaf administrative region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct District {
    pub code: DistrictCode,
    pub lat: f64,
    pub lon: f64,
    /// Monitoring station id.
    #[serde(default)]
    pub site: Option<f64>,
    #[serde(default)]
    pub area: String,
}

/// A district together with its place in the two-level hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictEntry {
    pub city: String,
    pub name: String,
    pub district: District,
}

impl DistrictEntry {
    /// `"<city><district>"`, the form region filters are written in.
    pub fn full_name(&self) -> String {
        format!("{}{}", self.city, self.name)
    }
}

/// All districts in dataset order, indexed by code.
#[derive(Debug, Clone, Default)]
pub struct DistrictDataset {
    entries: Vec<DistrictEntry>,
    by_code: HashMap<DistrictCode, usize>,
}

impl DistrictDataset {
    /// Build from entries, rejecting duplicate codes.
    pub fn from_entries(entries: Vec<DistrictEntry>) -> Result<Self> {
        let mut by_code = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            let code = entry.district.code;
            if let Some(prev) = by_code.insert(code, idx) {
                return Err(anyhow!(
                    "district code {code} is used by both {} and {}",
                    entries[prev].full_name(),
                    entry.full_name()
                ));
            }
        }
        Ok(Self { entries, by_code })
    }

    /// Parse the nested `{ city: { district: {...} } }` JSON document.
    /// Key order in the document is the dataset order.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(cities) = value else {
            return Err(anyhow!("district dataset must be a JSON object"));
        };

        let mut entries = Vec::new();
        for (city, districts) in cities {
            let Value::Object(districts) = districts else {
                return Err(anyhow!("city {city} must map to an object of districts"));
            };
            for (name, raw) in districts {
                let district: District = serde_json::from_value(raw)
                    .with_context(|| format!("invalid district {city}{name}"))?;
                entries.push(DistrictEntry {
                    city: city.clone(),
                    name,
                    district,
                });
            }
        }
        Self::from_entries(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_code(&self, code: DistrictCode) -> bool {
        self.by_code.contains_key(&code)
    }

    pub fn get(&self, code: DistrictCode) -> Option<&DistrictEntry> {
        self.by_code.get(&code).map(|&idx| &self.entries[idx])
    }

    /// Entries in dataset order.
    pub fn iter(&self) -> impl Iterator<Item = &DistrictEntry> {
        self.entries.iter()
    }

    /// Resolve a region name to district codes.
    ///
    /// `"<city><district>"` resolves to that one district; a bare city name
    /// resolves to every district of the city.  Unknown names resolve to
    /// nothing.
    pub fn codes_for_name(&self, name: &str) -> Vec<DistrictCode> {
        let name = name.trim();
        if name.is_empty() {
            return Vec::new();
        }

        if let Some(entry) = self.entries.iter().find(|e| e.full_name() == name) {
            return vec![entry.district.code];
        }

        self.entries
            .iter()
            .filter(|e| e.city == name)
            .map(|e| e.district.code)
            .collect()
    }

    /// Distinct city names in dataset order.
    pub fn cities(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !out.contains(&entry.city.as_str()) {
                out.push(&entry.city);
            }
        }
        out
    }
}
