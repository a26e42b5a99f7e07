// County lookups: flexible names, legacy index numbers, municipalities.
// "Fulton", "FULTON COUNTY" and the pre-2023 index all land on one entry.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::fuzzy::{FuzzyMap, MapKey};
use crate::identity::{Identity, IdentityError};

#[derive(Debug, Clone, Serialize)]
pub struct County {
    pub name: Identity,
    /// Position in the alphabetical enumeration, assigned on reindex.
    pub index: Option<u32>,
    pub municipalities: Vec<String>,
    /// Census population by year.
    pub population: BTreeMap<u32, u64>,
}

impl County {
    pub fn new(name: &str) -> Result<Self, IdentityError> {
        // "fulton", "Fulton County", "FULTON  county" all match.
        let pattern = format!(r"{}[ \t]*(county)?", regex::escape(name.trim()));
        Ok(County {
            name: Identity::with_pattern(name, &pattern)?,
            index: None,
            municipalities: Vec::new(),
            population: BTreeMap::new(),
        })
    }

    pub fn with_municipalities(mut self, munis: &[&str]) -> Self {
        self.municipalities = munis.iter().map(|m| m.to_string()).collect();
        self
    }
}

pub struct CountyRegistry {
    counties: FuzzyMap<County>,
    need_reindex: bool,
}

impl CountyRegistry {
    pub fn new() -> Self {
        CountyRegistry {
            counties: FuzzyMap::new(),
            need_reindex: false,
        }
    }

    /// Registry pre-loaded with the metro-area counties the receipts in
    /// this repo's fixtures come from. Real runs extend it from data.
    pub fn with_defaults() -> Self {
        let mut registry = CountyRegistry::new();
        for (name, munis) in [
            ("Chatham", vec!["Savannah", "Pooler"]),
            ("Cobb", vec!["Marietta", "Smyrna", "Kennesaw"]),
            ("DeKalb", vec!["Atlanta", "Decatur", "Brookhaven"]),
            ("Fulton", vec!["Atlanta", "Sandy Springs", "Roswell"]),
            ("Gwinnett", vec!["Lawrenceville", "Duluth"]),
        ] {
            let county = County::new(name)
                .expect("static county names compile")
                .with_municipalities(&munis);
            registry.add(county);
        }
        registry.reindex();
        registry
    }

    /// False when the county fuzzy-matched an existing entry (which keeps
    /// its data; counties are reference data, not per-source reports).
    pub fn add(&mut self, county: County) -> bool {
        if self.counties.contains(county.name.text()) {
            return false;
        }
        self.counties
            .insert(MapKey::Single(county.name.clone()), county);
        self.need_reindex = true;
        true
    }

    /// Assign alphabetical index numbers (1-based).
    pub fn reindex(&mut self) {
        if !self.need_reindex {
            return;
        }
        let mut names: Vec<String> = self
            .counties
            .values()
            .map(|c| c.name.text().to_string())
            .collect();
        names.sort_by_key(|n| n.to_lowercase());
        for (n, name) in names.iter().enumerate() {
            if let Some(county) = self.counties.get_mut(name) {
                county.index = Some(n as u32 + 1);
            }
        }
        self.need_reindex = false;
    }

    pub fn search(&self, name: &str) -> Option<&County> {
        self.counties.search(name, true).map(|(_, c)| c)
    }

    pub fn by_index(&self, index: u32) -> Option<&County> {
        self.counties.values().find(|c| c.index == Some(index))
    }

    /// Counties containing a municipality. A city can span several.
    pub fn from_muni(&self, muni: &str) -> Vec<&County> {
        let folded = muni.trim().to_lowercase();
        self.counties
            .values()
            .filter(|c| {
                c.municipalities
                    .iter()
                    .any(|m| m.to_lowercase() == folded)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.counties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counties.is_empty()
    }
}

impl Default for CountyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flexible_names() {
        let registry = CountyRegistry::with_defaults();
        assert!(registry.search("Fulton").is_some());
        assert!(registry.search("FULTON COUNTY").is_some());
        assert!(registry.search("fulton county").is_some());
        assert!(registry.search("Honolulu").is_none());
    }

    #[test]
    fn test_alphabetical_index() {
        let registry = CountyRegistry::with_defaults();
        // Chatham < Cobb < DeKalb < Fulton < Gwinnett
        assert_eq!(registry.search("Chatham").unwrap().index, Some(1));
        assert_eq!(registry.search("Gwinnett").unwrap().index, Some(5));
        assert_eq!(registry.by_index(4).unwrap().name.text(), "Fulton");
    }

    #[test]
    fn test_from_muni_can_span_counties() {
        let registry = CountyRegistry::with_defaults();
        let atlanta = registry.from_muni("atlanta");
        assert_eq!(atlanta.len(), 2); // Fulton and DeKalb
    }

    #[test]
    fn test_duplicate_county_rejected() {
        let mut registry = CountyRegistry::with_defaults();
        let dup = County::new("Fulton County").unwrap();
        assert!(!registry.add(dup));
    }
}
