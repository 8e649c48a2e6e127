//! Package catalog: the purchasable tiers and the views each one grants.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A purchasable tier. Allowances are perpetual: they never expire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub view_allowance: i64,
    #[serde(default = "perpetual")]
    pub perpetual: bool,
}

fn perpetual() -> bool {
    true
}

/// Immutable list of packages, loaded once at startup.
#[derive(Debug, Clone)]
pub struct PackageCatalog {
    packages: Vec<Package>,
}

impl PackageCatalog {
    pub fn new(packages: Vec<Package>) -> Result<Self, anyhow::Error> {
        let mut seen = HashSet::new();
        for package in &packages {
            if !seen.insert(package.id.as_str()) {
                anyhow::bail!("duplicate package id '{}'", package.id);
            }
            if package.price <= Decimal::ZERO {
                anyhow::bail!("package '{}' must have a positive price", package.id);
            }
            if package.view_allowance <= 0 {
                anyhow::bail!("package '{}' must grant at least one view", package.id);
            }
        }
        Ok(Self { packages })
    }

    /// Silver, Gold and Platinum tiers priced in INR.
    pub fn default_catalog() -> Self {
        let tier = |id: &str, name: &str, price: i64, views: i64| Package {
            id: id.to_string(),
            name: name.to_string(),
            price: Decimal::new(price, 0),
            currency: "INR".to_string(),
            view_allowance: views,
            perpetual: true,
        };

        Self {
            packages: vec![
                tier("silver", "Silver", 5000, 20),
                tier("gold", "Gold", 8000, 50),
                tier("platinum", "Platinum", 20000, 150),
            ],
        }
    }

    /// Reads a JSON array of packages.
    pub fn from_json_file(path: &str) -> Result<Self, anyhow::Error> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read package catalog {}: {}", path, e))?;
        let packages: Vec<Package> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid package catalog {}: {}", path, e))?;
        Self::new(packages)
    }

    pub fn get(&self, id: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.id == id)
    }

    pub fn all(&self) -> &[Package] {
        &self.packages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_three_tiers() {
        let catalog = PackageCatalog::default_catalog();
        assert_eq!(catalog.all().len(), 3);
        assert_eq!(catalog.get("gold").unwrap().view_allowance, 50);
        assert_eq!(catalog.get("platinum").unwrap().price, Decimal::new(20000, 0));
        assert!(catalog.get("diamond").is_none());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let p = PackageCatalog::default_catalog().get("silver").unwrap().clone();
        assert!(PackageCatalog::new(vec![p.clone(), p]).is_err());
    }

    #[test]
    fn rejects_zero_allowance() {
        let mut p = PackageCatalog::default_catalog().get("silver").unwrap().clone();
        p.view_allowance = 0;
        assert!(PackageCatalog::new(vec![p]).is_err());
    }
}
