//! Per-market product catalog.
//!
//! Answers three questions for the rest of the pipeline: which canonical
//! products a market can produce for a selection, which native products must be
//! requested to build one of them, and how long one reading of a product
//! covers. All of it is table-driven from [`config::CatalogCfg`]; the built-in
//! table lives in `default_catalog.toml`.

pub mod config;
pub mod derive;

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    str::FromStr,
};

use chrono::Duration;
use indexmap::IndexMap;
use thiserror::Error;

use self::{
    config::{CatalogCfg, MarketCfg, load_catalog_path, load_catalog_str},
    derive::Derivation,
};
use crate::models::resolution::Resolution;

pub(crate) const BUILTIN_CATALOG: &str = include_str!("default_catalog.toml");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown market {market:?}")]
    UnknownMarket { market: String },

    #[error("market {market} has no product {product:?}")]
    UnknownProduct { market: String, product: String },

    #[error("empty product selection")]
    EmptySelection,
}

/// Which canonical products a run asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductSelection {
    /// The full output column set, restricted to what the market serves.
    All,
    /// Day-ahead and real-time energy.
    Energy,
    /// Day-ahead energy only.
    EnergyDa,
    /// Explicit canonical products, in output order.
    List(Vec<String>),
}

impl FromStr for ProductSelection {
    type Err = CatalogError;

    /// `all` (or `val`), `energy`, `energy_da`, or a comma-separated list.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" | "val" => Ok(Self::All),
            "energy" => Ok(Self::Energy),
            "energy_da" => Ok(Self::EnergyDa),
            other => {
                let mut seen = HashSet::new();
                let list: Vec<String> = other
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .filter(|p| seen.insert(p.to_string()))
                    .map(str::to_string)
                    .collect();
                if list.is_empty() {
                    Err(CatalogError::EmptySelection)
                } else {
                    Ok(Self::List(list))
                }
            }
        }
    }
}

/// One market's resolved catalog entry.
#[derive(Debug, Clone)]
pub struct MarketEntry {
    code: String,
    cfg: MarketCfg,
    derived: IndexMap<String, Derivation>,
}

impl MarketEntry {
    fn new(code: String, cfg: MarketCfg) -> Self {
        let derived = cfg
            .derived
            .iter()
            .map(|d| (d.product.clone(), d.rule.clone()))
            .collect();
        Self { code, cfg, derived }
    }

    /// Lowercase catalog code, e.g. `isone`.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// Identifier sent to the service, e.g. `ISONE`.
    pub fn api_code(&self) -> &str {
        &self.cfg.api_code
    }

    pub fn natives(&self) -> &[String] {
        &self.cfg.products
    }

    pub fn is_native(&self, product: &str) -> bool {
        self.cfg.products.iter().any(|p| p == product)
    }

    pub fn derivation(&self, product: &str) -> Option<&Derivation> {
        self.derived.get(product)
    }

    /// True when the market can produce `product`, natively or by derivation.
    pub fn produces(&self, product: &str) -> bool {
        self.derived.contains_key(product) || self.is_native(product)
    }

    /// Native codes to request to build `product`.
    ///
    /// A derived definition wins over a native of the same name.
    pub fn expand(&self, product: &str) -> Result<Vec<String>, CatalogError> {
        if let Some(rule) = self.derived.get(product) {
            return Ok(rule.inputs().into_iter().map(str::to_string).collect());
        }
        if self.is_native(product) {
            return Ok(vec![product.to_string()]);
        }
        Err(CatalogError::UnknownProduct {
            market: self.code.clone(),
            product: product.to_string(),
        })
    }

    pub fn resolution_of(&self, product: &str) -> Resolution {
        self.cfg
            .resolutions
            .get(product)
            .copied()
            .unwrap_or(self.cfg.default_resolution)
    }

    pub fn coverage_of(&self, product: &str) -> Duration {
        self.resolution_of(product).duration()
    }

    /// Maps a user-facing location name to the identifier the service expects.
    ///
    /// Unknown names pass through uppercased.
    pub fn api_location(&self, location: &str) -> String {
        let trimmed = location.trim();
        self.cfg
            .locations
            .get(&trimmed.to_lowercase())
            .cloned()
            .unwrap_or_else(|| trimmed.to_uppercase())
    }
}

/// Normalized, indexed catalog.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    markets: IndexMap<String, MarketEntry>,
    /// Lowercase code or alias -> market code.
    index: HashMap<String, String>,
    ancillary: HashSet<String>,
    outputs: config::OutputsCfg,
}

impl ProductCatalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(Self::from_cfg(load_catalog_str(text)?))
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::from_cfg(load_catalog_path(path)?))
    }

    /// Builds the lookup indexes; `cfg` must already be normalized.
    pub fn from_cfg(cfg: CatalogCfg) -> Self {
        let mut index = HashMap::new();
        let mut markets = IndexMap::with_capacity(cfg.markets.len());
        for (code, m) in cfg.markets {
            index.insert(code.clone(), code.clone());
            for alias in &m.aliases {
                index.insert(alias.clone(), code.clone());
            }
            markets.insert(code.clone(), MarketEntry::new(code, m));
        }
        Self {
            markets,
            index,
            ancillary: cfg.ancillary_products.into_iter().collect(),
            outputs: cfg.outputs,
        }
    }

    /// Case-insensitive lookup by code or alias.
    pub fn market(&self, id: &str) -> Result<&MarketEntry, CatalogError> {
        self.index
            .get(&id.trim().to_lowercase())
            .and_then(|code| self.markets.get(code))
            .ok_or_else(|| CatalogError::UnknownMarket {
                market: id.to_string(),
            })
    }

    pub fn markets(&self) -> impl Iterator<Item = &MarketEntry> {
        self.markets.values()
    }

    /// Ordered canonical products `market` can produce for `selection`.
    ///
    /// Named selections silently skip products the market does not serve; an
    /// explicit list rejects them.
    pub fn products_for(
        &self,
        market: &str,
        selection: &ProductSelection,
    ) -> Result<Vec<String>, CatalogError> {
        let entry = self.market(market)?;
        match selection {
            ProductSelection::All | ProductSelection::Energy | ProductSelection::EnergyDa => Ok(self
                .output_columns(selection)
                .into_iter()
                .filter(|p| entry.produces(p))
                .collect()),
            ProductSelection::List(list) => {
                let mut out = Vec::with_capacity(list.len());
                for p in list {
                    let p = p.to_lowercase();
                    if !entry.produces(&p) {
                        return Err(CatalogError::UnknownProduct {
                            market: entry.code.clone(),
                            product: p,
                        });
                    }
                    out.push(p);
                }
                Ok(out)
            }
        }
    }

    /// Columns of the wide output for `selection`, independent of market.
    pub fn output_columns(&self, selection: &ProductSelection) -> Vec<String> {
        match selection {
            ProductSelection::All => self.outputs.all.clone(),
            ProductSelection::Energy => self.outputs.energy.clone(),
            ProductSelection::EnergyDa => self.outputs.energy_da.clone(),
            ProductSelection::List(list) => list.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    pub fn expand(&self, market: &str, product: &str) -> Result<Vec<String>, CatalogError> {
        self.market(market)?.expand(product)
    }

    pub fn resolution_of(&self, market: &str, product: &str) -> Result<Resolution, CatalogError> {
        Ok(self.market(market)?.resolution_of(product))
    }

    pub fn is_ancillary(&self, product: &str) -> bool {
        self.ancillary.contains(product)
    }

    /// `useCache` value for a request batch: true only when every product in
    /// it is an ancillary-service product.
    pub fn use_cache_default<S: AsRef<str>>(&self, natives: &[S]) -> bool {
        !natives.is_empty() && natives.iter().all(|p| self.is_ancillary(p.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat() -> ProductCatalog {
        ProductCatalog::builtin().unwrap()
    }

    #[test]
    fn market_lookup_is_case_insensitive_with_aliases() {
        let c = cat();
        assert_eq!(c.market("CAISO").unwrap().code(), "caiso");
        assert_eq!(c.market("iso-ne").unwrap().api_code(), "ISONE");
        assert_eq!(c.market(" ISO-NE ").unwrap().code(), "isone");
        assert!(matches!(
            c.market("nowhere"),
            Err(CatalogError::UnknownMarket { .. })
        ));
    }

    #[test]
    fn energy_selection_covers_both_energy_products() {
        let c = cat();
        for m in ["caiso", "ercot", "isone", "nyiso", "spp", "pjm", "miso"] {
            assert_eq!(
                c.products_for(m, &ProductSelection::Energy).unwrap(),
                vec!["energy_da", "energy_rt"],
                "market {m}"
            );
        }
    }

    #[test]
    fn derived_products_expand_to_natives() {
        let c = cat();
        assert_eq!(
            c.expand("caiso", "energy_rt").unwrap(),
            vec!["energy_rt_15", "energy_rt_5"]
        );
        assert_eq!(
            c.expand("pjm", "reg_rt").unwrap(),
            vec!["reg_rt", "reg_mile_rt", "reg_mile_ratio"]
        );
        assert_eq!(c.expand("nyiso", "reg_buyback_rt").unwrap(), vec!["reg_rt"]);
        assert_eq!(c.expand("spp", "energy_rt").unwrap(), vec!["energy_rt"]);
        assert!(c.expand("ercot", "reg_rt").is_err());
    }

    #[test]
    fn resolutions_fall_back_to_market_default() {
        let c = cat();
        assert_eq!(c.resolution_of("caiso", "energy_rt").unwrap().to_string(), "5m");
        assert_eq!(c.resolution_of("caiso", "energy_rt_15").unwrap().to_string(), "15m");
        assert_eq!(c.resolution_of("caiso", "energy_da").unwrap().to_string(), "1h");
        assert_eq!(c.resolution_of("ercot", "energy_rt").unwrap().to_string(), "15m");
        assert_eq!(c.resolution_of("pjm", "reg_rt").unwrap().to_string(), "5m");
    }

    #[test]
    fn all_selection_outputs_full_column_set() {
        let c = cat();
        let cols = c.output_columns(&ProductSelection::All);
        assert_eq!(cols.len(), 12);
        assert_eq!(cols.first().map(String::as_str), Some("energy_da"));

        let caiso = c.products_for("caiso", &ProductSelection::All).unwrap();
        assert!(caiso.contains(&"energy_rt".to_string()));
        assert!(!caiso.contains(&"reg_rt".to_string()));
    }

    #[test]
    fn explicit_list_rejects_unknown_products() {
        let c = cat();
        let sel: ProductSelection = "energy_rt, reg_rt".parse().unwrap();
        assert_eq!(c.products_for("pjm", &sel).unwrap(), vec!["energy_rt", "reg_rt"]);
        assert_eq!(
            c.products_for("ercot", &sel),
            Err(CatalogError::UnknownProduct {
                market: "ercot".into(),
                product: "reg_rt".into()
            })
        );
    }

    #[test]
    fn selection_parsing() {
        assert_eq!("VAL".parse::<ProductSelection>().unwrap(), ProductSelection::All);
        assert_eq!(
            "energy_da".parse::<ProductSelection>().unwrap(),
            ProductSelection::EnergyDa
        );
        assert_eq!(
            " , ".parse::<ProductSelection>(),
            Err(CatalogError::EmptySelection)
        );
    }

    #[test]
    fn use_cache_only_for_ancillary_batches() {
        let c = cat();
        assert!(c.use_cache_default(&["regup_da", "spin_rt"]));
        assert!(!c.use_cache_default(&["regup_da", "energy_da"]));
        assert!(!c.use_cache_default::<&str>(&[]));
    }

    #[test]
    fn locations_pass_through_uppercased() {
        let c = cat();
        assert_eq!(c.market("caiso").unwrap().api_location(" th_np15_gen-apnd "), "TH_NP15_GEN-APND");
    }
}
