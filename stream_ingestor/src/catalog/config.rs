//! Catalog configuration: parsing, normalization, and loading.
//!
//! The catalog is a TOML document describing, per market:
//! - the API code and any case-insensitive aliases (`iso-ne` -> `isone`)
//! - the native product codes the market-data service serves
//! - settlement resolution overrides on top of a market default
//! - derived products and the rule computing each one
//! - display-name to API-identifier location aliases
//!
//! plus the output column sets for the product selections and the list of
//! ancillary-service products (which decides the `useCache` default).
//!
//! Normalization lowercases and trims market codes, aliases, and product codes,
//! uppercases API codes and location identifiers, de-duplicates lists while
//! preserving order, and validates that every derivation only reads natives the
//! market serves.

use std::{
    collections::{HashMap, HashSet},
    mem,
};

use anyhow::{Context, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use toml::from_str;
use tracing::debug;

use super::derive::Derivation;
use crate::models::resolution::Resolution;

/// Top-level catalog document.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogCfg {
    /// Products for which the service may answer from its own cache.
    #[serde(default)]
    pub ancillary_products: Vec<String>,
    pub outputs: OutputsCfg,
    /// Market code -> configuration. Codes are normalized to lowercase.
    pub markets: IndexMap<String, MarketCfg>,
}

/// Output column sets, one per named product selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputsCfg {
    pub all: Vec<String>,
    pub energy: Vec<String>,
    pub energy_da: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MarketCfg {
    /// Human-readable market name.
    pub name: String,
    /// Identifier sent in the `market` request parameter.
    pub api_code: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub default_resolution: Resolution,
    /// Native product codes.
    pub products: Vec<String>,
    #[serde(default)]
    pub resolutions: IndexMap<String, Resolution>,
    #[serde(default)]
    pub derived: Vec<DerivedCfg>,
    /// Display name -> API location identifier.
    #[serde(default)]
    pub locations: IndexMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DerivedCfg {
    pub product: String,
    pub rule: Derivation,
}

/// Summary of changes performed during normalization.
#[derive(Debug, Default)]
pub struct NormalizationReport {
    /// Market keys that changed when lowercasing/trimming.
    pub markets_renamed: usize,
    /// Duplicate products removed across product lists and output sets.
    pub products_deduped: usize,
    /// Duplicate aliases removed.
    pub aliases_deduped: usize,
}

fn product_code(raw: &str, what: &str) -> anyhow::Result<String> {
    let code = raw.trim().to_lowercase();
    if code.is_empty() {
        bail!("{what} cannot be empty after trimming");
    }
    Ok(code)
}

/// Lowercases, trims, and de-duplicates a product list in place.
/// Returns how many duplicates were removed.
fn normalize_products(list: &mut Vec<String>, what: &str) -> anyhow::Result<usize> {
    let before = list.len();
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(before);
    for raw in mem::take(list) {
        let code = product_code(&raw, what)?;
        if seen.insert(code.clone()) {
            out.push(code);
        }
    }
    *list = out;
    Ok(before - list.len())
}

fn normalize_market(
    code: &str,
    cfg: &mut MarketCfg,
    report: &mut NormalizationReport,
) -> anyhow::Result<()> {
    cfg.api_code = cfg.api_code.trim().to_uppercase();
    if cfg.api_code.is_empty() {
        bail!("market {code}: api_code cannot be empty after trimming");
    }

    let before = cfg.aliases.len();
    let mut seen = HashSet::new();
    let mut aliases = Vec::with_capacity(before);
    for raw in mem::take(&mut cfg.aliases) {
        let alias = raw.trim().to_lowercase();
        if alias.is_empty() {
            bail!("market {code}: alias cannot be empty after trimming");
        }
        if alias != code && seen.insert(alias.clone()) {
            aliases.push(alias);
        }
    }
    report.aliases_deduped += before - aliases.len();
    cfg.aliases = aliases;

    report.products_deduped += normalize_products(&mut cfg.products, "product code")?;
    let natives: HashSet<&str> = cfg.products.iter().map(String::as_str).collect();

    let mut resolutions = IndexMap::with_capacity(cfg.resolutions.len());
    for (raw, res) in mem::take(&mut cfg.resolutions) {
        resolutions.insert(product_code(&raw, "resolution key")?, res);
    }

    let mut derived_seen = HashSet::new();
    for d in &mut cfg.derived {
        d.product = product_code(&d.product, "derived product")?;
        if !derived_seen.insert(d.product.clone()) {
            bail!("market {code}: derived product {} defined twice", d.product);
        }
        for input in d.rule.inputs_mut() {
            *input = product_code(input, "derivation input")?;
            if !natives.contains(input.as_str()) {
                bail!(
                    "market {code}: derived product {} reads {input}, which is not a native product",
                    d.product
                );
            }
        }
    }

    let mut locations = IndexMap::with_capacity(cfg.locations.len());
    for (display, api) in mem::take(&mut cfg.locations) {
        let display = display.trim().to_lowercase();
        let api = api.trim().to_uppercase();
        if display.is_empty() || api.is_empty() {
            bail!("market {code}: location aliases cannot be empty after trimming");
        }
        locations.insert(display, api);
    }

    cfg.resolutions = resolutions;
    cfg.locations = locations;
    Ok(())
}

/// Normalize a catalog in-place.
///
/// Errors:
/// - Empty or duplicate market codes after normalization
/// - An alias shared by two markets, or shadowing another market's code
/// - Empty product codes, or a derivation reading an unknown native
pub fn normalize_catalog(cat: &mut CatalogCfg) -> anyhow::Result<NormalizationReport> {
    let mut report = NormalizationReport::default();

    let mut rebuilt: IndexMap<String, MarketCfg> = IndexMap::new();
    for (raw_code, mut cfg) in mem::take(&mut cat.markets) {
        let code = raw_code.trim().to_lowercase();
        if code.is_empty() {
            bail!("market code cannot be empty after trimming");
        }
        if code != raw_code {
            report.markets_renamed += 1;
        }
        if rebuilt.contains_key(&code) {
            bail!("duplicate market code after normalization: {code}");
        }
        normalize_market(&code, &mut cfg, &mut report)?;
        rebuilt.insert(code, cfg);
    }

    let mut owners: HashMap<&str, &str> = rebuilt.keys().map(|k| (k.as_str(), k.as_str())).collect();
    for (code, cfg) in &rebuilt {
        for alias in &cfg.aliases {
            if let Some(owner) = owners.insert(alias.as_str(), code.as_str()) {
                bail!("alias {alias} of market {code} collides with market {owner}");
            }
        }
    }

    report.products_deduped += normalize_products(&mut cat.ancillary_products, "ancillary product")?;
    report.products_deduped += normalize_products(&mut cat.outputs.all, "output column")?;
    report.products_deduped += normalize_products(&mut cat.outputs.energy, "output column")?;
    report.products_deduped += normalize_products(&mut cat.outputs.energy_da, "output column")?;

    cat.markets = rebuilt;
    Ok(report)
}

/// Parse and normalize a catalog from a TOML string.
pub fn load_catalog_str(toml_str: &str) -> anyhow::Result<CatalogCfg> {
    let mut cat: CatalogCfg = from_str(toml_str).context("failed to parse catalog TOML")?;
    let report = normalize_catalog(&mut cat).context("normalize_catalog failed")?;
    debug!(?report, markets = cat.markets.len(), "catalog normalized");
    Ok(cat)
}

/// Read a catalog TOML file from disk, parse, and normalize it.
pub fn load_catalog_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<CatalogCfg> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("read catalog file {}", path.as_ref().display()))?;
    load_catalog_str(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SMALL: &str = r#"
        ancillary_products = ["Reg_RT", "reg_rt"]

        [outputs]
        all = ["energy_da", "ENERGY_RT", "energy_rt"]
        energy = ["energy_da", "energy_rt"]
        energy_da = ["energy_da"]

        [markets." PJM"]
        name = "PJM"
        api_code = " pjm "
        aliases = ["PJM-RTO", "pjm-rto", "pjm"]
        default_resolution = "5m"
        products = ["energy_da", "Energy_RT_5", "energy_rt_5"]

        [markets." PJM".resolutions]
        ENERGY_DA = "1h"

        [markets." PJM".locations]
        " Western Hub " = "western hub"

        [[markets." PJM".derived]]
        product = "Energy_RT"
        rule = { kind = "rename", source = "ENERGY_RT_5" }
    "#;

    #[test]
    fn normalizes_codes_and_dedupes() {
        let mut cat: CatalogCfg = toml::from_str(SMALL).unwrap();
        let report = normalize_catalog(&mut cat).unwrap();

        let (code, cfg) = cat.markets.first().unwrap();
        assert_eq!(code, "pjm");
        assert_eq!(cfg.api_code, "PJM");
        assert_eq!(cfg.aliases, vec!["pjm-rto"]);
        assert_eq!(cfg.products, vec!["energy_da", "energy_rt_5"]);
        assert_eq!(cfg.resolutions.get("energy_da").unwrap().to_string(), "1h");
        assert_eq!(cfg.locations.get("western hub").unwrap(), "WESTERN HUB");
        assert_eq!(cfg.derived[0].product, "energy_rt");
        assert_eq!(cfg.derived[0].rule.inputs(), vec!["energy_rt_5"]);
        assert_eq!(cat.ancillary_products, vec!["reg_rt"]);
        assert_eq!(cat.outputs.all, vec!["energy_da", "energy_rt"]);

        assert_eq!(report.markets_renamed, 1);
        assert_eq!(report.aliases_deduped, 2);
        assert_eq!(report.products_deduped, 3);
    }

    #[test]
    fn derivation_reading_unknown_native_errors() {
        let text = SMALL.replace(r#"source = "ENERGY_RT_5""#, r#"source = "energy_rt_15""#);
        let err = load_catalog_str(&text).unwrap_err();
        assert!(format!("{err:#}").contains("not a native product"));
    }

    #[test]
    fn alias_collision_errors() {
        let text = format!(
            "{SMALL}\n[markets.rto]\nname = \"x\"\napi_code = \"X\"\naliases = [\"pjm-rto\"]\n\
             default_resolution = \"1h\"\nproducts = [\"energy_da\"]\n"
        );
        let err = load_catalog_str(&text).unwrap_err();
        assert!(format!("{err:#}").contains("collides"));
    }

    #[test]
    fn builtin_catalog_loads() {
        let cat = load_catalog_str(super::super::BUILTIN_CATALOG).unwrap();
        assert_eq!(cat.markets.len(), 7);
        assert_eq!(cat.outputs.all.len(), 12);
        assert_eq!(cat.markets["isone"].aliases, vec!["iso-ne", "iso_ne"]);
    }

    proptest! {
        #[test]
        fn market_codes_lowercased_and_unique(
            names in proptest::collection::vec("[a-zA-Z]{1,6}", 1..5),
        ) {
            let mut cat: CatalogCfg = toml::from_str(SMALL).unwrap();
            let template = cat.markets.first().unwrap().1.clone();
            cat.markets.clear();
            for (i, n) in names.iter().enumerate() {
                let key = if i % 2 == 0 { n.to_uppercase() } else { format!("  {n} ") };
                let mut cfg = template.clone();
                cfg.aliases.clear();
                cat.markets.insert(key, cfg);
            }

            if normalize_catalog(&mut cat).is_ok() {
                prop_assert!(cat.markets.keys().all(|k| k.chars().all(|c| !c.is_uppercase())));
            }
        }
    }
}
