//! Spot-price identifier lookup table.
//!
//! Maps `(market, location, product)` triples to the opaque numeric
//! identifiers downstream consumers key spot prices by. The table is a CSV with
//! a `SPOTPRICEID` column and a composite-key column holding comma-separated
//! `key=value` members (`iso=CAISO,node=TH_NP15_GEN-APND,product=energy_rt`).
//! Member order does not matter and keys and values are case-insensitive.
//! Lookups treat the triple as a set: `id_for(a, b, c) == id_for(c, a, b)`.
//!
//! The map is read-only once loaded. The reverse index (`id -> triple`) is
//! built on first use behind a [`OnceCell`], so concurrent readers see a single
//! consistent index.

use std::{collections::HashMap, fs::File, io, path::Path};

use once_cell::sync::OnceCell;
use stream_ingestor::models::reading::SeriesKey;
use thiserror::Error;

/// Opaque identifier of one spot-price series.
pub type SpotPriceId = i64;

/// Name of the identifier column.
pub const ID_COLUMN: &str = "SPOTPRICEID";

/// The lookup table could not be loaded.
#[derive(Debug, Error)]
pub enum MappingLoadError {
    /// The table file could not be opened.
    #[error("open spot map {path}: {source}")]
    Open {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The CSV itself is malformed.
    #[error("read spot map: {0}")]
    Csv(#[from] csv::Error),

    /// No `SPOTPRICEID` header.
    #[error("spot map has no SPOTPRICEID column")]
    MissingIdColumn,

    /// No column holds `key=value` members.
    #[error("spot map has no composite-key column")]
    MissingKeyColumn,

    /// An identifier cell is not an integer.
    #[error("line {line}: invalid SPOTPRICEID {value:?}")]
    BadId {
        /// 1-based line in the file.
        line: u64,
        /// Cell content.
        value: String,
    },

    /// A composite key is not a full `iso/node/product` member set.
    #[error("line {line}: invalid composite key {value:?}: {reason}")]
    BadKey {
        /// 1-based line in the file.
        line: u64,
        /// Cell content.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// One triple maps to two identifiers, or one identifier to two triples.
    #[error("conflicting entries for {key} (ids {first} and {second})")]
    Conflict {
        /// Rendered triple.
        key: String,
        /// Identifier seen first.
        first: SpotPriceId,
        /// Identifier seen second.
        second: SpotPriceId,
    },
}

/// Reverse lookup miss.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown spot price identifier {0}")]
pub struct UnknownIdentifier(pub SpotPriceId);

/// Normalized member set of a composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TripleKey {
    market: String,
    location: String,
    product: String,
}

impl TripleKey {
    fn new(market: &str, location: &str, product: &str) -> Self {
        Self {
            market: market.trim().to_lowercase(),
            location: location.trim().to_lowercase(),
            product: product.trim().to_lowercase(),
        }
    }

    /// Parses `iso=..,node=..,product=..` in any member order.
    fn parse(raw: &str) -> Result<Self, String> {
        let (mut market, mut location, mut product) = (None, None, None);
        for member in raw.split(',').map(str::trim).filter(|m| !m.is_empty()) {
            let (k, v) = member
                .split_once('=')
                .ok_or_else(|| format!("member {member:?} is not key=value"))?;
            let slot = match k.trim().to_lowercase().as_str() {
                "iso" | "market" => &mut market,
                "node" | "location" => &mut location,
                "product" => &mut product,
                other => return Err(format!("unknown member {other:?}")),
            };
            if slot.replace(v.trim().to_string()).is_some() {
                return Err(format!("member {k:?} given twice"));
            }
        }
        match (market, location, product) {
            (Some(m), Some(l), Some(p)) if !m.is_empty() && !l.is_empty() && !p.is_empty() => {
                Ok(Self::new(&m, &l, &p))
            }
            _ => Err("expected iso, node and product members".into()),
        }
    }

    fn to_series_key(&self) -> SeriesKey {
        SeriesKey::new(&self.market, self.location.to_uppercase(), &self.product)
    }

    fn members(&self) -> MemberSet {
        MemberSet::new(&self.market, &self.location, &self.product)
    }
}

/// The three normalized values of a triple, sorted, without their roles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemberSet([String; 3]);

impl MemberSet {
    fn new(a: &str, b: &str, c: &str) -> Self {
        let mut members = [a, b, c].map(|v| v.trim().to_lowercase());
        members.sort_unstable();
        Self(members)
    }
}

impl std::fmt::Display for TripleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "iso={},node={},product={}",
            self.market, self.location, self.product
        )
    }
}

/// Loaded `(market, location, product) -> id` table.
#[derive(Debug, Default)]
pub struct SpotPriceIdMap {
    forward: HashMap<MemberSet, SpotPriceId>,
    /// Role-carrying triples, kept for the reverse index.
    triples: Vec<(TripleKey, SpotPriceId)>,
    reverse: OnceCell<HashMap<SpotPriceId, SeriesKey>>,
}

fn is_composite(cell: &str) -> bool {
    cell.contains('=')
}

impl SpotPriceIdMap {
    /// Loads the table from a CSV file.
    ///
    /// `key_column` names the composite-key column; when `None`, the first
    /// non-identifier column whose cells carry `key=value` members is used.
    pub fn load(
        path: impl AsRef<Path>,
        key_column: Option<&str>,
    ) -> Result<Self, MappingLoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| MappingLoadError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(file, key_column)
    }

    /// Loads the table from any CSV source.
    pub fn from_reader<R: io::Read>(
        reader: R,
        key_column: Option<&str>,
    ) -> Result<Self, MappingLoadError> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let records = rdr.records().collect::<Result<Vec<_>, _>>()?;

        let id_idx = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(ID_COLUMN))
            .ok_or(MappingLoadError::MissingIdColumn)?;

        let key_idx = match key_column {
            Some(name) => headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name.trim())),
            None => (0..headers.len()).filter(|&i| i != id_idx).find(|&i| {
                let mut cells = records
                    .iter()
                    .filter_map(|r| r.get(i))
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .peekable();
                cells.peek().is_some() && cells.all(is_composite)
            }),
        }
        .ok_or(MappingLoadError::MissingKeyColumn)?;

        let mut forward = HashMap::with_capacity(records.len());
        let mut triples = Vec::with_capacity(records.len());
        let mut seen_ids: HashMap<SpotPriceId, TripleKey> = HashMap::with_capacity(records.len());
        for rec in &records {
            let line = rec.position().map(|p| p.line()).unwrap_or_default();
            let raw_id = rec.get(id_idx).unwrap_or_default().trim();
            let raw_key = rec.get(key_idx).unwrap_or_default().trim();
            if raw_id.is_empty() && raw_key.is_empty() {
                continue;
            }
            let id: SpotPriceId = raw_id.parse().map_err(|_| MappingLoadError::BadId {
                line,
                value: raw_id.to_string(),
            })?;
            let key = TripleKey::parse(raw_key).map_err(|reason| MappingLoadError::BadKey {
                line,
                value: raw_key.to_string(),
                reason,
            })?;

            let members = key.members();
            if let Some(&first) = forward.get(&members) {
                if first != id {
                    return Err(MappingLoadError::Conflict {
                        key: key.to_string(),
                        first,
                        second: id,
                    });
                }
                continue;
            }
            if let Some(other) = seen_ids.get(&id) {
                return Err(MappingLoadError::Conflict {
                    key: format!("{other} / {key}"),
                    first: id,
                    second: id,
                });
            }
            seen_ids.insert(id, key.clone());
            forward.insert(members, id);
            triples.push((key, id));
        }

        Ok(Self {
            forward,
            triples,
            reverse: OnceCell::new(),
        })
    }

    /// Builds a map from in-memory entries.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (SpotPriceId, S, S, S)>,
        S: AsRef<str>,
    {
        let triples: Vec<(TripleKey, SpotPriceId)> = entries
            .into_iter()
            .map(|(id, m, l, p)| (TripleKey::new(m.as_ref(), l.as_ref(), p.as_ref()), id))
            .collect();
        Self {
            forward: triples.iter().map(|(k, id)| (k.members(), *id)).collect(),
            triples,
            reverse: OnceCell::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// True when the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Identifier of a triple, if mapped; argument order does not matter.
    pub fn id_for(&self, market: &str, location: &str, product: &str) -> Option<SpotPriceId> {
        self.forward
            .get(&MemberSet::new(market, location, product))
            .copied()
    }

    /// Identifier of a series, if mapped.
    pub fn id_for_key(&self, key: &SeriesKey) -> Option<SpotPriceId> {
        self.id_for(&key.market, &key.location, &key.product)
    }

    /// The triple an identifier stands for. Markets and products come back
    /// lowercase, locations uppercase.
    pub fn triple_for(&self, id: SpotPriceId) -> Result<SeriesKey, UnknownIdentifier> {
        self.reverse
            .get_or_init(|| {
                self.triples
                    .iter()
                    .map(|(k, id)| (*id, k.to_series_key()))
                    .collect()
            })
            .get(&id)
            .cloned()
            .ok_or(UnknownIdentifier(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TABLE: &str = "\
SPOTPRICEID,DESCRIPTION,KEY
101,CAISO hub DA,\"iso=CAISO,node=TH_NP15_GEN-APND,product=energy_da\"
102,CAISO hub RT,\"product=energy_rt,iso=caiso,node=th_np15_gen-apnd\"
103,,\"NODE=Western Hub,ISO=PJM,PRODUCT=reg_rt\"
";

    #[test]
    fn loads_and_looks_up_case_insensitively() {
        let map = SpotPriceIdMap::from_reader(TABLE.as_bytes(), None).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.id_for("caiso", "TH_NP15_GEN-APND", "energy_da"), Some(101));
        assert_eq!(map.id_for("CAISO", "th_np15_gen-apnd", "ENERGY_RT"), Some(102));
        assert_eq!(map.id_for("pjm", "WESTERN HUB", "reg_rt"), Some(103));
        assert_eq!(map.id_for("pjm", "WESTERN HUB", "energy_rt"), None);
    }

    #[test]
    fn reverse_lookup() {
        let map = SpotPriceIdMap::from_reader(TABLE.as_bytes(), None).unwrap();
        assert_eq!(
            map.triple_for(102).unwrap(),
            SeriesKey::new("caiso", "TH_NP15_GEN-APND", "energy_rt")
        );
        assert_eq!(map.triple_for(999), Err(UnknownIdentifier(999)));
    }

    #[test]
    fn explicit_key_column_is_matched_case_insensitively() {
        let map = SpotPriceIdMap::from_reader(TABLE.as_bytes(), Some("key")).unwrap();
        assert_eq!(map.len(), 3);
        assert!(matches!(
            SpotPriceIdMap::from_reader(TABLE.as_bytes(), Some("nope")),
            Err(MappingLoadError::MissingKeyColumn)
        ));
    }

    #[test]
    fn malformed_tables_are_rejected() {
        assert!(matches!(
            SpotPriceIdMap::from_reader("ID,KEY\n1,\"iso=a,node=b,product=c\"\n".as_bytes(), None),
            Err(MappingLoadError::MissingIdColumn)
        ));
        assert!(matches!(
            SpotPriceIdMap::from_reader("SPOTPRICEID,KEY\nx,\"iso=a,node=b,product=c\"\n".as_bytes(), None),
            Err(MappingLoadError::BadId { line: 2, .. })
        ));
        assert!(matches!(
            SpotPriceIdMap::from_reader("SPOTPRICEID,KEY\n1,\"iso=a,product=c\"\n".as_bytes(), None),
            Err(MappingLoadError::BadKey { .. })
        ));
        assert!(matches!(
            SpotPriceIdMap::from_reader(
                "SPOTPRICEID,KEY\n1,\"iso=a,node=b,product=c\"\n2,\"product=c,node=b,iso=a\"\n"
                    .as_bytes(),
                None
            ),
            Err(MappingLoadError::Conflict { .. })
        ));
    }

    #[test]
    fn permuted_arguments_find_the_same_id() {
        let map = SpotPriceIdMap::from_entries([(7, "caiso", "NODE1", "energy_da")]);
        assert_eq!(map.id_for("caiso", "NODE1", "energy_da"), Some(7));
        assert_eq!(map.id_for("energy_da", "caiso", "NODE1"), Some(7));
        assert_eq!(map.id_for("node1", "ENERGY_DA", "CAISO"), Some(7));
        assert_eq!(
            map.triple_for(7).unwrap(),
            SeriesKey::new("caiso", "NODE1", "energy_da")
        );
    }

    proptest! {
        #[test]
        fn id_for_is_order_independent(
            perm in Just(vec![0usize, 1, 2]).prop_shuffle(),
            args in Just(vec!["nyiso", "CAPITL", "spin_rt"]).prop_shuffle(),
            id in 1i64..1_000_000,
        ) {
            let members = [
                "iso=NYISO".to_string(),
                "node=CAPITL".to_string(),
                "product=spin_rt".to_string(),
            ];
            let key: Vec<&str> = perm.iter().map(|&i| members[i].as_str()).collect();
            let csv_text = format!("SPOTPRICEID,KEY\n{id},\"{}\"\n", key.join(","));
            let map = SpotPriceIdMap::from_reader(csv_text.as_bytes(), None).unwrap();

            prop_assert_eq!(map.id_for("nyiso", "CAPITL", "spin_rt"), Some(id));
            prop_assert_eq!(map.id_for("NYISO", "capitl", "SPIN_RT"), Some(id));
            prop_assert_eq!(map.id_for(args[0], args[1], args[2]), Some(id));
        }
    }
}
