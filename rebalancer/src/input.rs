//! Target-position and resolved-identity documents (JSON) loading and validation.
//!
//! Targets map bucket name to ticker to target quantity:
//!
//! ```json
//! {
//!   "generated_at": "2026-02-08T15:30:00Z",
//!   "buckets": {
//!     "momentum": { "AAPL": 50, "MSFT": 75 },
//!     "quality":  { "AAPL": 30 }
//!   }
//! }
//! ```
//!
//! Identities map ticker to broker contract fields; `null` marks a ticker the
//! upstream resolver could not identify:
//!
//! ```json
//! {
//!   "AAPL": { "symbol": "AAPL", "primary_exchange": "NASDAQ", "con_id": 265598 },
//!   "XYZ": null
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use rebal::{Bucket, Holding, IdentitySource, Quantity, SecurityId, SecurityIdentity};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Per-bucket target quantities from the allocation step.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetDocument {
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    pub buckets: BTreeMap<String, BTreeMap<String, Quantity>>,
}

/// Broker contract fields for one ticker.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityRecord {
    pub symbol: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default)]
    pub primary_exchange: Option<String>,
    #[serde(default)]
    pub con_id: Option<i32>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_exchange() -> String {
    "SMART".into()
}
fn default_currency() -> String {
    "USD".into()
}

/// Ticker to resolved identity; `None` for tickers that failed resolution.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct IdentityDocument {
    pub records: BTreeMap<String, Option<IdentityRecord>>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::InputRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&contents).map_err(|e| Error::InputParse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn normalize(ticker: &str) -> String {
    ticker.trim().to_ascii_uppercase()
}

impl TargetDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let doc: TargetDocument = read_json(path)?;
        doc.validate()?;
        Ok(doc)
    }

    /// Parse from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: TargetDocument =
            serde_json::from_str(json).map_err(|e| Error::Input(format!("targets: {e}")))?;
        doc.validate()?;
        Ok(doc)
    }

    fn validate(&self) -> Result<()> {
        if self.buckets.is_empty() {
            return Err(Error::Input("targets document has no buckets".into()));
        }
        for (name, holdings) in &self.buckets {
            if name.trim().is_empty() {
                return Err(Error::Input("bucket with empty name".into()));
            }
            let mut seen = HashSet::new();
            for ticker in holdings.keys() {
                let key = normalize(ticker);
                if key.is_empty() {
                    return Err(Error::Input(format!("bucket '{name}' has an empty ticker")));
                }
                if !seen.insert(key) {
                    return Err(Error::Input(format!(
                        "bucket '{name}' lists ticker '{ticker}' twice"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl IdentityRecord {
    fn validate(&self, ticker: &str) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(Error::Input(format!("identity for '{ticker}' has an empty symbol")));
        }
        if self.exchange.trim().is_empty() {
            return Err(Error::Input(format!("identity for '{ticker}' has an empty exchange")));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::Input(format!(
                "identity for '{ticker}' has invalid currency '{}'",
                self.currency
            )));
        }
        if let Some(id) = self.con_id {
            if id <= 0 {
                return Err(Error::Input(format!(
                    "identity for '{ticker}' has invalid contract id {id}"
                )));
            }
        }
        Ok(())
    }

    pub fn to_identity(&self, ticker: &str) -> SecurityIdentity {
        SecurityIdentity {
            ticker: ticker.trim().to_string(),
            symbol: SecurityId::new(&self.symbol),
            exchange: self.exchange.trim().to_ascii_uppercase(),
            primary_exchange: self
                .primary_exchange
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_ascii_uppercase),
            con_id: self.con_id,
            currency: self.currency.to_ascii_uppercase(),
            source: IdentitySource::Upstream,
        }
    }
}

impl IdentityDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let doc: IdentityDocument = read_json(path)?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let doc: IdentityDocument =
            serde_json::from_str(json).map_err(|e| Error::Input(format!("identities: {e}")))?;
        doc.validate()?;
        Ok(doc)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (ticker, record) in &self.records {
            if !seen.insert(normalize(ticker)) {
                return Err(Error::Input(format!("ticker '{ticker}' resolved twice")));
            }
            if let Some(record) = record {
                record.validate(ticker)?;
            }
        }
        Ok(())
    }

    /// Identity for a ticker, matched case-insensitively.
    pub fn lookup(&self, ticker: &str) -> Option<SecurityIdentity> {
        let key = normalize(ticker);
        self.records
            .iter()
            .find(|(t, _)| normalize(t) == key)
            .and_then(|(t, record)| record.as_ref().map(|r| r.to_identity(t)))
    }
}

/// Attach identities to bucket holdings. Tickers with no identity stay in
/// their bucket with `identity: None`.
pub fn to_buckets(targets: &TargetDocument, identities: &IdentityDocument) -> Vec<Bucket> {
    targets
        .buckets
        .iter()
        .map(|(name, holdings)| Bucket {
            name: name.clone(),
            holdings: holdings
                .iter()
                .map(|(ticker, &target_quantity)| Holding {
                    ticker: ticker.trim().to_string(),
                    target_quantity,
                    identity: identities.lookup(ticker),
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets_json() -> &'static str {
        r#"{
            "generated_at": "2026-02-08T15:30:00Z",
            "buckets": {
                "momentum": { "AAPL": 50, "MSFT": 75 },
                "quality": { "aapl": 30, "XYZ": 10 }
            }
        }"#
    }

    fn identities_json() -> &'static str {
        r#"{
            "AAPL": { "symbol": "AAPL", "primary_exchange": "nasdaq", "con_id": 265598 },
            "MSFT": { "symbol": "MSFT", "primary_exchange": "NASDAQ", "con_id": 272093 },
            "XYZ": null
        }"#
    }

    #[test]
    fn parse_and_attach() {
        let targets = TargetDocument::from_json(targets_json()).unwrap();
        let identities = IdentityDocument::from_json(identities_json()).unwrap();
        let buckets = to_buckets(&targets, &identities);

        assert_eq!(buckets.len(), 2);
        let quality = buckets.iter().find(|b| b.name == "quality").unwrap();
        let aapl = quality.holdings.iter().find(|h| h.ticker == "aapl").unwrap();
        let identity = aapl.identity.as_ref().unwrap();
        assert_eq!(identity.symbol.as_str(), "AAPL");
        assert_eq!(identity.primary_exchange.as_deref(), Some("NASDAQ"));
        assert_eq!(identity.exchange, "SMART");

        let xyz = quality.holdings.iter().find(|h| h.ticker == "XYZ").unwrap();
        assert!(xyz.identity.is_none());
    }

    #[test]
    fn aggregates_across_buckets() {
        let targets = TargetDocument::from_json(targets_json()).unwrap();
        let identities = IdentityDocument::from_json(identities_json()).unwrap();
        let agg = rebal::aggregate(&to_buckets(&targets, &identities));
        assert_eq!(agg.targets[&SecurityId::new("AAPL")], 80);
        assert_eq!(agg.unresolved_count(), 1);
    }

    #[test]
    fn rejects_empty_buckets() {
        let err = TargetDocument::from_json(r#"{"buckets": {}}"#).unwrap_err();
        assert!(err.to_string().contains("no buckets"));
    }

    #[test]
    fn rejects_duplicate_ticker_in_bucket() {
        let json = r#"{"buckets": {"a": {"AAPL": 1, " aapl": 2}}}"#;
        assert!(TargetDocument::from_json(json).is_err());
    }

    #[test]
    fn rejects_negative_quantity() {
        let json = r#"{"buckets": {"a": {"AAPL": -5}}}"#;
        assert!(TargetDocument::from_json(json).is_err());
    }

    #[test]
    fn rejects_bad_currency() {
        let json = r#"{"AAPL": {"symbol": "AAPL", "currency": "DOLLARS"}}"#;
        assert!(IdentityDocument::from_json(json).is_err());
    }

    #[test]
    fn rejects_nonpositive_contract_id() {
        let json = r#"{"AAPL": {"symbol": "AAPL", "con_id": 0}}"#;
        assert!(IdentityDocument::from_json(json).is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        std::fs::write(&path, targets_json()).unwrap();
        let doc = TargetDocument::load(&path).unwrap();
        assert_eq!(doc.buckets.len(), 2);

        let missing = TargetDocument::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, Error::InputRead { .. }));
    }
}
