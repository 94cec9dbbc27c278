//! Contract master: the token → contract mapping used for symbol
//! resolution.
//!
//! The on-disk file is UTF-8 JSON keyed by stringified token IDs (that is
//! how the exchange distributes it); the in-memory map is integer-keyed
//! and immutable for the life of the process.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// One row of the contract master.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Contract {
    pub symbol: String,
    /// Expiry in `DD-MMM-YYYY` form, e.g. `27-NOV-2025`.
    #[serde(default)]
    pub expiry: String,
    /// `CE`, `PE`, or empty for futures.
    #[serde(default)]
    pub option_type: String,
    #[serde(default, alias = "strike_price")]
    pub strike: f64,
    #[serde(default)]
    pub instrument_type: String,
}

#[derive(Debug, Default)]
pub struct ContractMaster {
    contracts: HashMap<u32, Contract>,
}

impl ContractMaster {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading contract master {}", path.display()))?;
        let raw: HashMap<String, Contract> = serde_json::from_str(&text)
            .with_context(|| format!("parsing contract master {}", path.display()))?;
        let master = Self::from_string_keys(raw);
        info!(tokens = master.len(), path = %path.display(), "contract master loaded");
        Ok(master)
    }

    /// Build the integer-keyed map, skipping keys that are not numeric.
    pub fn from_string_keys(raw: HashMap<String, Contract>) -> Self {
        let mut contracts = HashMap::with_capacity(raw.len());
        for (key, contract) in raw {
            match key.parse::<u32>() {
                Ok(token) => {
                    contracts.insert(token, contract);
                }
                Err(_) => warn!(key = %key, "skipping non-numeric token key in contract master"),
            }
        }
        ContractMaster { contracts }
    }

    pub fn get(&self, token: u32) -> Option<&Contract> {
        self.contracts.get(&token)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_keys_become_integer_tokens() {
        let raw: HashMap<String, Contract> = serde_json::from_str(
            r#"{
                "873870": {"symbol": "SENSEX", "expiry": "27-NOV-2025",
                           "option_type": "CE", "strike": 84100,
                           "instrument_type": "IO"},
                "861384": {"symbol": "SENSEX", "expiry": "27-NOV-2025",
                           "option_type": "", "strike": 0,
                           "instrument_type": "IF"},
                "garbage": {"symbol": "X"}
            }"#,
        )
        .unwrap();
        let master = ContractMaster::from_string_keys(raw);
        assert_eq!(master.len(), 2);
        let c = master.get(873870).unwrap();
        assert_eq!(c.symbol, "SENSEX");
        assert_eq!(c.option_type, "CE");
        assert_eq!(c.strike, 84100.0);
        assert!(master.get(999999).is_none());
    }

    #[test]
    fn strike_price_alias_is_accepted() {
        let raw: HashMap<String, Contract> = serde_json::from_str(
            r#"{"1102290": {"symbol": "BANKEX", "expiry": "30-DEC-2025",
                            "option_type": "PE", "strike_price": 52000}}"#,
        )
        .unwrap();
        let master = ContractMaster::from_string_keys(raw);
        assert_eq!(master.get(1102290).unwrap().strike, 52000.0);
    }
}
