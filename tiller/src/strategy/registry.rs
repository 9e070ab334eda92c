use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use smol_str::SmolStr;
use std::fmt;

use super::Strategy;
use crate::error::TillerError;

/// Builds a strategy instance from its configuration parameters.
///
/// Factories validate by construction: parameters that fail to parse produce a
/// [`TillerError::Validation`], so `create` doubles as the parameter check.
pub type StrategyFactory =
    Box<dyn Fn(&Value) -> Result<Box<dyn Strategy>, TillerError> + Send + Sync>;

/// Public description of a registered strategy type.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyInfo {
    pub id: SmolStr,
    pub schema: Value,
}

struct RegistryEntry {
    schema: Value,
    factory: StrategyFactory,
}

/// Registry of strategy types available to the platform.
///
/// Registration is idempotent (the last factory registered under an id wins), so worker
/// processes can re-register on startup without coordination.
#[derive(Default)]
pub struct StrategyRegistry {
    entries: RwLock<IndexMap<SmolStr, RegistryEntry>>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<SmolStr> = self.entries.read().keys().cloned().collect();
        f.debug_struct("StrategyRegistry").field("ids", &ids).finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: impl Into<SmolStr>, schema: Value, factory: StrategyFactory) {
        self.entries
            .write()
            .insert(id.into(), RegistryEntry { schema, factory });
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Instantiate a strategy from its registered factory.
    pub fn create(&self, id: &str, parameters: &Value) -> Result<Box<dyn Strategy>, TillerError> {
        let entries = self.entries.read();
        let entry = entries
            .get(id)
            .ok_or_else(|| TillerError::validation(format!("unknown strategy type '{id}'")))?;
        (entry.factory)(parameters)
    }

    /// Check parameters against a strategy type without keeping the instance.
    pub fn validate(&self, id: &str, parameters: &Value) -> Result<(), TillerError> {
        self.create(id, parameters).map(drop)
    }

    /// Describe every registered strategy, in registration order.
    pub fn all_info(&self) -> Vec<StrategyInfo> {
        self.entries
            .read()
            .iter()
            .map(|(id, entry)| StrategyInfo {
                id: id.clone(),
                schema: entry.schema.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::example::ThresholdStrategy;
    use serde_json::json;

    fn registry_with_threshold() -> StrategyRegistry {
        let registry = StrategyRegistry::new();
        registry.register(
            ThresholdStrategy::ID,
            ThresholdStrategy::schema(),
            ThresholdStrategy::factory(),
        );
        registry
    }

    #[test]
    fn test_register_and_create() {
        let registry = registry_with_threshold();
        assert!(registry.is_registered(ThresholdStrategy::ID));
        assert!(!registry.is_registered("unknown"));

        let params = json!({
            "instrument": "EUR_USD",
            "entry_pips": "5",
            "take_profit_pips": "10",
        });
        assert!(registry.create(ThresholdStrategy::ID, &params).is_ok());
    }

    #[test]
    fn test_create_rejects_unknown_type_and_bad_parameters() {
        let registry = registry_with_threshold();

        let err = registry.create("momentum", &json!({})).unwrap_err();
        assert!(matches!(err, TillerError::Validation(_)));

        let err = registry
            .validate(ThresholdStrategy::ID, &json!({"instrument": 42}))
            .unwrap_err();
        assert!(matches!(err, TillerError::Validation(_)));
    }

    #[test]
    fn test_all_info_preserves_registration_order() {
        let registry = registry_with_threshold();
        registry.register("noop", json!({}), ThresholdStrategy::factory());

        let info = registry.all_info();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].id, ThresholdStrategy::ID);
        assert_eq!(info[1].id, "noop");
    }
}
