//! Shared field instances
//!
//! Fields are expensive to build (a GF(2^16) log table is 384 KiB) and
//! immutable once built, so one registry hands out `Arc<Field>` clones to
//! every session that asks for the same width and strategy.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{Field, Strategy};
use crate::error::Result;

/// Lazily populated set of fields keyed by width and concrete strategy
#[derive(Debug, Default)]
pub struct FieldRegistry {
    fields: RwLock<HashMap<(u32, Strategy), Arc<Field>>>,
    /// Strategy `field(w)` uses instead of the default
    preferred: RwLock<HashMap<u32, Strategy>>,
}

impl FieldRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Field for width `w` with the preferred strategy
    pub fn field(&self, w: u32) -> Result<Arc<Field>> {
        let strategy = self
            .preferred
            .read()
            .get(&w)
            .copied()
            .unwrap_or(Strategy::Default);
        self.field_with(w, strategy)
    }

    /// Install a prebuilt field and make it the one `field(w)` returns
    pub fn register(&self, field: Field) -> Arc<Field> {
        let (w, strategy) = (field.w(), field.strategy());
        let field = Arc::new(field);
        self.fields.write().insert((w, strategy), Arc::clone(&field));
        self.preferred.write().insert(w, strategy);
        debug!("Registered GF(2^{}) with {} strategy", w, strategy);
        field
    }

    /// Field for width `w` with a specific strategy, built on first use
    ///
    /// # Errors
    /// Returns `FieldInit` if the width/strategy pair is unsupported.
    pub fn field_with(&self, w: u32, strategy: Strategy) -> Result<Arc<Field>> {
        let key = (w, strategy.resolve(w));
        if let Some(field) = self.fields.read().get(&key) {
            return Ok(Arc::clone(field));
        }

        let mut fields = self.fields.write();
        // Another caller may have built it while we waited for the lock
        if let Some(field) = fields.get(&key) {
            return Ok(Arc::clone(field));
        }

        let field = Arc::new(Field::new(w, strategy)?);
        debug!("Initialized GF(2^{}) with {} strategy", w, field.strategy());
        fields.insert(key, Arc::clone(&field));
        Ok(field)
    }

    /// Number of fields built so far
    pub fn len(&self) -> usize {
        self.fields.read().len()
    }

    /// True when no field has been built yet
    pub fn is_empty(&self) -> bool {
        self.fields.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_shares_instances() {
        let registry = FieldRegistry::new();
        assert!(registry.is_empty());

        let a = registry.field(8).unwrap();
        let b = registry.field_with(8, Strategy::MultTable).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        let c = registry.field_with(8, Strategy::LogTable).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_overrides_default() {
        let registry = FieldRegistry::new();
        let shift = registry.register(Field::new(8, Strategy::Shift).unwrap());
        let field = registry.field(8).unwrap();
        assert!(Arc::ptr_eq(&shift, &field));
        assert_eq!(field.strategy(), Strategy::Shift);
        // Other widths keep their default
        assert_ne!(registry.field(16).unwrap().strategy(), Strategy::Shift);
    }

    #[test]
    fn test_registry_rejects_bad_width() {
        let registry = FieldRegistry::new();
        assert!(registry.field(0).is_err());
        assert!(registry.field_with(20, Strategy::MultTable).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_is_shareable_across_threads() {
        let registry = Arc::new(FieldRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.field(16).unwrap().multiply(3, 5))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 15);
        }
        assert_eq!(registry.len(), 1);
    }
}
