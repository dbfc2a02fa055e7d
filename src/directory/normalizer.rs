//! Identifier normalization.
//!
//! The same real-world entity can be addressed from two namespaces (e.g. a
//! phone-number id and an opaque linked id). Everything is normalized before
//! existence checks and fetches so aliases coalesce onto one record.

use super::models::EntityId;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[async_trait]
pub trait IdentifierNormalizer: Send + Sync {
    async fn normalize(&self, id: &EntityId) -> EntityId;
}

/// Identity mapping, for deployments with a single namespace.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughNormalizer;

#[async_trait]
impl IdentifierNormalizer for PassthroughNormalizer {
    async fn normalize(&self, id: &EntityId) -> EntityId {
        id.clone()
    }
}

/// Alias table learned at runtime (alias → canonical id).
#[derive(Debug, Default)]
pub struct AliasNormalizer {
    aliases: RwLock<HashMap<EntityId, EntityId>>,
}

impl AliasNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `alias` refers to `canonical`. Self-mappings are ignored.
    pub fn learn(&self, alias: EntityId, canonical: EntityId) {
        if alias == canonical {
            return;
        }
        tracing::debug!(alias = %alias, canonical = %canonical, "Learned identifier alias");
        self.aliases.write().insert(alias, canonical);
    }

    pub fn len(&self) -> usize {
        self.aliases.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.read().is_empty()
    }
}

#[async_trait]
impl IdentifierNormalizer for AliasNormalizer {
    async fn normalize(&self, id: &EntityId) -> EntityId {
        self.aliases
            .read()
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passthrough_returns_input() {
        let id = EntityId::from("a@s.whatsapp.net");
        assert_eq!(PassthroughNormalizer.normalize(&id).await, id);
    }

    #[tokio::test]
    async fn alias_maps_to_canonical() {
        let normalizer = AliasNormalizer::new();
        normalizer.learn("777@lid".into(), "1555@s.whatsapp.net".into());

        assert_eq!(
            normalizer.normalize(&"777@lid".into()).await,
            EntityId::from("1555@s.whatsapp.net")
        );
        assert_eq!(
            normalizer.normalize(&"other@lid".into()).await,
            EntityId::from("other@lid")
        );
    }

    #[test]
    fn self_alias_ignored() {
        let normalizer = AliasNormalizer::new();
        normalizer.learn("x@lid".into(), "x@lid".into());
        assert!(normalizer.is_empty());
    }
}
