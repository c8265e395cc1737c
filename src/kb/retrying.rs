//! Retry adapter for knowledge-base collaborators.

use crate::error::KbResult;
use crate::retry::RetryPolicy;

use super::{DescriptorStream, Filter, PropertyInfo, Search, StatementStream, Store};

/// Wraps a [`Search`] and/or [`Store`] so every read goes through a
/// [`RetryPolicy`]. Search and statement streams are retried when opened;
/// failures of individual items are left to the consumer.
#[derive(Debug, Clone)]
pub struct Retrying<K> {
    inner: K,
    policy: RetryPolicy,
}

impl<K> Retrying<K> {
    pub fn new(inner: K, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &K {
        &self.inner
    }
}

impl<K: Search> Search for Retrying<K> {
    fn item_descriptor(
        &self,
        query: &str,
        language: &str,
        limit: usize,
    ) -> KbResult<DescriptorStream<'_>> {
        self.policy.run("item_descriptor", || {
            self.inner.item_descriptor(query, language, limit)
        })
    }

    fn property_descriptor(
        &self,
        query: &str,
        language: &str,
        limit: usize,
    ) -> KbResult<DescriptorStream<'_>> {
        self.policy.run("property_descriptor", || {
            self.inner.property_descriptor(query, language, limit)
        })
    }
}

impl<K: Store> Store for Retrying<K> {
    fn filter(&self, filter: &Filter) -> KbResult<StatementStream<'_>> {
        self.policy.run("filter", || self.inner.filter(filter))
    }

    fn filter_properties(&self, filter: &Filter) -> KbResult<Vec<PropertyInfo>> {
        self.policy
            .run("filter_properties", || self.inner.filter_properties(filter))
    }

    fn count(&self, filter: &Filter) -> KbResult<usize> {
        self.policy.run("count", || self.inner.count(filter))
    }
}
