use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use log::debug;

use super::{DnsProvider, DnsProviderError, TokenInfo, Zone};
use crate::issuance::types::TxtRecord;

const PROVIDER: &str = "in-memory";

/// DNS provider keeping records in process memory, with failure injection by call index.
#[derive(Default)]
pub struct InMemoryDnsProvider {
    zones: Vec<Zone>,
    records: Mutex<BTreeMap<String, TxtRecord>>,
    next_id: AtomicU64,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_create_calls: Mutex<HashSet<usize>>,
    fail_delete_calls: Mutex<HashSet<usize>>,
}

impl InMemoryDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zones(zones: Vec<Zone>) -> Self {
        Self {
            zones,
            ..Self::default()
        }
    }

    /// Makes the `call`-th create request (1-based) fail.
    pub fn fail_create_on(self, call: usize) -> Self {
        lock(&self.fail_create_calls).insert(call);
        self
    }

    /// Makes the `call`-th delete request (1-based) fail.
    pub fn fail_delete_on(self, call: usize) -> Self {
        lock(&self.fail_delete_calls).insert(call);
        self
    }

    pub fn records(&self) -> Vec<TxtRecord> {
        lock(&self.records).values().cloned().collect()
    }

    pub fn records_named(&self, name: &str) -> Vec<TxtRecord> {
        lock(&self.records)
            .values()
            .filter(|record| record.name == name)
            .cloned()
            .collect()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn injected(&self, calls: &Mutex<HashSet<usize>>, call: usize, operation: &str) -> bool {
        let fail = lock(calls).contains(&call);
        if fail {
            debug!("[memory-dns] injecting failure for {} call {}", operation, call);
        }
        fail
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DnsProvider for InMemoryDnsProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn list_zones(&self) -> Result<Vec<Zone>, DnsProviderError> {
        Ok(self.zones.clone())
    }

    async fn create_txt_record(
        &self,
        zone_id: &str,
        name: &str,
        content: &str,
        _ttl: u32,
    ) -> Result<String, DnsProviderError> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.injected(&self.fail_create_calls, call, "create") {
            return Err(DnsProviderError::Api {
                provider: PROVIDER.to_string(),
                message: format!("injected create failure on call {call}"),
            });
        }
        if !self.zones.is_empty() && !self.zones.iter().any(|zone| zone.id == zone_id) {
            return Err(DnsProviderError::ZoneNotFound(zone_id.to_string()));
        }
        let id = format!("rec-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        lock(&self.records).insert(
            id.clone(),
            TxtRecord {
                id: id.clone(),
                zone_id: zone_id.to_string(),
                name: name.to_string(),
                content: content.to_string(),
            },
        );
        Ok(id)
    }

    async fn delete_txt_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<(), DnsProviderError> {
        let call = self.delete_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.injected(&self.fail_delete_calls, call, "delete") {
            return Err(DnsProviderError::Api {
                provider: PROVIDER.to_string(),
                message: format!("injected delete failure on call {call}"),
            });
        }
        let mut records = lock(&self.records);
        if records
            .get(record_id)
            .is_some_and(|record| record.zone_id == zone_id)
        {
            records.remove(record_id);
        }
        Ok(())
    }

    async fn get_txt_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<Option<TxtRecord>, DnsProviderError> {
        Ok(lock(&self.records)
            .get(record_id)
            .filter(|record| record.zone_id == zone_id)
            .cloned())
    }

    async fn verify_token(&self) -> Result<TokenInfo, DnsProviderError> {
        Ok(TokenInfo {
            id: "in-memory".to_string(),
            status: "active".to_string(),
            expires_on: None,
        })
    }
}
