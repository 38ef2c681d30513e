use crate::consolidator::AnalysisReport;
use crate::schema::EventRecord;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Stable fingerprint of the two input collections. Identical inputs hash
/// identically regardless of when or where the run happens.
pub fn snapshot_fingerprint(nbim: &[EventRecord], custody: &[EventRecord]) -> String {
    let mut hasher = Sha256::new();
    for (label, records) in [("nbim", nbim), ("custody", custody)] {
        hasher.update(label.as_bytes());
        match serde_json::to_vec(records) {
            Ok(bytes) => hasher.update(&bytes),
            Err(err) => {
                // Unserializable input cannot be fingerprinted reliably;
                // salt with the error so the entry never matches anything.
                warn!("Fingerprinting fell back to record count: {err}");
                hasher.update(records.len().to_le_bytes());
                hasher.update(err.to_string().as_bytes());
            }
        }
    }
    format!("{:x}", hasher.finalize())
}

struct CacheEntry {
    report: Arc<AnalysisReport>,
    created: Instant,
}

/// Short-lived cache of completed runs, keyed by input fingerprint.
/// Concurrent reads share the lock; writes serialize per store, last
/// writer wins. Expired entries are evicted lazily on read.
pub struct ResultCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The cached report for this fingerprint, if present and fresh.
    pub fn get(&self, fingerprint: &str) -> Option<Arc<AnalysisReport>> {
        {
            let entries = self.entries.read().ok()?;
            match entries.get(fingerprint) {
                Some(entry) if entry.created.elapsed() < self.ttl => {
                    debug!("Cache hit for {fingerprint}");
                    return Some(Arc::clone(&entry.report));
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Stale: evict outside the read lock.
        if let Ok(mut entries) = self.entries.write() {
            if let Some(entry) = entries.get(fingerprint) {
                if entry.created.elapsed() >= self.ttl {
                    debug!("Evicting expired entry for {fingerprint}");
                    entries.remove(fingerprint);
                }
            }
        }
        None
    }

    /// Stores a completed run. Callers only put consolidated reports;
    /// failed or partial runs are never cached.
    pub fn put(&self, fingerprint: String, report: Arc<AnalysisReport>) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(
                    fingerprint,
                    CacheEntry {
                        report,
                        created: Instant::now(),
                    },
                );
            }
            Err(err) => {
                // A poisoned lock costs us the cache, not the result.
                warn!("Cache write skipped: {err}");
            }
        }
    }

    pub fn invalidate(&self, fingerprint: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(fingerprint);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidator::{ExcludedRecords, PortfolioSummary, RunStage};
    use crate::llm::enrich::PatternAnalysis;
    use crate::schema::RecordSource;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn record(isin: &str, net: f64) -> EventRecord {
        EventRecord {
            event_key: "E".to_string(),
            isin: isin.to_string(),
            ex_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            payment_date: NaiveDate::from_ymd_opt(2024, 1, 24).unwrap(),
            net_amount: net,
            tax_amount: 0.0,
            currency: "USD".to_string(),
            company_name: None,
            custodian: None,
            source: RecordSource::Nbim,
            extra: BTreeMap::new(),
        }
    }

    fn empty_report() -> Arc<AnalysisReport> {
        Arc::new(AnalysisReport {
            analysis_type: "consolidated_row_analysis".to_string(),
            stage: RunStage::Consolidated,
            total_rows_analyzed: 0,
            row_analyses: Vec::new(),
            portfolio_summary: PortfolioSummary {
                total_rows: 0,
                total_financial_impact: 0.0,
                average_reconciliation_score: 10.0,
                status_distribution: BTreeMap::new(),
                severity_distribution: BTreeMap::new(),
                high_impact_rows_count: 0,
                portfolio_health: crate::consolidator::PortfolioHealth::Excellent,
                pattern_analysis: PatternAnalysis::empty(),
                recommended_actions: Vec::new(),
                key_recommendations: Vec::new(),
                top_issues_by_impact: Vec::new(),
                degraded_count: 0,
                excluded: ExcludedRecords::default(),
            },
        })
    }

    #[test]
    fn test_fingerprint_is_stable_and_input_sensitive() {
        let nbim = vec![record("A", 100.0)];
        let custody = vec![record("A", 100.0)];

        let fp1 = snapshot_fingerprint(&nbim, &custody);
        let fp2 = snapshot_fingerprint(&nbim, &custody);
        assert_eq!(fp1, fp2);

        let changed = vec![record("A", 100.01)];
        assert_ne!(fp1, snapshot_fingerprint(&nbim, &changed));

        // Swapping which side holds the rows must change the key.
        assert_ne!(fp1, snapshot_fingerprint(&custody, &[]));
    }

    #[test]
    fn test_get_within_ttl_returns_same_report() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.put("k".to_string(), empty_report());

        let hit = cache.get("k").unwrap();
        assert_eq!(hit.total_rows_analyzed, 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_evicted_on_read() {
        let cache = ResultCache::new(Duration::from_millis(0));
        cache.put("k".to_string(), empty_report());

        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_overwrites_last_writer_wins() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.put("k".to_string(), empty_report());

        let mut second = (*empty_report()).clone();
        second.total_rows_analyzed = 7;
        cache.put("k".to_string(), Arc::new(second));

        assert_eq!(cache.get("k").unwrap().total_rows_analyzed, 7);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.put("k".to_string(), empty_report());
        cache.invalidate("k");
        assert!(cache.get("k").is_none());
    }
}
