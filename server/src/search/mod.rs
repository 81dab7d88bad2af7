// Web search gateway
//
// Wraps a Tavily-style search API behind a single `search` operation.
// Results are cached for 15 minutes in a bounded LRU keyed by
// (normalized query, language, max_results); identical concurrent misses
// are collapsed into one upstream request. When no API key is configured
// the gateway returns empty, degraded results and the workflow continues.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::SearchConfig;
use crate::models::Language;

/// How long cached results stay fresh
pub const CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Maximum number of cached queries
const CACHE_CAPACITY: usize = 128;

const SEARCH_API_URL: &str = "https://api.tavily.com/search";

// ============================================================================
// Results
// ============================================================================

/// One ranked search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub score: f32,
}

/// Outcome of a search call; never an error
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Hits ordered by score descending
    pub results: Vec<SearchResult>,
    /// True when the provider is unconfigured or the request failed
    pub degraded: bool,
}

/// The single search operation the workflow engine consumes
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Search the web; infallible, failures degrade to empty results
    async fn search(
        &self,
        query: &str,
        language: Language,
        max_results: Option<usize>,
    ) -> SearchOutcome;

    /// True when a search provider key is present
    fn is_configured(&self) -> bool;

    /// Minimal availability probe
    async fn health_check(&self) -> bool;
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    max_results: usize,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f32,
}

// ============================================================================
// Cache
// ============================================================================

type CacheKey = (String, Language, usize);

struct CachedEntry {
    results: Vec<SearchResult>,
    stored_at: Instant,
}

#[derive(Default)]
struct SearchCache {
    entries: HashMap<CacheKey, CachedEntry>,
    /// Access order, oldest first
    order: Vec<CacheKey>,
}

impl SearchCache {
    fn get(&mut self, key: &CacheKey) -> Option<Vec<SearchResult>> {
        let fresh = match self.entries.get(key) {
            Some(entry) => entry.stored_at.elapsed() < CACHE_TTL,
            None => return None,
        };
        if !fresh {
            self.entries.remove(key);
            self.order.retain(|k| k != key);
            return None;
        }

        // Refresh LRU position
        self.order.retain(|k| k != key);
        self.order.push(key.clone());
        self.entries.get(key).map(|e| e.results.clone())
    }

    fn insert(&mut self, key: CacheKey, results: Vec<SearchResult>) {
        if self.entries.len() >= CACHE_CAPACITY && !self.entries.contains_key(&key) {
            if let Some(oldest) = self.order.first().cloned() {
                self.entries.remove(&oldest);
                self.order.remove(0);
            }
        }
        self.order.retain(|k| k != &key);
        self.order.push(key.clone());
        self.entries.insert(
            key,
            CachedEntry {
                results,
                stored_at: Instant::now(),
            },
        );
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Web search with transparent caching and degraded mode
pub struct SearchGateway {
    client: reqwest::Client,
    api_key: Option<String>,
    default_max_results: usize,
    cache: Mutex<SearchCache>,
    /// Per-key gates collapsing concurrent identical misses
    in_flight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl SearchGateway {
    pub fn new(config: &SearchConfig) -> Self {
        if config.api_key.is_none() {
            log::warn!("No search API key configured; search runs in degraded mode");
        }
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            default_max_results: config.max_results,
            cache: Mutex::new(SearchCache::default()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// True when a key is configured (degraded mode reports unavailable)
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn normalize_query(query: &str) -> String {
        query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }

    /// Search the web. Infallible: provider failures degrade to empty results.
    pub async fn search(
        &self,
        query: &str,
        language: Language,
        max_results: Option<usize>,
    ) -> SearchOutcome {
        let api_key = match &self.api_key {
            Some(key) => key.clone(),
            None => {
                return SearchOutcome {
                    results: Vec::new(),
                    degraded: true,
                }
            }
        };

        let max_results = max_results.unwrap_or(self.default_max_results);
        let key: CacheKey = (Self::normalize_query(query), language, max_results);

        if let Some(results) = self.cache.lock().await.get(&key) {
            return SearchOutcome {
                results,
                degraded: false,
            };
        }

        // Single-flight: serialize fetchers for the same key, then re-check
        let gate = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.entry(key.clone()).or_default().clone()
        };
        let _guard = gate.lock().await;

        if let Some(results) = self.cache.lock().await.get(&key) {
            return SearchOutcome {
                results,
                degraded: false,
            };
        }

        let outcome = match self.fetch(&api_key, query, max_results).await {
            Ok(mut results) => {
                results.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                self.cache.lock().await.insert(key.clone(), results.clone());
                SearchOutcome {
                    results,
                    degraded: false,
                }
            }
            Err(e) => {
                log::error!("Search failed for '{}': {}", query, e);
                SearchOutcome {
                    results: Vec::new(),
                    degraded: true,
                }
            }
        };

        self.in_flight.lock().await.remove(&key);
        outcome
    }

    async fn fetch(
        &self,
        api_key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, String> {
        let body = TavilyRequest {
            api_key,
            query,
            search_depth: "advanced",
            max_results,
        };

        let response = self
            .client
            .post(SEARCH_API_URL)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Search request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("Search API error: {}", response.status()));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| format!("Invalid search response: {}", e))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| SearchResult {
                title: r.title,
                url: r.url,
                snippet: r.content,
                score: r.score,
            })
            .collect())
    }

    /// Minimal probe backing the health endpoint
    pub async fn health_check(&self) -> bool {
        let api_key = match &self.api_key {
            Some(key) => key.clone(),
            None => return false,
        };
        match tokio::time::timeout(
            Duration::from_secs(2),
            self.fetch(&api_key, "health probe", 1),
        )
        .await
        {
            Ok(Ok(_)) => true,
            _ => false,
        }
    }
}

#[async_trait]
impl WebSearch for SearchGateway {
    async fn search(
        &self,
        query: &str,
        language: Language,
        max_results: Option<usize>,
    ) -> SearchOutcome {
        SearchGateway::search(self, query, language, max_results).await
    }

    fn is_configured(&self) -> bool {
        SearchGateway::is_configured(self)
    }

    async fn health_check(&self) -> bool {
        SearchGateway::health_check(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(url: &str, score: f32) -> SearchResult {
        SearchResult {
            title: "t".to_string(),
            url: url.to_string(),
            snippet: "s".to_string(),
            score,
        }
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(
            SearchGateway::normalize_query("  Quantum   Computing "),
            "quantum computing"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_is_degraded() {
        let gateway = SearchGateway::new(&SearchConfig::default());
        assert!(!gateway.is_configured());

        let outcome = gateway.search("anything", Language::En, None).await;
        assert!(outcome.degraded);
        assert!(outcome.results.is_empty());

        assert!(!gateway.health_check().await);
    }

    #[test]
    fn test_cache_hit_and_expiry_key_separation() {
        let mut cache = SearchCache::default();
        let key_en: CacheKey = ("q".to_string(), Language::En, 5);
        let key_ko: CacheKey = ("q".to_string(), Language::Ko, 5);

        cache.insert(key_en.clone(), vec![result("https://a", 1.0)]);
        assert!(cache.get(&key_en).is_some());
        assert!(cache.get(&key_ko).is_none());
    }

    #[test]
    fn test_cache_lru_eviction() {
        let mut cache = SearchCache::default();
        for i in 0..CACHE_CAPACITY {
            cache.insert((format!("q{}", i), Language::En, 5), vec![]);
        }
        // Touch q0 so q1 becomes the eviction candidate
        assert!(cache.get(&("q0".to_string(), Language::En, 5)).is_some());

        cache.insert(("overflow".to_string(), Language::En, 5), vec![]);
        assert!(cache.get(&("q0".to_string(), Language::En, 5)).is_some());
        assert!(cache.get(&("q1".to_string(), Language::En, 5)).is_none());
        assert_eq!(cache.entries.len(), CACHE_CAPACITY);
    }

    #[test]
    fn test_tavily_response_mapping() {
        let json = r#"{
            "results": [
                {"title": "A", "url": "https://a", "content": "alpha", "score": 0.9},
                {"title": "B", "url": "https://b", "content": "beta", "score": 0.7}
            ],
            "answer": "ignored"
        }"#;
        let parsed: TavilyResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].url, "https://a");
    }
}
