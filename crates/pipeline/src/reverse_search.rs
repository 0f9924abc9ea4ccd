//! Reverse-Image-Search Normalizer (C10, SPEC_FULL.md §4.10).
//!
//! No bundled driver calls an actual search engine — `NullReverseSearchDriver`
//! stands in, the same "no-op collaborator behind a trait seam" posture as
//! `common/src/state_store_client.rs`'s default client.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::model::{ReverseImageResult, ReverseSearchHit};

#[derive(Debug, Clone)]
pub struct ReverseSearchQuery {
    pub image_id: String,
    pub engines: Vec<String>,
}

/// One engine's raw, unnormalized hit before domain extraction / ranking.
#[derive(Debug, Clone)]
pub struct RawHit {
    pub engine: String,
    pub url: String,
    pub verified: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReverseSearchRaw {
    pub hits: Vec<RawHit>,
}

#[async_trait]
pub trait ReverseSearchDriver: Send + Sync {
    async fn search(&self, face_crop: &[u8], query: &ReverseSearchQuery) -> anyhow::Result<ReverseSearchRaw>;
}

/// Default driver: no external search engines are wired up. Every query
/// reports zero hits rather than failing, so a batch with reverse search
/// "enabled" but no driver configured still produces a well-formed result.
pub struct NullReverseSearchDriver;

#[async_trait]
impl ReverseSearchDriver for NullReverseSearchDriver {
    async fn search(&self, _face_crop: &[u8], _query: &ReverseSearchQuery) -> anyhow::Result<ReverseSearchRaw> {
        Ok(ReverseSearchRaw::default())
    }
}

fn domain_of(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or(url)
        .to_string()
}

fn strength_score(verified_ratio: f64, engine_count: usize, domain_count: usize) -> f64 {
    0.5 * verified_ratio + 0.25 * (engine_count as f64 / 4.0).min(1.0) + 0.25 * (domain_count as f64 / 25.0).min(1.0)
}

/// Run the driver for one image and normalize its output. `disabled` short-
/// circuits entirely, returning the `disabled_for` sentinel without invoking
/// the driver (§4.10 — reverse search can be turned off batch-wide).
pub async fn search(
    driver: &dyn ReverseSearchDriver,
    face_crop: &[u8],
    query: &ReverseSearchQuery,
    disabled: bool,
) -> ReverseImageResult {
    if disabled {
        return ReverseImageResult::disabled_for(query.image_id.clone());
    }

    let raw = match driver.search(face_crop, query).await {
        Ok(raw) => raw,
        Err(e) => {
            return ReverseImageResult {
                image_id: query.image_id.clone(),
                engines: Vec::new(),
                total_hits: 0,
                unique_domains: 0,
                hits: Vec::new(),
                verified_ratio: 0.0,
                strength_score: None,
                disabled: false,
                error: Some(e.to_string()),
            };
        }
    };

    let mut engines: Vec<String> = raw.hits.iter().map(|h| h.engine.clone()).collect();
    engines.sort();
    engines.dedup();

    let mut domains = HashSet::new();
    let mut verified_count = 0usize;
    let hits: Vec<ReverseSearchHit> = raw
        .hits
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let domain = domain_of(&h.url);
            domains.insert(domain.clone());
            if h.verified {
                verified_count += 1;
            }
            ReverseSearchHit {
                engine: h.engine.clone(),
                url: h.url.clone(),
                domain,
                verified: h.verified,
                rank: i,
            }
        })
        .collect();

    let total_hits = hits.len();
    let verified_ratio = if total_hits > 0 { verified_count as f64 / total_hits as f64 } else { 0.0 };
    let unique_domains = domains.len();

    ReverseImageResult {
        image_id: query.image_id.clone(),
        engines,
        total_hits,
        unique_domains,
        hits,
        verified_ratio,
        strength_score: Some(strength_score(verified_ratio, engines.len(), unique_domains)),
        disabled: false,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDriver(Vec<RawHit>);

    #[async_trait]
    impl ReverseSearchDriver for FixedDriver {
        async fn search(&self, _face_crop: &[u8], _query: &ReverseSearchQuery) -> anyhow::Result<ReverseSearchRaw> {
            Ok(ReverseSearchRaw { hits: self.0.clone() })
        }
    }

    #[tokio::test]
    async fn disabled_short_circuits_without_calling_driver() {
        let driver = NullReverseSearchDriver;
        let query = ReverseSearchQuery { image_id: "img0".to_string(), engines: vec![] };
        let result = search(&driver, &[], &query, true).await;
        assert!(result.disabled);
        assert!(result.strength_score.is_none());
    }

    #[tokio::test]
    async fn null_driver_reports_zero_hits_when_enabled() {
        let driver = NullReverseSearchDriver;
        let query = ReverseSearchQuery { image_id: "img0".to_string(), engines: vec![] };
        let result = search(&driver, &[], &query, false).await;
        assert!(!result.disabled);
        assert_eq!(result.total_hits, 0);
        assert_eq!(result.strength_score, Some(0.0));
    }

    #[tokio::test]
    async fn hits_are_normalized_with_domains_and_ranks() {
        let driver = FixedDriver(vec![
            RawHit { engine: "engineA".to_string(), url: "https://example.com/a".to_string(), verified: true },
            RawHit { engine: "engineB".to_string(), url: "https://other.org/b".to_string(), verified: false },
        ]);
        let query = ReverseSearchQuery { image_id: "img0".to_string(), engines: vec![] };
        let result = search(&driver, &[], &query, false).await;
        assert_eq!(result.total_hits, 2);
        assert_eq!(result.unique_domains, 2);
        assert_eq!(result.hits[0].domain, "example.com");
        assert_eq!(result.hits[1].rank, 1);
        assert!((result.verified_ratio - 0.5).abs() < 1e-9);
    }
}
