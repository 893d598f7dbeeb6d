//! Region registry.
//!
//! Immutable snapshot of the configured regions, failover pairs and geo
//! preferences. Built and validated once at startup; everything that changes
//! at runtime lives in the health records and the routing view instead.

use crate::config::{
    EndpointConfig, FailoverPairConfig, FederationConfig, GeoPreference, RegionConfig,
    RegionStatus, ReplicationLinkConfig,
};
use crate::core::{Error, LatencyPercentiles, RegionId, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

/// A failover pair from the registry.
pub type FailoverPair = FailoverPairConfig;

/// A configured region.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Region {
    /// Region ID
    pub id: RegionId,
    /// Display name
    pub name: String,
    /// Administrative status
    pub status: RegionStatus,
    /// Reachable endpoints, preferred first
    pub endpoints: Vec<EndpointConfig>,
    /// Data-sovereignty tag
    pub sovereignty: Option<String>,
    /// Compliance tags
    pub compliance: Vec<String>,
    /// Capacity ceiling
    pub max_concurrent: u64,
    /// Load fraction at startup
    pub load: f64,
    /// Latency percentiles at startup
    pub latency: LatencyPercentiles,
    /// Routing weight
    pub weight: f64,
}

impl Region {
    fn from_config(config: &RegionConfig, default_weight: f64) -> Self {
        Self {
            id: config.id.clone(),
            name: if config.name.is_empty() {
                config.id.clone()
            } else {
                config.name.clone()
            },
            status: config.status,
            endpoints: config.endpoints.clone(),
            sovereignty: config.sovereignty.clone(),
            compliance: config.compliance.clone(),
            max_concurrent: config.capacity.max_concurrent,
            load: config.capacity.current_load,
            latency: config.latency,
            weight: config.weight.unwrap_or(default_weight),
        }
    }

    /// Check if region takes traffic at all.
    pub fn is_active(&self) -> bool {
        self.status == RegionStatus::Active
    }

    /// Check a data-residency requirement against this region's tag.
    ///
    /// No requirement matches every region; a requirement never matches an
    /// untagged region.
    pub fn satisfies(&self, requirement: Option<&str>) -> bool {
        match requirement {
            None => true,
            Some(required) => self
                .sovereignty
                .as_deref()
                .map(|tag| tag.eq_ignore_ascii_case(required))
                .unwrap_or(false),
        }
    }

    /// Endpoint used for routing decisions.
    pub fn primary_endpoint(&self) -> Option<&EndpointConfig> {
        self.endpoints.first()
    }
}

/// Immutable registry of regions.
#[derive(Debug)]
pub struct RegionRegistry {
    regions: Vec<Region>,
    index: HashMap<RegionId, usize>,
    pairs: HashMap<RegionId, FailoverPair>,
    geo_preferences: BTreeMap<String, GeoPreference>,
    replication_links: Vec<ReplicationLinkConfig>,
}

impl RegionRegistry {
    /// Build and validate a registry from configuration.
    pub fn from_config(config: &FederationConfig) -> Result<Self> {
        let default_weight = config.routing.default_weight;
        if !default_weight.is_finite() || default_weight < 0.0 {
            return Err(Error::config(format!(
                "default weight must be a non-negative number, got {}",
                default_weight
            )));
        }
        if config.health.failure_threshold == 0 || config.health.success_threshold == 0 {
            return Err(Error::config("health thresholds must be at least 1"));
        }
        let periods = [
            ("health.interval_ms", config.health.interval_ms),
            ("health.timeout_ms", config.health.timeout_ms),
            ("replication.interval_ms", config.replication.interval_ms),
            ("replication.timeout_ms", config.replication.timeout_ms),
            ("status.log_interval_ms", config.status.log_interval_ms),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, ms)| *ms == 0) {
            return Err(Error::config(format!("{} must be positive", name)));
        }
        let admission = config.routing.admission_threshold;
        if !(admission > 0.0 && admission <= 1.0) {
            return Err(Error::config(format!(
                "admission threshold must be in (0, 1], got {}",
                admission
            )));
        }

        let mut regions = Vec::with_capacity(config.regions.len());
        let mut index = HashMap::new();
        for region_config in &config.regions {
            validate_region(region_config)?;
            if index.contains_key(&region_config.id) {
                return Err(Error::config(format!("duplicate region id {}", region_config.id)));
            }
            index.insert(region_config.id.clone(), regions.len());
            regions.push(Region::from_config(region_config, default_weight));
        }

        let known = |id: &str| index.contains_key(id);

        let mut pairs = HashMap::new();
        for pair in &config.failover.pairs {
            validate_pair(pair, &known)?;
            if pairs.contains_key(&pair.primary) {
                return Err(Error::config(format!(
                    "region {} is primary in more than one failover pair",
                    pair.primary
                )));
            }
            pairs.insert(pair.primary.clone(), pair.clone());
        }

        for (bucket, preference) in &config.failover.geo_preferences {
            for id in preference.preferred.iter().chain(preference.fallback.iter()) {
                if !known(id.as_str()) {
                    return Err(Error::config(format!(
                        "geo bucket {} references undefined region {}",
                        bucket, id
                    )));
                }
            }
        }

        let mut seen_links = HashSet::new();
        for link in &config.failover.replication_links {
            for id in [&link.source, &link.target] {
                if !known(id.as_str()) {
                    return Err(Error::config(format!(
                        "replication link references undefined region {}",
                        id
                    )));
                }
            }
            if !seen_links.insert((link.source.clone(), link.target.clone())) {
                return Err(Error::config(format!(
                    "duplicate replication link {}->{}",
                    link.source, link.target
                )));
            }
        }

        info!(
            regions = regions.len(),
            pairs = pairs.len(),
            geo_buckets = config.failover.geo_preferences.len(),
            "Region registry loaded"
        );

        Ok(Self {
            regions,
            index,
            pairs,
            geo_preferences: config.failover.geo_preferences.clone(),
            replication_links: config.failover.replication_links.clone(),
        })
    }

    /// List all configured regions in configuration order.
    pub fn list_regions(&self) -> &[Region] {
        &self.regions
    }

    /// Regions with `active` status.
    pub fn active_regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(|r| r.is_active())
    }

    /// Get a region.
    pub fn get_region(&self, region_id: &str) -> Option<&Region> {
        self.index.get(region_id).map(|&i| &self.regions[i])
    }

    /// Get the failover pair whose primary is `primary_id`.
    pub fn get_failover_pair(&self, primary_id: &str) -> Option<&FailoverPair> {
        self.pairs.get(primary_id)
    }

    /// Get configured routing weight.
    pub fn get_weight(&self, region_id: &str) -> Option<f64> {
        self.get_region(region_id).map(|r| r.weight)
    }

    /// Get the preference list for a geo bucket.
    pub fn geo_preference(&self, bucket: &str) -> Option<&GeoPreference> {
        self.geo_preferences.get(bucket)
    }

    /// All configured replication links.
    pub fn replication_links(&self) -> &[ReplicationLinkConfig] {
        &self.replication_links
    }

    /// Get region count.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

fn validate_region(config: &RegionConfig) -> Result<()> {
    if config.id.trim().is_empty() {
        return Err(Error::config("region id must not be empty"));
    }
    if let Some(weight) = config.weight {
        if !weight.is_finite() || weight < 0.0 {
            return Err(Error::config(format!(
                "region {} has invalid weight {}",
                config.id, weight
            )));
        }
    }
    let load = config.capacity.current_load;
    if !(0.0..=1.0).contains(&load) {
        return Err(Error::config(format!(
            "region {} has load {} outside 0..=1",
            config.id, load
        )));
    }
    Ok(())
}

fn validate_pair(pair: &FailoverPair, known: &impl Fn(&str) -> bool) -> Result<()> {
    for id in [&pair.primary, &pair.secondary] {
        if !known(id.as_str()) {
            return Err(Error::config(format!(
                "failover pair {}->{} references undefined region {}",
                pair.primary, pair.secondary, id
            )));
        }
    }
    if pair.primary == pair.secondary {
        return Err(Error::config(format!(
            "failover pair for {} targets itself",
            pair.primary
        )));
    }

    let steps = &pair.steps;
    if steps.is_empty() {
        return Err(Error::config(format!("failover pair for {} has no steps", pair.primary)));
    }
    let in_range = steps.iter().all(|&s| (1..=100).contains(&s));
    let increasing = steps.windows(2).all(|w| w[0] < w[1]);
    if !in_range || !increasing || steps.last() != Some(&100) {
        return Err(Error::config(format!(
            "failover pair for {} must have increasing steps in 1..=100 ending at 100, got {:?}",
            pair.primary, steps
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationLinkConfig;

    fn base_config() -> FederationConfig {
        let mut config = FederationConfig::default();
        config.regions = vec![
            RegionConfig::new("us-east").with_weight(100.0).with_sovereignty("US"),
            RegionConfig::new("eu-west").with_sovereignty("EU"),
            RegionConfig::new("eu-central").with_sovereignty("EU"),
        ];
        config
    }

    #[test]
    fn test_registry_loads() {
        let mut config = base_config();
        config.failover.pairs = vec![FailoverPairConfig::new("eu-west", "eu-central")];

        let registry = RegionRegistry::from_config(&config).unwrap();
        assert_eq!(registry.region_count(), 3);
        assert_eq!(registry.get_weight("us-east"), Some(100.0));
        assert_eq!(registry.get_weight("eu-west"), Some(50.0));
        assert_eq!(
            registry.get_failover_pair("eu-west").unwrap().secondary,
            "eu-central"
        );
        assert!(registry.get_failover_pair("us-east").is_none());
    }

    #[test]
    fn test_list_preserves_order() {
        let registry = RegionRegistry::from_config(&base_config()).unwrap();
        let ids: Vec<_> = registry.list_regions().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["us-east", "eu-west", "eu-central"]);
    }

    #[test]
    fn test_undefined_pair_region_rejected() {
        let mut config = base_config();
        config.failover.pairs = vec![FailoverPairConfig::new("eu-west", "ap-south")];

        let err = RegionRegistry::from_config(&config).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("ap-south"));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = base_config();
        config.regions.push(RegionConfig::new("bad").with_weight(-1.0));
        assert!(RegionRegistry::from_config(&config).is_err());
    }

    #[test]
    fn test_runtime_settings_checked() {
        let mut config = base_config();
        config.health.interval_ms = 0;
        let err = RegionRegistry::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("health.interval_ms"));

        let mut config = base_config();
        config.routing.admission_threshold = 1.5;
        assert!(RegionRegistry::from_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_region_rejected() {
        let mut config = base_config();
        config.regions.push(RegionConfig::new("us-east"));
        assert!(RegionRegistry::from_config(&config).is_err());
    }

    #[test]
    fn test_primary_in_two_pairs_rejected() {
        let mut config = base_config();
        config.failover.pairs = vec![
            FailoverPairConfig::new("eu-west", "eu-central"),
            FailoverPairConfig::new("eu-west", "us-east"),
        ];
        assert!(RegionRegistry::from_config(&config).is_err());
    }

    #[test]
    fn test_bad_steps_rejected() {
        for steps in [vec![], vec![50, 25, 100], vec![10, 50], vec![0, 100]] {
            let mut config = base_config();
            config.failover.pairs = vec![FailoverPairConfig::new("eu-west", "eu-central")
                .gradual(steps, std::time::Duration::from_secs(1))];
            assert!(RegionRegistry::from_config(&config).is_err());
        }
    }

    #[test]
    fn test_geo_reference_checked() {
        let mut config = base_config();
        config.failover.geo_preferences.insert(
            "eu".to_string(),
            GeoPreference {
                preferred: vec!["eu-west".to_string()],
                fallback: Some("mars-1".to_string()),
            },
        );
        assert!(RegionRegistry::from_config(&config).is_err());
    }

    #[test]
    fn test_replication_link_checked() {
        let mut config = base_config();
        config.failover.replication_links = vec![ReplicationLinkConfig {
            source: "us-east".to_string(),
            target: "nowhere".to_string(),
            max_lag_ms: 100,
        }];
        assert!(RegionRegistry::from_config(&config).is_err());
    }

    #[test]
    fn test_sovereignty_match() {
        let registry = RegionRegistry::from_config(&base_config()).unwrap();
        let eu = registry.get_region("eu-west").unwrap();
        assert!(eu.satisfies(None));
        assert!(eu.satisfies(Some("EU")));
        assert!(eu.satisfies(Some("eu")));
        assert!(!eu.satisfies(Some("US")));

        let untagged = Region::from_config(&RegionConfig::new("x"), 50.0);
        assert!(!untagged.satisfies(Some("EU")));
    }

    #[test]
    fn test_active_regions() {
        let mut config = base_config();
        config.regions[1].status = RegionStatus::Inactive;
        let registry = RegionRegistry::from_config(&config).unwrap();
        assert_eq!(registry.active_regions().count(), 2);
    }
}
