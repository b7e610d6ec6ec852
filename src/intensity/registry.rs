//! Statically linked providers, selected by country code.

use super::CarbonIntensityProvider;
use super::fixed::FixedIntensity;
use super::national_grid::{self, NationalGrid};
use crate::config::LeafConfig;
use crate::error::{Error, Result};
use log::info;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionInfo {
    pub id: &'static str,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountryInfo {
    pub code: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
    pub regions: &'static [RegionInfo],
}

pub const COUNTRIES: &[CountryInfo] = &[CountryInfo {
    code: "GB",
    name: "Great Britain",
    provider: "national-grid",
    regions: national_grid::REGIONS,
}];

/// Look up a supported country. `UK` is accepted as an alias for `GB`.
pub fn country(code: &str) -> Option<&'static CountryInfo> {
    let code = code.trim();
    let code = if code.eq_ignore_ascii_case("UK") { "GB" } else { code };
    COUNTRIES.iter().find(|c| c.code.eq_ignore_ascii_case(code))
}

/// Build the provider for the configured region. Fixed values, when
/// configured, take precedence over any network provider.
pub fn for_config(config: &LeafConfig) -> Result<Box<dyn CarbonIntensityProvider>> {
    if let Some(fixed) = &config.provider.fixed {
        info!("Using fixed carbon intensity of {} gCO2/kWh", fixed.now);
        return Ok(Box::new(FixedIntensity::new(
            fixed.now,
            fixed.next.unwrap_or(fixed.now),
            fixed.later.unwrap_or(fixed.now),
            fixed.valid_minutes,
        )));
    }

    if config.region.region_id.trim().is_empty() {
        return Err(Error::Config("region.region_id must not be empty".to_string()));
    }

    let country = country(&config.region.country)
        .ok_or_else(|| Error::UnsupportedRegion(config.region.country.clone()))?;

    match country.provider {
        "national-grid" => {
            let timeout = Duration::from_secs(config.provider.timeout_secs.max(1));
            info!(
                "Using National Grid intensity data for region {}",
                config.region.region_id
            );
            Ok(Box::new(NationalGrid::new(timeout)?))
        }
        other => Err(Error::Other(format!("unknown provider '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixedIntensityConfig;

    #[test]
    fn test_country_lookup() {
        assert_eq!(country("GB").map(|c| c.code), Some("GB"));
        assert_eq!(country("gb").map(|c| c.code), Some("GB"));
        assert_eq!(country("UK").map(|c| c.code), Some("GB"));
        assert!(country("DE").is_none());
    }

    #[test]
    fn test_gb_regions_are_numbered() {
        let gb = country("GB").unwrap();
        assert_eq!(gb.regions.len(), 17);
        for (i, region) in gb.regions.iter().enumerate() {
            assert_eq!(region.id, (i + 1).to_string());
        }
    }

    #[test]
    fn test_fixed_provider_wins() {
        let mut config = LeafConfig::default();
        config.region.country = "DE".to_string();
        config.provider.fixed = Some(FixedIntensityConfig {
            now: 300,
            next: None,
            later: Some(100),
            valid_minutes: 30,
        });
        let provider = for_config(&config).unwrap();
        assert_eq!(provider.name(), "fixed");

        let snapshot = provider.fetch(&config.region.region_id);
        assert_eq!((snapshot.now, snapshot.next, snapshot.later), (300, 300, 100));
    }

    #[test]
    fn test_unsupported_country() {
        let mut config = LeafConfig::default();
        config.region.country = "FR".to_string();
        match for_config(&config) {
            Err(Error::UnsupportedRegion(c)) => assert_eq!(c, "FR"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(p) => panic!("unexpected provider {}", p.name()),
        }
    }

    #[test]
    fn test_empty_region_rejected() {
        let mut config = LeafConfig::default();
        config.region.region_id = "  ".to_string();
        assert!(matches!(for_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_default_config_uses_national_grid() {
        let provider = for_config(&LeafConfig::default()).unwrap();
        assert_eq!(provider.name(), "national-grid");
    }
}
