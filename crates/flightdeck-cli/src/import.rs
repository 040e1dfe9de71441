//! CSV import of discovered sources.
//!
//! Expected header: `name,url` followed by any of `tier`, `region`,
//! `country`, `iata_code`, `icao_code`, `ats_type`, `discovered_via`.

use std::io::Read;

use anyhow::{Context, Result, bail};
use flightdeck_core::ats::AtsType;
use flightdeck_core::source::{NewSource, Region, Tier};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct SourceRow {
    name: String,
    url: String,
    #[serde(default)]
    tier: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    iata_code: Option<String>,
    #[serde(default)]
    icao_code: Option<String>,
    #[serde(default)]
    ats_type: Option<String>,
    #[serde(default)]
    discovered_via: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl SourceRow {
    fn into_new_source(self, default_via: &str) -> Result<NewSource> {
        let name = self.name.trim();
        let url = self.url.trim();
        if name.is_empty() || url.is_empty() {
            bail!("name and url are required");
        }

        let mut source = NewSource::new(name, url).with_discovered_via(
            non_empty(self.discovered_via).unwrap_or_else(|| default_via.to_string()),
        );
        if let Some(tier) = non_empty(self.tier) {
            source = source.with_tier(tier.parse::<Tier>().map_err(anyhow::Error::msg)?);
        }
        if let Some(region) = non_empty(self.region) {
            source = source.with_region(region.parse::<Region>().map_err(anyhow::Error::msg)?);
        }
        if let Some(country) = non_empty(self.country) {
            source = source.with_country(country);
        }
        if let Some(ats) = non_empty(self.ats_type) {
            source = source.with_ats_type(ats.parse::<AtsType>().map_err(anyhow::Error::msg)?);
        }
        let iata = non_empty(self.iata_code).map(|c| c.to_uppercase());
        let icao = non_empty(self.icao_code).map(|c| c.to_uppercase());
        if iata.is_some() || icao.is_some() {
            source = source.with_codes(iata, icao);
        }
        Ok(source)
    }
}

/// Parse every row, failing on the first bad one with its line number.
pub fn read_sources<R: Read>(reader: R, default_via: &str) -> Result<Vec<NewSource>> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut sources = Vec::new();
    for (index, row) in csv.deserialize::<SourceRow>().enumerate() {
        // Header is line 1.
        let line = index + 2;
        let row = row.with_context(|| format!("Invalid CSV row at line {line}"))?;
        let source = row
            .into_new_source(default_via)
            .with_context(|| format!("Invalid source at line {line}"))?;
        sources.push(source);
    }
    Ok(sources)
}
