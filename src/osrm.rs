//! OSRM HTTP adapter for travel tables.

use serde::Deserialize;

use crate::error::ServiceError;
use crate::traits::{RoutingService, ServiceTable};

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn table_url(&self, sources: &[(f64, f64)], destinations: &[(f64, f64)]) -> String {
        let coords = sources
            .iter()
            .chain(destinations.iter())
            .map(|(lat, lon)| format!("{:.6},{:.6}", lon, lat))
            .collect::<Vec<_>>()
            .join(";");
        let source_idx = (0..sources.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(";");
        let dest_idx = (sources.len()..sources.len() + destinations.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(";");

        format!(
            "{}/table/v1/{}/{}?annotations=duration,distance&sources={}&destinations={}",
            self.config.base_url, self.config.profile, coords, source_idx, dest_idx
        )
    }
}

impl RoutingService for OsrmClient {
    fn table(
        &self,
        sources: &[(f64, f64)],
        destinations: &[(f64, f64)],
    ) -> Result<ServiceTable, ServiceError> {
        if sources.is_empty() || destinations.is_empty() {
            return Err(ServiceError::Empty);
        }

        let url = self.table_url(sources, destinations);
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| ServiceError::Unavailable(err.to_string()))?;
        let body: OsrmTableResponse = response
            .json()
            .map_err(|err| ServiceError::Malformed(err.to_string()))?;

        parse_table(body)
    }
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: Option<String>,
    durations: Option<Vec<Vec<f64>>>,
    distances: Option<Vec<Vec<f64>>>,
}

fn parse_table(body: OsrmTableResponse) -> Result<ServiceTable, ServiceError> {
    if let Some(code) = &body.code {
        if code != "Ok" {
            return Err(ServiceError::Unavailable(format!("OSRM code {code}")));
        }
    }
    let durations = body
        .durations
        .ok_or_else(|| ServiceError::Malformed("missing durations".into()))?;
    let distances = body
        .distances
        .ok_or_else(|| ServiceError::Malformed("missing distances".into()))?;
    if durations.is_empty() || distances.is_empty() {
        return Err(ServiceError::Empty);
    }
    if durations.len() != distances.len() {
        return Err(ServiceError::Malformed(
            "duration and distance row counts differ".into(),
        ));
    }
    Ok(ServiceTable {
        distances,
        durations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_url_uses_lon_lat_and_index_lists() {
        let client = OsrmClient::new(OsrmConfig::default()).unwrap();
        let url = client.table_url(&[(3.4516, -76.532)], &[(3.46, -76.51), (3.43, -76.55)]);
        assert!(url.contains("/table/v1/car/-76.532000,3.451600;-76.510000,3.460000;-76.550000,3.430000"));
        assert!(url.contains("annotations=duration,distance"));
        assert!(url.contains("sources=0"));
        assert!(url.contains("destinations=1;2"));
    }

    #[test]
    fn non_ok_code_is_unavailable_not_empty() {
        let body: OsrmTableResponse =
            serde_json::from_str(r#"{"code": "NoTable", "durations": [[0.0]], "distances": [[0.0]]}"#)
                .unwrap();
        assert!(matches!(
            parse_table(body),
            Err(ServiceError::Unavailable(_))
        ));
    }

    #[test]
    fn missing_annotations_are_malformed() {
        let body: OsrmTableResponse =
            serde_json::from_str(r#"{"code": "Ok", "durations": [[0.0, 60.0]]}"#).unwrap();
        assert!(matches!(parse_table(body), Err(ServiceError::Malformed(_))));
    }

    #[test]
    fn well_formed_table_parses() {
        let body: OsrmTableResponse = serde_json::from_str(
            r#"{"code": "Ok",
                "durations": [[0.0, 60.0], [55.0, 0.0]],
                "distances": [[0.0, 400.0], [380.0, 0.0]]}"#,
        )
        .unwrap();
        let table = parse_table(body).unwrap();
        assert_eq!(table.durations[0][1], 60.0);
        assert_eq!(table.distances[1][0], 380.0);
    }
}
