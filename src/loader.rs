use crate::error::Result;
use crate::types::{Observation, RawRow};
use crate::util::{parse_date_dayfirst, parse_f64_safe, parse_text};
use chrono::{Datelike, NaiveDate};
use csv::ReaderBuilder;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub total_rows: usize,
    pub loaded_rows: usize,
    pub parse_errors: usize,
    pub duplicates_replaced: usize,
    pub locations: usize,
}

/// Every observation of the file, sorted by (location, date) with one row
/// per key. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    rows: Vec<Observation>,
}

impl Dataset {
    /// Build from rows in any order. A later row with the same
    /// (location, date) replaces an earlier one.
    pub fn from_observations(rows: Vec<Observation>) -> (Self, usize) {
        let mut keyed: BTreeMap<(String, NaiveDate), Observation> = BTreeMap::new();
        let mut duplicates = 0usize;
        for obs in rows {
            let key = (obs.location.clone(), obs.date);
            if keyed.insert(key, obs).is_some() {
                duplicates += 1;
            }
        }
        let rows = keyed.into_values().collect();
        (Self { rows }, duplicates)
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn locations(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for r in &self.rows {
            if out.last() != Some(&r.location.as_str()) {
                out.push(r.location.as_str());
            }
        }
        out
    }

    pub fn has_location(&self, location: &str) -> bool {
        !self.country_series(location).is_empty()
    }

    /// All rows of one location, ordered by date.
    pub fn country_series(&self, location: &str) -> &[Observation] {
        // Rows are sorted by location first, so a location is one run.
        let start = self
            .rows
            .partition_point(|r| r.location.as_str() < location);
        let end = self
            .rows
            .partition_point(|r| r.location.as_str() <= location);
        &self.rows[start..end]
    }

    pub fn years_for(&self, location: &str) -> Vec<i32> {
        self.country_series(location)
            .iter()
            .map(|r| r.year)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn country_year_slice(&self, location: &str, year: i32) -> &[Observation] {
        let series = self.country_series(location);
        let start = series.partition_point(|r| r.year < year);
        let end = series.partition_point(|r| r.year <= year);
        &series[start..end]
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.rows.iter().map(|r| r.date).min()?;
        let max = self.rows.iter().map(|r| r.date).max()?;
        Some((min, max))
    }
}

fn to_observation(row: RawRow) -> Option<Observation> {
    let location = parse_text(row.location.as_deref())?;
    let date = parse_date_dayfirst(row.date.as_deref())?;
    Some(Observation {
        location,
        year: date.year(),
        date,
        iso_code: parse_text(row.iso_code.as_deref()),
        new_cases: parse_f64_safe(row.new_cases.as_deref()),
        total_cases: parse_f64_safe(row.total_cases.as_deref()),
        total_deaths: parse_f64_safe(row.total_deaths.as_deref()),
        new_deaths: parse_f64_safe(row.new_deaths.as_deref()),
        total_vaccinations: parse_f64_safe(row.total_vaccinations.as_deref()),
        total_tests: parse_f64_safe(row.total_tests.as_deref()),
        population: parse_f64_safe(row.population.as_deref()),
        gdp_per_capita: parse_f64_safe(row.gdp_per_capita.as_deref()),
        human_development_index: parse_f64_safe(row.human_development_index.as_deref()),
        new_recovered: parse_f64_safe(row.new_recovered.as_deref()),
        total_recovered: parse_f64_safe(row.total_recovered.as_deref()),
    })
}

/// Read observations from any CSV source with a header row.
pub fn read_observations<R: Read>(reader: R) -> Result<(Dataset, LoadReport)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut total_rows = 0usize;
    let mut parse_errors = 0usize;
    let mut prelim: Vec<Observation> = Vec::new();

    for result in rdr.deserialize::<RawRow>() {
        total_rows += 1;
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                log::debug!("Skipping unreadable row {}: {}", total_rows, e);
                parse_errors += 1;
                continue;
            }
        };
        match to_observation(row) {
            Some(obs) => prelim.push(obs),
            None => parse_errors += 1,
        }
    }

    let (dataset, duplicates_replaced) = Dataset::from_observations(prelim);
    let report = LoadReport {
        total_rows,
        loaded_rows: dataset.row_count(),
        parse_errors,
        duplicates_replaced,
        locations: dataset.locations().len(),
    };
    if parse_errors > 0 {
        log::warn!(
            "{} of {} rows skipped (missing location or unparseable date)",
            parse_errors,
            total_rows
        );
    }
    Ok((dataset, report))
}

/// Load and clean the CSV at `path`.
pub fn load_observations(path: &Path) -> Result<(Dataset, LoadReport)> {
    log::info!("Loading observations from {}", path.display());
    let file = std::fs::File::open(path)?;
    let (dataset, report) = read_observations(file)?;
    log::info!(
        "Loaded {} rows for {} locations ({} skipped, {} duplicates replaced)",
        report.loaded_rows,
        report.locations,
        report.parse_errors,
        report.duplicates_replaced
    );
    Ok((dataset, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CSV: &str = "\
iso_code,continent,location,date,total_cases,new_cases,total_deaths,new_deaths,total_tests,total_vaccinations,population,gdp_per_capita,human_development_index
IND,Asia,India,2021-01-02,100,10,5,1,1000,,1380004385,6426.674,0.645
IND,Asia,India,01/01/2021,90,9,4,0,900,,1380004385,6426.674,0.645
IND,Asia,India,2020-12-31,81,8,4,0,800,,1380004385,6426.674,0.645
FRA,Europe,France,2021-01-01,2000,100,50,5,,10,67391582,38605.671,0.901
,Europe,,2021-01-01,1,1,1,1,,,1,1,1
FRA,Europe,France,not-a-date,1,1,1,1,,,1,1,1
FRA,Europe,France,2021-01-01,2100,200,55,5,,12,67391582,38605.671,0.901
";

    #[test]
    fn loads_sorts_and_dedups() {
        let (ds, report) = read_observations(CSV.as_bytes()).unwrap();
        assert_eq!(report.total_rows, 7);
        assert_eq!(report.parse_errors, 2);
        assert_eq!(report.duplicates_replaced, 1);
        assert_eq!(report.loaded_rows, 4);
        assert_eq!(report.locations, 2);
        assert_eq!(ds.locations(), vec!["France", "India"]);

        // Later duplicate wins.
        let france = ds.country_series("France");
        assert_eq!(france.len(), 1);
        assert_eq!(france[0].total_cases, Some(2100.0));
        assert_eq!(france[0].total_tests, None);
    }

    #[test]
    fn derives_year_and_slices_by_year() {
        let (ds, _) = read_observations(CSV.as_bytes()).unwrap();
        assert_eq!(ds.years_for("India"), vec![2020, 2021]);

        let slice = ds.country_year_slice("India", 2021);
        let dates: Vec<_> = slice.iter().map(|r| r.date.to_string()).collect();
        assert_eq!(dates, vec!["2021-01-01", "2021-01-02"]);
        assert!(ds.country_year_slice("India", 2019).is_empty());
        assert!(ds.country_series("Atlantis").is_empty());
        assert!(!ds.has_location("Atlantis"));
    }

    #[test]
    fn recovered_columns_are_optional() {
        let (ds, _) = read_observations(CSV.as_bytes()).unwrap();
        assert!(ds.rows().iter().all(|r| r.total_recovered.is_none()));

        let with_recovered = "location,date,total_cases,total_recovered\nChile,2021-05-01,10,4\n";
        let (ds, _) = read_observations(with_recovered.as_bytes()).unwrap();
        assert_eq!(ds.rows()[0].total_recovered, Some(4.0));
    }

    #[test]
    fn loads_from_disk_and_reports_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();
        let (ds, _) = load_observations(file.path()).unwrap();
        assert_eq!(ds.row_count(), 4);
        assert_eq!(
            ds.date_range().map(|(a, b)| (a.to_string(), b.to_string())),
            Some(("2020-12-31".to_string(), "2021-01-02".to_string()))
        );

        let missing = load_observations(Path::new("/definitely/not/here.csv"));
        assert!(matches!(missing, Err(crate::error::DashboardError::Io(_))));
    }
}
