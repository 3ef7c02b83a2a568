//! Common routines for handling input data.
//!
//! Every tabular input shares the same layout: a first row declaring the input template name and
//! version, a second row of column headers and then the data itself.
use anyhow::{Context, Result, bail, ensure};
use csv::StringRecord;
use derive_more::{Display, Error};
use itertools::Itertools;
use serde::de::value::StrDeserializer;
use serde::de::{Deserialize, DeserializeOwned, Deserializer, IntoDeserializer};
use std::collections::HashMap;
use std::collections::hash_map::Entry::{Occupied, Vacant};
use std::fs;
use std::hash::Hash;
use std::path::{Path, PathBuf};

pub mod batch_settings;
pub mod cost_factors;
pub mod deflators;
pub mod emission_rates;
pub mod fleet;
pub mod fuels;
pub mod general;
pub mod legacy_fleet;
pub mod safety;
pub mod vehicle_costs;

/// Label in the first cell of an input file
const TEMPLATE_NAME_LABEL: &str = "input_template_name:";

/// Label in the third cell of an input file
const TEMPLATE_VERSION_LABEL: &str = "input_template_version:";

/// The fatal kinds of error which can arise when loading input files
#[derive(Debug, Display, Error, PartialEq)]
pub enum InputError {
    /// The file declares a different template to the one expected
    #[display(
        "Expected template '{expected_name}' version {expected_version}, but file declares \
        '{found_name}' version {found_version}"
    )]
    TemplateMismatch {
        /// The template name the loader expects
        expected_name: String,
        /// The template version the loader expects
        expected_version: String,
        /// The template name found in the file
        found_name: String,
        /// The template version found in the file
        found_version: String,
    },
    /// A required column is absent
    #[display("Missing required column '{column}'")]
    MissingColumn {
        /// Name of the missing column
        column: String,
    },
    /// The input file does not exist
    #[display("File not found: {}", path.display())]
    FileNotFound {
        /// Path to the missing file
        path: PathBuf,
    },
    /// A dollar basis year is missing from the deflator table
    #[display("Dollar basis {year} not found in deflators")]
    DollarBasisMissing {
        /// The dollar basis year referenced by the input
        year: u32,
    },
}

/// The template which an input file must declare, along with the columns it must contain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Template {
    /// Template name as it appears in the first row of the file
    pub name: &'static str,
    /// Template version as it appears in the first row of the file
    pub version: &'static str,
    /// Columns which must be present (extra columns are permitted)
    pub columns: &'static [&'static str],
}

/// The contents of an input file after its header rows have been validated
#[derive(Debug)]
pub struct CsvTable {
    headers: StringRecord,
    records: Vec<StringRecord>,
}

impl CsvTable {
    /// The column headers
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter()
    }

    /// Iterate over rows of the table
    pub fn rows(&self) -> impl Iterator<Item = CsvRow<'_>> {
        self.records.iter().map(|record| CsvRow {
            headers: &self.headers,
            record,
        })
    }

    /// Deserialise every row into `T`
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.records
            .iter()
            .enumerate()
            .map(|(idx, record)| {
                record
                    .deserialize(Some(&self.headers))
                    .with_context(|| format!("Invalid data on row {}", idx + 3))
            })
            .try_collect()
    }
}

/// A single row of a [`CsvTable`], with access to values by column name
#[derive(Debug, Clone, Copy)]
pub struct CsvRow<'a> {
    headers: &'a StringRecord,
    record: &'a StringRecord,
}

impl<'a> CsvRow<'a> {
    /// Get the raw string value for a column
    pub fn get_str(&self, column: &str) -> Result<&'a str> {
        let idx = self
            .headers
            .iter()
            .position(|header| header == column)
            .with_context(|| format!("No column named '{column}'"))?;
        self.record
            .get(idx)
            .with_context(|| format!("Missing value for column '{column}'"))
    }

    /// Get a value for a column, parsed as a number
    pub fn get_f64(&self, column: &str) -> Result<f64> {
        let value = self.get_str(column)?;
        value
            .parse()
            .with_context(|| format!("Invalid number '{value}' in column '{column}'"))
    }

    /// Get a value for a column parsed as a year
    pub fn get_u32(&self, column: &str) -> Result<u32> {
        let value = self.get_str(column)?;
        value
            .parse()
            .with_context(|| format!("Invalid integer '{value}' in column '{column}'"))
    }

    /// Get a numeric value, treating an absent column or an empty cell as zero
    pub fn get_f64_or_zero(&self, column: &str) -> Result<f64> {
        match self.headers.iter().position(|header| header == column) {
            None => Ok(0.0),
            Some(idx) => match self.record.get(idx) {
                None | Some("") => Ok(0.0),
                Some(_) => self.get_f64(column),
            },
        }
    }
}

/// Format an error message to include the file path. To be used with `anyhow::Context`.
pub fn input_err_msg<P: AsRef<Path>>(file_path: P) -> String {
    format!("Error reading {}", file_path.as_ref().display())
}

/// Read an input file, checking its template header and required columns.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
/// * `template` - The template the file must declare
pub fn read_template_csv(file_path: &Path, template: &Template) -> Result<CsvTable> {
    read_template_csv_inner(file_path, template).with_context(|| input_err_msg(file_path))
}

fn read_template_csv_inner(file_path: &Path, template: &Template) -> Result<CsvTable> {
    if !file_path.is_file() {
        Err(InputError::FileNotFound {
            path: file_path.to_path_buf(),
        })?;
    }

    let contents = fs::read_to_string(file_path)?;
    let contents = contents.trim_start_matches('\u{feff}');
    let (first_line, rest) = contents.split_once('\n').unwrap_or((contents, ""));
    check_template_header(first_line.trim_end_matches('\r'), template)?;

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(rest.as_bytes());
    let headers = reader.headers()?.clone();
    for column in template.columns {
        if !headers.iter().any(|header| header == *column) {
            Err(InputError::MissingColumn {
                column: (*column).to_string(),
            })?;
        }
    }

    let records: Vec<StringRecord> = reader.records().try_collect()?;
    ensure!(!records.is_empty(), "CSV file cannot be empty");

    Ok(CsvTable { headers, records })
}

/// Check the first row of a file against the expected template name and version
fn check_template_header(line: &str, template: &Template) -> Result<()> {
    let cells = line.split(',').map(str::trim).collect_vec();
    let cell = |idx: usize| cells.get(idx).copied().unwrap_or_default();
    ensure!(
        cell(0) == TEMPLATE_NAME_LABEL && cell(2) == TEMPLATE_VERSION_LABEL,
        "First row must be of the form '{TEMPLATE_NAME_LABEL},<name>,{TEMPLATE_VERSION_LABEL},<version>'"
    );

    let (found_name, found_version) = (cell(1), cell(3));
    if found_name != template.name || found_version != template.version {
        Err(InputError::TemplateMismatch {
            expected_name: template.name.to_string(),
            expected_version: template.version.to_string(),
            found_name: found_name.to_string(),
            found_version: found_version.to_string(),
        })?;
    }

    Ok(())
}

/// Read the template name declared in the first row of an input file.
///
/// Used where a table may be supplied in more than one shape.
pub fn peek_template_name(file_path: &Path) -> Result<String> {
    if !file_path.is_file() {
        Err(InputError::FileNotFound {
            path: file_path.to_path_buf(),
        })
        .with_context(|| input_err_msg(file_path))?;
    }

    let contents = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    let first_line = contents
        .trim_start_matches('\u{feff}')
        .lines()
        .next()
        .unwrap_or_default();
    let name = first_line.split(',').nth(1).unwrap_or_default().trim();
    ensure!(
        !name.is_empty(),
        "{}: missing input template name",
        file_path.display()
    );

    Ok(name.to_string())
}

/// Parse a single cell into a labelled enum (or any type deserialisable from a string)
pub fn parse_label<T: DeserializeOwned>(value: &str) -> Result<T> {
    let deserializer: StrDeserializer<serde::de::value::Error> = value.into_deserializer();
    T::deserialize(deserializer).with_context(|| format!("Invalid value '{value}'"))
}

/// Read a template CSV file and deserialise each data row into `T`
pub fn read_csv<T: DeserializeOwned>(file_path: &Path, template: &Template) -> Result<Vec<T>> {
    let table = read_template_csv(file_path, template)?;
    table
        .deserialize()
        .with_context(|| input_err_msg(file_path))
}

/// Parse a TOML file at the specified path.
///
/// # Arguments
///
/// * `file_path` - Path to the TOML file
///
/// # Returns
///
/// * The deserialised TOML data or an error if the file could not be read or parsed.
pub fn read_toml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let toml_str = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    let toml_data = toml::from_str(&toml_str).with_context(|| input_err_msg(file_path))?;
    Ok(toml_data)
}

/// Read an f64, checking that it is between 0 and 1
pub fn deserialise_proportion<'de, D>(deserialiser: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Deserialize::deserialize(deserialiser)?;
    if !(0.0..=1.0).contains(&value) {
        Err(serde::de::Error::custom("Value is not between 0 and 1"))?;
    }

    Ok(value)
}

/// Read a boolean flag written as TRUE/FALSE, true/false, yes/no or 1/0
pub fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => bail!("Invalid boolean value: {other}"),
    }
}

/// Check whether an iterator contains values that are sorted and unique
pub fn is_sorted_and_unique<T, I>(iter: I) -> bool
where
    T: PartialOrd + Clone,
    I: IntoIterator<Item = T>,
{
    iter.into_iter().tuple_windows().all(|(a, b)| a < b)
}

/// Insert a key-value pair into a map, returning an error if the key is already present
pub fn try_insert<K, V>(map: &mut HashMap<K, V>, key: K, value: V) -> Result<()>
where
    K: Eq + Hash + std::fmt::Debug,
{
    match map.entry(key) {
        Vacant(entry) => {
            entry.insert(value);
            Ok(())
        }
        Occupied(entry) => bail!("Duplicate entry for key {:?}", entry.key()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, write_template_csv};
    use rstest::rstest;
    use serde::Deserialize;
    use tempfile::tempdir;

    const TEST_TEMPLATE: Template = Template {
        name: "test_table",
        version: "0.1",
        columns: &["id", "value"],
    };

    #[derive(Debug, Deserialize, PartialEq)]
    struct Record {
        id: String,
        value: f64,
    }

    #[test]
    fn test_read_csv_valid() {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "test.csv",
            "test_table",
            "0.1",
            "id,value,notes\na,1.0,some note\nb, 2.5 ,",
        );

        let records: Vec<Record> = read_csv(&file_path, &TEST_TEMPLATE).unwrap();
        assert_eq!(
            records,
            [
                Record {
                    id: "a".into(),
                    value: 1.0
                },
                Record {
                    id: "b".into(),
                    value: 2.5
                }
            ]
        );
    }

    #[rstest]
    #[case("other_table", "0.1")]
    #[case("test_table", "0.2")]
    #[case("test_table", "0.10")]
    fn test_read_csv_template_mismatch(#[case] name: &str, #[case] version: &str) {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(dir.path(), "test.csv", name, version, "id,value\na,1");

        let err = read_template_csv(&file_path, &TEST_TEMPLATE).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InputError>(),
            Some(InputError::TemplateMismatch { .. })
        ));
    }

    #[test]
    fn test_read_csv_missing_column() {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(dir.path(), "test.csv", "test_table", "0.1", "id\na");

        let err = read_template_csv(&file_path, &TEST_TEMPLATE).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InputError>(),
            Some(&InputError::MissingColumn {
                column: "value".into()
            })
        );
    }

    #[test]
    fn test_read_csv_file_not_found() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("missing.csv");

        let err = read_template_csv(&file_path, &TEST_TEMPLATE).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InputError>(),
            Some(InputError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_read_csv_bad_first_row() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.csv");
        fs::write(&file_path, "id,value\na,1\n").unwrap();

        assert!(read_template_csv(&file_path, &TEST_TEMPLATE).is_err());
    }

    #[test]
    fn test_csv_row_accessors() {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "test.csv",
            "test_table",
            "0.1",
            "id,value,year,empty\na,1.5,2020,",
        );
        let table = read_template_csv(&file_path, &TEST_TEMPLATE).unwrap();
        let row = table.rows().next().unwrap();
        assert_eq!(row.get_str("id").unwrap(), "a");
        assert_eq!(row.get_f64("value").unwrap(), 1.5);
        assert_eq!(row.get_u32("year").unwrap(), 2020);
        assert_eq!(row.get_f64_or_zero("empty").unwrap(), 0.0);
        assert_eq!(row.get_f64_or_zero("not_a_column").unwrap(), 0.0);
        assert_error!(row.get_str("not_a_column"), "No column named 'not_a_column'");
    }

    #[test]
    fn test_peek_template_name() {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(dir.path(), "test.csv", "test_table", "0.3", "id\na");
        assert_eq!(peek_template_name(&file_path).unwrap(), "test_table");
        assert!(peek_template_name(&dir.path().join("missing.csv")).is_err());
    }

    #[test]
    fn test_parse_label() {
        use crate::fleet::BodyStyle;
        assert_eq!(parse_label::<BodyStyle>("cuv_suv").unwrap(), BodyStyle::CuvSuv);
        assert_error!(parse_label::<BodyStyle>("coupe"), "Invalid value 'coupe'");
    }

    #[rstest]
    #[case("TRUE", true)]
    #[case("false", false)]
    #[case("1", true)]
    #[case(" no ", false)]
    fn test_parse_bool(#[case] input: &str, #[case] expected: bool) {
        assert_eq!(parse_bool(input).unwrap(), expected);
    }

    #[test]
    fn test_is_sorted_and_unique() {
        assert!(is_sorted_and_unique([1, 2, 3]));
        assert!(is_sorted_and_unique::<u32, _>([]));
        assert!(!is_sorted_and_unique([1, 1]));
        assert!(!is_sorted_and_unique([2, 1]));
    }
}
