//! Code for reading the implicit price deflator and CPI deflator CSV files.
use super::*;
use crate::deflators::Deflators;
use serde::Deserialize;

/// Template for the implicit price deflators file
pub const IP_DEFLATORS_TEMPLATE: Template = Template {
    name: "ip_deflators",
    version: "0.1",
    columns: &["calendar_year", "adjustment_factor"],
};

/// Template for the consumer price index deflators file
pub const CPI_DEFLATORS_TEMPLATE: Template = Template {
    name: "cpi_deflators",
    version: "0.1",
    columns: &["calendar_year", "adjustment_factor"],
};

#[derive(Debug, Deserialize, PartialEq)]
struct DeflatorRaw {
    calendar_year: u32,
    adjustment_factor: f64,
}

/// Read a deflators file.
///
/// # Arguments
///
/// * `file_path` - Path to the CSV file
/// * `template` - Either [`IP_DEFLATORS_TEMPLATE`] or [`CPI_DEFLATORS_TEMPLATE`]
pub fn read_deflators(file_path: &Path, template: &Template) -> Result<Deflators> {
    let deflators_csv = read_csv::<DeflatorRaw>(file_path, template)?;
    read_deflators_from_iter(deflators_csv.into_iter()).with_context(|| input_err_msg(file_path))
}

fn read_deflators_from_iter<I>(iter: I) -> Result<Deflators>
where
    I: Iterator<Item = DeflatorRaw>,
{
    let mut factors = HashMap::new();
    for row in iter {
        try_insert(&mut factors, row.calendar_year, row.adjustment_factor)
            .with_context(|| format!("Year {} specified more than once", row.calendar_year))?;
    }

    Deflators::new(factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, write_template_csv};
    use tempfile::tempdir;

    #[test]
    fn test_read_deflators() {
        let dir = tempdir().unwrap();
        let file_path = write_template_csv(
            dir.path(),
            "deflators.csv",
            "ip_deflators",
            "0.1",
            "calendar_year,price_deflator,adjustment_factor\n2019,110,0.98\n2020,112,1.0",
        );
        let deflators = read_deflators(&file_path, &IP_DEFLATORS_TEMPLATE).unwrap();
        assert_eq!(deflators.analysis_basis(), 2020);
    }

    #[test]
    fn test_read_deflators_duplicate_year() {
        let rows = [
            DeflatorRaw {
                calendar_year: 2020,
                adjustment_factor: 1.0,
            },
            DeflatorRaw {
                calendar_year: 2020,
                adjustment_factor: 0.9,
            },
        ];
        assert_error!(
            read_deflators_from_iter(rows.into_iter()),
            "Year 2020 specified more than once"
        );
    }
}
