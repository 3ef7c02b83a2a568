//! Resolution rules shared by the rate tables.
//!
//! Tables indexed by calendar year are densified at load time by linear interpolation between the
//! provided years and lookups outside the provided range are clamped to the nearest boundary.
//! Tables indexed by start year select the greatest start year not after the query year.
use anyhow::{Result, ensure};
use log::trace;
use std::collections::BTreeMap;

/// A value which can be linearly interpolated
pub trait Interpolate: Clone {
    /// Interpolate between `lower` (at `t == 0`) and `upper` (at `t == 1`)
    fn lerp(lower: &Self, upper: &Self, t: f64) -> Self;
}

impl Interpolate for f64 {
    fn lerp(lower: &Self, upper: &Self, t: f64) -> Self {
        lower + (upper - lower) * t
    }
}

impl Interpolate for Vec<f64> {
    fn lerp(lower: &Self, upper: &Self, t: f64) -> Self {
        lower
            .iter()
            .zip(upper)
            .map(|(lower, upper)| f64::lerp(lower, upper, t))
            .collect()
    }
}

/// Values for every calendar year between the first and last provided year
#[derive(Debug, Clone, PartialEq)]
pub struct YearSeries<V> {
    values: BTreeMap<u32, V>,
}

impl<V: Interpolate> YearSeries<V> {
    /// Create a dense series from values for a subset of years.
    ///
    /// Years missing between two provided years are filled by linear interpolation.
    pub fn new(points: BTreeMap<u32, V>) -> Result<Self> {
        ensure!(!points.is_empty(), "No years provided");

        let mut values = BTreeMap::new();
        let mut iter = points.into_iter().peekable();
        while let Some((year, value)) = iter.next() {
            if let Some((next_year, next_value)) = iter.peek() {
                let span = f64::from(next_year - year);
                for gap_year in (year + 1)..*next_year {
                    let t = f64::from(gap_year - year) / span;
                    values.insert(gap_year, V::lerp(&value, next_value, t));
                }
            }
            values.insert(year, value);
        }

        Ok(Self { values })
    }
}

impl<V> YearSeries<V> {
    /// The first year with a value
    pub fn first_year(&self) -> u32 {
        *self.values.keys().next().expect("Series is non-empty")
    }

    /// The last year with a value
    pub fn last_year(&self) -> u32 {
        *self.values.keys().next_back().expect("Series is non-empty")
    }

    /// Clamp `year` into the range of the series
    pub fn clamp_year(&self, year: u32) -> u32 {
        year.clamp(self.first_year(), self.last_year())
    }

    /// The value for `year`, clamping to the first or last year if out of range
    pub fn get(&self, year: u32) -> &V {
        let clamped = self.clamp_year(year);
        if clamped != year {
            trace!("Year {year} out of range, using {clamped}");
        }

        &self.values[&clamped]
    }

    /// Iterate over every year and value in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &V)> {
        self.values.iter().map(|(year, value)| (*year, value))
    }
}

/// Values applying from a start year onwards.
///
/// A query selects the entry with the greatest start year not after the query year, or the
/// earliest entry if every start year is later.
#[derive(Debug, Clone, PartialEq)]
pub struct StartYearMap<V> {
    entries: BTreeMap<u32, V>,
}

impl<V> StartYearMap<V> {
    /// Create a new [`StartYearMap`] from its entries
    pub fn new(entries: BTreeMap<u32, V>) -> Result<Self> {
        ensure!(!entries.is_empty(), "No start years provided");

        Ok(Self { entries })
    }

    /// The start year selected for `year`
    pub fn start_year_for(&self, year: u32) -> u32 {
        self.entries
            .range(..=year)
            .next_back()
            .or_else(|| self.entries.iter().next())
            .map(|(start_year, _)| *start_year)
            .expect("Map is non-empty")
    }

    /// The entry applying to `year`
    pub fn get(&self, year: u32) -> &V {
        &self.entries[&self.start_year_for(year)]
    }

    /// Iterate over every start year and entry
    pub fn iter(&self) -> impl Iterator<Item = (u32, &V)> {
        self.entries.iter().map(|(year, value)| (*year, value))
    }
}

/// Linear interpolation of `y` at `x` between the points `(x0, y0)` and `(x1, y1)`.
///
/// If the two points share the same `x` the value at the first point is returned.
pub fn interpolate_between(x: f64, (x0, y0): (f64, f64), (x1, y1): (f64, f64)) -> f64 {
    if x1 == x0 {
        return y0;
    }

    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}
