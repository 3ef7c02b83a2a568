//! Structs of named, summable `f64` quantities.
//!
//! Physical inventories and monetary effects are both sets of named quantities which are summed
//! over vehicles, differenced between sessions and written out column by column. The
//! [`value_struct`] macro generates such a struct along with a [`ValueFields`] implementation so
//! generic code can treat every field uniformly.
use std::ops::AddAssign;

/// A struct whose fields are all named `f64` quantities
pub trait ValueFields: Default + Clone + AddAssign {
    /// The names of the fields, in declaration order
    const FIELD_NAMES: &'static [&'static str];

    /// The field values, in the same order as [`ValueFields::FIELD_NAMES`]
    fn values(&self) -> Vec<f64>;

    /// Build from values given in field order. Missing trailing values are zero.
    fn from_values(values: &[f64]) -> Self;

    /// Multiply every field by `factor`
    fn scaled(&self, factor: f64) -> Self;
}

/// Define a struct of named `f64` fields implementing [`ValueFields`]
macro_rules! value_struct {
    (
        $(#[$meta:meta])*
        $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            Default,
            PartialEq,
            derive_more::Add,
            derive_more::AddAssign,
            derive_more::Sub,
        )]
        pub struct $name {
            $(
                $(#[$field_meta])*
                pub $field: f64,
            )*
        }

        impl crate::values::ValueFields for $name {
            const FIELD_NAMES: &'static [&'static str] = &[$(stringify!($field)),*];

            fn values(&self) -> Vec<f64> {
                vec![$(self.$field),*]
            }

            fn from_values(values: &[f64]) -> Self {
                let mut iter = values.iter().copied();
                Self {
                    $($field: iter.next().unwrap_or_default(),)*
                }
            }

            fn scaled(&self, factor: f64) -> Self {
                Self {
                    $($field: self.$field * factor,)*
                }
            }
        }

        impl crate::rates::Interpolate for $name {
            fn lerp(lower: &Self, upper: &Self, t: f64) -> Self {
                Self {
                    $($field: <f64 as crate::rates::Interpolate>::lerp(&lower.$field, &upper.$field, t),)*
                }
            }
        }
    };
}
pub(crate) use value_struct;

value_struct! {
    /// Mass of each tracked pollutant.
    ///
    /// Criteria pollutants and air toxics are in US (short) tons, greenhouse gases in metric tons.
    PollutantValues {
        /// Volatile organic compounds
        voc,
        /// Carbon monoxide
        co,
        /// Nitrogen oxides
        nox,
        /// Fine particulate matter
        pm25,
        /// Sulphur oxides
        sox,
        /// Benzene
        benzene,
        /// 1,3-butadiene
        butadiene13,
        /// Formaldehyde
        formaldehyde,
        /// Acetaldehyde
        acetaldehyde,
        /// Acrolein
        acrolein,
        /// Ethylbenzene
        ethylbenzene,
        /// Naphthalene
        naphthalene,
        /// 15 polycyclic aromatic hydrocarbons
        pah15,
        /// Methane
        ch4,
        /// Nitrous oxide
        n2o,
        /// Carbon dioxide
        co2,
    }
}

/// The greenhouse gases, which are reported in metric tons
pub const GHG_SPECIES: [&str; 3] = ["co2", "ch4", "n2o"];

impl PollutantValues {
    /// The unit in which a species is reported
    pub fn unit(species: &str) -> &'static str {
        if GHG_SPECIES.contains(&species) {
            "metrictons"
        } else {
            "ustons"
        }
    }

    /// Add `value` to the named species, returning false if there is no such species
    pub fn add_to(&mut self, species: &str, value: f64) -> bool {
        let field = match species {
            "voc" => &mut self.voc,
            "co" => &mut self.co,
            "nox" => &mut self.nox,
            "pm25" => &mut self.pm25,
            "sox" => &mut self.sox,
            "benzene" => &mut self.benzene,
            "butadiene13" => &mut self.butadiene13,
            "formaldehyde" => &mut self.formaldehyde,
            "acetaldehyde" => &mut self.acetaldehyde,
            "acrolein" => &mut self.acrolein,
            "ethylbenzene" => &mut self.ethylbenzene,
            "naphthalene" => &mut self.naphthalene,
            "pah15" => &mut self.pah15,
            "ch4" => &mut self.ch4,
            "n2o" => &mut self.n2o,
            "co2" => &mut self.co2,
            _ => return false,
        };
        *field += value;

        true
    }

    /// Carbon dioxide equivalent in metric tons, using the given global warming potentials
    pub fn co2e(&self, gwp_ch4: f64, gwp_n2o: f64) -> f64 {
        self.co2 + gwp_ch4 * self.ch4 + gwp_n2o * self.n2o
    }

    /// Column names for these values, e.g. `vehicle_nox_ustons`
    pub fn column_names(prefix: &str) -> Vec<String> {
        Self::FIELD_NAMES
            .iter()
            .map(|species| format!("{prefix}_{species}_{}", Self::unit(species)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    value_struct! {
        TestValues {
            a,
            b,
        }
    }

    #[test]
    fn test_value_struct_arithmetic() {
        let mut x = TestValues { a: 1.0, b: 2.0 };
        x += TestValues { a: 1.0, b: 1.0 };
        assert_eq!(x, TestValues { a: 2.0, b: 3.0 });
        assert_eq!(x - TestValues { a: 2.0, b: 1.0 }, TestValues { a: 0.0, b: 2.0 });
        assert_eq!(x.scaled(0.5), TestValues { a: 1.0, b: 1.5 });
    }

    #[test]
    fn test_value_struct_fields() {
        assert_eq!(TestValues::FIELD_NAMES, ["a", "b"]);
        let x = TestValues::from_values(&[4.0]);
        assert_eq!(x.values(), [4.0, 0.0]);
    }

    #[test]
    fn test_pollutant_add_to() {
        let mut values = PollutantValues::default();
        assert!(values.add_to("nox", 2.0));
        assert!(values.add_to("nox", 1.0));
        assert!(!values.add_to("unobtainium", 1.0));
        assert_eq!(values.nox, 3.0);
    }

    #[test]
    fn test_co2e() {
        let values = PollutantValues {
            co2: 10.0,
            ch4: 1.0,
            n2o: 0.1,
            ..Default::default()
        };
        assert_approx_eq!(f64, values.co2e(25.0, 298.0), 64.8);
    }

    #[test]
    fn test_column_names() {
        let names = PollutantValues::column_names("egu");
        assert_eq!(names[0], "egu_voc_ustons");
        assert_eq!(names.last().unwrap(), "egu_co2_metrictons");
    }
}
