//! # Dataset Module
//!
//! The labelled array model shared by the NetCDF reader and writer, the combiners and the
//! analysis transforms.
//!
//! A [`Dataset`] is a set of named dimensions, named variables laid out
//! row-major over those dimensions, and global attributes. It covers the
//! part of the NetCDF data model climate time series use: five numeric
//! types plus strings, at most one unlimited (record) dimension, text or
//! numeric attributes.
//!
//! Variables and attributes live in `BTreeMap`s so iteration order (and
//! therefore written output) is deterministic.

use crate::{EnsembleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

// =============================================================================
// DIMENSION
// =============================================================================

/// A named axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub len: usize,
    /// The record dimension of a NetCDF file. At most one per dataset.
    pub unlimited: bool,
}

impl Dimension {
    #[must_use]
    pub fn new(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            len,
            unlimited: false,
        }
    }

    #[must_use]
    pub fn unlimited(name: impl Into<String>, len: usize) -> Self {
        Self {
            name: name.into(),
            len,
            unlimited: true,
        }
    }
}

// =============================================================================
// DATA TYPES
// =============================================================================

/// Primitive element type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Byte,
    Short,
    Int,
    Float,
    Double,
    Str,
}

impl DataType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Str => "string",
            Self::Short => "short",
            Self::Int => "int",
            Self::Float => "float",
            Self::Double => "double",
        }
    }
}

/// A flat, typed array of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Values {
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Str(Vec<String>),
}

/// Apply the same expression to whichever vector a [`Values`] holds.
macro_rules! each_values {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            Values::Byte($v) => $body,
            Values::Short($v) => $body,
            Values::Int($v) => $body,
            Values::Float($v) => $body,
            Values::Double($v) => $body,
            Values::Str($v) => $body,
        }
    };
}

impl Values {
    /// An empty array of the given type with room for `capacity` elements.
    #[must_use]
    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Byte => Self::Byte(Vec::with_capacity(capacity)),
            DataType::Short => Self::Short(Vec::with_capacity(capacity)),
            DataType::Int => Self::Int(Vec::with_capacity(capacity)),
            DataType::Float => Self::Float(Vec::with_capacity(capacity)),
            DataType::Double => Self::Double(Vec::with_capacity(capacity)),
            DataType::Str => Self::Str(Vec::with_capacity(capacity)),
        }
    }

    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Byte(_) => DataType::Byte,
            Self::Short(_) => DataType::Short,
            Self::Int(_) => DataType::Int,
            Self::Float(_) => DataType::Float,
            Self::Double(_) => DataType::Double,
            Self::Str(_) => DataType::Str,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        each_values!(self, v => v.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `other` to `self`. Both must have the same type.
    pub fn extend_from(&mut self, other: &Values) -> Result<()> {
        match (self, other) {
            (Self::Byte(a), Self::Byte(b)) => a.extend_from_slice(b),
            (Self::Short(a), Self::Short(b)) => a.extend_from_slice(b),
            (Self::Int(a), Self::Int(b)) => a.extend_from_slice(b),
            (Self::Float(a), Self::Float(b)) => a.extend_from_slice(b),
            (Self::Double(a), Self::Double(b)) => a.extend_from_slice(b),
            (Self::Str(a), Self::Str(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(EnsembleError::InvalidDataset(format!(
                    "cannot append {} values to {} values",
                    b.data_type().name(),
                    a.data_type().name()
                )));
            }
        }
        Ok(())
    }

    /// Copy out a contiguous range of elements.
    pub fn slice(&self, range: Range<usize>) -> Result<Values> {
        if range.start > range.end || range.end > self.len() {
            return Err(EnsembleError::InvalidDataset(format!(
                "slice {}..{} out of bounds for {} elements",
                range.start,
                range.end,
                self.len()
            )));
        }
        Ok(match self {
            Self::Byte(v) => Self::Byte(v[range].to_vec()),
            Self::Short(v) => Self::Short(v[range].to_vec()),
            Self::Int(v) => Self::Int(v[range].to_vec()),
            Self::Float(v) => Self::Float(v[range].to_vec()),
            Self::Double(v) => Self::Double(v[range].to_vec()),
            Self::Str(v) => Self::Str(v[range].to_vec()),
        })
    }

    /// Every element widened to `f64`. Strings are NaN.
    #[must_use]
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Self::Byte(v) => v.iter().map(|x| f64::from(*x)).collect(),
            Self::Str(v) => vec![f64::NAN; v.len()],
            Self::Short(v) => v.iter().map(|x| f64::from(*x)).collect(),
            Self::Int(v) => v.iter().map(|x| f64::from(*x)).collect(),
            Self::Float(v) => v.iter().map(|x| f64::from(*x)).collect(),
            Self::Double(v) => v.clone(),
        }
    }

    /// The first element widened to `f64`.
    #[must_use]
    pub fn first_f64(&self) -> Option<f64> {
        match self {
            Self::Byte(v) => v.first().map(|x| f64::from(*x)),
            Self::Str(_) => None,
            Self::Short(v) => v.first().map(|x| f64::from(*x)),
            Self::Int(v) => v.first().map(|x| f64::from(*x)),
            Self::Float(v) => v.first().map(|x| f64::from(*x)),
            Self::Double(v) => v.first().copied(),
        }
    }

    /// Element-wise `self - other` over two flat arrays of equal length.
    ///
    /// Only lengths are compared here; callers holding the variables check
    /// that the dims agree. Two `Float` arrays stay `Float`; every other
    /// numeric pairing is computed in `Double`. Strings cannot be subtracted.
    pub fn difference(&self, other: &Values) -> Result<Values> {
        if matches!(self, Self::Str(_)) || matches!(other, Self::Str(_)) {
            return Err(EnsembleError::InvalidDataset(
                "cannot subtract string values".to_string(),
            ));
        }
        if self.len() != other.len() {
            return Err(EnsembleError::InvalidDataset(format!(
                "cannot subtract arrays of length {} and {}",
                self.len(),
                other.len()
            )));
        }
        Ok(match (self, other) {
            (Self::Float(a), Self::Float(b)) => {
                Self::Float(a.iter().zip(b).map(|(x, y)| x - y).collect())
            }
            (a, b) => Self::Double(
                a.to_f64()
                    .into_iter()
                    .zip(b.to_f64())
                    .map(|(x, y)| x - y)
                    .collect(),
            ),
        })
    }

    /// Bitwise equality: unlike `==`, NaN fill values compare equal to
    /// themselves.
    #[must_use]
    pub fn identical(&self, other: &Values) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Self::Double(a), Self::Double(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (a, b) => a == b,
        }
    }
}

// =============================================================================
// ATTRIBUTES
// =============================================================================

/// Value of a variable or global attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Text(String),
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl AttrValue {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

// =============================================================================
// VARIABLE
// =============================================================================

/// A named array laid out row-major over `dims`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub dims: Vec<String>,
    pub attrs: BTreeMap<String, AttrValue>,
    pub values: Values,
}

impl Variable {
    #[must_use]
    pub fn new<S: Into<String>>(dims: impl IntoIterator<Item = S>, values: Values) -> Self {
        Self {
            dims: dims.into_iter().map(Into::into).collect(),
            attrs: BTreeMap::new(),
            values,
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.values.data_type()
    }

    /// Text attribute lookup.
    #[must_use]
    pub fn text_attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(AttrValue::as_text)
    }

    /// Same dims, attributes and bitwise-identical values.
    #[must_use]
    pub fn identical(&self, other: &Variable) -> bool {
        self.dims == other.dims && self.attrs == other.attrs && self.values.identical(&other.values)
    }
}

// =============================================================================
// DATASET
// =============================================================================

/// Dimensions, variables and global attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Dimensions in definition order.
    pub dims: Vec<Dimension>,
    pub variables: BTreeMap<String, Variable>,
    pub attrs: BTreeMap<String, AttrValue>,
}

impl Dataset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dim(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name == name)
    }

    #[must_use]
    pub fn dim_len(&self, name: &str) -> Option<usize> {
        self.dim(name).map(|d| d.len)
    }

    /// Define a dimension.
    ///
    /// Redefining an existing dimension with the same length is a no-op.
    /// A second unlimited dimension is rejected.
    pub fn add_dim(&mut self, dim: Dimension) -> Result<()> {
        if let Some(existing) = self.dim(&dim.name) {
            if existing.len != dim.len {
                return Err(EnsembleError::InvalidDataset(format!(
                    "dimension {} has length {} and {}",
                    dim.name, existing.len, dim.len
                )));
            }
            return Ok(());
        }
        if dim.unlimited && self.record_dim().is_some() {
            return Err(EnsembleError::InvalidDataset(format!(
                "dimension {} would be a second unlimited dimension",
                dim.name
            )));
        }
        self.dims.push(dim);
        Ok(())
    }

    /// The unlimited dimension, if any.
    #[must_use]
    pub fn record_dim(&self) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.unlimited)
    }

    /// Lengths of a variable's dimensions.
    pub fn shape(&self, variable: &Variable) -> Result<Vec<usize>> {
        variable
            .dims
            .iter()
            .map(|d| {
                self.dim_len(d).ok_or_else(|| {
                    EnsembleError::InvalidDataset(format!("dimension {d} is not defined"))
                })
            })
            .collect()
    }

    /// Insert a variable after checking its dims exist and its length matches.
    pub fn add_variable(&mut self, name: impl Into<String>, variable: Variable) -> Result<()> {
        let name = name.into();
        self.check_variable(&name, &variable)?;
        self.variables.insert(name, variable);
        Ok(())
    }

    fn check_variable(&self, name: &str, variable: &Variable) -> Result<()> {
        let expected: usize = self.shape(variable)?.iter().product();
        if expected != variable.values.len() {
            return Err(EnsembleError::InvalidDataset(format!(
                "variable {name} has {} values but its dimensions hold {expected}",
                variable.values.len()
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Look up a variable that must exist.
    pub fn require(&self, name: &str, context: &str) -> Result<&Variable> {
        self.variables
            .get(name)
            .ok_or_else(|| EnsembleError::MissingVariable {
                name: name.to_string(),
                context: context.to_string(),
            })
    }

    /// A coordinate variable is one-dimensional over a dimension of its own name.
    #[must_use]
    pub fn is_coordinate(&self, name: &str) -> bool {
        self.variables
            .get(name)
            .is_some_and(|v| v.dims.len() == 1 && v.dims[0] == name)
    }

    /// Remove the named variables. Returns the names that were present.
    pub fn drop_vars(&mut self, names: &[&str]) -> Vec<String> {
        names
            .iter()
            .filter(|name| self.variables.remove(**name).is_some())
            .map(|name| (*name).to_string())
            .collect()
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: AttrValue) {
        self.attrs.insert(name.into(), value);
    }

    /// Check every variable against the dimension table and the single
    /// unlimited dimension rule.
    pub fn validate(&self) -> Result<()> {
        if self.dims.iter().filter(|d| d.unlimited).count() > 1 {
            return Err(EnsembleError::InvalidDataset(
                "more than one unlimited dimension".to_string(),
            ));
        }
        for (name, variable) in &self.variables {
            self.check_variable(name, variable)?;
        }
        Ok(())
    }

    /// Number of elements in one step of a variable's leading dimension.
    pub fn leading_stride(&self, variable: &Variable) -> Result<usize> {
        Ok(self.shape(variable)?.iter().skip(1).product())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn small_dataset() -> Dataset {
        let mut ds = Dataset::new();
        ds.add_dim(Dimension::unlimited("time", 2)).unwrap();
        ds.add_dim(Dimension::new("lat", 3)).unwrap();
        ds.add_variable(
            "time",
            Variable::new(["time"], Values::Double(vec![0.0, 31.0])),
        )
        .unwrap();
        ds.add_variable(
            "FLNT",
            Variable::new(["time", "lat"], Values::Float(vec![1.0; 6])),
        )
        .unwrap();
        ds
    }

    #[test]
    fn add_variable_checks_length() {
        let mut ds = small_dataset();
        let bad = Variable::new(["time", "lat"], Values::Float(vec![1.0; 5]));
        assert!(ds.add_variable("BAD", bad).is_err());
    }

    #[test]
    fn add_variable_checks_dims_exist() {
        let mut ds = small_dataset();
        let bad = Variable::new(["lon"], Values::Float(vec![1.0; 4]));
        assert!(ds.add_variable("BAD", bad).is_err());
    }

    #[test]
    fn second_unlimited_dim_rejected() {
        let mut ds = small_dataset();
        assert!(ds.add_dim(Dimension::unlimited("step", 4)).is_err());
        // Same name, same length is fine
        assert!(ds.add_dim(Dimension::unlimited("time", 2)).is_ok());
    }

    #[test]
    fn drop_vars_reports_only_present_names() {
        let mut ds = small_dataset();
        let dropped = ds.drop_vars(&["FLNT", "date_written"]);
        assert_eq!(dropped, vec!["FLNT".to_string()]);
        assert!(ds.variable("FLNT").is_none());
    }

    #[test]
    fn coordinate_detection() {
        let ds = small_dataset();
        assert!(ds.is_coordinate("time"));
        assert!(!ds.is_coordinate("FLNT"));
        assert!(!ds.is_coordinate("missing"));
    }

    #[test]
    fn float_difference_stays_float() {
        let a = Values::Float(vec![3.0, 2.0]);
        let b = Values::Float(vec![1.0, 2.5]);
        assert_eq!(a.difference(&b).unwrap(), Values::Float(vec![2.0, -0.5]));
    }

    #[test]
    fn mixed_difference_is_double() {
        let a = Values::Int(vec![3, 2]);
        let b = Values::Float(vec![1.0, 0.5]);
        assert_eq!(a.difference(&b).unwrap(), Values::Double(vec![2.0, 1.5]));
    }

    #[test]
    fn difference_length_mismatch() {
        let a = Values::Float(vec![1.0]);
        let b = Values::Float(vec![1.0, 2.0]);
        assert!(a.difference(&b).is_err());
    }

    #[test]
    fn strings_cannot_be_subtracted() {
        let a = Values::Str(vec!["a".to_string()]);
        let b = Values::Float(vec![1.0]);
        assert!(a.difference(&b).is_err());
        assert!(b.difference(&a).is_err());
    }

    #[test]
    fn strings_extend_and_slice() {
        let mut names = Values::Str(vec!["a".to_string()]);
        names.extend_from(&Values::Str(vec!["b".to_string(), "c".to_string()])).unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(names.slice(1..2).unwrap(), Values::Str(vec!["b".to_string()]));
        assert_eq!(names.first_f64(), None);
    }

    #[test]
    fn identical_treats_nan_as_equal() {
        let a = Values::Float(vec![f32::NAN, 1.0]);
        let b = Values::Float(vec![f32::NAN, 1.0]);
        assert_ne!(a, b);
        assert!(a.identical(&b));
    }

    #[test]
    fn extend_rejects_type_mismatch() {
        let mut a = Values::Float(vec![1.0]);
        assert!(a.extend_from(&Values::Double(vec![1.0])).is_err());
        a.extend_from(&Values::Float(vec![2.0])).unwrap();
        assert_eq!(a, Values::Float(vec![1.0, 2.0]));
    }

    #[test]
    fn slice_bounds_checked() {
        let v = Values::Int(vec![1, 2, 3]);
        assert_eq!(v.slice(1..3).unwrap(), Values::Int(vec![2, 3]));
        assert!(v.slice(2..4).is_err());
    }
}
