//! NetCDF reader and writer on top of libnetcdf.
//!
//! Any flavour libnetcdf opens is read: classic, 64-bit offset or
//! NetCDF-4/HDF5. Output is always NetCDF-4, with every numeric variable
//! that has dimensions zlib-compressed at level 1 and shuffled.
//!
//! Type mapping into the [`Dataset`] model:
//!
//! ```text
//! byte            -> Byte          short           -> Short
//! ubyte           -> Short         int             -> Int
//! ushort          -> Int           float           -> Float
//! uint, int64,    -> Double        double          -> Double
//!   uint64
//! char[.., n]     -> Str over the leading dims, NULs trimmed
//! string          -> Str
//! ```
//!
//! Compound, enum, opaque and vlen variables are rejected.

use crate::dataset::{AttrValue, Dataset, Dimension, Values, Variable};
use crate::{EnsembleError, Result};
use netcdf::types::{FloatType, IntType, NcVariableType};
use netcdf::{AttributeValue, Extent, FileMut, NcTypeDescriptor};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// zlib level applied to written variables.
pub const DEFLATE_LEVEL: i32 = 1;

/// Magic bytes shared by the classic and 64-bit offset formats.
const CLASSIC_MAGIC: &[u8; 3] = b"CDF";

fn nc_err(path: &Path, source: netcdf::Error) -> EnsembleError {
    EnsembleError::Netcdf {
        path: path.to_path_buf(),
        source,
    }
}

// =============================================================================
// READ
// =============================================================================

/// Read a whole file into memory.
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let err = |e: netcdf::Error| nc_err(path, e);
    let file = netcdf::open(path).map_err(err)?;
    let limit = classic_file_len(path)?;

    let mut dataset = Dataset::new();
    for dim in file.dimensions() {
        // NetCDF-4 allows several unlimited dimensions; the model keeps the first.
        let unlimited = dim.is_unlimited() && dataset.record_dim().is_none();
        dataset.add_dim(Dimension {
            name: dim.name(),
            len: dim.len(),
            unlimited,
        })?;
    }
    dataset.attrs = read_attributes(file.attributes(), path)?;

    for var in file.variables() {
        let name = var.name();
        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let attrs = read_attributes(var.attributes(), path)?;
        let (dims, values) = read_values(&var, &name, dims, limit, path)?;
        dataset.add_variable(name, Variable { dims, attrs, values })?;
    }

    tracing::debug!(
        path = %path.display(),
        variables = dataset.variables.len(),
        "read dataset"
    );
    Ok(dataset)
}

/// Length of a classic or 64-bit offset file, `None` for anything else.
///
/// Those formats store data uncompressed, so no variable can hold more bytes
/// than the file does.
fn classic_file_len(path: &Path) -> Result<Option<u64>> {
    let mut file = std::fs::File::open(path).map_err(|e| EnsembleError::io(path, e))?;
    let mut magic = [0u8; 3];
    if file.read_exact(&mut magic).is_err() || &magic != CLASSIC_MAGIC {
        return Ok(None);
    }
    let len = file
        .metadata()
        .map_err(|e| EnsembleError::io(path, e))?
        .len();
    Ok(Some(len))
}

fn element_size(vartype: &NcVariableType) -> u64 {
    match vartype {
        NcVariableType::Char | NcVariableType::Int(IntType::I8 | IntType::U8) => 1,
        NcVariableType::Int(IntType::I16 | IntType::U16) => 2,
        NcVariableType::Int(IntType::I32 | IntType::U32) | NcVariableType::Float(FloatType::F32) => 4,
        _ => 8,
    }
}

/// Element count of a shape, checked against what the file can hold.
fn checked_count(
    name: &str,
    shape: &[usize],
    element: u64,
    limit: Option<u64>,
    path: &Path,
) -> Result<usize> {
    let truncated = |bytes| EnsembleError::TruncatedVariable {
        path: path.to_path_buf(),
        name: name.to_string(),
        bytes,
    };
    let count = shape
        .iter()
        .try_fold(1usize, |acc, &len| acc.checked_mul(len))
        .ok_or_else(|| truncated(u64::MAX))?;
    let bytes = (count as u64)
        .checked_mul(element)
        .ok_or_else(|| truncated(u64::MAX))?;
    if limit.is_some_and(|limit| bytes > limit) {
        return Err(truncated(bytes));
    }
    Ok(count)
}

/// Row-major index of element `flat` in `shape`.
fn unravel(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (slot, &len) in index.iter_mut().zip(shape).rev() {
        if len > 0 {
            *slot = flat % len;
            flat /= len;
        }
    }
    index
}

/// Text of one fixed-width character row.
fn text_from_chars(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .to_string()
}

fn widen<T, U: From<T>>(values: Vec<T>) -> Vec<U> {
    values.into_iter().map(U::from).collect()
}

fn read_values(
    var: &netcdf::Variable<'_>,
    name: &str,
    mut dims: Vec<String>,
    limit: Option<u64>,
    path: &Path,
) -> Result<(Vec<String>, Values)> {
    let err = |e: netcdf::Error| nc_err(path, e);
    let vartype = var.vartype();
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let count = checked_count(name, &shape, element_size(&vartype), limit, path)?;

    let values = match vartype {
        NcVariableType::Int(IntType::I8) => Values::Byte(var.get_values::<i8, _>(..).map_err(err)?),
        NcVariableType::Int(IntType::U8) => {
            Values::Short(widen(var.get_values::<u8, _>(..).map_err(err)?))
        }
        NcVariableType::Int(IntType::I16) => {
            Values::Short(var.get_values::<i16, _>(..).map_err(err)?)
        }
        NcVariableType::Int(IntType::U16) => {
            Values::Int(widen(var.get_values::<u16, _>(..).map_err(err)?))
        }
        NcVariableType::Int(IntType::I32) => Values::Int(var.get_values::<i32, _>(..).map_err(err)?),
        NcVariableType::Int(IntType::U32) => {
            Values::Double(widen(var.get_values::<u32, _>(..).map_err(err)?))
        }
        NcVariableType::Int(IntType::I64) => Values::Double(
            var.get_values::<i64, _>(..)
                .map_err(err)?
                .into_iter()
                .map(|x| x as f64)
                .collect(),
        ),
        NcVariableType::Int(IntType::U64) => Values::Double(
            var.get_values::<u64, _>(..)
                .map_err(err)?
                .into_iter()
                .map(|x| x as f64)
                .collect(),
        ),
        NcVariableType::Float(FloatType::F32) => {
            Values::Float(var.get_values::<f32, _>(..).map_err(err)?)
        }
        NcVariableType::Float(FloatType::F64) => {
            Values::Double(var.get_values::<f64, _>(..).map_err(err)?)
        }
        NcVariableType::Char => {
            // The last dimension is the string length.
            let (width, rows) = match shape.split_last() {
                Some((&width, leading)) => {
                    dims.pop();
                    (width, leading.iter().product::<usize>())
                }
                None => (1, 1),
            };
            let raw = var.get_raw_values(..).map_err(err)?;
            Values::Str(
                (0..rows)
                    .map(|row| {
                        raw.get(row * width..(row + 1) * width)
                            .map(text_from_chars)
                            .unwrap_or_default()
                    })
                    .collect(),
            )
        }
        NcVariableType::String => {
            let mut strings = Vec::with_capacity(count);
            for flat in 0..count {
                let index = unravel(flat, &shape);
                strings.push(var.get_string(index.as_slice()).map_err(err)?);
            }
            Values::Str(strings)
        }
        _ => {
            return Err(EnsembleError::UnsupportedFormat(format!(
                "variable {name} has a user-defined type"
            )));
        }
    };
    Ok((dims, values))
}

fn read_attributes<'a>(
    attributes: impl Iterator<Item = netcdf::Attribute<'a>>,
    path: &Path,
) -> Result<BTreeMap<String, AttrValue>> {
    let mut attrs = BTreeMap::new();
    for attribute in attributes {
        let name = attribute.name().to_string();
        let value = attribute.value().map_err(|e| nc_err(path, e))?;
        match attr_from_netcdf(value) {
            Some(value) => {
                attrs.insert(name, value);
            }
            None => tracing::debug!(attribute = %name, "skipping attribute of unsupported type"),
        }
    }
    Ok(attrs)
}

fn attr_from_netcdf(value: AttributeValue) -> Option<AttrValue> {
    Some(match value {
        AttributeValue::Str(s) => AttrValue::Text(s),
        AttributeValue::Strs(v) => AttrValue::Text(v.join("\n")),
        AttributeValue::Schar(x) => AttrValue::Byte(vec![x]),
        AttributeValue::Schars(v) => AttrValue::Byte(v),
        AttributeValue::Uchar(x) => AttrValue::Short(vec![i16::from(x)]),
        AttributeValue::Uchars(v) => AttrValue::Short(widen(v)),
        AttributeValue::Short(x) => AttrValue::Short(vec![x]),
        AttributeValue::Shorts(v) => AttrValue::Short(v),
        AttributeValue::Ushort(x) => AttrValue::Int(vec![i32::from(x)]),
        AttributeValue::Ushorts(v) => AttrValue::Int(widen(v)),
        AttributeValue::Int(x) => AttrValue::Int(vec![x]),
        AttributeValue::Ints(v) => AttrValue::Int(v),
        AttributeValue::Uint(x) => AttrValue::Double(vec![f64::from(x)]),
        AttributeValue::Uints(v) => AttrValue::Double(widen(v)),
        AttributeValue::Longlong(x) => AttrValue::Double(vec![x as f64]),
        AttributeValue::Longlongs(v) => AttrValue::Double(v.into_iter().map(|x| x as f64).collect()),
        AttributeValue::Ulonglong(x) => AttrValue::Double(vec![x as f64]),
        AttributeValue::Ulonglongs(v) => {
            AttrValue::Double(v.into_iter().map(|x| x as f64).collect())
        }
        AttributeValue::Float(x) => AttrValue::Float(vec![x]),
        AttributeValue::Floats(v) => AttrValue::Float(v),
        AttributeValue::Double(x) => AttrValue::Double(vec![x]),
        AttributeValue::Doubles(v) => AttrValue::Double(v),
        #[allow(unreachable_patterns)]
        _ => return None,
    })
}

// =============================================================================
// WRITE
// =============================================================================

fn attr_to_netcdf(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::Text(s) => AttributeValue::Str(s.clone()),
        AttrValue::Byte(v) => AttributeValue::Schars(v.clone()),
        AttrValue::Short(v) => AttributeValue::Shorts(v.clone()),
        AttrValue::Int(v) => AttributeValue::Ints(v.clone()),
        AttrValue::Float(v) => AttributeValue::Floats(v.clone()),
        AttrValue::Double(v) => AttributeValue::Doubles(v.clone()),
    }
}

/// Write a dataset as NetCDF-4, replacing any existing file.
pub fn write_dataset(path: &Path, dataset: &Dataset) -> Result<()> {
    dataset.validate()?;
    let err = |e: netcdf::Error| nc_err(path, e);
    let mut file = netcdf::create(path).map_err(err)?;

    for dim in &dataset.dims {
        if dim.unlimited {
            file.add_unlimited_dimension(&dim.name).map_err(err)?;
        } else {
            file.add_dimension(&dim.name, dim.len).map_err(err)?;
        }
    }
    for (name, value) in &dataset.attrs {
        file.add_attribute(name, attr_to_netcdf(value)).map_err(err)?;
    }
    for (name, variable) in &dataset.variables {
        let shape = dataset.shape(variable)?;
        write_variable(&mut file, name, variable, &shape).map_err(err)?;
    }

    tracing::debug!(
        path = %path.display(),
        variables = dataset.variables.len(),
        "wrote dataset"
    );
    Ok(())
}

fn write_variable(
    file: &mut FileMut,
    name: &str,
    variable: &Variable,
    shape: &[usize],
) -> std::result::Result<(), netcdf::Error> {
    let dims: Vec<&str> = variable.dims.iter().map(String::as_str).collect();
    match &variable.values {
        Values::Byte(v) => put_numeric(file, name, &dims, variable, v, shape),
        Values::Short(v) => put_numeric(file, name, &dims, variable, v, shape),
        Values::Int(v) => put_numeric(file, name, &dims, variable, v, shape),
        Values::Float(v) => put_numeric(file, name, &dims, variable, v, shape),
        Values::Double(v) => put_numeric(file, name, &dims, variable, v, shape),
        Values::Str(strings) => {
            let mut var = file.add_string_variable(name, &dims)?;
            for (attr, value) in &variable.attrs {
                // A string fill value would need a string-typed attribute.
                if attr != "_FillValue" {
                    var.put_attribute(attr, attr_to_netcdf(value))?;
                }
            }
            for (flat, text) in strings.iter().enumerate() {
                let index = unravel(flat, shape);
                var.put_string(text, index.as_slice())?;
            }
            Ok(())
        }
    }
}

fn put_numeric<T: NcTypeDescriptor>(
    file: &mut FileMut,
    name: &str,
    dims: &[&str],
    variable: &Variable,
    values: &[T],
    shape: &[usize],
) -> std::result::Result<(), netcdf::Error> {
    let mut var = file.add_variable::<T>(name, dims)?;
    for (attr, value) in &variable.attrs {
        var.put_attribute(attr, attr_to_netcdf(value))?;
    }
    if !dims.is_empty() {
        var.set_compression(DEFLATE_LEVEL, true)?;
    }
    // Explicit ranges so record variables grow their unlimited dimension.
    let extents: Vec<Extent> = shape.iter().map(|&len| Extent::from(0..len)).collect();
    var.put_values(values, extents)
}

// =============================================================================
// TESTS
// =============================================================================
