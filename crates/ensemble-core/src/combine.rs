//! # Combine Module
//!
//! Two ways of putting datasets together:
//!
//! - [`combine_by_coords`]: one member's files (one file per variable per
//!   time chunk) into a single dataset. Files covering the same time steps
//!   are merged side by side; the merged blocks are ordered by their first
//!   time value and joined along the time dimension.
//! - [`concat_members`]: every member's analysis output stacked along a new
//!   leading `ensemble_member` dimension, with the member names stored as a
//!   string coordinate.
//!
//! [`select_member`] slices one member back out, which is how the save
//! fallback writes one file per member.

use crate::dataset::{AttrValue, Dataset, Dimension, Values, Variable};
use crate::{EnsembleError, Result};
use std::collections::BTreeSet;

/// Name of the dimension members are stacked along.
pub const ENSEMBLE_MEMBER_DIM: &str = "ensemble_member";

// =============================================================================
// MERGE
// =============================================================================

/// Merge `other` into `target`.
///
/// Shared dimensions must agree in length and shared variables must be
/// identical. Global attributes already on `target` win.
fn merge_into(target: &mut Dataset, other: Dataset) -> Result<()> {
    for dim in other.dims {
        target.add_dim(dim)?;
    }
    for (name, variable) in other.variables {
        match target.variables.get(&name) {
            Some(existing) if !existing.values.identical(&variable.values) || existing.dims != variable.dims => {
                return Err(EnsembleError::MergeConflict(name));
            }
            Some(_) => {}
            None => target.add_variable(name, variable)?,
        }
    }
    for (name, value) in other.attrs {
        target.attrs.entry(name).or_insert(value);
    }
    Ok(())
}

// =============================================================================
// COMBINE BY COORDINATES
// =============================================================================

/// Combine the files of one member into a single dataset.
///
/// Datasets whose `concat_dim` coordinate values are identical are merged;
/// the resulting blocks are sorted by their first coordinate value and
/// concatenated along `concat_dim`. Variables that do not lead with
/// `concat_dim` are taken from the earliest block. Datasets without a
/// `concat_dim` coordinate are merged into the result as-is.
pub fn combine_by_coords(datasets: Vec<Dataset>, concat_dim: &str) -> Result<Dataset> {
    if datasets.is_empty() {
        return Err(EnsembleError::InvalidDataset(
            "no datasets to combine".to_string(),
        ));
    }

    let mut blocks: Vec<(Values, Dataset)> = Vec::new();
    let mut statics: Option<Dataset> = None;

    for dataset in datasets {
        let Some(coord) = dataset.variable(concat_dim).map(|v| v.values.clone()) else {
            match statics.as_mut() {
                Some(existing) => merge_into(existing, dataset)?,
                None => statics = Some(dataset),
            }
            continue;
        };
        match blocks.iter_mut().find(|(key, _)| key.identical(&coord)) {
            Some((_, block)) => merge_into(block, dataset)?,
            None => blocks.push((coord, dataset)),
        }
    }

    blocks.sort_by(|(a, _), (b, _)| {
        let a = a.first_f64().unwrap_or(f64::INFINITY);
        let b = b.first_f64().unwrap_or(f64::INFINITY);
        a.total_cmp(&b)
    });

    let mut blocks = blocks.into_iter().map(|(_, block)| block);
    let mut combined = match (blocks.next(), statics.take()) {
        (Some(first), rest) => {
            statics = rest;
            first
        }
        (None, Some(only)) => return Ok(only),
        (None, None) => {
            return Err(EnsembleError::InvalidDataset(
                "no datasets to combine".to_string(),
            ));
        }
    };

    for block in blocks {
        append_along(&mut combined, &block, concat_dim)?;
    }

    if let Some(statics) = statics {
        merge_into(&mut combined, statics)?;
    }

    combined.validate()?;
    Ok(combined)
}

/// Append every `concat_dim`-leading variable of `block` onto `combined`.
fn append_along(combined: &mut Dataset, block: &Dataset, concat_dim: &str) -> Result<()> {
    let added = block.dim_len(concat_dim).ok_or_else(|| {
        EnsembleError::ConcatMismatch(format!("a block has no {concat_dim} dimension"))
    })?;

    for dim in &block.dims {
        if dim.name != concat_dim && combined.dim_len(&dim.name).is_some_and(|len| len != dim.len) {
            return Err(EnsembleError::ConcatMismatch(format!(
                "dimension {} differs between time blocks",
                dim.name
            )));
        }
    }

    let leading: Vec<String> = combined
        .variables
        .iter()
        .filter(|(_, v)| v.dims.first().is_some_and(|d| d == concat_dim))
        .map(|(name, _)| name.clone())
        .collect();

    for name in &leading {
        let incoming = block.variable(name).ok_or_else(|| {
            EnsembleError::ConcatMismatch(format!("variable {name} missing from a time block"))
        })?;
        if let Some(variable) = combined.variables.get_mut(name) {
            if variable.dims != incoming.dims {
                return Err(EnsembleError::ConcatMismatch(format!(
                    "variable {name} changes dimensions between time blocks"
                )));
            }
            variable.values.extend_from(&incoming.values)?;
        }
    }

    for (name, variable) in &block.variables {
        if variable.dims.first().is_some_and(|d| d == concat_dim) && !leading.contains(name) {
            return Err(EnsembleError::ConcatMismatch(format!(
                "variable {name} only present in some time blocks"
            )));
        }
    }

    if let Some(dim) = combined.dims.iter_mut().find(|d| d.name == concat_dim) {
        dim.len += added;
    }
    Ok(())
}

// =============================================================================
// CONCATENATE MEMBERS
// =============================================================================

/// Stack member datasets along a new leading dimension `dim`.
///
/// Data variables always gain the new dimension. Coordinate variables are
/// kept once when every member agrees and stacked otherwise. The member
/// names become the `dim` coordinate and must be unique. Unlimited flags
/// are cleared: the new dimension must lead every stacked variable.
pub fn concat_members(members: Vec<(String, Dataset)>, dim: &str) -> Result<Dataset> {
    let Some((_, first)) = members.first() else {
        return Err(EnsembleError::ConcatMismatch("no members".to_string()));
    };
    let mut seen = BTreeSet::new();
    if let Some((duplicate, _)) = members.iter().find(|(name, _)| !seen.insert(name)) {
        return Err(EnsembleError::ConcatMismatch(format!(
            "member {duplicate} appears more than once"
        )));
    }
    if first.dim(dim).is_some() || first.variable(dim).is_some() {
        return Err(EnsembleError::ConcatMismatch(format!(
            "members already use the name {dim}"
        )));
    }

    let names: BTreeSet<&String> = first.variables.keys().collect();
    for (member, dataset) in &members[1..] {
        let other: BTreeSet<&String> = dataset.variables.keys().collect();
        if other != names {
            return Err(EnsembleError::ConcatMismatch(format!(
                "member {member} has a different set of variables"
            )));
        }
        for (name, variable) in &first.variables {
            let theirs = &dataset.variables[name];
            if theirs.dims != variable.dims
                || dataset.shape(theirs)? != first.shape(variable)?
                || theirs.data_type() != variable.data_type()
            {
                return Err(EnsembleError::ConcatMismatch(format!(
                    "variable {name} of member {member} differs in shape or type"
                )));
            }
        }
    }

    let count = members.len();
    let mut combined = Dataset::new();
    combined.add_dim(Dimension::new(dim, count))?;
    for existing in &first.dims {
        combined.add_dim(Dimension::new(existing.name.clone(), existing.len))?;
    }
    combined.attrs = first.attrs.clone();

    for (name, variable) in &first.variables {
        let stack = !first.is_coordinate(name)
            || members[1..]
                .iter()
                .any(|(_, ds)| !ds.variables[name].values.identical(&variable.values));

        if !stack {
            combined.add_variable(name.clone(), variable.clone())?;
            continue;
        }

        let mut values = Values::with_capacity(variable.data_type(), variable.values.len() * count);
        for (_, dataset) in &members {
            values.extend_from(&dataset.variables[name].values)?;
        }
        let mut dims = Vec::with_capacity(variable.dims.len() + 1);
        dims.push(dim.to_string());
        dims.extend(variable.dims.iter().cloned());
        combined.add_variable(
            name.clone(),
            Variable {
                dims,
                attrs: variable.attrs.clone(),
                values,
            },
        )?;
    }

    let names = members.into_iter().map(|(name, _)| name).collect();
    combined.add_variable(
        dim,
        Variable::new([dim], Values::Str(names))
            .with_attr("long_name", AttrValue::text("ensemble member")),
    )?;

    Ok(combined)
}

/// Member names stored in the `dim` coordinate, in stacking order.
pub fn member_names(dataset: &Dataset, dim: &str) -> Result<Vec<String>> {
    let variable = dataset.require(dim, "combined dataset")?;
    match &variable.values {
        Values::Str(names) => Ok(names.clone()),
        other => Err(EnsembleError::InvalidDataset(format!(
            "coordinate {dim} holds {} values, not strings",
            other.data_type().name()
        ))),
    }
}

/// Slice a single member out of a stacked dataset.
///
/// The `dim` dimension disappears; the member's name is kept as a scalar
/// string coordinate.
pub fn select_member(dataset: &Dataset, dim: &str, member: &str) -> Result<Dataset> {
    let names = member_names(dataset, dim)?;
    let index = names.iter().position(|n| n == member).ok_or_else(|| {
        EnsembleError::InvalidDataset(format!("member {member} not found along {dim}"))
    })?;

    let mut selected = Dataset {
        dims: dataset
            .dims
            .iter()
            .filter(|d| d.name != dim)
            .cloned()
            .collect(),
        variables: Default::default(),
        attrs: dataset.attrs.clone(),
    };

    for (name, variable) in &dataset.variables {
        if variable.dims.first().is_some_and(|d| d == dim) {
            let stride = dataset.leading_stride(variable)?;
            let values = variable
                .values
                .slice(index * stride..(index + 1) * stride)?;
            selected.add_variable(
                name.clone(),
                Variable {
                    dims: variable.dims[1..].to_vec(),
                    attrs: variable.attrs.clone(),
                    values,
                },
            )?;
        } else {
            selected.add_variable(name.clone(), variable.clone())?;
        }
    }

    Ok(selected)
}

// =============================================================================
// TESTS
// =============================================================================
