//! # Analysis Module
//!
//! The transform applied to each member after its files are combined.
//!
//! An [`Analysis`] names the variables it needs, which decides which
//! variable directories discovery scans, and maps the combined member
//! dataset to its output. Implementations must be `Send + Sync`: the
//! same instance is shared by every worker.

use crate::dataset::{AttrValue, Dataset, Variable};
use crate::{EnsembleError, Result};

/// A per-member transform.
pub trait Analysis: Send + Sync {
    /// Short identifier used on the command line.
    fn name(&self) -> &'static str;

    /// Variables the transform reads.
    fn variables(&self) -> &'static [&'static str];

    /// Transform one member's dataset.
    fn apply(&self, dataset: Dataset, case: &str) -> Result<Dataset>;
}

// =============================================================================
// CLOUD RADIATIVE EFFECT
// =============================================================================

/// Long- and short-wave cloud radiative effect at the top of the model.
///
/// `LWCRE = FLNT - FLNTC`, `SWCRE = FSNT - FSNTC`. The inputs are kept in
/// the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudRadiativeEffect;

impl CloudRadiativeEffect {
    fn difference(
        &self,
        dataset: &Dataset,
        case: &str,
        total: &str,
        clear_sky: &str,
        long_name: &str,
    ) -> Result<Variable> {
        let a = dataset.require(total, case)?;
        let b = dataset.require(clear_sky, case)?;
        if a.dims != b.dims {
            return Err(EnsembleError::Analysis {
                analysis: self.name().to_string(),
                case: case.to_string(),
                reason: format!("{total} and {clear_sky} have different dimensions"),
            });
        }
        let values = a.values.difference(&b.values)?;
        Ok(Variable::new(a.dims.iter().cloned(), values)
            .with_attr("long_name", AttrValue::text(long_name))
            .with_attr("units", AttrValue::text("W/m2")))
    }
}

impl Analysis for CloudRadiativeEffect {
    fn name(&self) -> &'static str {
        "cre"
    }

    fn variables(&self) -> &'static [&'static str] {
        &["FLNT", "FLNTC", "FSNT", "FSNTC"]
    }

    fn apply(&self, mut dataset: Dataset, case: &str) -> Result<Dataset> {
        let lwcre = self.difference(
            &dataset,
            case,
            "FLNT",
            "FLNTC",
            "Longwave cloud radiative effect",
        )?;
        let swcre = self.difference(
            &dataset,
            case,
            "FSNT",
            "FSNTC",
            "Shortwave cloud radiative effect",
        )?;
        dataset.add_variable("LWCRE", lwcre)?;
        dataset.add_variable("SWCRE", swcre)?;
        Ok(dataset)
    }
}

/// Names accepted by [`analysis_by_name`].
pub const ANALYSES: &[&str] = &["cre"];

/// Look up a built-in analysis.
pub fn analysis_by_name(name: &str) -> Option<Box<dyn Analysis>> {
    match name.to_lowercase().as_str() {
        "cre" | "cloud_radiative_effect" => Some(Box::new(CloudRadiativeEffect)),
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================
