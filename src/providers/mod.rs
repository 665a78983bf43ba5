//! Per-namespace lookup strategies against the upstream archives.
//!
//! Each strategy is a set of ordered fallback chains. A chain is a list of
//! [`LookupStep`]s tried in order until one produces a value.

pub mod ena;
pub mod ncbi;

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{AccessionId, Outcome};
use crate::error::KiraError;

pub trait SourceStrategy: Send + Sync {
    fn resolve(&self, id: &AccessionId) -> Outcome;
}

/// `Ok(None)` is a clean miss, `Err` a soft failure of this one method.
pub type StepResult = Result<Option<String>, KiraError>;

pub trait LookupStep<C: ?Sized> {
    fn name(&self) -> &str;
    fn attempt(&self, ctx: &C) -> StepResult;
}

impl<C: ?Sized, F> LookupStep<C> for (&'static str, F)
where
    F: Fn(&C) -> StepResult,
{
    fn name(&self) -> &str {
        self.0
    }

    fn attempt(&self, ctx: &C) -> StepResult {
        (self.1)(ctx)
    }
}

#[derive(Debug, Default)]
pub struct ChainOutcome {
    pub value: Option<String>,
    /// Steps that returned a well-formed answer, hit or miss.
    pub answered: usize,
    /// Last soft failure seen while walking the chain.
    pub failure: Option<KiraError>,
}

pub fn run_chain<C: ?Sized>(
    accession: &str,
    steps: &[&dyn LookupStep<C>],
    ctx: &C,
) -> ChainOutcome {
    let mut outcome = ChainOutcome::default();
    for step in steps {
        match step.attempt(ctx) {
            Ok(Some(value)) => {
                debug!(accession, step = step.name(), %value, "lookup hit");
                outcome.answered += 1;
                outcome.value = Some(value);
                return outcome;
            }
            Ok(None) => {
                debug!(accession, step = step.name(), "lookup miss");
                outcome.answered += 1;
            }
            Err(err) => {
                warn!(accession, step = step.name(), error = %err, "lookup method failed");
                outcome.failure = Some(err);
            }
        }
    }
    outcome
}

pub(crate) fn parse_json(source_name: &'static str, body: &str) -> Result<Value, KiraError> {
    serde_json::from_str(body).map_err(|err| KiraError::malformed(source_name, err.to_string()))
}

/// First string in `items[*].<field>` starting with `prefix`.
pub(crate) fn first_field_with_prefix(items: &[Value], field: &str, prefix: &str) -> Option<String> {
    items
        .iter()
        .filter_map(|item| item[field].as_str())
        .map(str::trim)
        .find(|value| value.starts_with(prefix))
        .map(str::to_string)
}
