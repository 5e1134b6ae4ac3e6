//! Production chain resolver
//!
//! Walks the recipe graph from a target item down to raw resources and builds
//! a [`ProductionNode`] tree. Each node records the rate it must supply, the
//! power its standard recipe has to run at, and how many machines that takes.
//!
//! Rates are threaded through the recursion unrounded. A child's rate is
//! exactly `input.amount * parent.production_power`; rounding is left to
//! [`crate::report`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, info_span};

use crate::catalog::{Catalog, MemoCatalog};
use crate::error::{CatalogError, RecordKind, ResolverError};
use crate::models::{Byproduct, Item, Machine, PlanLine, ProductionNode, Recipe, RecipeInput};
use crate::policy::{self, LeafReason};

/// Cooperative cancellation shared between a caller and an in-flight resolve.
///
/// Cloning shares the flag. A deadline, if set, cancels once it passes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Resolve the inputs of a recipe on the rayon pool.
    pub parallel: bool,
    pub cancel: CancelToken,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            cancel: CancelToken::new(),
        }
    }
}

impl ResolveOptions {
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}

/// Resolve the production chain for `item_id` at `required_rate` per minute.
pub fn resolve<C: Catalog + ?Sized>(
    item_id: &str,
    required_rate: f64,
    catalog: &C,
) -> Result<ProductionNode, ResolverError> {
    resolve_with(item_id, required_rate, catalog, &ResolveOptions::default())
}

pub fn resolve_with<C: Catalog + ?Sized>(
    item_id: &str,
    required_rate: f64,
    catalog: &C,
    options: &ResolveOptions,
) -> Result<ProductionNode, ResolverError> {
    validate_rate(required_rate)?;

    let _span = info_span!("resolve", item = item_id, rate = required_rate).entered();
    let memo = MemoCatalog::new(catalog);
    let resolver = Resolver {
        catalog: &memo,
        cancel: &options.cancel,
        parallel: options.parallel,
    };

    let root = resolver.resolve_node(item_id, required_rate, &[])?;
    info!(
        nodes = root.node_count(),
        depth = root.depth(),
        "resolved production chain"
    );
    Ok(root)
}

/// Resolve every line of a plan, one tree per line.
///
/// All rates are validated before any line is resolved. Any failure aborts
/// the whole plan.
pub fn resolve_plan<C: Catalog + ?Sized>(
    lines: &[PlanLine],
    catalog: &C,
    options: &ResolveOptions,
) -> Result<Vec<ProductionNode>, ResolverError> {
    for line in lines {
        validate_rate(line.rate)?;
    }
    lines
        .iter()
        .map(|line| resolve_with(&line.item_id, line.rate, catalog, options))
        .collect()
}

fn validate_rate(rate: f64) -> Result<(), ResolverError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(ResolverError::InvalidRequest { rate })
    }
}

struct Resolver<'a, M> {
    catalog: &'a M,
    cancel: &'a CancelToken,
    parallel: bool,
}

impl<M: Catalog> Resolver<'_, M> {
    fn resolve_node(
        &self,
        item_id: &str,
        rate: f64,
        path: &[String],
    ) -> Result<ProductionNode, ResolverError> {
        if let Some(start) = path.iter().position(|p| p == item_id) {
            let mut cycle = path[start..].to_vec();
            cycle.push(item_id.to_string());
            return Err(ResolverError::CyclicRecipe { path: cycle });
        }

        let item = self.item(item_id)?;
        let recipe = self.standard_recipe(item_id)?;
        let recipe = match (policy::terminal_leaf(&item, recipe.is_some()), recipe) {
            (None, Some(recipe)) => recipe,
            (reason, _) => {
                let reason = reason.unwrap_or(LeafReason::NoStandardRecipe);
                debug!(item = item_id, rate, %reason, "leaf");
                return Ok(ProductionNode::leaf(item_id, rate, reason));
            }
        };

        let nominal = recipe
            .nominal_rate(item_id)
            .ok_or_else(|| invalid_recipe(&recipe, item_id, "no output entry for item"))?;
        if !(nominal.is_finite() && nominal > 0.0) {
            return Err(invalid_recipe(&recipe, item_id, "output amount is not positive"));
        }

        let production_power = rate / nominal;
        let machine_count = production_power.ceil() as u64;
        let machine = self.machine(&recipe.produced_in)?;
        debug!(
            item = item_id,
            rate,
            recipe = %recipe.id,
            machine = %machine.id,
            production_power,
            machine_count,
            "expanding"
        );

        let mut child_path = Vec::with_capacity(path.len() + 1);
        child_path.extend_from_slice(path);
        child_path.push(item_id.to_string());

        let expand = |input: &RecipeInput| self.resolve_input(input, production_power, &child_path);
        let children = if self.parallel && recipe.inputs.len() > 1 {
            recipe
                .inputs
                .par_iter()
                .map(expand)
                .collect::<Result<Vec<_>, _>>()?
        } else {
            recipe
                .inputs
                .iter()
                .map(expand)
                .collect::<Result<Vec<_>, _>>()?
        };

        // every output other than the target, as the recipe lists them
        let byproducts = recipe
            .outputs
            .iter()
            .filter(|o| o.item_id != item_id)
            .map(|o| Byproduct {
                item_id: o.item_id.clone(),
                rate: o.amount * production_power,
            })
            .collect();

        Ok(ProductionNode {
            item_id: item_id.to_string(),
            required_rate: rate,
            production_power: Some(production_power),
            machine_id: Some(machine.id),
            machine_count,
            children,
            byproducts,
            leaf_reason: None,
        })
    }

    fn resolve_input(
        &self,
        input: &RecipeInput,
        production_power: f64,
        path: &[String],
    ) -> Result<ProductionNode, ResolverError> {
        let rate = input.amount * production_power;
        let item = self.item(&input.item_id)?;
        if let Some(reason) = policy::unexpanded_input(&item) {
            debug!(item = %input.item_id, rate, %reason, "input not expanded");
            return Ok(ProductionNode::leaf(&input.item_id, rate, reason));
        }
        self.resolve_node(&input.item_id, rate, path)
    }

    fn check_cancelled(&self) -> Result<(), ResolverError> {
        if self.cancel.is_cancelled() {
            Err(ResolverError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn item(&self, item_id: &str) -> Result<Item, ResolverError> {
        self.check_cancelled()?;
        self.catalog
            .item(item_id)
            .map_err(|e| self.lookup_failed(RecordKind::Item, item_id, e))?
            .ok_or_else(|| not_found(RecordKind::Item, item_id))
    }

    fn machine(&self, machine_id: &str) -> Result<Machine, ResolverError> {
        self.check_cancelled()?;
        self.catalog
            .machine(machine_id)
            .map_err(|e| self.lookup_failed(RecordKind::Machine, machine_id, e))?
            .ok_or_else(|| not_found(RecordKind::Machine, machine_id))
    }

    fn standard_recipe(&self, item_id: &str) -> Result<Option<Recipe>, ResolverError> {
        self.check_cancelled()?;
        self.catalog
            .standard_recipe(item_id)
            .map_err(|e| self.lookup_failed(RecordKind::StandardRecipe, item_id, e))
    }

    /// A backend failure that outlived the catalog's retries. If the call was
    /// cancelled meanwhile, report that instead.
    fn lookup_failed(&self, kind: RecordKind, id: &str, err: CatalogError) -> ResolverError {
        if self.cancel.is_cancelled() {
            return ResolverError::Cancelled;
        }
        ResolverError::CatalogLookup {
            kind,
            id: id.to_string(),
            source: Some(err),
        }
    }
}

fn not_found(kind: RecordKind, id: &str) -> ResolverError {
    ResolverError::CatalogLookup {
        kind,
        id: id.to_string(),
        source: None,
    }
}

fn invalid_recipe(recipe: &Recipe, item_id: &str, reason: &'static str) -> ResolverError {
    ResolverError::InvalidRecipe {
        recipe_id: recipe.id.clone(),
        item_id: item_id.to_string(),
        reason,
    }
}
