//! Production chain planner
//!
//! Given a catalog of items, machines and recipes, resolves the full
//! multi-tier production chain for a target item and rate: which recipes
//! run, at what power, on how many machines, and what raw inputs they draw.

pub mod catalog;
pub mod db;
pub mod error;
pub mod extract;
pub mod models;
pub mod policy;
pub mod report;
pub mod resolver;
pub mod sample;

pub use catalog::{Catalog, InMemoryCatalog, RetryingCatalog};
pub use error::{CatalogError, ResolverError};
pub use models::{
    Byproduct, Item, Machine, PlanLine, ProductionNode, Recipe, RecipeInput, RecipeOutput,
};
pub use resolver::{CancelToken, ResolveOptions, resolve, resolve_plan, resolve_with};
