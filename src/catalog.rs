//! Read-only catalog of items, machines and standard recipes
//!
//! The resolver only sees the [`Catalog`] trait. Backends:
//!
//! - [`InMemoryCatalog`]: hash maps, loadable from a JSON document
//! - [`crate::db::SqliteCatalog`]: the SQLite store filled by `extract`
//! - [`RetryingCatalog`]: bounded retries of transient backend failures
//! - [`MemoCatalog`]: per-call cache used inside a single resolve

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CatalogError;
use crate::models::{Item, Machine, Recipe};
use crate::resolver::CancelToken;

/// Side-effect-free lookups. `Ok(None)` means the record does not exist.
///
/// Implementations must be safe to share across worker threads since sibling
/// subtrees may be resolved concurrently.
pub trait Catalog: Sync {
    fn standard_recipe(&self, item_id: &str) -> Result<Option<Recipe>, CatalogError>;
    fn item(&self, item_id: &str) -> Result<Option<Item>, CatalogError>;
    fn machine(&self, machine_id: &str) -> Result<Option<Machine>, CatalogError>;
}

impl<C: Catalog + ?Sized> Catalog for &C {
    fn standard_recipe(&self, item_id: &str) -> Result<Option<Recipe>, CatalogError> {
        (**self).standard_recipe(item_id)
    }

    fn item(&self, item_id: &str) -> Result<Option<Item>, CatalogError> {
        (**self).item(item_id)
    }

    fn machine(&self, machine_id: &str) -> Result<Option<Machine>, CatalogError> {
        (**self).machine(machine_id)
    }
}

// ---------------------------------------------------------------------------
// In-memory catalog
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CatalogBuildError {
    #[error("item '{item_id}' already has standard recipe '{existing}', cannot add '{recipe_id}'")]
    DuplicateStandardRecipe {
        item_id: String,
        existing: String,
        recipe_id: String,
    },

    #[error("invalid catalog document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialized form of a whole catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub machines: Vec<Machine>,
    #[serde(default)]
    pub recipes: Vec<Recipe>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    items: HashMap<String, Item>,
    machines: HashMap<String, Machine>,
    recipes: HashMap<String, Recipe>,
    standard: HashMap<String, String>, // item id -> recipe id
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(doc: CatalogDocument) -> Result<Self, CatalogBuildError> {
        let mut catalog = Self::new();
        for item in doc.items {
            catalog.insert_item(item);
        }
        for machine in doc.machines {
            catalog.insert_machine(machine);
        }
        for recipe in doc.recipes {
            catalog.insert_recipe(recipe)?;
        }
        Ok(catalog)
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogBuildError> {
        Self::from_document(serde_json::from_str(json)?)
    }

    pub fn insert_item(&mut self, item: Item) {
        self.items.insert(item.id.clone(), item);
    }

    pub fn insert_machine(&mut self, machine: Machine) {
        self.machines.insert(machine.id.clone(), machine);
    }

    /// Register a recipe. Each output flagged `is_standard_recipe` makes it
    /// the standard recipe of that output's item; a second standard recipe
    /// for the same item is rejected.
    pub fn insert_recipe(&mut self, recipe: Recipe) -> Result<(), CatalogBuildError> {
        for output in recipe.outputs.iter().filter(|o| o.is_standard_recipe) {
            if let Some(existing) = self.standard.get(&output.item_id) {
                if existing != &recipe.id {
                    return Err(CatalogBuildError::DuplicateStandardRecipe {
                        item_id: output.item_id.clone(),
                        existing: existing.clone(),
                        recipe_id: recipe.id.clone(),
                    });
                }
            }
        }
        for output in recipe.outputs.iter().filter(|o| o.is_standard_recipe) {
            self.standard
                .insert(output.item_id.clone(), recipe.id.clone());
        }
        self.recipes.insert(recipe.id.clone(), recipe);
        Ok(())
    }

    pub fn to_document(&self) -> CatalogDocument {
        let mut items: Vec<Item> = self.items.values().cloned().collect();
        items.sort_by(|a, b| {
            (a.category.as_str(), a.display_order).cmp(&(b.category.as_str(), b.display_order))
        });
        let mut machines: Vec<Machine> = self.machines.values().cloned().collect();
        machines.sort_by(|a, b| a.id.cmp(&b.id));
        let mut recipes: Vec<Recipe> = self.recipes.values().cloned().collect();
        recipes.sort_by(|a, b| a.id.cmp(&b.id));
        CatalogDocument {
            items,
            machines,
            recipes,
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn standard_recipe(&self, item_id: &str) -> Result<Option<Recipe>, CatalogError> {
        Ok(self
            .standard
            .get(item_id)
            .and_then(|recipe_id| self.recipes.get(recipe_id))
            .cloned())
    }

    fn item(&self, item_id: &str) -> Result<Option<Item>, CatalogError> {
        Ok(self.items.get(item_id).cloned())
    }

    fn machine(&self, machine_id: &str) -> Result<Option<Machine>, CatalogError> {
        Ok(self.machines.get(machine_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Retrying adapter
// ---------------------------------------------------------------------------

/// Retries transient backend failures a bounded number of times.
///
/// Permanent failures and `Ok(None)` are returned immediately. On exhaustion
/// the last transient error is surfaced unchanged. With a [`CancelToken`]
/// attached, retries stop as soon as it fires and no backoff sleeps past its
/// deadline.
#[derive(Debug)]
pub struct RetryingCatalog<C> {
    inner: C,
    max_attempts: u32,
    backoff: Duration,
    cancel: Option<CancelToken>,
}

impl<C: Catalog> RetryingCatalog<C> {
    pub fn new(inner: C, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff: Duration::from_millis(25),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn retry<T>(
        &self,
        what: &str,
        id: &str,
        mut op: impl FnMut(&C) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut attempt = 1;
        loop {
            match op(&self.inner) {
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    if self.cancelled() {
                        return Err(err);
                    }
                    warn!(what, id, attempt, error = %err, "transient catalog failure, retrying");
                    self.pause(self.backoff * attempt);
                    if self.cancelled() {
                        return Err(err);
                    }
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    // Sleeps in short slices so an explicit cancel is noticed promptly.
    fn pause(&self, delay: Duration) {
        const SLICE: Duration = Duration::from_millis(10);

        let delay = match self.cancel.as_ref().and_then(CancelToken::remaining) {
            Some(left) => delay.min(left),
            None => delay,
        };
        let Some(cancel) = &self.cancel else {
            std::thread::sleep(delay);
            return;
        };
        let until = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= until || cancel.is_cancelled() {
                return;
            }
            std::thread::sleep(SLICE.min(until - now));
        }
    }
}

impl<C: Catalog> Catalog for RetryingCatalog<C> {
    fn standard_recipe(&self, item_id: &str) -> Result<Option<Recipe>, CatalogError> {
        self.retry("recipe", item_id, |c| c.standard_recipe(item_id))
    }

    fn item(&self, item_id: &str) -> Result<Option<Item>, CatalogError> {
        self.retry("item", item_id, |c| c.item(item_id))
    }

    fn machine(&self, machine_id: &str) -> Result<Option<Machine>, CatalogError> {
        self.retry("machine", machine_id, |c| c.machine(machine_id))
    }
}

// ---------------------------------------------------------------------------
// Per-call memo
// ---------------------------------------------------------------------------

/// Caches lookups by id for the lifetime of one resolve call.
///
/// Negative answers are cached too. Errors are not, so a later lookup of the
/// same id goes back to the backend. Two threads missing the same id at once
/// may both fetch it; the answers are identical so either insert wins.
pub struct MemoCatalog<'a, C: ?Sized> {
    inner: &'a C,
    items: Mutex<HashMap<String, Option<Item>>>,
    machines: Mutex<HashMap<String, Option<Machine>>>,
    recipes: Mutex<HashMap<String, Option<Recipe>>>,
}

impl<'a, C: Catalog + ?Sized> MemoCatalog<'a, C> {
    pub fn new(inner: &'a C) -> Self {
        Self {
            inner,
            items: Mutex::new(HashMap::new()),
            machines: Mutex::new(HashMap::new()),
            recipes: Mutex::new(HashMap::new()),
        }
    }
}

fn memoized<T: Clone>(
    cache: &Mutex<HashMap<String, Option<T>>>,
    id: &str,
    fetch: impl FnOnce() -> Result<Option<T>, CatalogError>,
) -> Result<Option<T>, CatalogError> {
    if let Some(hit) = lock(cache).get(id) {
        return Ok(hit.clone());
    }
    let value = fetch()?;
    lock(cache).insert(id.to_string(), value.clone());
    Ok(value)
}

// A panicking worker cannot leave a half-written entry behind, so a poisoned
// cache is still consistent.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<C: Catalog + ?Sized> Catalog for MemoCatalog<'_, C> {
    fn standard_recipe(&self, item_id: &str) -> Result<Option<Recipe>, CatalogError> {
        memoized(&self.recipes, item_id, || self.inner.standard_recipe(item_id))
    }

    fn item(&self, item_id: &str) -> Result<Option<Item>, CatalogError> {
        memoized(&self.items, item_id, || self.inner.item(item_id))
    }

    fn machine(&self, machine_id: &str) -> Result<Option<Machine>, CatalogError> {
        memoized(&self.machines, machine_id, || self.inner.machine(machine_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecipeOutput;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn recipe(id: &str, item: &str, standard: bool) -> Recipe {
        Recipe {
            id: id.to_string(),
            produced_in: "Constructor".to_string(),
            display_name: id.to_string(),
            outputs: vec![RecipeOutput {
                recipe_id: id.to_string(),
                item_id: item.to_string(),
                amount: 20.0,
                is_standard_recipe: standard,
            }],
            inputs: vec![],
        }
    }

    #[test]
    fn second_standard_recipe_is_rejected() {
        let mut catalog = InMemoryCatalog::new();
        catalog.insert_recipe(recipe("Recipe_IronPlate", "IronPlate", true)).unwrap();
        catalog
            .insert_recipe(recipe("Recipe_Alternate_CoatedIronPlate", "IronPlate", false))
            .unwrap();

        let err = catalog
            .insert_recipe(recipe("Recipe_Other", "IronPlate", true))
            .unwrap_err();
        assert!(matches!(err, CatalogBuildError::DuplicateStandardRecipe { .. }));

        let standard = catalog.standard_recipe("IronPlate").unwrap().unwrap();
        assert_eq!(standard.id, "Recipe_IronPlate");
    }

    #[test]
    fn non_standard_recipe_is_not_returned() {
        let mut catalog = InMemoryCatalog::new();
        catalog.insert_recipe(recipe("Recipe_Alt", "Wire", false)).unwrap();
        assert!(catalog.standard_recipe("Wire").unwrap().is_none());
    }

    #[test]
    fn document_round_trip_keeps_standard_links() {
        let mut catalog = InMemoryCatalog::new();
        catalog.insert_recipe(recipe("Recipe_Wire", "Wire", true)).unwrap();
        let json = serde_json::to_string(&catalog.to_document()).unwrap();
        let restored = InMemoryCatalog::from_json(&json).unwrap();
        assert_eq!(
            restored.standard_recipe("Wire").unwrap().map(|r| r.id),
            Some("Recipe_Wire".to_string())
        );
    }

    struct Flaky {
        failures_left: AtomicU32,
        calls: AtomicU32,
        transient: bool,
    }

    impl Catalog for Flaky {
        fn standard_recipe(&self, _: &str) -> Result<Option<Recipe>, CatalogError> {
            Ok(None)
        }

        fn item(&self, _: &str) -> Result<Option<Item>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                if self.transient {
                    return Err(CatalogError::Busy("locked".into()));
                }
                return Err(CatalogError::Corrupt("bad row".into()));
            }
            Ok(None)
        }

        fn machine(&self, _: &str) -> Result<Option<Machine>, CatalogError> {
            Ok(None)
        }
    }

    fn flaky(failures: u32, transient: bool) -> Flaky {
        Flaky {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            transient,
        }
    }

    #[test]
    fn retry_recovers_from_transient_failures() {
        let catalog = RetryingCatalog::new(flaky(2, true), 3).with_backoff(Duration::ZERO);
        assert!(catalog.item("IronOre").unwrap().is_none());
        assert_eq!(catalog.into_inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let catalog = RetryingCatalog::new(flaky(5, true), 3).with_backoff(Duration::ZERO);
        assert!(matches!(catalog.item("IronOre"), Err(CatalogError::Busy(_))));
        assert_eq!(catalog.into_inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let catalog = RetryingCatalog::new(flaky(5, false), 3).with_backoff(Duration::ZERO);
        assert!(matches!(catalog.item("IronOre"), Err(CatalogError::Corrupt(_))));
        assert_eq!(catalog.into_inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_token_stops_retries_without_sleeping() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let catalog = RetryingCatalog::new(flaky(5, true), 5)
            .with_backoff(Duration::from_secs(10))
            .with_cancel(cancel);

        let started = Instant::now();
        assert!(matches!(catalog.item("IronOre"), Err(CatalogError::Busy(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(catalog.into_inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_never_sleeps_past_the_deadline() {
        let cancel = CancelToken::new().with_timeout(Duration::from_millis(50));
        let catalog = RetryingCatalog::new(flaky(5, true), 5)
            .with_backoff(Duration::from_secs(10))
            .with_cancel(cancel);

        let started = Instant::now();
        assert!(catalog.item("IronOre").is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(catalog.into_inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memo_caches_misses_but_not_errors() {
        let backend = flaky(1, true);
        let memo = MemoCatalog::new(&backend);
        assert!(memo.item("IronOre").is_err());
        assert!(memo.item("IronOre").unwrap().is_none());
        assert!(memo.item("IronOre").unwrap().is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }
}
