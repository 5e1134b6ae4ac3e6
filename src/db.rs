//! Database schema and operations

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::catalog::{Catalog, CatalogDocument};
use crate::error::CatalogError;
use crate::models::{Item, Machine, Recipe, RecipeInput, RecipeOutput};

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            icon_name TEXT NOT NULL,
            category TEXT NOT NULL,
            display_order INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS machines (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            icon_name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recipes (
            id TEXT PRIMARY KEY,
            produced_in TEXT NOT NULL,
            display_name TEXT NOT NULL
        );

        -- Output order matters: the first row matching an item supplies its rate
        CREATE TABLE IF NOT EXISTS recipe_outputs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            recipe_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            amount REAL NOT NULL,
            is_standard_recipe INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS recipe_inputs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            recipe_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            amount REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_recipe_outputs_recipe ON recipe_outputs(recipe_id);
        CREATE INDEX IF NOT EXISTS idx_recipe_outputs_item ON recipe_outputs(item_id);
        CREATE INDEX IF NOT EXISTS idx_recipe_inputs_recipe ON recipe_inputs(recipe_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_recipe_outputs_standard
            ON recipe_outputs(item_id) WHERE is_standard_recipe = 1;
        "#,
    )?;
    Ok(())
}

/// Insert or replace an item
pub fn upsert_item(conn: &Connection, item: &Item) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO items (id, display_name, icon_name, category, display_order)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        (
            &item.id,
            &item.display_name,
            &item.icon_name,
            &item.category,
            item.display_order,
        ),
    )?;
    Ok(())
}

/// Insert or replace a machine
pub fn upsert_machine(conn: &Connection, machine: &Machine) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO machines (id, display_name, icon_name) VALUES (?1, ?2, ?3)",
        (&machine.id, &machine.display_name, &machine.icon_name),
    )?;
    Ok(())
}

/// Insert a recipe with its outputs and inputs, replacing any previous rows
/// for the same recipe id
pub fn insert_recipe(conn: &Connection, recipe: &Recipe) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    write_recipe(&tx, recipe)?;
    tx.commit()?;
    Ok(())
}

// Runs inside the caller's transaction.
fn write_recipe(tx: &Connection, recipe: &Recipe) -> Result<()> {
    tx.execute("DELETE FROM recipe_outputs WHERE recipe_id = ?1", [&recipe.id])?;
    tx.execute("DELETE FROM recipe_inputs WHERE recipe_id = ?1", [&recipe.id])?;
    tx.execute(
        "INSERT OR REPLACE INTO recipes (id, produced_in, display_name) VALUES (?1, ?2, ?3)",
        (&recipe.id, &recipe.produced_in, &recipe.display_name),
    )?;
    for output in &recipe.outputs {
        tx.execute(
            "INSERT INTO recipe_outputs (recipe_id, item_id, amount, is_standard_recipe)
             VALUES (?1, ?2, ?3, ?4)",
            (
                &recipe.id,
                &output.item_id,
                output.amount,
                output.is_standard_recipe,
            ),
        )?;
    }
    for input in &recipe.inputs {
        tx.execute(
            "INSERT INTO recipe_inputs (recipe_id, item_id, amount) VALUES (?1, ?2, ?3)",
            (&recipe.id, &input.item_id, input.amount),
        )?;
    }
    Ok(())
}

/// Write a whole catalog document in one transaction. On error nothing from
/// the document is kept.
pub fn store_document(conn: &Connection, doc: &CatalogDocument) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    write_document(&tx, doc)?;
    tx.commit()?;
    Ok(())
}

/// Replace the whole catalog with `doc` in one transaction. On error the
/// previous contents are kept.
pub fn replace_catalog(conn: &Connection, doc: &CatalogDocument) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    clear_catalog(&tx)?;
    write_document(&tx, doc)?;
    tx.commit()?;
    Ok(())
}

fn write_document(tx: &Connection, doc: &CatalogDocument) -> Result<()> {
    for item in &doc.items {
        upsert_item(tx, item).with_context(|| format!("Failed to store item '{}'", item.id))?;
    }
    for machine in &doc.machines {
        upsert_machine(tx, machine)
            .with_context(|| format!("Failed to store machine '{}'", machine.id))?;
    }
    for recipe in &doc.recipes {
        write_recipe(tx, recipe).with_context(|| describe_recipe_failure(tx, recipe))?;
    }
    Ok(())
}

// Names the recipe already holding the standard slot, which is the usual
// cause when loading on top of existing data.
fn describe_recipe_failure(conn: &Connection, recipe: &Recipe) -> String {
    let holder = recipe
        .outputs
        .iter()
        .filter(|o| o.is_standard_recipe)
        .find_map(|o| {
            conn.query_row(
                "SELECT recipe_id FROM recipe_outputs
                 WHERE item_id = ?1 AND is_standard_recipe = 1 AND recipe_id != ?2",
                (&o.item_id, &recipe.id),
                |row| row.get::<_, String>(0),
            )
            .ok()
            .map(|other| (o.item_id.clone(), other))
        });

    match holder {
        Some((item, other)) => format!(
            "Failed to store recipe '{}': '{}' is already the standard recipe for '{}'",
            recipe.id, other, item
        ),
        None => format!("Failed to store recipe '{}'", recipe.id),
    }
}

/// Clear all catalog data (for re-extraction)
pub fn clear_catalog(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DELETE FROM recipe_outputs;
        DELETE FROM recipe_inputs;
        DELETE FROM recipes;
        DELETE FROM machines;
        DELETE FROM items;
        "#,
    )?;
    Ok(())
}

/// List all items produced by at least one recipe, grouped by category
pub fn list_producible_items(conn: &Connection) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.display_name, i.icon_name, i.category, i.display_order
         FROM items i
         WHERE EXISTS (SELECT 1 FROM recipe_outputs ro WHERE ro.item_id = i.id)
         ORDER BY i.category, i.display_order, i.id",
    )?;

    let rows = stmt.query_map([], item_from_row)?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// List all machines in the database
pub fn list_machines(conn: &Connection) -> Result<Vec<Machine>> {
    let mut stmt =
        conn.prepare("SELECT id, display_name, icon_name FROM machines ORDER BY display_name")?;

    let rows = stmt.query_map([], machine_from_row)?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        display_name: row.get(1)?,
        icon_name: row.get(2)?,
        category: row.get(3)?,
        display_order: row.get(4)?,
    })
}

fn machine_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Machine> {
    Ok(Machine {
        id: row.get(0)?,
        display_name: row.get(1)?,
        icon_name: row.get(2)?,
    })
}

fn query_item(conn: &Connection, id: &str) -> rusqlite::Result<Option<Item>> {
    conn.query_row(
        "SELECT id, display_name, icon_name, category, display_order FROM items WHERE id = ?1",
        [id],
        item_from_row,
    )
    .optional()
}

fn query_machine(conn: &Connection, id: &str) -> rusqlite::Result<Option<Machine>> {
    conn.query_row(
        "SELECT id, display_name, icon_name FROM machines WHERE id = ?1",
        [id],
        machine_from_row,
    )
    .optional()
}

fn query_standard_recipe(conn: &Connection, item_id: &str) -> rusqlite::Result<Option<Recipe>> {
    let header = conn
        .query_row(
            "SELECT r.id, r.produced_in, r.display_name
             FROM recipe_outputs ro
             JOIN recipes r ON ro.recipe_id = r.id
             WHERE ro.item_id = ?1 AND ro.is_standard_recipe = 1",
            [item_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((id, produced_in, display_name)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare_cached(
        "SELECT recipe_id, item_id, amount, is_standard_recipe
         FROM recipe_outputs WHERE recipe_id = ?1 ORDER BY seq",
    )?;
    let outputs = stmt
        .query_map([&id], |row| {
            Ok(RecipeOutput {
                recipe_id: row.get(0)?,
                item_id: row.get(1)?,
                amount: row.get(2)?,
                is_standard_recipe: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT recipe_id, item_id, amount FROM recipe_inputs WHERE recipe_id = ?1 ORDER BY seq",
    )?;
    let inputs = stmt
        .query_map([&id], |row| {
            Ok(RecipeInput {
                recipe_id: row.get(0)?,
                item_id: row.get(1)?,
                amount: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(Recipe {
        id,
        produced_in,
        display_name,
        outputs,
        inputs,
    }))
}

/// Catalog backed by the SQLite store.
///
/// `rusqlite::Connection` is not `Sync`, so lookups from concurrent resolver
/// branches take turns on the mutex.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self::new(conn))
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, CatalogError> {
        // a panic mid-lookup leaves no open transaction behind
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&conn)?)
    }
}

impl Catalog for SqliteCatalog {
    fn standard_recipe(&self, item_id: &str) -> Result<Option<Recipe>, CatalogError> {
        self.with_conn(|conn| query_standard_recipe(conn, item_id))
    }

    fn item(&self, item_id: &str) -> Result<Option<Item>, CatalogError> {
        self.with_conn(|conn| query_item(conn, item_id))
    }

    fn machine(&self, machine_id: &str) -> Result<Option<Machine>, CatalogError> {
        self.with_conn(|conn| query_machine(conn, machine_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::sample_catalog;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        store_document(&conn, &sample_catalog().unwrap().to_document()).unwrap();
        conn
    }

    #[test]
    fn producible_items_exclude_raw_resources() {
        let conn = seeded();
        let items = list_producible_items(&conn).unwrap();
        assert!(items.iter().any(|i| i.id == "IronPlate"));
        assert!(!items.iter().any(|i| i.id == "IronOre"));

        let keys: Vec<_> = items
            .iter()
            .map(|i| (i.category.clone(), i.display_order))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn standard_recipe_preserves_output_order() {
        let catalog = SqliteCatalog::new(seeded());
        let recipe = catalog.standard_recipe("Fuel").unwrap().unwrap();
        let ids: Vec<_> = recipe.outputs.iter().map(|o| o.item_id.as_str()).collect();
        assert_eq!(ids, ["Fuel", "PolymerResin"]);
        assert!(catalog.standard_recipe("IronOre").unwrap().is_none());
    }

    #[test]
    fn second_standard_output_for_item_is_rejected() {
        let conn = seeded();
        let duplicate = Recipe {
            id: "Recipe_Duplicate".to_string(),
            produced_in: "Constructor".to_string(),
            display_name: "Duplicate".to_string(),
            outputs: vec![RecipeOutput {
                recipe_id: "Recipe_Duplicate".to_string(),
                item_id: "IronPlate".to_string(),
                amount: 1.0,
                is_standard_recipe: true,
            }],
            inputs: vec![],
        };
        assert!(insert_recipe(&conn, &duplicate).is_err());
    }

    #[test]
    fn reinserting_recipe_replaces_rows() {
        let conn = seeded();
        let catalog_recipe = sample_catalog().unwrap().standard_recipe("IronPlate").unwrap().unwrap();
        insert_recipe(&conn, &catalog_recipe).unwrap();

        let catalog = SqliteCatalog::new(conn);
        let recipe = catalog.standard_recipe("IronPlate").unwrap().unwrap();
        assert_eq!(recipe.outputs.len(), 1);
        assert_eq!(recipe.inputs.len(), 1);
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    fn conflicting_document() -> CatalogDocument {
        CatalogDocument {
            items: vec![Item {
                id: "IronSheet".to_string(),
                display_name: "Iron Sheet".to_string(),
                icon_name: "IronSheet_256.png".to_string(),
                category: "Parts".to_string(),
                display_order: 0,
            }],
            machines: vec![Machine {
                id: "Press".to_string(),
                display_name: "Press".to_string(),
                icon_name: "Press_256.png".to_string(),
            }],
            recipes: vec![Recipe {
                id: "Recipe_PressedIngot".to_string(),
                produced_in: "Press".to_string(),
                display_name: "Pressed Ingot".to_string(),
                outputs: vec![RecipeOutput {
                    recipe_id: "Recipe_PressedIngot".to_string(),
                    item_id: "IronIngot".to_string(),
                    amount: 10.0,
                    is_standard_recipe: true,
                }],
                inputs: vec![],
            }],
        }
    }

    #[test]
    fn failed_store_leaves_catalog_untouched() {
        let conn = seeded();
        let before = [count(&conn, "items"), count(&conn, "machines"), count(&conn, "recipes")];

        let err = store_document(&conn, &conflicting_document()).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("Recipe_PressedIngot"), "{message}");
        assert!(message.contains("Recipe_IngotIron"), "{message}");

        let after = [count(&conn, "items"), count(&conn, "machines"), count(&conn, "recipes")];
        assert_eq!(before, after);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn failed_replace_keeps_previous_catalog() {
        let conn = seeded();
        let items = count(&conn, "items");

        let mut doc = conflicting_document();
        doc.recipes.push(doc.recipes[0].clone());
        doc.recipes[1].id = "Recipe_PressedIngotAgain".to_string();
        doc.recipes[1].outputs[0].recipe_id = "Recipe_PressedIngotAgain".to_string();

        assert!(replace_catalog(&conn, &doc).is_err());
        assert_eq!(count(&conn, "items"), items);
        assert!(SqliteCatalog::new(conn).standard_recipe("IronPlate").unwrap().is_some());
    }

    #[test]
    fn poisoned_connection_lock_still_serves_lookups() {
        let catalog = SqliteCatalog::new(seeded());
        std::thread::scope(|s| {
            let handle = s.spawn(|| {
                let _guard = catalog.conn.lock().unwrap();
                panic!("lookup worker died");
            });
            assert!(handle.join().is_err());
        });
        assert!(catalog.conn.is_poisoned());

        let item = catalog.item("IronIngot").unwrap();
        assert_eq!(item.map(|i| i.id).as_deref(), Some("IronIngot"));
    }

    #[test]
    fn clear_removes_everything() {
        let conn = seeded();
        clear_catalog(&conn).unwrap();
        assert!(list_producible_items(&conn).unwrap().is_empty());
        assert!(list_machines(&conn).unwrap().is_empty());
    }
}
