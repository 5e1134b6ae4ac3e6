//! Small built-in catalog for trying the planner without a game dataset

use anyhow::Result;
use rusqlite::Connection;

use crate::catalog::{CatalogBuildError, InMemoryCatalog};
use crate::db;
use crate::models::{COLLECTABLE, Item, Machine, RAW_RESOURCES, Recipe, RecipeInput, RecipeOutput};

const ITEMS: &[(&str, &str, &str)] = &[
    ("IronOre", "Iron Ore", RAW_RESOURCES),
    ("CopperOre", "Copper Ore", RAW_RESOURCES),
    ("Limestone", "Limestone", RAW_RESOURCES),
    ("CrudeOil", "Crude Oil", RAW_RESOURCES),
    ("Leaves", "Leaves", COLLECTABLE),
    ("IronIngot", "Iron Ingot", "Ingots"),
    ("CopperIngot", "Copper Ingot", "Ingots"),
    ("IronPlate", "Iron Plate", "Standard Parts"),
    ("IronRod", "Iron Rod", "Standard Parts"),
    ("Screw", "Screw", "Standard Parts"),
    ("ReinforcedIronPlate", "Reinforced Iron Plate", "Standard Parts"),
    ("Rotor", "Rotor", "Standard Parts"),
    ("ModularFrame", "Modular Frame", "Standard Parts"),
    ("Wire", "Wire", "Electronics"),
    ("Cable", "Cable", "Electronics"),
    ("Concrete", "Concrete", "Compounds"),
    ("Biomass", "Biomass", "Biomass"),
    ("Fuel", "Fuel", "Oil Products"),
    ("PolymerResin", "Polymer Resin", "Oil Products"),
    ("Plastic", "Plastic", "Oil Products"),
    ("HeavyOilResidue", "Heavy Oil Residue", "Oil Products"),
];

const MACHINES: &[(&str, &str)] = &[
    ("Smelter", "Smelter"),
    ("Constructor", "Constructor"),
    ("Assembler", "Assembler"),
    ("Refinery", "Refinery"),
];

type Amounts = &'static [(&'static str, f64)];

// (recipe id, machine, outputs, inputs); the first output is the standard one
const RECIPES: &[(&str, &str, Amounts, Amounts)] = &[
    ("Recipe_IngotIron", "Smelter", &[("IronIngot", 30.0)], &[("IronOre", 30.0)]),
    ("Recipe_IngotCopper", "Smelter", &[("CopperIngot", 30.0)], &[("CopperOre", 30.0)]),
    ("Recipe_IronPlate", "Constructor", &[("IronPlate", 20.0)], &[("IronIngot", 30.0)]),
    ("Recipe_IronRod", "Constructor", &[("IronRod", 15.0)], &[("IronIngot", 15.0)]),
    ("Recipe_Screw", "Constructor", &[("Screw", 40.0)], &[("IronRod", 10.0)]),
    ("Recipe_Wire", "Constructor", &[("Wire", 30.0)], &[("CopperIngot", 15.0)]),
    ("Recipe_Cable", "Constructor", &[("Cable", 30.0)], &[("Wire", 60.0)]),
    ("Recipe_Concrete", "Constructor", &[("Concrete", 15.0)], &[("Limestone", 45.0)]),
    ("Recipe_Biomass_Leaves", "Constructor", &[("Biomass", 60.0)], &[("Leaves", 120.0)]),
    (
        "Recipe_IronPlateReinforced",
        "Assembler",
        &[("ReinforcedIronPlate", 5.0)],
        &[("IronPlate", 30.0), ("Screw", 60.0)],
    ),
    (
        "Recipe_Rotor",
        "Assembler",
        &[("Rotor", 4.0)],
        &[("IronRod", 20.0), ("Screw", 100.0)],
    ),
    (
        "Recipe_ModularFrame",
        "Assembler",
        &[("ModularFrame", 2.0)],
        &[("ReinforcedIronPlate", 3.0), ("IronRod", 12.0)],
    ),
    (
        "Recipe_LiquidFuel",
        "Refinery",
        &[("Fuel", 40.0), ("PolymerResin", 30.0)],
        &[("CrudeOil", 60.0)],
    ),
    (
        "Recipe_Plastic",
        "Refinery",
        &[("Plastic", 20.0), ("HeavyOilResidue", 10.0)],
        &[("CrudeOil", 30.0)],
    ),
];

/// Build the sample catalog in memory.
pub fn sample_catalog() -> Result<InMemoryCatalog, CatalogBuildError> {
    let mut catalog = InMemoryCatalog::new();

    for (order, (id, name, category)) in ITEMS.iter().enumerate() {
        catalog.insert_item(Item {
            id: id.to_string(),
            display_name: name.to_string(),
            icon_name: format!("{id}_256.png"),
            category: category.to_string(),
            display_order: order as i64,
        });
    }

    for (id, name) in MACHINES {
        catalog.insert_machine(Machine {
            id: id.to_string(),
            display_name: name.to_string(),
            icon_name: format!("{id}_256.png"),
        });
    }

    for (id, machine, outputs, inputs) in RECIPES {
        let recipe = Recipe {
            id: id.to_string(),
            produced_in: machine.to_string(),
            display_name: id.trim_start_matches("Recipe_").replace('_', " "),
            outputs: outputs
                .iter()
                .enumerate()
                .map(|(i, (item, amount))| RecipeOutput {
                    recipe_id: id.to_string(),
                    item_id: item.to_string(),
                    amount: *amount,
                    is_standard_recipe: i == 0,
                })
                .collect(),
            inputs: inputs
                .iter()
                .map(|(item, amount)| RecipeInput {
                    recipe_id: id.to_string(),
                    item_id: item.to_string(),
                    amount: *amount,
                })
                .collect(),
        };
        catalog.insert_recipe(recipe)?;
    }

    Ok(catalog)
}

/// Replace the database contents with the sample catalog.
pub fn load_sample_data(conn: &Connection) -> Result<usize> {
    let doc = sample_catalog()?.to_document();
    db::replace_catalog(conn, &doc)?;
    Ok(doc.recipes.len())
}
