//! Game dataset extraction
//!
//! Parses the `Docs.json`-style dataset shipped with the game (an array of
//! `{ "NativeClass": ..., "Classes": [...] }` blocks) into catalog records:
//! item descriptors, manufacturing machines and their recipes. Recipe amounts
//! are converted to per-minute rates.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::catalog::CatalogDocument;
use crate::db;
use crate::models::{COLLECTABLE, Item, Machine, RAW_RESOURCES, Recipe, RecipeInput, RecipeOutput};

/// Fluids are stored in litres, displayed in cubic metres.
const FLUID_UNIT: f64 = 1000.0;

#[derive(Debug, Deserialize)]
struct NativeClassBlock {
    #[serde(rename = "NativeClass")]
    native_class: String,
    #[serde(rename = "Classes", default)]
    classes: Vec<Value>,
}

#[derive(Clone, Copy)]
enum ClassKind {
    Item(&'static str),
    Machine,
    Recipe,
    Ignored,
}

fn classify(native: &str) -> ClassKind {
    match native {
        "FGResourceDescriptor" => ClassKind::Item(RAW_RESOURCES),
        "FGItemDescriptor" => ClassKind::Item("Parts"),
        "FGItemDescriptorBiomass" => ClassKind::Item("Biomass"),
        "FGItemDescriptorNuclearFuel" => ClassKind::Item("Nuclear"),
        "FGConsumableDescriptor" => ClassKind::Item(COLLECTABLE),
        "FGEquipmentDescriptor" => ClassKind::Item("Equipment"),
        "FGPowerShardDescriptor" => ClassKind::Item("Power Shards"),
        "FGAmmoTypeProjectile" | "FGAmmoTypeInstantHit" | "FGAmmoTypeSpreadshot" => {
            ClassKind::Item("Ammunition")
        }
        "FGBuildableManufacturer" | "FGBuildableManufacturerVariablePower" => ClassKind::Machine,
        "FGRecipe" => ClassKind::Recipe,
        _ => ClassKind::Ignored,
    }
}

struct Patterns {
    native: Regex,
    short_id: Regex,
    amount: Regex,
    building: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        Ok(Self {
            // /Script/CoreUObject.Class'/Script/FactoryGame.FGRecipe'
            native: Regex::new(r"FactoryGame\.(\w+)'?$")?,
            // Desc_IronIngot_C, Build_SmelterMk1_C
            short_id: Regex::new(r"^(?:Desc_|Build_|BP_|Recipe_)?(\w+?)(?:_C)?$")?,
            // ...Desc_IronIngot.Desc_IronIngot_C'",Amount=3
            amount: Regex::new(r#"\.(\w+_C)['"]*,Amount=(\d+(?:\.\d+)?)"#)?,
            building: Regex::new(r"\.(Build_\w+_C)")?,
        })
    }

    fn short_id(&self, class_name: &str) -> String {
        self.short_id
            .captures(class_name)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| class_name.to_string())
    }
}

/// Items, machines and recipes pulled from one or more dataset files.
#[derive(Debug, Default)]
pub struct ExtractedDataset {
    pub items: Vec<Item>,
    pub machines: Vec<Machine>,
    pub recipes: Vec<Recipe>,
    pub skipped_recipes: usize,
}

#[derive(Debug, Default)]
struct RawRecipe {
    class_name: String,
    display_name: String,
    ingredients: String,
    products: String,
    duration: f64,
    produced_in: String,
}

/// A dataset file, decoded once when it is found.
#[derive(Debug)]
pub struct DatasetFile {
    pub path: PathBuf,
    pub content: String,
}

/// Find every `.json` file under `path` that looks like a game dataset.
pub fn find_dataset_files(path: &Path) -> Result<Vec<DatasetFile>> {
    if path.is_file() {
        let content = read_dataset(path)?;
        return Ok(vec![DatasetFile {
            path: path.to_path_buf(),
            content,
        }]);
    }

    let mut datasets = Vec::new();
    for entry in WalkDir::new(path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let file = entry.path();
        if file.extension().is_some_and(|ext| ext == "json") {
            match read_dataset(file) {
                Ok(content) if content.contains("NativeClass") => datasets.push(DatasetFile {
                    path: file.to_path_buf(),
                    content,
                }),
                Ok(_) => debug!(file = %file.display(), "not a dataset"),
                Err(e) => warn!(file = %file.display(), error = %e, "unreadable json file"),
            }
        }
    }

    Ok(datasets)
}

/// Read a dataset file. The game ships it as UTF-16 LE with a BOM.
fn read_dataset(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    if let [0xFF, 0xFE, rest @ ..] = bytes.as_slice() {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16(&units)
            .with_context(|| format!("Invalid UTF-16 in {}", path.display()));
    }

    let text = String::from_utf8(bytes)
        .with_context(|| format!("Invalid UTF-8 in {}", path.display()))?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn str_field<'a>(class: &'a Value, key: &str) -> &'a str {
    class.get(key).and_then(Value::as_str).unwrap_or("")
}

/// Parse the given dataset files into one dataset. On duplicate class names
/// the first file wins.
pub fn parse_datasets(files: &[DatasetFile]) -> Result<ExtractedDataset> {
    let patterns = Patterns::new()?;

    let mut seen = HashSet::new();
    let mut items: Vec<(Item, bool)> = Vec::new(); // (item, is_fluid)
    let mut machines = Vec::new();
    let mut raw_recipes = Vec::new();

    for file in files {
        let blocks: Vec<NativeClassBlock> = serde_json::from_str(&file.content)
            .with_context(|| format!("Failed to parse {}", file.path.display()))?;

        for block in blocks {
            let Some(native) = patterns.native.captures(&block.native_class) else {
                continue;
            };
            let kind = classify(&native[1]);

            for class in &block.classes {
                let class_name = str_field(class, "ClassName");
                if class_name.is_empty() || !seen.insert(class_name.to_string()) {
                    continue;
                }
                let id = patterns.short_id(class_name);
                let display_name = str_field(class, "mDisplayName").to_string();

                match kind {
                    ClassKind::Item(category) => {
                        let form = str_field(class, "mForm");
                        let is_fluid = form == "RF_LIQUID" || form == "RF_GAS";
                        let category = if is_fluid && category == "Parts" {
                            "Fluids"
                        } else {
                            category
                        };
                        items.push((
                            Item {
                                icon_name: format!("{id}_256.png"),
                                id,
                                display_name,
                                category: category.to_string(),
                                display_order: 0,
                            },
                            is_fluid,
                        ));
                    }
                    ClassKind::Machine => machines.push(Machine {
                        icon_name: format!("{id}_256.png"),
                        id,
                        display_name,
                    }),
                    ClassKind::Recipe => raw_recipes.push(RawRecipe {
                        class_name: class_name.to_string(),
                        display_name,
                        ingredients: str_field(class, "mIngredients").to_string(),
                        products: str_field(class, "mProduct").to_string(),
                        duration: str_field(class, "mManufactoringDuration")
                            .parse()
                            .unwrap_or(0.0),
                        produced_in: str_field(class, "mProducedIn").to_string(),
                    }),
                    ClassKind::Ignored => {}
                }
            }
        }
    }

    let machine_ids: HashSet<String> = machines.iter().map(|m| m.id.clone()).collect();
    let fluids: HashSet<String> = items
        .iter()
        .filter(|(_, fluid)| *fluid)
        .map(|(i, _)| i.id.clone())
        .collect();

    let mut dataset = ExtractedDataset {
        machines,
        ..ExtractedDataset::default()
    };
    let mut has_standard = HashSet::new();

    for raw in &raw_recipes {
        match build_recipe(raw, &patterns, &machine_ids, &fluids, &mut has_standard) {
            Some(recipe) => dataset.recipes.push(recipe),
            None => {
                debug!(recipe = %raw.class_name, "skipped recipe");
                dataset.skipped_recipes += 1;
            }
        }
    }

    // Items nothing can manufacture are gathered in the world
    let produced: HashSet<&str> = dataset
        .recipes
        .iter()
        .flat_map(|r| r.outputs.iter().map(|o| o.item_id.as_str()))
        .collect();
    let mut next_order: HashMap<String, i64> = HashMap::new();
    for (mut item, _) in items {
        if item.category != RAW_RESOURCES && !produced.contains(item.id.as_str()) {
            item.category = COLLECTABLE.to_string();
        }
        let order = next_order.entry(item.category.clone()).or_default();
        item.display_order = *order;
        *order += 1;
        dataset.items.push(item);
    }

    Ok(dataset)
}

fn build_recipe(
    raw: &RawRecipe,
    patterns: &Patterns,
    machine_ids: &HashSet<String>,
    fluids: &HashSet<String>,
    has_standard: &mut HashSet<String>,
) -> Option<Recipe> {
    if !(raw.duration > 0.0) {
        return None;
    }

    // Build-gun and workbench recipes name no manufacturing machine
    let produced_in = patterns
        .building
        .captures_iter(&raw.produced_in)
        .map(|c| patterns.short_id(&c[1]))
        .find(|id| machine_ids.contains(id))?;

    let id = patterns.short_id(&raw.class_name);
    let per_minute = |item_id: &str, amount: f64| {
        let rate = amount * 60.0 / raw.duration;
        if fluids.contains(item_id) {
            rate / FLUID_UNIT
        } else {
            rate
        }
    };
    let entries = |text: &str| -> Vec<(String, f64)> {
        patterns
            .amount
            .captures_iter(text)
            .filter_map(|c| {
                let item_id = patterns.short_id(&c[1]);
                let amount: f64 = c[2].parse().ok()?;
                let rate = per_minute(&item_id, amount);
                Some((item_id, rate))
            })
            .collect()
    };

    let products = entries(&raw.products);
    if products.is_empty() {
        return None;
    }

    let alternate = raw.class_name.contains("Alternate");
    let outputs = products
        .into_iter()
        .enumerate()
        .map(|(i, (item_id, amount))| {
            let is_standard_recipe = i == 0 && !alternate && has_standard.insert(item_id.clone());
            RecipeOutput {
                recipe_id: id.clone(),
                item_id,
                amount,
                is_standard_recipe,
            }
        })
        .collect();
    let inputs = entries(&raw.ingredients)
        .into_iter()
        .map(|(item_id, amount)| RecipeInput {
            recipe_id: id.clone(),
            item_id,
            amount,
        })
        .collect();

    Some(Recipe {
        id,
        produced_in,
        display_name: raw.display_name.clone(),
        outputs,
        inputs,
    })
}

/// Extract all catalog data under `path` and populate the database.
///
/// The write is atomic: with `clear` the old catalog is replaced, otherwise
/// the dataset is merged in. Either way a failure leaves the store as it was.
pub fn extract_to_database(conn: &Connection, path: &Path, clear: bool) -> Result<ExtractStats> {
    info!(path = %path.display(), "scanning for game datasets");
    let files = find_dataset_files(path)?;
    info!(count = files.len(), "found dataset files");

    let dataset = parse_datasets(&files)?;
    let stats = ExtractStats {
        files: files.len(),
        items: dataset.items.len(),
        machines: dataset.machines.len(),
        recipes: dataset.recipes.len(),
        standard: dataset
            .recipes
            .iter()
            .flat_map(|r| &r.outputs)
            .filter(|o| o.is_standard_recipe)
            .count(),
        skipped: dataset.skipped_recipes,
    };

    let doc = CatalogDocument {
        items: dataset.items,
        machines: dataset.machines,
        recipes: dataset.recipes,
    };
    if clear {
        db::replace_catalog(conn, &doc)?;
    } else {
        db::store_document(conn, &doc)?;
    }

    Ok(stats)
}

#[derive(Debug, Default)]
pub struct ExtractStats {
    pub files: usize,
    pub items: usize,
    pub machines: usize,
    pub recipes: usize,
    pub standard: usize,
    pub skipped: usize,
}

impl std::fmt::Display for ExtractStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Extracted {} items, {} machines, {} recipes ({} standard) from {} file(s). Skipped recipes: {}",
            self.items, self.machines, self.recipes, self.standard, self.files, self.skipped
        )
    }
}
