//! Property-based tests for the resolver.
//!
//! Generates random layered recipe graphs (inputs always point to later
//! items, so the graph is acyclic) and checks the tree invariants.

use production_planner::models::RAW_RESOURCES;
use production_planner::{
    Catalog, InMemoryCatalog, Item, Machine, ProductionNode, Recipe, RecipeInput, RecipeOutput,
    ResolveOptions, ResolverError, resolve, resolve_with,
};
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

fn item_id(i: usize) -> String {
    format!("Item{i}")
}

fn build_catalog(
    kinds: &[u8],
    output_amounts: &[u32],
    inputs: &[Vec<(usize, u32)>],
    back_edge: bool,
) -> InMemoryCatalog {
    let n = kinds.len();
    let mut catalog = InMemoryCatalog::new();
    catalog.insert_machine(Machine {
        id: "Constructor".into(),
        display_name: "Constructor".into(),
        icon_name: "Constructor_256.png".into(),
    });

    for i in 0..n {
        // item 0 is always craftable so there is something to expand
        let kind = if i == 0 { 2 } else { kinds[i] };
        catalog.insert_item(Item {
            id: item_id(i),
            display_name: item_id(i),
            icon_name: String::new(),
            category: if kind == 0 { RAW_RESOURCES.into() } else { "Parts".into() },
            display_order: i as i64,
        });
        if kind < 2 {
            continue;
        }

        let recipe_id = format!("Recipe_{i}");
        let mut recipe_inputs: Vec<RecipeInput> = if i + 1 < n {
            inputs[i]
                .iter()
                .map(|(sel, amount)| RecipeInput {
                    recipe_id: recipe_id.clone(),
                    item_id: item_id(i + 1 + sel % (n - i - 1)),
                    amount: f64::from(*amount) / 4.0,
                })
                .collect()
        } else {
            Vec::new()
        };
        if back_edge && i + 1 == n {
            recipe_inputs.push(RecipeInput {
                recipe_id: recipe_id.clone(),
                item_id: item_id(0),
                amount: 1.0,
            });
        }

        catalog
            .insert_recipe(Recipe {
                id: recipe_id.clone(),
                produced_in: "Constructor".into(),
                display_name: recipe_id.clone(),
                outputs: vec![RecipeOutput {
                    recipe_id,
                    item_id: item_id(i),
                    amount: f64::from(output_amounts[i]) / 3.0,
                    is_standard_recipe: true,
                }],
                inputs: recipe_inputs,
            })
            .unwrap();
    }

    catalog
}

fn arb_catalog(max_items: usize) -> impl Strategy<Value = InMemoryCatalog> {
    (2..=max_items).prop_flat_map(|n| {
        (
            proptest::collection::vec(0u8..4, n),
            proptest::collection::vec(1u32..=120, n),
            proptest::collection::vec(proptest::collection::vec((0usize..64, 1u32..=200), 0..4), n),
        )
            .prop_map(|(kinds, outputs, inputs)| build_catalog(&kinds, &outputs, &inputs, false))
    })
}

/// A chain Item0 -> Item1 -> ... -> ItemN-1 -> Item0.
fn arb_cyclic_catalog(max_items: usize) -> impl Strategy<Value = InMemoryCatalog> {
    (1..=max_items).prop_flat_map(|n| {
        proptest::collection::vec(1u32..=120, n).prop_map(move |outputs| {
            let kinds = vec![2u8; n];
            let inputs: Vec<Vec<(usize, u32)>> = (0..n).map(|_| vec![(0, 4)]).collect();
            build_catalog(&kinds, &outputs, &inputs, true)
        })
    })
}

// ===========================================================================
// Invariant checks
// ===========================================================================

fn check_node(node: &ProductionNode, catalog: &InMemoryCatalog) -> Result<(), TestCaseError> {
    match node.production_power {
        None => {
            prop_assert!(node.children.is_empty());
            prop_assert_eq!(node.machine_count, 0);
            prop_assert!(node.machine_id.is_none());
            prop_assert!(node.leaf_reason.is_some());
            prop_assert!(node.byproducts.is_empty());
        }
        Some(power) => {
            let recipe = catalog.standard_recipe(&node.item_id).unwrap().unwrap();
            let nominal = recipe.nominal_rate(&node.item_id).unwrap();

            prop_assert!(power > 0.0);
            prop_assert!((power * nominal - node.required_rate).abs() <= 1e-9 * node.required_rate.max(1.0));
            prop_assert_eq!(node.machine_count, power.ceil() as u64);
            prop_assert_eq!(node.children.len(), recipe.inputs.len());
            let others = recipe.outputs.iter().filter(|o| o.item_id != node.item_id).count();
            prop_assert_eq!(node.byproducts.len(), others);

            for (child, input) in node.children.iter().zip(&recipe.inputs) {
                prop_assert_eq!(&child.item_id, &input.item_id);
                prop_assert_eq!(child.required_rate.to_bits(), (input.amount * power).to_bits());
                check_node(child, catalog)?;
            }
        }
    }
    Ok(())
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tree_invariants_hold(catalog in arb_catalog(7), rate in 0.01f64..5000.0) {
        let tree = resolve("Item0", rate, &catalog).unwrap();
        prop_assert_eq!(tree.required_rate, rate);
        check_node(&tree, &catalog)?;
    }

    #[test]
    fn resolution_is_deterministic(catalog in arb_catalog(6), rate in 0.01f64..500.0) {
        let parallel = resolve_with("Item0", rate, &catalog, &ResolveOptions::default()).unwrap();
        let again = resolve_with("Item0", rate, &catalog, &ResolveOptions::default()).unwrap();
        let sequential = resolve_with("Item0", rate, &catalog, &ResolveOptions::sequential()).unwrap();
        prop_assert_eq!(&parallel, &again);
        prop_assert_eq!(&parallel, &sequential);
    }

    #[test]
    fn cycles_are_reported_not_followed(catalog in arb_cyclic_catalog(6), rate in 0.01f64..500.0) {
        match resolve("Item0", rate, &catalog) {
            Err(ResolverError::CyclicRecipe { path }) => {
                prop_assert_eq!(path.first(), path.last());
                prop_assert_eq!(path.first().map(String::as_str), Some("Item0"));
            }
            other => prop_assert!(false, "expected a cycle, got {:?}", other),
        }
    }

    #[test]
    fn non_positive_rates_are_rejected(catalog in arb_catalog(3), rate in -1000.0f64..=0.0) {
        let rejected = matches!(
            resolve("Item0", rate, &catalog),
            Err(ResolverError::InvalidRequest { .. })
        );
        prop_assert!(rejected);
    }
}
