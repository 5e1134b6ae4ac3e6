//! Leaf policy: when a production node stops expanding
//!
//! Two independent triggers exist. [`terminal_leaf`] applies to every node
//! being resolved (raw resource, or nothing to build it with).
//! [`unexpanded_input`] applies only to recipe inputs, which are shown but
//! never expanded when collectable or waste.

use serde::{Deserialize, Serialize};

use crate::models::{COLLECTABLE, Item, RAW_RESOURCES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafReason {
    RawResource,
    NoStandardRecipe,
    Collectable,
    Waste,
}

impl std::fmt::Display for LeafReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LeafReason::RawResource => "raw resource",
            LeafReason::NoStandardRecipe => "no standard recipe",
            LeafReason::Collectable => "collectable",
            LeafReason::Waste => "waste",
        };
        f.write_str(s)
    }
}

/// Whether resolution of `item` ends here regardless of how it was reached.
///
/// Raw resources take precedence over a missing recipe, so a raw item with a
/// registered recipe (e.g. a converter) still stops.
pub fn terminal_leaf(item: &Item, has_standard_recipe: bool) -> Option<LeafReason> {
    if item.category == RAW_RESOURCES {
        Some(LeafReason::RawResource)
    } else if !has_standard_recipe {
        Some(LeafReason::NoStandardRecipe)
    } else {
        None
    }
}

/// Whether a recipe input is attached without being expanded further.
pub fn unexpanded_input(item: &Item) -> Option<LeafReason> {
    if item.category == COLLECTABLE {
        Some(LeafReason::Collectable)
    } else if item.display_name.contains("Waste") {
        Some(LeafReason::Waste)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(category: &str, name: &str) -> Item {
        Item {
            id: name.replace(' ', ""),
            display_name: name.to_string(),
            icon_name: String::new(),
            category: category.to_string(),
            display_order: 0,
        }
    }

    #[test]
    fn raw_resource_is_terminal_even_with_recipe() {
        let ore = item(RAW_RESOURCES, "Iron Ore");
        assert_eq!(terminal_leaf(&ore, true), Some(LeafReason::RawResource));
        assert_eq!(terminal_leaf(&ore, false), Some(LeafReason::RawResource));
    }

    #[test]
    fn missing_recipe_is_terminal() {
        let screw = item("Standard Parts", "Screw");
        assert_eq!(terminal_leaf(&screw, false), Some(LeafReason::NoStandardRecipe));
        assert_eq!(terminal_leaf(&screw, true), None);
    }

    #[test]
    fn collectable_and_waste_inputs_are_not_expanded() {
        assert_eq!(
            unexpanded_input(&item(COLLECTABLE, "Leaves")),
            Some(LeafReason::Collectable)
        );
        assert_eq!(
            unexpanded_input(&item("Nuclear", "Uranium Waste")),
            Some(LeafReason::Waste)
        );
        assert_eq!(unexpanded_input(&item("Standard Parts", "Iron Plate")), None);
    }

    #[test]
    fn waste_match_is_case_sensitive() {
        assert_eq!(unexpanded_input(&item("Parts", "wasteland map")), None);
    }

    #[test]
    fn input_policy_ignores_raw_category() {
        // raw inputs stop through terminal_leaf once resolved, not here
        assert_eq!(unexpanded_input(&item(RAW_RESOURCES, "Iron Ore")), None);
    }
}
