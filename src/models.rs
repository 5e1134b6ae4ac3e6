//! Data models for catalog entries and resolved production trees

use serde::{Deserialize, Serialize};

use crate::policy::LeafReason;

/// Item category whose members are never expanded.
pub const RAW_RESOURCES: &str = "Raw Resources";
/// Item category for gathered items that are shown but not expanded as inputs.
pub const COLLECTABLE: &str = "Collectable";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub display_name: String,
    pub icon_name: String,
    pub category: String,
    pub display_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub display_name: String,
    pub icon_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub produced_in: String,
    pub display_name: String,
    pub outputs: Vec<RecipeOutput>,
    pub inputs: Vec<RecipeInput>,
}

impl Recipe {
    /// Nominal per-minute amount of `item_id` produced by this recipe.
    ///
    /// Byproducts count: the first output entry naming the item wins, even
    /// when it is not the entry flagged as standard.
    pub fn nominal_rate(&self, item_id: &str) -> Option<f64> {
        self.outputs
            .iter()
            .find(|o| o.item_id == item_id)
            .map(|o| o.amount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeOutput {
    pub recipe_id: String,
    pub item_id: String,
    pub amount: f64, // per minute at power 1.0
    #[serde(default)]
    pub is_standard_recipe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeInput {
    pub recipe_id: String,
    pub item_id: String,
    pub amount: f64, // per minute at power 1.0
}

/// One line item of a production plan: produce `item_id` at `rate` per minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanLine {
    pub item_id: String,
    pub rate: f64,
}

/// A secondary output of a recipe, produced alongside the node's item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Byproduct {
    pub item_id: String,
    pub rate: f64, // per minute at the node's production power
}

/// Result of resolving a production chain.
///
/// Leaves carry no power, no machine, no byproducts and `machine_count == 0`.
/// Every rate is kept at full precision; rounding happens only in
/// [`crate::report`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionNode {
    pub item_id: String,
    pub required_rate: f64,
    pub production_power: Option<f64>,
    pub machine_id: Option<String>,
    pub machine_count: u64,
    pub children: Vec<ProductionNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub byproducts: Vec<Byproduct>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_reason: Option<LeafReason>,
}

impl ProductionNode {
    pub fn leaf(item_id: &str, required_rate: f64, reason: LeafReason) -> Self {
        Self {
            item_id: item_id.to_string(),
            required_rate,
            production_power: None,
            machine_id: None,
            machine_count: 0,
            children: Vec::new(),
            byproducts: Vec::new(),
            leaf_reason: Some(reason),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty() && self.production_power.is_none()
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ProductionNode::node_count).sum::<usize>()
    }

    /// Longest root-to-leaf path, counting nodes.
    pub fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(ProductionNode::depth)
            .max()
            .unwrap_or(0)
    }
}
