//! Presentation of resolved production chains
//!
//! This is the only place rates are rounded. The tree itself always holds
//! full-precision values.

use std::collections::HashMap;
use std::fmt;

use crate::models::ProductionNode;
use crate::policy::LeafReason;

const SIGNIFICANT_DIGITS: i32 = 3;

/// Round to three significant digits for display.
pub fn round_display(value: f64) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let shift = SIGNIFICANT_DIGITS - 1 - magnitude;
    if shift >= 0 {
        let factor = 10f64.powi(shift);
        (value * factor).round() / factor
    } else {
        let factor = 10f64.powi(-shift);
        (value / factor).round() * factor
    }
}

/// Format a production chain as a readable string
pub fn format_production_chain(node: &ProductionNode, indent: usize) -> String {
    let mut output = String::new();
    let prefix = "  ".repeat(indent);

    output.push_str(&format!(
        "{}{} @ {}/min",
        prefix,
        node.item_id,
        round_display(node.required_rate)
    ));

    match (&node.machine_id, node.production_power) {
        (Some(machine), Some(power)) => {
            output.push_str(&format!(
                " <- {} x {} ({}%)\n",
                node.machine_count,
                machine,
                round_display(power * 100.0)
            ));
        }
        _ => {
            let reason = node.leaf_reason.unwrap_or(LeafReason::NoStandardRecipe);
            output.push_str(&format!(" ({reason})\n"));
        }
    }

    for byproduct in &node.byproducts {
        output.push_str(&format!(
            "{}  + {} @ {}/min (byproduct)\n",
            prefix,
            byproduct.item_id,
            round_display(byproduct.rate)
        ));
    }

    for child in &node.children {
        output.push_str(&format_production_chain(child, indent + 1));
    }

    output
}

/// Summary of one or more resolved production chains
#[derive(Debug, Default)]
pub struct ChainSummary {
    pub targets: Vec<(String, f64)>,
    pub machine_counts: Vec<(String, u64)>,
    pub intermediates: Vec<(String, f64)>,
    pub leaf_inputs: Vec<(String, f64, LeafReason)>,
    pub byproducts: Vec<(String, f64)>,
}

/// Generate a summary over the given trees
pub fn summarize_chain(roots: &[ProductionNode]) -> ChainSummary {
    let mut machines: HashMap<String, u64> = HashMap::new();
    let mut intermediates: HashMap<String, f64> = HashMap::new();
    let mut leaves: HashMap<String, (f64, LeafReason)> = HashMap::new();
    let mut byproducts: HashMap<String, f64> = HashMap::new();

    for root in roots {
        let mut totals = Totals {
            machines: &mut machines,
            intermediates: &mut intermediates,
            leaves: &mut leaves,
            byproducts: &mut byproducts,
        };
        collect_summary(root, true, &mut totals);
    }

    let mut machine_counts: Vec<_> = machines.into_iter().collect();
    machine_counts.sort_by(|a, b| a.0.cmp(&b.0));

    let mut intermediates: Vec<_> = intermediates.into_iter().collect();
    intermediates.sort_by(|a, b| a.0.cmp(&b.0));

    let mut leaf_inputs: Vec<_> = leaves
        .into_iter()
        .map(|(id, (rate, reason))| (id, rate, reason))
        .collect();
    leaf_inputs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut byproducts: Vec<_> = byproducts.into_iter().collect();
    byproducts.sort_by(|a, b| a.0.cmp(&b.0));

    ChainSummary {
        targets: roots
            .iter()
            .map(|r| (r.item_id.clone(), r.required_rate))
            .collect(),
        machine_counts,
        intermediates,
        leaf_inputs,
        byproducts,
    }
}

struct Totals<'a> {
    machines: &'a mut HashMap<String, u64>,
    intermediates: &'a mut HashMap<String, f64>,
    leaves: &'a mut HashMap<String, (f64, LeafReason)>,
    byproducts: &'a mut HashMap<String, f64>,
}

fn collect_summary(node: &ProductionNode, is_root: bool, totals: &mut Totals<'_>) {
    if let Some(machine) = &node.machine_id {
        *totals.machines.entry(machine.clone()).or_default() += node.machine_count;
        if !is_root {
            *totals.intermediates.entry(node.item_id.clone()).or_default() += node.required_rate;
        }
    } else {
        let reason = node.leaf_reason.unwrap_or(LeafReason::NoStandardRecipe);
        totals
            .leaves
            .entry(node.item_id.clone())
            .or_insert((0.0, reason))
            .0 += node.required_rate;
    }

    for byproduct in &node.byproducts {
        *totals.byproducts.entry(byproduct.item_id.clone()).or_default() += byproduct.rate;
    }

    for child in &node.children {
        collect_summary(child, false, totals);
    }
}

impl fmt::Display for ChainSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Production Summary ===")?;
        for (item, rate) in &self.targets {
            writeln!(f, "Target: {} @ {}/min", item, round_display(*rate))?;
        }
        writeln!(f)?;

        writeln!(f, "Machines required:")?;
        for (machine, count) in &self.machine_counts {
            writeln!(f, "  {}x {}", count, machine)?;
        }
        writeln!(f)?;

        if !self.intermediates.is_empty() {
            writeln!(f, "Intermediate products:")?;
            for (item, rate) in &self.intermediates {
                writeln!(f, "  {} @ {}/min", item, round_display(*rate))?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Inputs required:")?;
        for (item, rate, reason) in &self.leaf_inputs {
            writeln!(f, "  {} @ {}/min ({})", item, round_display(*rate), reason)?;
        }

        if !self.byproducts.is_empty() {
            writeln!(f)?;
            writeln!(f, "Byproducts:")?;
            for (item, rate) in &self.byproducts {
                writeln!(f, "  {} @ {}/min", item, round_display(*rate))?;
            }
        }

        Ok(())
    }
}
