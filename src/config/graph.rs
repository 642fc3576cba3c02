use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};

use super::StepOuter;

/// Steps that list `name` as one of their inputs, in declaration order.
pub fn consumers_of(steps: &IndexMap<String, StepOuter>, name: &str) -> Vec<String> {
    steps
        .iter()
        .filter(|(_, step)| step.inputs.iter().any(|input| input == name))
        .map(|(consumer, _)| consumer.clone())
        .collect()
}

/// Orders the steps so that every step comes after all of its inputs.
///
/// Steps that become ready at the same time keep their declaration order, so
/// the result is stable for a given configuration. Inputs that do not name a
/// step are ignored here; [`check`](super::check) reports them.
pub fn topological_order(steps: &IndexMap<String, StepOuter>) -> Result<Vec<String>, Vec<String>> {
    let mut pending = steps
        .iter()
        .map(|(name, step)| {
            let inputs = step
                .inputs
                .iter()
                .filter(|input| steps.contains_key(input.as_str()))
                .collect::<IndexSet<_>>();
            (name.as_str(), inputs.len())
        })
        .collect::<IndexMap<_, _>>();

    let mut ready = pending
        .iter()
        .filter(|(_, remaining)| **remaining == 0)
        .map(|(name, _)| *name)
        .collect::<VecDeque<_>>();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(name) = ready.pop_front() {
        pending.shift_remove(name);
        order.push(name.to_owned());
        for (consumer, step) in steps {
            if !step.inputs.iter().any(|input| input == name) {
                continue;
            }
            if let Some(remaining) = pending.get_mut(consumer.as_str()) {
                *remaining -= 1;
                if *remaining == 0 {
                    ready.push_back(consumer.as_str());
                }
            }
        }
    }

    if pending.is_empty() {
        Ok(order)
    } else {
        let cycle = pending.keys().copied().collect::<Vec<_>>().join(", ");
        Err(vec![format!("Cyclic dependency detected between steps: {cycle}.")])
    }
}
