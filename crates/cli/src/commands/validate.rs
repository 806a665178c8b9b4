//! `swarmclaw validate`: Check a plan without running it.

use std::collections::HashSet;
use std::path::Path;
use swarmclaw_store::InMemoryDefinitionStore;

use crate::plan::Plan;

/// Returns whether the plan is runnable.
pub fn run(plan_path: &Path, routines_dir: Option<&Path>) -> anyhow::Result<bool> {
    println!("🔍 Validating {}...", plan_path.display());
    let plan = Plan::load(plan_path)?;

    let mut external = HashSet::new();
    if let Some(dir) = routines_dir {
        let store = InMemoryDefinitionStore::new();
        store.load_dir(dir)?;
        external.extend(store.routine_ids());
    }

    let problems = plan.problems(&external);
    if !problems.is_empty() {
        for problem in &problems {
            println!("   ❌ {problem}");
        }
        return Ok(false);
    }

    println!("   ✅ Plan is valid");
    println!();
    println!("   Goal:      {}", plan.swarm.goal);
    println!("   Agents:    {}", plan.agents.len());
    println!("   Routines:  {} (+{} external)", plan.routines.len(), external.len());
    println!("   Subtasks:  {}", plan.subtasks.len());
    println!("   Tables:    {}", plan.tables.len());
    Ok(true)
}
