use hpipe_core::flow::{Flow, Job, Step, StepId};

/// Job type served by `ScriptedRunner::registry` in the fixtures below.
pub const SCRIPTED: &str = "scripted";

pub fn job(id: &str) -> Job {
    let name = id.rsplit('.').next().unwrap_or(id);
    Job::new(name, id, SCRIPTED)
}

/// Two-branch flow used across the engine tests:
///
/// ```text
/// root -> b -> a      a: f.a.j1
///      -> c           b: f.b.j2
///                     c: f.c.j3
/// ```
pub fn scenario_flow() -> Flow {
    let mut flow = Flow::new("f");
    let a = flow.add_step(Step::new("a").with_job(job("f.a.j1")));
    let b = flow.add_step(Step::new("b").with_dep(a).with_job(job("f.b.j2")));
    let c = flow.add_step(Step::new("c").with_job(job("f.c.j3")));
    let root = flow.add_step(Step::new("root").with_dep(b).with_dep(c));
    flow.set_entry(root);
    flow
}

/// `top -> left, right -> base`, each step with one job `d.<step>.j`.
pub fn diamond_flow() -> Flow {
    let mut flow = Flow::new("d");
    let base = flow.add_step(Step::new("base").with_job(job("d.base.j")));
    let left = flow.add_step(Step::new("left").with_dep(base).with_job(job("d.left.j")));
    let right = flow.add_step(Step::new("right").with_dep(base).with_job(job("d.right.j")));
    let top = flow.add_step(
        Step::new("top")
            .with_dep(left)
            .with_dep(right)
            .with_job(job("d.top.j")),
    );
    flow.set_entry(top);
    flow
}

/// One step named `wide` with `n` independent jobs `w.wide.j<i>`, as entry.
pub fn wide_flow(n: usize, resource: Option<&str>) -> (Flow, StepId) {
    let mut flow = Flow::new("w");
    let mut step = Step::new("wide");
    if let Some(label) = resource {
        step = step.with_resource(label);
    }
    for i in 0..n {
        step = step.with_job(job(&format!("w.wide.j{}", i)));
    }
    let id = flow.add_step(step);
    flow.set_entry(id);
    (flow, id)
}
