//! Criterion benchmarks for element reconciliation passes.
//!
//! Measures a full clean pass and the steady-state mutation pass, where every
//! rule is already applied and the engine should only read its markers.

use aqt_core::catalog::default_rules;
use aqt_core::dom::memory::MemoryDom;
use aqt_core::ElementManager;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

const NODES_PER_RULE: usize = 20;

fn populated_page() -> MemoryDom {
    let dom = MemoryDom::new("https://www.youtube.com/watch?v=bench");
    for rule in default_rules() {
        for _ in 0..NODES_PER_RULE {
            let node = dom.add_node("div");
            dom.bind(&rule.selector, node);
        }
    }
    dom
}

fn all_checked() -> Value {
    Value::Array(
        default_rules()
            .iter()
            .filter(|r| r.id != "redirect-shorts")
            .map(|r| json!({ "id": r.id, "checked": true }))
            .collect(),
    )
}

fn bench_clean_pass(c: &mut Criterion) {
    let stored = all_checked();

    c.bench_function("clean_pass", |b| {
        b.iter(|| {
            let dom = populated_page();
            let mut manager = ElementManager::new(default_rules(), Default::default());
            black_box(manager.initialize(&dom, Some(&stored)))
        });
    });
}

fn bench_steady_state(c: &mut Criterion) {
    let dom = populated_page();
    let mut manager = ElementManager::new(default_rules(), Default::default());
    manager.initialize(&dom, Some(&all_checked()));

    c.bench_function("mutation_pass_applied", |b| {
        b.iter(|| black_box(manager.on_dom_changed(&dom)));
    });
}

criterion_group!(benches, bench_clean_pass, bench_steady_state);
criterion_main!(benches);
