use std::collections::HashSet;

use chrono::Utc;
use proptest::prelude::*;
use serde_json::json;
use toporun::{
    reset_uncompleted, run_topology, NodeData, NodeDef, NodeStatus, NodeType, RunOptions,
    RunStatus, Snapshot, TopologySpec,
};

fn arb_status() -> impl Strategy<Value = NodeStatus> {
    prop_oneof![
        Just(NodeStatus::Pending),
        Just(NodeStatus::Running),
        Just(NodeStatus::Completed),
        Just(NodeStatus::Errored),
        Just(NodeStatus::Suspended),
        Just(NodeStatus::Skipped),
    ]
}

fn arb_node_data() -> impl Strategy<Value = NodeData> {
    (arb_status(), any::<bool>(), any::<bool>(), 0u64..100).prop_map(
        |(status, has_state, has_output, seed)| {
            let now = Utc::now();
            NodeData {
                node_type: NodeType::Work,
                deps: Vec::new(),
                status,
                started: Some(now),
                finished: Some(now),
                input: Some(vec![json!(seed)]),
                output: has_output.then(|| json!(seed + 1)),
                state: has_state.then(|| json!({ "progress": seed })),
                error: None,
                selected: None,
                reason: None,
                extra: Default::default(),
            }
        },
    )
}

fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
    proptest::collection::btree_map("[a-z]{1,6}", arb_node_data(), 0..6).prop_map(|data| {
        Snapshot {
            status: RunStatus::Errored,
            started: Utc::now(),
            finished: Some(Utc::now()),
            data,
            extra: Default::default(),
        }
    })
}

/// Build an acyclic spec of `n` work nodes where node `i` may only depend on
/// nodes `j < i`, and every action returns its own index.
fn spec_from_raw_deps(raw_deps: Vec<Vec<usize>>) -> TopologySpec {
    let mut spec = TopologySpec::new();
    for (i, potential_deps) in raw_deps.into_iter().enumerate() {
        let mut def = NodeDef::work(move |_| async move { Ok(json!(i)) });

        let mut valid_deps: Vec<usize> = potential_deps
            .into_iter()
            .filter_map(|d| (i > 0).then(|| d % i))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        valid_deps.sort_unstable();

        for dep in valid_deps {
            def = def.after(format!("task_{dep}"));
        }
        spec = spec.node(format!("task_{i}"), def);
    }
    spec
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reset_uncompleted_is_idempotent(snapshot in arb_snapshot()) {
        let now = Utc::now();
        let once = reset_uncompleted(&snapshot, now);
        let twice = reset_uncompleted(&once, now);
        prop_assert_eq!(&once, &twice);
    }

    #[test]
    fn reset_preserves_terminal_work_and_clears_the_rest(snapshot in arb_snapshot()) {
        let reset = reset_uncompleted(&snapshot, Utc::now());
        prop_assert_eq!(reset.status, RunStatus::Running);
        prop_assert!(reset.finished.is_none());

        for (name, entry) in &reset.data {
            let original = &snapshot.data[name];
            match original.status {
                NodeStatus::Completed | NodeStatus::Skipped => {
                    prop_assert_eq!(entry, original);
                }
                _ => {
                    prop_assert_eq!(entry.status, NodeStatus::Pending);
                    prop_assert!(entry.output.is_none());
                    prop_assert!(entry.error.is_none());
                    prop_assert!(entry.started.is_none());
                    prop_assert!(entry.finished.is_none());
                    // Checkpoint and input survive for the retry.
                    prop_assert_eq!(&entry.state, &original.state);
                    prop_assert_eq!(&entry.input, &original.input);
                }
            }
        }
    }

    #[test]
    fn generated_dags_run_to_completion(
        raw_deps in proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..6),
            1..6,
        )
    ) {
        let spec = spec_from_raw_deps(raw_deps);
        let node_count = spec.len();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let snapshot = runtime.block_on(async {
            let run = run_topology(&spec, RunOptions::default()).unwrap();
            run.start().await.unwrap();
            run.get_snapshot().read().clone()
        });

        prop_assert_eq!(snapshot.status, RunStatus::Completed);
        prop_assert!(snapshot.finished.is_some());
        prop_assert_eq!(snapshot.data.len(), node_count);

        for (name, entry) in &snapshot.data {
            prop_assert_eq!(entry.status, NodeStatus::Completed);

            // Every work dependency's output appears in the input, in
            // declared order.
            let expected: Vec<_> = entry
                .deps
                .iter()
                .map(|dep| snapshot.data[dep].output.clone().unwrap())
                .collect();
            prop_assert_eq!(
                entry.input.clone().unwrap_or_default(),
                expected,
                "input mismatch for {}",
                name
            );
        }
    }
}
