// Property tests for the least-loaded chooser.
//
// Random sequences of choose / release operations are replayed against a
// simple model of outstanding charges.

use encpool_core::chooser::LeastLoadedChooser;
use encpool_core::{DeviceChooser, DeviceId};
use proptest::prelude::*;

const JOBS: [&str; 4] = ["a", "b", "c", "d"];

#[derive(Debug, Clone)]
enum Op {
    Choose { job: usize, cost: u64 },
    Release { pick: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..JOBS.len(), 0u64..100_000).prop_map(|(job, cost)| Op::Choose { job, cost }),
        1 => any::<usize>().prop_map(|pick| Op::Release { pick }),
    ]
}

struct Outstanding {
    job: &'static str,
    device: usize,
    charged: u64,
}

fn release(lb: &LeastLoadedChooser, held: &mut Vec<Outstanding>, index: usize) {
    let entry = held.swap_remove(index);
    lb.complete(DeviceId(entry.device), entry.charged);
    let still_bound = held
        .iter()
        .any(|other| other.job == entry.job && other.device == entry.device);
    if !still_bound {
        lb.terminate(entry.job, DeviceId(entry.device));
    }
}

fn modeled_loads(held: &[Outstanding], devices: usize) -> Vec<u64> {
    let mut loads = vec![0u64; devices];
    for entry in held {
        loads[entry.device] += entry.charged;
    }
    loads
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn choices_minimize_load_and_accounting_balances(
        devices in 1usize..8,
        penalty in 1.0f64..3.0,
        ops in prop::collection::vec(op(), 1..80),
    ) {
        let lb = LeastLoadedChooser::new(devices, penalty);
        let mut held: Vec<Outstanding> = Vec::new();

        for op in ops {
            match op {
                Op::Choose { job, cost } => {
                    let job = JOBS[job];
                    let before = lb.snapshot().loads;
                    let bitmap = lb.affinity(job);

                    let best = (0..devices)
                        .map(|d| {
                            let trial = if bitmap & (1 << d) != 0 {
                                cost
                            } else {
                                lb.penalize(cost)
                            };
                            before[d] + trial
                        })
                        .min()
                        .unwrap();

                    let assignment = lb.choose(job, cost).unwrap();
                    let chosen = assignment.device.index();
                    prop_assert_eq!(before[chosen] + assignment.charged, best);

                    let after = lb.snapshot().loads;
                    for d in 0..devices {
                        let expected = if d == chosen {
                            before[d] + assignment.charged
                        } else {
                            before[d]
                        };
                        prop_assert_eq!(after[d], expected);
                    }
                    prop_assert!(lb.affinity(job) & (1 << chosen) != 0);

                    held.push(Outstanding { job, device: chosen, charged: assignment.charged });
                }
                Op::Release { pick } => {
                    if held.is_empty() {
                        continue;
                    }
                    let idx = pick % held.len();
                    release(&lb, &mut held, idx);
                }
            }

            prop_assert_eq!(lb.snapshot().loads, modeled_loads(&held, devices));
            for entry in &held {
                prop_assert!(lb.affinity(entry.job) & (1 << entry.device) != 0);
            }
        }

        while !held.is_empty() {
            release(&lb, &mut held, 0);
        }
        let snapshot = lb.snapshot();
        prop_assert!(snapshot.loads.iter().all(|load| *load == 0));
        prop_assert_eq!(snapshot.tracked_jobs, 0);
    }

    #[test]
    fn known_device_is_charged_the_plain_cost(cost in 0u64..1_000_000, penalty in 1.0f64..4.0) {
        let lb = LeastLoadedChooser::new(1, penalty);
        let first = lb.choose("a", cost).unwrap();
        prop_assert_eq!(first.charged, lb.penalize(cost));

        let second = lb.choose("a", cost).unwrap();
        prop_assert_eq!(second.charged, cost);
    }
}
