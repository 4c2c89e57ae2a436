use super::helpers::init_tracing;
use nexar_graph::{CommunicationRequest, GraphConfig, SyncController, Tensor, TopologyStrategy};
use std::thread;

#[test]
fn test_sync_controller_one_thread_per_rank() {
    init_tracing();
    let controllers = SyncController::bootstrap_local(3, GraphConfig::default()).unwrap();

    let handles: Vec<_> = controllers
        .into_iter()
        .map(|c| {
            thread::spawn(move || {
                let rank = c.rank();
                let out = c
                    .allreduce(CommunicationRequest::allreduce(
                        "grad",
                        Tensor::from_vec(vec![rank as f32 + 1.0; 2]),
                    ))
                    .unwrap();
                assert_eq!(out.to_vec::<f32>().unwrap(), vec![6.0, 6.0]);

                c.barrier().unwrap();

                c.set_topology_strategy(TopologyStrategy::Ring).unwrap();
                assert_eq!(c.neighbor_size(), 2);
                let prev = (rank + 2) % 3;
                assert_eq!(c.in_neighbor_ranks(), vec![prev]);

                let stacked = c
                    .neighbor_allreduce(CommunicationRequest::neighbor_allreduce(
                        "w",
                        Tensor::from_vec(vec![rank as i64]),
                    ))
                    .unwrap();
                assert_eq!(stacked.to_vec::<i64>().unwrap(), vec![rank as i64, prev as i64]);
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_sync_controller_windows() {
    init_tracing();
    let config = GraphConfig {
        topology: Some(TopologyStrategy::BidirectionalRing),
        ..GraphConfig::default()
    };
    let controllers = SyncController::bootstrap_local(3, config).unwrap();

    let handles: Vec<_> = controllers
        .into_iter()
        .map(|c| {
            thread::spawn(move || {
                let rank = c.rank();
                let ins = c.in_neighbor_ranks();
                assert_eq!(ins.len(), 2);
                let own = Tensor::from_vec(vec![rank as f64 * 10.0]);
                let bufs: Vec<Tensor> = ins
                    .iter()
                    .map(|_| Tensor::from_vec(vec![0.0f64]))
                    .collect();
                c.win_create("params", &own, &bufs).unwrap();

                c.win_get(CommunicationRequest::win_get("params", ins.clone()))
                    .unwrap();
                c.win_sync("params").unwrap();
                for (src, buf) in ins.iter().zip(&bufs) {
                    assert_eq!(buf.to_vec::<f64>().unwrap(), vec![*src as f64 * 10.0]);
                }

                c.win_fence("params").unwrap();
                c.win_free("params").unwrap();
                assert!(c.window_names().is_empty());
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}
