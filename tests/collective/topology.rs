use super::helpers::run_collective;
use nexar_graph::{ErrorKind, GraphError, TopologyStrategy};

#[tokio::test]
async fn test_load_topology_sorted() {
    run_collective(4, |controller| async move {
        let rank = controller.rank();
        // Everybody else, listed in descending order.
        let others: Vec<u32> = (0..4).rev().filter(|&r| r != rank).collect();
        controller.set_topology(&others, &others).await.unwrap();

        let topo = controller.load_topology().await.unwrap();
        let sorted: Vec<u32> = (0..4).filter(|&r| r != rank).collect();
        assert_eq!(topo.in_ranks(), sorted.as_slice());
        assert_eq!(topo.out_ranks(), sorted.as_slice());
        assert_eq!(topo.indegree(), 3);
        assert_eq!(topo.outdegree(), 3);
        assert!(!topo.is_weighted());
        assert_eq!(controller.in_neighbor_ranks().await, sorted);
    })
    .await;
}

#[tokio::test]
async fn test_asymmetric_topology() {
    run_collective(4, |controller| async move {
        controller
            .set_topology_strategy(TopologyStrategy::Star)
            .await
            .unwrap();
        let rank = controller.rank();
        let topo = controller.load_topology().await.unwrap();
        if rank == 0 {
            assert_eq!(topo.in_ranks(), &[1, 2, 3]);
            assert_eq!(controller.out_neighbor_ranks().await, vec![1, 2, 3]);
            assert_eq!(controller.neighbor_size().await, 4);
        } else {
            assert_eq!(topo.in_ranks(), &[0]);
            assert_eq!(controller.out_neighbor_ranks().await, vec![0]);
            assert_eq!(controller.neighbor_size().await, 2);
        }
    })
    .await;
}

#[tokio::test]
async fn test_topology_can_be_replaced() {
    run_collective(3, |controller| async move {
        controller
            .set_topology_strategy(TopologyStrategy::FullyConnected)
            .await
            .unwrap();
        controller
            .set_topology_strategy(TopologyStrategy::Ring)
            .await
            .unwrap();
        let rank = controller.rank();
        let topo = controller.load_topology().await.unwrap();
        assert_eq!(topo.in_ranks(), &[(rank + 2) % 3]);
        assert_eq!(topo.out_ranks(), &[(rank + 1) % 3]);
    })
    .await;
}

#[tokio::test]
async fn test_load_before_set() {
    run_collective(2, |controller| async move {
        let err = controller.load_topology().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(controller.in_neighbor_ranks().await.is_empty());
        assert_eq!(controller.neighbor_size().await, 1);
    })
    .await;
}

#[tokio::test]
async fn test_invalid_ranks_rejected_locally() {
    run_collective(3, |controller| async move {
        let err = controller.set_topology(&[7], &[]).await.unwrap_err();
        assert!(matches!(err, GraphError::InvalidRank { rank: 7, world_size: 3 }));

        let err = controller.set_topology(&[1, 1], &[]).await.unwrap_err();
        assert!(matches!(err, GraphError::InvalidArgument(_)));

        // Nothing was installed.
        assert!(controller.load_topology().await.is_err());
    })
    .await;
}

#[tokio::test]
async fn test_inconsistent_topology_rejected_everywhere() {
    run_collective(2, |controller| async move {
        // Rank 0 claims to hear from rank 1, but rank 1 declares no out-edges.
        let ins: &[u32] = if controller.rank() == 0 { &[1] } else { &[] };
        let err = controller.set_topology(ins, &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    })
    .await;
}

#[tokio::test]
async fn test_type_size_and_layout() {
    run_collective(2, |controller| async move {
        assert_eq!(controller.type_size(nexar_graph::DataType::F64), 8);
        assert_eq!(controller.type_size(nexar_graph::DataType::I8), 1);
        let pg = controller.process_group();
        assert_eq!(pg.size(), 2);
        assert_eq!(pg.local_size(), 2);
        assert_eq!(pg.cross_size(), 1);
    })
    .await;
}
