use super::helpers::{filled, run_collective, run_collective_with_config};
use nexar_graph::{CommunicationRequest, GraphConfig};

#[tokio::test]
async fn test_allgather_uneven_extents() {
    run_collective(3, |controller| async move {
        let rank = controller.rank() as usize;
        // Rank i contributes i + 1 rows of value i.
        let input = filled(rank + 1, 2, rank as f32);
        let out = controller
            .allgather(CommunicationRequest::allgather("x", input))
            .await
            .unwrap();

        assert_eq!(out.shape().dims(), &[6, 2]);
        let expected: Vec<f32> = vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0];
        assert_eq!(out.to_vec::<f32>().unwrap(), expected, "rank {rank}");
    })
    .await;
}

#[tokio::test]
async fn test_allgather_equal_extents_rank_order() {
    run_collective(4, |controller| async move {
        let rank = controller.rank();
        let input = nexar_graph::Tensor::from_vec(vec![rank as u8 * 10, rank as u8 * 10 + 1]);
        let out = controller
            .allgather(CommunicationRequest::allgather("x", input))
            .await
            .unwrap();
        assert_eq!(out.shape().dims(), &[8]);
        assert_eq!(
            out.to_vec::<u8>().unwrap(),
            vec![0, 1, 10, 11, 20, 21, 30, 31]
        );
    })
    .await;
}

#[tokio::test]
async fn test_allgather_zero_extent_rank() {
    run_collective(3, |controller| async move {
        let rank = controller.rank() as usize;
        let rows = if rank == 1 { 0 } else { 1 };
        let out = controller
            .allgather(CommunicationRequest::allgather(
                "x",
                filled(rows, 3, rank as f32),
            ))
            .await
            .unwrap();
        assert_eq!(out.shape().dims(), &[2, 3]);
        assert_eq!(
            out.to_vec::<f32>().unwrap(),
            vec![0.0, 0.0, 0.0, 2.0, 2.0, 2.0]
        );
    })
    .await;
}

#[tokio::test]
async fn test_allgather_verified_slices() {
    let config = GraphConfig {
        verify_slice_shapes: true,
        ..GraphConfig::default()
    };
    run_collective_with_config(2, config, |controller| async move {
        let rank = controller.rank() as usize;
        let out = controller
            .allgather(CommunicationRequest::allgather("x", filled(rank + 2, 4, 1.0)))
            .await
            .unwrap();
        assert_eq!(out.shape().dims(), &[5, 4]);
    })
    .await;
}

#[tokio::test]
async fn test_allgather_mismatched_slices_rejected_everywhere() {
    let config = GraphConfig {
        verify_slice_shapes: true,
        ..GraphConfig::default()
    };
    run_collective_with_config(3, config, |controller| async move {
        let rank = controller.rank() as usize;
        let cols = if rank == 2 { 5 } else { 4 };
        let err = controller
            .allgather(CommunicationRequest::allgather("x", filled(1, cols, 1.0)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), nexar_graph::ErrorKind::InvalidArgument);
    })
    .await;
}
