use super::helpers::{CallbackCounter, run_collective};
use nexar_graph::CommunicationRequest;

#[tokio::test]
async fn test_barrier_4_nodes() {
    run_collective(4, |controller| async move {
        controller.barrier().await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn test_barrier_2_nodes_double() {
    run_collective(2, |controller| async move {
        controller.barrier().await.unwrap();
        controller.barrier().await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn test_barrier_request_completes() {
    run_collective(3, |controller| async move {
        let counter = CallbackCounter::new();
        let out = controller
            .execute(CommunicationRequest::barrier().on_complete(counter.callback()))
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(counter.count(), 1);
    })
    .await;
}

#[tokio::test]
async fn test_barrier_single_rank() {
    run_collective(1, |controller| async move {
        controller.barrier().await.unwrap();
    })
    .await;
}
