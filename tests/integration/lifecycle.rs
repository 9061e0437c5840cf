use quarry_core::analysis::{AnomalyOptions, CommunityOptions, ModelOptions};
use quarry_core::config::EngineConfig;
use quarry_core::protocol::{HostEvent, Task, TaskKind};
use quarry_services::{HostCoordinator, RequestStatus, TaskOutcome};

use crate::*;

#[tokio::test]
async fn cancel_before_start_yields_cancelled() {
    let coordinator = coordinator(1);
    let handle = coordinator
        .dispatch(Task::DetectCommunities {
            payload: ring(30),
            options: CommunityOptions::default(),
        })
        .unwrap();
    let id = handle.request_id.clone();
    // Nothing has been polled yet, so the host cannot have started.
    assert!(coordinator.cancel(&id));

    let (progress, outcome) = handle.collect().await;
    assert!(progress.is_empty());
    assert_eq!(outcome, TaskOutcome::Cancelled);
    assert_eq!(
        coordinator.store().get(&id).unwrap().status,
        RequestStatus::Cancelled
    );
    assert!(!coordinator.cancel(&id), "finished requests are not cancellable");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_mid_computation_stops_with_cancelled() {
    let coordinator = HostCoordinator::new(EngineConfig {
        max_concurrent_tasks: 1,
        large_graph_nodes: 1_000,
        ..Default::default()
    });
    let n = 200_000;
    let links: Vec<_> = (0..n)
        .flat_map(|i| [(i, (i + 1) % n, 1.0), (i, (i * 7 + 3) % n, 2.0)])
        .collect();
    let mut handle = coordinator
        .dispatch(Task::DetectCommunities {
            payload: graph(n, &links),
            options: CommunityOptions::default(),
        })
        .unwrap();
    let id = handle.request_id.clone();

    let first = handle.progress.recv().await.expect("host reported progress");
    assert!(first < 100.0);
    assert!(coordinator.cancel(&id));

    let (rest, outcome) = handle.collect().await;
    assert_eq!(outcome, TaskOutcome::Cancelled);
    assert!(rest.iter().all(|&p| p < 100.0), "{rest:?}");

    let tracked = coordinator.store().get(&id).unwrap();
    assert_eq!(tracked.status, RequestStatus::Cancelled);
    assert!(tracked.result.is_none());
    assert!(tracked.progress > 0.0);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_are_routed_by_id() {
    let coordinator = coordinator(4);
    let mut handles = Vec::new();
    for i in 0..12 {
        let task = match i % 3 {
            0 => Task::DetectCommunities {
                payload: ring(8 + i),
                options: CommunityOptions::default(),
            },
            1 => Task::DetectAnomalies {
                payload: ring(8 + i),
                options: AnomalyOptions::default(),
            },
            _ => Task::EvaluateModel {
                payload: plane_points(),
                options: ModelOptions {
                    seed: Some(i as u64),
                    ..Default::default()
                },
            },
        };
        let kind = task.kind();
        handles.push((kind, i, coordinator.dispatch(task).unwrap()));
    }

    let ids: std::collections::HashSet<_> =
        handles.iter().map(|(_, _, h)| h.request_id.clone()).collect();
    assert_eq!(ids.len(), 12);

    for (kind, i, handle) in handles {
        let (progress, outcome) = handle.collect().await;
        assert_monotone(&progress);
        match (kind, outcome) {
            (
                TaskKind::DetectCommunities,
                TaskOutcome::Completed(HostEvent::CommunitiesDetected {
                    community_structure, ..
                }),
            ) => assert_eq!(community_structure.communities.len(), 8 + i),
            (
                TaskKind::DetectAnomalies,
                TaskOutcome::Completed(HostEvent::AnomaliesDetected { .. }),
            ) => {}
            (TaskKind::EvaluateModel, TaskOutcome::Completed(HostEvent::ModelEvaluated { .. })) => {
            }
            (kind, outcome) => panic!("{kind} got {outcome:?}"),
        }
    }

    assert_eq!(coordinator.in_flight(), 0);
    assert_eq!(coordinator.store().counts().completed, 12);
}

#[tokio::test]
async fn finished_requests_can_be_pruned() {
    let coordinator = coordinator(2);
    let handle = coordinator
        .dispatch(Task::DetectAnomalies {
            payload: ring(6),
            options: AnomalyOptions::default(),
        })
        .unwrap();
    let id = handle.request_id.clone();
    handle.outcome().await;

    let store = coordinator.store();
    assert_eq!(store.prune_finished(0), 0);
    assert_eq!(store.prune_finished(u64::MAX), 1);
    assert!(store.get(&id).is_none());
}
