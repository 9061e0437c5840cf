use quarry_core::analysis::{CommunityAlgorithm, CommunityOptions};
use quarry_core::protocol::{HostEvent, Task};
use quarry_services::{RequestStatus, TaskOutcome};

use crate::*;

#[tokio::test]
async fn heavy_edge_graph_is_partitioned() {
    let coordinator = coordinator(2);
    let g = graph(
        4,
        &[
            (0, 1, 1.0),
            (1, 2, 1.0),
            (2, 3, 1.0),
            (3, 0, 1.0),
            (0, 2, 100.0),
        ],
    );
    let handle = coordinator
        .dispatch(Task::DetectCommunities {
            payload: g,
            options: CommunityOptions::default(),
        })
        .unwrap();
    let id = handle.request_id.clone();
    let (progress, outcome) = handle.collect().await;

    assert_monotone(&progress);
    assert_eq!(progress.last(), Some(&100.0));
    let (graph_data, community_structure) = match outcome {
        TaskOutcome::Completed(HostEvent::CommunitiesDetected {
            graph_data,
            community_structure,
        }) => (graph_data, community_structure),
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(community_structure.communities.len(), 4);
    assert!(community_structure
        .communities
        .iter()
        .all(|&c| c < community_structure.community_count));
    assert_eq!(
        community_structure.communities[0],
        community_structure.communities[2]
    );
    for (node, &c) in graph_data.nodes.iter().zip(&community_structure.communities) {
        assert_eq!(node.community, Some(c));
    }

    let tracked = coordinator.store().get(&id).unwrap();
    assert_eq!(tracked.status, RequestStatus::Completed);
    let result = tracked.result.unwrap();
    assert_eq!(result["kind"], "communities_detected");
    assert_eq!(
        result["communityStructure"]["communities"]
            .as_array()
            .unwrap()
            .len(),
        4
    );
}

#[tokio::test]
async fn two_node_graph_only_errors() {
    let coordinator = coordinator(2);
    let handle = coordinator
        .dispatch(Task::DetectCommunities {
            payload: graph(2, &[(0, 1, 1.0)]),
            options: CommunityOptions::default(),
        })
        .unwrap();
    let (progress, outcome) = handle.collect().await;

    assert!(progress.is_empty(), "no progress before a size error");
    match outcome {
        TaskOutcome::Failed(message) => {
            assert!(message.contains("minimum 3 nodes and 3 links"), "{message}")
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn leiden_matches_or_beats_louvain() {
    let coordinator = coordinator(2);
    let links = [
        (0, 1, 1.0),
        (1, 2, 1.0),
        (2, 0, 1.0),
        (3, 4, 1.0),
        (4, 5, 1.0),
        (5, 3, 1.0),
        (6, 7, 1.0),
        (7, 8, 1.0),
        (8, 6, 1.0),
        (2, 3, 1.0),
        (5, 6, 1.0),
    ];
    let mut modularity = Vec::new();
    for algorithm in [CommunityAlgorithm::Louvain, CommunityAlgorithm::Leiden] {
        let handle = coordinator
            .dispatch(Task::DetectCommunities {
                payload: graph(9, &links),
                options: CommunityOptions {
                    algorithm,
                    ..Default::default()
                },
            })
            .unwrap();
        match handle.outcome().await {
            TaskOutcome::Completed(HostEvent::CommunitiesDetected {
                community_structure,
                ..
            }) => modularity.push(community_structure.modularity),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert!(modularity[1] >= modularity[0] - 1e-12, "{modularity:?}");
}

#[tokio::test]
async fn same_seed_same_assignment() {
    let coordinator = coordinator(2);
    let mut assignments = Vec::new();
    for _ in 0..2 {
        let handle = coordinator
            .dispatch(Task::DetectCommunities {
                payload: ring(12),
                options: CommunityOptions {
                    random_seed: 7,
                    ..Default::default()
                },
            })
            .unwrap();
        match handle.outcome().await {
            TaskOutcome::Completed(HostEvent::CommunitiesDetected {
                community_structure,
                ..
            }) => assignments.push(community_structure.communities),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(assignments[0], assignments[1]);
}
