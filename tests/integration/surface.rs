use quarry_core::analysis::{ModelOptions, ModelType};
use quarry_core::graph::SurfaceDataPoint;
use quarry_core::protocol::{GridSpec, HostEvent, Task};
use quarry_services::TaskOutcome;

use crate::*;

async fn run(task: Task) -> (Vec<f64>, TaskOutcome) {
    coordinator(2).dispatch(task).unwrap().collect().await
}

#[tokio::test]
async fn evaluate_on_identical_points_is_perfect() {
    let (progress, outcome) = run(Task::EvaluateModel {
        payload: vec![SurfaceDataPoint::new(2.0, 3.0, 7.3); 10],
        options: ModelOptions::default(),
    })
    .await;

    assert_monotone(&progress);
    match outcome {
        TaskOutcome::Completed(HostEvent::ModelEvaluated { evaluation }) => {
            assert_eq!(evaluation.r2, 1.0);
            assert_eq!(evaluation.mse, 0.0);
            assert_eq!(evaluation.mae, 0.0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn create_model_acknowledges_without_the_model() {
    let (_, outcome) = run(Task::CreateModel {
        payload: plane_points(),
        options: ModelOptions {
            model_type: ModelType::Rbf,
            ..Default::default()
        },
    })
    .await;
    match outcome {
        TaskOutcome::Completed(HostEvent::ModelCreated { model }) => {
            assert_eq!(model.model_type, ModelType::Rbf);
            assert_eq!(model.training_points, 20);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn prediction_grid_follows_resolution() {
    let (progress, outcome) = run(Task::GeneratePredictions {
        payload: plane_points(),
        options: ModelOptions::default(),
        grid: GridSpec {
            resolution: Some(4),
            ..Default::default()
        },
    })
    .await;
    assert_eq!(progress.last(), Some(&100.0));
    match outcome {
        TaskOutcome::Completed(HostEvent::PredictionsGenerated { predictions }) => {
            assert_eq!(predictions.len(), 16);
            for p in &predictions {
                assert!((p.z - (2.0 * p.x - p.y + 1.0)).abs() < 0.1, "{p:?}");
            }
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn confidence_bands_bracket_predictions() {
    let mut payload = plane_points();
    for (i, p) in payload.iter_mut().enumerate() {
        p.z += if i % 2 == 0 { 0.3 } else { -0.3 };
    }
    let grid = GridSpec {
        resolution: Some(5),
        ..Default::default()
    };

    let (_, predicted) = run(Task::GeneratePredictions {
        payload: payload.clone(),
        options: ModelOptions::default(),
        grid: grid.clone(),
    })
    .await;
    let (_, bands) = run(Task::GenerateConfidenceIntervals {
        payload,
        options: ModelOptions::default(),
        grid,
        confidence_level: Some(0.9),
    })
    .await;

    let predictions = match predicted {
        TaskOutcome::Completed(HostEvent::PredictionsGenerated { predictions }) => predictions,
        other => panic!("unexpected outcome: {other:?}"),
    };
    let (upper, lower, level) = match bands {
        TaskOutcome::Completed(HostEvent::ConfidenceIntervalsGenerated { upper, lower, level }) => {
            (upper, lower, level)
        }
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert_eq!(level, 0.9);
    assert_eq!(upper.len(), predictions.len());
    assert_eq!(lower.len(), predictions.len());
    for ((p, u), l) in predictions.iter().zip(&upper).zip(&lower) {
        assert!(l.z <= p.z && p.z <= u.z);
        assert_eq!((u.x, u.y), (p.x, p.y));
    }
}

#[tokio::test]
async fn forecast_has_requested_length() {
    let payload: Vec<_> = (0..12)
        .map(|t| SurfaceDataPoint::new(t as f64, 0.0, 3.0 * t as f64))
        .collect();
    let (progress, outcome) = run(Task::GenerateForecast {
        payload,
        options: ModelOptions::default(),
        periods: Some(7),
    })
    .await;
    assert_monotone(&progress);
    match outcome {
        TaskOutcome::Completed(HostEvent::ForecastGenerated { forecast }) => {
            assert_eq!(forecast.len(), 7);
            assert_eq!(forecast[0].x, 12.0);
            assert!(forecast.windows(2).all(|w| w[0].x < w[1].x));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn too_few_points_is_an_error() {
    let (progress, outcome) = run(Task::GenerateForecast {
        payload: plane_points()[..9].to_vec(),
        options: ModelOptions::default(),
        periods: None,
    })
    .await;
    assert!(progress.is_empty());
    match outcome {
        TaskOutcome::Failed(message) => assert!(message.contains("minimum 10 data points")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}
