//! Execution host — runs one serialized task and answers with serialized
//! messages.
//!
//! A host sees only the request bytes and its cancellation flag. Every
//! message it produces goes out through an [`Outbox`], which keeps progress
//! non-decreasing and refuses to send anything after the terminal message.
//! Panics inside an engine are caught here and reported as `error`.

use std::panic::{catch_unwind, AssertUnwindSafe};

use bytes::Bytes;
use tokio::sync::mpsc;

use quarry_core::config::EngineConfig;
use quarry_core::protocol::{peek_request_id, HostEvent, HostMessage, Task, TaskRequest};
use quarry_engines::{anomaly, community, preconditions, surface, EngineError, Progress};

use crate::cancel::CancelToken;

/// What flows from hosts back to the coordinator's router.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A serialized `HostMessage`.
    Message(Bytes),
    /// The host for one dispatch of `request_id` has returned. The router
    /// synthesizes an error if no terminal message arrived first. Only the
    /// dispatch with the same `generation` is affected, so a late exit never
    /// touches a newer request reusing the id.
    Exited { request_id: String, generation: u64 },
}

/// Outgoing side of one request.
pub struct Outbox {
    request_id: String,
    tx: mpsc::UnboundedSender<Inbound>,
    cancel: CancelToken,
    /// Forward per-pass steps, not just phase checkpoints.
    per_pass: bool,
    last_progress: f64,
    finished: bool,
}

impl Outbox {
    pub fn new(
        request_id: impl Into<String>,
        tx: mpsc::UnboundedSender<Inbound>,
        cancel: CancelToken,
        per_pass: bool,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            tx,
            cancel,
            per_pass,
            last_progress: f64::NEG_INFINITY,
            finished: false,
        }
    }

    fn emit(&mut self, event: HostEvent) {
        if self.finished {
            return;
        }
        self.finished = event.is_terminal();
        let msg = HostMessage {
            request_id: self.request_id.clone(),
            event,
        };
        match serde_json::to_vec(&msg) {
            Ok(raw) => {
                // Receiver gone means the coordinator shut down.
                let _ = self.tx.send(Inbound::Message(Bytes::from(raw)));
            }
            Err(e) => {
                tracing::warn!(request_id = %self.request_id, error = %e, "encode failed");
                if msg.event.is_terminal() {
                    self.finished = false;
                    self.emit(HostEvent::Error {
                        message: format!("failed to encode result: {e}"),
                    });
                }
            }
        }
    }

    pub fn finish(&mut self, event: HostEvent) {
        debug_assert!(event.is_terminal());
        self.emit(event);
    }

    fn send_progress(&mut self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        if percent > self.last_progress {
            self.last_progress = percent;
            self.emit(HostEvent::ProgressUpdate { progress: percent });
        }
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Progress for Outbox {
    fn checkpoint(&mut self, percent: f64) -> Result<(), EngineError> {
        self.ensure_live()?;
        self.send_progress(percent);
        Ok(())
    }

    fn step(&mut self, percent: f64) -> Result<(), EngineError> {
        self.ensure_live()?;
        if self.per_pass {
            self.send_progress(percent);
        }
        Ok(())
    }
}

/// Decode and run one request to completion on the calling thread.
pub fn run(
    raw: &[u8],
    cancel: CancelToken,
    engine: &EngineConfig,
    tx: mpsc::UnboundedSender<Inbound>,
) {
    let request: TaskRequest = match serde_json::from_slice(raw) {
        Ok(r) => r,
        Err(e) => {
            match peek_request_id(raw) {
                Some(id) => Outbox::new(id, tx, cancel, false).finish(HostEvent::Error {
                    message: format!("invalid task request: {e}"),
                }),
                None => tracing::warn!(error = %e, "dropping undecodable task request"),
            }
            return;
        }
    };

    let per_pass = match &request.task {
        Task::DetectCommunities { payload, .. } => {
            engine.is_large_graph(payload.node_count(), payload.link_count())
        }
        _ => false,
    };
    let mut outbox = Outbox::new(request.request_id.clone(), tx, cancel, per_pass);
    if outbox.ensure_live().is_err() {
        outbox.finish(HostEvent::Cancelled);
        return;
    }
    if let Err(e) = preconditions::check(&request.task) {
        outbox.finish(HostEvent::Error {
            message: e.to_string(),
        });
        return;
    }

    tracing::debug!(
        request_id = %request.request_id,
        kind = %request.task.kind(),
        per_pass,
        "host started"
    );
    let task = request.task;
    guarded(&mut outbox, move |progress| execute(task, progress));
}

/// Run `work`, turning its result, error, or panic into exactly one
/// terminal message.
pub fn guarded(
    outbox: &mut Outbox,
    work: impl FnOnce(&mut Outbox) -> Result<HostEvent, EngineError>,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| work(&mut *outbox)));
    let event = match outcome {
        Ok(Ok(event)) => event,
        Ok(Err(EngineError::Cancelled)) => HostEvent::Cancelled,
        Ok(Err(e)) => HostEvent::Error {
            message: e.to_string(),
        },
        Err(panic) => HostEvent::Error {
            message: panic_message(panic.as_ref()),
        },
    };
    outbox.finish(event);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "execution host panicked".to_string()
    }
}

fn execute(task: Task, progress: &mut dyn Progress) -> Result<HostEvent, EngineError> {
    Ok(match task {
        Task::DetectCommunities { payload, options } => {
            let detected = community::detect_communities(&payload, &options, progress)?;
            HostEvent::CommunitiesDetected {
                graph_data: detected.graph,
                community_structure: detected.structure,
            }
        }
        Task::DetectAnomalies { payload, options } => HostEvent::AnomaliesDetected {
            result: anomaly::detect_anomalies(&payload, &options, progress)?,
        },
        Task::CreateModel { payload, options } => HostEvent::ModelCreated {
            model: surface::create_model(&payload, &options, progress)?,
        },
        Task::GeneratePredictions {
            payload,
            options,
            grid,
        } => HostEvent::PredictionsGenerated {
            predictions: surface::generate_predictions(&payload, &options, &grid, progress)?,
        },
        Task::EvaluateModel { payload, options } => HostEvent::ModelEvaluated {
            evaluation: surface::evaluate_model(&payload, &options, progress)?,
        },
        Task::GenerateConfidenceIntervals {
            payload,
            options,
            grid,
            confidence_level,
        } => {
            let bands = surface::generate_confidence_intervals(
                &payload,
                &options,
                &grid,
                confidence_level,
                progress,
            )?;
            HostEvent::ConfidenceIntervalsGenerated {
                upper: bands.upper,
                lower: bands.lower,
                level: bands.level,
            }
        }
        Task::GenerateForecast {
            payload,
            options,
            periods,
        } => HostEvent::ForecastGenerated {
            forecast: surface::generate_forecast(&payload, &options, periods, progress)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::analysis::CommunityOptions;
    use quarry_core::graph::{GraphData, GraphLink, GraphNode};

    fn drain(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> Vec<HostMessage> {
        let mut out = Vec::new();
        while let Ok(inbound) = rx.try_recv() {
            match inbound {
                Inbound::Message(raw) => out.push(serde_json::from_slice(&raw).unwrap()),
                Inbound::Exited { request_id, .. } => {
                    panic!("host sent Exited({request_id}) itself")
                }
            }
        }
        out
    }

    fn ring(n: usize) -> GraphData {
        GraphData {
            nodes: (0..n)
                .map(|i| GraphNode::new(format!("n{i}"), format!("Node {i}")))
                .collect(),
            links: (0..n).map(|i| GraphLink::new(i, (i + 1) % n, 1.0)).collect(),
        }
    }

    fn communities_request(id: &str, graph: GraphData) -> Vec<u8> {
        let req = TaskRequest::new(
            id,
            Task::DetectCommunities {
                payload: graph,
                options: CommunityOptions::default(),
            },
        );
        serde_json::to_vec(&req).unwrap()
    }

    fn progress_values(msgs: &[HostMessage]) -> Vec<f64> {
        msgs.iter()
            .filter_map(|m| match m.event {
                HostEvent::ProgressUpdate { progress } => Some(progress),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn undersized_graph_yields_only_an_error() {
        let graph = GraphData {
            nodes: vec![GraphNode::new("a", "A"), GraphNode::new("b", "B")],
            links: vec![GraphLink::new(0, 1, 1.0)],
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        run(
            &communities_request("small", graph),
            CancelToken::new(),
            &EngineConfig::default(),
            tx,
        );
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].request_id, "small");
        match &msgs[0].event {
            HostEvent::Error { message } => assert!(message.contains("minimum 3 nodes")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn small_graph_reports_phases_then_result() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        run(
            &communities_request("ring", ring(8)),
            CancelToken::new(),
            &EngineConfig::default(),
            tx,
        );
        let msgs = drain(&mut rx);
        let (last, rest) = msgs.split_last().unwrap();
        assert!(matches!(last.event, HostEvent::CommunitiesDetected { .. }));
        assert!(rest.iter().all(|m| !m.event.is_terminal()));
        assert_eq!(
            progress_values(&msgs),
            vec![10.0, 30.0, 70.0, 80.0, 90.0, 100.0]
        );
    }

    #[test]
    fn large_graph_reports_every_pass() {
        let engine = EngineConfig {
            large_graph_nodes: 4,
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        run(&communities_request("big", ring(8)), CancelToken::new(), &engine, tx);
        let values = progress_values(&drain(&mut rx));
        assert!(values.len() > 6);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert!(values.iter().any(|&v| v > 30.0 && v < 70.0));
    }

    #[test]
    fn cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        run(
            &communities_request("c", ring(5)),
            cancel,
            &EngineConfig::default(),
            tx,
        );
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].event, HostEvent::Cancelled);
    }

    #[test]
    fn undecodable_request_with_id_gets_an_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let raw = br#"{"kind":"detect_anomalies","requestId":"bad","payload":"oops"}"#;
        run(raw, CancelToken::new(), &EngineConfig::default(), tx.clone());
        run(b"garbage", CancelToken::new(), &EngineConfig::default(), tx);
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].request_id, "bad");
        assert!(matches!(msgs[0].event, HostEvent::Error { .. }));
    }

    #[test]
    fn panics_become_error_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut outbox = Outbox::new("p", tx, CancelToken::new(), false);
        guarded(&mut outbox, |progress| {
            progress.checkpoint(10.0)?;
            panic!("matrix exploded");
        });
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 2);
        assert_eq!(
            msgs[1].event,
            HostEvent::Error {
                message: "matrix exploded".into()
            }
        );
    }

    #[test]
    fn outbox_is_monotone_and_silent_after_terminal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancelToken::new();
        let mut outbox = Outbox::new("m", tx, cancel.clone(), false);
        outbox.checkpoint(30.0).unwrap();
        outbox.checkpoint(20.0).unwrap();
        outbox.step(50.0).unwrap();
        outbox.checkpoint(140.0).unwrap();
        outbox.finish(HostEvent::Cancelled);
        outbox.checkpoint(100.0).unwrap();
        outbox.finish(HostEvent::Error {
            message: "late".into(),
        });

        cancel.cancel();
        assert_eq!(outbox.checkpoint(100.0), Err(EngineError::Cancelled));
        assert_eq!(outbox.step(100.0), Err(EngineError::Cancelled));

        let msgs = drain(&mut rx);
        assert_eq!(progress_values(&msgs), vec![30.0, 100.0]);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2].event, HostEvent::Cancelled);
    }
}
