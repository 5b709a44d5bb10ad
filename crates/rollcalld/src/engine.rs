use crate::effects::{Acknowledger, Presenter};
use chrono::NaiveDateTime;
use rollcall_core::{CoreError, Detection, FrameReport, Persistence, Pipeline, PipelineSettings};
use rollcall_store::{Database, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("database error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// What one frame amounted to, for the caller's logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSummary {
    pub frame: u64,
    pub recognized: usize,
    pub committed: usize,
    pub suppressed: usize,
}

/// Messages sent from the feed reader to the engine thread.
enum EngineRequest {
    Frame {
        detections: Vec<Detection>,
        now: NaiveDateTime,
        reply: oneshot::Sender<Result<FrameSummary, EngineError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    ResetDrift {
        institute_id: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run one frame of detections through the pipeline.
    pub async fn process_frame(
        &self,
        detections: Vec<Detection>,
        now: NaiveDateTime,
    ) -> Result<FrameSummary, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Frame {
                detections,
                now,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Re-read the roster from the database.
    pub async fn reload(&self) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Reload { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Restore one employee's working embedding to their anchor.
    pub async fn reset_drift(&self, institute_id: String) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ResetDrift {
                institute_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Frame-processing state owned by the engine thread.
struct Engine<P: Persistence, R, A> {
    pipeline: Pipeline<P>,
    presenter: R,
    acknowledger: A,
    frames: u64,
}

impl<P: Persistence, R: Presenter, A: Acknowledger> Engine<P, R, A> {
    fn handle_frame(&mut self, detections: &[Detection], now: NaiveDateTime) -> Result<FrameSummary, EngineError> {
        self.frames += 1;
        let frame = self.frames;

        let report: FrameReport = match self.pipeline.process_frame(detections, now) {
            Ok(report) => report,
            Err(err) => {
                self.presenter.report_error(frame, &err.to_string());
                return Err(err.into());
            }
        };

        for event in &report.events {
            self.acknowledger.acknowledge(event);
        }
        self.presenter.render(frame, &report);

        tracing::trace!(
            frame,
            detections = detections.len(),
            recognized = report.recognitions.len(),
            unmatched = report.unmatched,
            "frame processed"
        );

        Ok(FrameSummary {
            frame,
            recognized: report.recognitions.len(),
            committed: report.events.len(),
            suppressed: report.suppressed.len(),
        })
    }

    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Frame { detections, now, reply } => {
                let result = self.handle_frame(&detections, now);
                let _ = reply.send(result);
            }
            EngineRequest::Reload { reply } => {
                let result = self.pipeline.reload().map_err(EngineError::from);
                if let Ok(count) = &result {
                    tracing::info!(employees = count, "roster reloaded");
                }
                let _ = reply.send(result);
            }
            EngineRequest::ResetDrift { institute_id, reply } => {
                let result = self.pipeline.reset_drift(&institute_id).map_err(EngineError::from);
                let _ = reply.send(result);
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the database and loads the roster synchronously so startup fails
/// fast, then hands the pipeline to a thread that serves requests one at a
/// time. That thread is the only owner of roster, presence and cooldown
/// state.
pub fn spawn_engine<R, A>(
    db_path: &std::path::Path,
    settings: PipelineSettings,
    presenter: R,
    acknowledger: A,
) -> Result<EngineHandle, EngineError>
where
    R: Presenter + Send + 'static,
    A: Acknowledger + Send + 'static,
{
    let db = Database::open(db_path)?;
    tracing::info!(path = %db_path.display(), "database opened");

    let pipeline = Pipeline::load(db, settings)?;
    tracing::info!(
        employees = pipeline.roster().len(),
        threshold = pipeline.settings().detection_threshold,
        "roster loaded"
    );

    spawn_with_pipeline(pipeline, presenter, acknowledger)
}

fn spawn_with_pipeline<P, R, A>(pipeline: Pipeline<P>, presenter: R, acknowledger: A) -> Result<EngineHandle, EngineError>
where
    P: Persistence + Send + 'static,
    R: Presenter + Send + 'static,
    A: Acknowledger + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let mut engine = Engine {
        pipeline,
        presenter,
        acknowledger,
        frames: 0,
    };

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
