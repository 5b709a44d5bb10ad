use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;
mod effects;
mod engine;
mod feed;

use config::Config;
use effects::{BellAcknowledger, JsonPresenter};
use engine::EngineError;
use feed::FeedMessage;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the overlay stream; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env()?;
    let engine = engine::spawn_engine(
        &config.db_path,
        config.pipeline_settings()?,
        JsonPresenter::new(std::io::stdout()),
        BellAcknowledger::new(config.acknowledge_bell),
    )?;

    tracing::info!(
        min_confidence = config.face_detection_confidence,
        cooldown_secs = config.log_cooldown_secs,
        grace_frames = config.departure_grace_frames,
        "rollcalld ready; reading detections from stdin"
    );

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut buf = Vec::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        // Cancellation is only observed between messages; a frame that has
        // been handed to the engine always runs to completion.
        buf.clear();
        let read = tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted");
                break;
            }
            read = reader.read_until(b'\n', &mut buf) => read?,
        };

        if read == 0 {
            tracing::info!("detection feed closed");
            break;
        }

        let line = match feed::decode_line(&buf) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, bytes = buf.len(), "skipping non-UTF-8 feed line");
                continue;
            }
        };

        let message = match feed::parse_line(line) {
            Ok(Some(message)) => message,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed feed line");
                continue;
            }
        };

        match message {
            FeedMessage::Frame { detections, timestamp } => {
                let detections = feed::filter_confident(detections, config.face_detection_confidence);
                let now = timestamp.unwrap_or_else(|| chrono::Local::now().naive_local());
                match engine.process_frame(detections, now).await {
                    Ok(summary) if summary.committed > 0 || summary.suppressed > 0 => {
                        tracing::debug!(
                            frame = summary.frame,
                            recognized = summary.recognized,
                            committed = summary.committed,
                            suppressed = summary.suppressed,
                            "arrivals handled"
                        );
                    }
                    Ok(_) => {}
                    Err(EngineError::ChannelClosed) => return Err(EngineError::ChannelClosed.into()),
                    Err(err) => tracing::error!(error = %err, "frame failed"),
                }
            }
            FeedMessage::Reload => match engine.reload().await {
                Ok(count) => tracing::info!(employees = count, "reload complete"),
                Err(EngineError::ChannelClosed) => return Err(EngineError::ChannelClosed.into()),
                Err(err) => tracing::error!(error = %err, "reload failed"),
            },
            FeedMessage::ResetDrift { institute_id } => match engine.reset_drift(institute_id.clone()).await {
                Ok(()) => tracing::info!(institute_id = %institute_id, "embedding drift reset"),
                Err(EngineError::ChannelClosed) => return Err(EngineError::ChannelClosed.into()),
                Err(err) => tracing::error!(institute_id = %institute_id, error = %err, "drift reset failed"),
            },
            FeedMessage::Quit => {
                tracing::info!("quit requested");
                break;
            }
        }
    }

    tracing::info!("rollcalld shutting down");
    Ok(())
}
