//! Per-container sampling, one engine stats read per interval.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::warn;

use dockyard_engine::{ContainerEngine, ContainerStatsSample};

use crate::{Tick, SAMPLE_INTERVAL_SECS};

/// Endless stream of stats for one container. An interval whose engine read
/// fails yields an error marker and sampling continues.
pub fn container_stream(
    engine: Arc<dyn ContainerEngine>,
    engine_id: String,
) -> impl Stream<Item = Tick<ContainerStatsSample>> {
    async_stream::stream! {
        let mut interval =
            tokio::time::interval(Duration::from_secs(SAMPLE_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match engine.stats_once(&engine_id).await {
                Ok(sample) => yield Tick::Sample { data: sample },
                Err(e) => {
                    warn!(%engine_id, error = %e, "container sample failed");
                    yield Tick::Error { message: e.to_string() };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_engine::fake::FakeEngine;
    use dockyard_engine::{NetworkAttachment, RunSpec};
    use futures::StreamExt;

    fn seeded_engine() -> Arc<FakeEngine> {
        let engine = Arc::new(FakeEngine::new());
        engine.seed(
            "abc123def456",
            RunSpec {
                image: "alpine".to_string(),
                tag: "latest".to_string(),
                hostname: "box1".to_string(),
                cpuset: "0".to_string(),
                memory_mb: 256,
                network: NetworkAttachment::Bridged {
                    ip_addr: "10.0.0.2".to_string(),
                },
            },
            true,
        );
        engine
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sample_marks_the_tick_and_sampling_continues() {
        let engine = seeded_engine();
        engine.fail_stats(1);

        let stream = container_stream(engine, "abc123def456".to_string());
        tokio::pin!(stream);

        let first = stream.next().await.unwrap();
        assert!(first.is_error());

        let second = stream.next().await.unwrap();
        assert!(matches!(second, Tick::Sample { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_container_keeps_erroring_without_ending() {
        let engine = Arc::new(FakeEngine::new());
        let stream = container_stream(engine, "missing000000".to_string());
        tokio::pin!(stream);
        for _ in 0..3 {
            assert!(stream.next().await.unwrap().is_error());
        }
    }
}
