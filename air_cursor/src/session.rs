// THEORY:
// The `session` module runs recognition concurrently. A producer task drains the
// detector's observation channel, classifies each frame and publishes the result
// into the `HandData` snapshot cell. A consumer drives the pointer from whatever
// snapshot is newest. The two sides never wait on each other: a slow consumer
// skips snapshots and a stalled producer leaves the pointer where it is.
//
// Key architectural principles:
// 1.  **Flags, Not Cancellation**: Two `watch<bool>` cells control the session.
//     `paused` gates the producer and `recognizing` keeps both sides alive.
//     Every loop selects on them, so clearing a flag stops work at the next
//     await point without aborting a task mid-update.
// 2.  **Never End Mid-Drag**: Pausing publishes an invalid snapshot and the
//     consumer always releases the button on its way out, however the session
//     ended (stop, detector end, detector fault, dropped handle).
// 3.  **No Backlog**: While paused the producer keeps draining the detector and
//     discards what it reads, so resuming never replays frames from the pause.
// 4.  **Device On Its Own Thread**: Desktop pointer handles are not always
//     `Send`, so the consumer builds its device inside a blocking task and
//     drives its loop there with `Handle::block_on`.
// 5.  **Live Parameters**: Both sides re-read the `ParameterStore` on every
//     cycle, so a settings change applies from the next frame.

use crate::core_modules::detector::ObservationReceiver;
use crate::core_modules::gesture::GestureStateMachine;
use crate::core_modules::hand_data::{HandData, HandDataPublisher, HandDataReader, hand_data_channel};
use crate::core_modules::observation::TimedObservation;
use crate::core_modules::parameters::ParameterStore;
use crate::core_modules::pointer::{PointerController, PointerDevice};
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters collected over a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Observations classified and published.
    pub frames_processed: u64,
    /// Observations dropped for arriving out of order.
    pub frames_dropped: u64,
    /// Observations discarded because they arrived while paused.
    pub frames_skipped: u64,
    /// Snapshots the consumer applied to the pointer.
    pub snapshots_applied: u64,
}

#[derive(Debug, Default)]
struct ProducerCounts {
    processed: u64,
    dropped: u64,
    skipped: u64,
}

/// Starts a session.
///
/// `make_device` runs on the consumer's thread; the session is returned once
/// the device and controller are up.
pub async fn start<D, F>(store: ParameterStore, observations: ObservationReceiver, make_device: F) -> Result<SessionHandle>
where
    D: PointerDevice + 'static,
    F: FnOnce() -> Result<D> + Send + 'static,
{
    let parameters = store.current();
    let (publisher, reader) = hand_data_channel(parameters.screen_center());
    let recognizing = Arc::new(watch::channel(true).0);
    let (paused, paused_rx) = watch::channel(false);

    let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
    let consumer = {
        let store = store.clone();
        let reader = reader.clone();
        let running = recognizing.subscribe();
        let runtime = Handle::current();
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let controller = match make_device().and_then(|device| PointerController::new(device, store.current().controller())) {
                Ok(controller) => controller,
                Err(e) => {
                    let message = format!("{e:#}");
                    let _ = ready_tx.send(Err(e));
                    return Err(anyhow!(message));
                }
            };
            let _ = ready_tx.send(Ok(()));
            runtime.block_on(run_consumer(store, controller, reader, running))
        })
    };

    match ready_rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.context("starting pointer device")),
        Err(_) => {
            return Err(match consumer.await {
                Err(join) => anyhow!(join).context("pointer consumer panicked during start"),
                Ok(_) => anyhow!("pointer consumer exited during start"),
            });
        }
    }

    let producer = tokio::spawn(run_producer(store, observations, publisher, recognizing.clone(), paused_rx));
    let (camera_width, camera_height) = parameters.camera_size();
    info!(
        screen_width = parameters.settings().screen_width,
        screen_height = parameters.settings().screen_height,
        camera_width,
        camera_height,
        fps = parameters.fps(),
        "recognition session started"
    );

    Ok(SessionHandle {
        recognizing,
        paused,
        reader,
        producer,
        consumer,
    })
}

/// Control surface of a running session.
///
/// Dropping the handle without `stop` still ends the session: the producer
/// sees the pause gate close and winds down, and the consumer releases the
/// pointer after it.
pub struct SessionHandle {
    recognizing: Arc<watch::Sender<bool>>,
    paused: watch::Sender<bool>,
    reader: HandDataReader,
    producer: JoinHandle<Result<ProducerCounts>>,
    consumer: JoinHandle<Result<u64>>,
}

impl SessionHandle {
    /// Holds the producer at the gate and releases the pointer.
    pub fn pause(&self) {
        if !self.paused.send_replace(true) {
            info!("recognition paused");
        }
    }

    /// Lets the producer continue with its retained state.
    pub fn resume(&self) {
        if self.paused.send_replace(false) {
            info!("recognition resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Cleared when the session stops, or by the producer when the detector ends or fails.
    pub fn is_recognizing(&self) -> bool {
        *self.recognizing.borrow()
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> HandData {
        self.reader.latest()
    }

    /// Another reader onto the snapshot cell.
    pub fn reader(&self) -> HandDataReader {
        self.reader.clone()
    }

    /// Resolves once the recognizing flag is cleared.
    pub async fn finished(&self) {
        stopped(&mut self.recognizing.subscribe()).await;
    }

    /// Runs until `interrupt` resolves or the session ends by itself, then stops.
    ///
    /// If the interrupt source fails, the error is logged and the session runs
    /// until it ends by itself. Either way the pointer is released.
    pub async fn run_until<S>(self, interrupt: S) -> Result<SessionReport>
    where
        S: Future<Output = std::io::Result<()>>,
    {
        tokio::select! {
            signal = interrupt => match signal {
                Ok(()) => info!("interrupted"),
                Err(e) => {
                    warn!(error = %e, "interrupt source failed, running until the detector ends");
                    self.finished().await;
                }
            },
            _ = self.finished() => {}
        }
        self.stop().await
    }

    /// Clears the recognizing flag and waits for both sides to exit.
    ///
    /// A detector fault that ended the producer is returned here, after the
    /// consumer has released the pointer.
    pub async fn stop(self) -> Result<SessionReport> {
        self.recognizing.send_replace(false);
        let (producer, consumer) = futures::future::join(self.producer, self.consumer).await;
        let snapshots_applied = consumer.context("pointer consumer panicked")??;
        let counts = producer.context("gesture producer panicked")??;
        let report = SessionReport {
            frames_processed: counts.processed,
            frames_dropped: counts.dropped,
            frames_skipped: counts.skipped,
            snapshots_applied,
        };
        info!(?report, "recognition session stopped");
        Ok(report)
    }
}

async fn run_producer(
    store: ParameterStore,
    mut observations: ObservationReceiver,
    publisher: HandDataPublisher,
    recognizing: Arc<watch::Sender<bool>>,
    mut paused: watch::Receiver<bool>,
) -> Result<ProducerCounts> {
    let mut running = recognizing.subscribe();
    let mut classifier = GestureStateMachine::new(store.current().screen_center());
    let mut counts = ProducerCounts::default();
    let mut last_timestamp_ms: Option<u64> = None;
    let mut gate_closed = false;

    let outcome = loop {
        if *paused.borrow_and_update() {
            if !gate_closed {
                gate_closed = true;
                publisher.publish(HandData::lost(classifier.last_valid_target()));
            }
            // Keep draining so the detector never backs up behind the gate. A
            // resume is seen before a frame that arrived with it.
            tokio::select! {
                biased;
                changed = paused.changed() => {
                    if changed.is_err() {
                        debug!("session handle dropped");
                        break Ok(());
                    }
                }
                next = observations.recv() => {
                    if let Some(outcome) = discard_while_paused(next, &mut counts) {
                        break outcome;
                    }
                }
                _ = stopped(&mut running) => break Ok(()),
            }
            continue;
        }
        gate_closed = false;

        let next = tokio::select! {
            next = observations.recv() => next,
            changed = paused.changed() => {
                if changed.is_err() {
                    debug!("session handle dropped");
                    break Ok(());
                }
                continue;
            }
            _ = stopped(&mut running) => break Ok(()),
        };

        match next {
            None => {
                info!("detector stream ended");
                break Ok(());
            }
            Some(Err(e)) => {
                error!(error = %format!("{e:#}"), "detector fault, stopping recognition");
                break Err(e);
            }
            Some(Ok(timed)) => {
                if last_timestamp_ms.is_some_and(|last| timed.timestamp_ms < last) {
                    warn!(
                        timestamp_ms = timed.timestamp_ms,
                        last_timestamp_ms, "dropping out-of-order observation"
                    );
                    counts.dropped += 1;
                    continue;
                }
                last_timestamp_ms = Some(timed.timestamp_ms);
                let hand = classifier.classify(&timed.observation, &store.current().gesture());
                publisher.publish(hand);
                counts.processed += 1;
            }
        }
    };

    publisher.publish(HandData::lost(classifier.last_valid_target()));
    recognizing.send_replace(false);
    outcome.map(|()| counts)
}

/// Handles an observation that arrived while paused. Returns the producer's
/// outcome if the stream ended or faulted.
fn discard_while_paused(next: Option<Result<TimedObservation>>, counts: &mut ProducerCounts) -> Option<Result<()>> {
    match next {
        None => {
            info!("detector stream ended");
            Some(Ok(()))
        }
        Some(Err(e)) => {
            error!(error = %format!("{e:#}"), "detector fault, stopping recognition");
            Some(Err(e))
        }
        Some(Ok(timed)) => {
            debug!(timestamp_ms = timed.timestamp_ms, "discarding observation while paused");
            counts.skipped += 1;
            None
        }
    }
}

async fn run_consumer<D: PointerDevice>(
    store: ParameterStore,
    mut controller: PointerController<D>,
    mut reader: HandDataReader,
    mut running: watch::Receiver<bool>,
) -> Result<u64> {
    let mut applied = 0;
    loop {
        let snapshot = tokio::select! {
            snapshot = reader.next() => snapshot,
            _ = stopped(&mut running) => None,
        };
        let Some(hand) = snapshot else { break };
        controller.update_parameters(store.current().controller());
        if let Err(e) = controller.apply(&hand) {
            warn!(error = %format!("{e:#}"), status = %hand.status, "pointer command failed");
        }
        applied += 1;
    }

    if let Err(e) = controller.release() {
        warn!(error = %format!("{e:#}"), "safety release failed");
    }
    debug!(applied, "pointer consumer exited");
    Ok(applied)
}

/// Resolves once the recognizing flag is cleared or its sender is gone.
async fn stopped(running: &mut watch::Receiver<bool>) {
    let _ = running.wait_for(|recognizing| !*recognizing).await;
}
