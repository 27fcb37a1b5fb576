//! Background known-user probe
//!
//! Checks whether the face being calibrated is already registered without
//! blocking the frame loop. Requests and results both travel through
//! single-slot `watch` channels: a new request overwrites an unprocessed one
//! and the caller only ever sees the newest result.

use crate::resolver::IdentityResolver;
use crate::store::ProfileStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What the probe concluded about one submitted embedding
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    Known { user_id: u32, distance: f32 },
    Unknown,
}

/// Probe answer tagged with the request it belongs to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub seq: u64,
    pub outcome: ProbeOutcome,
}

type Request = Option<(u64, Vec<f32>)>;

/// Handle to the probe worker task
pub struct KnownUserProbe {
    requests: watch::Sender<Request>,
    results: watch::Receiver<Option<ProbeResult>>,
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    next_seq: u64,
}

impl KnownUserProbe {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn<S: ProfileStore + 'static>(resolver: Arc<IdentityResolver<S>>) -> Self {
        let (requests, mut request_rx) = watch::channel::<Request>(None);
        let (result_tx, results) = watch::channel::<Option<ProbeResult>>(None);
        let (stop, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            debug!("Known-user probe started");
            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    changed = request_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let request = request_rx.borrow_and_update().clone();
                        if *stop_rx.borrow() {
                            break;
                        }
                        let Some((seq, embedding)) = request else {
                            continue;
                        };

                        let outcome = match resolver.identify_once(&embedding) {
                            Ok(Some((profile, distance))) => {
                                info!(user_id = profile.user_id, distance, "Probe found known user");
                                ProbeOutcome::Known {
                                    user_id: profile.user_id,
                                    distance,
                                }
                            }
                            Ok(None) => ProbeOutcome::Unknown,
                            Err(e) => {
                                warn!(error = %e, "Probe lookup failed");
                                ProbeOutcome::Unknown
                            }
                        };
                        result_tx.send_replace(Some(ProbeResult { seq, outcome }));
                    }
                }
            }
            debug!("Known-user probe stopped");
        });

        Self {
            requests,
            results,
            stop,
            handle: Some(handle),
            next_seq: 0,
        }
    }

    /// Queue an embedding for checking, replacing any unprocessed one
    pub fn submit(&mut self, embedding: Vec<f32>) -> u64 {
        self.next_seq += 1;
        self.requests.send_replace(Some((self.next_seq, embedding)));
        self.next_seq
    }

    /// Sequence number of the most recent submission (0 before any)
    pub fn last_submitted(&self) -> u64 {
        self.next_seq
    }

    /// Newest result, without waiting
    pub fn latest(&self) -> Option<ProbeResult> {
        *self.results.borrow()
    }

    /// Wait for the next result; `None` once the worker has exited
    pub async fn next_result(&mut self) -> Option<ProbeResult> {
        self.results.changed().await.ok()?;
        *self.results.borrow_and_update()
    }

    /// Signal the worker to exit at its next iteration
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Stop and wait for the worker to finish
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Probe task ended abnormally");
            }
        }
    }
}

impl Drop for KnownUserProbe {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::{axis, resolver_with};

    #[tokio::test]
    async fn test_probe_reports_known_user() {
        let resolver = Arc::new(resolver_with(&[(3, 0)]));
        let mut probe = KnownUserProbe::spawn(resolver);

        let seq = probe.submit(axis(0));
        let result = probe.next_result().await.unwrap();
        assert_eq!(result.seq, seq);
        assert!(matches!(result.outcome, ProbeOutcome::Known { user_id: 3, .. }));

        let seq = probe.submit(axis(5));
        let result = probe.next_result().await.unwrap();
        assert_eq!(result.seq, seq);
        assert_eq!(result.outcome, ProbeOutcome::Unknown);
        assert_eq!(probe.latest(), Some(result));

        probe.shutdown().await;
    }

    #[tokio::test]
    async fn test_probe_stops_promptly() {
        let resolver = Arc::new(resolver_with(&[]));
        let probe = KnownUserProbe::spawn(resolver);
        assert!(probe.latest().is_none());

        probe.stop();
        tokio::time::timeout(std::time::Duration::from_secs(1), probe.shutdown())
            .await
            .unwrap();
    }
}
