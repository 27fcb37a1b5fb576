//! Driver monitor
//!
//! Owns every per-driver component and routes each frame according to the
//! identity mode:
//!
//! ```text
//! WaitingForUser --accepted--> Detecting
//!       |                          |
//!   unknown face            identity lost
//!       v                          |
//!  Calibrating --registered/known--+
//!       |
//!   abandoned --> WaitingForUser
//! ```

use crate::aggregator::StatusAggregator;
use crate::analysis::FinalStatus;
use crate::calibration::{CalibrationProgress, CalibrationSession};
use crate::config::DmsConfig;
use crate::distraction::{DistractionStateMachine, DistractionStatus};
use crate::drowsiness::{DrowsinessInput, DrowsinessStateMachine};
use crate::expression::ExpressionClassifier;
use crate::frame::{FrameInput, FrameSample};
use crate::state::StatusLabel;
use crate::DmsError;
use alerting::{DispatchOutcome, DispatchStats, EventDispatcher, EventSink};
use driver_auth::{
    IdentityResolver, KnownUserProbe, ProbeOutcome, ProfileStore, RegistrationOutcome, Resolution,
    UserProfile,
};
use metrics::counter;
use serde::Serialize;
use signal_filter::{Ema, HeadPose, PoseSmoother, RollingAverage, SignalSmoother, Validator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorMode {
    WaitingForUser,
    Calibrating,
    Detecting,
}

/// Everything produced for one frame
#[derive(Debug, Clone, Serialize)]
pub struct MonitorOutput {
    pub frame_id: u64,
    pub timestamp_sec: f64,
    pub mode: MonitorMode,
    pub user_id: Option<u32>,
    pub status: FinalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationProgress>,
    pub sample: FrameSample,
}

/// Smoothed signals for one frame
#[derive(Debug, Clone, Copy)]
struct Signals {
    ear: Option<f64>,
    mar: Option<f64>,
    pose: Option<HeadPose>,
}

struct CalibrationRun {
    session: CalibrationSession,
    stop: Arc<AtomicBool>,
    embeddings: Vec<Vec<f32>>,
    /// Probe results older than this belong to a previous face
    first_seq: u64,
    frames: u32,
}

pub struct DriverMonitor<S: ProfileStore + 'static> {
    config: DmsConfig,
    resolver: Arc<IdentityResolver<S>>,
    probe: Option<KnownUserProbe>,
    dispatcher: Option<EventDispatcher>,
    validator: Validator,

    ear_smoother: RollingAverage,
    mar_smoother: Ema,
    pose_smoother: PoseSmoother,
    expression: ExpressionClassifier,
    drowsiness: DrowsinessStateMachine,
    distraction: DistractionStateMachine,

    mode: MonitorMode,
    active_user: Option<UserProfile>,
    unknown_since: Option<f64>,
    mismatch_since: Option<f64>,
    detecting_frames: u64,
    calibration: Option<CalibrationRun>,
    stop: Arc<AtomicBool>,
}

impl<S: ProfileStore + 'static> DriverMonitor<S> {
    /// Validate the configuration and load known drivers from `store`
    pub fn new(config: DmsConfig, store: Arc<S>) -> Result<Self, DmsError> {
        config.validate()?;
        let frames = config.resolve();
        let resolver = Arc::new(IdentityResolver::new(config.identity.clone(), store)?);
        let known = resolver.profile_count()?;
        info!(
            target_fps = config.system.target_fps,
            known_users = known,
            "Driver monitor ready"
        );

        Ok(Self {
            ear_smoother: RollingAverage::new(frames.ear_window),
            mar_smoother: Ema::new(config.smoothing.mar_alpha),
            pose_smoother: PoseSmoother::new(config.smoothing.pose_alpha),
            expression: ExpressionClassifier::new(config.expression.clone()),
            drowsiness: DrowsinessStateMachine::new(&config.drowsiness, &frames),
            distraction: DistractionStateMachine::new(&config.distraction),
            validator: Validator::default(),
            probe: None,
            dispatcher: None,
            mode: MonitorMode::WaitingForUser,
            active_user: None,
            unknown_since: None,
            mismatch_since: None,
            detecting_frames: 0,
            calibration: None,
            stop: Arc::new(AtomicBool::new(false)),
            resolver,
            config,
        })
    }

    /// Run known-user checks during calibration on a background task
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_probe(mut self) -> Self {
        self.probe = Some(KnownUserProbe::spawn(Arc::clone(&self.resolver)));
        self
    }

    /// Deliver events to `sink` through a bounded background queue
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.dispatcher = Some(EventDispatcher::spawn(
            sink,
            self.config.monitor.event_queue_capacity,
        ));
        self
    }

    pub fn mode(&self) -> MonitorMode {
        self.mode
    }

    pub fn active_user(&self) -> Option<&UserProfile> {
        self.active_user.as_ref()
    }

    pub fn resolver(&self) -> &Arc<IdentityResolver<S>> {
        &self.resolver
    }

    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    pub fn distraction_status(&self) -> DistractionStatus {
        self.distraction.status()
    }

    pub fn adjust_camera_offset(&mut self, pitch_offset: Option<f64>, yaw_offset: Option<f64>) {
        self.distraction.adjust_camera_offset(pitch_offset, yaw_offset);
    }

    /// Shared stop signal; raising it cancels calibration and ends processing
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Process one frame
    pub fn process(&mut self, input: &FrameInput) -> Result<MonitorOutput, DmsError> {
        if self.is_stopped() {
            self.cancel_calibration();
            return Err(DmsError::Stopped);
        }
        counter!("dms_frames_processed_total").increment(1);

        let mut sample = FrameSample::assemble(
            input,
            &self.config.distraction.zones,
            self.config.drowsiness.yawn.hand_cover_distance_norm,
        );
        sample.expression = self.expression.classify(
            input.face.as_ref().map(|f| &f.mouth),
            input.hands.as_deref(),
        );
        let signals = self.smooth(&sample);
        let ts = sample.timestamp_sec;
        let embedding = input.embedding.as_deref();

        let mut calibration = None;
        let status = match self.mode {
            MonitorMode::WaitingForUser => self.wait_for_user(ts, embedding)?,
            MonitorMode::Calibrating => {
                let (status, progress) = self.calibrate(ts, signals.ear, embedding)?;
                calibration = progress;
                status
            }
            MonitorMode::Detecting => self.detect(ts, input.frame_id, &sample, &signals, embedding)?,
        };

        Ok(MonitorOutput {
            frame_id: input.frame_id,
            timestamp_sec: ts,
            mode: self.mode,
            user_id: self.active_user.as_ref().map(|u| u.user_id),
            status,
            calibration,
            sample,
        })
    }

    /// Validate raw signals and feed the smoothers; implausible values count as missing
    fn smooth(&mut self, sample: &FrameSample) -> Signals {
        let ear = sample
            .ear
            .filter(|&v| self.validator.validate_ear(v).is_ok())
            .map(|v| self.ear_smoother.update(v));
        let mar = sample
            .mar
            .filter(|&v| self.validator.validate_mar(v).is_ok())
            .map(|v| self.mar_smoother.update(v));
        let pose = sample
            .pose
            .filter(|p| self.validator.validate_pose(p).is_ok())
            .map(|p| self.pose_smoother.update(p));
        Signals { ear, mar, pose }
    }

    fn wait_for_user(&mut self, ts: f64, embedding: Option<&[f32]>) -> Result<FinalStatus, DmsError> {
        match self.resolver.resolve(embedding)? {
            Resolution::Accepted {
                profile,
                distance,
                confidence,
            } => {
                info!(
                    user_id = profile.user_id,
                    distance,
                    confidence,
                    "Driver recognized"
                );
                self.activate(profile)?;
                return Ok(FinalStatus::normal());
            }
            Resolution::Rejected { .. } | Resolution::NoProfiles => {
                let since = *self.unknown_since.get_or_insert(ts);
                if ts - since >= self.config.monitor.unknown_face_sec {
                    self.start_calibration()?;
                    return Ok(FinalStatus::idle(StatusLabel::Calibrating));
                }
            }
            Resolution::Pending { .. } => self.unknown_since = None,
            Resolution::NoFace => self.unknown_since = None,
        }
        Ok(FinalStatus::idle(StatusLabel::WaitingForUser))
    }

    fn start_calibration(&mut self) -> Result<(), DmsError> {
        let stop = Arc::new(AtomicBool::new(false));
        let first_seq = self.probe.as_ref().map_or(0, |p| p.last_submitted()) + 1;
        info!("Unknown driver, starting calibration");
        self.calibration = Some(CalibrationRun {
            session: CalibrationSession::new(&self.config.calibration, Arc::clone(&stop)),
            stop,
            embeddings: Vec::with_capacity(self.config.monitor.registration_samples),
            first_seq,
            frames: 0,
        });
        self.resolver.reset_consensus()?;
        self.unknown_since = None;
        self.mode = MonitorMode::Calibrating;
        Ok(())
    }

    /// Raise the running calibration session's stop signal
    pub fn cancel_calibration(&mut self) {
        if let Some(run) = self.calibration.take() {
            run.stop.store(true, Ordering::Relaxed);
            self.mode = MonitorMode::WaitingForUser;
            info!("Calibration cancelled");
        }
    }

    /// Known user reported by the probe (or inline lookup) for the current face
    fn known_user_during_calibration(
        &mut self,
        embedding: Option<&[f32]>,
    ) -> Result<Option<UserProfile>, DmsError> {
        let Some(run) = self.calibration.as_mut() else {
            return Ok(None);
        };
        run.frames += 1;

        let due = (run.frames - 1) % self.config.monitor.probe_interval_frames == 0;
        if let (true, Some(embedding)) = (due, embedding) {
            if run.embeddings.len() < self.config.monitor.registration_samples {
                run.embeddings.push(embedding.to_vec());
            }
            match self.probe.as_mut() {
                Some(probe) => {
                    let seq = probe.submit(embedding.to_vec());
                    debug!(seq, "Submitted known-user probe");
                }
                None => {
                    if let Some((profile, distance)) = self.resolver.identify_once(embedding)? {
                        info!(user_id = profile.user_id, distance, "Known driver during calibration");
                        return Ok(Some(profile));
                    }
                }
            }
        }

        let first_seq = run.first_seq;
        let Some(result) = self.probe.as_ref().and_then(|p| p.latest()) else {
            return Ok(None);
        };
        if result.seq < first_seq {
            return Ok(None);
        }
        match result.outcome {
            ProbeOutcome::Known { user_id, distance } => {
                info!(user_id, distance, "Probe matched known driver during calibration");
                Ok(self.resolver.get_profile(user_id)?)
            }
            ProbeOutcome::Unknown => Ok(None),
        }
    }

    fn calibrate(
        &mut self,
        ts: f64,
        ear: Option<f64>,
        embedding: Option<&[f32]>,
    ) -> Result<(FinalStatus, Option<CalibrationProgress>), DmsError> {
        if let Some(profile) = self.known_user_during_calibration(embedding)? {
            self.cancel_calibration();
            self.activate(profile)?;
            return Ok((FinalStatus::normal(), None));
        }

        let Some(run) = self.calibration.as_mut() else {
            self.mode = MonitorMode::WaitingForUser;
            return Ok((FinalStatus::idle(StatusLabel::WaitingForUser), None));
        };
        let progress = run.session.update(ts, ear);

        match progress {
            CalibrationProgress::Collecting { .. } => {}
            CalibrationProgress::Succeeded { threshold } => {
                let mut embeddings = std::mem::take(&mut run.embeddings);
                if let Some(current) = embedding {
                    if embeddings.len() < self.config.monitor.registration_samples {
                        embeddings.push(current.to_vec());
                    }
                }
                self.calibration = None;
                match self.resolver.register(&embeddings, threshold) {
                    Ok(RegistrationOutcome::Created(profile)) => self.activate(profile)?,
                    Ok(RegistrationOutcome::Existing { profile, distance }) => {
                        info!(user_id = profile.user_id, distance, "Calibrated face already registered");
                        self.activate(profile)?;
                    }
                    Err(e) => {
                        warn!(error = %e, "Registration failed after calibration");
                        self.mode = MonitorMode::WaitingForUser;
                    }
                }
            }
            CalibrationProgress::Abandoned { reason } => {
                info!(?reason, "Calibration abandoned, waiting for driver");
                self.calibration = None;
                self.mode = MonitorMode::WaitingForUser;
            }
        }

        let status = match self.mode {
            MonitorMode::Calibrating => FinalStatus::idle(StatusLabel::Calibrating),
            MonitorMode::WaitingForUser => FinalStatus::idle(StatusLabel::WaitingForUser),
            MonitorMode::Detecting => FinalStatus::normal(),
        };
        Ok((status, Some(progress)))
    }

    /// Make `profile` the active driver with fresh state machines
    fn activate(&mut self, profile: UserProfile) -> Result<(), DmsError> {
        self.drowsiness.reset();
        self.drowsiness.set_threshold(profile.ear_threshold);
        self.distraction.reset();
        self.resolver.reset_consensus()?;
        self.mismatch_since = None;
        self.unknown_since = None;
        self.detecting_frames = 0;
        self.mode = MonitorMode::Detecting;
        info!(user = %profile, "Driver active");
        self.active_user = Some(profile);
        Ok(())
    }

    /// Drop the active driver and every piece of per-driver state
    fn hand_off(&mut self) -> Result<(), DmsError> {
        if let Some(user) = self.active_user.take() {
            info!(user_id = user.user_id, "Driver identity lost, handing off");
        }
        self.drowsiness.reset();
        self.distraction.reset();
        self.expression.reset();
        self.ear_smoother.reset();
        self.mar_smoother.reset();
        self.pose_smoother.reset();
        self.resolver.reset_consensus()?;
        self.mismatch_since = None;
        self.unknown_since = None;
        self.mode = MonitorMode::WaitingForUser;
        Ok(())
    }

    fn detect(
        &mut self,
        ts: f64,
        frame_id: u64,
        sample: &FrameSample,
        signals: &Signals,
        embedding: Option<&[f32]>,
    ) -> Result<FinalStatus, DmsError> {
        let Some(user_id) = self.active_user.as_ref().map(|u| u.user_id) else {
            self.mode = MonitorMode::WaitingForUser;
            return Ok(FinalStatus::idle(StatusLabel::WaitingForUser));
        };

        self.detecting_frames += 1;
        let verify_every = u64::from(self.config.identity.verify_interval_frames.max(1));
        if self.detecting_frames % verify_every == 0 {
            match self.resolver.verify(user_id, embedding)? {
                Some(true) => self.mismatch_since = None,
                Some(false) => {
                    let since = *self.mismatch_since.get_or_insert(ts);
                    debug!(user_id, mismatch_sec = ts - since, "Face does not match active driver");
                    if ts - since >= self.config.monitor.identity_lost_sec {
                        self.hand_off()?;
                        return Ok(FinalStatus::idle(StatusLabel::WaitingForUser));
                    }
                }
                None => {}
            }
        }

        let expected = self.distraction.expected_pose();
        let drowsiness = self.drowsiness.update(&DrowsinessInput {
            timestamp_sec: ts,
            ear: signals.ear,
            mar: signals.mar,
            pitch: signals.pose.map(|p| p.pitch - expected.pitch),
            expression: sample.expression,
            mouth_covered: sample.mouth_covered,
        });
        let distraction = self.distraction.update(ts, signals.pose, sample.hands);
        let status = StatusAggregator::aggregate(&drowsiness, &distraction);

        if let Some(event) = &status.event {
            counter!("dms_events_total", "category" => event.category.clone()).increment(1);
            if let Some(dispatcher) = &self.dispatcher {
                let record = event.clone().into_record(user_id, frame_id);
                match dispatcher.dispatch(record) {
                    DispatchOutcome::Queued => {}
                    outcome => debug!(?outcome, "Event not queued"),
                }
            }
        }

        Ok(status)
    }

    /// Stop background workers and wait for queued events to drain
    pub async fn shutdown(mut self) -> Option<DispatchStats> {
        self.stop.store(true, Ordering::Relaxed);
        self.cancel_calibration();
        if let Some(probe) = self.probe.take() {
            probe.shutdown().await;
        }
        match self.dispatcher.take() {
            Some(dispatcher) => match dispatcher.shutdown().await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!(error = %e, "Event dispatcher shutdown failed");
                    None
                }
            },
            None => None,
        }
    }
}
