use crossbeam_channel::{bounded, never, select, Receiver, RecvError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::thread;
use tracing::{debug, info, warn};

use crate::hand_pose::{classify, HandPose};
use crate::hid::{DriveKey, HeldKeys, HidError, KeySink};
use crate::landmarks::{HandLandmarks, HandTracker, Handedness, TrackedFrame, TrackerError};
use crate::shutdown::Shutdown;
use crate::steering::{Steer, SteeringConfig, SteeringFilter};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub steering: SteeringConfig,
    /// Hands scored below this are ignored; unscored hands are kept
    pub min_detection_confidence: f32,
    /// Flip frames horizontally before classifying
    pub mirror: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            steering: SteeringConfig::default(),
            min_detection_confidence: 0.7,
            mirror: true,
        }
    }
}

/// Orders the two hands as (left, right). The first hand counts as left
/// only when labelled so; otherwise the second one is taken as left.
pub fn assign_hands<'a>(
    first: &'a HandLandmarks,
    second: &'a HandLandmarks,
) -> (&'a HandLandmarks, &'a HandLandmarks) {
    if first.handedness == Handedness::Left {
        (first, second)
    } else {
        (second, first)
    }
}

/// Keys that should be down for this frame. Updates the steering filter
/// only when two usable hands are present.
pub fn decide_keys(
    frame: &TrackedFrame,
    filter: &mut SteeringFilter,
    min_detection_confidence: f32,
) -> BTreeSet<DriveKey> {
    let hands: Vec<&HandLandmarks> = frame
        .hands
        .iter()
        .filter(|h| h.score.map_or(true, |s| s >= min_detection_confidence))
        .take(2)
        .collect();

    let mut keys = BTreeSet::new();
    if hands.len() < 2 {
        return keys;
    }

    let (left, right) = assign_hands(hands[0], hands[1]);
    match (classify(left), classify(right)) {
        (HandPose::Fist, HandPose::Fist) => {
            keys.insert(DriveKey::Forward);
        }
        (HandPose::Palm, HandPose::Palm) => {
            keys.insert(DriveKey::Back);
        }
        (HandPose::Fist, HandPose::Palm) | (HandPose::Palm, HandPose::Fist) => {
            keys.insert(DriveKey::Brake);
        }
        _ => {}
    }

    match filter.update(left, right) {
        Steer::Left => {
            keys.insert(DriveKey::Left);
        }
        Steer::Right => {
            keys.insert(DriveKey::Right);
        }
        Steer::Straight => {}
    }
    keys
}

/// Owns the key sink for one run of the gesture loop. Every held key is
/// released when the session is dropped.
pub struct SteeringSession<S: KeySink> {
    keys: HeldKeys<S>,
    filter: SteeringFilter,
    config: ControllerConfig,
}

impl<S: KeySink> SteeringSession<S> {
    pub fn new(sink: S, config: ControllerConfig) -> Self {
        Self {
            keys: HeldKeys::new(sink),
            filter: SteeringFilter::new(config.steering),
            config,
        }
    }

    pub fn held(&self) -> &BTreeSet<DriveKey> {
        self.keys.held()
    }

    pub fn steering(&self) -> f32 {
        self.filter.smoothed()
    }

    /// Classifies one frame and pushes the resulting key transitions.
    pub fn handle_frame(&mut self, frame: &TrackedFrame) -> Result<(), HidError> {
        let active = if self.config.mirror {
            decide_keys(
                &frame.mirrored(),
                &mut self.filter,
                self.config.min_detection_confidence,
            )
        } else {
            decide_keys(frame, &mut self.filter, self.config.min_detection_confidence)
        };
        self.keys.apply(&active)
    }

    pub fn release_all(&mut self) -> Result<(), HidError> {
        self.keys.release_all()
    }
}

impl<S: KeySink> Drop for SteeringSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.keys.release_all() {
            warn!("failed to release keys: {}", e);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    TrackerFailed,
    Shutdown(Shutdown),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: usize,
    pub stop: StopReason,
}

type FrameResult = Result<Option<TrackedFrame>, TrackerError>;

/// Moves the blocking tracker onto its own thread so a shutdown request is
/// seen even while no frame arrives. The thread exits after the stream ends,
/// fails, or the receiver is dropped.
fn spawn_reader<T>(mut tracker: T) -> Receiver<FrameResult>
where
    T: HandTracker + Send + 'static,
{
    let (tx, rx) = bounded::<FrameResult>(1);
    thread::spawn(move || loop {
        let next = tracker.next_frame();
        let last = !matches!(next, Ok(Some(_)));
        if tx.send(next).is_err() || last {
            return;
        }
    });
    rx
}

enum LoopEvent {
    Shutdown(Option<Shutdown>),
    Frame(Result<FrameResult, RecvError>),
}

/// Runs until the tracker runs dry, fails, or a shutdown request arrives.
/// Keys are released before returning on every path except a sink error,
/// which is left to the session's `Drop`.
pub fn run<T, S>(
    tracker: T,
    session: &mut SteeringSession<S>,
    shutdown: &Receiver<Shutdown>,
) -> Result<LoopSummary, HidError>
where
    T: HandTracker + Send + 'static,
    S: KeySink,
{
    let frames_rx = spawn_reader(tracker);
    let mut shutdown_rx = shutdown.clone();
    let mut frames = 0usize;

    let stop = loop {
        // a pending request wins over a frame that is ready at the same time
        if let Ok(reason) = shutdown_rx.try_recv() {
            break StopReason::Shutdown(reason);
        }

        let event = select! {
            recv(shutdown_rx) -> msg => LoopEvent::Shutdown(msg.ok()),
            recv(frames_rx) -> msg => LoopEvent::Frame(msg),
        };

        let frame = match event {
            LoopEvent::Shutdown(Some(reason)) => break StopReason::Shutdown(reason),
            LoopEvent::Shutdown(None) => {
                // every sender is gone; only the stream can end the loop now
                shutdown_rx = never();
                continue;
            }
            LoopEvent::Frame(Ok(Ok(Some(frame)))) => frame,
            LoopEvent::Frame(Ok(Ok(None))) | LoopEvent::Frame(Err(_)) => {
                debug!("landmark stream ended");
                break StopReason::EndOfStream;
            }
            LoopEvent::Frame(Ok(Err(e))) => {
                debug!("landmark stream failed: {}", e);
                break StopReason::TrackerFailed;
            }
        };

        session.handle_frame(&frame)?;
        frames += 1;
        if frames % 300 == 0 {
            debug!(
                frames,
                held = ?session.held(),
                steering = session.steering(),
                "loop status"
            );
        }
    };

    session.release_all()?;
    info!(frames, ?stop, "gesture loop stopped");
    Ok(LoopSummary { frames, stop })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::recording::{KeyEvent, RecordingSink};
    use crate::landmarks::fixtures::{fist, hand, palm};
    use crate::landmarks::TrackerError;
    use crossbeam_channel::unbounded;
    use std::collections::VecDeque;

    fn frame(hands: Vec<HandLandmarks>) -> TrackedFrame {
        TrackedFrame { hands }
    }

    fn keys(list: &[DriveKey]) -> BTreeSet<DriveKey> {
        list.iter().copied().collect()
    }

    fn filter() -> SteeringFilter {
        SteeringFilter::new(SteeringConfig::default())
    }

    struct ScriptedTracker {
        frames: VecDeque<Result<Option<TrackedFrame>, TrackerError>>,
    }

    impl ScriptedTracker {
        fn new(frames: Vec<TrackedFrame>) -> Self {
            Self {
                frames: frames.into_iter().map(|f| Ok(Some(f))).collect(),
            }
        }
    }

    impl HandTracker for ScriptedTracker {
        fn next_frame(&mut self) -> Result<Option<TrackedFrame>, TrackerError> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }
    }

    #[test]
    fn both_fists_drive_forward() {
        let f = frame(vec![fist(Handedness::Left, 0.8), fist(Handedness::Right, 0.8)]);
        assert_eq!(decide_keys(&f, &mut filter(), 0.7), keys(&[DriveKey::Forward]));
    }

    #[test]
    fn both_palms_reverse() {
        let f = frame(vec![palm(Handedness::Left, 0.8), palm(Handedness::Right, 0.8)]);
        assert_eq!(decide_keys(&f, &mut filter(), 0.7), keys(&[DriveKey::Back]));
    }

    #[test]
    fn mixed_hands_brake() {
        let f = frame(vec![fist(Handedness::Left, 0.8), palm(Handedness::Right, 0.8)]);
        assert_eq!(decide_keys(&f, &mut filter(), 0.7), keys(&[DriveKey::Brake]));
        let f = frame(vec![palm(Handedness::Left, 0.8), fist(Handedness::Right, 0.8)]);
        assert_eq!(decide_keys(&f, &mut filter(), 0.7), keys(&[DriveKey::Brake]));
    }

    #[test]
    fn undecided_hand_gives_no_pedal() {
        let open_ish = hand(Handedness::Right, 0.8, [0.1, 0.1, -0.1, -0.1]);
        let f = frame(vec![fist(Handedness::Left, 0.8), open_ish]);
        assert!(decide_keys(&f, &mut filter(), 0.7).is_empty());
    }

    #[test]
    fn steering_adds_a_direction_key() {
        let mut filter = filter();
        let f = frame(vec![fist(Handedness::Left, 0.9), fist(Handedness::Right, 0.3)]);
        assert_eq!(
            decide_keys(&f, &mut filter, 0.7),
            keys(&[DriveKey::Forward, DriveKey::Left])
        );

        let mut filter2 = SteeringFilter::new(SteeringConfig::default());
        let f = frame(vec![palm(Handedness::Left, 0.3), palm(Handedness::Right, 0.9)]);
        assert_eq!(
            decide_keys(&f, &mut filter2, 0.7),
            keys(&[DriveKey::Back, DriveKey::Right])
        );
    }

    #[test]
    fn right_labelled_first_hand_is_treated_as_right() {
        let mut filter = filter();
        // detector order: right hand first, lowered left hand second
        let f = frame(vec![fist(Handedness::Right, 0.3), fist(Handedness::Left, 0.9)]);
        assert!(decide_keys(&f, &mut filter, 0.7).contains(&DriveKey::Left));
    }

    #[test]
    fn single_hand_releases_and_keeps_filter() {
        let mut filter = filter();
        filter.push(0.4);
        let before = filter.smoothed();
        let f = frame(vec![fist(Handedness::Left, 0.8)]);
        assert!(decide_keys(&f, &mut filter, 0.7).is_empty());
        assert_eq!(filter.smoothed(), before);
    }

    #[test]
    fn low_confidence_hands_are_dropped() {
        let mut weak = fist(Handedness::Right, 0.8);
        weak.score = Some(0.5);
        let mut strong = fist(Handedness::Left, 0.8);
        strong.score = Some(0.95);
        let f = frame(vec![strong, weak]);
        assert!(decide_keys(&f, &mut filter(), 0.7).is_empty());
    }

    #[test]
    fn run_releases_keys_at_end_of_stream() {
        let sink = RecordingSink::default();
        let config = ControllerConfig {
            mirror: false,
            ..ControllerConfig::default()
        };
        let mut session = SteeringSession::new(sink.clone(), config);
        let tracker = ScriptedTracker::new(vec![
            frame(vec![fist(Handedness::Left, 0.8), fist(Handedness::Right, 0.8)]),
            frame(vec![fist(Handedness::Left, 0.8), fist(Handedness::Right, 0.8)]),
        ]);
        let (_tx, rx) = unbounded();

        let summary = run(tracker, &mut session, &rx).unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.stop, StopReason::EndOfStream);

        let events = sink.take();
        assert_eq!(events[0], KeyEvent::Down(DriveKey::Forward));
        assert_eq!(
            events.iter().filter(|e| matches!(e, KeyEvent::Down(_))).count(),
            1
        );
        assert!(events.ends_with(
            &DriveKey::ALL.iter().map(|&k| KeyEvent::Up(k)).collect::<Vec<_>>()
        ));
        assert!(session.held().is_empty());
    }

    #[test]
    fn shutdown_request_stops_before_reading() {
        let sink = RecordingSink::default();
        let mut session = SteeringSession::new(sink.clone(), ControllerConfig::default());
        let tracker = ScriptedTracker::new(vec![frame(vec![])]);
        let (tx, rx) = unbounded();
        tx.send(Shutdown::QuitKey).unwrap();

        let summary = run(tracker, &mut session, &rx).unwrap();
        assert_eq!(summary.frames, 0);
        assert_eq!(summary.stop, StopReason::Shutdown(Shutdown::QuitKey));
    }

    #[test]
    fn tracker_failure_ends_quietly() {
        let sink = RecordingSink::default();
        let mut session = SteeringSession::new(sink, ControllerConfig::default());
        let tracker = ScriptedTracker {
            frames: VecDeque::from(vec![Err(TrackerError::LandmarkCount(3))]),
        };
        let (_tx, rx) = unbounded();
        let summary = run(tracker, &mut session, &rx).unwrap();
        assert_eq!(summary.stop, StopReason::TrackerFailed);
    }

    /// Blocks in `next_frame` until its sender is dropped.
    struct StalledTracker {
        gate: crossbeam_channel::Receiver<()>,
    }

    impl HandTracker for StalledTracker {
        fn next_frame(&mut self) -> Result<Option<TrackedFrame>, TrackerError> {
            let _ = self.gate.recv();
            Ok(None)
        }
    }

    #[test]
    fn interrupt_stops_a_stalled_stream() {
        let sink = RecordingSink::default();
        let mut session = SteeringSession::new(sink.clone(), ControllerConfig::default());
        let (gate_tx, gate_rx) = unbounded::<()>();
        let (tx, rx) = unbounded();
        let sender = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            tx.send(Shutdown::Interrupt).unwrap();
        });

        let summary = run(StalledTracker { gate: gate_rx }, &mut session, &rx).unwrap();
        sender.join().unwrap();
        drop(gate_tx);

        assert_eq!(summary.frames, 0);
        assert_eq!(summary.stop, StopReason::Shutdown(Shutdown::Interrupt));
        assert_eq!(sink.take().len(), DriveKey::ALL.len());
    }

    #[test]
    fn dropping_the_session_releases_keys() {
        let sink = RecordingSink::default();
        {
            let mut session = SteeringSession::new(sink.clone(), ControllerConfig::default());
            let f = frame(vec![palm(Handedness::Left, 0.8), palm(Handedness::Right, 0.8)]);
            session.handle_frame(&f).unwrap();
            assert_eq!(session.held(), &keys(&[DriveKey::Back]));
            sink.take();
        }
        let events = sink.take();
        assert_eq!(events.len(), DriveKey::ALL.len());
        assert!(events.iter().all(|e| matches!(e, KeyEvent::Up(_))));
    }

    #[test]
    fn mirroring_swaps_the_steering_direction() {
        let sink = RecordingSink::default();
        let mut session = SteeringSession::new(sink, ControllerConfig::default());
        // after the mirror, the Right-labelled lowered hand becomes the left one
        let f = frame(vec![fist(Handedness::Right, 0.9), fist(Handedness::Left, 0.3)]);
        session.handle_frame(&f).unwrap();
        assert!(session.held().contains(&DriveKey::Left));
    }
}
