use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Landmarks per hand in the 21-point hand model
pub const NUM_LANDMARKS: usize = 21;

pub const WRIST: usize = 0;

/// Index, middle, ring and pinky tips
pub const FINGER_TIPS: [usize; 4] = [8, 12, 16, 20];
/// Matching PIP joints
pub const FINGER_PIPS: [usize; 4] = [6, 10, 14, 18];

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad landmark frame on line {line}: {source}")]
    Frame {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("hand has {0} landmarks, expected 21")]
    LandmarkCount(usize),

    #[error("detector process has no stdout")]
    NoStdout,
}

/// Normalized image coordinates; `y` grows downwards.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn opposite(self) -> Self {
        match self {
            Handedness::Left => Handedness::Right,
            Handedness::Right => Handedness::Left,
        }
    }
}

/// One detected hand.
#[derive(Debug, Clone, PartialEq)]
pub struct HandLandmarks {
    pub points: [Landmark; NUM_LANDMARKS],
    pub handedness: Handedness,
    /// Detection confidence, when the detector reports one
    pub score: Option<f32>,
}

impl HandLandmarks {
    pub fn wrist(&self) -> Landmark {
        self.points[WRIST]
    }

    /// Mirrors the hand as if the source frame had been flipped horizontally.
    pub fn mirrored(&self) -> Self {
        let mut points = self.points;
        for p in points.iter_mut() {
            p.x = 1.0 - p.x;
        }
        Self {
            points,
            handedness: self.handedness.opposite(),
            score: self.score,
        }
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        let mut points = self.points;
        for p in points.iter_mut() {
            p.x += dx;
            p.y += dy;
        }
        Self {
            points,
            ..self.clone()
        }
    }
}

/// Hands found in one camera frame, in detector order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedFrame {
    pub hands: Vec<HandLandmarks>,
}

impl TrackedFrame {
    pub fn mirrored(&self) -> Self {
        Self {
            hands: self.hands.iter().map(HandLandmarks::mirrored).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPoint {
    Xyz([f32; 3]),
    Xy([f32; 2]),
    Named {
        x: f32,
        y: f32,
        #[serde(default)]
        z: f32,
    },
}

impl From<RawPoint> for Landmark {
    fn from(raw: RawPoint) -> Self {
        match raw {
            RawPoint::Xyz([x, y, z]) => Landmark::new(x, y, z),
            RawPoint::Xy([x, y]) => Landmark::new(x, y, 0.0),
            RawPoint::Named { x, y, z } => Landmark::new(x, y, z),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHand {
    label: Handedness,
    #[serde(default)]
    score: Option<f32>,
    landmarks: Vec<RawPoint>,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    hands: Vec<RawHand>,
}

fn convert_hand(raw: RawHand) -> Result<HandLandmarks, TrackerError> {
    if raw.landmarks.len() != NUM_LANDMARKS {
        return Err(TrackerError::LandmarkCount(raw.landmarks.len()));
    }
    let mut points = [Landmark::default(); NUM_LANDMARKS];
    for (slot, point) in points.iter_mut().zip(raw.landmarks) {
        *slot = point.into();
    }
    Ok(HandLandmarks {
        points,
        handedness: raw.label,
        score: raw.score,
    })
}

/// Parses one detector output line.
pub fn parse_frame(line: &str, line_no: usize) -> Result<TrackedFrame, TrackerError> {
    let raw: RawFrame = serde_json::from_str(line).map_err(|source| TrackerError::Frame {
        line: line_no,
        source,
    })?;
    let hands = raw
        .hands
        .into_iter()
        .map(convert_hand)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TrackedFrame { hands })
}

/// Source of per-frame hand landmarks.
pub trait HandTracker {
    /// Next frame, or `Ok(None)` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<TrackedFrame>, TrackerError>;
}

/// Reads one JSON frame per line from any reader (recorded file, stdin, pipe).
pub struct JsonLinesTracker<R: BufRead> {
    reader: R,
    line_no: usize,
    buf: String,
}

impl<R: BufRead> JsonLinesTracker<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> HandTracker for JsonLinesTracker<R> {
    fn next_frame(&mut self) -> Result<Option<TrackedFrame>, TrackerError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            return parse_frame(line, self.line_no).map(Some);
        }
    }
}

/// Handle on an external landmark detector whose stdout is a JSON-lines
/// frame stream.
///
/// The child owns the camera; it is killed and reaped when this is dropped,
/// which also ends the paired tracker's stream.
pub struct DetectorProcess {
    child: Child,
}

impl DetectorProcess {
    pub fn spawn(
        program: &str,
        args: &[String],
    ) -> Result<(Self, JsonLinesTracker<BufReader<ChildStdout>>), TrackerError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdout = child.stdout.take().ok_or(TrackerError::NoStdout)?;
        debug!(program, pid = child.id(), "detector started");
        Ok((Self { child }, JsonLinesTracker::new(BufReader::new(stdout))))
    }
}

impl Drop for DetectorProcess {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "detector already exited");
        }
        if let Err(e) = self.child.wait() {
            warn!(error = %e, "could not reap detector process");
        }
    }
}

/// Tracker over any byte stream, e.g. stdin.
pub fn from_reader<R: Read>(reader: R) -> JsonLinesTracker<BufReader<R>> {
    JsonLinesTracker::new(BufReader::new(reader))
}

impl<T: HandTracker + ?Sized> HandTracker for Box<T> {
    fn next_frame(&mut self) -> Result<Option<TrackedFrame>, TrackerError> {
        (**self).next_frame()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn frame_json(label: &str, n: usize) -> String {
        let points: Vec<String> = (0..n)
            .map(|i| format!("[{}, 0.5, 0.0]", i as f32 / 100.0))
            .collect();
        format!(
            r#"{{"hands":[{{"label":"{label}","score":0.9,"landmarks":[{}]}}]}}"#,
            points.join(",")
        )
    }

    #[test]
    fn reads_frames_and_skips_blank_lines() {
        let input = format!("{}\n\n{{\"hands\":[]}}\n", frame_json("Left", 21));
        let mut tracker = JsonLinesTracker::new(Cursor::new(input));

        let first = tracker.next_frame().unwrap().unwrap();
        assert_eq!(first.hands.len(), 1);
        assert_eq!(first.hands[0].handedness, Handedness::Left);
        assert_eq!(first.hands[0].score, Some(0.9));
        assert_eq!(first.hands[0].points[20].x, 0.2);

        let second = tracker.next_frame().unwrap().unwrap();
        assert!(second.hands.is_empty());
        assert!(tracker.next_frame().unwrap().is_none());
    }

    #[test]
    fn accepts_two_dimensional_and_named_points() {
        let mut points: Vec<String> = (0..20).map(|_| "[0.1, 0.2]".to_string()).collect();
        points.push(r#"{"x":0.3,"y":0.4}"#.to_string());
        let line = format!(
            r#"{{"hands":[{{"label":"Right","landmarks":[{}]}}]}}"#,
            points.join(",")
        );
        let frame = parse_frame(&line, 1).unwrap();
        assert_eq!(frame.hands[0].points[20], Landmark::new(0.3, 0.4, 0.0));
        assert_eq!(frame.hands[0].score, None);
    }

    #[test]
    fn wrong_landmark_count_is_an_error() {
        let err = parse_frame(&frame_json("Left", 20), 3).unwrap_err();
        assert!(matches!(err, TrackerError::LandmarkCount(20)));
        let err = parse_frame("{nope", 4).unwrap_err();
        assert!(matches!(err, TrackerError::Frame { line: 4, .. }));
    }

    #[test]
    fn detector_stdout_is_read_as_frames() {
        let script = format!("printf '%s\\n' '{}'", frame_json("Right", 21));
        let (detector, mut tracker) =
            DetectorProcess::spawn("sh", &["-c".to_string(), script]).unwrap();
        let frame = tracker.next_frame().unwrap().unwrap();
        assert_eq!(frame.hands[0].handedness, Handedness::Right);
        assert!(tracker.next_frame().unwrap().is_none());
        drop(detector);
    }

    #[test]
    fn mirroring_flips_x_and_handedness() {
        let hand = fixtures::fist(Handedness::Left, 0.7);
        let mirrored = hand.mirrored();
        assert_eq!(mirrored.handedness, Handedness::Right);
        assert!((mirrored.points[8].x - (1.0 - hand.points[8].x)).abs() < 1e-6);
        assert_eq!(mirrored.points[8].y, hand.points[8].y);
        assert_eq!(mirrored.mirrored().handedness, Handedness::Left);
    }
}
