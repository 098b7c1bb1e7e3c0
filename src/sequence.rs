use crate::log_loader::GameLog;
use crate::types::{ActionVector, StateVector, STATE_DIM};

/// History of `seq_len` states and the action that followed it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingPair {
    pub history: Vec<StateVector>,
    pub label: ActionVector,
}

/// Slides a window of `seq_len` states over the stream.
///
/// Offset `i` yields `states[i..i + seq_len]` labelled with
/// `actions[i + seq_len]`, so a stream of `n` entries gives `n - seq_len`
/// pairs and nothing at all when `n <= seq_len`.
pub fn build_windows(
    states: &[StateVector],
    actions: &[ActionVector],
    seq_len: usize,
) -> Vec<TrainingPair> {
    let n = states.len().min(actions.len());
    if seq_len == 0 || n <= seq_len {
        return Vec::new();
    }

    (0..n - seq_len)
        .map(|i| TrainingPair {
            history: states[i..i + seq_len].to_vec(),
            label: actions[i + seq_len],
        })
        .collect()
}

/// Same as [`build_windows`] but restarted at every episode boundary, so no
/// window mixes two play sessions.
///
/// Episodes are maximal runs of equal keys. A log without any `episode`
/// fields is one run and produces exactly the output of [`build_windows`].
pub fn build_episode_windows(log: &GameLog, seq_len: usize) -> Vec<TrainingPair> {
    episode_ranges(&log.episodes)
        .into_iter()
        .flat_map(|(start, end)| {
            build_windows(&log.states[start..end], &log.actions[start..end], seq_len)
        })
        .collect()
}

/// Half-open `[start, end)` ranges of consecutive equal episode keys.
pub fn episode_ranges(episodes: &[Option<String>]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..=episodes.len() {
        if i == episodes.len() || episodes[i] != episodes[start] {
            if i > start {
                ranges.push((start, i));
            }
            start = i;
        }
    }
    ranges
}

/// Row-major `[seq_len * STATE_DIM]` copy of a history.
pub fn flatten_window(history: &[StateVector]) -> Vec<f32> {
    let mut flat = Vec::with_capacity(history.len() * STATE_DIM);
    for state in history {
        flat.extend_from_slice(state);
    }
    flat
}
