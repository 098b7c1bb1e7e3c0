use crate::landmarks::{HandLandmarks, FINGER_PIPS, FINGER_TIPS};

/// Fingers (out of four, thumb excluded) that must agree for a pose
const MIN_AGREEING_FINGERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandPose {
    Fist,
    Palm,
    Neither,
}

fn count_fingers(hand: &HandLandmarks, folded: bool) -> usize {
    FINGER_TIPS
        .iter()
        .zip(FINGER_PIPS.iter())
        .filter(|(&tip, &pip)| {
            let tip_y = hand.points[tip].y;
            let pip_y = hand.points[pip].y;
            if folded {
                tip_y > pip_y
            } else {
                tip_y < pip_y
            }
        })
        .count()
}

/// At least three fingertips sit below their PIP joint.
pub fn is_fist(hand: &HandLandmarks) -> bool {
    count_fingers(hand, true) >= MIN_AGREEING_FINGERS
}

/// At least three fingertips sit above their PIP joint.
pub fn is_palm(hand: &HandLandmarks) -> bool {
    count_fingers(hand, false) >= MIN_AGREEING_FINGERS
}

pub fn classify(hand: &HandLandmarks) -> HandPose {
    if is_fist(hand) {
        HandPose::Fist
    } else if is_palm(hand) {
        HandPose::Palm
    } else {
        HandPose::Neither
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::fixtures::{fist, hand, palm};
    use crate::landmarks::Handedness;

    #[test]
    fn all_tips_below_pips_is_a_fist() {
        let h = fist(Handedness::Left, 0.8);
        assert!(is_fist(&h));
        assert!(!is_palm(&h));
        assert_eq!(classify(&h), HandPose::Fist);
    }

    #[test]
    fn all_tips_above_pips_is_a_palm() {
        let h = palm(Handedness::Right, 0.8);
        assert!(is_palm(&h));
        assert!(!is_fist(&h));
        assert_eq!(classify(&h), HandPose::Palm);
    }

    #[test]
    fn two_and_two_is_neither() {
        let h = hand(Handedness::Left, 0.8, [0.1, 0.1, -0.1, -0.1]);
        assert!(!is_fist(&h));
        assert!(!is_palm(&h));
        assert_eq!(classify(&h), HandPose::Neither);
    }

    #[test]
    fn three_of_four_is_enough() {
        let h = hand(Handedness::Left, 0.8, [0.1, 0.1, 0.1, -0.1]);
        assert_eq!(classify(&h), HandPose::Fist);
        let h = hand(Handedness::Left, 0.8, [-0.1, 0.1, -0.1, -0.1]);
        assert_eq!(classify(&h), HandPose::Palm);
    }

    #[test]
    fn equal_heights_count_for_neither_side() {
        let h = hand(Handedness::Left, 0.8, [0.0; 4]);
        assert_eq!(classify(&h), HandPose::Neither);
    }

    #[test]
    fn translation_does_not_change_the_pose() {
        for h in [
            fist(Handedness::Left, 0.3),
            palm(Handedness::Right, 0.6),
            hand(Handedness::Left, 0.5, [0.1, -0.1, 0.1, -0.1]),
        ] {
            for (dx, dy) in [(0.25, 0.0), (-0.3, 0.2), (0.5, -0.5)] {
                assert_eq!(classify(&h.translated(dx, dy)), classify(&h));
            }
        }
    }

    #[test]
    fn swapping_tip_and_pip_heights_flips_the_pose() {
        let mut h = fist(Handedness::Left, 0.5);
        for (&tip, &pip) in FINGER_TIPS.iter().zip(FINGER_PIPS.iter()) {
            let tip_y = h.points[tip].y;
            h.points[tip].y = h.points[pip].y;
            h.points[pip].y = tip_y;
        }
        assert_eq!(classify(&h), HandPose::Palm);
    }
}
