//! Frame geometry of an uploaded video and its orientation class.

use std::fmt;

/// Pixel dimensions of the primary stream of a staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGeometry {
    pub width: u32,
    pub height: u32,
}

/// Closed set of orientation classes used to partition stored objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationLabel {
    Square,
    Landscape,
    Portrait,
    Other,
}

impl OrientationLabel {
    /// Key prefix used for objects of this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrientationLabel::Square => "square",
            OrientationLabel::Landscape => "landscape",
            OrientationLabel::Portrait => "portrait",
            OrientationLabel::Other => "other",
        }
    }
}

impl fmt::Display for OrientationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StreamGeometry {
    pub fn orientation(&self) -> OrientationLabel {
        classify(self.width, self.height)
    }
}

/// Map a frame size to its orientation class.
///
/// Ratios are compared by cross-multiplication in `u64` so that only exact
/// 16:9 and 9:16 frames are labelled landscape or portrait.
pub fn classify(width: u32, height: u32) -> OrientationLabel {
    let (w, h) = (u64::from(width), u64::from(height));

    if w == h {
        OrientationLabel::Square
    } else if w > h {
        if w * 9 == h * 16 {
            OrientationLabel::Landscape
        } else {
            OrientationLabel::Other
        }
    } else if h * 9 == w * 16 {
        OrientationLabel::Portrait
    } else {
        OrientationLabel::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_sides_are_square() {
        for side in [1, 2, 720, 1080, 4096, u32::MAX] {
            assert_eq!(classify(side, side), OrientationLabel::Square);
        }
        // Degenerate but total.
        assert_eq!(classify(0, 0), OrientationLabel::Square);
    }

    #[test]
    fn exact_sixteen_by_nine_is_landscape() {
        assert_eq!(classify(1920, 1080), OrientationLabel::Landscape);
        assert_eq!(classify(1280, 720), OrientationLabel::Landscape);
        assert_eq!(classify(16, 9), OrientationLabel::Landscape);
    }

    #[test]
    fn exact_nine_by_sixteen_is_portrait() {
        assert_eq!(classify(1080, 1920), OrientationLabel::Portrait);
        assert_eq!(classify(720, 1280), OrientationLabel::Portrait);
        assert_eq!(classify(9, 16), OrientationLabel::Portrait);
    }

    #[test]
    fn inexact_ratios_are_other() {
        assert_eq!(classify(800, 600), OrientationLabel::Other);
        assert_eq!(classify(600, 800), OrientationLabel::Other);
        assert_eq!(classify(1921, 1080), OrientationLabel::Other);
        assert_eq!(classify(1080, 1921), OrientationLabel::Other);
        assert_eq!(classify(2560, 1080), OrientationLabel::Other);
    }

    #[test]
    fn truncating_division_would_disagree() {
        // 1920/1080 == 1 and 3840/2160 == 1 under integer division, as is
        // 800/600; only cross-multiplication tells them apart.
        assert_eq!(classify(1920, 1080), OrientationLabel::Landscape);
        assert_eq!(classify(3840, 2160), OrientationLabel::Landscape);
        assert_eq!(classify(800, 600), OrientationLabel::Other);
        // And 9:16 frames truncate to 0, like every other tall frame.
        assert_eq!(classify(2160, 3840), OrientationLabel::Portrait);
        assert_eq!(classify(600, 800), OrientationLabel::Other);
    }

    #[test]
    fn large_dimensions_do_not_overflow() {
        let w = u32::MAX - (u32::MAX % 16);
        let h = w / 16 * 9;
        assert_eq!(classify(w, h), OrientationLabel::Landscape);
        assert_eq!(classify(h, w), OrientationLabel::Portrait);
    }

    #[test]
    fn labels_render_as_key_prefixes() {
        assert_eq!(OrientationLabel::Landscape.to_string(), "landscape");
        let square = StreamGeometry {
            width: 1080,
            height: 1080,
        };
        assert_eq!(square.orientation(), OrientationLabel::Square);
    }
}
