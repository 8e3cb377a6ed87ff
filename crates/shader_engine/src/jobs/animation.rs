//! Animation requests, resolved against configured defaults and ceilings

use serde::{Deserialize, Serialize};

/// A caller's animation request; empty fields take the configured defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationRequest {
    /// Number of frames
    pub frames: Option<u32>,
    /// Frames per second
    pub fps: Option<u32>,
    /// Time uniform of the first frame
    pub start: Option<f32>,
    /// Time uniform one frame past the last
    pub end: Option<f32>,
    /// Target bitrate in bits per second
    pub bitrate: Option<u64>,
}

/// Values used for fields a request leaves empty
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationDefaults {
    /// Default frame count
    pub frames: u32,
    /// Default frame rate
    pub fps: u32,
    /// Default start time
    pub start: f32,
    /// Default end time
    pub end: f32,
    /// Default bitrate
    pub bitrate: u64,
}

/// Ceilings applied after defaults are filled in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationLimits {
    /// Largest frame count accepted
    pub max_frames: u32,
    /// Largest bitrate accepted
    pub max_bitrate: u64,
}

/// A fully resolved animation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Animation {
    /// Number of frames, at least 1
    pub frames: u32,
    /// Frames per second, at least 1
    pub fps: u32,
    /// Time uniform of frame 0
    pub start: f32,
    /// Time uniform the sequence approaches
    pub end: f32,
    /// Target bitrate
    pub bitrate: u64,
}

impl AnimationRequest {
    /// Fill empty fields from `defaults`, then clamp frames and bitrate to `limits`
    ///
    /// Frames and fps never drop below 1, even when a ceiling is 0.
    pub fn resolve(&self, defaults: &AnimationDefaults, limits: &AnimationLimits) -> Animation {
        let frames = self.frames.unwrap_or(defaults.frames).min(limits.max_frames).max(1);
        let bitrate = self.bitrate.unwrap_or(defaults.bitrate).min(limits.max_bitrate);

        Animation {
            frames,
            fps: self.fps.unwrap_or(defaults.fps).max(1),
            start: self.start.unwrap_or(defaults.start),
            end: self.end.unwrap_or(defaults.end),
            bitrate,
        }
    }
}

impl Animation {
    /// Time uniform of frame `index`: `start + (end - start) / frames * index`
    pub fn frame_time(&self, index: u32) -> f32 {
        (self.end - self.start) / self.frames as f32 * index as f32 + self.start
    }

    /// Playback length in seconds
    pub fn duration_secs(&self) -> f32 {
        self.frames as f32 / self.fps as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DEFAULTS: AnimationDefaults = AnimationDefaults {
        frames: 60,
        fps: 30,
        start: 0.0,
        end: 1.0,
        bitrate: 400_000,
    };
    const LIMITS: AnimationLimits = AnimationLimits {
        max_frames: 300,
        max_bitrate: 2_000_000,
    };

    #[test]
    fn test_empty_request_uses_defaults() {
        let animation = AnimationRequest::default().resolve(&DEFAULTS, &LIMITS);
        assert_eq!(animation.frames, 60);
        assert_eq!(animation.fps, 30);
        assert_eq!(animation.bitrate, 400_000);
        assert_relative_eq!(animation.end, 1.0);
    }

    #[test]
    fn test_frames_clamped_to_max() {
        let request = AnimationRequest { frames: Some(10_000), ..Default::default() };
        assert_eq!(request.resolve(&DEFAULTS, &LIMITS).frames, 300);
    }

    #[test]
    fn test_bitrate_clamped_independently() {
        let request = AnimationRequest {
            frames: Some(12),
            bitrate: Some(50_000_000),
            ..Default::default()
        };
        let animation = request.resolve(&DEFAULTS, &LIMITS);
        assert_eq!(animation.frames, 12);
        assert_eq!(animation.bitrate, 2_000_000);
    }

    #[test]
    fn test_defaults_are_clamped_too() {
        let limits = AnimationLimits { max_frames: 10, max_bitrate: 1000 };
        let animation = AnimationRequest::default().resolve(&DEFAULTS, &limits);
        assert_eq!(animation.frames, 10);
        assert_eq!(animation.bitrate, 1000);
    }

    #[test]
    fn test_zero_frames_and_fps_raised() {
        let request = AnimationRequest { frames: Some(0), fps: Some(0), ..Default::default() };
        let animation = request.resolve(&DEFAULTS, &LIMITS);
        assert_eq!(animation.frames, 1);
        assert_eq!(animation.fps, 1);
    }

    #[test]
    fn test_frame_time() {
        let request = AnimationRequest {
            frames: Some(4),
            start: Some(1.0),
            end: Some(3.0),
            ..Default::default()
        };
        let animation = request.resolve(&DEFAULTS, &LIMITS);
        assert_relative_eq!(animation.frame_time(0), 1.0);
        assert_relative_eq!(animation.frame_time(1), 1.5);
        assert_relative_eq!(animation.frame_time(3), 2.5);
    }

    #[test]
    fn test_request_from_toml() {
        let request: AnimationRequest = toml::from_str("frames = 24\nend = 2.5").unwrap();
        assert_eq!(request.frames, Some(24));
        assert_eq!(request.fps, None);
        assert_eq!(request.end, Some(2.5));
    }
}
