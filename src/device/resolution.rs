//! Device display resolution probing and coordinate scaling

use serde::Serialize;
use tracing::{info, warn};

use super::DeviceShell;

/// Resolution used when the device cannot be queried
pub const FALLBACK_RESOLUTION: DeviceResolution = DeviceResolution {
    width: 1080,
    height: 1920,
    source: ResolutionSource::Fallback,
};

/// Where a resolution value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    /// `Physical size:` line of `wm size`
    Physical,
    /// `Override size:` line of `wm size`
    Override,
    /// Query failed, default substituted
    Fallback,
}

/// Device display size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceResolution {
    pub width: u32,
    pub height: u32,
    pub source: ResolutionSource,
}

/// Parse the output of `wm size`
///
/// Accepts `Physical size: WxH` and `Override size: WxH`. The first
/// recognized line wins; `wm size` prints the physical size first.
pub fn parse_wm_size(output: &str) -> Option<DeviceResolution> {
    output.lines().find_map(|line| {
        let line = line.trim();
        let (rest, source) = if let Some(rest) = line.strip_prefix("Physical size:") {
            (rest, ResolutionSource::Physical)
        } else if let Some(rest) = line.strip_prefix("Override size:") {
            (rest, ResolutionSource::Override)
        } else {
            return None;
        };

        let (w, h) = rest.trim().split_once('x')?;
        let width: u32 = w.trim().parse().ok()?;
        let height: u32 = h.trim().parse().ok()?;
        if width == 0 || height == 0 {
            return None;
        }

        Some(DeviceResolution {
            width,
            height,
            source,
        })
    })
}

/// Query the device for its display size
///
/// Never fails: on a shell error or an unrecognized reply the fallback
/// resolution is returned and the condition is logged.
pub async fn probe_resolution(shell: &dyn DeviceShell) -> DeviceResolution {
    let args = ["wm".to_string(), "size".to_string()];

    match shell.run(&args).await {
        Ok(output) if output.success() => match parse_wm_size(&output.combined) {
            Some(resolution) => {
                info!(
                    "Device resolution: {}x{} ({:?})",
                    resolution.width, resolution.height, resolution.source
                );
                resolution
            }
            None => {
                warn!(
                    "ResolutionUnavailable: unrecognized `wm size` reply {:?}, using {}x{}",
                    output.combined.trim(),
                    FALLBACK_RESOLUTION.width,
                    FALLBACK_RESOLUTION.height
                );
                FALLBACK_RESOLUTION
            }
        },
        Ok(output) => {
            warn!(
                "ResolutionUnavailable: `wm size` exited with {:?}: {}, using {}x{}",
                output.status,
                output.combined.trim(),
                FALLBACK_RESOLUTION.width,
                FALLBACK_RESOLUTION.height
            );
            FALLBACK_RESOLUTION
        }
        Err(e) => {
            warn!(
                "ResolutionUnavailable: {} ({}), using {}x{}",
                e,
                shell.name(),
                FALLBACK_RESOLUTION.width,
                FALLBACK_RESOLUTION.height
            );
            FALLBACK_RESOLUTION
        }
    }
}

/// Mapping from client reference coordinates to device coordinates
///
/// Built once per session; the client always addresses a fixed reference
/// canvas (1080x1920 by default).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolutionScale {
    pub reference_width: u32,
    pub reference_height: u32,
    pub device_width: u32,
    pub device_height: u32,
}

impl ResolutionScale {
    pub fn new(reference_width: u32, reference_height: u32, device: DeviceResolution) -> Self {
        Self {
            reference_width,
            reference_height,
            device_width: device.width,
            device_height: device.height,
        }
    }

    pub fn scale_x(&self) -> f64 {
        self.device_width as f64 / self.reference_width as f64
    }

    pub fn scale_y(&self) -> f64 {
        self.device_height as f64 / self.reference_height as f64
    }

    /// Map a reference-space point to device pixels, truncating toward zero
    pub fn apply(&self, x: f64, y: f64) -> (i64, i64) {
        // Multiply before dividing so integral inputs scale exactly
        let dx = x * self.device_width as f64 / self.reference_width as f64;
        let dy = y * self.device_height as f64 / self.reference_height as f64;
        (dx.trunc() as i64, dy.trunc() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::{ok_output, RecordingShell};
    use crate::device::ShellOutput;
    use crate::error::AppError;

    fn res(width: u32, height: u32) -> DeviceResolution {
        DeviceResolution {
            width,
            height,
            source: ResolutionSource::Physical,
        }
    }

    #[test]
    fn test_parse_physical() {
        let r = parse_wm_size("Physical size: 1080x2400\n").unwrap();
        assert_eq!((r.width, r.height), (1080, 2400));
        assert_eq!(r.source, ResolutionSource::Physical);
    }

    #[test]
    fn test_parse_override_only() {
        let r = parse_wm_size("Override size: 720x1280").unwrap();
        assert_eq!((r.width, r.height), (720, 1280));
        assert_eq!(r.source, ResolutionSource::Override);
    }

    #[test]
    fn test_parse_physical_wins_over_override() {
        let r = parse_wm_size("Physical size: 1440x3120\r\nOverride size: 1080x2340\r\n").unwrap();
        assert_eq!((r.width, r.height), (1440, 3120));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_wm_size("error: no devices/emulators found").is_none());
        assert!(parse_wm_size("Physical size: axb").is_none());
        assert!(parse_wm_size("Physical size: 0x1920").is_none());
        assert!(parse_wm_size("").is_none());
    }

    #[tokio::test]
    async fn test_probe_uses_shell_reply() {
        let shell = RecordingShell::new().with_reply(Ok(ok_output("Physical size: 2160x3840\n")));
        let r = probe_resolution(&shell).await;
        assert_eq!((r.width, r.height), (2160, 3840));
        assert_eq!(shell.calls(), vec![vec!["wm".to_string(), "size".to_string()]]);
    }

    #[tokio::test]
    async fn test_probe_falls_back_on_error() {
        let shell = RecordingShell::new().with_reply(Err(AppError::DeviceCommand {
            command: "wm size".into(),
            reason: "no device".into(),
        }));
        assert_eq!(probe_resolution(&shell).await, FALLBACK_RESOLUTION);
    }

    #[tokio::test]
    async fn test_probe_falls_back_on_nonzero_exit() {
        let shell = RecordingShell::new().with_reply(Ok(ShellOutput {
            status: Some(1),
            combined: "Physical size: 720x1280".into(),
        }));
        assert_eq!(probe_resolution(&shell).await, FALLBACK_RESOLUTION);
    }

    #[tokio::test]
    async fn test_probe_falls_back_on_unparsable() {
        let shell = RecordingShell::new().with_reply(Ok(ok_output("nonsense")));
        let r = probe_resolution(&shell).await;
        assert_eq!(r.source, ResolutionSource::Fallback);
        assert_eq!((r.width, r.height), (1080, 1920));
    }

    #[test]
    fn test_scale_double_resolution() {
        let scale = ResolutionScale::new(1080, 1920, res(2160, 3840));
        assert_eq!(scale.apply(540.0, 960.0), (1080, 1920));
        assert_eq!(scale.scale_x(), 2.0);
        assert_eq!(scale.scale_y(), 2.0);
    }

    #[test]
    fn test_scale_identity() {
        let scale = ResolutionScale::new(1080, 1920, res(1080, 1920));
        for (x, y) in [(0.0, 0.0), (1.0, 1.0), (539.0, 1234.0), (1079.0, 1919.0)] {
            assert_eq!(scale.apply(x, y), (x as i64, y as i64));
        }
    }

    #[test]
    fn test_scale_matches_integer_formula() {
        let scale = ResolutionScale::new(1080, 1920, res(1080, 2400));
        for x in (0..1080).step_by(7) {
            for y in (0..1920).step_by(13) {
                let expected = ((x * 1080 / 1080) as i64, (y * 2400 / 1920) as i64);
                assert_eq!(scale.apply(x as f64, y as f64), expected);
            }
        }

        let scale = ResolutionScale::new(1080, 1920, res(720, 1280));
        for x in (0..1080).step_by(11) {
            let (sx, _) = scale.apply(x as f64, 0.0);
            assert_eq!(sx, (x * 720 / 1080) as i64);
        }
    }
}
