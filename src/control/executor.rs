//! Input command execution on the device

use std::time::Instant;
use tracing::{debug, info, warn};

use super::types::InputCommand;
use crate::device::{DeviceShell, ResolutionScale};

/// Escape text for `input text`
///
/// `input text` treats `%s` as a space, and the argument passes through the
/// device shell, so the result is single-quoted.
pub fn escape_input_text(text: &str) -> String {
    let encoded = text.replace(' ', "%s");
    format!("'{}'", encoded.replace('\'', r"'\''"))
}

/// Device shell arguments for `command` under `scale`
pub fn device_args(command: &InputCommand, scale: &ResolutionScale, default_swipe_ms: u32) -> Vec<String> {
    let mut args = vec!["input".to_string()];

    match command {
        InputCommand::Tap { x, y } => {
            let (dx, dy) = scale.apply(*x, *y);
            args.extend(["tap".to_string(), dx.to_string(), dy.to_string()]);
        }
        InputCommand::Swipe {
            x,
            y,
            x2,
            y2,
            duration,
        } => {
            let (dx1, dy1) = scale.apply(*x, *y);
            let (dx2, dy2) = scale.apply(*x2, *y2);
            let duration = duration.filter(|d| *d > 0).unwrap_or(default_swipe_ms);
            args.extend([
                "swipe".to_string(),
                dx1.to_string(),
                dy1.to_string(),
                dx2.to_string(),
                dy2.to_string(),
                duration.to_string(),
            ]);
        }
        InputCommand::KeyEvent { keycode } => {
            args.extend(["keyevent".to_string(), keycode.to_string()]);
        }
        InputCommand::Text { text } => {
            args.extend(["text".to_string(), escape_input_text(text)]);
        }
    }

    args
}

/// Run one command on the device
///
/// Failures are logged with the command type and the combined output and
/// never retried. Returns whether the device accepted the command.
pub async fn execute(
    shell: &dyn DeviceShell,
    command: &InputCommand,
    scale: &ResolutionScale,
    default_swipe_ms: u32,
) -> bool {
    let args = device_args(command, scale, default_swipe_ms);
    debug!("Executing {}", args.join(" "));

    let start = Instant::now();
    match shell.run(&args).await {
        Ok(output) if output.success() => {
            if !output.combined.trim().is_empty() {
                debug!("{} output: {}", command.kind(), output.combined.trim());
            }
            info!(
                "Executed {} in {} ms",
                command.kind(),
                start.elapsed().as_millis()
            );
            true
        }
        Ok(output) => {
            warn!(
                "Input {} failed with status {:?}: {}",
                command.kind(),
                output.status,
                output.combined.trim()
            );
            false
        }
        Err(e) => {
            warn!("Input {} failed: {}", command.kind(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::types::KeyCode;
    use crate::device::testing::RecordingShell;
    use crate::device::{DeviceResolution, ResolutionSource, ShellOutput};

    fn scale(width: u32, height: u32) -> ResolutionScale {
        ResolutionScale::new(
            1080,
            1920,
            DeviceResolution {
                width,
                height,
                source: ResolutionSource::Physical,
            },
        )
    }

    #[test]
    fn test_tap_scaled() {
        let args = device_args(&InputCommand::Tap { x: 540.0, y: 960.0 }, &scale(2160, 3840), 300);
        assert_eq!(args, vec!["input", "tap", "1080", "1920"]);
    }

    #[test]
    fn test_swipe_default_duration() {
        let swipe = |duration| InputCommand::Swipe {
            x: 100.0,
            y: 200.0,
            x2: 100.0,
            y2: 1000.0,
            duration,
        };
        let identity = scale(1080, 1920);

        assert_eq!(
            device_args(&swipe(None), &identity, 300),
            vec!["input", "swipe", "100", "200", "100", "1000", "300"]
        );
        assert_eq!(device_args(&swipe(Some(0)), &identity, 300).last().unwrap(), "300");
        assert_eq!(device_args(&swipe(Some(120)), &identity, 300).last().unwrap(), "120");
    }

    #[test]
    fn test_keyevent_and_text() {
        let identity = scale(1080, 1920);
        let key = InputCommand::KeyEvent {
            keycode: KeyCode::parse("66").unwrap(),
        };
        assert_eq!(device_args(&key, &identity, 300), vec!["input", "keyevent", "66"]);

        let text = InputCommand::Text {
            text: "it's me".into(),
        };
        assert_eq!(
            device_args(&text, &identity, 300),
            vec!["input", "text", r"'it'\''s%sme'"]
        );
    }

    #[tokio::test]
    async fn test_execute_reports_failure() {
        let shell = RecordingShell::new().with_reply(Ok(ShellOutput {
            status: Some(255),
            combined: "error: device offline".into(),
        }));
        let ok = execute(&shell, &InputCommand::Tap { x: 1.0, y: 2.0 }, &scale(1080, 1920), 300).await;
        assert!(!ok);
        assert_eq!(shell.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_success() {
        let shell = RecordingShell::new();
        let ok = execute(&shell, &InputCommand::Tap { x: 1.0, y: 2.0 }, &scale(1080, 1920), 300).await;
        assert!(ok);
        assert_eq!(shell.calls(), vec![vec!["input", "tap", "1", "2"]]);
    }
}
