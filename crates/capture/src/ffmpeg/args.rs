//! Encoder command line

use std::net::SocketAddr;
use std::process::{Child, Command, Stdio};

use tracing::debug;

use crate::{CaptureError, CaptureResult, Rect};

/// Platform screen input of the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDevice {
    /// macOS, selected by device index
    AvFoundation { index: u32 },
    /// Windows desktop, offset to the captured display
    GdiGrab { offset_x: i32, offset_y: i32 },
    /// X11 display name plus offset
    X11Grab {
        display: String,
        offset_x: i32,
        offset_y: i32,
    },
}

impl InputDevice {
    /// Desktop input for the host platform. `device_index` only matters on
    /// macOS; the X11 display comes from `DISPLAY`.
    pub fn for_host(capture: Rect, device_index: u32) -> Self {
        if cfg!(target_os = "macos") {
            InputDevice::AvFoundation {
                index: device_index,
            }
        } else if cfg!(windows) {
            InputDevice::GdiGrab {
                offset_x: capture.x,
                offset_y: capture.y,
            }
        } else {
            InputDevice::X11Grab {
                display: std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string()),
                offset_x: capture.x,
                offset_y: capture.y,
            }
        }
    }

    fn format(&self) -> &'static str {
        match self {
            InputDevice::AvFoundation { .. } => "avfoundation",
            InputDevice::GdiGrab { .. } => "gdigrab",
            InputDevice::X11Grab { .. } => "x11grab",
        }
    }

    fn push_args(&self, args: &mut Vec<String>) {
        match self {
            InputDevice::AvFoundation { index } => {
                args.extend(["-f".into(), self.format().into(), "-i".into(), index.to_string()]);
            }
            InputDevice::GdiGrab { offset_x, offset_y } => {
                args.extend([
                    "-f".into(),
                    self.format().into(),
                    "-offset_x".into(),
                    offset_x.to_string(),
                    "-offset_y".into(),
                    offset_y.to_string(),
                    // The pointer is composited by the consumer
                    "-draw_mouse".into(),
                    "0".into(),
                    "-i".into(),
                    "desktop".into(),
                ]);
            }
            InputDevice::X11Grab {
                display,
                offset_x,
                offset_y,
            } => {
                args.extend([
                    "-f".into(),
                    self.format().into(),
                    "-draw_mouse".into(),
                    "0".into(),
                    "-i".into(),
                    format!("{}+{},{}", display, offset_x, offset_y),
                ]);
            }
        }
    }
}

/// Everything needed to launch the encoder for one capture session
#[derive(Debug, Clone)]
pub struct FfmpegArgs {
    pub program: String,
    pub input: InputDevice,
    /// Captured region in physical pixels
    pub capture: Rect,
    /// Output frame size
    pub target: Rect,
    pub framerate: u32,
    /// Loopback listener receiving raw frames
    pub sink: SocketAddr,
}

impl FfmpegArgs {
    /// Full argument list, without the program name
    pub fn build(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-loglevel",
            "error",
            "-nostats",
            "-hide_banner",
            "-video_size",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(format!("{}x{}", self.capture.width, self.capture.height));
        args.push("-framerate".into());
        args.push(self.framerate.to_string());

        self.input.push_args(&mut args);

        args.extend([
            "-s".into(),
            format!("{}x{}", self.target.width, self.target.height),
            "-sws_flags".into(),
            "fast_bilinear".into(),
            "-vcodec".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-f".into(),
            "rawvideo".into(),
            format!("tcp://{}", self.sink),
        ]);
        args
    }

    /// Launch the encoder with its stdio attached to ours
    pub fn spawn(&self) -> CaptureResult<Child> {
        let args = self.build();
        debug!("Launching {} {}", self.program, args.join(" "));

        Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| CaptureError::EncoderSpawn {
                program: self.program.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(input: InputDevice) -> FfmpegArgs {
        FfmpegArgs {
            program: "ffmpeg".to_string(),
            input,
            capture: Rect::new(0, 0, 1920, 1080),
            target: Rect::new(0, 0, 1280, 720),
            framerate: 15,
            sink: "127.0.0.1:40123".parse().unwrap(),
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(|s| s.as_str())
    }

    #[test]
    fn test_common_output_args() {
        let built = args(InputDevice::AvFoundation { index: 1 }).build();

        assert_eq!(value_after(&built, "-video_size"), Some("1920x1080"));
        assert_eq!(value_after(&built, "-framerate"), Some("15"));
        assert_eq!(value_after(&built, "-s"), Some("1280x720"));
        assert_eq!(value_after(&built, "-pix_fmt"), Some("rgb24"));
        assert_eq!(value_after(&built, "-vcodec"), Some("rawvideo"));
        assert_eq!(built.last().map(|s| s.as_str()), Some("tcp://127.0.0.1:40123"));
    }

    #[test]
    fn test_avfoundation_input() {
        let built = args(InputDevice::AvFoundation { index: 3 }).build();
        assert_eq!(value_after(&built, "-i"), Some("3"));
        assert!(built.windows(2).any(|w| w[0] == "-f" && w[1] == "avfoundation"));
    }

    #[test]
    fn test_gdigrab_input() {
        let built = args(InputDevice::GdiGrab {
            offset_x: -1920,
            offset_y: 0,
        })
        .build();
        assert_eq!(value_after(&built, "-offset_x"), Some("-1920"));
        assert_eq!(value_after(&built, "-draw_mouse"), Some("0"));
        assert_eq!(value_after(&built, "-i"), Some("desktop"));
    }

    #[test]
    fn test_x11grab_input() {
        let built = args(InputDevice::X11Grab {
            display: ":1".to_string(),
            offset_x: 10,
            offset_y: 20,
        })
        .build();
        assert_eq!(value_after(&built, "-i"), Some(":1+10,20"));
        assert_eq!(value_after(&built, "-draw_mouse"), Some("0"));
    }

    #[test]
    fn test_input_precedes_output_format() {
        let built = args(InputDevice::AvFoundation { index: 0 }).build();
        let input = built.iter().position(|a| a == "-i").unwrap();
        let scale = built.iter().position(|a| a == "-s").unwrap();
        assert!(input < scale);
    }

    #[test]
    fn test_spawn_missing_program() {
        let mut missing = args(InputDevice::AvFoundation { index: 0 });
        missing.program = "/nonexistent/screencast-encoder".to_string();
        assert!(matches!(
            missing.spawn(),
            Err(CaptureError::EncoderSpawn { .. })
        ));
    }
}
