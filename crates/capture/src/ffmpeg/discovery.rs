//! Screen device discovery for the avfoundation input
//!
//! `ffmpeg -f avfoundation -list_devices true -i ""` prints the device table
//! on stderr, one entry per line:
//!
//! ```text
//! [AVFoundation indev @ 0x7f9c] [0] FaceTime HD Camera
//! [AVFoundation indev @ 0x7f9c] [1] Capture screen 0
//! ```

use std::process::{Command, Stdio};

use tracing::{debug, warn};

/// Outcome of screen device discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// A screen capture device was listed
    Found { index: u32, screen: u32 },
    /// Nothing usable was listed; device index 0 is used
    Defaulted { reason: String },
}

impl Discovery {
    /// Device index to pass to the encoder
    pub fn index(&self) -> u32 {
        match self {
            Discovery::Found { index, .. } => *index,
            Discovery::Defaulted { .. } => 0,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Discovery::Defaulted { .. })
    }
}

/// Arguments that make the encoder list its avfoundation devices and exit
pub fn list_devices_args() -> Vec<String> {
    [
        "-nostats",
        "-hide_banner",
        "-f",
        "avfoundation",
        "-list_devices",
        "true",
        "-i",
        "",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Run the encoder's device listing and pick the first screen device.
///
/// Never fails: a missing executable or an unrecognized listing yields
/// [`Discovery::Defaulted`] and a warning.
pub fn discover_capture_device(program: &str) -> Discovery {
    let output = Command::new(program)
        .args(list_devices_args())
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped())
        .output();

    let discovery = match output {
        Ok(output) => parse_capture_device(&String::from_utf8_lossy(&output.stderr)),
        Err(e) => Discovery::Defaulted {
            reason: format!("failed to run '{}': {}", program, e),
        },
    };

    match &discovery {
        Discovery::Found { index, screen } => {
            debug!("Found capture device [{}] for screen {}", index, screen)
        }
        Discovery::Defaulted { reason } => {
            warn!("Capture device discovery defaulted to index 0: {}", reason)
        }
    }
    discovery
}

/// First line of `listing` naming a screen capture device
pub fn parse_capture_device(listing: &str) -> Discovery {
    listing
        .lines()
        .find_map(parse_line)
        .map(|(index, screen)| Discovery::Found { index, screen })
        .unwrap_or_else(|| Discovery::Defaulted {
            reason: "no 'capture screen' device listed".to_string(),
        })
}

/// Match `[<index>] capture screen <screen>` anywhere in the line, ignoring
/// case, with nothing but whitespace after the screen number
fn parse_line(line: &str) -> Option<(u32, u32)> {
    line.match_indices('[')
        .find_map(|(start, _)| parse_entry(&line[start + 1..]))
}

fn parse_entry(rest: &str) -> Option<(u32, u32)> {
    let mut cursor = Cursor(rest);
    let index = cursor.number()?;
    cursor.literal("]")?;
    cursor.skip_whitespace();
    cursor.keyword("capture")?;
    cursor.whitespace()?;
    cursor.keyword("screen")?;
    cursor.whitespace()?;
    let screen = cursor.number()?;
    cursor.skip_whitespace();
    cursor.0.is_empty().then_some((index, screen))
}

struct Cursor<'a>(&'a str);

impl Cursor<'_> {
    fn number(&mut self) -> Option<u32> {
        let end = self
            .0
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.0.len());
        let value = self.0[..end].parse().ok()?;
        self.0 = &self.0[end..];
        Some(value)
    }

    fn literal(&mut self, token: &str) -> Option<()> {
        self.0 = self.0.strip_prefix(token)?;
        Some(())
    }

    fn keyword(&mut self, word: &str) -> Option<()> {
        let head = self.0.get(..word.len())?;
        if !head.eq_ignore_ascii_case(word) {
            return None;
        }
        self.0 = &self.0[word.len()..];
        Some(())
    }

    fn skip_whitespace(&mut self) {
        self.0 = self.0.trim_start();
    }

    /// At least one whitespace character
    fn whitespace(&mut self) -> Option<()> {
        let trimmed = self.0.trim_start();
        if trimmed.len() == self.0.len() {
            return None;
        }
        self.0 = trimmed;
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
[AVFoundation indev @ 0x7f9c8b604a40] AVFoundation video devices:
[AVFoundation indev @ 0x7f9c8b604a40] [0] FaceTime HD Camera
[AVFoundation indev @ 0x7f9c8b604a40] [1] Capture screen 0
[AVFoundation indev @ 0x7f9c8b604a40] [2] Capture screen 1
[AVFoundation indev @ 0x7f9c8b604a40] AVFoundation audio devices:
[AVFoundation indev @ 0x7f9c8b604a40] [0] Built-in Microphone
";

    #[test]
    fn test_first_screen_device_wins() {
        assert_eq!(
            parse_capture_device(LISTING),
            Discovery::Found { index: 1, screen: 0 }
        );
    }

    #[test]
    fn test_bare_line_case_insensitive() {
        let discovery = parse_capture_device("[3] capture screen 1");
        assert_eq!(discovery, Discovery::Found { index: 3, screen: 1 });
        assert_eq!(discovery.index(), 3);

        assert_eq!(parse_capture_device("[7]CAPTURE   SCREEN\t2  ").index(), 7);
    }

    #[test]
    fn test_no_match_defaults_to_zero() {
        let discovery = parse_capture_device("[0] FaceTime HD Camera\n[1] Built-in Microphone");
        assert!(discovery.is_defaulted());
        assert_eq!(discovery.index(), 0);

        assert!(parse_capture_device("").is_defaulted());
    }

    #[test]
    fn test_rejects_near_misses() {
        for line in [
            "[x] Capture screen 0",
            "[1] Capturescreen 0",
            "[1] Capture screen",
            "[1] Capture screen 0 (virtual)",
            "1] Capture screen 0",
            "[-1] Capture screen 0",
        ] {
            assert!(parse_capture_device(line).is_defaulted(), "{}", line);
        }
    }

    #[test]
    fn test_missing_program_defaults() {
        let discovery = discover_capture_device("/nonexistent/screencast-encoder");
        assert!(discovery.is_defaulted());
        assert_eq!(discovery.index(), 0);
    }
}
