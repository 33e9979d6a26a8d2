use std::io::Write;

use termcolor::{self, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{event, Level};

/// Renders teleprinter output on the terminal, with status messages
/// from the simulator shown in a different colour.
pub struct ConsoleWriter {
    stream: StandardStream,
    in_status: bool,
}

fn get_colour_choice() -> termcolor::ColorChoice {
    if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

/// The terminal rendering of a punched character.  The teleprinter
/// sends CR LF, so CR prints nothing.
fn printable(ch: u8) -> Option<char> {
    match ch & 0o177 {
        b'\r' | 0 | 0o177 => None,
        b'\n' => Some('\n'),
        b'\t' => Some('\t'),
        0o007 => Some('\u{7}'),
        c if c < 0o040 => None,
        c => Some(char::from(c)),
    }
}

impl ConsoleWriter {
    pub fn new() -> ConsoleWriter {
        ConsoleWriter {
            stream: StandardStream::stdout(get_colour_choice()),
            in_status: false,
        }
    }

    fn set_status_colour(&mut self, status: bool) {
        if status == self.in_status {
            return;
        }
        let result = if status {
            let mut colour = ColorSpec::new();
            colour.set_fg(Some(termcolor::Color::Yellow)).set_bold(true);
            self.stream.set_color(&colour)
        } else {
            self.stream.reset()
        };
        if let Err(e) = result {
            event!(Level::ERROR, "Failed to change colour: {}", e);
        }
        self.in_status = status;
    }

    pub fn punch(&mut self, ch: u8) -> Result<(), std::io::Error> {
        let Some(to_emit) = printable(ch) else {
            return Ok(());
        };
        self.set_status_colour(false);
        write!(self.stream, "{to_emit}").and_then(|()| self.stream.flush())
    }

    pub fn status(&mut self, message: &str) -> Result<(), std::io::Error> {
        self.set_status_colour(true);
        writeln!(self.stream, "[{message}]")?;
        self.set_status_colour(false);
        self.stream.flush()
    }

    pub fn disconnect(&mut self) {
        if let Err(e) = self.stream.reset() {
            event!(Level::ERROR, "Failed to reset terminal: {}", e);
        }
    }
}

#[test]
fn test_printable() {
    assert_eq!(printable(b'A' | 0o200), Some('A'));
    assert_eq!(printable(b'\r' | 0o200), None);
    assert_eq!(printable(b'\n'), Some('\n'));
    assert_eq!(printable(0o377), None);
    assert_eq!(printable(0o001), None);
}
