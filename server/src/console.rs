//! Operator-facing status lines.
//!
//! Every line starts with a severity marker. Markers are colored only when
//! `TERM=xterm`, so container logs stay free of escape codes.

use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Step,
    Ok,
    Warning,
    Err,
}

impl Marker {
    fn prefix(self) -> &'static str {
        match self {
            Marker::Step => ">>>",
            Marker::Ok => "[OK]",
            Marker::Warning => "[WARNING]",
            Marker::Err => "[ERR]",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Marker::Step => "29;1",
            Marker::Ok => "32",
            Marker::Warning | Marker::Err => "31;1",
        }
    }
}

pub fn format_line(marker: Marker, message: impl Display, colored: bool) -> String {
    let line = format!("{} {}", marker.prefix(), message);
    if colored {
        format!("\x1b[{}m{}\x1b[0m", marker.color(), line)
    } else {
        line
    }
}

fn colored() -> bool {
    std::env::var("TERM").map(|t| t == "xterm").unwrap_or(false)
}

pub fn print(marker: Marker, message: impl Display) {
    let line = format_line(marker, message, colored());
    match marker {
        Marker::Warning | Marker::Err => eprintln!("{}", line),
        Marker::Step | Marker::Ok => println!("{}", line),
    }
}

pub fn step(message: impl Display) {
    print(Marker::Step, message)
}

pub fn ok(message: impl Display) {
    print(Marker::Ok, message)
}

pub fn warning(message: impl Display) {
    print(Marker::Warning, message)
}

pub fn err(message: impl Display) {
    print(Marker::Err, message)
}
