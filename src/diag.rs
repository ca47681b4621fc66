use std::{
    fmt::Display,
    io::{self, Write},
};

/// Diagnostic output channel. Everything goes to stderr with a `# ` prefix so
/// it never mixes with plugin output on stdout.
#[derive(Debug, Clone, Copy)]
pub struct Diag {
    debug: bool,
}

impl Diag {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    /// Debug note, printed only when --debug is on.
    pub fn note<T: Display>(&self, message: T) {
        let _ = self.write_note(&mut io::stderr().lock(), message);
    }

    /// Warning, printed unconditionally.
    pub fn warn<T: Display>(&self, message: T) {
        let _ = self.write_warning(&mut io::stderr().lock(), message);
    }

    fn write_note<W: Write, T: Display>(&self, out: &mut W, message: T) -> io::Result<()> {
        if self.debug {
            writeln!(out, "# {message}")
        } else {
            Ok(())
        }
    }

    fn write_warning<W: Write, T: Display>(&self, out: &mut W, message: T) -> io::Result<()> {
        writeln!(out, "# {message}")
    }
}
