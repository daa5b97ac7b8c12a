//! Diagnostic emitters for different output formats.
//!
//! Lowering reports per method, so every emitter shows the method a
//! diagnostic belongs to when it has one.

use crate::diagnostic::{Diagnostic, Diagnostics, Severity};
use std::io::Write;

/// Trait for emitting diagnostics in various formats.
pub trait DiagnosticEmitter {
    /// Emit a single diagnostic.
    fn emit(&mut self, diagnostic: &Diagnostic) -> std::io::Result<()>;

    /// Emit multiple diagnostics.
    fn emit_all(&mut self, diagnostics: &Diagnostics) -> std::io::Result<()> {
        for diag in diagnostics.iter() {
            self.emit(diag)?;
        }
        Ok(())
    }

    /// Emit a summary line.
    fn emit_summary(&mut self, diagnostics: &Diagnostics) -> std::io::Result<()>;
}

/// ANSI escapes, all empty when colour is off
#[derive(Debug, Clone, Copy)]
struct Palette {
    error: &'static str,
    warning: &'static str,
    hint: &'static str,
    accent: &'static str,
    bold: &'static str,
    reset: &'static str,
}

impl Palette {
    const COLORED: Palette = Palette {
        error: "\x1b[31m",
        warning: "\x1b[33m",
        hint: "\x1b[34m",
        accent: "\x1b[36m",
        bold: "\x1b[1m",
        reset: "\x1b[0m",
    };

    const PLAIN: Palette = Palette {
        error: "",
        warning: "",
        hint: "",
        accent: "",
        bold: "",
        reset: "",
    };

    fn severity(&self, severity: Severity) -> &'static str {
        match severity {
            Severity::Error => self.error,
            Severity::Warning => self.warning,
            Severity::Hint => self.hint,
        }
    }
}

fn plural(n: usize, word: &str) -> String {
    format!("{} {}{}", n, word, if n == 1 { "" } else { "s" })
}

/// Terminal output with colors. Consecutive diagnostics of the same method
/// share one `in method` header.
pub struct TerminalEmitter<W: Write> {
    writer: W,
    palette: Palette,
    current_method: Option<String>,
}

impl<W: Write> TerminalEmitter<W> {
    /// Create a new terminal emitter.
    pub fn new(writer: W, colored: bool) -> Self {
        Self {
            writer,
            palette: if colored { Palette::COLORED } else { Palette::PLAIN },
            current_method: None,
        }
    }
}

impl<W: Write> DiagnosticEmitter for TerminalEmitter<W> {
    fn emit(&mut self, diagnostic: &Diagnostic) -> std::io::Result<()> {
        let p = self.palette;
        let color = p.severity(diagnostic.severity);

        if let Some(method) = &diagnostic.method {
            if self.current_method.as_ref() != Some(method) {
                writeln!(self.writer, "{}in method {}{}", p.bold, method, p.reset)?;
                self.current_method = Some(method.clone());
            }
        }

        // error[I002]: message
        writeln!(
            self.writer,
            "{}{}{}[{}]{}: {}",
            p.bold,
            color,
            diagnostic.severity,
            diagnostic.code,
            p.reset,
            diagnostic.message
        )?;
        if !diagnostic.span.is_dummy() {
            writeln!(self.writer, "  {}-->{} {}", p.accent, p.reset, diagnostic.span)?;
        }
        for label in &diagnostic.labels {
            writeln!(
                self.writer,
                "  {}note{}: {} ({})",
                p.accent, p.reset, label.message, label.span
            )?;
        }
        if let Some(help) = &diagnostic.explanation {
            writeln!(self.writer, "  {}= help:{} {}", p.accent, p.reset, help)?;
        }
        writeln!(self.writer)?;
        Ok(())
    }

    fn emit_summary(&mut self, diagnostics: &Diagnostics) -> std::io::Result<()> {
        let mut parts = Vec::new();
        for (severity, count) in [
            (Severity::Error, diagnostics.error_count()),
            (Severity::Warning, diagnostics.warning_count()),
            (Severity::Hint, diagnostics.hint_count()),
        ] {
            if count > 0 {
                parts.push(plural(count, severity.as_str()));
            }
        }
        if parts.is_empty() {
            return Ok(());
        }

        let color = diagnostics
            .worst_severity()
            .map_or("", |s| self.palette.severity(s));
        let methods = diagnostics.methods().len();
        let scope = if methods > 0 {
            format!(" in {}", plural(methods, "method"))
        } else {
            String::new()
        };
        writeln!(
            self.writer,
            "{}{} emitted{}{}",
            color,
            parts.join(", "),
            scope,
            self.palette.reset
        )
    }
}

/// JSON lines output for tooling integration.
pub struct JsonEmitter<W: Write> {
    writer: W,
}

impl<W: Write> JsonEmitter<W> {
    /// Create a new JSON emitter.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> DiagnosticEmitter for JsonEmitter<W> {
    fn emit(&mut self, diagnostic: &Diagnostic) -> std::io::Result<()> {
        let span = if diagnostic.span.is_dummy() {
            serde_json::Value::Null
        } else {
            serde_json::json!({
                "file": diagnostic.span.file_id.0,
                "start": diagnostic.span.start,
                "end": diagnostic.span.end,
            })
        };
        let labels: Vec<_> = diagnostic
            .labels
            .iter()
            .map(|l| {
                serde_json::json!({
                    "message": l.message,
                    "start": l.span.start,
                    "end": l.span.end,
                })
            })
            .collect();
        let json = serde_json::json!({
            "code": diagnostic.code.as_str(),
            "severity": diagnostic.severity.as_str(),
            "method": diagnostic.method,
            "message": diagnostic.message,
            "span": span,
            "help": diagnostic.explanation,
            "labels": labels,
        });

        serde_json::to_writer(&mut self.writer, &json)?;
        writeln!(self.writer)
    }

    fn emit_summary(&mut self, diagnostics: &Diagnostics) -> std::io::Result<()> {
        let summary = serde_json::json!({
            "type": "summary",
            "errors": diagnostics.error_count(),
            "warnings": diagnostics.warning_count(),
            "hints": diagnostics.hint_count(),
            "methods": diagnostics.methods(),
            "total": diagnostics.len(),
        });
        serde_json::to_writer(&mut self.writer, &summary)?;
        writeln!(self.writer)
    }
}

/// One line per diagnostic: `[span: ][method: ]severity: message [code]`
pub struct SimpleEmitter<W: Write> {
    writer: W,
}

impl<W: Write> SimpleEmitter<W> {
    /// Create a new simple emitter.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> DiagnosticEmitter for SimpleEmitter<W> {
    fn emit(&mut self, diagnostic: &Diagnostic) -> std::io::Result<()> {
        if !diagnostic.span.is_dummy() {
            write!(self.writer, "{}: ", diagnostic.span)?;
        }
        if let Some(method) = &diagnostic.method {
            write!(self.writer, "{}: ", method)?;
        }
        writeln!(
            self.writer,
            "{}: {} [{}]",
            diagnostic.severity, diagnostic.message, diagnostic.code
        )
    }

    fn emit_summary(&mut self, diagnostics: &Diagnostics) -> std::io::Result<()> {
        writeln!(
            self.writer,
            "{} error(s), {} warning(s)",
            diagnostics.error_count(),
            diagnostics.warning_count()
        )
    }
}
