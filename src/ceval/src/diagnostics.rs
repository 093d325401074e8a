use crate::ast::Span;
use crate::common::{CodeDiagnostic, CodeError, EvalError, FileId, HashMap, IndexSet, Marker};
use colored::Colorize;

use std::cell::RefCell;
use std::fmt::Write;
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    Error = 2,
    Warning = 1,
    Note = 0,
}

struct DiagnosticContextInner {
    file_map: HashMap<FileId, PathBuf>,
    messages: IndexSet<(Level, CodeError)>,
    counter: usize,
}

/// Collects the diagnostics of all requests made against one translation unit.
#[derive(Clone)]
pub struct DiagnosticContext {
    inner: Rc<RefCell<DiagnosticContextInner>>,
}

impl Default for DiagnosticContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticContext {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(DiagnosticContextInner {
                file_map: HashMap::default(),
                messages: Default::default(),
                counter: 0,
            })),
        }
    }

    pub fn get_file_path(&self, file_id: FileId) -> Option<PathBuf> {
        self.inner.borrow().file_map.get(&file_id).cloned()
    }

    pub fn add_file(&self, source_file: PathBuf) -> FileId {
        let mut inner = self.inner.borrow_mut();
        let file_id = FileId { id: inner.counter };
        inner.counter += 1;
        inner.file_map.insert(file_id, source_file);
        file_id
    }

    pub fn add_error(&self, err: CodeError) {
        self.inner.borrow_mut().messages.insert((Level::Error, err));
    }

    pub fn add_warning(&self, err: CodeError) {
        self.inner
            .borrow_mut()
            .messages
            .insert((Level::Warning, err));
    }

    pub fn add_note(&self, err: CodeError) {
        self.inner.borrow_mut().messages.insert((Level::Note, err));
    }

    pub fn has_errors(&self) -> bool {
        self.inner
            .borrow()
            .messages
            .iter()
            .any(|(level, _)| *level == Level::Error)
    }

    pub fn error_count(&self) -> usize {
        self.inner
            .borrow()
            .messages
            .iter()
            .filter(|(level, _)| *level == Level::Error)
            .count()
    }

    pub fn messages(&self) -> Vec<(Level, CodeError)> {
        self.inner.borrow().messages.iter().cloned().collect()
    }

    fn location(inner: &DiagnosticContextInner, span: &Span) -> String {
        match inner.file_map.get(&span.file) {
            Some(file_name) => format!(
                "{}:{}:{}",
                file_name.display(),
                span.line + 1,
                span.column.map(|c| c + 1).unwrap_or(1)
            ),
            None => "{ unresolved location }".to_string(),
        }
    }

    pub fn render_report(&self) -> String {
        let inner = self.inner.borrow();
        let mut all_errors: Vec<_> = inner.messages.iter().collect();
        all_errors.sort_by_key(|(level, err)| {
            (
                std::cmp::Reverse(*level),
                err.primary_span().map(|span| (span.file, span.start)),
            )
        });

        let mut report = String::new();
        for (level, error) in all_errors {
            let level_string = match level {
                Level::Error => "error".red(),
                Level::Warning => "warning".yellow(),
                Level::Note => "note".green(),
            };

            let tagline = format!("{}: {}", level_string, error.kind).bold();
            let _ = writeln!(report, "{}", tagline);

            let mut seen_primary = false;
            for marker in &error.backtrace {
                match marker {
                    Marker::Span(span) => {
                        // Only the innermost span is interesting, the rest are the
                        // enclosing expressions.
                        if seen_primary {
                            continue;
                        }
                        seen_primary = true;
                        let _ = writeln!(report, "  --> {}", Self::location(&inner, span));
                    }
                    Marker::Note { message, span } => {
                        let _ = writeln!(report, "  {} {}", "note:".bold(), message);
                        if let Some(span) = span {
                            let _ = writeln!(report, "  --> {}", Self::location(&inner, span));
                        }
                    }
                    Marker::Call { callee, span } => {
                        let _ = writeln!(report, "  {} in call to '{}'", "note:".bold(), callee);
                        if let Some(span) = span {
                            let _ = writeln!(report, "  --> {}", Self::location(&inner, span));
                        }
                    }
                    Marker::Skipped(count) => {
                        let _ = writeln!(
                            report,
                            "  {} (skipping {} calls in backtrace)",
                            "note:".bold(),
                            count
                        );
                    }
                }
            }

            let _ = writeln!(report);
        }

        report
    }

    pub fn print_error_report(&self) -> Result<(), EvalError> {
        eprint!("{}", self.render_report());
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Frame {
    Span(Option<Span>),
    Call { callee: String, span: Option<Span> },
}

struct DiagnosticsStackInner {
    frames: Vec<Frame>,
    backtrace_limit: usize,
}

/// The evaluation context of the current point of evaluation: the spans of the
/// expressions being evaluated and the calls that led there.
#[derive(Clone)]
pub struct DiagnosticsStack {
    inner: Rc<RefCell<DiagnosticsStackInner>>,
}

/// Pops everything pushed since its creation when dropped.
#[must_use]
pub struct StackGuard {
    inner: Rc<RefCell<DiagnosticsStackInner>>,
    len: usize,
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        self.inner.borrow_mut().frames.truncate(self.len);
    }
}

impl DiagnosticsStack {
    pub fn new(backtrace_limit: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(DiagnosticsStackInner {
                frames: Vec::new(),
                backtrace_limit,
            })),
        }
    }

    fn push(&self, frame: Frame) -> StackGuard {
        let mut inner = self.inner.borrow_mut();
        let len = inner.frames.len();
        inner.frames.push(frame);

        StackGuard {
            inner: self.inner.clone(),
            len,
        }
    }

    pub fn push_span(&self, span: Option<Span>) -> StackGuard {
        self.push(Frame::Span(span))
    }

    pub fn push_call(&self, callee: String, span: Option<Span>) -> StackGuard {
        self.push(Frame::Call { callee, span })
    }

    pub fn call_depth(&self) -> usize {
        self.inner
            .borrow()
            .frames
            .iter()
            .filter(|f| matches!(f, Frame::Call { .. }))
            .count()
    }

    pub fn current_span(&self) -> Option<Span> {
        self.inner.borrow().frames.iter().rev().find_map(|f| match f {
            Frame::Span(span) => *span,
            _ => None,
        })
    }

    /// Primary span first, then the calls from the innermost outwards. Long call
    /// chains keep both ends.
    pub fn snapshot(&self) -> Vec<Marker> {
        let inner = self.inner.borrow();

        let mut markers = Vec::new();
        let mut calls = Vec::new();
        for frame in inner.frames.iter().rev() {
            match frame {
                Frame::Span(Some(span)) if markers.is_empty() => {
                    markers.push(Marker::Span(*span));
                }
                Frame::Span(_) => {}
                Frame::Call { callee, span } => calls.push(Marker::Call {
                    callee: callee.clone(),
                    span: *span,
                }),
            }
        }

        let limit = inner.backtrace_limit;
        if limit > 0 && calls.len() > limit {
            let head = limit - limit / 2;
            let tail = limit / 2;
            let skipped = calls.len() - head - tail;
            let rest = calls.split_off(head);

            calls.push(Marker::Skipped(skipped));
            calls.extend(rest.into_iter().skip(skipped));
        }

        markers.extend(calls);
        markers
    }

    pub fn error(&self, kind: impl Into<CodeDiagnostic>) -> CodeError {
        CodeError {
            kind: kind.into(),
            backtrace: self.snapshot(),
        }
    }

    pub fn error_with_note(
        &self,
        kind: impl Into<CodeDiagnostic>,
        message: impl ToString,
        span: Option<Span>,
    ) -> CodeError {
        let mut error = self.error(kind);
        let at = usize::from(matches!(error.backtrace.first(), Some(Marker::Span(_))));
        error.backtrace.insert(
            at,
            Marker::Note {
                message: message.to_string(),
                span,
            },
        );
        error
    }
}

pub trait WithBacktrace<T> {
    fn with_backtrace(self, diag: &DiagnosticsStack) -> Result<T, EvalError>;
}

impl<T, E> WithBacktrace<T> for Result<T, E>
where
    CodeDiagnostic: From<E>,
{
    fn with_backtrace(self, diag: &DiagnosticsStack) -> Result<T, EvalError> {
        self.map_err(|e| EvalError::CodeErrors(vec![diag.error(CodeDiagnostic::from(e))]))
    }
}
