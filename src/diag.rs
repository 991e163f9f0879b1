// src/diag.rs
use std::fmt;

use ariadne::{Color, Config, Label, Report, ReportKind, Source};

// 统一复用 frontend 的 Span / FileId，并沿用 crate::diag::Span 的访问路径
pub use crate::frontend::span::{FileId, Span};

use crate::cli::colors::ColorSupport;

#[derive(Clone, Debug)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub code: String,
    pub file_id: String,       // 用于显示的“逻辑文件名/路径”字符串
    pub span: Option<Span>,
    pub message: String,
    pub severity: Severity,
}

#[derive(Default, Clone)]
pub struct DiagSink {
    buf: Vec<Diagnostic>,
}

impl DiagSink {
    #[inline]
    pub fn new() -> Self { Self { buf: Vec::new() } }

    pub fn error<S: Into<String>>(
        &mut self,
        code: &str,
        file_id: &str,
        span: Option<Span>,
        msg: S,
    ) {
        self.push(code, file_id, span, msg, Severity::Error);
    }

    pub fn warn<S: Into<String>>(
        &mut self,
        code: &str,
        file_id: &str,
        span: Option<Span>,
        msg: S,
    ) {
        self.push(code, file_id, span, msg, Severity::Warning);
    }

    pub fn note<S: Into<String>>(
        &mut self,
        code: &str,
        file_id: &str,
        span: Option<Span>,
        msg: S,
    ) {
        self.push(code, file_id, span, msg, Severity::Note);
    }

    fn push<S: Into<String>>(
        &mut self,
        code: &str,
        file_id: &str,
        span: Option<Span>,
        msg: S,
        severity: Severity,
    ) {
        self.buf.push(Diagnostic {
            code: code.to_string(),
            file_id: file_id.to_string(),
            span,
            message: msg.into(),
            severity,
        });
    }

    /// 合并另一批诊断（parser/pass 各自收集后汇总）
    pub fn append_from(&mut self, v: Vec<Diagnostic>) {
        self.buf.extend(v);
    }

    pub fn has_errors(&self) -> bool {
        self.buf.iter().any(|d| matches!(d.severity, Severity::Error))
    }

    #[inline] pub fn is_empty(&self) -> bool { self.buf.is_empty() }
    #[inline] pub fn len(&self) -> usize { self.buf.len() }
    #[inline] pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> { self.buf.iter() }
    #[inline] pub fn into_vec(self) -> Vec<Diagnostic> { self.buf }
}

/// 文件注册表：FileId -> (显示名, 源文本)，与 ariadne 的缓存一一对应
#[derive(Default)]
pub struct SourceMap {
    files: Vec<(String, String)>,
}

impl SourceMap {
    pub fn new() -> Self { Self { files: Vec::new() } }

    pub fn add_file(&mut self, name: String, text: String) -> FileId {
        let id = FileId(self.files.len());
        self.files.push((name, text));
        id
    }

    pub fn name(&self, id: FileId) -> Option<&str> {
        self.files.get(id.0).map(|(n, _)| n.as_str())
    }

    pub fn text(&self, id: FileId) -> Option<&str> {
        self.files.get(id.0).map(|(_, t)| t.as_str())
    }
}

/// 彩色渲染一批诊断到 stderr。
///
/// 带 span 且文件已注册的走 ariadne；其余退化为单行输出。
pub fn render_diagnostics_colored(diags: &[Diagnostic], sm: &SourceMap) {
    let colored = ColorSupport::detect().is_enabled();

    for d in diags {
        let (kind, color) = match d.severity {
            Severity::Error => (ReportKind::Error, Color::Red),
            Severity::Warning => (ReportKind::Warning, Color::Yellow),
            Severity::Note => (ReportKind::Advice, Color::Cyan),
        };

        let located = d.span.and_then(|sp| {
            let name = sm.name(sp.file)?.to_string();
            let text = sm.text(sp.file)?.to_string();
            Some((sp, name, text))
        });

        match located {
            Some((sp, name, text)) => {
                let _ = Report::build(kind, (name.clone(), sp.range()))
                    .with_config(Config::default().with_color(colored))
                    .with_code(d.code.clone())
                    .with_message(d.message.clone())
                    .with_label(
                        Label::new((name.clone(), sp.range()))
                            .with_message(d.message.clone())
                            .with_color(color),
                    )
                    .finish()
                    .eprint((name, Source::from(text)));
            }
            None => eprintln!("{}", d),
        }
    }
}

// 可选：便于调试/日志
impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        };
        if let Some(sp) = self.span {
            write!(
                f,
                "[{} {}] {} @{}:{}..{}: {}",
                sev, self.code, self.file_id, sp.file.0, sp.start, sp.end, self.message
            )
        } else {
            write!(f, "[{} {}] {}: {}", sev, self.code, self.file_id, self.message)
        }
    }
}
