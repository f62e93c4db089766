//! Named templates rendered into subject, HTML and plain-text content.
//!
//! A template called `name` consists of up to three tera sources:
//!
//! | file             | purpose                                   |
//! |------------------|-------------------------------------------|
//! | `name.html`      | HTML body, required                       |
//! | `name.subject`   | subject line, defaults to "Notification"  |
//! | `name.txt`       | plain-text body, defaults to a notice     |
//!
//! Every substitution referenced by `{{ }}` must be supplied; values referenced
//! only by `{% if %}` are optional. Unused substitutions are ignored.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::debug;

use crate::error::TemplateError;

/// Substitution values keyed by name.
pub type Substitutions = BTreeMap<String, serde_json::Value>;

/// Subject used when a template has no `.subject` source.
pub const DEFAULT_SUBJECT: &str = "Notification";

/// Plain-text body used when a template has no `.txt` source.
pub const TEXT_FALLBACK: &str =
    "This email requires an HTML-compatible email client to view.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Lookup-by-name rendering capability used by the message builder.
pub trait TemplateRenderer: Send + Sync {
    /// Render `name` with `substitutions`.
    ///
    /// # Errors
    ///
    /// [`TemplateError::NotFound`] for unknown names, [`TemplateError::Render`]
    /// for missing substitutions or malformed sources.
    fn render(
        &self,
        name: &str,
        substitutions: &Substitutions,
    ) -> Result<RenderedContent, TemplateError>;
}

impl<T: TemplateRenderer + ?Sized> TemplateRenderer for Arc<T> {
    fn render(
        &self,
        name: &str,
        substitutions: &Substitutions,
    ) -> Result<RenderedContent, TemplateError> {
        (**self).render(name, substitutions)
    }
}

const BUILTIN: &[(&str, &str)] = &[
    ("base.html", include_str!("../templates/base.html")),
    ("payment_created.subject", include_str!("../templates/payment_created.subject")),
    ("payment_created.html", include_str!("../templates/payment_created.html")),
    ("payment_created.txt", include_str!("../templates/payment_created.txt")),
    ("payment_success.subject", include_str!("../templates/payment_success.subject")),
    ("payment_success.html", include_str!("../templates/payment_success.html")),
    ("payment_success.txt", include_str!("../templates/payment_success.txt")),
    ("payment_failed.subject", include_str!("../templates/payment_failed.subject")),
    ("payment_failed.html", include_str!("../templates/payment_failed.html")),
    ("payment_failed.txt", include_str!("../templates/payment_failed.txt")),
    ("application_created.subject", include_str!("../templates/application_created.subject")),
    ("application_created.html", include_str!("../templates/application_created.html")),
    ("application_created.txt", include_str!("../templates/application_created.txt")),
    ("application_approved.subject", include_str!("../templates/application_approved.subject")),
    ("application_approved.html", include_str!("../templates/application_approved.html")),
    ("application_approved.txt", include_str!("../templates/application_approved.txt")),
    ("application_rejected.subject", include_str!("../templates/application_rejected.subject")),
    ("application_rejected.html", include_str!("../templates/application_rejected.html")),
    ("application_rejected.txt", include_str!("../templates/application_rejected.txt")),
    ("application_deleted.subject", include_str!("../templates/application_deleted.subject")),
    ("application_deleted.html", include_str!("../templates/application_deleted.html")),
];

/// Tera-backed template store.
#[derive(Debug, Clone)]
pub struct TeraRenderer {
    tera: Tera,
}

impl TeraRenderer {
    /// Renderer holding only the built-in notification templates.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in template fails to parse.
    pub fn builtin() -> Result<Self, TemplateError> {
        Self::from_sources(BUILTIN.iter().map(|(n, s)| ((*n).to_string(), (*s).to_string())))
    }

    /// Built-in templates plus every `.html`, `.txt` and `.subject` file in `dir`.
    /// Files in `dir` replace built-ins of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or a template fails to parse.
    pub fn with_directory(dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let dir = dir.as_ref();
        let io_error = |e: std::io::Error| TemplateError::Render {
            name: dir.display().to_string(),
            reason: e.to_string(),
        };

        let mut sources: BTreeMap<String, String> = BUILTIN
            .iter()
            .map(|(n, s)| ((*n).to_string(), (*s).to_string()))
            .collect();

        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let known = Path::new(file_name)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| matches!(ext, "html" | "txt" | "subject"));
            if !known || !path.is_file() {
                continue;
            }

            debug!(template = file_name, "Loading template from disk");
            sources.insert(file_name.to_string(), std::fs::read_to_string(&path).map_err(io_error)?);
        }

        Self::from_sources(sources)
    }

    /// Renderer built from `(file name, source)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if a source fails to parse.
    pub fn from_sources(
        sources: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(sources)
            .map_err(|e| TemplateError::Render {
                name: "<templates>".to_string(),
                reason: describe(&e),
            })?;

        Ok(Self { tera })
    }

    /// Names of all renderable templates, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tera
            .get_template_names()
            .filter_map(|n| n.strip_suffix(".html"))
            .filter(|n| *n != "base")
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    fn has(&self, file: &str) -> bool {
        self.tera.get_template_names().any(|n| n == file)
    }

    fn render_file(&self, name: &str, file: &str, context: &Context) -> Result<String, TemplateError> {
        self.tera
            .render(file, context)
            .map_err(|e| TemplateError::Render {
                name: name.to_string(),
                reason: describe(&e),
            })
    }
}

impl TemplateRenderer for TeraRenderer {
    fn render(
        &self,
        name: &str,
        substitutions: &Substitutions,
    ) -> Result<RenderedContent, TemplateError> {
        let html_file = format!("{name}.html");
        if name == "base" || !self.has(&html_file) {
            return Err(TemplateError::NotFound(name.to_string()));
        }

        let mut context = Context::new();
        for (key, value) in substitutions {
            context.insert(key.as_str(), value);
        }

        let html = self.render_file(name, &html_file, &context)?;

        let subject_file = format!("{name}.subject");
        let subject = if self.has(&subject_file) {
            self.render_file(name, &subject_file, &context)?
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        } else {
            DEFAULT_SUBJECT.to_string()
        };

        let text_file = format!("{name}.txt");
        let text = if self.has(&text_file) {
            self.render_file(name, &text_file, &context)?
        } else {
            TEXT_FALLBACK.to_string()
        };

        Ok(RenderedContent {
            subject,
            html,
            text,
        })
    }
}

/// Flatten a tera error and its causes into one line.
fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
