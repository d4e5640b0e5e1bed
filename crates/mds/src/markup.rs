use pulldown_cmark::{Event, Options, Parser, html};

/// Markdown to HTML renderer used for the document body and `outmd` output.
pub trait MarkupRenderer: Send + Sync + 'static {
    fn render(&self, markup: &str) -> String;
}

impl<F> MarkupRenderer for F
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    fn render(&self, markup: &str) -> String {
        self(markup)
    }
}

/// CommonMark rendering with tables and strikethrough. HTML in the source is
/// escaped and shown as text.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommonMark;

impl MarkupRenderer for CommonMark {
    fn render(&self, markup: &str) -> String {
        let mut opts = Options::empty();
        opts.insert(Options::ENABLE_TABLES);
        opts.insert(Options::ENABLE_STRIKETHROUGH);
        let parser = Parser::new_ext(markup, opts).map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            other => other,
        });
        let mut out = String::with_capacity(markup.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}
