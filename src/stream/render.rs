use super::chunk::FieldAddress;
use crate::error::ShellRenderError;
use crate::ids::RequestId;
use serde_json::Value;

/// What the renderer sees when producing the shell.
#[derive(Debug, Clone)]
pub struct ShellContext {
    pub request_id: RequestId,
    /// Critical data keyed by route id; pending fields hold placeholders.
    pub critical: Value,
    /// Fields that are still in flight, in slot order.
    pub pending: Vec<FieldAddress>,
}

impl ShellContext {
    /// Critical data of one route.
    #[must_use]
    pub fn route_data(&self, route: &str) -> Option<&Value> {
        self.critical.get(route)
    }

    #[must_use]
    pub fn is_pending(&self, route: &str, path: &str) -> bool {
        self.pending
            .iter()
            .any(|a| a.route == route && a.path.to_string() == path)
    }
}

/// The UI side of the server: turns critical data into a document shell.
///
/// Implementations must be callable from any coroutine. A failure before the
/// shell is flushed lets the caller send another response instead.
pub trait ShellRenderer: Send + Sync {
    fn render_shell(&self, ctx: &ShellContext) -> Result<String, ShellRenderError>;

    /// Markup for a settled field's placeholder. `None` leaves the rendering
    /// to the client.
    fn render_fragment(
        &self,
        _address: &FieldAddress,
        _value: &Value,
    ) -> Result<Option<String>, ShellRenderError> {
        Ok(None)
    }
}

/// Minimal document: one `<section>` per route with its data as escaped text,
/// and a fallback template for each pending field.
#[derive(Debug, Default, Clone)]
pub struct PageShell {
    pub title: String,
}

impl PageShell {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

impl ShellRenderer for PageShell {
    fn render_shell(&self, ctx: &ShellContext) -> Result<String, ShellRenderError> {
        let routes = ctx
            .critical
            .as_object()
            .ok_or_else(|| ShellRenderError::render("critical data is not an object"))?;
        let mut html = format!(
            "<!DOCTYPE html><html><head><title>{}</title></head><body>",
            escape_text(&self.title)
        );
        for (route, data) in routes {
            let json = serde_json::to_string(data)
                .map_err(|e| ShellRenderError::render(e.to_string()))?;
            html.push_str(&format!(
                "<section data-route=\"{}\"><pre>{}</pre>",
                escape_text(route),
                escape_text(&json)
            ));
            for address in ctx.pending.iter().filter(|a| &a.route == route) {
                html.push_str(&format!(
                    "<template data-deferred=\"{}\">Loading...</template>",
                    escape_text(&address.to_string())
                ));
            }
            html.push_str("</section>");
        }
        html.push_str("</body></html>");
        Ok(html)
    }
}
