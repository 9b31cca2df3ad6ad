//! Gateway configuration renderer
//!
//! Templates use Jinja syntax through `minijinja`. Top level values are
//! `generated_at`, `version`, `port`, `rule_count` and `rules`. Each entry of
//! `rules` carries `hostname`, `target_ip`, `target_port`, `protocol` and
//! `upstream`, in hostname order, enabled rules only.
//!
//! Undefined values are errors, so a typo in a template fails the render
//! instead of deploying an empty field. Block tags alone on their line do not
//! leave a blank line behind.

use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::gateway::rule::ProxyRule;

/// Template used when no template path is configured
pub const DEFAULT_TEMPLATE: &str = r#"# Generated gateway configuration
# version {{ version }}, generated at {{ generated_at }}, {{ rule_count }} rules
:{{ port }} {
{% for rule in rules %}
    @{{ rule.hostname }} host {{ rule.hostname }}
    handle @{{ rule.hostname }} {
        reverse_proxy {{ rule.upstream }}
    }
{% endfor %}
    handle {
        respond "No route configured" 404
    }
}
"#;

/// Name the template is registered under
const TEMPLATE_NAME: &str = "gateway";

/// Values available to a template
#[derive(Debug, Clone)]
pub struct TemplateContext {
    /// RFC 3339 generation timestamp
    pub generated_at: String,
    /// Version the rendered config will carry
    pub version: u64,
    /// Port the gateway listens on
    pub port: u16,
    /// Enabled rules, sorted by hostname
    pub rules: Vec<ProxyRule>,
}

#[derive(Serialize)]
struct RuleView<'a> {
    hostname: &'a str,
    target_ip: &'a str,
    target_port: u16,
    protocol: &'static str,
    upstream: String,
}

#[derive(Serialize)]
struct RenderContext<'a> {
    generated_at: &'a str,
    version: u64,
    port: u16,
    rule_count: usize,
    rules: Vec<RuleView<'a>>,
}

impl<'a> From<&'a TemplateContext> for RenderContext<'a> {
    fn from(ctx: &'a TemplateContext) -> Self {
        Self {
            generated_at: &ctx.generated_at,
            version: ctx.version,
            port: ctx.port,
            rule_count: ctx.rules.len(),
            rules: ctx
                .rules
                .iter()
                .map(|rule| RuleView {
                    hostname: &rule.hostname,
                    target_ip: &rule.target_ip,
                    target_port: rule.target_port,
                    protocol: rule.protocol.as_str(),
                    upstream: rule.upstream(),
                })
                .collect(),
        }
    }
}

/// A compiled template
#[derive(Debug, Clone)]
pub struct Template {
    env: Environment<'static>,
}

impl Template {
    /// Compile template source
    ///
    /// Syntax errors surface here as `Error::Template`.
    pub fn parse(source: &str) -> Result<Self> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);

        env.add_template_owned(TEMPLATE_NAME, source.to_string())
            .map_err(template_error)?;

        Ok(Self { env })
    }

    /// Render against a context
    ///
    /// Nothing partial is returned on failure.
    pub fn render(&self, ctx: &TemplateContext) -> Result<String> {
        self.env
            .get_template(TEMPLATE_NAME)
            .and_then(|template| template.render(RenderContext::from(ctx)))
            .map_err(template_error)
    }
}

/// Compile and render in one step
pub fn render(source: &str, ctx: &TemplateContext) -> Result<String> {
    Template::parse(source)?.render(ctx)
}

fn template_error(err: minijinja::Error) -> Error {
    Error::template(err.to_string())
}
