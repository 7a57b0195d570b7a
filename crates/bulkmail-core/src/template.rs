//! Template Renderer - Handles personalization of email content
//!
//! Placeholders look like `{{name}}` with optional inner whitespace. Each
//! template is scanned once; substituted values are never rescanned, and
//! tokens without a value are left as written.

use crate::unsubscribe::UnsubscribeSigner;
use bulkmail_common::types::{CampaignId, UserId};
use bulkmail_storage::models::{NewRecipient, Recipient};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid placeholder pattern")
});

/// Values available to a template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateVars {
    values: HashMap<String, String>,
}

impl TemplateVars {
    /// Recipient variables; missing fields resolve to the empty string
    pub fn for_recipient(
        email: &str,
        name: Option<&str>,
        company: Option<&str>,
        city: Option<&str>,
    ) -> Self {
        let name = name.unwrap_or("");
        let first_name = name.split_whitespace().next().unwrap_or("");

        Self::default()
            .with("email", email)
            .with("name", name)
            .with("first_name", first_name)
            .with("company", company.unwrap_or(""))
            .with("city", city.unwrap_or(""))
    }

    /// Add or replace a variable
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl From<&Recipient> for TemplateVars {
    fn from(recipient: &Recipient) -> Self {
        Self::for_recipient(
            &recipient.email,
            recipient.name.as_deref(),
            recipient.company.as_deref(),
            recipient.city.as_deref(),
        )
    }
}

impl From<&NewRecipient> for TemplateVars {
    fn from(recipient: &NewRecipient) -> Self {
        Self::for_recipient(
            &recipient.email,
            recipient.name.as_deref(),
            recipient.company.as_deref(),
            recipient.city.as_deref(),
        )
    }
}

/// Template renderer for personalizing email content
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    unsubscribe: UnsubscribeSigner,
}

impl TemplateRenderer {
    pub fn new(unsubscribe: UnsubscribeSigner) -> Self {
        Self { unsubscribe }
    }

    /// Substitute placeholders in a single pass
    pub fn render(&self, template: &str, vars: &TemplateVars) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| match vars.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Recipient variables plus `sender_name` and `unsubscribe_url`
    pub fn vars_for(
        &self,
        recipient: impl Into<TemplateVars>,
        user_id: UserId,
        campaign_id: Option<CampaignId>,
        sender_name: &str,
    ) -> TemplateVars {
        let vars = recipient.into();
        let unsubscribe_url =
            self.unsubscribe
                .url(vars.get("email").unwrap_or(""), user_id, campaign_id);
        vars.with("sender_name", sender_name)
            .with("unsubscribe_url", unsubscribe_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn signer() -> UnsubscribeSigner {
        UnsubscribeSigner::new("https://mail.example.com/", b"secret")
    }

    fn renderer() -> TemplateRenderer {
        TemplateRenderer::new(signer())
    }

    fn vars() -> TemplateVars {
        TemplateVars::for_recipient(
            "jane@example.com",
            Some("Jane Doe"),
            Some("Acme"),
            None,
        )
    }

    #[test]
    fn test_render_known_tokens() {
        let out = renderer().render(
            "Hi {{first_name}} ({{ name }}) from {{company}}, {{city}}!",
            &vars(),
        );
        assert_eq!(out, "Hi Jane (Jane Doe) from Acme, !");
    }

    #[test]
    fn test_unknown_tokens_stay_verbatim() {
        let out = renderer().render("Code {{ coupon }} for {{email}}", &vars());
        assert_eq!(out, "Code {{ coupon }} for jane@example.com");
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let vars = TemplateVars::for_recipient("x@example.com", Some("{{email}}"), None, None);
        let out = renderer().render("Hello {{name}}", &vars);
        assert_eq!(out, "Hello {{email}}");
    }

    #[test]
    fn test_rerender_is_idempotent() {
        let renderer = renderer();
        let once = renderer.render("Dear {{name}}, welcome to {{company}}.", &vars());
        let twice = renderer.render(&once, &vars());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unsubscribe_url() {
        let renderer = renderer();
        let user_id = uuid::Uuid::now_v7();
        let campaign_id = uuid::Uuid::now_v7();
        let vars = renderer.vars_for(vars(), user_id, Some(campaign_id), "News");

        let url = vars.get("unsubscribe_url").unwrap();
        let token = url
            .strip_prefix("https://mail.example.com/unsubscribe/")
            .unwrap();
        let parsed = signer().verify(token).unwrap();
        assert_eq!(parsed.email, "jane@example.com");
        assert_eq!(parsed.user_id, user_id);
        assert_eq!(parsed.campaign_id, Some(campaign_id));
        assert_eq!(vars.get("sender_name"), Some("News"));
    }
}
