use std::collections::HashMap;

use chrono::Utc;
use rand::Rng;

use outflow_channels::types::ChannelSettings;
use outflow_contacts::{Contact, Lead, Prospect};
use outflow_core::RenderedMessage;

use crate::error::{CampaignError, Result};
use crate::types::Template;

/// The fixed variable table. Anything else renders to empty by contract —
/// unknown variables are not an error and never leak `{{…}}` into a message.
///
/// Recognised: `contact.name`, `contact.email`, `contact.phone`,
/// `contact.position`, `lead.company_name`, `lead.website`, `lead.industry`,
/// `current_date`, `unsubscribe_link`, and `sender.*` from the channel's
/// from-settings.
#[derive(Debug, Default)]
pub struct RenderContext {
    vars: HashMap<String, String>,
}

impl RenderContext {
    pub fn new() -> Self {
        let mut ctx = Self {
            vars: HashMap::new(),
        };
        ctx.set("current_date", Utc::now().format("%Y-%m-%d").to_string());
        ctx
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        self.vars.insert(key.to_string(), value.into());
    }

    fn set_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(v) = value {
            self.vars.insert(key.to_string(), v.to_string());
        }
    }

    pub fn with_contact(mut self, contact: &Contact) -> Self {
        self.set("contact.name", contact.name.clone());
        self.set_opt("contact.email", contact.email.as_deref());
        self.set_opt("contact.phone", contact.phone.as_deref());
        self.set_opt("contact.position", contact.position.as_deref());
        self
    }

    pub fn with_lead(mut self, lead: &Lead) -> Self {
        self.set("lead.company_name", lead.company_name.clone());
        self.set_opt("lead.website", lead.website.as_deref());
        self.set_opt("lead.industry", lead.industry.as_deref());
        self
    }

    /// Prospects fill the contact slots: campaign copy written for contacts
    /// renders sensibly for channel-native targets too.
    pub fn with_prospect(mut self, prospect: &Prospect) -> Self {
        self.set("contact.name", prospect.display_name.clone());
        self.set_opt("contact.phone", prospect.phone.as_deref());
        self
    }

    pub fn with_sender(mut self, settings: &ChannelSettings) -> Self {
        self.set_opt("sender.name", settings.from_name.as_deref());
        self.set_opt("sender.email", settings.from_email.as_deref());
        self.set_opt("sender.phone", settings.from_phone.as_deref());
        self
    }

    pub fn with_unsubscribe_link(mut self, settings: &ChannelSettings, recipient_id: &str) -> Self {
        if let Some(base) = &settings.unsubscribe_base_url {
            self.set(
                "unsubscribe_link",
                format!("{}/u/{recipient_id}", base.trim_end_matches('/')),
            );
        }
        self
    }

    fn lookup(&self, key: &str) -> &str {
        self.vars.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Render a template against a context. AI-backed templates pick one
/// variation uniformly at random; plain templates use subject/body directly.
pub fn render(template: &Template, ctx: &RenderContext) -> Result<RenderedMessage> {
    let (subject, body) = if template.use_ai {
        if template.variations.is_empty() {
            return Err(CampaignError::TemplateInvalid(format!(
                "template {} is AI-backed but has no variations",
                template.id
            )));
        }
        let pick = rand::thread_rng().gen_range(0..template.variations.len());
        let variation = &template.variations[pick];
        (variation.subject.as_deref(), variation.body.as_str())
    } else {
        (template.subject.as_deref(), template.body.as_str())
    };

    Ok(RenderedMessage {
        subject: subject.map(|s| substitute(s, ctx)),
        body: substitute(body, ctx),
    })
}

/// Linear scan for `{{ var }}` placeholders. Unterminated braces pass
/// through verbatim.
fn substitute(input: &str, ctx: &RenderContext) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let key = after[..close].trim();
                out.push_str(ctx.lookup(key));
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use outflow_core::ChannelKind;

    fn contact(name: &str, email: Option<&str>) -> Contact {
        Contact {
            id: "c-1".into(),
            tenant_id: "t-1".into(),
            lead_id: "l-1".into(),
            name: name.into(),
            email: email.map(String::from),
            phone: None,
            position: Some("CTO".into()),
            is_primary: true,
            unsubscribed: false,
            created_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    fn template(body: &str) -> Template {
        Template {
            id: "p-1".into(),
            tenant_id: "t-1".into(),
            channel_kind: ChannelKind::EmailSmtp,
            name: "test".into(),
            subject: Some("For {{contact.name}}".into()),
            body: body.into(),
            use_ai: false,
            variations: Vec::new(),
            created_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn substitutes_known_variables() {
        let ctx = RenderContext::new().with_contact(&contact("Ann", Some("ann@acme.io")));
        let msg = render(&template("Hello {{contact.name}} <{{contact.email}}>"), &ctx).unwrap();
        assert_eq!(msg.body, "Hello Ann <ann@acme.io>");
        assert_eq!(msg.subject.as_deref(), Some("For Ann"));
    }

    #[test]
    fn missing_variable_renders_empty_not_literal() {
        let ctx = RenderContext::new();
        let msg = render(&template("Hi {{contact.name}}, re {{lead.company_name}}!"), &ctx)
            .unwrap();
        assert_eq!(msg.body, "Hi , re !");
        assert!(!msg.body.contains("{{"));
    }

    #[test]
    fn unknown_variable_renders_empty() {
        let ctx = RenderContext::new();
        let msg = render(&template("x{{no.such.var}}y"), &ctx).unwrap();
        assert_eq!(msg.body, "xy");
    }

    #[test]
    fn unterminated_braces_pass_through() {
        let ctx = RenderContext::new();
        let msg = render(&template("broken {{contact.name"), &ctx).unwrap();
        assert_eq!(msg.body, "broken {{contact.name");
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        let ctx = RenderContext::new().with_contact(&contact("Ann", None));
        let msg = render(&template("Hi {{ contact.name }}"), &ctx).unwrap();
        assert_eq!(msg.body, "Hi Ann");
    }

    #[test]
    fn ai_template_picks_a_variation() {
        let mut t = template("ignored");
        t.use_ai = true;
        t.variations = vec![variation("Hey {{contact.name}}"), variation("Hello {{contact.name}}")];
        let ctx = RenderContext::new().with_contact(&contact("Ann", None));
        for _ in 0..20 {
            let msg = render(&t, &ctx).unwrap();
            assert!(msg.body == "Hey Ann" || msg.body == "Hello Ann");
        }
    }

    #[test]
    fn ai_template_without_variations_is_an_error() {
        let mut t = template("body");
        t.use_ai = true;
        assert!(matches!(
            render(&t, &RenderContext::new()),
            Err(CampaignError::TemplateInvalid(_))
        ));
    }

    #[test]
    fn unsubscribe_link_joins_cleanly() {
        let settings = ChannelSettings {
            unsubscribe_base_url: Some("https://x.example/".into()),
            ..Default::default()
        };
        let ctx = RenderContext::new().with_unsubscribe_link(&settings, "r-9");
        let msg = render(&template("{{unsubscribe_link}}"), &ctx).unwrap();
        assert_eq!(msg.body, "https://x.example/u/r-9");
    }

    fn variation(body: &str) -> crate::types::TemplateVariation {
        crate::types::TemplateVariation {
            subject: None,
            body: body.into(),
        }
    }
}
