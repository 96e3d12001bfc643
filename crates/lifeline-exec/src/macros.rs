//! Placeholder substitution for command templates.

use lifeline_core::{MacroFields, hostname};

const HOSTNAME_MACRO: &str = "HOSTNAME_MACRO";
const REGION_MACRO: &str = "REGION_MACRO";

/// Fills `TRIGGER_<FIELD>_MACRO`, `HOSTNAME_MACRO` and `REGION_MACRO`,
/// in that order.
#[derive(Debug, Clone)]
pub struct MacroRenderer {
    hostname: String,
    region: String,
}

impl MacroRenderer {
    pub fn new(hostname: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            region: region.into(),
        }
    }

    /// Renderer bound to the local hostname.
    pub fn for_host(region: impl Into<String>) -> Self {
        Self::new(hostname(), region)
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn render(&self, template: &str) -> String {
        template
            .replace(HOSTNAME_MACRO, &self.hostname)
            .replace(REGION_MACRO, &self.region)
    }

    pub fn render_with(&self, template: &str, trigger: &dyn MacroFields) -> String {
        let mut out = template.to_string();
        for (field, value) in trigger.macro_fields() {
            if field.is_empty() {
                continue;
            }
            let placeholder = format!("TRIGGER_{}_MACRO", field.to_uppercase());
            out = out.replace(&placeholder, &value);
        }
        self.render(&out)
    }

    pub fn render_opt(&self, template: &str, trigger: Option<&dyn MacroFields>) -> String {
        match trigger {
            Some(trigger) => self.render_with(template, trigger),
            None => self.render(template),
        }
    }
}
