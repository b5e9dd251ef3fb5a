//! Prompt templates.
//!
//! Templates are compiled once at startup with strict undefined handling, so a
//! typo in a variable name fails the first render instead of silently producing
//! an empty slot.

use minijinja::{context, AutoEscape, Environment, UndefinedBehavior};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("template '{name}' failed to compile: {source}")]
    Compile { name: &'static str, source: minijinja::Error },
    #[error("template '{name}' failed to render: {source}")]
    Render { name: &'static str, source: minijinja::Error },
}

const TRIAGE: &str = "triage";
const SUMMARY: &str = "summary";
const REPAIR: &str = "repair";

/// The three prompt templates of a run: classification, enrichment and repair.
pub struct PromptSet {
    env: Environment<'static>,
}

impl PromptSet {
    pub fn compile(triage: &str, summary: &str, repair: &str) -> Result<Self, PromptError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_keep_trailing_newline(true);
        for (name, source) in [(TRIAGE, triage), (SUMMARY, summary), (REPAIR, repair)] {
            env.add_template_owned(name, source.to_string())
                .map_err(|source| PromptError::Compile { name, source })?;
        }
        Ok(Self { env })
    }

    fn render(&self, name: &'static str, ctx: minijinja::Value) -> Result<String, PromptError> {
        self.env
            .get_template(name)
            .and_then(|t| t.render(ctx))
            .map_err(|source| PromptError::Render { name, source })
    }

    pub fn triage(&self, title: &str, abstract_text: &str) -> Result<String, PromptError> {
        self.render(TRIAGE, context! { TITLE => title, ABSTRACT => abstract_text })
    }

    pub fn summary(&self, input_json: &str) -> Result<String, PromptError> {
        self.render(SUMMARY, context! { INPUT_JSON => input_json })
    }

    pub fn repair(&self, schema_json: &str, bad_output: &str) -> Result<String, PromptError> {
        self.render(REPAIR, context! { SCHEMA_JSON => schema_json, BAD_OUTPUT => bad_output })
    }

    /// Render every template once with placeholder values.
    pub fn smoke_test(&self) -> Result<(), PromptError> {
        self.triage("t", "a")?;
        self.summary("{}")?;
        self.repair("{}", "")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompts() -> PromptSet {
        PromptSet::compile(
            "Title: {{TITLE}}\nAbstract: {{ ABSTRACT }}",
            "Paper:\n{{INPUT_JSON}}",
            "Schema: {{SCHEMA_JSON}}\nBad: {{BAD_OUTPUT}}",
        )
        .unwrap()
    }

    #[test]
    fn test_render_substitutes_variables_verbatim() {
        let p = prompts();
        assert_eq!(p.triage("EEG <model>", "a & b").unwrap(), "Title: EEG <model>\nAbstract: a & b");
        assert_eq!(p.summary(r#"{"x":"{{y}}"}"#).unwrap(), "Paper:\n{\"x\":\"{{y}}\"}");
        assert_eq!(p.repair("{}", "").unwrap(), "Schema: {}\nBad: ");
    }

    #[test]
    fn test_syntax_error_fails_compile() {
        let err = PromptSet::compile("{{ TITLE ", "x", "y").err().unwrap();
        assert!(matches!(err, PromptError::Compile { name: "triage", .. }));
    }

    #[test]
    fn test_unknown_variable_fails_smoke_test() {
        let p = PromptSet::compile("{{ TITEL }}", "{{INPUT_JSON}}", "{{BAD_OUTPUT}}").unwrap();
        assert!(matches!(p.smoke_test(), Err(PromptError::Render { name: "triage", .. })));
    }
}
