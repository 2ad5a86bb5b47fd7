//! Gathers a [`ProvisioningConfig`] from the operator.
//!
//! Every field is described by a prompt, a validator and an optional
//! default. In [`Mode::Easy`] defaults are taken without asking; in
//! [`Mode::Advanced`] the operator confirms or overrides each one. Fields
//! without a default are always prompted and re-asked until valid.

use std::{collections::VecDeque, io, str::FromStr};

use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password, Select};
use tracing::debug;

use crate::{
    errors::{DeployError, Result},
    model::{
        default_backlog, default_concurrency, default_workers, Credentials, ProvisioningConfig,
        Runtime, RuntimeKnobs, Secret,
    },
    validate::{self, Validation},
};

const NODE_DEFAULT_PORT: &str = "3000";
const FASTAPI_DEFAULT_PORT: &str = "8000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Accept every default
    Easy,
    /// Review every setting
    Advanced,
}

pub trait Prompter {
    fn select(&mut self, prompt: &str, items: &[&str], default: usize) -> Result<usize>;

    /// Free text, re-asked until `check` accepts it.
    fn input(&mut self, prompt: &str, check: &dyn Fn(&str) -> Validation) -> Result<String>;

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool>;

    /// Hidden input.
    fn password(&mut self, prompt: &str) -> Result<Secret>;
}

pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Prompter for TerminalPrompter {
    fn select(&mut self, prompt: &str, items: &[&str], default: usize) -> Result<usize> {
        Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .default(default)
            .interact()
            .map_err(DeployError::Prompt)
    }

    fn input(&mut self, prompt: &str, check: &dyn Fn(&str) -> Validation) -> Result<String> {
        Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .validate_with(|value: &String| check(value.trim()))
            .interact_text()
            .map(|value| value.trim().to_string())
            .map_err(DeployError::Prompt)
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(DeployError::Prompt)
    }

    fn password(&mut self, prompt: &str) -> Result<Secret> {
        Password::with_theme(&self.theme)
            .with_prompt(prompt)
            .interact()
            .map(Secret::new)
            .map_err(DeployError::Prompt)
    }
}

/// Answers queued up front. Invalid text answers are skipped the way a
/// terminal re-prompt would discard them.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    pub asked: Vec<String>,
    pub rejected: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next(&mut self, prompt: &str) -> Result<String> {
        self.asked.push(prompt.to_string());
        self.answers.pop_front().ok_or_else(|| {
            DeployError::Prompt(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("no scripted answer for `{prompt}`"),
            ))
        })
    }
}

impl Prompter for ScriptedPrompter {
    /// Accepts an index or a case-insensitive label prefix.
    fn select(&mut self, prompt: &str, items: &[&str], default: usize) -> Result<usize> {
        let answer = self.next(prompt)?;
        if answer.is_empty() {
            return Ok(default);
        }
        if let Ok(index) = answer.parse::<usize>() {
            if index < items.len() {
                return Ok(index);
            }
        }
        let wanted = answer.to_lowercase();
        items
            .iter()
            .position(|item| item.to_lowercase().starts_with(&wanted))
            .ok_or_else(|| DeployError::validation(prompt, format!("`{answer}` is not an option")))
    }

    fn input(&mut self, prompt: &str, check: &dyn Fn(&str) -> Validation) -> Result<String> {
        loop {
            let answer = self.next(prompt)?;
            match check(&answer) {
                Ok(()) => return Ok(answer),
                Err(reason) => self.rejected.push(reason),
            }
        }
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool> {
        let answer = self.next(prompt)?;
        Ok(match answer.to_lowercase().as_str() {
            "y" | "yes" => true,
            "n" | "no" => false,
            _ => default,
        })
    }

    fn password(&mut self, prompt: &str) -> Result<Secret> {
        self.next(prompt).map(Secret::new)
    }
}

type Check = Box<dyn Fn(&str) -> Validation>;

struct Field {
    prompt: &'static str,
    check: Check,
    default: Option<String>,
}

impl Field {
    fn required(prompt: &'static str, check: impl Fn(&str) -> Validation + 'static) -> Self {
        Self {
            prompt,
            check: Box::new(check),
            default: None,
        }
    }

    fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Turns "My Shop API" into `my-shop-api` when the result is a usable code name.
pub fn suggest_code_name(display_name: &str) -> Option<String> {
    let mut slug = String::new();
    for c in display_name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if matches!(c, ' ' | '-' | '_' | '.') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_matches('-').chars().take(32).collect();
    let slug = slug.trim_end_matches('-').to_string();
    validate::code_name(&slug).ok().map(|()| slug)
}

fn parse<T: FromStr>(field: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| DeployError::validation(field, format!("`{value}` is out of range")))
}

pub struct Collector<'p> {
    prompter: &'p mut dyn Prompter,
    mode: Mode,
}

impl<'p> Collector<'p> {
    /// Asks for the mode first unless one was given on the command line.
    pub fn new(prompter: &'p mut dyn Prompter, mode: Option<Mode>) -> Result<Self> {
        let mode = match mode {
            Some(mode) => mode,
            None => {
                let picked = prompter.select(
                    "Installation mode",
                    &["Easy (accept defaults)", "Advanced (review every setting)"],
                    0,
                )?;
                if picked == 0 {
                    Mode::Easy
                } else {
                    Mode::Advanced
                }
            }
        };
        debug!(?mode, "collecting configuration");
        Ok(Self { prompter, mode })
    }

    fn ask(&mut self, field: Field) -> Result<String> {
        if let Some(default) = &field.default {
            match self.mode {
                Mode::Easy => return Ok(default.clone()),
                Mode::Advanced => {
                    let question = format!("{}: keep `{default}`?", field.prompt);
                    if self.prompter.confirm(&question, true)? {
                        return Ok(default.clone());
                    }
                }
            }
        }
        self.prompter.input(field.prompt, &*field.check)
    }

    pub fn collect(mut self) -> Result<ProvisioningConfig> {
        let runtime = match self.prompter.select("Runtime", &["Node.js", "FastAPI"], 0)? {
            0 => Runtime::Node,
            _ => Runtime::Fastapi,
        };

        let display_name = self.ask(Field::required("Application name", validate::display_name))?;
        let mut code = Field::required("Code name (user, directory and unit name)", validate::code_name);
        if let Some(suggested) = suggest_code_name(&display_name) {
            code = code.with_default(suggested);
        }
        let code_name = self.ask(code)?;
        let repository = self.ask(Field::required("Git repository URL", validate::repository_url))?;

        let credentials = if self.prompter.confirm("Is the repository private?", false)? {
            let username = self.ask(Field::required("Git username", validate::non_empty))?;
            let token = self.prompter.password("Access token")?;
            Some(Credentials { username, token })
        } else {
            None
        };

        let domain = self.ask(Field::required("Domain", validate::domain))?;
        let default_port = match runtime {
            Runtime::Node => NODE_DEFAULT_PORT,
            Runtime::Fastapi => FASTAPI_DEFAULT_PORT,
        };
        let port = self.ask(Field::required("Port", validate::port).with_default(default_port))?;
        let workers = self.ask(
            Field::required("Workers", validate::positive_integer)
                .with_default(default_workers().to_string()),
        )?;
        let concurrency = self.ask(
            Field::required("Concurrency limit", validate::positive_integer)
                .with_default(default_concurrency().to_string()),
        )?;
        let backlog = self.ask(
            Field::required("Socket backlog", validate::positive_integer)
                .with_default(default_backlog().to_string()),
        )?;
        let nice = self.ask(Field::required("Nice value", validate::nice).with_default("0"))?;
        let cpu_quota = self.ask(Field::required("CPU quota", validate::percentage).with_default("80%"))?;
        let memory_max = self.ask(Field::required("Memory limit", validate::size).with_default("1G"))?;

        let defaults = RuntimeKnobs::default();
        let gzip_level = self.ask(
            Field::required("Gzip compression level", validate::gzip_level)
                .with_default(defaults.gzip_level.to_string()),
        )?;
        let keepalive_timeout = self.ask(
            Field::required("Keepalive timeout (seconds)", validate::positive_integer)
                .with_default(defaults.keepalive_timeout.to_string()),
        )?;
        let client_max_body_size = self.ask(
            Field::required("Max request body size", validate::size)
                .with_default(defaults.client_max_body_size.as_str()),
        )?;
        let mut knobs = RuntimeKnobs {
            gzip_level: parse("gzip level", &gzip_level)?,
            keepalive_timeout: parse("keepalive timeout", &keepalive_timeout)?,
            client_max_body_size: client_max_body_size.try_into()?,
            ..defaults
        };
        match runtime {
            Runtime::Node => {
                knobs.node_version = self.ask(
                    Field::required("Node version", validate::node_version)
                        .with_default(knobs.node_version.clone()),
                )?;
                knobs.entry_point = self.ask(
                    Field::required("Entry point", validate::project_path)
                        .with_default(knobs.entry_point.clone()),
                )?;
            }
            Runtime::Fastapi => {
                knobs.app_module = self.ask(
                    Field::required("ASGI app (module:attribute)", validate::app_module)
                        .with_default(knobs.app_module.clone()),
                )?;
            }
        }

        let config = ProvisioningConfig {
            display_name,
            code_name: code_name.try_into()?,
            repository: repository.try_into()?,
            credentials,
            domain: domain.try_into()?,
            runtime,
            port: parse("port", &port)?,
            workers: parse("workers", &workers)?,
            concurrency: parse("concurrency", &concurrency)?,
            backlog: parse("backlog", &backlog)?,
            nice: parse("nice value", &nice)?,
            cpu_quota: cpu_quota.try_into()?,
            memory_max: memory_max.try_into()?,
            knobs,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn easy_mode_only_asks_for_fields_without_defaults() {
        let mut prompter = ScriptedPrompter::new([
            "node",
            "Demo App",
            "https://github.com/acme/demo.git",
            "n",
            "demo.example.com",
        ]);

        let config = Collector::new(&mut prompter, Some(Mode::Easy))
            .and_then(Collector::collect)
            .expect("collects");

        assert_eq!(config.code_name.as_str(), "demo-app");
        assert_eq!(config.port, 3000);
        assert_eq!(config.cpu_quota.as_str(), "80%");
        assert!(config.credentials.is_none());
        assert_eq!(prompter.remaining(), 0);
    }

    #[test]
    fn advanced_mode_reprompts_until_valid() {
        let mut prompter = ScriptedPrompter::new([
            "advanced",
            "fastapi",
            "Demo",
            "n",
            "demoapp",
            "https://github.com/acme/demo.git",
            "y",
            "octo",
            "ghp_token",
            "demo.example.com",
            "n",
            "80",
            "70000",
            "8080",
            "y",
            "y",
            "y",
            "n",
            "-30",
            "-3",
            "n",
            "150%",
            "50%",
            "y",
            "y",
            "y",
            "y",
            "y",
        ]);

        let config = Collector::new(&mut prompter, None)
            .and_then(Collector::collect)
            .expect("collects");

        assert_eq!(config.runtime, Runtime::Fastapi);
        assert_eq!(config.code_name.as_str(), "demoapp");
        assert_eq!(config.port, 8080);
        assert_eq!(config.nice, -3);
        assert_eq!(config.cpu_quota.as_str(), "50%");
        assert_eq!(config.knobs.app_module, "main:app");
        assert_eq!(prompter.rejected.len(), 4);
        let creds = config.credentials.expect("private repository");
        assert_eq!(creds.username, "octo");
        assert_eq!(creds.token.expose(), "ghp_token");
    }

    #[test]
    fn code_name_suggestions_are_valid_or_absent() {
        assert_eq!(suggest_code_name("My Shop API").as_deref(), Some("my-shop-api"));
        assert_eq!(suggest_code_name("  spaced  out ").as_deref(), Some("spaced-out"));
        assert_eq!(suggest_code_name("42 things"), None);
        assert_eq!(suggest_code_name("!!!"), None);
    }
}
