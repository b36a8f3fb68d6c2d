//! Builds the agent command line for each turn.

use std::collections::BTreeMap;

use gym::io::session::{CommandDescriptor, CommandProvider, TurnRequest};

use crate::case::AgentSettings;

/// Launches the `claude` CLI (or a stand-in) from case settings.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    settings: AgentSettings,
    env: BTreeMap<String, String>,
}

impl AgentCommand {
    pub fn new(settings: AgentSettings, env: BTreeMap<String, String>) -> Self {
        Self { settings, env }
    }

    fn print_args(&self, request: &TurnRequest) -> Vec<String> {
        let s = &self.settings;
        let mut args = self.stream_args(request);
        args.extend(["--max-turns".to_string(), s.max_turns.to_string()]);
        if let Some(mode) = &s.permission_mode {
            args.extend(["--permission-mode".to_string(), mode.clone()]);
        }
        args.push("--include-partial-messages".to_string());
        if let Some(session) = &request.resume_session {
            args.extend(["--resume".to_string(), session.clone()]);
        }
        self.push_shared(&mut args, request);
        args
    }

    /// Interactive sessions keep the stream-json protocol on stdout while the
    /// terminal carries stdin and stderr. The user drives permissions and turn
    /// count, so neither is capped here.
    fn interactive_args(&self, request: &TurnRequest) -> Vec<String> {
        let mut args = self.stream_args(request);
        if let Some(session) = &request.resume_session {
            args.extend(["--resume".to_string(), session.clone()]);
        }
        self.push_shared(&mut args, request);
        args
    }

    fn stream_args(&self, request: &TurnRequest) -> Vec<String> {
        let mut args = self.settings.extra_args.clone();
        args.extend([
            "-p".to_string(),
            request.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ]);
        args
    }

    fn push_shared(&self, args: &mut Vec<String>, request: &TurnRequest) {
        let s = &self.settings;
        if let Some(model) = &s.model {
            args.extend(["--model".to_string(), model.clone()]);
        }
        if let Some(budget) = s.max_budget_usd {
            args.extend(["--max-budget-usd".to_string(), budget.to_string()]);
        }
        if let Some(system) = &request.system_prompt {
            args.extend(["--system-prompt".to_string(), system.clone()]);
        }
        if !s.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.extend(s.allowed_tools.iter().cloned());
        }
    }
}

impl CommandProvider for AgentCommand {
    fn command(&self, request: &TurnRequest) -> CommandDescriptor {
        let args = match &self.settings.args {
            Some(template) => template
                .iter()
                .map(|arg| substitute(arg, request))
                .collect(),
            None if request.interactive => self.interactive_args(request),
            None => self.print_args(request),
        };
        CommandDescriptor {
            program: self.settings.program.clone(),
            args,
            env: self.env.clone(),
            env_remove: self.settings.env_remove.clone(),
            stdin: None,
        }
    }
}

fn substitute(arg: &str, request: &TurnRequest) -> String {
    arg.replace("{prompt}", &request.prompt)
        .replace("{resume}", request.resume_session.as_deref().unwrap_or(""))
        .replace(
            "{system_prompt}",
            request.system_prompt.as_deref().unwrap_or(""),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TurnRequest {
        TurnRequest::new("fix the bug", "/tmp/project")
    }

    fn args(settings: AgentSettings, request: &TurnRequest) -> Vec<String> {
        AgentCommand::new(settings, BTreeMap::new())
            .command(request)
            .args
    }

    #[test]
    fn print_mode_streams_json_with_turn_cap() {
        let descriptor = AgentCommand::new(AgentSettings::default(), BTreeMap::new())
            .command(&request());
        assert_eq!(descriptor.program, "claude");
        assert_eq!(
            descriptor.args,
            vec![
                "-p",
                "fix the bug",
                "--output-format",
                "stream-json",
                "--verbose",
                "--max-turns",
                "10",
                "--permission-mode",
                "bypassPermissions",
                "--include-partial-messages",
            ]
        );
        assert!(descriptor.env_remove.contains(&"CLAUDECODE".to_string()));
    }

    #[test]
    fn resume_model_budget_system_prompt_and_tools_are_passed() {
        let settings = AgentSettings {
            model: Some("sonnet".to_string()),
            max_budget_usd: Some(0.5),
            permission_mode: None,
            allowed_tools: vec!["Read".to_string(), "Edit".to_string()],
            ..AgentSettings::default()
        };
        let request = TurnRequest {
            resume_session: Some("sess-1".to_string()),
            system_prompt: Some("be brief".to_string()),
            ..request()
        };
        let args = args(settings, &request);
        let tail: Vec<&str> = args[8..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "--resume",
                "sess-1",
                "--model",
                "sonnet",
                "--max-budget-usd",
                "0.5",
                "--system-prompt",
                "be brief",
                "--allowedTools",
                "Read",
                "Edit",
            ]
        );
    }

    #[test]
    fn interactive_mode_streams_json_without_caps() {
        let request = TurnRequest {
            interactive: true,
            resume_session: Some("sess-9".to_string()),
            ..request()
        };
        let args = args(AgentSettings::default(), &request);
        assert_eq!(
            args,
            vec![
                "-p",
                "fix the bug",
                "--output-format",
                "stream-json",
                "--verbose",
                "--resume",
                "sess-9",
            ]
        );
    }

    #[test]
    fn args_override_substitutes_placeholders() {
        let settings = AgentSettings {
            program: "sh".to_string(),
            args: Some(vec![
                "agent.sh".to_string(),
                "{prompt}".to_string(),
                "--session={resume}".to_string(),
            ]),
            ..AgentSettings::default()
        };
        let request = TurnRequest {
            resume_session: Some("abc".to_string()),
            ..request()
        };
        assert_eq!(
            args(settings, &request),
            vec!["agent.sh", "fix the bug", "--session=abc"]
        );
    }
}
