//! Slash commands for interactive mode

/// Starter questions offered before the first message.
pub const SUGGESTED_PROMPTS: [&str; 3] = [
    "Analyze key clauses in this document.",
    "Identify potential risks in this document.",
    "Spot non-standard terms in this document.",
];

/// Result of executing a slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the server)
    Message(String),
    /// Print the extracted corpus
    ShowCorpus,
    /// Send this text as if the user had typed it
    Send(String),
    /// Close the current session; the next message starts a new one
    NewSession,
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Suggested prompts not used yet. A prompt is gone once it has been sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestedPrompts {
    remaining: Vec<&'static str>,
}

impl SuggestedPrompts {
    pub fn new() -> Self {
        Self {
            remaining: SUGGESTED_PROMPTS.to_vec(),
        }
    }

    pub fn remaining(&self) -> &[&'static str] {
        &self.remaining
    }

    /// Remove and return the prompt at 1-based position `n` of the remaining list.
    pub fn take(&mut self, n: usize) -> Option<&'static str> {
        if n == 0 || n > self.remaining.len() {
            return None;
        }
        Some(self.remaining.remove(n - 1))
    }
}

impl Default for SuggestedPrompts {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse and execute a slash command
///
/// `reply_pending` is true while the user is waiting for the server to start replying;
/// suggested prompts are not offered then.
pub fn execute_command(
    input: &str,
    prompts: &mut SuggestedPrompts,
    reply_pending: bool,
) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let (command, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let command = command.to_lowercase();
    let args = args.trim();

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "corpus" | "c" => CommandResult::ShowCorpus,

        "prompts" | "p" => prompt_command(args, prompts, reply_pending),

        "new" | "n" => CommandResult::NewSession,

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn prompt_command(
    args: &str,
    prompts: &mut SuggestedPrompts,
    reply_pending: bool,
) -> CommandResult {
    if reply_pending {
        return CommandResult::Message(
            "Suggested prompts are available once the reply starts.".to_string(),
        );
    }
    if prompts.remaining().is_empty() {
        return CommandResult::Message("No suggested prompts left.".to_string());
    }
    if args.is_empty() {
        return CommandResult::Message(prompts_message(prompts));
    }

    let count = prompts.remaining().len();
    match args.parse::<usize>().ok().and_then(|n| prompts.take(n)) {
        Some(prompt) => CommandResult::Send(prompt.to_string()),
        None => CommandResult::Message(format!(
            "No suggested prompt '{}'. Choose 1-{}.",
            args, count
        )),
    }
}

/// Numbered list of the remaining suggested prompts
pub fn prompts_message(prompts: &SuggestedPrompts) -> String {
    let mut out = String::from("Suggested prompts (send one with /prompts <n>):");
    for (i, prompt) in prompts.remaining().iter().enumerate() {
        out.push_str(&format!("\n  {}. {}", i + 1, prompt));
    }
    out
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?          Show this help message
  /corpus, /c            Print the text extracted from your documents
  /prompts, /p [n]       List suggested prompts, or send prompt n
  /new, /n               Close this session; your next message starts a new one
  /quit, /exit, /q       Exit nal

Anything else you type is sent to the server. Only one message can be
waiting for a reply at a time."#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str) -> Option<CommandResult> {
        execute_command(input, &mut SuggestedPrompts::new(), false)
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(run("What does clause 4 mean?"), None);
    }

    #[test]
    fn test_aliases() {
        assert_eq!(run("/q"), Some(CommandResult::Exit));
        assert_eq!(run(" /EXIT "), Some(CommandResult::Exit));
        assert_eq!(run("/new"), Some(CommandResult::NewSession));
        assert_eq!(run("/corpus"), Some(CommandResult::ShowCorpus));
        assert!(matches!(run("/?"), Some(CommandResult::Message(_))));
    }

    #[test]
    fn test_prompts_listing_and_selection() {
        let Some(CommandResult::Message(list)) = run("/prompts") else {
            panic!("expected a listing");
        };
        assert!(list.contains("2. Identify potential risks in this document."));

        assert_eq!(
            run("/prompts 3"),
            Some(CommandResult::Send("Spot non-standard terms in this document.".into()))
        );
        assert!(matches!(
            run("/p 4"),
            Some(CommandResult::Message(m)) if m.contains("1-3")
        ));
    }

    #[test]
    fn test_used_prompt_is_removed() {
        let mut prompts = SuggestedPrompts::new();
        assert_eq!(
            execute_command("/prompts 1", &mut prompts, false),
            Some(CommandResult::Send("Analyze key clauses in this document.".into()))
        );
        assert_eq!(prompts.remaining().len(), 2);

        let Some(CommandResult::Message(list)) = execute_command("/prompts", &mut prompts, false)
        else {
            panic!("expected a listing");
        };
        assert!(!list.contains("Analyze key clauses"));
        assert!(list.contains("1. Identify potential risks in this document."));

        // Positions follow the remaining list.
        assert_eq!(
            execute_command("/prompts 1", &mut prompts, false),
            Some(CommandResult::Send("Identify potential risks in this document.".into()))
        );
        execute_command("/prompts 1", &mut prompts, false);
        assert_eq!(
            execute_command("/prompts", &mut prompts, false),
            Some(CommandResult::Message("No suggested prompts left.".into()))
        );
    }

    #[test]
    fn test_prompts_hidden_while_reply_pending() {
        let mut prompts = SuggestedPrompts::new();
        let result = execute_command("/prompts 2", &mut prompts, true);
        assert!(matches!(result, Some(CommandResult::Message(_))));
        assert_eq!(prompts.remaining().len(), 3);
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(run("/upload x.pdf"), Some(CommandResult::Unknown("upload".into())));
    }
}
