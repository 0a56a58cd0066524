//! Pattern matchers for markup Claude Code embeds in message text.
//!
//! Each matcher is independent of the JSON layer. When text does not have
//! the expected shape the matcher returns `None` and the caller keeps the
//! text as written.

use crate::types::CommandInfo;

/// Inner text of the first `<tag>…</tag>` pair.
pub(crate) fn extract_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(&text[start..end])
}

/// Remove the first `<tag>…</tag>` pair (tags included).
fn strip_tag(text: &str, tag: &str) -> String {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    match (text.find(&open), text.find(&close)) {
        (Some(start), Some(end)) if end >= start => {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..start]);
            out.push_str(&text[end + close.len()..]);
            out
        }
        _ => text.to_string(),
    }
}

/// User text that is tool or harness chatter rather than something typed.
pub(crate) fn is_internal_markup(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with("<system-reminder>")
        || trimmed.starts_with("<local-command")
        || is_bracketed_status(trimmed)
}

/// A lone status such as `[Interrupted]` or `[Request interrupted by user]`.
fn is_bracketed_status(trimmed: &str) -> bool {
    trimmed.len() > 2
        && trimmed.starts_with('[')
        && trimmed.ends_with(']')
        && !trimmed.contains('\n')
        && !trimmed[1..].contains('[')
}

/// `<command-name>/x</command-name><command-args>y</command-args>`
pub(crate) fn parse_command(text: &str) -> Option<CommandInfo> {
    let name = extract_tag(text, "command-name")?.trim();
    if name.is_empty() {
        return None;
    }
    let args = extract_tag(text, "command-args").unwrap_or("").trim();
    Some(CommandInfo {
        name: name.to_string(),
        args: args.to_string(),
    })
}

/// Shell passthrough recorded as `<bash-input>`/`<bash-stdout>`/`<bash-stderr>`.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct BashEnvelope {
    pub input: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl BashEnvelope {
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.stdout.is_none() && self.stderr.is_none()
    }
}

pub(crate) fn parse_bash(text: &str) -> BashEnvelope {
    BashEnvelope {
        input: extract_tag(text, "bash-input").map(str::to_string),
        stdout: extract_tag(text, "bash-stdout").map(str::to_string),
        stderr: extract_tag(text, "bash-stderr").map(str::to_string),
    }
}

/// `<ide_opened_file>The user opened the file <path> in the IDE…</ide_opened_file>`
///
/// Returns the path and the message text with the envelope removed.
pub(crate) fn parse_ide_opened_file(text: &str) -> Option<(String, String)> {
    const PREFIX: &str = "The user opened the file ";
    const SUFFIX: &str = " in the IDE";

    let inner = extract_tag(text, "ide_opened_file")?.trim();
    let rest = inner.strip_prefix(PREFIX)?;
    let end = rest.find(SUFFIX)?;
    let path = rest[..end].trim();
    if path.is_empty() {
        return None;
    }
    let remaining = strip_tag(text, "ide_opened_file").trim().to_string();
    Some((path.to_string(), remaining))
}

/// The `agentId: <id>` line a background Task writes into its result.
pub(crate) fn extract_agent_id(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("agentId:")?.trim_start();
        let id: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        (!id.is_empty()).then_some(id)
    })
}

/// User text broken out into the structured fields a user turn carries.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct UserText {
    pub text: String,
    pub command: Option<CommandInfo>,
    pub bash: BashEnvelope,
    pub ide_opened_file: Option<String>,
}

/// Unwrap every recognized envelope in a user message.
pub(crate) fn unwrap_user_text(raw: &str) -> UserText {
    if let Some(command) = parse_command(raw) {
        return UserText {
            text: command.args.clone(),
            command: Some(command),
            ..Default::default()
        };
    }

    let bash = parse_bash(raw);
    if !bash.is_empty() {
        return UserText {
            bash,
            ..Default::default()
        };
    }

    if let Some((path, remaining)) = parse_ide_opened_file(raw) {
        return UserText {
            text: remaining,
            ide_opened_file: Some(path),
            ..Default::default()
        };
    }

    UserText {
        text: raw.to_string(),
        ..Default::default()
    }
}

/// Single-line rendition of a user message for session listings.
pub(crate) fn listing_message(raw: &str) -> String {
    let unwrapped = unwrap_user_text(raw);
    if let Some(command) = unwrapped.command {
        return format!("{} {}", command.name, command.args).trim().to_string();
    }
    if let Some(input) = unwrapped.bash.input {
        return format!("! {}", input.trim());
    }
    unwrapped.text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_markup() {
        assert!(is_internal_markup("<system-reminder>be nice</system-reminder>"));
        assert!(is_internal_markup("<local-command-stdout>ok</local-command-stdout>"));
        assert!(is_internal_markup("[Interrupted]"));
        assert!(is_internal_markup("  [Request interrupted by user]  "));
        assert!(!is_internal_markup("[link](http://x) fix this"));
        assert!(!is_internal_markup("please fix [the] bug"));
        assert!(!is_internal_markup("[]"));
    }

    #[test]
    fn test_parse_command() {
        let text = "<command-message>commit is running…</command-message>\n<command-name>/commit</command-name>\n<command-args>fix typo</command-args>";
        let cmd = parse_command(text).unwrap();
        assert_eq!(cmd.name, "/commit");
        assert_eq!(cmd.args, "fix typo");

        let unwrapped = unwrap_user_text(text);
        assert_eq!(unwrapped.text, "fix typo");
        assert_eq!(unwrapped.command, Some(cmd));
    }

    #[test]
    fn test_command_without_args() {
        let cmd = parse_command("<command-name>/clear</command-name>").unwrap();
        assert_eq!(cmd.args, "");
        assert_eq!(listing_message("<command-name>/clear</command-name>"), "/clear");
    }

    #[test]
    fn test_parse_bash() {
        let bash = parse_bash("<bash-stdout>hi\n</bash-stdout><bash-stderr></bash-stderr>");
        assert_eq!(bash.input, None);
        assert_eq!(bash.stdout.as_deref(), Some("hi\n"));
        assert_eq!(bash.stderr.as_deref(), Some(""));
        assert_eq!(listing_message("<bash-input>ls</bash-input>"), "! ls");
    }

    #[test]
    fn test_ide_opened_file_matches_sentence() {
        let text = "<ide_opened_file>The user opened the file /src/main.rs in the IDE. This may or may not be related to the current task.</ide_opened_file>\nwhy does this panic?";
        let (path, rest) = parse_ide_opened_file(text).unwrap();
        assert_eq!(path, "/src/main.rs");
        assert_eq!(rest, "why does this panic?");
    }

    #[test]
    fn test_ide_opened_file_unexpected_shape_stays_literal() {
        let text = "<ide_opened_file>Something else entirely</ide_opened_file> hi";
        assert!(parse_ide_opened_file(text).is_none());
        let unwrapped = unwrap_user_text(text);
        assert_eq!(unwrapped.text, text);
        assert!(unwrapped.ide_opened_file.is_none());
    }

    #[test]
    fn test_extract_agent_id() {
        let text = "Async agent launched successfully.\nagentId: a4767a09 (use this to check status)\nmore";
        assert_eq!(extract_agent_id(text).as_deref(), Some("a4767a09"));
        assert_eq!(extract_agent_id("no marker here"), None);
        assert_eq!(extract_agent_id("agentId:   "), None);
    }
}
