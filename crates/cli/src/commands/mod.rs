pub mod chat;
pub mod config;
pub mod doctor;
pub mod migrate;

use serde::Serialize;

/// Exit code plus the text printed to stdout.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Ok,
    Error,
}

/// The single JSON line emitted by `migrate` and `chat`.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    command: &'a str,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_class: Option<&'a str>,
    message: String,
}

impl CommandResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self { exit_code: 0, output: output.into() }
    }

    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let envelope =
            Envelope { command, status: Status::Ok, error_class: None, message: message.into() };
        Self { exit_code: 0, output: to_json_line(&envelope) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let envelope = Envelope {
            command,
            status: Status::Error,
            error_class: Some(error_class),
            message: message.into(),
        };
        Self { exit_code, output: to_json_line(&envelope) }
    }
}

fn to_json_line(envelope: &Envelope<'_>) -> String {
    serde_json::to_string(envelope).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"{}\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            envelope.command,
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
