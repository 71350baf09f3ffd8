//! Text commands typed into chat or sent over RCON.

use log::info;
use protocol::opcodes::KickReason;
use protocol::packets::ChatMessage;

use crate::connection::ClientHandle;
use crate::context::ServerContext;

pub const COMMAND_PREFIX: char = '/';

const HELP: &[(&str, &str)] = &[
    ("/help", "list commands"),
    ("/ping", "show your ping"),
    ("/admin <password>", "log in as admin"),
    ("/players", "list connected drivers"),
    ("/kick <id>", "kick a driver (admin)"),
    ("/say <text>", "broadcast a server message (admin)"),
];

/// Who issued a command.
#[derive(Clone, Copy)]
pub enum Caller<'a> {
    Player(&'a ClientHandle),
    /// RCON and the UDP plugin; always an admin.
    Console,
}

impl Caller<'_> {
    pub fn is_admin(&self) -> bool {
        match self {
            Caller::Player(client) => client.is_admin(),
            Caller::Console => true,
        }
    }

    fn describe(&self) -> String {
        match self {
            Caller::Player(client) => format!("{} ({})", client.name, client.session_id),
            Caller::Console => "console".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Ping,
    Admin(String),
    Players,
    Kick(u8),
    Say(String),
}

impl Command {
    /// Parses one command line. The leading `/` is optional.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let line = line.strip_prefix(COMMAND_PREFIX).unwrap_or(line);
        let (name, args) = match line.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (line, ""),
        };

        match name.to_ascii_lowercase().as_str() {
            "help" => Ok(Command::Help),
            "ping" => Ok(Command::Ping),
            "admin" if !args.is_empty() => Ok(Command::Admin(args.to_string())),
            "admin" => Err("Usage: /admin <password>".to_string()),
            "players" => Ok(Command::Players),
            "kick" => args
                .parse()
                .map(Command::Kick)
                .map_err(|_| "Usage: /kick <id>".to_string()),
            "say" if !args.is_empty() => Ok(Command::Say(args.to_string())),
            "say" => Err("Usage: /say <text>".to_string()),
            "" => Err("Empty command, try /help".to_string()),
            other => Err(format!("Unknown command /{}, try /help", other)),
        }
    }

    pub fn requires_admin(&self) -> bool {
        matches!(self, Command::Kick(_) | Command::Say(_))
    }
}

/// Runs a command line and returns the reply lines for the caller.
pub async fn execute(ctx: &ServerContext, caller: Caller<'_>, line: &str) -> Vec<String> {
    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(message) => return vec![message],
    };
    if command.requires_admin() && !caller.is_admin() {
        return vec!["You are not an admin".to_string()];
    }

    match command {
        Command::Help => HELP
            .iter()
            .map(|(usage, what)| format!("{} - {}", usage, what))
            .collect(),
        Command::Ping => match caller {
            Caller::Player(client) => vec![format!(
                "Pong! {} ms, time offset {} ms",
                client.ping(),
                client.time_offset()
            )],
            Caller::Console => vec!["Pong!".to_string()],
        },
        Command::Admin(password) => match (caller, ctx.config.admin_password.as_deref()) {
            (Caller::Console, _) => vec!["Console is always admin".to_string()],
            (_, None) => vec!["No admin password is configured".to_string()],
            (Caller::Player(client), Some(expected)) if expected == password => {
                client.set_admin(true);
                info!("{} ({}) logged in as admin", client.name, client.session_id);
                vec!["You are now an admin".to_string()]
            }
            (Caller::Player(_), Some(_)) => vec!["Wrong admin password".to_string()],
        },
        Command::Players => {
            let clients = ctx.clients.read().await.all();
            if clients.is_empty() {
                return vec!["No players connected".to_string()];
            }
            clients
                .iter()
                .map(|client| {
                    format!(
                        "{}: {} ({} ms){}",
                        client.session_id,
                        client.name,
                        client.ping(),
                        if client.is_admin() { " admin" } else { "" }
                    )
                })
                .collect()
        }
        Command::Kick(session_id) => match ctx.kick(session_id, KickReason::Kicked).await {
            Some(name) => {
                info!("{} kicked {} ({})", caller.describe(), name, session_id);
                vec![format!("Kicked {}", name)]
            }
            None => vec![format!("No player with session id {}", session_id)],
        },
        Command::Say(text) => {
            ctx.broadcast(&ChatMessage::from_server(text.as_str()), None).await;
            vec![format!("Sent: {}", text)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_and_without_prefix() {
        assert_eq!(Command::parse("/help"), Ok(Command::Help));
        assert_eq!(Command::parse("players"), Ok(Command::Players));
        assert_eq!(Command::parse("  /PING "), Ok(Command::Ping));
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(Command::parse("/kick 4"), Ok(Command::Kick(4)));
        assert_eq!(
            Command::parse("/say hello   there"),
            Ok(Command::Say("hello   there".to_string()))
        );
        assert_eq!(
            Command::parse("/admin s3cret"),
            Ok(Command::Admin("s3cret".to_string()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(Command::parse("/kick").is_err());
        assert!(Command::parse("/kick 300").is_err());
        assert!(Command::parse("/say").is_err());
        assert!(Command::parse("/").is_err());
        let err = Command::parse("/ban 3").unwrap_err();
        assert!(err.contains("/ban"));
    }

    #[test]
    fn test_admin_only_commands() {
        assert!(Command::Kick(1).requires_admin());
        assert!(Command::Say("x".into()).requires_admin());
        assert!(!Command::Players.requires_admin());
        assert!(!Command::Admin("pw".into()).requires_admin());
        assert!(Caller::Console.is_admin());
    }
}
