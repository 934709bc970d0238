use std::error::Error;
use std::path::Path;

use chat_lifecycle::config::{self, AppConfig};
use chat_lifecycle::{
    ConversationId, ConversationScope, MessageId, MessagingHandle, NewMessage, UserId,
};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "chat_lifecycle",
    version,
    about = "Message lifecycle operations on a chat database"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the config file (if missing) and create the database schema
    Init,
    /// Register a user and print its id
    AddUser { username: String },
    /// Record a message
    Send {
        #[arg(long)]
        from: String,
        /// Receiver; omit for a conversation broadcast
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        conversation: Option<String>,
        /// Message being replied to
        #[arg(long)]
        reply_to: Option<String>,
        content: String,
    },
    /// Replace a message's content
    Edit {
        id: String,
        #[arg(long)]
        editor: String,
        content: String,
    },
    /// Delete a user and everything that depends on them
    RemoveUser { id: String },
    /// Print the reply tree of a conversation
    Thread(ThreadArgs),
    /// List a user's unread notifications
    Unread { user: String },
    /// Show the edit history of a message
    History { id: String },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ThreadArgs {
    /// Direct conversation between two users
    #[arg(long, num_args = 2, value_names = ["USER", "USER"])]
    between: Option<Vec<String>>,
    #[arg(long)]
    conversation: Option<String>,
}

impl ThreadArgs {
    fn scope(self) -> Option<ConversationScope> {
        match (self.between, self.conversation) {
            (Some(users), _) => match users.as_slice() {
                [a, b] => Some(ConversationScope::direct(
                    UserId::from(a.as_str()),
                    UserId::from(b.as_str()),
                )),
                _ => None,
            },
            (None, Some(conversation)) => {
                Some(ConversationScope::conversation(ConversationId::from(conversation)))
            }
            (None, None) => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);

    if matches!(cli.command, Command::Init) {
        init(&cli.config, &app_config)?;
    }
    let handle = MessagingHandle::from_config(&app_config)?;

    match cli.command {
        Command::Init => print_json(&app_config)?,
        Command::AddUser { username } => print_json(&handle.register_user(&username).await?)?,
        Command::Send {
            from,
            to,
            conversation,
            reply_to,
            content,
        } => {
            let sender = UserId::from(from);
            let mut new = match (to, conversation.map(ConversationId::from)) {
                (Some(to), conversation) => {
                    let new = NewMessage::direct(sender, UserId::from(to), content);
                    match conversation {
                        Some(conversation) => new.in_conversation(conversation),
                        None => new,
                    }
                }
                (None, Some(conversation)) => NewMessage::broadcast(sender, conversation, content),
                (None, None) => return Err("send needs --to or --conversation".into()),
            };
            if let Some(parent) = reply_to {
                new = new.in_reply_to(MessageId::from(parent));
            }
            print_json(&handle.record_message(new).await?)?
        }
        Command::Edit {
            id,
            editor,
            content,
        } => print_json(
            &handle
                .edit_message(&MessageId::from(id), &content, &UserId::from(editor))
                .await?,
        )?,
        Command::RemoveUser { id } => print_json(&handle.remove_user(&UserId::from(id)).await?)?,
        Command::Thread(args) => {
            let scope = args.scope().ok_or("thread needs --between A B or --conversation")?;
            print_json(handle.get_thread(&scope).await?.as_slice())?
        }
        Command::Unread { user } => {
            print_json(&handle.unread_notifications(&UserId::from(user)).await?)?
        }
        Command::History { id } => {
            print_json(&handle.message_history(&MessageId::from(id)).await?)?
        }
    }

    Ok(())
}

fn init(config_path: &str, app_config: &AppConfig) -> std::io::Result<()> {
    if Path::new(config_path).exists() {
        log::info!("Keeping existing config {config_path}");
        return Ok(());
    }
    config::save_config(config_path, app_config)?;
    log::info!("Wrote default config to {config_path}");
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
