//! Operator reply tool.
//!
//! Drops a reply envelope straight into the bot's inbox, the same way the
//! bot bridge would, so an operator can answer a pending request by hand:
//!
//! ```text
//! talkback-reply --user-id 7 --message-id abc123 "sounds good"
//! ```
//!
//! Without ids the legacy framing is used.

use clap::Parser;
use std::sync::Arc;
use talkback_relay::envelope::{encode, encode_legacy};
use talkback_relay::{QueueRelay, RedisStore};
use talkback_server::config::load_config;
use talkback_types::{Direction, UserId};

#[derive(Debug, Parser)]
#[command(name = "talkback-reply", about = "Push an operator reply into the talkback inbox")]
struct Args {
    /// Server configuration file; relay settings are read from it.
    #[arg(long, env = "TALKBACK_CONFIG_PATH", default_value = "config.toml")]
    config: String,

    /// Overrides `relay.redis_url`.
    #[arg(long, env = "TALKBACK_REDIS_URL")]
    redis_url: Option<String>,

    /// Overrides `relay.recipient`.
    #[arg(long)]
    recipient: Option<String>,

    /// User the reply is for.
    #[arg(long, requires = "message_id")]
    user_id: Option<UserId>,

    /// Message being answered.
    #[arg(long, requires = "user_id")]
    message_id: Option<String>,

    /// Reply text.
    #[arg(required = true, num_args = 1..)]
    text: Vec<String>,
}

impl Args {
    fn envelope(&self, channel: &str) -> String {
        let body = self.text.join(" ");
        match (self.user_id, self.message_id.as_deref()) {
            (Some(user_id), Some(message_id)) => {
                encode(Direction::To, channel, user_id, message_id, &body)
            }
            _ => encode_legacy(Direction::To, channel, &body),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .init();

    let args = Args::parse();
    let config = load_config(Some(&args.config))?;
    let relay_config = config.relay;

    let redis_url = args.redis_url.clone().unwrap_or(relay_config.redis_url);
    let recipient = args.recipient.clone().unwrap_or(relay_config.recipient);

    let store = RedisStore::connect(&redis_url).await?;
    let relay = QueueRelay::new(
        Arc::new(store),
        relay_config.outbound_queue,
        relay_config.inbox_prefix,
    );

    let envelope = args.envelope(&relay_config.channel);
    relay.deliver_to_inbox(&recipient, &envelope).await?;

    println!("{} <- {}", relay.inbox_key(&recipient), envelope);
    Ok(())
}
