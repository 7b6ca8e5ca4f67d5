use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use nearchat_core::compression::{
    compress_link, compress_text, decompress_link, decompress_text, desimplify_links, simplify_links, split_link_list,
};
use nearchat_core::identity::format_timestamp;
use nearchat_core::{
    ChatScope, Config, InboundOutcome, Keyring, MessageBody, NearChatCore, NodeId, OutboundMessage, ProtocolError,
    ReplyRef,
};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "nearchat")]
#[command(about = "Encode, decode and simulate nearchat broadcast frames")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Load configuration from a JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the per-frame payload budget
    #[arg(long)]
    budget: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a message into hex frames, one per line
    Encode {
        #[command(flatten)]
        message: MessageArgs,
        /// Sender display id (random if omitted)
        #[arg(long = "as")]
        sender: Option<String>,
    },
    /// Decode hex frames (arguments or stdin) and print outcomes as JSON
    Decode {
        /// Hex-encoded frames; read from stdin when empty
        frames: Vec<String>,
        /// Local display id, used to drop our own echoes
        #[arg(long = "as")]
        local: Option<String>,
        #[command(flatten)]
        keys: KeyArgs,
    },
    /// Pack text with the 5-bit text codec
    Compress {
        text: String,
    },
    /// Simplify and pack a newline or comma separated URL list
    Links {
        urls: String,
    },
    /// Show the forms of an identifier (fresh one if omitted)
    Id {
        /// 8-character display id
        display: Option<String>,
    },
    /// Send a message between two in-process nodes with paced, shuffled frames
    Simulate {
        #[command(flatten)]
        message: MessageArgs,
        /// Chunk indices to withhold, to watch the expiry sweep fail the message
        #[arg(long, value_delimiter = ',')]
        drop: Vec<u8>,
        /// Override the chunk delay in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },
}

#[derive(Args)]
struct MessageArgs {
    /// Message text
    text: String,
    /// Send to a group id
    #[arg(long, conflicts_with = "direct")]
    group: Option<String>,
    /// Send directly to a display id
    #[arg(long)]
    direct: Option<String>,
    /// Group or friend key for the chat
    #[arg(long)]
    key: Option<String>,
    /// Image URLs, comma separated
    #[arg(long, default_value = "")]
    images: String,
    /// Video URLs, comma separated
    #[arg(long, default_value = "")]
    videos: String,
    /// Reply to <SENDER_DISPLAY_ID>:<MESSAGE_DISPLAY_ID>
    #[arg(long)]
    reply: Option<String>,
}

#[derive(Args)]
struct KeyArgs {
    /// Group key as <GROUP>=<KEY>, repeatable
    #[arg(long = "group-key")]
    group_keys: Vec<String>,
    /// Friend key as <DISPLAY_ID>=<KEY>, repeatable
    #[arg(long = "friend-key")]
    friend_keys: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(budget) = cli.budget {
        config = config.with_payload_budget(budget);
    }

    match cli.command {
        Commands::Encode { message, sender } => encode(config, message, sender),
        Commands::Decode { frames, local, keys } => decode(config, frames, local, keys),
        Commands::Compress { text } => compress(&text),
        Commands::Links { urls } => links(&urls),
        Commands::Id { display } => show_id(display),
        Commands::Simulate { message, drop, delay_ms } => simulate(config, message, drop, delay_ms).await,
    }
}

fn parse_display_id(display: &str) -> Result<NodeId> {
    if display.chars().count() != 8 {
        bail!("display id must be 8 characters: {:?}", display);
    }
    Ok(NodeId::from_display_id(display))
}

fn local_id(display: Option<String>) -> Result<NodeId> {
    match display {
        Some(display) => parse_display_id(&display),
        None => Ok(NodeId::now()),
    }
}

impl MessageArgs {
    fn outbound(&self) -> Result<OutboundMessage> {
        let scope = match (&self.group, &self.direct) {
            (Some(group), _) => ChatScope::group(group),
            (None, Some(peer)) => ChatScope::direct(parse_display_id(peer)?),
            (None, None) => ChatScope::broadcast(),
        };
        let body = MessageBody::text(self.text.clone())
            .with_images(split_link_list(&self.images))
            .with_videos(split_link_list(&self.videos));

        let mut outbound = OutboundMessage::to_scope(scope, body);
        if let Some(reply) = &self.reply {
            let (sender, message_id) = reply
                .split_once(':')
                .ok_or_else(|| anyhow!("reply must look like SENDER:MESSAGE"))?;
            outbound = outbound.replying_to(ReplyRef {
                sender: parse_display_id(sender)?,
                message_id: parse_display_id(message_id)?,
            });
        }
        Ok(outbound)
    }

    fn install_key(&self, keyring: &Keyring) -> Result<()> {
        let Some(key) = &self.key else {
            return Ok(());
        };
        if let Some(group) = &self.group {
            keyring.set_group_key(group, key);
        } else if let Some(peer) = &self.direct {
            keyring.set_friend_key(parse_display_id(peer)?, key);
        } else {
            warn!("--key has no effect on broadcast messages");
        }
        Ok(())
    }
}

impl KeyArgs {
    fn install(&self, keyring: &Keyring) -> Result<()> {
        for entry in &self.group_keys {
            let (group, key) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("group key must look like GROUP=KEY"))?;
            keyring.set_group_key(group, key);
        }
        for entry in &self.friend_keys {
            let (friend, key) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("friend key must look like DISPLAY_ID=KEY"))?;
            keyring.set_friend_key(parse_display_id(friend)?, key);
        }
        Ok(())
    }
}

fn encode(config: Config, message: MessageArgs, sender: Option<String>) -> Result<()> {
    let core = NearChatCore::new(local_id(sender)?, config)?;
    message.install_key(core.keyring())?;

    let batch = core.send(&message.outbound()?)?;
    info!(
        "📤 {} frame(s) for message {} ({:?})",
        batch.frames.len(),
        batch.message.message_id,
        batch.message.kind
    );
    for frame in &batch.frames {
        println!("{}", hex::encode(frame));
    }
    Ok(())
}

fn decode(config: Config, frames: Vec<String>, local: Option<String>, keys: KeyArgs) -> Result<()> {
    let core = NearChatCore::new(local_id(local)?, config)?;
    keys.install(core.keyring())?;

    let frames = if frames.is_empty() {
        io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<Vec<String>>>()?
    } else {
        frames
    };

    for line in frames.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        let bytes = hex::decode(line).with_context(|| format!("invalid hex frame: {}", line))?;
        let outcome = core.handle_frame(&bytes);
        println!("{}", serde_json::to_string(&outcome)?);
    }

    let stats = core.stats();
    info!(
        "📊 delivered {}, dropped {}, still pending {}",
        stats.delivered, stats.dropped, stats.pending
    );
    Ok(())
}

fn compress(text: &str) -> Result<()> {
    match compress_text(text) {
        Ok(packed) => {
            println!("packed:   {} ({} bytes, {} as UTF-8)", hex::encode(&packed), packed.len(), text.len());
            println!("restored: {:?}", decompress_text(&packed));
        }
        Err(ProtocolError::UnsupportedCharacter(c)) => {
            println!("unsupported character {:?}: sent as literal UTF-8 ({} bytes)", c, text.len());
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn links(urls: &str) -> Result<()> {
    let list = split_link_list(urls);
    let simplified = simplify_links(&list);
    let packed = compress_link(&simplified)?;
    let restored = desimplify_links(&decompress_link(&packed));

    let original: usize = list.iter().map(String::len).sum();
    println!("simplified: {}", simplified);
    println!("packed:     {} ({} bytes, {} as text)", hex::encode(&packed), packed.len(), original);
    for url in restored {
        println!("restored:   {}", url);
    }
    Ok(())
}

fn show_id(display: Option<String>) -> Result<()> {
    let id = local_id(display)?;
    println!("display:   {}", id.to_display_id());
    println!("numeric:   {}", id.value());
    println!("wire:      {}", id.to_wire());
    println!("minted at: {}", format_timestamp(id, 1));
    Ok(())
}

async fn simulate(config: Config, message: MessageArgs, drop: Vec<u8>, delay_ms: Option<u64>) -> Result<()> {
    let delay = delay_ms.map(Duration::from_millis).unwrap_or_else(|| config.chunk_delay());

    let sender = NearChatCore::new(NodeId::now(), config.clone())?;
    let receiver = NearChatCore::new(NodeId::new(sender.local_id().value() ^ 0x5A5A), config)?;

    message.install_key(sender.keyring())?;
    message.install_key(receiver.keyring())?;

    println!("🆔 sender {} -> receiver {}", sender.local_id(), receiver.local_id());

    let batch = sender.send(&message.outbound()?)?;
    println!("📤 {} frame(s), delay {:?} between advertisements", batch.frames.len(), delay);

    let (sweeper, mut failed) = receiver.start_sweeper();

    // Odd chunks first, then even, to show out-of-order reassembly
    let order: Vec<usize> = (0..batch.frames.len())
        .filter(|i| i % 2 == 1)
        .chain((0..batch.frames.len()).filter(|i| i % 2 == 0))
        .collect();

    for index in order {
        if drop.contains(&(index as u8)) {
            println!("📵 chunk {} lost", index);
            continue;
        }
        tokio::time::sleep(delay).await;
        match receiver.handle_frame(&batch.frames[index]) {
            InboundOutcome::Progress(message) => println!("📶 {}", message.body.text),
            InboundOutcome::Complete(message) => {
                println!("📨 {}", serde_json::to_string_pretty(&message)?);
                println!("🕒 {}", message.timestamp_label());
                sweeper.abort();
                return Ok(());
            }
            InboundOutcome::Dropped(reason) => println!("🗑️ dropped: {:?}", reason),
        }
    }

    println!(
        "⏳ waiting up to {:?} for the expiry sweep",
        receiver.config().reassembly_timeout() + receiver.config().cleanup_interval()
    );
    match failed.recv().await {
        Some(message) => println!("❌ {}", message.body.text),
        None => warn!("sweeper stopped before reporting"),
    }
    sweeper.abort();
    Ok(())
}
