use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::Parser;
use orchat::{logging, ChatClient, ChatMessage, ConfigLoader, EnvSecrets, KeyPoolResolver, SendOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_MODEL: &str = "deepseek/deepseek-chat-v3-0324:free";

#[derive(Parser, Debug)]
#[command(name = "orchat", version, about = "Chat with OpenRouter models over a pool of API keys")]
struct Args {
    /// Message to send
    prompt: Vec<String>,

    /// Model id
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Use this API key instead of the configured pool
    #[arg(short, long, env = "ORCHAT_API_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Gateway config file merged over the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Attach an image (repeatable)
    #[arg(short, long = "image")]
    images: Vec<PathBuf>,

    /// Print the reply only once it is complete
    #[arg(long)]
    no_stream: bool,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// Retries after the first attempt
    #[arg(long)]
    max_retries: Option<u32>,

    /// Check which configured key the gateway accepts
    #[arg(long)]
    test: bool,

    /// List configured models
    #[arg(long)]
    list_models: bool,

    /// Show which credential variables are set
    #[arg(long)]
    key_status: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    logging::init(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("An error occurred while sending the message. Please try again.");
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => ConfigLoader::from_path(path)?,
        None => ConfigLoader::new()?,
    }
    .into_config();

    if args.list_models {
        for (id, model) in &config.models {
            let vision = if model.supports_vision { " [vision]" } else { "" };
            println!("{:<45} {}{}", id, model.name, vision);
        }
        return Ok(());
    }

    if args.key_status {
        let resolver = KeyPoolResolver::from_config(&config, Arc::new(EnvSecrets));
        for status in resolver.key_status() {
            let state = if status.available { "set" } else { "missing" };
            println!("{:<24} {}", status.name, state);
        }
        return Ok(());
    }

    let mut builder = ChatClient::builder(&args.model).config(config);
    if let Some(key) = &args.key {
        builder = builder.api_key(key);
    }
    if let Some(max_retries) = args.max_retries {
        builder = builder.max_retries(max_retries);
    }
    let mut client = builder.build()?;

    if args.test {
        let result = client.test_connection().await;
        match result.active_key_index {
            Some(index) if result.success => {
                println!("Connected with key {}/{}", index + 1, result.total_keys)
            }
            _ => bail!(
                "{} ({} keys tried)",
                result.error.unwrap_or_else(|| "connection failed".to_string()),
                result.total_keys
            ),
        }
        return Ok(());
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        bail!("nothing to send: pass a message");
    }

    let mut message = ChatMessage::user(prompt);
    for path in &args.images {
        message = message.with_image(image_data_uri(path)?);
    }

    let mut options = SendOptions::new();
    if let Some(temperature) = args.temperature {
        options = options.temperature(temperature);
    }
    if let Some(max_tokens) = args.max_tokens {
        options = options.max_tokens(max_tokens);
    }

    if args.no_stream {
        let reply = client.send(&[message], options).await?;
        println!("{}", reply);
    } else {
        let mut out = ChunkWriter::new(std::io::stdout());
        let mut print = |chunk: &str| out.write(chunk);
        client
            .send(&[message], options.on_chunk(&mut print))
            .await?;
        out.finish().context("writing reply to stdout")?;
        println!();
    }

    Ok(())
}

/// Writes streamed chunks, going quiet after the first write error
struct ChunkWriter<W: Write> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> ChunkWriter<W> {
    fn new(out: W) -> Self {
        Self { out, error: None }
    }

    fn write(&mut self, chunk: &str) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self
            .out
            .write_all(chunk.as_bytes())
            .and_then(|_| self.out.flush())
        {
            self.error = Some(e);
        }
    }

    /// The first write error, if any
    fn finish(self) -> io::Result<()> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Read an image file as a `data:` URI
fn image_data_uri(path: &Path) -> Result<String> {
    let mime = image_mime(path)
        .with_context(|| format!("unsupported image type: {}", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", mime, encoded))
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
