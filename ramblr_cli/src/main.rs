use clap::Parser;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use ramblr_protocol::{DetectionPayload, InstructionPayload};
use ramblr_stream::{
    Collaborators, EncodeError, EncodeSettings, Frame, FrameEncoder, FrameSize, FrameSource,
    ReqwestBackend, SessionExit, SessionObserver, StatusEvent, StepWidgets, StreamConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

/// Streams a directory of pre-encoded images to a Ramblr session as if they
/// were camera frames. Every flag falls back to its `RAMBLR_*` variable.
#[derive(Parser, Debug)]
#[command(name = "ramblr_cli")]
struct Args {
    /// Directory of .jpg/.jpeg/.png files, replayed in name order.
    #[arg(long, value_name = "DIR", env = "RAMBLR_FRAMES_DIR")]
    frames_dir: PathBuf,

    #[arg(long)]
    client_id: Option<String>,

    /// Read the client secret from a file instead of RAMBLR_CLIENT_SECRET.
    #[arg(long, value_name = "PATH")]
    client_secret_file: Option<PathBuf>,

    #[arg(long)]
    authority: Option<String>,

    #[arg(long)]
    scope: Option<String>,

    #[arg(long)]
    workspace_id: Option<String>,

    #[arg(long)]
    skill_id: Option<String>,

    #[arg(long)]
    websocket_url: Option<String>,

    #[arg(long)]
    api_base_url: Option<String>,

    #[arg(long)]
    fps: Option<u32>,

    #[arg(long, default_value_t = 1008)]
    width: u32,

    #[arg(long, default_value_t = 756)]
    height: u32,

    #[arg(long, default_value_t = false)]
    png: bool,

    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn apply(&self, mut cfg: StreamConfig) -> anyhow::Result<StreamConfig> {
        if let Some(path) = self.client_secret_file.as_deref() {
            let secret = std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("failed to read client secret file {}: {e}", path.display())
            })?;
            cfg.client_secret = Zeroizing::new(secret.trim().to_string());
        }
        override_with(&mut cfg.client_id, &self.client_id);
        override_with(&mut cfg.authority, &self.authority);
        override_with(&mut cfg.scope, &self.scope);
        override_with(&mut cfg.workspace_id, &self.workspace_id);
        override_with(&mut cfg.websocket_url, &self.websocket_url);
        if self.skill_id.is_some() {
            cfg.skill_id = self.skill_id.clone();
        }
        if self.api_base_url.is_some() {
            cfg.api_base_url = self.api_base_url.clone();
        }
        if let Some(fps) = self.fps {
            cfg.target_frame_rate = fps;
        }
        cfg.use_png |= self.png;
        Ok(cfg)
    }
}

fn override_with(field: &mut String, flag: &Option<String>) {
    if let Some(v) = flag.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        *field = v.to_string();
    }
}

/// Cycles through image files loaded at startup. The bytes are already
/// encoded, so the encoder passes them through.
struct DirectoryFrames {
    images: Vec<Arc<[u8]>>,
    next: usize,
    size: FrameSize,
}

impl DirectoryFrames {
    async fn load(dir: &Path, width: u32, height: u32) -> anyhow::Result<Self> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read frames dir {}: {e}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"));
            if is_image {
                names.push(path);
            }
        }
        names.sort();

        let mut images: Vec<Arc<[u8]>> = Vec::with_capacity(names.len());
        for path in &names {
            images.push(Arc::from(tokio::fs::read(path).await?));
        }
        if images.is_empty() {
            return Err(anyhow::anyhow!("no .jpg/.png files in {}", dir.display()));
        }
        info!(count = images.len(), dir = %dir.display(), "loaded frames");

        Ok(Self {
            images,
            next: 0,
            size: FrameSize { width, height },
        })
    }
}

impl FrameSource for DirectoryFrames {
    fn dimensions(&self) -> FrameSize {
        self.size
    }

    fn capture(&mut self) -> Option<Frame> {
        let pixels = self.images.get(self.next)?.clone();
        self.next = (self.next + 1) % self.images.len();
        Some(Frame {
            width: self.size.width,
            height: self.size.height,
            pixels,
        })
    }
}

struct Passthrough;

impl FrameEncoder for Passthrough {
    fn encode(
        &self,
        frame: Frame,
        _settings: EncodeSettings,
    ) -> BoxFuture<'static, Result<Vec<u8>, EncodeError>> {
        async move {
            if frame.pixels.is_empty() {
                return Err(EncodeError::NoFrame);
            }
            Ok(frame.pixels.to_vec())
        }
        .boxed()
    }
}

struct Console;

impl SessionObserver for Console {
    fn on_status(&mut self, event: &StatusEvent) {
        info!(status = event.status, retry_in = ?event.retry_in, "connection");
    }

    fn on_detections(&mut self, detections: &[DetectionPayload]) {
        debug!(count = detections.len(), "detections");
    }

    fn on_instruction(&mut self, instruction: &InstructionPayload) {
        info!(index = instruction.index, status = ?instruction.status, "instruction");
    }

    fn on_text(&mut self, text: &str) {
        println!("{text}");
    }
}

struct ConsoleSteps;

impl StepWidgets for ConsoleSteps {
    fn set_button_enabled(&mut self, _slot: usize, _enabled: bool) {}

    fn toggle_button(&mut self, _slot: usize, _on: bool) {}

    fn set_step_text(&mut self, slot: usize, text: &str, visible: bool) {
        if visible {
            eprintln!("  > [{slot}] {text}");
        }
    }

    fn set_step_number(&mut self, slot: usize, label: &str, visible: bool) {
        if visible {
            debug!(slot, label, "step slot");
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.apply(StreamConfig::from_env()?)?;
    let frames = DirectoryFrames::load(&args.frames_dir, args.width, args.height).await?;

    let collaborators = Collaborators {
        http: Arc::new(ReqwestBackend::new()?),
        frames: Box::new(frames),
        encoder: Arc::new(Passthrough),
        widgets: Some(Box::new(ConsoleSteps)),
        observers: vec![Box::new(Console)],
    };

    let (handle, channels) = ramblr_stream::channel();
    let mut session = tokio::spawn(ramblr_stream::run(config, collaborators, channels));

    let outcome = tokio::select! {
        joined = &mut session => joined?,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutting down");
            handle.shutdown().await;
            session.await?
        }
    };

    match outcome? {
        SessionExit::HandshakesExhausted => Err(anyhow::anyhow!(
            "all websocket authentication methods failed"
        )),
        exit => {
            eprintln!("session ended: {exit:?}");
            Ok(())
        }
    }
}
