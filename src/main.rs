use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use veo_shorts::api::GeminiClient;
use veo_shorts::clock::{Clock, TokioClock};
use veo_shorts::config::{Config, DEFAULT_CONFIG_PATH};
use veo_shorts::cookies::convert_cookie_editor_export;
use veo_shorts::ffmpeg::Ffmpeg;
use veo_shorts::flow::FlowSession;
use veo_shorts::init;
use veo_shorts::pipeline::Pipeline;
use veo_shorts::script_writer::{ScriptGenerator, ScriptRequest};

/// Turns a topic into a short video: Gemini writes the scenes, Google Flow
/// renders them, ffmpeg joins the clips.
#[derive(Parser, Debug)]
#[command(name = "veo-shorts", version)]
struct Args {
    /// Video topic.
    #[arg(long)]
    topic: Option<String>,

    /// Total duration in seconds.
    #[arg(long, default_value_t = 60)]
    duration: u32,

    /// Duration of each scene in seconds.
    #[arg(long, default_value_t = 8)]
    scene_duration: u32,

    /// Visual style.
    #[arg(long, default_value = "cinematic")]
    style: String,

    #[arg(long, default_value = "16:9", value_parser = ["16:9", "9:16", "1:1"])]
    aspect_ratio: String,

    /// Only generate and save the script.
    #[arg(long)]
    script_only: bool,

    /// Render and merge an existing script file.
    #[arg(long, value_name = "SCRIPT_JSON")]
    from_script: Option<PathBuf>,

    /// Join clips with hard cuts.
    #[arg(long)]
    no_transitions: bool,

    /// Run the browser without a window.
    #[arg(long)]
    headless: bool,

    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print a rendering prompt refined from a scene description and exit.
    #[arg(long, value_name = "DESCRIPTION")]
    refine: Option<String>,

    /// Convert a Cookie-Editor export into the cookie store and exit.
    #[arg(long, value_name = "EXPORT_JSON")]
    convert_cookies: Option<PathBuf>,

    /// Destination for --convert-cookies (defaults to the configured store).
    #[arg(long, requires = "convert_cookies")]
    cookies_out: Option<PathBuf>,
}

impl Args {
    fn request(&self) -> Result<ScriptRequest> {
        let Some(topic) = self.topic.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            bail!("--topic is required unless --from-script is given");
        };
        Ok(ScriptRequest {
            topic: topic.to_string(),
            duration: self.duration,
            scene_duration: self.scene_duration,
            style: self.style.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
        })
    }
}

async fn run(args: Args) -> Result<i32> {
    if let Some(input) = &args.convert_cookies {
        let output = match &args.cookies_out {
            Some(p) => p.clone(),
            None => Config::default().cookies_path,
        };
        convert_cookie_editor_export(input, &output).await?;
        return Ok(0);
    }

    let mut cfg = Config::load(&args.config).await?;
    if args.no_transitions {
        cfg.add_transitions = false;
    }
    if args.headless {
        cfg.headless = true;
    }
    init::ensure_directories(&cfg).await?;

    if let Some(description) = &args.refine {
        let writer = ScriptGenerator::new(GeminiClient::new(&cfg)?);
        let prompt = writer.refine_scene_prompt(description, &args.style).await?;
        println!("{}", prompt);
        return Ok(0);
    }

    if !args.script_only && !init::check_ffmpeg().await {
        tracing::warn!("FFmpeg not found in PATH; the merge step will fail");
    }

    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let mut pipeline = Pipeline::new(
        cfg.clone(),
        GeminiClient::new(&cfg)?,
        FlowSession::new(&cfg, clock.clone()),
        Ffmpeg,
        clock,
    );

    let result = if let Some(path) = &args.from_script {
        pipeline.run_from_script(path).await
    } else {
        let req = args.request()?;
        if args.script_only {
            let path = pipeline.script_only(&req).await?;
            println!("{}", path.display());
            return Ok(0);
        }
        pipeline.run_full(&req).await
    };

    Ok(if result.succeeded() { 0 } else { 1 })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            tracing::warn!("Ignoring .env: {}", err);
        }
    }

    let args = Args::parse();
    let code = match run(args).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            1
        }
    };
    std::process::exit(code);
}
