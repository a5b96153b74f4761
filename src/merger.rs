use crate::error::PipelineError;
use crate::ffmpeg::{ClipInfo, MediaBackend};
use crate::{loge, logi, logok, logw};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const OUTPUT_FPS: u32 = 30;
const SAMPLE_RATE: u32 = 44_100;

/// Arguments for one encoder run plus what the result should look like.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    pub args: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub transition: Option<f64>,
    pub duration: f64,
}

/// Overlap actually used between clips: at most half of the shortest clip.
pub fn effective_transition(requested: f64, durations: &[f64]) -> Option<f64> {
    if durations.len() < 2 || requested <= 0.0 {
        return None;
    }
    let shortest = durations.iter().copied().fold(f64::INFINITY, f64::min);
    let limit = shortest / 2.0;
    let d = if requested > limit {
        logw(format!(
            "Transition {:.2}s is longer than half the shortest clip; using {:.2}s",
            requested, limit
        ));
        limit
    } else {
        requested
    };
    (d > 0.0).then_some(d)
}

fn even(v: u32) -> u32 {
    (v & !1).max(2)
}

/// Builds the encoder invocation for `clips` in order. `transition` is the
/// requested crossfade length, `None` for hard cuts.
pub fn build_merge_plan(
    clips: &[(PathBuf, ClipInfo)],
    transition: Option<f64>,
    output: &Path,
) -> Result<MergePlan, PipelineError> {
    let (_, first) = clips
        .first()
        .ok_or_else(|| PipelineError::Merge("no clips to merge".to_string()))?;
    let (w, h) = (even(first.width), even(first.height));
    let with_audio = clips.iter().any(|(_, c)| c.has_audio);
    let durations: Vec<f64> = clips.iter().map(|(_, c)| c.duration).collect();
    let fade = transition.and_then(|t| effective_transition(t, &durations));

    let mut args: Vec<String> = ["-y", "-hide_banner", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for (path, _) in clips {
        args.push("-i".to_string());
        args.push(path.display().to_string());
    }

    let mut graph: Vec<String> = Vec::new();
    for (i, (_, clip)) in clips.iter().enumerate() {
        graph.push(format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={OUTPUT_FPS},format=yuv420p,setpts=PTS-STARTPTS[v{i}]"
        ));
        if with_audio {
            let d = clip.duration;
            if clip.has_audio {
                graph.push(format!(
                    "[{i}:a]aresample={SAMPLE_RATE},aformat=sample_fmts=fltp:channel_layouts=stereo,apad,atrim=duration={d:.3},asetpts=PTS-STARTPTS[a{i}]"
                ));
            } else {
                graph.push(format!(
                    "anullsrc=channel_layout=stereo:sample_rate={SAMPLE_RATE},aformat=sample_fmts=fltp,atrim=duration={d:.3},asetpts=PTS-STARTPTS[a{i}]"
                ));
            }
        }
    }

    let n = clips.len();
    let total: f64 = durations.iter().sum();
    let duration = match fade {
        Some(d) => {
            let mut offset_base = durations[0];
            let mut vcur = "v0".to_string();
            let mut acur = "a0".to_string();
            for i in 1..n {
                let last = i == n - 1;
                let vout = if last { "outv".to_string() } else { format!("vx{i}") };
                let aout = if last { "outa".to_string() } else { format!("ax{i}") };
                let offset = (offset_base - d).max(0.0);
                graph.push(format!(
                    "[{vcur}][v{i}]xfade=transition=fade:duration={d:.3}:offset={offset:.3}[{vout}]"
                ));
                if with_audio {
                    graph.push(format!("[{acur}][a{i}]acrossfade=d={d:.3}[{aout}]"));
                }
                offset_base += durations[i] - d;
                vcur = vout;
                acur = aout;
            }
            total - d * (n - 1) as f64
        }
        None => {
            let inputs: String = (0..n)
                .map(|i| {
                    if with_audio {
                        format!("[v{i}][a{i}]")
                    } else {
                        format!("[v{i}]")
                    }
                })
                .collect();
            if with_audio {
                graph.push(format!("{inputs}concat=n={n}:v=1:a=1[outv][outa]"));
            } else {
                graph.push(format!("{inputs}concat=n={n}:v=1:a=0[outv]"));
            }
            total
        }
    };

    args.push("-filter_complex".to_string());
    args.push(graph.join(";"));
    args.push("-map".to_string());
    args.push("[outv]".to_string());
    if with_audio {
        args.push("-map".to_string());
        args.push("[outa]".to_string());
    }
    args.push("-r".to_string());
    args.push(OUTPUT_FPS.to_string());
    let video = [
        "-c:v", "libx264", "-preset", "medium", "-threads", "4", "-pix_fmt", "yuv420p",
    ];
    args.extend(video.iter().map(|s| s.to_string()));
    if with_audio {
        args.extend(["-c:a", "aac", "-b:a", "192k"].iter().map(|s| s.to_string()));
    }
    args.push("-movflags".to_string());
    args.push("+faststart".to_string());
    args.push(output.display().to_string());

    Ok(MergePlan {
        args,
        width: w,
        height: h,
        transition: fade,
        duration,
    })
}

pub struct ClipAssembler<B> {
    backend: B,
    output_dir: PathBuf,
}

impl<B: MediaBackend> ClipAssembler<B> {
    pub fn new(backend: B, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            output_dir: output_dir.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn probe_valid(&self, paths: &[PathBuf]) -> Vec<(PathBuf, ClipInfo)> {
        let mut valid = Vec::new();
        for path in paths {
            if fs::metadata(path).await.is_err() {
                logw(format!("Video not found: {}", path.display()));
                continue;
            }
            match self.backend.probe(path).await {
                Ok(info) if info.duration > 0.0 => {
                    logok(format!(
                        "Valid: {} ({:.2}s, {}x{}, {:.2} fps)",
                        file_label(path),
                        info.duration,
                        info.width,
                        info.height,
                        info.fps
                    ));
                    valid.push((path.clone(), info));
                }
                Ok(_) => logw(format!("Zero-length video: {}", path.display())),
                Err(err) => logw(format!("Unreadable video {}: {:#}", path.display(), err)),
            }
        }
        valid
    }

    /// Paths that exist and decode to a positive duration, in input order.
    pub async fn validate_videos(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        self.probe_valid(paths)
            .await
            .into_iter()
            .map(|(p, _)| p)
            .collect()
    }

    pub async fn merge_scenes(
        &self,
        paths: &[PathBuf],
        output_filename: &str,
        add_transitions: bool,
        transition_duration: f64,
    ) -> Option<PathBuf> {
        let clips = self.probe_valid(paths).await;
        if clips.is_empty() {
            loge("No valid videos to merge");
            return None;
        }

        if let Err(err) = fs::create_dir_all(&self.output_dir).await {
            loge(format!(
                "Failed to create {}: {}",
                self.output_dir.display(),
                err
            ));
            return None;
        }
        let output = self.output_dir.join(output_filename);
        let transition = add_transitions.then_some(transition_duration);

        let plan = match build_merge_plan(&clips, transition, &output) {
            Ok(plan) => plan,
            Err(err) => {
                loge(err.to_string());
                return None;
            }
        };
        logi(format!(
            "Merging {} clips at {}x{} ({}) -> {}",
            clips.len(),
            plan.width,
            plan.height,
            match plan.transition {
                Some(d) => format!("{:.2}s crossfades", d),
                None => "hard cuts".to_string(),
            },
            output.display()
        ));

        if let Err(err) = self.backend.encode(&plan.args).await {
            loge(PipelineError::Merge(format!("{:#}", err)).to_string());
            return None;
        }

        logok(format!(
            "Final video: {} ({:.2}s)",
            output.display(),
            plan.duration
        ));
        Some(output)
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
