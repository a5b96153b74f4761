use crate::api::TextGenerator;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::ffmpeg::MediaBackend;
use crate::flow::VideoStudio;
use crate::merger::ClipAssembler;
use crate::renderer::{SceneRenderer, SceneResult};
use crate::script::{Script, load_script, save_script};
use crate::script_writer::{ScriptGenerator, ScriptRequest};
use crate::{loge, logi, logok, logw};
use anyhow::Context;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Started,
    Completed,
    MergeFailed,
    NoValidVideos,
    GenerationFailed,
    Error,
}

/// Record of one run, written to `<logs_dir>/<project_name>_results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub project_name: String,
    pub topic: String,
    pub started_at: DateTime<Local>,
    pub completed_at: Option<DateTime<Local>>,
    pub script_path: Option<PathBuf>,
    pub scenes: Vec<SceneResult>,
    pub final_video_path: Option<PathBuf>,
    pub status: PipelineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn project_name(at: DateTime<Local>) -> String {
    format!("project_{}", at.format("%Y%m%d_%H%M%S"))
}

impl PipelineResult {
    fn start(topic: &str) -> Self {
        let started_at = Local::now();
        Self {
            project_name: project_name(started_at),
            topic: topic.to_string(),
            started_at,
            completed_at: None,
            script_path: None,
            scenes: Vec::new(),
            final_video_path: None,
            status: PipelineStatus::Started,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == PipelineStatus::Completed
    }
}

pub async fn save_results(result: &PipelineResult, logs_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(logs_dir)
        .await
        .with_context(|| format!("Failed to create dir {}", logs_dir.display()))?;
    let path = logs_dir.join(format!("{}_results.json", result.project_name));
    fs::write(&path, serde_json::to_string_pretty(result)?)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn log_summary(scenes: &[SceneResult]) {
    let ok = scenes.iter().filter(|r| r.is_success()).count();
    logi(format!("Render summary: {}/{} scenes succeeded", ok, scenes.len()));
    for r in scenes.iter().filter(|r| !r.is_success()) {
        logw(format!(
            "  scene {}: {}",
            r.scene.scene_number,
            r.error.as_deref().unwrap_or("failed")
        ));
    }
}

/// Script, render and merge phases wired to their external services.
pub struct Pipeline<G, S, B> {
    config: Config,
    scripts: ScriptGenerator<G>,
    studio: S,
    renderer: SceneRenderer,
    assembler: ClipAssembler<B>,
}

impl<G, S, B> Pipeline<G, S, B>
where
    G: TextGenerator,
    S: VideoStudio,
    B: MediaBackend,
{
    pub fn new(config: Config, generator: G, studio: S, media: B, clock: Arc<dyn Clock>) -> Self {
        let renderer = SceneRenderer::new(config.videos_dir.clone(), clock);
        let assembler = ClipAssembler::new(media, config.videos_dir.clone());
        Self {
            config,
            scripts: ScriptGenerator::new(generator),
            studio,
            renderer,
            assembler,
        }
    }

    /// Generates and stores a script without touching the browser.
    pub async fn script_only(&self, req: &ScriptRequest) -> Result<PathBuf> {
        let script = self.scripts.generate_script(req).await?;
        save_script(&script, &self.config.scripts_dir).await
    }

    pub async fn run_full(&mut self, req: &ScriptRequest) -> PipelineResult {
        let mut record = PipelineResult::start(&req.topic);
        logi(format!("=== Pipeline {} : \"{}\" ===", record.project_name, req.topic));

        let outcome = self.generate_then_render(req, &mut record).await;
        self.finish(record, outcome).await
    }

    /// Renders and merges a previously saved script.
    pub async fn run_from_script(&mut self, path: &Path) -> PipelineResult {
        let mut record = PipelineResult::start("");
        record.script_path = Some(path.to_path_buf());
        logi(format!(
            "=== Pipeline {} from {} ===",
            record.project_name,
            path.display()
        ));

        let outcome = match load_script(path).await {
            Ok(script) => {
                record.topic = script.title.clone();
                logok(format!(
                    "Loaded script \"{}\" ({} scenes)",
                    script.title,
                    script.scenes.len()
                ));
                self.render_and_merge(&script, &mut record).await
            }
            Err(err) => Err(err),
        };
        self.finish(record, outcome).await
    }

    async fn generate_then_render(
        &mut self,
        req: &ScriptRequest,
        record: &mut PipelineResult,
    ) -> Result<()> {
        logi("[1/3] Generating script");
        let script = self.scripts.generate_script(req).await?;
        record.script_path = Some(save_script(&script, &self.config.scripts_dir).await?);
        self.render_and_merge(&script, record).await
    }

    async fn render_and_merge(&mut self, script: &Script, record: &mut PipelineResult) -> Result<()> {
        logi("[2/3] Rendering scenes");
        self.studio.open().await?;
        if let Err(err) = self.studio.persist_cookies().await {
            logw(format!("Could not refresh stored cookies: {}", err));
        }

        record.scenes = self
            .renderer
            .render_scenes(&mut self.studio, &script.scenes, &record.project_name)
            .await;
        log_summary(&record.scenes);

        if !record.scenes.iter().any(SceneResult::is_success) {
            loge("No scene rendered successfully");
            record.status = PipelineStatus::GenerationFailed;
            return Ok(());
        }

        logi("[3/3] Merging clips");
        let downloaded: Vec<PathBuf> = record
            .scenes
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| r.download_path.clone())
            .collect();
        let valid = self.assembler.validate_videos(&downloaded).await;
        if valid.is_empty() {
            loge("No valid clips to merge");
            record.status = PipelineStatus::NoValidVideos;
            return Ok(());
        }

        let output_filename = format!("{}_final.mp4", record.project_name);
        match self
            .assembler
            .merge_scenes(
                &valid,
                &output_filename,
                self.config.add_transitions,
                self.config.transition_duration,
            )
            .await
        {
            Some(path) => {
                record.final_video_path = Some(path);
                record.status = PipelineStatus::Completed;
            }
            None => record.status = PipelineStatus::MergeFailed,
        }
        Ok(())
    }

    /// Closes the studio and writes the record whatever happened before.
    async fn finish(&mut self, mut record: PipelineResult, outcome: Result<()>) -> PipelineResult {
        if let Err(err) = outcome {
            loge(format!("Pipeline aborted: {}", err));
            record.status = PipelineStatus::Error;
            record.error = Some(err.to_string());
        }

        if let Err(err) = self.studio.close().await {
            logw(format!("Browser did not close cleanly: {}", err));
        }

        record.completed_at = Some(Local::now());
        match save_results(&record, &self.config.logs_dir).await {
            Ok(path) => logok(format!("Results saved: {}", path.display())),
            Err(err) => loge(format!("Failed to save results: {}", err)),
        }

        match (&record.status, &record.final_video_path) {
            (PipelineStatus::Completed, Some(path)) => {
                logok(format!("Done. Final video: {}", path.display()))
            }
            (status, _) => logw(format!("Finished with status {:?}", status)),
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::merger::tests::{FakeMedia, clip};
    use crate::renderer::SceneStatus;
    use crate::renderer::tests::{FakeStudio, Take, scenes};
    use crate::script_writer::tests::{CannedText, draft_json};

    fn config(root: &Path) -> Config {
        Config {
            gemini_api_key: "test-key".to_string(),
            scripts_dir: root.join("scripts"),
            videos_dir: root.join("videos"),
            logs_dir: root.join("logs"),
            ..Config::default()
        }
    }

    fn request(duration: u32) -> ScriptRequest {
        ScriptRequest {
            topic: "X".to_string(),
            duration,
            scene_duration: 8,
            style: "cinematic".to_string(),
            aspect_ratio: "16:9".to_string(),
        }
    }

    fn playable() -> FakeMedia {
        FakeMedia {
            fallback: Some(clip(8.0, 1280, 720, true)),
            ..FakeMedia::default()
        }
    }

    async fn stored_record(root: &Path, result: &PipelineResult) -> PipelineResult {
        let path = root
            .join("logs")
            .join(format!("{}_results.json", result.project_name));
        serde_json::from_str(&fs::read_to_string(path).await.unwrap()).unwrap()
    }

    #[test]
    fn project_names_are_timestamped() {
        let at = chrono::TimeZone::with_ymd_and_hms(&Local, 2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(project_name(at), "project_20250102_030405");
    }

    #[tokio::test]
    async fn full_run_completes_and_records_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            config(dir.path()),
            CannedText::new(draft_json(5)),
            FakeStudio::new(vec![]),
            playable(),
            Arc::new(FakeClock::new()),
        );

        let result = pipeline.run_full(&request(40)).await;

        assert_eq!(result.status, PipelineStatus::Completed);
        assert_eq!(result.scenes.len(), 5);
        assert!(result.scenes.iter().all(|s| s.scene.duration == 8));
        assert!(result.script_path.as_ref().unwrap().exists());
        assert_eq!(
            result.final_video_path,
            Some(dir.path().join("videos").join(format!("{}_final.mp4", result.project_name)))
        );
        assert!(pipeline.studio.opened && pipeline.studio.cookies_saved && pipeline.studio.closed);

        let stored = stored_record(dir.path(), &result).await;
        assert_eq!(stored, result);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn failed_middle_scene_is_recorded_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let script = Script {
            title: "Three".to_string(),
            description: String::new(),
            total_duration: 24,
            num_scenes: 3,
            style: "cinematic".to_string(),
            aspect_ratio: "16:9".to_string(),
            created_at: Local::now(),
            scenes: scenes(3),
        };
        let script_path = save_script(&script, &dir.path().join("scripts")).await.unwrap();

        let mut pipeline = Pipeline::new(
            config(dir.path()),
            CannedText::new(""),
            FakeStudio::new(vec![
                Take::Clip { pending: 1 },
                Take::Error("policy violation"),
                Take::Clip { pending: 0 },
            ]),
            playable(),
            Arc::new(FakeClock::new()),
        );

        let result = pipeline.run_from_script(&script_path).await;

        let statuses: Vec<SceneStatus> = result.scenes.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![SceneStatus::Success, SceneStatus::Failed, SceneStatus::Success]
        );
        assert_eq!(result.topic, "Three");
        assert_eq!(result.status, PipelineStatus::Completed);
        let encodes = pipeline.assembler_encodes();
        assert_eq!(encodes.len(), 1);
        assert_eq!(encodes[0].iter().filter(|a| *a == "-i").count(), 2);
    }

    #[tokio::test]
    async fn unplayable_clips_end_as_no_valid_videos() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            config(dir.path()),
            CannedText::new(draft_json(2)),
            FakeStudio::new(vec![]),
            FakeMedia::default(),
            Arc::new(FakeClock::new()),
        );

        let result = pipeline.run_full(&request(16)).await;

        assert_eq!(result.status, PipelineStatus::NoValidVideos);
        assert_eq!(result.final_video_path, None);
        assert!(pipeline.assembler_encodes().is_empty());
        assert_eq!(stored_record(dir.path(), &result).await.status, PipelineStatus::NoValidVideos);
    }

    #[tokio::test]
    async fn login_page_aborts_rendering_but_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let studio = FakeStudio {
            reject_login: true,
            ..FakeStudio::default()
        };
        let mut pipeline = Pipeline::new(
            config(dir.path()),
            CannedText::new(draft_json(2)),
            studio,
            playable(),
            Arc::new(FakeClock::new()),
        );

        let result = pipeline.run_full(&request(16)).await;

        assert_eq!(result.status, PipelineStatus::Error);
        assert!(result.scenes.is_empty());
        assert!(result.error.as_deref().unwrap().contains("authentication"));
        assert!(result.script_path.is_some());
        assert!(pipeline.studio.submitted.is_empty());
        assert!(pipeline.studio.closed);
        assert_eq!(stored_record(dir.path(), &result).await.status, PipelineStatus::Error);
    }

    #[tokio::test]
    async fn every_scene_failing_is_a_generation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            config(dir.path()),
            CannedText::new(draft_json(2)),
            FakeStudio::new(vec![Take::Error("quota"), Take::Hang]),
            playable(),
            Arc::new(FakeClock::new()),
        );

        let result = pipeline.run_full(&request(16)).await;

        assert_eq!(result.status, PipelineStatus::GenerationFailed);
        assert_eq!(result.scenes.len(), 2);
        assert!(pipeline.assembler_encodes().is_empty());
    }

    #[tokio::test]
    async fn encoder_failure_is_a_merge_failure() {
        let dir = tempfile::tempdir().unwrap();
        let media = FakeMedia {
            fail_encode: true,
            ..playable()
        };
        let mut pipeline = Pipeline::new(
            config(dir.path()),
            CannedText::new(draft_json(1)),
            FakeStudio::new(vec![]),
            media,
            Arc::new(FakeClock::new()),
        );

        let result = pipeline.run_full(&request(8)).await;
        assert_eq!(result.status, PipelineStatus::MergeFailed);
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn bad_script_response_is_recorded_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(
            config(dir.path()),
            CannedText::new("no json here"),
            FakeStudio::new(vec![]),
            playable(),
            Arc::new(FakeClock::new()),
        );

        let result = pipeline.run_full(&request(16)).await;
        assert_eq!(result.status, PipelineStatus::Error);
        assert!(result.error.as_deref().unwrap().starts_with("parse error"));
        assert!(!pipeline.studio.opened);
        assert!(pipeline.studio.closed);
    }

    #[tokio::test]
    async fn script_only_saves_without_opening_the_studio() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            config(dir.path()),
            CannedText::new(draft_json(5)),
            FakeStudio::new(vec![]),
            playable(),
            Arc::new(FakeClock::new()),
        );

        let path = pipeline.script_only(&request(40)).await.unwrap();
        let script = load_script(&path).await.unwrap();
        assert_eq!(script.scenes.len(), 5);
        assert!(!pipeline.studio.opened);
    }

    impl<G, S> Pipeline<G, S, FakeMedia> {
        fn assembler_encodes(&self) -> Vec<Vec<String>> {
            self.assembler.backend().encodes.lock().unwrap().clone()
        }
    }
}
