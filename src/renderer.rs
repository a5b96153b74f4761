use crate::clock::{Clock, PollOutcome, PollPolicy, poll_until};
use crate::error::PipelineError;
use crate::flow::{RenderPoll, VideoStudio};
use crate::script::Scene;
use crate::{loge, logi, logok, logw};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

pub const RENDER_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const RENDER_CEILING: Duration = Duration::from_secs(300);
pub const SCENE_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneResult {
    #[serde(flatten)]
    pub scene: Scene,
    pub status: SceneStatus,
    pub video_url: Option<String>,
    pub download_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SceneResult {
    fn failed(scene: &Scene, err: PipelineError) -> Self {
        Self {
            scene: scene.clone(),
            status: SceneStatus::Failed,
            video_url: None,
            download_path: None,
            error: Some(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SceneStatus::Success
    }
}

/// `<project>_scene_<NNN>.mp4`, 1-based.
pub fn clip_file_name(project_name: &str, index: usize) -> String {
    format!("{}_scene_{:03}.mp4", project_name, index)
}

pub struct SceneRenderer {
    videos_dir: PathBuf,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
}

impl SceneRenderer {
    pub fn new(videos_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            videos_dir: videos_dir.into(),
            clock,
            policy: PollPolicy::with_ceiling(RENDER_POLL_INTERVAL, RENDER_CEILING),
        }
    }

    /// Submits one prompt and waits for the studio to report an outcome.
    async fn render_one<S: VideoStudio + ?Sized>(
        &self,
        studio: &mut S,
        scene_number: u32,
        prompt: &str,
    ) -> Result<String, PipelineError> {
        let preview: String = prompt.chars().take(100).collect();
        logi(format!("Submitting prompt: {}...", preview));

        let handle = studio
            .submit(prompt)
            .await
            .map_err(|e| PipelineError::SceneRender {
                scene: scene_number,
                reason: format!("submit failed: {}", e),
            })?;

        logi("Waiting for video generation...");
        let studio: &S = studio;
        let handle = &handle;
        let outcome = poll_until(self.policy, self.clock.as_ref(), |_| async move {
            let state = studio.poll(handle).await?;
            Ok::<_, anyhow::Error>(match state {
                RenderPoll::Pending => None,
                done => Some(done),
            })
        })
        .await;

        match outcome {
            PollOutcome::Ready(RenderPoll::Ready(url)) => Ok(url),
            PollOutcome::Ready(RenderPoll::Failed(message)) => Err(PipelineError::SceneRender {
                scene: scene_number,
                reason: format!("generation error: {}", message),
            }),
            PollOutcome::Ready(RenderPoll::Pending) | PollOutcome::TimedOut { .. } => {
                Err(PipelineError::SceneRender {
                    scene: scene_number,
                    reason: format!("timed out after {}s", self.policy.ceiling().as_secs()),
                })
            }
        }
    }

    async fn download<S: VideoStudio + ?Sized>(
        &self,
        studio: &mut S,
        scene_number: u32,
        url: &str,
        dest: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let wrap = |reason: String| PipelineError::Download {
            scene: scene_number,
            reason,
        };
        let bytes = studio.fetch(url).await.map_err(|e| wrap(e.to_string()))?;
        fs::create_dir_all(&self.videos_dir)
            .await
            .map_err(|e| wrap(e.to_string()))?;
        fs::write(dest, &bytes)
            .await
            .map_err(|e| wrap(format!("{}: {}", dest.display(), e)))?;
        Ok(dest.to_path_buf())
    }

    /// One result per scene, in input order. A failed scene never stops the
    /// loop.
    pub async fn render_scenes<S: VideoStudio + ?Sized>(
        &self,
        studio: &mut S,
        scenes: &[Scene],
        project_name: &str,
    ) -> Vec<SceneResult> {
        let total = scenes.len();
        let mut results = Vec::with_capacity(total);

        for (i, scene) in scenes.iter().enumerate() {
            let index = i + 1;
            logi(format!("=== Scene {}/{} ===", index, total));

            let result = match self
                .render_one(studio, scene.scene_number, scene.render_prompt())
                .await
            {
                Ok(url) => {
                    logok(format!("Video generated: {}", url));
                    let dest = self.videos_dir.join(clip_file_name(project_name, index));
                    let (download_path, error) =
                        match self.download(studio, scene.scene_number, &url, &dest).await {
                            Ok(path) => {
                                logok(format!("Video saved: {}", path.display()));
                                (Some(path), None)
                            }
                            Err(err) => {
                                loge(err.to_string());
                                (None, Some(err.to_string()))
                            }
                        };
                    SceneResult {
                        scene: scene.clone(),
                        status: SceneStatus::Success,
                        video_url: Some(url),
                        download_path,
                        error,
                    }
                }
                Err(err) => {
                    loge(err.to_string());
                    SceneResult::failed(scene, err)
                }
            };
            results.push(result);

            if index < total {
                logi(format!(
                    "Waiting {} seconds before next scene...",
                    SCENE_COOLDOWN.as_secs()
                ));
                self.clock.sleep(SCENE_COOLDOWN).await;
            }
        }

        let ok = results.iter().filter(|r| r.is_success()).count();
        if ok < total {
            logw(format!("{} of {} scenes failed", total - ok, total));
        }
        results
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::error::Result;
    use crate::flow::RenderHandle;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// How the fake studio answers the n-th submitted prompt.
    #[derive(Debug, Clone)]
    pub(crate) enum Take {
        Clip { pending: u32 },
        Error(&'static str),
        Hang,
        BrokenDownload,
    }

    #[derive(Default)]
    pub(crate) struct FakeStudio {
        pub takes: Vec<Take>,
        pub reject_login: bool,
        pub submitted: Vec<String>,
        pub opened: bool,
        pub closed: bool,
        pub cookies_saved: bool,
        pub polls: Mutex<u32>,
    }

    impl FakeStudio {
        pub(crate) fn new(takes: Vec<Take>) -> Self {
            Self {
                takes,
                ..Self::default()
            }
        }

        fn current(&self) -> Take {
            let i = self.submitted.len().saturating_sub(1);
            self.takes.get(i).cloned().unwrap_or(Take::Clip { pending: 0 })
        }

        fn clip_url(&self) -> String {
            format!("https://flow.test/clip{}.mp4", self.submitted.len())
        }
    }

    #[async_trait]
    impl VideoStudio for FakeStudio {
        async fn open(&mut self) -> Result<()> {
            if self.reject_login {
                return Err(PipelineError::Authentication("login page detected".to_string()));
            }
            self.opened = true;
            Ok(())
        }

        async fn persist_cookies(&mut self) -> Result<()> {
            self.cookies_saved = true;
            Ok(())
        }

        async fn submit(&mut self, prompt: &str) -> Result<RenderHandle> {
            self.submitted.push(prompt.to_string());
            *self.polls.lock().unwrap() = 0;
            Ok(RenderHandle::default())
        }

        async fn poll(&self, _handle: &RenderHandle) -> Result<RenderPoll> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            Ok(match self.current() {
                Take::Clip { pending } if *polls <= pending => RenderPoll::Pending,
                Take::Clip { .. } | Take::BrokenDownload => RenderPoll::Ready(self.clip_url()),
                Take::Error(msg) => RenderPoll::Failed(msg.to_string()),
                Take::Hang => RenderPoll::Pending,
            })
        }

        async fn fetch(&mut self, locator: &str) -> Result<Vec<u8>> {
            match self.current() {
                Take::BrokenDownload => Err(anyhow!("clip request HTTP 403").into()),
                _ => Ok(format!("clip:{}", locator).into_bytes()),
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    pub(crate) fn scenes(n: u32) -> Vec<Scene> {
        (1..=n)
            .map(|i| Scene {
                scene_number: i,
                duration: 8,
                description: format!("scene {}", i),
                veo_prompt: format!("prompt {}", i),
                camera_movement: "pan".to_string(),
                time_of_day: "dusk".to_string(),
                mood: "calm".to_string(),
            })
            .collect()
    }

    #[test]
    fn clip_names_are_zero_padded() {
        assert_eq!(clip_file_name("p", 1), "p_scene_001.mp4");
        assert_eq!(clip_file_name("p", 120), "p_scene_120.mp4");
    }

    #[tokio::test]
    async fn failed_scene_keeps_its_slot_and_the_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FakeClock::new());
        let renderer = SceneRenderer::new(dir.path(), clock.clone());
        let mut studio = FakeStudio::new(vec![
            Take::Clip { pending: 0 },
            Take::Error("quota exceeded"),
            Take::Clip { pending: 2 },
        ]);

        let results = renderer.render_scenes(&mut studio, &scenes(3), "p").await;

        let statuses: Vec<SceneStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![SceneStatus::Success, SceneStatus::Failed, SceneStatus::Success]
        );
        assert_eq!(
            results.iter().map(|r| r.scene.scene_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(results[1].error.as_deref().unwrap().contains("quota exceeded"));
        assert_eq!(results[1].download_path, None);

        let third = results[2].download_path.clone().unwrap();
        assert_eq!(third, dir.path().join("p_scene_003.mp4"));
        assert_eq!(
            fs::read_to_string(&third).await.unwrap(),
            "clip:https://flow.test/clip3.mp4"
        );
        assert_eq!(studio.submitted, vec!["prompt 1", "prompt 2", "prompt 3"]);

        // two cool-downs plus two poll intervals for the slow third scene
        let sleeps = clock.sleeps();
        assert_eq!(sleeps.iter().filter(|d| **d == SCENE_COOLDOWN).count(), 2);
        assert_eq!(clock.total(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn render_that_never_finishes_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FakeClock::new());
        let renderer = SceneRenderer::new(dir.path(), clock.clone());
        let mut studio = FakeStudio::new(vec![Take::Hang]);

        let results = renderer.render_scenes(&mut studio, &scenes(1), "p").await;

        assert_eq!(results[0].status, SceneStatus::Failed);
        assert!(results[0].error.as_deref().unwrap().contains("timed out after 300s"));
        assert_eq!(clock.sleeps().len(), 59);
        assert!(!clock.sleeps().contains(&SCENE_COOLDOWN));
    }

    #[tokio::test]
    async fn download_failure_keeps_success_without_a_path() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = SceneRenderer::new(dir.path(), Arc::new(FakeClock::new()));
        let mut studio = FakeStudio::new(vec![Take::BrokenDownload]);

        let results = renderer.render_scenes(&mut studio, &scenes(1), "p").await;

        assert_eq!(results[0].status, SceneStatus::Success);
        assert_eq!(
            results[0].video_url.as_deref(),
            Some("https://flow.test/clip1.mp4")
        );
        assert_eq!(results[0].download_path, None);
        assert!(results[0].error.as_deref().unwrap().contains("download failed"));
    }

    #[test]
    fn result_record_flattens_the_scene() {
        let result = SceneResult {
            scene: scenes(1).remove(0),
            status: SceneStatus::Failed,
            video_url: None,
            download_path: None,
            error: Some("boom".to_string()),
        };
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["scene_number"], 1);
        assert_eq!(v["veo_prompt"], "prompt 1");
        assert_eq!(v["status"], "failed");
        assert!(v["video_url"].is_null());
    }
}
